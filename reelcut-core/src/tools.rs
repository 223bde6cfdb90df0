//! Thin layer over the external command-line tools (yt-dlp, ffmpeg, ffprobe).

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::ToolsSection;

const STDERR_TAIL_CHARS: usize = 2000;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} not found at {binary}")]
    Missing { tool: String, binary: PathBuf },
    #[error("{tool} timed out after {after:?}")]
    Timeout { tool: String, after: Duration },
    #[error("{tool} exited with status {status:?}: {stderr}")]
    Failed {
        tool: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("failed to run {tool}: {source}")]
    Io {
        tool: String,
        source: std::io::Error,
    },
}

pub type ToolResult<T> = Result<T, ToolError>;

/// Runs `command` to completion, bounded by `limit`.
///
/// The child is killed when the returned future is dropped, so a caller
/// that gives up (request timeout, client disconnect) does not leak
/// processes. Non-zero exits are reported with the tail of stderr.
pub async fn run_tool(tool: &str, mut command: Command, limit: Duration) -> ToolResult<Output> {
    command
        .kill_on_drop(true)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let binary = PathBuf::from(command.as_std().get_program());
    tracing::debug!(tool, binary = %binary.display(), "spawning external tool");
    match timeout(limit, command.output()).await {
        Ok(Ok(output)) if output.status.success() => Ok(output),
        Ok(Ok(output)) => Err(ToolError::Failed {
            tool: tool.to_string(),
            status: output.status.code(),
            stderr: stderr_tail(&output.stderr),
        }),
        Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => Err(ToolError::Missing {
            tool: tool.to_string(),
            binary,
        }),
        Ok(Err(source)) => Err(ToolError::Io {
            tool: tool.to_string(),
            source,
        }),
        Err(_) => Err(ToolError::Timeout {
            tool: tool.to_string(),
            after: limit,
        }),
    }
}

fn stderr_tail(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_TAIL_CHARS {
        trimmed.to_string()
    } else {
        trimmed.chars().skip(count - STDERR_TAIL_CHARS).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub name: String,
    pub binary: PathBuf,
    pub version: Option<String>,
    pub error: Option<String>,
}

impl ToolStatus {
    pub fn is_available(&self) -> bool {
        self.version.is_some()
    }
}

/// Asks a tool for its version; the first non-empty stdout line is kept.
pub async fn probe_version(name: &str, binary: &Path, flag: &str, limit: Duration) -> ToolStatus {
    let mut command = Command::new(binary);
    command.arg(flag);
    match run_tool(name, command, limit).await {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let version = stdout
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .unwrap_or("unknown")
                .to_string();
            ToolStatus {
                name: name.to_string(),
                binary: binary.to_path_buf(),
                version: Some(version),
                error: None,
            }
        }
        Err(err) => ToolStatus {
            name: name.to_string(),
            binary: binary.to_path_buf(),
            version: None,
            error: Some(err.to_string()),
        },
    }
}

pub async fn inspect_tools(tools: &ToolsSection) -> Vec<ToolStatus> {
    let limit = Duration::from_secs(tools.probe_timeout_seconds.max(1));
    vec![
        probe_version("yt-dlp", &tools.yt_dlp, "--version", limit).await,
        probe_version("ffmpeg", &tools.ffmpeg, "-version", limit).await,
        probe_version("ffprobe", &tools.ffprobe, "-version", limit).await,
    ]
}
