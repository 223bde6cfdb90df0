use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{DownloadSection, ToolsSection};
use crate::tools::{run_tool, ToolError};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("yt-dlp failed: {0}")]
    Tool(#[from] ToolError),
    #[error("download produced no file at {0}")]
    MissingOutput(PathBuf),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type DownloadResult<T> = Result<T, DownloadError>;

/// Fetches remote videos through yt-dlp.
#[derive(Debug, Clone)]
pub struct Downloader {
    binary: PathBuf,
    settings: DownloadSection,
}

impl Downloader {
    pub fn new(tools: &ToolsSection, settings: DownloadSection) -> Self {
        Self {
            binary: tools.yt_dlp.clone(),
            settings,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout_seconds)
    }

    /// Downloads `url` to `output` and returns the path of the file written.
    ///
    /// yt-dlp may settle on a different extension than requested after a
    /// merge, so a missing `output` falls back to any file in the same
    /// directory sharing its stem.
    pub async fn fetch(&self, url: &str, output: &Path) -> DownloadResult<PathBuf> {
        let args = self.build_args(url, output);
        debug!(binary = %self.binary.display(), ?args, "invoking yt-dlp");
        let mut command = Command::new(&self.binary);
        command.args(&args);
        run_tool("yt-dlp", command, self.timeout()).await?;

        let located = locate_output(output).await?;
        let size = fs::metadata(&located)
            .await
            .map_err(|source| DownloadError::Io {
                path: located.clone(),
                source,
            })?
            .len();
        info!(path = %located.display(), size_bytes = size, "download finished");
        Ok(located)
    }

    pub fn build_args(&self, url: &str, output: &Path) -> Vec<String> {
        let mut args = vec![
            "--format".to_string(),
            self.settings.format.clone(),
            "--output".to_string(),
            output.to_string_lossy().to_string(),
            "--merge-output-format".to_string(),
            "mp4".to_string(),
            "--no-playlist".to_string(),
            "--quiet".to_string(),
            "--no-warnings".to_string(),
            "--no-progress".to_string(),
        ];
        if !self.settings.check_certificate {
            args.push("--no-check-certificates".to_string());
        }
        if !self.settings.source_address.is_empty() {
            args.push("--source-address".to_string());
            args.push(self.settings.source_address.clone());
        }
        if !self.settings.user_agent.is_empty() {
            args.push("--user-agent".to_string());
            args.push(self.settings.user_agent.clone());
        }
        // Keeps a url starting with '-' from being read as an option.
        args.push("--".to_string());
        args.push(url.to_string());
        args
    }
}

async fn locate_output(expected: &Path) -> DownloadResult<PathBuf> {
    if fs::try_exists(expected).await.unwrap_or(false) {
        return Ok(expected.to_path_buf());
    }
    let (Some(dir), Some(stem)) = (expected.parent(), expected.file_stem()) else {
        return Err(DownloadError::MissingOutput(expected.to_path_buf()));
    };
    let mut entries = fs::read_dir(dir).await.map_err(|source| DownloadError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|source| DownloadError::Io {
            path: dir.to_path_buf(),
            source,
        })?
    {
        let path = entry.path();
        let partial = path
            .extension()
            .map(|ext| ext == "part" || ext == "ytdl")
            .unwrap_or(false);
        if path.file_stem() == Some(stem) && !partial && path.is_file() {
            return Ok(path);
        }
    }
    Err(DownloadError::MissingOutput(expected.to_path_buf()))
}
