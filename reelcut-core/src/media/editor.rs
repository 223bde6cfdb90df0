use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio::fs;
use tokio::process::Command;
use tracing::info;

use super::{CropWindow, MediaError, MediaResult};
use crate::config::{RenderSection, ToolsSection};
use crate::tools::run_tool;

/// Portion of the source to keep, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SegmentWindow {
    pub start: f64,
    pub end: f64,
}

impl SegmentWindow {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Cuts a segment out of a source file and re-encodes it with a crop.
#[derive(Debug, Clone)]
pub struct ShortEditor {
    binary: PathBuf,
    settings: RenderSection,
}

impl ShortEditor {
    pub fn new(tools: &ToolsSection, settings: RenderSection) -> Self {
        Self {
            binary: tools.ffmpeg.clone(),
            settings,
        }
    }

    pub async fn render(
        &self,
        input: &Path,
        output: &Path,
        window: SegmentWindow,
        crop: CropWindow,
    ) -> MediaResult<u64> {
        let args = self.build_args(input, output, window, crop);
        let mut command = Command::new(&self.binary);
        command.args(&args);
        let limit = Duration::from_secs(self.settings.timeout_seconds);
        run_tool("ffmpeg", command, limit).await?;

        let size = match fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => meta.len(),
            _ => return Err(MediaError::MissingOutput(output.to_path_buf())),
        };
        info!(
            output = %output.display(),
            start = window.start,
            end = window.end,
            crop = %crop.filter(),
            size_bytes = size,
            "segment rendered"
        );
        Ok(size)
    }

    /// Input seeking (`-ss` before `-i`) is frame accurate when re-encoding
    /// and avoids decoding everything before the segment.
    pub fn build_args(
        &self,
        input: &Path,
        output: &Path,
        window: SegmentWindow,
        crop: CropWindow,
    ) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-ss".to_string(),
            format!("{:.3}", window.start),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-t".to_string(),
            format!("{:.3}", window.duration()),
            "-vf".to_string(),
            crop.filter(),
            "-c:v".to_string(),
            self.settings.video_codec.clone(),
        ];
        if !self.settings.preset.is_empty() {
            args.push("-preset".to_string());
            args.push(self.settings.preset.clone());
        }
        args.push("-crf".to_string());
        args.push(self.settings.crf.to_string());
        args.push("-pix_fmt".to_string());
        args.push("yuv420p".to_string());
        args.push("-c:a".to_string());
        args.push(self.settings.audio_codec.clone());
        if self.settings.faststart {
            args.push("-movflags".to_string());
            args.push("+faststart".to_string());
        }
        args.push(output.to_string_lossy().to_string());
        args
    }
}
