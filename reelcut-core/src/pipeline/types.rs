use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tempfile::TempDir;
use tokio::fs;
use uuid::Uuid;

use super::error::{PipelineError, PipelineResult};
use crate::analyzer::SegmentSuggestion;
use crate::media::{CropWindow, MediaInfo, SegmentWindow};

pub const RAW_VIDEO_NAME: &str = "raw_video.mp4";
pub const FINAL_VIDEO_NAME: &str = "final_short.mp4";

/// Scratch directory of one job; removed from disk when dropped.
#[derive(Debug)]
pub struct JobWorkspace {
    dir: TempDir,
    pub source: PathBuf,
    pub output: PathBuf,
}

impl JobWorkspace {
    pub async fn create(root: &Path, job_id: Uuid) -> PipelineResult<Self> {
        let io_err = |source| PipelineError::Io {
            path: root.to_path_buf(),
            source,
        };
        fs::create_dir_all(root).await.map_err(io_err)?;
        let parent = root.to_path_buf();
        let dir = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(&format!("reelcut-{job_id}-"))
                .tempdir_in(parent)
        })
        .await
        .map_err(|err| io_err(std::io::Error::other(err)))?
        .map_err(io_err)?;
        let source = dir.path().join(RAW_VIDEO_NAME);
        let output = dir.path().join(FINAL_VIDEO_NAME);
        Ok(Self {
            dir,
            source,
            output,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_range: [u32; 2],
}

impl RetryPolicy {
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        if self.attempts <= 1 {
            return Duration::from_secs(self.delay_range[0] as u64);
        }
        let min = self.delay_range[0] as f64;
        let max = self.delay_range[1] as f64;
        let ratio = (attempt as f64) / ((self.attempts - 1) as f64);
        let seconds = min + (max - min) * ratio.min(1.0);
        Duration::from_secs(seconds.round() as u64)
    }
}

impl From<&crate::config::DownloadSection> for RetryPolicy {
    fn from(section: &crate::config::DownloadSection) -> Self {
        Self {
            attempts: section.max_attempts.max(1),
            delay_range: section.retry_delay_seconds,
        }
    }
}

/// Everything a caller learns about a finished short besides its bytes.
#[derive(Debug, Clone, Serialize)]
pub struct ShortMetadata {
    pub job_id: Uuid,
    pub source_url: String,
    pub title: String,
    pub description: String,
    pub reason: String,
    pub window: SegmentWindow,
    pub crop: CropWindow,
    pub source_media: MediaInfo,
    pub size_bytes: u64,
    pub completed_at: DateTime<Utc>,
}

/// Rendered short. The file lives inside the job workspace, so it stays
/// readable exactly as long as this value is alive.
#[derive(Debug)]
pub struct ShortArtifact {
    pub metadata: ShortMetadata,
    workspace: JobWorkspace,
}

impl ShortArtifact {
    pub(crate) fn new(metadata: ShortMetadata, workspace: JobWorkspace) -> Self {
        Self {
            metadata,
            workspace,
        }
    }

    pub fn path(&self) -> &Path {
        &self.workspace.output
    }

    pub async fn read(&self) -> PipelineResult<Vec<u8>> {
        fs::read(self.path())
            .await
            .map_err(|source| PipelineError::Io {
                path: self.path().to_path_buf(),
                source,
            })
    }

    /// Copies the short to `destination` and releases the workspace.
    pub async fn persist(self, destination: &Path) -> PipelineResult<ShortMetadata> {
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| PipelineError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        fs::copy(self.path(), destination)
            .await
            .map_err(|source| PipelineError::Io {
                path: destination.to_path_buf(),
                source,
            })?;
        Ok(self.metadata)
    }
}

/// Turns the model's suggestion into a window that fits the source.
///
/// Both bounds are required. The end is clamped to the probed duration,
/// and a window that ends up empty or inverted is rejected.
pub fn resolve_window(
    suggestion: &SegmentSuggestion,
    duration: Option<f64>,
) -> PipelineResult<SegmentWindow> {
    let (Some(start), Some(end)) = (suggestion.start_time, suggestion.end_time) else {
        return Err(PipelineError::MissingSegmentBounds);
    };
    let invalid = |reason: &str| PipelineError::InvalidSegment {
        start,
        end,
        reason: reason.to_string(),
    };
    if !start.is_finite() || !end.is_finite() {
        return Err(invalid("bounds are not finite"));
    }
    if start < 0.0 {
        return Err(invalid("start is negative"));
    }
    let end = match duration {
        Some(total) if end > total => total,
        _ => end,
    };
    if end <= start {
        return Err(PipelineError::InvalidSegment {
            start,
            end,
            reason: "segment is empty or lies past the end of the video".to_string(),
        });
    }
    Ok(SegmentWindow { start, end })
}
