use std::path::PathBuf;

use thiserror::Error;

use crate::analyzer::AnalyzerError;
use crate::downloader::DownloadError;
use crate::media::MediaError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("GEMINI_API_KEY not set")]
    AnalyzerNotConfigured,
    #[error("download failed: {0}")]
    Download(#[from] DownloadError),
    #[error("analysis failed: {0}")]
    Analysis(#[from] AnalyzerError),
    #[error("Could not determine start/end times")]
    MissingSegmentBounds,
    #[error("invalid segment {start:.3}s..{end:.3}s: {reason}")]
    InvalidSegment { start: f64, end: f64, reason: String },
    #[error("media processing failed: {0}")]
    Media(#[from] MediaError),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl PipelineError {
    /// Whether the caller, rather than the service, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, PipelineError::InvalidUrl { .. })
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
