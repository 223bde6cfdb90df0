//! Media inspection and rendering on top of ffprobe/ffmpeg.

mod crop;
mod editor;
mod probe;

use std::path::PathBuf;

use thiserror::Error;

use crate::tools::ToolError;

pub use crop::{AspectRatio, CropWindow};
pub use editor::{SegmentWindow, ShortEditor};
pub use probe::{MediaInfo, MediaProbe};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("invalid ffprobe payload: {0}")]
    Parse(String),
    #[error("video stream metadata not available")]
    MissingVideoStream,
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("render produced no output at {0}")]
    MissingOutput(PathBuf),
}

impl From<serde_json::Error> for MediaError {
    fn from(source: serde_json::Error) -> Self {
        MediaError::Parse(source.to_string())
    }
}

pub type MediaResult<T> = Result<T, MediaError>;
