use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::{MediaError, MediaResult};
use crate::config::ToolsSection;
use crate::tools::run_tool;

/// Display geometry and length of a media file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub duration: Option<f64>,
    pub fps: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct MediaProbe {
    binary: PathBuf,
    timeout: Duration,
}

impl MediaProbe {
    pub fn new(tools: &ToolsSection) -> Self {
        Self {
            binary: tools.ffprobe.clone(),
            timeout: Duration::from_secs(tools.probe_timeout_seconds.max(1)),
        }
    }

    pub async fn inspect(&self, path: &Path) -> MediaResult<MediaInfo> {
        let mut command = Command::new(&self.binary);
        command
            .arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-show_format")
            .arg(path);
        let output = run_tool("ffprobe", command, self.timeout).await?;
        let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
        media_info_from(&parsed)
    }
}

fn media_info_from(data: &FfprobeOutput) -> MediaResult<MediaInfo> {
    let video = data
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"))
        .ok_or(MediaError::MissingVideoStream)?;
    let (mut width, mut height) = match (video.width, video.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => (width, height),
        (width, height) => {
            return Err(MediaError::InvalidDimensions {
                width: width.unwrap_or(0),
                height: height.unwrap_or(0),
            })
        }
    };
    // ffmpeg autorotates on decode, so the crop must use display geometry.
    if video.rotation().map(|deg| deg.rem_euclid(180) == 90).unwrap_or(false) {
        std::mem::swap(&mut width, &mut height);
    }
    let duration = data
        .format
        .duration
        .as_deref()
        .or(video.duration.as_deref())
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value > 0.0);
    let fps = parse_rate(video.avg_frame_rate.as_deref())
        .or_else(|| parse_rate(video.r_frame_rate.as_deref()));
    Ok(MediaInfo {
        width,
        height,
        duration,
        fps,
    })
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    avg_frame_rate: Option<String>,
    #[serde(default)]
    r_frame_rate: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    side_data_list: Vec<SideData>,
}

impl FfprobeStream {
    fn rotation(&self) -> Option<i64> {
        self.side_data_list
            .iter()
            .find_map(|side| side.rotation)
            .map(|deg| deg.round() as i64)
            .or_else(|| self.tags.get("rotate").and_then(|v| v.parse().ok()))
    }
}

#[derive(Debug, Deserialize)]
struct SideData {
    #[serde(default)]
    rotation: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

fn parse_rate(rate: Option<&str>) -> Option<f64> {
    let rate = rate?;
    let value = if let Some((numerator, denominator)) = rate.split_once('/') {
        let numerator = numerator.parse::<f64>().ok()?;
        let denominator = denominator.parse::<f64>().ok()?;
        if denominator == 0.0 {
            return None;
        }
        numerator / denominator
    } else {
        rate.parse::<f64>().ok()?
    };
    (value > 0.0).then_some(value)
}
