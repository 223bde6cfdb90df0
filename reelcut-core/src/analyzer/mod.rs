mod gemini;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use gemini::GeminiAnalyzer;

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("analysis api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("analysis api response missing {0}")]
    MissingField(&'static str),
    #[error("remote video processing failed")]
    ProcessingFailed,
    #[error("remote video processing did not finish within {0:?}")]
    ProcessingTimeout(std::time::Duration),
    #[error("model returned no text")]
    EmptyResponse,
    #[error("could not parse model answer: {0}")]
    Unparseable(String),
    #[error("io error reading {path}: {source}")]
    Io {
        source: std::io::Error,
        path: std::path::PathBuf,
    },
}

pub type AnalyzerResult<T> = Result<T, AnalyzerError>;

/// Segment picked by the model. Times are optional because the model is
/// free to omit them; the pipeline turns a missing bound into an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentSuggestion {
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub reason: String,
}

#[async_trait]
pub trait SegmentAnalyzer: Send + Sync {
    async fn suggest_segment(&self, video: &Path) -> AnalyzerResult<SegmentSuggestion>;
}

pub fn build_prompt(min_seconds: u32, max_seconds: u32) -> String {
    format!(
        r#"Analyze this video and identify the ONE most viral/interesting segment suitable for a YouTube Short (vertical video).
The segment should be between {min_seconds} and {max_seconds} seconds long.

Return a JSON object with the following fields:
- start_time: (float) Start time in seconds.
- end_time: (float) End time in seconds.
- title: (string) A catchy title for the short.
- description: (string) A short description.
- reason: (string) Why this part is interesting.

Example JSON:
{{
    "start_time": 120.5,
    "end_time": 155.0,
    "title": "Crazy Stunt!",
    "description": "Watch this insane moment...",
    "reason": "High energy moment"
}}"#
    )
}

/// Parses the model answer into a suggestion.
///
/// Accepts a bare object, an object wrapped in a markdown code fence, or a
/// one-element array; times may be numbers or numeric strings.
pub fn parse_suggestion(text: &str) -> AnalyzerResult<SegmentSuggestion> {
    let body = strip_code_fence(text.trim());
    let value: Value = serde_json::from_str(body)
        .map_err(|err| AnalyzerError::Unparseable(format!("{err}: {}", preview(body))))?;
    let object = match value {
        Value::Object(map) => map,
        Value::Array(items) => match items.into_iter().next() {
            Some(Value::Object(map)) => map,
            _ => return Err(AnalyzerError::Unparseable(preview(body))),
        },
        _ => return Err(AnalyzerError::Unparseable(preview(body))),
    };
    Ok(SegmentSuggestion {
        start_time: object.get("start_time").and_then(seconds),
        end_time: object.get("end_time").and_then(seconds),
        title: text_field(object.get("title")),
        description: text_field(object.get("description")),
        reason: text_field(object.get("reason")),
    })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    rest.trim_end().trim_end_matches("```").trim()
}

fn seconds(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|value| value.is_finite())
}

fn text_field(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 200;
    if text.chars().count() <= LIMIT {
        text.to_string()
    } else {
        let head: String = text.chars().take(LIMIT).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_object() {
        let suggestion = parse_suggestion(
            r#"{"start_time": 120.5, "end_time": 155.0, "title": "Crazy Stunt!",
                "description": "Watch this insane moment...", "reason": "High energy moment"}"#,
        )
        .unwrap();
        assert_eq!(suggestion.start_time, Some(120.5));
        assert_eq!(suggestion.end_time, Some(155.0));
        assert_eq!(suggestion.title, "Crazy Stunt!");
        assert_eq!(suggestion.reason, "High energy moment");
    }

    #[test]
    fn parses_fenced_array_with_string_times() {
        let suggestion = parse_suggestion(
            "```json\n[{\"start_time\": \"12\", \"end_time\": \"48.5\", \"title\": \"Hook\"}]\n```",
        )
        .unwrap();
        assert_eq!(suggestion.start_time, Some(12.0));
        assert_eq!(suggestion.end_time, Some(48.5));
        assert_eq!(suggestion.title, "Hook");
        assert!(suggestion.description.is_empty());
    }

    #[test]
    fn missing_times_stay_empty() {
        let suggestion = parse_suggestion(r#"{"title": "No times", "start_time": null}"#).unwrap();
        assert_eq!(suggestion.start_time, None);
        assert_eq!(suggestion.end_time, None);
    }

    #[test]
    fn prose_is_unparseable() {
        let err = parse_suggestion("I could not watch the video.").unwrap_err();
        assert!(matches!(err, AnalyzerError::Unparseable(_)));
        let err = parse_suggestion("[]").unwrap_err();
        assert!(matches!(err, AnalyzerError::Unparseable(_)));
    }

    #[test]
    fn prompt_carries_length_bounds() {
        let prompt = build_prompt(15, 45);
        assert!(prompt.contains("between 15 and 45 seconds"));
        assert!(prompt.contains("\"start_time\": 120.5"));
    }
}
