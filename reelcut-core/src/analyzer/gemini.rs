use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{
    build_prompt, parse_suggestion, AnalyzerError, AnalyzerResult, SegmentAnalyzer,
    SegmentSuggestion,
};
use crate::config::{AnalysisSection, ApiKey};

const API_KEY_HEADER: &str = "x-goog-api-key";
const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";

/// Segment analysis backed by the Gemini File API and `generateContent`.
pub struct GeminiAnalyzer {
    client: Client,
    api_base: String,
    model: String,
    api_key: ApiKey,
    poll_interval: Duration,
    processing_timeout: Duration,
    request_timeout: Duration,
    upload_timeout: Duration,
    prompt: String,
}

impl GeminiAnalyzer {
    pub fn new(settings: &AnalysisSection, api_key: ApiKey) -> AnalyzerResult<Self> {
        // No client-wide deadline: the upload streams the whole source video
        // and gets its own, longer limit.
        let client = Client::builder()
            .user_agent(concat!("reelcut/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key,
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
            processing_timeout: Duration::from_secs(settings.processing_timeout_seconds),
            request_timeout: Duration::from_secs(settings.request_timeout_seconds.max(1)),
            upload_timeout: Duration::from_secs(settings.upload_timeout_seconds.max(1)),
            prompt: build_prompt(settings.min_segment_seconds, settings.max_segment_seconds),
        })
    }

    async fn upload(&self, video: &Path) -> AnalyzerResult<RemoteFile> {
        let io_err = |source| AnalyzerError::Io {
            source,
            path: video.to_path_buf(),
        };
        let size = tokio::fs::metadata(video).await.map_err(io_err)?.len();
        let mime_type = mime_for(video);
        let display_name = video
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "video".to_string());

        let start = self
            .client
            .post(format!("{}/upload/v1beta/files", self.api_base))
            .timeout(self.request_timeout)
            .header(API_KEY_HEADER, self.api_key.expose())
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .await?;
        let start = ensure_success(start).await?;
        let upload_url = start
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or(AnalyzerError::MissingField("x-goog-upload-url header"))?;

        let file = tokio::fs::File::open(video).await.map_err(io_err)?;
        let finished = self
            .client
            .post(upload_url)
            .timeout(self.upload_timeout)
            .header(CONTENT_LENGTH, size)
            .header(CONTENT_TYPE, mime_type)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(reqwest::Body::from(file))
            .send()
            .await?;
        let envelope: UploadEnvelope = ensure_success(finished).await?.json().await?;
        info!(target: "analyzer", file = %envelope.file.name, size_bytes = size, "video uploaded");
        Ok(envelope.file)
    }

    async fn fetch_file(&self, name: &str) -> AnalyzerResult<RemoteFile> {
        let response = self
            .client
            .get(format!("{}/v1beta/{}", self.api_base, name))
            .timeout(self.request_timeout)
            .header(API_KEY_HEADER, self.api_key.expose())
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    async fn wait_until_active(&self, mut file: RemoteFile) -> AnalyzerResult<RemoteFile> {
        let started = Instant::now();
        while file.state == FileState::Processing {
            if started.elapsed() >= self.processing_timeout {
                return Err(AnalyzerError::ProcessingTimeout(self.processing_timeout));
            }
            sleep(self.poll_interval).await;
            file = self.fetch_file(&file.name).await?;
            debug!(target: "analyzer", file = %file.name, state = ?file.state, "polled remote file");
        }
        match file.state {
            FileState::Failed => Err(AnalyzerError::ProcessingFailed),
            _ => Ok(file),
        }
    }

    async fn generate(&self, file: &RemoteFile) -> AnalyzerResult<String> {
        let mime_type = file.mime_type.as_deref().unwrap_or("video/mp4");
        let body = json!({
            "contents": [{
                "parts": [
                    { "file_data": { "mime_type": mime_type, "file_uri": file.uri } },
                    { "text": self.prompt },
                ]
            }],
            "generationConfig": { "response_mime_type": "application/json" }
        });
        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.api_base, self.model
            ))
            .timeout(self.request_timeout)
            .header(API_KEY_HEADER, self.api_key.expose())
            .json(&body)
            .send()
            .await?;
        let parsed: GenerateResponse = ensure_success(response).await?.json().await?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(AnalyzerError::EmptyResponse);
        }
        Ok(text)
    }

    fn delete_request(&self, name: &str) -> RequestBuilder {
        self.client
            .delete(format!("{}/v1beta/{}", self.api_base, name))
            .timeout(self.request_timeout)
            .header(API_KEY_HEADER, self.api_key.expose())
    }

    async fn delete(&self, name: &str) -> AnalyzerResult<()> {
        let response = self.delete_request(name).send().await?;
        ensure_success(response).await?;
        Ok(())
    }
}

/// Deletes an uploaded file if the analysis future is dropped before it
/// got to delete it itself (request timeout, client gone).
struct RemoteFileGuard {
    name: String,
    request: Option<RequestBuilder>,
}

impl RemoteFileGuard {
    fn new(analyzer: &GeminiAnalyzer, name: &str) -> Self {
        Self {
            name: name.to_string(),
            request: Some(analyzer.delete_request(name)),
        }
    }

    fn disarm(mut self) {
        self.request = None;
    }
}

impl Drop for RemoteFileGuard {
    fn drop(&mut self) {
        let Some(request) = self.request.take() else {
            return;
        };
        let name = std::mem::take(&mut self.name);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(target: "analyzer", file = %name, "no runtime to delete abandoned remote file");
            return;
        };
        runtime.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    info!(target: "analyzer", file = %name, "deleted abandoned remote file");
                }
                Ok(response) => {
                    warn!(target: "analyzer", file = %name, status = %response.status(), "failed to delete abandoned remote file");
                }
                Err(err) => {
                    warn!(target: "analyzer", file = %name, error = %err, "failed to delete abandoned remote file");
                }
            }
        });
    }
}

#[async_trait]
impl SegmentAnalyzer for GeminiAnalyzer {
    async fn suggest_segment(&self, video: &Path) -> AnalyzerResult<SegmentSuggestion> {
        let file = self.upload(video).await?;
        let guard = RemoteFileGuard::new(self, &file.name);
        let answer = match self.wait_until_active(file.clone()).await {
            Ok(active) => self.generate(&active).await,
            Err(err) => Err(err),
        };
        if let Err(err) = self.delete(&file.name).await {
            warn!(target: "analyzer", file = %file.name, error = %err, "failed to delete remote file");
        }
        guard.disarm();
        let text = answer?;
        parse_suggestion(&text).map_err(|err| {
            warn!(target: "analyzer", answer = %text, "failed to parse model answer");
            err
        })
    }
}

async fn ensure_success(response: Response) -> AnalyzerResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AnalyzerError::Api {
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("mov") => "video/quicktime",
        _ => "video/mp4",
    }
}

#[derive(Debug, Deserialize)]
struct UploadEnvelope {
    file: RemoteFile,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteFile {
    name: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    state: FileState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum FileState {
    #[default]
    StateUnspecified,
    Processing,
    Active,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}
