mod error;
mod types;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use tracing::{info, info_span, warn, Instrument};
use url::Url;
use uuid::Uuid;

use crate::analyzer::{GeminiAnalyzer, SegmentAnalyzer};
use crate::config::ServiceConfig;
use crate::downloader::Downloader;
use crate::media::{AspectRatio, CropWindow, MediaProbe, ShortEditor};

pub use error::{PipelineError, PipelineResult};
pub use types::{
    resolve_window, JobWorkspace, RetryPolicy, ShortArtifact, ShortMetadata, FINAL_VIDEO_NAME,
    RAW_VIDEO_NAME,
};

/// Download → analyze → cut/crop, one job per call.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<ServiceConfig>,
    downloader: Downloader,
    probe: MediaProbe,
    editor: ShortEditor,
    analyzer: Option<Arc<dyn SegmentAnalyzer>>,
    retry_policy: RetryPolicy,
    retry_sleep_cap: Duration,
}

impl Pipeline {
    /// Builds the pipeline with the Gemini analyzer when an API key is
    /// configured. Without one the pipeline still constructs, but every job
    /// is refused with [`PipelineError::AnalyzerNotConfigured`].
    pub fn from_config(config: ServiceConfig) -> PipelineResult<Self> {
        let analyzer = match config.analysis.api_key.clone() {
            Some(key) => Some(
                Arc::new(GeminiAnalyzer::new(&config.analysis, key)?) as Arc<dyn SegmentAnalyzer>
            ),
            None => None,
        };
        Ok(Self::with_parts(config, analyzer))
    }

    pub fn with_parts(config: ServiceConfig, analyzer: Option<Arc<dyn SegmentAnalyzer>>) -> Self {
        let downloader = Downloader::new(&config.tools, config.download.clone());
        let probe = MediaProbe::new(&config.tools);
        let editor = ShortEditor::new(&config.tools, config.render.clone());
        let retry_policy = RetryPolicy::from(&config.download);
        Self {
            config: Arc::new(config),
            downloader,
            probe,
            editor,
            analyzer,
            retry_policy,
            retry_sleep_cap: Duration::from_secs(60),
        }
    }

    pub fn with_retry_sleep_cap(mut self, cap: Duration) -> Self {
        self.retry_sleep_cap = cap;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn ensure_ready(&self) -> PipelineResult<()> {
        if self.analyzer.is_none() {
            return Err(PipelineError::AnalyzerNotConfigured);
        }
        Ok(())
    }

    /// Cheap admission checks, in job order: the url first, then the
    /// analyzer. Returns the normalized url.
    pub fn check_request(&self, url: &str) -> PipelineResult<String> {
        let url = validate_url(url)?;
        self.ensure_ready()?;
        Ok(url)
    }

    pub async fn process(&self, url: &str) -> PipelineResult<ShortArtifact> {
        let job_id = Uuid::new_v4();
        let span = info_span!("job", id = %job_id);
        self.run_job(job_id, url).instrument(span).await
    }

    async fn run_job(&self, job_id: Uuid, url: &str) -> PipelineResult<ShortArtifact> {
        let url = self.check_request(url)?;
        let analyzer = self
            .analyzer
            .as_ref()
            .ok_or(PipelineError::AnalyzerNotConfigured)?;
        let workspace = JobWorkspace::create(&self.config.paths.work_root(), job_id).await?;

        info!(%url, workspace = %workspace.root().display(), "downloading");
        let download_operation = || async { self.downloader.fetch(&url, &workspace.source).await };
        let source = self.retry_operation("download", download_operation).await?;

        let media = self.probe.inspect(&source).await?;
        info!(
            width = media.width,
            height = media.height,
            duration = ?media.duration,
            "probed source"
        );

        info!("analyzing");
        let suggestion = analyzer.suggest_segment(&source).await?;
        info!(?suggestion, "analysis result");

        let window = resolve_window(&suggestion, media.duration)?;
        let length = window.duration();
        let bounds = &self.config.analysis;
        if length < f64::from(bounds.min_segment_seconds)
            || length > f64::from(bounds.max_segment_seconds)
        {
            warn!(
                length,
                min = bounds.min_segment_seconds,
                max = bounds.max_segment_seconds,
                "suggested segment outside requested length"
            );
        }

        let aspect = AspectRatio::new(
            self.config.render.aspect_width,
            self.config.render.aspect_height,
        );
        let crop = CropWindow::centered(media.width, media.height, aspect)?;

        info!("rendering");
        let size_bytes = self
            .editor
            .render(&source, &workspace.output, window, crop)
            .await?;

        let metadata = ShortMetadata {
            job_id,
            source_url: url,
            title: suggestion.title,
            description: suggestion.description,
            reason: suggestion.reason,
            window,
            crop,
            source_media: media,
            size_bytes,
            completed_at: Utc::now(),
        };
        Ok(ShortArtifact::new(metadata, workspace))
    }

    async fn retry_operation<F, Fut, T, E>(&self, label: &str, mut operation: F) -> PipelineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: Into<PipelineError> + std::fmt::Display,
    {
        let attempts = self.retry_policy.attempts.max(1);
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 >= attempts => return Err(err.into()),
                Err(err) => {
                    let delay = self.retry_policy.compute_delay(attempt);
                    let capped = delay.min(self.retry_sleep_cap);
                    warn!(attempt = attempt + 1, wait = ?capped, stage = label, error = %err, "retrying operation");
                    if !capped.is_zero() {
                        sleep(capped).await;
                    }
                }
            }
            attempt += 1;
        }
    }
}

fn validate_url(raw: &str) -> PipelineResult<String> {
    let trimmed = raw.trim();
    let invalid = |reason: String| PipelineError::InvalidUrl {
        url: trimmed.to_string(),
        reason,
    };
    let parsed = Url::parse(trimmed).map_err(|err| invalid(err.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", parsed.scheme())));
    }
    if parsed.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(parsed.to_string())
}
