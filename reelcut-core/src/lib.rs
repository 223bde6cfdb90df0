pub mod analyzer;
pub mod config;
pub mod downloader;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod server;
pub mod tools;

pub use analyzer::{
    AnalyzerError, AnalyzerResult, GeminiAnalyzer, SegmentAnalyzer, SegmentSuggestion,
};
pub use config::{
    load_service_config, AnalysisSection, ApiKey, DownloadSection, PathsSection, RenderSection,
    ServerSection, ServiceConfig, ToolsSection,
};
pub use downloader::{DownloadError, Downloader};
pub use error::{ConfigError, Result};
pub use media::{AspectRatio, CropWindow, MediaError, MediaInfo, SegmentWindow};
pub use pipeline::{Pipeline, PipelineError, PipelineResult, ShortArtifact, ShortMetadata};
pub use server::{ServerError, ServerState};
pub use tools::{inspect_tools, ToolError, ToolStatus};
