use std::fmt;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::{info, warn, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use reelcut_core::pipeline::{Pipeline, PipelineError, ShortMetadata};
use reelcut_core::server::{self, ServerError};
use reelcut_core::tools::{inspect_tools, ToolStatus};
use reelcut_core::{ConfigError, ServiceConfig};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("server error: {0}")]
    Server(#[from] ServerError),
    #[error("{0}")]
    Pipeline(#[from] PipelineError),
    #[error("required tools unavailable: {0}")]
    MissingTools(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Cuts vertical shorts out of online videos", long_about = None)]
pub struct Cli {
    /// Path to reelcut.toml; built-in defaults when omitted
    #[arg(long, env = "REELCUT_CONFIG")]
    pub config: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Runs the HTTP service
    Serve(ServeArgs),
    /// Processes a single URL and writes the short to disk
    Process(ProcessArgs),
    /// External tool checks
    #[command(subcommand)]
    Tools(ToolsCommands),
    /// Configuration inspection
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Listen address (overrides HOST)
    #[arg(long)]
    pub host: Option<String>,
    /// Listen port (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,
    /// Runtime worker threads, 0 for one per CPU (overrides REELCUT_WORKERS)
    #[arg(long)]
    pub workers: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ProcessArgs {
    /// Video page URL
    pub url: String,
    /// Where to write the rendered short
    #[arg(long, short, default_value = "short.mp4")]
    pub output: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum ToolsCommands {
    /// Verifies yt-dlp, ffmpeg, ffprobe and the API key
    Check,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Prints the effective configuration, secrets redacted
    Show,
}

pub fn run(cli: Cli) -> Result<()> {
    init_tracing(&cli.log_level);
    let config = resolve_config(&cli, |key| std::env::var(key).ok())?;

    match &cli.command {
        Commands::Config(ConfigCommands::Show) => {
            render(&ConfigView(config), cli.format)?;
        }
        Commands::Tools(ToolsCommands::Check) => {
            let runtime = build_runtime(1)?;
            let report = runtime.block_on(tools_report(&config));
            render(&report, cli.format)?;
            let failed: Vec<&str> = report
                .iter()
                .filter(|entry| matches!(entry.status, CheckStatus::Error))
                .map(|entry| entry.name.as_str())
                .collect();
            if !failed.is_empty() {
                return Err(AppError::MissingTools(failed.join(", ")));
            }
        }
        Commands::Serve(_) => {
            let runtime = build_runtime(config.server.workers)?;
            runtime.block_on(serve(config))?;
        }
        Commands::Process(args) => {
            let runtime = build_runtime(config.server.workers)?;
            let summary = runtime.block_on(process_url(config, args))?;
            render(&summary, cli.format)?;
        }
    }

    Ok(())
}

/// File, then environment, then command-line flags; validated last.
pub fn resolve_config<F>(cli: &Cli, lookup: F) -> Result<ServiceConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ServiceConfig::load(cli.config.as_deref())?;
    config.apply_env_overrides(lookup)?;
    if let Commands::Serve(args) = &cli.command {
        if let Some(host) = &args.host {
            config.server.host = host.clone();
        }
        if let Some(port) = args.port {
            config.server.port = port;
        }
        if let Some(workers) = args.workers {
            config.server.workers = workers;
        }
    }
    config.validate()?;
    Ok(config)
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A second init (tests) keeps the first subscriber.
    let _ = log_subscriber(filter, std::io::stderr, true).try_init();
}

/// Compact lines with the event target, so `analyzer`, `pipeline` and
/// friends stay filterable and visible.
fn log_subscriber<W>(filter: EnvFilter, writer: W, ansi: bool) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .compact()
        .finish()
}

fn build_runtime(workers: usize) -> Result<Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all().thread_name("reelcut-worker");
    if workers > 0 {
        builder.worker_threads(workers);
    }
    Ok(builder.build()?)
}

async fn serve(config: ServiceConfig) -> Result<()> {
    if !config.has_api_key() {
        warn!("GEMINI_API_KEY not set; /process-video will answer 500 until it is configured");
    }
    for status in inspect_tools(&config.tools).await {
        match &status.version {
            Some(version) => info!(tool = %status.name, %version, "tool available"),
            None => warn!(
                tool = %status.name,
                error = status.error.as_deref().unwrap_or("unknown"),
                "tool unavailable"
            ),
        }
    }
    let pipeline = Pipeline::from_config(config)?;
    server::serve(pipeline, server::shutdown_signal()).await?;
    Ok(())
}

async fn process_url(config: ServiceConfig, args: &ProcessArgs) -> Result<ProcessSummary> {
    let pipeline = Pipeline::from_config(config)?;
    pipeline.ensure_ready()?;
    let artifact = pipeline.process(&args.url).await?;
    let metadata = artifact.persist(&args.output).await?;
    info!(output = %args.output.display(), "short written");
    Ok(ProcessSummary {
        output: args.output.clone(),
        metadata,
    })
}

async fn tools_report(config: &ServiceConfig) -> Vec<HealthEntry> {
    let mut entries: Vec<HealthEntry> = inspect_tools(&config.tools)
        .await
        .iter()
        .map(HealthEntry::from_tool)
        .collect();
    entries.push(if config.has_api_key() {
        HealthEntry::ok("gemini-api-key", "configured")
    } else {
        HealthEntry::warn("gemini-api-key", "GEMINI_API_KEY not set")
    });
    let work_root = config.paths.work_root();
    entries.push(match std::fs::create_dir_all(&work_root) {
        Ok(()) => HealthEntry::ok("work-dir", work_root.display().to_string()),
        Err(err) => HealthEntry::error("work-dir", format!("{}: {err}", work_root.display())),
    });
    entries
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct ConfigView(pub ServiceConfig);

impl DisplayFallback for ConfigView {
    fn display(&self) -> String {
        toml::to_string_pretty(&self.0).unwrap_or_else(|err| format!("{:#?}\n# {err}", self.0))
    }
}

#[derive(Debug, Serialize)]
pub struct ProcessSummary {
    pub output: PathBuf,
    pub metadata: ShortMetadata,
}

impl DisplayFallback for ProcessSummary {
    fn display(&self) -> String {
        let meta = &self.metadata;
        [
            format!(
                "wrote {} ({} bytes)",
                self.output.display(),
                meta.size_bytes
            ),
            format!("title: {}", meta.title),
            format!("description: {}", meta.description),
            format!(
                "segment: {:.3}s - {:.3}s ({:.1}s)",
                meta.window.start,
                meta.window.end,
                meta.window.duration()
            ),
            format!(
                "crop: {}x{}+{}+{} of {}x{}",
                meta.crop.width,
                meta.crop.height,
                meta.crop.x,
                meta.crop.y,
                meta.source_media.width,
                meta.source_media.height
            ),
            format!("reason: {}", meta.reason),
        ]
        .join("\n")
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(|entry| format!("[{}] {}: {}", entry.status, entry.name, entry.detail))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warn,
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Ok, detail)
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Warn, detail)
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Error, detail)
    }

    fn new(name: impl Into<String>, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            detail: detail.into(),
        }
    }

    fn from_tool(status: &ToolStatus) -> Self {
        match (&status.version, &status.error) {
            (Some(version), _) => Self::ok(&status.name, version.clone()),
            (None, Some(error)) => Self::error(&status.name, error.clone()),
            (None, None) => Self::error(&status.name, "unavailable"),
        }
    }
}
