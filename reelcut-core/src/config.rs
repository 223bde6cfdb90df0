use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{ConfigError, Result};

pub const DEFAULT_PORT: u16 = 10000;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 600;

pub const DEFAULT_FORMAT: &str =
    "bestvideo[height<=1080][ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Complete service configuration.
///
/// Built once at startup (file, then environment, then command-line flags)
/// and handed to every component by reference. Every field has a default so
/// an empty file, or no file at all, yields a runnable service.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ServiceConfig {
    pub server: ServerSection,
    pub paths: PathsSection,
    pub tools: ToolsSection,
    pub download: DownloadSection,
    pub analysis: AnalysisSection,
    pub render: RenderSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// Runtime worker threads; 0 selects one per CPU.
    pub workers: usize,
    pub request_timeout_seconds: u64,
    pub max_concurrent_jobs: usize,
    pub max_body_bytes: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            workers: 0,
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECONDS,
            max_concurrent_jobs: 2,
            max_body_bytes: 16 * 1024,
        }
    }
}

impl ServerSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|err| ConfigError::invalid("server.host", format!("{}: {err}", self.host)))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsSection {
    /// Parent directory for per-job workspaces; empty means the system temp dir.
    pub work_dir: String,
}

impl PathsSection {
    pub fn work_root(&self) -> PathBuf {
        if self.work_dir.trim().is_empty() {
            std::env::temp_dir()
        } else {
            PathBuf::from(&self.work_dir)
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolsSection {
    pub yt_dlp: PathBuf,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub probe_timeout_seconds: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            yt_dlp: PathBuf::from("yt-dlp"),
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            probe_timeout_seconds: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DownloadSection {
    pub format: String,
    pub user_agent: String,
    pub source_address: String,
    pub check_certificate: bool,
    pub max_attempts: u32,
    pub retry_delay_seconds: [u32; 2],
    pub timeout_seconds: u64,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            format: DEFAULT_FORMAT.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            source_address: "0.0.0.0".to_string(),
            check_certificate: false,
            max_attempts: 2,
            retry_delay_seconds: [2, 5],
            timeout_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisSection {
    pub api_base: String,
    pub model: String,
    pub api_key: Option<ApiKey>,
    pub poll_interval_ms: u64,
    pub processing_timeout_seconds: u64,
    /// Per-call limit for the small API requests.
    pub request_timeout_seconds: u64,
    /// Limit for streaming the source video to the File API.
    pub upload_timeout_seconds: u64,
    pub min_segment_seconds: u32,
    pub max_segment_seconds: u32,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-1.5-flash".to_string(),
            api_key: None,
            poll_interval_ms: 2000,
            processing_timeout_seconds: 300,
            request_timeout_seconds: 120,
            upload_timeout_seconds: 480,
            min_segment_seconds: 30,
            max_segment_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderSection {
    pub aspect_width: u32,
    pub aspect_height: u32,
    pub video_codec: String,
    pub audio_codec: String,
    pub preset: String,
    pub crf: u8,
    pub faststart: bool,
    pub timeout_seconds: u64,
}

impl Default for RenderSection {
    fn default() -> Self {
        Self {
            aspect_width: 9,
            aspect_height: 16,
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            preset: "medium".to_string(),
            crf: 23,
            faststart: true,
            timeout_seconds: 300,
        }
    }
}

/// Secret that never shows up in logs or in `config show` output.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("***")
    }
}

impl ServiceConfig {
    /// Loads a config file when given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => load_toml(path),
            None => Ok(Self::default()),
        }
    }

    /// Applies the process environment. `lookup` is `std::env::var` in
    /// production; tests pass a map.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = parse_env("PORT", &port)?;
        }
        if let Some(host) = lookup("HOST") {
            if !host.trim().is_empty() {
                self.server.host = host.trim().to_string();
            }
        }
        if let Some(workers) = lookup("REELCUT_WORKERS") {
            self.server.workers = parse_env("REELCUT_WORKERS", &workers)?;
        }
        if let Some(jobs) = lookup("REELCUT_MAX_CONCURRENT_JOBS") {
            self.server.max_concurrent_jobs = parse_env("REELCUT_MAX_CONCURRENT_JOBS", &jobs)?;
        }
        if let Some(dir) = lookup("REELCUT_WORK_DIR") {
            self.paths.work_dir = dir;
        }
        if let Some(key) = lookup("GEMINI_API_KEY") {
            if !key.trim().is_empty() {
                self.analysis.api_key = Some(ApiKey::new(key.trim()));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.server.socket_addr()?;
        if self.server.request_timeout_seconds == 0 {
            return Err(ConfigError::invalid(
                "server.request_timeout_seconds",
                "must be greater than zero",
            ));
        }
        if self.server.max_concurrent_jobs == 0 {
            return Err(ConfigError::invalid(
                "server.max_concurrent_jobs",
                "must be greater than zero",
            ));
        }
        if self.download.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "download.max_attempts",
                "must be greater than zero",
            ));
        }
        if self.download.retry_delay_seconds[0] > self.download.retry_delay_seconds[1] {
            return Err(ConfigError::invalid(
                "download.retry_delay_seconds",
                "lower bound exceeds upper bound",
            ));
        }
        if self.render.aspect_width == 0 || self.render.aspect_height == 0 {
            return Err(ConfigError::invalid(
                "render.aspect_width/aspect_height",
                "must be greater than zero",
            ));
        }
        if self.analysis.min_segment_seconds > self.analysis.max_segment_seconds {
            return Err(ConfigError::invalid(
                "analysis.min_segment_seconds",
                "exceeds analysis.max_segment_seconds",
            ));
        }
        if self.analysis.upload_timeout_seconds == 0 {
            return Err(ConfigError::invalid(
                "analysis.upload_timeout_seconds",
                "must be greater than zero",
            ));
        }
        if self.analysis.poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "analysis.poll_interval_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        self.analysis.api_key.is_some()
    }
}

fn parse_env<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|err| ConfigError::invalid(key, format!("{raw:?}: {err}")))
}

pub fn load_service_config<P: AsRef<Path>>(path: P) -> Result<ServiceConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/reelcut.toml");
        let config = load_service_config(path).expect("config should parse");
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.server.request_timeout_seconds, 600);
        assert_eq!(config.analysis.model, "gemini-1.5-flash");
        assert_eq!(config.analysis.upload_timeout_seconds, 480);
        assert_eq!(config.render.aspect_width, 9);
        assert!(config.analysis.api_key.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn missing_port_falls_back_to_default() {
        let mut config = ServiceConfig::default();
        config.apply_env_overrides(env(&[])).unwrap();
        let addr = config.server.socket_addr().unwrap();
        assert_eq!(addr.port(), 10000);
        assert_eq!(addr.ip().to_string(), "0.0.0.0");
    }

    #[test]
    fn port_from_environment_wins() {
        let mut config = ServiceConfig::default();
        config
            .apply_env_overrides(env(&[("PORT", "8081"), ("GEMINI_API_KEY", " secret ")]))
            .unwrap();
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.analysis.api_key.unwrap().expose(), "secret");
    }

    #[test]
    fn invalid_port_is_rejected() {
        let mut config = ServiceConfig::default();
        let err = config
            .apply_env_overrides(env(&[("PORT", "ten-thousand")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "PORT"));

        let err = config
            .apply_env_overrides(env(&[("PORT", "70000")]))
            .unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn blank_api_key_is_ignored() {
        let mut config = ServiceConfig::default();
        config
            .apply_env_overrides(env(&[("GEMINI_API_KEY", "  ")]))
            .unwrap();
        assert!(!config.has_api_key());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config: ServiceConfig = toml::from_str(
            r#"
            [server]
            port = 9000

            [render]
            crf = 20
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.request_timeout_seconds, 600);
        assert_eq!(config.render.crf, 20);
        assert_eq!(config.render.video_codec, "libx264");
        assert_eq!(config.download.format, DEFAULT_FORMAT);
    }

    #[test]
    fn validation_catches_zero_limits() {
        let mut config = ServiceConfig::default();
        config.server.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.analysis.min_segment_seconds = 90;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.analysis.upload_timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.server.host = "not-an-ip".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn api_key_is_redacted() {
        let key = ApiKey::new("super-secret");
        assert_eq!(format!("{key:?}"), "ApiKey(***)");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"***\"");
    }
}
