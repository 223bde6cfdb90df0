//! Fake yt-dlp/ffprobe/ffmpeg scripts and a canned analyzer, so the whole
//! job can run without network access or real media tools.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use reelcut_core::analyzer::{AnalyzerResult, SegmentAnalyzer, SegmentSuggestion};
use reelcut_core::config::ServiceConfig;
use reelcut_core::pipeline::Pipeline;

pub const FFPROBE_1080P: &str = r#"#!/bin/sh
cat <<'JSON'
{
  "streams": [
    {"codec_type": "audio", "sample_rate": "44100"},
    {"codec_type": "video", "width": 1920, "height": 1080, "avg_frame_rate": "30/1", "duration": "120.000000"}
  ],
  "format": {"duration": "120.000000"}
}
JSON
"#;

pub const YT_DLP_WRITES_OUTPUT: &str = r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output) out="$2"; shift 2 ;;
    --) shift; break ;;
    *) shift ;;
  esac
done
printf 'RAW VIDEO' > "$out"
"#;

pub struct Harness {
    pub root: TempDir,
    pub config: ServiceConfig,
}

impl Harness {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        let bin = root.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();

        let mut config = ServiceConfig::default();
        config.paths.work_dir = root.path().join("work").to_string_lossy().to_string();
        config.tools.yt_dlp = bin.join("yt-dlp");
        config.tools.ffprobe = bin.join("ffprobe");
        config.tools.ffmpeg = bin.join("ffmpeg");
        config.download.retry_delay_seconds = [0, 0];

        let harness = Self { root, config };
        harness.write_script("yt-dlp", YT_DLP_WRITES_OUTPUT);
        harness.write_script("ffprobe", FFPROBE_1080P);
        harness.write_script(
            "ffmpeg",
            &format!(
                "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{}'\nfor last; do :; done\nprintf 'SHORT' > \"$last\"\n",
                harness.ffmpeg_record().display()
            ),
        );
        harness
    }

    pub fn write_script(&self, name: &str, body: &str) {
        let path = self.root.path().join("bin").join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// yt-dlp that always fails and appends a line to `attempts` per call.
    pub fn failing_downloader(&self) {
        let body = format!(
            "#!/bin/sh\necho attempt >> '{}'\necho 'ERROR: Video unavailable' >&2\nexit 1\n",
            self.download_attempts_file().display()
        );
        self.write_script("yt-dlp", &body);
    }

    /// yt-dlp that records its pid and never finishes. Returns the pid file.
    pub fn hanging_downloader(&self) -> PathBuf {
        let pid_file = self.root.path().join("yt-dlp.pid");
        let body = format!(
            "#!/bin/sh\necho $$ > '{}'\nexec sleep 30\n",
            pid_file.display()
        );
        self.write_script("yt-dlp", &body);
        pid_file
    }

    pub fn download_attempts_file(&self) -> PathBuf {
        self.root.path().join("attempts")
    }

    pub fn download_attempts(&self) -> usize {
        std::fs::read_to_string(self.download_attempts_file())
            .map(|text| text.lines().count())
            .unwrap_or(0)
    }

    pub fn ffmpeg_record(&self) -> PathBuf {
        self.root.path().join("ffmpeg-args")
    }

    pub fn ffmpeg_args(&self) -> Vec<String> {
        std::fs::read_to_string(self.ffmpeg_record())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn work_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.paths.work_dir)
    }

    /// Job workspaces currently on disk.
    pub fn job_dirs(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.work_dir()) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn pipeline(&self, analyzer: Option<Arc<StubAnalyzer>>) -> Pipeline {
        let analyzer = analyzer.map(|a| a as Arc<dyn SegmentAnalyzer>);
        Pipeline::with_parts(self.config.clone(), analyzer).with_retry_sleep_cap(Duration::ZERO)
    }
}

pub fn suggestion(start: Option<f64>, end: Option<f64>, title: &str) -> SegmentSuggestion {
    SegmentSuggestion {
        start_time: start,
        end_time: end,
        title: title.to_string(),
        description: "Wait for the landing".to_string(),
        reason: "peak action".to_string(),
    }
}

/// Answers every request with the same suggestion.
pub struct StubAnalyzer {
    suggestion: SegmentSuggestion,
    calls: AtomicUsize,
}

impl StubAnalyzer {
    pub fn new(suggestion: SegmentSuggestion) -> Arc<Self> {
        Arc::new(Self {
            suggestion,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SegmentAnalyzer for StubAnalyzer {
    async fn suggest_segment(&self, video: &Path) -> AnalyzerResult<SegmentSuggestion> {
        assert_eq!(std::fs::read(video).unwrap(), b"RAW VIDEO");
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.suggestion.clone())
    }
}

/// Whether `pid` is still a running (non-zombie) process.
pub fn process_alive(pid: u32) -> bool {
    let stat = PathBuf::from(format!("/proc/{pid}/stat"));
    if Path::new("/proc/self/stat").exists() {
        return match std::fs::read_to_string(stat) {
            // Third field is the state; the name in field two is parenthesised.
            Ok(text) => text
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next())
                .map(|state| state != "Z" && state != "X")
                .unwrap_or(false),
            Err(_) => false,
        };
    }
    std::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Polls until `pid` is gone or `limit` passes.
pub async fn wait_for_exit(pid: u32, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if !process_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    !process_alive(pid)
}

pub fn read_pid(path: &Path) -> u32 {
    std::fs::read_to_string(path)
        .unwrap()
        .trim()
        .parse()
        .unwrap()
}
