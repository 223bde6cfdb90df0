#![cfg(unix)]

mod support;

use reelcut_core::pipeline::PipelineError;
use reelcut_core::SegmentWindow;

use support::{suggestion, Harness, StubAnalyzer};

#[tokio::test]
async fn job_downloads_analyzes_and_renders_a_vertical_short() {
    let harness = Harness::new();
    let analyzer = StubAnalyzer::new(suggestion(Some(10.0), Some(45.0), "Big Moment"));
    let pipeline = harness.pipeline(Some(analyzer.clone()));

    let artifact = pipeline
        .process("https://www.youtube.com/watch?v=abc123")
        .await
        .unwrap();

    assert_eq!(analyzer.calls(), 1);
    assert_eq!(artifact.read().await.unwrap(), b"SHORT");
    let metadata = &artifact.metadata;
    assert_eq!(metadata.title, "Big Moment");
    assert_eq!(metadata.description, "Wait for the landing");
    assert_eq!(metadata.window, SegmentWindow { start: 10.0, end: 45.0 });
    assert_eq!((metadata.crop.width, metadata.crop.height), (606, 1080));
    assert_eq!((metadata.crop.x, metadata.crop.y), (657, 0));
    assert_eq!(metadata.source_media.duration, Some(120.0));
    assert_eq!(metadata.size_bytes, 5);

    let args = harness.ffmpeg_args();
    let after = |flag: &str| {
        let index = args.iter().position(|arg| arg == flag).unwrap();
        args[index + 1].clone()
    };
    assert_eq!(after("-ss"), "10.000");
    assert_eq!(after("-t"), "35.000");
    assert_eq!(after("-vf"), "crop=606:1080:657:0");
    assert!(args.last().unwrap().ends_with("final_short.mp4"));

    assert_eq!(harness.job_dirs().len(), 1);
    drop(artifact);
    assert!(harness.job_dirs().is_empty());
}

#[tokio::test]
async fn segment_end_is_clamped_to_the_video_length() {
    let harness = Harness::new();
    let analyzer = StubAnalyzer::new(suggestion(Some(90.0), Some(150.0), "Finale"));
    let pipeline = harness.pipeline(Some(analyzer));

    let artifact = pipeline.process("https://example.com/v/1").await.unwrap();
    assert_eq!(artifact.metadata.window.end, 120.0);

    let args = harness.ffmpeg_args();
    let t = args.iter().position(|arg| arg == "-t").unwrap();
    assert_eq!(args[t + 1], "30.000");
}

#[tokio::test]
async fn missing_bounds_fail_and_clean_up() {
    let harness = Harness::new();
    let analyzer = StubAnalyzer::new(suggestion(Some(10.0), None, "Half"));
    let pipeline = harness.pipeline(Some(analyzer));

    let err = pipeline.process("https://example.com/v/2").await.unwrap_err();
    assert!(matches!(err, PipelineError::MissingSegmentBounds));
    assert_eq!(err.to_string(), "Could not determine start/end times");
    assert!(harness.ffmpeg_args().is_empty());
    assert!(harness.job_dirs().is_empty());
}

#[tokio::test]
async fn failed_download_is_retried_then_reported() {
    let mut harness = Harness::new();
    harness.config.download.max_attempts = 3;
    harness.failing_downloader();
    let analyzer = StubAnalyzer::new(suggestion(Some(0.0), Some(30.0), "Never"));
    let pipeline = harness.pipeline(Some(analyzer.clone()));

    let err = pipeline.process("https://example.com/gone").await.unwrap_err();
    assert!(matches!(err, PipelineError::Download(_)));
    assert!(err.to_string().contains("Video unavailable"));
    assert_eq!(harness.download_attempts(), 3);
    assert_eq!(analyzer.calls(), 0);
    assert!(harness.job_dirs().is_empty());
}

#[tokio::test]
async fn persisted_short_outlives_the_workspace() {
    let harness = Harness::new();
    let analyzer = StubAnalyzer::new(suggestion(Some(5.0), Some(40.0), "Keep"));
    let pipeline = harness.pipeline(Some(analyzer));

    let artifact = pipeline.process("https://example.com/v/3").await.unwrap();
    let destination = harness.root.path().join("out").join("short.mp4");
    let metadata = artifact.persist(&destination).await.unwrap();

    assert_eq!(metadata.title, "Keep");
    assert_eq!(std::fs::read(&destination).unwrap(), b"SHORT");
    assert!(harness.job_dirs().is_empty());
}

#[tokio::test]
async fn missing_tool_surfaces_as_download_error() {
    let mut harness = Harness::new();
    harness.config.tools.yt_dlp = harness.root.path().join("bin").join("no-such-yt-dlp");
    harness.config.download.max_attempts = 1;
    let analyzer = StubAnalyzer::new(suggestion(Some(0.0), Some(30.0), "x"));
    let pipeline = harness.pipeline(Some(analyzer));

    let err = pipeline.process("https://example.com/v/4").await.unwrap_err();
    assert!(err.to_string().contains("not found"), "{err}");
}
