//! End-to-end split against a real FFmpeg install.

use tokio_util::sync::CancellationToken;
use vingest_media::{FfmpegCommand, FfmpegRunner, FfmpegTranscoder, Transcoder};

async fn synth_source(path: &std::path::Path, seconds: u32) {
    // Keyframe every second so cuts land on the 120s boundary.
    let cmd = FfmpegCommand::new(
        format!("testsrc=duration={}:size=160x120:rate=10", seconds),
        path,
    )
    .input_arg("-f")
    .input_arg("lavfi")
    .output_args(["-c:v", "libx264", "-g", "10", "-pix_fmt", "yuv420p"]);
    FfmpegRunner::new().run(&cmd).await.unwrap();
}

#[tokio::test]
#[ignore = "requires ffmpeg and ffprobe in PATH"]
async fn splits_250s_source_into_three_segments() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source.mp4");
    synth_source(&source, 250).await;

    let transcoder = FfmpegTranscoder::new();
    let duration = transcoder.probe_duration(&source).await.unwrap();
    assert!((duration - 250.0).abs() < 0.5);

    let segments = transcoder
        .split(&source, &dir.path().join("out"), 120.0, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(segments.len(), 3);
    let durations: Vec<f64> = segments.iter().map(|s| s.duration_secs).collect();
    assert!((durations[0] - 120.0).abs() < 1.0, "{:?}", durations);
    assert!((durations[1] - 120.0).abs() < 1.0, "{:?}", durations);
    assert!((durations[2] - 10.0).abs() < 1.0, "{:?}", durations);
    assert!(segments.iter().enumerate().all(|(i, s)| s.index as usize == i));
}

#[tokio::test]
#[ignore = "requires ffmpeg and ffprobe in PATH"]
async fn garbage_input_is_reported_as_failure() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("broken.mp4");
    tokio::fs::write(&source, b"definitely not a video").await.unwrap();

    let result = FfmpegTranscoder::new()
        .split(&source, &dir.path().join("out"), 120.0, CancellationToken::new())
        .await;
    assert!(result.is_err());
}

#[tokio::test]
#[ignore = "requires ffmpeg and ffprobe in PATH"]
async fn cancelled_split_stops() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source.mp4");
    synth_source(&source, 30).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = FfmpegTranscoder::new()
        .split(&source, &dir.path().join("out"), 10.0, cancel)
        .await;
    assert!(matches!(result, Err(vingest_media::MediaError::Cancelled)));
}
