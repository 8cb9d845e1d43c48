//! Transcoder collaborator.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::file_size;
use crate::probe::{get_duration, probe_media};
use crate::segment::{collect_segment_files, segment_pattern, SegmentFile};

/// Splits a container file into independently playable, time-bounded
/// segments without re-encoding.
#[async_trait]
pub trait Transcoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Total duration of `input` in seconds.
    async fn probe_duration(&self, input: &Path) -> MediaResult<f64>;

    /// Split `input` into segments of at most `max_segment_secs` (subject to
    /// keyframe placement), written into `output_dir`.
    ///
    /// Returns the segments ordered by index `0..n`. An empty or gapped
    /// result is an error.
    async fn split(
        &self,
        input: &Path,
        output_dir: &Path,
        max_segment_secs: f64,
        cancel: CancellationToken,
    ) -> MediaResult<Vec<SegmentFile>>;

    /// Check that the transcoder is usable on this host.
    fn check_available(&self) -> MediaResult<()>;
}

/// FFmpeg segment-muxer transcoder.
#[derive(Debug, Clone, Default)]
pub struct FfmpegTranscoder {
    timeout: Option<Duration>,
}

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill FFmpeg if a split takes longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn probe_duration(&self, input: &Path) -> MediaResult<f64> {
        get_duration(input).await
    }

    async fn split(
        &self,
        input: &Path,
        output_dir: &Path,
        max_segment_secs: f64,
        cancel: CancellationToken,
    ) -> MediaResult<Vec<SegmentFile>> {
        if max_segment_secs.is_nan() || max_segment_secs <= 0.0 {
            return Err(MediaError::invalid_media("segment duration must be positive"));
        }
        tokio::fs::create_dir_all(output_dir).await?;

        let extension = input
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4")
            .to_ascii_lowercase();
        let cmd = FfmpegCommand::new(input, segment_pattern(output_dir, &extension))
            .map_all_streams()
            .stream_copy()
            .segment_muxer(max_segment_secs);

        let mut runner = FfmpegRunner::new().with_cancel(cancel);
        if let Some(timeout) = self.timeout {
            runner = runner.with_timeout(timeout);
        }
        runner
            .run_with_progress(&cmd, |p| {
                debug!(
                    out_time_ms = p.out_time_ms,
                    speed = p.speed,
                    complete = p.is_complete,
                    "Segmenting"
                );
            })
            .await?;

        let files = collect_segment_files(output_dir).await?;
        if files.is_empty() {
            return Err(MediaError::malformed_output("no segments produced"));
        }

        let mut segments = Vec::with_capacity(files.len());
        let mut start = 0.0;
        for (index, path) in files {
            let info = probe_media(&path).await.map_err(|e| {
                MediaError::malformed_output(format!(
                    "segment {} is not playable: {}",
                    index,
                    e.detailed_message()
                ))
            })?;
            let size_bytes = file_size(&path).await?;
            segments.push(SegmentFile {
                index,
                path,
                start_secs: start,
                duration_secs: info.duration,
                size_bytes,
            });
            start += info.duration;
        }

        info!(
            input = %input.display(),
            segments = segments.len(),
            "Split source into segments"
        );
        Ok(segments)
    }

    fn check_available(&self) -> MediaResult<()> {
        check_ffmpeg()?;
        check_ffprobe()?;
        Ok(())
    }
}
