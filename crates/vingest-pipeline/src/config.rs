//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default maximum segment duration (2 minutes).
pub const DEFAULT_MAX_SEGMENT_SECS: f64 = 120.0;

/// Default stage lease. A running stage renews it at a quarter of this.
pub const DEFAULT_STAGE_LEASE_SECS: u64 = 120;

/// Which artifacts a playback request serves once segments exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    /// One descriptor per segment, in order
    #[default]
    AllSegments,
    /// Only the first segment (preview)
    FirstSegment,
}

/// How segments are handed to the analysis service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisPayload {
    /// Time-limited read URL per segment
    #[default]
    Reference,
    /// Segment bytes embedded in the request
    Inline,
}

/// How a fully uploaded source becomes segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentationMode {
    /// Assemble the source and split it with the transcoder
    #[default]
    Transcode,
    /// Client chunks are already playable units; publish them as segments
    Passthrough,
}

macro_rules! impl_parse {
    ($ty:ty, $var:literal, { $($s:literal => $v:expr),+ $(,)? }) => {
        impl $ty {
            pub fn parse(s: &str) -> Option<Self> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($s => Some($v),)+
                    _ => None,
                }
            }

            fn from_env_or_default() -> Self {
                match std::env::var($var) {
                    Ok(v) => Self::parse(&v).unwrap_or_else(|| {
                        tracing::warn!("Ignoring unknown {}={}, using default", $var, v);
                        Self::default()
                    }),
                    Err(_) => Self::default(),
                }
            }
        }
    };
}

impl_parse!(PlaybackMode, "PLAYBACK_MODE", {
    "all_segments" => PlaybackMode::AllSegments,
    "first_segment" => PlaybackMode::FirstSegment,
});

impl_parse!(AnalysisPayload, "ANALYSIS_PAYLOAD", {
    "reference" => AnalysisPayload::Reference,
    "inline" => AnalysisPayload::Inline,
});

impl_parse!(SegmentationMode, "SEGMENTATION_MODE", {
    "transcode" => SegmentationMode::Transcode,
    "passthrough" => SegmentationMode::Passthrough,
});

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on each segment's duration, in seconds
    pub max_segment_secs: f64,
    /// Segmentations allowed to run at once on this host
    pub max_concurrent_segmentations: usize,
    /// Segment uploads in flight per session
    pub max_parallel_uploads: usize,
    /// Scratch directory for materialised sources and segments
    pub work_dir: PathBuf,
    pub playback_mode: PlaybackMode,
    /// Automatic analysis retries on transient failures (0 = none)
    pub analysis_max_retries: u32,
    pub analysis_retry_base_delay: Duration,
    pub analysis_payload: AnalysisPayload,
    pub segmentation_mode: SegmentationMode,
    /// Dispatch analysis as soon as segmentation succeeds
    pub auto_dispatch: bool,
    /// Kill a transcoder run that exceeds this
    pub transcode_timeout: Option<Duration>,
    /// A `processing` or `analyzing` session not renewed for this long is
    /// treated as abandoned and may be re-entered
    pub stage_lease: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_segment_secs: DEFAULT_MAX_SEGMENT_SECS,
            max_concurrent_segmentations: 2,
            max_parallel_uploads: 4,
            work_dir: std::env::temp_dir().join("vingest"),
            playback_mode: PlaybackMode::default(),
            analysis_max_retries: 0,
            analysis_retry_base_delay: Duration::from_millis(500),
            analysis_payload: AnalysisPayload::default(),
            segmentation_mode: SegmentationMode::default(),
            auto_dispatch: true,
            transcode_timeout: None,
            stage_lease: Duration::from_secs(DEFAULT_STAGE_LEASE_SECS),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_segment_secs: std::env::var("MAX_SEGMENT_DURATION_SECS")
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|s| s.is_finite() && *s > 0.0)
                .unwrap_or(defaults.max_segment_secs),
            max_concurrent_segmentations: std::env::var("MAX_CONCURRENT_SEGMENTATIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_segmentations),
            max_parallel_uploads: std::env::var("MAX_PARALLEL_SEGMENT_UPLOADS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_parallel_uploads),
            work_dir: std::env::var("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            playback_mode: PlaybackMode::from_env_or_default(),
            analysis_max_retries: std::env::var("ANALYSIS_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.analysis_max_retries),
            analysis_retry_base_delay: std::env::var("ANALYSIS_RETRY_BASE_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.analysis_retry_base_delay),
            analysis_payload: AnalysisPayload::from_env_or_default(),
            segmentation_mode: SegmentationMode::from_env_or_default(),
            auto_dispatch: std::env::var("AUTO_DISPATCH")
                .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(defaults.auto_dispatch),
            transcode_timeout: std::env::var("TRANSCODE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
            stage_lease: std::env::var("STAGE_LEASE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.stage_lease),
        }
    }

    /// Interval at which a running stage renews its lease.
    pub fn lease_renewal_interval(&self) -> Duration {
        (self.stage_lease / 4).max(Duration::from_millis(10))
    }

    /// Configuration problems worth a startup warning.
    pub fn warnings(&self, session_ttl: Duration, playback_expiry: Duration) -> Vec<String> {
        let mut warnings = Vec::new();
        if playback_expiry <= session_ttl {
            warnings.push(format!(
                "playback URL expiry ({}s) does not exceed session TTL ({}s)",
                playback_expiry.as_secs(),
                session_ttl.as_secs()
            ));
        }
        if self.analysis_payload == AnalysisPayload::Inline && self.max_segment_secs > 600.0 {
            warnings.push(format!(
                "inline analysis payload with {}s segments may produce very large requests",
                self.max_segment_secs
            ));
        }
        warnings
    }
}
