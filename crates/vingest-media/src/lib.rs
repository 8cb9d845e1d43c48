//! Transcoder collaborator for the ingestion pipeline.
//!
//! This crate provides:
//! - The [`Transcoder`] trait and its FFmpeg implementation
//! - FFmpeg command building and a cancellable runner
//! - FFprobe parsing
//! - Segment planning and ordered enumeration of produced files
//! - Local file helpers for source materialisation

pub mod command;
pub mod error;
pub mod fs_utils;
pub mod probe;
pub mod progress;
pub mod segment;
pub mod transcoder;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use probe::{get_duration, probe_media, MediaInfo};
pub use progress::FfmpegProgress;
pub use segment::{plan_segments, PlannedSegment, SegmentFile};
pub use transcoder::{FfmpegTranscoder, Transcoder};
