//! Client for the external batch analysis service.

pub mod client;
pub mod error;
pub mod types;

pub use client::{AnalysisClientConfig, AnalysisService, HttpAnalysisClient};
pub use error::{AnalysisError, AnalysisResult};
pub use types::{AnalysisRequest, AnalysisResponse, SegmentInput, SegmentSource};
