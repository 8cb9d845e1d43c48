//! Axum HTTP API server.
//!
//! Thin surface over [`vingest_pipeline::IngestPipeline`]: every response
//! is either `{"ok": true, "data": ...}` or
//! `{"ok": false, "error": {"kind", "message", "retryable"}}`.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod state;

pub use config::{ApiConfig, DeploymentMode};
pub use error::{ApiError, ApiResult};
pub use response::ApiResponse;
pub use routes::create_router;
pub use state::AppState;
