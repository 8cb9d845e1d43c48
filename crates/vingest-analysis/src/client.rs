//! Analysis service HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::error::{AnalysisError, AnalysisResult};
use crate::types::{AnalysisRequest, AnalysisResponse, HealthResponse};

/// Longest error body kept in error messages.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// External batch analysis endpoint.
///
/// Calls may legitimately run for minutes. Implementations impose no
/// deadline of their own unless configured to; callers cancel by dropping
/// the future.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Submit one batch and return the structured result.
    async fn analyze(&self, request: &AnalysisRequest) -> AnalysisResult<serde_json::Value>;

    async fn health_check(&self) -> bool;
}

/// Configuration for the analysis client.
#[derive(Debug, Clone)]
pub struct AnalysisClientConfig {
    /// Base URL of the analysis service
    pub base_url: String,
    pub api_key: Option<String>,
    /// Whole-request timeout; `None` waits indefinitely
    pub timeout: Option<Duration>,
    pub connect_timeout: Duration,
}

impl Default for AnalysisClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            api_key: None,
            timeout: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl AnalysisClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("ANALYSIS_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            api_key: std::env::var("ANALYSIS_API_KEY").ok().filter(|k| !k.is_empty()),
            timeout: std::env::var("ANALYSIS_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
            connect_timeout: Duration::from_secs(
                std::env::var("ANALYSIS_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
        }
    }
}

/// HTTP client for the analysis service.
pub struct HttpAnalysisClient {
    http: Client,
    config: AnalysisClientConfig,
}

impl HttpAnalysisClient {
    pub fn new(config: AnalysisClientConfig) -> AnalysisResult<Self> {
        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            return Err(AnalysisError::Config(format!(
                "ANALYSIS_SERVICE_URL must be an http(s) URL, got {}",
                config.base_url
            )));
        }

        let mut builder = Client::builder().connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(AnalysisError::Network)?;

        Ok(Self { http, config })
    }

    pub fn from_env() -> AnalysisResult<Self> {
        Self::new(AnalysisClientConfig::from_env())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

fn truncate(body: String) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        body
    } else {
        let mut cut: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        cut.push_str("...");
        cut
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisClient {
    async fn analyze(&self, request: &AnalysisRequest) -> AnalysisResult<serde_json::Value> {
        let url = self.url("/v1/analyze/batch");
        debug!(
            session_id = %request.session_id,
            segments = request.segments.len(),
            "Sending batch analysis request to {}",
            url
        );

        let response = self
            .authorize(self.http.post(&url).json(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = truncate(response.text().await.unwrap_or_default());
            warn!(status = status.as_u16(), "Analysis service returned error status");
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => AnalysisError::RateLimited,
                s if s.is_server_error() => AnalysisError::ServiceUnavailable {
                    status: s.as_u16(),
                    body,
                },
                s => AnalysisError::Rejected {
                    status: s.as_u16(),
                    body,
                },
            });
        }

        let bytes = response.bytes().await?;
        let parsed: AnalysisResponse = serde_json::from_slice(&bytes).map_err(|e| {
            AnalysisError::invalid_response(format!("response is not a result envelope: {}", e))
        })?;

        if let Some(error) = parsed.error.filter(|e| !e.is_empty()) {
            return Err(AnalysisError::Failed(error));
        }
        match parsed.result {
            Some(serde_json::Value::Null) | None => {
                Err(AnalysisError::invalid_response("response carries no result"))
            }
            Some(result) => Ok(result),
        }
    }

    async fn health_check(&self) -> bool {
        let url = self.url("/health");
        match self.authorize(self.http.get(&url)).send().await {
            Ok(response) if response.status().is_success() => response
                .json::<HealthResponse>()
                .await
                .map(|h| h.status == "healthy" || h.status == "ok")
                .unwrap_or(false),
            Ok(response) => {
                warn!("Analysis service health check failed: {}", response.status());
                false
            }
            Err(e) => {
                warn!("Analysis service health check error: {}", e);
                false
            }
        }
    }
}
