//! Access descriptor generation.
//!
//! Write credentials are always presigned PUT URLs against the object store.
//! Read credentials are presigned GET URLs, or HMAC-signed CDN worker URLs
//! when a worker is configured and preferred.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use vingest_models::{AccessDescriptor, AccessMethod, ArtifactRole, SessionId};

use crate::error::{StorageError, StorageResult};
use crate::store::ObjectStore;

// ============================================================================
// Configuration
// ============================================================================

/// Default expiry for upload (write) credentials (1 hour).
pub const DEFAULT_UPLOAD_EXPIRY_SECS: u64 = 3600;

/// Default expiry for playback URLs (7 days).
pub const DEFAULT_PLAYBACK_EXPIRY_SECS: u64 = 604800;

/// Maximum allowed expiry (7 days), the ceiling for S3-style presigning.
pub const MAX_EXPIRY_SECS: u64 = 604800;

/// Delivery configuration.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Secret key for HMAC signing of worker tokens.
    pub signing_secret: Option<String>,
    /// Base URL for worker-fronted delivery (e.g. https://cdn.example.com).
    pub worker_base_url: Option<String>,
    /// Whether to prefer worker URLs when available.
    pub prefer_worker: bool,
    pub upload_expiry: Duration,
    pub playback_expiry: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            signing_secret: None,
            worker_base_url: None,
            prefer_worker: false,
            upload_expiry: Duration::from_secs(DEFAULT_UPLOAD_EXPIRY_SECS),
            playback_expiry: Duration::from_secs(DEFAULT_PLAYBACK_EXPIRY_SECS),
        }
    }
}

impl DeliveryConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let signing_secret = std::env::var("DELIVERY_SIGNING_SECRET").ok();
        let worker_base_url = std::env::var("CDN_WORKER_URL").ok();

        // Defaults to the worker when it is fully configured.
        let prefer_worker = std::env::var("PREFER_WORKER_DELIVERY")
            .map(|v| v == "true" || v == "1")
            .unwrap_or_else(|_| worker_base_url.is_some() && signing_secret.is_some());

        Self {
            signing_secret,
            worker_base_url,
            prefer_worker,
            upload_expiry: Duration::from_secs(
                std::env::var("UPLOAD_URL_EXPIRY_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_UPLOAD_EXPIRY_SECS)
                    .clamp(1, MAX_EXPIRY_SECS),
            ),
            playback_expiry: Duration::from_secs(
                std::env::var("PLAYBACK_URL_EXPIRY_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_PLAYBACK_EXPIRY_SECS)
                    .clamp(1, MAX_EXPIRY_SECS),
            ),
        }
    }

    /// Check if worker delivery is available and preferred.
    pub fn should_use_worker(&self) -> bool {
        self.prefer_worker && self.worker_base_url.is_some() && self.signing_secret.is_some()
    }
}

// ============================================================================
// Worker tokens
// ============================================================================

/// What a read credential is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryScope {
    /// Streaming in a player.
    Playback,
    /// Fetch by the analysis service.
    Analysis,
}

impl DeliveryScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryScope::Playback => "play",
            DeliveryScope::Analysis => "analyze",
        }
    }
}

/// Token payload for worker-fronted delivery (HMAC-signed).
///
/// The object key travels inside the token so the worker can serve it
/// without a lookup; it is trusted because the token is signed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryToken {
    /// Session ID.
    pub sid: String,
    /// Object key.
    pub key: String,
    /// Scope (play/analyze).
    pub scope: String,
    /// Expiry timestamp (Unix seconds).
    pub exp: u64,
}

impl DeliveryToken {
    pub fn new(session_id: &str, key: &str, scope: DeliveryScope, expiry: Duration) -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self {
            sid: session_id.to_string(),
            key: key.to_string(),
            scope: scope.as_str().to_string(),
            exp: now + expiry.as_secs(),
        }
    }

    pub fn is_expired(&self) -> bool {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        now >= self.exp
    }

    /// Encode token to base64 JSON.
    pub fn encode(&self) -> StorageResult<String> {
        let json = serde_json::to_vec(self).map_err(|e| {
            StorageError::config_error(format!("Failed to serialize delivery token: {}", e))
        })?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Decode token from base64 JSON.
    pub fn decode(encoded: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Sign the token with HMAC-SHA256: `payload.signature`.
    pub fn sign(&self, secret: &str) -> StorageResult<String> {
        let payload = self.encode()?;
        let mut mac = hmac_for(secret)?;
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();

        Ok(format!("{}.{}", payload, URL_SAFE_NO_PAD.encode(signature)))
    }

    /// Verify a signed token.
    ///
    /// Returns `None` if the token is malformed, expired, or the signature
    /// does not match. Errors only on an unusable secret.
    pub fn verify(signed: &str, secret: &str) -> StorageResult<Option<Self>> {
        let Some((payload, sig_encoded)) = signed.split_once('.') else {
            return Ok(None);
        };
        let Ok(sig_bytes) = URL_SAFE_NO_PAD.decode(sig_encoded) else {
            return Ok(None);
        };

        let mut mac = hmac_for(secret)?;
        mac.update(payload.as_bytes());
        if mac.verify_slice(&sig_bytes).is_err() {
            return Ok(None);
        }

        Ok(Self::decode(payload).filter(|t| !t.is_expired()))
    }
}

type HmacSha256 = Hmac<Sha256>;

fn hmac_for(secret: &str) -> StorageResult<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| StorageError::config_error(format!("Invalid HMAC key: {}", e)))
}

// ============================================================================
// Descriptor generator
// ============================================================================

/// Builds [`AccessDescriptor`]s over an [`ObjectStore`].
#[derive(Clone)]
pub struct DeliveryUrlGenerator {
    store: Arc<dyn ObjectStore>,
    config: DeliveryConfig,
}

impl DeliveryUrlGenerator {
    pub fn new(store: Arc<dyn ObjectStore>, config: DeliveryConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Write credential for one upload target.
    pub async fn upload_descriptor(
        &self,
        role: ArtifactRole,
        index: Option<u32>,
        key: &str,
        content_type: &str,
    ) -> StorageResult<AccessDescriptor> {
        let expiry = self.config.upload_expiry;
        let url = self.store.presign_put(key, content_type, expiry).await?;
        Ok(descriptor(
            role,
            index,
            key,
            url,
            AccessMethod::Put,
            expiry,
            Some(content_type),
        ))
    }

    /// Read credential for one stored artifact.
    pub async fn read_descriptor(
        &self,
        session_id: &SessionId,
        role: ArtifactRole,
        index: Option<u32>,
        key: &str,
        scope: DeliveryScope,
        content_type: Option<&str>,
    ) -> StorageResult<AccessDescriptor> {
        let expiry = self.config.playback_expiry;
        let url = if self.config.should_use_worker() {
            self.worker_url(session_id, key, scope, expiry)?
        } else {
            self.store.presign_get(key, expiry).await?
        };
        Ok(descriptor(
            role,
            index,
            key,
            url,
            AccessMethod::Get,
            expiry,
            content_type,
        ))
    }

    /// Worker-fronted URL with a signed token carrying the object key.
    pub fn worker_url(
        &self,
        session_id: &SessionId,
        key: &str,
        scope: DeliveryScope,
        expiry: Duration,
    ) -> StorageResult<String> {
        let secret = self.config.signing_secret.as_ref().ok_or_else(|| {
            StorageError::config_error("DELIVERY_SIGNING_SECRET not configured")
        })?;
        let base_url = self
            .config
            .worker_base_url
            .as_ref()
            .ok_or_else(|| StorageError::config_error("CDN_WORKER_URL not configured"))?;

        let signed = DeliveryToken::new(session_id.as_str(), key, scope, expiry).sign(secret)?;
        Ok(format!(
            "{}/s/{}?sig={}",
            base_url.trim_end_matches('/'),
            urlencoding::encode(session_id.as_str()),
            signed
        ))
    }
}

fn descriptor(
    role: ArtifactRole,
    index: Option<u32>,
    key: &str,
    url: String,
    method: AccessMethod,
    expiry: Duration,
    content_type: Option<&str>,
) -> AccessDescriptor {
    let expires_at = Utc::now() + chrono::Duration::from_std(expiry).unwrap_or_default();
    AccessDescriptor {
        role,
        index,
        key: key.to_string(),
        url,
        method,
        expires_at,
        expires_in_secs: expiry.as_secs(),
        content_type: content_type.map(str::to_string),
    }
}

// ============================================================================
// Tests
// ============================================================================
