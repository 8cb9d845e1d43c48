//! Time-limited access descriptors for object store artifacts.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::session::SessionId;

/// Which artifact of a session a descriptor points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    Original,
    Chunk,
    Segment,
}

/// HTTP method the holder of a descriptor must use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessMethod {
    Get,
    Put,
}

/// A signed credential granting time-bounded access to one object key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessDescriptor {
    pub role: ArtifactRole,
    /// Chunk or segment index; absent for the original file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    pub key: String,
    pub url: String,
    pub method: AccessMethod,
    pub expires_at: DateTime<Utc>,
    pub expires_in_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl AccessDescriptor {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Which artifact set a playback response serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackSource {
    Original,
    Segments,
}

/// Playback response: one descriptor for the original file or one per
/// segment in logical order.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackDescriptor {
    pub session_id: SessionId,
    pub source: PlaybackSource,
    pub descriptors: Vec<AccessDescriptor>,
}

impl PlaybackDescriptor {
    /// Object keys served, in order. Stable across calls on an unchanged session.
    pub fn keys(&self) -> Vec<&str> {
        self.descriptors.iter().map(|d| d.key.as_str()).collect()
    }
}
