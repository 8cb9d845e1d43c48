//! Batch analysis request and response types.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

/// How the service obtains a segment's bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SegmentSource {
    /// Time-limited URL the service fetches itself.
    Url { url: String },
    /// Segment bytes, base64-encoded.
    Inline { data: String },
}

impl SegmentSource {
    pub fn inline(bytes: &[u8]) -> Self {
        Self::Inline {
            data: STANDARD.encode(bytes),
        }
    }
}

/// One segment in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentInput {
    pub index: u32,
    /// Durable object store key
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub source: SegmentSource,
}

/// Batch request covering every segment of a session, in index order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub session_id: String,
    pub source_name: String,
    pub segments: Vec<SegmentInput>,
}

/// Service response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisResponse {
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct HealthResponse {
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let req = AnalysisRequest {
            session_id: "s1".into(),
            source_name: "a.mp4".into(),
            segments: vec![
                SegmentInput {
                    index: 0,
                    key: "sessions/s1/segments/segment_000.mp4".into(),
                    duration_secs: Some(120.0),
                    content_type: Some("video/mp4".into()),
                    source: SegmentSource::Url {
                        url: "https://r2/x".into(),
                    },
                },
                SegmentInput {
                    index: 1,
                    key: "k1".into(),
                    duration_secs: None,
                    content_type: None,
                    source: SegmentSource::inline(b"hi"),
                },
            ],
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["sessionId"], "s1");
        assert_eq!(value["segments"][0]["source"], json!({"kind": "url", "url": "https://r2/x"}));
        assert_eq!(value["segments"][1]["source"], json!({"kind": "inline", "data": "aGk="}));
        assert!(value["segments"][1].get("durationSecs").is_none());
    }
}
