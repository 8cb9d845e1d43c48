//! Success envelope.

use axum::Json;
use serde::Serialize;

/// `{"ok": true, "data": ...}`; failures use the envelope in [`crate::error`].
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub data: T,
}

pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { ok: true, data })
}
