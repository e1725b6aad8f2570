//! Request inspection helpers.
//!
//! # Responsibilities
//! - Read the request ID stamped by the request-id layer
//! - Read request bodies with the configured size bound
//!
//! # Design Decisions
//! - The ID is generated by `SetRequestIdLayer` before anything else runs,
//!   so handlers only ever read it

use axum::body::{Body, Bytes};
use axum::http::HeaderMap;

/// Header carrying the per-request UUID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// The request ID, or `"-"` when the request never passed the layer (tests).
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
}

/// Collect a body, failing if it exceeds `limit` bytes.
pub async fn read_body(body: Body, limit: usize) -> Result<Bytes, axum::Error> {
    axum::body::to_bytes(body, limit).await
}
