//! Response construction shared by the multiplexer and the collector.
//!
//! # Responsibilities
//! - Rejection responses (403 for denied, 503 for store outages)
//! - Static-collaborator error responses
//! - JSON responses carrying the cross-origin headers browsers need
//!
//! # Design Decisions
//! - Rejection bodies never include the reason; reasons go to the logs

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Seconds a client should wait before retrying after a store outage.
pub const RETRY_AFTER_SECS: u64 = 5;

const CORS_HEADERS: [(header::HeaderName, &str); 4] = [
    (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (header::ACCESS_CONTROL_MAX_AGE, "3628800"),
    (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS"),
    (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type, Authorization"),
];

/// `403 Forbidden`, plain text.
pub fn forbidden() -> Response {
    (StatusCode::FORBIDDEN, "403 Forbidden").into_response()
}

/// `503` with `Retry-After`, for retryable backing-store failures.
pub fn unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(header::RETRY_AFTER, RETRY_AFTER_SECS.to_string())],
        "503 Service Unavailable",
    )
        .into_response()
}

/// Status reported by the static collaborator, with the code as the body.
pub fn static_error(status: StatusCode) -> Response {
    (status, status.as_u16().to_string()).into_response()
}

/// JSON body plus `Content-Type` and the CORS headers.
pub fn json<T: Serialize>(status: StatusCode, body: &T) -> Response {
    let mut response = match serde_json::to_vec(body) {
        Ok(bytes) => Response::new(Body::from(bytes)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    *response.status_mut() = status;
    with_cors(response)
}

/// Empty `200` answering a CORS preflight.
pub fn preflight() -> Response {
    with_cors(Response::new(Body::empty()))
}

fn with_cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for (name, value) in CORS_HEADERS {
        headers.insert(name, HeaderValue::from_static(value));
    }
    response
}

/// `{"error": message}` with the given status.
pub fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    json(status, &serde_json::json!({ "error": message.into() }))
}
