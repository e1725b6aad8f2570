//! Event collection endpoints.
//!
//! # Endpoints
//! - WS `/1.0/event/put`: one event per message
//! - HTTP `POST /1.0/event` and `POST /1.0/event/put`: a JSON array of events
//! - HTTP `OPTIONS` on both paths: CORS preflight
//! - UDP: one event per datagram
//!
//! Every event reaching the sink carries the caller's authorization context
//! under `user`. UDP traffic is never authenticated, so datagrams are stored
//! as sent.

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use axum::response::Response;
use serde_json::{json, Value};

use crate::http::request::read_body;
use crate::http::response;
use crate::http::websocket::AUTHORIZED_FIELD;
use crate::observability::metrics;
use crate::routing::{EndpointRegistry, HttpUnit, ReplyChannel};
use crate::store::{EventSink, StoreError};

pub const EVENT_PATH: &str = "/1.0/event";
pub const EVENT_PUT_PATH: &str = "/1.0/event/put";

/// Field an event's authorization context is stored under.
pub const USER_FIELD: &str = "user";

/// Bind the collector's endpoints and the UDP putter onto `registry`.
pub fn register(registry: &mut EndpointRegistry, sink: Arc<dyn EventSink>, body_limit: usize) {
    let ws_sink = Arc::clone(&sink);
    registry.register_ws(EVENT_PUT_PATH, move |message: Value, _reply: ReplyChannel| {
        put_message(Arc::clone(&ws_sink), message)
    });

    for path in [EVENT_PATH, EVENT_PUT_PATH] {
        let post_sink = Arc::clone(&sink);
        registry.register_http(Method::POST, path, move |unit: HttpUnit| {
            post(Arc::clone(&post_sink), unit, body_limit)
        });
    }
    for path in [EVENT_PATH, EVENT_PUT_PATH] {
        registry.register_http(Method::OPTIONS, path, |_unit: HttpUnit| async {
            response::preflight()
        });
    }

    let udp_sink = sink;
    registry.register_udp(move |message: Value, _reply: ReplyChannel| {
        put_message(Arc::clone(&udp_sink), message)
    });
}

/// Store one WebSocket or UDP event. Failures are logged, never answered.
async fn put_message(sink: Arc<dyn EventSink>, mut event: Value) {
    if let Some(object) = event.as_object_mut() {
        if let Some(authorized) = object.remove(AUTHORIZED_FIELD) {
            object.insert(USER_FIELD.to_string(), authorized);
        }
    }
    if let Err(e) = sink.put(event).await {
        metrics::record_event(failure_outcome(&e));
        tracing::warn!(error = %e, "Dropped event");
    }
}

async fn post(sink: Arc<dyn EventSink>, unit: HttpUnit, body_limit: usize) -> Response {
    let user = unit.authorized.to_value();
    let body = match read_body(unit.request.into_body(), body_limit).await {
        Ok(body) => body,
        Err(e) => return response::json_error(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let events: Vec<Value> = match serde_json::from_slice(&body) {
        Ok(events) => events,
        Err(e) => return response::json_error(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let count = events.len();
    for mut event in events {
        let Some(object) = event.as_object_mut() else {
            metrics::record_event("invalid");
            return response::json_error(StatusCode::BAD_REQUEST, "event must be a JSON object");
        };
        object.insert(USER_FIELD.to_string(), user.clone());

        if let Err(e) = sink.put(event).await {
            metrics::record_event(failure_outcome(&e));
            tracing::warn!(error = %e, "Rejected posted event");
            return if e.is_retryable() {
                response::unavailable()
            } else {
                response::json_error(StatusCode::BAD_REQUEST, e.to_string())
            };
        }
    }

    tracing::debug!(events = count, "Stored posted events");
    response::json(StatusCode::OK, &json!({}))
}

fn failure_outcome(error: &StoreError) -> &'static str {
    if error.is_retryable() {
        "unavailable"
    } else {
        "invalid"
    }
}
