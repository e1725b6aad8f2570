//! WebSocket ingress.
//!
//! # Responsibilities
//! - Detect upgrade requests and pick the handshake variant
//! - Authenticate the upgrade request before the handshake completes
//! - Adapt both variants to one [`Connection`]
//! - Drive an open connection: parse, stamp `authorized`, dispatch, reply
//!
//! # Data Flow
//! ```text
//! upgrade request
//!     → detect_variant (Sec-WebSocket-Version present → modern)
//!     → Authenticator::check
//!         ✗ → 403 (modern: refused handshake, legacy: raw 403 + close)
//!     → endpoint looked up once by upgrade path
//!     → handshake (axum / legacy.rs)
//!     → drive(): reader ─ JSON + authorized ─→ on_message(msg, ReplyChannel)
//!                writer ◀─ mpsc ◀─ ReplyChannel::send
//!     → socket end → on_close(ReplyChannel) exactly once
//! ```
//!
//! # Design Decisions
//! - Each handler call is awaited before the next frame is read (FIFO per connection)
//! - One writer task per connection, so replies keep their send order
//! - A panicking handler tears down only its own connection

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::FromRequestParts;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::http::legacy;
use crate::http::response;
use crate::http::server::AppState;
use crate::net::connection::{
    Connection, ConnectionId, ConnectionState, ConnectionTracker, FrameError, FrameReader,
    FrameWriter, HandshakeVariant,
};
use crate::observability::metrics;
use crate::routing::{ReplyChannel, WsHandlers};

/// How long a closing connection may spend flushing queued replies.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// Field injected into every inbound message.
pub const AUTHORIZED_FIELD: &str = "authorized";

fn header_has_token(headers: &HeaderMap, name: header::HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}

/// Classify a request as a WebSocket upgrade, if it is one.
pub fn detect_variant<B>(request: &Request<B>) -> Option<HandshakeVariant> {
    let headers = request.headers();
    let is_upgrade = request.method() == Method::GET
        && header_has_token(headers, header::UPGRADE, "websocket")
        && header_has_token(headers, header::CONNECTION, "upgrade");
    if !is_upgrade {
        return None;
    }
    if headers.contains_key(header::SEC_WEBSOCKET_VERSION) {
        Some(HandshakeVariant::Modern)
    } else {
        Some(HandshakeVariant::Legacy)
    }
}

/// Authenticate and upgrade. The returned response completes (or refuses)
/// the handshake; the connection itself runs in a spawned task.
pub async fn upgrade(
    state: AppState,
    request: Request<Body>,
    variant: HandshakeVariant,
    remote_addr: Option<SocketAddr>,
) -> Response {
    let (mut parts, _body) = request.into_parts();
    let id = ConnectionId::new();
    let path = parts.uri.path().to_string();
    tracing::debug!(
        connection_id = %id,
        variant = variant.as_str(),
        path = %path,
        state = ?ConnectionState::UpgradeReceived,
        "WebSocket upgrade"
    );

    tracing::trace!(connection_id = %id, state = ?ConnectionState::Authenticating);
    let authorized = match state.authenticator.check(&parts).await {
        Ok(authorized) => authorized,
        Err(e) => {
            tracing::debug!(
                connection_id = %id,
                reason = e.kind(),
                state = ?ConnectionState::Rejected,
                "WebSocket upgrade rejected"
            );
            let status = if e.is_retryable() {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::FORBIDDEN
            };
            return match (variant, status) {
                (HandshakeVariant::Legacy, status) => legacy::reject(status),
                (HandshakeVariant::Modern, StatusCode::FORBIDDEN) => response::forbidden(),
                (HandshakeVariant::Modern, _) => response::unavailable(),
            };
        }
    };

    let handlers = state.registry.match_ws(&path).cloned();
    tracing::trace!(connection_id = %id, matched = handlers.is_some(), state = ?ConnectionState::Accepted);

    let limits = state.websocket.clone();
    let tracker = state.connections.clone();

    match variant {
        HandshakeVariant::Modern => {
            let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
                Ok(ws) => ws,
                Err(rejection) => return rejection.into_response(),
            };
            ws.max_frame_size(limits.max_frame_size)
                .max_message_size(limits.max_message_size)
                .on_failed_upgrade(move |e| {
                    tracing::warn!(connection_id = %id, error = %e, "WebSocket upgrade failed");
                })
                .on_upgrade(move |socket| async move {
                    let (sink, stream) = socket.split();
                    let connection = Connection {
                        id,
                        variant,
                        remote_addr,
                        path,
                        authorized,
                        reader: Box::new(ModernReader { inner: stream }),
                        writer: Box::new(ModernWriter { inner: sink }),
                    };
                    drive(connection, handlers, tracker).await;
                })
        }
        HandshakeVariant::Legacy => {
            let draft = match legacy::detect_draft(&parts.headers) {
                Ok(draft) => draft,
                Err(e) => {
                    tracing::debug!(connection_id = %id, error = %e, "Bad legacy handshake");
                    return legacy::reject(StatusCode::BAD_REQUEST);
                }
            };
            let response = match legacy::handshake_response(&parts, draft) {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!(connection_id = %id, error = %e, "Bad legacy handshake");
                    return legacy::reject(StatusCode::BAD_REQUEST);
                }
            };
            let Some(on_upgrade) = parts.extensions.remove::<hyper::upgrade::OnUpgrade>() else {
                return legacy::reject(StatusCode::UPGRADE_REQUIRED);
            };

            tokio::spawn(async move {
                let upgraded = match on_upgrade.await {
                    Ok(upgraded) => upgraded,
                    Err(e) => {
                        tracing::warn!(connection_id = %id, error = %e, "WebSocket upgrade failed");
                        return;
                    }
                };
                let (reader, writer) =
                    match legacy::open(TokioIo::new(upgraded), draft, limits.max_message_size).await {
                        Ok(halves) => halves,
                        Err(e) => {
                            tracing::debug!(connection_id = %id, error = %e, "Legacy handshake aborted");
                            return;
                        }
                    };
                let connection = Connection {
                    id,
                    variant,
                    remote_addr,
                    path,
                    authorized,
                    reader: Box::new(reader),
                    writer: Box::new(writer),
                };
                drive(connection, handlers, tracker).await;
            });
            response
        }
    }
}

/// Run an accepted connection to completion.
pub async fn drive(connection: Connection, handlers: Option<WsHandlers>, tracker: ConnectionTracker) {
    let Connection {
        id,
        variant,
        remote_addr,
        path,
        authorized,
        mut reader,
        mut writer,
    } = connection;
    let _guard = tracker.track(id);

    let Some(handlers) = handlers else {
        tracing::debug!(connection_id = %id, path = %path, "No WebSocket endpoint; closing");
        if let Err(e) = writer.close().await {
            tracing::trace!(connection_id = %id, error = %e, "Close after no match failed");
        }
        return;
    };

    metrics::ws_connection_opened(variant.as_str());
    tracing::info!(
        connection_id = %id,
        variant = variant.as_str(),
        path = %path,
        remote_addr = ?remote_addr,
        state = ?ConnectionState::Open,
        "WebSocket connection open"
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let reply = ReplyChannel::new(id, tx);
    let mut writer_task = tokio::spawn(async move {
        // Queued replies always go out before the stop signal is honored.
        let mut stopping = false;
        loop {
            let next = if stopping {
                rx.try_recv().ok()
            } else {
                tokio::select! {
                    biased;
                    queued = rx.recv() => queued,
                    _ = &mut stop_rx => {
                        stopping = true;
                        rx.try_recv().ok()
                    }
                }
            };
            let Some(text) = next else { break };
            if let Err(e) = writer.send_text(text).await {
                tracing::debug!(connection_id = %id, error = %e, "WebSocket write failed");
                return;
            }
        }
        if let Err(e) = writer.close().await {
            tracing::trace!(connection_id = %id, error = %e, "WebSocket close failed");
        }
    });

    let authorized = authorized.to_value();
    while let Some(frame) = reader.next_text().await {
        let text = match frame {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "WebSocket transport fault");
                break;
            }
        };

        let mut message = match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(message)) => message,
            Ok(_) | Err(_) => {
                tracing::debug!(connection_id = %id, "Dropping malformed WebSocket message");
                metrics::record_ws_message("dropped");
                continue;
            }
        };
        message.insert(AUTHORIZED_FIELD.to_string(), authorized.clone());

        let dispatched = AssertUnwindSafe((handlers.on_message)(Value::Object(message), reply.clone()))
            .catch_unwind()
            .await;
        if dispatched.is_err() {
            tracing::error!(connection_id = %id, path = %path, "WebSocket handler panicked; closing connection");
            metrics::record_ws_message("panicked");
            break;
        }
        metrics::record_ws_message("dispatched");
    }

    if let Some(on_close) = &handlers.on_close {
        if AssertUnwindSafe(on_close(reply.clone())).catch_unwind().await.is_err() {
            tracing::error!(connection_id = %id, path = %path, "WebSocket close handler panicked");
        }
    }

    // Handlers may keep clones of the channel, so the writer is stopped
    // explicitly rather than waiting for every sender to drop.
    drop(reply);
    let _ = stop_tx.send(());
    if tokio::time::timeout(WRITER_DRAIN, &mut writer_task).await.is_err() {
        tracing::debug!(connection_id = %id, "WebSocket writer did not drain in time");
        writer_task.abort();
    }

    metrics::ws_connection_closed(variant.as_str());
    tracing::info!(connection_id = %id, state = ?ConnectionState::Closed, "WebSocket connection closed");
}

struct ModernReader {
    inner: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameReader for ModernReader {
    async fn next_text(&mut self) -> Option<Result<String, FrameError>> {
        loop {
            return match self.inner.next().await? {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => continue,
                },
                Ok(Message::Close(_)) => None,
                Ok(Message::Ping(_) | Message::Pong(_)) => continue,
                Err(e) => Some(Err(FrameError::Protocol(e.to_string()))),
            };
        }
    }
}

struct ModernWriter {
    inner: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameWriter for ModernWriter {
    async fn send_text(&mut self, text: String) -> Result<(), FrameError> {
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| FrameError::Protocol(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), FrameError> {
        let _ = self.inner.send(Message::Close(None)).await;
        self.inner
            .close()
            .await
            .map_err(|e| FrameError::Protocol(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthorizationContext;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    fn upgrade_request(version: Option<&str>) -> Request<()> {
        let mut builder = Request::builder()
            .uri("/1.0/event/put")
            .header(header::UPGRADE, "WebSocket")
            .header(header::CONNECTION, "keep-alive, Upgrade");
        if let Some(version) = version {
            builder = builder.header(header::SEC_WEBSOCKET_VERSION, version);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn variant_selected_by_version_header() {
        assert_eq!(detect_variant(&upgrade_request(Some("13"))), Some(HandshakeVariant::Modern));
        assert_eq!(detect_variant(&upgrade_request(None)), Some(HandshakeVariant::Legacy));

        let plain = Request::builder().uri("/").body(()).unwrap();
        assert_eq!(detect_variant(&plain), None);
    }

    /// Scripted inbound frames.
    struct Script(VecDeque<&'static str>);

    #[async_trait]
    impl FrameReader for Script {
        async fn next_text(&mut self) -> Option<Result<String, FrameError>> {
            self.0.pop_front().map(|text| Ok(text.to_string()))
        }
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl FrameWriter for Recorder {
        async fn send_text(&mut self, text: String) -> Result<(), FrameError> {
            self.0.lock().unwrap().push(text);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), FrameError> {
            self.0.lock().unwrap().push("<close>".into());
            Ok(())
        }
    }

    fn connection(frames: &[&'static str], writer: Recorder) -> Connection {
        Connection {
            id: ConnectionId::new(),
            variant: HandshakeVariant::Modern,
            remote_addr: None,
            path: "/echo".into(),
            authorized: AuthorizationContext::admin(),
            reader: Box::new(Script(frames.iter().copied().collect())),
            writer: Box::new(writer),
        }
    }

    #[tokio::test]
    async fn drive_stamps_authorized_and_fires_close_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(Mutex::new(Vec::new()));
        let handlers = WsHandlers {
            on_message: {
                let seen = Arc::clone(&seen);
                Arc::new(move |message: Value, reply: ReplyChannel| {
                    seen.lock().unwrap().push((message, reply.id()));
                    async {}.boxed()
                })
            },
            on_close: Some({
                let closed = Arc::clone(&closed);
                Arc::new(move |reply: ReplyChannel| {
                    closed.lock().unwrap().push(reply.id());
                    async {}.boxed()
                })
            }),
        };

        let frames = [r#"{"foo":1}"#, "not json", "[1,2]", r#"{"bar":2}"#];
        drive(connection(&frames, Recorder::default()), Some(handlers), ConnectionTracker::new()).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, json!({"foo": 1, "authorized": {"admin": true}}));
        assert_eq!(seen[1].0["bar"], 2);

        let closed = closed.lock().unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0], seen[0].1);
    }

    #[tokio::test]
    async fn unmatched_path_is_closed_immediately() {
        let writer = Recorder::default();
        drive(connection(&[r#"{"foo":1}"#], writer.clone()), None, ConnectionTracker::new()).await;
        assert_eq!(*writer.0.lock().unwrap(), vec!["<close>".to_string()]);
    }

    #[tokio::test]
    async fn queued_replies_are_flushed_before_close() {
        let handlers = WsHandlers {
            on_message: Arc::new(|mut message: Value, reply: ReplyChannel| {
                if let Some(object) = message.as_object_mut() {
                    object.remove(AUTHORIZED_FIELD);
                }
                reply.send(&message);
                async {}.boxed()
            }),
            on_close: Some(Arc::new(|reply: ReplyChannel| {
                reply.send(&json!({"bye": true}));
                async {}.boxed()
            })),
        };

        let writer = Recorder::default();
        drive(
            connection(&[r#"{"foo":1}"#, r#"{"foo":2}"#], writer.clone()),
            Some(handlers),
            ConnectionTracker::new(),
        )
        .await;

        assert_eq!(
            *writer.0.lock().unwrap(),
            vec![
                r#"{"foo":1}"#.to_string(),
                r#"{"foo":2}"#.to_string(),
                r#"{"bye":true}"#.to_string(),
                "<close>".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn handler_panic_ends_only_this_connection() {
        let closed = Arc::new(Mutex::new(0usize));
        let handlers = WsHandlers {
            on_message: Arc::new(|_message: Value, _reply: ReplyChannel| {
                async { panic!("handler fault") }.boxed()
            }),
            on_close: Some({
                let closed = Arc::clone(&closed);
                Arc::new(move |_reply: ReplyChannel| {
                    *closed.lock().unwrap() += 1;
                    async {}.boxed()
                })
            }),
        };

        let tracker = ConnectionTracker::new();
        drive(connection(&[r#"{"a":1}"#, r#"{"b":2}"#], Recorder::default()), Some(handlers), tracker.clone()).await;
        assert_eq!(*closed.lock().unwrap(), 1);
        assert_eq!(tracker.active_count(), 0);
    }
}
