//! Endpoint registration and lookup.
//!
//! # Responsibilities
//! - Store endpoint bindings in registration order
//! - Look up the first binding accepting a (transport, method, path)
//! - Hold the single UDP handler
//!
//! # Design Decisions
//! - Populated on an owned registry, then frozen behind `Arc` before the
//!   listeners start: no locks at lookup time
//! - First match wins; identical later registrations stay unreachable
//! - O(n) scan (acceptable for the handful of endpoints a server binds)

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;

use crate::auth::AuthorizationContext;
use crate::routing::matcher::PathMatcher;
use crate::routing::reply::ReplyChannel;

/// A plain HTTP request that passed authentication.
#[derive(Debug)]
pub struct HttpUnit {
    pub request: Request<Body>,
    pub authorized: AuthorizationContext,
    pub remote_addr: Option<SocketAddr>,
}

pub type HttpHandler = Arc<dyn Fn(HttpUnit) -> BoxFuture<'static, Response> + Send + Sync>;

/// Handles one JSON message (WebSocket) or datagram (UDP).
pub type MessageHandler = Arc<dyn Fn(Value, ReplyChannel) -> BoxFuture<'static, ()> + Send + Sync>;

pub type CloseHandler = Arc<dyn Fn(ReplyChannel) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Http,
    Ws,
}

/// Handlers bound to a WebSocket path.
#[derive(Clone)]
pub struct WsHandlers {
    pub on_message: MessageHandler,
    pub on_close: Option<CloseHandler>,
}

#[derive(Clone)]
pub enum Handler {
    Http(HttpHandler),
    Ws(WsHandlers),
}

/// One registered binding.
#[derive(Clone)]
pub struct Endpoint {
    /// `None` accepts any method. Ignored for WebSocket endpoints.
    pub method: Option<Method>,
    pub matcher: PathMatcher,
    pub handler: Handler,
}

impl Endpoint {
    pub fn transport(&self) -> Transport {
        match self.handler {
            Handler::Http(_) => Transport::Http,
            Handler::Ws(_) => Transport::Ws,
        }
    }

    fn accepts(&self, transport: Transport, method: &Method, path: &str) -> bool {
        if self.transport() != transport {
            return false;
        }
        let method_ok = transport == Transport::Ws
            || self.method.as_ref().map_or(true, |m| m == method);
        method_ok && self.matcher.matches(path)
    }
}

/// Ordered endpoint bindings plus the UDP handler.
#[derive(Clone, Default)]
pub struct EndpointRegistry {
    endpoints: Vec<Endpoint>,
    udp: Option<MessageHandler>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_http<F, Fut>(
        &mut self,
        method: impl Into<Option<Method>>,
        path: impl Into<PathMatcher>,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(HttpUnit) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let method = method.into();
        let matcher = path.into();
        tracing::debug!(
            method = method.as_ref().map_or("*", Method::as_str),
            path = %matcher,
            "Registered HTTP endpoint"
        );
        self.endpoints.push(Endpoint {
            method,
            matcher,
            handler: Handler::Http(Arc::new(move |unit| handler(unit).boxed())),
        });
        self
    }

    pub fn register_ws<F, Fut>(&mut self, path: impl Into<PathMatcher>, on_message: F) -> &mut Self
    where
        F: Fn(Value, ReplyChannel) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.push_ws(path.into(), boxed_message(on_message), None)
    }

    /// Like [`register_ws`](Self::register_ws), with a callback fired once when
    /// each connection ends.
    pub fn register_ws_with_close<F, Fut, C, CFut>(
        &mut self,
        path: impl Into<PathMatcher>,
        on_message: F,
        on_close: C,
    ) -> &mut Self
    where
        F: Fn(Value, ReplyChannel) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        C: Fn(ReplyChannel) -> CFut + Send + Sync + 'static,
        CFut: Future<Output = ()> + Send + 'static,
    {
        let on_close: CloseHandler = Arc::new(move |reply| on_close(reply).boxed());
        self.push_ws(path.into(), boxed_message(on_message), Some(on_close))
    }

    /// Set the UDP handler. Only the first registration takes effect.
    pub fn register_udp<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Value, ReplyChannel) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.udp.is_some() {
            tracing::warn!("UDP handler already registered; ignoring later registration");
        } else {
            self.udp = Some(boxed_message(handler));
        }
        self
    }

    fn push_ws(
        &mut self,
        matcher: PathMatcher,
        on_message: MessageHandler,
        on_close: Option<CloseHandler>,
    ) -> &mut Self {
        tracing::debug!(path = %matcher, on_close = on_close.is_some(), "Registered WebSocket endpoint");
        self.endpoints.push(Endpoint {
            method: None,
            matcher,
            handler: Handler::Ws(WsHandlers {
                on_message,
                on_close,
            }),
        });
        self
    }

    /// First endpoint, in registration order, accepting the request.
    pub fn find(&self, transport: Transport, method: &Method, path: &str) -> Option<&Endpoint> {
        self.endpoints
            .iter()
            .find(|endpoint| endpoint.accepts(transport, method, path))
    }

    pub fn match_http(&self, method: &Method, path: &str) -> Option<&HttpHandler> {
        match &self.find(Transport::Http, method, path)?.handler {
            Handler::Http(handler) => Some(handler),
            Handler::Ws(_) => None,
        }
    }

    pub fn match_ws(&self, path: &str) -> Option<&WsHandlers> {
        match &self.find(Transport::Ws, &Method::GET, path)?.handler {
            Handler::Ws(handlers) => Some(handlers),
            Handler::Http(_) => None,
        }
    }

    pub fn udp_handler(&self) -> Option<&MessageHandler> {
        self.udp.as_ref()
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

fn boxed_message<F, Fut>(handler: F) -> MessageHandler
where
    F: Fn(Value, ReplyChannel) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |message, reply| handler(message, reply).boxed())
}
