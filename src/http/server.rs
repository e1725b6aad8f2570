//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Create the Axum router: one fallback handler plus middleware
//! - Wire up middleware (panic boundary, timeout, body limit, request ID, tracing)
//! - Split traffic into WebSocket upgrades and plain HTTP
//! - Authenticate, then dispatch to the registered endpoint
//! - Fall through to static files when nothing matches
//! - Run the UDP listener alongside, sharing the shutdown signal

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::{TcpListener, UdpSocket};
use tower::ServiceExt;
use tower_http::{
    catch_panic::CatchPanicLayer,
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::auth::Authenticator;
use crate::config::{IngressConfig, WebSocketConfig};
use crate::http::request::request_id;
use crate::http::{response, websocket};
use crate::lifecycle::Shutdown;
use crate::net::connection::ConnectionTracker;
use crate::net::udp::UdpIngress;
use crate::observability::metrics;
use crate::routing::{EndpointRegistry, HttpUnit};

/// Application state injected into the dispatch handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<EndpointRegistry>,
    pub authenticator: Arc<Authenticator>,
    pub assets: Option<ServeDir>,
    pub websocket: WebSocketConfig,
    pub connections: ConnectionTracker,
}

/// The connection multiplexer: HTTP and WebSocket on one TCP listener, plus UDP.
pub struct IngressServer {
    router: Router,
    state: AppState,
    shutdown_grace: Duration,
}

impl IngressServer {
    /// The registry must be fully populated: it is frozen here.
    pub fn new(config: &IngressConfig, registry: EndpointRegistry, authenticator: Authenticator) -> Self {
        let state = AppState {
            registry: Arc::new(registry),
            authenticator: Arc::new(authenticator),
            assets: config.listener.static_dir.as_ref().map(ServeDir::new),
            websocket: config.websocket.clone(),
            connections: ConnectionTracker::new(),
        };

        let router = Self::build_router(config, state.clone());
        Self {
            router,
            state,
            shutdown_grace: Duration::from_secs(config.timeouts.shutdown_grace_secs),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &IngressConfig, state: AppState) -> Router {
        Router::new()
            .fallback(dispatch)
            .with_state(state)
            .layer(CatchPanicLayer::custom(handle_panic))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_size))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Open WebSocket connections.
    pub fn connections(&self) -> &ConnectionTracker {
        &self.state.connections
    }

    /// Serve until `shutdown` is triggered.
    ///
    /// `udp` is optional; a bound socket with no registered UDP handler is
    /// left idle.
    pub async fn run(
        self,
        listener: TcpListener,
        udp: Option<UdpSocket>,
        shutdown: Shutdown,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            endpoints = self.state.registry.len(),
            authenticator = %self.state.authenticator.strategy(),
            "Ingress server starting"
        );

        let udp_task = match (udp, self.state.registry.udp_handler()) {
            (Some(socket), Some(handler)) => {
                let ingress = UdpIngress::new(socket, Arc::clone(handler));
                Some(tokio::spawn(ingress.run(shutdown.subscribe())))
            }
            (Some(_), None) => {
                tracing::warn!("UDP socket bound but no UDP handler registered");
                None
            }
            (None, _) => None,
        };

        let mut signal = shutdown.subscribe();
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = signal.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        if let Some(task) = udp_task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "UDP listener task failed");
            }
        }

        let open = self.state.connections.active_count();
        if open > 0 && !self.state.connections.wait_idle(self.shutdown_grace).await {
            tracing::warn!(
                open = self.state.connections.active_count(),
                "WebSocket connections still open after grace period"
            );
        }

        tracing::info!("Ingress server stopped");
        Ok(())
    }
}

/// Single entry point for every TCP request.
async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let response = match websocket::detect_variant(&request) {
        Some(variant) => websocket::upgrade(state, request, variant, remote_addr).await,
        None => serve_http(&state, request, remote_addr).await,
    };

    metrics::record_request(method.as_str(), response.status().as_u16(), start.elapsed());
    response
}

async fn serve_http(state: &AppState, request: Request<Body>, remote_addr: Option<SocketAddr>) -> Response {
    let path = request.uri().path().to_string();
    let Some(handler) = state.registry.match_http(request.method(), &path).cloned() else {
        return serve_static(state, request).await;
    };

    let (mut parts, body) = request.into_parts();
    tracing::debug!(
        request_id = request_id(&parts.headers),
        method = %parts.method,
        path = %path,
        "Dispatching request"
    );

    match state.authenticator.check(&parts).await {
        Ok(authorized) => {
            parts.extensions.insert(authorized.clone());
            let unit = HttpUnit {
                request: Request::from_parts(parts, body),
                authorized,
                remote_addr,
            };
            handler(unit).await
        }
        Err(e) if e.is_retryable() => response::unavailable(),
        Err(_) => response::forbidden(),
    }
}

async fn serve_static(state: &AppState, request: Request<Body>) -> Response {
    let Some(assets) = state.assets.clone() else {
        return response::static_error(StatusCode::NOT_FOUND);
    };
    match assets.oneshot(request).await {
        Ok(served) if served.status().is_client_error() || served.status().is_server_error() => {
            response::static_error(served.status())
        }
        Ok(served) => served.map(Body::new),
        Err(never) => match never {},
    }
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = detail, "Request handler panicked");
    (StatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error").into_response()
}
