//! Configuration schema definitions.
//!
//! Every section carries defaults so an empty file (or no file) yields a
//! runnable server: HTTP on 1080, UDP on 1180, `allow_all` authentication.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::auth::Strategy;

/// Root configuration for the ingress server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct IngressConfig {
    /// Listener configuration (addresses, ports, static assets).
    pub listener: ListenerConfig,

    /// Authenticator selection and its parameters.
    pub auth: AuthConfig,

    /// Backing store connection settings.
    pub store: StoreConfig,

    /// WebSocket frame limits.
    pub websocket: WebSocketConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface to bind both the TCP and UDP listeners on.
    pub bind_address: String,

    /// TCP port for HTTP and WebSocket traffic.
    pub http_port: u16,

    /// UDP port for datagrams; `None` disables the UDP listener.
    pub udp_port: Option<u16>,

    /// Directory served for unmatched HTTP requests.
    pub static_dir: Option<PathBuf>,

    /// Largest accepted HTTP request body, in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 1080,
            udp_port: Some(1180),
            static_dir: None,
            max_body_size: 1 << 20,
        }
    }
}

impl ListenerConfig {
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.http_port)
    }

    pub fn udp_addr(&self) -> Option<String> {
        self.udp_port
            .map(|port| format!("{}:{}", self.bind_address, port))
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Which authenticator gates every request.
    pub authenticator: Strategy,

    /// Shared secret for the signed-request family.
    pub consumer_secret: Option<String>,

    /// Email domain accepted by `email_restricted_signed_request`.
    pub valid_email: Option<String>,

    /// User collection consulted by `mongo_cookie`.
    pub collection: String,

    /// Session cookie read by `mongo_cookie`.
    pub session_cookie: String,

    /// Field that carries the organization id in query expressions.
    pub org_filter_field: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            authenticator: Strategy::AllowAll,
            consumer_secret: None,
            valid_email: None,
            collection: "users".to_string(),
            session_cookie: crate::auth::cookie::DEFAULT_SESSION_COOKIE.to_string(),
            org_filter_field: "orgId".to_string(),
        }
    }
}

/// Backing store configuration.
///
/// The connection fields are kept for deployments that point at an external
/// database; the bundled server uses the in-memory stores and reads user
/// records from `users_file`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,

    /// JSON array of user records loaded at startup.
    pub users_file: Option<PathBuf>,

    /// Events kept per type by the in-memory sink.
    pub max_events_per_type: usize,

    /// Distinct event types the in-memory sink accepts.
    pub max_event_types: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 27017,
            database: "cube".to_string(),
            username: None,
            password: None,
            users_file: None,
            max_events_per_type: 10_000,
            max_event_types: 1024,
        }
    }
}

/// WebSocket limits, applied to both handshake variants.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Largest single frame, in bytes.
    pub max_frame_size: usize,

    /// Largest reassembled message, in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 0x10000,
            max_message_size: 0x100000,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time for a plain HTTP request/response, in seconds.
    pub request_secs: u64,

    /// Grace period for in-flight connections on shutdown, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            shutdown_grace_secs: 10,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins if set.
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
