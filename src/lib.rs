//! Cube ingress: HTTP, WebSocket and UDP front door for the event collector.

// Core subsystems
pub mod auth;
pub mod config;
pub mod http;
pub mod net;
pub mod routing;

// Collaborators
pub mod collector;
pub mod store;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use auth::{AuthorizationContext, Authenticator, Strategy};
pub use config::IngressConfig;
pub use http::IngressServer;
pub use lifecycle::Shutdown;
pub use routing::{EndpointRegistry, ReplyChannel};
