//! TCP ingress: HTTP dispatch and WebSocket upgrades.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, upgrade detection)
//!     → websocket.rs (modern upgrade) / legacy.rs (draft-75/76 upgrade)
//!     → auth gate → endpoint registry → handler
//!     → response.rs (rejections, JSON + CORS)
//!     → static files when no endpoint matches
//! ```

pub mod legacy;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::X_REQUEST_ID;
pub use server::{AppState, IngressServer};
