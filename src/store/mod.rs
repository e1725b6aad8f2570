//! Backing-store boundary.
//!
//! # Data Flow
//! ```text
//! mongo_cookie strategy
//!     → UserStore::find_by_token_uid (async)
//!     → UserRecord { tokens: [UserToken] }
//!
//! collector endpoints
//!     → EventSink::put (async)
//!     → collections.rs (per-type collection, memoized)
//! ```
//!
//! # Design Decisions
//! - Storage is a collaborator: only the trait boundary lives here, plus
//!   in-memory implementations so the server runs stand-alone
//! - Store outages are reported as retryable errors, never fatal

pub mod collections;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use collections::TypeCollections;
pub use memory::{MemoryEventSink, MemoryUserStore};

/// Errors surfaced by store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store data is malformed: {0}")]
    Parse(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Io(_))
    }
}

/// A user document with its session tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub tokens: Vec<UserToken>,
}

/// One session token; `hashed_secret` is a bcrypt (`$2a$`/`$2b$`/`$2y$`)
/// or PHC-format Argon2 hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserToken {
    pub uid: String,
    pub hashed_secret: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Lookup of users by one of their token uids.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Find the user in `collection` owning a token with `uid`.
    async fn find_by_token_uid(
        &self,
        collection: &str,
        uid: &str,
    ) -> Result<Option<UserRecord>, StoreError>;
}

/// Destination for collected events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn put(&self, event: Value) -> Result<(), StoreError>;
}
