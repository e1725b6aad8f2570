//! In-memory store implementations.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::observability::metrics;
use crate::store::{EventSink, StoreError, TypeCollections, UserRecord, UserStore};

/// User records grouped by collection name.
#[derive(Default)]
pub struct MemoryUserStore {
    collections: DashMap<String, Vec<UserRecord>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of user records into `collection`.
    pub fn load_from_file(path: &Path, collection: &str) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)?;
        let records: Vec<UserRecord> = serde_json::from_str(&content)?;
        let store = Self::new();
        let count = records.len();
        for record in records {
            store.insert(collection, record);
        }
        tracing::info!(path = %path.display(), collection, users = count, "Loaded user records");
        Ok(store)
    }

    pub fn insert(&self, collection: &str, record: UserRecord) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(record);
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, |users| users.len())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_token_uid(
        &self,
        collection: &str,
        uid: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.collections.get(collection).and_then(|users| {
            users
                .iter()
                .find(|user| user.tokens.iter().any(|token| token.uid == uid))
                .cloned()
        }))
    }
}

/// Bounded log of recent events for one type.
struct EventLog {
    events: Mutex<VecDeque<Value>>,
}

/// Distinct event types a sink accepts unless configured otherwise.
pub const DEFAULT_MAX_TYPES: usize = 1024;

/// Keeps the most recent events of each type in memory.
///
/// Both dimensions are bounded: `capacity` events per type and `max_types`
/// distinct types. Events of a type first seen past the type limit are
/// rejected, so unauthenticated UDP traffic cannot grow the sink without end.
pub struct MemoryEventSink {
    types: TypeCollections<EventLog>,
    capacity: usize,
    max_types: usize,
}

impl MemoryEventSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            types: TypeCollections::new(),
            capacity: capacity.max(1),
            max_types: DEFAULT_MAX_TYPES,
        }
    }

    pub fn with_max_types(mut self, max_types: usize) -> Self {
        self.max_types = max_types.max(1);
        self
    }

    /// Snapshot of stored events of `event_type`, oldest first.
    pub fn events(&self, event_type: &str) -> Vec<Value> {
        self.types.get(event_type).map_or_else(Vec::new, |log| {
            log.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .cloned()
                .collect()
        })
    }

    /// Event types seen so far, sorted.
    pub fn types(&self) -> Vec<String> {
        self.types.keys()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn put(&self, event: Value) -> Result<(), StoreError> {
        let event_type = match event.get("type").and_then(Value::as_str) {
            Some(t) if is_valid_type(t) => t.to_string(),
            Some(t) => return Err(StoreError::InvalidEvent(format!("invalid type: {t}"))),
            None => return Err(StoreError::InvalidEvent("missing type".into())),
        };

        // Soft limit: concurrent first puts of new types may overshoot slightly.
        if self.types.get(&event_type).is_none() && self.types.len() >= self.max_types {
            tracing::debug!(
                event_type = %event_type,
                max_types = self.max_types,
                "Event type limit reached; rejecting new type"
            );
            return Err(StoreError::InvalidEvent(format!(
                "event type limit ({}) reached",
                self.max_types
            )));
        }

        let capacity = self.capacity;
        let log = self
            .types
            .get_or_try_init(&event_type, || async move {
                tracing::debug!("Opening event collection");
                Ok::<_, StoreError>(EventLog {
                    events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
                })
            })
            .await?;

        let mut events = log.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() == capacity {
            events.pop_front();
        }
        events.push_back(event);
        metrics::record_event("stored");
        Ok(())
    }
}

/// Type names start with a lowercase letter followed by letters, digits or `_`.
fn is_valid_type(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
