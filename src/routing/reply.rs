//! Reply channels handed to endpoint handlers.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::net::connection::ConnectionId;

/// Handle a handler uses to push JSON back to its client.
///
/// Every clone shares the connection id, so a close callback can be
/// correlated with the channel that produced earlier pushes. Replies are
/// queued to the connection's single writer task and go out in send order.
#[derive(Debug, Clone)]
pub struct ReplyChannel {
    id: ConnectionId,
    tx: Option<mpsc::UnboundedSender<String>>,
}

impl ReplyChannel {
    pub fn new(id: ConnectionId, tx: mpsc::UnboundedSender<String>) -> Self {
        Self { id, tx: Some(tx) }
    }

    /// A channel with no peer; sends are discarded. Used for UDP.
    pub fn detached() -> Self {
        Self {
            id: ConnectionId::new(),
            tx: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Serialize `reply` and queue it. Returns `false` if the peer is gone.
    pub fn send<T: Serialize + ?Sized>(&self, reply: &T) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match serde_json::to_string(reply) {
            Ok(text) => tx.send(text).is_ok(),
            Err(e) => {
                tracing::warn!(connection_id = %self.id, error = %e, "Reply is not serializable");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }
}

impl PartialEq for ReplyChannel {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ReplyChannel {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clones_share_identity_and_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = ReplyChannel::new(ConnectionId::new(), tx);
        let clone = channel.clone();
        assert_eq!(channel, clone);

        assert!(channel.send(&json!({"n": 1})));
        assert!(clone.send(&json!({"n": 2})));
        assert_eq!(rx.try_recv().unwrap(), r#"{"n":1}"#);
        assert_eq!(rx.try_recv().unwrap(), r#"{"n":2}"#);

        drop(rx);
        assert!(channel.is_closed());
        assert!(!channel.send(&json!({})));
    }

    #[test]
    fn detached_channel_discards() {
        let channel = ReplyChannel::detached();
        assert!(channel.is_closed());
        assert!(!channel.send(&json!({"ignored": true})));
        assert_ne!(channel, ReplyChannel::detached());
    }
}
