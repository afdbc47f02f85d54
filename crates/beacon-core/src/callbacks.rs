//! The persistence callback contract.
//!
//! The hub never touches storage directly. Chat state is persisted through
//! four injectable async callbacks, each independently optional: when one is
//! left unconfigured, the corresponding inbound command is accepted but
//! produces no side effect and no outbound event.

use beacon_protocol::{MessageId, UserId};
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Errors a persistence callback can report.
///
/// The hub treats all of them the same way (the triggering frame is dropped
/// silently); the taxonomy exists for the storage layer's own logging.
#[derive(Debug, Error)]
pub enum CallbackError {
    /// The referenced message or conversation does not exist.
    #[error("not found")]
    NotFound,

    /// The operation contradicts persisted state (wrong receiver, already
    /// acknowledged).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The storage layer itself failed.
    #[error("storage error: {0}")]
    Storage(String),
}

/// A message as persisted by the storage layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedMessage {
    /// Server-assigned message id.
    pub id: MessageId,
    /// Persistence timestamp (RFC 3339).
    pub sent_at: String,
}

/// Result of acknowledging delivery of a single message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// The original sender, who the acknowledgment is routed back to.
    pub sender_id: UserId,
    /// Acknowledgment timestamp (RFC 3339).
    pub delivered_at: String,
}

/// Result of marking a conversation seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenReceipt {
    /// Highest message id covered by the acknowledgment.
    pub seen_up_to_id: MessageId,
    /// Acknowledgment timestamp (RFC 3339).
    pub seen_at: String,
}

type MessageFn = dyn Fn(UserId, UserId, String) -> BoxFuture<'static, Result<PersistedMessage, CallbackError>>
    + Send
    + Sync;
type DeliveredFn = dyn Fn(UserId, MessageId) -> BoxFuture<'static, Result<DeliveryReceipt, CallbackError>>
    + Send
    + Sync;
type SeenFn = dyn Fn(UserId, UserId) -> BoxFuture<'static, Result<Option<SeenReceipt>, CallbackError>>
    + Send
    + Sync;
type OfflineFn =
    dyn Fn(UserId) -> BoxFuture<'static, Result<String, CallbackError>> + Send + Sync;

/// The injectable persistence callbacks.
///
/// Built with the `on_*` builder methods:
///
/// ```
/// use beacon_core::callbacks::{HubCallbacks, PersistedMessage};
///
/// let callbacks = HubCallbacks::new().on_message(|_from, _to, _content| async {
///     Ok(PersistedMessage {
///         id: 1,
///         sent_at: "2026-01-01T00:00:00Z".into(),
///     })
/// });
/// assert!(callbacks.has_message());
/// ```
#[derive(Clone, Default)]
pub struct HubCallbacks {
    pub(crate) message: Option<Arc<MessageFn>>,
    pub(crate) delivered: Option<Arc<DeliveredFn>>,
    pub(crate) seen: Option<Arc<SeenFn>>,
    pub(crate) offline: Option<Arc<OfflineFn>>,
}

impl HubCallbacks {
    /// Create a callback set with nothing configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the message-persistence callback: `(sender, recipient,
    /// content)` to the persisted id and timestamp.
    #[must_use]
    pub fn on_message<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(UserId, UserId, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<PersistedMessage, CallbackError>> + Send + 'static,
    {
        self.message = Some(Arc::new(move |from, to, content| {
            Box::pin(f(from, to, content))
        }));
        self
    }

    /// Configure the delivery-acknowledgment callback: `(receiver, message
    /// id)` to the original sender and delivery timestamp.
    #[must_use]
    pub fn on_delivered<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(UserId, MessageId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<DeliveryReceipt, CallbackError>> + Send + 'static,
    {
        self.delivered = Some(Arc::new(move |receiver, message_id| {
            Box::pin(f(receiver, message_id))
        }));
        self
    }

    /// Configure the conversation-seen callback: `(viewer, counterpart)` to
    /// the highest marked id and timestamp, or `None` when nothing was
    /// pending.
    #[must_use]
    pub fn on_seen<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(UserId, UserId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<SeenReceipt>, CallbackError>> + Send + 'static,
    {
        self.seen = Some(Arc::new(move |viewer, other| Box::pin(f(viewer, other))));
        self
    }

    /// Configure the offline callback: user id to their recorded last-seen
    /// timestamp.
    #[must_use]
    pub fn on_offline<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(UserId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, CallbackError>> + Send + 'static,
    {
        self.offline = Some(Arc::new(move |user_id| Box::pin(f(user_id))));
        self
    }

    /// Whether a message-persistence callback is configured.
    #[must_use]
    pub fn has_message(&self) -> bool {
        self.message.is_some()
    }

    /// Whether a delivery callback is configured.
    #[must_use]
    pub fn has_delivered(&self) -> bool {
        self.delivered.is_some()
    }

    /// Whether a seen callback is configured.
    #[must_use]
    pub fn has_seen(&self) -> bool {
        self.seen.is_some()
    }

    /// Whether an offline callback is configured.
    #[must_use]
    pub fn has_offline(&self) -> bool {
        self.offline.is_some()
    }
}

impl std::fmt::Debug for HubCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubCallbacks")
            .field("message", &self.message.is_some())
            .field("delivered", &self.delivered.is_some())
            .field("seen", &self.seen.is_some())
            .field("offline", &self.offline.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_by_default() {
        let callbacks = HubCallbacks::new();
        assert!(!callbacks.has_message());
        assert!(!callbacks.has_delivered());
        assert!(!callbacks.has_seen());
        assert!(!callbacks.has_offline());
    }

    #[tokio::test]
    async fn test_configured_callback_is_invoked() {
        let callbacks = HubCallbacks::new()
            .on_message(|from, to, content| async move {
                assert_eq!((from, to), (1, 2));
                assert_eq!(content, "hi");
                Ok(PersistedMessage {
                    id: 99,
                    sent_at: "2026-01-01T00:00:00Z".into(),
                })
            })
            .on_offline(|_user| async { Ok("2026-01-01T00:00:00Z".into()) });

        let cb = callbacks.message.as_ref().unwrap();
        let persisted = cb(1, 2, "hi".into()).await.unwrap();
        assert_eq!(persisted.id, 99);
        assert!(callbacks.has_offline());
    }
}
