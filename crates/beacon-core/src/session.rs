//! Per-connection protocol session.
//!
//! A `Session` is the receive side of one connection: it classifies decoded
//! inbound frames, invokes the matching persistence callback, and hands the
//! resulting event to the hub for routing. It is transport-agnostic; the
//! server's read pump feeds it decoded frames.
//!
//! Failure policy: validation failures and callback errors drop the frame
//! silently and keep the connection open. The sender gets no feedback that
//! a message was not saved; the frontend reconciles optimistically via
//! `temp_id`, so this is preserved behavior rather than fixed here.

use crate::connection::ConnectionId;
use crate::hub::Hub;
use beacon_protocol::{ClientFrame, ServerEvent, UserId};
use tokio::time::Instant;
use tracing::{debug, warn};

/// The receive-side protocol state machine for one connection.
///
/// Stateless across frames apart from the typing throttle. Dropping the
/// session unregisters the connection from the hub, which closes its
/// outbound queue.
pub struct Session {
    hub: Hub,
    connection_id: ConnectionId,
    user_id: UserId,
    last_typing: Option<Instant>,
}

impl Session {
    pub(crate) fn new(hub: Hub, connection_id: ConnectionId, user_id: UserId) -> Self {
        Self {
            hub,
            connection_id,
            user_id,
            last_typing: None,
        }
    }

    /// This connection's id.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// The authenticated user this session belongs to.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Process one decoded inbound frame.
    ///
    /// Invalid or failed frames are dropped without closing the connection;
    /// only the transport layer decides when the connection dies.
    pub async fn handle_frame(&mut self, frame: ClientFrame) {
        match frame {
            ClientFrame::Message {
                to_user_id,
                text,
                temp_id,
            } => self.handle_message(to_user_id, text, temp_id).await,
            ClientFrame::Delivered { message_id } => self.handle_delivered(message_id).await,
            ClientFrame::Seen { from_user_id } => self.handle_seen(from_user_id).await,
            ClientFrame::Typing {
                to_user_id,
                is_typing,
            } => self.handle_typing(to_user_id, is_typing),
            ClientFrame::Unknown => {
                debug!(connection = self.connection_id, "ignoring unknown frame type");
            }
        }
    }

    async fn handle_message(&self, to_user_id: UserId, text: String, temp_id: Option<String>) {
        if to_user_id <= 0 || to_user_id == self.user_id || text.is_empty() {
            debug!(connection = self.connection_id, "dropping invalid message frame");
            return;
        }
        let Some(callback) = &self.hub.callbacks().message else {
            return;
        };

        let persisted = match callback(self.user_id, to_user_id, text.clone()).await {
            Ok(persisted) => persisted,
            Err(error) => {
                // Silent drop: the sender gets no error and no retry.
                warn!(
                    connection = self.connection_id,
                    user = self.user_id,
                    %error,
                    "message persistence failed, dropping frame"
                );
                return;
            }
        };

        self.hub.route(ServerEvent::Message {
            id: persisted.id,
            from_user_id: self.user_id,
            to_user_id,
            content: text,
            sent_at: persisted.sent_at,
            seen: false,
            temp_id,
        });
    }

    async fn handle_delivered(&self, message_id: i64) {
        if message_id <= 0 {
            debug!(connection = self.connection_id, "dropping invalid delivered frame");
            return;
        }
        let Some(callback) = &self.hub.callbacks().delivered else {
            return;
        };

        let receipt = match callback(self.user_id, message_id).await {
            Ok(receipt) => receipt,
            Err(error) => {
                debug!(
                    connection = self.connection_id,
                    message = message_id,
                    %error,
                    "delivery ack rejected"
                );
                return;
            }
        };

        self.hub.route(ServerEvent::Delivered {
            message_id,
            from_user_id: receipt.sender_id,
            to_user_id: self.user_id,
            delivered_at: receipt.delivered_at,
        });
    }

    async fn handle_seen(&self, other_user_id: UserId) {
        if other_user_id <= 0 {
            debug!(connection = self.connection_id, "dropping invalid seen frame");
            return;
        }
        let Some(callback) = &self.hub.callbacks().seen else {
            return;
        };

        let receipt = match callback(self.user_id, other_user_id).await {
            Ok(Some(receipt)) => receipt,
            // Nothing was pending: no event.
            Ok(None) => return,
            Err(error) => {
                debug!(
                    connection = self.connection_id,
                    other = other_user_id,
                    %error,
                    "seen ack rejected"
                );
                return;
            }
        };

        self.hub.route(ServerEvent::Seen {
            from_user_id: other_user_id,
            to_user_id: self.user_id,
            seen_up_to_id: receipt.seen_up_to_id,
            seen_at: receipt.seen_at,
        });
    }

    fn handle_typing(&mut self, to_user_id: UserId, is_typing: bool) {
        if to_user_id <= 0 {
            debug!(connection = self.connection_id, "dropping invalid typing frame");
            return;
        }

        // Minimum-interval throttle per connection to bound typing spam.
        let now = Instant::now();
        if let Some(last) = self.last_typing {
            if now.duration_since(last) < self.hub.config().typing_min_interval {
                return;
            }
        }
        self.last_typing = Some(now);

        self.hub
            .route(ServerEvent::typing(self.user_id, to_user_id, is_typing));
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.hub.unregister(self.connection_id, self.user_id);
    }
}
