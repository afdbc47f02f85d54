//! Event types for the Beacon chat protocol.
//!
//! Inbound frames are what a browser tab sends to the server; outbound
//! events are what the server fans out to connected tabs. Both sides are
//! tagged JSON discriminated by a `type` field.

use serde::{Deserialize, Serialize};

/// A user identifier, assigned by the (external) account layer.
pub type UserId = i64;

/// A persisted message identifier, assigned by the storage callback.
pub type MessageId = i64;

/// An inbound frame from a client connection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Send a chat message to another user.
    #[serde(rename = "message")]
    Message {
        /// Recipient user id.
        to_user_id: UserId,
        /// Message body.
        text: String,
        /// Client-supplied correlation token for optimistic-UI reconciliation.
        #[serde(default)]
        temp_id: Option<String>,
    },

    /// Acknowledge that a message reached this client.
    #[serde(rename = "delivered")]
    Delivered {
        /// Id of the message being acknowledged.
        message_id: MessageId,
    },

    /// Acknowledge that this client viewed a conversation.
    #[serde(rename = "seen")]
    Seen {
        /// The counterpart whose messages were viewed.
        from_user_id: UserId,
    },

    /// Ephemeral typing indicator.
    #[serde(rename = "typing")]
    Typing {
        /// Recipient user id.
        to_user_id: UserId,
        /// Whether the sender is currently typing.
        is_typing: bool,
    },

    /// Any frame type this server version does not understand.
    ///
    /// Unknown types are ignored; only malformed JSON kills the connection.
    #[serde(other)]
    Unknown,
}

impl ClientFrame {
    /// The wire value of this frame's `type` tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::Message { .. } => "message",
            ClientFrame::Delivered { .. } => "delivered",
            ClientFrame::Seen { .. } => "seen",
            ClientFrame::Typing { .. } => "typing",
            ClientFrame::Unknown => "unknown",
        }
    }
}

/// An outbound event fanned out to client connections.
///
/// Timestamps are RFC 3339 strings supplied by the persistence callbacks;
/// the hub never interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// A chat message, delivered to all live connections of both parties.
    #[serde(rename = "message")]
    Message {
        /// Persisted message id.
        id: MessageId,
        /// Sender user id.
        from_user_id: UserId,
        /// Recipient user id.
        to_user_id: UserId,
        /// Message body.
        content: String,
        /// Persistence timestamp.
        sent_at: String,
        /// Always false at emission; the seen flow flips it later.
        seen: bool,
        /// Echo of the client's correlation token, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
    },

    /// Delivery acknowledgment, routed back to the original sender only.
    #[serde(rename = "delivered")]
    Delivered {
        /// Id of the acknowledged message.
        message_id: MessageId,
        /// Original sender (the event's audience).
        from_user_id: UserId,
        /// The acknowledging recipient.
        to_user_id: UserId,
        /// Acknowledgment timestamp.
        delivered_at: String,
    },

    /// Conversation-seen acknowledgment, routed back to the original sender.
    #[serde(rename = "seen")]
    Seen {
        /// Original sender (the event's audience).
        from_user_id: UserId,
        /// The viewer who opened the conversation.
        to_user_id: UserId,
        /// Highest message id covered by this acknowledgment.
        seen_up_to_id: MessageId,
        /// Acknowledgment timestamp.
        seen_at: String,
    },

    /// Typing indicator, routed to the named recipient only.
    #[serde(rename = "typing")]
    Typing {
        /// The user who is typing.
        from_user_id: UserId,
        /// Recipient user id.
        to_user_id: UserId,
        /// Whether the sender is currently typing.
        is_typing: bool,
    },

    /// Online/offline transition, broadcast to all connections.
    #[serde(rename = "presence")]
    Presence {
        /// The user whose presence changed.
        user_id: UserId,
        /// New presence state.
        online: bool,
        /// Last-seen timestamp, present on offline transitions when the
        /// offline callback produced one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seen: Option<String>,
    },

    /// Point-in-time list of online users, sent privately to a connection
    /// right after it registers.
    #[serde(rename = "presence_snapshot")]
    PresenceSnapshot {
        /// Currently online user ids, including the receiving user.
        online_user_ids: Vec<UserId>,
    },
}

impl ServerEvent {
    /// Create a presence transition event.
    #[must_use]
    pub fn presence(user_id: UserId, online: bool, last_seen: Option<String>) -> Self {
        ServerEvent::Presence {
            user_id,
            online,
            last_seen,
        }
    }

    /// Create a presence snapshot event.
    #[must_use]
    pub fn presence_snapshot(online_user_ids: Vec<UserId>) -> Self {
        ServerEvent::PresenceSnapshot { online_user_ids }
    }

    /// Create a typing event.
    #[must_use]
    pub fn typing(from_user_id: UserId, to_user_id: UserId, is_typing: bool) -> Self {
        ServerEvent::Typing {
            from_user_id,
            to_user_id,
            is_typing,
        }
    }

    /// The wire value of this event's `type` tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Message { .. } => "message",
            ServerEvent::Delivered { .. } => "delivered",
            ServerEvent::Seen { .. } => "seen",
            ServerEvent::Typing { .. } => "typing",
            ServerEvent::Presence { .. } => "presence",
            ServerEvent::PresenceSnapshot { .. } => "presence_snapshot",
        }
    }
}
