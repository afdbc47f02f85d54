//! # beacon-core
//!
//! The realtime connection hub at the heart of Beacon: fan-out of chat
//! events to every live connection of a user, online/offline presence, and
//! the sent → delivered → seen acknowledgment flow.
//!
//! - **Hub** - single-owner actor holding all routing and presence state
//! - **Session** - per-connection receive-side protocol state machine
//! - **ConnectionHandle** - a connection's bounded outbound event queue
//! - **Roster** - per-user live-connection counts and presence transitions
//! - **HubCallbacks** - the injectable persistence contract; storage itself
//!   lives outside this crate
//!
//! ## Architecture
//!
//! ```text
//! read pump ──frames──▶ Session ──commands──▶ Hub (actor) ──try_send──▶ outbound queues
//!                          │                    │
//!                          ▼                    ▼
//!                     HubCallbacks       Roster + routing table
//! ```
//!
//! State is in-memory and ephemeral; nothing survives a restart.

pub mod callbacks;
pub mod connection;
pub mod hub;
pub mod presence;
pub mod session;

pub use callbacks::{CallbackError, DeliveryReceipt, HubCallbacks, PersistedMessage, SeenReceipt};
pub use connection::{ConnectionHandle, ConnectionId, EnqueueOutcome, DEFAULT_SEND_QUEUE_CAPACITY};
pub use hub::{Hub, HubConfig, HubStats};
pub use presence::Roster;
pub use session::Session;
