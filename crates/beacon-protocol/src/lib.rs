//! # beacon-protocol
//!
//! Wire protocol definitions for the Beacon chat hub.
//!
//! The protocol is a closed set of JSON frames tagged by a `type` field:
//!
//! - **ClientFrame** - inbound commands (`message`, `delivered`, `seen`, `typing`)
//! - **ServerEvent** - outbound events (`message`, `delivered`, `seen`, `typing`,
//!   `presence`, `presence_snapshot`)
//! - **codec** - JSON encode/decode with frame-size limits

pub mod codec;
pub mod events;

pub use codec::{decode_client, encode_event, ProtocolError, MAX_FRAME_SIZE};
pub use events::{ClientFrame, MessageId, ServerEvent, UserId};
