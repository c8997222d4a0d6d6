//! Duplex websocket link to the voice service.
//!
//! - Outbound: raw binary PCM frames
//! - Inbound: JSON status events (`ServerEvent`)

pub mod client;
pub mod messages;

pub use client::{
    ConnectionConfig, ConnectionEvent, ConnectionEvents, ConnectionManager, ConnectionState,
    FrameSender, Handshake, PendingConnect,
};
pub use messages::{decode_server_event, ResponsePayload, ServerEvent, REPLY_MEDIA_TYPE};
