//! Shared protocol definitions for the Fanout relay
//!
//! Signaling is carried over a WebSocket as a flat JSON envelope
//! `{"event": <kind>, "data": <JSON-encoded payload>}`.

pub mod messages;
pub mod types;

pub use messages::*;
pub use types::*;
