//! fxbridge-protocol: Shared wire definitions for client-server communication
//!
//! This crate defines the JSON message types exchanged between the bridge
//! server and WebSocket console clients. All messages are single JSON text
//! frames tagged by a `type` field.

pub mod messages;

// Re-export main types at crate root
pub use messages::{ClientMessage, ServerMessage};

/// TCP port the bridge listens on for WebSocket upgrades
pub const DEFAULT_PORT: u16 = 30121;
