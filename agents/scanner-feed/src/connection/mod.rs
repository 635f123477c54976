//! Connection module
//!
//! This module handles the connection to the feed server: the envelope
//! protocol, the socket transport, reconnection and the controller that
//! ties them together.

pub mod diagnostics;
pub mod protocol;
pub mod reconnect;
pub mod state;
pub mod transport;
pub mod websocket;
