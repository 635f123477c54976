//! Scanner Feed Library
//!
//! This crate provides a resilient streaming client for the market scanner
//! feed server, including the WebSocket connection controller, the JSON
//! envelope protocol, listener dispatch and bounded tick windows.

pub mod cli;
pub mod connection;
pub mod error;
pub mod feed;

// Re-exports for convenience
pub use cli::config::Config;
pub use connection::protocol::{ClientRequest, Envelope, Exchange, MessageCodec};
pub use connection::state::ConnectionState;
pub use connection::websocket::{ConnectionController, ConnectionControllerBuilder};
pub use error::{ClientError, ParseError, TransportError, Warning};
pub use feed::listeners::{ListenerId, ListenerRegistry};
pub use feed::ticks::{record_ticks, MarketTick};
pub use feed::window::{BoundedStream, SharedWindow};
