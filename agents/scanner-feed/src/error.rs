//! Error Types
//!
//! Typed failures surfaced by the feed client. Transport and parse errors are
//! normally absorbed by the controller and recorded in its diagnostics; only
//! `send` failures reach the caller directly.

use std::time::Duration;
use thiserror::Error;

use crate::connection::state::ConnectionState;

/// Socket-level failures. Never fatal: they end in a close and a reconnect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("websocket protocol error: {0}")]
    Protocol(String),

    #[error("socket is closed")]
    SocketClosed,
}

/// A frame that could not be turned into an envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("envelope has an empty event name")]
    EmptyEvent,

    #[error("envelope for event '{0}' has no payload")]
    MissingPayload(String),

    #[error("invalid market tick: {0}")]
    InvalidTick(String),
}

/// Errors returned by the client API
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("not connected (state: {state})")]
    NotConnected { state: ConnectionState },

    #[error("failed to encode payload for event '{event}': {reason}")]
    Encode { event: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Informational outcomes of idempotent calls. Not errors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Warning {
    #[error("already connected (state: {0})")]
    AlreadyConnected(ConnectionState),

    #[error("already disconnected")]
    AlreadyDisconnected,
}

pub type Result<T> = std::result::Result<T, ClientError>;
