//! Connection Diagnostics
//!
//! Counters and a short history of the failures the controller absorbs
//! instead of returning them: undecodable frames, transport errors, sends
//! dropped while not open, and failing listeners.

use chrono::{DateTime, Utc};
use std::num::NonZeroUsize;

use crate::feed::window::BoundedStream;

/// Default number of recent records retained
pub const DEFAULT_DIAGNOSTICS_CAPACITY: NonZeroUsize = match NonZeroUsize::new(50) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Parse,
    Transport,
    DroppedSend,
    Listener,
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagnosticKind::Parse => write!(f, "parse"),
            DiagnosticKind::Transport => write!(f, "transport"),
            DiagnosticKind::DroppedSend => write!(f, "dropped_send"),
            DiagnosticKind::Listener => write!(f, "listener"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiagnosticRecord {
    pub kind: DiagnosticKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Diagnostics {
    parse_errors: u64,
    transport_errors: u64,
    dropped_sends: u64,
    listener_failures: u64,
    recent: BoundedStream<DiagnosticRecord>,
}

impl Diagnostics {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            parse_errors: 0,
            transport_errors: 0,
            dropped_sends: 0,
            listener_failures: 0,
            recent: BoundedStream::new(capacity),
        }
    }

    pub fn record(&mut self, kind: DiagnosticKind, message: impl Into<String>) {
        let counter = match kind {
            DiagnosticKind::Parse => &mut self.parse_errors,
            DiagnosticKind::Transport => &mut self.transport_errors,
            DiagnosticKind::DroppedSend => &mut self.dropped_sends,
            DiagnosticKind::Listener => &mut self.listener_failures,
        };
        *counter += 1;

        self.recent.append(DiagnosticRecord {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors
    }

    pub fn transport_errors(&self) -> u64 {
        self.transport_errors
    }

    pub fn dropped_sends(&self) -> u64 {
        self.dropped_sends
    }

    pub fn listener_failures(&self) -> u64 {
        self.listener_failures
    }

    /// Recent records, oldest first
    pub fn recent(&self) -> Vec<DiagnosticRecord> {
        self.recent.snapshot()
    }

    pub fn last(&self) -> Option<&DiagnosticRecord> {
        self.recent.latest()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DEFAULT_DIAGNOSTICS_CAPACITY)
    }
}
