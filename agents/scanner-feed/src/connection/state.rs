//! Connection State Management
//!
//! Provides the connection state machine used by the controller to track
//! the socket lifecycle and to reject transitions that make no sense.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

const MAX_TRANSITIONS: usize = 100;

/// Represents the possible states of a feed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, `connect` never called
    Idle,
    /// A socket is being opened
    Connecting,
    /// The socket is open and frames flow
    Open,
    /// The server started the close handshake
    Closing,
    /// The socket is gone, reconnect not scheduled yet
    Closed,
    /// A reconnect timer is pending
    WaitingReconnect,
    /// Explicitly disconnected; no further reconnection
    Disconnected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "Idle"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
            ConnectionState::WaitingReconnect => write!(f, "WaitingReconnect"),
            ConnectionState::Disconnected => write!(f, "Disconnected"),
        }
    }
}

impl ConnectionState {
    /// Whether a socket is owned in this state
    pub fn has_socket(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Closing
        )
    }
}

/// State transition information
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Connection state machine with a bounded transition history
#[derive(Debug)]
pub struct ConnectionStateMachine {
    current: ConnectionState,
    last_opened: Option<DateTime<Utc>>,
    connection_attempts: u32,
    transitions: VecDeque<StateTransition>,
}

impl ConnectionStateMachine {
    /// Create a new state machine starting in Idle state
    pub fn new() -> Self {
        Self {
            current: ConnectionState::Idle,
            last_opened: None,
            connection_attempts: 0,
            transitions: VecDeque::with_capacity(MAX_TRANSITIONS),
        }
    }

    /// Get the current state
    pub fn current_state(&self) -> ConnectionState {
        self.current
    }

    /// Get the last time the connection reached Open
    pub fn last_opened(&self) -> Option<DateTime<Utc>> {
        self.last_opened
    }

    /// Number of connection attempts since the connection was last open
    pub fn connection_attempts(&self) -> u32 {
        self.connection_attempts
    }

    /// Transition to a new state
    pub fn transition_to(&mut self, new_state: ConnectionState, reason: Option<String>) -> bool {
        let old_state = self.current;

        if !Self::is_valid_transition(old_state, new_state) {
            tracing::warn!(
                from = %old_state,
                to = %new_state,
                "Rejected connection state transition"
            );
            return false;
        }

        self.current = new_state;

        match new_state {
            ConnectionState::Open => {
                self.last_opened = Some(Utc::now());
                self.connection_attempts = 0;
            }
            ConnectionState::Connecting => {
                self.connection_attempts += 1;
            }
            ConnectionState::Disconnected => {
                self.connection_attempts = 0;
            }
            _ => {}
        }

        if self.transitions.len() == MAX_TRANSITIONS {
            self.transitions.pop_front();
        }
        self.transitions.push_back(StateTransition {
            from: old_state,
            to: new_state,
            timestamp: Utc::now(),
            reason,
        });

        tracing::info!(
            from = %old_state,
            to = %new_state,
            attempts = self.connection_attempts,
            "Connection state transition"
        );

        true
    }

    /// Check if a state transition is valid
    fn is_valid_transition(from: ConnectionState, to: ConnectionState) -> bool {
        use ConnectionState::*;

        if from == to {
            return true;
        }

        matches!(
            (from, to),
            (Idle, Connecting) |
            (Idle, Disconnected) |
            // An attempt that fails before opening closes directly
            (Connecting, Open) |
            (Connecting, Closing) |
            (Connecting, Closed) |
            (Connecting, Disconnected) |
            (Open, Closing) |
            (Open, Closed) |
            (Open, Disconnected) |
            (Closing, Closed) |
            (Closing, Disconnected) |
            (Closed, WaitingReconnect) |
            (Closed, Connecting) |
            (Closed, Disconnected) |
            (WaitingReconnect, Connecting) |
            (WaitingReconnect, Disconnected) |
            // connect() after disconnect() starts over
            (Disconnected, Connecting)
        )
    }

    /// Get recent state transitions, newest first
    pub fn recent_transitions(&self, count: usize) -> Vec<StateTransition> {
        self.transitions.iter().rev().take(count).cloned().collect()
    }

    pub fn is_open(&self) -> bool {
        self.current == ConnectionState::Open
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
