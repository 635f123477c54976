//! WebSocket Connection Controller
//!
//! Owns the single logical connection to the feed server: opens the socket,
//! decodes inbound frames and dispatches them to listeners, and reconnects
//! on a timer after every close that was not asked for.
//!
//! The controller is driven by its own event loop. Socket events and
//! reconnect timers are queued on one channel and handled one at a time
//! through `&mut self`, so controller state needs no locking.
//!
//! ```no_run
//! # async fn example() -> scanner_feed::error::Result<()> {
//! use scanner_feed::ConnectionControllerBuilder;
//!
//! let mut controller = ConnectionControllerBuilder::new("ws://127.0.0.1:8000/ws").build()?;
//! controller.add_listener("update", |payload| {
//!     println!("{}", payload);
//!     Ok(())
//! });
//! controller.connect();
//! controller.run_until(tokio::signal::ctrl_c()).await;
//! # Ok(())
//! # }
//! ```

use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::{debug, error, info, warn};

use crate::connection::diagnostics::{DiagnosticKind, Diagnostics, DEFAULT_DIAGNOSTICS_CAPACITY};
use crate::connection::protocol::{Envelope, MessageCodec};
use crate::connection::reconnect::{Backoff, ReconnectPolicy, DEFAULT_RECONNECT_DELAY};
use crate::connection::state::{ConnectionState, ConnectionStateMachine, StateTransition};
use crate::connection::transport::{
    CloseInfo, ControllerEvent, EventSink, Socket, SocketId, Transport, TransportEvent,
    WsTransport, DEFAULT_CONNECT_TIMEOUT,
};
use crate::error::{ClientError, Result, Warning};
use crate::feed::listeners::{ListenerId, ListenerRegistry};

/// The socket currently owned by the connection
struct ActiveSocket {
    id: SocketId,
    handle: Box<dyn Socket>,
}

/// A scheduled reconnect that has not fired yet
struct PendingReconnect {
    generation: u64,
    delay: Duration,
    timer: JoinHandle<()>,
}

/// Connection record: at most one live socket at any time
struct Connection {
    url: String,
    state: ConnectionStateMachine,
    policy: ReconnectPolicy,
    socket: Option<ActiveSocket>,
}

/// Controller for the feed connection
pub struct ConnectionController<T: Transport = WsTransport> {
    connection: Connection,
    transport: T,
    listeners: ListenerRegistry,
    diagnostics: Diagnostics,
    on_open: Vec<String>,
    pending_reconnect: Option<PendingReconnect>,
    next_socket: u64,
    timer_generation: u64,
    events_tx: mpsc::UnboundedSender<ControllerEvent>,
    events_rx: mpsc::UnboundedReceiver<ControllerEvent>,
}

impl<T: Transport> ConnectionController<T> {
    /// Create a controller with the default reconnect policy
    pub fn new(url: &str, transport: T) -> Result<Self> {
        ConnectionControllerBuilder::new(url).build_with_transport(transport)
    }

    fn from_parts(
        url: String,
        policy: ReconnectPolicy,
        diagnostics_capacity: NonZeroUsize,
        transport: T,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            connection: Connection {
                url,
                state: ConnectionStateMachine::new(),
                policy,
                socket: None,
            },
            transport,
            listeners: ListenerRegistry::new(),
            diagnostics: Diagnostics::new(diagnostics_capacity),
            on_open: Vec::new(),
            pending_reconnect: None,
            next_socket: 0,
            timer_generation: 0,
            events_tx,
            events_rx,
        }
    }

    pub fn url(&self) -> &str {
        &self.connection.url
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state.current_state()
    }

    pub fn is_open(&self) -> bool {
        self.connection.state.is_open()
    }

    /// Id of the socket currently owned, if any
    pub fn socket_id(&self) -> Option<SocketId> {
        self.connection.socket.as_ref().map(|s| s.id)
    }

    /// Attempts since the connection was last open
    pub fn connection_attempts(&self) -> u32 {
        self.connection.state.connection_attempts()
    }

    /// Recent state transitions, newest first
    pub fn transitions(&self, count: usize) -> Vec<StateTransition> {
        self.connection.state.recent_transitions(count)
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub fn reconnect_policy(&self) -> &ReconnectPolicy {
        &self.connection.policy
    }

    /// Delay of the pending reconnect, if one is scheduled
    pub fn pending_reconnect_delay(&self) -> Option<Duration> {
        self.pending_reconnect.as_ref().map(|p| p.delay)
    }

    /// Open a socket to the configured URL.
    ///
    /// No-op while a socket is already owned (`Connecting`, `Open` or
    /// `Closing`). From `WaitingReconnect` the pending timer is cancelled and
    /// the attempt starts right away.
    pub fn connect(&mut self) -> Option<Warning> {
        let state = self.state();
        if state.has_socket() || self.connection.socket.is_some() {
            warn!(state = %state, "Connection is already active, ignoring connect");
            return Some(Warning::AlreadyConnected(state));
        }

        self.cancel_reconnect();

        self.next_socket += 1;
        let id = SocketId(self.next_socket);
        self.connection
            .state
            .transition_to(ConnectionState::Connecting, Some(format!("Opening {}", id)));

        info!(url = %self.connection.url, socket = %id, "Connecting to feed server");
        let sink = EventSink::new(id, self.events_tx.clone());
        let handle = self.transport.open(&self.connection.url, sink);
        self.connection.socket = Some(ActiveSocket { id, handle });

        None
    }

    /// Close the socket, cancel any pending reconnect and stay down
    pub fn disconnect(&mut self) -> Option<Warning> {
        if self.state() == ConnectionState::Disconnected {
            warn!("Connection is already disconnected");
            return Some(Warning::AlreadyDisconnected);
        }

        self.cancel_reconnect();

        if let Some(mut socket) = self.connection.socket.take() {
            debug!(socket = %socket.id, "Closing socket");
            socket.handle.close();
        }

        self.connection.state.transition_to(
            ConnectionState::Disconnected,
            Some("Disconnect requested".to_string()),
        );

        None
    }

    /// Encode and send one envelope. Only valid while `Open`; otherwise the
    /// message is dropped and `NotConnected` is returned.
    pub fn send<P: Serialize + ?Sized>(&mut self, event: &str, payload: &P) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Open {
            error!(event = %event, state = %state, "Feed is not connected, dropping message");
            self.diagnostics.record(
                DiagnosticKind::DroppedSend,
                format!("'{}' dropped while {}", event, state),
            );
            return Err(ClientError::NotConnected { state });
        }

        let frame = MessageCodec::encode(event, payload)?;
        self.send_frame(frame)
    }

    /// Send a prebuilt envelope, same rules as `send`
    pub fn send_envelope(&mut self, envelope: &Envelope) -> Result<()> {
        self.send(envelope.event(), envelope.payload())
    }

    /// Register a message that is sent every time the connection opens.
    /// Sent immediately as well when the connection is open right now.
    ///
    /// Only encoding errors are returned. A failed immediate send is logged
    /// and recorded like any on-open send; the message stays registered and
    /// goes out again on the next open.
    pub fn send_on_open<P: Serialize + ?Sized>(&mut self, event: &str, payload: &P) -> Result<()> {
        let frame = MessageCodec::encode(event, payload)?;
        self.on_open.push(frame.clone());

        if self.is_open() {
            if let Err(e) = self.send_frame(frame) {
                warn!(event = %event, error = %e, "Failed to send on-open message");
            }
        }

        Ok(())
    }

    /// Forget all messages registered with `send_on_open`
    pub fn clear_on_open(&mut self) {
        self.on_open.clear();
    }

    pub fn add_listener<F>(&mut self, event: impl Into<String>, callback: F) -> ListenerId
    where
        F: FnMut(&Value) -> anyhow::Result<()> + Send + 'static,
    {
        self.listeners.add_listener(event, callback)
    }

    pub fn remove_listener(&mut self, event: &str, id: ListenerId) -> bool {
        self.listeners.remove_listener(event, id)
    }

    /// Wait for the next socket event or reconnect timer
    pub async fn next_event(&mut self) -> ControllerEvent {
        // The controller holds a sender itself, so the queue never closes
        loop {
            if let Some(event) = self.events_rx.recv().await {
                return event;
            }
        }
    }

    /// Take a queued event without waiting
    pub fn try_next_event(&mut self) -> Option<ControllerEvent> {
        self.events_rx.try_recv().ok()
    }

    /// Wait for one event and handle it
    pub async fn step(&mut self) {
        let event = self.next_event().await;
        self.handle_event(event);
    }

    /// Drive the controller until `shutdown` resolves, then disconnect
    pub async fn run_until<F: Future>(&mut self, shutdown: F) {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                event = self.next_event() => self.handle_event(event),
            }
        }

        self.disconnect();
    }

    /// Apply one event to the state machine
    pub fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Socket { socket, event } => {
                if self.socket_id() != Some(socket) {
                    debug!(%socket, ?event, "Ignoring event from stale socket");
                    return;
                }
                self.handle_socket_event(event);
            }
            ControllerEvent::ReconnectDue { generation } => {
                let due = matches!(
                    &self.pending_reconnect,
                    Some(pending) if pending.generation == generation
                );
                if !due {
                    debug!(generation, "Ignoring cancelled reconnect timer");
                    return;
                }

                self.pending_reconnect = None;
                info!(url = %self.connection.url, "Attempting to reconnect");
                self.connect();
            }
        }
    }

    fn handle_socket_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                self.connection.state.transition_to(
                    ConnectionState::Open,
                    Some("Connection established".to_string()),
                );
                self.send_on_open_messages();
            }
            TransportEvent::Frame(text) => self.handle_frame(&text),
            TransportEvent::Closing(info) => {
                self.connection
                    .state
                    .transition_to(ConnectionState::Closing, Some(close_reason(info.as_ref())));
            }
            TransportEvent::Error(e) => {
                error!(error = %e, "Feed connection error");
                self.diagnostics.record(DiagnosticKind::Transport, e.to_string());
            }
            TransportEvent::Closed(info) => {
                info!(reason = %close_reason(info.as_ref()), "Feed connection closed");
                self.connection.socket = None;
                self.connection
                    .state
                    .transition_to(ConnectionState::Closed, Some(close_reason(info.as_ref())));
                self.schedule_reconnect();
            }
        }
    }

    fn handle_frame(&mut self, text: &str) {
        let envelope = match MessageCodec::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame");
                self.diagnostics.record(DiagnosticKind::Parse, e.to_string());
                return;
            }
        };

        let report = self.listeners.dispatch(envelope.event(), envelope.payload());
        for _ in 0..report.failed {
            self.diagnostics.record(
                DiagnosticKind::Listener,
                format!("listener for '{}' failed", envelope.event()),
            );
        }
    }

    fn send_frame(&mut self, frame: String) -> Result<()> {
        let Some(socket) = self.connection.socket.as_mut() else {
            return Err(ClientError::NotConnected {
                state: self.connection.state.current_state(),
            });
        };

        socket.handle.send_text(frame).map_err(|e| {
            self.diagnostics.record(DiagnosticKind::Transport, e.to_string());
            ClientError::from(e)
        })
    }

    fn send_on_open_messages(&mut self) {
        let frames = self.on_open.clone();
        for frame in frames {
            if let Err(e) = self.send_frame(frame) {
                warn!(error = %e, "Failed to send on-open message");
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        let attempt = self.connection.state.connection_attempts().max(1);
        let delay = self.connection.policy.delay_for(attempt);

        self.timer_generation += 1;
        let generation = self.timer_generation;
        let events = self.events_tx.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ControllerEvent::ReconnectDue { generation });
        });

        self.pending_reconnect = Some(PendingReconnect {
            generation,
            delay,
            timer,
        });

        info!(delay_ms = delay.as_millis() as u64, attempt, "Waiting before reconnection attempt");
        self.connection.state.transition_to(
            ConnectionState::WaitingReconnect,
            Some(format!("Reconnecting in {:?}", delay)),
        );
    }

    fn cancel_reconnect(&mut self) {
        if let Some(pending) = self.pending_reconnect.take() {
            debug!(generation = pending.generation, "Cancelling pending reconnect");
            pending.timer.abort();
        }
    }
}

impl<T: Transport> Drop for ConnectionController<T> {
    fn drop(&mut self) {
        self.cancel_reconnect();
        if let Some(mut socket) = self.connection.socket.take() {
            socket.handle.close();
        }
    }
}

fn close_reason(info: Option<&CloseInfo>) -> String {
    match info {
        Some(info) if info.reason.is_empty() => format!("Closed with code {}", info.code),
        Some(info) => format!("Closed with code {}: {}", info.code, info.reason),
        None => "Connection closed".to_string(),
    }
}

/// Builder for ConnectionController
pub struct ConnectionControllerBuilder {
    url: String,
    reconnect_delay: Duration,
    backoff: Option<Backoff>,
    connect_timeout: Duration,
    diagnostics_capacity: NonZeroUsize,
}

impl ConnectionControllerBuilder {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            backoff: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            diagnostics_capacity: DEFAULT_DIAGNOSTICS_CAPACITY,
        }
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn diagnostics_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.diagnostics_capacity = capacity;
        self
    }

    /// Build a controller on the tokio-tungstenite transport
    pub fn build(self) -> Result<ConnectionController<WsTransport>> {
        let transport = WsTransport::new(self.connect_timeout);
        self.build_with_transport(transport)
    }

    pub fn build_with_transport<T: Transport>(self, transport: T) -> Result<ConnectionController<T>> {
        validate_url(&self.url)?;

        let policy = match self.backoff {
            Some(backoff) => ReconnectPolicy::exponential(self.reconnect_delay, backoff),
            None => ReconnectPolicy::fixed(self.reconnect_delay),
        };

        Ok(ConnectionController::from_parts(
            self.url,
            policy,
            self.diagnostics_capacity,
            transport,
        ))
    }
}

/// Accept only ws:// and wss:// URLs that form a valid client request
pub fn validate_url(url: &str) -> Result<()> {
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        return Err(ClientError::InvalidUrl {
            url: url.to_string(),
            reason: "scheme must be ws or wss".to_string(),
        });
    }

    url.into_client_request().map_err(|e| ClientError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    Ok(())
}
