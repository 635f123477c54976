//! Transport
//!
//! The seam between the controller and the socket library. A transport opens
//! sockets without blocking: the socket reports `Opened`, `Frame`, `Closing`,
//! `Error` and `Closed` into the controller's event queue, tagged with the
//! socket id so that events of a superseded socket can be ignored.
//!
//! Contract for implementations: every opened socket eventually emits exactly
//! one `Closed` unless `close` was called on it first, and an `Error` is
//! always followed by `Closed`.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::TransportError;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Identifies one connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(pub(crate) u64);

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "socket-{}", self.0)
    }
}

/// Close code and reason sent by the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

/// Events reported by a socket
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    Closing(Option<CloseInfo>),
    Error(TransportError),
    Closed(Option<CloseInfo>),
}

/// Everything the controller's event loop reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    Socket {
        socket: SocketId,
        event: TransportEvent,
    },
    ReconnectDue {
        generation: u64,
    },
}

/// Where a socket reports its events
#[derive(Debug, Clone)]
pub struct EventSink {
    socket: SocketId,
    tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl EventSink {
    pub(crate) fn new(socket: SocketId, tx: mpsc::UnboundedSender<ControllerEvent>) -> Self {
        Self { socket, tx }
    }

    pub fn socket(&self) -> SocketId {
        self.socket
    }

    /// Report an event. Returns `false` once the controller is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(ControllerEvent::Socket {
                socket: self.socket,
                event,
            })
            .is_ok()
    }
}

/// Opens sockets for the controller
pub trait Transport: Send {
    /// Start opening a socket to `url`. Must not block; progress is reported
    /// through `events`.
    fn open(&mut self, url: &str, events: EventSink) -> Box<dyn Socket>;
}

/// An owned, possibly not yet open, socket
pub trait Socket: Send {
    /// Queue a text frame
    fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Start closing. No further events are expected to matter.
    fn close(&mut self);
}

/// Transport backed by tokio-tungstenite, one task per socket
#[derive(Debug, Clone)]
pub struct WsTransport {
    connect_timeout: Duration,
}

impl WsTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl Transport for WsTransport {
    fn open(&mut self, url: &str, events: EventSink) -> Box<dyn Socket> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(
            url.to_string(),
            self.connect_timeout,
            events,
            outbound_rx,
        ));

        Box::new(WsSocket {
            outbound: outbound_tx,
            task,
        })
    }
}

enum Outbound {
    Text(String),
    Close,
}

struct WsSocket {
    outbound: mpsc::UnboundedSender<Outbound>,
    task: JoinHandle<()>,
}

impl Socket for WsSocket {
    fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.task.is_finished() {
            return Err(TransportError::SocketClosed);
        }
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::SocketClosed)
    }

    fn close(&mut self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

/// Connect, then pump frames both ways until either side closes
async fn run_socket(
    url: String,
    connect_timeout: Duration,
    events: EventSink,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let socket = events.socket();
    info!(%socket, url = %url, "Connecting to feed server");

    let attempt = timeout(connect_timeout, connect_async(url.as_str()));
    let ws_stream = tokio::select! {
        result = attempt => match result {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                events.emit(TransportEvent::Error(TransportError::Connect(e.to_string())));
                events.emit(TransportEvent::Closed(None));
                return;
            }
            Err(_) => {
                events.emit(TransportEvent::Error(TransportError::Timeout(connect_timeout)));
                events.emit(TransportEvent::Closed(None));
                return;
            }
        },
        // Closed (or dropped) before the handshake finished
        _ = outbound.recv() => {
            debug!(%socket, "Socket closed before it opened");
            return;
        }
    };

    info!(%socket, "WebSocket connection established");
    events.emit(TransportEvent::Opened);

    let (mut write, mut read) = ws_stream.split();
    let mut close_info = None;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !events.emit(TransportEvent::Frame(text.to_string())) {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        debug!(%socket, "Received ping, sending pong");
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            events.emit(TransportEvent::Error(TransportError::Protocol(e.to_string())));
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        debug!(%socket, "Received pong");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(%socket, ?frame, "Received close frame");
                        close_info = frame.map(|f| CloseInfo {
                            code: u16::from(f.code),
                            reason: f.reason.to_string(),
                        });
                        events.emit(TransportEvent::Closing(close_info.clone()));
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!(%socket, "Received binary message (ignored)");
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        warn!(%socket, error = %e, "WebSocket error");
                        events.emit(TransportEvent::Error(TransportError::Protocol(e.to_string())));
                        break;
                    }
                    None => {
                        info!(%socket, "WebSocket stream ended");
                        break;
                    }
                }
            }

            command = outbound.recv() => {
                match command {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            events.emit(TransportEvent::Error(TransportError::Protocol(e.to_string())));
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        debug!(%socket, "Closing socket");
                        let _ = write.send(Message::Close(None)).await;
                        let _ = write.close().await;
                        return;
                    }
                }
            }
        }
    }

    events.emit(TransportEvent::Closed(close_info));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_sink_tags_socket() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(SocketId(7), tx);

        assert!(sink.emit(TransportEvent::Opened));
        assert_eq!(
            rx.try_recv().unwrap(),
            ControllerEvent::Socket {
                socket: SocketId(7),
                event: TransportEvent::Opened,
            }
        );

        drop(rx);
        assert!(!sink.emit(TransportEvent::Closed(None)));
    }

    #[tokio::test]
    async fn test_unreachable_server_reports_error_then_closed() {
        // Grab a free port, then release it so the connect is refused
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = WsTransport::new(Duration::from_secs(5));
        let url = format!("ws://127.0.0.1:{}/ws", port);
        let _socket = transport.open(&url, EventSink::new(SocketId(1), tx));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();

        assert!(matches!(
            first,
            ControllerEvent::Socket {
                event: TransportEvent::Error(_),
                ..
            }
        ));
        assert_eq!(
            second,
            ControllerEvent::Socket {
                socket: SocketId(1),
                event: TransportEvent::Closed(None),
            }
        );
    }
}
