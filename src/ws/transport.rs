//! Transport boundary for websocket IO.
//!
//! The registry only needs "open a duplex stream to this URL": a handle it can
//! send on and close, plus a stream of lifecycle events. [`TungsteniteTransport`]
//! is the production implementation; tests plug in their own.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::stream::BoxStream;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message as TungsteniteMessage};

use crate::error::ConnectError;

/// A data frame received from or sent to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(text) => Some(text),
            Message::Binary(_) => None,
        }
    }

    /// Decode a text frame as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match self {
            Message::Text(text) => serde_json::from_str(text),
            Message::Binary(bytes) => serde_json::from_slice(bytes),
        }
    }
}

/// Error event reported by an opening or open socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketError {
    pub message: String,
}

impl SocketError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Close event, mirroring the browser `CloseEvent` fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub reason: String,
    pub was_clean: bool,
}

impl CloseEvent {
    /// 1000: normal closure.
    pub fn normal() -> Self {
        Self {
            code: 1000,
            reason: String::new(),
            was_clean: true,
        }
    }

    /// 1006: the connection dropped without a close frame.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: 1006,
            reason: reason.into(),
            was_clean: false,
        }
    }
}

/// Lifecycle events of one socket, in transport order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    Message(Message),
    Error(SocketError),
    Close(CloseEvent),
}

/// Handle to a socket. `close` must not block or call back into the registry.
pub trait SocketHandle: Send + Sync + 'static {
    fn send(&self, message: Message) -> Result<(), SocketError>;
    fn close(&self);
}

pub type Socket = Arc<dyn SocketHandle>;

/// A freshly constructed socket: its handle and its event stream.
pub struct TransportSocket {
    pub handle: Socket,
    pub events: BoxStream<'static, SocketEvent>,
}

pub trait WsTransport: Send + Sync + 'static {
    /// Construct a socket for `url`.
    ///
    /// Errors here are construction failures (bad URL and the like); anything
    /// that happens after construction arrives on the event stream.
    fn open(&self, url: &str) -> Result<TransportSocket, ConnectError>;
}

/// How long a closing socket waits for the peer's close frame.
pub const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

enum Command {
    Send(Message),
    Close,
}

/// Handle for a tokio-tungstenite socket; commands are forwarded to its IO task.
#[derive(Clone)]
struct TungsteniteSocket {
    commands: UnboundedSender<Command>,
}

impl SocketHandle for TungsteniteSocket {
    fn send(&self, message: Message) -> Result<(), SocketError> {
        self.commands
            .unbounded_send(Command::Send(message))
            .map_err(|e| SocketError::new(format!("Failed to send: {}", e)))
    }

    fn close(&self) {
        let _ = self.commands.unbounded_send(Command::Close);
    }
}

/// Native transport using tokio-tungstenite. Each socket gets its own IO task.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteTransport;

impl WsTransport for TungsteniteTransport {
    fn open(&self, url: &str) -> Result<TransportSocket, ConnectError> {
        let parsed = url::Url::parse(url).map_err(|e| ConnectError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(ConnectError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        let (command_tx, command_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        tokio::spawn(run_socket(url.to_string(), command_rx, event_tx));

        Ok(TransportSocket {
            handle: Arc::new(TungsteniteSocket {
                commands: command_tx,
            }),
            events: event_rx.boxed(),
        })
    }
}

fn into_tungstenite(message: Message) -> TungsteniteMessage {
    match message {
        Message::Text(text) => TungsteniteMessage::Text(text.into()),
        Message::Binary(bytes) => TungsteniteMessage::Binary(bytes.into()),
    }
}

/// Socket IO loop: connect, then pump frames out and commands in until closed.
async fn run_socket(
    url: String,
    mut commands: UnboundedReceiver<Command>,
    events: UnboundedSender<SocketEvent>,
) {
    let emit = |event: SocketEvent| {
        let _ = events.unbounded_send(event);
    };

    let ws_stream = match connect_async(url.as_str()).await {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            crate::log_debug!("WebSocket connect failed: {}", e);
            emit(SocketEvent::Error(SocketError::new(e.to_string())));
            emit(SocketEvent::Close(CloseEvent::abnormal(e.to_string())));
            return;
        }
    };
    emit(SocketEvent::Open);

    let (mut write, mut read) = ws_stream.split();
    // Set once we sent our close frame
    let mut close_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(TungsteniteMessage::Text(text))) => {
                    emit(SocketEvent::Message(Message::Text(text.as_str().to_owned())));
                }
                Some(Ok(TungsteniteMessage::Binary(bytes))) => {
                    emit(SocketEvent::Message(Message::Binary(bytes.to_vec())));
                }
                Some(Ok(TungsteniteMessage::Close(frame))) => {
                    let event = frame
                        .map(|f| CloseEvent {
                            code: u16::from(f.code),
                            reason: f.reason.as_str().to_owned(),
                            was_clean: true,
                        })
                        .unwrap_or(CloseEvent {
                            code: 1005,
                            reason: String::new(),
                            was_clean: true,
                        });
                    emit(SocketEvent::Close(event));
                    return;
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite
                }
                Some(Err(e)) => {
                    crate::log_error!("WebSocket read error: {}", e);
                    emit(SocketEvent::Error(SocketError::new(e.to_string())));
                    emit(SocketEvent::Close(CloseEvent::abnormal(e.to_string())));
                    return;
                }
                None => {
                    emit(SocketEvent::Close(CloseEvent::abnormal("connection reset")));
                    return;
                }
            },
            command = commands.next(), if close_deadline.is_none() => match command {
                Some(Command::Send(message)) => {
                    if let Err(e) = write.send(into_tungstenite(message)).await {
                        crate::log_error!("Send failed: {}", e);
                        emit(SocketEvent::Error(SocketError::new(e.to_string())));
                    }
                }
                Some(Command::Close) | None => {
                    // Wait for the server's close frame on the read side
                    let _ = write.send(TungsteniteMessage::Close(None)).await;
                    close_deadline = Some(Instant::now() + CLOSE_HANDSHAKE_TIMEOUT);
                }
            },
            _ = sleep_until(close_deadline.unwrap_or_else(Instant::now)), if close_deadline.is_some() => {
                crate::log_debug!("WebSocket peer never answered our close frame, dropping it");
                emit(SocketEvent::Close(CloseEvent::abnormal("close handshake timed out")));
                return;
            }
        }
    }
}
