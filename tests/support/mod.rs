//! In-memory transport and token provider for registry tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_channel::mpsc::{unbounded, UnboundedSender};
use futures_util::StreamExt;
use quipflip_live::ws::{
    CloseEvent, Message, SocketError, SocketEvent, SocketHandle, TransportSocket, WsTransport,
};
use quipflip_live::{token_fn, ConnectError, RealtimeConfig, TokenProvider, WsToken};

/// Let spawned tasks run without moving the paused clock meaningfully.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn test_config() -> RealtimeConfig {
    RealtimeConfig {
        api_base_url: "http://localhost:8000".into(),
        ..RealtimeConfig::default()
    }
}

/// Test-side controls for one socket the registry opened.
#[derive(Clone)]
pub struct MockSocket {
    pub url: String,
    events: UnboundedSender<SocketEvent>,
    closed: Arc<AtomicBool>,
    sent: Arc<Mutex<Vec<Message>>>,
}

impl MockSocket {
    pub fn open(&self) {
        let _ = self.events.unbounded_send(SocketEvent::Open);
    }

    pub fn message(&self, text: &str) {
        let _ = self
            .events
            .unbounded_send(SocketEvent::Message(Message::Text(text.to_string())));
    }

    pub fn error(&self, message: &str) {
        let _ = self
            .events
            .unbounded_send(SocketEvent::Error(SocketError::new(message)));
    }

    /// Simulate the server dropping the connection.
    pub fn server_close(&self, code: u16) {
        let _ = self.events.unbounded_send(SocketEvent::Close(CloseEvent {
            code,
            reason: String::new(),
            was_clean: code == 1000,
        }));
    }

    /// True once the registry called `close()` on the handle.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }
}

struct MockHandle {
    closed: Arc<AtomicBool>,
    sent: Arc<Mutex<Vec<Message>>>,
}

impl SocketHandle for MockHandle {
    fn send(&self, message: Message) -> Result<(), SocketError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SocketError::new("socket closed"));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct TransportState {
    sockets: Vec<MockSocket>,
    fail_opens: usize,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().sockets.len()
    }

    pub fn socket(&self, index: usize) -> MockSocket {
        self.state.lock().unwrap().sockets[index].clone()
    }

    pub fn last(&self) -> MockSocket {
        self.state
            .lock()
            .unwrap()
            .sockets
            .last()
            .cloned()
            .expect("no socket opened yet")
    }

    /// Make the next `n` constructions fail synchronously.
    pub fn fail_next_opens(&self, n: usize) {
        self.state.lock().unwrap().fail_opens = n;
    }
}

impl WsTransport for MockTransport {
    fn open(&self, url: &str) -> Result<TransportSocket, ConnectError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(ConnectError::Transport("refused".into()));
        }

        let (events_tx, events_rx) = unbounded();
        let closed = Arc::new(AtomicBool::new(false));
        let sent = Arc::new(Mutex::new(Vec::new()));
        state.sockets.push(MockSocket {
            url: url.to_string(),
            events: events_tx,
            closed: closed.clone(),
            sent: sent.clone(),
        });

        Ok(TransportSocket {
            handle: Arc::new(MockHandle { closed, sent }),
            events: events_rx.boxed(),
        })
    }
}

/// Token provider that answers immediately and counts calls.
pub fn instant_tokens(calls: Arc<AtomicUsize>) -> impl TokenProvider {
    token_fn(move |_cancel| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ConnectError>(WsToken::new("tok"))
        }
    })
}

/// Token provider that only resolves once its token is cancelled.
pub fn hanging_tokens(calls: Arc<AtomicUsize>) -> impl TokenProvider {
    token_fn(move |cancel| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            cancel.cancelled().await;
            Err::<WsToken, _>(ConnectError::Cancelled)
        }
    })
}

/// Token provider that always fails.
pub fn failing_tokens(calls: Arc<AtomicUsize>) -> impl TokenProvider {
    token_fn(move |_cancel| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<WsToken, _>(ConnectError::Http {
                status: 503,
                message: "maintenance".into(),
            })
        }
    })
}

pub fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

pub fn count(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}
