//! Shared WebSocket connections keyed by logical path.
//!
//! Any number of listeners can subscribe to the same path; the registry keeps
//! at most one socket (or one connection attempt) per path and fans every event
//! out to the enabled listeners. When the last enabled listener goes away the
//! path is torn down on the spot: pending retry disarmed, token fetch
//! cancelled, socket closed.
//!
//! Callbacks always run with the registry lock released, so a callback may
//! subscribe, unsubscribe or force a reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backoff::Backoff;
use super::transport::{
    CloseEvent, Message, Socket, SocketError, SocketEvent, TransportSocket, WsTransport,
};
use super::url::{build_ws_url, ws_base_url};
use crate::config::RealtimeConfig;
use crate::error::ConnectError;
use crate::token::TokenProvider;

/// A listener's answer when asked whether its path should reconnect.
///
/// Handlers may return `()`, a `bool` or this type. Only an explicit
/// `false` / [`Reconnect::Veto`] counts against reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reconnect {
    #[default]
    Allow,
    Veto,
}

impl From<()> for Reconnect {
    fn from(_: ()) -> Self {
        Reconnect::Allow
    }
}

impl From<bool> for Reconnect {
    fn from(allow: bool) -> Self {
        if allow {
            Reconnect::Allow
        } else {
            Reconnect::Veto
        }
    }
}

/// Connection state for a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }
}

type BeforeConnectFn = Arc<dyn Fn() + Send + Sync>;
type OpenFn = Arc<dyn Fn(&Socket) + Send + Sync>;
type MessageFn = Arc<dyn Fn(&Message) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&SocketError, &Socket) + Send + Sync>;
type CloseFn = Arc<dyn Fn(&CloseEvent) -> Reconnect + Send + Sync>;
type ConnectErrorFn = Arc<dyn Fn(&ConnectError) -> Reconnect + Send + Sync>;

/// One consumer's callback bundle and enabled flag.
///
/// A disabled listener receives nothing and does not keep its path connected.
#[derive(Clone)]
pub struct ListenerOptions {
    pub enabled: bool,
    on_before_connect: Option<BeforeConnectFn>,
    on_open: Option<OpenFn>,
    on_message: Option<MessageFn>,
    on_error: Option<ErrorFn>,
    on_close: Option<CloseFn>,
    on_connect_error: Option<ConnectErrorFn>,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            on_before_connect: None,
            on_open: None,
            on_message: None,
            on_error: None,
            on_close: None,
            on_connect_error: None,
        }
    }
}

impl ListenerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn on_before_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_before_connect = Some(Arc::new(f));
        self
    }

    pub fn on_open(mut self, f: impl Fn(&Socket) + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(f));
        self
    }

    pub fn on_message(mut self, f: impl Fn(&Message) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&SocketError, &Socket) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Return `false` to veto reconnecting after this close.
    pub fn on_close<R, F>(mut self, f: F) -> Self
    where
        R: Into<Reconnect>,
        F: Fn(&CloseEvent) -> R + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(move |event: &CloseEvent| f(event).into()));
        self
    }

    /// Return `false` to veto retrying after a failed attempt.
    pub fn on_connect_error<R, F>(mut self, f: F) -> Self
    where
        R: Into<Reconnect>,
        F: Fn(&ConnectError) -> R + Send + Sync + 'static,
    {
        self.on_connect_error = Some(Arc::new(move |err: &ConnectError| f(err).into()));
        self
    }
}

/// Opaque listener identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Ask every listener; reconnect unless at least one vetoed.
///
/// Every handler runs even after a veto so each listener sees the event.
fn collect_votes(votes: impl Iterator<Item = Reconnect>) -> bool {
    votes.fold(true, |allow, vote| vote != Reconnect::Veto && allow)
}

struct Entry {
    listeners: Vec<(ListenerId, ListenerOptions)>,
    /// Set once the socket reports open
    socket: Option<Socket>,
    /// Constructed but not open yet
    opening: Option<Socket>,
    backoff: Backoff,
    is_connecting: bool,
    token_cancel: Option<CancellationToken>,
    attempt_task: Option<JoinHandle<()>>,
    /// Bumped on every attempt and teardown; async work from an older
    /// generation must not touch the entry.
    generation: u64,
}

impl Entry {
    fn new(backoff_base: Duration, backoff_max: Duration) -> Self {
        Self {
            listeners: Vec::new(),
            socket: None,
            opening: None,
            backoff: Backoff::new(backoff_base, backoff_max),
            is_connecting: false,
            token_cancel: None,
            attempt_task: None,
            generation: 0,
        }
    }

    fn enabled_listeners(&self) -> Vec<ListenerOptions> {
        self.listeners
            .iter()
            .filter(|(_, options)| options.enabled)
            .map(|(_, options)| options.clone())
            .collect()
    }

    fn has_enabled(&self) -> bool {
        self.listeners.iter().any(|(_, options)| options.enabled)
    }

    /// Stop whatever is in flight. Returns sockets to close once the lock is released.
    fn detach(&mut self) -> Vec<Socket> {
        self.generation += 1;
        self.is_connecting = false;
        if let Some(cancel) = self.token_cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.attempt_task.take() {
            task.abort();
        }
        self.socket.take().into_iter().chain(self.opening.take()).collect()
    }

    fn teardown(&mut self) -> Vec<Socket> {
        self.backoff.reset();
        self.detach()
    }

    fn state(&self) -> ConnectionState {
        if self.socket.is_some() {
            ConnectionState::Connected
        } else if self.is_connecting || self.backoff.has_pending() {
            match self.backoff.attempts() {
                0 => ConnectionState::Connecting,
                attempt => ConnectionState::Reconnecting { attempt },
            }
        } else {
            ConnectionState::Disconnected
        }
    }
}

fn close_all(sockets: Vec<Socket>) {
    for socket in sockets {
        socket.close();
    }
}

struct Inner {
    transport: Arc<dyn WsTransport>,
    tokens: Arc<dyn TokenProvider>,
    base_url: String,
    backoff_base: Duration,
    backoff_max: Duration,
    next_listener: AtomicU64,
    entries: Mutex<HashMap<String, Entry>>,
}

/// Registry of shared connections. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Inner>,
}

impl ConnectionRegistry {
    pub fn new(
        config: &RealtimeConfig,
        transport: impl WsTransport,
        tokens: impl TokenProvider,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport: Arc::new(transport),
                tokens: Arc::new(tokens),
                base_url: ws_base_url(config),
                backoff_base: config.backoff_base(),
                backoff_max: config.backoff_max(),
                next_listener: AtomicU64::new(1),
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a listener for `path` and connect if needed.
    ///
    /// An empty path yields an inert subscription. Dropping the returned
    /// [`Subscription`] unsubscribes.
    pub fn subscribe(&self, path: impl Into<String>, options: ListenerOptions) -> Subscription {
        let path = path.into();
        if path.is_empty() {
            return Subscription::inert();
        }

        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        {
            let mut entries = self.inner.entries();
            entries
                .entry(path.clone())
                .or_insert_with(|| Entry::new(self.inner.backoff_base, self.inner.backoff_max))
                .listeners
                .push((id, options));
        }
        crate::log_debug!("ws: listener {:?} subscribed to {}", id, path);
        self.inner.sync(&path);

        Subscription {
            registry: Arc::downgrade(&self.inner),
            path,
            id,
        }
    }

    pub fn state(&self, path: &str) -> ConnectionState {
        self.inner.state(path)
    }

    pub fn is_connected(&self, path: &str) -> bool {
        self.state(path).is_connected()
    }

    /// Every path that has had a subscriber since construction (or the last dispose)
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.inner.entries().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Tear down every path and forget all entries.
    ///
    /// Existing subscriptions become inert.
    pub fn dispose(&self) {
        let (sockets, retired) = {
            let mut entries = self.inner.entries();
            let sockets: Vec<Socket> = entries
                .values_mut()
                .flat_map(|entry| entry.teardown())
                .collect();
            (sockets, std::mem::take(&mut *entries))
        };
        // Listener closures may own values that call back into the registry on drop
        drop(retired);
        close_all(sockets);
        crate::log_debug!("ws: registry disposed");
    }
}

impl Inner {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self, path: &str) -> ConnectionState {
        self.entries()
            .get(path)
            .map_or(ConnectionState::Disconnected, Entry::state)
    }

    /// Re-evaluate whether `path` needs a connection. Safe to call redundantly.
    fn sync(self: &Arc<Self>, path: &str) {
        let (to_close, needs_connect) = {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(path) else {
                return;
            };
            if entry.has_enabled() {
                // A pending retry owns the next attempt
                let idle = !entry.is_connecting
                    && entry.socket.is_none()
                    && !entry.backoff.has_pending();
                (Vec::new(), idle)
            } else {
                (entry.teardown(), false)
            }
        };

        if !to_close.is_empty() {
            crate::log_info!("ws: no enabled listeners left on {}, closing", path);
        }
        close_all(to_close);

        if needs_connect {
            self.connect(path);
        }
    }

    fn connect(self: &Arc<Self>, path: &str) {
        let (generation, cancel, listeners) = {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(path) else {
                return;
            };
            if entry.is_connecting || entry.socket.is_some() {
                return;
            }
            let listeners = entry.enabled_listeners();
            if listeners.is_empty() {
                return;
            }

            entry.is_connecting = true;
            if let Some(previous) = entry.token_cancel.take() {
                previous.cancel();
            }
            let cancel = CancellationToken::new();
            entry.token_cancel = Some(cancel.clone());
            entry.generation += 1;
            (entry.generation, cancel, listeners)
        };

        crate::log_debug!("ws: connecting {}", path);
        for listener in &listeners {
            if let Some(f) = &listener.on_before_connect {
                f();
            }
        }

        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(path) else {
            return;
        };
        // A before-connect callback may have torn the path down already
        if entry.generation != generation {
            return;
        }
        entry.attempt_task = Some(tokio::spawn(run_attempt(
            self.clone(),
            path.to_string(),
            generation,
            cancel,
        )));
    }

    /// Enabled listeners of `path`, provided `generation` is still current.
    fn current_listeners(&self, path: &str, generation: u64) -> Option<Vec<ListenerOptions>> {
        let entries = self.entries();
        let entry = entries.get(path)?;
        (entry.generation == generation).then(|| entry.enabled_listeners())
    }

    fn handle_open(&self, path: &str, generation: u64, socket: &Socket) {
        let listeners = {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(path) else {
                return;
            };
            if entry.generation != generation {
                return;
            }
            entry.socket = Some(socket.clone());
            entry.opening = None;
            entry.is_connecting = false;
            entry.backoff.reset();
            entry.enabled_listeners()
        };

        crate::log_info!("ws: connected to {}", path);
        for listener in &listeners {
            if let Some(f) = &listener.on_open {
                f(socket);
            }
        }
    }

    fn handle_message(&self, path: &str, generation: u64, message: &Message) {
        let Some(listeners) = self.current_listeners(path, generation) else {
            return;
        };
        for listener in &listeners {
            if let Some(f) = &listener.on_message {
                f(message);
            }
        }
    }

    fn handle_error(&self, path: &str, generation: u64, error: &SocketError, socket: &Socket) {
        let Some(listeners) = self.current_listeners(path, generation) else {
            return;
        };
        crate::log_warn!("ws: error on {}: {}", path, error);
        for listener in &listeners {
            if let Some(f) = &listener.on_error {
                f(error, socket);
            }
        }
    }

    fn handle_close(self: &Arc<Self>, path: &str, generation: u64, event: &CloseEvent) {
        let listeners = {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(path) else {
                return;
            };
            if entry.generation != generation {
                return;
            }
            entry.socket = None;
            entry.opening = None;
            entry.is_connecting = false;
            entry.token_cancel = None;
            entry.attempt_task = None;
            entry.enabled_listeners()
        };

        crate::log_info!(
            "ws: {} closed (code {}, clean: {})",
            path,
            event.code,
            event.was_clean
        );
        if listeners.is_empty() {
            return;
        }

        let reconnect = collect_votes(listeners.iter().map(|listener| {
            listener
                .on_close
                .as_ref()
                .map_or(Reconnect::Allow, |f| f(event))
        }));
        if reconnect {
            self.schedule_reconnect(path);
        } else {
            crate::log_info!("ws: reconnect to {} vetoed by a listener", path);
        }
    }

    fn handle_connect_error(self: &Arc<Self>, path: &str, generation: u64, error: ConnectError) {
        let (listeners, to_close) = {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(path) else {
                return;
            };
            if entry.generation != generation {
                return;
            }
            entry.is_connecting = false;
            entry.token_cancel = None;
            entry.attempt_task = None;
            (entry.enabled_listeners(), entry.opening.take())
        };
        close_all(to_close.into_iter().collect());

        crate::log_warn!("ws: connecting to {} failed: {}", path, error);
        if listeners.is_empty() {
            return;
        }

        let reconnect = collect_votes(listeners.iter().map(|listener| {
            listener
                .on_connect_error
                .as_ref()
                .map_or(Reconnect::Allow, |f| f(&error))
        }));
        if reconnect {
            self.schedule_reconnect(path);
        } else {
            crate::log_info!("ws: retry for {} vetoed by a listener", path);
        }
    }

    /// Drop an attempt without a verdict: no callbacks, no retry.
    fn abandon_attempt(&self, path: &str, generation: u64) {
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(path) {
            if entry.generation == generation {
                entry.is_connecting = false;
                entry.token_cancel = None;
                entry.attempt_task = None;
            }
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, path: &str) {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(path) else {
            return;
        };
        if !entry.has_enabled() {
            return;
        }

        let registry = Arc::downgrade(self);
        let target = path.to_string();
        let delay = entry.backoff.schedule_retry(move || {
            if let Some(registry) = registry.upgrade() {
                registry.connect(&target);
            }
        });
        crate::log_info!(
            "ws: reconnecting to {} in {}ms (attempt {})",
            path,
            delay.as_millis(),
            entry.backoff.attempts()
        );
    }

    fn force_reconnect(self: &Arc<Self>, path: &str) {
        let (to_close, has_enabled) = {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(path) else {
                return;
            };
            entry.backoff.reset();
            (entry.detach(), entry.has_enabled())
        };
        close_all(to_close);

        if has_enabled {
            self.schedule_reconnect(path);
        }
    }

    /// Swap in new options for a listener. Only a change of the enabled flag
    /// can start or stop the connection; a re-render with the same flag leaves
    /// the socket, a pending retry and a vetoed path alone.
    fn replace_listener(self: &Arc<Self>, path: &str, id: ListenerId, options: ListenerOptions) {
        let (previous, enabled_changed) = {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(path) else {
                return;
            };
            let Some((_, current)) = entry.listeners.iter_mut().find(|(lid, _)| *lid == id) else {
                return;
            };
            let enabled_changed = current.enabled != options.enabled;
            (std::mem::replace(current, options), enabled_changed)
        };
        drop(previous);

        if enabled_changed {
            self.sync(path);
        }
    }

    fn remove_listener(self: &Arc<Self>, path: &str, id: ListenerId) {
        let removed = {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(path) else {
                return;
            };
            let Some(index) = entry.listeners.iter().position(|(lid, _)| *lid == id) else {
                return;
            };
            entry.listeners.remove(index)
        };
        drop(removed);
        crate::log_debug!("ws: listener {:?} left {}", id, path);
        self.sync(path);
    }

    fn options(&self, path: &str, id: ListenerId) -> Option<ListenerOptions> {
        self.entries()
            .get(path)?
            .listeners
            .iter()
            .find(|(lid, _)| *lid == id)
            .map(|(_, options)| options.clone())
    }

    fn current_socket(&self, path: &str) -> Option<Socket> {
        self.entries().get(path).and_then(|entry| entry.socket.clone())
    }
}

/// One connection attempt: token, URL, socket, then pump events until close.
async fn run_attempt(
    registry: Arc<Inner>,
    path: String,
    generation: u64,
    cancel: CancellationToken,
) {
    let fetched = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ConnectError::Cancelled),
        result = registry.tokens.fetch_token(&cancel) => result,
    };
    let token = match fetched {
        Ok(token) => token,
        Err(e) if e.is_cancelled() => {
            crate::log_debug!("ws: token fetch for {} cancelled", path);
            registry.abandon_attempt(&path, generation);
            return;
        }
        Err(e) => {
            registry.handle_connect_error(&path, generation, e);
            return;
        }
    };

    // Listeners may have left while the token was in flight
    let url = {
        let mut entries = registry.entries();
        let Some(entry) = entries.get_mut(&path) else {
            return;
        };
        if entry.generation != generation {
            return;
        }
        entry.token_cancel = None;
        if !entry.has_enabled() {
            entry.is_connecting = false;
            entry.attempt_task = None;
            return;
        }
        build_ws_url(&registry.base_url, &path, &token.token)
    };

    let TransportSocket { handle, mut events } = match registry.transport.open(&url) {
        Ok(socket) => socket,
        Err(e) => {
            registry.handle_connect_error(&path, generation, e);
            return;
        }
    };

    let attached = {
        let mut entries = registry.entries();
        match entries.get_mut(&path) {
            Some(entry) if entry.generation == generation => {
                entry.opening = Some(handle.clone());
                true
            }
            _ => false,
        }
    };
    if !attached {
        handle.close();
        return;
    }

    while let Some(event) = events.next().await {
        match event {
            SocketEvent::Open => registry.handle_open(&path, generation, &handle),
            SocketEvent::Message(message) => registry.handle_message(&path, generation, &message),
            SocketEvent::Error(error) => registry.handle_error(&path, generation, &error, &handle),
            SocketEvent::Close(close) => {
                registry.handle_close(&path, generation, &close);
                return;
            }
        }
    }
    registry.handle_close(&path, generation, &CloseEvent::abnormal("event stream ended"));
}

/// A listener's registration. Dropping it unsubscribes.
pub struct Subscription {
    registry: Weak<Inner>,
    path: String,
    id: ListenerId,
}

impl Subscription {
    fn inert() -> Self {
        Self {
            registry: Weak::new(),
            path: String::new(),
            id: ListenerId(0),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// The open socket for this path, if any.
    pub fn current_socket(&self) -> Option<Socket> {
        self.registry.upgrade()?.current_socket(&self.path)
    }

    pub fn state(&self) -> ConnectionState {
        self.registry
            .upgrade()
            .map_or(ConnectionState::Disconnected, |registry| registry.state(&self.path))
    }

    /// Reset backoff, close the socket and schedule a fresh attempt.
    pub fn force_reconnect(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.force_reconnect(&self.path);
        }
    }

    /// Replace this listener's callbacks and enabled flag.
    ///
    /// Meant to be called by UI adapters on every render; the socket is only
    /// touched when the enabled flag changes what the path needs.
    pub fn update(&self, options: ListenerOptions) {
        if let Some(registry) = self.registry.upgrade() {
            registry.replace_listener(&self.path, self.id, options);
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        if let Some(options) = registry.options(&self.path, self.id) {
            registry.replace_listener(&self.path, self.id, options.enabled(enabled));
        }
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_listener(&self.path, self.id);
        }
    }
}
