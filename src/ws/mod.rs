//! WebSocket module for realtime notifications from the game API.
//!
//! This module provides:
//! - One shared connection per logical path, fanned out to every subscriber
//! - Exponential backoff reconnection, vetoable by any subscriber
//! - Token-authenticated URLs built from the REST API base
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐ ┌───────────┐ ┌───────────┐
//! │ Listener  │ │ Listener  │ │ Listener  │
//! └───────────┘ └───────────┘ └───────────┘
//!       │             │             │
//!       └─────────────┼─────────────┘
//!                     ▼
//!        ┌─────────────────────────┐
//!        │   ConnectionRegistry    │
//!        │ (one Entry per path)    │
//!        └─────────────────────────┘
//!                     │
//!          ┌──────────┴──────────┐
//!          ▼                     ▼
//!   ┌─────────────┐      ┌──────────────┐
//!   │TokenProvider│      │ WsTransport  │
//!   └─────────────┘      └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let registry = ConnectionRegistry::new(&config, TungsteniteTransport, ApiTokenProvider::new(&config));
//!
//! let sub = registry.subscribe(
//!     "/qf/ws/notifications",
//!     ListenerOptions::new()
//!         .on_message(|msg| println!("{:?}", msg.as_text()))
//!         .on_close(|event| event.code != 4001), // stop retrying on auth failure
//! );
//!
//! // Later: dropping the subscription unsubscribes
//! drop(sub);
//! ```

mod backoff;
mod registry;
mod transport;
mod url;

#[cfg(feature = "dioxus")]
pub mod hooks;

pub use backoff::{Backoff, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};
pub use registry::{
    ConnectionRegistry, ConnectionState, ListenerId, ListenerOptions, Reconnect, Subscription,
};
pub use transport::{
    CloseEvent, Message, Socket, SocketError, SocketEvent, SocketHandle, TransportSocket,
    TungsteniteTransport, WsTransport, CLOSE_HANDSHAKE_TIMEOUT,
};
pub use url::{build_ws_url, http_to_ws, ws_base_url};
