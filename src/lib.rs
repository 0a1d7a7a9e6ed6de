//! Quipflip Live - realtime plumbing for the Quipflip web client
//!
//! This crate holds the parts of the client that coordinate long-lived work:
//! a registry that shares one WebSocket per logical path between any number of
//! subscribers (with exponential backoff reconnection), and a polling manager
//! that adapts refresh cadence to user activity, errors and connectivity.
//!
//! Rendering lives elsewhere. UI code talks to this crate through
//! [`ws::ConnectionRegistry::subscribe`] and [`polling::PollingManager::start_poll`],
//! or through the Dioxus hooks behind the `dioxus` feature.

pub mod logging;

pub mod config;
pub mod error;
pub mod polling;
pub mod token;
pub mod ws;

pub use config::RealtimeConfig;
pub use error::{ConfigError, ConnectError};
pub use polling::{ActivitySignal, PollConfig, PollState, PollingManager};
pub use token::{token_fn, ApiTokenProvider, TokenProvider, WsToken};
pub use ws::{ConnectionRegistry, ConnectionState, ListenerOptions, Reconnect, Subscription};
