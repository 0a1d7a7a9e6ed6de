//! Error types for connection attempts and configuration.

use serde::Deserialize;
use thiserror::Error;

/// Why a connection attempt never reached the open state.
///
/// `Cancelled` is not a failure: it means a newer attempt or a teardown
/// superseded the one in flight, and the registry swallows it silently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("connection attempt cancelled")]
    Cancelled,
    #[error("token request failed: {0}")]
    Token(String),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("invalid websocket url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("transport error: {0}")]
    Transport(String),
}

impl ConnectError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConnectError::Cancelled)
    }
}

/// Errors raised while reading [`crate::RealtimeConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not a valid number: {value}")]
    InvalidNumber { var: &'static str, value: String },
    #[error("invalid url in {var}: {source}")]
    InvalidUrl {
        var: &'static str,
        #[source]
        source: url::ParseError,
    },
}

/// Error body shapes the API is known to return.
///
/// RFC7807 problem documents carry `title` and `detail`; plain validation
/// errors only carry `detail`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    detail: Option<serde_json::Value>,
}

/// Pull a user-facing message out of an error response body.
/// Prefers `detail`, falls back to `title`.
pub fn problem_message(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok()?;
    match parsed.detail {
        Some(serde_json::Value::String(detail)) if !detail.trim().is_empty() => {
            return Some(detail);
        }
        Some(serde_json::Value::String(_)) | Some(serde_json::Value::Null) | None => {}
        Some(other) => return Some(other.to_string()),
    }
    parsed.title.filter(|t| !t.trim().is_empty())
}
