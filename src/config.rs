//! Client realtime configuration from environment variables.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_TOKEN_PATH: &str = "/auth/ws-token";

/// Settings shared by the connection registry and the token provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// REST API base, e.g. `https://api.quipflip.xyz`.
    pub api_base_url: String,
    /// Explicit streaming origin; replaces the one derived from `api_base_url`.
    pub ws_url_override: Option<String>,
    /// Endpoint that hands out short-lived websocket tokens.
    pub token_path: String,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            ws_url_override: None,
            token_path: DEFAULT_TOKEN_PATH.to_string(),
            backoff_base_ms: 2_000,
            backoff_max_ms: 30_000,
        }
    }
}

impl RealtimeConfig {
    /// Read configuration from the environment.
    ///
    /// Environment variables:
    /// - `QUIPFLIP_API_URL`: REST API base (default: "http://localhost:8000")
    /// - `QUIPFLIP_WS_URL`: streaming origin override (default: derived from the API URL)
    /// - `QUIPFLIP_WS_TOKEN_PATH`: token endpoint (default: "/auth/ws-token")
    /// - `QUIPFLIP_WS_BACKOFF_BASE_MS` / `QUIPFLIP_WS_BACKOFF_MAX_MS`: reconnect pacing
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`RealtimeConfig::from_env`] but with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_base_url = non_empty(lookup("QUIPFLIP_API_URL")).unwrap_or(defaults.api_base_url);
        url::Url::parse(&api_base_url).map_err(|source| ConfigError::InvalidUrl {
            var: "QUIPFLIP_API_URL",
            source,
        })?;

        let ws_url_override = non_empty(lookup("QUIPFLIP_WS_URL"));
        if let Some(ws) = ws_url_override.as_deref() {
            url::Url::parse(ws).map_err(|source| ConfigError::InvalidUrl {
                var: "QUIPFLIP_WS_URL",
                source,
            })?;
        }

        let token_path = non_empty(lookup("QUIPFLIP_WS_TOKEN_PATH")).unwrap_or(defaults.token_path);

        let backoff_base_ms = parse_ms(
            "QUIPFLIP_WS_BACKOFF_BASE_MS",
            lookup("QUIPFLIP_WS_BACKOFF_BASE_MS"),
            defaults.backoff_base_ms,
        )?;
        let backoff_max_ms = parse_ms(
            "QUIPFLIP_WS_BACKOFF_MAX_MS",
            lookup("QUIPFLIP_WS_BACKOFF_MAX_MS"),
            defaults.backoff_max_ms,
        )?;

        Ok(Self {
            api_base_url,
            ws_url_override,
            token_path,
            backoff_base_ms,
            backoff_max_ms,
        })
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_ms(var: &'static str, value: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match non_empty(value) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { var, value: raw }),
    }
}
