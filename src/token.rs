//! Short-lived websocket tokens.
//!
//! The registry asks a [`TokenProvider`] for a fresh token before every
//! connection attempt and passes it as a `token` query parameter. Providers must
//! resolve to [`ConnectError::Cancelled`] once the supplied token is cancelled,
//! so superseded attempts are not mistaken for failures.

use std::future::Future;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::RealtimeConfig;
use crate::error::{problem_message, ConnectError};

/// Token endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsToken {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl WsToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_in: None,
            token_type: None,
        }
    }
}

#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    async fn fetch_token(&self, cancel: &CancellationToken) -> Result<WsToken, ConnectError>;
}

/// Adapter turning a closure into a [`TokenProvider`]. See [`token_fn`].
pub struct FnTokenProvider<F>(F);

/// Build a provider from `Fn(CancellationToken) -> impl Future<Output = Result<WsToken, ConnectError>>`.
pub fn token_fn<F, Fut>(f: F) -> FnTokenProvider<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<WsToken, ConnectError>> + Send + 'static,
{
    FnTokenProvider(f)
}

#[async_trait]
impl<F, Fut> TokenProvider for FnTokenProvider<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<WsToken, ConnectError>> + Send + 'static,
{
    async fn fetch_token(&self, cancel: &CancellationToken) -> Result<WsToken, ConnectError> {
        (self.0)(cancel.clone()).await
    }
}

/// Fetches tokens from the REST API's websocket token endpoint.
#[derive(Debug, Clone)]
pub struct ApiTokenProvider {
    client: Client,
    url: String,
    bearer: Option<String>,
}

impl ApiTokenProvider {
    pub fn new(config: &RealtimeConfig) -> Self {
        let base = config.api_base_url.trim_end_matches('/');
        let path = config.token_path.trim_start_matches('/');
        Self {
            client: Client::new(),
            url: format!("{base}/{path}"),
            bearer: None,
        }
    }

    /// Send `Authorization: Bearer <token>` with every request
    pub fn with_bearer(mut self, access_token: impl Into<String>) -> Self {
        self.bearer = Some(access_token.into());
        self
    }

    /// Use a preconfigured client (cookie store, proxies, timeouts)
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request(&self) -> Result<WsToken, ConnectError> {
        let mut rb = self.client.get(&self.url);
        if let Some(bearer) = &self.bearer {
            rb = rb.bearer_auth(bearer);
        }

        let resp = rb
            .send()
            .await
            .map_err(|e| ConnectError::Token(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();

        let text = resp
            .text()
            .await
            .map_err(|e| ConnectError::Token(format!("failed to read body: {e}")))?;

        if !is_success {
            let message = problem_message(&text).unwrap_or(text);
            return Err(ConnectError::Http { status, message });
        }

        serde_json::from_str(&text)
            .map_err(|e| ConnectError::Token(format!("invalid token response: {e}")))
    }
}

#[async_trait]
impl TokenProvider for ApiTokenProvider {
    async fn fetch_token(&self, cancel: &CancellationToken) -> Result<WsToken, ConnectError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ConnectError::Cancelled),
            result = self.request() => result,
        }
    }
}
