//! Streaming URL construction.

use crate::config::RealtimeConfig;

/// Convert an HTTP/HTTPS URL to WS/WSS. Anything else is returned unchanged.
pub fn http_to_ws(url: &str) -> String {
    if url.starts_with("https://") {
        url.replacen("https://", "wss://", 1)
    } else if url.starts_with("http://") {
        url.replacen("http://", "ws://", 1)
    } else {
        url.to_string()
    }
}

/// Streaming origin for a config: the explicit override if present,
/// otherwise the API base with its scheme rewritten.
pub fn ws_base_url(config: &RealtimeConfig) -> String {
    match config.ws_url_override.as_deref() {
        Some(base) => base.trim_end_matches('/').to_string(),
        None => http_to_ws(config.api_base_url.trim_end_matches('/')),
    }
}

/// Join `base` and `path`, then attach `token` as a query credential.
pub fn build_ws_url(base: &str, path: &str, token: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    let sep = if path.contains('?') { '&' } else { '?' };
    format!(
        "{base}/{path}{sep}token={}",
        urlencoding::encode(token)
    )
}
