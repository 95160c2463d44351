use std::time::Duration;

use crate::error::GraphQlError;

pub const DEFAULT_GRAPHQL_URL: &str = "http://localhost:4000/graphql";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// Client-side ping on an idle subscription socket.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub http_url: String,
    pub ws_url: String,
    pub auth_token: Option<String>,
    pub request_timeout: Duration,
    pub keepalive: Duration,
}

impl ClientConfig {
    /// Config for `http_url`, with the subscription URL derived from it.
    pub fn new(http_url: impl Into<String>) -> Self {
        let http_url = http_url.into();
        Self {
            ws_url: derive_ws_url(&http_url),
            http_url,
            auth_token: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            keepalive: DEFAULT_KEEPALIVE,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// `NEXUS_GRAPHQL_URL`, `NEXUS_GRAPHQL_WS_URL`, `NEXUS_AUTH_TOKEN`,
    /// `NEXUS_HTTP_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, GraphQlError> {
        let http_url =
            std::env::var("NEXUS_GRAPHQL_URL").unwrap_or_else(|_| DEFAULT_GRAPHQL_URL.into());
        let mut config = Self::new(http_url);

        if let Ok(ws_url) = std::env::var("NEXUS_GRAPHQL_WS_URL") {
            config.ws_url = ws_url;
        }
        config.auth_token = std::env::var("NEXUS_AUTH_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());
        if let Ok(raw) = std::env::var("NEXUS_HTTP_TIMEOUT_SECS") {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|_| GraphQlError::Config(format!("NEXUS_HTTP_TIMEOUT_SECS='{}'", raw)))?;
            config.request_timeout = Duration::from_secs(secs);
        }

        if !config.http_url.starts_with("http://") && !config.http_url.starts_with("https://") {
            return Err(GraphQlError::Config(format!(
                "NEXUS_GRAPHQL_URL must be http(s), got '{}'",
                config.http_url
            )));
        }
        Ok(config)
    }

    pub(crate) fn bearer(&self) -> Option<String> {
        self.auth_token.as_ref().map(|t| format!("Bearer {}", t))
    }
}

/// `http://` -> `ws://`, `https://` -> `wss://`; anything else unchanged.
pub fn derive_ws_url(http_url: &str) -> String {
    if let Some(rest) = http_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = http_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        http_url.to_string()
    }
}
