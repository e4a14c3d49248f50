use std::time::Duration;

use crate::errors::StreamError;

/// Environment variable holding the chat backend base URL.
pub const API_URL_ENV: &str = "CHAT_STREAM_API_URL";
/// Optional connect timeout override in milliseconds.
pub const CONNECT_TIMEOUT_ENV: &str = "CHAT_STREAM_CONNECT_TIMEOUT_MS";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for the chat backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the chat API, without trailing slash.
    pub base_url: String,
    /// Timeout for establishing the connection.
    ///
    /// The stream body itself is unbounded and never times out.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Creates a config for the given base URL with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: normalize_base_url(base_url.into()),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Builds a config from `CHAT_STREAM_API_URL` and the optional
    /// `CHAT_STREAM_CONNECT_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, StreamError> {
        let base_url = std::env::var(API_URL_ENV).unwrap_or_default();
        if base_url.trim().is_empty() {
            return Err(StreamError::Config(format!(
                "missing {API_URL_ENV} for the chat stream client"
            )));
        }
        let mut config = Self::new(base_url);
        if let Ok(raw) = std::env::var(CONNECT_TIMEOUT_ENV) {
            let millis = raw.trim().parse::<u64>().map_err(|e| {
                StreamError::Config(format!("invalid {CONNECT_TIMEOUT_ENV} '{raw}': {e}"))
            })?;
            config = config.connect_timeout(Duration::from_millis(millis));
        }
        Ok(config)
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// URL of the event stream for one chat session.
    ///
    /// The session id is percent-encoded as a single path segment.
    pub fn stream_url(&self, session_id: &str) -> Result<String, StreamError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| StreamError::Config(format!("invalid base_url '{}': {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| {
                StreamError::Config(format!("base_url '{}' cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(["chat", session_id, "stream"]);
        Ok(url.into())
    }

    pub(crate) fn validate(&self) -> Result<(), StreamError> {
        if self.base_url.is_empty() {
            return Err(StreamError::Config("base_url must not be empty".into()));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(StreamError::Config(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        Ok(())
    }
}

fn normalize_base_url(raw: String) -> String {
    raw.trim().trim_end_matches('/').to_string()
}
