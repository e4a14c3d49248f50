//! Byte-stream transport used by the session client.
//!
//! The client builds a [`StreamRequest`] for every attempt and hands it to a
//! [`StreamTransport`]. The default implementation is [`HttpTransport`]
//! (reqwest); tests substitute scripted transports.

use std::pin::Pin;

use futures::StreamExt as _;
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL, HeaderMap, HeaderValue};
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::StreamError;

/// Boxed stream of raw body chunks.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, StreamError>> + Send + 'static>>;

/// One connection attempt against the session stream endpoint.
#[derive(Clone, Debug)]
pub struct StreamRequest {
    pub url: String,
    pub headers: HeaderMap,
}

impl StreamRequest {
    /// Builds the request with the event-stream headers and, when present,
    /// bearer authorization.
    pub fn new(url: impl Into<String>, token: Option<&str>) -> Result<Self, StreamError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| StreamError::Token(format!("token is not a valid header value: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        Ok(Self {
            url: url.into(),
            headers,
        })
    }
}

/// Opens the byte stream for one attempt.
///
/// Dropping the returned stream must release the underlying connection.
#[async_trait::async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open(&self, request: StreamRequest) -> Result<ByteStream, StreamError>;
}

/// reqwest-backed transport for the chat backend.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport honouring the connect timeout from `config`.
    ///
    /// No total request timeout is set because the response body is an
    /// unbounded stream.
    pub fn new(config: &ClientConfig) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| StreamError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl StreamTransport for HttpTransport {
    async fn open(&self, request: StreamRequest) -> Result<ByteStream, StreamError> {
        debug!(url = %request.url, "opening session stream");
        let response = self
            .client
            .get(&request.url)
            .headers(request.headers)
            .send()
            .await
            .map_err(|e| StreamError::transport(format!("stream request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(StreamError::http_status(status.as_u16(), &body));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StreamError::transport(format!("stream read failed: {e}"))));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_event_stream_headers() {
        let request = StreamRequest::new("http://x/chat/1/stream", None).expect("request");
        assert_eq!(request.headers[ACCEPT], "text/event-stream");
        assert_eq!(request.headers[CACHE_CONTROL], "no-cache");
        assert!(request.headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn bearer_token_is_attached_when_present() {
        let request = StreamRequest::new("http://x", Some("abc")).expect("request");
        assert_eq!(request.headers[AUTHORIZATION], "Bearer abc");
        assert!(request.headers[AUTHORIZATION].is_sensitive());

        let request = StreamRequest::new("http://x", Some("")).expect("request");
        assert!(request.headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn invalid_token_is_a_token_error() {
        let err = StreamRequest::new("http://x", Some("bad\ntoken")).expect_err("invalid header");
        assert!(matches!(err, StreamError::Token(_)));
    }

    #[test]
    fn http_transport_builds_from_config() {
        let transport = HttpTransport::new(&ClientConfig::new("http://localhost:1"));
        assert!(transport.is_ok());
    }
}
