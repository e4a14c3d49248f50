use serde::Deserialize;

const ERROR_BODY_SNIPPET_LEN: usize = 220;

/// Errors produced while configuring or running a session stream.
///
/// Runtime failures never escape `StreamingSessionClient::connect`; they are
/// delivered to the `on_error` listener instead. Only builder and
/// configuration paths return this type through `Result`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Invalid client or environment configuration.
    #[error("config error: {0}")]
    Config(String),
    /// The token supplier failed to produce a credential.
    #[error("token error: {0}")]
    Token(String),
    /// Connection or mid-stream I/O failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// The server answered the stream request with a non-success status.
    #[error("http status {status}: {message}")]
    HttpStatus { status: u16, message: String },
    /// In-band `error` event folded into the general error listener.
    #[error("server error: {0}")]
    Server(String),
}

impl StreamError {
    /// Creates a transport error from any displayable source.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates an HTTP status error, deriving a readable message from the
    /// response body.
    pub fn http_status(status: u16, body: &str) -> Self {
        Self::HttpStatus {
            status,
            message: describe_status(status, body),
        }
    }

    /// Returns the HTTP status when the error came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn describe_status(status: u16, body: &str) -> String {
    match status {
        401 => "unauthorized, sign in again".to_string(),
        403 => "access denied for this chat".to_string(),
        404 => "chat stream not found".to_string(),
        500..=599 => "server error, try again later".to_string(),
        _ => summarize_error_body(body),
    }
}

fn summarize_error_body(body: &str) -> String {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        error: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body)
        && let Some(message) = parsed.message.or(parsed.error)
    {
        return message;
    }

    let snippet: String = body.trim().chars().take(ERROR_BODY_SNIPPET_LEN).collect();
    if snippet.is_empty() {
        "request failed".to_string()
    } else {
        snippet
    }
}
