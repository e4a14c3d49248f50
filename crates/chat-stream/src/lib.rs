//! Server-sent-event client for chat sessions.
//!
//! A [`StreamingSessionClient`] subscribes to `GET {base}/chat/{session}/stream`,
//! reassembles `data: <json>` records from arbitrarily chunked bytes, routes
//! each message to the matching [`Listeners`] handler and reconnects with
//! exponential backoff when the stream ends or fails.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chat_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), StreamError> {
//! let listeners = Listeners::new()
//!     .on_stream_token(|token| print!("{token}"))
//!     .on_stream_done(|| println!())
//!     .on_error(|err| eprintln!("stream error: {err}"));
//!
//! let client = StreamingSessionClient::builder("chat-123")
//!     .config(ClientConfig::from_env()?)
//!     .token_supplier(Arc::new(StaticToken::new("secret")))
//!     .listeners(listeners)
//!     .build()?;
//!
//! client.connect().await;
//! client.disconnect();
//! # Ok(())
//! # }
//! ```

/// Credential suppliers and token scoping options.
pub mod auth;
/// Reconnection policy and backoff schedule.
pub mod backoff;
/// Session client lifecycle and builder.
pub mod client;
/// Backend location settings.
pub mod config;
/// Public error type.
pub mod errors;
/// Byte-stream framing and record parsing.
pub mod framer;
/// Listener capability set and message routing.
pub mod listeners;
/// Wire message model and event classification.
pub mod message;
/// Tracing subscriber setup for binaries.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// HTTP transport seam.
pub mod transport;

pub use auth::{Audience, AuthTokenOptions, StaticToken, TokenFn, TokenSupplier};
pub use backoff::ReconnectPolicy;
pub use client::{ClientBuilder, ConnectionState, StreamingSessionClient};
pub use config::ClientConfig;
pub use errors::StreamError;
pub use framer::{SseFramer, parse_segment};
pub use listeners::{Listeners, dispatch};
pub use message::{ChatListEventKind, EventKind, SseMessage, StreamEventKind};
pub use transport::{ByteStream, HttpTransport, StreamRequest, StreamTransport};
