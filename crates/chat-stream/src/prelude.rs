//! Common imports for typical client usage.
pub use crate::{
    AuthTokenOptions, ClientConfig, ConnectionState, Listeners, ReconnectPolicy, SseMessage,
    StaticToken, StreamError, StreamingSessionClient, TokenFn, TokenSupplier,
};
