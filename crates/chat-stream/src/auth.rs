use std::future::Future;

use crate::errors::StreamError;

/// Audience requested from the token issuer: one or several identifiers.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn is_empty(&self) -> bool {
        match self {
            Self::One(value) => value.trim().is_empty(),
            Self::Many(values) => values.iter().all(|v| v.trim().is_empty()),
        }
    }
}

impl From<&str> for Audience {
    fn from(value: &str) -> Self {
        Self::One(value.to_string())
    }
}

impl From<String> for Audience {
    fn from(value: String) -> Self {
        Self::One(value)
    }
}

impl From<Vec<String>> for Audience {
    fn from(values: Vec<String>) -> Self {
        Self::Many(values)
    }
}

/// Scoping parameters forwarded to the token supplier.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AuthTokenOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<Audience>,
}

impl AuthTokenOptions {
    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn audience(mut self, audience: impl Into<Audience>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Returns the options to forward, or `None` when nothing is set so the
    /// supplier falls back to its default token.
    pub fn request_scope(&self) -> Option<&Self> {
        let has_template = self
            .template
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        let has_audience = self.audience.as_ref().is_some_and(|a| !a.is_empty());
        (has_template || has_audience).then_some(self)
    }
}

/// Source of the bearer credential attached to every connection attempt.
///
/// The client never caches or inspects the returned value.
#[async_trait::async_trait]
pub trait TokenSupplier: Send + Sync {
    /// Returns the current token, or `None` to connect without credentials.
    async fn token(
        &self,
        options: Option<&AuthTokenOptions>,
    ) -> Result<Option<String>, StreamError>;
}

/// Supplier returning a fixed token (or none).
#[derive(Clone, Debug, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    /// Supplier that never attaches credentials.
    pub fn anonymous() -> Self {
        Self(None)
    }
}

#[async_trait::async_trait]
impl TokenSupplier for StaticToken {
    async fn token(
        &self,
        _options: Option<&AuthTokenOptions>,
    ) -> Result<Option<String>, StreamError> {
        Ok(self.0.clone())
    }
}

/// Supplier backed by an async closure.
///
/// ```no_run
/// use chat_stream::auth::{AuthTokenOptions, TokenFn};
///
/// let supplier = TokenFn::new(|_scope: Option<AuthTokenOptions>| async {
///     Ok::<_, chat_stream::StreamError>(Some("token".to_string()))
/// });
/// # let _ = supplier;
/// ```
pub struct TokenFn<F> {
    f: F,
}

impl<F> TokenFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait::async_trait]
impl<F, Fut> TokenSupplier for TokenFn<F>
where
    F: Fn(Option<AuthTokenOptions>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<String>, StreamError>> + Send + 'static,
{
    async fn token(
        &self,
        options: Option<&AuthTokenOptions>,
    ) -> Result<Option<String>, StreamError> {
        (self.f)(options.cloned()).await
    }
}
