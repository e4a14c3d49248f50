//! Session stream client: connection lifecycle, read loop and reconnection.
//!
//! Each call to [`StreamingSessionClient::connect`] starts a new *attempt*
//! identified by a generation number. Starting an attempt aborts the previous
//! one and cancels any pending reconnect timer, so at most one read loop is
//! alive per client. Work finishing under a stale generation is discarded
//! silently.
//!
//! Callback order when an attempt ends without cancellation: `on_error` (for
//! failures) fires before `on_close`, and both fire before the reconnection
//! decision. In-band `error` events are dispatched from the read loop, so they
//! always precede the final close of the attempt that carried them, including
//! the last attempt before reconnection gives up.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt as _;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::auth::{AuthTokenOptions, StaticToken, TokenSupplier};
use crate::backoff::ReconnectPolicy;
use crate::config::ClientConfig;
use crate::errors::StreamError;
use crate::framer::{SseFramer, parse_segment};
use crate::listeners::{Listeners, dispatch};
use crate::transport::{HttpTransport, StreamRequest, StreamTransport};

/// Lifecycle state of a session client.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    /// Never connected, or explicitly disconnected.
    Idle,
    /// Fetching a token or waiting for the response headers.
    Connecting,
    /// Reading the event stream.
    Open,
    /// The last attempt ended and no reconnection is pending.
    Closed,
    /// Waiting for the backoff delay before the next attempt.
    ReconnectScheduled,
    /// Automatic reconnection gave up; call `connect()` to resume.
    Failed,
}

/// Cancels one in-flight attempt.
struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Pending reconnection. Dropping it cancels the timer task.
struct ReconnectTimer {
    id: u64,
    _cancel: oneshot::Sender<()>,
}

struct Lifecycle {
    state: ConnectionState,
    generation: u64,
    abort: Option<AbortHandle>,
    timer: Option<ReconnectTimer>,
    next_timer_id: u64,
    reconnect_attempts: u32,
    connected: bool,
    states: watch::Sender<ConnectionState>,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            states: watch::Sender::new(ConnectionState::Idle),
            generation: 0,
            abort: None,
            timer: None,
            next_timer_id: 0,
            reconnect_attempts: 0,
            connected: false,
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.states.send_replace(state);
    }
}

struct ClientInner {
    session_id: String,
    stream_url: String,
    auth: AuthTokenOptions,
    token_supplier: Arc<dyn TokenSupplier>,
    transport: Arc<dyn StreamTransport>,
    policy: ReconnectPolicy,
    listeners: Mutex<Listeners>,
    lifecycle: Mutex<Lifecycle>,
}

enum AttemptOutcome {
    Cancelled,
    Ended,
    Failed(StreamError),
}

/// Subscription to the event stream of one chat session.
///
/// Cloning yields another handle to the same subscription.
///
/// ```no_run
/// use chat_stream::{ClientConfig, Listeners, StreamingSessionClient};
///
/// # async fn run() -> Result<(), chat_stream::StreamError> {
/// let client = StreamingSessionClient::builder("chat-1")
///     .config(ClientConfig::new("https://api.example.com"))
///     .listeners(Listeners::new().on_stream_token(|t| print!("{t}")))
///     .build()?;
/// client.connect().await;
/// client.disconnect();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct StreamingSessionClient {
    inner: Arc<ClientInner>,
}

impl StreamingSessionClient {
    /// Starts a builder for the given session id.
    pub fn builder(session_id: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(session_id)
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Whether a stream is currently open.
    pub fn connected(&self) -> bool {
        self.lifecycle().connected
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle().state
    }

    /// Receiver observing every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.lifecycle().states.subscribe()
    }

    /// Automatic attempts made since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.lifecycle().reconnect_attempts
    }

    /// Opens the stream and reads it until it ends, fails or is cancelled.
    ///
    /// Any previous attempt and any pending reconnection are cancelled first.
    /// Outcomes are reported through the listeners; this never fails. An
    /// explicit call also resets the reconnection counter, so it starts a
    /// fresh backoff sequence after the policy gave up.
    pub async fn connect(&self) {
        self.run_attempt(None).await;
    }

    /// Tears down the current attempt and any pending reconnection.
    ///
    /// Fires `on_close` once if the client was not already idle; repeated
    /// calls are no-ops.
    pub fn disconnect(&self) {
        let was_active = {
            let mut lc = self.lifecycle();
            if let Some(abort) = lc.abort.take() {
                abort.abort();
            }
            lc.timer = None;
            lc.generation += 1;
            lc.reconnect_attempts = 0;
            lc.connected = false;
            let was_active = lc.state != ConnectionState::Idle;
            lc.set_state(ConnectionState::Idle);
            was_active
        };
        if was_active {
            info!(session_id = %self.inner.session_id, "session stream disconnected");
            self.listeners().emit_close();
        }
    }

    /// Replaces the handlers set in `update`, keeping all others.
    ///
    /// Takes effect from the next dispatched message.
    pub fn update_listeners(&self, update: Listeners) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .merge(update);
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> Listeners {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn run_attempt(&self, timer_id: Option<u64>) {
        let Some((generation, mut abort_rx)) = self.begin_attempt(timer_id) else {
            return;
        };
        let outcome = self.drive(generation, &mut abort_rx).await;
        self.finish_attempt(generation, outcome);
    }

    fn begin_attempt(&self, timer_id: Option<u64>) -> Option<(u64, watch::Receiver<bool>)> {
        let mut lc = self.lifecycle();
        match timer_id {
            Some(id) if lc.timer.as_ref().map(|t| t.id) != Some(id) => {
                debug!(session_id = %self.inner.session_id, timer_id = id, "skipping stale reconnect timer");
                return None;
            }
            Some(_) => {}
            None => lc.reconnect_attempts = 0,
        }
        if let Some(abort) = lc.abort.take() {
            abort.abort();
        }
        lc.timer = None;
        lc.generation += 1;
        lc.connected = false;
        lc.set_state(ConnectionState::Connecting);
        let (tx, rx) = watch::channel(false);
        lc.abort = Some(AbortHandle { tx });
        debug!(
            session_id = %self.inner.session_id,
            generation = lc.generation,
            attempt = lc.reconnect_attempts,
            "starting stream attempt"
        );
        Some((lc.generation, rx))
    }

    async fn drive(
        &self,
        generation: u64,
        abort_rx: &mut watch::Receiver<bool>,
    ) -> AttemptOutcome {
        let inner = &self.inner;
        let token_request = inner.token_supplier.token(inner.auth.request_scope());
        let token = match until_aborted(abort_rx, token_request).await {
            None => return AttemptOutcome::Cancelled,
            Some(Ok(token)) => token,
            Some(Err(err)) => return AttemptOutcome::Failed(err),
        };
        let request = match StreamRequest::new(&inner.stream_url, token.as_deref()) {
            Ok(request) => request,
            Err(err) => return AttemptOutcome::Failed(err),
        };
        let mut stream = match until_aborted(abort_rx, inner.transport.open(request)).await {
            None => return AttemptOutcome::Cancelled,
            Some(Ok(stream)) => stream,
            Some(Err(err)) => return AttemptOutcome::Failed(err),
        };

        if !self.mark_open(generation) {
            return AttemptOutcome::Cancelled;
        }
        info!(session_id = %inner.session_id, generation, "session stream open");
        self.listeners().emit_open();

        let mut framer = SseFramer::new();
        loop {
            let next = match until_aborted(abort_rx, stream.next()).await {
                None => return AttemptOutcome::Cancelled,
                Some(next) => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    for segment in framer.feed(&chunk) {
                        if *abort_rx.borrow() {
                            return AttemptOutcome::Cancelled;
                        }
                        if let Some(message) = parse_segment(&segment) {
                            dispatch(&message, &inner.session_id, &self.listeners());
                        }
                    }
                }
                Some(Err(err)) => return AttemptOutcome::Failed(err),
                None => return AttemptOutcome::Ended,
            }
        }
    }

    fn mark_open(&self, generation: u64) -> bool {
        let mut lc = self.lifecycle();
        if lc.generation != generation {
            return false;
        }
        lc.set_state(ConnectionState::Open);
        lc.connected = true;
        lc.reconnect_attempts = 0;
        true
    }

    fn finish_attempt(&self, generation: u64, outcome: AttemptOutcome) {
        let error = match outcome {
            AttemptOutcome::Cancelled => {
                debug!(session_id = %self.inner.session_id, generation, "stream attempt cancelled");
                return;
            }
            AttemptOutcome::Ended => None,
            AttemptOutcome::Failed(err) => Some(err),
        };

        {
            let mut lc = self.lifecycle();
            if lc.generation != generation {
                return;
            }
            lc.abort = None;
            lc.connected = false;
            lc.set_state(ConnectionState::Closed);
        }

        let listeners = self.listeners();
        match &error {
            Some(err) => {
                warn!(session_id = %self.inner.session_id, status = ?err.status(), error = %err, "session stream failed");
                listeners.emit_error(err);
            }
            None => info!(session_id = %self.inner.session_id, "session stream ended"),
        }
        listeners.emit_close();

        self.schedule_reconnect(generation);
    }

    fn schedule_reconnect(&self, generation: u64) {
        let mut lc = self.lifecycle();
        // Disconnected or superseded while the close listeners ran.
        if lc.generation != generation {
            return;
        }
        let policy = &self.inner.policy;
        if !policy.auto_reconnect {
            return;
        }
        if !policy.can_retry(lc.reconnect_attempts) {
            lc.set_state(ConnectionState::Failed);
            warn!(
                session_id = %self.inner.session_id,
                attempts = lc.reconnect_attempts,
                "reconnect attempts exhausted"
            );
            return;
        }

        lc.reconnect_attempts += 1;
        let attempt = lc.reconnect_attempts;
        let delay = policy.delay_for_attempt(attempt);
        lc.next_timer_id += 1;
        let id = lc.next_timer_id;
        let (cancel_tx, cancel_rx) = oneshot::channel();
        lc.timer = Some(ReconnectTimer {
            id,
            _cancel: cancel_tx,
        });
        lc.set_state(ConnectionState::ReconnectScheduled);
        drop(lc);

        info!(
            session_id = %self.inner.session_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );
        let client = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => client.reconnect_from_timer(id).await,
                _ = cancel_rx => {}
            }
        });
    }

    fn reconnect_from_timer(&self, timer_id: u64) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let client = self.clone();
        Box::pin(async move { client.run_attempt(Some(timer_id)).await })
    }
}

/// Runs `fut` unless the attempt is aborted first.
async fn until_aborted<F: Future>(
    abort_rx: &mut watch::Receiver<bool>,
    fut: F,
) -> Option<F::Output> {
    if *abort_rx.borrow_and_update() {
        return None;
    }
    tokio::select! {
        biased;
        // Only `true` is ever sent; a dropped sender also means abort.
        _ = abort_rx.changed() => None,
        output = fut => Some(output),
    }
}

/// Builder for [`StreamingSessionClient`].
pub struct ClientBuilder {
    session_id: String,
    config: Option<ClientConfig>,
    transport: Option<Arc<dyn StreamTransport>>,
    token_supplier: Option<Arc<dyn TokenSupplier>>,
    auth: AuthTokenOptions,
    listeners: Listeners,
    policy: ReconnectPolicy,
}

impl ClientBuilder {
    fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            config: None,
            transport: None,
            token_supplier: None,
            auth: AuthTokenOptions::default(),
            listeners: Listeners::default(),
            policy: ReconnectPolicy::default(),
        }
    }

    /// Backend location. Defaults to `ClientConfig::from_env()`.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replaces the default reqwest transport.
    pub fn transport(mut self, transport: Arc<dyn StreamTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Credential source queried before every attempt. Defaults to no token.
    pub fn token_supplier(mut self, supplier: Arc<dyn TokenSupplier>) -> Self {
        self.token_supplier = Some(supplier);
        self
    }

    pub fn auth_options(mut self, auth: AuthTokenOptions) -> Self {
        self.auth = auth;
        self
    }

    pub fn listeners(mut self, listeners: Listeners) -> Self {
        self.listeners = listeners;
        self
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.policy.auto_reconnect = enabled;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts;
        self
    }

    /// Delay before the first reconnection; doubled per attempt up to 10 s.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.policy.base_delay = delay;
        self
    }

    pub fn build(self) -> Result<StreamingSessionClient, StreamError> {
        let session_id = self.session_id.trim().to_string();
        if session_id.is_empty() {
            return Err(StreamError::Config("session_id must not be empty".into()));
        }
        let config = match self.config {
            Some(config) => config,
            None => ClientConfig::from_env()?,
        };
        config.validate()?;
        let transport: Arc<dyn StreamTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&config)?),
        };
        let token_supplier = self
            .token_supplier
            .unwrap_or_else(|| Arc::new(StaticToken::anonymous()));

        let stream_url = config.stream_url(&session_id)?;

        Ok(StreamingSessionClient {
            inner: Arc::new(ClientInner {
                stream_url,
                session_id,
                auth: self.auth,
                token_supplier,
                transport,
                policy: self.policy,
                listeners: Mutex::new(self.listeners),
                lifecycle: Mutex::new(Lifecycle::new()),
            }),
        })
    }
}
