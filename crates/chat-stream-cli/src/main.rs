//! Tail the event stream of one chat session.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chat_stream::EventKind;
use chat_stream::observability::init_observability;
use chat_stream::prelude::*;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

/// chat-stream-tail: print the live events of a chat session
#[derive(Debug, Parser)]
#[command(name = "chat-stream-tail")]
struct Cli {
    /// Chat session to subscribe to.
    session_id: String,

    /// Chat API base URL.
    #[arg(long, env = chat_stream::config::API_URL_ENV)]
    base_url: String,

    /// Bearer token sent with every connection attempt.
    #[arg(long, env = "CHAT_STREAM_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Token template forwarded to the credential issuer.
    #[arg(long)]
    template: Option<String>,

    /// Token audience; repeat for several.
    #[arg(long = "audience")]
    audiences: Vec<String>,

    /// Automatic reconnections before giving up.
    #[arg(long, default_value_t = 5)]
    max_reconnect_attempts: u32,

    /// Delay before the first reconnection, doubled per attempt.
    #[arg(long, default_value_t = 1000)]
    reconnect_delay_ms: u64,

    /// Stop after the first stream ends instead of reconnecting.
    #[arg(long)]
    no_reconnect: bool,
}

impl Cli {
    fn auth_options(&self) -> AuthTokenOptions {
        let mut options = AuthTokenOptions::default();
        if let Some(template) = &self.template {
            options = options.template(template.clone());
        }
        match self.audiences.as_slice() {
            [] => {}
            [one] => options = options.audience(one.clone()),
            many => options = options.audience(many.to_vec()),
        }
        options
    }

    fn reconnect_policy(&self) -> ReconnectPolicy {
        let policy = if self.no_reconnect {
            ReconnectPolicy::disabled()
        } else {
            ReconnectPolicy::default()
        };
        policy
            .with_max_attempts(self.max_reconnect_attempts)
            .with_base_delay(Duration::from_millis(self.reconnect_delay_ms))
    }
}

fn print_listeners() -> Listeners {
    Listeners::new()
        .on_stream_token(|token| {
            print!("{token}");
            let _ = std::io::stdout().flush();
        })
        .on_stream_done(|| println!())
        .on_stream_message(|message| println!("[message] {}", message.to_value()))
        .on_stream_tool_call(|call| println!("[tool_call] {call}"))
        .on_stream_finish_reason(|reason| println!("[finish_reason] {reason}"))
        .on_stream_deleted(|| println!("[deleted]"))
        .on_chat_created(|id, chat| println!("[chat_created] {id} {chat}"))
        .on_chat_deleted(|id| println!("[chat_deleted] {id}"))
        .on_connected(|id| println!("[connected] {id}"))
        .on_message(|message| {
            // typed events already have their own line
            if matches!(message.event_kind(), EventKind::Other(_) | EventKind::Untyped) {
                println!("{}", message.to_value());
            }
        })
        .on_error(|err| eprintln!("error: {err}"))
}

fn build_client(cli: &Cli) -> Result<StreamingSessionClient, StreamError> {
    let supplier: Arc<dyn TokenSupplier> = match &cli.token {
        Some(token) => Arc::new(StaticToken::new(token.clone())),
        None => Arc::new(StaticToken::anonymous()),
    };
    StreamingSessionClient::builder(cli.session_id.clone())
        .config(ClientConfig::new(cli.base_url.clone()))
        .token_supplier(supplier)
        .auth_options(cli.auth_options())
        .reconnect_policy(cli.reconnect_policy())
        .listeners(print_listeners())
        .build()
}

/// Resolves once the client will not reconnect on its own.
///
/// Runs on the current-thread runtime, so the transient `Closed` between an
/// attempt ending and its reconnect being scheduled is never observed.
async fn settled(mut states: watch::Receiver<ConnectionState>) {
    let _ = states
        .wait_for(|state| matches!(state, ConnectionState::Closed | ConnectionState::Failed))
        .await;
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_observability();

    let client = build_client(&cli)?;
    let runner = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!(session_id = %client.session_id(), "interrupted");
        }
        _ = settled(client.watch_state()) => {
            info!(session_id = %client.session_id(), state = ?client.state(), "stream finished");
        }
    }

    client.disconnect();
    let _ = runner.await;
    Ok(())
}
