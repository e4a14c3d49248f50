//! Process-wide tracing setup for binaries and demos built on this crate.
//!
//! Library code only emits `tracing` events; nothing is printed unless a
//! subscriber is installed, either by the host application or through
//! [`init_observability`].

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

pub const OBSERVABILITY_ENABLED_ENV: &str = "CHAT_STREAM_OBSERVABILITY_ENABLED";
pub const OBSERVABILITY_ENV: &str = "CHAT_STREAM_OBSERVABILITY";
pub const LOG_LEVEL_ENV: &str = "CHAT_STREAM_LOG_LEVEL";
pub const JSON_LOG_PATH_ENV: &str = "CHAT_STREAM_JSON_LOG_PATH";

const DEFAULT_JSON_LOG_FILE: &str = "chat-stream.logs.jsonl";

static INIT: OnceCell<()> = OnceCell::new();

/// Where log records go.
#[derive(Clone, Debug, PartialEq, Eq)]
enum LogTarget {
    Disabled,
    /// Compact human-readable lines on stderr, keeping stdout for event output.
    Console,
    /// JSON lines appended to a file.
    JsonFile { dir: PathBuf, file_name: String },
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn resolve_target(lookup: impl Fn(&str) -> Option<String>) -> LogTarget {
    let enabled = [OBSERVABILITY_ENABLED_ENV, OBSERVABILITY_ENV]
        .into_iter()
        .find_map(|key| lookup(key))
        .map(|value| parse_bool_env(&value).unwrap_or(true))
        .unwrap_or(true);
    if !enabled {
        return LogTarget::Disabled;
    }

    match lookup(JSON_LOG_PATH_ENV).filter(|p| !p.trim().is_empty()) {
        Some(raw) => {
            let path = PathBuf::from(raw.trim());
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."))
                .to_path_buf();
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(DEFAULT_JSON_LOG_FILE)
                .to_string();
            LogTarget::JsonFile { dir, file_name }
        }
        None => LogTarget::Console,
    }
}

fn resolve_env_filter() -> EnvFilter {
    if let Ok(level) = std::env::var(LOG_LEVEL_ENV)
        && let Ok(filter) = EnvFilter::try_new(level)
    {
        return filter;
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize logging once per process.
///
/// Environment variables:
/// - `CHAT_STREAM_OBSERVABILITY_ENABLED` / `CHAT_STREAM_OBSERVABILITY`: optional enable/disable flag (default enabled).
/// - `CHAT_STREAM_LOG_LEVEL`: optional level/filter override (`info`, `chat_stream=debug`, etc.).
/// - `CHAT_STREAM_JSON_LOG_PATH`: optional log file path. If set, logs are JSONL in that file.
///   If unset, logs go to stderr in a compact console format.
/// - `RUST_LOG`: optional filter override.
///
/// Installation failures (for example another global subscriber) are ignored.
pub fn init_observability() {
    INIT.get_or_init(|| {
        let target = resolve_target(|key| std::env::var(key).ok());
        let env_filter = resolve_env_filter();
        match target {
            LogTarget::Disabled => {}
            LogTarget::JsonFile { dir, file_name } => {
                let _ = std::fs::create_dir_all(&dir);
                let writer = tracing_appender::rolling::never(dir, file_name);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(false)
                    .with_writer(writer);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(json_layer)
                    .try_init();
            }
            LogTarget::Console => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}
