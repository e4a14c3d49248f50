//! Listener set and message dispatch.
//!
//! Every handler is optional. [`dispatch`] routes a decoded message to the
//! handlers that are registered and applicable, in a fixed priority order.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::errors::StreamError;
use crate::message::{ChatListEventKind, EventKind, SseMessage, StreamEventKind};

type MessageFn = Arc<dyn Fn(&SseMessage) + Send + Sync>;
type TextFn = Arc<dyn Fn(&str) + Send + Sync>;
type ValueFn = Arc<dyn Fn(&Value) + Send + Sync>;
type UnitFn = Arc<dyn Fn() + Send + Sync>;
type ChatFn = Arc<dyn Fn(&str, &Value) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&StreamError) + Send + Sync>;

/// Handlers invoked by the session client.
///
/// Build with the `on_*` methods; pass a partial set to
/// `StreamingSessionClient::update_listeners` to replace only those handlers.
#[derive(Clone, Default)]
pub struct Listeners {
    on_message: Option<MessageFn>,
    on_stream_message: Option<MessageFn>,
    on_stream_token: Option<TextFn>,
    on_stream_tool_call: Option<ValueFn>,
    on_stream_finish_reason: Option<TextFn>,
    on_stream_done: Option<UnitFn>,
    on_stream_error: Option<MessageFn>,
    on_stream_deleted: Option<UnitFn>,
    on_chat_created: Option<ChatFn>,
    on_chat_deleted: Option<TextFn>,
    on_error: Option<ErrorFn>,
    on_open: Option<UnitFn>,
    on_close: Option<UnitFn>,
    on_connected: Option<TextFn>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catch-all for every non-control message, including those also routed
    /// to a specific handler.
    pub fn on_message(mut self, f: impl Fn(&SseMessage) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }

    pub fn on_stream_message(mut self, f: impl Fn(&SseMessage) + Send + Sync + 'static) -> Self {
        self.on_stream_message = Some(Arc::new(f));
        self
    }

    /// Token text; only called when the event carries non-empty data.
    pub fn on_stream_token(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_stream_token = Some(Arc::new(f));
        self
    }

    /// Tool call payload: the event's `data`, or the whole message without it.
    pub fn on_stream_tool_call(mut self, f: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.on_stream_tool_call = Some(Arc::new(f));
        self
    }

    pub fn on_stream_finish_reason(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_stream_finish_reason = Some(Arc::new(f));
        self
    }

    pub fn on_stream_done(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_stream_done = Some(Arc::new(f));
        self
    }

    /// In-band error events. When unset they are folded into `on_error`.
    pub fn on_stream_error(mut self, f: impl Fn(&SseMessage) + Send + Sync + 'static) -> Self {
        self.on_stream_error = Some(Arc::new(f));
        self
    }

    pub fn on_stream_deleted(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_stream_deleted = Some(Arc::new(f));
        self
    }

    /// Chat id and chat payload of a newly created chat.
    pub fn on_chat_created(mut self, f: impl Fn(&str, &Value) + Send + Sync + 'static) -> Self {
        self.on_chat_created = Some(Arc::new(f));
        self
    }

    pub fn on_chat_deleted(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_chat_deleted = Some(Arc::new(f));
        self
    }

    /// Transport failures and folded in-band errors.
    pub fn on_error(mut self, f: impl Fn(&StreamError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_open(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(f));
        self
    }

    pub fn on_close(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(f));
        self
    }

    /// Server acknowledgement of the session, with the acknowledged id.
    pub fn on_connected(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_connected = Some(Arc::new(f));
        self
    }

    /// Replaces every handler that is set in `update`; others are kept.
    pub fn merge(&mut self, update: Listeners) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }
        take(&mut self.on_message, update.on_message);
        take(&mut self.on_stream_message, update.on_stream_message);
        take(&mut self.on_stream_token, update.on_stream_token);
        take(&mut self.on_stream_tool_call, update.on_stream_tool_call);
        take(&mut self.on_stream_finish_reason, update.on_stream_finish_reason);
        take(&mut self.on_stream_done, update.on_stream_done);
        take(&mut self.on_stream_error, update.on_stream_error);
        take(&mut self.on_stream_deleted, update.on_stream_deleted);
        take(&mut self.on_chat_created, update.on_chat_created);
        take(&mut self.on_chat_deleted, update.on_chat_deleted);
        take(&mut self.on_error, update.on_error);
        take(&mut self.on_open, update.on_open);
        take(&mut self.on_close, update.on_close);
        take(&mut self.on_connected, update.on_connected);
    }

    pub(crate) fn emit_open(&self) {
        if let Some(f) = &self.on_open {
            guarded("on_open", || f());
        }
    }

    pub(crate) fn emit_close(&self) {
        if let Some(f) = &self.on_close {
            guarded("on_close", || f());
        }
    }

    pub(crate) fn emit_error(&self, error: &StreamError) {
        if let Some(f) = &self.on_error {
            guarded("on_error", || f(error));
        }
    }

    fn registered(&self) -> Vec<&'static str> {
        let slots: [(&'static str, bool); 14] = [
            ("on_message", self.on_message.is_some()),
            ("on_stream_message", self.on_stream_message.is_some()),
            ("on_stream_token", self.on_stream_token.is_some()),
            ("on_stream_tool_call", self.on_stream_tool_call.is_some()),
            ("on_stream_finish_reason", self.on_stream_finish_reason.is_some()),
            ("on_stream_done", self.on_stream_done.is_some()),
            ("on_stream_error", self.on_stream_error.is_some()),
            ("on_stream_deleted", self.on_stream_deleted.is_some()),
            ("on_chat_created", self.on_chat_created.is_some()),
            ("on_chat_deleted", self.on_chat_deleted.is_some()),
            ("on_error", self.on_error.is_some()),
            ("on_open", self.on_open.is_some()),
            ("on_close", self.on_close.is_some()),
            ("on_connected", self.on_connected.is_some()),
        ];
        slots
            .into_iter()
            .filter_map(|(name, set)| set.then_some(name))
            .collect()
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("registered", &self.registered())
            .finish()
    }
}

/// Routes one decoded message to the applicable handlers.
///
/// Every handler call is isolated: a panicking handler is logged and the
/// remaining handlers for the same message, including the catch-all
/// `on_message`, still run.
pub fn dispatch(message: &SseMessage, session_id: &str, listeners: &Listeners) {
    match message.event_kind() {
        EventKind::Heartbeat => return,
        EventKind::Connected => {
            if let Some(f) = &listeners.on_connected {
                let id = message
                    .chat_id
                    .as_deref()
                    .filter(|id| !id.is_empty())
                    .unwrap_or(session_id);
                guarded("on_connected", || f(id));
            }
            return;
        }
        EventKind::Stream(stream_kind) => route_stream_event(stream_kind, message, listeners),
        EventKind::ChatList(list_kind) => {
            route_chat_list_event(list_kind, message, session_id, listeners)
        }
        EventKind::Other(_) | EventKind::Untyped => {}
    }

    if let Some(f) = &listeners.on_message {
        guarded("on_message", || f(message));
    }
}

fn route_stream_event(kind: StreamEventKind, message: &SseMessage, listeners: &Listeners) {
    match kind {
        StreamEventKind::Message => {
            if let Some(f) = &listeners.on_stream_message {
                guarded("on_stream_message", || f(message));
            }
        }
        StreamEventKind::Token => {
            if let (Some(f), Some(token)) = (&listeners.on_stream_token, message.data_text()) {
                guarded("on_stream_token", || f(&token));
            }
        }
        StreamEventKind::ToolCall => {
            if let Some(f) = &listeners.on_stream_tool_call {
                let call = message.data_or_message();
                guarded("on_stream_tool_call", || f(&call));
            }
        }
        StreamEventKind::FinishReason => {
            if let (Some(f), Some(reason)) =
                (&listeners.on_stream_finish_reason, message.data_text())
            {
                guarded("on_stream_finish_reason", || f(&reason));
            }
        }
        StreamEventKind::Done => {
            if let Some(f) = &listeners.on_stream_done {
                guarded("on_stream_done", || f());
            }
        }
        StreamEventKind::Error => {
            if let Some(f) = &listeners.on_stream_error {
                guarded("on_stream_error", || f(message));
            } else if let Some(f) = &listeners.on_error {
                let error = StreamError::Server(message.error_text());
                guarded("on_error", || f(&error));
            }
        }
        StreamEventKind::Deleted => {
            if let Some(f) = &listeners.on_stream_deleted {
                guarded("on_stream_deleted", || f());
            }
        }
    }
}

fn route_chat_list_event(
    kind: ChatListEventKind,
    message: &SseMessage,
    session_id: &str,
    listeners: &Listeners,
) {
    let chat_id = message.affected_chat_id(session_id);
    match kind {
        ChatListEventKind::ChatCreated => {
            if let Some(f) = &listeners.on_chat_created {
                let chat = message.data_or_message();
                guarded("on_chat_created", || f(&chat_id, &chat));
            }
        }
        ChatListEventKind::ChatDeleted => {
            if let Some(f) = &listeners.on_chat_deleted {
                guarded("on_chat_deleted", || f(&chat_id));
            }
        }
    }
}

fn guarded(label: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(listener = label, "stream listener panicked; continuing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Log(Arc<Mutex<Vec<String>>>);

    impl Log {
        fn push(&self, entry: impl Into<String>) {
            self.0.lock().expect("log").push(entry.into());
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().expect("log").clone()
        }
    }

    fn recording(log: &Log) -> Listeners {
        let l = log.clone();
        let listeners = Listeners::new().on_message(move |m| {
            l.push(format!("message:{}", m.kind.as_deref().unwrap_or("-")))
        });
        let l = log.clone();
        let listeners = listeners.on_stream_message(move |_| l.push("stream_message"));
        let l = log.clone();
        let listeners = listeners.on_stream_token(move |t| l.push(format!("token:{t}")));
        let l = log.clone();
        let listeners = listeners.on_stream_tool_call(move |v| l.push(format!("tool_call:{v}")));
        let l = log.clone();
        let listeners = listeners.on_stream_finish_reason(move |r| l.push(format!("finish:{r}")));
        let l = log.clone();
        let listeners = listeners.on_stream_done(move || l.push("done"));
        let l = log.clone();
        let listeners = listeners.on_stream_deleted(move || l.push("deleted"));
        let l = log.clone();
        let listeners =
            listeners.on_chat_created(move |id, chat| l.push(format!("chat_created:{id}:{chat}")));
        let l = log.clone();
        let listeners = listeners.on_chat_deleted(move |id| l.push(format!("chat_deleted:{id}")));
        let l = log.clone();
        let listeners = listeners.on_error(move |e| l.push(format!("error:{e}")));
        let l = log.clone();
        listeners.on_connected(move |id| l.push(format!("connected:{id}")))
    }

    fn msg(value: serde_json::Value) -> SseMessage {
        serde_json::from_value(value).expect("message")
    }

    #[test]
    fn heartbeat_dispatches_nothing() {
        let log = Log::default();
        dispatch(&msg(json!({"type":"heartbeat"})), "s1", &recording(&log));
        assert!(log.entries().is_empty());
    }

    #[test]
    fn connected_reports_embedded_or_configured_id() {
        let log = Log::default();
        let listeners = recording(&log);
        dispatch(&msg(json!({"type":"connected"})), "s1", &listeners);
        dispatch(&msg(json!({"type":"connected","chatId":"c9"})), "s1", &listeners);
        assert_eq!(log.entries(), vec!["connected:s1", "connected:c9"]);
    }

    #[test]
    fn token_reaches_specific_handler_and_catch_all() {
        let log = Log::default();
        dispatch(&msg(json!({"type":"token","data":"Hi"})), "s1", &recording(&log));
        assert_eq!(log.entries(), vec!["token:Hi", "message:token"]);
    }

    #[test]
    fn token_without_data_only_reaches_catch_all() {
        let log = Log::default();
        dispatch(&msg(json!({"type":"token"})), "s1", &recording(&log));
        assert_eq!(log.entries(), vec!["message:token"]);
    }

    #[test]
    fn tool_call_falls_back_to_whole_message() {
        let log = Log::default();
        let listeners = recording(&log);
        dispatch(&msg(json!({"type":"tool_call","data":{"name":"search"}})), "s1", &listeners);
        dispatch(&msg(json!({"type":"tool_call","name":"lookup"})), "s1", &listeners);
        let entries = log.entries();
        assert_eq!(entries[0], r#"tool_call:{"name":"search"}"#);
        assert!(entries[2].contains(r#""name":"lookup""#));
        assert!(entries[2].contains(r#""type":"tool_call""#));
    }

    #[test]
    fn stream_family_routes_each_kind() {
        let log = Log::default();
        let listeners = recording(&log);
        dispatch(&msg(json!({"type":"message","content":"x"})), "s1", &listeners);
        dispatch(&msg(json!({"type":"finish_reason","data":"stop"})), "s1", &listeners);
        dispatch(&msg(json!({"type":"deleted"})), "s1", &listeners);
        dispatch(&msg(json!({"type":"done"})), "s1", &listeners);
        assert_eq!(
            log.entries(),
            vec![
                "stream_message",
                "message:message",
                "finish:stop",
                "message:finish_reason",
                "deleted",
                "message:deleted",
                "done",
                "message:done",
            ]
        );
    }

    #[test]
    fn stream_error_prefers_specific_handler() {
        let log = Log::default();
        let l = log.clone();
        let listeners = recording(&log).on_stream_error(move |m| {
            l.push(format!("stream_error:{}", m.error_text()))
        });
        dispatch(&msg(json!({"type":"error","data":{"message":"quota"}})), "s1", &listeners);
        assert_eq!(log.entries(), vec!["stream_error:quota", "message:error"]);
    }

    #[test]
    fn stream_error_folds_into_general_error() {
        let log = Log::default();
        dispatch(&msg(json!({"type":"error"})), "s1", &recording(&log));
        assert_eq!(
            log.entries(),
            vec!["error:server error: error in the chat stream", "message:error"]
        );
    }

    #[test]
    fn chat_list_events_resolve_ids() {
        let log = Log::default();
        let listeners = recording(&log);
        dispatch(
            &msg(json!({"type":"chat_created","chatId":"42","data":{"id":"42"}})),
            "s1",
            &listeners,
        );
        dispatch(&msg(json!({"type":"chat_deleted","data":{"id":"7"}})), "s1", &listeners);
        dispatch(&msg(json!({"type":"chat_deleted"})), "s1", &listeners);
        assert_eq!(
            log.entries(),
            vec![
                r#"chat_created:42:{"id":"42"}"#,
                "message:chat_created",
                "chat_deleted:7",
                "message:chat_deleted",
                "chat_deleted:s1",
                "message:chat_deleted",
            ]
        );
    }

    #[test]
    fn unknown_and_untyped_messages_reach_only_catch_all() {
        let log = Log::default();
        let listeners = recording(&log);
        dispatch(&msg(json!({"type":"typing"})), "s1", &listeners);
        dispatch(&msg(json!({"content":"x"})), "s1", &listeners);
        assert_eq!(log.entries(), vec!["message:typing", "message:-"]);
    }

    #[test]
    fn panicking_handler_is_isolated() {
        let log = Log::default();
        let l = log.clone();
        let listeners = Listeners::new()
            .on_stream_token(|_| panic!("listener bug"))
            .on_stream_done(move || l.push("done"));
        dispatch(&msg(json!({"type":"token","data":"x"})), "s1", &listeners);
        dispatch(&msg(json!({"type":"done"})), "s1", &listeners);
        assert_eq!(log.entries(), vec!["done"]);
    }

    #[test]
    fn catch_all_runs_after_a_panicking_specific_handler() {
        let log = Log::default();
        let (a, b) = (log.clone(), log.clone());
        let listeners = Listeners::new()
            .on_chat_created(|_, _| panic!("listener bug"))
            .on_stream_token(|_| panic!("listener bug"))
            .on_message(move |m| a.push(format!("message:{}", m.kind.as_deref().unwrap_or("-"))))
            .on_chat_deleted(move |id| b.push(format!("deleted:{id}")));
        dispatch(&msg(json!({"type":"token","data":"x"})), "s1", &listeners);
        dispatch(&msg(json!({"type":"chat_created","chatId":"c"})), "s1", &listeners);
        dispatch(&msg(json!({"type":"chat_deleted","chatId":"c"})), "s1", &listeners);
        assert_eq!(
            log.entries(),
            vec![
                "message:token",
                "message:chat_created",
                "deleted:c",
                "message:chat_deleted"
            ]
        );
    }

    #[test]
    fn merge_replaces_only_provided_handlers() {
        let log = Log::default();
        let mut listeners = recording(&log);
        let l = log.clone();
        listeners.merge(Listeners::new().on_stream_done(move || l.push("done-v2")));
        dispatch(&msg(json!({"type":"done"})), "s1", &listeners);
        dispatch(&msg(json!({"type":"token","data":"a"})), "s1", &listeners);
        assert_eq!(
            log.entries(),
            vec!["done-v2", "message:done", "token:a", "message:token"]
        );
    }

    #[test]
    fn debug_lists_registered_handlers() {
        let listeners = Listeners::new().on_open(|| {}).on_close(|| {});
        let rendered = format!("{listeners:?}");
        assert!(rendered.contains("on_open"));
        assert!(rendered.contains("on_close"));
        assert!(!rendered.contains("on_error"));
    }
}
