use std::fmt;

use serde_json::{Map, Value};

/// Default text used when an in-band error event carries no message.
pub(crate) const DEFAULT_SERVER_ERROR: &str = "error in the chat stream";

/// One decoded `data: ` record from the session stream.
///
/// Known fields are lifted into typed members; everything else is preserved in
/// `extra` so callers can inspect vendor-specific additions. Lifted fields
/// never reject a record: ids accept strings or numbers, text fields drop
/// non-string values, and `content`/`createdAt` keep whatever JSON was sent.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SseMessage {
    #[serde(default, deserialize_with = "lenient_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Discriminator (`token`, `done`, `chat_created`, ...).
    #[serde(
        rename = "type",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Message body; plain text or structured parts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    /// Author role (`user`, `assistant`, `system`). Unknown roles are kept as-is.
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(
        rename = "chatId",
        default,
        deserialize_with = "lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub chat_id: Option<String>,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = <Option<Value> as serde::Deserialize>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(id_text))
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match <Option<Value> as serde::Deserialize>::deserialize(deserializer)? {
        Some(Value::String(text)) => Ok(Some(text)),
        _ => Ok(None),
    }
}

impl SseMessage {
    /// Returns the classified kind of this message.
    pub fn event_kind(&self) -> EventKind {
        EventKind::classify(self.kind.as_deref())
    }

    /// Returns the whole message as a JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Returns `data` when it is present and not null, otherwise the whole
    /// message as a JSON value.
    pub(crate) fn data_or_message(&self) -> Value {
        match self.data.as_ref() {
            Some(value) if is_truthy(value) => value.clone(),
            _ => self.to_value(),
        }
    }

    /// Returns `data` rendered as text when it carries a usable value.
    ///
    /// Strings pass through unchanged; other non-empty values are rendered as
    /// JSON text.
    pub(crate) fn data_text(&self) -> Option<String> {
        match self.data.as_ref()? {
            Value::String(text) if !text.is_empty() => Some(text.clone()),
            Value::String(_) => None,
            value if is_truthy(value) => Some(value.to_string()),
            _ => None,
        }
    }

    /// Resolves the chat affected by a session-list event: `chatId`, then
    /// `data.id`, then the supplied fallback.
    pub(crate) fn affected_chat_id(&self, fallback: &str) -> String {
        if let Some(chat_id) = self.chat_id.as_deref().filter(|id| !id.is_empty()) {
            return chat_id.to_string();
        }
        if let Some(id) = self.data.as_ref().and_then(|data| data.get("id")).and_then(id_text) {
            return id;
        }
        fallback.to_string()
    }

    /// Resolves the human-readable text carried by an in-band error event.
    pub(crate) fn error_text(&self) -> String {
        self.data
            .as_ref()
            .and_then(|data| data.get("message"))
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
            .or_else(|| {
                self.extra
                    .get("message")
                    .and_then(Value::as_str)
                    .filter(|text| !text.is_empty())
            })
            .unwrap_or(DEFAULT_SERVER_ERROR)
            .to_string()
    }
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.is_empty(),
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Events describing the lifecycle of one assistant turn.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StreamEventKind {
    Message,
    Token,
    ToolCall,
    FinishReason,
    Done,
    Error,
    Deleted,
}

impl StreamEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Token => "token",
            Self::ToolCall => "tool_call",
            Self::FinishReason => "finish_reason",
            Self::Done => "done",
            Self::Error => "error",
            Self::Deleted => "deleted",
        }
    }
}

/// Out-of-band mutations to the set of chats.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ChatListEventKind {
    ChatCreated,
    ChatDeleted,
}

impl ChatListEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChatCreated => "chat_created",
            Self::ChatDeleted => "chat_deleted",
        }
    }
}

/// Classification of a message discriminator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EventKind {
    /// Liveness ping; never dispatched.
    Heartbeat,
    /// Server acknowledgement of the logical session.
    Connected,
    Stream(StreamEventKind),
    ChatList(ChatListEventKind),
    /// Discriminator outside the known families; only the catch-all sees it.
    Other(String),
    /// Message without a `type` field.
    Untyped,
}

impl EventKind {
    pub fn classify(kind: Option<&str>) -> Self {
        let Some(kind) = kind else {
            return Self::Untyped;
        };
        match kind {
            "heartbeat" => Self::Heartbeat,
            "connected" => Self::Connected,
            "message" => Self::Stream(StreamEventKind::Message),
            "token" => Self::Stream(StreamEventKind::Token),
            "tool_call" => Self::Stream(StreamEventKind::ToolCall),
            "finish_reason" => Self::Stream(StreamEventKind::FinishReason),
            "done" => Self::Stream(StreamEventKind::Done),
            "error" => Self::Stream(StreamEventKind::Error),
            "deleted" => Self::Stream(StreamEventKind::Deleted),
            "chat_created" => Self::ChatList(ChatListEventKind::ChatCreated),
            "chat_deleted" => Self::ChatList(ChatListEventKind::ChatDeleted),
            other => Self::Other(other.to_string()),
        }
    }

    /// Control-plane messages are consumed by the client and never reach the
    /// catch-all listener.
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Heartbeat | Self::Connected)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Heartbeat => f.write_str("heartbeat"),
            Self::Connected => f.write_str("connected"),
            Self::Stream(kind) => f.write_str(kind.as_str()),
            Self::ChatList(kind) => f.write_str(kind.as_str()),
            Self::Other(kind) => f.write_str(kind),
            Self::Untyped => f.write_str("<untyped>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(value: Value) -> SseMessage {
        serde_json::from_value(value).expect("message")
    }

    #[test]
    fn known_fields_are_lifted_and_extras_preserved() {
        let msg = message(json!({
            "id": "m1",
            "type": "message",
            "content": "hello",
            "role": "assistant",
            "chatId": "c1",
            "createdAt": "2024-01-01T00:00:00Z",
            "model": "small"
        }));
        assert_eq!(msg.kind.as_deref(), Some("message"));
        assert_eq!(msg.chat_id.as_deref(), Some("c1"));
        assert_eq!(msg.role.as_deref(), Some("assistant"));
        assert_eq!(msg.extra.get("model"), Some(&json!("small")));
        assert_eq!(msg.to_value()["chatId"], json!("c1"));
        assert_eq!(msg.content, Some(json!("hello")));
    }

    #[test]
    fn non_string_fields_do_not_reject_the_record() {
        let msg = message(json!({
            "id": 17,
            "type": "message",
            "chatId": 42,
            "content": [{"type": "text", "text": "hi"}],
            "role": 3,
            "createdAt": 1700000000
        }));
        assert_eq!(msg.id.as_deref(), Some("17"));
        assert_eq!(msg.chat_id.as_deref(), Some("42"));
        assert_eq!(msg.content, Some(json!([{"type": "text", "text": "hi"}])));
        assert_eq!(msg.role, None);
        assert_eq!(msg.created_at, Some(json!(1700000000)));
        assert_eq!(msg.affected_chat_id("fallback"), "42");

        let odd_type = message(json!({"type": 5, "data": "x"}));
        assert_eq!(odd_type.event_kind(), EventKind::Untyped);
    }

    #[test]
    fn classify_covers_both_families_and_controls() {
        assert_eq!(EventKind::classify(Some("heartbeat")), EventKind::Heartbeat);
        assert_eq!(
            EventKind::classify(Some("tool_call")),
            EventKind::Stream(StreamEventKind::ToolCall)
        );
        assert_eq!(
            EventKind::classify(Some("chat_deleted")),
            EventKind::ChatList(ChatListEventKind::ChatDeleted)
        );
        assert_eq!(
            EventKind::classify(Some("typing")),
            EventKind::Other("typing".into())
        );
        assert_eq!(EventKind::classify(None), EventKind::Untyped);
        assert!(EventKind::Connected.is_control());
        assert!(!EventKind::Stream(StreamEventKind::Done).is_control());
    }

    #[test]
    fn affected_chat_id_prefers_chat_id_then_data_id() {
        let msg = message(json!({"type":"chat_deleted","chatId":"a","data":{"id":"b"}}));
        assert_eq!(msg.affected_chat_id("s"), "a");
        let msg = message(json!({"type":"chat_deleted","data":{"id":7}}));
        assert_eq!(msg.affected_chat_id("s"), "7");
        let msg = message(json!({"type":"chat_deleted","chatId":""}));
        assert_eq!(msg.affected_chat_id("s"), "s");
    }

    #[test]
    fn error_text_falls_back_in_order() {
        let msg = message(json!({"type":"error","data":{"message":"quota"},"message":"outer"}));
        assert_eq!(msg.error_text(), "quota");
        let msg = message(json!({"type":"error","message":"outer"}));
        assert_eq!(msg.error_text(), "outer");
        let msg = message(json!({"type":"error"}));
        assert_eq!(msg.error_text(), DEFAULT_SERVER_ERROR);
    }

    #[test]
    fn data_text_skips_empty_values() {
        assert_eq!(message(json!({"data":"Hi"})).data_text().as_deref(), Some("Hi"));
        assert_eq!(message(json!({"data":""})).data_text(), None);
        assert_eq!(message(json!({"data":null})).data_text(), None);
        assert_eq!(message(json!({})).data_text(), None);
        assert_eq!(message(json!({"data":{"a":1}})).data_text().as_deref(), Some(r#"{"a":1}"#));
    }
}
