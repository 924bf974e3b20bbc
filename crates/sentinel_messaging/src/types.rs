//! Message and sender types exchanged across the messaging boundary.
//!
//! Every message is a JSON object with a dot-namespaced `type` string
//! (`"filters.add"`, `"app.listen"`) plus an arbitrary payload. Messages are
//! immutable once dispatched and never persisted.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier of a browser tab.
pub type TabId = i64;

/// A message with a namespaced type and a free-form payload.
///
/// The payload fields are flattened next to `type`, so the wire shape is
/// `{"type": "premium.activate", "userId": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Dot-separated message type, e.g. `"filters.add"`
    #[serde(rename = "type")]
    pub message_type: String,
    /// All remaining fields of the message
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Message {
    /// Creates a message with an empty payload.
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            payload: Map::new(),
        }
    }

    /// Adds a payload field, replacing any previous value under `key`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Returns a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Returns a payload field if it is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Copies this message under a different type, keeping every payload field.
    pub fn retyped(&self, message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            payload: self.payload.clone(),
        }
    }

    /// Splits the type at its first dot into `(namespace, action)`.
    pub fn split_type(&self) -> (&str, Option<&str>) {
        split_type(&self.message_type)
    }

    /// Parses an untyped value into a message.
    ///
    /// Anything that isn't an object with a string `type` is rejected.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let message_type = object.get("type")?.as_str()?.to_string();
        let mut payload = object.clone();
        payload.remove("type");
        Some(Self {
            message_type,
            payload,
        })
    }

    /// Serializes the message back into a JSON object.
    pub fn to_value(&self) -> Value {
        let mut object = self.payload.clone();
        object.insert("type".to_string(), Value::String(self.message_type.clone()));
        Value::Object(object)
    }
}

/// Splits a message type into its namespace and action. Segments after the
/// second dot are dropped, so `a.listen.x` has action `listen`.
pub fn split_type(message_type: &str) -> (&str, Option<&str>) {
    let mut segments = message_type.split('.');
    let namespace = segments.next().unwrap_or(message_type);
    (namespace, segments.next())
}

/// Tab information attached to a sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    pub id: TabId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Descriptor of the context a message or connection originates from.
///
/// Supplied by the native messaging layer. Handlers use it for scoping and
/// authorization decisions; the routing core never mutates it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSender {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab: Option<Tab>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl MessageSender {
    /// A sender with only a URL, as reported for extension pages.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Returns the sender's tab ID, if it has a tab.
    pub fn tab_id(&self) -> Option<TabId> {
        self.tab.as_ref().map(|tab| tab.id)
    }

    /// Strips the sender down to what dispatched handlers may see.
    pub fn scoped(&self) -> Self {
        Self {
            tab: self.tab.clone(),
            frame_id: self.frame_id,
            url: None,
            origin: None,
        }
    }
}

/// Control message asking the router to relay events over a connection.
///
/// Wire shape: `{"type": "<type>.listen", "filter": [...], "tabId": 5}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub filter: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
}

impl ListenMessage {
    /// Interprets a connection message as a listen request.
    ///
    /// Returns `None` unless the message carries a `filter` and its type has
    /// the form `<type>.listen`.
    pub fn parse(value: &Value) -> Option<Self> {
        let message: ListenMessage = serde_json::from_value(value.clone()).ok()?;
        match split_type(&message.message_type) {
            (_, Some("listen")) => Some(message),
            _ => None,
        }
    }

    /// The event type the listener subscribes to.
    pub fn event_type(&self) -> &str {
        split_type(&self.message_type).0
    }
}

/// Event relayed to a subscribed connection.
///
/// Wire shape: `{"type": "<type>.respond", "action": "...", "args": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespondMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub action: String,
    pub args: Vec<Value>,
}

impl RespondMessage {
    pub fn new(event_type: &str, action: &str, args: Vec<Value>) -> Self {
        Self {
            message_type: format!("{event_type}.respond"),
            action: action.to_string(),
            args,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "type": self.message_type,
            "action": self.action,
            "args": self.args,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_flattens_payload_next_to_type() {
        let message = Message::new("premium.activate").with("userId", "abc");
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"type": "premium.activate", "userId": "abc"})
        );
        assert_eq!(message.get_str("userId"), Some("abc"));
    }

    #[test]
    fn from_value_requires_string_type() {
        assert!(Message::from_value(&json!({"type": 5})).is_none());
        assert!(Message::from_value(&json!("filters.add")).is_none());
        assert!(Message::from_value(&json!({"filter": []})).is_none());

        let message = Message::from_value(&json!({"type": "filters.add", "text": "||a^"})).unwrap();
        assert_eq!(message.message_type, "filters.add");
        assert_eq!(message.get_str("text"), Some("||a^"));
        assert_eq!(message.to_value(), json!({"type": "filters.add", "text": "||a^"}));
    }

    #[test]
    fn split_type_keeps_first_two_segments() {
        assert_eq!(split_type("filters.listen"), ("filters", Some("listen")));
        assert_eq!(split_type("a.b.c"), ("a", Some("b")));
        assert_eq!(split_type("plain"), ("plain", None));
        assert_eq!(split_type("trailing."), ("trailing", Some("")));
    }

    #[test]
    fn extra_segments_still_parse_as_listen() {
        let listen = ListenMessage::parse(&json!({
            "type": "filters.listen.extra",
            "filter": ["added"]
        }))
        .unwrap();
        assert_eq!(listen.event_type(), "filters");
        assert_eq!(listen.filter, vec!["added"]);

        assert!(ListenMessage::parse(&json!({"type": "filters.get.listen", "filter": ["added"]})).is_none());
    }

    #[test]
    fn listen_message_parsing() {
        let listen = ListenMessage::parse(&json!({
            "type": "filters.listen",
            "filter": ["added", "removed"],
            "tabId": 7
        }))
        .unwrap();
        assert_eq!(listen.event_type(), "filters");
        assert_eq!(listen.filter, vec!["added", "removed"]);
        assert_eq!(listen.tab_id, Some(7));

        // Not a listen action
        assert!(ListenMessage::parse(&json!({"type": "filters.get", "filter": []})).is_none());
        // Missing filter
        assert!(ListenMessage::parse(&json!({"type": "filters.listen"})).is_none());
    }

    #[test]
    fn respond_message_shape() {
        let respond = RespondMessage::new("filters", "added", vec![json!({"text": "x"})]);
        assert_eq!(
            serde_json::to_value(&respond).unwrap(),
            json!({"type": "filters.respond", "action": "added", "args": [{"text": "x"}]})
        );
        assert_eq!(respond.to_value(), serde_json::to_value(&respond).unwrap());
    }

    #[test]
    fn scoped_sender_drops_location() {
        let sender = MessageSender {
            tab: Some(Tab { id: 3, url: None }),
            frame_id: Some(0),
            url: Some("https://example.com/".to_string()),
            origin: Some("https://example.com".to_string()),
        };
        let scoped = sender.scoped();
        assert_eq!(scoped.tab_id(), Some(3));
        assert_eq!(scoped.frame_id, Some(0));
        assert!(scoped.url.is_none());
        assert!(scoped.origin.is_none());
    }
}
