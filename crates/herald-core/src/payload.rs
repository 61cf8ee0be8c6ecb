//! The notification payload type.
//!
//! A [`NotificationPayload`] is the key/value data of one push event. Keys keep
//! their insertion order so the wire form matches what the transport handed in.
//!
//! ```rust,ignore
//! use herald_core::NotificationPayload;
//!
//! let payload = NotificationPayload::new()
//!     .with("message", "hi")
//!     .with("badge", 3);
//!
//! assert_eq!(payload.to_string(), r#"{"message":"hi","badge":3}"#);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PayloadError;

/// Key set on a payload replayed because the user tapped its notification.
pub const CLICKED_KEY: &str = "_notificationClicked";

/// Key conventionally carrying the notification text.
pub const MESSAGE_KEY: &str = "message";

/// One push event's key/value data.
///
/// Serializes as a plain JSON object. `Display` produces the compact wire form
/// pushed to listeners. A received payload is never edited in place; the
/// consuming builders return a new value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationPayload(Map<String, Value>);

impl NotificationPayload {
    /// Creates an empty payload.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wraps an existing JSON map.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Builds a payload from key/value pairs, e.g. the extras of a launch intent.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Converts a JSON value, accepting only objects.
    pub fn from_value(value: Value) -> Result<Self, PayloadError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(PayloadError::NotAnObject {
                kind: json_kind(&other),
            }),
        }
    }

    /// Parses raw JSON bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, PayloadError> {
        Self::from_value(serde_json::from_slice(data)?)
    }

    /// Parses a JSON string.
    pub fn from_json_str(data: &str) -> Result<Self, PayloadError> {
        Self::from_value(serde_json::from_str(data)?)
    }

    /// Adds a field (builder pattern).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns the value for `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns the `message` field when it is a string.
    pub fn message(&self) -> Option<&str> {
        self.get(MESSAGE_KEY).and_then(Value::as_str)
    }

    /// Marks this payload as coming from a notification tap.
    pub fn mark_clicked(mut self) -> Self {
        self.0.insert(CLICKED_KEY.to_string(), Value::Bool(true));
        self
    }

    /// Whether this payload was marked by [`mark_clicked`](Self::mark_clicked).
    pub fn is_clicked(&self) -> bool {
        matches!(self.get(CLICKED_KEY), Some(Value::Bool(true)))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrows the underlying map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Converts into a JSON object value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl fmt::Display for NotificationPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(&self.0).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl From<Map<String, Value>> for NotificationPayload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_form_keeps_insertion_order() {
        let payload = NotificationPayload::new()
            .with("zeta", 1)
            .with("alpha", "two")
            .with("mid", true);

        assert_eq!(payload.to_string(), r#"{"zeta":1,"alpha":"two","mid":true}"#);
    }

    #[test]
    fn test_from_pairs() {
        let payload = NotificationPayload::from_pairs([("message", "hi"), ("title", "Herald")]);
        assert_eq!(payload.message(), Some("hi"));
        assert_eq!(payload.len(), 2);
    }

    #[test]
    fn test_rejects_non_objects() {
        let err = NotificationPayload::from_slice(b"[1,2,3]").unwrap_err();
        assert!(matches!(err, PayloadError::NotAnObject { kind: "array" }));

        let err = NotificationPayload::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, PayloadError::InvalidJson(_)));
    }

    #[test]
    fn test_mark_clicked() {
        let payload = NotificationPayload::new().with("message", "tap me");
        assert!(!payload.is_clicked());

        let clicked = payload.mark_clicked();
        assert!(clicked.is_clicked());
        assert_eq!(clicked.get(CLICKED_KEY), Some(&json!(true)));
    }

    #[test]
    fn test_click_marking_leaves_received_copy_untouched() {
        let received = NotificationPayload::from_pairs([("message", "hi")]);
        let clicked = received.clone().mark_clicked();

        assert_eq!(received.to_string(), r#"{"message":"hi"}"#);
        assert_eq!(clicked.len(), received.len() + 1);
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let payload = NotificationPayload::new().with("message", "hi");
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value, json!({ "message": "hi" }));
    }
}
