use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WebSocketError;

/// An opaque signaling payload.
///
/// The relay never looks inside: any JSON object is accepted and forwarded
/// verbatim, so new WebRTC negotiation kinds need no server change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalMessage(Map<String, Value>);

impl SignalMessage {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Decodes one text frame. Anything other than a JSON object is rejected.
    pub fn from_text(text: &str) -> Result<Self, WebSocketError> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(fields)) => Ok(Self(fields)),
            Ok(other) => Err(WebSocketError::InvalidFormat(format!(
                "expected a JSON object, got {}",
                kind_of(&other)
            ))),
            Err(e) => Err(WebSocketError::InvalidFormat(e.to_string())),
        }
    }

    pub fn to_text(&self) -> Result<String, WebSocketError> {
        serde_json::to_string(&self.0)
            .map_err(|e| WebSocketError::InvalidFormat(format!("Failed to serialize message: {}", e)))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl TryFrom<Value> for SignalMessage {
    type Error = WebSocketError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(WebSocketError::InvalidFormat(format!(
                "expected a JSON object, got {}",
                kind_of(&other)
            ))),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accepts_any_object() {
        let msg = SignalMessage::from_text(r#"{"type":"offer","sdp":"v=0","extra":{"n":[1,2]}}"#).unwrap();
        assert_eq!(msg.get("type"), Some(&json!("offer")));
        assert_eq!(msg.get("extra"), Some(&json!({"n": [1, 2]})));
    }

    #[test]
    fn test_rejects_non_objects() {
        for text in ["[1,2,3]", "\"offer\"", "42", "null", "not json", ""] {
            let result = SignalMessage::from_text(text);
            assert!(
                matches!(result, Err(WebSocketError::InvalidFormat(_))),
                "expected {:?} to be rejected",
                text
            );
        }
    }

    #[test]
    fn test_payload_is_relayed_verbatim() {
        let original = json!({"type": "candidate", "candidate": {"sdpMid": "0", "sdpMLineIndex": 0}});
        let msg = SignalMessage::try_from(original.clone()).unwrap();
        let reparsed: Value = serde_json::from_str(&msg.to_text().unwrap()).unwrap();
        assert_eq!(reparsed, original);
    }
}
