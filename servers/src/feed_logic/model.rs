use lib_feed::{FeedValue, ResourceKey, Telemetry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySpec {
    pub instrument: String,
    pub metric: String,
}

impl KeySpec {
    pub fn to_key(&self) -> ResourceKey {
        ResourceKey::new(&self.instrument, &self.metric)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientMessage {
    pub subscribe: Option<Vec<KeySpec>>,
    pub unsubscribe: Option<Vec<KeySpec>>,
    pub toggle: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerMessage {
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<bool>,
}

impl ServerMessage {
    fn new(kind: &str, message: Option<Value>, error: Option<String>, ack: Option<bool>) -> Self {
        Self {
            r#type: kind.to_string(),
            message,
            error,
            ack,
        }
    }

    pub fn ack(message: Value) -> Self {
        Self::new("ack", Some(message), None, Some(true))
    }

    pub fn value(key: &ResourceKey, value: &FeedValue) -> Self {
        Self::new(
            "value",
            Some(json!({
                "instrument": key.instrument,
                "metric": key.metric,
                "value": value,
            })),
            None,
            None,
        )
    }

    pub fn status(key: &ResourceKey, label: &str) -> Self {
        Self::new(
            "status",
            Some(json!({
                "instrument": key.instrument,
                "metric": key.metric,
                "status": label,
            })),
            None,
            None,
        )
    }

    pub fn telemetry(telemetry: &Telemetry) -> Self {
        Self::new("telemetry", serde_json::to_value(telemetry).ok(), None, None)
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::new("error", None, Some(error.into()), Some(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_feed::Placeholder;

    #[test]
    fn test_client_message_parses_partial_requests() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"subscribe":[{"instrument":"btcusdt","metric":"price"}]}"#).unwrap();
        let keys: Vec<ResourceKey> = msg.subscribe.unwrap().iter().map(KeySpec::to_key).collect();
        assert_eq!(keys, vec![ResourceKey::new("BTCUSDT", "price")]);
        assert!(msg.unsubscribe.is_none());

        let msg: ClientMessage = serde_json::from_str(r#"{"toggle":true}"#).unwrap();
        assert_eq!(msg.toggle, Some(true));
    }

    #[test]
    fn test_server_message_shapes() {
        let key = ResourceKey::new("ETHUSDT", "lastPrice");
        let value = serde_json::to_value(ServerMessage::value(&key, &FeedValue::Number(3120.5))).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "value",
                "message": {
                    "instrument": "ETHUSDT",
                    "metric": "lastPrice",
                    "value": {"kind": "number", "value": 3120.5}
                }
            })
        );

        let resolving = FeedValue::Placeholder(Placeholder::Resolving);
        let value = serde_json::to_value(ServerMessage::value(&key, &resolving)).unwrap();
        assert_eq!(value["message"]["value"]["value"]["reason"], "resolving");

        let value = serde_json::to_value(ServerMessage::error("bad request")).unwrap();
        assert_eq!(value, json!({"type": "error", "error": "bad request", "ack": false}));
    }
}
