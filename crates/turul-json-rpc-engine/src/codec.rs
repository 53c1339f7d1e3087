//! JSON-RPC grammar: raw payloads to [`Message`]s and back.
//!
//! Parsing never fails. Anything that is not a JSON-RPC envelope becomes a
//! [`Message::Invalid`] carrying the error object the peer should receive.

use serde_json::{Map, Value};

use crate::{
    error::{JsonRpcError, JsonRpcErrorObject},
    message::Message,
    notification::JsonRpcNotification,
    request::JsonRpcRequest,
    response::JsonRpcResponse,
};

/// Result of parsing one inbound payload
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Single(Message),
    /// A JSON array of envelopes, in order
    Batch(Vec<Message>),
}

impl Payload {
    pub fn is_batch(&self) -> bool {
        matches!(self, Payload::Batch(_))
    }

    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Payload::Single(message) => vec![message],
            Payload::Batch(messages) => messages,
        }
    }
}

/// Parse raw bytes (UTF-8 JSON)
pub fn parse_slice(bytes: &[u8]) -> Payload {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => parse_value(value),
        Err(e) => Payload::Single(Message::Invalid(JsonRpcErrorObject::parse_error(
            e.to_string(),
        ))),
    }
}

pub fn parse_str(text: &str) -> Payload {
    parse_slice(text.as_bytes())
}

/// Parse an already-decoded JSON value (object passthrough)
pub fn parse_value(value: Value) -> Payload {
    match value {
        Value::Array(items) if items.is_empty() => Payload::Single(Message::Invalid(
            JsonRpcErrorObject::invalid_request("empty batch"),
        )),
        Value::Array(items) => Payload::Batch(items.into_iter().map(parse_envelope).collect()),
        other => Payload::Single(parse_envelope(other)),
    }
}

/// Classify a single envelope
pub fn parse_envelope(value: Value) -> Message {
    let Value::Object(obj) = value else {
        return invalid("envelope must be a JSON object");
    };

    match obj.get("jsonrpc") {
        Some(Value::String(v)) if v == crate::JSONRPC_VERSION => {}
        Some(_) => return invalid("jsonrpc member must be \"2.0\""),
        None => return invalid("missing jsonrpc member"),
    }

    if obj.contains_key("method") {
        parse_call(obj)
    } else if obj.contains_key("result") {
        if obj.contains_key("error") {
            return invalid("response carries both result and error");
        }
        require_id(&obj, "success response")
            .and_then(|_| decode::<JsonRpcResponse>(obj, "success response"))
            .map_or_else(|e| e, Message::Success)
    } else if obj.contains_key("error") {
        decode::<JsonRpcError>(obj, "error response").map_or_else(|e| e, Message::Error)
    } else {
        invalid("envelope is neither a call nor a response")
    }
}

fn parse_call(obj: Map<String, Value>) -> Message {
    if !obj.get("method").is_some_and(Value::is_string) {
        return invalid("method must be a string");
    }
    let params_ok = obj
        .get("params")
        .is_none_or(|params| params.is_object() || params.is_array());
    if !params_ok {
        return invalid("params must be an object or an array");
    }

    if obj.contains_key("id") {
        decode::<JsonRpcRequest>(obj, "request").map_or_else(|e| e, Message::Request)
    } else {
        decode::<JsonRpcNotification>(obj, "notification").map_or_else(|e| e, Message::Notification)
    }
}

fn require_id(obj: &Map<String, Value>, what: &str) -> Result<(), Message> {
    match obj.get("id") {
        Some(Value::Number(_)) | Some(Value::String(_)) => Ok(()),
        _ => Err(invalid(format!("{} requires a number or string id", what))),
    }
}

fn decode<T: serde::de::DeserializeOwned>(obj: Map<String, Value>, what: &str) -> Result<T, Message> {
    serde_json::from_value(Value::Object(obj))
        .map_err(|e| invalid(format!("malformed {}: {}", what, e)))
}

fn invalid(reason: impl Into<String>) -> Message {
    Message::Invalid(JsonRpcErrorObject::invalid_request(reason))
}

/// Serialize one message to its wire text
pub fn to_string(message: &Message) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

/// The reply the engine sends for an invalid inbound message
pub fn invalid_reply(reason: &JsonRpcErrorObject) -> Message {
    Message::Error(JsonRpcError::new(None, reason.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestId;
    use serde_json::json;

    fn single(text: &str) -> Message {
        match parse_str(text) {
            Payload::Single(message) => message,
            Payload::Batch(_) => panic!("expected a single message"),
        }
    }

    #[test]
    fn test_parse_request_and_notification() {
        let request = single(r#"{"jsonrpc":"2.0","id":1,"method":"hello","params":{"name":"world"}}"#);
        match request {
            Message::Request(req) => {
                assert_eq!(req.id, RequestId::Number(1));
                assert_eq!(req.get_param("name"), Some(&json!("world")));
            }
            other => panic!("expected request, got {:?}", other),
        }

        let notification = single(r#"{"jsonrpc":"2.0","method":"tick"}"#);
        assert!(matches!(notification, Message::Notification(ref n) if n.method == "tick"));
    }

    #[test]
    fn test_parse_responses() {
        let success = single(r#"{"jsonrpc":"2.0","id":5,"result":null}"#);
        assert!(matches!(success, Message::Success(ref r) if r.result.is_null()));

        let error = single(r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}"#);
        match error {
            Message::Error(err) => {
                assert_eq!(err.id, None);
                assert_eq!(err.error.code, -32700);
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        match single(r#"{"jsonrpc": "2.0", "method": "test""#) {
            Message::Invalid(reason) => assert_eq!(reason.code, -32700),
            other => panic!("expected invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_shape_errors_are_invalid_request() {
        for text in [
            r#"{"jsonrpc":"1.0","method":"x","id":1}"#,
            r#"{"method":"x","id":1}"#,
            r#"{"jsonrpc":"2.0","method":5}"#,
            r#"{"jsonrpc":"2.0","method":"x","params":3}"#,
            r#"{"jsonrpc":"2.0","id":1}"#,
            r#"{"jsonrpc":"2.0","result":1}"#,
            r#"42"#,
            r#"[]"#,
        ] {
            match single(text) {
                Message::Invalid(reason) => assert_eq!(reason.code, -32600, "{}", text),
                other => panic!("expected invalid for {}, got {:?}", text, other),
            }
        }
    }

    #[test]
    fn test_batch_keeps_order_and_marks_bad_entries() {
        let payload = parse_str(
            r#"[{"jsonrpc":"2.0","id":1,"method":"a"},1,{"jsonrpc":"2.0","method":"b"}]"#,
        );
        assert!(payload.is_batch());
        let messages = payload.into_messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].method(), Some("a"));
        assert!(matches!(messages[1], Message::Invalid(_)));
        assert_eq!(messages[2].method(), Some("b"));
    }

    #[test]
    fn test_serialize_then_parse_preserves_content() {
        let originals = vec![
            json!({"jsonrpc":"2.0","id":1,"method":"hello","params":{"name":"world"}}),
            json!({"jsonrpc":"2.0","method":"tick","params":[1,2]}),
            json!({"jsonrpc":"2.0","id":"abc","result":{"ok":true}}),
            json!({"jsonrpc":"2.0","id":3,"error":{"code":-32601,"message":"Method not found","data":{"m":"x"}}}),
        ];
        for original in originals {
            let message = parse_envelope(original.clone());
            let text = to_string(&message).unwrap();
            let reparsed: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(reparsed, original);
        }

        let invalid = single("not json");
        let Message::Invalid(reason) = invalid.clone() else {
            panic!("expected invalid");
        };
        let text = to_string(&invalid).unwrap();
        match single(&text) {
            Message::Error(err) => {
                assert_eq!(err.id, None);
                assert_eq!(err.error, reason);
            }
            other => panic!("expected error, got {:?}", other),
        }
    }
}
