//! The five kinds of message the engine routes.

use serde::{Serialize, Serializer};
use std::fmt;

use crate::{
    error::{JsonRpcError, JsonRpcErrorObject},
    notification::JsonRpcNotification,
    request::JsonRpcRequest,
    response::JsonRpcResponse,
    types::RequestId,
};

/// A parsed JSON-RPC message
///
/// `Invalid` is what the codec produces for input that is not a JSON-RPC
/// envelope. It carries the error object the peer should receive.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Success(JsonRpcResponse),
    Error(JsonRpcError),
    Invalid(JsonRpcErrorObject),
}

/// Discriminant of [`Message`], used for logging and filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Request,
    Notification,
    Success,
    Error,
    Invalid,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Request => "request",
            MessageKind::Notification => "notification",
            MessageKind::Success => "success",
            MessageKind::Error => "error",
            MessageKind::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Request(_) => MessageKind::Request,
            Message::Notification(_) => MessageKind::Notification,
            Message::Success(_) => MessageKind::Success,
            Message::Error(_) => MessageKind::Error,
            Message::Invalid(_) => MessageKind::Invalid,
        }
    }

    /// Method name for requests and notifications
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(req) => Some(&req.method),
            Message::Notification(notif) => Some(&notif.method),
            _ => None,
        }
    }

    /// The id a request carries or a reply answers
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Message::Request(req) => Some(&req.id),
            Message::Success(resp) => Some(&resp.id),
            Message::Error(err) => err.id.as_ref(),
            Message::Notification(_) | Message::Invalid(_) => None,
        }
    }

    /// The wire form of this message as a JSON value
    pub fn to_value(&self) -> serde_json::Value {
        // Every variant serializes from plain structs with string keys.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Serialize for Message {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Message::Request(req) => req.serialize(serializer),
            Message::Notification(notif) => notif.serialize(serializer),
            Message::Success(resp) => resp.serialize(serializer),
            Message::Error(err) => err.serialize(serializer),
            Message::Invalid(reason) => {
                JsonRpcError::new(None, reason.clone()).serialize(serializer)
            }
        }
    }
}

impl From<JsonRpcRequest> for Message {
    fn from(request: JsonRpcRequest) -> Self {
        Message::Request(request)
    }
}

impl From<JsonRpcNotification> for Message {
    fn from(notification: JsonRpcNotification) -> Self {
        Message::Notification(notification)
    }
}

impl From<JsonRpcResponse> for Message {
    fn from(response: JsonRpcResponse) -> Self {
        Message::Success(response)
    }
}

impl From<JsonRpcError> for Message {
    fn from(error: JsonRpcError) -> Self {
        Message::Error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invalid_serializes_as_null_id_error() {
        let message = Message::Invalid(JsonRpcErrorObject::invalid_request("missing method"));
        assert_eq!(
            message.to_value(),
            json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": {"code": -32600, "message": "Invalid Request", "data": "missing method"}
            })
        );
    }

    #[test]
    fn test_accessors() {
        let request: Message = JsonRpcRequest::new(RequestId::Number(9), "sum", None).into();
        assert_eq!(request.kind(), MessageKind::Request);
        assert_eq!(request.method(), Some("sum"));
        assert_eq!(request.id(), Some(&RequestId::Number(9)));

        let reply: Message = JsonRpcResponse::null(RequestId::Number(9)).into();
        assert_eq!(reply.kind(), MessageKind::Success);
        assert_eq!(reply.method(), None);
    }
}
