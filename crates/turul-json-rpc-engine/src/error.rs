use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::types::{JsonRpcVersion, RequestId};

/// JSON-RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonRpcErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    /// Opaque handler fault (-32000)
    UnknownError,
}

impl JsonRpcErrorCode {
    pub fn code(&self) -> i64 {
        match self {
            JsonRpcErrorCode::ParseError => crate::error_codes::PARSE_ERROR,
            JsonRpcErrorCode::InvalidRequest => crate::error_codes::INVALID_REQUEST,
            JsonRpcErrorCode::MethodNotFound => crate::error_codes::METHOD_NOT_FOUND,
            JsonRpcErrorCode::InvalidParams => crate::error_codes::INVALID_PARAMS,
            JsonRpcErrorCode::InternalError => crate::error_codes::INTERNAL_ERROR,
            JsonRpcErrorCode::UnknownError => crate::error_codes::UNKNOWN_ERROR,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            JsonRpcErrorCode::ParseError => "Parse error",
            JsonRpcErrorCode::InvalidRequest => "Invalid Request",
            JsonRpcErrorCode::MethodNotFound => "Method not found",
            JsonRpcErrorCode::InvalidParams => "Invalid params",
            JsonRpcErrorCode::InternalError => "Internal error",
            JsonRpcErrorCode::UnknownError => "Unknown error",
        }
    }
}

impl fmt::Display for JsonRpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

/// The `error` member of an error envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorObject {
    pub fn new(code: JsonRpcErrorCode, message: Option<String>, data: Option<Value>) -> Self {
        Self {
            code: code.code(),
            message: message.unwrap_or_else(|| code.message().to_string()),
            data,
        }
    }

    /// Malformed JSON; `reason` lands in `data`
    pub fn parse_error(reason: impl Into<String>) -> Self {
        Self::new(
            JsonRpcErrorCode::ParseError,
            None,
            Some(Value::String(reason.into())),
        )
    }

    /// Well-formed JSON that is not a JSON-RPC envelope; `reason` lands in `data`
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::new(
            JsonRpcErrorCode::InvalidRequest,
            None,
            Some(Value::String(reason.into())),
        )
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            JsonRpcErrorCode::MethodNotFound,
            Some(format!("Method '{}' not found", method)),
            None,
        )
    }

    pub fn invalid_params(message: &str) -> Self {
        Self::new(
            JsonRpcErrorCode::InvalidParams,
            Some(message.to_string()),
            None,
        )
    }

    /// What the peer sees when a handler fails without a structured error
    pub fn unknown_error() -> Self {
        Self::new(JsonRpcErrorCode::UnknownError, None, None)
    }

    /// Application-defined error with an arbitrary code
    pub fn custom(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }
}

impl fmt::Display for JsonRpcErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// JSON-RPC error envelope
///
/// `id` is `None` (serialized as `null`) when the offending message could not
/// be attributed to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub id: Option<RequestId>,
    pub error: JsonRpcErrorObject,
}

impl JsonRpcError {
    pub fn new(id: Option<RequestId>, error: JsonRpcErrorObject) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id,
            error,
        }
    }

    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self::new(Some(id), JsonRpcErrorObject::method_not_found(method))
    }

    pub fn unknown_error(id: RequestId) -> Self {
        Self::new(Some(id), JsonRpcErrorObject::unknown_error())
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JSON-RPC Error {}: {}",
            self.error.code, self.error.message
        )
    }
}

impl std::error::Error for JsonRpcError {}

/// Failure reported by a method or notification handler
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// Structured protocol error, sent to the peer as-is
    #[error("{0}")]
    Rpc(JsonRpcErrorObject),

    /// Opaque fault; reported locally, the peer only sees "Unknown error"
    #[error("Handler fault: {0}")]
    Internal(String),
}

impl HandlerError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<JsonRpcErrorObject> for HandlerError {
    fn from(error: JsonRpcErrorObject) -> Self {
        Self::Rpc(error)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        Self::Rpc(JsonRpcErrorObject::invalid_params(&error.to_string()))
    }
}

/// Why an outgoing call did not produce a result
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    /// The peer answered with an error envelope
    #[error("Peer returned error: {0}")]
    Rpc(JsonRpcErrorObject),

    /// The engine went away before a reply arrived
    #[error("Engine closed before a response arrived")]
    Closed,
}

impl CallError {
    /// Error code if the peer answered with an error envelope
    pub fn code(&self) -> Option<i64> {
        match self {
            CallError::Rpc(error) => Some(error.code),
            CallError::Closed => None,
        }
    }
}

/// Engine-level failures
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Method name must not be empty")]
    EmptyMethodName,

    /// The engine hit an unobserved fatal signal and refuses further input
    #[error("Engine is poisoned by an unobserved fatal error: {0}")]
    Fatal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Duplex adapter failures
#[derive(Debug, Error)]
pub enum DuplexError {
    #[error("Write side already ended")]
    Ended,

    #[error("Chunk does not match the adapter's framing ({0})")]
    WrongFraming(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
