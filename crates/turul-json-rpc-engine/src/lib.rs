//! # JSON-RPC 2.0 Peer Engine
//!
//! A transport-agnostic JSON-RPC 2.0 engine that plays both roles at once:
//! it answers the peer's requests through registered handlers and issues its
//! own calls, matching replies back to the awaiting caller.
//!
//! ## Features
//! - Single messages and batches, with malformed input answered per the protocol
//! - Async handlers run concurrently; replies leave as they are produced
//! - Outgoing calls resolve through [`PendingResponse`] futures
//! - Child engines that inherit handlers and bubble signals to their parent
//! - Locally observable [`Signal`]s for anomalies and handler faults
//! - A [`Duplex`] adapter framing the engine as a byte or object stream
//!
//! ```rust,no_run
//! use turul_json_rpc_engine::prelude::*;
//!
//! # async fn demo() -> Result<(), EngineError> {
//! let engine = Engine::with_send(EngineConfig::named("server"), |text| println!("{}", text));
//! engine.register_method("hello", |_params: Option<RequestParams>| async {
//!     Ok::<_, HandlerError>(serde_json::json!("Hello world"))
//! })?;
//! engine.receive_str(r#"{"jsonrpc":"2.0","id":1,"method":"hello"}"#)?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod correlation;
pub mod duplex;
pub mod engine;
pub mod error;
pub mod message;
pub mod notification;
pub mod prelude;
pub mod registry;
pub mod request;
pub mod response;
pub mod signals;
pub mod types;

// Re-export main types
pub use codec::Payload;
pub use config::{DuplexConfig, EngineConfig, Framing, LoggingConfig};
pub use correlation::PendingResponse;
pub use duplex::{Chunk, Duplex, OutboundStream};
pub use engine::{null_result, Engine, OutboundSink, SendFn};
pub use error::{
    CallError, DuplexError, EngineError, HandlerError, JsonRpcError, JsonRpcErrorCode,
    JsonRpcErrorObject,
};
pub use message::{Message, MessageKind};
pub use notification::JsonRpcNotification;
pub use registry::{HandlerKind, MethodHandler, NotificationHandler};
pub use request::{JsonRpcRequest, RequestParams};
pub use response::JsonRpcResponse;
pub use signals::{ListenerId, Signal, SignalKind};
pub use types::{JsonRpcVersion, RequestId};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    /// Sent for handler faults that carry no structured error
    pub const UNKNOWN_ERROR: i64 = -32000;
}
