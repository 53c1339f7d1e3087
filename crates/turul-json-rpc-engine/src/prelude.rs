//! # JSON-RPC Engine Prelude
//!
//! ```rust
//! use turul_json_rpc_engine::prelude::*;
//! ```

pub use crate::config::{DuplexConfig, EngineConfig, Framing};
pub use crate::duplex::{Chunk, Duplex, OutboundStream};
pub use crate::engine::{null_result, Engine, OutboundSink};
pub use crate::error::{CallError, DuplexError, EngineError, HandlerError, JsonRpcErrorObject};
pub use crate::message::Message;
pub use crate::registry::{MethodHandler, NotificationHandler};
pub use crate::request::RequestParams;
pub use crate::signals::{Signal, SignalKind};
pub use crate::types::RequestId;

// Standard error codes
pub use crate::error_codes::*;
