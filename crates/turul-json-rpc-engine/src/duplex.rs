//! Duplex stream adapter.
//!
//! A [`Duplex`] is the writable half (inbound bytes or JSON values from the
//! transport); its [`OutboundStream`] is the readable half (replies and
//! outgoing calls).
//!
//! In [`Framing::Bytes`] mode inbound chunks are only buffered; chunk
//! boundaries mean nothing. The whole buffer is parsed once when the owner
//! calls [`Duplex::end`]. If that payload was a JSON array, outbound messages
//! are framed as one array: `[` before the first, `,` between, `]` once the
//! engine completes. In [`Framing::Objects`] mode every chunk is a complete
//! JSON value and every outbound message is its own chunk.
//!
//! The outbound stream ends only after the write side has ended and every
//! handler has produced its reply.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::{
    codec,
    config::{DuplexConfig, EngineConfig, Framing},
    engine::{Engine, OutboundSink},
    error::{DuplexError, EngineError},
    message::Message,
};

const READ_CHUNK: usize = 8 * 1024;

/// One unit of outbound data
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    Bytes(Bytes),
    Object(Value),
}

type OutboundItem = Result<Chunk, DuplexError>;

/// Readable half of a [`Duplex`]
///
/// Yields `Err` once if the engine is poisoned, then ends.
pub struct OutboundStream {
    rx: mpsc::UnboundedReceiver<OutboundItem>,
}

impl Stream for OutboundStream {
    type Item = OutboundItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl OutboundStream {
    /// Drain the stream, concatenating byte chunks and serializing objects
    pub async fn collect_bytes(mut self) -> Result<Bytes, DuplexError> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.next().await {
            match chunk? {
                Chunk::Bytes(bytes) => out.extend_from_slice(&bytes),
                Chunk::Object(value) => {
                    let text = serde_json::to_vec(&value).map_err(EngineError::from)?;
                    out.extend_from_slice(&text);
                }
            }
        }
        Ok(out.freeze())
    }

    /// Drain an object-mode stream
    pub async fn collect_objects(mut self) -> Result<Vec<Value>, DuplexError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next().await {
            match chunk? {
                Chunk::Object(value) => out.push(value),
                Chunk::Bytes(_) => return Err(DuplexError::WrongFraming("bytes in object stream")),
            }
        }
        Ok(out)
    }
}

/// Sink that frames engine output onto the outbound channel
struct FramingSink {
    framing: Framing,
    batch: Arc<AtomicBool>,
    state: Mutex<FrameState>,
}

struct FrameState {
    tx: Option<mpsc::UnboundedSender<OutboundItem>>,
    opened: bool,
}

impl FramingSink {
    fn push(state: &FrameState, item: OutboundItem) {
        if let Some(tx) = &state.tx {
            // A dropped OutboundStream means nobody reads any more.
            let _ = tx.send(item);
        }
    }
}

impl OutboundSink for FramingSink {
    fn send(&self, message: Message) {
        let mut state = self.state.lock();
        if state.tx.is_none() {
            debug!(kind = %message.kind(), "Outbound side already closed, dropping message");
            return;
        }

        match self.framing {
            Framing::Objects => Self::push(&state, Ok(Chunk::Object(message.to_value()))),
            Framing::Bytes => {
                let text = match codec::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        Self::push(&state, Err(EngineError::from(e).into()));
                        return;
                    }
                };
                let framed = if self.batch.load(Ordering::Acquire) {
                    let separator = if state.opened { "," } else { "[" };
                    state.opened = true;
                    format!("{}{}", separator, text)
                } else {
                    text
                };
                trace!(bytes = framed.len(), "Framed outbound message");
                Self::push(&state, Ok(Chunk::Bytes(Bytes::from(framed))));
            }
        }
    }

    fn complete(&self) {
        let mut state = self.state.lock();
        if state.opened {
            Self::push(&state, Ok(Chunk::Bytes(Bytes::from_static(b"]"))));
        }
        state.tx = None;
    }

    fn fatal(&self, reason: &str) {
        let mut state = self.state.lock();
        Self::push(&state, Err(EngineError::Fatal(reason.to_string()).into()));
        state.tx = None;
    }
}

#[derive(Default)]
struct Inbound {
    chunks: Vec<Bytes>,
    ended: bool,
}

/// Writable half of a duplex JSON-RPC channel, owning its engine
pub struct Duplex {
    engine: Engine,
    framing: Framing,
    batch: Arc<AtomicBool>,
    inbound: Mutex<Inbound>,
}

impl Duplex {
    pub fn new(config: DuplexConfig) -> (Duplex, OutboundStream) {
        Self::build(config.framing, |sink| Engine::new(config.engine, sink))
    }

    fn build(
        framing: Framing,
        make_engine: impl FnOnce(FramingSink) -> Engine,
    ) -> (Duplex, OutboundStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let batch = Arc::new(AtomicBool::new(false));
        let sink = FramingSink {
            framing,
            batch: Arc::clone(&batch),
            state: Mutex::new(FrameState {
                tx: Some(tx),
                opened: false,
            }),
        };

        let duplex = Duplex {
            engine: make_engine(sink),
            framing,
            batch,
            inbound: Mutex::new(Inbound::default()),
        };
        (duplex, OutboundStream { rx })
    }

    /// A child adapter with the same framing.
    ///
    /// Its engine resolves handlers and bubbles signals through this
    /// adapter's engine but keeps its own calls and in-flight count.
    pub fn child(&self) -> (Duplex, OutboundStream) {
        let config = DuplexConfig {
            framing: self.framing,
            engine: EngineConfig::child_of(self.engine.config()),
        };
        self.child_with_config(config)
    }

    pub fn child_with_config(&self, config: DuplexConfig) -> (Duplex, OutboundStream) {
        let parent = &self.engine;
        Self::build(config.framing, |sink| {
            parent.child_with_config(config.engine, sink)
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Whether the last inbound payload was a batch, so replies are
    /// array-framed
    pub fn is_batch(&self) -> bool {
        self.batch.load(Ordering::Acquire)
    }

    /// Buffer a raw chunk (byte mode)
    pub fn write(&self, chunk: impl Into<Bytes>) -> Result<(), DuplexError> {
        if self.framing != Framing::Bytes {
            return Err(DuplexError::WrongFraming("bytes written to object-mode adapter"));
        }
        let mut inbound = self.inbound.lock();
        if inbound.ended {
            return Err(DuplexError::Ended);
        }
        let chunk = chunk.into();
        trace!(engine = %self.engine.name(), bytes = chunk.len(), "Buffered inbound chunk");
        inbound.chunks.push(chunk);
        Ok(())
    }

    /// Dispatch one decoded JSON value (object mode)
    pub fn write_object(&self, value: Value) -> Result<(), DuplexError> {
        if self.framing != Framing::Objects {
            return Err(DuplexError::WrongFraming("object written to byte-mode adapter"));
        }
        if self.inbound.lock().ended {
            return Err(DuplexError::Ended);
        }
        self.engine.receive_payload(codec::parse_value(value))?;
        Ok(())
    }

    /// End the write side.
    ///
    /// In byte mode the buffered input is parsed and dispatched now. The
    /// outbound stream ends once every resulting handler has replied.
    pub fn end(&self) -> Result<(), DuplexError> {
        let chunks = {
            let mut inbound = self.inbound.lock();
            if inbound.ended {
                return Err(DuplexError::Ended);
            }
            inbound.ended = true;
            std::mem::take(&mut inbound.chunks)
        };

        let dispatched = match self.framing {
            Framing::Bytes => self.dispatch_buffer(chunks),
            Framing::Objects => Ok(()),
        };
        self.engine.end();
        dispatched
    }

    fn dispatch_buffer(&self, chunks: Vec<Bytes>) -> Result<(), DuplexError> {
        let buffer = concat(chunks);
        if buffer.iter().all(u8::is_ascii_whitespace) {
            debug!(engine = %self.engine.name(), "Write side ended without a payload");
            return Ok(());
        }

        let payload = codec::parse_slice(&buffer);
        self.batch.store(payload.is_batch(), Ordering::Release);
        debug!(
            engine = %self.engine.name(),
            bytes = buffer.len(),
            batch = payload.is_batch(),
            "Parsed inbound payload"
        );
        self.engine.receive_payload(payload)?;
        Ok(())
    }

    /// Pump a byte transport through this adapter until both directions are
    /// done: read `reader` to EOF, then write every outbound chunk to
    /// `writer` and shut it down.
    pub async fn serve_io<R, W>(
        &self,
        mut reader: R,
        mut writer: W,
        mut outbound: OutboundStream,
    ) -> Result<(), DuplexError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if self.framing != Framing::Bytes {
            return Err(DuplexError::WrongFraming("serve_io requires byte framing"));
        }

        let pump_in = async {
            let mut buf = BytesMut::with_capacity(READ_CHUNK);
            loop {
                buf.reserve(READ_CHUNK);
                if reader.read_buf(&mut buf).await? == 0 {
                    break;
                }
                self.write(buf.split().freeze())?;
            }
            self.end()
        };

        let pump_out = async {
            while let Some(chunk) = outbound.next().await {
                match chunk? {
                    Chunk::Bytes(bytes) => writer.write_all(&bytes).await?,
                    Chunk::Object(value) => {
                        let text = serde_json::to_vec(&value).map_err(EngineError::from)?;
                        writer.write_all(&text).await?;
                    }
                }
            }
            writer.flush().await?;
            writer.shutdown().await?;
            Ok::<(), DuplexError>(())
        };

        tokio::try_join!(pump_in, pump_out)?;
        Ok(())
    }
}

/// Join buffered chunks; a single chunk is returned without copying
fn concat(mut chunks: Vec<Bytes>) -> Bytes {
    match chunks.len() {
        0 => Bytes::new(),
        1 => chunks.remove(0),
        _ => {
            let total = chunks.iter().map(Bytes::len).sum();
            let mut joined = BytesMut::with_capacity(total);
            for chunk in &chunks {
                joined.extend_from_slice(chunk);
            }
            joined.freeze()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HandlerError, RequestParams};
    use serde_json::json;

    fn echo(duplex: &Duplex) {
        duplex
            .engine()
            .register_method("echo", |params: Option<RequestParams>| async move {
                Ok::<_, HandlerError>(params.map(|p| p.to_value()).unwrap_or(Value::Null))
            })
            .unwrap();
    }

    #[test]
    fn test_concat_single_chunk_is_zero_copy() {
        let chunk = Bytes::from_static(b"{\"a\":1}");
        let ptr = chunk.as_ptr();
        let joined = concat(vec![chunk]);
        assert_eq!(joined.as_ptr(), ptr);

        let joined = concat(vec![Bytes::from_static(b"[1,"), Bytes::from_static(b"2]")]);
        assert_eq!(&joined[..], b"[1,2]");
    }

    #[tokio::test]
    async fn test_chunk_boundaries_are_not_message_boundaries() {
        let (duplex, outbound) = Duplex::new(DuplexConfig::default());
        echo(&duplex);

        duplex.write(&b"{\"jsonrpc\":\"2.0\",\"id\":1,"[..]).unwrap();
        duplex.write(&b"\"method\":\"echo\",\"params\":[\"hi\"]}"[..]).unwrap();
        assert_eq!(duplex.engine().in_flight(), 0);
        duplex.end().unwrap();

        let out = outbound.collect_bytes().await.unwrap();
        let reply: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(reply, json!({"jsonrpc": "2.0", "id": 1, "result": ["hi"]}));
        assert!(!duplex.is_batch());
    }

    #[tokio::test]
    async fn test_batch_replies_are_array_framed() {
        let (duplex, outbound) = Duplex::new(DuplexConfig::default());
        echo(&duplex);

        duplex
            .write(
                r#"[{"jsonrpc":"2.0","id":1,"method":"echo","params":[1]},
                   {"jsonrpc":"2.0","method":"echo","params":[2]},
                   {"jsonrpc":"2.0","id":2,"method":"nope"}]"#,
            )
            .unwrap();
        duplex.end().unwrap();

        let out = outbound.collect_bytes().await.unwrap();
        assert_eq!(out.first(), Some(&b'['));
        assert_eq!(out.last(), Some(&b']'));

        let replies: Vec<Value> = serde_json::from_slice(&out).unwrap();
        assert_eq!(replies.len(), 2);
        assert!(replies.iter().any(|r| r["id"] == 1 && r["result"] == json!([1])));
        assert!(replies.iter().any(|r| r["id"] == 2 && r["error"]["code"] == -32601));
        assert!(duplex.is_batch());
    }

    #[tokio::test]
    async fn test_object_mode_emits_discrete_values() {
        let (duplex, outbound) = Duplex::new(DuplexConfig::objects());
        echo(&duplex);

        duplex
            .write_object(json!({"jsonrpc": "2.0", "id": 1, "method": "echo", "params": {"x": 1}}))
            .unwrap();
        duplex
            .write_object(json!({"jsonrpc": "2.0", "id": 2, "method": "echo"}))
            .unwrap();
        duplex.end().unwrap();

        let mut replies = outbound.collect_objects().await.unwrap();
        replies.sort_by_key(|r| r["id"].as_i64());
        assert_eq!(
            replies,
            vec![
                json!({"jsonrpc": "2.0", "id": 1, "result": {"x": 1}}),
                json!({"jsonrpc": "2.0", "id": 2, "result": null}),
            ]
        );
    }

    #[tokio::test]
    async fn test_framing_mismatch_and_write_after_end() {
        let (bytes, _out) = Duplex::new(DuplexConfig::default());
        assert!(matches!(
            bytes.write_object(json!({})),
            Err(DuplexError::WrongFraming(_))
        ));
        bytes.end().unwrap();
        assert!(matches!(bytes.write("x"), Err(DuplexError::Ended)));
        assert!(matches!(bytes.end(), Err(DuplexError::Ended)));

        let (objects, _out) = Duplex::new(DuplexConfig::objects());
        assert!(matches!(objects.write("x"), Err(DuplexError::WrongFraming(_))));
    }

    #[tokio::test]
    async fn test_empty_input_completes_without_output() {
        let (duplex, outbound) = Duplex::new(DuplexConfig::default());
        duplex.write("  \n").unwrap();
        duplex.end().unwrap();

        let out = outbound.collect_bytes().await.unwrap();
        assert!(out.is_empty());
        assert!(duplex.engine().is_complete());
    }

    #[tokio::test]
    async fn test_malformed_input_yields_null_id_error() {
        let (duplex, outbound) = Duplex::new(DuplexConfig::default());
        duplex.write("{\"jsonrpc\":").unwrap();
        duplex.end().unwrap();

        let out = outbound.collect_bytes().await.unwrap();
        let reply: Value = serde_json::from_slice(&out).unwrap();
        assert!(reply["id"].is_null());
        assert_eq!(reply["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn test_serve_io_round_trip() {
        let (duplex, outbound) = Duplex::new(DuplexConfig::default());
        echo(&duplex);

        let input = br#"{"jsonrpc":"2.0","id":9,"method":"echo","params":{"ok":true}}"#;
        let mut output = Vec::new();
        duplex
            .serve_io(&input[..], &mut output, outbound)
            .await
            .unwrap();

        let reply: Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(reply["id"], 9);
        assert_eq!(reply["result"], json!({"ok": true}));
    }
}
