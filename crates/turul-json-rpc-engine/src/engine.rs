//! The dispatch engine: one side of a JSON-RPC conversation.
//!
//! An [`Engine`] consumes parsed messages one at a time. Requests and
//! notifications are routed to the [`HandlerRegistry`], replies to the
//! [`CorrelationTable`]. Handlers run as tokio tasks, so `receive` never waits
//! on them and replies may leave in a different order than requests arrived.
//! Outgoing messages are written to an [`OutboundSink`].
//!
//! Handler bodies start in the order their messages arrived, whatever order
//! the runtime polls the spawned tasks in. Only their completions interleave.
//!
//! The sink is told to complete once the owner has called [`Engine::end`] and
//! no handler is still in flight.

use std::any::Any;
use std::future::{Future, poll_fn};
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::Poll;

use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Notify, watch};
use tracing::{debug, error, warn};

use crate::{
    codec::{self, Payload},
    config::EngineConfig,
    correlation::{CorrelationTable, PendingResponse},
    error::{EngineError, HandlerError, JsonRpcError},
    message::Message,
    notification::JsonRpcNotification,
    registry::{HandlerRegistry, MethodHandler, NotificationHandler},
    request::{JsonRpcRequest, RequestParams},
    response::JsonRpcResponse,
    signals::{ListenerId, Signal, SignalKind, Signals},
};

/// Where an engine writes outgoing messages
pub trait OutboundSink: Send + Sync {
    fn send(&self, message: Message);

    /// The write side has ended and nothing is in flight; called once
    fn complete(&self) {}

    /// The engine was poisoned by an unobserved fatal signal; called once
    fn fatal(&self, _reason: &str) {}
}

/// Sink for direct mode: every message is serialized and handed to a callback
pub struct SendFn<F>(pub F);

impl<F> OutboundSink for SendFn<F>
where
    F: Fn(String) + Send + Sync,
{
    fn send(&self, message: Message) {
        match codec::to_string(&message) {
            Ok(text) => (self.0)(text),
            Err(e) => error!(error = %e, kind = %message.kind(), "Failed to serialize outgoing message"),
        }
    }
}

#[derive(Debug, Default)]
struct Lifecycle {
    ended: bool,
    in_flight: usize,
    completed: bool,
    fatal: Option<String>,
}

/// Start tickets: a handler task polls its handler for the first time only
/// after every earlier ticket has done so
struct StartOrder {
    next_ticket: AtomicU64,
    turn: watch::Sender<u64>,
}

impl StartOrder {
    fn new() -> Self {
        Self {
            next_ticket: AtomicU64::new(0),
            turn: watch::channel(0).0,
        }
    }

    fn ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::Relaxed)
    }

    /// Run `fut` to completion, taking its first poll in ticket order
    async fn run<F: Future>(&self, ticket: u64, fut: F) -> F::Output {
        let mut fut = pin!(fut);
        let mut turn = self.turn.subscribe();
        // The sender lives as long as self, so this only returns Ok.
        let _ = turn.wait_for(|current| *current >= ticket).await;
        drop(turn);

        let first = poll_fn(|cx| Poll::Ready(fut.as_mut().poll(cx))).await;
        self.turn.send_modify(|current| *current += 1);
        match first {
            Poll::Ready(output) => output,
            Poll::Pending => fut.await,
        }
    }
}

struct EngineInner {
    config: EngineConfig,
    registry: Arc<HandlerRegistry>,
    signals: Arc<Signals>,
    calls: CorrelationTable,
    sink: Arc<dyn OutboundSink>,
    lifecycle: Mutex<Lifecycle>,
    settled: Notify,
    starts: StartOrder,
}

/// Handle to a JSON-RPC engine; clones share the same instance
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.inner.config.name)
            .field("lifecycle", &*self.inner.lifecycle.lock())
            .field("pending_calls", &self.inner.calls.pending_count())
            .finish()
    }
}

impl Engine {
    pub fn new(config: EngineConfig, sink: impl OutboundSink + 'static) -> Self {
        Self::assemble(
            config,
            Arc::new(HandlerRegistry::new()),
            Arc::new(Signals::new()),
            Arc::new(sink),
        )
    }

    /// Direct mode: `send` receives each outgoing message as JSON text
    pub fn with_send<F>(config: EngineConfig, send: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        Self::new(config, SendFn(send))
    }

    /// A child engine writing to `sink`.
    ///
    /// The child has its own correlation table, id counter and in-flight
    /// counter. Handler lookups and unobserved signals fall through to this
    /// engine. The child does not keep this engine alive.
    pub fn child(&self, sink: impl OutboundSink + 'static) -> Engine {
        self.child_with_config(EngineConfig::child_of(&self.inner.config), sink)
    }

    pub fn child_with_config(&self, config: EngineConfig, sink: impl OutboundSink + 'static) -> Engine {
        Self::assemble(
            config,
            Arc::new(HandlerRegistry::child(&self.inner.registry)),
            Arc::new(Signals::child(&self.inner.signals)),
            Arc::new(sink),
        )
    }

    pub(crate) fn assemble(
        config: EngineConfig,
        registry: Arc<HandlerRegistry>,
        signals: Arc<Signals>,
        sink: Arc<dyn OutboundSink>,
    ) -> Self {
        let calls = CorrelationTable::new(config.first_id);
        Self {
            inner: Arc::new(EngineInner {
                config,
                registry,
                signals,
                calls,
                sink,
                lifecycle: Mutex::new(Lifecycle::default()),
                settled: Notify::new(),
                starts: StartOrder::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.inner.registry
    }

    pub fn signals(&self) -> &Arc<Signals> {
        &self.inner.signals
    }

    pub fn register_method<H>(&self, name: impl Into<String>, handler: H) -> Result<(), EngineError>
    where
        H: MethodHandler + 'static,
    {
        self.inner.registry.register_method(name, handler)
    }

    pub fn register_notification<H>(
        &self,
        name: impl Into<String>,
        handler: H,
    ) -> Result<(), EngineError>
    where
        H: NotificationHandler + 'static,
    {
        self.inner.registry.register_notification(name, handler)
    }

    pub fn on<F>(&self, kind: SignalKind, listener: F) -> ListenerId
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        self.inner.signals.on(kind, listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.signals.off(id)
    }

    /// Send a request and return the awaitable for its reply.
    ///
    /// There is no timeout: the response resolves when the peer answers or
    /// with [`crate::CallError::Closed`] once the engine is dropped.
    pub fn call(
        &self,
        method: impl Into<String>,
        params: Option<RequestParams>,
    ) -> Result<PendingResponse, EngineError> {
        self.inner.ensure_healthy()?;
        let (id, request, pending) = self.inner.calls.issue(method, params);
        debug!(engine = %self.name(), id, method = %request.method, "Issuing call");
        self.inner.send(Message::Request(request));
        Ok(pending)
    }

    /// Send a notification; no reply is expected or tracked
    pub fn notify(
        &self,
        method: impl Into<String>,
        params: Option<RequestParams>,
    ) -> Result<(), EngineError> {
        self.inner.ensure_healthy()?;
        self.inner
            .send(Message::Notification(JsonRpcNotification::new(method, params)));
        Ok(())
    }

    /// Dispatch one inbound message.
    ///
    /// Must be called from within a tokio runtime; handlers are spawned.
    pub fn receive(&self, message: Message) -> Result<(), EngineError> {
        self.inner.ensure_healthy()?;
        Arc::clone(&self.inner).dispatch(message);
        Ok(())
    }

    /// Parse and dispatch a serialized payload (single message or batch)
    pub fn receive_str(&self, text: &str) -> Result<(), EngineError> {
        self.receive_payload(codec::parse_str(text))
    }

    pub fn receive_slice(&self, bytes: &[u8]) -> Result<(), EngineError> {
        self.receive_payload(codec::parse_slice(bytes))
    }

    pub fn receive_payload(&self, payload: Payload) -> Result<(), EngineError> {
        for message in payload.into_messages() {
            self.receive(message)?;
        }
        Ok(())
    }

    /// Mark the write side finished; the sink completes once nothing is in
    /// flight
    pub fn end(&self) {
        self.inner.lifecycle.lock().ended = true;
        self.inner.try_complete();
    }

    pub fn is_ended(&self) -> bool {
        self.inner.lifecycle.lock().ended
    }

    pub fn is_complete(&self) -> bool {
        self.inner.lifecycle.lock().completed
    }

    /// Handler invocations not yet fully processed
    pub fn in_flight(&self) -> usize {
        self.inner.lifecycle.lock().in_flight
    }

    pub fn pending_calls(&self) -> usize {
        self.inner.calls.pending_count()
    }

    /// Reason the engine was poisoned, if it was
    pub fn fatal_error(&self) -> Option<String> {
        self.inner.lifecycle.lock().fatal.clone()
    }

    /// Wait until the engine completes (ended and idle) or is poisoned
    pub async fn wait_complete(&self) -> Result<(), EngineError> {
        loop {
            let settled = self.inner.settled.notified();
            {
                let lifecycle = self.inner.lifecycle.lock();
                if let Some(reason) = &lifecycle.fatal {
                    return Err(EngineError::Fatal(reason.clone()));
                }
                if lifecycle.completed {
                    return Ok(());
                }
            }
            settled.await;
        }
    }
}

impl EngineInner {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn ensure_healthy(&self) -> Result<(), EngineError> {
        match &self.lifecycle.lock().fatal {
            Some(reason) => Err(EngineError::Fatal(reason.clone())),
            None => Ok(()),
        }
    }

    fn send(&self, message: Message) {
        if self.config.logging.log_outbound {
            debug!(
                engine = %self.name(),
                kind = %message.kind(),
                id = ?message.id(),
                method = message.method(),
                "Outbound message"
            );
        }
        self.sink.send(message);
    }

    fn dispatch(self: Arc<Self>, message: Message) {
        if self.config.logging.log_inbound {
            debug!(
                engine = %self.name(),
                kind = %message.kind(),
                id = ?message.id(),
                method = message.method(),
                "Inbound message"
            );
        }

        match message {
            Message::Request(request) => self.dispatch_request(request),
            Message::Notification(notification) => self.dispatch_notification(notification),
            Message::Success(response) => self.dispatch_success(response),
            Message::Error(error) => self.dispatch_error(error),
            Message::Invalid(reason) => self.send(codec::invalid_reply(&reason)),
        }
    }

    fn dispatch_request(self: Arc<Self>, request: JsonRpcRequest) {
        let Some(handler) = self.registry.lookup_method(&request.method) else {
            debug!(engine = %self.name(), method = %request.method, "Method not found");
            self.send(Message::Error(JsonRpcError::method_not_found(
                request.id,
                &request.method,
            )));
            return;
        };

        self.begin();
        let ticket = self.starts.ticket();
        tokio::spawn(async move {
            let JsonRpcRequest { id, method, params, .. } = request;
            let handling = AssertUnwindSafe(handler.handle(params)).catch_unwind();
            let outcome = self
                .starts
                .run(ticket, handling)
                .await
                .unwrap_or_else(|panic| Err(panic_to_error(panic)));

            match outcome {
                Ok(result) => self.send(Message::Success(JsonRpcResponse::new(id, result))),
                Err(HandlerError::Rpc(error)) => {
                    self.send(Message::Error(JsonRpcError::new(Some(id), error)))
                }
                Err(fault) => {
                    let reason = format!("method '{}' failed: {}", method, fault);
                    let signal = Signal::MethodError {
                        error: fault,
                        method,
                        instance: self.config.name.clone(),
                    };
                    if self.signals.emit(&signal) {
                        self.send(Message::Error(JsonRpcError::unknown_error(id)));
                    } else {
                        self.escalate(reason);
                    }
                }
            }
            self.finish_one();
        });
    }

    fn dispatch_notification(self: Arc<Self>, notification: JsonRpcNotification) {
        let JsonRpcNotification { method, params, .. } = notification;

        let Some(handler) = self.registry.lookup_notification(&method) else {
            let signal = Signal::UnhandledNotification { method, params };
            self.report_anomaly(&signal);
            return;
        };

        self.begin();
        let ticket = self.starts.ticket();
        tokio::spawn(async move {
            let handling = AssertUnwindSafe(handler.handle(params)).catch_unwind();
            let outcome = self
                .starts
                .run(ticket, handling)
                .await
                .unwrap_or_else(|panic| Err(panic_to_error(panic)));

            if let Err(fault) = outcome {
                let reason = format!("notification '{}' failed: {}", method, fault);
                let signal = Signal::NotificationError {
                    error: fault,
                    method,
                    instance: self.config.name.clone(),
                };
                if !self.signals.emit(&signal) {
                    self.escalate(reason);
                }
            }
            self.finish_one();
        });
    }

    fn dispatch_success(&self, response: JsonRpcResponse) {
        let JsonRpcResponse {
            version,
            id,
            result,
        } = response;

        let unmatched = match id.call_id() {
            Some(call_id) => self.calls.resolve(call_id, result).err(),
            None => Some(result),
        };

        if let Some(result) = unmatched {
            let payload = Message::Success(JsonRpcResponse {
                version,
                id,
                result,
            });
            self.report_anomaly(&Signal::UnexpectedResponse { payload });
        }
    }

    fn dispatch_error(&self, error: JsonRpcError) {
        let JsonRpcError {
            version,
            id,
            error,
        } = error;

        let unmatched = match id.as_ref().and_then(|id| id.call_id()) {
            Some(call_id) => self.calls.reject(call_id, error).err(),
            None => Some(error),
        };

        if let Some(error) = unmatched {
            let payload = Message::Error(JsonRpcError { version, id, error });
            self.report_anomaly(&Signal::UnexpectedResponse { payload });
        }
    }

    /// Anomalies are never fatal; unobserved ones are only logged
    fn report_anomaly(&self, signal: &Signal) {
        if !self.signals.emit(signal) && self.config.logging.log_unobserved {
            warn!(engine = %self.name(), signal = ?signal, "Unobserved signal");
        }
    }

    /// Route a fault to the fatal channel; poison the engine if nobody listens
    fn escalate(&self, reason: String) {
        let signal = Signal::Error {
            reason: reason.clone(),
            instance: self.config.name.clone(),
        };
        if self.signals.emit(&signal) {
            return;
        }

        error!(engine = %self.name(), reason = %reason, "Unobserved fatal error, poisoning engine");
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.fatal.is_some() {
                return;
            }
            lifecycle.fatal = Some(reason.clone());
        }
        self.sink.fatal(&reason);
        self.settled.notify_waiters();
    }

    fn begin(&self) {
        self.lifecycle.lock().in_flight += 1;
    }

    fn finish_one(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.in_flight = lifecycle.in_flight.saturating_sub(1);
        }
        self.try_complete();
    }

    /// Complete the sink once the write side has ended and nothing is in
    /// flight. Safe to call from any path that changes either condition.
    fn try_complete(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if !lifecycle.ended
                || lifecycle.in_flight > 0
                || lifecycle.completed
                || lifecycle.fatal.is_some()
            {
                return;
            }
            lifecycle.completed = true;
        }
        debug!(engine = %self.name(), "Engine complete");
        self.sink.complete();
        self.settled.notify_waiters();
    }
}

fn panic_to_error(panic: Box<dyn Any + Send>) -> HandlerError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string());
    HandlerError::Internal(format!("panic: {}", message))
}

/// Convenience for handlers that produce no value
pub fn null_result() -> Result<Value, HandlerError> {
    Ok(Value::Null)
}
