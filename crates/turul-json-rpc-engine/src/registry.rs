//! Handler registration and hierarchical lookup.
//!
//! A registry maps method names to a single [`HandlerEntry`]. Registering a
//! name again replaces the previous entry, whatever its kind. A registry built
//! with [`HandlerRegistry::child`] falls back to its parent for names it does
//! not hold locally, so registrations on a child shadow those of ancestors.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::{
    error::{EngineError, HandlerError},
    request::RequestParams,
};

/// Answers requests for one method
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Produce the result for a request.
    ///
    /// `Err(HandlerError::Rpc(..))` is sent to the peer verbatim; any other
    /// error is treated as a local fault.
    async fn handle(&self, params: Option<RequestParams>) -> Result<Value, HandlerError>;
}

/// Consumes notifications for one method
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, params: Option<RequestParams>) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> MethodHandler for F
where
    F: Fn(Option<RequestParams>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle(&self, params: Option<RequestParams>) -> Result<Value, HandlerError> {
        (self)(params).await
    }
}

#[async_trait]
impl<F, Fut> NotificationHandler for F
where
    F: Fn(Option<RequestParams>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, params: Option<RequestParams>) -> Result<(), HandlerError> {
        (self)(params).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Method,
    Notification,
}

/// What a method name is bound to
#[derive(Clone)]
pub enum HandlerEntry {
    Method(Arc<dyn MethodHandler>),
    Notification(Arc<dyn NotificationHandler>),
}

impl HandlerEntry {
    pub fn kind(&self) -> HandlerKind {
        match self {
            HandlerEntry::Method(_) => HandlerKind::Method,
            HandlerEntry::Notification(_) => HandlerKind::Notification,
        }
    }
}

impl std::fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HandlerEntry::{:?}", self.kind())
    }
}

/// Method name to handler map with optional parent fallback
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, HandlerEntry>>,
    parent: Option<Weak<HandlerRegistry>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty registry that defers to `parent` for names it lacks.
    ///
    /// The parent is not kept alive by the child.
    pub fn child(parent: &Arc<HandlerRegistry>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            parent: Some(Arc::downgrade(parent)),
        }
    }

    pub fn register_method<H>(&self, name: impl Into<String>, handler: H) -> Result<(), EngineError>
    where
        H: MethodHandler + 'static,
    {
        self.insert(name.into(), HandlerEntry::Method(Arc::new(handler)))
    }

    pub fn register_notification<H>(
        &self,
        name: impl Into<String>,
        handler: H,
    ) -> Result<(), EngineError>
    where
        H: NotificationHandler + 'static,
    {
        self.insert(name.into(), HandlerEntry::Notification(Arc::new(handler)))
    }

    fn insert(&self, name: String, entry: HandlerEntry) -> Result<(), EngineError> {
        if name.is_empty() {
            return Err(EngineError::EmptyMethodName);
        }
        self.handlers.write().insert(name, entry);
        Ok(())
    }

    /// Remove a local registration; ancestors are untouched
    pub fn unregister(&self, name: &str) -> Option<HandlerEntry> {
        self.handlers.write().remove(name)
    }

    /// Find a handler of `kind` for `name`, walking up the parent chain.
    ///
    /// A local entry of the other kind does not stop the walk.
    pub fn lookup(&self, kind: HandlerKind, name: &str) -> Option<HandlerEntry> {
        let local = self
            .handlers
            .read()
            .get(name)
            .filter(|entry| entry.kind() == kind)
            .cloned();

        local.or_else(|| {
            self.parent
                .as_ref()
                .and_then(Weak::upgrade)
                .and_then(|parent| parent.lookup(kind, name))
        })
    }

    pub fn lookup_method(&self, name: &str) -> Option<Arc<dyn MethodHandler>> {
        match self.lookup(HandlerKind::Method, name)? {
            HandlerEntry::Method(handler) => Some(handler),
            HandlerEntry::Notification(_) => None,
        }
    }

    pub fn lookup_notification(&self, name: &str) -> Option<Arc<dyn NotificationHandler>> {
        match self.lookup(HandlerKind::Notification, name)? {
            HandlerEntry::Notification(handler) => Some(handler),
            HandlerEntry::Method(_) => None,
        }
    }

    /// Locally registered names (ancestors excluded)
    pub fn methods(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }
}
