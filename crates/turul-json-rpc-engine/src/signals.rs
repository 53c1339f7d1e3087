//! Locally observable engine events.
//!
//! Signals never travel over the wire. Each engine owns a [`Signals`] set of
//! listeners; a signal nobody listens to on an engine is re-emitted on its
//! parent, so one listener on the root observes every descendant. `emit`
//! reports whether anyone observed the signal, which the engine uses to
//! decide whether a handler fault escalates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::{error::HandlerError, message::Message, request::RequestParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    UnhandledNotification,
    UnexpectedResponse,
    MethodError,
    NotificationError,
    /// The fatal channel
    Error,
}

#[derive(Debug, Clone)]
pub enum Signal {
    /// A notification arrived for which no handler is registered
    UnhandledNotification {
        method: String,
        params: Option<RequestParams>,
    },
    /// A Success or Error arrived that matches no outstanding call
    UnexpectedResponse { payload: Message },
    /// A method handler failed without a structured protocol error
    MethodError {
        error: HandlerError,
        method: String,
        instance: String,
    },
    /// A notification handler failed
    NotificationError {
        error: HandlerError,
        method: String,
        instance: String,
    },
    /// A fault nobody handled at its specific signal
    Error { reason: String, instance: String },
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::UnhandledNotification { .. } => SignalKind::UnhandledNotification,
            Signal::UnexpectedResponse { .. } => SignalKind::UnexpectedResponse,
            Signal::MethodError { .. } => SignalKind::MethodError,
            Signal::NotificationError { .. } => SignalKind::NotificationError,
            Signal::Error { .. } => SignalKind::Error,
        }
    }
}

/// Handle for removing a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&Signal) + Send + Sync>;

/// Listener sets of one engine, chained to the parent engine's
#[derive(Default)]
pub struct Signals {
    listeners: RwLock<HashMap<SignalKind, Vec<(ListenerId, Listener)>>>,
    next_listener: AtomicU64,
    parent: Option<Weak<Signals>>,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(parent: &Arc<Signals>) -> Self {
        Self {
            parent: Some(Arc::downgrade(parent)),
            ..Self::default()
        }
    }

    pub fn on<F>(&self, kind: SignalKind, listener: F) -> ListenerId
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener; returns whether it was registered here
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let mut removed = false;
        for entries in listeners.values_mut() {
            let before = entries.len();
            entries.retain(|(entry_id, _)| *entry_id != id);
            removed |= entries.len() != before;
        }
        removed
    }

    /// Deliver `signal` to local listeners, or to the nearest ancestor that
    /// has any. Returns `false` when nobody observed it.
    pub fn emit(&self, signal: &Signal) -> bool {
        // Listeners run without the lock held so they may register others.
        let local: Vec<Listener> = self
            .listeners
            .read()
            .get(&signal.kind())
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        if !local.is_empty() {
            for listener in local {
                listener(signal);
            }
            return true;
        }

        self.parent
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some_and(|parent| parent.emit(signal))
    }
}
