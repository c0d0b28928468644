//! Typed observer registry for the five client event kinds (`Connect`,
//! `Disconnect`, `DisconnectWarning`, `DisconnectError`, `AsyncError`), with
//! explicit subscribe/unsubscribe and a well-defined emission thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct SubscriptionId(u64);

/// A single-kind subscriber list. `F` is the handler signature for that
/// event kind (e.g. `FnMut()` for `Connect`, `FnMut(String)` for
/// `AsyncError`).
pub struct Subscribers<F: ?Sized> {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(SubscriptionId, Box<F>)>>,
}

impl<F: ?Sized> Subscribers<F> {
    pub fn new() -> Self {
        Subscribers {
            next_id: AtomicU64::new(1),
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, handler: Box<F>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.handlers.lock().unwrap().push((id, handler));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.handlers.lock().unwrap().retain(|(entry_id, _)| *entry_id != id);
    }
}

impl<F: ?Sized> Default for Subscribers<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscribers<dyn FnMut() + Send> {
    /// Emits the zero-argument event to every current subscriber, in
    /// registration order. Invoked on the reader thread or the reconnect
    /// thread, never while any internal mutex guarding protocol state is
    /// held.
    pub fn emit(&self) {
        let mut handlers = self.handlers.lock().unwrap();
        for (_, handler) in handlers.iter_mut() {
            handler();
        }
    }
}

impl Subscribers<dyn FnMut(String) + Send> {
    pub fn emit(&self, message: String) {
        let mut handlers = self.handlers.lock().unwrap();
        for (_, handler) in handlers.iter_mut() {
            handler(message.clone());
        }
    }
}

/// Bundles the five event registries exposed on the public client.
#[derive(Default)]
pub struct EventBus {
    pub connect: Subscribers<dyn FnMut() + Send>,
    pub disconnect: Subscribers<dyn FnMut() + Send>,
    pub disconnect_warning: Subscribers<dyn FnMut() + Send>,
    pub disconnect_error: Subscribers<dyn FnMut() + Send>,
    pub async_error: Subscribers<dyn FnMut(String) + Send>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }
}
