//! Per-substatus handler registry used by `STAT` dispatch.
//!
//! Guarded by its own mutex, held only for registration and lookup, never
//! across a handler invocation.

use hashbrown::HashMap;
use std::sync::Mutex;

pub type StatusHandler = Box<dyn FnMut(u32, &[u8]) + Send>;

#[derive(Default)]
struct Registry {
    by_substatus: HashMap<u32, StatusHandler>,
    unhandled: Option<StatusHandler>,
}

pub struct StatusRegistry {
    registry: Mutex<Registry>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        StatusRegistry {
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Registers a handler for one substatus. Returns `false` if a handler
    /// is already registered for it.
    pub fn register(&self, substatus: u32, handler: StatusHandler) -> bool {
        let mut registry = self.registry.lock().unwrap();
        if registry.by_substatus.contains_key(&substatus) {
            return false;
        }
        registry.by_substatus.insert(substatus, handler);
        true
    }

    /// Registers the singleton fallback handler. Returns `false` if one is
    /// already registered.
    pub fn register_unhandled(&self, handler: StatusHandler) -> bool {
        let mut registry = self.registry.lock().unwrap();
        if registry.unhandled.is_some() {
            return false;
        }
        registry.unhandled = Some(handler);
        true
    }

    /// Looks up the handler for `substatus`, falling back to the unhandled
    /// handler, and invokes whichever is found with `data` outside the
    /// registry lock.
    pub fn dispatch(&self, substatus: u32, data: &[u8]) {
        let taken = {
            let mut registry = self.registry.lock().unwrap();
            match registry.by_substatus.remove(&substatus) {
                Some(handler) => Some(Slot::Specific(handler)),
                None => registry.unhandled.take().map(Slot::Unhandled),
            }
        };

        let mut taken = match taken {
            Some(taken) => taken,
            None => return,
        };
        match &mut taken {
            Slot::Specific(handler) | Slot::Unhandled(handler) => handler(substatus, data),
        }

        let mut registry = self.registry.lock().unwrap();
        match taken {
            Slot::Specific(handler) => {
                registry.by_substatus.insert(substatus, handler);
            }
            Slot::Unhandled(handler) => {
                registry.unhandled = Some(handler);
            }
        }
    }
}

enum Slot {
    Specific(StatusHandler),
    Unhandled(StatusHandler),
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn registers_once_per_substatus() {
        let registry = StatusRegistry::new();
        assert!(registry.register(1, Box::new(|_, _| {})));
        assert!(!registry.register(1, Box::new(|_, _| {})));
    }

    #[test]
    fn unhandled_is_singleton() {
        let registry = StatusRegistry::new();
        assert!(registry.register_unhandled(Box::new(|_, _| {})));
        assert!(!registry.register_unhandled(Box::new(|_, _| {})));
    }

    #[test]
    fn dispatch_prefers_specific_handler() {
        let registry = StatusRegistry::new();
        let specific_hits = Arc::new(AtomicU32::new(0));
        let unhandled_hits = Arc::new(AtomicU32::new(0));

        let specific_hits2 = specific_hits.clone();
        registry.register(
            7,
            Box::new(move |_, _| {
                specific_hits2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let unhandled_hits2 = unhandled_hits.clone();
        registry.register_unhandled(Box::new(move |_, _| {
            unhandled_hits2.fetch_add(1, Ordering::SeqCst);
        }));

        registry.dispatch(7, &[]);
        registry.dispatch(8, &[]);

        assert_eq!(specific_hits.load(Ordering::SeqCst), 1);
        assert_eq!(unhandled_hits.load(Ordering::SeqCst), 1);
    }
}
