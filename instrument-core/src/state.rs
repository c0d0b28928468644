//! Connection lifecycle state, shared as a single-word atomic across the
//! reader thread, user threads, and the reconnect thread.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum ConnectionState {
    NotConnected = 0,
    WaitingForLogin = 1,
    Connected = 2,
    DisconnectInProgress = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> ConnectionState {
        match value {
            0 => ConnectionState::NotConnected,
            1 => ConnectionState::WaitingForLogin,
            2 => ConnectionState::Connected,
            3 => ConnectionState::DisconnectInProgress,
            _ => unreachable!("invalid connection state byte {}", value),
        }
    }
}

/// An atomic handle to the connection state, cheaply cloneable via `Arc`
/// at the call sites that need it.
pub struct StateCell {
    value: AtomicU8,
}

impl StateCell {
    pub fn new(initial: ConnectionState) -> Self {
        StateCell {
            value: AtomicU8::new(initial as u8),
        }
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.value.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: ConnectionState) {
        self.value.store(state as u8, Ordering::SeqCst);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(ConnectionState::NotConnected)
    }
}
