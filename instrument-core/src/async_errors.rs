//! Async error queue: a background dispatcher that drains human-readable
//! error strings and delivers them one at a time to async-error subscribers.
//!
//! Modeled as a bounded mpsc channel plus a dedicated dispatch thread, so
//! delivery always happens off the reader thread that first observed the
//! condition.

use crate::events::Subscribers;
use crate::state::{ConnectionState, StateCell};
use slog::Logger;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

const QUEUE_CAPACITY: usize = 256;

pub struct AsyncErrorQueue {
    sender: Mutex<Option<SyncSender<String>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncErrorQueue {
    /// Spawns the dispatch thread. `subscribers` receives each drained
    /// error string, in order, on the dispatch thread (never on the
    /// reader thread that enqueued it).
    pub fn start(subscribers: Arc<Subscribers<dyn FnMut(String) + Send>>, log: Logger) -> Arc<Self> {
        let (sender, receiver) = sync_channel(QUEUE_CAPACITY);
        let worker = thread::Builder::new()
            .name("instrument-async-error".into())
            .spawn(move || Self::run(receiver, subscribers, log))
            .expect("failed to spawn async error dispatch thread");

        Arc::new(AsyncErrorQueue {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    fn run(receiver: Receiver<String>, subscribers: Arc<Subscribers<dyn FnMut(String) + Send>>, log: Logger) {
        while let Ok(message) = receiver.recv() {
            slog::debug!(log, "dispatching async error"; "message" => message.as_str());
            subscribers.emit(message);
        }
    }

    /// Enqueues an error description. Only `Connected` or `WaitingForLogin`
    /// sessions enqueue; other states drop the message, so a disconnected
    /// session doesn't keep flooding subscribers.
    pub fn report(&self, state: &StateCell, message: impl Into<String>) {
        match state.get() {
            ConnectionState::Connected | ConnectionState::WaitingForLogin => {
                if let Some(sender) = self.sender.lock().unwrap().as_ref() {
                    let _ = sender.try_send(message.into());
                }
            }
            ConnectionState::NotConnected | ConnectionState::DisconnectInProgress => {}
        }
    }
}

impl Drop for AsyncErrorQueue {
    fn drop(&mut self) {
        self.sender.lock().unwrap().take();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}
