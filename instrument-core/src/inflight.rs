//! In-flight table: sequence allocation and ACK/NAK/RSP ordering.
//!
//! All operations are serialized by one internal mutex. Completions are
//! lifted out of the lock and handed back to the caller to invoke; this
//! table never calls user code itself.

use hashbrown::HashMap;
use std::sync::Mutex;

pub type AckHandler = Box<dyn FnMut(u32) + Send>;
pub type NakHandler = Box<dyn FnMut(u32, u32) + Send>;
pub type ResponseHandler = Box<dyn FnMut(u32, u32, u32, &[u8]) + Send>;

/// The bundle of handlers associated with one outstanding `GET`/`ACTN`.
///
/// There is no separate "opaque user data" field as in the source: Rust
/// closures capture their environment directly, so callers fold user data
/// into the closures themselves.
#[derive(Default)]
pub struct Completion {
    pub on_ack: Option<AckHandler>,
    pub on_nak: Option<NakHandler>,
    pub on_response: Option<ResponseHandler>,
}

impl Completion {
    pub fn new() -> Self {
        Completion::default()
    }

    pub fn with_ack(mut self, handler: AckHandler) -> Self {
        self.on_ack = Some(handler);
        self
    }

    pub fn with_nak(mut self, handler: NakHandler) -> Self {
        self.on_nak = Some(handler);
        self
    }

    pub fn with_response(mut self, handler: ResponseHandler) -> Self {
        self.on_response = Some(handler);
        self
    }
}

struct Entry {
    completion: Completion,
    ack_received: bool,
}

/// Outcome of dispatching an `ACK` frame against the table.
pub enum AckOutcome {
    /// No in-flight request with that sequence.
    Unexpected,
    /// An ACK had already been recorded for this sequence; the entry is
    /// removed. ACK-after-ACK is a protocol failure.
    DoubleAck,
    /// Latch set, entry remains pending for the response. The handler (if
    /// any) must be invoked by the caller, outside this table's lock.
    Accepted(Option<AckHandler>),
}

/// Outcome of dispatching a `NAK` frame. The entry is always removed.
pub enum NakOutcome {
    Unexpected,
    /// The ACK latch was already set before this NAK arrived.
    AckThenNak,
    Accepted(Option<NakHandler>),
}

/// Outcome of dispatching a `RSP` frame. The entry is always removed.
pub enum RspOutcome {
    Unexpected,
    /// The ACK latch was never set: a response without a prior ACK.
    MissingAck,
    Accepted(Option<ResponseHandler>),
}

struct TableState {
    next_sequence: u32,
    entries: HashMap<u32, Entry>,
}

/// The sentinel sequence value that is never allocated and never looked up.
pub const NO_SEQUENCE: u32 = 0;

const SEQUENCE_START: u32 = 0xFFFF_FF00;

pub struct InFlightTable {
    state: Mutex<TableState>,
}

impl InFlightTable {
    pub fn new() -> Self {
        InFlightTable {
            state: Mutex::new(TableState {
                next_sequence: SEQUENCE_START,
                entries: HashMap::new(),
            }),
        }
    }

    /// Allocates a fresh sequence number: increments with wraparound, skips
    /// the reserved `0` sentinel, and skips any value already in flight.
    pub fn allocate_sequence(&self) -> u32 {
        let mut state = self.state.lock().unwrap();
        loop {
            let candidate = state.next_sequence;
            state.next_sequence = state.next_sequence.wrapping_add(1);

            if candidate == NO_SEQUENCE {
                continue;
            }
            if state.entries.contains_key(&candidate) {
                continue;
            }
            return candidate;
        }
    }

    /// Registers a completion for a freshly allocated sequence. Duplicate
    /// insertion is a programming error.
    pub fn add(&self, seq: u32, completion: Completion) {
        let mut state = self.state.lock().unwrap();
        let previous = state.entries.insert(
            seq,
            Entry {
                completion,
                ack_received: false,
            },
        );
        assert!(
            previous.is_none(),
            "duplicate in-flight sequence {} inserted",
            seq
        );
    }

    /// Removes an entry unconditionally. No-op for the reserved sentinel or
    /// an absent sequence.
    pub fn delete(&self, seq: u32) {
        if seq == NO_SEQUENCE {
            return;
        }
        let mut state = self.state.lock().unwrap();
        state.entries.remove(&seq);
    }

    /// Drops every in-flight entry. Used on disconnect.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.entries.clear();
    }

    /// True if a request for `seq` is still outstanding.
    pub fn contains(&self, seq: u32) -> bool {
        let state = self.state.lock().unwrap();
        state.entries.contains_key(&seq)
    }

    /// Dispatches an `ACK`.
    pub fn handle_ack(&self, seq: u32) -> AckOutcome {
        let mut state = self.state.lock().unwrap();
        match state.entries.get_mut(&seq) {
            None => AckOutcome::Unexpected,
            Some(entry) if entry.ack_received => {
                state.entries.remove(&seq);
                AckOutcome::DoubleAck
            }
            Some(entry) => {
                entry.ack_received = true;
                AckOutcome::Accepted(entry.completion.on_ack.take())
            }
        }
    }

    /// Dispatches a `NAK`.
    pub fn handle_nak(&self, seq: u32) -> NakOutcome {
        let mut state = self.state.lock().unwrap();
        match state.entries.remove(&seq) {
            None => NakOutcome::Unexpected,
            Some(entry) if entry.ack_received => NakOutcome::AckThenNak,
            Some(mut entry) => NakOutcome::Accepted(entry.completion.on_nak.take()),
        }
    }

    /// Dispatches a `RSP`.
    pub fn handle_rsp(&self, seq: u32) -> RspOutcome {
        let mut state = self.state.lock().unwrap();
        match state.entries.remove(&seq) {
            None => RspOutcome::Unexpected,
            Some(entry) if !entry.ack_received => RspOutcome::MissingAck,
            Some(mut entry) => RspOutcome::Accepted(entry.completion.on_response.take()),
        }
    }
}

impl Default for InFlightTable {
    fn default() -> Self {
        Self::new()
    }
}
