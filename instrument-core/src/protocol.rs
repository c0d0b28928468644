//! Protocol engine: builds outbound LOGIN/GET/ACTN frames, demultiplexes
//! inbound payloads into ACK/NAK/RSP/STAT/ACPT handling, and enforces
//! access-level gating on outbound actions.

use crate::access::AccessLevel;
use crate::async_errors::AsyncErrorQueue;
use crate::config::LOGIN_TIMEOUT;
use crate::inflight::{AckOutcome, Completion, InFlightTable, NakOutcome, RspOutcome, NO_SEQUENCE};
use crate::message;
use crate::state::{ConnectionState, StateCell};
use crate::status::StatusRegistry;
use crate::transport::{ErrorCallback, Transport};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use slog::Logger;

/// Signals ACPT arrival to whichever thread is blocked in `connect()`.
/// `reset` clears any stale signal before a LOGIN is sent; `wait` blocks up
/// to a timeout for the next `signal`.
pub struct LoginWaiter {
    granted: Mutex<Option<AccessLevel>>,
    cvar: Condvar,
}

impl LoginWaiter {
    pub fn new() -> Self {
        LoginWaiter {
            granted: Mutex::new(None),
            cvar: Condvar::new(),
        }
    }

    pub fn reset(&self) {
        *self.granted.lock().unwrap() = None;
    }

    pub fn signal(&self, access: AccessLevel) {
        *self.granted.lock().unwrap() = Some(access);
        self.cvar.notify_all();
    }

    pub fn wait(&self, timeout: Duration) -> Option<AccessLevel> {
        let guard = self.granted.lock().unwrap();
        let (result, _) = self
            .cvar
            .wait_timeout_while(guard, timeout, |granted| granted.is_none())
            .unwrap();
        *result
    }
}

impl Default for LoginWaiter {
    fn default() -> Self {
        Self::new()
    }
}

pub const LOGIN_WAIT_TIMEOUT: Duration = LOGIN_TIMEOUT;

pub struct ProtocolEngine {
    log: Logger,
    inflight: Arc<InFlightTable>,
    status: Arc<StatusRegistry>,
    async_errors: Arc<AsyncErrorQueue>,
    state: Arc<StateCell>,
    granted_access: AtomicU32,
    login_waiter: Arc<LoginWaiter>,
}

impl ProtocolEngine {
    pub fn new(
        log: Logger,
        inflight: Arc<InFlightTable>,
        status: Arc<StatusRegistry>,
        async_errors: Arc<AsyncErrorQueue>,
        state: Arc<StateCell>,
    ) -> Self {
        ProtocolEngine {
            log,
            inflight,
            status,
            async_errors,
            state,
            granted_access: AtomicU32::new(AccessLevel::Invalid.as_wire()),
            login_waiter: Arc::new(LoginWaiter::new()),
        }
    }

    pub fn login_waiter(&self) -> Arc<LoginWaiter> {
        self.login_waiter.clone()
    }

    pub fn granted_access(&self) -> AccessLevel {
        AccessLevel::from_wire(self.granted_access.load(Ordering::SeqCst) as i32)
    }

    pub fn set_granted_access(&self, access: AccessLevel) {
        self.granted_access.store(access.as_wire(), Ordering::SeqCst);
    }

    pub fn build_login(&self, access: AccessLevel, local_addr: [u8; 4], username: &str, machine_name: &str) -> Vec<u8> {
        message::build_login(access.as_wire(), local_addr, username, machine_name)
    }

    /// Sends a `GET`. Requires `Connected`. Returns `(false, NO_SEQUENCE)`
    /// without writing anything if the precondition fails or the write
    /// itself errors.
    pub fn send_get(
        &self,
        transport: &Transport,
        subcommand: u32,
        data: &[u8],
        completion: Completion,
    ) -> (bool, u32) {
        self.send_command(transport, message::GET, subcommand, data, completion, false)
    }

    /// Sends an `ACTN`. Requires `Connected` and a granted access level in
    /// `{Master, LocalUI, Engineering}`.
    pub fn send_action(
        &self,
        transport: &Transport,
        subcommand: u32,
        data: &[u8],
        completion: Completion,
    ) -> (bool, u32) {
        self.send_command(transport, message::ACTN, subcommand, data, completion, true)
    }

    fn send_command(
        &self,
        transport: &Transport,
        tag: u32,
        subcommand: u32,
        data: &[u8],
        completion: Completion,
        requires_access: bool,
    ) -> (bool, u32) {
        if self.state.get() != ConnectionState::Connected {
            return (false, NO_SEQUENCE);
        }
        if requires_access && !self.granted_access().can_act() {
            return (false, NO_SEQUENCE);
        }

        let seq = self.inflight.allocate_sequence();
        self.inflight.add(seq, completion);

        let payload = message::build_command(tag, seq, subcommand, data);
        let on_error = self.error_callback();
        match transport.send_message(&payload, &on_error) {
            Ok(()) => (true, seq),
            Err(_) => {
                self.inflight.delete(seq);
                (false, NO_SEQUENCE)
            }
        }
    }

    pub fn delete_command_in_progress(&self, seq: u32) {
        self.inflight.delete(seq);
    }

    fn error_callback(&self) -> ErrorCallback {
        let async_errors = self.async_errors.clone();
        let state = self.state.clone();
        Arc::new(move |message: String| async_errors.report(&state, message))
    }

    fn report_error(&self, message: String) {
        slog::debug!(self.log, "protocol error"; "message" => message.as_str());
        self.async_errors.report(&self.state, message);
    }

    /// Routes one decoded payload by its leading tag. Invoked on the reader
    /// thread.
    pub fn dispatch_inbound(&self, payload: &[u8]) {
        let tag = match message::read_tag(payload) {
            Ok(tag) => tag,
            Err(_) => {
                self.report_error("payload too short to contain a message tag".into());
                return;
            }
        };

        match tag {
            message::ACPT => self.handle_acpt(payload),
            message::ACK => self.handle_ack(payload),
            message::NAK => self.handle_nak(payload),
            message::RSP => self.handle_rsp(payload),
            message::STAT => self.handle_stat(payload),
            _ => self.report_error("Unknown MessageType".into()),
        }
    }

    fn handle_acpt(&self, payload: &[u8]) {
        match message::parse_acpt(payload) {
            Ok(body) => {
                let access = AccessLevel::from_wire(body.granted_access);
                self.set_granted_access(access);
                self.login_waiter.signal(access);
            }
            Err(_) => self.report_error("malformed ACPT payload".into()),
        }
    }

    fn handle_ack(&self, payload: &[u8]) {
        let body = match message::parse_ack(payload) {
            Ok(body) => body,
            Err(_) => {
                self.report_error("malformed ACK payload".into());
                return;
            }
        };
        match self.inflight.handle_ack(body.sequence) {
            AckOutcome::Unexpected => {
                self.report_error(format!("Unexpected ACK (sequence {})", body.sequence));
            }
            AckOutcome::DoubleAck => {
                self.report_error(format!("Protocol Failure - Double ACK (sequence {})", body.sequence));
            }
            AckOutcome::Accepted(handler) => {
                if let Some(mut handler) = handler {
                    handler(body.sequence);
                }
            }
        }
    }

    fn handle_nak(&self, payload: &[u8]) {
        let body = match message::parse_nak(payload) {
            Ok(body) => body,
            Err(_) => {
                self.report_error("malformed NAK payload".into());
                return;
            }
        };
        match self.inflight.handle_nak(body.sequence) {
            NakOutcome::Unexpected => {
                self.report_error(format!("Unexpected NAK (sequence {})", body.sequence));
            }
            NakOutcome::AckThenNak => {
                self.report_error(format!("Protocol Failure - ACK - NAK (sequence {})", body.sequence));
            }
            NakOutcome::Accepted(handler) => {
                if let Some(mut handler) = handler {
                    handler(body.sequence, body.status_code);
                }
            }
        }
    }

    fn handle_rsp(&self, payload: &[u8]) {
        let header = match message::parse_rsp_header(payload) {
            Ok(header) => header,
            Err(_) => {
                self.report_error("malformed RSP payload".into());
                return;
            }
        };
        match self.inflight.handle_rsp(header.sequence) {
            RspOutcome::Unexpected => {
                self.report_error(format!("Unexpected RSP (sequence {})", header.sequence));
            }
            RspOutcome::MissingAck => {
                self.report_error(format!("Protocol Failure - Missing ACK (sequence {})", header.sequence));
            }
            RspOutcome::Accepted(handler) => {
                if let Some(mut handler) = handler {
                    let data = &payload[16..];
                    handler(header.sequence, header.subcommand, header.status_code, data);
                }
            }
        }
    }

    fn handle_stat(&self, payload: &[u8]) {
        if self.state.get() != ConnectionState::Connected {
            return;
        }
        if payload.len() < 8 {
            return;
        }
        let header = match message::parse_stat_header(payload) {
            Ok(header) => header,
            Err(_) => return,
        };
        self.status.dispatch(header.substatus, &payload[8..]);
    }
}
