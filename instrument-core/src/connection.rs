//! Connection controller: drives `NotConnected -> WaitingForLogin ->
//! Connected -> DisconnectInProgress`, performs the login handshake, and
//! runs the reconnect ladder after an unexpected disconnect.

use crate::access::AccessLevel;
use crate::async_errors::AsyncErrorQueue;
use crate::config::{ReconnectConfig, TransportConfig, LOGIN_TIMEOUT, RECONNECT_RETRY_INTERVAL};
use crate::events::EventBus;
use crate::inflight::InFlightTable;
use crate::protocol::ProtocolEngine;
use crate::state::{ConnectionState, StateCell};
use crate::transport::{DisconnectCallback, ErrorCallback, PayloadCallback, Transport};
use slog::Logger;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub struct ConnectionController {
    log: Logger,
    transport: Arc<Transport>,
    protocol: Arc<ProtocolEngine>,
    inflight: Arc<InFlightTable>,
    async_errors: Arc<AsyncErrorQueue>,
    events: Arc<EventBus>,
    state: Arc<StateCell>,
    transport_config: Mutex<TransportConfig>,
    reconnect_config: Mutex<ReconnectConfig>,
    login_timeout: Mutex<Duration>,
    identity: (String, String),
    reconnect_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        log: Logger,
        transport: Arc<Transport>,
        protocol: Arc<ProtocolEngine>,
        inflight: Arc<InFlightTable>,
        async_errors: Arc<AsyncErrorQueue>,
        events: Arc<EventBus>,
        state: Arc<StateCell>,
        transport_config: TransportConfig,
        identity: (String, String),
    ) -> Arc<Self> {
        Arc::new(ConnectionController {
            log,
            transport,
            protocol,
            inflight,
            async_errors,
            events,
            state,
            transport_config: Mutex::new(transport_config),
            reconnect_config: Mutex::new(ReconnectConfig::default()),
            login_timeout: Mutex::new(LOGIN_TIMEOUT),
            identity,
            reconnect_thread: Mutex::new(None),
        })
    }

    /// Overrides the login handshake timeout. Exposed for test harnesses
    /// that cannot afford to wait the full default; production callers
    /// should leave this at its default.
    #[cfg(test)]
    pub fn set_login_timeout(&self, timeout: Duration) {
        *self.login_timeout.lock().unwrap() = timeout;
    }

    pub fn is_connected(&self) -> bool {
        self.state.get() == ConnectionState::Connected
    }

    pub fn granted_access(&self) -> AccessLevel {
        self.protocol.granted_access()
    }

    /// Accepts new reconnect-ladder thresholds only if
    /// `warning > 0 && error > warning`; otherwise silently rejects them.
    pub fn set_comm_failure_timeouts(&self, warning: std::time::Duration, error: std::time::Duration) {
        if ReconnectConfig::is_valid(warning, error) {
            *self.reconnect_config.lock().unwrap() = ReconnectConfig {
                warning_delay: warning,
                error_delay: error,
            };
        }
    }

    /// Only legal from `NotConnected`. Opens the transport, performs the
    /// login handshake, and waits up to 10 s for `ACPT`. Returns to
    /// `NotConnected` with no event on any failure.
    pub fn connect(self: &Arc<Self>, access: AccessLevel) -> bool {
        if self.state.get() != ConnectionState::NotConnected {
            return false;
        }
        self.state.set(ConnectionState::WaitingForLogin);

        if !self.open_transport() {
            self.state.set(ConnectionState::NotConnected);
            return false;
        }

        self.protocol.login_waiter().reset();

        let local_addr = self.transport.local_address().unwrap_or([0, 0, 0, 0]);
        let login_payload = self
            .protocol
            .build_login(access, local_addr, &self.identity.0, &self.identity.1);

        if self
            .transport
            .send_message(&login_payload, &self.error_callback())
            .is_err()
        {
            self.transport.disconnect();
            self.state.set(ConnectionState::NotConnected);
            return false;
        }

        let login_timeout = *self.login_timeout.lock().unwrap();
        match self.protocol.login_waiter().wait(login_timeout) {
            Some(granted) => {
                self.protocol.set_granted_access(granted);
                self.state.set(ConnectionState::Connected);
                self.events.connect.emit();
                true
            }
            None => {
                self.transport.disconnect();
                self.state.set(ConnectionState::NotConnected);
                false
            }
        }
    }

    /// Only meaningful from `Connected`. No-op otherwise (P6).
    pub fn disconnect(self: &Arc<Self>) {
        if self.state.get() != ConnectionState::Connected {
            return;
        }
        self.state.set(ConnectionState::DisconnectInProgress);
        self.inflight.clear();
        self.transport.disconnect();
        self.state.set(ConnectionState::NotConnected);
        self.events.disconnect.emit();
    }

    fn open_transport(self: &Arc<Self>) -> bool {
        let config = self.transport_config.lock().unwrap().clone();

        let protocol = self.protocol.clone();
        let on_payload: PayloadCallback = Arc::new(move |payload| protocol.dispatch_inbound(&payload));

        let controller = self.clone();
        let on_disconnect: DisconnectCallback = Arc::new(move || controller.on_unexpected_disconnect());

        self.transport
            .connect(&config, on_payload, on_disconnect, self.error_callback())
            .is_ok()
    }

    fn error_callback(&self) -> ErrorCallback {
        let async_errors = self.async_errors.clone();
        let state = self.state.clone();
        Arc::new(move |message: String| async_errors.report(&state, message))
    }

    /// Invoked from the reader thread when the transport drops without a
    /// preceding user `disconnect()`.
    fn on_unexpected_disconnect(self: &Arc<Self>) {
        self.inflight.clear();

        if self.state.get() != ConnectionState::Connected {
            slog::debug!(self.log, "async disconnect observed outside Connected state; not retrying");
            return;
        }

        self.state.set(ConnectionState::NotConnected);
        self.events.disconnect.emit();
        self.spawn_reconnect_ladder();
    }

    fn spawn_reconnect_ladder(self: &Arc<Self>) {
        let controller = self.clone();
        let access = self.protocol.granted_access();
        let handle = thread::Builder::new()
            .name("instrument-reconnect".into())
            .spawn(move || controller.run_reconnect_ladder(access))
            .expect("failed to spawn reconnect thread");
        *self.reconnect_thread.lock().unwrap() = Some(handle);
    }

    fn run_reconnect_ladder(self: &Arc<Self>, access: AccessLevel) {
        let started = Instant::now();
        let mut warned = false;

        loop {
            if self.connect(access) {
                return;
            }

            let elapsed = started.elapsed();
            let thresholds = *self.reconnect_config.lock().unwrap();

            if elapsed > thresholds.error_delay {
                self.events.disconnect_error.emit();
                return;
            }
            if !warned && elapsed > thresholds.warning_delay {
                self.events.disconnect_warning.emit();
                warned = true;
            }

            thread::sleep(RECONNECT_RETRY_INTERVAL);
        }
    }
}
