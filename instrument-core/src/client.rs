//! `InstrumentClient`: the public entry point bundling the in-flight table,
//! status registry, event bus, async error queue, transport, and connection
//! controller into one handle.

use crate::access::AccessLevel;
use crate::async_errors::AsyncErrorQueue;
use crate::config::{ArgumentError, TransportConfig, DEFAULT_MACHINE_NAME, DEFAULT_USERNAME};
use crate::connection::ConnectionController;
use crate::events::{EventBus, SubscriptionId};
use crate::inflight::{Completion, InFlightTable};
use crate::logging::default_logger;
use crate::protocol::ProtocolEngine;
use crate::state::{ConnectionState, StateCell};
use crate::status::{StatusHandler, StatusRegistry};
use crate::transport::Transport;
use slog::Logger;
use std::sync::Arc;
use std::time::Duration;

pub struct InstrumentClient {
    inflight: Arc<InFlightTable>,
    status: Arc<StatusRegistry>,
    events: Arc<EventBus>,
    transport: Arc<Transport>,
    protocol: Arc<ProtocolEngine>,
    connection: Arc<ConnectionController>,
}

impl InstrumentClient {
    pub fn new(transport_config: TransportConfig) -> Result<Self, ArgumentError> {
        Self::with_logger(transport_config, default_logger())
    }

    pub fn with_logger(transport_config: TransportConfig, log: Logger) -> Result<Self, ArgumentError> {
        transport_config.parsed_address()?;

        let state = Arc::new(StateCell::new(ConnectionState::NotConnected));
        let inflight = Arc::new(InFlightTable::new());
        let status = Arc::new(StatusRegistry::new());
        let events = Arc::new(EventBus::new());

        let async_error_subscribers = Arc::new(crate::events::Subscribers::new());
        let async_errors = AsyncErrorQueue::start(async_error_subscribers.clone(), log.clone());

        let protocol = Arc::new(ProtocolEngine::new(
            log.clone(),
            inflight.clone(),
            status.clone(),
            async_errors.clone(),
            state.clone(),
        ));
        let transport = Arc::new(Transport::new(log.clone()));

        let connection = ConnectionController::new(
            log.clone(),
            transport.clone(),
            protocol.clone(),
            inflight.clone(),
            async_errors.clone(),
            events.clone(),
            state,
            transport_config,
            (DEFAULT_USERNAME.to_string(), DEFAULT_MACHINE_NAME.to_string()),
        );

        // Bridge the async error queue's raw-string subscribers into the
        // public event bus so `on_async_error` observes them too.
        let bus_async_errors = events.clone();
        async_error_subscribers.subscribe(Box::new(move |message| {
            bus_async_errors.async_error.emit(message);
        }));

        Ok(InstrumentClient {
            inflight,
            status,
            events,
            transport,
            protocol,
            connection,
        })
    }

    pub fn connect(&self, access: AccessLevel) -> bool {
        self.connection.connect(access)
    }

    pub fn disconnect(&self) {
        self.connection.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn granted_access(&self) -> AccessLevel {
        self.connection.granted_access()
    }

    pub fn set_comm_failure_timeouts(&self, warning: Duration, error: Duration) {
        self.connection.set_comm_failure_timeouts(warning, error)
    }

    pub fn send_get_command(&self, subcommand: u32, data: &[u8], completion: Completion) -> (bool, u32) {
        self.protocol.send_get(&self.transport, subcommand, data, completion)
    }

    pub fn send_action_command(&self, subcommand: u32, data: &[u8], completion: Completion) -> (bool, u32) {
        self.protocol.send_action(&self.transport, subcommand, data, completion)
    }

    pub fn delete_command_in_progress(&self, seq: u32) {
        self.protocol.delete_command_in_progress(seq)
    }

    /// Registers a handler for one substatus. Returns `false` if a handler
    /// is already registered for it.
    pub fn register_status_handler(&self, substatus: u32, handler: StatusHandler) -> bool {
        self.status.register(substatus, handler)
    }

    /// Registers the singleton fallback handler. Returns `false` if one is
    /// already registered.
    pub fn register_unhandled_status_handler(&self, handler: StatusHandler) -> bool {
        self.status.register_unhandled(handler)
    }

    pub fn on_connect(&self, handler: Box<dyn FnMut() + Send>) -> SubscriptionId {
        self.events.connect.subscribe(handler)
    }

    pub fn on_disconnect(&self, handler: Box<dyn FnMut() + Send>) -> SubscriptionId {
        self.events.disconnect.subscribe(handler)
    }

    pub fn on_disconnect_warning(&self, handler: Box<dyn FnMut() + Send>) -> SubscriptionId {
        self.events.disconnect_warning.subscribe(handler)
    }

    pub fn on_disconnect_error(&self, handler: Box<dyn FnMut() + Send>) -> SubscriptionId {
        self.events.disconnect_error.subscribe(handler)
    }

    pub fn on_async_error(&self, handler: Box<dyn FnMut(String) + Send>) -> SubscriptionId {
        self.events.async_error.subscribe(handler)
    }
}
