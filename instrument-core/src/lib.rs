//! Client-side protocol engine for the instrument control protocol: frame
//! codec, transport, in-flight request tracking, protocol dispatch, and the
//! connection controller with its reconnect ladder.

pub mod access;
pub mod async_errors;
pub mod client;
pub mod config;
pub mod connection;
pub mod events;
pub mod frame;
pub mod inflight;
pub mod logging;
pub mod message;
pub mod protocol;
pub mod state;
pub mod status;
pub mod transport;

pub use access::AccessLevel;
pub use client::InstrumentClient;
pub use config::{ArgumentError, ReconnectConfig, TransportConfig};
pub use events::SubscriptionId;
pub use inflight::Completion;
pub use status::StatusHandler;
