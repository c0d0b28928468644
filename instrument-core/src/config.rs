//! Transport and reconnect configuration, deserialized with `serde_json`
//! from a JSON config file.

use serde::Deserialize;
use std::net::Ipv4Addr;
use std::time::Duration;

pub const INSTRUMENT_PORT: u16 = 8080;
pub const DEFAULT_WARNING_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_ERROR_DELAY: Duration = Duration::from_secs(30);
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);
pub const RECONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(1);
pub const READER_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Login identity literals for the constrained device profile.
pub const DEFAULT_USERNAME: &str = "Display";
pub const DEFAULT_MACHINE_NAME: &str = "Cortex";

#[derive(Debug)]
pub struct ArgumentError(pub String);

impl std::fmt::Display for ArgumentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid argument: {}", self.0)
    }
}

impl std::error::Error for ArgumentError {}

/// Transport construction parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Parsed eagerly at construction; an unparseable literal is an
    /// argument error, never a connect-time failure.
    pub server_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub send_timeout_ms: u64,
    #[serde(default)]
    pub receive_timeout_ms: u64,
    #[serde(default = "default_max_frame")]
    pub max_frame_bytes: u32,
}

fn default_port() -> u16 {
    INSTRUMENT_PORT
}

fn default_max_frame() -> u32 {
    crate::frame::DEFAULT_MAX_FRAME
}

impl TransportConfig {
    pub fn new(server_address: impl Into<String>) -> Self {
        TransportConfig {
            server_address: server_address.into(),
            port: INSTRUMENT_PORT,
            send_timeout_ms: 0,
            receive_timeout_ms: 0,
            max_frame_bytes: crate::frame::DEFAULT_MAX_FRAME,
        }
    }

    /// Parses and validates `server_address` as an IPv4 literal. An
    /// unparseable literal is an invalid-argument error at construction
    /// time, never a connect-time failure.
    pub fn parsed_address(&self) -> Result<Ipv4Addr, ArgumentError> {
        self.server_address
            .parse::<Ipv4Addr>()
            .map_err(|err| ArgumentError(format!("bad server address '{}': {}", self.server_address, err)))
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        (self.send_timeout_ms > 0).then(|| Duration::from_millis(self.send_timeout_ms))
    }

    pub fn receive_timeout(&self) -> Option<Duration> {
        (self.receive_timeout_ms > 0).then(|| Duration::from_millis(self.receive_timeout_ms))
    }
}

/// Reconnect-ladder timeouts.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ReconnectConfig {
    #[serde(with = "duration_millis", default = "default_warning_delay")]
    pub warning_delay: Duration,
    #[serde(with = "duration_millis", default = "default_error_delay")]
    pub error_delay: Duration,
}

fn default_warning_delay() -> Duration {
    DEFAULT_WARNING_DELAY
}

fn default_error_delay() -> Duration {
    DEFAULT_ERROR_DELAY
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            warning_delay: DEFAULT_WARNING_DELAY,
            error_delay: DEFAULT_ERROR_DELAY,
        }
    }
}

impl ReconnectConfig {
    /// Validates a candidate `(warning, error)` pair: the warning delay
    /// must be nonzero and strictly less than the error delay.
    pub fn is_valid(warning: Duration, error: Duration) -> bool {
        !warning.is_zero() && error > warning
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
