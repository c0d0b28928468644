//! Pluggable diagnostic sink.
//!
//! Callers take a `slog::Logger` at construction and never reach for a
//! global singleton. The default is a no-op `Discard` drain; a host program
//! that wants an append-only file sink, toggled by the presence of a
//! sentinel file, builds one with [`sentinel_toggled_logger`] and passes
//! it in.

use slog::{Drain, Logger};
use sloggers::file::FileLoggerBuilder;
use sloggers::types::Severity;
use sloggers::Build;
use std::path::Path;

/// A logger that discards everything. Used when the host does not care to
/// observe the core's diagnostics.
pub fn default_logger() -> Logger {
    Logger::root(slog::Discard, slog::o!())
}

/// Builds a best-effort append-only file sink. The core never depends on
/// this succeeding: construction failures here are the host's problem to
/// surface, not the protocol engine's.
pub fn file_logger(path: impl AsRef<Path>) -> Result<Logger, sloggers::Error> {
    let drain = FileLoggerBuilder::new(path.as_ref())
        .level(Severity::Debug)
        .build()?;
    Ok(Logger::root(drain.fuse(), slog::o!()))
}

/// Builds a file sink only if `sentinel_path` exists, otherwise falls back
/// to [`default_logger`]. The host decides both paths; nothing here is
/// hard-wired to a particular sentinel location.
pub fn sentinel_toggled_logger(sentinel_path: impl AsRef<Path>, log_path: impl AsRef<Path>) -> Logger {
    if sentinel_path.as_ref().exists() {
        match file_logger(log_path) {
            Ok(logger) => return logger,
            Err(_) => return default_logger(),
        }
    }
    default_logger()
}
