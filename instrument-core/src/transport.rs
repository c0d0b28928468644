//! Transport: owns one TCP stream, serializes writes, and runs a dedicated
//! reader thread that delivers decoded payloads upward.

use crate::config::{TransportConfig, READER_JOIN_TIMEOUT};
use crate::frame::{self, FrameError};
use slog::Logger;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

pub type PayloadCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;
pub type DisconnectCallback = Arc<dyn Fn() + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Debug)]
pub enum TransportError {
    InvalidAddress(crate::config::ArgumentError),
    NotConnected,
    Io(io::Error),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        TransportError::Io(err)
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::InvalidAddress(err) => write!(f, "{}", err),
            TransportError::NotConnected => write!(f, "transport is not connected"),
            TransportError::Io(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for TransportError {}

struct ReaderHandle {
    join_handle: JoinHandle<()>,
    done: Arc<(Mutex<bool>, Condvar)>,
}

/// Owns a stream connection and the state needed to write to it, read from
/// it on a dedicated thread, and tear both down cleanly.
pub struct Transport {
    log: Logger,
    write_stream: Mutex<Option<TcpStream>>,
    local_addr: Mutex<Option<SocketAddr>>,
    disconnect_requested: Arc<AtomicBool>,
    reader: Mutex<Option<ReaderHandle>>,
}

impl Transport {
    pub fn new(log: Logger) -> Self {
        Transport {
            log,
            write_stream: Mutex::new(None),
            local_addr: Mutex::new(None),
            disconnect_requested: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(None),
        }
    }

    /// Opens one stream to `config.server_address : 8080`, applies the
    /// configured send/receive timeouts, and starts the reader thread.
    /// `on_payload` is invoked once per successfully decoded frame;
    /// `on_disconnect` only when the stream drops unexpectedly (never after
    /// a user-requested [`disconnect`](Self::disconnect)).
    pub fn connect(
        &self,
        config: &TransportConfig,
        on_payload: PayloadCallback,
        on_disconnect: DisconnectCallback,
        on_error: ErrorCallback,
    ) -> Result<(), TransportError> {
        let address = config
            .parsed_address()
            .map_err(TransportError::InvalidAddress)?;
        let socket_addr = SocketAddr::from((address, config.port));

        let stream = TcpStream::connect(socket_addr)?;
        stream.set_nodelay(true).ok();
        stream.set_write_timeout(config.send_timeout())?;
        stream.set_read_timeout(config.receive_timeout())?;

        let local_addr = stream.local_addr()?;
        let reader_stream = stream.try_clone()?;

        self.disconnect_requested.store(false, Ordering::SeqCst);
        *self.write_stream.lock().unwrap() = Some(stream);
        *self.local_addr.lock().unwrap() = Some(local_addr);

        let done = Arc::new((Mutex::new(false), Condvar::new()));
        let reader_done = done.clone();
        let reader_disconnect_requested = self.disconnect_requested.clone();
        let max_frame = config.max_frame_bytes;
        let log = self.log.clone();

        let join_handle = thread::Builder::new()
            .name("instrument-reader".into())
            .spawn(move || {
                Self::reader_loop(
                    reader_stream,
                    max_frame,
                    on_payload,
                    on_disconnect,
                    on_error,
                    reader_disconnect_requested,
                    log,
                );
                let (lock, cvar) = &*reader_done;
                *lock.lock().unwrap() = true;
                cvar.notify_all();
            })
            .expect("failed to spawn instrument reader thread");

        *self.reader.lock().unwrap() = Some(ReaderHandle { join_handle, done });

        Ok(())
    }

    fn reader_loop(
        mut stream: TcpStream,
        max_frame: u32,
        on_payload: PayloadCallback,
        on_disconnect: DisconnectCallback,
        on_error: ErrorCallback,
        disconnect_requested: Arc<AtomicBool>,
        log: Logger,
    ) {
        loop {
            match frame::decode(&mut stream, max_frame) {
                Ok(payload) => on_payload(payload),
                Err(err) => {
                    slog::debug!(log, "reader loop exiting"; "reason" => %err);
                    on_error(describe_frame_error(&err));
                    let _ = stream.shutdown(Shutdown::Both);
                    if !disconnect_requested.load(Ordering::SeqCst) {
                        on_disconnect();
                    }
                    return;
                }
            }
        }
    }

    /// Writes one complete envelope in a single critical section so distinct
    /// messages are never interleaved on the wire. Any stream error shuts
    /// the connection down and is reported through `on_error`.
    pub fn send_message(&self, payload: &[u8], on_error: &ErrorCallback) -> Result<(), TransportError> {
        let mut guard = self.write_stream.lock().unwrap();
        let stream = guard.as_mut().ok_or(TransportError::NotConnected)?;
        match frame::encode(stream, payload) {
            Ok(()) => Ok(()),
            Err(err) => {
                on_error(format!("send failed: {}", err));
                let _ = stream.shutdown(Shutdown::Both);
                Err(TransportError::Io(err))
            }
        }
    }

    /// The local IPv4 address bound by the current connection, if any.
    pub fn local_address(&self) -> Option<[u8; 4]> {
        match self.local_addr.lock().unwrap().as_ref() {
            Some(SocketAddr::V4(addr)) => Some(addr.ip().octets()),
            _ => None,
        }
    }

    /// Sets `disconnect_requested`, shuts the stream down to unblock the
    /// reader, and waits a bounded time for it to exit. If the reader has
    /// not exited by then we stop waiting rather than force-terminate it;
    /// the shutdown-triggered read error is expected to wake it shortly
    /// after in any case.
    pub fn disconnect(&self) {
        self.disconnect_requested.store(true, Ordering::SeqCst);

        if let Some(stream) = self.write_stream.lock().unwrap().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        *self.local_addr.lock().unwrap() = None;

        if let Some(reader) = self.reader.lock().unwrap().take() {
            let (lock, cvar) = &*reader.done;
            let guard = lock.lock().unwrap();
            let (done, _) = cvar
                .wait_timeout_while(guard, READER_JOIN_TIMEOUT, |done| !*done)
                .unwrap();
            if *done {
                let _ = reader.join_handle.join();
            } else {
                slog::warn!(self.log, "reader thread did not exit within the join timeout");
            }
        }
    }
}

fn describe_frame_error(err: &FrameError) -> String {
    match err {
        FrameError::BadSync => "Bad SYNC".to_string(),
        FrameError::BadLength(len) => format!("Bad length {}", len),
        FrameError::BadEnd => "Bad END".to_string(),
        FrameError::ShortRead => "short read, peer closed".to_string(),
        FrameError::Io(io_err) => format!("I/O error: {}", io_err),
    }
}
