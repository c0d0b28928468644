//! End-to-end scenarios driven against a real loopback socket standing in
//! for the instrument. Each test plays the server side by hand with the
//! frame codec and message builders directly, then drives the client
//! through its public API.

use byteorder::{LittleEndian, WriteBytesExt};
use instrument_core::{AccessLevel, Completion, InstrumentClient, TransportConfig};
use instrument_core::{frame, message};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn bind_loopback() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn send_frame(socket: &mut TcpStream, payload: &[u8]) {
    frame::encode(socket, payload).unwrap();
}

fn read_frame(socket: &mut TcpStream) -> Vec<u8> {
    frame::decode(socket, frame::DEFAULT_MAX_FRAME).unwrap()
}

fn send_acpt(socket: &mut TcpStream, access: AccessLevel) {
    let mut payload = Vec::new();
    payload.write_u32::<LittleEndian>(message::ACPT).unwrap();
    payload.write_i32::<LittleEndian>(access.as_wire() as i32).unwrap();
    send_frame(socket, &payload);
}

fn send_ack(socket: &mut TcpStream, seq: u32) {
    let mut payload = Vec::new();
    payload.write_u32::<LittleEndian>(message::ACK).unwrap();
    payload.write_u32::<LittleEndian>(seq).unwrap();
    send_frame(socket, &payload);
}

fn send_nak(socket: &mut TcpStream, seq: u32, status_code: u32) {
    let mut payload = Vec::new();
    payload.write_u32::<LittleEndian>(message::NAK).unwrap();
    payload.write_u32::<LittleEndian>(seq).unwrap();
    payload.write_u32::<LittleEndian>(status_code).unwrap();
    send_frame(socket, &payload);
}

fn send_rsp(socket: &mut TcpStream, seq: u32, subcommand: u32, status_code: u32, data: &[u8]) {
    let mut payload = Vec::new();
    payload.write_u32::<LittleEndian>(message::RSP).unwrap();
    payload.write_u32::<LittleEndian>(seq).unwrap();
    payload.write_u32::<LittleEndian>(subcommand).unwrap();
    payload.write_u32::<LittleEndian>(status_code).unwrap();
    payload.extend_from_slice(data);
    send_frame(socket, &payload);
}

/// Reads a `GET`/`ACTN` frame and returns `(sequence, subcommand)`.
fn read_command(socket: &mut TcpStream) -> (u32, u32) {
    let payload = read_frame(socket);
    let mut cursor = std::io::Cursor::new(&payload[4..12]);
    use byteorder::ReadBytesExt;
    let seq = cursor.read_u32::<LittleEndian>().unwrap();
    let subcommand = cursor.read_u32::<LittleEndian>().unwrap();
    (seq, subcommand)
}

fn wait_until(flag: &AtomicBool, timeout: Duration) -> bool {
    let started = Instant::now();
    while !flag.load(Ordering::SeqCst) {
        if started.elapsed() > timeout {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
    true
}

fn loopback_config(port: u16) -> TransportConfig {
    let mut config = TransportConfig::new("127.0.0.1");
    config.port = port;
    config
}

#[test]
fn happy_get_ack_then_response() {
    let (listener, port) = bind_loopback();

    let server = thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let _login = read_frame(&mut socket);
        send_acpt(&mut socket, AccessLevel::Master);

        let (seq, subcommand) = read_command(&mut socket);
        assert_eq!(subcommand, 0x1234);
        send_ack(&mut socket, seq);
        send_rsp(&mut socket, seq, subcommand, 0, &[0xAA, 0xBB]);
    });

    let client = InstrumentClient::new(loopback_config(port)).unwrap();
    assert!(client.connect(AccessLevel::Master));

    let ack_seen = Arc::new(AtomicBool::new(false));
    let response_data = Arc::new(Mutex::new(None));
    let done = Arc::new(AtomicBool::new(false));

    let ack_seen2 = ack_seen.clone();
    let response_data2 = response_data.clone();
    let done2 = done.clone();
    let completion = Completion::new()
        .with_ack(Box::new(move |_seq| ack_seen2.store(true, Ordering::SeqCst)))
        .with_response(Box::new(move |_seq, _subcommand, status, data| {
            *response_data2.lock().unwrap() = Some((status, data.to_vec()));
            done2.store(true, Ordering::SeqCst);
        }));

    let (ok, _seq) = client.send_get_command(0x1234, &[], completion);
    assert!(ok);

    assert!(wait_until(&done, Duration::from_secs(2)));
    assert!(ack_seen.load(Ordering::SeqCst));
    assert_eq!(
        response_data.lock().unwrap().clone(),
        Some((0u32, vec![0xAA, 0xBB]))
    );

    client.disconnect();
    server.join().unwrap();
}

#[test]
fn nak_path_invokes_nak_handler_not_response() {
    let (listener, port) = bind_loopback();

    let server = thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let _login = read_frame(&mut socket);
        send_acpt(&mut socket, AccessLevel::Master);

        let (seq, _subcommand) = read_command(&mut socket);
        send_nak(&mut socket, seq, 7);
    });

    let client = InstrumentClient::new(loopback_config(port)).unwrap();
    assert!(client.connect(AccessLevel::Master));

    let nak_status = Arc::new(Mutex::new(None));
    let response_seen = Arc::new(AtomicBool::new(false));
    let done = Arc::new(AtomicBool::new(false));

    let nak_status2 = nak_status.clone();
    let done2 = done.clone();
    let response_seen2 = response_seen.clone();
    let completion = Completion::new()
        .with_nak(Box::new(move |_seq, status_code| {
            *nak_status2.lock().unwrap() = Some(status_code);
            done2.store(true, Ordering::SeqCst);
        }))
        .with_response(Box::new(move |_, _, _, _| {
            response_seen2.store(true, Ordering::SeqCst);
        }));

    let (ok, _seq) = client.send_action_command(0x9, &[], completion);
    assert!(ok);

    assert!(wait_until(&done, Duration::from_secs(2)));
    assert_eq!(*nak_status.lock().unwrap(), Some(7));
    assert!(!response_seen.load(Ordering::SeqCst));

    client.disconnect();
    server.join().unwrap();
}

#[test]
fn double_ack_is_reported_as_an_async_error() {
    let (listener, port) = bind_loopback();

    let server = thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let _login = read_frame(&mut socket);
        send_acpt(&mut socket, AccessLevel::Master);

        let (seq, _subcommand) = read_command(&mut socket);
        send_ack(&mut socket, seq);
        send_ack(&mut socket, seq);
        socket
    });

    let client = InstrumentClient::new(loopback_config(port)).unwrap();
    assert!(client.connect(AccessLevel::Master));

    let messages = Arc::new(Mutex::new(Vec::new()));
    let messages2 = messages.clone();
    client.on_async_error(Box::new(move |message| {
        messages2.lock().unwrap().push(message);
    }));

    let (ok, seq) = client.send_get_command(0x1, &[], Completion::new());
    assert!(ok);

    let started = Instant::now();
    while messages.lock().unwrap().is_empty() && started.elapsed() < Duration::from_secs(2) {
        thread::sleep(Duration::from_millis(10));
    }

    let collected = messages.lock().unwrap().clone();
    assert!(
        collected.iter().any(|m| m.contains("Double ACK") && m.contains(&seq.to_string())),
        "expected a Double ACK report, got {:?}",
        collected
    );

    client.disconnect();
    server.join().unwrap();
}

#[test]
fn malformed_frame_triggers_disconnect_and_async_error() {
    let (listener, port) = bind_loopback();

    let server = thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let _login = read_frame(&mut socket);
        send_acpt(&mut socket, AccessLevel::Master);

        // A frame with a mutated SYNC marker: the reader thread must treat
        // this as a fatal decode error and drop the connection.
        use std::io::Write;
        socket.write_all(b"SYN?").unwrap();
        socket.write_all(&4u32.to_le_bytes()).unwrap();
        socket.write_all(b"GET ").unwrap();
        socket.write_all(b"END ").unwrap();
    });

    let client = InstrumentClient::new(loopback_config(port)).unwrap();
    assert!(client.connect(AccessLevel::Master));

    let disconnected = Arc::new(AtomicBool::new(false));
    let disconnected2 = disconnected.clone();
    client.on_disconnect(Box::new(move || disconnected2.store(true, Ordering::SeqCst)));

    let messages = Arc::new(Mutex::new(Vec::new()));
    let messages2 = messages.clone();
    client.on_async_error(Box::new(move |message| {
        messages2.lock().unwrap().push(message);
    }));

    assert!(wait_until(&disconnected, Duration::from_secs(2)));
    assert!(!client.is_connected());

    let collected = messages.lock().unwrap().clone();
    assert!(
        collected.iter().any(|m| m.contains("Bad SYNC")),
        "expected a Bad SYNC report, got {:?}",
        collected
    );

    server.join().unwrap();
}

#[test]
fn reconnect_ladder_warns_then_recovers() {
    let (listener, port) = bind_loopback();

    let first_server = thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let _login = read_frame(&mut socket);
        send_acpt(&mut socket, AccessLevel::Master);
        // Close the connection immediately without replying further, which
        // the reader thread observes as an unexpected peer close.
        drop(socket);
        drop(listener);
    });

    let client = InstrumentClient::new(loopback_config(port)).unwrap();
    client.set_comm_failure_timeouts(Duration::from_millis(100), Duration::from_secs(5));
    assert!(client.connect(AccessLevel::Master));
    first_server.join().unwrap();

    let connect_count = Arc::new(AtomicUsize::new(0));
    let connect_count2 = connect_count.clone();
    client.on_connect(Box::new(move || {
        connect_count2.fetch_add(1, Ordering::SeqCst);
    }));
    let warned = Arc::new(AtomicBool::new(false));
    let warned2 = warned.clone();
    client.on_disconnect_warning(Box::new(move || warned2.store(true, Ordering::SeqCst)));
    let errored = Arc::new(AtomicBool::new(false));
    let errored2 = errored.clone();
    client.on_disconnect_error(Box::new(move || errored2.store(true, Ordering::SeqCst)));

    // Give the reconnect ladder a window of failed attempts (refused
    // connections, since nothing is listening on `port` yet) long enough to
    // pass the 100ms warning threshold at least once.
    thread::sleep(Duration::from_millis(1200));
    assert!(warned.load(Ordering::SeqCst));
    assert!(!errored.load(Ordering::SeqCst));

    let relisten = TcpListener::bind(("127.0.0.1", port)).unwrap();
    let second_server = thread::spawn(move || {
        let (mut socket, _) = relisten.accept().unwrap();
        let _login = read_frame(&mut socket);
        send_acpt(&mut socket, AccessLevel::Master);
        socket
    });

    let started = Instant::now();
    while connect_count.load(Ordering::SeqCst) == 0 && started.elapsed() < Duration::from_secs(5) {
        thread::sleep(Duration::from_millis(20));
    }

    assert_eq!(connect_count.load(Ordering::SeqCst), 1);
    assert!(!errored.load(Ordering::SeqCst));
    assert!(client.is_connected());

    second_server.join().unwrap();
    client.disconnect();
}
