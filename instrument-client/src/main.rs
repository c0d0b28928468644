use clap::{App, Arg};
use instrument_core::{AccessLevel, Completion, InstrumentClient, TransportConfig};
use slog::Logger;
use std::io::{self, Write};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn parse_access(raw: &str) -> AccessLevel {
    match raw.to_ascii_lowercase().as_str() {
        "viewonly" => AccessLevel::ViewOnly,
        "master" => AccessLevel::Master,
        "localui" => AccessLevel::LocalUI,
        "engineering" => AccessLevel::Engineering,
        other => {
            eprintln!("unrecognized access level '{}', falling back to Master", other);
            AccessLevel::Master
        }
    }
}

fn build_logger(log_file: Option<&str>) -> Logger {
    match log_file {
        Some(path) => instrument_core::logging::file_logger(path).unwrap_or_else(|err| {
            eprintln!("could not open log file: {}", err);
            instrument_core::logging::default_logger()
        }),
        None => instrument_core::logging::default_logger(),
    }
}

fn main() {
    let matches = App::new("Instrument Client")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Connects to an instrument and issues a single GET or ACTN command.")
        .arg(
            Arg::with_name("ADDRESS")
                .help("IPv4 address of the instrument")
                .required(true),
        )
        .arg(
            Arg::with_name("port")
                .long("port")
                .takes_value(true)
                .help("TCP port (default 8080)"),
        )
        .arg(
            Arg::with_name("access")
                .long("access")
                .takes_value(true)
                .help("Requested access level: viewonly, master, localui, engineering"),
        )
        .arg(
            Arg::with_name("get")
                .long("get")
                .takes_value(true)
                .help("Subcommand (hex) to send as a GET"),
        )
        .arg(
            Arg::with_name("action")
                .long("action")
                .takes_value(true)
                .help("Subcommand (hex) to send as an ACTN"),
        )
        .arg(
            Arg::with_name("log-file")
                .long("log-file")
                .takes_value(true)
                .help("Append diagnostic output to this file"),
        )
        .get_matches();

    let address = matches.value_of("ADDRESS").unwrap();
    let mut config = TransportConfig::new(address);
    if let Some(port) = matches.value_of("port") {
        config.port = port.parse().unwrap_or_else(|_| {
            eprintln!("invalid --port value '{}'", port);
            process::exit(2);
        });
    }

    let access = parse_access(matches.value_of("access").unwrap_or("master"));
    let log = build_logger(matches.value_of("log-file"));

    let client = InstrumentClient::with_logger(config, log).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(2);
    });

    client.on_connect(Box::new(|| println!("connected")));
    client.on_disconnect(Box::new(|| println!("disconnected")));
    client.on_disconnect_warning(Box::new(|| println!("warning: still reconnecting")));
    client.on_disconnect_error(Box::new(|| println!("error: reconnect abandoned")));
    client.on_async_error(Box::new(|message| eprintln!("async error: {}", message)));

    if !client.connect(access) {
        eprintln!("failed to connect to {}", address);
        process::exit(1);
    }

    let done = Arc::new(AtomicBool::new(false));

    if let Some(raw) = matches.value_of("get") {
        let subcommand = parse_hex(raw);
        let done2 = done.clone();
        let (ok, seq) = client.send_get_command(
            subcommand,
            &[],
            Completion::new().with_response(Box::new(move |seq, subcommand, status, data| {
                println!(
                    "RSP seq={} subcommand={:#x} status={} data={:?}",
                    seq, subcommand, status, data
                );
                done2.store(true, Ordering::SeqCst);
            })),
        );
        if !ok {
            eprintln!("GET rejected (not connected)");
        } else {
            println!("sent GET seq={}", seq);
        }
    } else if let Some(raw) = matches.value_of("action") {
        let subcommand = parse_hex(raw);
        let done2 = done.clone();
        let (ok, seq) = client.send_action_command(
            subcommand,
            &[],
            Completion::new().with_ack(Box::new(move |seq| println!("ACK seq={}", seq))).with_response(
                Box::new(move |seq, subcommand, status, data| {
                    println!(
                        "RSP seq={} subcommand={:#x} status={} data={:?}",
                        seq, subcommand, status, data
                    );
                    done2.store(true, Ordering::SeqCst);
                }),
            ),
        );
        if !ok {
            eprintln!("ACTN rejected (access={:?})", client.granted_access());
        } else {
            println!("sent ACTN seq={}", seq);
        }
    } else {
        done.store(true, Ordering::SeqCst);
    }

    while !done.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(50));
    }

    io::stdout().flush().ok();
    client.disconnect();
}

fn parse_hex(raw: &str) -> u32 {
    let trimmed = raw.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(trimmed, 16).unwrap_or_else(|_| {
        eprintln!("invalid hex value '{}'", raw);
        process::exit(2);
    })
}
