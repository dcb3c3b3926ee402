use std::io::{self, BufRead, Write};
use std::time::Duration;
use stomp_stream::{
    Command, ConnError, Connection, ConnectionState, EventStream, Frame, StompConfig,
};
use tokio::sync::mpsc;

use super::args::Cli;
use super::commands::{CommandResult, Subscriptions, execute_command, print_help};
use super::exit_codes;

/// How long to wait for the broker to answer CONNECT.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Run the CLI in plain line mode
pub async fn run(cli: &Cli) -> Result<(), (String, u8)> {
    let config = StompConfig::default()
        .with_host(cli.host.clone())
        .with_port(cli.port)
        .with_heartbeat(cli.heartbeat.clone());
    let address = config.address();

    let conn = Connection::new(config);
    let mut states = conn.states();
    let mut frames = conn.frames();
    let mut errors = conn.errors();

    println!("Connecting to {}...", address);
    conn.connect()
        .await
        .map_err(|e| format_connection_error(&e, &address))?;
    wait_for(&mut states, &mut errors, ConnectionState::TransportReady, &address).await?;

    conn.authenticate(cli.login.as_str(), cli.passcode.as_str())
        .await
        .map_err(|e| format_connection_error(&e, &address))?;
    tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        wait_for(&mut states, &mut errors, ConnectionState::Ready, &address),
    )
    .await
    .map_err(|_| {
        (
            format!("No CONNECTED frame from {}", address),
            exit_codes::PROTOCOL_ERROR,
        )
    })??;

    println!("Connected.");

    let mut subs = Subscriptions::default();
    for dest in &cli.subscribe {
        let id = subs
            .subscribe(&conn, dest)
            .await
            .map_err(|msg| (msg, exit_codes::PROTOCOL_ERROR))?;
        println!("Subscribed to: {} (id {})", dest, id);
    }

    // Channel to receive user commands from stdin reader
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<String>(16);

    // Spawn blocking stdin reader
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if cmd_tx.blocking_send(l).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    println!();
    print_help();
    println!();
    prompt();

    let result = loop {
        tokio::select! {
            line = cmd_rx.recv() => {
                let Some(line) = line else { break Ok(()) };
                match execute_command(&line, &conn, &mut subs).await {
                    CommandResult::Ok => {}
                    CommandResult::Quit => break Ok(()),
                    CommandResult::Info(msg) => println!("{}", msg),
                    CommandResult::Error(msg) => eprintln!("{}", msg),
                }
                prompt();
            }
            Some(frame) = frames.recv() => {
                if print_frame(&frame, &subs) {
                    prompt();
                }
            }
            Some(err) = errors.recv() => {
                print_error(&err);
                prompt();
            }
            Some(state) = states.recv() => {
                if state == ConnectionState::Disconnected {
                    break Err((
                        format!("Connection to {} lost", address),
                        exit_codes::NETWORK_ERROR,
                    ));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                break Ok(());
            }
        }
    };

    if result.is_ok() {
        println!("Disconnecting...");
        if let Err(e) = conn.disconnect().await {
            eprintln!("Disconnect error: {}", e);
        }
    }
    result
}

fn prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}

/// Wait until the connection reaches `target`, failing if it drops to
/// Disconnected or the broker rejects the handshake.
async fn wait_for(
    states: &mut EventStream<ConnectionState>,
    errors: &mut EventStream<ConnError>,
    target: ConnectionState,
    address: &str,
) -> Result<(), (String, u8)> {
    let mut last_error = None;
    loop {
        tokio::select! {
            state = states.recv() => match state {
                Some(state) if state == target => return Ok(()),
                Some(ConnectionState::Disconnected) | None => {
                    return Err(match last_error.or_else(|| errors.try_recv()) {
                        Some(err) => format_connection_error(&err, address),
                        None => (
                            format!("Connection closed: {}", address),
                            exit_codes::NETWORK_ERROR,
                        ),
                    });
                }
                Some(_) => {}
            },
            Some(err) = errors.recv() => {
                if matches!(err, ConnError::Protocol(_)) {
                    return Err(format_connection_error(&err, address));
                }
                last_error = Some(err);
            }
        }
    }
}

/// Print an inbound frame. Returns false for frames that are not shown.
fn print_frame(frame: &Frame, subs: &Subscriptions) -> bool {
    match frame.command {
        Command::Message => {
            let dest = frame
                .get_header("subscription")
                .and_then(|id| subs.destination(id))
                .or(frame.destination())
                .unwrap_or("?");
            println!("\n[{}] MESSAGE received:", dest);
            for h in &frame.headers {
                println!("  {}: {}", h.name, h.value);
            }
            if let Some(body) = &frame.body {
                match std::str::from_utf8(body) {
                    Ok(s) => println!("  Body: {}", s),
                    Err(_) => println!("  Body: ({} bytes, binary)", body.len()),
                }
            }
            true
        }
        Command::Receipt => {
            println!("\n[RECEIPT] {}", frame.get_header("receipt-id").unwrap_or("?"));
            true
        }
        // ERROR frames are reported through the error stream
        _ => false,
    }
}

fn print_error(err: &ConnError) {
    match err {
        ConnError::Protocol(server_err) => {
            let msg = match &server_err.body {
                Some(body) => format!("{}: {}", server_err.message, body),
                None => server_err.message.clone(),
            };
            eprintln!("\n[BROKER ERROR] {}", msg);
            for h in &server_err.frame.headers {
                eprintln!("  {}: {}", h.name, h.value);
            }
        }
        other => eprintln!("\n[ERROR] {}", other),
    }
}

/// Format a connection error with user-friendly messaging
fn format_connection_error(err: &ConnError, address: &str) -> (String, u8) {
    match err {
        ConnError::Transport(io_err) => {
            let message = match io_err.kind() {
                io::ErrorKind::ConnectionRefused => format!("Connection refused: {}", address),
                io::ErrorKind::TimedOut => format!("Connection timed out: {}", address),
                _ => format!("Connection failed: {}", io_err),
            };
            (message, exit_codes::NETWORK_ERROR)
        }
        ConnError::Protocol(server_err) => {
            let mut message = format!("Authentication failed: {}", server_err.message);
            if let Some(body) = &server_err.body {
                message.push_str(&format!(" ({})", body));
            }
            (message, exit_codes::AUTH_ERROR)
        }
        ConnError::Closed => (
            format!("Connection closed: {}", address),
            exit_codes::NETWORK_ERROR,
        ),
        other => (
            format!("Protocol error: {}", other),
            exit_codes::PROTOCOL_ERROR,
        ),
    }
}
