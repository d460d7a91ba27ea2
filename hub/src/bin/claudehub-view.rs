// ClaudeHub remote viewer
// Streams one session's terminal from a host; stdin lines are sent as input

use anyhow::{Context, Result};
use claudehub_lib::config::{Config, Settings};
use claudehub_lib::remote::transport::EnvTokenSource;
use claudehub_lib::remote::{
    BridgeConfig, ConnectionMachine, ConnectionState, HostLink, SocketTransport, StreamBridge,
    ViewerEvent,
};
use std::env;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

fn print_help() {
    println!(
        r#"claudehub-view - stream a ClaudeHub session from a host

USAGE:
    claudehub-view [--host <host:port>] <session-id>

OPTIONS:
    --host, -H <host:port>    Host address (default: "host" in settings.json)
    --help, -h                Show this help

ENVIRONMENT:
    CLAUDEHUB_TOKEN           Credential sent in the handshake
    CLAUDEHUB_DIR             Directory holding settings.json

Lines typed on stdin are sent to the session. Ctrl-C exits."#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the terminal content
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let mut host: Option<String> = None;
    let mut session_id: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--host" | "-H" => {
                i += 1;
                if i < args.len() {
                    host = Some(args[i].clone());
                }
            }
            other if session_id.is_none() => session_id = Some(other.to_string()),
            other => {
                eprintln!("Unexpected argument: {}", other);
                print_help();
                std::process::exit(2);
            }
        }
        i += 1;
    }

    let Some(session_id) = session_id else {
        print_help();
        std::process::exit(2);
    };

    let settings = Settings::load(&Config::from_env());
    let host = host
        .or_else(|| settings.host.clone())
        .context("No host given; pass --host or set \"host\" in settings.json")?;

    view(&host, &session_id, &settings).await
}

async fn view(host: &str, session_id: &str, settings: &Settings) -> Result<()> {
    let transport = Arc::new(SocketTransport::new(
        host,
        Arc::new(EnvTokenSource::default()),
        settings.stream.request_timeout(),
    ));
    let machine = Arc::new(ConnectionMachine::new(
        transport.clone(),
        &settings.reconnect,
    ));
    machine
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", host))?;

    let link = HostLink::spawn(machine.clone(), transport.clone());
    let (bridge, mut events) = StreamBridge::open(
        session_id,
        transport,
        machine.subscribe(),
        BridgeConfig::from(&settings.stream),
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,

            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => bridge.send_text(&format!("{}\n", line)),
                Ok(None) => stdin_open = false,
                Err(e) => {
                    eprintln!("stdin error: {}", e);
                    stdin_open = false;
                }
            },

            event = events.recv() => {
                let Some(event) = event else { break };
                if !render(event) {
                    break;
                }
            }
        }
    }

    bridge.close().await;
    link.shutdown().await;
    Ok(())
}

/// Print one viewer event; false when the viewer should exit
fn render(event: ViewerEvent) -> bool {
    match event {
        ViewerEvent::Content {
            content,
            is_running,
        } => {
            let mut stdout = std::io::stdout();
            let _ = write!(stdout, "\x1b[2J\x1b[H{}", content);
            if !is_running {
                let _ = write!(stdout, "\n[session not running]");
            }
            let _ = stdout.flush();
        }
        ViewerEvent::Sent => eprintln!("[sent]"),
        ViewerEvent::SentCleared => {}
        ViewerEvent::SendFailed { message, text } => {
            eprintln!("[send failed: {}] {}", message, text.trim_end());
        }
        ViewerEvent::Connection(ConnectionState::Disconnected) => {
            eprintln!("[disconnected]");
            return false;
        }
        ViewerEvent::Connection(state) => eprintln!("[{}]", state),
        ViewerEvent::SubscribeFailed(message) => eprintln!("[subscribe failed: {}]", message),
        ViewerEvent::SubscriptionLost => {
            eprintln!("[session ended on host]");
            return false;
        }
    }
    true
}
