//! Multi-room chat server - Entry Point
//!
//! Runs the event loop on a blocking thread and feeds it operator commands
//! read from stdin.

use std::env;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use multiroom_chat::{ChatServer, ServerConfig, ServerHandle};

const CONSOLE_HELP: &str = "commands: /kick <nick>, /ban <nick>, /room <name>, /say <text>, /quit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG to control log level, e.g. RUST_LOG=multiroom_chat=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("multiroom_chat=info")),
        )
        .init();

    // Optional TOML config path
    let config = match env::args().nth(1) {
        Some(path) => {
            info!("Loading config from {}", path);
            ServerConfig::load(&path)?
        }
        None => ServerConfig::default(),
    };

    let (server, handle) = ChatServer::bind(config)?;
    let mut server_task = tokio::task::spawn_blocking(move || server.run());

    info!("{}", CONSOLE_HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            res = &mut server_task => {
                res??;
                return Ok(());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !run_console_command(&handle, line.trim()) {
                        break;
                    }
                }
                // stdin closed: keep serving until interrupted
                Ok(None) => {
                    tokio::signal::ctrl_c().await?;
                    info!("Interrupted");
                    break;
                }
                Err(e) => {
                    error!("Failed to read console: {}", e);
                    break;
                }
            },
        }
    }

    handle.shutdown()?;
    server_task.await??;
    Ok(())
}

/// Apply one console line. Returns false on `/quit`.
fn run_console_command(handle: &ServerHandle, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }

    let (cmd, arg) = match line.split_once(' ') {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (line, ""),
    };

    let result = match (cmd, arg) {
        ("/quit", _) => return false,
        ("/kick", nick) if !nick.is_empty() => handle.kick(nick),
        ("/ban", nick) if !nick.is_empty() => handle.ban(nick),
        ("/room", name) if !name.is_empty() => handle.create_room(name),
        ("/say", text) if !text.is_empty() => handle.announce(text),
        _ => {
            warn!("Unknown command '{}'; {}", line, CONSOLE_HELP);
            return true;
        }
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
    }
    true
}
