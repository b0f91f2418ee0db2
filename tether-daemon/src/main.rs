/*!
 * tether daemon
 * Names, lists and pairs Bluetooth devices for the `tether` client
 */

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{info, warn};

use tether_daemon::ipc::{IpcServer, Request, Response};
use tether_daemon::{DaemonConfig, DeviceService};

#[derive(Parser)]
#[command(name = "tetherd")]
#[command(about = "Bluetooth device naming and pairing daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "/etc/tether/tetherd.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run,
    /// Check daemon status
    Status,
    /// Stop the daemon
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("tether_daemon={},tetherd={}", log_level, log_level))
        .init();

    let config = DaemonConfig::load(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config).await,
        Commands::Status => check_status(&config).await,
        Commands::Stop => stop_daemon(&config).await,
    }
}

async fn run_daemon(config: DaemonConfig) -> Result<()> {
    info!("tether daemon starting...");

    let service = Arc::new(
        DeviceService::from_config(&config)
            .await
            .context("failed to open the name store")?,
    );

    let listener = bind_socket(&config.socket_path)?;
    let server = IpcServer::new(listener, service);

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            shutdown.notify_one();
        }
    });

    info!("tether daemon ready on socket: {}", config.socket_path.display());
    let result = server.run().await;

    if let Err(e) = std::fs::remove_file(&config.socket_path) {
        warn!("Could not remove socket {}: {}", config.socket_path.display(), e);
    }
    info!("tether daemon stopped");
    result
}

fn bind_socket(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    // A previous run that died leaves its socket file behind.
    if path.exists() {
        std::fs::remove_file(path).with_context(|| format!("stale socket {}", path.display()))?;
    }
    UnixListener::bind(path).with_context(|| format!("cannot bind {}", path.display()))
}

async fn check_status(config: &DaemonConfig) -> Result<()> {
    match request(&config.socket_path, &Request::Status).await? {
        Response::Status { status } => {
            println!("tether daemon running");
            println!("  names file:       {}", status.names_file);
            println!("  pending renames:  {}", status.pending_renames);
            println!("  pairing:          {}", status.pairing_mechanisms.join(", "));
            println!("  enumeration:      {}", status.enumerators.join(", "));
        }
        other => println!("Unexpected response: {:?}", other),
    }
    Ok(())
}

async fn stop_daemon(config: &DaemonConfig) -> Result<()> {
    match request(&config.socket_path, &Request::Shutdown).await? {
        Response::Success { message } => println!("{}", message),
        other => println!("Unexpected response: {:?}", other),
    }
    Ok(())
}

async fn request(socket: &Path, request: &Request) -> Result<Response> {
    let stream = UnixStream::connect(socket)
        .await
        .with_context(|| format!("daemon not reachable at {}", socket.display()))?;
    let (read_half, mut write_half) = stream.into_split();

    let mut payload = serde_json::to_vec(request)?;
    payload.push(b'\n');
    write_half.write_all(&payload).await?;

    let mut line = String::new();
    BufReader::new(read_half).read_line(&mut line).await?;
    Ok(serde_json::from_str(line.trim())?)
}
