/*!
 * tether
 * Command-line front end for the tether Bluetooth daemon
 */

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;

mod client;

use client::{Device, Request, Response, TetherClient};

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "List, name and pair Bluetooth devices")]
struct Cli {
    /// Daemon socket path
    #[arg(short, long, default_value = "/run/tether/tether.sock")]
    socket: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Live devices merged with saved names
    List,
    /// Saved names only
    Names,
    /// Set a friendly name (empty name forgets it)
    Rename { identity: String, name: String },
    /// Pair a device
    Pair { identity: String },
    /// Remove a pairing
    Unpair { identity: String },
    /// Forget every saved name
    Clear,
    /// Results of recent renames
    Reports,
    /// Daemon status
    Status,
    /// Stop the daemon
    Stop,
}

impl Commands {
    fn into_request(self) -> Request {
        match self {
            Commands::List => Request::ListDevices,
            Commands::Names => Request::ReadNames,
            Commands::Rename { identity, name } => Request::RenameDevice { identity, name },
            Commands::Pair { identity } => Request::Pair { identity },
            Commands::Unpair { identity } => Request::Unpair { identity },
            Commands::Clear => Request::ClearNames,
            Commands::Reports => Request::RenameReports,
            Commands::Status => Request::Status,
            Commands::Stop => Request::Shutdown,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let client = TetherClient::new(cli.socket);

    let response = client.send_request(cli.command.into_request()).await?;
    if print_response(response) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Returns `false` for an `Error` response.
fn print_response(response: Response) -> bool {
    match response {
        Response::DeviceList { devices } => print!("{}", render_devices(&devices)),
        Response::Names { names } => {
            if names.is_empty() {
                println!("No saved names");
            }
            for (identity, name) in names {
                println!("{}  {}", identity, name);
            }
        }
        Response::Success { message } => {
            if !message.is_empty() {
                println!("{}", message);
            }
        }
        Response::Error { message } => {
            eprintln!("Error: {}", message);
            return false;
        }
        Response::RenameReports { reports } => {
            if reports.is_empty() {
                println!("No renames completed since last check");
            }
            for report in reports {
                let outcome = if report.saved {
                    "saved".to_string()
                } else {
                    format!("failed: {}", report.error.as_deref().unwrap_or("unknown error"))
                };
                println!(
                    "{}  {}  \"{}\"  {}",
                    report.at.format("%H:%M:%S"),
                    report.identity,
                    report.name,
                    outcome
                );
            }
        }
        Response::Status { status } => {
            println!("Names file:       {}", status.names_file);
            println!("Pending renames:  {}", status.pending_renames);
            println!("Pairing order:    {}", status.pairing_mechanisms.join(", "));
            println!("Enumerators:      {}", status.enumerators.join(", "));
        }
    }
    true
}

fn render_devices(devices: &[Device]) -> String {
    if devices.is_empty() {
        return "No devices\n".to_string();
    }

    let name_width = devices
        .iter()
        .map(|d| d.display_name.chars().count())
        .max()
        .unwrap_or(0)
        .max("NAME".len());
    let status_width = devices
        .iter()
        .map(|d| d.status.chars().count())
        .max()
        .unwrap_or(0)
        .max("STATUS".len());

    let mut out = format!(
        "{:<name_width$}  {:<17}  {:<status_width$}\n",
        "NAME", "DEVICE", "STATUS"
    );
    for device in devices {
        let marker = if device.known_only {
            "  (known)".to_string()
        } else if device.reported_name != device.display_name {
            format!("  (reports as \"{}\")", device.reported_name)
        } else {
            String::new()
        };
        out.push_str(&format!(
            "{:<name_width$}  {:<17}  {:<status_width$}{}\n",
            device.display_name, device.identity, device.status, marker
        ));
    }
    out
}
