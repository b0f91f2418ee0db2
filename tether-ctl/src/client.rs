/*!
 * tether Daemon Client
 * JSON IPC communication with tetherd
 */

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    ListDevices,
    ReadNames,
    RenameDevice { identity: String, name: String },
    Pair { identity: String },
    Unpair { identity: String },
    ClearNames,
    RenameReports,
    Status,
    Shutdown,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    DeviceList { devices: Vec<Device> },
    Names { names: BTreeMap<String, String> },
    Success { message: String },
    Error { message: String },
    RenameReports { reports: Vec<RenameReport> },
    Status { status: DaemonStatus },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Device {
    pub identity: String,
    pub reported_name: String,
    pub status: String,
    pub display_name: String,
    pub known_only: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RenameReport {
    pub identity: String,
    pub name: String,
    pub saved: bool,
    pub error: Option<String>,
    pub at: chrono::DateTime<chrono::Local>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub names_file: String,
    pub pending_renames: usize,
    pub pairing_mechanisms: Vec<String>,
    pub enumerators: Vec<String>,
}

pub struct TetherClient {
    socket_path: String,
}

impl TetherClient {
    pub fn new(socket_path: String) -> Self {
        Self { socket_path }
    }

    /// One request, one response line.
    pub async fn send_request(&self, request: Request) -> Result<Response> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .with_context(|| format!("cannot reach tetherd at {}", self.socket_path))?;
        let (read_half, mut write_half) = stream.into_split();

        let request_json = serde_json::to_string(&request)?;
        write_half.write_all(request_json.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
        write_half.flush().await?;

        let mut line = String::new();
        if BufReader::new(read_half).read_line(&mut line).await? == 0 {
            bail!("tetherd closed the connection without answering");
        }

        let response: Response = serde_json::from_str(line.trim())
            .with_context(|| format!("unexpected reply from tetherd: {}", line.trim()))?;
        Ok(response)
    }
}
