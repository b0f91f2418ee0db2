/*!
 * IPC Server for the tether daemon
 * Newline-delimited JSON protocol over a Unix socket
 */

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;

use crate::debounce::RenameReport;
use crate::names::NameMap;
use crate::reconcile::DeviceRecord;
use crate::service::{CommandOutcome, DeviceService, ServiceStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    DeviceList { devices: Vec<DeviceRecord> },
    Names { names: NameMap },
    Success { message: String },
    Error { message: String },
    RenameReports { reports: Vec<RenameReport> },
    Status { status: ServiceStatus },
}

impl From<CommandOutcome> for Response {
    fn from(outcome: CommandOutcome) -> Self {
        let message = outcome.message.unwrap_or_default();
        if outcome.ok {
            Response::Success { message }
        } else {
            Response::Error { message }
        }
    }
}

pub struct IpcServer {
    listener: UnixListener,
    service: Arc<DeviceService>,
    shutdown: Arc<Notify>,
}

impl IpcServer {
    pub fn new(listener: UnixListener, service: Arc<DeviceService>) -> Self {
        Self {
            listener,
            service,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Notifying this stops the accept loop, same as a `Shutdown` request.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    pub async fn run(self) -> Result<()> {
        tracing::info!("IPC server listening for connections...");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        tracing::debug!("New client connected");
                        let service = self.service.clone();
                        let shutdown = self.shutdown.clone();

                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, service, shutdown).await {
                                tracing::error!("Client error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                    }
                },
                _ = self.shutdown.notified() => {
                    tracing::info!("Shutdown requested");
                    break;
                }
            }
        }

        self.service.shutdown();
        Ok(())
    }
}

async fn handle_client(
    stream: UnixStream,
    service: Arc<DeviceService>,
    shutdown: Arc<Notify>,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let request = line.trim();
        if request.is_empty() {
            line.clear();
            continue;
        }
        tracing::debug!("Received request: {}", request);

        let (response, stop) = match serde_json::from_str::<Request>(request) {
            Ok(Request::Shutdown) => (
                Response::Success {
                    message: "Daemon stopping".to_string(),
                },
                true,
            ),
            Ok(request) => (dispatch(&service, request).await, false),
            Err(e) => (
                Response::Error {
                    message: format!("Invalid request: {}", e),
                },
                false,
            ),
        };

        let mut payload = serde_json::to_vec(&response)?;
        payload.push(b'\n');
        write_half.write_all(&payload).await?;
        write_half.flush().await?;

        if stop {
            shutdown.notify_one();
            break;
        }

        line.clear();
    }

    Ok(())
}

pub async fn dispatch(service: &DeviceService, request: Request) -> Response {
    match request {
        Request::ListDevices => match service.list_devices().await {
            Ok(devices) => Response::DeviceList { devices },
            Err(e) => Response::Error {
                message: e.to_string(),
            },
        },
        Request::ReadNames => match service.read_names().await {
            Ok(names) => Response::Names { names },
            Err(e) => Response::Error {
                message: e.to_string(),
            },
        },
        Request::RenameDevice { identity, name } => service.rename_device(&identity, &name).into(),
        Request::Pair { identity } => service.pair(&identity).await.into(),
        Request::Unpair { identity } => service.unpair(&identity).await.into(),
        Request::ClearNames => service.clear_all_names().await.into(),
        Request::RenameReports => Response::RenameReports {
            reports: service.drain_rename_reports().await,
        },
        Request::Status => Response::Status {
            status: service.status(),
        },
        Request::Shutdown => {
            service.shutdown();
            Response::Success {
                message: "Daemon stopping".to_string(),
            }
        }
    }
}
