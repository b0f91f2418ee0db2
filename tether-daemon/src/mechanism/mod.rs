/*!
 * Mechanism Providers
 * Pluggable strategies for enumerating, pairing and unpairing devices
 */

pub mod bluez;
pub mod helper;
pub mod script;
pub mod utility;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;

use crate::config::DaemonConfig;
use crate::error::MechanismError;
use crate::identity::DeviceIdentity;

pub use bluez::BluezSession;
pub use helper::PairingHelper;
pub use script::ScriptEnumerator;
pub use utility::DeviceUtility;

/// One row as reported by a live enumeration, before reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDeviceRow {
    pub reported_name: String,
    pub status: String,
    pub raw_address: String,
    pub numeric_address: Option<u64>,
}

/// Captured output of a successful mechanism call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MechanismOutput {
    pub stdout: String,
    pub stderr: String,
}

impl MechanismOutput {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            stdout: message.into(),
            stderr: String::new(),
        }
    }
}

#[async_trait]
pub trait PairingMechanism: Send + Sync {
    /// Stable label used in diagnostics and the audit log.
    fn id(&self) -> String;

    /// Structural availability (dependency present). A `false` here is
    /// recorded as unavailable without attempting the operation.
    async fn is_available(&self) -> bool {
        true
    }

    async fn pair(&self, identity: &DeviceIdentity) -> Result<MechanismOutput, MechanismError>;

    async fn unpair(&self, identity: &DeviceIdentity) -> Result<MechanismOutput, MechanismError>;
}

#[async_trait]
pub trait DeviceEnumerator: Send + Sync {
    fn id(&self) -> String;

    async fn enumerate(&self) -> Result<Vec<RawDeviceRow>, MechanismError>;
}

/// Builds the ordered pairing candidates: helper executables first, then the
/// OS device utility, then native BlueZ.
pub fn pairing_candidates(
    config: &DaemonConfig,
    bluez: Option<Arc<BluezSession>>,
) -> Vec<Arc<dyn PairingMechanism>> {
    let mut candidates: Vec<Arc<dyn PairingMechanism>> = Vec::new();

    for path in helper::candidate_paths(&config.pairing) {
        candidates.push(Arc::new(PairingHelper::new(path)));
    }

    if !config.pairing.device_utility.is_empty() {
        candidates.push(Arc::new(DeviceUtility::new(&config.pairing.device_utility)));
    }

    if let Some(session) = bluez {
        candidates.push(session);
    }

    candidates
}

pub fn enumerators(
    config: &DaemonConfig,
    bluez: Option<Arc<BluezSession>>,
) -> Vec<Arc<dyn DeviceEnumerator>> {
    let mut enumerators: Vec<Arc<dyn DeviceEnumerator>> = Vec::new();

    if config.enumeration.native_enabled {
        if let Some(session) = bluez {
            enumerators.push(session);
        }
    }

    enumerators.push(Arc::new(ScriptEnumerator::new(
        &config.enumeration.interpreter,
        config.enumeration.script.clone(),
    )));

    enumerators
}

/// Runs a subprocess to completion with captured, lossily decoded output.
///
/// A program that cannot be found is `Unavailable`; a non-zero exit is
/// `Failed` carrying both streams.
pub(crate) async fn run_process<I, S>(
    program: impl Into<PathBuf>,
    args: I,
) -> Result<MechanismOutput, MechanismError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = program.into();
    tracing::debug!("Running {}", program.display());

    let output = match Command::new(&program)
        .args(args)
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
    {
        Ok(output) => output,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(MechanismError::Unavailable(format!(
                "{} not found",
                program.display()
            )));
        }
        Err(e) => {
            return Err(MechanismError::failed(format!(
                "failed to start {}: {}",
                program.display(),
                e
            )));
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if output.status.success() {
        Ok(MechanismOutput { stdout, stderr })
    } else {
        Err(MechanismError::Failed {
            message: format!("{} exited with {}", program.display(), output.status),
            stdout,
            stderr,
        })
    }
}
