/*!
 * Device Service
 * Command/query surface the presentation layer talks to
 */

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::audit::AuditLog;
use crate::config::DaemonConfig;
use crate::debounce::{RenameDebouncer, RenameReport};
use crate::error::{EnumerationError, StorageError};
use crate::identity::DeviceIdentity;
use crate::mechanism::{self, BluezSession, DeviceEnumerator, RawDeviceRow};
use crate::names::{NameMap, NameStore};
use crate::orchestrator::PairingOrchestrator;
use crate::reconcile::{reconcile, DeviceRecord};

/// Result of a command: success flag plus an optional human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub ok: bool,
    pub message: Option<String>,
}

impl CommandOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: Some(message.into()),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub names_file: String,
    pub pending_renames: usize,
    pub pairing_mechanisms: Vec<String>,
    pub enumerators: Vec<String>,
}

pub struct DeviceService {
    store: Arc<NameStore>,
    orchestrator: PairingOrchestrator,
    enumerators: Vec<Arc<dyn DeviceEnumerator>>,
    debouncer: RenameDebouncer,
    reports: Mutex<mpsc::UnboundedReceiver<RenameReport>>,
    saved_status: String,
}

impl DeviceService {
    pub fn new(
        store: Arc<NameStore>,
        orchestrator: PairingOrchestrator,
        enumerators: Vec<Arc<dyn DeviceEnumerator>>,
        quiet_period: std::time::Duration,
        saved_status: impl Into<String>,
    ) -> Self {
        let (debouncer, reports) = RenameDebouncer::new(store.clone(), quiet_period);
        Self {
            store,
            orchestrator,
            enumerators,
            debouncer,
            reports: Mutex::new(reports),
            saved_status: saved_status.into(),
        }
    }

    /// Wires the concrete BlueZ/subprocess mechanisms described by `config`.
    pub async fn from_config(config: &DaemonConfig) -> Result<Self, StorageError> {
        let store = Arc::new(NameStore::open(config.names_file()).await?);
        let audit = Arc::new(match config.audit_file() {
            Some(path) => AuditLog::new(path),
            None => AuditLog::disabled(),
        });

        let bluez = (config.pairing.native_enabled || config.enumeration.native_enabled)
            .then(|| Arc::new(BluezSession::new(&config.pairing.adapter, config.dbus_timeout())));
        let pairing_bluez = bluez.clone().filter(|_| config.pairing.native_enabled);

        let orchestrator =
            PairingOrchestrator::new(mechanism::pairing_candidates(config, pairing_bluez), audit);
        let enumerators = mechanism::enumerators(config, bluez);

        tracing::info!(
            "Pairing candidates: {}",
            orchestrator.candidate_ids().join(", ")
        );

        Ok(Self::new(
            store,
            orchestrator,
            enumerators,
            config.rename_quiet_period(),
            config.display.saved_status.clone(),
        ))
    }

    /// Live devices merged with stored names. An unreadable store degrades to
    /// "no names known"; only a total enumeration failure is an error.
    pub async fn list_devices(&self) -> Result<Vec<DeviceRecord>, EnumerationError> {
        let live = self.enumerate_live_devices().await?;
        let names = self.read_names_or_empty().await;
        Ok(reconcile(&live, &names, &self.saved_status))
    }

    pub async fn enumerate_live_devices(&self) -> Result<Vec<RawDeviceRow>, EnumerationError> {
        let mut failures = Vec::new();

        for enumerator in &self.enumerators {
            match enumerator.enumerate().await {
                Ok(rows) => {
                    tracing::debug!("{} listed {} device(s)", enumerator.id(), rows.len());
                    return Ok(rows);
                }
                Err(e) => {
                    tracing::debug!("{} could not list devices: {}", enumerator.id(), e);
                    failures.push(format!("{}: {}", enumerator.id(), e));
                }
            }
        }

        tracing::warn!("Device enumeration failed on every mechanism");
        Err(EnumerationError { failures })
    }

    pub async fn read_names(&self) -> Result<NameMap, StorageError> {
        self.store.get_all().await
    }

    async fn read_names_or_empty(&self) -> NameMap {
        match self.store.get_all().await {
            Ok(names) => names,
            Err(e) => {
                tracing::error!("Listing without stored names: {}", e);
                NameMap::new()
            }
        }
    }

    /// Debounced: the name is written once edits for this device go quiet.
    pub fn rename_device(&self, raw_identity: &str, text: &str) -> CommandOutcome {
        let identity = DeviceIdentity::normalize(raw_identity);
        if self.debouncer.schedule(identity.clone(), text.to_string()) {
            CommandOutcome::ok(format!("Rename of {} scheduled", identity))
        } else {
            CommandOutcome::failed("Daemon is shutting down")
        }
    }

    /// Full diagnostics go to the audit log; the caller only sees the
    /// extracted reason.
    pub async fn pair(&self, raw_identity: &str) -> CommandOutcome {
        match self.orchestrator.pair(raw_identity).await {
            Ok(success) => CommandOutcome::ok(success.message),
            Err(failure) => CommandOutcome::failed(failure.reason),
        }
    }

    pub async fn unpair(&self, raw_identity: &str) -> CommandOutcome {
        match self.orchestrator.unpair(raw_identity).await {
            Ok(success) => CommandOutcome::ok(success.message),
            Err(failure) => {
                CommandOutcome::failed(format!("Failed to unpair device. Reason: {}", failure.reason))
            }
        }
    }

    /// Pending edits are dropped first so none lands after the wipe.
    pub async fn clear_all_names(&self) -> CommandOutcome {
        let dropped = self.debouncer.cancel_all();
        if dropped > 0 {
            tracing::debug!("Dropped {} pending rename(s) before clearing", dropped);
        }

        let _barrier = self.debouncer.write_barrier().await;
        match self.store.clear_all().await {
            Ok(()) => CommandOutcome::ok("Saved names cleared"),
            Err(e) => {
                tracing::error!("Failed to clear names: {}", e);
                CommandOutcome::failed(format!("Error clearing saved names: {}", e))
            }
        }
    }

    pub async fn drain_rename_reports(&self) -> Vec<RenameReport> {
        let mut receiver = self.reports.lock().await;
        let mut reports = Vec::new();
        while let Ok(report) = receiver.try_recv() {
            reports.push(report);
        }
        reports
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            names_file: self.store.path().display().to_string(),
            pending_renames: self.debouncer.pending_count(),
            pairing_mechanisms: self.orchestrator.candidate_ids(),
            enumerators: self.enumerators.iter().map(|e| e.id()).collect(),
        }
    }

    pub fn shutdown(&self) {
        self.debouncer.shutdown();
    }
}
