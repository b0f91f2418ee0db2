use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::debounce::DEFAULT_QUIET_PERIOD;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
    pub names: NamesConfig,
    pub audit: AuditConfig,
    pub pairing: PairingConfig,
    pub enumeration: EnumerationConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NamesConfig {
    /// Defaults to `<data_dir>/devices.json`.
    pub file: Option<PathBuf>,
    pub rename_debounce_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    /// Defaults to `<data_dir>/bt.log`.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PairingConfig {
    pub helper_program: String,
    pub helper_search_dirs: Vec<PathBuf>,
    pub device_utility: String,
    pub native_enabled: bool,
    pub adapter: String,
    pub dbus_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EnumerationConfig {
    pub interpreter: String,
    pub script: Option<String>,
    pub native_enabled: bool,
}

/// Labels the core hands to the presentation layer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub saved_status: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/run/tether/tether.sock"),
            data_dir: PathBuf::from("/var/lib/tether"),
            names: NamesConfig::default(),
            audit: AuditConfig::default(),
            pairing: PairingConfig::default(),
            enumeration: EnumerationConfig::default(),
            display: DisplayConfig::default(),
        }
    }
}

impl Default for NamesConfig {
    fn default() -> Self {
        Self {
            file: None,
            rename_debounce_ms: DEFAULT_QUIET_PERIOD.as_millis() as u64,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file: None,
        }
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            helper_program: "bt-pair-helper".to_string(),
            helper_search_dirs: Vec::new(),
            device_utility: "bluetoothctl".to_string(),
            native_enabled: true,
            adapter: "hci0".to_string(),
            dbus_timeout_secs: 30,
        }
    }
}

impl Default for EnumerationConfig {
    fn default() -> Self {
        Self {
            interpreter: "sh".to_string(),
            script: None,
            native_enabled: true,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            saved_status: "Saved".to_string(),
        }
    }
}

impl DaemonConfig {
    /// Reads `path`, or writes and returns the defaults when it does not
    /// exist yet. A file that exists but does not parse is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)
                .with_context(|| format!("invalid config file {}", path.display())),
            Err(_) => {
                // Create default config if not found
                let config = Self::default();
                if let Err(e) = fs::write(path, toml::to_string_pretty(&config)?) {
                    tracing::debug!("Not writing default config to {}: {}", path.display(), e);
                }
                Ok(config)
            }
        }
    }

    pub fn names_file(&self) -> PathBuf {
        self.names
            .file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("devices.json"))
    }

    pub fn audit_file(&self) -> Option<PathBuf> {
        self.audit
            .enabled
            .then(|| self.audit.file.clone().unwrap_or_else(|| self.data_dir.join("bt.log")))
    }

    pub fn rename_quiet_period(&self) -> Duration {
        Duration::from_millis(self.names.rename_debounce_ms)
    }

    pub fn dbus_timeout(&self) -> Duration {
        Duration::from_secs(self.pairing.dbus_timeout_secs)
    }
}
