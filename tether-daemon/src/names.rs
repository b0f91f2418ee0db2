/*!
 * Name Store
 * Durable identity -> display name mapping, one JSON document on disk
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::identity::DeviceIdentity;

pub type NameMap = BTreeMap<DeviceIdentity, String>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct NamesDocument {
    #[serde(default)]
    names: BTreeMap<String, String>,
}

/// Sink for debounced renames. Implemented by [`NameStore`]; tests plug in
/// recorders.
#[async_trait]
pub trait NameWriter: Send + Sync {
    async fn write_name(&self, identity: &DeviceIdentity, name: &str) -> Result<(), StorageError>;
}

pub struct NameStore {
    path: PathBuf,
    // Serialises read-modify-write cycles; reads go lock-free since every
    // write lands through an atomic rename.
    write_lock: Mutex<()>,
}

impl NameStore {
    /// Opens the store, creating the parent directory and an empty document
    /// when nothing exists yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let store = Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        };

        if let Some(parent) = store.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|source| store.io_error(source))?;
        }

        if fs::metadata(&store.path).await.is_err() {
            tracing::info!("Creating empty name store at {}", store.path.display());
            store.write_document(&NamesDocument::default()).await?;
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every stored name keyed by normalised identity. A missing document
    /// reads as empty; an unreadable or malformed one is an error.
    pub async fn get_all(&self) -> Result<NameMap, StorageError> {
        let document = self.read_document().await?;
        Ok(document
            .names
            .into_iter()
            .map(|(raw, name)| (DeviceIdentity::normalize(&raw), name))
            .collect())
    }

    /// Stores the trimmed `name`, or removes the entry when it is blank.
    pub async fn set(&self, identity: &DeviceIdentity, name: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;

        let mut document = self.read_document().await?;
        // Hand-edited documents may carry the same address in another spelling.
        document
            .names
            .retain(|raw, _| DeviceIdentity::normalize(raw) != *identity);

        let trimmed = name.trim();
        if !trimmed.is_empty() {
            document
                .names
                .insert(identity.as_str().to_string(), trimmed.to_string());
        }

        self.write_document(&document).await
    }

    pub async fn clear_all(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        self.write_document(&NamesDocument::default()).await
    }

    async fn read_document(&self) -> Result<NamesDocument, StorageError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(NamesDocument::default()),
            Err(e) => return Err(self.io_error(e)),
        };

        serde_json::from_str(&content).map_err(|source| StorageError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    async fn write_document(&self, document: &NamesDocument) -> Result<(), StorageError> {
        let payload = serde_json::to_string_pretty(document)?;
        let tmp_path = self.path.with_extension("json.tmp");

        fs::write(&tmp_path, payload.as_bytes())
            .await
            .map_err(|source| self.io_error(source))?;

        if let Err(source) = fs::rename(&tmp_path, &self.path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(self.io_error(source));
        }

        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl NameWriter for NameStore {
    async fn write_name(&self, identity: &DeviceIdentity, name: &str) -> Result<(), StorageError> {
        self.set(identity, name).await
    }
}
