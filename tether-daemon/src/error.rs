/*!
 * Error taxonomy
 */

use std::path::PathBuf;
use thiserror::Error;

use crate::orchestrator::{Attempt, Operation};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("name store {} is unreadable: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("name store {} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize names: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
#[error("no mechanism could list devices ({})", .failures.join("; "))]
pub struct EnumerationError {
    pub failures: Vec<String>,
}

/// Per-candidate failure. Neither variant aborts a request on its own.
#[derive(Debug, Error)]
pub enum MechanismError {
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("failed: {message}")]
    Failed {
        message: String,
        stdout: String,
        stderr: String,
    },
}

impl MechanismError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

/// Every candidate for a pair/unpair request was exhausted.
#[derive(Debug, Error)]
#[error("{operation} failed: {reason}")]
pub struct OrchestrationFailed {
    pub operation: Operation,
    pub reason: String,
    pub attempts: Vec<Attempt>,
}
