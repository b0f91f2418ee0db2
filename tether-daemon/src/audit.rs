/*!
 * Audit Log
 * Time-stamped, append-only record of pairing attempts
 */

use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

pub struct AuditLog {
    path: Option<PathBuf>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    /// Appends one line. Never fails: an unwritable log only produces a
    /// warning so pairing carries on.
    pub async fn record(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::debug!(target: "tether_daemon::audit", "{}", message);

        let Some(path) = &self.path else {
            return;
        };

        let line = format!("{} {}\n", chrono::Local::now().to_rfc3339(), message);
        let result = async {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!("Could not append to audit log {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lines_are_timestamped_and_appended() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = AuditLog::new(dir.path().join("bt.log"));

        log.record("first").await;
        log.record("second").await;

        let content = std::fs::read_to_string(dir.path().join("bt.log")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" first"));
        let stamp = lines[1].split(' ').next().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok(), "bad stamp {stamp}");
    }

    #[tokio::test]
    async fn unwritable_log_is_ignored() {
        let log = AuditLog::new("/nonexistent/dir/bt.log");
        log.record("dropped").await;
    }
}
