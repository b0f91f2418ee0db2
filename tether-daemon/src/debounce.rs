/*!
 * Rename Debouncer
 * Coalesces rapid rename edits per device into one persisted write
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::identity::DeviceIdentity;
use crate::names::NameWriter;

pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(1000);

/// Outcome of one debounced write, for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameReport {
    pub identity: DeviceIdentity,
    pub name: String,
    pub saved: bool,
    pub error: Option<String>,
    pub at: chrono::DateTime<chrono::Local>,
}

struct PendingRename {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Shared {
    writer: Arc<dyn NameWriter>,
    quiet_period: Duration,
    pending: Mutex<HashMap<DeviceIdentity, PendingRename>>,
    reports: mpsc::UnboundedSender<RenameReport>,
    closed: AtomicBool,
    // Bumped by every cancellation. A claimed write from an older epoch is
    // dropped instead of persisted.
    epoch: AtomicU64,
    write_gate: tokio::sync::Mutex<()>,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<DeviceIdentity, PendingRename>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes ownership of the timer slot if `generation` is still the latest
    /// edit. Once claimed, later edits start a fresh timer instead of
    /// cancelling this write.
    fn claim(&self, identity: &DeviceIdentity, generation: u64) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let mut pending = self.pending();
        match pending.get(identity) {
            Some(entry) if entry.generation == generation => {
                pending.remove(identity);
                true
            }
            _ => false,
        }
    }

    async fn persist(&self, identity: DeviceIdentity, name: String, epoch: u64) {
        let _gate = self.write_gate.lock().await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            tracing::debug!("Dropped cancelled rename for {}", identity);
            return;
        }

        let result = self.writer.write_name(&identity, &name).await;

        let error = match &result {
            Ok(()) => {
                tracing::info!("Saved name for {}", identity);
                None
            }
            Err(e) => {
                tracing::warn!("Failed to save name for {}: {}", identity, e);
                Some(e.to_string())
            }
        };

        // Nobody listening is fine.
        let _ = self.reports.send(RenameReport {
            identity,
            name,
            saved: result.is_ok(),
            error,
            at: chrono::Local::now(),
        });
    }
}

pub struct RenameDebouncer {
    shared: Arc<Shared>,
    next_generation: AtomicU64,
}

impl RenameDebouncer {
    pub fn new(
        writer: Arc<dyn NameWriter>,
        quiet_period: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<RenameReport>) {
        let (reports, receiver) = mpsc::unbounded_channel();
        let debouncer = Self {
            shared: Arc::new(Shared {
                writer,
                quiet_period,
                pending: Mutex::new(HashMap::new()),
                reports,
                closed: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                write_gate: tokio::sync::Mutex::new(()),
            }),
            next_generation: AtomicU64::new(0),
        };
        (debouncer, receiver)
    }

    /// Records an edit. Any pending timer for the same identity is dropped and
    /// a new quiet period starts. Returns `false` after shutdown.
    pub fn schedule(&self, identity: DeviceIdentity, name: String) -> bool {
        if self.shared.closed.load(Ordering::SeqCst) {
            return false;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let shared = self.shared.clone();
        let task_identity = identity.clone();

        // Held across the spawn so the timer cannot claim its slot before the
        // slot exists.
        let mut pending = self.shared.pending();
        let epoch = self.shared.epoch.load(Ordering::SeqCst);
        if let Some(previous) = pending.remove(&identity) {
            previous.handle.abort();
            tracing::debug!("Superseded pending rename for {}", identity);
        }

        let handle = tokio::spawn(async move {
            tokio::time::sleep(shared.quiet_period).await;
            if shared.claim(&task_identity, generation) {
                shared.persist(task_identity, name, epoch).await;
            }
        });

        pending.insert(identity, PendingRename { generation, handle });
        true
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending().len()
    }

    /// Drops every pending timer without writing. Writes that already left
    /// their quiet period but have not reached the store are dropped too.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingRename> = {
            let mut pending = self.shared.pending();
            self.shared.epoch.fetch_add(1, Ordering::SeqCst);
            let drained = pending.drain().map(|(_, p)| p).collect();
            drained
        };
        for pending in &drained {
            pending.handle.abort();
        }
        drained.len()
    }

    /// Waits for an in-flight write to finish. Holding the guard keeps any
    /// later write out, so a caller can wipe the store after `cancel_all`
    /// without a cancelled rename landing on top.
    pub async fn write_barrier(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.shared.write_gate.lock().await
    }

    /// Cancels pending timers and refuses further edits.
    pub fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        let cancelled = self.cancel_all();
        if cancelled > 0 {
            tracing::info!("Discarded {} pending rename(s) on shutdown", cancelled);
        }
    }
}

impl Drop for RenameDebouncer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tokio::time::Instant;

    #[derive(Default)]
    struct RecordingWriter {
        writes: Mutex<Vec<(DeviceIdentity, String, Instant)>>,
        fail: bool,
    }

    impl RecordingWriter {
        fn writes(&self) -> Vec<(DeviceIdentity, String, Instant)> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NameWriter for RecordingWriter {
        async fn write_name(&self, identity: &DeviceIdentity, name: &str) -> Result<(), StorageError> {
            if self.fail {
                return Err(StorageError::Io {
                    path: PathBuf::from("/readonly/devices.json"),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
                });
            }
            self.writes
                .lock()
                .unwrap()
                .push((identity.clone(), name.to_string(), Instant::now()));
            Ok(())
        }
    }

    fn id(raw: &str) -> DeviceIdentity {
        DeviceIdentity::normalize(raw)
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_edits_collapse_into_the_last_value() {
        let writer = Arc::new(RecordingWriter::default());
        let (debouncer, mut reports) = RenameDebouncer::new(writer.clone(), DEFAULT_QUIET_PERIOD);
        let start = Instant::now();

        debouncer.schedule(id("aa:bb:cc:dd:ee:ff"), "T1".into());
        tokio::time::sleep(Duration::from_millis(200)).await;
        debouncer.schedule(id("aa:bb:cc:dd:ee:ff"), "T2".into());
        tokio::time::sleep(Duration::from_millis(200)).await;
        debouncer.schedule(id("aa:bb:cc:dd:ee:ff"), "T3".into());

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(writer.writes().is_empty(), "wrote before the quiet period ended");

        tokio::time::sleep(Duration::from_millis(1000)).await;
        let writes = writer.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1, "T3");
        assert!(writes[0].2.duration_since(start) >= Duration::from_millis(1400));

        let report = reports.try_recv().unwrap();
        assert!(report.saved);
        assert_eq!(report.name, "T3");
        assert!(reports.try_recv().is_err());
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn identities_debounce_independently() {
        let writer = Arc::new(RecordingWriter::default());
        let (debouncer, _reports) = RenameDebouncer::new(writer.clone(), DEFAULT_QUIET_PERIOD);

        debouncer.schedule(id("11:11:11:11:11:11"), "Left".into());
        tokio::time::sleep(Duration::from_millis(500)).await;
        debouncer.schedule(id("22:22:22:22:22:22"), "Right".into());
        assert_eq!(debouncer.pending_count(), 2);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        let mut names: Vec<String> = writer.writes().into_iter().map(|w| w.1).collect();
        names.sort();
        assert_eq!(names, vec!["Left".to_string(), "Right".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_discards_pending_writes() {
        let writer = Arc::new(RecordingWriter::default());
        let (debouncer, _reports) = RenameDebouncer::new(writer.clone(), DEFAULT_QUIET_PERIOD);

        debouncer.schedule(id("aa:bb:cc:dd:ee:ff"), "Never".into());
        debouncer.shutdown();
        tokio::time::sleep(Duration::from_millis(3000)).await;

        assert!(writer.writes().is_empty());
        assert!(!debouncer.schedule(id("aa:bb:cc:dd:ee:ff"), "Late".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_debouncer_cancels_timers() {
        let writer = Arc::new(RecordingWriter::default());
        let (debouncer, _reports) = RenameDebouncer::new(writer.clone(), DEFAULT_QUIET_PERIOD);

        debouncer.schedule(id("aa:bb:cc:dd:ee:ff"), "Never".into());
        drop(debouncer);
        tokio::time::sleep(Duration::from_millis(3000)).await;

        assert!(writer.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_is_reported_and_debouncer_keeps_going() {
        let writer = Arc::new(RecordingWriter {
            fail: true,
            ..Default::default()
        });
        let (debouncer, mut reports) = RenameDebouncer::new(writer, DEFAULT_QUIET_PERIOD);

        debouncer.schedule(id("aa:bb:cc:dd:ee:ff"), "First".into());
        tokio::time::sleep(Duration::from_millis(1500)).await;
        debouncer.schedule(id("aa:bb:cc:dd:ee:ff"), "Second".into());
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let first = reports.try_recv().unwrap();
        assert!(!first.saved);
        assert!(first.error.unwrap().contains("read-only"));
        assert_eq!(reports.try_recv().unwrap().name, "Second");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_drops_a_write_already_past_its_quiet_period() {
        let writer = Arc::new(RecordingWriter::default());
        let (debouncer, mut reports) = RenameDebouncer::new(writer.clone(), DEFAULT_QUIET_PERIOD);

        let barrier = debouncer.write_barrier().await;
        debouncer.schedule(id("aa:bb:cc:dd:ee:ff"), "Stale".into());
        tokio::time::sleep(Duration::from_millis(1500)).await;
        // The timer fired and claimed its slot; it is waiting to write.
        assert_eq!(debouncer.pending_count(), 0);

        assert_eq!(debouncer.cancel_all(), 0);
        drop(barrier);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(writer.writes().is_empty());
        assert!(reports.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_keeps_accepting_edits() {
        let writer = Arc::new(RecordingWriter::default());
        let (debouncer, _reports) = RenameDebouncer::new(writer.clone(), DEFAULT_QUIET_PERIOD);

        debouncer.schedule(id("aa:bb:cc:dd:ee:ff"), "Old".into());
        assert_eq!(debouncer.cancel_all(), 1);
        debouncer.schedule(id("11:22:33:44:55:66"), "New".into());
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let writes = writer.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1, "New");
    }
}
