//! Polling backend: a parallel directory walk on a fixed interval, diffed
//! against the previous scan. Suppressed entirely while indexing is active
//! so filesystem scanning doesn't steal I/O from the analyzer.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use broker_core::telemetry::metrics;
use broker_lsp::ProgressTracker;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::filter::{has_watched_extension, is_denied_dir};
use crate::snapshot::{diff, Snapshot, WatchedChange};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_WORKERS: usize = 8;

/// Background scanner. Owns the previous scan's snapshot and the policy
/// for when to emit a diff versus retain the baseline untouched.
pub struct PollingWatcher {
    root: PathBuf,
    interval: Duration,
    workers: usize,
    baseline: Mutex<Option<Snapshot>>,
}

impl PollingWatcher {
    pub fn new(root: PathBuf, interval: Duration, workers: usize) -> Self {
        Self { root, interval, workers: workers.max(1), baseline: Mutex::new(None) }
    }

    /// Spawn the tick loop as a task; changes arrive on the returned
    /// channel. The channel closes only if the receiver is dropped.
    pub fn spawn(self: Arc<Self>, progress: Arc<ProgressTracker>) -> mpsc::Receiver<Vec<WatchedChange>> {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.tick().await; // first tick fires immediately; treat as the baseline scan
            loop {
                ticker.tick().await;
                if let Some(changes) = self.tick(&progress).await {
                    if tx.send(changes).await.is_err() {
                        break;
                    }
                }
            }
        });
        rx
    }

    /// Run one scan-and-diff cycle. `None` means either this was the
    /// baseline scan, indexing suppressed the diff, or there were no
    /// changes.
    pub async fn tick(&self, progress: &ProgressTracker) -> Option<Vec<WatchedChange>> {
        let new_snapshot = self.scan().await;

        let mut baseline = self.baseline.lock();
        if baseline.is_none() {
            *baseline = Some(new_snapshot);
            return None;
        }

        if progress.is_indexing() {
            // Retain the pre-indexing baseline: the snapshot must not
            // advance, or a change made during indexing would be silently
            // folded into the "old" state on the next comparison.
            metrics::WATCHER_SUPPRESSED_TICKS.increment();
            return None;
        }

        let old_snapshot = baseline.take().unwrap();
        let changes = diff(&old_snapshot, &new_snapshot);
        *baseline = Some(new_snapshot);

        if changes.is_empty() {
            None
        } else {
            Some(changes)
        }
    }

    async fn scan(&self) -> Snapshot {
        let root = self.root.clone();
        let workers = self.workers;
        tokio::task::spawn_blocking(move || scan_tree(&root, workers))
            .await
            .unwrap_or_default()
    }
}

/// Walk `root` with `workers` blocking threads pulling from a bounded
/// channel of pending directories. When the channel is full, a worker
/// recurses into the subdirectory synchronously instead of blocking on
/// the send, which bounds memory on very wide trees without losing work.
fn scan_tree(root: &Path, workers: usize) -> Snapshot {
    let (tx, rx) = sync_channel::<PathBuf>(workers * 4);
    let rx = Arc::new(Mutex::new(rx));
    // Counts directories queued or being processed; reaching zero means
    // the walk is done (channel empty and no worker active).
    let pending = Arc::new(AtomicUsize::new(1));
    let snapshot = Arc::new(Mutex::new(Snapshot::new()));

    tx.send(root.to_path_buf()).expect("channel just created, has capacity");

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let rx = rx.clone();
            let tx = tx.clone();
            let pending = pending.clone();
            let snapshot = snapshot.clone();
            scope.spawn(move || worker_loop(rx, tx, pending, snapshot));
        }
    });

    Arc::try_unwrap(snapshot).map(Mutex::into_inner).unwrap_or_default()
}

fn worker_loop(
    rx: Arc<Mutex<std::sync::mpsc::Receiver<PathBuf>>>,
    tx: SyncSender<PathBuf>,
    pending: Arc<AtomicUsize>,
    snapshot: Arc<Mutex<Snapshot>>,
) {
    loop {
        if pending.load(Ordering::SeqCst) == 0 {
            return;
        }
        let next = {
            let rx = rx.lock();
            rx.recv_timeout(Duration::from_millis(50))
        };
        match next {
            Ok(dir) => {
                scan_dir(&dir, &tx, &pending, &snapshot);
                pending.fetch_sub(1, Ordering::SeqCst);
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn scan_dir(
    dir: &Path,
    tx: &SyncSender<PathBuf>,
    pending: &AtomicUsize,
    snapshot: &Mutex<Snapshot>,
) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else { continue };

        if file_type.is_dir() {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            if is_denied_dir(name) {
                continue;
            }
            pending.fetch_add(1, Ordering::SeqCst);
            if tx.try_send(path.clone()).is_err() {
                // Channel full: recurse in place rather than blocking.
                scan_dir(&path, tx, pending, snapshot);
                pending.fetch_sub(1, Ordering::SeqCst);
            }
        } else if has_watched_extension(&path) {
            if let Ok(metadata) = entry.metadata() {
                if let Ok(modified) = metadata.modified() {
                    let mtime = epoch_seconds(modified);
                    snapshot.lock().insert(path, mtime);
                }
            }
        }
    }
}

fn epoch_seconds(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ChangeType;
    use std::fs;
    use std::time::Duration as StdDuration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn first_tick_is_a_silent_baseline() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.bsl"), "x").unwrap();

        let watcher = PollingWatcher::new(dir.path().to_path_buf(), Duration::from_secs(30), 4);
        let progress = ProgressTracker::new();

        assert!(watcher.tick(&progress).await.is_none());
    }

    #[tokio::test]
    async fn detects_a_change_after_baseline() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.bsl");
        fs::write(&file, "x").unwrap();

        let watcher = PollingWatcher::new(dir.path().to_path_buf(), Duration::from_secs(30), 4);
        let progress = ProgressTracker::new();
        assert!(watcher.tick(&progress).await.is_none());

        // Force a different mtime.
        tokio::time::sleep(StdDuration::from_millis(1100)).await;
        fs::write(&file, "y").unwrap();

        let changes = watcher.tick(&progress).await.expect("a change should be detected");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeType::Changed);
    }

    /// Changes made while indexing is active are suppressed, then surface
    /// once indexing ends.
    #[tokio::test]
    async fn suppressed_during_indexing() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.bsl");
        fs::write(&file, "x").unwrap();

        let watcher = PollingWatcher::new(dir.path().to_path_buf(), Duration::from_secs(30), 4);
        let progress = ProgressTracker::new();
        assert!(watcher.tick(&progress).await.is_none());

        progress.begin(Some("Index".to_string()), None, None);
        assert!(progress.is_indexing());

        tokio::time::sleep(StdDuration::from_millis(1100)).await;
        fs::write(&file, "y").unwrap();

        assert!(watcher.tick(&progress).await.is_none(), "changes must be suppressed while indexing");
        assert!(watcher.tick(&progress).await.is_none(), "snapshot must not advance during suppression");

        progress.end();
        let changes = watcher.tick(&progress).await.expect("change surfaces once indexing ends");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeType::Changed);
    }

    #[test]
    fn scan_tree_finds_nested_watched_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.bsl"), "x").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.os"), "y").unwrap();
        fs::write(dir.path().join("ignored.txt"), "z").unwrap();
        fs::create_dir(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/c.bsl"), "w").unwrap();

        let snapshot = scan_tree(dir.path(), 2);
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains_key(&dir.path().join("a.bsl")));
        assert!(snapshot.contains_key(&dir.path().join("sub/b.os")));
    }
}
