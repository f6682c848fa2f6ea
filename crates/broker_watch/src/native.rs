//! Event-driven backend using OS-native filesystem notifications, debounced
//! and batched the way the polling backend batches its diffs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use broker_core::prelude::*;
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebouncedEvent, Debouncer, RecommendedCache};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::filter::passes_dir_filter;
use crate::snapshot::{ChangeType, WatchedChange};

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Owns the native watcher for the life of the session; dropping it stops
/// watching.
pub struct EventWatcher {
    debouncer: Arc<Mutex<Debouncer<RecommendedWatcher, RecommendedCache>>>,
}

impl EventWatcher {
    /// Start watching `root` recursively. Returns the watcher and a
    /// channel of debounced, filtered change batches.
    pub fn start(root: &Path) -> Result<(Self, mpsc::Receiver<Vec<WatchedChange>>)> {
        let (tx, rx) = mpsc::channel(16);

        // The debouncer's callback needs to add newly created directories
        // to the watch set, but the handle doesn't exist until
        // `new_debouncer` returns. Share it through a cell the callback
        // can read once it's filled in.
        let handle: Arc<Mutex<Option<Arc<Mutex<Debouncer<RecommendedWatcher, RecommendedCache>>>>>> =
            Arc::new(Mutex::new(None));
        let handle_for_callback = handle.clone();

        let debouncer = new_debouncer(
            DEBOUNCE,
            None,
            move |result: std::result::Result<Vec<DebouncedEvent>, Vec<notify::Error>>| {
                handle_debounced_result(result, &tx, &handle_for_callback);
            },
        )
        .map_err(|e| Error::WatcherFailure(format!("could not start native watcher: {e}")))?;

        let debouncer = Arc::new(Mutex::new(debouncer));
        debouncer
            .lock()
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| Error::WatcherFailure(format!("could not watch {}: {e}", root.display())))?;
        *handle.lock() = Some(debouncer.clone());

        Ok((Self { debouncer }, rx))
    }
}

/// Add a directory created after the initial watch was established. Most
/// native backends already cover new descendants of a recursively-watched
/// root, but this covers the platforms/paths that don't (e.g. a directory
/// created as a rename target).
fn watch_new_directory(
    debouncer: &Arc<Mutex<Debouncer<RecommendedWatcher, RecommendedCache>>>,
    path: &Path,
) {
    if let Err(e) = debouncer.lock().watch(path, RecursiveMode::Recursive) {
        warn!(path = %path.display(), error = %e, "failed to add dynamically created directory to watch set");
    }
}

fn handle_debounced_result(
    result: std::result::Result<Vec<DebouncedEvent>, Vec<notify::Error>>,
    tx: &mpsc::Sender<Vec<WatchedChange>>,
    handle: &Arc<Mutex<Option<Arc<Mutex<Debouncer<RecommendedWatcher, RecommendedCache>>>>>>,
) {
    let events = match result {
        Ok(events) => events,
        Err(errors) => {
            for e in errors {
                warn!(error = %e, "native watcher reported an error");
            }
            return;
        }
    };

    let mut changes: HashMap<PathBuf, ChangeType> = HashMap::new();
    for event in events {
        let Some(kind) = classify(&event.kind) else { continue };
        for path in &event.paths {
            if !passes_dir_filter(path) {
                continue;
            }
            if kind == ChangeType::Created && path.is_dir() {
                if let Some(debouncer) = handle.lock().as_ref() {
                    watch_new_directory(debouncer, path);
                }
            }
            changes
                .entry(path.clone())
                .and_modify(|existing| {
                    // A Create earlier in the batch wins over a later
                    // Write for the same path: the file's whole content is
                    // new, not incrementally modified.
                    if *existing != ChangeType::Created {
                        *existing = kind;
                    }
                })
                .or_insert(kind);
        }
    }

    if changes.is_empty() {
        return;
    }

    let batch: Vec<WatchedChange> =
        changes.into_iter().map(|(path, kind)| WatchedChange { path, kind }).collect();
    let _ = tx.blocking_send(batch);
}

fn classify(kind: &notify::EventKind) -> Option<ChangeType> {
    use notify::event::ModifyKind;
    use notify::EventKind;

    match kind {
        EventKind::Create(_) => Some(ChangeType::Created),
        EventKind::Remove(_) => Some(ChangeType::Deleted),
        EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeType::Deleted),
        EventKind::Modify(_) => Some(ChangeType::Changed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_create_remove_and_modify() {
        use notify::event::{CreateKind, ModifyKind, RemoveKind};
        use notify::EventKind;

        assert_eq!(classify(&EventKind::Create(CreateKind::File)), Some(ChangeType::Created));
        assert_eq!(classify(&EventKind::Remove(RemoveKind::File)), Some(ChangeType::Deleted));
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Content))),
            Some(ChangeType::Changed)
        );
        assert_eq!(classify(&EventKind::Other), None);
    }

    #[test]
    fn create_in_batch_is_not_downgraded_by_a_later_write() {
        let mut changes: HashMap<PathBuf, ChangeType> = HashMap::new();
        let path = PathBuf::from("/ws/a.bsl");

        changes.entry(path.clone()).or_insert(ChangeType::Created);
        changes.entry(path.clone()).and_modify(|existing| {
            if *existing != ChangeType::Created {
                *existing = ChangeType::Changed;
            }
        });

        assert_eq!(changes[&path], ChangeType::Created);
    }
}
