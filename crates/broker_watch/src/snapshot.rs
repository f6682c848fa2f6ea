//! A scan-cycle snapshot of watched-file modification times, and the diff
//! between two snapshots that becomes a batch of change notifications.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// path → modification time, seconds since the Unix epoch.
pub type Snapshot = HashMap<PathBuf, i64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[repr(u8)]
pub enum ChangeType {
    Created = 1,
    Changed = 2,
    Deleted = 3,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedChange {
    pub path: PathBuf,
    pub kind: ChangeType,
}

/// Compare `old` to `new`: a key present only in `new` is a Created, a key
/// in both with a different mtime is Changed, a key present only in `old`
/// is Deleted.
pub fn diff(old: &Snapshot, new: &Snapshot) -> Vec<WatchedChange> {
    let mut changes = Vec::new();

    for (path, mtime) in new {
        match old.get(path) {
            None => changes.push(WatchedChange { path: path.clone(), kind: ChangeType::Created }),
            Some(prev) if prev != mtime => {
                changes.push(WatchedChange { path: path.clone(), kind: ChangeType::Changed })
            }
            _ => {}
        }
    }

    for path in old.keys() {
        if !new.contains_key(path) {
            changes.push(WatchedChange { path: path.clone(), kind: ChangeType::Deleted });
        }
    }

    changes
}

pub fn path_to_uri(path: &Path) -> String {
    format!("file://{}", path.display())
}

pub fn to_lsp_change(change: &WatchedChange) -> serde_json::Value {
    serde_json::json!({ "uri": path_to_uri(&change.path), "type": change.kind as u8 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_created_changed_and_deleted() {
        let mut old = Snapshot::new();
        old.insert(PathBuf::from("a.bsl"), 100);
        old.insert(PathBuf::from("b.bsl"), 100);

        let mut new = Snapshot::new();
        new.insert(PathBuf::from("a.bsl"), 200); // changed
        new.insert(PathBuf::from("c.bsl"), 100); // created
        // b.bsl deleted

        let mut changes = diff(&old, &new);
        changes.sort_by(|a, b| a.path.cmp(&b.path));

        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0], WatchedChange { path: "a.bsl".into(), kind: ChangeType::Changed });
        assert_eq!(changes[1], WatchedChange { path: "b.bsl".into(), kind: ChangeType::Deleted });
        assert_eq!(changes[2], WatchedChange { path: "c.bsl".into(), kind: ChangeType::Created });
    }

    #[test]
    fn identical_snapshots_yield_no_changes() {
        let mut snap = Snapshot::new();
        snap.insert(PathBuf::from("a.bsl"), 100);
        assert!(diff(&snap, &snap.clone()).is_empty());
    }

    #[test]
    fn lsp_change_shape_uses_numeric_type_codes() {
        let change = WatchedChange { path: PathBuf::from("/ws/a.bsl"), kind: ChangeType::Deleted };
        let value = to_lsp_change(&change);
        assert_eq!(value["type"], 3);
        assert_eq!(value["uri"], "file:///ws/a.bsl");
    }
}
