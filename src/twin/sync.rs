//! Twin synchronization.
//!
//! The document root is the only party that may forget tombstones, and only
//! after the backend has accepted a patch that carried them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::error::{LinkResult, SourceError};

use super::document::{ChangeListener, TwinDocument};

/// Backend holding the authoritative twin documents.
pub trait TwinBackend: Send + Sync {
    /// Applies `patch` to the reported properties of `device_id`.
    ///
    /// Keys mapped to `null` are removed on the backend.
    fn update_twin(&self, device_id: &str, patch: &Json) -> Result<(), SourceError>;
}

/// Listener that remembers whether the document changed since the last sync.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    changes: AtomicU64,
    synced: AtomicU64,
    last_child: Mutex<Option<String>>,
}

impl ChangeTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total change signals received.
    #[must_use]
    pub fn changes(&self) -> u64 {
        self.changes.load(Ordering::Acquire)
    }

    /// Returns true if a change arrived after the last `mark_synced`.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.changes.load(Ordering::Acquire) != self.synced.load(Ordering::Acquire)
    }

    /// Root-level entry named by the most recent change.
    #[must_use]
    pub fn last_child(&self) -> Option<String> {
        self.last_child.lock().ok().and_then(|g| g.clone())
    }

    /// Records that everything seen up to `changes` has been synchronized.
    pub fn mark_synced(&self, changes: u64) {
        self.synced.fetch_max(changes, Ordering::AcqRel);
    }
}

impl ChangeListener for ChangeTracker {
    fn twin_changed(&self, child: &str) {
        if let Ok(mut last) = self.last_child.lock() {
            *last = Some(child.to_string());
        }
        self.changes.fetch_add(1, Ordering::AcqRel);
    }
}

/// Sends the whole document as a patch, then clears its tombstones.
///
/// On failure the tombstones are kept so the next round resends them.
///
/// # Errors
///
/// Returns the backend's error unchanged.
pub fn sync_twin(doc: &mut TwinDocument, backend: &dyn TwinBackend, device_id: &str) -> LinkResult<Json> {
    let patch = doc.materialize_root();
    match backend.update_twin(device_id, &patch) {
        Ok(()) => {
            debug!(device_id, generation = doc.generation(), "twin synchronized");
            doc.clear_tombstones();
            Ok(patch)
        }
        Err(e) => {
            warn!(device_id, error = %e, "failed to update twin");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct RecordingBackend {
        fail: bool,
        patches: Mutex<Vec<(String, Json)>>,
    }

    impl TwinBackend for RecordingBackend {
        fn update_twin(&self, device_id: &str, patch: &Json) -> Result<(), SourceError> {
            if self.fail {
                return Err(SourceError::unavailable("twin service unreachable"));
            }
            self.patches.lock().unwrap().push((device_id.to_string(), patch.clone()));
            Ok(())
        }
    }

    #[test]
    fn test_sync_sends_tombstones_once() {
        let backend = RecordingBackend::default();
        let mut doc = TwinDocument::new();
        let root = doc.root();
        doc.add(root, "a", "Number", Some(&json!(1))).unwrap();
        doc.add(root, "b", "Number", Some(&json!(2))).unwrap();
        doc.remove(root, "b").unwrap();

        let first = sync_twin(&mut doc, &backend, "dev-1").unwrap();
        assert_eq!(first, json!({"a": 1.0, "b": null}));

        let second = sync_twin(&mut doc, &backend, "dev-1").unwrap();
        assert_eq!(second, json!({"a": 1.0}));
        assert_eq!(backend.patches.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_failed_sync_keeps_tombstones() {
        let backend = RecordingBackend {
            fail: true,
            ..RecordingBackend::default()
        };
        let mut doc = TwinDocument::new();
        let root = doc.root();
        doc.add(root, "gone", "Bool", None).unwrap();
        doc.remove(root, "gone").unwrap();

        let err = sync_twin(&mut doc, &backend, "dev-1").unwrap_err();
        assert!(err.is_source_unavailable());
        assert!(doc.has_tombstones());
    }

    #[test]
    fn test_tracker_follows_changes() {
        let tracker = Arc::new(ChangeTracker::new());
        let mut doc = TwinDocument::with_listener(tracker.clone());
        let root = doc.root();
        assert!(!tracker.is_dirty());

        doc.add(root, "cfg", "Map", None).unwrap();
        let cfg = doc.child_tree(root, "cfg").unwrap();
        doc.add(cfg, "rate", "Number", None).unwrap();

        assert_eq!(tracker.changes(), 2);
        assert_eq!(tracker.last_child().as_deref(), Some("cfg"));
        assert!(tracker.is_dirty());

        tracker.mark_synced(tracker.changes());
        assert!(!tracker.is_dirty());
    }
}
