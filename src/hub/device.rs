//! Devices attached to a hub.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tracing::debug;

use crate::error::{InputError, LinkError, LinkResult};
use crate::twin::{Added, ChangeTracker, TwinBackend, TwinDocument};

use super::actions::{self, DeviceProtocol};
use super::connection::ConnectionString;

/// A device registered with the hub, represented by its twin.
///
/// The twin is shared behind a lock so that readers (materialization, sync)
/// and writers (property actions) may live on different threads.
#[derive(Debug)]
pub struct RemoteDevice {
    id: String,
    twin: Arc<RwLock<TwinDocument>>,
    tracker: Arc<ChangeTracker>,
}

impl RemoteDevice {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let tracker = Arc::new(ChangeTracker::new());
        let twin = TwinDocument::with_listener(tracker.clone());
        Self {
            id: id.into(),
            twin: Arc::new(RwLock::new(twin)),
            tracker,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Shared handle to the twin document.
    #[must_use]
    pub fn twin(&self) -> Arc<RwLock<TwinDocument>> {
        Arc::clone(&self.twin)
    }

    #[must_use]
    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    /// # Errors
    ///
    /// Returns `LinkError::Internal` if the lock is poisoned.
    pub fn read(&self) -> LinkResult<RwLockReadGuard<'_, TwinDocument>> {
        self.twin.read().map_err(|_| LinkError::internal("twin lock poisoned"))
    }

    /// # Errors
    ///
    /// Returns `LinkError::Internal` if the lock is poisoned.
    pub fn write(&self) -> LinkResult<RwLockWriteGuard<'_, TwinDocument>> {
        self.twin.write().map_err(|_| LinkError::internal("twin lock poisoned"))
    }

    /// Runs the twin `Add` action on the map at `path` (empty for the root).
    ///
    /// Returns `Ok(None)` when the value type is not recognized.
    ///
    /// # Errors
    ///
    /// Returns `InputError::UnknownNode` if `path` does not name a map, and
    /// any error from parameter resolution or the add itself.
    pub fn add_property(&self, path: &[&str], params: &Map<String, Json>) -> LinkResult<Option<Added>> {
        let resolved = actions::twin_add().resolve(params)?;
        let name = resolved.require("Name")?;
        let kind = resolved.require("Value Type")?;

        let mut doc = self.write()?;
        let node = doc.resolve(path).ok_or_else(|| InputError::UnknownNode {
            path: format!("/{}", path.join("/")),
        })?;
        doc.add(node, name, kind, None)
    }

    /// Current twin as JSON.
    ///
    /// # Errors
    ///
    /// Returns `LinkError::Internal` if the lock is poisoned.
    pub fn materialize(&self) -> LinkResult<Json> {
        Ok(self.read()?.materialize_root())
    }

    /// Pushes the twin to `backend` and clears tombstones on success.
    ///
    /// # Errors
    ///
    /// Returns the backend failure; the document keeps its tombstones.
    pub fn sync_twin(&self, backend: &dyn TwinBackend) -> LinkResult<Json> {
        let mut doc = self.write()?;
        // Mutations need the write lock, so no change can slip in between.
        let seen = self.tracker.changes();
        let patch = crate::twin::sync_twin(&mut doc, backend, &self.id)?;
        self.tracker.mark_synced(seen);
        Ok(patch)
    }
}

/// A device simulated by the link itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDevice {
    id: String,
    protocol: DeviceProtocol,
}

impl LocalDevice {
    #[must_use]
    pub fn new(id: impl Into<String>, protocol: DeviceProtocol) -> Self {
        let id = id.into();
        debug!(device_id = %id, protocol = protocol.name(), "local device created");
        Self { id, protocol }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn protocol(&self) -> DeviceProtocol {
        self.protocol
    }

    /// Device connection string on `hub`, authenticating with `key`.
    #[must_use]
    pub fn connection_string(&self, hub: &ConnectionString, key: &str) -> String {
        format!("HostName={};DeviceId={};SharedAccessKey={key}", hub.host_name(), self.id)
    }
}
