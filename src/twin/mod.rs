//! Device twin property model.
//!
//! A twin is a hierarchical key-value document. Every data-bearing mutation
//! propagates one change signal to the document root, and deletions are
//! remembered as tombstones so the document can be sent as a partial-update
//! patch (removed keys carry `null`).

/// Property document and change propagation.
pub mod document;
/// Pushing materialized documents to a backend twin.
pub mod sync;

pub use document::{Added, ChangeListener, NodeId, TwinDocument};
pub use sync::{sync_twin, ChangeTracker, TwinBackend};
