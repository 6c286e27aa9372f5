//! Streaming invocations.
//!
//! A streaming invocation exposes a long-running, push-based, cancellable
//! result stream in a columnar row format. The same controller drives both
//! backing sources: device telemetry and file-upload notifications.

/// Invocation controller and the generic row-source seam.
pub mod controller;
/// Scripted in-memory sources.
pub mod memory;
/// File-upload notification rows and source traits.
pub mod notifications;
/// Row and column types.
pub mod row;
/// Producer and caller ends of a stream.
pub mod sink;
/// Telemetry rows and source traits.
pub mod telemetry;

pub use controller::{RowSource, StreamConfig, StreamingController};
pub use notifications::{Notification, NotificationReceiver, NotificationStreamSource, ServiceProtocol};
pub use row::{Cell, Column, ColumnType, Row, Schema, NOTIFICATION_COLUMNS, TELEMETRY_COLUMNS};
pub use sink::{InvocationId, InvocationState, RowSink, RowStream, Termination};
pub use telemetry::{Event, EventReceiver, EventStreamSource, TelemetryRequest};
