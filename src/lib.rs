//! # iothub-link
//!
//! A bridge that exposes an IoT hub as a tree of nodes with invokable
//! actions. Two pieces do the real work:
//!
//! - **Streaming invocations**: long-running, cancellable, push-based row
//!   streams over device telemetry and file-upload notifications
//!   ([`stream`]).
//! - **Twin property trees**: hierarchical device-twin documents with
//!   tombstoned deletions and change propagation to the root ([`twin`]).
//!
//! Hubs, devices and their actions live in [`hub`]; the persisted hub list
//! and stream tuning live in [`config`].
//!
//! ## Usage
//!
//! ```rust
//! use iothub_link::{PropertyValue, TwinDocument, ValueKind};
//! use serde_json::json;
//!
//! let mut twin = TwinDocument::new();
//! let root = twin.root();
//! twin.add_kind(root, "firmware", ValueKind::String, Some(&json!("1.4.2")))?;
//! twin.add_kind(root, "interval", ValueKind::Number, None)?;
//! twin.remove(root, "interval")?;
//!
//! assert_eq!(twin.value(root, "firmware"), Some(&PropertyValue::String("1.4.2".into())));
//! assert_eq!(twin.materialize_root(), json!({"interval": null, "firmware": "1.4.2"}));
//! # Ok::<(), iothub_link::LinkError>(())
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod hub;
pub mod stream;
pub mod time;
pub mod twin;
pub mod value;

pub use config::{HubEntry, LinkConfig};
pub use error::{ConfigError, InputError, LinkError, LinkResult, SourceError, StreamError};
pub use hub::{ConnectionString, Hub, HubRegistry};
pub use stream::{Row, RowStream, StreamConfig, StreamingController};
pub use time::StartPosition;
pub use twin::{ChangeListener, NodeId, TwinDocument};
pub use value::{PropertyValue, Scalar, ValueKind};
