//! Hubs, their devices, and the actions they expose.
//!
//! The node tree is rooted at a [`HubRegistry`]. Each [`Hub`] owns its
//! remote (twin-backed) and local devices and starts streams through the
//! registry's controller.

/// Declared actions and parameter resolution.
pub mod actions;
/// Connection string parsing.
pub mod connection;
/// Remote and local devices.
pub mod device;
/// The hub node and its service clients.
pub mod node;
/// The root registry.
pub mod registry;

pub use actions::{ActionSpec, DeviceProtocol, ParamKind, ParamSpec, Parameters, ResultKind};
pub use connection::ConnectionString;
pub use device::{LocalDevice, RemoteDevice};
pub use node::{ActionOutcome, Hub, MethodClient, ServiceClientFactory};
pub use registry::HubRegistry;
