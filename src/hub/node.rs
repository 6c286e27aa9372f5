//! A configured IoT hub and the service clients derived from it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value as Json};
use tracing::{debug, info, warn};

use crate::error::{InputError, LinkError, LinkResult, SourceError};
use crate::stream::{
    EventStreamSource, NotificationStreamSource, RowStream, ServiceProtocol, StreamingController, TelemetryRequest,
};
use crate::twin::TwinBackend;

use super::actions::{self, ActionSpec, DeviceProtocol};
use super::connection::ConnectionString;
use super::device::{LocalDevice, RemoteDevice};

/// Invokes direct methods on devices.
pub trait MethodClient: Send + Sync {
    /// Calls `method` on `device_id` and returns the device's response payload.
    fn invoke(&self, device_id: &str, method: &str, payload: &Json, timeout: Duration) -> Result<Json, SourceError>;
}

/// Builds the service-side collaborators for a hub.
///
/// Client construction may fail (bad credentials, unreachable host); the
/// hub logs such failures and retries on next use.
pub trait ServiceClientFactory: Send + Sync {
    fn twin_client(&self, connection: &ConnectionString) -> Result<Arc<dyn TwinBackend>, SourceError>;

    fn method_client(&self, connection: &ConnectionString) -> Result<Arc<dyn MethodClient>, SourceError>;

    fn event_source(&self) -> Arc<dyn EventStreamSource>;

    fn notification_source(&self) -> Arc<dyn NotificationStreamSource>;
}

/// Result of a dispatched action.
#[derive(Debug)]
pub enum ActionOutcome {
    Done,
    Stream(RowStream),
}

impl ActionOutcome {
    #[must_use]
    pub fn into_stream(self) -> Option<RowStream> {
        match self {
            Self::Stream(s) => Some(s),
            Self::Done => None,
        }
    }
}

type Slot<T> = Mutex<Option<Arc<T>>>;

/// One configured hub.
pub struct Hub {
    name: String,
    connection: ConnectionString,
    factory: Arc<dyn ServiceClientFactory>,
    twin_client: Slot<dyn TwinBackend>,
    method_client: Slot<dyn MethodClient>,
    remote: BTreeMap<String, RemoteDevice>,
    local: BTreeMap<String, LocalDevice>,
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("name", &self.name)
            .field("connection", &self.connection)
            .field("remote", &self.remote.keys().collect::<Vec<_>>())
            .field("local", &self.local.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Creates the hub and tries to derive its service clients.
    #[must_use]
    pub fn new(name: impl Into<String>, connection: ConnectionString, factory: Arc<dyn ServiceClientFactory>) -> Self {
        let hub = Self {
            name: name.into(),
            connection,
            factory,
            twin_client: Mutex::new(None),
            method_client: Mutex::new(None),
            remote: BTreeMap::new(),
            local: BTreeMap::new(),
        };
        hub.connect_clients();
        hub
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn connection(&self) -> &ConnectionString {
        &self.connection
    }

    /// Replaces the connection string and re-derives the service clients.
    ///
    /// # Errors
    ///
    /// Returns `InputError::InvalidConnectionString` if `raw` does not parse;
    /// the hub is left unchanged.
    pub fn edit(&mut self, raw: &str) -> LinkResult<()> {
        let connection = ConnectionString::parse(raw)?;
        info!(hub = %self.name, host = connection.host_name(), "hub connection updated");
        self.connection = connection;
        self.connect_clients();
        Ok(())
    }

    /// Twin client, created on first use if an earlier attempt failed.
    ///
    /// # Errors
    ///
    /// Returns the factory's failure as `SourceError`.
    pub fn twin_client(&self) -> LinkResult<Arc<dyn TwinBackend>> {
        self.client(&self.twin_client, "twin", |f, cs| f.twin_client(cs))
    }

    /// Method client, created on first use if an earlier attempt failed.
    ///
    /// # Errors
    ///
    /// Returns the factory's failure as `SourceError`.
    pub fn method_client(&self) -> LinkResult<Arc<dyn MethodClient>> {
        self.client(&self.method_client, "method", |f, cs| f.method_client(cs))
    }

    /// Declared actions on this hub.
    #[must_use]
    pub fn actions(&self) -> Vec<ActionSpec> {
        vec![
            actions::edit(self.connection.as_str()),
            actions::read_messages(),
            actions::file_upload_notifications(),
            actions::add_remote_device(),
            actions::create_local_device(),
        ]
    }

    /// Starts a telemetry stream.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::SourceUnavailable` if the receiver cannot be opened.
    pub fn read_messages(&self, controller: &StreamingController, request: &TelemetryRequest) -> LinkResult<RowStream> {
        let source = self.factory.event_source();
        controller.read_messages(source.as_ref(), request)
    }

    /// Starts a file-upload notification stream.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::SourceUnavailable` if the receiver cannot be opened.
    pub fn file_upload_notifications(
        &self,
        controller: &StreamingController,
        protocol: ServiceProtocol,
    ) -> LinkResult<RowStream> {
        let source = self.factory.notification_source();
        controller.file_upload_notifications(source.as_ref(), self.connection.as_str(), protocol)
    }

    /// Adds a twin-backed device.
    ///
    /// # Errors
    ///
    /// Returns `InputError::DuplicateName` if any device already uses `id`.
    pub fn add_remote_device(&mut self, id: &str) -> LinkResult<&RemoteDevice> {
        self.check_device_id(id)?;
        debug!(hub = %self.name, device_id = id, "remote device added");
        Ok(&*self.remote.entry(id.to_string()).or_insert_with(|| RemoteDevice::new(id)))
    }

    /// Adds a device simulated by the link.
    ///
    /// # Errors
    ///
    /// Returns `InputError::DuplicateName` if any device already uses `id`.
    pub fn create_local_device(&mut self, id: &str, protocol: DeviceProtocol) -> LinkResult<&LocalDevice> {
        self.check_device_id(id)?;
        Ok(&*self
            .local
            .entry(id.to_string())
            .or_insert_with(|| LocalDevice::new(id, protocol)))
    }

    #[must_use]
    pub fn remote_device(&self, id: &str) -> Option<&RemoteDevice> {
        self.remote.get(id)
    }

    #[must_use]
    pub fn local_device(&self, id: &str) -> Option<&LocalDevice> {
        self.local.get(id)
    }

    /// All device ids, remote first, each group sorted.
    #[must_use]
    pub fn device_ids(&self) -> Vec<&str> {
        self.remote.keys().chain(self.local.keys()).map(String::as_str).collect()
    }

    /// Removes a device of either kind. Returns false if none matched.
    pub fn remove_device(&mut self, id: &str) -> bool {
        self.remote.remove(id).is_some() || self.local.remove(id).is_some()
    }

    /// Pushes a remote device's twin through the hub's twin client.
    ///
    /// # Errors
    ///
    /// Returns `InputError::UnknownNode` for an unknown device, or the
    /// client/backend failure.
    pub fn sync_device_twin(&self, id: &str) -> LinkResult<Json> {
        let device = self.remote.get(id).ok_or_else(|| self.unknown_device(id))?;
        let client = self.twin_client()?;
        device.sync_twin(client.as_ref())
    }

    /// Invokes a direct method on a remote device.
    ///
    /// # Errors
    ///
    /// Returns `InputError::UnknownNode` for an unknown device, or the
    /// client failure.
    pub fn invoke_method(&self, id: &str, method: &str, payload: &Json, timeout: Duration) -> LinkResult<Json> {
        if !self.remote.contains_key(id) {
            return Err(self.unknown_device(id));
        }
        let client = self.method_client()?;
        client.invoke(id, method, payload, timeout).map_err(|e| {
            warn!(hub = %self.name, device_id = id, method, error = %e, "method invocation failed");
            e.into()
        })
    }

    /// Dispatches one of [`actions`](Self::actions) by name.
    ///
    /// # Errors
    ///
    /// Returns `InputError::UnknownNode` for an undeclared action, parameter
    /// errors, or the action's own failure.
    pub fn invoke(
        &mut self,
        controller: &StreamingController,
        action: &str,
        params: &Map<String, Json>,
    ) -> LinkResult<ActionOutcome> {
        match action {
            actions::EDIT => {
                let p = actions::edit(self.connection.as_str()).resolve(params)?;
                self.edit(p.require("Connection String")?)?;
                Ok(ActionOutcome::Done)
            }
            actions::READ_MESSAGES => {
                let p = actions::read_messages().resolve(params)?;
                let request = TelemetryRequest::new(
                    p.require("EventHub Compatible Name")?,
                    p.require("EventHub Compatible Endpoint")?,
                    p.get("Partition ID"),
                    p.get("Start Time"),
                )?;
                self.read_messages(controller, &request).map(ActionOutcome::Stream)
            }
            actions::GET_FILE_UPLOAD_NOTIFICATIONS => {
                let p = actions::file_upload_notifications().resolve(params)?;
                let protocol = ServiceProtocol::parse(p.require("Protocol")?);
                self.file_upload_notifications(controller, protocol)
                    .map(ActionOutcome::Stream)
            }
            actions::ADD_REMOTE_DEVICE => {
                let p = actions::add_remote_device().resolve(params)?;
                self.add_remote_device(p.require("Device ID")?)?;
                Ok(ActionOutcome::Done)
            }
            actions::CREATE_LOCAL_DEVICE => {
                let p = actions::create_local_device().resolve(params)?;
                let protocol = DeviceProtocol::parse(p.require("Protocol")?)?;
                self.create_local_device(p.require("Device ID")?, protocol)?;
                Ok(ActionOutcome::Done)
            }
            other => Err(InputError::UnknownNode {
                path: format!("/{}/{other}", self.name),
            }
            .into()),
        }
    }

    fn connect_clients(&self) {
        self.reset(&self.twin_client, "twin", |f, cs| f.twin_client(cs));
        self.reset(&self.method_client, "method", |f, cs| f.method_client(cs));
    }

    // Failure leaves the slot empty; the hub stays usable for streaming.
    fn reset<T: ?Sized>(
        &self,
        slot: &Slot<T>,
        kind: &str,
        make: impl Fn(&dyn ServiceClientFactory, &ConnectionString) -> Result<Arc<T>, SourceError>,
    ) {
        let client = match make(self.factory.as_ref(), &self.connection) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(hub = %self.name, client = kind, error = %e, "error creating client");
                None
            }
        };
        if let Ok(mut guard) = slot.lock() {
            *guard = client;
        }
    }

    fn client<T: ?Sized>(
        &self,
        slot: &Slot<T>,
        kind: &str,
        make: impl Fn(&dyn ServiceClientFactory, &ConnectionString) -> Result<Arc<T>, SourceError>,
    ) -> LinkResult<Arc<T>> {
        let mut guard = slot
            .lock()
            .map_err(|_| LinkError::internal(format!("{kind} client lock poisoned")))?;
        if let Some(client) = guard.as_ref() {
            return Ok(Arc::clone(client));
        }
        let client = make(self.factory.as_ref(), &self.connection).map_err(|e| {
            warn!(hub = %self.name, client = kind, error = %e, "error creating client");
            LinkError::from(e)
        })?;
        *guard = Some(Arc::clone(&client));
        Ok(client)
    }

    fn check_device_id(&self, id: &str) -> LinkResult<()> {
        if id.trim().is_empty() {
            return Err(InputError::MissingParameter {
                name: "Device ID".to_string(),
            }
            .into());
        }
        if self.remote.contains_key(id) || self.local.contains_key(id) {
            return Err(InputError::DuplicateName { name: id.to_string() }.into());
        }
        Ok(())
    }

    fn unknown_device(&self, id: &str) -> LinkError {
        InputError::UnknownNode {
            path: format!("/{}/{id}", self.name),
        }
        .into()
    }
}
