//! The root of the node tree: the set of configured hubs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value as Json};
use tracing::{info, warn};

use crate::config::{HubEntry, LinkConfig};
use crate::error::{InputError, LinkResult};
use crate::stream::{StreamConfig, StreamingController};

use super::actions::{self, ActionSpec};
use super::connection::ConnectionString;
use super::node::{ActionOutcome, Hub, ServiceClientFactory};

/// Owns every hub and the controller that runs their streams.
///
/// When opened from a config path, every change to the hub set is written
/// back immediately.
pub struct HubRegistry {
    hubs: BTreeMap<String, Hub>,
    controller: StreamingController,
    factory: Arc<dyn ServiceClientFactory>,
    config_path: Option<PathBuf>,
}

impl fmt::Debug for HubRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubRegistry")
            .field("hubs", &self.hubs.keys().collect::<Vec<_>>())
            .field("controller", &self.controller)
            .field("config_path", &self.config_path)
            .finish_non_exhaustive()
    }
}

impl HubRegistry {
    /// Creates an empty, unpersisted registry.
    #[must_use]
    pub fn new(cfg: StreamConfig, factory: Arc<dyn ServiceClientFactory>) -> Self {
        Self {
            hubs: BTreeMap::new(),
            controller: StreamingController::new(cfg),
            factory,
            config_path: None,
        }
    }

    /// Loads the registry from the config at `path` and persists to it.
    ///
    /// Entries whose connection string no longer parses are skipped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>, factory: Arc<dyn ServiceClientFactory>) -> LinkResult<Self> {
        let path = path.into();
        let cfg = LinkConfig::load(&path)?;
        let mut registry = Self::new(cfg.stream, factory);
        for entry in cfg.hubs {
            match ConnectionString::parse(&entry.connection_string) {
                Ok(connection) => {
                    let hub = Hub::new(entry.name.clone(), connection, Arc::clone(&registry.factory));
                    registry.hubs.insert(entry.name, hub);
                }
                Err(e) => warn!(hub = %entry.name, error = %e, "skipping configured hub"),
            }
        }
        registry.config_path = Some(path);
        Ok(registry)
    }

    #[must_use]
    pub const fn controller(&self) -> &StreamingController {
        &self.controller
    }

    #[must_use]
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Declared root actions.
    #[must_use]
    pub fn actions(&self) -> Vec<ActionSpec> {
        vec![actions::add_iot_hub()]
    }

    /// Adds a hub.
    ///
    /// # Errors
    ///
    /// Returns `InputError::MissingParameter` for an empty name,
    /// `InputError::DuplicateName` if the name is taken,
    /// `InputError::InvalidConnectionString`, or a `ConfigError` from
    /// persisting.
    pub fn add_hub(&mut self, name: &str, connection_string: &str) -> LinkResult<&mut Hub> {
        if name.trim().is_empty() {
            return Err(InputError::MissingParameter {
                name: "Name".to_string(),
            }
            .into());
        }
        if self.hubs.contains_key(name) {
            return Err(InputError::DuplicateName { name: name.to_string() }.into());
        }
        let connection = ConnectionString::parse(connection_string)?;
        let host = connection.host_name().to_string();
        let hub = Hub::new(name, connection, Arc::clone(&self.factory));
        self.hubs.insert(name.to_string(), hub);
        if let Err(e) = self.persist() {
            self.hubs.remove(name);
            return Err(e);
        }
        info!(hub = name, host = %host, "hub added");
        self.hubs
            .get_mut(name)
            .ok_or_else(|| InputError::UnknownNode { path: format!("/{name}") }.into())
    }

    /// Removes a hub. Returns false if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` from persisting.
    pub fn remove_hub(&mut self, name: &str) -> LinkResult<bool> {
        let Some(hub) = self.hubs.remove(name) else {
            return Ok(false);
        };
        if let Err(e) = self.persist() {
            self.hubs.insert(name.to_string(), hub);
            return Err(e);
        }
        info!(hub = name, "hub removed");
        Ok(true)
    }

    #[must_use]
    pub fn hub(&self, name: &str) -> Option<&Hub> {
        self.hubs.get(name)
    }

    #[must_use]
    pub fn hub_mut(&mut self, name: &str) -> Option<&mut Hub> {
        self.hubs.get_mut(name)
    }

    #[must_use]
    pub fn hub_names(&self) -> Vec<&str> {
        self.hubs.keys().map(String::as_str).collect()
    }

    /// Dispatches a root action.
    ///
    /// # Errors
    ///
    /// Returns `InputError::UnknownNode` for an undeclared action, or the
    /// action's own failure.
    pub fn invoke(&mut self, action: &str, params: &Map<String, Json>) -> LinkResult<ActionOutcome> {
        match action {
            actions::ADD_IOT_HUB => {
                let p = actions::add_iot_hub().resolve(params)?;
                self.add_hub(p.require("Name")?, p.require("Connection String")?)?;
                Ok(ActionOutcome::Done)
            }
            other => Err(InputError::UnknownNode { path: format!("/{other}") }.into()),
        }
    }

    /// Dispatches an action on the hub `name`.
    ///
    /// A successful `Edit` is persisted.
    ///
    /// # Errors
    ///
    /// Returns `InputError::UnknownNode` for an unknown hub, or the action's
    /// own failure.
    pub fn invoke_hub(&mut self, name: &str, action: &str, params: &Map<String, Json>) -> LinkResult<ActionOutcome> {
        let hub = self
            .hubs
            .get_mut(name)
            .ok_or_else(|| InputError::UnknownNode { path: format!("/{name}") })?;
        let previous = hub.connection().as_str().to_string();
        let outcome = hub.invoke(&self.controller, action, params)?;
        if action == actions::EDIT {
            if let Err(e) = self.persist() {
                self.restore_connection(name, &previous);
                return Err(e);
            }
        }
        Ok(outcome)
    }

    /// Current state as a config document.
    #[must_use]
    pub fn to_config(&self) -> LinkConfig {
        LinkConfig {
            stream: self.controller.config().clone(),
            hubs: self
                .hubs
                .values()
                .map(|hub| HubEntry {
                    name: hub.name().to_string(),
                    connection_string: hub.connection().as_str().to_string(),
                })
                .collect(),
        }
    }

    /// Cancels every running stream and waits for them.
    pub fn shutdown(&self) {
        self.controller.shutdown();
    }

    fn restore_connection(&mut self, name: &str, previous: &str) {
        if let Some(hub) = self.hubs.get_mut(name) {
            if let Err(e) = hub.edit(previous) {
                warn!(hub = name, error = %e, "failed to restore connection");
            }
        }
    }

    fn persist(&self) -> LinkResult<()> {
        match &self.config_path {
            Some(path) => self.to_config().save(path),
            None => Ok(()),
        }
    }
}
