//! Persisted link configuration.
//!
//! The configuration is a single JSON document holding stream tuning and the
//! list of configured hubs. It is the durable store for hub connection
//! strings.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, LinkResult};
use crate::stream::StreamConfig;

/// One configured hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubEntry {
    pub name: String,
    /// Kept as text so that one bad entry does not make the file unreadable.
    pub connection_string: String,
}

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub stream: StreamConfig,
    pub hubs: Vec<HubEntry>,
}

impl LinkConfig {
    /// Loads the configuration at `path`.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read and
    /// `ConfigError::Parse` if it is not a valid document.
    pub fn load(path: &Path) -> LinkResult<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "config not found, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                }
                .into())
            }
        };
        serde_json::from_str(&text).map_err(|source| {
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
            .into()
        })
    }

    /// Writes the configuration to `path`, replacing any existing file.
    ///
    /// The document is written to a sibling temporary file and renamed into
    /// place.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` on any filesystem failure.
    pub fn save(&self, path: &Path) -> LinkResult<()> {
        let io = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(io)?;
        fs::rename(&tmp, path).map_err(io)?;
        debug!(path = %path.display(), hubs = self.hubs.len(), "config saved");
        Ok(())
    }

    #[must_use]
    pub fn hub(&self, name: &str) -> Option<&HubEntry> {
        self.hubs.iter().find(|h| h.name == name)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = LinkConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(cfg, LinkConfig::default());
        assert_eq!(cfg.stream.batch_size, 100);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("link.json");
        let mut cfg = LinkConfig::default();
        cfg.stream.row_buffer = 8;
        cfg.hubs.push(HubEntry {
            name: "plant".to_string(),
            connection_string: "HostName=plant.azure-devices.net".to_string(),
        });
        cfg.save(&path).unwrap();

        let loaded = LinkConfig::load(&path).unwrap();
        assert_eq!(loaded, cfg);
        assert!(loaded.hub("plant").is_some());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("link.json");
        fs::write(&path, r#"{"stream": {"batch_size": 10}}"#).unwrap();
        let cfg = LinkConfig::load(&path).unwrap();
        assert_eq!(cfg.stream.batch_size, 10);
        assert_eq!(cfg.stream.row_buffer, StreamConfig::default().row_buffer);
        assert!(cfg.hubs.is_empty());
    }

    #[test]
    fn test_invalid_document_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("link.json");
        fs::write(&path, "{ not json").unwrap();
        let err = LinkConfig::load(&path).unwrap_err();
        assert!(err.is_config());
        assert!(format!("{err}").contains("link.json"));
    }
}
