//! Hub connection strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::InputError;

const HOST_NAME: &str = "HostName";
const KEY_NAME: &str = "SharedAccessKeyName";
const KEY: &str = "SharedAccessKey";
const DEVICE_ID: &str = "DeviceId";

/// A parsed `Key=Value;Key=Value` hub connection string.
///
/// # Examples
///
/// ```
/// use iothub_link::hub::ConnectionString;
///
/// let cs: ConnectionString =
///     "HostName=plant.azure-devices.net;SharedAccessKeyName=service;SharedAccessKey=abc=".parse().unwrap();
/// assert_eq!(cs.host_name(), "plant.azure-devices.net");
/// assert_eq!(cs.hub_name(), "plant");
/// assert_eq!(cs.shared_access_key(), Some("abc="));
/// assert!(!cs.redacted().contains("abc="));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConnectionString {
    raw: String,
    host_name: String,
    shared_access_key_name: Option<String>,
    shared_access_key: Option<String>,
    device_id: Option<String>,
}

impl ConnectionString {
    /// Parses a connection string.
    ///
    /// Keys are case-sensitive; values may contain `=`. Unknown keys are kept
    /// in the raw form but otherwise ignored.
    ///
    /// # Errors
    ///
    /// Returns `InputError::InvalidConnectionString` if a segment has no `=`,
    /// or `HostName` is missing or empty.
    pub fn parse(raw: &str) -> Result<Self, InputError> {
        let raw = raw.trim();
        let mut host_name = None;
        let mut shared_access_key_name = None;
        let mut shared_access_key = None;
        let mut device_id = None;

        for segment in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let Some((key, value)) = segment.split_once('=') else {
                return Err(invalid(format!("segment '{segment}' is not Key=Value")));
            };
            let value = value.trim().to_string();
            match key.trim() {
                HOST_NAME => host_name = Some(value),
                KEY_NAME => shared_access_key_name = Some(value),
                KEY => shared_access_key = Some(value),
                DEVICE_ID => device_id = Some(value),
                _ => {}
            }
        }

        let host_name = host_name
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid(format!("missing {HOST_NAME}")))?;

        Ok(Self {
            raw: raw.to_string(),
            host_name,
            shared_access_key_name,
            shared_access_key,
            device_id,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// First label of the host name.
    #[must_use]
    pub fn hub_name(&self) -> &str {
        self.host_name.split('.').next().unwrap_or(&self.host_name)
    }

    #[must_use]
    pub fn shared_access_key_name(&self) -> Option<&str> {
        self.shared_access_key_name.as_deref()
    }

    #[must_use]
    pub fn shared_access_key(&self) -> Option<&str> {
        self.shared_access_key.as_deref()
    }

    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// The connection string with the key value masked, for logs.
    #[must_use]
    pub fn redacted(&self) -> String {
        self.raw
            .split(';')
            .map(|segment| match segment.split_once('=') {
                Some((key, _)) if key.trim() == KEY => format!("{key}=***"),
                _ => segment.to_string(),
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

fn invalid(reason: String) -> InputError {
    InputError::InvalidConnectionString { reason }
}

impl FromStr for ConnectionString {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ConnectionString {
    type Error = InputError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ConnectionString> for String {
    fn from(value: ConnectionString) -> Self {
        value.raw
    }
}

// Debug must not leak the key.
impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionString").field(&self.redacted()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CS: &str = "HostName=plant.azure-devices.net;SharedAccessKeyName=iothubowner;SharedAccessKey=c2VjcmV0==";

    #[test]
    fn test_parse_service_string() {
        let cs = ConnectionString::parse(CS).unwrap();
        assert_eq!(cs.host_name(), "plant.azure-devices.net");
        assert_eq!(cs.shared_access_key_name(), Some("iothubowner"));
        assert_eq!(cs.shared_access_key(), Some("c2VjcmV0=="));
        assert_eq!(cs.device_id(), None);
        assert_eq!(cs.as_str(), CS);
    }

    #[test]
    fn test_parse_device_string_with_trailing_separator() {
        let cs = ConnectionString::parse("HostName=h.net;DeviceId=d1;SharedAccessKey=k;").unwrap();
        assert_eq!(cs.device_id(), Some("d1"));
        assert_eq!(cs.hub_name(), "h");
    }

    #[test]
    fn test_missing_host_is_invalid() {
        let err = ConnectionString::parse("SharedAccessKey=k").unwrap_err();
        assert!(matches!(err, InputError::InvalidConnectionString { .. }));
        assert!(ConnectionString::parse("HostName=").is_err());
        assert!(ConnectionString::parse("").is_err());
    }

    #[test]
    fn test_segment_without_equals_is_invalid() {
        assert!(ConnectionString::parse("HostName=h;garbage").is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let cs = ConnectionString::parse(CS).unwrap();
        let dbg = format!("{cs:?}");
        assert!(dbg.contains("SharedAccessKey=***"));
        assert!(!dbg.contains("c2VjcmV0"));
    }

    #[test]
    fn test_serde_round_trip_through_string() {
        let cs = ConnectionString::parse(CS).unwrap();
        let json = serde_json::to_string(&cs).unwrap();
        assert_eq!(json, format!("\"{CS}\""));
        let back: ConnectionString = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cs);
        assert!(serde_json::from_str::<ConnectionString>("\"nope\"").is_err());
    }
}
