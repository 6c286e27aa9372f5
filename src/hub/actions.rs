//! Action declarations exposed to the node-tree client.
//!
//! An [`ActionSpec`] lists the parameters an action takes. Invocation
//! parameters arrive as a JSON object and are checked and defaulted by
//! [`ActionSpec::resolve`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::error::{InputError, LinkResult};
use crate::stream::ServiceProtocol;
use crate::value::ValueKind;

pub const ADD_IOT_HUB: &str = "Add IoT Hub";
pub const EDIT: &str = "Edit";
pub const READ_MESSAGES: &str = "Read Messages";
pub const GET_FILE_UPLOAD_NOTIFICATIONS: &str = "Get File Upload Notifications";
pub const ADD_REMOTE_DEVICE: &str = "Add Remote Device";
pub const CREATE_LOCAL_DEVICE: &str = "Create Local Device";
pub const TWIN_ADD: &str = "Add";

/// Parameter type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Enum(Vec<&'static str>),
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    #[serde(flatten)]
    pub kind: ParamKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'static str>,
    pub required: bool,
}

impl ParamSpec {
    const fn string(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::String,
            default: None,
            placeholder: None,
            description: None,
            required: true,
        }
    }

    fn enumeration(name: &'static str, values: Vec<&'static str>, default: &str) -> Self {
        Self {
            name,
            kind: ParamKind::Enum(values),
            default: Some(default.to_string()),
            placeholder: None,
            description: None,
            required: false,
        }
    }

    const fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    const fn with_placeholder(mut self, placeholder: &'static str) -> Self {
        self.placeholder = Some(placeholder);
        self
    }

    const fn with_description(mut self, description: &'static str) -> Self {
        self.description = Some(description);
        self
    }
}

/// What an action returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Void,
    StreamTable,
}

/// A declared action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionSpec {
    pub name: &'static str,
    pub params: Vec<ParamSpec>,
    pub result: ResultKind,
}

impl ActionSpec {
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Validates invocation parameters and fills in defaults.
    ///
    /// Values are read as text; non-string JSON scalars are rendered. Blank
    /// text counts as absent.
    ///
    /// # Errors
    ///
    /// Returns `InputError::MissingParameter` for an absent required
    /// parameter with no default.
    pub fn resolve(&self, raw: &Map<String, Json>) -> LinkResult<Parameters> {
        let mut values = Map::new();
        for spec in &self.params {
            let given = raw.get(spec.name).and_then(|v| match v {
                Json::Null => None,
                Json::String(s) if s.trim().is_empty() => None,
                Json::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            });
            match given.or_else(|| spec.default.clone()) {
                Some(v) => {
                    values.insert(spec.name.to_string(), Json::String(v));
                }
                None if spec.required => {
                    return Err(InputError::MissingParameter {
                        name: spec.name.to_string(),
                    }
                    .into());
                }
                None => {}
            }
        }
        Ok(Parameters { values })
    }
}

/// Resolved invocation parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    values: Map<String, Json>,
}

impl Parameters {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Json::as_str)
    }

    /// # Errors
    ///
    /// Returns `InputError::MissingParameter` if `name` was not resolved.
    pub fn require(&self, name: &str) -> LinkResult<&str> {
        self.get(name).ok_or_else(|| {
            InputError::MissingParameter {
                name: name.to_string(),
            }
            .into()
        })
    }
}

/// Device-side transports for local devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceProtocol {
    #[default]
    #[serde(rename = "MQTT")]
    Mqtt,
    #[serde(rename = "AMQPS")]
    Amqps,
    #[serde(rename = "HTTPS")]
    Https,
    #[serde(rename = "MQTT_WS")]
    MqttWs,
    #[serde(rename = "AMQPS_WS")]
    AmqpsWs,
}

impl DeviceProtocol {
    pub const ALL: [Self; 5] = [Self::Mqtt, Self::Amqps, Self::Https, Self::MqttWs, Self::AmqpsWs];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mqtt => "MQTT",
            Self::Amqps => "AMQPS",
            Self::Https => "HTTPS",
            Self::MqttWs => "MQTT_WS",
            Self::AmqpsWs => "AMQPS_WS",
        }
    }

    /// # Errors
    ///
    /// Returns `InputError::MalformedInput` for an unknown protocol name.
    pub fn parse(name: &str) -> LinkResult<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| crate::error::LinkError::malformed("Protocol", format!("unknown protocol '{name}'")))
    }
}

/// `Add IoT Hub` on the root.
#[must_use]
pub fn add_iot_hub() -> ActionSpec {
    ActionSpec {
        name: ADD_IOT_HUB,
        params: vec![ParamSpec::string("Name"), ParamSpec::string("Connection String")],
        result: ResultKind::Void,
    }
}

/// `Edit` on a hub, defaulting to its current connection string.
#[must_use]
pub fn edit(current_connection_string: &str) -> ActionSpec {
    ActionSpec {
        name: EDIT,
        params: vec![ParamSpec::string("Connection String").with_default(current_connection_string)],
        result: ResultKind::Void,
    }
}

/// `Read Messages` on a hub.
#[must_use]
pub fn read_messages() -> ActionSpec {
    ActionSpec {
        name: READ_MESSAGES,
        params: vec![
            ParamSpec::string("EventHub Compatible Name"),
            ParamSpec::string("EventHub Compatible Endpoint"),
            ParamSpec::string("Partition ID").optional().with_placeholder("0"),
            ParamSpec::string("Start Time")
                .optional()
                .with_placeholder("Optional")
                .with_description("Optional - defaults to 'now'"),
        ],
        result: ResultKind::StreamTable,
    }
}

/// `Get File Upload Notifications` on a hub.
#[must_use]
pub fn file_upload_notifications() -> ActionSpec {
    ActionSpec {
        name: GET_FILE_UPLOAD_NOTIFICATIONS,
        params: vec![ParamSpec::enumeration(
            "Protocol",
            ServiceProtocol::ALL.iter().map(|p| p.name()).collect(),
            ServiceProtocol::default().name(),
        )],
        result: ResultKind::StreamTable,
    }
}

/// `Add Remote Device` on a hub.
#[must_use]
pub fn add_remote_device() -> ActionSpec {
    ActionSpec {
        name: ADD_REMOTE_DEVICE,
        params: vec![ParamSpec::string("Device ID")],
        result: ResultKind::Void,
    }
}

/// `Create Local Device` on a hub.
#[must_use]
pub fn create_local_device() -> ActionSpec {
    ActionSpec {
        name: CREATE_LOCAL_DEVICE,
        params: vec![
            ParamSpec::string("Device ID"),
            ParamSpec::enumeration(
                "Protocol",
                DeviceProtocol::ALL.iter().map(|p| p.name()).collect(),
                DeviceProtocol::default().name(),
            ),
        ],
        result: ResultKind::Void,
    }
}

/// `Add` on a twin map.
#[must_use]
pub fn twin_add() -> ActionSpec {
    ActionSpec {
        name: TWIN_ADD,
        params: vec![
            ParamSpec::string("Name"),
            ParamSpec::enumeration(
                "Value Type",
                ValueKind::ALL.iter().map(|k| k.name()).collect(),
                ValueKind::String.name(),
            ),
        ],
        result: ResultKind::Void,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn params(v: Json) -> Map<String, Json> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_twin_add_defaults_to_string() {
        let p = twin_add().resolve(&params(json!({"Name": "fw"}))).unwrap();
        assert_eq!(p.get("Name"), Some("fw"));
        assert_eq!(p.get("Value Type"), Some("String"));
    }

    #[test]
    fn test_missing_required_parameter() {
        let err = add_iot_hub().resolve(&params(json!({"Name": "plant"}))).unwrap_err();
        assert!(format!("{err}").contains("Connection String"));
    }

    #[test]
    fn test_blank_optional_parameters_are_absent() {
        let p = read_messages()
            .resolve(&params(json!({
                "EventHub Compatible Name": "n",
                "EventHub Compatible Endpoint": "sb://e",
                "Start Time": "  ",
            })))
            .unwrap();
        assert_eq!(p.get("Start Time"), None);
        assert_eq!(p.get("Partition ID"), None);
        assert!(p.require("Partition ID").is_err());
    }

    #[test]
    fn test_non_string_values_are_rendered() {
        let p = read_messages()
            .resolve(&params(json!({
                "EventHub Compatible Name": "n",
                "EventHub Compatible Endpoint": "sb://e",
                "Partition ID": 3,
            })))
            .unwrap();
        assert_eq!(p.get("Partition ID"), Some("3"));
    }

    #[test]
    fn test_edit_defaults_to_current() {
        let spec = edit("HostName=h");
        let p = spec.resolve(&Map::new()).unwrap();
        assert_eq!(p.get("Connection String"), Some("HostName=h"));
    }

    #[test]
    fn test_declarations_serialize() {
        let v = serde_json::to_value(file_upload_notifications()).unwrap();
        assert_eq!(v["result"], json!("stream_table"));
        assert_eq!(v["params"][0]["values"], json!(["AMQPS", "AMQPS_WS"]));
        assert_eq!(v["params"][0]["default"], json!("AMQPS"));
    }

    #[test]
    fn test_device_protocol_parse() {
        assert_eq!(DeviceProtocol::parse("mqtt_ws").unwrap(), DeviceProtocol::MqttWs);
        assert!(DeviceProtocol::parse("CoAP").is_err());
    }
}
