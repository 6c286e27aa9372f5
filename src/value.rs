//! Leaf values a twin property can hold.
//!
//! A leaf renders itself as a plain JSON scalar or list. Maps are not leaves;
//! they live in the twin document as nested trees (see [`crate::twin`]).

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::InputError;

/// The value types offered by the twin `Add` action.
///
/// # Examples
///
/// ```
/// use iothub_link::ValueKind;
///
/// assert_eq!(ValueKind::parse("Number"), Some(ValueKind::Number));
/// assert_eq!(ValueKind::parse("Map"), Some(ValueKind::Map));
/// assert_eq!(ValueKind::parse("Quaternion"), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    String,
    Number,
    Bool,
    List,
    Map,
}

impl ValueKind {
    /// All kinds, in the order the `Add` action lists them.
    pub const ALL: [Self; 5] = [Self::String, Self::Number, Self::Bool, Self::List, Self::Map];

    /// Parses a kind by its leading letter, so `"Str"` and `"String"` agree.
    ///
    /// Returns `None` for an empty or unrecognised name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().chars().next()? {
            'S' => Some(Self::String),
            'N' => Some(Self::Number),
            'B' => Some(Self::Bool),
            'L' => Some(Self::List),
            'M' => Some(Self::Map),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::String => "String",
            Self::Number => "Number",
            Self::Bool => "Bool",
            Self::List => "List",
            Self::Map => "Map",
        }
    }

    /// Infers the kind of a raw JSON value. `null` has no kind.
    #[must_use]
    pub const fn of_json(raw: &Json) -> Option<Self> {
        match raw {
            Json::Null => None,
            Json::Bool(_) => Some(Self::Bool),
            Json::Number(_) => Some(Self::Number),
            Json::String(_) => Some(Self::String),
            Json::Array(_) => Some(Self::List),
            Json::Object(_) => Some(Self::Map),
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A scalar list element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(f64),
    String(String),
}

impl Scalar {
    fn from_json(raw: &Json) -> Option<Self> {
        match raw {
            Json::Bool(v) => Some(Self::Bool(*v)),
            Json::Number(n) => n.as_f64().map(Self::Number),
            Json::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }

    fn to_json(&self) -> Json {
        match self {
            Self::Bool(v) => Json::Bool(*v),
            Self::Number(v) => number_json(*v),
            Self::String(v) => Json::String(v.clone()),
        }
    }
}

/// A named leaf's value.
///
/// # Examples
///
/// ```
/// use iothub_link::{PropertyValue, ValueKind};
///
/// let v = PropertyValue::default_for(ValueKind::Number).unwrap();
/// assert_eq!(v.to_json(), serde_json::json!(0.0));
/// assert!(PropertyValue::default_for(ValueKind::Map).is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    String(String),
    Number(f64),
    Bool(bool),
    List(Vec<Scalar>),
}

impl PropertyValue {
    /// The empty value for a leaf kind; `None` for `Map`.
    #[must_use]
    pub fn default_for(kind: ValueKind) -> Option<Self> {
        match kind {
            ValueKind::String => Some(Self::String(String::new())),
            ValueKind::Number => Some(Self::Number(0.0)),
            ValueKind::Bool => Some(Self::Bool(false)),
            ValueKind::List => Some(Self::List(Vec::new())),
            ValueKind::Map => None,
        }
    }

    /// Builds a leaf of `kind` from a raw JSON value.
    ///
    /// Numbers and bools are also accepted in their string form, since
    /// action parameters usually arrive as text.
    ///
    /// # Errors
    ///
    /// Returns `InputError::MalformedInput` if `raw` cannot represent `kind`,
    /// or if `kind` is `Map`.
    pub fn from_json(kind: ValueKind, raw: &Json) -> Result<Self, InputError> {
        let malformed = || InputError::MalformedInput {
            field: kind.name().to_string(),
            reason: format!("cannot hold {raw}"),
        };

        match (kind, raw) {
            (ValueKind::String, Json::String(s)) => Ok(Self::String(s.clone())),
            (ValueKind::String, Json::Number(n)) => Ok(Self::String(n.to_string())),
            (ValueKind::String, Json::Bool(b)) => Ok(Self::String(b.to_string())),
            (ValueKind::Number, Json::Number(n)) => n.as_f64().map(Self::Number).ok_or_else(malformed),
            (ValueKind::Number, Json::String(s)) => s.trim().parse::<f64>().map(Self::Number).map_err(|_| malformed()),
            (ValueKind::Bool, Json::Bool(b)) => Ok(Self::Bool(*b)),
            (ValueKind::Bool, Json::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Self::Bool(true)),
                "false" => Ok(Self::Bool(false)),
                _ => Err(malformed()),
            },
            (ValueKind::List, Json::Array(items)) => items
                .iter()
                .map(|item| Scalar::from_json(item).ok_or_else(malformed))
                .collect::<Result<Vec<_>, _>>()
                .map(Self::List),
            _ => Err(malformed()),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::String(_) => ValueKind::String,
            Self::Number(_) => ValueKind::Number,
            Self::Bool(_) => ValueKind::Bool,
            Self::List(_) => ValueKind::List,
        }
    }

    /// Renders the leaf as a plain JSON value.
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Self::String(v) => Json::String(v.clone()),
            Self::Number(v) => number_json(*v),
            Self::Bool(v) => Json::Bool(*v),
            Self::List(items) => Json::Array(items.iter().map(Scalar::to_json).collect()),
        }
    }
}

// Non-finite doubles have no JSON form.
fn number_json(v: f64) -> Json {
    serde_json::Number::from_f64(v).map_or(Json::Null, Json::Number)
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}
