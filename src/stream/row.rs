//! Columnar row format for streamed results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

/// Value type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    String,
    Number,
    Map,
}

/// Column metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Column {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: ColumnType,
}

impl Column {
    #[must_use]
    pub const fn new(name: &'static str, kind: ColumnType) -> Self {
        Self { name, kind }
    }
}

/// Ordered column list shared by every row of a stream.
pub type Schema = &'static [Column];

/// One cell of a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    String(String),
    Int(i64),
    Map(Map<String, Json>),
}

impl Cell {
    /// Returns true if the cell may appear in a column of `kind`.
    ///
    /// Any column is nullable.
    #[must_use]
    pub const fn fits(&self, kind: ColumnType) -> bool {
        matches!(
            (self, kind),
            (Self::Null, _)
                | (Self::String(_), ColumnType::String)
                | (Self::Int(_), ColumnType::Number)
                | (Self::Map(_), ColumnType::Map)
        )
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_map(&self) -> Option<&Map<String, Json>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Option<String>> for Cell {
    fn from(v: Option<String>) -> Self {
        v.map_or(Self::Null, Self::String)
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

/// A fixed-arity tuple of cells. Rows are immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Vec<Cell>);

impl Row {
    #[must_use]
    pub fn new(cells: Vec<Cell>) -> Self {
        Self(cells)
    }

    #[must_use]
    pub fn cells(&self) -> &[Cell] {
        &self.0
    }

    #[must_use]
    pub fn get(&self, col: usize) -> Option<&Cell> {
        self.0.get(col)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if the row has the schema's arity and cell types.
    #[must_use]
    pub fn conforms(&self, schema: Schema) -> bool {
        self.0.len() == schema.len() && self.0.iter().zip(schema).all(|(cell, col)| cell.fits(col.kind))
    }

    /// Renders the row as a JSON array.
    #[must_use]
    pub fn to_json(&self) -> Json {
        serde_json::to_value(&self.0).unwrap_or(Json::Null)
    }
}

/// Columns of the telemetry (`Read Messages`) stream.
pub const TELEMETRY_COLUMNS: Schema = &[
    Column::new("Offset", ColumnType::String),
    Column::new("Sequence Number", ColumnType::Number),
    Column::new("Enqueued Time", ColumnType::String),
    Column::new("Device ID", ColumnType::String),
    Column::new("Message Payload", ColumnType::String),
    Column::new("Properties", ColumnType::Map),
];

/// Columns of the file-upload notification stream.
pub const NOTIFICATION_COLUMNS: Schema = &[
    Column::new("Enqueued Time", ColumnType::String),
    Column::new("Device ID", ColumnType::String),
    Column::new("Blob URI", ColumnType::String),
    Column::new("Blob Name", ColumnType::String),
    Column::new("Last Updated", ColumnType::String),
    Column::new("Blob Size(Bytes)", ColumnType::Number),
];
