//! Device-to-cloud telemetry streams.
//!
//! Reads one partition of the hub's event-hub-compatible endpoint and turns
//! each event into a row of [`TELEMETRY_COLUMNS`].

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::error::{InputError, LinkResult, SourceError};
use crate::time::StartPosition;

use super::controller::{RowSource, StreamingController};
use super::row::{Cell, Row, TELEMETRY_COLUMNS};
use super::sink::RowStream;

/// System property carrying the sending device's id.
pub const DEVICE_ID_PROPERTY: &str = "iothub-connection-device-id";

/// Partition read when the caller does not name one.
pub const DEFAULT_PARTITION: &str = "0";

/// One received event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub offset: String,
    pub sequence_number: i64,
    pub enqueued_time: DateTime<Utc>,
    pub device_id: Option<String>,
    pub payload: Vec<u8>,
    pub properties: BTreeMap<String, Json>,
}

impl Event {
    /// Reads the device id from event system properties.
    #[must_use]
    pub fn device_id_from(system_properties: &BTreeMap<String, Json>) -> Option<String> {
        system_properties.get(DEVICE_ID_PROPERTY).and_then(|v| match v {
            Json::Null => None,
            Json::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
    }

    /// Renders the event as a telemetry row.
    ///
    /// The payload is decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn to_row(&self) -> Row {
        let properties: Map<String, Json> = self.properties.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        Row::new(vec![
            Cell::from(self.offset.as_str()),
            Cell::Int(self.sequence_number),
            Cell::String(format_instant(self.enqueued_time)),
            Cell::from(self.device_id.clone()),
            Cell::String(String::from_utf8_lossy(&self.payload).into_owned()),
            Cell::Map(properties),
        ])
    }
}

/// ISO-8601 UTC with a `Z` suffix and only as many fraction digits as needed.
#[must_use]
pub fn format_instant(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Event source for one hub.
pub trait EventStreamSource: Send + Sync {
    /// Connects a receiver to `partition_id` starting at `start`.
    fn open(
        &self,
        target: &str,
        partition_id: &str,
        start: DateTime<Utc>,
    ) -> Result<Box<dyn EventReceiver>, SourceError>;
}

/// An open partition receiver.
pub trait EventReceiver: Send {
    /// Waits at most `wait` for up to `max_count` events.
    fn receive_batch(&mut self, max_count: usize, wait: Duration) -> Result<Vec<Event>, SourceError>;

    fn close(&mut self) -> Result<(), SourceError>;
}

/// Parameters of a `Read Messages` invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryRequest {
    /// Event-hub-compatible name.
    pub name: String,
    /// Event-hub-compatible endpoint.
    pub endpoint: String,
    pub partition_id: String,
    /// Optional; see [`StartPosition::parse`].
    pub start_time: Option<String>,
}

impl TelemetryRequest {
    /// Builds a request, defaulting the partition.
    ///
    /// # Errors
    ///
    /// Returns `InputError::MissingParameter` for an empty name or endpoint.
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        partition_id: Option<&str>,
        start_time: Option<&str>,
    ) -> LinkResult<Self> {
        let name = name.into();
        let endpoint = endpoint.into();
        if name.trim().is_empty() {
            return Err(InputError::MissingParameter {
                name: "EventHub Compatible Name".to_string(),
            }
            .into());
        }
        if endpoint.trim().is_empty() {
            return Err(InputError::MissingParameter {
                name: "EventHub Compatible Endpoint".to_string(),
            }
            .into());
        }
        let partition_id = partition_id
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PARTITION)
            .to_string();
        Ok(Self {
            name,
            endpoint,
            partition_id,
            start_time: start_time.map(str::to_string),
        })
    }

    /// Connection target: `<endpoint>;EntityPath=<name>`.
    #[must_use]
    pub fn connection_target(&self) -> String {
        format!("{};EntityPath={}", self.endpoint.trim_end_matches(';'), self.name)
    }

    #[must_use]
    pub fn start(&self) -> StartPosition {
        StartPosition::parse(self.start_time.as_deref())
    }
}

struct TelemetryRows {
    receiver: Box<dyn EventReceiver>,
}

impl RowSource for TelemetryRows {
    fn next_rows(&mut self, max: usize, wait: Duration) -> Result<Vec<Row>, SourceError> {
        Ok(self.receiver.receive_batch(max, wait)?.iter().map(Event::to_row).collect())
    }

    fn close(&mut self) -> Result<(), SourceError> {
        self.receiver.close()
    }
}

impl StreamingController {
    /// Starts a telemetry stream for one partition.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::SourceUnavailable` if the receiver cannot be opened.
    pub fn read_messages(&self, source: &dyn EventStreamSource, request: &TelemetryRequest) -> LinkResult<RowStream> {
        let target = request.connection_target();
        let start = request.start().resolve();
        self.start("telemetry", TELEMETRY_COLUMNS, || {
            source
                .open(&target, &request.partition_id, start)
                .map(|receiver| TelemetryRows { receiver })
        })
    }
}
