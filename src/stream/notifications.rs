//! File-upload notification streams.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LinkResult, SourceError};

use super::controller::{RowSource, StreamingController};
use super::row::{Cell, Row, NOTIFICATION_COLUMNS};
use super::sink::RowStream;
use super::telemetry::format_instant;

/// Transport used by the service client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ServiceProtocol {
    #[default]
    #[serde(rename = "AMQPS")]
    Amqps,
    #[serde(rename = "AMQPS_WS")]
    AmqpsWs,
}

impl ServiceProtocol {
    pub const ALL: [Self; 2] = [Self::Amqps, Self::AmqpsWs];

    /// Any name ending in `WS` selects the websocket transport.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        if name.trim().ends_with("WS") {
            Self::AmqpsWs
        } else {
            Self::Amqps
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Amqps => "AMQPS",
            Self::AmqpsWs => "AMQPS_WS",
        }
    }
}

impl fmt::Display for ServiceProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A completed file upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub enqueued_time: DateTime<Utc>,
    pub device_id: String,
    pub blob_uri: String,
    pub blob_name: String,
    pub last_updated_time: DateTime<Utc>,
    pub blob_size_bytes: i64,
}

impl Notification {
    /// Renders the notification as a row of [`NOTIFICATION_COLUMNS`].
    #[must_use]
    pub fn to_row(&self) -> Row {
        Row::new(vec![
            Cell::String(format_instant(self.enqueued_time)),
            Cell::from(self.device_id.as_str()),
            Cell::from(self.blob_uri.as_str()),
            Cell::from(self.blob_name.as_str()),
            Cell::String(format_instant(self.last_updated_time)),
            Cell::Int(self.blob_size_bytes),
        ])
    }
}

/// Notification source for one hub.
pub trait NotificationStreamSource: Send + Sync {
    /// Opens the service client and its notification receiver.
    fn open(
        &self,
        connection_string: &str,
        protocol: ServiceProtocol,
    ) -> Result<Box<dyn NotificationReceiver>, SourceError>;
}

/// An open notification receiver.
pub trait NotificationReceiver: Send {
    /// Waits at most `wait` for the next notification.
    fn receive_next(&mut self, wait: Duration) -> Result<Option<Notification>, SourceError>;

    /// Closes the receiver and its service client.
    fn close(&mut self) -> Result<(), SourceError>;
}

struct NotificationRows {
    receiver: Box<dyn NotificationReceiver>,
}

impl RowSource for NotificationRows {
    fn next_rows(&mut self, _max: usize, wait: Duration) -> Result<Vec<Row>, SourceError> {
        Ok(self.receiver.receive_next(wait)?.iter().map(Notification::to_row).collect())
    }

    fn close(&mut self) -> Result<(), SourceError> {
        self.receiver.close()
    }
}

impl StreamingController {
    /// Starts a file-upload notification stream.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::SourceUnavailable` if the receiver cannot be opened.
    pub fn file_upload_notifications(
        &self,
        source: &dyn NotificationStreamSource,
        connection_string: &str,
        protocol: ServiceProtocol,
    ) -> LinkResult<RowStream> {
        self.start("notifications", NOTIFICATION_COLUMNS, || {
            source
                .open(connection_string, protocol)
                .map(|receiver| NotificationRows { receiver })
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_protocol_parse() {
        assert_eq!(ServiceProtocol::parse("AMQPS"), ServiceProtocol::Amqps);
        assert_eq!(ServiceProtocol::parse("AMQPS_WS"), ServiceProtocol::AmqpsWs);
        assert_eq!(ServiceProtocol::parse("anything"), ServiceProtocol::Amqps);
        assert_eq!(ServiceProtocol::default().to_string(), "AMQPS");
    }

    #[test]
    fn test_notification_row() {
        let n = Notification {
            enqueued_time: Utc.with_ymd_and_hms(2023, 5, 1, 9, 0, 0).unwrap(),
            device_id: "cam-2".to_string(),
            blob_uri: "https://store.blob.core.windows.net/up/cam-2/img.jpg".to_string(),
            blob_name: "cam-2/img.jpg".to_string(),
            last_updated_time: Utc.with_ymd_and_hms(2023, 5, 1, 8, 59, 58).unwrap(),
            blob_size_bytes: 52_133,
        };
        let row = n.to_row();
        assert!(row.conforms(NOTIFICATION_COLUMNS));
        assert_eq!(row.get(0).and_then(Cell::as_str), Some("2023-05-01T09:00:00Z"));
        assert_eq!(row.get(4).and_then(Cell::as_str), Some("2023-05-01T08:59:58Z"));
        assert_eq!(row.get(5).and_then(Cell::as_int), Some(52_133));
    }
}
