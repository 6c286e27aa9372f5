//! Scripted in-memory sources.
//!
//! These implement the source traits from a fixed script of batches and
//! failures. They are intended for tests, demos, and as a reference for
//! real adapters.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::SourceError;

use super::notifications::{Notification, NotificationReceiver, NotificationStreamSource, ServiceProtocol};
use super::telemetry::{Event, EventReceiver, EventStreamSource};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Step<T> {
    /// Units delivered in order; an empty batch is a poll that found nothing.
    Batch(Vec<T>),
    /// A receive failure.
    Fail(String),
}

/// Open/close counters shared by a source and its receivers.
#[derive(Debug, Clone, Default)]
pub struct SourceStats {
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    receives: Arc<AtomicUsize>,
}

impl SourceStats {
    #[must_use]
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Receive calls made, including empty polls.
    #[must_use]
    pub fn receives(&self) -> usize {
        self.receives.load(Ordering::SeqCst)
    }
}

/// Arguments of a recorded `open` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenCall {
    pub target: String,
    pub partition_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub protocol: Option<ServiceProtocol>,
}

/// A source that replays a script to the first receiver it opens.
#[derive(Debug)]
pub struct ScriptedSource<T> {
    script: Mutex<VecDeque<Step<T>>>,
    open_error: Option<String>,
    close_error: Option<String>,
    stats: SourceStats,
    calls: Mutex<Vec<OpenCall>>,
}

/// Scripted telemetry source.
pub type ScriptedEventSource = ScriptedSource<Event>;

/// Scripted upload-notification source.
pub type ScriptedNotificationSource = ScriptedSource<Notification>;

impl<T> ScriptedSource<T> {
    #[must_use]
    pub fn new(steps: impl IntoIterator<Item = Step<T>>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            open_error: None,
            close_error: None,
            stats: SourceStats::default(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Builds a source from batches only.
    #[must_use]
    pub fn from_batches(batches: impl IntoIterator<Item = Vec<T>>) -> Self {
        Self::new(batches.into_iter().map(Step::Batch))
    }

    /// Every `open` fails with `message`.
    #[must_use]
    pub fn failing_open(mut self, message: impl Into<String>) -> Self {
        self.open_error = Some(message.into());
        self
    }

    /// Every `close` fails with `message` (after being counted).
    #[must_use]
    pub fn failing_close(mut self, message: impl Into<String>) -> Self {
        self.close_error = Some(message.into());
        self
    }

    #[must_use]
    pub fn stats(&self) -> SourceStats {
        self.stats.clone()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<OpenCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn open_receiver(&self, call: OpenCall) -> Result<ScriptedReceiver<T>, SourceError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        if let Some(message) = &self.open_error {
            return Err(SourceError::unavailable(message.clone()));
        }
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().map(|mut s| std::mem::take(&mut *s)).unwrap_or_default();
        Ok(ScriptedReceiver {
            script,
            close_error: self.close_error.clone(),
            stats: self.stats.clone(),
        })
    }
}

/// Receiver end of a [`ScriptedSource`].
#[derive(Debug)]
pub struct ScriptedReceiver<T> {
    script: VecDeque<Step<T>>,
    close_error: Option<String>,
    stats: SourceStats,
}

impl<T> ScriptedReceiver<T> {
    // Once the script runs out the receiver idles for the full wait, like a
    // quiet partition.
    fn next_batch(&mut self, max: usize, wait: Duration) -> Result<Vec<T>, SourceError> {
        self.stats.receives.fetch_add(1, Ordering::SeqCst);
        match self.script.pop_front() {
            Some(Step::Batch(mut units)) => {
                if units.len() > max {
                    let rest = units.split_off(max);
                    self.script.push_front(Step::Batch(rest));
                }
                Ok(units)
            }
            Some(Step::Fail(message)) => Err(SourceError::receive(message)),
            None => {
                thread::sleep(wait);
                Ok(Vec::new())
            }
        }
    }

    fn close_inner(&mut self) -> Result<(), SourceError> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        match &self.close_error {
            Some(message) => Err(SourceError::close(message.clone())),
            None => Ok(()),
        }
    }
}

impl EventStreamSource for ScriptedSource<Event> {
    fn open(
        &self,
        target: &str,
        partition_id: &str,
        start: DateTime<Utc>,
    ) -> Result<Box<dyn EventReceiver>, SourceError> {
        let receiver = self.open_receiver(OpenCall {
            target: target.to_string(),
            partition_id: Some(partition_id.to_string()),
            start: Some(start),
            protocol: None,
        })?;
        Ok(Box::new(receiver))
    }
}

impl EventReceiver for ScriptedReceiver<Event> {
    fn receive_batch(&mut self, max_count: usize, wait: Duration) -> Result<Vec<Event>, SourceError> {
        self.next_batch(max_count, wait)
    }

    fn close(&mut self) -> Result<(), SourceError> {
        self.close_inner()
    }
}

impl NotificationStreamSource for ScriptedSource<Notification> {
    fn open(
        &self,
        connection_string: &str,
        protocol: ServiceProtocol,
    ) -> Result<Box<dyn NotificationReceiver>, SourceError> {
        let receiver = self.open_receiver(OpenCall {
            target: connection_string.to_string(),
            partition_id: None,
            start: None,
            protocol: Some(protocol),
        })?;
        Ok(Box::new(receiver))
    }
}

impl NotificationReceiver for ScriptedReceiver<Notification> {
    fn receive_next(&mut self, wait: Duration) -> Result<Option<Notification>, SourceError> {
        Ok(self.next_batch(1, wait)?.into_iter().next())
    }

    fn close(&mut self) -> Result<(), SourceError> {
        self.close_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversized_batch_is_split_by_max() {
        let source = ScriptedSource::from_batches(vec![vec![1, 2, 3, 4, 5]]);
        let mut rx = source.open_receiver(OpenCall {
            target: "t".to_string(),
            partition_id: None,
            start: None,
            protocol: None,
        })
        .unwrap();
        assert_eq!(rx.next_batch(2, Duration::ZERO).unwrap(), vec![1, 2]);
        assert_eq!(rx.next_batch(2, Duration::ZERO).unwrap(), vec![3, 4]);
        assert_eq!(rx.next_batch(2, Duration::ZERO).unwrap(), vec![5]);
        assert!(rx.next_batch(2, Duration::ZERO).unwrap().is_empty());
        assert_eq!(source.stats().receives(), 4);
    }

    #[test]
    fn test_failing_open_counts_call_not_open() {
        let source = ScriptedSource::<i32>::new(Vec::new()).failing_open("denied");
        let err = source
            .open_receiver(OpenCall {
                target: "t".to_string(),
                partition_id: None,
                start: None,
                protocol: None,
            })
            .unwrap_err();
        assert!(err.message().contains("denied"));
        assert_eq!(source.stats().opens(), 0);
        assert_eq!(source.calls().len(), 1);
    }
}
