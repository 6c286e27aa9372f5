//! Streaming invocation controller.
//!
//! Opens a source synchronously, hands the caller a [`RowStream`], and runs
//! one background thread per invocation that polls the source and pushes
//! rows until the caller cancels or the source fails. The source is closed
//! exactly once however the invocation ends.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{LinkError, LinkResult, SourceError, StreamError};

use super::row::{Row, Schema};
use super::sink::{self, InvocationId, InvocationState, RowSink, RowStream, Shared};

/// Streaming configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Max units requested from a source per poll.
    pub batch_size: usize,
    /// Bounded wait for one source poll, in milliseconds.
    pub poll_interval_ms: u64,
    /// Rows buffered for the caller before the producer waits.
    pub row_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval_ms: 50,
            row_buffer: 256,
        }
    }
}

impl StreamConfig {
    /// Source poll wait, never shorter than one millisecond.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        let ms = if self.poll_interval_ms == 0 { 1 } else { self.poll_interval_ms };
        Duration::from_millis(ms)
    }
}

/// An opened source, seen as a sequence of row batches.
pub trait RowSource: Send + 'static {
    /// Waits at most `wait` for up to `max` rows. An empty batch is not an error.
    fn next_rows(&mut self, max: usize, wait: Duration) -> Result<Vec<Row>, SourceError>;

    /// Releases the connection.
    fn close(&mut self) -> Result<(), SourceError>;
}

// Owns the source for the task's lifetime and closes it exactly once,
// including when the task unwinds.
struct SourceGuard<S: RowSource> {
    source: S,
    closed: bool,
    invocation: InvocationId,
    label: &'static str,
}

impl<S: RowSource> SourceGuard<S> {
    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.source.close() {
            warn!(invocation = %self.invocation, stream = self.label, error = %e, "failed to close source");
        }
    }
}

impl<S: RowSource> Drop for SourceGuard<S> {
    fn drop(&mut self) {
        self.release();
    }
}

struct Invocation {
    shared: Arc<Shared>,
    join: JoinHandle<()>,
}

/// Runs streaming invocations and keeps a joinable handle for each.
///
/// Dropping the controller cancels every running invocation and waits for
/// its thread.
pub struct StreamingController {
    cfg: StreamConfig,
    invocations: Mutex<HashMap<InvocationId, Invocation>>,
}

impl std::fmt::Debug for StreamingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingController")
            .field("cfg", &self.cfg)
            .field("active", &self.active())
            .finish()
    }
}

impl Default for StreamingController {
    fn default() -> Self {
        Self::new(StreamConfig::default())
    }
}

impl StreamingController {
    #[must_use]
    pub fn new(cfg: StreamConfig) -> Self {
        Self {
            cfg,
            invocations: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &StreamConfig {
        &self.cfg
    }

    /// Opens a source and starts streaming its rows.
    ///
    /// `open` runs on the caller's thread. The returned stream already knows
    /// its columns; rows follow from the background thread.
    ///
    /// # Errors
    ///
    /// - `StreamError::SourceUnavailable` if `open` fails; no thread is started
    /// - `LinkError::Internal` if the thread cannot be spawned
    pub fn start<S, F>(&self, label: &'static str, schema: Schema, open: F) -> LinkResult<RowStream>
    where
        S: RowSource,
        F: FnOnce() -> Result<S, SourceError>,
    {
        let (sink, stream) = sink::channel(schema, self.cfg.row_buffer);
        let shared = Arc::clone(sink.shared());
        let id = shared.id();
        shared.advance(InvocationState::Created, InvocationState::Opening);

        let source = match open() {
            Ok(source) => source,
            Err(e) => {
                shared.advance(InvocationState::Opening, InvocationState::Failed);
                warn!(invocation = %id, stream = label, error = %e, "failed to create receiver");
                return Err(StreamError::SourceUnavailable {
                    message: e.message().to_string(),
                }
                .into());
            }
        };

        shared.advance(InvocationState::Opening, InvocationState::Streaming);
        let guard = SourceGuard {
            source,
            closed: false,
            invocation: id,
            label,
        };
        let cfg = self.cfg.clone();
        let join = thread::Builder::new()
            .name(format!("iothub-{label}"))
            .spawn(move || run_invocation(guard, sink, &cfg))
            .map_err(|e| LinkError::internal(format!("failed to spawn stream task: {e}")))?;

        debug!(invocation = %id, stream = label, "stream started");
        let mut invocations = self
            .invocations
            .lock()
            .map_err(|_| LinkError::internal("poisoned lock: invocations"))?;
        invocations.retain(|_, inv| !inv.join.is_finished());
        invocations.insert(id, Invocation { shared, join });
        Ok(stream)
    }

    /// Number of invocations whose thread is still running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.invocations
            .lock()
            .map(|invs| invs.values().filter(|inv| !inv.join.is_finished()).count())
            .unwrap_or(0)
    }

    /// Cancels one invocation. Returns false if it is unknown or finished.
    pub fn cancel(&self, id: InvocationId) -> bool {
        let Ok(invs) = self.invocations.lock() else {
            return false;
        };
        match invs.get(&id) {
            Some(inv) if !inv.join.is_finished() => {
                inv.shared.cancel();
                true
            }
            _ => false,
        }
    }

    /// Cancels every invocation and waits for all threads to exit.
    pub fn shutdown(&self) {
        let drained: Vec<Invocation> = match self.invocations.lock() {
            Ok(mut invs) => invs.drain().map(|(_, inv)| inv).collect(),
            Err(_) => return,
        };
        for inv in &drained {
            inv.shared.cancel();
        }
        for inv in drained {
            if inv.join.join().is_err() {
                warn!(invocation = %inv.shared.id(), "stream task panicked");
            }
        }
    }
}

impl Drop for StreamingController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_invocation<S: RowSource>(mut guard: SourceGuard<S>, sink: RowSink, cfg: &StreamConfig) {
    let outcome = pump(&mut guard.source, &sink, cfg);
    guard.release();
    match &outcome {
        Ok(()) => debug!(invocation = %sink.id(), stream = guard.label, "stream closed"),
        Err(e) => debug!(invocation = %sink.id(), stream = guard.label, error = %e, "stream closed with error"),
    }
    sink.finish(outcome);
}

fn pump<S: RowSource>(source: &mut S, sink: &RowSink, cfg: &StreamConfig) -> LinkResult<()> {
    let batch = cfg.batch_size.max(1);
    let wait = cfg.poll_interval();

    while sink.is_open() {
        let rows = source.next_rows(batch, wait).map_err(|e| {
            warn!(invocation = %sink.id(), error = %e, "failed to receive");
            LinkError::from(StreamError::StreamFailure {
                message: e.message().to_string(),
            })
        })?;
        for row in rows {
            // A refused push means the caller is gone.
            if sink.push(row).is_err() {
                return Ok(());
            }
        }
    }
    Ok(())
}
