//! The two ends of a streaming invocation.
//!
//! [`RowSink`] is held by the background task and pushes rows; [`RowStream`]
//! is handed to the caller. They share the invocation state, the cancellation
//! signal, the terminal failure slot and the close hook.
//!
//! Key invariants:
//! - Rows arrive in push order.
//! - The close hook runs exactly once, after the source is released and
//!   before the caller observes the end of the stream.
//! - A terminal failure is reported once, to whichever of `recv` / `join`
//!   reaches the end first.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LinkError, LinkResult, StreamError};

use super::row::{Row, Schema};

/// Unique identifier for a streaming invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationId(Uuid);

impl InvocationId {
    /// Create a new random invocation id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a streaming invocation.
///
/// `Created → Opening → {Failed | Streaming}`, then
/// `Streaming → {ClosedClean | ClosedError}`. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InvocationState {
    Created = 0,
    Opening = 1,
    Failed = 2,
    Streaming = 3,
    ClosedClean = 4,
    ClosedError = 5,
}

impl InvocationState {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Opening,
            2 => Self::Failed,
            3 => Self::Streaming,
            4 => Self::ClosedClean,
            _ => Self::ClosedError,
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::ClosedClean | Self::ClosedError)
    }
}

/// How a stream ended, as seen by close hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Cancelled by the caller, or the caller went away.
    Clean,
    /// The source failed mid-stream.
    Error,
}

type CloseHook = Box<dyn FnOnce(Termination) + Send>;

enum HookSlot {
    Empty,
    Registered(CloseHook),
    Fired(Termination),
}

pub(crate) struct Shared {
    id: InvocationId,
    state: AtomicU8,
    cancelled: AtomicBool,
    cancel_tx: Mutex<Option<Sender<()>>>,
    failure: Mutex<Option<LinkError>>,
    hook: Mutex<HookSlot>,
}

impl Shared {
    pub(crate) const fn id(&self) -> InvocationId {
        self.id
    }

    pub(crate) fn state(&self) -> InvocationState {
        InvocationState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn advance(&self, from: InvocationState, to: InvocationState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Idempotent. Wakes a producer blocked on a full sink.
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Ok(mut tx) = self.cancel_tx.lock() {
            drop(tx.take());
        }
    }

    fn on_close(&self, hook: CloseHook) -> LinkResult<()> {
        let mut slot = self
            .hook
            .lock()
            .map_err(|_| LinkError::internal("poisoned lock: close hook"))?;
        match std::mem::replace(&mut *slot, HookSlot::Empty) {
            HookSlot::Empty => {
                *slot = HookSlot::Registered(hook);
                Ok(())
            }
            HookSlot::Registered(existing) => {
                *slot = HookSlot::Registered(existing);
                Err(StreamError::CloseHookRegistered.into())
            }
            HookSlot::Fired(how) => {
                *slot = HookSlot::Fired(how);
                drop(slot);
                hook(how);
                Ok(())
            }
        }
    }

    fn fire_hook(&self, how: Termination) {
        let hook = match self.hook.lock() {
            Ok(mut slot) => match std::mem::replace(&mut *slot, HookSlot::Fired(how)) {
                HookSlot::Registered(hook) => Some(hook),
                HookSlot::Empty | HookSlot::Fired(_) => None,
            },
            Err(_) => None,
        };
        if let Some(hook) = hook {
            hook(how);
        }
    }

    fn take_failure(&self) -> Option<LinkError> {
        self.failure.lock().ok().and_then(|mut f| f.take())
    }
}

/// Creates a connected sink/stream pair in the `Created` state.
pub(crate) fn channel(schema: Schema, capacity: usize) -> (RowSink, RowStream) {
    let (rows_tx, rows_rx) = bounded::<Row>(capacity.max(1));
    let (cancel_tx, cancel_rx) = bounded::<()>(1);
    let (done_tx, done_rx) = bounded::<()>(1);

    let shared = Arc::new(Shared {
        id: InvocationId::new(),
        state: AtomicU8::new(InvocationState::Created as u8),
        cancelled: AtomicBool::new(false),
        cancel_tx: Mutex::new(Some(cancel_tx)),
        failure: Mutex::new(None),
        hook: Mutex::new(HookSlot::Empty),
    });

    let sink = RowSink {
        shared: Arc::clone(&shared),
        rows: Some(rows_tx),
        cancel_rx,
        done: Some(done_tx),
        finished: false,
    };
    let stream = RowStream {
        shared,
        schema,
        rows: rows_rx,
        done: done_rx,
    };
    (sink, stream)
}

fn sink_closed() -> LinkError {
    StreamError::Disconnected {
        path: "row_sink".to_string(),
    }
    .into()
}

/// Producer end of a stream.
pub struct RowSink {
    shared: Arc<Shared>,
    rows: Option<Sender<Row>>,
    cancel_rx: Receiver<()>,
    done: Option<Sender<()>>,
    finished: bool,
}

impl fmt::Debug for RowSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowSink")
            .field("id", &self.shared.id)
            .field("state", &self.shared.state())
            .finish_non_exhaustive()
    }
}

impl RowSink {
    #[must_use]
    pub fn id(&self) -> InvocationId {
        self.shared.id()
    }

    /// False once the caller cancels or drops the stream.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.finished && !self.shared.is_cancelled()
    }

    /// Delivers one row, waiting while the caller's buffer is full.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::Disconnected` if the stream was cancelled or the
    /// caller went away, before or while waiting.
    pub fn push(&self, row: Row) -> LinkResult<()> {
        if !self.is_open() {
            return Err(sink_closed());
        }
        let Some(rows) = &self.rows else {
            return Err(sink_closed());
        };
        select! {
            send(rows, row) -> res => res.map_err(|_| sink_closed()),
            recv(self.cancel_rx) -> _ => Err(sink_closed()),
        }
    }

    /// Registers the hook run when the stream terminates.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::CloseHookRegistered` if a hook is already set.
    pub fn on_close(&self, hook: impl FnOnce(Termination) + Send + 'static) -> LinkResult<()> {
        self.shared.on_close(Box::new(hook))
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Ends the stream with `outcome`.
    ///
    /// Only a `Streaming` invocation records an outcome and fires the hook;
    /// any other state just disconnects.
    pub(crate) fn finish(mut self, outcome: LinkResult<()>) {
        self.finish_inner(outcome);
    }

    fn finish_inner(&mut self, outcome: LinkResult<()>) {
        if self.finished {
            return;
        }
        self.finished = true;

        let how = if outcome.is_ok() { Termination::Clean } else { Termination::Error };
        let to = match how {
            Termination::Clean => InvocationState::ClosedClean,
            Termination::Error => InvocationState::ClosedError,
        };

        if self.shared.advance(InvocationState::Streaming, to) {
            if let Err(e) = outcome {
                if let Ok(mut slot) = self.shared.failure.lock() {
                    *slot = Some(e);
                }
            }
            self.shared.fire_hook(how);
        }

        drop(self.rows.take());
        drop(self.done.take());
    }
}

impl Drop for RowSink {
    fn drop(&mut self) {
        if !self.finished {
            self.finish_inner(Err(LinkError::internal("stream task ended without a result")));
        }
    }
}

/// Caller end of a stream.
///
/// Dropping the stream cancels the invocation.
pub struct RowStream {
    shared: Arc<Shared>,
    schema: Schema,
    rows: Receiver<Row>,
    done: Receiver<()>,
}

impl fmt::Debug for RowStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowStream")
            .field("id", &self.shared.id)
            .field("state", &self.shared.state())
            .field("buffered", &self.rows.len())
            .finish_non_exhaustive()
    }
}

impl RowStream {
    #[must_use]
    pub fn id(&self) -> InvocationId {
        self.shared.id()
    }

    /// Column metadata, available before any row is produced.
    #[must_use]
    pub const fn columns(&self) -> Schema {
        self.schema
    }

    #[must_use]
    pub fn state(&self) -> InvocationState {
        self.shared.state()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.shared.is_cancelled() && !self.shared.state().is_terminal()
    }

    /// Asks the producer to stop. Non-blocking and idempotent.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Registers the hook run when the stream terminates.
    ///
    /// A hook registered after termination runs immediately.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::CloseHookRegistered` if a hook is already set.
    pub fn on_close(&self, hook: impl FnOnce(Termination) + Send + 'static) -> LinkResult<()> {
        self.shared.on_close(Box::new(hook))
    }

    /// Receives the next row (blocking).
    ///
    /// Returns `Ok(None)` once the stream has ended cleanly.
    ///
    /// # Errors
    ///
    /// Returns the stream's terminal failure.
    pub fn recv(&self) -> LinkResult<Option<Row>> {
        match self.rows.recv() {
            Ok(row) => Ok(Some(row)),
            Err(_) => self.end(),
        }
    }

    /// Receives the next row, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::Timeout` if no row arrived in time, or the
    /// stream's terminal failure.
    pub fn recv_timeout(&self, timeout: Duration) -> LinkResult<Option<Row>> {
        match self.rows.recv_timeout(timeout) {
            Ok(row) => Ok(Some(row)),
            Err(RecvTimeoutError::Timeout) => Err(StreamError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }
            .into()),
            Err(RecvTimeoutError::Disconnected) => self.end(),
        }
    }

    /// Receives rows until the stream ends.
    ///
    /// # Errors
    ///
    /// Returns the stream's terminal failure; rows received before it are lost.
    pub fn collect_rows(&self) -> LinkResult<Vec<Row>> {
        let mut out = Vec::new();
        while let Some(row) = self.recv()? {
            out.push(row);
        }
        Ok(out)
    }

    /// Waits for the background task to finish.
    ///
    /// Blocks until the stream ends; cancel first to stop it.
    ///
    /// # Errors
    ///
    /// Returns the terminal failure if `recv` has not already reported it.
    pub fn join(&self) -> LinkResult<()> {
        let _ = self.done.recv();
        self.take_failure()
    }

    /// Like [`join`](Self::join), waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::Timeout` if the task is still running.
    pub fn join_timeout(&self, timeout: Duration) -> LinkResult<()> {
        match self.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => Err(StreamError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }
            .into()),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => self.take_failure(),
        }
    }

    fn end(&self) -> LinkResult<Option<Row>> {
        self.take_failure().map(|()| None)
    }

    fn take_failure(&self) -> LinkResult<()> {
        match self.shared.take_failure() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for RowStream {
    fn drop(&mut self) {
        self.shared.cancel();
    }
}
