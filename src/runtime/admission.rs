//! Ready-queue admission shared with background threads.
//!
//! The ready queue and the per-task park slots live behind one mutex. The
//! scheduler thread admits and parks tasks through it, and it is the only
//! scheduler state a background thread can reach: a [`Completer`] re-admits
//! its task here after checking that the completion is still current.
//!
//! The log sink lives here for the same reason: stale completions are
//! reported from whichever thread delivered them.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{TaskId, WorkHandle};

/// Receiver for warning and error diagnostics.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Why a task is off the ready queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Park {
    /// Waiting for some party to admit it explicitly.
    Callback,
    /// Waiting for the background work identified by the handle.
    Work(WorkHandle),
    /// Waiting for a sleep timer.
    Sleep,
    /// Registered as a waiter on an event or another task.
    Waiter,
}

impl Park {
    const fn is_foreign(self) -> bool {
        matches!(self, Self::Callback | Self::Work(_))
    }
}

#[derive(Debug, Clone, Copy)]
struct Parked {
    epoch: u64,
    park: Park,
}

#[derive(Debug, Default)]
struct AdmissionState {
    ready: VecDeque<TaskId>,
    parked: HashMap<TaskId, Parked>,
    next_epoch: u64,
}

/// Diagnostic severity forwarded to the log sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Severity {
    Warn,
    Error,
}

/// Mutex-guarded admission state.
pub(crate) struct Admission {
    state: Mutex<AdmissionState>,
    sink: RwLock<Option<LogSink>>,
    next_handle: AtomicU64,
}

impl fmt::Debug for Admission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Admission")
            .field("ready", &state.ready.len())
            .field("parked", &state.parked.len())
            .field("has_sink", &self.sink.read().is_some())
            .finish()
    }
}

impl Admission {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(AdmissionState::default()),
            sink: RwLock::new(None),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Puts `task` at the back of the ready queue, clearing any park slot.
    pub(crate) fn schedule_now(&self, task: TaskId) {
        let mut state = self.state.lock();
        state.parked.remove(&task);
        state.ready.push_back(task);
        tracing::trace!(task_id = ?task, ready = state.ready.len(), "admitted");
    }

    /// Clears the park slot of `task` if it was parked under `epoch`.
    ///
    /// Used by sleep timers: a task woken early by something else has moved
    /// on to a newer epoch, and the old timer must not resume it again.
    pub(crate) fn unpark_at(&self, task: TaskId, epoch: u64) -> bool {
        let mut state = self.state.lock();
        match state.parked.get(&task).copied() {
            Some(parked) if parked.epoch == epoch => {
                state.parked.remove(&task);
                true
            }
            _ => false,
        }
    }

    /// Admits `task` if it is parked for any reason.
    pub(crate) fn schedule_if_parked(&self, task: TaskId) -> bool {
        let mut state = self.state.lock();
        if state.parked.remove(&task).is_none() {
            return false;
        }
        state.ready.push_back(task);
        true
    }

    pub(crate) fn pop_ready(&self) -> Option<TaskId> {
        self.state.lock().ready.pop_front()
    }

    pub(crate) fn ready_len(&self) -> usize {
        self.state.lock().ready.len()
    }

    /// Records why `task` is suspended and returns the park epoch.
    ///
    /// A foreign park on top of a pending foreign park is a protocol
    /// violation: the task was resumed without its completion arriving.
    pub(crate) fn park(&self, task: TaskId, park: Park) -> Result<u64> {
        let mut state = self.state.lock();
        if park.is_foreign() {
            if let Some(existing) = state.parked.get(&task) {
                if existing.park.is_foreign() {
                    return Err(Error::protocol_violation(format!(
                        "{task} suspended on a foreign completion while {:?} is pending",
                        existing.park
                    ))
                    .with_task(task));
                }
            }
        }
        let epoch = state.next_epoch;
        state.next_epoch += 1;
        state.parked.insert(task, Parked { epoch, park });
        tracing::trace!(task_id = ?task, ?park, epoch, "parked");
        Ok(epoch)
    }

    #[cfg(test)]
    pub(crate) fn is_parked(&self, task: TaskId) -> bool {
        self.state.lock().parked.contains_key(&task)
    }

    /// Drops any park slot for a closed task.
    pub(crate) fn forget(&self, task: TaskId) {
        self.state.lock().parked.remove(&task);
    }

    pub(crate) fn next_work_handle(&self) -> WorkHandle {
        WorkHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Delivers a background completion.
    ///
    /// Applied only if `task` is still parked on exactly `handle`; anything
    /// else is reported as stale and discarded.
    pub(crate) fn complete(&self, task: TaskId, handle: WorkHandle) -> bool {
        let stale = {
            let mut state = self.state.lock();
            match state.parked.get(&task).copied() {
                Some(Parked {
                    park: Park::Work(pending),
                    ..
                }) if pending == handle => {
                    state.parked.remove(&task);
                    state.ready.push_back(task);
                    None
                }
                Some(Parked { park, .. }) => Some(format!("{park:?}")),
                None => Some("nothing".to_string()),
            }
        };
        match stale {
            None => {
                tracing::debug!(task_id = ?task, %handle, "foreign completion admitted");
                true
            }
            Some(pending) => {
                self.report(
                    Severity::Warn,
                    &format!("stale completion {handle} for {task} (pending: {pending})"),
                );
                false
            }
        }
    }

    pub(crate) fn set_sink(&self, sink: Option<LogSink>) {
        *self.sink.write() = sink;
    }

    /// Emits a diagnostic through tracing and the log sink.
    pub(crate) fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Warn => tracing::warn!("{message}"),
            Severity::Error => tracing::error!("{message}"),
        }
        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            sink(message);
        }
    }
}

/// Delivers the completion of one unit of background work.
///
/// Cloneable and `Send`; only the first matching delivery re-admits the task.
#[derive(Clone)]
pub struct Completer {
    admission: Arc<Admission>,
    task: TaskId,
    handle: WorkHandle,
}

impl Completer {
    pub(crate) fn new(admission: Arc<Admission>, task: TaskId, handle: WorkHandle) -> Self {
        Self {
            admission,
            task,
            handle,
        }
    }

    /// Re-admits the owning task. Returns false for a stale completion.
    pub fn complete(&self) -> bool {
        self.admission.complete(self.task, self.handle)
    }

    /// The task waiting on this work.
    #[must_use]
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// The handle recorded when the task parked.
    #[must_use]
    pub fn handle(&self) -> WorkHandle {
        self.handle
    }

    /// Reports a failure of the work at error severity, from any thread.
    pub(crate) fn report_failure(&self, message: &str) {
        self.admission.report(Severity::Error, message);
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("task", &self.task)
            .field("handle", &self.handle)
            .finish()
    }
}
