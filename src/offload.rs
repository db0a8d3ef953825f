//! Foreign-work bridge.
//!
//! Runs blocking work on a real background thread while the owning task is
//! parked. The background thread never touches scheduler structures: when
//! the work finishes it hands its result to a shared slot and calls
//! [`Completer::complete`], which re-admits the task through the
//! mutex-guarded admission path.
//!
//! # Example
//!
//! ```ignore
//! let (suspend, result) = offload(|| std::fs::read_to_string("config.toml"));
//! Script::new()
//!     .suspend(suspend)
//!     .then(move |cx| {
//!         let text = result.get_or_timeout(cx, true)?;
//!         Ok(None)
//!     });
//! ```

use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crate::config::SchedulerConfig;
use crate::continuation::Suspend;
use crate::cx::Cx;
use crate::error::{panic_message, Error, ErrorKind, Result};
use crate::runtime::Completer;

type Launch = Box<dyn FnOnce(Completer, &SchedulerConfig)>;

/// A unit of work the scheduler starts once the owning task has parked.
///
/// The launcher receives a [`Completer`] and must arrange for
/// [`Completer::complete`] to be called exactly once when the work is done,
/// from any thread.
pub struct ForeignWork {
    launch: Launch,
}

impl ForeignWork {
    /// Wraps a launcher.
    pub fn new<F>(launch: F) -> Self
    where
        F: FnOnce(Completer) + 'static,
    {
        Self {
            launch: Box::new(move |completer, _config| launch(completer)),
        }
    }

    fn with_config<F>(launch: F) -> Self
    where
        F: FnOnce(Completer, &SchedulerConfig) + 'static,
    {
        Self {
            launch: Box::new(launch),
        }
    }

    pub(crate) fn launch(self, completer: Completer, config: &SchedulerConfig) {
        (self.launch)(completer, config);
    }
}

impl fmt::Debug for ForeignWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignWork").finish_non_exhaustive()
    }
}

impl From<ForeignWork> for Suspend {
    fn from(work: ForeignWork) -> Self {
        Self::Foreign(work)
    }
}

/// Failure of offloaded work.
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    /// The work panicked on its background thread.
    #[error("offloaded work panicked: {0}")]
    Panicked(String),
    /// The background thread could not be started.
    #[error("failed to start background thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl From<WorkError> for Error {
    fn from(err: WorkError) -> Self {
        match err {
            WorkError::Panicked(msg) => Self::task_panicked(msg),
            WorkError::Spawn(io) => Self::new(ErrorKind::Spawn)
                .with_message("failed to start background thread")
                .with_source(io),
        }
    }
}

type Slot<T> = Arc<Mutex<Option<core::result::Result<T, WorkError>>>>;

/// The eventual result of [`offload`].
pub struct WorkResult<T> {
    slot: Slot<T>,
}

impl<T> WorkResult<T> {
    /// Returns true once the work has finished.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Takes the result, if the work has finished.
    pub fn take(&self) -> Option<core::result::Result<T, WorkError>> {
        self.slot.lock().take()
    }

    /// Takes the result after checking the task's timeout marker.
    ///
    /// A pending timeout is reported first: as `Ok(None)`, or as a timeout
    /// error when `throw` is set. Work failures are converted into [`Error`].
    pub fn get_or_timeout(&self, cx: &Cx<'_>, throw: bool) -> Result<Option<T>> {
        if cx.is_timeout(throw)? {
            return Ok(None);
        }
        match self.take() {
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(err)) => Err(Error::from(err).with_task(cx.task_id())),
            None => Ok(None),
        }
    }
}

impl<T> fmt::Debug for WorkResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkResult")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Runs `work` on a background thread and parks the task until it finishes.
pub fn run_offloaded<F>(work: F) -> Suspend
where
    F: FnOnce() + Send + 'static,
{
    let (suspend, _result) = offload(work);
    suspend
}

/// Runs `work` on a background thread; the returned [`WorkResult`] holds
/// its output once the task is resumed.
pub fn offload<T, F>(work: F) -> (Suspend, WorkResult<T>)
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let slot: Slot<T> = Arc::new(Mutex::new(None));
    let result = WorkResult { slot: slot.clone() };

    let foreign = ForeignWork::with_config(move |completer, config| {
        let mut builder = thread::Builder::new().name(format!(
            "{}-{}",
            config.thread_name_prefix,
            completer.handle().as_u64()
        ));
        if let Some(size) = config.offload_stack_size {
            builder = builder.stack_size(size);
        }

        let worker_slot = slot.clone();
        let worker_completer = completer.clone();
        let spawned = builder.spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(work))
                .map_err(|payload| WorkError::Panicked(panic_message(&*payload)));
            if let Err(err) = &outcome {
                worker_completer.report_failure(&format!(
                    "{} for {} failed: {err}",
                    worker_completer.handle(),
                    worker_completer.task()
                ));
            }
            *worker_slot.lock() = Some(outcome);
            worker_completer.complete();
        });

        if let Err(err) = spawned {
            let err = WorkError::Spawn(err);
            completer.report_failure(&format!(
                "{} for {} failed: {err}",
                completer.handle(),
                completer.task()
            ));
            *slot.lock() = Some(Err(err));
            completer.complete();
        }
    });
    (Suspend::Foreign(foreign), result)
}
