//! The task context type.
//!
//! `Cx` grants a running continuation access to:
//! - Its own identity
//! - The scheduler (spawning, closing, joining other tasks)
//! - Its timeout marker (the consuming timeout query)
//! - Task-local storage
//!
//! # Scoping
//!
//! A `Cx` borrows the scheduler for the duration of one step and cannot be
//! stored. Anything that must outlive the step (timers, waiters) records the
//! task id instead.

use std::any::Any;
use std::time::Duration;

use crate::continuation::{Continuation, Waiter};
use crate::error::{Error, Result};
use crate::runtime::Scheduler;
use crate::types::TaskId;

/// The context for one step of a task.
pub struct Cx<'a> {
    scheduler: &'a Scheduler,
    task: TaskId,
}

impl<'a> Cx<'a> {
    pub(crate) const fn new(scheduler: &'a Scheduler, task: TaskId) -> Self {
        Self { scheduler, task }
    }

    /// Returns the id of the task being driven.
    #[inline]
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task
    }

    /// Returns the scheduler driving this task.
    #[inline]
    #[must_use]
    pub const fn scheduler(&self) -> &'a Scheduler {
        self.scheduler
    }

    /// Returns the scheduler's elapsed time as of the last tick.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.scheduler.elapsed()
    }

    /// Starts a new task on the ready queue.
    pub fn spawn(&self, continuation: impl Continuation + 'static) -> TaskId {
        self.scheduler.spawn(continuation)
    }

    /// Starts a new task after `delay`.
    pub fn spawn_after(&self, delay: Duration, continuation: impl Continuation + 'static) -> TaskId {
        self.scheduler.spawn_after(delay, continuation)
    }

    /// Closes a task. Closing the current task ends it after this step.
    pub fn close(&self, task: TaskId) -> bool {
        self.scheduler.close(task)
    }

    /// Returns true if `task` is still registered.
    #[must_use]
    pub fn is_alive(&self, task: TaskId) -> bool {
        self.scheduler.is_alive(task)
    }

    /// Returns a waiter registration for this task's current step.
    #[must_use]
    pub fn waiter(&self) -> Waiter {
        Waiter::new(self.task, self.scheduler.step_count(self.task))
    }

    /// Consumes this task's timeout marker.
    ///
    /// Returns `Ok(true)` once per fired timeout, `Ok(false)` otherwise. With
    /// `throw` set, a pending marker is reported as a timeout error instead.
    pub fn is_timeout(&self, throw: bool) -> Result<bool> {
        match self.scheduler.take_timeout_marker(self.task) {
            Some(_) if throw => Err(Error::timeout().with_task(self.task)),
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    /// Returns true if a fired timeout is pending, without consuming it.
    #[must_use]
    pub fn has_timeout(&self) -> bool {
        self.scheduler.has_timeout_marker(self.task)
    }

    /// Stores a task-local value, returning true if it replaced one.
    pub fn set_local<T: Any>(&self, key: impl Into<String>, value: T) -> bool {
        let key = key.into();
        self.scheduler
            .with_locals(self.task, |locals| locals.insert(key, Box::new(value)).is_some())
            .unwrap_or(false)
    }

    /// Returns a clone of a task-local value of type `T`.
    #[must_use]
    pub fn local<T: Any + Clone>(&self, key: &str) -> Option<T> {
        self.scheduler
            .with_existing_locals(self.task, |locals| {
                locals.get(key).and_then(|v| v.downcast_ref::<T>()).cloned()
            })
            .flatten()
    }

    /// Removes a task-local value of type `T`.
    ///
    /// A value stored under `key` with a different type is left in place.
    pub fn remove_local<T: Any>(&self, key: &str) -> Option<T> {
        self.scheduler
            .with_existing_locals(self.task, |locals| {
                if !locals.get(key).is_some_and(|v| v.is::<T>()) {
                    return None;
                }
                locals
                    .remove(key)
                    .and_then(|v| v.downcast::<T>().ok())
                    .map(|v| *v)
            })
            .flatten()
    }
}

impl std::fmt::Debug for Cx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cx").field("task", &self.task).finish()
    }
}
