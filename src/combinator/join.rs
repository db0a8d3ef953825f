//! Join combinators: wait for other tasks to close.
//!
//! `join(task, timeout)` completes when `task` closes, or when the timeout
//! fires. A join on a task that is already closed completes in the same
//! step, without suspending.
//!
//! `join_all(tasks)` joins each task in turn. The total wait is bounded by
//! the slowest task, since tasks that closed early are skipped.

use std::collections::VecDeque;
use std::time::Duration;

use crate::continuation::{Continuation, Step, Suspend};
use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::runtime::Scheduler;
use crate::types::TaskId;

/// Continuation behind [`join`].
#[derive(Debug)]
pub struct Join {
    target: TaskId,
    timeout: Duration,
    waited: bool,
}

/// Waits for `task` to close, for at most `timeout` (zero waits forever).
///
/// After a timed-out join the task's timeout marker is pending.
#[must_use]
pub fn join(task: TaskId, timeout: Duration) -> Suspend {
    Suspend::call(Join {
        target: task,
        timeout,
        waited: false,
    })
}

impl Continuation for Join {
    fn resume(&mut self, cx: &mut Cx<'_>) -> Result<Step> {
        if std::mem::replace(&mut self.waited, true) {
            return Ok(Step::Done);
        }
        if self.target == cx.task_id() {
            return Err(Error::protocol_violation("task joined itself").with_task(self.target));
        }
        if self.timeout.is_zero() {
            return Ok(if cx.is_alive(self.target) {
                Step::Yield(Suspend::Join(self.target))
            } else {
                Step::Done
            });
        }
        match cx.scheduler().completion_notifier(self.target) {
            Some(notifier) => Ok(Step::Yield(notifier.wait(self.timeout))),
            None => Ok(Step::Done),
        }
    }
}

/// Continuation behind [`join_all`].
#[derive(Debug)]
pub struct JoinAll {
    pending: VecDeque<TaskId>,
}

/// Waits for every task in `tasks` to close.
#[must_use]
pub fn join_all(tasks: impl IntoIterator<Item = TaskId>) -> Suspend {
    Suspend::call(JoinAll {
        pending: tasks.into_iter().collect(),
    })
}

impl Continuation for JoinAll {
    fn resume(&mut self, cx: &mut Cx<'_>) -> Result<Step> {
        while let Some(task) = self.pending.pop_front() {
            if cx.is_alive(task) {
                return Ok(Step::Yield(Suspend::Join(task)));
            }
        }
        Ok(Step::Done)
    }
}

/// Starts every continuation as a task, in order.
pub fn spawn_all<I>(scheduler: &Scheduler, continuations: I) -> Vec<TaskId>
where
    I: IntoIterator,
    I::Item: Continuation + 'static,
{
    continuations
        .into_iter()
        .map(|c| scheduler.spawn(c))
        .collect()
}

/// Starts a task that joins all `tasks`, then runs `callback` when it closes.
pub fn join_all_then<F>(scheduler: &Scheduler, tasks: Vec<TaskId>, callback: F) -> TaskId
where
    F: FnOnce(&Scheduler) + 'static,
{
    let joiner = scheduler.spawn(JoinAll {
        pending: tasks.into(),
    });
    scheduler.on_close(joiner, move |sched, _| callback(sched));
    joiner
}
