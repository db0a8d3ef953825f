//! Deadline tokens bound to a task.
//!
//! A [`Timeout`] is started from inside a task and targets that task. When
//! its deadline passes (and it has not been cancelled) it records itself as
//! the task's timeout marker and, if the task is parked, puts it back on the
//! ready queue. The task observes the expiry through
//! [`Cx::is_timeout`](crate::Cx::is_timeout).
//!
//! Cancelling never touches the marker: a wait that was woken by its own
//! timeout cancels the token on the way out and the marker is still there
//! for the task to read.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::runtime::{Scheduler, TimerTarget};
use crate::types::TaskId;

struct TimeoutInner {
    target: TaskId,
    duration: Duration,
    started: Instant,
    cancelled: Cell<bool>,
    timed_out: Cell<bool>,
}

/// A started deadline for one task.
///
/// Clones refer to the same token.
#[derive(Clone)]
pub struct Timeout {
    inner: Rc<TimeoutInner>,
}

impl Timeout {
    /// Starts a timeout for the task driven by `cx`.
    ///
    /// Clears any timeout marker the task still holds from an earlier token.
    #[must_use]
    pub fn start(cx: &Cx<'_>, duration: Duration) -> Self {
        let scheduler = cx.scheduler();
        let target = cx.task_id();
        scheduler.clear_timeout_marker(target);
        let token = Self {
            inner: Rc::new(TimeoutInner {
                target,
                duration,
                started: Instant::now(),
                cancelled: Cell::new(false),
                timed_out: Cell::new(false),
            }),
        };
        scheduler.insert_timer(duration, TimerTarget::Timeout(token.clone()));
        tracing::trace!(task_id = ?target, ?duration, "timeout started");
        token
    }

    /// The task this token targets.
    #[must_use]
    pub fn target(&self) -> TaskId {
        self.inner.target
    }

    /// The configured duration.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.inner.duration
    }

    /// Wall time since the token was started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }

    /// Returns true once the deadline has fired.
    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        self.inner.timed_out.get()
    }

    /// Returns true once the token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.get()
    }

    /// Cancels the token.
    ///
    /// A token cancelled before its deadline never fires. With `throw` set,
    /// cancelling a token that already fired returns a timeout error to the
    /// caller; only the first cancel reports it.
    pub fn cancel(&self, throw: bool) -> Result<()> {
        let was_cancelled = self.inner.cancelled.replace(true);
        if throw && self.is_timed_out() && !was_cancelled {
            return Err(Error::timeout()
                .with_task(self.inner.target)
                .with_message(format!("timed out after {:?}", self.inner.duration)));
        }
        Ok(())
    }

    /// Called by the scheduler when the deadline passes.
    pub(crate) fn fire(&self, scheduler: &Scheduler) {
        if self.is_cancelled() {
            return;
        }
        self.inner.timed_out.set(true);
        let target = self.inner.target;
        if !scheduler.set_timeout_marker(target, self.clone()) {
            tracing::trace!(task_id = ?target, "timeout fired for closed task");
            return;
        }
        let woke = scheduler.admission().schedule_if_parked(target);
        tracing::debug!(task_id = ?target, woke, "timeout fired");
    }
}

impl fmt::Debug for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeout")
            .field("target", &self.inner.target)
            .field("duration", &self.inner.duration)
            .field("cancelled", &self.inner.cancelled.get())
            .field("timed_out", &self.inner.timed_out.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::{from_fn, Script, Step, Suspend};
    use crate::runtime::{Clock, ManualClock};
    use crate::SchedulerConfig;
    use std::cell::RefCell;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    fn manual() -> (Scheduler, ManualClock) {
        let clock = ManualClock::new();
        let sched = Scheduler::with_clock(SchedulerConfig::default(), Clock::Manual(clock.clone()));
        (sched, clock)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    type Slot = Rc<RefCell<Option<Timeout>>>;

    /// Task that starts a token, then parks on a long sleep.
    fn starter(slot: &Slot, duration: Duration) -> Script {
        let slot = slot.clone();
        Script::new()
            .then(move |cx| {
                *slot.borrow_mut() = Some(Timeout::start(cx, duration));
                Ok(Some(Suspend::Sleep(Duration::from_secs(60))))
            })
            .suspend(Suspend::Callback)
    }

    #[test]
    fn cancel_before_firing_never_marks_task() {
        init_test("cancel_before_firing_never_marks_task");
        let (sched, clock) = manual();
        let slot: Slot = Rc::default();
        let task = sched.spawn(starter(&slot, ms(20)));
        sched.tick();
        let token = slot.borrow().clone().expect("token started");
        token.cancel(false).expect("cancel");

        clock.advance(ms(20));
        sched.tick();
        crate::assert_with_log!(!token.is_timed_out(), "token not fired", false, token.is_timed_out());
        crate::assert_with_log!(
            !sched.has_timeout_marker(task),
            "task not marked",
            false,
            sched.has_timeout_marker(task)
        );
        crate::test_complete!("cancel_before_firing_never_marks_task");
    }

    #[test]
    fn firing_marks_and_wakes_parked_task() {
        init_test("firing_marks_and_wakes_parked_task");
        let (sched, clock) = manual();
        let slot: Slot = Rc::default();
        let observed = Rc::new(RefCell::new(Vec::new()));
        let out = observed.clone();
        let start_slot = slot.clone();
        sched.spawn(
            Script::new()
                .then(move |cx| {
                    *start_slot.borrow_mut() = Some(Timeout::start(cx, ms(20)));
                    Ok(Some(Suspend::Callback))
                })
                .then(move |cx| {
                    out.borrow_mut().push(cx.is_timeout(false)?);
                    out.borrow_mut().push(cx.is_timeout(false)?);
                    Ok(Some(Suspend::Callback))
                }),
        );
        sched.tick();
        clock.advance(ms(20));
        sched.tick();
        sched.tick();
        crate::assert_with_log!(
            *observed.borrow() == vec![true, false],
            "marker read once",
            vec![true, false],
            observed.borrow().clone()
        );
        let token = slot.borrow().clone().expect("token");
        assert!(token.is_timed_out());
        crate::test_complete!("firing_marks_and_wakes_parked_task");
    }

    #[test]
    fn cancel_with_throw_after_firing_raises_once() {
        init_test("cancel_with_throw_after_firing_raises_once");
        let (sched, clock) = manual();
        let slot: Slot = Rc::default();
        let task = sched.spawn(starter(&slot, ms(5)));
        sched.tick();
        clock.advance(ms(5));
        sched.tick();

        let token = slot.borrow().clone().expect("token");
        let first = token.cancel(true);
        crate::assert_with_log!(
            first.as_ref().is_err_and(Error::is_timeout),
            "first cancel raises",
            "Err(Timeout)",
            first
        );
        assert_eq!(first.unwrap_err().task(), Some(task));
        let second = token.cancel(true);
        crate::assert_with_log!(second.is_ok(), "second cancel is quiet", "Ok(())", second);
        crate::test_complete!("cancel_with_throw_after_firing_raises_once");
    }

    #[test]
    fn restarting_clears_previous_marker() {
        let (sched, clock) = manual();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let out = seen.clone();
        let mut step = 0;
        sched.spawn(from_fn(move |cx| {
            step += 1;
            match step {
                1 => {
                    drop(Timeout::start(cx, ms(1)));
                    Ok(Step::Yield(Suspend::Callback))
                }
                2 => {
                    out.borrow_mut().push(cx.has_timeout());
                    drop(Timeout::start(cx, ms(100)));
                    out.borrow_mut().push(cx.has_timeout());
                    Ok(Step::Done)
                }
                _ => Ok(Step::Done),
            }
        }));
        sched.tick();
        clock.advance(ms(1));
        sched.tick();
        sched.tick();
        assert_eq!(*seen.borrow(), vec![true, false]);
    }

    #[test]
    fn firing_for_closed_task_is_harmless() {
        let (sched, clock) = manual();
        let slot: Slot = Rc::default();
        let task = sched.spawn(starter(&slot, ms(5)));
        sched.tick();
        sched.close(task);
        clock.advance(ms(5));
        sched.tick();
        let token = slot.borrow().clone().expect("token");
        assert!(token.is_timed_out());
        assert_eq!(sched.ready_len(), 0);
    }
}
