//! The cooperative scheduler.
//!
//! A [`Scheduler`] owns the task table, the timer list and the ready queue,
//! and drives them from whatever thread the host calls [`Scheduler::tick`]
//! on. Exactly one task body runs at a time.
//!
//! # Tick
//!
//! 1. Resume at most as many ready tasks as were queued when the tick began.
//! 2. Sample the clock once and advance elapsed time.
//! 3. Fire every timer due at the new elapsed time, in deadline order.
//! 4. Return a sleep hint: busy or idle interval, clamped to the next deadline.
//!
//! Timers armed while step 3 runs wait for the next tick even if already
//! due, so a zero-delay timer loop cannot pin the scheduler.
//!
//! # Threads
//!
//! `Scheduler` is neither `Send` nor `Sync`. The only state reachable from
//! other threads is the mutex-guarded admission path behind
//! [`Completer`](crate::Completer); the timer list is never touched off the
//! scheduler thread.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConfigError, SchedulerConfig};
use crate::continuation::{sequence, Continuation, Step, Suspend, Waiter};
use crate::cx::Cx;
use crate::error::{panic_message, Error, ErrorKind, Result};
use crate::runtime::admission::{Admission, Completer, LogSink, Park, Severity};
use crate::runtime::clock::{Clock, ClockState};
use crate::runtime::flatten::Flattener;
use crate::runtime::task_table::{Locals, TaskRecord, TaskTable};
use crate::runtime::timer::TimerList;
use crate::sync::{Event, Timeout};
use crate::types::TaskId;

/// Host hook that reinterprets host-native awaitables.
type Recognizer = Rc<dyn Fn(Box<dyn Any>, &Cx<'_>) -> Option<Suspend>>;

/// What a timer does when it fires.
pub(crate) enum TimerTarget {
    /// Resume the task.
    Task(TaskId),
    /// Resume a sleeping task if it is still parked under `epoch`.
    Wake { task: TaskId, epoch: u64 },
    /// Fire a timeout token.
    Timeout(Timeout),
}

/// A single-threaded cooperative task scheduler.
pub struct Scheduler {
    config: SchedulerConfig,
    tasks: RefCell<TaskTable>,
    timers: RefCell<TimerList<TimerTarget>>,
    admission: Arc<Admission>,
    clock: RefCell<ClockState>,
    current: Cell<Option<TaskId>>,
    recognizer: RefCell<Option<Recognizer>>,
    stopped: Cell<bool>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Creates a scheduler with default configuration and the wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Creates a scheduler with the given configuration.
    ///
    /// The configuration is used as given; see
    /// [`try_with_config`](Self::try_with_config) for a validating variant.
    #[must_use]
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self::with_clock(config, Clock::Wall)
    }

    /// Creates a scheduler after validating `config`.
    pub fn try_with_config(config: SchedulerConfig) -> core::result::Result<Self, ConfigError> {
        Self::try_with_clock(config, Clock::Wall)
    }

    /// Creates a scheduler with the given time source after validating `config`.
    pub fn try_with_clock(
        config: SchedulerConfig,
        clock: Clock,
    ) -> core::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_clock(config, clock))
    }

    /// Creates a scheduler with the given configuration and time source.
    ///
    /// The configuration is not validated.
    #[must_use]
    pub fn with_clock(config: SchedulerConfig, clock: Clock) -> Self {
        Self {
            config,
            tasks: RefCell::new(TaskTable::new()),
            timers: RefCell::new(TimerList::new()),
            admission: Arc::new(Admission::new()),
            clock: RefCell::new(ClockState::new(clock)),
            current: Cell::new(None),
            recognizer: RefCell::new(None),
            stopped: Cell::new(true),
        }
    }

    /// Creates a scheduler from defaults plus `COSCHED_*` environment overrides.
    pub fn from_env() -> core::result::Result<Self, ConfigError> {
        let mut config = SchedulerConfig::default();
        config.apply_env_overrides()?;
        Self::try_with_config(config)
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Installs the log sink for warning and error diagnostics.
    ///
    /// The sink may be called from background threads.
    pub fn set_log_sink<F>(&self, sink: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let sink: LogSink = Arc::new(sink);
        self.admission.set_sink(Some(sink));
    }

    /// Removes the log sink.
    pub fn clear_log_sink(&self) {
        self.admission.set_sink(None);
    }

    /// Installs the host-awaitable recognizer.
    ///
    /// Consulted for [`Suspend::Host`] values. Returning `None` (or another
    /// host value) makes the task yield for one tick.
    pub fn set_host_recognizer<F>(&self, recognizer: F)
    where
        F: Fn(Box<dyn Any>, &Cx<'_>) -> Option<Suspend> + 'static,
    {
        *self.recognizer.borrow_mut() = Some(Rc::new(recognizer));
    }

    // === Task creation ===

    /// Registers a continuation as a new task without scheduling it.
    pub fn register(&self, continuation: impl Continuation + 'static) -> TaskId {
        self.register_inner(None, Box::new(continuation))
    }

    /// Registers a named task without scheduling it.
    pub fn register_named(
        &self,
        name: impl Into<String>,
        continuation: impl Continuation + 'static,
    ) -> TaskId {
        self.register_inner(Some(name.into()), Box::new(continuation))
    }

    fn register_inner(&self, name: Option<String>, continuation: Box<dyn Continuation>) -> TaskId {
        let chain = Flattener::new(continuation);
        let id = self
            .tasks
            .borrow_mut()
            .insert_with(|id| TaskRecord::new(id, name, chain));
        tracing::debug!(task_id = ?id, "task registered");
        id
    }

    /// Starts a task on the ready queue.
    pub fn spawn(&self, continuation: impl Continuation + 'static) -> TaskId {
        let id = self.register(continuation);
        self.schedule_now(id);
        id
    }

    /// Starts a named task on the ready queue.
    pub fn spawn_named(
        &self,
        name: impl Into<String>,
        continuation: impl Continuation + 'static,
    ) -> TaskId {
        let id = self.register_named(name, continuation);
        self.schedule_now(id);
        id
    }

    /// Starts a task once `delay` has elapsed.
    pub fn spawn_after(&self, delay: Duration, continuation: impl Continuation + 'static) -> TaskId {
        let id = self.register(continuation);
        self.schedule_after(delay, id);
        id
    }

    /// Starts a task that yields each suspension in order.
    pub fn spawn_sequence(&self, items: impl IntoIterator<Item = Suspend>) -> TaskId {
        self.spawn(sequence(items))
    }

    // === Admission ===

    /// Appends a live task to the ready queue, clearing any pending foreign
    /// completion. Returns false for closed tasks.
    pub fn schedule_now(&self, task: TaskId) -> bool {
        if !self.is_alive(task) {
            return false;
        }
        self.admission.schedule_now(task);
        true
    }

    /// Resumes a live task once `delay` has elapsed.
    pub fn schedule_after(&self, delay: Duration, task: TaskId) -> bool {
        if !self.is_alive(task) {
            return false;
        }
        self.insert_timer(delay, TimerTarget::Task(task));
        true
    }

    /// Admits a waiter registered on a [`Waitable`](crate::Waitable).
    ///
    /// Does nothing unless the task is still parked in the step it
    /// registered from. Returns true if the task was admitted.
    pub fn wake(&self, waiter: Waiter) -> bool {
        let task = waiter.task();
        let step = self.tasks.borrow().task(task).map(|r| r.steps);
        if step != Some(waiter.step()) {
            tracing::trace!(task_id = ?task, "stale waiter skipped");
            return false;
        }
        self.admission.schedule_if_parked(task)
    }

    pub(crate) fn insert_timer(&self, delay: Duration, target: TimerTarget) {
        let deadline = self.elapsed().saturating_add(delay);
        self.timers.borrow_mut().insert(deadline, target);
    }

    // === Lifecycle ===

    /// Closes a task: it is deregistered and never resumed again.
    ///
    /// Its completion notifier, if any, is set to the task's id. A task
    /// closing itself finishes its current step first. Returns false if the
    /// task was already closed.
    pub fn close(&self, task: TaskId) -> bool {
        let record = self.tasks.borrow_mut().remove(task);
        let Some(mut record) = record else {
            return false;
        };
        self.admission.forget(task);
        tracing::debug!(task_id = ?task, name = ?record.name, "task closed");

        if let Some(notifier) = record.notifier.take() {
            let notified = panic::catch_unwind(AssertUnwindSafe(|| notifier.set(self, task)));
            if let Err(payload) = notified {
                self.report(
                    Severity::Error,
                    &format!(
                        "completion callback of {task} panicked: {}",
                        panic_message(&*payload)
                    ),
                );
            }
        }
        drop(record);
        true
    }

    /// Runs `callback` once `task` closes, or immediately if it already has.
    pub fn on_close<F>(&self, task: TaskId, callback: F)
    where
        F: FnOnce(&Scheduler, TaskId) + 'static,
    {
        match self.completion_notifier(task) {
            Some(notifier) => notifier.on_set_once(move |sched, id| callback(sched, *id)),
            None => callback(self, task),
        }
    }

    /// Returns the task's completion notifier, creating it on first use.
    ///
    /// `None` if the task is closed.
    pub fn completion_notifier(&self, task: TaskId) -> Option<Event<TaskId>> {
        let mut tasks = self.tasks.borrow_mut();
        let record = tasks.task_mut(task)?;
        Some(record.notifier.get_or_insert_with(Event::new).clone())
    }

    // === Driving ===

    /// Runs one scheduling pass and returns the recommended sleep before the
    /// next one.
    pub fn tick(&self) -> Duration {
        let budget = self.admission.ready_len();
        for _ in 0..budget {
            let Some(task) = self.admission.pop_ready() else {
                break;
            };
            self.resume(task);
        }

        let now = {
            let mut clock = self.clock.borrow_mut();
            clock.advance();
            clock.elapsed()
        };

        let watermark = self.timers.borrow().watermark();
        loop {
            let due = self.timers.borrow_mut().pop_due(now, watermark);
            let Some(target) = due else {
                break;
            };
            self.fire(target);
        }

        let hint = self.recommended_sleep(now);
        tracing::trace!(
            resumed = budget,
            ready = self.admission.ready_len(),
            timers = self.timer_count(),
            ?hint,
            "tick"
        );
        hint
    }

    fn recommended_sleep(&self, now: Duration) -> Duration {
        let mut hint = if self.admission.ready_len() > 0 {
            self.config.busy_tick
        } else {
            self.config.idle_tick
        };
        if let Some(deadline) = self.timers.borrow().peek_deadline() {
            hint = hint.min(deadline.saturating_sub(now));
        }
        hint
    }

    fn fire(&self, target: TimerTarget) {
        match target {
            TimerTarget::Task(task) => self.resume(task),
            TimerTarget::Wake { task, epoch } => {
                if self.admission.unpark_at(task, epoch) {
                    self.resume(task);
                } else {
                    tracing::trace!(task_id = ?task, epoch, "superseded sleep timer");
                }
            }
            TimerTarget::Timeout(token) => token.fire(self),
        }
    }

    /// Marks the scheduler as running.
    pub fn start(&self) {
        self.stopped.set(false);
    }

    /// Asks [`run`](Self::run) and friends to return after the current tick.
    pub fn stop(&self) {
        self.stopped.set(true);
    }

    /// Returns true unless the scheduler is running.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.get()
    }

    /// Ticks and sleeps on the calling thread until [`stop`](Self::stop).
    pub fn run(&self) {
        self.run_while(|_| true);
    }

    /// Ticks and sleeps until no task is left or the scheduler is stopped.
    pub fn run_until_idle(&self) {
        self.run_while(|sched| sched.live_task_count() > 0);
    }

    /// Ticks and sleeps until `task` closes or the scheduler is stopped.
    pub fn run_until_complete(&self, task: TaskId) {
        self.run_while(|sched| sched.is_alive(task));
    }

    fn run_while(&self, mut keep_going: impl FnMut(&Self) -> bool) {
        self.start();
        tracing::debug!("run loop started");
        while !self.is_stopped() && keep_going(self) {
            let hint = self.tick();
            if self.is_stopped() || !keep_going(self) {
                break;
            }
            if !hint.is_zero() {
                std::thread::sleep(hint);
            }
        }
        self.stop();
        tracing::debug!("run loop finished");
    }

    // === Resume ===

    fn resume(&self, task: TaskId) {
        let chain = self.tasks.borrow_mut().take_chain(task);
        let Some(mut chain) = chain else {
            tracing::trace!(task_id = ?task, "resume skipped: closed or already stepping");
            return;
        };

        let previous = self.current.replace(Some(task));
        let mut cx = Cx::new(self, task);
        let stepped = panic::catch_unwind(AssertUnwindSafe(|| chain.step(&mut cx)))
            .unwrap_or_else(|payload| {
                Err(Error::task_panicked(panic_message(&*payload)).with_task(task))
            });
        self.current.set(previous);

        match stepped {
            Ok(Step::Yield(suspend)) => {
                tracing::trace!(task_id = ?task, kind = suspend.kind(), "task suspended");
                let orphan = self.tasks.borrow_mut().restore_chain(task, chain);
                if orphan.is_some() {
                    tracing::trace!(task_id = ?task, "task closed during its step");
                    return;
                }
                let classified =
                    panic::catch_unwind(AssertUnwindSafe(|| self.classify(&mut cx, suspend)))
                        .unwrap_or_else(|payload| {
                            Err(Error::task_panicked(panic_message(&*payload)).with_task(task))
                        });
                if let Err(err) = classified {
                    self.fail(task, err);
                }
            }
            Ok(Step::Done) => {
                drop(chain);
                self.close(task);
            }
            Err(err) => {
                drop(chain);
                self.fail(task, err);
            }
        }
    }

    /// Reports a task failure and closes the task.
    ///
    /// Panics are reported as they are; any other error is wrapped as
    /// [`ErrorKind::TaskFailed`] with the original as its source.
    fn fail(&self, task: TaskId, err: Error) {
        let err = match err.kind() {
            ErrorKind::TaskPanicked => err,
            _ => Error::task_failed(err.to_string())
                .with_task(task)
                .with_source(err),
        };
        self.report(Severity::Error, &format!("task {task} failed: {err}"));
        self.close(task);
    }

    fn classify(&self, cx: &mut Cx<'_>, suspend: Suspend) -> Result<()> {
        let task = cx.task_id();
        match suspend {
            Suspend::Yield => self.admission.schedule_now(task),
            Suspend::Callback => {
                self.admission.park(task, Park::Callback)?;
            }
            Suspend::Sleep(delay) if delay.is_zero() => self.admission.schedule_now(task),
            Suspend::Sleep(delay) => {
                let epoch = self.admission.park(task, Park::Sleep)?;
                self.insert_timer(delay, TimerTarget::Wake { task, epoch });
            }
            Suspend::Foreign(work) => {
                let handle = self.admission.next_work_handle();
                self.admission.park(task, Park::Work(handle))?;
                tracing::debug!(task_id = ?task, %handle, "foreign work launched");
                work.launch(
                    Completer::new(Arc::clone(&self.admission), task, handle),
                    &self.config,
                );
            }
            Suspend::Join(target) => {
                if target == task {
                    return Err(Error::protocol_violation("task joined itself").with_task(task));
                }
                match self.completion_notifier(target) {
                    Some(notifier) if notifier.as_waitable().add_waiter(cx.waiter()) => {
                        self.admission.park(task, Park::Waiter)?;
                    }
                    _ => self.admission.schedule_now(task),
                }
            }
            Suspend::Wait(waitable) => {
                if waitable.add_waiter(cx.waiter()) {
                    self.admission.park(task, Park::Waiter)?;
                } else {
                    self.admission.schedule_now(task);
                }
            }
            Suspend::Call(frame) => {
                if let Some(chain) = self
                    .tasks
                    .borrow_mut()
                    .task_mut(task)
                    .and_then(|record| record.chain.as_mut())
                {
                    chain.push(frame);
                    tracing::trace!(task_id = ?task, depth = chain.depth(), "frame pushed by recognizer");
                }
                self.admission.schedule_now(task);
            }
            Suspend::Host(value) => {
                let recognizer = self.recognizer.borrow().clone();
                let converted = match recognizer {
                    Some(recognize) => (*recognize)(value, &*cx),
                    None => None,
                };
                match converted {
                    Some(Suspend::Host(_)) | None => self.admission.schedule_now(task),
                    Some(converted) => return self.classify(cx, converted),
                }
            }
        }
        Ok(())
    }

    // === Diagnostics ===

    pub(crate) fn report(&self, severity: Severity, message: &str) {
        self.admission.report(severity, message);
    }

    pub(crate) fn admission(&self) -> &Admission {
        &self.admission
    }

    // === Introspection ===

    /// Returns the number of registered tasks.
    #[must_use]
    pub fn live_task_count(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Returns the number of pending resumes on the ready queue.
    #[must_use]
    pub fn ready_len(&self) -> usize {
        self.admission.ready_len()
    }

    /// Returns the number of pending timers, including stale ones.
    #[must_use]
    pub fn timer_count(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Returns the elapsed time as of the last tick.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.clock.borrow().elapsed()
    }

    /// Returns the task currently being resumed, if any.
    #[must_use]
    pub fn current_task(&self) -> Option<TaskId> {
        self.current.get()
    }

    /// Returns true if `task` is registered.
    #[must_use]
    pub fn is_alive(&self, task: TaskId) -> bool {
        self.tasks.borrow().contains(task)
    }

    /// Returns the task's name, if it has one.
    #[must_use]
    pub fn name(&self, task: TaskId) -> Option<String> {
        self.tasks.borrow().task(task).and_then(|r| r.name.clone())
    }

    // === Per-task state used by Cx and the sync primitives ===

    pub(crate) fn step_count(&self, task: TaskId) -> u64 {
        self.tasks.borrow().task(task).map_or(0, |r| r.steps)
    }

    pub(crate) fn take_timeout_marker(&self, task: TaskId) -> Option<Timeout> {
        self.tasks
            .borrow_mut()
            .task_mut(task)
            .and_then(|r| r.timeout.take())
    }

    pub(crate) fn has_timeout_marker(&self, task: TaskId) -> bool {
        self.tasks
            .borrow()
            .task(task)
            .is_some_and(|r| r.timeout.is_some())
    }

    /// Records a fired timeout on a live task.
    pub(crate) fn set_timeout_marker(&self, task: TaskId, token: Timeout) -> bool {
        let mut tasks = self.tasks.borrow_mut();
        let Some(record) = tasks.task_mut(task) else {
            return false;
        };
        record.timeout = Some(token);
        true
    }

    pub(crate) fn clear_timeout_marker(&self, task: TaskId) {
        let cleared = self
            .tasks
            .borrow_mut()
            .task_mut(task)
            .and_then(|r| r.timeout.take());
        drop(cleared);
    }

    /// Runs `f` on the task's locals, creating the map on first use.
    pub(crate) fn with_locals<R>(&self, task: TaskId, f: impl FnOnce(&mut Locals) -> R) -> Option<R> {
        let mut tasks = self.tasks.borrow_mut();
        let record = tasks.task_mut(task)?;
        Some(f(record.locals.get_or_insert_with(HashMap::new)))
    }

    /// Runs `f` on the task's locals if the map exists.
    pub(crate) fn with_existing_locals<R>(
        &self,
        task: TaskId,
        f: impl FnOnce(&mut Locals) -> R,
    ) -> Option<R> {
        let mut tasks = self.tasks.borrow_mut();
        let locals = tasks.task_mut(task)?.locals.as_mut()?;
        Some(f(locals))
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.live_task_count())
            .field("ready", &self.ready_len())
            .field("timers", &self.timer_count())
            .field("elapsed", &self.elapsed())
            .field("current", &self.current.get())
            .field("stopped", &self.stopped.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::{from_fn, Script};
    use crate::runtime::clock::ManualClock;
    use crate::test_utils::init_test_logging;
    use parking_lot::Mutex;

    fn init_test(name: &str) {
        init_test_logging();
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

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Script) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let make_log = log.clone();
        let make = move |label: &'static str| {
            let log = make_log.clone();
            Script::new().then(move |_| {
                log.borrow_mut().push(label);
                Ok(None)
            })
        };
        (log, make)
    }

    #[test]
    fn register_does_not_schedule() {
        init_test("register_does_not_schedule");
        let sched = Scheduler::new();
        let id = sched.register(from_fn(|_| Ok(Step::Done)));
        crate::assert_with_log!(sched.is_alive(id), "registered is alive", true, sched.is_alive(id));
        crate::assert_with_log!(sched.ready_len() == 0, "not queued", 0, sched.ready_len());
        sched.tick();
        crate::assert_with_log!(sched.is_alive(id), "never resumed", true, sched.is_alive(id));
        crate::test_complete!("register_does_not_schedule");
    }

    #[test]
    fn tick_resumes_ready_tasks_in_fifo_order() {
        init_test("tick_resumes_ready_tasks_in_fifo_order");
        let sched = Scheduler::new();
        let (log, make) = recorder();
        sched.spawn(make("a"));
        sched.spawn(make("b"));
        sched.spawn(make("c"));
        sched.tick();
        crate::assert_with_log!(
            *log.borrow() == vec!["a", "b", "c"],
            "fifo order",
            vec!["a", "b", "c"],
            log.borrow().clone()
        );
        crate::assert_with_log!(
            sched.live_task_count() == 0,
            "finished tasks are closed",
            0,
            sched.live_task_count()
        );
        crate::test_complete!("tick_resumes_ready_tasks_in_fifo_order");
    }

    #[test]
    fn self_readmitting_tasks_run_once_per_tick() {
        init_test("self_readmitting_tasks_run_once_per_tick");
        let sched = Scheduler::new();
        let counts = Rc::new(RefCell::new([0_u32; 2]));
        for slot in 0..2 {
            let counts = counts.clone();
            sched.spawn(from_fn(move |_| {
                counts.borrow_mut()[slot] += 1;
                Ok(Step::Yield(Suspend::Yield))
            }));
        }
        sched.tick();
        crate::assert_with_log!(*counts.borrow() == [1, 1], "one resume each", [1, 1], *counts.borrow());
        sched.tick();
        crate::assert_with_log!(*counts.borrow() == [2, 2], "two resumes each", [2, 2], *counts.borrow());
        crate::test_complete!("self_readmitting_tasks_run_once_per_tick");
    }

    #[test]
    fn schedule_after_fires_in_deadline_order() {
        init_test("schedule_after_fires_in_deadline_order");
        let (sched, clock) = manual();
        let (log, make) = recorder();
        sched.spawn_after(ms(30), make("late"));
        sched.spawn_after(ms(10), make("early"));
        sched.spawn_after(ms(10), make("early-tie"));
        sched.spawn_after(ms(20), make("middle"));

        sched.tick();
        crate::assert_with_log!(log.borrow().is_empty(), "nothing due yet", 0, log.borrow().len());
        clock.advance(ms(30));
        sched.tick();
        let expected = vec!["early", "early-tie", "middle", "late"];
        crate::assert_with_log!(*log.borrow() == expected, "deadline order", expected, log.borrow().clone());
        crate::test_complete!("schedule_after_fires_in_deadline_order");
    }

    #[test]
    fn sleep_hint_tracks_queue_and_timers() {
        init_test("sleep_hint_tracks_queue_and_timers");
        let (sched, clock) = manual();
        crate::test_section!("idle");
        let hint = sched.tick();
        crate::assert_with_log!(hint == ms(100), "idle interval", ms(100), hint);

        crate::test_section!("busy");
        sched.spawn(from_fn(|_| Ok(Step::Yield(Suspend::Yield))));
        let hint = sched.tick();
        crate::assert_with_log!(hint == ms(10), "busy interval", ms(10), hint);

        crate::test_section!("clamped");
        let sleeper = sched.register(from_fn(|_| Ok(Step::Done)));
        sched.schedule_after(ms(4), sleeper);
        clock.advance(ms(1));
        let hint = sched.tick();
        crate::assert_with_log!(hint == ms(3), "clamped to next deadline", ms(3), hint);
        crate::test_complete!("sleep_hint_tracks_queue_and_timers");
    }

    #[test]
    fn sleep_parks_until_deadline() {
        init_test("sleep_parks_until_deadline");
        let (sched, clock) = manual();
        let woke_at = Rc::new(Cell::new(None));
        let out = woke_at.clone();
        sched.spawn(
            Script::new()
                .suspend(Suspend::Sleep(ms(50)))
                .then(move |cx| {
                    out.set(Some(cx.elapsed()));
                    Ok(None)
                }),
        );
        sched.tick();
        clock.advance(ms(49));
        sched.tick();
        crate::assert_with_log!(woke_at.get().is_none(), "still asleep", None::<Duration>, woke_at.get());
        clock.advance(ms(1));
        sched.tick();
        crate::assert_with_log!(woke_at.get() == Some(ms(50)), "woke at deadline", Some(ms(50)), woke_at.get());
        crate::test_complete!("sleep_parks_until_deadline");
    }

    #[test]
    fn zero_delay_timer_loop_does_not_pin_tick() {
        init_test("zero_delay_timer_loop_does_not_pin_tick");
        let (sched, _clock) = manual();
        let resumes = Rc::new(Cell::new(0_u32));
        let counter = resumes.clone();
        let id = sched.register(from_fn(move |cx| {
            counter.set(counter.get() + 1);
            cx.scheduler().schedule_after(Duration::ZERO, cx.task_id());
            Ok(Step::Yield(Suspend::Sleep(Duration::from_secs(60))))
        }));
        sched.schedule_after(Duration::ZERO, id);
        sched.tick();
        crate::assert_with_log!(resumes.get() == 1, "one resume per tick", 1, resumes.get());
        sched.tick();
        crate::assert_with_log!(resumes.get() == 2, "next tick fires again", 2, resumes.get());
        crate::test_complete!("zero_delay_timer_loop_does_not_pin_tick");
    }

    #[test]
    fn task_error_is_contained_and_logged() {
        init_test("task_error_is_contained_and_logged");
        let sched = Scheduler::new();
        let messages = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = messages.clone();
        sched.set_log_sink(move |msg| sink.lock().push(msg.to_string()));

        let failing = sched.spawn(from_fn(|_| Err(Error::user("bad input"))));
        let panicking = sched.spawn(from_fn(|_| panic!("kaboom")));
        let (log, make) = recorder();
        sched.spawn(make("survivor"));

        sched.tick();
        crate::assert_with_log!(!sched.is_alive(failing), "failing task closed", false, sched.is_alive(failing));
        crate::assert_with_log!(!sched.is_alive(panicking), "panicking task closed", false, sched.is_alive(panicking));
        crate::assert_with_log!(*log.borrow() == vec!["survivor"], "others still run", vec!["survivor"], log.borrow().clone());

        let messages = messages.lock();
        crate::assert_with_log!(messages.len() == 2, "both failures reported", 2, messages.len());
        assert!(messages[0].contains("bad input"), "{}", messages[0]);
        assert!(messages[0].contains("TaskFailed"), "{}", messages[0]);
        assert!(messages[1].contains("kaboom"), "{}", messages[1]);
        assert!(messages[1].contains("TaskPanicked"), "{}", messages[1]);
        crate::test_complete!("task_error_is_contained_and_logged");
    }

    #[test]
    fn double_callback_park_fails_the_task() {
        init_test("double_callback_park_fails_the_task");
        let (sched, clock) = manual();
        let id = sched.register(from_fn(|_| Ok(Step::Yield(Suspend::Callback))));
        sched.schedule_now(id);
        sched.tick();
        crate::assert_with_log!(sched.is_alive(id), "parked on callback", true, sched.is_alive(id));

        // A direct timer resume does not clear the pending callback.
        sched.schedule_after(ms(1), id);
        clock.advance(ms(1));
        sched.tick();
        crate::assert_with_log!(!sched.is_alive(id), "protocol violation closes task", false, sched.is_alive(id));
        crate::test_complete!("double_callback_park_fails_the_task");
    }

    #[test]
    fn close_notifies_joiners_and_close_callbacks() {
        init_test("close_notifies_joiners_and_close_callbacks");
        let sched = Scheduler::new();
        let target = sched.register(from_fn(|_| Ok(Step::Yield(Suspend::Callback))));
        let (log, make) = recorder();
        let joiner = sched.spawn(Script::new().suspend(Suspend::join(target)).then({
            let log = log.clone();
            move |_| {
                log.borrow_mut().push("joined");
                Ok(None)
            }
        }));
        let closed_seen = Rc::new(Cell::new(None));
        let seen = closed_seen.clone();
        sched.on_close(target, move |_, id| seen.set(Some(id)));

        sched.tick();
        crate::assert_with_log!(sched.is_alive(joiner), "joiner parked", true, sched.is_alive(joiner));
        assert!(sched.close(target));
        assert!(!sched.close(target), "second close is a no-op");
        crate::assert_with_log!(closed_seen.get() == Some(target), "close callback ran", Some(target), closed_seen.get());
        sched.tick();
        crate::assert_with_log!(*log.borrow() == vec!["joined"], "joiner resumed", vec!["joined"], log.borrow().clone());

        let late = Rc::new(Cell::new(false));
        let flag = late.clone();
        sched.on_close(target, move |_, _| flag.set(true));
        crate::assert_with_log!(late.get(), "callback on closed task runs immediately", true, late.get());
        drop(make);
        crate::test_complete!("close_notifies_joiners_and_close_callbacks");
    }

    #[test]
    fn validating_constructors_reject_bad_config() {
        init_test("validating_constructors_reject_bad_config");
        let bad = SchedulerConfig::new().idle_tick(ms(5)).busy_tick(ms(10));
        let rejected = Scheduler::try_with_config(bad);
        crate::assert_with_log!(
            matches!(rejected, Err(ConfigError::BusyExceedsIdle { .. })),
            "busy above idle rejected",
            "BusyExceedsIdle",
            rejected.as_ref().err()
        );
        let ok = Scheduler::try_with_clock(SchedulerConfig::default(), Clock::Manual(ManualClock::new()));
        crate::assert_with_log!(ok.is_ok(), "defaults accepted", true, ok.is_ok());
        crate::test_complete!("validating_constructors_reject_bad_config");
    }

    #[test]
    fn stale_waiter_is_not_admitted() {
        init_test("stale_waiter_is_not_admitted");
        let (sched, _clock) = manual();
        let registered = Rc::new(Cell::new(None));
        let out = registered.clone();
        let mut step = 0;
        let id = sched.spawn(from_fn(move |cx| {
            step += 1;
            if step == 1 {
                out.set(Some(cx.waiter()));
            }
            Ok(Step::Yield(Suspend::Callback))
        }));
        sched.tick();
        let waiter = registered.get().expect("waiter recorded");
        let admitted = sched.wake(waiter);
        crate::assert_with_log!(admitted, "parked waiter admitted", true, admitted);
        sched.tick();
        crate::assert_with_log!(sched.ready_len() == 0, "task parked again", 0, sched.ready_len());
        let readmitted = sched.wake(waiter);
        crate::assert_with_log!(!readmitted, "old registration is stale", false, readmitted);
        crate::assert_with_log!(sched.is_alive(id), "task still parked", true, sched.is_alive(id));
        crate::test_complete!("stale_waiter_is_not_admitted");
    }

    #[test]
    fn self_join_is_rejected() {
        let sched = Scheduler::new();
        let id = sched.spawn(from_fn(|cx| Ok(Step::Yield(Suspend::join(cx.task_id())))));
        sched.tick();
        assert!(!sched.is_alive(id));
    }

    #[test]
    fn host_recognizer_converts_values() {
        init_test("host_recognizer_converts_values");
        struct HostDelay(u64);

        let (sched, clock) = manual();
        sched.set_host_recognizer(|value, _cx| {
            value
                .downcast::<HostDelay>()
                .ok()
                .map(|delay| Suspend::Sleep(Duration::from_millis(delay.0)))
        });
        let (log, make) = recorder();
        sched.spawn(Script::new().suspend(Suspend::host(HostDelay(20))).then({
            let log = log.clone();
            move |_| {
                log.borrow_mut().push("after-host-delay");
                Ok(None)
            }
        }));
        sched.spawn(Script::new().suspend(Suspend::host("unknown")).then({
            let log = log.clone();
            move |_| {
                log.borrow_mut().push("after-unknown");
                Ok(None)
            }
        }));

        sched.tick();
        sched.tick();
        crate::assert_with_log!(
            *log.borrow() == vec!["after-unknown"],
            "unrecognized host value yields one tick",
            vec!["after-unknown"],
            log.borrow().clone()
        );
        clock.advance(ms(20));
        sched.tick();
        crate::assert_with_log!(
            *log.borrow() == vec!["after-unknown", "after-host-delay"],
            "recognized value became a sleep",
            vec!["after-unknown", "after-host-delay"],
            log.borrow().clone()
        );
        drop(make);
        crate::test_complete!("host_recognizer_converts_values");
    }

    #[test]
    fn run_until_idle_drains_tasks() {
        init_test("run_until_idle_drains_tasks");
        let sched = Scheduler::with_config(
            SchedulerConfig::new()
                .idle_tick(ms(1))
                .busy_tick(Duration::ZERO),
        );
        let (log, make) = recorder();
        sched.spawn(Script::new().suspend(Suspend::Sleep(ms(2))).then({
            let log = log.clone();
            move |_| {
                log.borrow_mut().push("slept");
                Ok(None)
            }
        }));
        sched.spawn(make("quick"));
        sched.run_until_idle();
        crate::assert_with_log!(
            *log.borrow() == vec!["quick", "slept"],
            "all tasks finished",
            vec!["quick", "slept"],
            log.borrow().clone()
        );
        assert!(sched.is_stopped());
        crate::test_complete!("run_until_idle_drains_tasks");
    }

    #[test]
    fn stop_from_inside_a_task_ends_run() {
        let sched = Scheduler::with_config(SchedulerConfig::new().idle_tick(ms(1)).busy_tick(ms(1)));
        let mut ticks = 0;
        sched.spawn(from_fn(move |cx| {
            ticks += 1;
            if ticks == 3 {
                cx.scheduler().stop();
            }
            Ok(Step::Yield(Suspend::Yield))
        }));
        sched.run();
        assert!(sched.is_stopped());
        assert_eq!(sched.live_task_count(), 1);
    }

    #[test]
    fn current_task_is_set_only_while_stepping() {
        let sched = Scheduler::new();
        let seen = Rc::new(Cell::new(None));
        let out = seen.clone();
        let id = sched.spawn(from_fn(move |cx| {
            out.set(cx.scheduler().current_task());
            Ok(Step::Done)
        }));
        assert_eq!(sched.current_task(), None);
        sched.tick();
        assert_eq!(seen.get(), Some(id));
        assert_eq!(sched.current_task(), None);
    }

    #[test]
    fn named_tasks_report_their_name() {
        let sched = Scheduler::new();
        let id = sched.spawn_named("loader", from_fn(|_| Ok(Step::Yield(Suspend::Callback))));
        sched.tick();
        assert_eq!(sched.name(id).as_deref(), Some("loader"));
        sched.close(id);
        assert_eq!(sched.name(id), None);
    }
}
