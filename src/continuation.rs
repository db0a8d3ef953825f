//! Continuations and suspension values.
//!
//! A task is a [`Continuation`]: something the scheduler can resume one step
//! at a time. Each step either finishes ([`Step::Done`]) or yields a
//! [`Suspend`] value that tells the scheduler how to re-admit the task.
//!
//! Continuations nest. Yielding [`Suspend::Call`] hands a sub-continuation to
//! the task's flattener, which drives it to completion before returning to
//! the caller frame. The scheduler never sees `Call`; it only ever sees the
//! flat stream of suspensions produced at any depth.
//!
//! # Building continuations
//!
//! - [`from_fn`]: a closure polled once per step, carrying its own state
//! - [`Script`]: straight-line stages, each run once, optionally suspending
//! - [`sequence`]: a fixed list of suspensions yielded in order

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::cx::Cx;
use crate::error::Result;
use crate::offload::ForeignWork;
use crate::sync::Event;
use crate::types::TaskId;

/// The result of resuming a continuation once.
#[derive(Debug)]
pub enum Step {
    /// The continuation suspended with the given value.
    Yield(Suspend),
    /// The continuation finished.
    Done,
}

/// A resumable unit of sequential logic.
pub trait Continuation {
    /// Advances the continuation by one step.
    ///
    /// Errors end the whole task, not only this frame.
    fn resume(&mut self, cx: &mut Cx<'_>) -> Result<Step>;
}

impl<C: Continuation + ?Sized> Continuation for Box<C> {
    fn resume(&mut self, cx: &mut Cx<'_>) -> Result<Step> {
        (**self).resume(cx)
    }
}

/// A task registered on a [`Waitable`], stamped with the step it
/// registered from.
///
/// [`Scheduler::wake`](crate::Scheduler::wake) admits a waiter only while its
/// task is still parked in that step. Once the task has been resumed by
/// anything else the registration is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
    task: TaskId,
    step: u64,
}

impl Waiter {
    pub(crate) const fn new(task: TaskId, step: u64) -> Self {
        Self { task, step }
    }

    /// The registered task.
    #[must_use]
    pub const fn task(&self) -> TaskId {
        self.task
    }

    pub(crate) const fn step(&self) -> u64 {
        self.step
    }
}

/// Something a task can block on until it becomes set.
///
/// Implemented by [`Event`]; hosts may implement it for their own
/// single-shot signals and hand stored waiters to
/// [`Scheduler::wake`](crate::Scheduler::wake) when they fire.
pub trait Waitable {
    /// Returns true if waiting would complete immediately.
    fn is_set(&self) -> bool;

    /// Registers `waiter` to be admitted when the waitable is set.
    ///
    /// Returns false (without registering) if already set.
    fn add_waiter(&self, waiter: Waiter) -> bool;
}

/// A value yielded by a task at a suspension point.
pub enum Suspend {
    /// Yield for one tick: re-admit on the next tick.
    Yield,
    /// Park until something else admits the task (event set, timer, timeout).
    Callback,
    /// Park for the given duration.
    Sleep(Duration),
    /// Park until a unit of background work completes.
    Foreign(ForeignWork),
    /// Park until another task closes.
    Join(TaskId),
    /// Park until a waitable is set.
    Wait(Rc<dyn Waitable>),
    /// Drive a nested continuation to completion, then resume this frame.
    Call(Box<dyn Continuation>),
    /// A host-native awaitable, interpreted by the registered recognizer.
    Host(Box<dyn Any>),
}

impl Suspend {
    /// Wraps a nested continuation.
    pub fn call(continuation: impl Continuation + 'static) -> Self {
        Self::Call(Box::new(continuation))
    }

    /// Waits on an event without a timeout.
    pub fn wait<T: Clone + 'static>(event: &Event<T>) -> Self {
        Self::Wait(event.as_waitable())
    }

    /// Joins another task without a timeout.
    #[must_use]
    pub const fn join(task: TaskId) -> Self {
        Self::Join(task)
    }

    /// Wraps a host-native awaitable.
    pub fn host(value: impl Any) -> Self {
        Self::Host(Box::new(value))
    }

    /// Returns a short name for the suspension kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Yield => "yield",
            Self::Callback => "callback",
            Self::Sleep(_) => "sleep",
            Self::Foreign(_) => "foreign",
            Self::Join(_) => "join",
            Self::Wait(_) => "wait",
            Self::Call(_) => "call",
            Self::Host(_) => "host",
        }
    }
}

impl fmt::Debug for Suspend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sleep(d) => f.debug_tuple("Sleep").field(d).finish(),
            Self::Join(t) => f.debug_tuple("Join").field(t).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// Adapter that polls a closure once per step.
pub struct FnContinuation<F>(F);

/// Builds a continuation from a closure.
///
/// The closure is called once per resume and keeps whatever state it needs
/// in its captures.
pub fn from_fn<F>(f: F) -> FnContinuation<F>
where
    F: FnMut(&mut Cx<'_>) -> Result<Step>,
{
    FnContinuation(f)
}

impl<F> Continuation for FnContinuation<F>
where
    F: FnMut(&mut Cx<'_>) -> Result<Step>,
{
    fn resume(&mut self, cx: &mut Cx<'_>) -> Result<Step> {
        (self.0)(cx)
    }
}

type Stage = Box<dyn FnOnce(&mut Cx<'_>) -> Result<Option<Suspend>>>;

/// Straight-line stages run in order.
///
/// Each stage runs exactly once. A stage that returns `Some(suspend)` ends
/// the current step; the next stage runs when the task is resumed. A stage
/// returning `None` falls through to the next stage in the same step.
#[derive(Default)]
pub struct Script {
    stages: VecDeque<Stage>,
}

impl Script {
    /// Creates an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage.
    #[must_use]
    pub fn then<F>(mut self, stage: F) -> Self
    where
        F: FnOnce(&mut Cx<'_>) -> Result<Option<Suspend>> + 'static,
    {
        self.stages.push_back(Box::new(stage));
        self
    }

    /// Appends a stage that only suspends.
    #[must_use]
    pub fn suspend(self, suspend: Suspend) -> Self {
        self.then(move |_| Ok(Some(suspend)))
    }

    /// Returns the number of stages not yet run.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.stages.len()
    }
}

impl Continuation for Script {
    fn resume(&mut self, cx: &mut Cx<'_>) -> Result<Step> {
        while let Some(stage) = self.stages.pop_front() {
            if let Some(suspend) = stage(cx)? {
                return Ok(Step::Yield(suspend));
            }
        }
        Ok(Step::Done)
    }
}

/// A fixed list of suspensions yielded one per step.
pub struct Sequence {
    items: VecDeque<Suspend>,
}

/// Builds a continuation that yields each item in order, then finishes.
pub fn sequence(items: impl IntoIterator<Item = Suspend>) -> Sequence {
    Sequence {
        items: items.into_iter().collect(),
    }
}

impl Continuation for Sequence {
    fn resume(&mut self, _cx: &mut Cx<'_>) -> Result<Step> {
        Ok(self.items.pop_front().map_or(Step::Done, Step::Yield))
    }
}
