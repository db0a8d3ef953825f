//! Single-slot event with waiter list.
//!
//! [`Event`] holds either nothing or one value. Setting it admits every
//! registered waiter to the ready queue and runs the registered callbacks;
//! the value then stays in place, so later waiters complete without
//! suspending until the event is cleared.
//!
//! Clearing drops the waiter list without waking anyone. A task waiting at
//! that moment stays parked until something else (a timeout, an explicit
//! admission) resumes it.

use smallvec::SmallVec;
use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::rc::Rc;
use std::time::Duration;

use crate::continuation::{Continuation, Step, Suspend, Waitable, Waiter};
use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::runtime::Scheduler;
use crate::sync::Timeout;
use crate::types::TaskId;

enum Callback<T> {
    Persistent(Box<dyn FnMut(&Scheduler, &T)>),
    Once(Box<dyn FnOnce(&Scheduler, &T)>),
}

struct EventState<T> {
    value: Option<T>,
    /// Tasks to admit on the next set. SmallVec<4> covers the usual single
    /// joiner without allocating.
    waiters: SmallVec<[Waiter; 4]>,
    /// Set callbacks in registration order.
    callbacks: Vec<Callback<T>>,
}

struct EventInner<T> {
    state: RefCell<EventState<T>>,
}

impl<T> Waitable for EventInner<T> {
    fn is_set(&self) -> bool {
        self.state.borrow().value.is_some()
    }

    fn add_waiter(&self, waiter: Waiter) -> bool {
        let mut state = self.state.borrow_mut();
        if state.value.is_some() {
            return false;
        }
        state.waiters.push(waiter);
        true
    }
}

/// A single-slot event.
///
/// Clones share the same slot.
pub struct Event<T> {
    inner: Rc<EventInner<T>>,
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Event<T> {
    /// Creates an unset event.
    #[must_use]
    pub fn new() -> Self {
        Self::from_slot(None)
    }

    /// Creates an event that is already set.
    #[must_use]
    pub fn with_value(value: T) -> Self {
        Self::from_slot(Some(value))
    }

    fn from_slot(value: Option<T>) -> Self {
        Self {
            inner: Rc::new(EventInner {
                state: RefCell::new(EventState {
                    value,
                    waiters: SmallVec::new(),
                    callbacks: Vec::new(),
                }),
            }),
        }
    }

    /// Returns true if a value is stored.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.inner.is_set()
    }

    /// Returns the number of registered waiters.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.inner.state.borrow().waiters.len()
    }

    /// Resets to unset and drops the waiter list without waking anyone.
    pub fn clear(&self) {
        let dropped = {
            let mut state = self.inner.state.borrow_mut();
            state.value = None;
            mem::take(&mut state.waiters)
        };
        if !dropped.is_empty() {
            tracing::debug!(dropped = dropped.len(), "event cleared with waiters");
        }
    }

    /// Registers a callback run on every set.
    pub fn on_set<F>(&self, callback: F)
    where
        F: FnMut(&Scheduler, &T) + 'static,
    {
        self.inner
            .state
            .borrow_mut()
            .callbacks
            .push(Callback::Persistent(Box::new(callback)));
    }

    /// Registers a callback run on the next set only.
    pub fn on_set_once<F>(&self, callback: F)
    where
        F: FnOnce(&Scheduler, &T) + 'static,
    {
        self.inner
            .state
            .borrow_mut()
            .callbacks
            .push(Callback::Once(Box::new(callback)));
    }

    pub(crate) fn remove_waiter(&self, task: TaskId) -> bool {
        let mut state = self.inner.state.borrow_mut();
        match state.waiters.iter().position(|w| w.task() == task) {
            Some(index) => {
                state.waiters.remove(index);
                true
            }
            None => false,
        }
    }
}

impl<T: 'static> Event<T> {
    /// Returns this event as a type-erased waitable.
    #[must_use]
    pub fn as_waitable(&self) -> Rc<dyn Waitable> {
        self.inner.clone()
    }

    /// Waits until the event is set, for at most `timeout`.
    ///
    /// Completes without suspending if already set. A zero `timeout` waits
    /// indefinitely. After a timed-out wait the event is still unset and
    /// the task's timeout marker is pending; check it with
    /// [`Cx::is_timeout`].
    #[must_use]
    pub fn wait(&self, timeout: Duration) -> Suspend {
        Suspend::call(EventWait {
            event: self.clone(),
            timeout,
            state: WaitState::Start,
        })
    }
}

impl<T: Clone> Event<T> {
    /// Returns a clone of the stored value.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.inner.state.borrow().value.clone()
    }

    /// Returns the stored value, or `default` if unset.
    #[must_use]
    pub fn get_or(&self, default: T) -> T {
        self.get().unwrap_or(default)
    }

    /// Stores `value`, admits all current waiters, and runs the callbacks in
    /// registration order.
    ///
    /// A waiter whose task was already resumed by something else (its
    /// timeout, an explicit admission) is skipped.
    pub fn set(&self, scheduler: &Scheduler, value: T) {
        let (waiters, callbacks) = {
            let mut state = self.inner.state.borrow_mut();
            state.value = Some(value.clone());
            (
                mem::take(&mut state.waiters),
                mem::take(&mut state.callbacks),
            )
        };
        tracing::trace!(waiters = waiters.len(), callbacks = callbacks.len(), "event set");
        for waiter in waiters {
            scheduler.wake(waiter);
        }

        let mut kept = Vec::with_capacity(callbacks.len());
        for callback in callbacks {
            match callback {
                Callback::Persistent(mut f) => {
                    f(scheduler, &value);
                    kept.push(Callback::Persistent(f));
                }
                Callback::Once(f) => f(scheduler, &value),
            }
        }
        let mut state = self.inner.state.borrow_mut();
        kept.append(&mut state.callbacks);
        state.callbacks = kept;
    }
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Event")
            .field("set", &state.value.is_some())
            .field("waiters", &state.waiters.len())
            .field("callbacks", &state.callbacks.len())
            .finish()
    }
}

enum WaitState {
    Start,
    Waiting { task: TaskId, token: Option<Timeout> },
    Finished,
}

/// The continuation behind [`Event::wait`].
struct EventWait<T> {
    event: Event<T>,
    timeout: Duration,
    state: WaitState,
}

impl<T: 'static> Continuation for EventWait<T> {
    fn resume(&mut self, cx: &mut Cx<'_>) -> Result<Step> {
        match mem::replace(&mut self.state, WaitState::Finished) {
            WaitState::Start => {
                let task = cx.task_id();
                if !self.event.inner.add_waiter(cx.waiter()) {
                    return Ok(Step::Done);
                }
                let token = (!self.timeout.is_zero()).then(|| Timeout::start(cx, self.timeout));
                self.state = WaitState::Waiting { task, token };
                Ok(Step::Yield(Suspend::Callback))
            }
            WaitState::Waiting { task, token } => {
                if task != cx.task_id() {
                    return Err(Error::not_owner(task, cx.task_id()));
                }
                // Woken by the timeout or an explicit admission: leave the list.
                self.event.remove_waiter(task);
                if let Some(token) = token {
                    token.cancel(false)?;
                }
                Ok(Step::Done)
            }
            WaitState::Finished => Ok(Step::Done),
        }
    }
}
