//! Scheduler runtime.
//!
//! - [`Scheduler`]: task registry, ready queue, timers, tick loop
//! - [`Clock`] / [`ManualClock`]: time sources for elapsed time
//! - [`Completer`]: cross-thread completion of foreign work
//!
//! The remaining modules are internal: the admission queue shared with
//! background threads, the deadline-ordered timer list, the task table, and
//! the continuation flattener.

mod admission;
mod clock;
mod flatten;
mod scheduler;
mod task_table;
mod timer;

pub use admission::{Completer, LogSink};
pub use clock::{Clock, ManualClock};
pub use scheduler::Scheduler;

pub(crate) use scheduler::TimerTarget;
