//! Cooperative single-threaded task scheduler.
//!
//! Tasks are [`Continuation`]s: sequential logic that suspends at explicit
//! points by yielding a [`Suspend`] value. The [`Scheduler`] resumes them one
//! step at a time from a host-driven [`tick`](Scheduler::tick), parks them on
//! timers, [`Event`]s, other tasks or background work, and re-admits them
//! when the thing they wait on happens.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use cosched::{combinator::sleep, Scheduler, Script};
//!
//! let sched = Scheduler::new();
//! let task = sched.spawn(
//!     Script::new()
//!         .suspend(sleep(Duration::from_millis(1)))
//!         .then(|cx| {
//!             println!("{} woke at {:?}", cx.task_id(), cx.elapsed());
//!             Ok(None)
//!         }),
//! );
//! sched.run_until_complete(task);
//! assert!(!sched.is_alive(task));
//! ```
//!
//! # Threads
//!
//! One scheduler lives on one thread. Background work started with
//! [`offload::run_offloaded`] or [`offload::offload`] reports back through a
//! [`Completer`], the only scheduler handle that is `Send`.

#![forbid(unsafe_code)]

pub mod combinator;
pub mod config;
pub mod continuation;
pub mod cx;
pub mod error;
pub mod offload;
pub mod runtime;
pub mod sync;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{ConfigError, SchedulerConfig};
pub use continuation::{from_fn, sequence, Continuation, Script, Sequence, Step, Suspend, Waitable, Waiter};
pub use cx::Cx;
pub use error::{Error, ErrorCategory, ErrorKind, Result, ResultExt};
pub use offload::{offload, run_offloaded, ForeignWork, WorkError, WorkResult};
pub use runtime::{Clock, Completer, LogSink, ManualClock, Scheduler};
pub use sync::{Event, Timeout};
pub use types::{TaskId, WorkHandle};
