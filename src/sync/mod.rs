//! Synchronization primitives for cooperative tasks.
//!
//! # Primitives
//!
//! - [`Event`]: single-slot wait/notify; once set, stays set until cleared
//! - [`Timeout`]: a deadline bound to one task that forces it back onto
//!   the ready queue when it expires
//!
//! Both are scheduler-thread objects (`!Send`). Operations that wake tasks
//! take the [`Scheduler`](crate::Scheduler) explicitly.

mod event;
mod timeout;

pub use event::Event;
pub use timeout::Timeout;
