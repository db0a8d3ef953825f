//! Combinators over tasks and suspensions.
//!
//! - [`sleep`], [`yield_now`]: park the current task for a while
//! - [`join`], [`join_all`]: wait for other tasks to close
//! - [`spawn_all`], [`join_all_then`]: batch start and batch completion
//! - [`invoke_after`]: run a closure once after a delay

pub mod delay;
pub mod join;

pub use delay::{invoke_after, sleep, yield_now};
pub use join::{join, join_all, join_all_then, spawn_all, Join, JoinAll};
