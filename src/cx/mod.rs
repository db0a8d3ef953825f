//! Per-step task context.
//!
//! A [`Cx`] is handed to a continuation every time it is resumed. It names
//! the task being driven and carries the scheduler handle, so primitives
//! never reach for ambient state to find out who is running.

#[allow(clippy::module_inception)]
mod cx;

pub use cx::Cx;
