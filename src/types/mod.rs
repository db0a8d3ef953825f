//! Core types for the cosched runtime.
//!
//! - [`id`]: Identifier types (`TaskId`, `WorkHandle`)

pub mod id;

pub use id::{TaskId, WorkHandle};
