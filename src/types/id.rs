//! Identifier types for runtime entities.
//!
//! Both identifiers are opaque, monotonically assigned, and never reused
//! within one scheduler, so a stale identifier can be told apart from a
//! live one by a registry lookup alone.

use core::fmt;

/// Identity of a registered task.
///
/// Registration is liveness: once the task closes, its id is removed from
/// the scheduler's registry and every operation that targets it becomes a
/// no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Creates a task id for tests.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Correlation token for a unit of foreign work.
///
/// Recorded against the owning task when it suspends on the work; a
/// completion carrying any other handle is stale and is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkHandle(u64);

impl WorkHandle {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "W{}", self.0)
    }
}
