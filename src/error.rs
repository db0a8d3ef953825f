//! Error types and error handling strategy for cosched.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - The scheduler never raises to the caller of [`tick`](crate::Scheduler::tick);
//!   failures are contained to the task that produced them
//! - Panics inside task bodies are isolated and converted to
//!   [`ErrorKind::TaskPanicked`]
//!
//! # Error Categories
//!
//! - **Protocol**: misuse of the suspension protocol or of a primitive owned
//!   by another task
//! - **Timeout**: a deadline fired and the waiter asked for throw semantics
//! - **Task**: failures raised by task bodies, wrapped as [`ErrorKind::TaskFailed`]
//! - **Runtime**: failures of the runtime itself (thread spawn)
//! - **User**: user-provided errors

use core::fmt;
use std::any::Any;
use std::sync::Arc;

use crate::types::TaskId;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Protocol ===
    /// A task suspended on a foreign completion while one was already pending.
    ProtocolViolation,
    /// A primitive was driven by a task that does not own it.
    NotOwner,

    // === Timeout ===
    /// A timeout fired and the caller requested throw-on-timeout semantics.
    Timeout,

    // === Task ===
    /// A task body returned an error.
    TaskFailed,
    /// A task body panicked.
    TaskPanicked,

    // === Runtime ===
    /// Background execution could not be started.
    Spawn,

    // === User ===
    /// User-provided error.
    User,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::ProtocolViolation | Self::NotOwner => ErrorCategory::Protocol,
            Self::Timeout => ErrorCategory::Timeout,
            Self::TaskFailed | Self::TaskPanicked => ErrorCategory::Task,
            Self::Spawn => ErrorCategory::Runtime,
            Self::User => ErrorCategory::User,
        }
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Suspension protocol and ownership failures.
    Protocol,
    /// Deadline failures.
    Timeout,
    /// Task body failures.
    Task,
    /// Runtime failures.
    Runtime,
    /// User-originated errors.
    User,
}

/// The main error type for cosched operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    task: Option<TaskId>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            task: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns true if this error is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Returns true if this error is a suspension-protocol or ownership failure.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(self.kind.category(), ErrorCategory::Protocol)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Records the task the error is attributed to.
    #[must_use]
    pub fn with_task(mut self, task: TaskId) -> Self {
        self.task = Some(task);
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the task the error is attributed to, if any.
    #[must_use]
    pub const fn task(&self) -> Option<TaskId> {
        self.task
    }

    /// Creates a protocol violation error.
    #[must_use]
    pub fn protocol_violation(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolViolation).with_message(detail)
    }

    /// Creates an ownership error for a primitive driven by the wrong task.
    #[must_use]
    pub fn not_owner(owner: TaskId, caller: TaskId) -> Self {
        Self::new(ErrorKind::NotOwner)
            .with_message(format!("owned by {owner}, driven by {caller}"))
            .with_task(caller)
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::new(ErrorKind::Timeout)
    }

    /// Creates a task failure error.
    #[must_use]
    pub fn task_failed(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::TaskFailed).with_message(detail)
    }

    /// Creates a task panic error from a panic message.
    #[must_use]
    pub fn task_panicked(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::TaskPanicked).with_message(detail)
    }

    /// Creates a user error.
    #[must_use]
    pub fn user(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(detail)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Extension trait for adding context to Results.
#[allow(clippy::result_large_err)]
pub trait ResultExt<T> {
    /// Attach a context message on error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
    /// Attach context message computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_message(msg))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_message(f()))
    }
}

/// A specialized Result type for cosched operations.
#[allow(clippy::result_large_err)]
pub type Result<T> = core::result::Result<T, Error>;

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
