//! Error types for app task orchestration.
//!
//! Every failure a task unit can run into (a factory that cannot start the
//! operation, an operation that faults, a callback that errors or panics)
//! is funnelled into a single [`TaskError`] and handed to the exception path.

use std::fmt;

use thiserror::Error;

use crate::task::state::TaskState;

/// Boxed error type accepted from operations and callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias for results carrying a [`TaskError`].
pub type Result<T> = std::result::Result<T, TaskError>;

/// Errors surfaced through a task unit's exception path.
///
/// # Examples
///
/// ```
/// use apptask::TaskError;
///
/// let err = TaskError::Panicked("boom".to_string());
/// assert_eq!(err.to_string(), "operation panicked: boom");
/// ```
#[derive(Error, Debug)]
pub enum TaskError {
    /// The operation factory failed before the operation could start.
    #[error("operation failed to start: {0}")]
    Start(#[source] BoxError),

    /// `execute` was called without an action configured.
    #[error("no action configured for task")]
    MissingAction,

    /// No tokio runtime was available to run the operation on.
    #[error("no tokio runtime available to execute task")]
    NoRuntime,

    /// The operation faulted with exactly one cause, surfaced unwrapped.
    #[error(transparent)]
    Failed(BoxError),

    /// The operation faulted with several causes.
    #[error(transparent)]
    Aggregate(AggregateError),

    /// The operation or the factory panicked.
    #[error("operation panicked: {0}")]
    Panicked(String),

    /// A completion or cancellation callback failed.
    #[error("{callback} callback failed: {source}")]
    Callback {
        /// Which callback failed (`on_complete`, `on_canceled`).
        callback: &'static str,
        /// The error returned by, or the panic raised in, the callback.
        #[source]
        source: BoxError,
    },

    /// A blocking target panicked while being blocked or restored.
    #[error("failed to {action} {target}: {source}")]
    Target {
        /// `block` or `unblock`.
        action: &'static str,
        /// Which target failed.
        target: String,
        /// The panic raised by the target.
        #[source]
        source: BoxError,
    },

    /// Attempted an invalid lifecycle transition.
    #[error("invalid transition from {from} to {to} for task {task_id}")]
    InvalidTransition {
        /// The task that was being transitioned.
        task_id: String,
        /// The state the task was in.
        from: TaskState,
        /// The state that was rejected.
        to: TaskState,
    },
}

impl TaskError {
    /// Builds the error for a faulted operation.
    ///
    /// A single cause is surfaced as [`TaskError::Failed`] so it is not
    /// wrapped twice. Any other number of causes becomes an
    /// [`AggregateError`].
    ///
    /// # Examples
    ///
    /// ```
    /// use apptask::{BoxError, TaskError};
    ///
    /// let single = TaskError::from_causes(vec![BoxError::from("disk full")]);
    /// assert!(matches!(single, TaskError::Failed(_)));
    /// assert_eq!(single.to_string(), "disk full");
    ///
    /// let many = TaskError::from_causes(vec![
    ///     BoxError::from("first"),
    ///     BoxError::from("second"),
    /// ]);
    /// assert!(matches!(many, TaskError::Aggregate(ref agg) if agg.len() == 2));
    /// ```
    pub fn from_causes(mut causes: Vec<BoxError>) -> Self {
        if causes.len() == 1 {
            if let Some(cause) = causes.pop() {
                return Self::Failed(cause);
            }
        }
        Self::Aggregate(AggregateError::new(causes))
    }

    /// Returns `true` if this error aggregates several causes.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Self::Aggregate(_))
    }

    /// Turns a panic payload into a [`TaskError::Panicked`].
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        Self::Panicked(panic_message(payload))
    }
}

/// Several errors raised by one faulted operation.
///
/// # Examples
///
/// ```
/// use apptask::{AggregateError, BoxError};
///
/// let agg = AggregateError::new(vec![BoxError::from("a"), BoxError::from("b")]);
/// assert_eq!(agg.len(), 2);
/// assert_eq!(agg.to_string(), "2 errors occurred: a; b");
/// ```
#[derive(Debug)]
pub struct AggregateError {
    errors: Vec<BoxError>,
}

impl AggregateError {
    /// Wraps the given causes.
    pub fn new(errors: Vec<BoxError>) -> Self {
        Self { errors }
    }

    /// The individual causes, in the order the operation reported them.
    pub fn errors(&self) -> &[BoxError] {
        &self.errors
    }

    /// Number of causes.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns `true` if there are no causes.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Consumes the aggregate, returning its causes.
    pub fn into_errors(self) -> Vec<BoxError> {
        self.errors
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.len() {
            0 => write!(f, "operation faulted without a reported cause"),
            n => {
                write!(f, "{n} errors occurred: ")?;
                for (i, err) in self.errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{err}")?;
                }
                Ok(())
            },
        }
    }
}

impl std::error::Error for AggregateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
