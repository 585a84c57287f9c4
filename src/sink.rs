//! Error sinks that present task failures to the user.

use crate::error::TaskError;

/// Presents errors that reach a task unit's default exception display.
///
/// Implemented for any `Fn(&TaskError) + Send + Sync` closure.
///
/// # Examples
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use apptask::{ErrorSink, TaskError};
///
/// let shown = Arc::new(Mutex::new(Vec::new()));
/// let record = shown.clone();
/// let sink = move |err: &TaskError| record.lock().unwrap().push(err.to_string());
///
/// sink.present(&TaskError::MissingAction);
/// assert_eq!(shown.lock().unwrap().len(), 1);
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait ErrorSink: Send + Sync {
    /// Shows `error` to the user.
    fn present(&self, error: &TaskError);
}

impl<F> ErrorSink for F
where
    F: Fn(&TaskError) + Send + Sync,
{
    fn present(&self, error: &TaskError) {
        self(error);
    }
}

/// Presents errors as `tracing` error events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn present(&self, error: &TaskError) {
        tracing::error!(error = %error, aggregate = error.is_aggregate(), "task failed");
    }
}
