//! Operations run by task units and the callbacks around them.

use std::fmt;

use futures::future::BoxFuture;

use crate::error::{BoxError, TaskError};

/// How an operation can end without producing a value.
///
/// Any `std::error::Error` converts into a single-cause fault, so `?` works
/// inside operation futures.
///
/// # Examples
///
/// ```
/// use apptask::OperationError;
///
/// fn parse(input: &str) -> Result<u32, OperationError> {
///     Ok(input.parse::<u32>()?)
/// }
///
/// assert!(parse("12").is_ok());
/// assert!(matches!(parse("x"), Err(OperationError::Faulted(ref c)) if c.len() == 1));
/// assert!(OperationError::Canceled.is_canceled());
/// ```
pub enum OperationError {
    /// The operation failed with one or more causes.
    Faulted(Vec<BoxError>),
    /// The operation observed cancellation and stopped.
    Canceled,
}

impl OperationError {
    /// A fault with a single cause.
    pub fn fault(error: impl Into<BoxError>) -> Self {
        Self::Faulted(vec![error.into()])
    }

    /// A fault with several causes.
    pub fn aggregate<I>(errors: I) -> Self
    where
        I: IntoIterator<Item = BoxError>,
    {
        Self::Faulted(errors.into_iter().collect())
    }

    /// Returns `true` for [`OperationError::Canceled`].
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

impl<E> From<E> for OperationError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::fault(error)
    }
}

impl fmt::Debug for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Faulted(causes) => f.debug_tuple("Faulted").field(causes).finish(),
            Self::Canceled => write!(f, "Canceled"),
        }
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Faulted(causes) => write!(f, "operation faulted with {} cause(s)", causes.len()),
            Self::Canceled => write!(f, "operation canceled"),
        }
    }
}

/// Return types accepted from completion and cancellation callbacks.
///
/// Callbacks may return `()` or `Result<(), E>`; an `Err` is routed to the
/// unit's exception path.
pub trait CallbackResult {
    /// Normalizes the callback's return value.
    fn into_result(self) -> Result<(), BoxError>;
}

impl CallbackResult for () {
    fn into_result(self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<E> CallbackResult for Result<(), E>
where
    E: Into<BoxError>,
{
    fn into_result(self) -> Result<(), BoxError> {
        self.map_err(Into::into)
    }
}

pub(crate) type OperationFuture<T> = BoxFuture<'static, Result<T, OperationError>>;

pub(crate) type OperationFactory<T> =
    Box<dyn FnOnce() -> Result<OperationFuture<T>, BoxError> + Send>;

pub(crate) type CompleteCallback<T> = Box<dyn FnOnce(T) -> Result<(), BoxError> + Send>;

pub(crate) type CanceledCallback = Box<dyn FnOnce() -> Result<(), BoxError> + Send>;

pub(crate) type ExceptionCallback = Box<dyn FnOnce(TaskError) + Send>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Offline;

    impl fmt::Display for Offline {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "offline")
        }
    }

    impl std::error::Error for Offline {}

    #[test]
    fn std_errors_become_single_faults() {
        let err: OperationError = Offline.into();
        match err {
            OperationError::Faulted(causes) => {
                assert_eq!(causes.len(), 1);
                assert_eq!(causes[0].to_string(), "offline");
            },
            OperationError::Canceled => panic!("expected fault"),
        }
    }

    #[test]
    fn aggregate_keeps_order() {
        let err = OperationError::aggregate(vec![BoxError::from("a"), BoxError::from("b")]);
        let OperationError::Faulted(causes) = err else {
            panic!("expected fault");
        };
        let messages: Vec<String> = causes.iter().map(ToString::to_string).collect();
        assert_eq!(messages, vec!["a", "b"]);
    }

    #[test]
    fn callback_results() {
        assert!(().into_result().is_ok());
        assert!(Ok::<(), BoxError>(()).into_result().is_ok());
        let err = Err::<(), _>("bad").into_result().unwrap_err();
        assert_eq!(err.to_string(), "bad");
    }

    #[test]
    fn display() {
        assert_eq!(OperationError::Canceled.to_string(), "operation canceled");
        assert_eq!(
            OperationError::fault("x").to_string(),
            "operation faulted with 1 cause(s)"
        );
    }
}
