//! Task unit lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Lifecycle state of a task unit.
///
/// # State Machine
///
/// ```text
/// Configured -> Running, Done
/// Running    -> Completing
/// Completing -> Done
/// Done       -> (terminal, no transitions)
/// ```
///
/// `Configured -> Done` is taken only when the operation fails to start.
/// The continuation and `cancel()` both race for `Running -> Completing`;
/// only the winner tears down and dispatches a callback.
///
/// # Examples
///
/// ```
/// use apptask::TaskState;
///
/// assert!(TaskState::Running.can_transition_to(&TaskState::Completing));
/// assert!(!TaskState::Completing.can_transition_to(&TaskState::Completing));
/// assert!(TaskState::Done.is_terminal());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Built but not executed yet.
    Configured,
    /// Operation in flight, blocking targets are blocked.
    Running,
    /// Teardown and callback dispatch are in progress.
    Completing,
    /// Terminal.
    Done,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configured => write!(f, "configured"),
            Self::Running => write!(f, "running"),
            Self::Completing => write!(f, "completing"),
            Self::Done => write!(f, "done"),
        }
    }
}

impl TaskState {
    /// Returns `true` for [`TaskState::Done`].
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns `true` once teardown has started or finished.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Completing | Self::Done)
    }

    /// Returns `true` if moving from this state to `next` is allowed.
    pub fn can_transition_to(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (Self::Configured, Self::Running)
                | (Self::Configured, Self::Done)
                | (Self::Running, Self::Completing)
                | (Self::Completing, Self::Done)
        )
    }

    /// Validates a transition, returning [`TaskError::InvalidTransition`]
    /// when it is not allowed.
    ///
    /// # Examples
    ///
    /// ```
    /// use apptask::TaskState;
    ///
    /// assert!(TaskState::Configured
    ///     .validate_transition("t1", &TaskState::Running)
    ///     .is_ok());
    /// assert!(TaskState::Done
    ///     .validate_transition("t1", &TaskState::Running)
    ///     .is_err());
    /// ```
    pub fn validate_transition(&self, task_id: &str, next: &Self) -> Result<(), TaskError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(TaskError::InvalidTransition {
                task_id: task_id.to_string(),
                from: *self,
                to: *next,
            })
        }
    }
}

/// How a task unit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The operation produced a value.
    Completed,
    /// The operation faulted or panicked.
    Faulted,
    /// The operation reported cancellation, or `cancel()` tore the unit down.
    Canceled,
    /// The operation never started.
    StartFailed,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Faulted => write!(f, "faulted"),
            Self::Canceled => write!(f, "canceled"),
            Self::StartFailed => write!(f, "start_failed"),
        }
    }
}
