//! Task units: configuration, execution, and lifecycle.
//!
//! - [`AppTask`] is the fluent builder. It is consumed by
//!   [`execute`](AppTask::execute).
//! - [`TaskHandle`] is the view of a unit that has been executed. It is
//!   the only way to cancel a unit.
//! - [`state`] holds the lifecycle state machine.

pub mod builder;
pub mod handle;
pub mod operation;
pub mod state;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use builder::{AppTask, ExceptionDisplay};
pub use handle::TaskHandle;
pub use operation::{CallbackResult, OperationError};
pub use state::{TaskState, Termination};

/// Identity of a task unit.
///
/// # Examples
///
/// ```
/// use apptask::TaskId;
///
/// let a = TaskId::new();
/// let b = TaskId::new();
/// assert_ne!(a, b);
/// assert_eq!(a.to_string().len(), 36);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generates a random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
