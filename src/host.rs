//! Hosts that display long-running task units.
//!
//! A [`TaskHost`] owns a [`TaskList`]. A task unit bound to a host adds
//! itself to that list once it has been running longer than its visibility
//! threshold, and removes itself on teardown. Units keep only a weak
//! reference to their host.
//!
//! # Concurrency
//!
//! `TaskList` is guarded by a `parking_lot::Mutex`. Every change is also
//! published as a [`TaskListEvent`] so a UI surface can follow along
//! without polling.

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::blocking::Blockable;
use crate::task::TaskId;

/// Capacity of the change-event channel of a [`TaskList`].
const EVENT_CAPACITY: usize = 64;

/// A collection owner interested in long-running task units.
///
/// # Examples
///
/// ```
/// use apptask::{TaskHost, TaskList};
///
/// #[derive(Default)]
/// struct MainWindow {
///     tasks: TaskList,
/// }
///
/// impl TaskHost for MainWindow {
///     fn tasks(&self) -> &TaskList {
///         &self.tasks
///     }
/// }
///
/// let window = MainWindow::default();
/// assert!(window.tasks().is_empty());
/// assert!(window.as_blockable().is_none());
/// ```
pub trait TaskHost: Send + Sync {
    /// The list of currently visible long-running units.
    fn tasks(&self) -> &TaskList;

    /// The host's blocking capability, if it has one.
    ///
    /// Hosts returning `Some` can be blocked by `AppTask::block_host`.
    fn as_blockable(&self) -> Option<&dyn Blockable> {
        None
    }
}

/// A non-owning reference to a [`TaskHost`].
#[derive(Clone)]
pub struct HostRef(Weak<dyn TaskHost>);

impl HostRef {
    /// Returns the host if it is still alive.
    pub fn upgrade(&self) -> Option<Arc<dyn TaskHost>> {
        self.0.upgrade()
    }
}

impl<H: TaskHost + 'static> From<&Arc<H>> for HostRef {
    fn from(host: &Arc<H>) -> Self {
        let weak: Weak<dyn TaskHost> = Arc::downgrade(host) as Weak<dyn TaskHost>;
        Self(weak)
    }
}

impl From<Weak<dyn TaskHost>> for HostRef {
    fn from(weak: Weak<dyn TaskHost>) -> Self {
        Self(weak)
    }
}

impl fmt::Debug for HostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostRef")
            .field("alive", &(self.0.strong_count() > 0))
            .finish()
    }
}

/// Blocks a host through its [`TaskHost::as_blockable`] capability without
/// keeping the host alive.
pub(crate) struct HostBlocker(pub(crate) HostRef);

impl Blockable for HostBlocker {
    fn block(&self) {
        if let Some(host) = self.0.upgrade() {
            if let Some(blockable) = host.as_blockable() {
                blockable.block();
            }
        }
    }

    fn unblock(&self) {
        if let Some(host) = self.0.upgrade() {
            if let Some(blockable) = host.as_blockable() {
                blockable.unblock();
            }
        }
    }
}

/// The view of a running unit that a host can display and act on.
pub trait RunningTask: Send + Sync {
    /// Identity of the unit.
    fn id(&self) -> TaskId;

    /// Informational description, if one was set.
    fn title(&self) -> Option<&str>;

    /// Whether [`cancel`](Self::cancel) does anything.
    fn can_cancel(&self) -> bool;

    /// When `execute` was called.
    fn started_at(&self) -> DateTime<Utc>;

    /// Requests cancellation. Returns `true` if this call tore the unit down.
    fn cancel(&self) -> bool;
}

/// A change to a [`TaskList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskListEvent {
    /// A unit became visible.
    Added(TaskId),
    /// A unit was removed.
    Removed(TaskId),
}

/// The collection of visible long-running units owned by a host.
///
/// # Examples
///
/// ```
/// use apptask::TaskList;
///
/// let list = TaskList::new();
/// let mut events = list.subscribe();
/// assert_eq!(list.len(), 0);
/// assert!(events.try_recv().is_err());
/// ```
pub struct TaskList {
    entries: Mutex<Vec<Arc<dyn RunningTask>>>,
    events: broadcast::Sender<TaskListEvent>,
}

impl TaskList {
    /// Creates an empty list.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Adds `task` unless a unit with the same id is already listed.
    pub fn add(&self, task: Arc<dyn RunningTask>) -> bool {
        let id = task.id();
        {
            let mut entries = self.entries.lock();
            if entries.iter().any(|t| t.id() == id) {
                return false;
            }
            entries.push(task);
        }
        // No receivers is fine.
        let _ = self.events.send(TaskListEvent::Added(id));
        true
    }

    /// Removes the unit with `id`. Returns `true` if it was listed.
    pub fn remove(&self, id: TaskId) -> bool {
        let removed = {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|t| t.id() != id);
            entries.len() != before
        };
        if removed {
            let _ = self.events.send(TaskListEvent::Removed(id));
        }
        removed
    }

    /// Returns `true` if the unit with `id` is listed.
    pub fn contains(&self, id: TaskId) -> bool {
        self.entries.lock().iter().any(|t| t.id() == id)
    }

    /// Number of listed units.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing is listed.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// A copy of the current entries, in insertion order.
    pub fn snapshot(&self) -> Vec<Arc<dyn RunningTask>> {
        self.entries.lock().clone()
    }

    /// Subscribes to future changes.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskListEvent> {
        self.events.subscribe()
    }
}

impl Default for TaskList {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<TaskId> = self.entries.lock().iter().map(|t| t.id()).collect();
        f.debug_struct("TaskList").field("entries", &ids).finish()
    }
}
