//! Running task units.
//!
//! [`TaskHandle`] is returned by [`AppTask::execute`](super::AppTask::execute).
//! The shared state behind it is also what a host lists as a
//! [`RunningTask`].
//!
//! # Concurrency
//!
//! Three parties touch a running unit: the caller (`execute`, `cancel`),
//! the continuation task awaiting the operation, and the one-shot
//! visibility timer. A single mutex guards the lifecycle state and the host
//! registration decision. The continuation and `cancel()` both try the
//! `Running -> Completing` transition under that mutex; the winner tears
//! down and dispatches, the loser does nothing. The timer only adds the
//! unit to its host while the state is still `Running`, so a unit is never
//! listed after teardown has begun.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::operation::{
    CanceledCallback, CompleteCallback, ExceptionCallback, OperationError,
};
use super::state::{TaskState, Termination};
use super::TaskId;
use crate::blocking::BlockSet;
use crate::error::{panic_message, BoxError, TaskError};
use crate::host::{HostRef, RunningTask};
use crate::sink::ErrorSink;

/// Where failures go: the error sink (unless replaced) and the caller's
/// exception callback.
pub(crate) struct ExceptionRoute {
    pub(crate) sink: Arc<dyn ErrorSink>,
    pub(crate) show_default: bool,
    pub(crate) callback: Mutex<Option<ExceptionCallback>>,
}

struct Core {
    state: TaskState,
    timer: Option<JoinHandle<()>>,
}

/// State shared between the handle, the continuation, the timer and the host.
pub(crate) struct Shared {
    id: TaskId,
    title: Option<String>,
    can_cancel: bool,
    started_at: DateTime<Utc>,
    token: CancellationToken,
    host: Option<HostRef>,
    targets: BlockSet,
    exceptions: ExceptionRoute,
    on_canceled: Mutex<Option<CanceledCallback>>,
    core: Mutex<Core>,
    termination: watch::Sender<Option<Termination>>,
}

/// Everything [`Shared`] is built from.
pub(crate) struct SharedParts {
    pub(crate) id: TaskId,
    pub(crate) title: Option<String>,
    pub(crate) can_cancel: bool,
    pub(crate) token: CancellationToken,
    pub(crate) host: Option<HostRef>,
    pub(crate) targets: BlockSet,
    pub(crate) exceptions: ExceptionRoute,
    pub(crate) on_canceled: Option<CanceledCallback>,
}

impl Shared {
    pub(crate) fn new(parts: SharedParts) -> Arc<Self> {
        let (termination, _) = watch::channel(None);
        Arc::new(Self {
            id: parts.id,
            title: parts.title,
            can_cancel: parts.can_cancel,
            started_at: Utc::now(),
            token: parts.token,
            host: parts.host,
            targets: parts.targets,
            exceptions: parts.exceptions,
            on_canceled: Mutex::new(parts.on_canceled),
            core: Mutex::new(Core {
                state: TaskState::Configured,
                timer: None,
            }),
            termination,
        })
    }

    fn transition(&self, core: &mut Core, next: TaskState) -> bool {
        match core.state.validate_transition(&self.id.to_string(), &next) {
            Ok(()) => {
                tracing::trace!(task_id = %self.id, from = %core.state, to = %next, "task state transition");
                core.state = next;
                true
            },
            Err(e) => {
                tracing::error!(task_id = %self.id, error = %e, "rejected task state transition");
                false
            },
        }
    }

    /// The operation never started. Nothing was blocked, so nothing is
    /// unblocked.
    pub(crate) fn fail_to_start(&self, error: TaskError) {
        {
            let mut core = self.core.lock();
            self.transition(&mut core, TaskState::Done);
        }
        tracing::warn!(task_id = %self.id, title = ?self.title, error = %error, "task failed to start");
        self.route_exception(error);
        self.termination.send_replace(Some(Termination::StartFailed));
    }

    /// Applies the blocking protocol and arms the visibility timer.
    ///
    /// A threshold too large to represent as a deadline never lists the
    /// unit.
    pub(crate) fn begin(self: &Arc<Self>, runtime: &Handle, threshold: Duration) {
        let failures = self.targets.block();

        {
            let mut core = self.core.lock();
            if !self.transition(&mut core, TaskState::Running) {
                return;
            }
            let deadline = tokio::time::Instant::now().checked_add(threshold);
            match (self.host.is_some(), deadline) {
                (true, Some(deadline)) => {
                    let unit = Arc::clone(self);
                    core.timer = Some(runtime.spawn(async move {
                        tokio::time::sleep_until(deadline).await;
                        unit.register_with_host();
                    }));
                },
                (true, None) => {
                    tracing::debug!(task_id = %self.id, "visibility threshold out of range, task will not be listed");
                },
                (false, _) => {},
            }
            tracing::debug!(
                task_id = %self.id,
                title = ?self.title,
                threshold_ms = u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX),
                "task started"
            );
        }

        for failure in failures {
            self.route_exception(failure);
        }
    }

    /// Timer callback: list the unit in its host if it is still running.
    fn register_with_host(self: &Arc<Self>) {
        let core = self.core.lock();
        if core.state != TaskState::Running {
            tracing::trace!(task_id = %self.id, state = %core.state, "task finished before visibility threshold");
            return;
        }
        if let Some(host) = self.host.as_ref().and_then(HostRef::upgrade) {
            let unit: Arc<dyn RunningTask> = Arc::clone(self) as Arc<dyn RunningTask>;
            if host.tasks().add(unit) {
                tracing::debug!(task_id = %self.id, title = ?self.title, "task listed in host");
            }
        }
    }

    /// Wins `Running -> Completing`, or returns `false` if someone else did.
    fn try_begin_completion(&self) -> bool {
        let mut core = self.core.lock();
        if core.state != TaskState::Running {
            return false;
        }
        if !self.transition(&mut core, TaskState::Completing) {
            return false;
        }
        if let Some(timer) = core.timer.take() {
            timer.abort();
        }
        true
    }

    /// Reverses the blocking protocol. Only the completion winner calls this.
    ///
    /// Returns the targets that failed to restore, to be routed after the
    /// terminal callback.
    fn teardown(&self) -> Vec<TaskError> {
        if let Some(host) = self.host.as_ref().and_then(HostRef::upgrade) {
            if host.tasks().remove(self.id) {
                tracing::debug!(task_id = %self.id, "task removed from host");
            }
        }
        self.targets.unblock()
    }

    fn finish(&self, termination: Termination) {
        {
            let mut core = self.core.lock();
            self.transition(&mut core, TaskState::Done);
        }
        tracing::debug!(task_id = %self.id, title = ?self.title, termination = %termination, "task finished");
        self.termination.send_replace(Some(termination));
    }

    /// Awaits the operation, then tears down and dispatches exactly one
    /// terminal callback.
    pub(crate) async fn complete<T>(
        self: Arc<Self>,
        operation: JoinHandle<Result<T, OperationError>>,
        on_complete: Option<CompleteCallback<T>>,
    ) where
        T: Send + 'static,
    {
        let outcome = operation.await;

        if !self.try_begin_completion() {
            tracing::debug!(task_id = %self.id, "task already torn down by cancel, skipping completion");
            return;
        }
        let failures = self.teardown();

        let termination = match outcome {
            Ok(Ok(value)) => {
                if let Some(callback) = on_complete {
                    self.invoke_callback("on_complete", move || callback(value));
                }
                Termination::Completed
            },
            Ok(Err(OperationError::Faulted(causes))) => {
                self.route_exception(TaskError::from_causes(causes));
                Termination::Faulted
            },
            Ok(Err(OperationError::Canceled)) => {
                self.dispatch_canceled();
                Termination::Canceled
            },
            Err(join_error) if join_error.is_panic() => {
                self.route_exception(TaskError::from_panic(join_error.into_panic()));
                Termination::Faulted
            },
            Err(_) => {
                // Aborted by the runtime, e.g. during shutdown.
                self.dispatch_canceled();
                Termination::Canceled
            },
        };

        for failure in failures {
            self.route_exception(failure);
        }
        self.finish(termination);
    }

    /// UI-level cancellation: tear down now, regardless of whether the
    /// operation ever observes the token.
    pub(crate) fn cancel(&self) -> bool {
        if !self.can_cancel {
            tracing::trace!(task_id = %self.id, "cancel ignored, task is not cancellable");
            return false;
        }
        if !self.try_begin_completion() {
            tracing::trace!(task_id = %self.id, "cancel ignored, task is not running");
            return false;
        }

        self.token.cancel();
        let failures = self.teardown();
        self.dispatch_canceled();
        for failure in failures {
            self.route_exception(failure);
        }
        self.finish(Termination::Canceled);
        true
    }

    fn dispatch_canceled(&self) {
        let callback = self.on_canceled.lock().take();
        if let Some(callback) = callback {
            self.invoke_callback("on_canceled", callback);
        }
    }

    /// Runs a terminal callback, rerouting errors and panics to the
    /// exception path.
    fn invoke_callback<F>(&self, name: &'static str, callback: F)
    where
        F: FnOnce() -> Result<(), BoxError>,
    {
        let source = match catch_unwind(AssertUnwindSafe(callback)) {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(payload) => BoxError::from(panic_message(payload)),
        };
        tracing::warn!(task_id = %self.id, callback = name, error = %source, "task callback failed");
        self.route_exception(TaskError::Callback {
            callback: name,
            source,
        });
    }

    /// The single exception funnel.
    fn route_exception(&self, error: TaskError) {
        if self.exceptions.show_default {
            let sink = &self.exceptions.sink;
            if catch_unwind(AssertUnwindSafe(|| sink.present(&error))).is_err() {
                tracing::error!(task_id = %self.id, error = %error, "error sink panicked");
            }
        }

        let callback = self.exceptions.callback.lock().take();
        if let Some(callback) = callback {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(move || callback(error))) {
                tracing::error!(
                    task_id = %self.id,
                    panic = %panic_message(payload),
                    "exception callback panicked"
                );
            }
        }
    }
}

impl RunningTask for Shared {
    fn id(&self) -> TaskId {
        self.id
    }

    fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    fn can_cancel(&self) -> bool {
        self.can_cancel
    }

    fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    fn cancel(&self) -> bool {
        Shared::cancel(self)
    }
}

/// A task unit that has been executed.
///
/// Cloning the handle is cheap; all clones observe the same unit.
/// Dropping every handle does not stop the unit.
#[derive(Clone)]
pub struct TaskHandle {
    shared: Arc<Shared>,
}

impl TaskHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Identity of the unit, as listed in its host.
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    /// The informational description.
    pub fn title(&self) -> Option<&str> {
        self.shared.title.as_deref()
    }

    /// Whether [`cancel`](Self::cancel) does anything.
    pub fn can_cancel(&self) -> bool {
        self.shared.can_cancel
    }

    /// When `execute` was called.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.shared.started_at
    }

    /// The token the operation can observe for cooperative cancellation.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.token.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.shared.core.lock().state
    }

    /// Returns `true` once teardown has begun.
    pub fn is_complete(&self) -> bool {
        self.state().is_complete()
    }

    /// How the unit ended, if it has.
    pub fn termination(&self) -> Option<Termination> {
        *self.shared.termination.borrow()
    }

    /// Cancels the unit.
    ///
    /// A no-op returning `false` unless the unit was configured with
    /// `cancellable()` and is still running. Otherwise the cancellation
    /// token is triggered, the unit is torn down (removed from its host,
    /// every target unblocked) and `on_canceled` runs, all before this
    /// returns. The operation itself stops only if it observes the token.
    pub fn cancel(&self) -> bool {
        self.shared.cancel()
    }

    /// Waits until the unit is done and its terminal callback has run.
    pub async fn wait(&self) -> Termination {
        let mut rx = self.shared.termination.subscribe();
        let termination = rx.wait_for(Option::is_some).await.ok().and_then(|t| *t);
        // The sender lives in `shared`, which this handle keeps alive.
        termination.unwrap_or(Termination::Canceled)
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.shared.id)
            .field("title", &self.shared.title)
            .field("state", &self.state())
            .field("can_cancel", &self.shared.can_cancel)
            .finish()
    }
}
