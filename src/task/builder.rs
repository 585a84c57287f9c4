//! Fluent configuration of a task unit.

use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::handle::{ExceptionRoute, Shared, SharedParts, TaskHandle};
use super::operation::{
    CallbackResult, CanceledCallback, CompleteCallback, ExceptionCallback, OperationError,
    OperationFactory,
};
use super::TaskId;
use crate::blocking::{BlockSet, Blockable, PropertySetter};
use crate::config::TaskConfig;
use crate::error::{panic_message, BoxError, TaskError};
use crate::host::{HostBlocker, HostRef, TaskHost};
use crate::sink::ErrorSink;

/// Whether an exception callback replaces the default error display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExceptionDisplay {
    /// Only the callback sees the error.
    #[default]
    Replace,
    /// The error sink presents the error and the callback also runs.
    Keep,
}

/// A configured, not yet executed task unit.
///
/// Every configuration method consumes and returns the builder. Setters
/// overwrite earlier values, except the `block*` methods, which add
/// targets. [`execute`](Self::execute) consumes the builder, so a unit
/// runs at most once.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
/// use apptask::{BoolProperty, PropertySetter, TaskFactory, Termination, TracingErrorSink};
///
/// struct ViewModel {
///     can_run: AtomicBool,
///     answer: AtomicU32,
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let vm = Arc::new(ViewModel {
///     can_run: AtomicBool::new(true),
///     answer: AtomicU32::new(0),
/// });
/// let factory = TaskFactory::new(Arc::new(TracingErrorSink));
///
/// let result = vm.clone();
/// let handle = factory
///     .from_action(|| async { Ok(42) })
///     .block_property(PropertySetter::weak(
///         BoolProperty::new(
///             "can_run",
///             |vm: &ViewModel| vm.can_run.load(Ordering::SeqCst),
///             |vm: &ViewModel, v| vm.can_run.store(v, Ordering::SeqCst),
///         ),
///         &vm,
///     ))
///     .description("Computing the answer")
///     .on_complete(move |value| result.answer.store(value, Ordering::SeqCst))
///     .execute();
///
/// assert!(!vm.can_run.load(Ordering::SeqCst));
/// assert_eq!(handle.wait().await, Termination::Completed);
/// assert!(vm.can_run.load(Ordering::SeqCst));
/// assert_eq!(vm.answer.load(Ordering::SeqCst), 42);
/// # }
/// ```
pub struct AppTask<T> {
    id: TaskId,
    sink: Arc<dyn ErrorSink>,
    host: Option<HostRef>,
    targets: BlockSet,
    action: Option<OperationFactory<T>>,
    token: CancellationToken,
    on_complete: Option<CompleteCallback<T>>,
    on_exception: Option<ExceptionCallback>,
    on_canceled: Option<CanceledCallback>,
    show_exception: bool,
    can_cancel: bool,
    title: Option<String>,
    threshold: Duration,
    runtime: Option<Handle>,
}

impl<T> AppTask<T>
where
    T: Send + 'static,
{
    /// Creates an unconfigured unit reporting to `sink`, with default
    /// [`TaskConfig`] values.
    pub fn new(sink: Arc<dyn ErrorSink>) -> Self {
        Self::with_config(sink, &TaskConfig::default())
    }

    /// Creates an unconfigured unit using `config` defaults.
    pub fn with_config(sink: Arc<dyn ErrorSink>, config: &TaskConfig) -> Self {
        Self {
            id: TaskId::new(),
            sink,
            host: None,
            targets: BlockSet::default(),
            action: None,
            token: CancellationToken::new(),
            on_complete: None,
            on_exception: None,
            on_canceled: None,
            show_exception: config.show_exceptions,
            can_cancel: false,
            title: None,
            threshold: config.visibility_threshold(),
            runtime: None,
        }
    }

    /// Identity the unit will have once executed.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The token the operation can observe for cooperative cancellation.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Sets a boolean property to `false` while running, `true` after.
    pub fn block_property(mut self, property: PropertySetter) -> Self {
        self.targets.push_property(property);
        self
    }

    /// Adds several properties, see [`block_property`](Self::block_property).
    pub fn block_properties<I>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = PropertySetter>,
    {
        for property in properties {
            self.targets.push_property(property);
        }
        self
    }

    /// Blocks `blockable` while running.
    pub fn block(mut self, blockable: Arc<dyn Blockable>) -> Self {
        self.targets.push_blockable(blockable);
        self
    }

    /// Adds several blockables, see [`block`](Self::block).
    pub fn block_all<I>(mut self, blockables: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Blockable>>,
    {
        for blockable in blockables {
            self.targets.push_blockable(blockable);
        }
        self
    }

    /// Blocks the bound host too, if it exposes the blocking capability.
    ///
    /// Has no effect when no host is bound yet, so call it after
    /// [`host`](Self::host) (or on a unit created by a factory with a
    /// default host).
    pub fn block_host(mut self) -> Self {
        let Some(host_ref) = self.host.clone() else {
            return self;
        };
        let blockable = host_ref
            .upgrade()
            .is_some_and(|host| host.as_blockable().is_some());
        if blockable {
            self.targets.push_blockable(Arc::new(HostBlocker(host_ref)));
        }
        self
    }

    /// Runs `callback` if the unit is canceled.
    ///
    /// Errors returned from, or panics raised in, the callback go to the
    /// exception path.
    pub fn on_canceled<F, R>(mut self, callback: F) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
        R: CallbackResult,
    {
        self.on_canceled = Some(Box::new(move || callback().into_result()));
        self
    }

    /// Runs `callback` on failure instead of presenting the error through
    /// the error sink.
    pub fn on_exception<F>(self, callback: F) -> Self
    where
        F: FnOnce(TaskError) + Send + 'static,
    {
        self.on_exception_with(callback, ExceptionDisplay::Replace)
    }

    /// Runs `callback` on failure; `display` decides whether the error sink
    /// still presents the error.
    pub fn on_exception_with<F>(mut self, callback: F, display: ExceptionDisplay) -> Self
    where
        F: FnOnce(TaskError) + Send + 'static,
    {
        self.on_exception = Some(Box::new(callback));
        self.show_exception = display == ExceptionDisplay::Keep;
        self
    }

    /// Runs `callback` with the operation's value.
    ///
    /// Errors returned from, or panics raised in, the callback go to the
    /// exception path.
    pub fn on_complete<F, R>(mut self, callback: F) -> Self
    where
        F: FnOnce(T) -> R + Send + 'static,
        R: CallbackResult,
    {
        self.on_complete = Some(Box::new(move |value| callback(value).into_result()));
        self
    }

    /// Sets the informational title shown by hosts.
    pub fn description(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Supplies the operation. `factory` runs inside
    /// [`execute`](Self::execute), never before.
    ///
    /// A fresh cancellation token replaces any earlier one.
    pub fn action<F, Fut>(mut self, factory: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, OperationError>> + Send + 'static,
    {
        self.action = Some(Box::new(move || Ok(factory().boxed())));
        self.token = CancellationToken::new();
        self
    }

    /// Supplies the operation together with a caller-owned token.
    pub fn action_with_token<F, Fut>(self, factory: F, token: CancellationToken) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, OperationError>> + Send + 'static,
    {
        let mut task = self.action(factory);
        task.token = token;
        task
    }

    /// Supplies an operation whose construction can fail synchronously.
    ///
    /// An `Err` from `factory` is routed to the exception path and the unit
    /// never blocks anything.
    pub fn try_action<F, Fut, E>(mut self, factory: F) -> Self
    where
        F: FnOnce() -> Result<Fut, E> + Send + 'static,
        Fut: Future<Output = Result<T, OperationError>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.action = Some(Box::new(move || {
            factory().map(FutureExt::boxed).map_err(Into::into)
        }));
        self.token = CancellationToken::new();
        self
    }

    /// Allows [`TaskHandle::cancel`] to tear the unit down.
    pub fn cancellable(mut self) -> Self {
        self.can_cancel = true;
        self
    }

    /// Binds a host. The unit keeps only a weak reference.
    pub fn host<H>(mut self, host: &Arc<H>) -> Self
    where
        H: TaskHost + 'static,
    {
        self.host = Some(HostRef::from(host));
        self
    }

    pub(crate) fn host_ref(mut self, host: Option<HostRef>) -> Self {
        self.host = host;
        self
    }

    /// Overrides how long the unit must run before its host lists it.
    pub fn visibility_threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }

    /// Runs the operation on `runtime` instead of the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Starts the unit.
    ///
    /// Invokes the operation factory and spawns the operation, blocks every
    /// target (blockables, then properties), arms the visibility timer, and
    /// attaches the continuation that tears down and dispatches the
    /// terminal callback. Returns without waiting for the operation.
    ///
    /// If the factory fails, panics, no action is configured, or no tokio
    /// runtime is available, the error goes to the exception path and the
    /// returned handle is already done with
    /// [`Termination::StartFailed`](super::Termination::StartFailed).
    pub fn execute(self) -> TaskHandle {
        let AppTask {
            id,
            sink,
            host,
            targets,
            action,
            token,
            on_complete,
            on_exception,
            on_canceled,
            show_exception,
            can_cancel,
            title,
            threshold,
            runtime,
        } = self;

        let shared = Shared::new(SharedParts {
            id,
            title,
            can_cancel,
            token,
            host,
            targets,
            exceptions: ExceptionRoute {
                sink,
                show_default: show_exception,
                callback: Mutex::new(on_exception),
            },
            on_canceled,
        });
        let handle = TaskHandle::new(Arc::clone(&shared));

        let Some(runtime) = runtime.or_else(|| Handle::try_current().ok()) else {
            shared.fail_to_start(TaskError::NoRuntime);
            return handle;
        };
        let Some(action) = action else {
            shared.fail_to_start(TaskError::MissingAction);
            return handle;
        };
        let future = match catch_unwind(AssertUnwindSafe(action)) {
            Ok(Ok(future)) => future,
            Ok(Err(error)) => {
                shared.fail_to_start(TaskError::Start(error));
                return handle;
            },
            Err(payload) => {
                shared.fail_to_start(TaskError::Start(BoxError::from(panic_message(payload))));
                return handle;
            },
        };

        let operation = runtime.spawn(future);
        shared.begin(&runtime, threshold);
        runtime.spawn(Arc::clone(&shared).complete(operation, on_complete));

        handle
    }
}

impl<T> fmt::Debug for AppTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppTask")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("host", &self.host)
            .field("targets", &self.targets)
            .field("has_action", &self.action.is_some())
            .field("can_cancel", &self.can_cancel)
            .field("show_exception", &self.show_exception)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}
