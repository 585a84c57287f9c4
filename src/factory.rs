//! Factory binding task units to a shared host, error sink and configuration.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::config::TaskConfig;
use crate::host::{HostRef, TaskHost};
use crate::sink::{ErrorSink, TracingErrorSink};
use crate::task::{AppTask, OperationError};

/// Creates [`AppTask`]s that share an error sink, an optional default host,
/// and a [`TaskConfig`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use apptask::{TaskConfig, TaskFactory, TaskHost, TaskList, TracingErrorSink};
///
/// #[derive(Default)]
/// struct Shell {
///     tasks: TaskList,
/// }
///
/// impl TaskHost for Shell {
///     fn tasks(&self) -> &TaskList {
///         &self.tasks
///     }
/// }
///
/// let shell = Arc::new(Shell::default());
/// let factory = TaskFactory::new(Arc::new(TracingErrorSink))
///     .with_config(TaskConfig::default().with_show_exceptions(false))
///     .host(&shell);
///
/// let task = factory.create::<u32>().description("Loading");
/// assert!(format!("{task:?}").contains("Loading"));
/// ```
#[derive(Clone)]
pub struct TaskFactory {
    sink: Arc<dyn ErrorSink>,
    host: Option<HostRef>,
    config: TaskConfig,
    runtime: Option<Handle>,
}

impl TaskFactory {
    /// Creates a factory whose units present errors through `sink`.
    pub fn new(sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            sink,
            host: None,
            config: TaskConfig::default(),
            runtime: None,
        }
    }

    /// Uses `config` for subsequently created units.
    pub fn with_config(mut self, config: TaskConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs subsequently created units on `runtime`.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Sets the default host for subsequently created units.
    pub fn host<H>(mut self, host: &Arc<H>) -> Self
    where
        H: TaskHost + 'static,
    {
        self.host = Some(HostRef::from(host));
        self
    }

    /// The configuration applied to new units.
    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    /// Creates an unconfigured unit bound to the shared sink, and to the
    /// default host if one is set.
    pub fn create<T>(&self) -> AppTask<T>
    where
        T: Send + 'static,
    {
        let task = AppTask::with_config(Arc::clone(&self.sink), &self.config)
            .host_ref(self.host.clone());
        match &self.runtime {
            Some(runtime) => task.runtime(runtime.clone()),
            None => task,
        }
    }

    /// `create().action(factory)`.
    pub fn from_action<T, F, Fut>(&self, factory: F) -> AppTask<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, OperationError>> + Send + 'static,
    {
        self.create().action(factory)
    }

    /// `create().action_with_token(factory, token)`.
    pub fn from_action_with_token<T, F, Fut>(
        &self,
        factory: F,
        token: CancellationToken,
    ) -> AppTask<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, OperationError>> + Send + 'static,
    {
        self.create().action_with_token(factory, token)
    }

    /// Wraps an operation that produces no value.
    ///
    /// A successful run completes with `true`; faults and cancellation pass
    /// through unchanged.
    pub fn from_void_action<F, Fut>(&self, factory: F) -> AppTask<bool>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), OperationError>> + Send + 'static,
    {
        self.create().action(move || factory().map(succeeded))
    }

    /// [`from_void_action`](Self::from_void_action) with a caller-owned token.
    pub fn from_void_action_with_token<F, Fut>(
        &self,
        factory: F,
        token: CancellationToken,
    ) -> AppTask<bool>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), OperationError>> + Send + 'static,
    {
        self.create()
            .action_with_token(move || factory().map(succeeded), token)
    }
}

fn succeeded(result: Result<(), OperationError>) -> Result<bool, OperationError> {
    result.map(|()| true)
}

impl Default for TaskFactory {
    fn default() -> Self {
        Self::new(Arc::new(TracingErrorSink))
    }
}

impl fmt::Debug for TaskFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFactory")
            .field("host", &self.host)
            .field("config", &self.config)
            .field("has_runtime", &self.runtime.is_some())
            .finish_non_exhaustive()
    }
}
