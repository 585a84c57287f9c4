//! Builder-style orchestration of a single asynchronous unit of work.
//!
//! An interactive client often runs one piece of async work (a save, a
//! remote query) and has to do the same chores around it every time:
//! disable the controls that must not be used meanwhile, show the work in a
//! "running tasks" list if it takes long, restore everything afterwards,
//! and report failures. This crate does those chores once.
//!
//! # Overview
//!
//! A [`TaskFactory`] creates [`AppTask`] builders bound to a shared
//! [`ErrorSink`] and, optionally, a default [`TaskHost`]. The builder is
//! configured fluently and consumed by [`AppTask::execute`], which returns
//! a [`TaskHandle`]:
//!
//! 1. The operation factory runs and its future is spawned on tokio.
//! 2. Every [`Blockable`] is blocked, then every blocked property is set to
//!    `false`.
//! 3. If the unit is still running after the visibility threshold (500 ms
//!    by default) it is added to its host's [`TaskList`].
//! 4. On completion, failure, or cancellation the unit is removed from the
//!    host, every target is restored, and exactly one of `on_complete`,
//!    `on_exception`, `on_canceled` runs.
//!
//! All failures (factory errors, faults, panics, callback errors) reach one
//! exception path: the error sink presents them unless the unit replaced
//! the default display, and the unit's exception callback always runs.
//!
//! # Module Organization
//!
//! - [`task`] - Builder, running handle, operation types, state machine
//! - [`factory`] - [`TaskFactory`]
//! - [`blocking`] - [`Blockable`] and boolean property targets
//! - [`host`] - [`TaskHost`], [`TaskList`], [`RunningTask`]
//! - [`sink`] - [`ErrorSink`] and [`TracingErrorSink`]
//! - [`config`] - [`TaskConfig`] loading from TOML and environment
//! - [`error`] - [`TaskError`]
//! - [`constants`] - Defaults

pub mod blocking;
pub mod config;
pub mod constants;
pub mod error;
pub mod factory;
pub mod host;
pub mod sink;
pub mod task;

/// Logging setup (requires the `logging` feature).
#[cfg(feature = "logging")]
pub mod logging;

// Re-exports for ergonomic access
pub use blocking::{Blockable, BoolProperty, PropertySetter};
pub use config::{ConfigError, TaskConfig};
pub use constants::*;
pub use error::{AggregateError, BoxError, Result, TaskError};
pub use factory::TaskFactory;
pub use host::{HostRef, RunningTask, TaskHost, TaskList, TaskListEvent};
pub use sink::{ErrorSink, TracingErrorSink};
pub use task::{
    AppTask, CallbackResult, ExceptionDisplay, OperationError, TaskHandle, TaskId, TaskState,
    Termination,
};
