//! Blocking targets suspended while a task unit runs.
//!
//! Two kinds of targets are supported:
//!
//! - [`Blockable`] objects with explicit `block()`/`unblock()` methods, such
//!   as a form or a panel that disables itself as a whole.
//! - Boolean properties, described by a [`BoolProperty`] (a named get/set
//!   pair) and bound to an owner through a [`PropertySetter`]. The owner is
//!   resolved again at every block and unblock, so it may be late bound
//!   (for example "the current view-model").
//!
//! A task unit blocks all blockables first, then sets every property to
//! `false`. On teardown it unblocks the blockables, then sets every property
//! back to `true`.

use std::borrow::Cow;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::{panic_message, BoxError, TaskError};

/// An object that can be suspended and restored around a run.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use apptask::Blockable;
///
/// #[derive(Default)]
/// struct Panel {
///     depth: AtomicUsize,
/// }
///
/// impl Blockable for Panel {
///     fn block(&self) {
///         self.depth.fetch_add(1, Ordering::SeqCst);
///     }
///     fn unblock(&self) {
///         self.depth.fetch_sub(1, Ordering::SeqCst);
///     }
/// }
///
/// let panel = Panel::default();
/// panel.block();
/// panel.unblock();
/// assert_eq!(panel.depth.load(Ordering::SeqCst), 0);
/// ```
pub trait Blockable: Send + Sync {
    /// Suspends the target.
    fn block(&self);

    /// Restores the target.
    fn unblock(&self);
}

/// A named boolean property on an owner of type `O`.
///
/// This is the capability pair used to flip a UI flag such as `can_run`
/// without reflection.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use apptask::BoolProperty;
///
/// struct ViewModel {
///     can_run: AtomicBool,
/// }
///
/// let can_run = BoolProperty::new(
///     "can_run",
///     |vm: &ViewModel| vm.can_run.load(Ordering::SeqCst),
///     |vm: &ViewModel, v| vm.can_run.store(v, Ordering::SeqCst),
/// );
///
/// let vm = ViewModel { can_run: AtomicBool::new(true) };
/// can_run.set(&vm, false);
/// assert!(!can_run.get(&vm));
/// assert_eq!(can_run.name(), "can_run");
/// ```
pub struct BoolProperty<O> {
    name: Cow<'static, str>,
    get: fn(&O) -> bool,
    set: fn(&O, bool),
}

impl<O> BoolProperty<O> {
    /// Creates a property from its name and accessor functions.
    pub fn new(name: impl Into<Cow<'static, str>>, get: fn(&O) -> bool, set: fn(&O, bool)) -> Self {
        Self {
            name: name.into(),
            get,
            set,
        }
    }

    /// The property name, used in log fields.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads the property on `owner`.
    pub fn get(&self, owner: &O) -> bool {
        (self.get)(owner)
    }

    /// Writes the property on `owner`.
    pub fn set(&self, owner: &O, value: bool) {
        (self.set)(owner, value);
    }
}

impl<O> Clone for BoolProperty<O> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            get: self.get,
            set: self.set,
        }
    }
}

impl<O> fmt::Debug for BoolProperty<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoolProperty")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

type Slot = dyn Fn(Option<bool>) -> Option<bool> + Send + Sync;

/// Deferred assignment of a boolean property on a late-bound owner.
///
/// The owner resolver runs at each [`set`](Self::set) and
/// [`get`](Self::get). When it returns `None` (the owner has gone away) the
/// call is skipped.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use apptask::{BoolProperty, PropertySetter};
///
/// struct ViewModel {
///     can_save: AtomicBool,
/// }
///
/// let vm = Arc::new(ViewModel { can_save: AtomicBool::new(true) });
/// let owner = vm.clone();
/// let setter = PropertySetter::new(
///     BoolProperty::new(
///         "can_save",
///         |vm: &ViewModel| vm.can_save.load(Ordering::SeqCst),
///         |vm: &ViewModel, v| vm.can_save.store(v, Ordering::SeqCst),
///     ),
///     move || Some(owner.clone()),
/// );
///
/// setter.set(false);
/// assert_eq!(setter.get(), Some(false));
/// assert!(!vm.can_save.load(Ordering::SeqCst));
/// ```
#[derive(Clone)]
pub struct PropertySetter {
    name: Cow<'static, str>,
    slot: Arc<Slot>,
}

impl PropertySetter {
    /// Binds `property` to the owner returned by `owner`.
    pub fn new<O, R>(property: BoolProperty<O>, owner: R) -> Self
    where
        O: Send + Sync + 'static,
        R: Fn() -> Option<Arc<O>> + Send + Sync + 'static,
    {
        let name = property.name.clone();
        let slot = move |value: Option<bool>| {
            let owner = owner()?;
            match value {
                Some(v) => {
                    property.set(&owner, v);
                    Some(v)
                },
                None => Some(property.get(&owner)),
            }
        };
        Self {
            name,
            slot: Arc::new(slot),
        }
    }

    /// Binds `property` to an owner held weakly.
    ///
    /// Once the owner is dropped, assignments become no-ops.
    pub fn weak<O>(property: BoolProperty<O>, owner: &Arc<O>) -> Self
    where
        O: Send + Sync + 'static,
    {
        let owner = Arc::downgrade(owner);
        Self::new(property, move || owner.upgrade())
    }

    /// The property name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Assigns `value`, returning `false` if the owner could not be resolved.
    pub fn set(&self, value: bool) -> bool {
        let applied = (self.slot)(Some(value)).is_some();
        if !applied {
            tracing::debug!(property = %self.name, value, "property owner unavailable, skipping");
        }
        applied
    }

    /// Reads the current value, or `None` if the owner could not be resolved.
    pub fn get(&self) -> Option<bool> {
        (self.slot)(None)
    }
}

impl fmt::Debug for PropertySetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertySetter")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The ordered set of targets a task unit blocks.
#[derive(Default, Clone)]
pub(crate) struct BlockSet {
    blockables: Vec<Arc<dyn Blockable>>,
    properties: Vec<PropertySetter>,
}

impl BlockSet {
    pub(crate) fn push_blockable(&mut self, blockable: Arc<dyn Blockable>) {
        self.blockables.push(blockable);
    }

    pub(crate) fn push_property(&mut self, property: PropertySetter) {
        self.properties.push(property);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.blockables.is_empty() && self.properties.is_empty()
    }

    /// Blockables first, then properties to `false`.
    ///
    /// A panicking target is skipped and reported; the rest are still
    /// blocked.
    pub(crate) fn block(&self) -> Vec<TaskError> {
        self.apply("block", false, |blockable| blockable.block())
    }

    /// Blockables first, then properties to `true`.
    ///
    /// A panicking target is skipped and reported; the rest are still
    /// restored.
    pub(crate) fn unblock(&self) -> Vec<TaskError> {
        self.apply("unblock", true, |blockable| blockable.unblock())
    }

    fn apply<F>(&self, action: &'static str, value: bool, call: F) -> Vec<TaskError>
    where
        F: Fn(&dyn Blockable),
    {
        let mut failures = Vec::new();
        for (index, blockable) in self.blockables.iter().enumerate() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| call(blockable.as_ref()))) {
                failures.push(target_failure(action, format!("blockable #{index}"), payload));
            }
        }
        for property in &self.properties {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| property.set(value))) {
                failures.push(target_failure(action, format!("property {}", property.name()), payload));
            }
        }
        failures
    }
}

fn target_failure(
    action: &'static str,
    target: String,
    payload: Box<dyn std::any::Any + Send>,
) -> TaskError {
    let source = BoxError::from(panic_message(payload));
    tracing::warn!(action, target = %target, error = %source, "blocking target panicked");
    TaskError::Target {
        action,
        target,
        source,
    }
}

impl fmt::Debug for BlockSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockSet")
            .field("blockables", &self.blockables.len())
            .field("properties", &self.properties)
            .finish()
    }
}
