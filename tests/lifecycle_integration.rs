//! Full lifecycle integration tests for task units.
//!
//! These tests drive units through `TaskFactory` -> configure -> `execute`
//! -> terminal handling on a paused tokio clock, and check the blocking
//! protocol, callback dispatch, and the single exception path.

use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use apptask::{
    BoolProperty, BoxError, ErrorSink, ExceptionDisplay, OperationError, PropertySetter,
    TaskError, TaskFactory, TaskHost, TaskList, TaskListEvent, TaskState, Termination,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

// ============================================================================
// Fixtures
// ============================================================================

/// A view-model with one bindable flag.
struct ViewModel {
    can_run: AtomicBool,
}

impl ViewModel {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            can_run: AtomicBool::new(true),
        })
    }

    fn can_run(&self) -> bool {
        self.can_run.load(Ordering::SeqCst)
    }
}

fn can_run(vm: &Arc<ViewModel>) -> PropertySetter {
    PropertySetter::weak(
        BoolProperty::new(
            "can_run",
            |vm: &ViewModel| vm.can_run.load(Ordering::SeqCst),
            |vm: &ViewModel, v| vm.can_run.store(v, Ordering::SeqCst),
        ),
        vm,
    )
}

/// A blockable that counts nesting depth and calls.
#[derive(Default)]
struct Panel {
    depth: AtomicIsize,
    blocks: AtomicUsize,
}

impl apptask::Blockable for Panel {
    fn block(&self) {
        self.depth.fetch_add(1, Ordering::SeqCst);
        self.blocks.fetch_add(1, Ordering::SeqCst);
    }

    fn unblock(&self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A blockable whose restore always panics.
struct Jammed;

impl apptask::Blockable for Jammed {
    fn block(&self) {}

    fn unblock(&self) {
        panic!("hinge stuck");
    }
}

#[derive(Default)]
struct Window {
    tasks: TaskList,
}

impl TaskHost for Window {
    fn tasks(&self) -> &TaskList {
        &self.tasks
    }
}

/// Records everything that reaches callbacks and the error sink.
#[derive(Default)]
struct Probe {
    completed: Mutex<Vec<u32>>,
    exceptions: Mutex<Vec<TaskError>>,
    canceled: AtomicUsize,
    presented: Mutex<Vec<String>>,
}

impl Probe {
    fn callbacks(&self) -> usize {
        self.completed.lock().len() + self.exceptions.lock().len() + self.canceled.load(Ordering::SeqCst)
    }

    fn presented(&self) -> usize {
        self.presented.lock().len()
    }
}

fn factory(probe: &Arc<Probe>) -> TaskFactory {
    let sink_probe = probe.clone();
    let sink: Arc<dyn ErrorSink> = Arc::new(move |err: &TaskError| {
        sink_probe.presented.lock().push(err.to_string());
    });
    TaskFactory::new(sink)
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

fn failing_factory() -> Result<std::future::Ready<Result<u32, OperationError>>, BoxError> {
    Err("connection string missing".into())
}

// ============================================================================
// Completion
// ============================================================================

#[tokio::test(start_paused = true)]
async fn quick_success_blocks_then_restores_and_stays_out_of_host() {
    let probe = Arc::new(Probe::default());
    let vm = ViewModel::new();
    let window = Arc::new(Window::default());
    let mut events = window.tasks.subscribe();

    let p = probe.clone();
    let handle = factory(&probe)
        .host(&window)
        .from_action(|| async {
            sleep_ms(10).await;
            Ok(42)
        })
        .block_property(can_run(&vm))
        .on_complete(move |value| p.completed.lock().push(value))
        .execute();

    assert!(!vm.can_run(), "property must be false while running");
    assert_eq!(handle.state(), TaskState::Running);

    sleep_ms(5).await;
    assert!(!vm.can_run());

    assert_eq!(handle.wait().await, Termination::Completed);
    assert!(vm.can_run());
    assert_eq!(*probe.completed.lock(), vec![42]);
    assert_eq!(probe.callbacks(), 1);

    // Well past the threshold: the unit never showed up.
    sleep_ms(1_000).await;
    assert!(window.tasks.is_empty());
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn blockables_are_blocked_once_and_restored() {
    let probe = Arc::new(Probe::default());
    let panel = Arc::new(Panel::default());
    let other = Arc::new(Panel::default());

    let handle = factory(&probe)
        .from_action(|| async {
            sleep_ms(50).await;
            Ok(1_u32)
        })
        .block(panel.clone())
        .block_all([other.clone() as Arc<dyn apptask::Blockable>])
        .execute();

    assert_eq!(panel.depth.load(Ordering::SeqCst), 1);
    assert_eq!(other.depth.load(Ordering::SeqCst), 1);

    handle.wait().await;

    assert_eq!(panel.depth.load(Ordering::SeqCst), 0);
    assert_eq!(other.depth.load(Ordering::SeqCst), 0);
    assert_eq!(panel.blocks.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn several_properties_are_all_restored() {
    let probe = Arc::new(Probe::default());
    let first = ViewModel::new();
    let second = ViewModel::new();

    let handle = factory(&probe)
        .from_action(|| async { Ok(0_u32) })
        .block_properties([can_run(&first), can_run(&second)])
        .execute();

    assert!(!first.can_run());
    assert!(!second.can_run());
    handle.wait().await;
    assert!(first.can_run());
    assert!(second.can_run());
}

#[tokio::test(start_paused = true)]
async fn completion_callback_error_is_rerouted() {
    let probe = Arc::new(Probe::default());
    let vm = ViewModel::new();

    let handle = factory(&probe)
        .from_action(|| async { Ok(7_u32) })
        .block_property(can_run(&vm))
        .on_complete(|_| Err::<(), _>("cannot render result"))
        .execute();

    assert_eq!(handle.wait().await, Termination::Completed);
    assert!(vm.can_run());
    assert_eq!(
        *probe.presented.lock(),
        vec!["on_complete callback failed: cannot render result".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn completion_callback_panic_is_rerouted() {
    let probe = Arc::new(Probe::default());
    let p = probe.clone();

    let handle = factory(&probe)
        .from_action(|| async { Ok(7_u32) })
        .on_complete(|_| -> () { panic!("render exploded") })
        .on_exception(move |err| p.exceptions.lock().push(err))
        .execute();

    assert_eq!(handle.wait().await, Termination::Completed);
    let exceptions = probe.exceptions.lock();
    assert_eq!(exceptions.len(), 1);
    assert!(matches!(
        &exceptions[0],
        TaskError::Callback { callback: "on_complete", .. }
    ));
    assert_eq!(probe.presented(), 0);
}

#[tokio::test(start_paused = true)]
async fn panicking_target_still_restores_the_rest_and_finishes() {
    let probe = Arc::new(Probe::default());
    let vm = ViewModel::new();
    let panel = Arc::new(Panel::default());
    let p = probe.clone();

    let handle = factory(&probe)
        .from_action(|| async {
            sleep_ms(10).await;
            Ok(1_u32)
        })
        .block(Arc::new(Jammed))
        .block(panel.clone())
        .block_property(can_run(&vm))
        .on_complete(move |value| p.completed.lock().push(value))
        .execute();

    let finished = tokio::time::timeout(Duration::from_secs(2), handle.wait()).await;
    assert_eq!(finished.ok(), Some(Termination::Completed));
    assert_eq!(handle.state(), TaskState::Done);
    assert_eq!(panel.depth.load(Ordering::SeqCst), 0);
    assert!(vm.can_run());
    assert_eq!(*probe.completed.lock(), vec![1]);
    assert_eq!(
        *probe.presented.lock(),
        vec!["failed to unblock blockable #0: hinge stuck".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn target_failure_does_not_steal_the_fault_from_on_exception() {
    let probe = Arc::new(Probe::default());
    let p = probe.clone();

    let handle = factory(&probe)
        .from_action(|| async { Err::<u32, _>(OperationError::fault("quota exceeded")) })
        .block(Arc::new(Jammed))
        .on_exception(move |err| p.exceptions.lock().push(err))
        .execute();

    assert_eq!(handle.wait().await, Termination::Faulted);
    let exceptions = probe.exceptions.lock();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(exceptions[0].to_string(), "quota exceeded");
}

// ============================================================================
// Faults
// ============================================================================

#[tokio::test(start_paused = true)]
async fn single_cause_fault_is_unwrapped() {
    let probe = Arc::new(Probe::default());
    let vm = ViewModel::new();
    let p = probe.clone();

    let handle = factory(&probe)
        .from_action(|| async {
            sleep_ms(20).await;
            Err::<u32, _>(OperationError::fault("server returned 503"))
        })
        .block_property(can_run(&vm))
        .on_complete(|_| -> () { panic!("must not complete") })
        .on_canceled(|| -> () { panic!("must not cancel") })
        .on_exception(move |err| p.exceptions.lock().push(err))
        .execute();

    assert_eq!(handle.wait().await, Termination::Faulted);
    assert!(vm.can_run());

    let exceptions = probe.exceptions.lock();
    assert_eq!(exceptions.len(), 1);
    assert!(matches!(exceptions[0], TaskError::Failed(_)));
    assert_eq!(exceptions[0].to_string(), "server returned 503");
}

#[tokio::test(start_paused = true)]
async fn multi_cause_fault_is_aggregated() {
    let probe = Arc::new(Probe::default());
    let p = probe.clone();

    let handle = factory(&probe)
        .from_action(|| async {
            Err::<u32, _>(OperationError::aggregate(vec![
                BoxError::from("row 3 invalid"),
                BoxError::from("row 9 invalid"),
            ]))
        })
        .on_exception(move |err| p.exceptions.lock().push(err))
        .execute();

    handle.wait().await;

    let exceptions = probe.exceptions.lock();
    assert_eq!(exceptions.len(), 1);
    match &exceptions[0] {
        TaskError::Aggregate(agg) => {
            assert_eq!(agg.len(), 2);
            assert_eq!(agg.errors()[1].to_string(), "row 9 invalid");
        },
        other => panic!("expected aggregate, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn operation_panic_is_reported_as_fault() {
    let probe = Arc::new(Probe::default());
    let panel = Arc::new(Panel::default());

    let handle = factory(&probe)
        .from_action(|| async {
            sleep_ms(5).await;
            if true {
                panic!("worker crashed");
            }
            Ok(0_u32)
        })
        .block(panel.clone())
        .execute();

    assert_eq!(handle.wait().await, Termination::Faulted);
    assert_eq!(panel.depth.load(Ordering::SeqCst), 0);
    assert_eq!(
        *probe.presented.lock(),
        vec!["operation panicked: worker crashed".to_string()]
    );
}

// ============================================================================
// Exception display
// ============================================================================

#[tokio::test(start_paused = true)]
async fn default_display_presents_exactly_once() {
    let probe = Arc::new(Probe::default());

    let handle = factory(&probe)
        .from_action(|| async { Err::<u32, _>(OperationError::fault("boom")) })
        .execute();

    handle.wait().await;
    assert_eq!(probe.presented(), 1);
}

#[tokio::test(start_paused = true)]
async fn keep_display_presents_and_calls_back() {
    let probe = Arc::new(Probe::default());
    let p = probe.clone();

    let handle = factory(&probe)
        .from_action(|| async { Err::<u32, _>(OperationError::fault("boom")) })
        .on_exception_with(move |err| p.exceptions.lock().push(err), ExceptionDisplay::Keep)
        .execute();

    handle.wait().await;
    assert_eq!(probe.presented(), 1);
    assert_eq!(probe.exceptions.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn replaced_display_only_calls_back() {
    let probe = Arc::new(Probe::default());
    let p = probe.clone();

    let handle = factory(&probe)
        .from_action(|| async { Err::<u32, _>(OperationError::fault("boom")) })
        .on_exception(move |err| p.exceptions.lock().push(err))
        .execute();

    handle.wait().await;
    assert_eq!(probe.presented(), 0);
    assert_eq!(probe.exceptions.lock().len(), 1);
}

// ============================================================================
// Start failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn factory_error_never_blocks() {
    let probe = Arc::new(Probe::default());
    let vm = ViewModel::new();
    let panel = Arc::new(Panel::default());
    let window = Arc::new(Window::default());

    let handle = factory(&probe)
        .host(&window)
        .create::<u32>()
        .try_action(failing_factory)
        .block_property(can_run(&vm))
        .block(panel.clone())
        .execute();

    assert_eq!(handle.termination(), Some(Termination::StartFailed));
    assert_eq!(handle.state(), TaskState::Done);
    assert!(vm.can_run());
    assert_eq!(panel.blocks.load(Ordering::SeqCst), 0);
    assert_eq!(
        *probe.presented.lock(),
        vec!["operation failed to start: connection string missing".to_string()]
    );

    sleep_ms(1_000).await;
    assert!(window.tasks.is_empty());
}

#[tokio::test(start_paused = true)]
async fn factory_panic_is_a_start_failure() {
    let probe = Arc::new(Probe::default());
    let p = probe.clone();

    let handle = factory(&probe)
        .create::<u32>()
        .action(|| -> std::future::Ready<Result<u32, OperationError>> {
            panic!("bad request")
        })
        .on_exception(move |err| p.exceptions.lock().push(err))
        .execute();

    assert_eq!(handle.wait().await, Termination::StartFailed);
    let exceptions = probe.exceptions.lock();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(exceptions[0].to_string(), "operation failed to start: bad request");
}

#[tokio::test(start_paused = true)]
async fn operation_factory_runs_only_on_execute() {
    let probe = Arc::new(Probe::default());
    let invoked = Arc::new(AtomicBool::new(false));
    let flag = invoked.clone();

    let task = factory(&probe).from_action(move || {
        flag.store(true, Ordering::SeqCst);
        async { Ok(1_u32) }
    });

    sleep_ms(100).await;
    assert!(!invoked.load(Ordering::SeqCst));

    let handle = task.execute();
    assert!(invoked.load(Ordering::SeqCst));
    assert_eq!(handle.wait().await, Termination::Completed);
}

// ============================================================================
// Handle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn handle_exposes_unit_details() {
    let probe = Arc::new(Probe::default());

    let task = factory(&probe)
        .from_action(|| async { Ok(1_u32) })
        .description("Saving algorithm")
        .cancellable();
    let id = task.id();
    let handle = task.execute();

    assert_eq!(handle.id(), id);
    assert_eq!(handle.title(), Some("Saving algorithm"));
    assert!(handle.can_cancel());
    assert!(!handle.is_complete());

    handle.wait().await;
    assert!(handle.is_complete());
    assert_eq!(handle.termination(), Some(Termination::Completed));
}

#[tokio::test(start_paused = true)]
async fn host_events_follow_a_long_unit() {
    let probe = Arc::new(Probe::default());
    let window = Arc::new(Window::default());
    let mut events = window.tasks.subscribe();

    let handle = factory(&probe)
        .host(&window)
        .from_action(|| async {
            sleep_ms(700).await;
            Ok(1_u32)
        })
        .execute();

    handle.wait().await;

    assert_eq!(events.try_recv().ok(), Some(TaskListEvent::Added(handle.id())));
    assert_eq!(events.try_recv().ok(), Some(TaskListEvent::Removed(handle.id())));
}
