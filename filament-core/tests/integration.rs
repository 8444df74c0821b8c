//! Integration Tests for the Computation Engine
//!
//! These tests drive cells, fibers and action queues together through the
//! public API: suspension and resolution, invalidation and early cutoff,
//! queue ordering, cancellation and optimistic rollback.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use filament_core::{
    CellId, CellStatus, Completer, Disposable, Eval, Failure, Observer, QueueMode, QueueStatus,
    Runtime,
};

/// Observer that counts `changed` reports per cell name.
#[derive(Default)]
struct Recorder {
    changed: Mutex<Vec<String>>,
}

impl Recorder {
    fn changed_count(&self, name: &str) -> usize {
        self.changed
            .lock()
            .expect("recorder lock")
            .iter()
            .filter(|n| n.as_str() == name)
            .count()
    }
}

struct RecorderObserver(Arc<Recorder>);

impl Observer for RecorderObserver {
    fn changed(&self, _cell: CellId, name: &str) {
        self.0
            .changed
            .lock()
            .expect("recorder lock")
            .push(name.to_string());
    }
}

type ParkedCompleter<V> = Arc<Mutex<Option<Completer<V>>>>;

fn parked<V>() -> ParkedCompleter<V> {
    Arc::new(Mutex::new(None))
}

fn park<V>(slot: &ParkedCompleter<V>, completer: Completer<V>) {
    *slot.lock().expect("park lock") = Some(completer);
}

fn take<V>(slot: &ParkedCompleter<V>) -> Completer<V> {
    slot.lock()
        .expect("park lock")
        .take()
        .expect("an operation was started")
}

/// A pending handler parks the cell, reports nothing, and the resolution
/// restarts it; the next read re-invokes the handler and returns the
/// resolved value.
#[test]
fn suspended_cell_reports_only_on_resolution() {
    let recorder = Arc::new(Recorder::default());
    let rt = Runtime::with_observer(RecorderObserver(recorder.clone()));

    let slot = parked::<i32>();
    let parked_in_handler = slot.clone();
    let todos = rt.cell("todos", move |scope, _| {
        let value = scope.fiber("GET /todos", |completer| {
            park(&parked_in_handler, completer);
        })?;
        Ok(value * 10)
    });

    let interrupt = todos.get(&rt).expect_err("first read suspends");
    assert!(interrupt.suspension().is_some());
    assert_eq!(todos.status(&rt), CellStatus::Pending);
    assert!(todos.pending(&rt));
    // Suspension is control flow, not a change.
    assert_eq!(recorder.changed_count("todos"), 0);

    take(&slot).resolve(7);
    assert_eq!(todos.status(&rt), CellStatus::Obsolete);
    assert_eq!(recorder.changed_count("todos"), 1);

    assert_eq!(todos.get(&rt).expect("resolved"), 70);
    assert_eq!(todos.status(&rt), CellStatus::Actual);
}

/// Writing a deep-equal value twice produces exactly one change report.
#[test]
fn deep_equal_writes_report_once() {
    let recorder = Arc::new(Recorder::default());
    let rt = Runtime::with_observer(RecorderObserver(recorder.clone()));

    let list = rt.input("list", Arc::new(Vec::<i32>::new()));

    list.set(&rt, Arc::new(vec![1, 2, 3])).expect("writable");
    assert_eq!(recorder.changed_count("list"), 1);

    // Same contents behind a fresh allocation: conform drops the write.
    list.set(&rt, Arc::new(vec![1, 2, 3])).expect("writable");
    assert_eq!(recorder.changed_count("list"), 1);

    list.set(&rt, Arc::new(vec![1, 2, 3, 4])).expect("writable");
    assert_eq!(recorder.changed_count("list"), 2);
}

/// Replays reach resolved fibers from cache: each keyed operation starts
/// exactly once no matter how many times the run is re-entered.
#[test]
fn replayed_runs_start_each_operation_once() {
    let rt = Runtime::new();

    let first = parked::<i32>();
    let second = parked::<i32>();
    let first_starts = Arc::new(AtomicI32::new(0));
    let second_starts = Arc::new(AtomicI32::new(0));

    let (p1, p2) = (first.clone(), second.clone());
    let (s1, s2) = (first_starts.clone(), second_starts.clone());
    let sum = rt.cell("sum", move |scope, _| {
        let a = scope.fiber("op-a", |completer| {
            s1.fetch_add(1, Ordering::SeqCst);
            park(&p1, completer);
        })?;
        let b = scope.fiber("op-b", |completer| {
            s2.fetch_add(1, Ordering::SeqCst);
            park(&p2, completer);
        })?;
        Ok(a + b)
    });

    assert!(sum.get(&rt).is_err());
    take(&first).resolve(40);

    // The replay reads op-a from cache and reaches op-b.
    assert!(sum.get(&rt).is_err());
    take(&second).resolve(2);

    assert_eq!(sum.get(&rt).expect("both resolved"), 42);
    assert_eq!(first_starts.load(Ordering::SeqCst), 1);
    assert_eq!(second_starts.load(Ordering::SeqCst), 1);
}

/// A suggested fallback keeps a value visible while the first load is
/// outstanding.
#[test]
fn mock_value_bridges_the_first_load() {
    let rt = Runtime::new();

    let slot = parked::<Vec<String>>();
    let parked_in_handler = slot.clone();
    let names = rt.cell("names", move |scope, _| {
        scope.suggest(vec!["placeholder".to_string()]);
        scope.fiber("GET /names", |completer| {
            park(&parked_in_handler, completer);
        })
    });

    let shown = names.get(&rt).expect("mock value is readable");
    assert_eq!(shown, vec!["placeholder".to_string()]);
    assert_eq!(names.status(&rt), CellStatus::Mock);
    assert!(names.pending(&rt));

    take(&slot).resolve(vec!["alice".to_string(), "bob".to_string()]);
    let loaded = names.get(&rt).expect("loaded");
    assert_eq!(loaded.len(), 2);
    assert_eq!(names.status(&rt), CellStatus::Actual);
}

/// A failed fiber commits the failure onto the cell until it is retried.
#[test]
fn failed_operation_commits_and_abort_recovers() {
    let rt = Runtime::new();

    let slot = parked::<i32>();
    let attempts = Arc::new(AtomicI32::new(0));

    let (parked_in_handler, tries) = (slot.clone(), attempts.clone());
    let data = rt.cell("data", move |scope, _| {
        tries.fetch_add(1, Ordering::SeqCst);
        scope.fiber("GET /data", |completer| {
            park(&parked_in_handler, completer);
        })
    });

    assert!(data.get(&rt).is_err());
    take(&slot).reject(Failure::new("offline"));

    let interrupt = data.get(&rt).expect_err("failure committed");
    assert!(interrupt.failed().is_some());
    assert!(data.error(&rt).is_some());

    // Abort clears the failure and the fiber cache; the next read starts
    // the operation over.
    data.abort(&rt);
    assert!(data.error(&rt).is_none());
    assert!(data.get(&rt).is_err());
    take(&slot).resolve(5);
    assert_eq!(data.get(&rt).expect("second attempt"), 5);
}

/// Serial queues never start a task while its predecessor is outstanding.
#[test]
fn serial_queue_preserves_enqueue_order() {
    let rt = Runtime::new();
    let queue = rt.queue(QueueMode::Serial, "writes");

    let slot = parked::<()>();
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let (parked_in_handler, first_log) = (slot.clone(), log.clone());
    queue.run("first", move |scope| {
        scope.fiber("PUT /a", |completer| {
            park(&parked_in_handler, completer);
        })?;
        first_log.lock().expect("log lock").push("first");
        Ok(())
    });

    let second_log = log.clone();
    queue.run("second", move |_scope| {
        second_log.lock().expect("log lock").push("second");
        Ok(())
    });

    // The head task is parked; the second handler has not run at all.
    assert_eq!(queue.status(), QueueStatus::Pending);
    assert!(log.lock().expect("log lock").is_empty());

    take(&slot).resolve(());

    assert_eq!(queue.status(), QueueStatus::Idle);
    assert_eq!(queue.size(), 0);
    assert_eq!(&*log.lock().expect("log lock"), &["first", "second"]);
}

/// A replaceable queue keeps only the newest task and cancels the old one's
/// operations.
#[test]
fn single_replaceable_queue_cancels_the_predecessor() {
    let rt = Runtime::new();
    let queue = rt.queue(QueueMode::SingleReplaceable, "search");

    let first = parked::<i32>();
    let second = parked::<i32>();
    let applied = Arc::new(AtomicI32::new(0));

    let (p1, a1) = (first.clone(), applied.clone());
    queue.run("query-a", move |scope| {
        let value = scope.fiber("GET /search?a", |completer| {
            park(&p1, completer);
        })?;
        a1.store(value, Ordering::SeqCst);
        Ok(())
    });

    let first_completer = take(&first);
    assert!(!first_completer.signal().aborted());

    let (p2, a2) = (second.clone(), applied.clone());
    queue.run("query-b", move |scope| {
        let value = scope.fiber("GET /search?b", |completer| {
            park(&p2, completer);
        })?;
        a2.store(value, Ordering::SeqCst);
        Ok(())
    });

    // The first task is gone and its abort signal tripped.
    assert_eq!(queue.size(), 1);
    assert!(first_completer.signal().aborted());

    // A late result from the cancelled operation is dropped.
    first_completer.resolve(1);
    assert_eq!(applied.load(Ordering::SeqCst), 0);

    take(&second).resolve(2);
    assert_eq!(applied.load(Ordering::SeqCst), 2);
    assert_eq!(queue.size(), 0);
}

/// Nested optimistic mutations unwind in reverse application order when the
/// failed task is aborted.
#[test]
fn rollback_chain_unwinds_nested_mutations() {
    let rt = Runtime::new();
    let queue = rt.queue(QueueMode::Serial, "todos");

    let slot = parked::<i32>();
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let (parked_in_handler, handler_log) = (slot.clone(), log.clone());
    queue.run("save", move |scope| {
        // Two optimistic layers; the failure propagates from the innermost
        // point, so the inner revert is attached first.
        let (outer_log, inner_log) = (handler_log.clone(), handler_log.clone());
        let result: Eval<i32> = scope
            .fiber("PUT /todo", |completer| {
                park(&parked_in_handler, completer);
            })
            .map_err(|interrupt| interrupt.with_rollback(move || inner_log.lock().expect("log lock").push("revert-m2")));
        result.map_err(|interrupt| interrupt.with_rollback(move || outer_log.lock().expect("log lock").push("revert-m1")))?;
        Ok(())
    });

    // Still pending: suspensions must not trigger rollback.
    assert!(log.lock().expect("log lock").is_empty());

    take(&slot).reject(Failure::new("409 conflict"));

    let failed = queue.find("save");
    assert_eq!(failed.errors().len(), 1);
    assert!(log.lock().expect("log lock").is_empty());

    failed.abort();
    assert_eq!(&*log.lock().expect("log lock"), &["revert-m2", "revert-m1"]);
    assert_eq!(queue.size(), 0);
}

/// Queries answer "is anything outstanding for this identity" across the
/// whole runtime, by action id or group.
#[test]
fn task_queries_aggregate_by_identity() {
    let rt = Runtime::new();
    let queue = rt.queue(QueueMode::Parallel, "todo-actions");

    let save = parked::<()>();
    let remove = parked::<()>();

    let parked_in_handler = save.clone();
    queue.run(("save-42", "todo-42"), move |scope| {
        scope.fiber("PUT /todo/42", |completer| {
            park(&parked_in_handler, completer);
        })
    });

    let parked_in_handler = remove.clone();
    queue.run(("remove-7", "todo-7"), move |scope| {
        scope.fiber("DELETE /todo/7", |completer| {
            park(&parked_in_handler, completer);
        })
    });

    // Match by id, by group, and runtime-wide.
    assert!(queue.find("save-42").pending());
    assert!(queue.find("todo-42").pending());
    assert!(!queue.find("todo-9000").pending());
    assert!(rt.find("todo-7").pending());

    take(&save).resolve(());
    assert!(!queue.find("todo-42").pending());
    assert!(queue.find("todo-7").pending());

    take(&remove).resolve(());
    assert!(!rt.find(()).pending());
}

/// `wait` defers a task's side effect until conflicting tasks in another
/// queue have finished.
#[test]
fn wait_orders_tasks_across_queues() {
    let rt = Runtime::new();
    let saves = rt.queue(QueueMode::Serial, "saves");
    let reloads = rt.queue(QueueMode::Serial, "reloads");

    let slot = parked::<()>();
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let (parked_in_handler, save_log) = (slot.clone(), log.clone());
    saves.run("save-42", move |scope| {
        scope.fiber("PUT /todo/42", |completer| {
            park(&parked_in_handler, completer);
        })?;
        save_log.lock().expect("log lock").push("saved");
        Ok(())
    });

    let (saves_in_handler, reload_log) = (saves.clone(), log.clone());
    reloads.run("reload", move |scope| {
        saves_in_handler.find("save-42").wait(scope)?;
        reload_log.lock().expect("log lock").push("reloaded");
        Ok(())
    });

    // The reload is parked behind the outstanding save.
    assert_eq!(reloads.status(), QueueStatus::Pending);
    assert!(log.lock().expect("log lock").is_empty());

    take(&slot).resolve(());

    assert_eq!(&*log.lock().expect("log lock"), &["saved", "reloaded"]);
    assert_eq!(reloads.status(), QueueStatus::Idle);
}

/// Values with a disposal hook are torn down exactly once, by the owning
/// cell, even when conform shares them across cells.
#[test]
fn owned_values_are_disposed_exactly_once() {
    struct Connection {
        port: u16,
        drops: Arc<AtomicI32>,
    }

    impl PartialEq for Connection {
        fn eq(&self, other: &Self) -> bool {
            self.port == other.port
        }
    }

    impl Disposable for Connection {
        fn dispose(&self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    let rt = Runtime::new();
    let drops = Arc::new(AtomicI32::new(0));

    let port = rt.input("port", 8080u16);
    let drops_in_handler = drops.clone();
    let connection = rt.owned_cell("connection", move |scope, _| {
        Ok(Arc::new(Connection {
            port: scope.get(port)?,
            drops: drops_in_handler.clone(),
        }))
    });

    // A second cell sharing the same Arc must not become a second owner.
    let mirrored = rt.owned_cell("mirrored", move |scope, _| scope.get(connection));

    let first = mirrored.get(&rt).expect("connects");
    assert_eq!(first.port, 8080);
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    // Recomputing with a different port replaces the owned value once.
    port.set(&rt, 9090).expect("writable");
    let second = mirrored.get(&rt).expect("reconnects");
    assert_eq!(second.port, 9090);
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    // Teardown disposes the live connection exactly once more.
    mirrored.destroy(&rt);
    connection.destroy(&rt);
    assert_eq!(drops.load(Ordering::SeqCst), 2);
}

/// A failed task keeps its error visible until retried, and a retry after
/// the backend recovers completes the action.
#[test]
fn failed_tasks_stay_until_retried() {
    let rt = Runtime::new();
    let queue = rt.queue(QueueMode::Serial, "sync");

    let slot = parked::<()>();
    let done = Arc::new(AtomicI32::new(0));

    let (parked_in_handler, done_in_handler) = (slot.clone(), done.clone());
    queue.run("push", move |scope| {
        scope.fiber("POST /sync", |completer| {
            park(&parked_in_handler, completer);
        })?;
        done_in_handler.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    take(&slot).reject(Failure::new("502 bad gateway"));
    assert!(matches!(queue.status(), QueueStatus::Failed(_)));
    assert_eq!(queue.find("push").errors().len(), 1);
    assert_eq!(queue.size(), 1);

    // Retry re-runs the handler; the replaced fiber starts over.
    queue.find("push").retry();
    take(&slot).resolve(());
    assert_eq!(done.load(Ordering::SeqCst), 1);
    assert_eq!(queue.size(), 0);
    assert_eq!(queue.status(), QueueStatus::Idle);
}
