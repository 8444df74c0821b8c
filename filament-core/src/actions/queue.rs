//! Queue
//!
//! Holds the ordered task table and the serialization mode, and exposes the
//! aggregate status as a cell. Pulling the status cell advances the tasks,
//! so a binding layer that reads `queue.status_cell()` from a computed cell
//! re-renders exactly when the queue's visible state changes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::actions::query::{ActionFilter, TaskQuery};
use crate::actions::task::{ActionIdentity, TaskId, TaskInner, TaskPhase};
use crate::cell::{CellRef, Runtime, Scope};
use crate::conform::Conform;
use crate::error::{Eval, Failure};
use crate::fiber::RunOwner;

/// How a queue walks its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Every task advances on each pull.
    Parallel,
    /// Tasks advance front-to-back; the walk stops at the first task that
    /// is still outstanding or failed, so effects commit in enqueue order.
    Serial,
    /// At most one live task; a new run destroys its predecessor and
    /// cancels the predecessor's operations.
    SingleReplaceable,
}

/// Aggregate state of a queue, committed on its status cell.
#[derive(Clone, Debug, PartialEq)]
pub enum QueueStatus {
    Idle,
    Pending,
    Failed(Failure),
}

impl Conform for QueueStatus {
    fn conform(self, _prev: &Self) -> Self {
        self
    }
}

pub(crate) struct QueueInner {
    name: Arc<str>,
    mode: QueueMode,
    rt: Runtime,
    pub(crate) tasks: Mutex<IndexMap<TaskId, Arc<TaskInner>>>,
    status: CellRef<QueueStatus>,
    next_task: AtomicU64,
}

impl QueueInner {
    /// Walk the tasks per mode and derive the aggregate status. Runs inside
    /// the status cell's handler.
    fn advance(&self, rt: &Runtime) -> QueueStatus {
        let snapshot: Vec<Arc<TaskInner>> = self.tasks.lock().values().cloned().collect();
        let serial = matches!(self.mode, QueueMode::Serial);

        let mut outstanding = false;
        let mut failure: Option<Failure> = None;
        let mut completed: Vec<TaskId> = Vec::new();

        for task in snapshot {
            match task.advance(rt) {
                TaskPhase::Completed => {
                    completed.push(task.id);
                    continue;
                }
                TaskPhase::Failed(task_failure) => {
                    if failure.is_none() {
                        failure = Some(task_failure);
                    }
                    if serial {
                        break;
                    }
                }
                TaskPhase::Idle | TaskPhase::Pending | TaskPhase::Waiting => {
                    outstanding = true;
                    if serial {
                        break;
                    }
                }
            }
        }

        if !completed.is_empty() {
            {
                let mut tasks = self.tasks.lock();
                for id in &completed {
                    tasks.shift_remove(id);
                }
            }
            // Completions may unblock waiters in any registered queue.
            rt.shared.registry.poke_all();
        }

        match failure {
            Some(failure) => QueueStatus::Failed(failure),
            None if outstanding => QueueStatus::Pending,
            None => QueueStatus::Idle,
        }
    }

    /// Restart the status cell and pull it, advancing the queue now.
    pub(crate) fn poke(&self) {
        self.status.retry(&self.rt);
        let _ = self.status.get(&self.rt);
    }

    pub(crate) fn status_value(&self) -> QueueStatus {
        self.status.get(&self.rt).unwrap_or(QueueStatus::Idle)
    }

    pub(crate) fn task(&self, id: TaskId) -> Option<Arc<TaskInner>> {
        self.tasks.lock().get(&id).cloned()
    }

    pub(crate) fn remove_and_destroy(&self, id: TaskId) {
        let task = self.tasks.lock().shift_remove(&id);
        if let Some(task) = task {
            task.destroy();
        }
        self.rt.shared.registry.poke_all();
    }

    pub(crate) fn retry_task(&self, id: TaskId) {
        if let Some(task) = self.task(id) {
            task.retry();
        }
        self.poke();
    }
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        let tasks: Vec<Arc<TaskInner>> = {
            let mut tasks = self.tasks.lock();
            tasks.drain(..).map(|(_, task)| task).collect()
        };
        for task in tasks {
            task.destroy();
        }
        self.status.destroy(&self.rt);
    }
}

/// A task acting as the owner of its fiber runs.
struct TaskOwner {
    queue: Weak<QueueInner>,
    task: TaskId,
    name: Arc<str>,
}

impl RunOwner for TaskOwner {
    fn restart(&self) {
        if let Some(queue) = self.queue.upgrade() {
            if let Some(task) = queue.task(self.task) {
                task.reset_pending();
            }
            queue.poke();
        }
    }

    fn abort(&self) {
        if let Some(queue) = self.queue.upgrade() {
            queue.remove_and_destroy(self.task);
        }
    }

    fn label(&self) -> Arc<str> {
        self.name.clone()
    }
}

/// Serialization unit for asynchronous actions.
///
/// Clones share the same queue.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl Queue {
    /// Enqueue an action and immediately attempt to advance the queue.
    ///
    /// `identity` names the action for queries: an id, or `(id, group)`.
    pub fn run<F>(&self, identity: impl Into<ActionIdentity>, handler: F)
    where
        F: Fn(&Scope<'_>) -> Eval<()> + Send + Sync + 'static,
    {
        let action = identity.into();

        if matches!(self.inner.mode, QueueMode::SingleReplaceable) {
            let old: Vec<Arc<TaskInner>> = {
                let mut tasks = self.inner.tasks.lock();
                tasks.drain(..).map(|(_, task)| task).collect()
            };
            for task in old {
                task.destroy();
            }
        }

        let id = TaskId(self.inner.next_task.fetch_add(1, Ordering::Relaxed));
        let name: Arc<str> = format!("{}.{}", self.inner.name, action.id).into();
        let owner: Arc<dyn RunOwner> = Arc::new(TaskOwner {
            queue: Arc::downgrade(&self.inner),
            task: id,
            name: name.clone(),
        });
        let task = Arc::new(TaskInner::new(
            id,
            action,
            name,
            Box::new(handler),
            owner,
        ));
        self.inner.tasks.lock().insert(id, task);
        self.inner.poke();
    }

    /// Build a read-only view over this queue's tasks matching `filter`.
    ///
    /// The queue is advanced first, so the view reflects current state.
    pub fn find(&self, filter: impl Into<ActionFilter>) -> TaskQuery {
        let _ = self.status();
        let mut query = TaskQuery::new(filter.into());
        query.add(&self.inner);
        query
    }

    /// Aggregate status; pulling it advances the queue.
    pub fn status(&self) -> QueueStatus {
        self.inner.status_value()
    }

    /// The status cell, for tracked reads from other cells.
    pub fn status_cell(&self) -> CellRef<QueueStatus> {
        self.inner.status
    }

    pub fn pending(&self) -> bool {
        matches!(self.status(), QueueStatus::Pending)
    }

    pub fn error(&self) -> Option<Failure> {
        match self.status() {
            QueueStatus::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Number of live tasks after advancing.
    pub fn size(&self) -> usize {
        let _ = self.status();
        self.inner.tasks.lock().len()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

impl Runtime {
    /// Create an action queue registered with this runtime.
    pub fn queue(&self, mode: QueueMode, name: impl Into<Arc<str>>) -> Queue {
        let name: Arc<str> = name.into();
        let rt = self.clone();
        let status_name: Arc<str> = format!("{name}.status").into();
        let inner = Arc::new_cyclic(|weak: &Weak<QueueInner>| {
            let weak = weak.clone();
            let status = self.cell(status_name, move |scope, _| {
                Ok(match weak.upgrade() {
                    Some(queue) => queue.advance(scope.runtime()),
                    None => QueueStatus::Idle,
                })
            });
            QueueInner {
                name,
                mode,
                rt,
                tasks: Mutex::new(IndexMap::new()),
                status,
                next_task: AtomicU64::new(0),
            }
        });
        self.shared.registry.register(&inner);
        Queue { inner }
    }

    /// Query tasks across every queue of this runtime.
    pub fn find(&self, filter: impl Into<ActionFilter>) -> TaskQuery {
        let mut query = TaskQuery::new(filter.into());
        for queue in self.shared.registry.snapshot() {
            let _ = queue.status_value();
            query.add(&queue);
        }
        query
    }
}
