//! Task Queries
//!
//! A read-only filtered view over queue tasks, selected by action identity.
//! This is how a caller asks "is there an outstanding write for entity X"
//! (to disable a control) or "what failed" (to offer retry) without holding
//! task references of its own.

use std::sync::{Arc, Weak};

use crate::actions::queue::QueueInner;
use crate::actions::task::{ActionId, TaskInner};
use crate::cell::Scope;
use crate::error::{Eval, Failure, Interrupt};
use crate::fiber::Suspension;

/// Which action identities a query covers.
///
/// Matches a task when any filter id equals the task's action id or its
/// group; an empty filter matches everything.
#[derive(Clone, Debug, Default)]
pub struct ActionFilter {
    ids: Option<Vec<ActionId>>,
}

impl ActionFilter {
    pub fn all() -> Self {
        Self { ids: None }
    }

    pub(crate) fn matches(&self, task: &TaskInner) -> bool {
        let Some(ids) = &self.ids else {
            return true;
        };
        ids.iter()
            .any(|id| *id == task.action.id || Some(id) == task.action.group.as_ref())
    }
}

impl From<()> for ActionFilter {
    fn from(_: ()) -> Self {
        Self::all()
    }
}

impl From<&str> for ActionFilter {
    fn from(id: &str) -> Self {
        Self {
            ids: Some(vec![id.into()]),
        }
    }
}

impl From<ActionId> for ActionFilter {
    fn from(id: ActionId) -> Self {
        Self {
            ids: Some(vec![id]),
        }
    }
}

impl From<Vec<ActionId>> for ActionFilter {
    fn from(ids: Vec<ActionId>) -> Self {
        Self { ids: Some(ids) }
    }
}

struct QueryEntry {
    queue: Weak<QueueInner>,
    task: Arc<TaskInner>,
}

/// Read-only filtered view over matching tasks.
///
/// The view is a snapshot: tasks enqueued after it was built are not
/// covered. Aggregations never mutate queue state.
pub struct TaskQuery {
    filter: ActionFilter,
    entries: Vec<QueryEntry>,
}

impl TaskQuery {
    pub(crate) fn new(filter: ActionFilter) -> Self {
        Self {
            filter,
            entries: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, queue: &Arc<QueueInner>) {
        let tasks = queue.tasks.lock();
        for task in tasks.values() {
            if self.filter.matches(task) {
                self.entries.push(QueryEntry {
                    queue: Arc::downgrade(queue),
                    task: task.clone(),
                });
            }
        }
    }

    /// Fold another query's matches into this one.
    pub fn merge(&mut self, sibling: TaskQuery) {
        self.entries.extend(sibling.entries);
    }

    /// True while any matching task has not completed.
    pub fn pending(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.task.phase().outstanding())
    }

    /// Failures held by matching tasks, in enqueue order.
    pub fn errors(&self) -> Vec<Failure> {
        self.entries
            .iter()
            .filter_map(|entry| match entry.task.phase() {
                crate::actions::task::TaskPhase::Failed(failure) => Some(failure),
                _ => None,
            })
            .collect()
    }

    /// Abort every matching task: rollback chains unwind, outstanding
    /// operations are cancelled, the tasks leave their queues.
    pub fn abort(&self) {
        for entry in &self.entries {
            if let Some(queue) = entry.queue.upgrade() {
                queue.remove_and_destroy(entry.task.id);
            }
        }
    }

    /// Make every matching failed task runnable again.
    pub fn retry(&self) {
        for entry in &self.entries {
            if let Some(queue) = entry.queue.upgrade() {
                queue.retry_task(entry.task.id);
            }
        }
    }

    /// Cooperative ordering: suspend the calling run until every matching
    /// task has finished.
    ///
    /// Suspends exactly like a pending fiber while any match is
    /// outstanding, and re-raises the first held failure, so a task can say
    /// "do not begin my side effect until conflicting writes settle"
    /// without any lock. The calling task itself never counts as a blocker.
    pub fn wait(&self, scope: &Scope<'_>) -> Eval<()> {
        for entry in &self.entries {
            if Arc::ptr_eq(&entry.task.owner, scope.run_owner()) {
                continue;
            }
            match entry.task.phase() {
                crate::actions::task::TaskPhase::Failed(failure) => {
                    return Err(Interrupt::Failed(failure));
                }
                phase if phase.outstanding() => {
                    return Err(Interrupt::Pending(Suspension::waiting_on(
                        entry.task.owner.clone(),
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Number of matching tasks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
