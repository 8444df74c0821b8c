//! Tasks
//!
//! One task is one action invocation: a handler closure plus the fiber
//! cache its asynchronous calls live in. The handler is written to be
//! re-entrant up to its first unresolved read — each advancement replays
//! resolved fibers from cache and either completes, parks on a pending
//! operation, or commits a failure that stays visible until retried or
//! aborted.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cell::{Runtime, Scope};
use crate::error::{Eval, Failure, Interrupt};
use crate::fiber::{FiberCache, RunOwner};

/// Logical identity of an action; queries match tasks by it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ActionId(Arc<str>);

impl ActionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActionId {
    fn from(id: &str) -> Self {
        Self(Arc::from(id))
    }
}

impl From<String> for ActionId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionId({})", self.0)
    }
}

/// Action id plus the optional group it belongs to.
///
/// Groups let one query cover a family of actions ("anything touching todo
/// #42") without enumerating them.
#[derive(Clone, Debug)]
pub struct ActionIdentity {
    pub id: ActionId,
    pub group: Option<ActionId>,
}

impl From<&str> for ActionIdentity {
    fn from(id: &str) -> Self {
        Self {
            id: id.into(),
            group: None,
        }
    }
}

impl From<String> for ActionIdentity {
    fn from(id: String) -> Self {
        Self {
            id: id.into(),
            group: None,
        }
    }
}

impl From<ActionId> for ActionIdentity {
    fn from(id: ActionId) -> Self {
        Self { id, group: None }
    }
}

impl From<(&str, &str)> for ActionIdentity {
    fn from((id, group): (&str, &str)) -> Self {
        Self {
            id: id.into(),
            group: Some(group.into()),
        }
    }
}

impl From<(ActionId, ActionId)> for ActionIdentity {
    fn from((id, group): (ActionId, ActionId)) -> Self {
        Self {
            id,
            group: Some(group),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct TaskId(pub(crate) u64);

/// Where a task stands between advancements.
#[derive(Clone)]
pub(crate) enum TaskPhase {
    /// Not yet run, or reset after a fiber resolution; the next advancement
    /// runs the handler.
    Idle,
    /// Parked on one of its own fibers; re-run only after a resolution
    /// resets it.
    Pending,
    /// Parked on something outside its own fiber cache (a wait on sibling
    /// tasks, a pending cell); re-checked on every advancement.
    Waiting,
    /// Holds its failure until retried or aborted.
    Failed(Failure),
    /// Done; about to be removed from its queue.
    Completed,
}

impl TaskPhase {
    pub(crate) fn outstanding(&self) -> bool {
        matches!(self, TaskPhase::Idle | TaskPhase::Pending | TaskPhase::Waiting)
    }
}

struct TaskState {
    phase: TaskPhase,
    /// Guards against re-entrant advancement of the same task.
    running: bool,
}

pub(crate) struct TaskInner {
    pub(crate) id: TaskId,
    pub(crate) action: ActionIdentity,
    pub(crate) name: Arc<str>,
    handler: Box<dyn Fn(&Scope<'_>) -> Eval<()> + Send + Sync>,
    /// Replaced wholesale on retry so a fresh attempt does not replay a
    /// failed pass's results.
    fibers: Mutex<FiberCache>,
    state: Mutex<TaskState>,
    pub(crate) owner: Arc<dyn RunOwner>,
}

impl TaskInner {
    pub(crate) fn new(
        id: TaskId,
        action: ActionIdentity,
        name: Arc<str>,
        handler: Box<dyn Fn(&Scope<'_>) -> Eval<()> + Send + Sync>,
        owner: Arc<dyn RunOwner>,
    ) -> Self {
        Self {
            id,
            action,
            name,
            handler,
            fibers: Mutex::new(FiberCache::new()),
            state: Mutex::new(TaskState {
                phase: TaskPhase::Idle,
                running: false,
            }),
            owner,
        }
    }

    pub(crate) fn phase(&self) -> TaskPhase {
        self.state.lock().phase.clone()
    }

    fn cache(&self) -> FiberCache {
        self.fibers.lock().clone()
    }

    /// Run the handler if the task is runnable; returns the phase the task
    /// settles in.
    pub(crate) fn advance(&self, rt: &Runtime) -> TaskPhase {
        {
            let mut state = self.state.lock();
            match &state.phase {
                TaskPhase::Failed(failure) => return TaskPhase::Failed(failure.clone()),
                TaskPhase::Completed => return TaskPhase::Completed,
                TaskPhase::Pending => return TaskPhase::Pending,
                TaskPhase::Idle | TaskPhase::Waiting => {}
            }
            if state.running {
                return TaskPhase::Waiting;
            }
            state.running = true;
        }

        let outcome = loop {
            let fibers = self.cache();
            let scope = Scope::for_task(rt, self.owner.clone(), fibers.clone());
            match (self.handler)(&scope) {
                Ok(()) => break TaskPhase::Completed,
                Err(Interrupt::Pending(suspension)) => {
                    match suspension.resolved_in(&fibers) {
                        // Resolved from inside its start closure; replay now.
                        Some(true) => continue,
                        Some(false) => break TaskPhase::Pending,
                        None => break TaskPhase::Waiting,
                    }
                }
                Err(Interrupt::Failed(failure)) => {
                    tracing::debug!(task = %self.name, failure = %failure, "task failed");
                    break TaskPhase::Failed(failure);
                }
            }
        };

        let completed = matches!(outcome, TaskPhase::Completed);
        {
            let mut state = self.state.lock();
            state.running = false;
            state.phase = outcome.clone();
        }
        if completed {
            // A clean run has no further need for its transient
            // sub-operations.
            self.cache().destroy();
        }
        outcome
    }

    /// A fiber resolution landed: make the task runnable again.
    pub(crate) fn reset_pending(&self) {
        let mut state = self.state.lock();
        if matches!(state.phase, TaskPhase::Pending | TaskPhase::Waiting) {
            state.phase = TaskPhase::Idle;
        }
    }

    /// Start the action over: drop a held failure, cancel outstanding
    /// operations, and hand the next run a fresh fiber cache.
    pub(crate) fn retry(&self) {
        {
            let mut state = self.state.lock();
            if matches!(state.phase, TaskPhase::Completed) {
                return;
            }
            state.phase = TaskPhase::Idle;
        }
        let stale = {
            let mut fibers = self.fibers.lock();
            std::mem::replace(&mut *fibers, FiberCache::new())
        };
        stale.destroy();
    }

    /// Tear the task down: unwind the rollback chain of a held failure and
    /// cancel outstanding operations.
    pub(crate) fn destroy(&self) {
        let failure = {
            let mut state = self.state.lock();
            let failure = match &state.phase {
                TaskPhase::Failed(failure) => Some(failure.clone()),
                _ => None,
            };
            state.phase = TaskPhase::Completed;
            failure
        };
        if let Some(failure) = failure {
            failure.rollback();
        }
        self.cache().destroy();
    }
}
