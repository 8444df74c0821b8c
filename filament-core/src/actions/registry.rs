//! Queue Registry
//!
//! Every queue registers here on creation. The registry is what makes
//! cross-queue coordination work: a task completion pokes every live queue,
//! resuming tasks parked on `wait`, and runtime-wide queries fan out over
//! the registered queues. Entries are weak; a dropped queue disappears on
//! the next sweep.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::actions::queue::QueueInner;

#[derive(Default)]
pub(crate) struct QueueRegistry {
    queues: Mutex<Vec<Weak<QueueInner>>>,
}

impl QueueRegistry {
    pub(crate) fn register(&self, queue: &Arc<QueueInner>) {
        let mut queues = self.queues.lock();
        queues.retain(|entry| entry.strong_count() > 0);
        queues.push(Arc::downgrade(queue));
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<QueueInner>> {
        self.queues
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Re-advance every live queue. Called after task completions and
    /// removals so waiters notice.
    pub(crate) fn poke_all(&self) {
        for queue in self.snapshot() {
            queue.poke();
        }
    }
}
