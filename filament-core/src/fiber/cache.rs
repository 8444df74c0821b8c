//! Fiber Cache
//!
//! The per-run container for fibers. Keys are unique within one run, so the
//! same logical asynchronous call made twice from the same handler reaches
//! the same fiber instead of starting a duplicate operation.
//!
//! The cache survives suspensions of its run — that is what makes replay
//! work — and is destroyed when the run completes cleanly or fails
//! terminally, which trips the shared abort signal and cancels everything
//! still outstanding.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::{Eval, Interrupt};
use crate::fiber::handle::{AbortSignal, Completer, FiberSlot, RunOwner, Suspension};

pub(crate) struct FiberCacheShared {
    signal: AbortSignal,
    slots: Mutex<IndexMap<String, FiberSlot>>,
}

impl FiberCacheShared {
    /// Store a result for `key` if the fiber is still waiting for one.
    ///
    /// Returns false when the slot is gone (cleared by a retry) or already
    /// settled; the caller drops the result in that case.
    pub(crate) fn settle(&self, key: &str, outcome: FiberSlot) -> bool {
        let mut slots = self.slots.lock();
        match slots.get_mut(key) {
            Some(slot @ FiberSlot::Pending) => {
                *slot = outcome;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn clear(&self, key: &str) {
        self.slots.lock().shift_remove(key);
    }

    /// True when `key` has a result or was cleared; false while the
    /// operation is still outstanding.
    pub(crate) fn is_settled(&self, key: &str) -> bool {
        !matches!(self.slots.lock().get(key), Some(FiberSlot::Pending))
    }
}

/// Handle to a run's fiber cache; clones share the same slots.
#[derive(Clone)]
pub(crate) struct FiberCache {
    shared: Arc<FiberCacheShared>,
}

impl FiberCache {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(FiberCacheShared {
                signal: AbortSignal::default(),
                slots: Mutex::new(IndexMap::new()),
            }),
        }
    }

    pub(crate) fn is(&self, shared: &Arc<FiberCacheShared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }

    /// Read the fiber for `key`, starting the operation on first use.
    ///
    /// `start` receives the resolution handle and is invoked at most once
    /// per key for the lifetime of this cache, however many times the run
    /// is replayed.
    pub(crate) fn value<V: Clone + Send + 'static>(
        &self,
        key: String,
        owner: &Arc<dyn RunOwner>,
        start: impl FnOnce(Completer<V>),
    ) -> Eval<V> {
        {
            let slots = self.shared.slots.lock();
            if let Some(slot) = slots.get(&key) {
                return match slot {
                    FiberSlot::Done(value) => match value.downcast_ref::<V>() {
                        Some(value) => Ok(value.clone()),
                        None => panic!(
                            "fiber `{key}` in `{}` read with a different value type",
                            owner.label(),
                        ),
                    },
                    FiberSlot::Failed(failure) => Err(Interrupt::Failed(failure.clone())),
                    FiberSlot::Pending => Err(Interrupt::Pending(Suspension::for_fiber(
                        &self.shared,
                        &key,
                        owner,
                    ))),
                };
            }
        }

        self.shared
            .slots
            .lock()
            .insert(key.clone(), FiberSlot::Pending);

        // The slot lock is released before `start` runs: a synchronously
        // resolving operation settles through the completer like any other.
        let completer = Completer::new(
            &self.shared,
            key.clone(),
            owner.clone(),
            self.shared.signal.clone(),
        );
        start(completer);

        Err(Interrupt::Pending(Suspension::for_fiber(
            &self.shared,
            &key,
            owner,
        )))
    }

    /// Abort every outstanding operation and drop all cached results.
    pub(crate) fn destroy(&self) {
        self.shared.signal.trip();
        self.shared.slots.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn signal(&self) -> AbortSignal {
        self.shared.signal.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::Failure;

    /// Owner that just counts restarts and aborts.
    struct CountingOwner {
        restarts: AtomicUsize,
        aborts: AtomicUsize,
    }

    impl CountingOwner {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                restarts: AtomicUsize::new(0),
                aborts: AtomicUsize::new(0),
            })
        }
    }

    impl RunOwner for CountingOwner {
        fn restart(&self) {
            self.restarts.fetch_add(1, Ordering::SeqCst);
        }

        fn abort(&self) {
            self.aborts.fetch_add(1, Ordering::SeqCst);
        }

        fn label(&self) -> Arc<str> {
            Arc::from("test-owner")
        }
    }

    fn owner_handle(owner: &Arc<CountingOwner>) -> Arc<dyn RunOwner> {
        owner.clone()
    }

    #[test]
    fn operation_starts_exactly_once_per_key() {
        let cache = FiberCache::new();
        let owner = CountingOwner::new();
        let handle = owner_handle(&owner);
        let starts = AtomicUsize::new(0);

        for _ in 0..3 {
            let result: Eval<i32> = cache.value("op".into(), &handle, |_completer| {
                starts.fetch_add(1, Ordering::SeqCst);
            });
            assert!(matches!(result, Err(Interrupt::Pending(_))));
        }

        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resolution_restarts_owner_and_caches_value() {
        let cache = FiberCache::new();
        let owner = CountingOwner::new();
        let handle = owner_handle(&owner);

        let mut parked = None;
        let result: Eval<i32> = cache.value("op".into(), &handle, |completer| {
            parked = Some(completer);
        });
        assert!(result.is_err());

        parked.expect("start ran").resolve(42);
        assert_eq!(owner.restarts.load(Ordering::SeqCst), 1);

        // Replay hits the cache; start must not run again.
        let replay: Eval<i32> = cache.value("op".into(), &handle, |_| {
            panic!("resolved fiber restarted its operation")
        });
        assert_eq!(replay.expect("fiber resolved"), 42);
    }

    #[test]
    fn rejection_is_re_raised_to_replays() {
        let cache = FiberCache::new();
        let owner = CountingOwner::new();
        let handle = owner_handle(&owner);

        let mut parked = None;
        let _: Eval<i32> = cache.value("op".into(), &handle, |completer| {
            parked = Some(completer);
        });
        parked.expect("start ran").reject(Failure::new("offline"));

        let replay: Eval<i32> = cache.value("op".into(), &handle, |_| {
            panic!("failed fiber restarted its operation")
        });
        let failure = replay.expect_err("fiber failed");
        assert!(failure.failed().is_some());
    }

    #[test]
    fn destroy_trips_the_shared_signal_and_drops_late_results() {
        let cache = FiberCache::new();
        let owner = CountingOwner::new();
        let handle = owner_handle(&owner);

        let mut parked = None;
        let _: Eval<i32> = cache.value("op".into(), &handle, |completer| {
            parked = Some(completer);
        });

        let signal = cache.signal();
        cache.destroy();
        assert!(signal.aborted());

        // A result arriving after the abort is dropped and the owner is not
        // poked.
        parked.expect("start ran").resolve(7);
        assert_eq!(owner.restarts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn retry_clears_one_fiber_and_restarts_owner() {
        let cache = FiberCache::new();
        let owner = CountingOwner::new();
        let handle = owner_handle(&owner);

        let starts = AtomicUsize::new(0);
        let result: Eval<i32> = cache.value("op".into(), &handle, |_| {
            starts.fetch_add(1, Ordering::SeqCst);
        });
        let Err(Interrupt::Pending(suspension)) = result else {
            panic!("first read suspends");
        };

        suspension.retry();
        assert_eq!(owner.restarts.load(Ordering::SeqCst), 1);

        // The cleared fiber starts over on the next read.
        let _: Eval<i32> = cache.value("op".into(), &handle, |_| {
            starts.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }
}
