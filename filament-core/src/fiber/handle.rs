//! Fiber Handles
//!
//! The types an asynchronous operation interacts with: the [`AbortSignal`]
//! it should observe, the [`Completer`] it resolves through, and the
//! [`Suspension`] that travels up the call stack while the operation is
//! outstanding.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::Failure;
use crate::fiber::cache::FiberCacheShared;

/// Cancellation flag shared between a run's fiber cache and every operation
/// started from it.
///
/// Operations should check [`aborted`](AbortSignal::aborted) at convenient
/// points and stop early; resolutions arriving after the signal tripped are
/// dropped either way.
#[derive(Clone, Debug, Default)]
pub struct AbortSignal {
    aborted: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub(crate) fn trip(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}

/// The computation a fiber belongs to: a cell or a task.
///
/// Fibers only need two things from their owner: re-run it when a result
/// lands, and cancel-and-re-run it on abort. Keeping this behind a trait
/// lets cells and tasks share the whole suspension machinery.
pub(crate) trait RunOwner: Send + Sync {
    /// Invalidate the owner and report the change so it gets re-evaluated.
    fn restart(&self);

    /// Destroy the owner's fiber cache (cancelling outstanding operations)
    /// and re-evaluate.
    fn abort(&self);

    fn label(&self) -> Arc<str>;
}

/// One slot in a fiber cache.
pub(crate) enum FiberSlot {
    /// Operation started, result not in yet.
    Pending,
    Done(Box<dyn Any + Send>),
    Failed(Failure),
}

/// One-shot resolution handle for an asynchronous operation.
///
/// Handed to the `start` closure of a fiber read. The operation keeps it
/// until the result is known, then consumes it with [`resolve`] or
/// [`reject`] — consuming semantics make double-resolution and
/// double-start unrepresentable.
///
/// [`resolve`]: Completer::resolve
/// [`reject`]: Completer::reject
pub struct Completer<V> {
    cache: Weak<FiberCacheShared>,
    key: String,
    owner: Arc<dyn RunOwner>,
    signal: AbortSignal,
    _marker: PhantomData<fn(V)>,
}

impl<V: Send + 'static> Completer<V> {
    pub(crate) fn new(
        cache: &Arc<FiberCacheShared>,
        key: String,
        owner: Arc<dyn RunOwner>,
        signal: AbortSignal,
    ) -> Self {
        Self {
            cache: Arc::downgrade(cache),
            key,
            owner,
            signal,
            _marker: PhantomData,
        }
    }

    /// The abort signal the operation should observe.
    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }

    /// Deliver the result and re-run the owner.
    ///
    /// Silently dropped if the run was aborted or the fiber was cleared by a
    /// retry in the meantime.
    pub fn resolve(self, value: V) {
        self.deliver(FiberSlot::Done(Box::new(value)));
    }

    /// Deliver a failure and re-run the owner; readers will re-raise it.
    pub fn reject(self, failure: Failure) {
        self.deliver(FiberSlot::Failed(failure));
    }

    fn deliver(self, outcome: FiberSlot) {
        if self.signal.aborted() {
            return;
        }
        let Some(cache) = self.cache.upgrade() else {
            return;
        };
        if !cache.settle(&self.key, outcome) {
            return;
        }
        self.owner.restart();
    }
}

impl<V> fmt::Debug for Completer<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("key", &self.key)
            .field("owner", &self.owner.label())
            .finish()
    }
}

/// Resume handle carried by a pending interrupt.
///
/// Whoever catches a suspension (typically the binding layer at the top of
/// a render pass) can retry the outstanding read or abort the whole run,
/// mirroring the retry/abort controls a loading UI offers.
#[derive(Clone)]
pub struct Suspension {
    owner: Arc<dyn RunOwner>,
    fiber: Option<FiberRef>,
}

#[derive(Clone)]
struct FiberRef {
    cache: Weak<FiberCacheShared>,
    key: String,
}

impl Suspension {
    pub(crate) fn for_fiber(
        cache: &Arc<FiberCacheShared>,
        key: &str,
        owner: &Arc<dyn RunOwner>,
    ) -> Self {
        Self {
            owner: owner.clone(),
            fiber: Some(FiberRef {
                cache: Arc::downgrade(cache),
                key: key.to_string(),
            }),
        }
    }

    /// A suspension that waits on another run (task ordering); there is no
    /// fiber of our own to clear.
    pub(crate) fn waiting_on(owner: Arc<dyn RunOwner>) -> Self {
        Self { owner, fiber: None }
    }

    /// Clear this fiber only and re-run the owner.
    ///
    /// Sibling fibers keep their cached results, so the replay re-starts
    /// just the cleared operation.
    pub fn retry(&self) {
        if let Some(fiber) = &self.fiber {
            if let Some(cache) = fiber.cache.upgrade() {
                cache.clear(&fiber.key);
            }
        }
        self.owner.restart();
    }

    /// Cancel every outstanding operation of the owning run and re-run it.
    pub fn abort(&self) {
        self.owner.abort();
    }

    /// Whether the suspended read already has its result, checked against a
    /// specific cache.
    ///
    /// Returns `None` when the suspension belongs to some other run's cache
    /// (e.g. it bubbled out of a pending master cell).
    pub(crate) fn resolved_in(&self, cache: &crate::fiber::FiberCache) -> Option<bool> {
        let fiber = self.fiber.as_ref()?;
        let own = fiber.cache.upgrade()?;
        if !cache.is(&own) {
            return None;
        }
        Some(own.is_settled(&fiber.key))
    }
}

impl fmt::Debug for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspension")
            .field("owner", &self.owner.label())
            .field(
                "fiber",
                &self.fiber.as_ref().map(|fiber| fiber.key.as_str()),
            )
            .finish()
    }
}
