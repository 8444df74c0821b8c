//! Cell Arena
//!
//! Cells live in an index-addressed table owned by the runtime, with edges
//! stored as index lists on each slot. Back-references by index (rather
//! than by shared pointers) keep teardown explicit and cycle-free: freeing
//! a slot bumps its generation, so stale handles are caught instead of
//! resurrecting dead nodes.
//!
//! The value-typed half of a cell (committed value, suggested value,
//! handler) hides behind the object-safe [`CellCore`] trait so that
//! untyped graph operations — invalidation, check resolution, teardown —
//! can walk slots without knowing their value types. Typed access goes
//! through `Any` downcasts performed by the typed [`CellRef`] API.
//!
//! [`CellRef`]: crate::cell::CellRef

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::cell::runtime::Scope;
use crate::cell::status::CellStatus;
use crate::cell::Value;
use crate::error::{Failure, Interrupt};
use crate::fiber::{FiberCache, Suspension};
use crate::owning::Owning;

/// Handle to a slot in the arena.
///
/// Carries the slot index plus the generation it was allocated under;
/// accessing a slot through a handle from a previous generation is a
/// contract violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId {
    index: u32,
    generation: u32,
}

impl CellId {
    #[cfg(test)]
    pub(crate) fn synthetic(index: u32) -> Self {
        Self {
            index,
            generation: 0,
        }
    }
}

/// Edge lists stay inline for the common small fan-in/fan-out case.
pub(crate) type EdgeList = SmallVec<[CellId; 4]>;

/// Untyped per-cell state.
pub(crate) struct Slot {
    pub(crate) name: Arc<str>,
    pub(crate) status: CellStatus,
    /// Cells this cell read during its last run.
    pub(crate) masters: EdgeList,
    /// Cells that read this cell during their last run.
    pub(crate) slaves: EdgeList,
    /// Revision at which the committed value last actually changed.
    pub(crate) changed_at: u64,
    /// Revision at which freshness was last confirmed.
    pub(crate) verified_at: u64,
    /// Tear the cell down when its last slave disconnects.
    pub(crate) auto_destroy: bool,
    /// Restart requested while the handler was running.
    pub(crate) poked: bool,
    pub(crate) fibers: Option<FiberCache>,
    /// Stored while `Pending`/`Mock` so readers re-raise the same handle.
    pub(crate) suspension: Option<Suspension>,
    /// Taken out of the slot for the duration of a handler run.
    pub(crate) core: Option<Box<dyn CellCore>>,
}

impl Slot {
    pub(crate) fn new(name: Arc<str>, core: Box<dyn CellCore>) -> Self {
        Self {
            name,
            status: CellStatus::Obsolete,
            masters: EdgeList::new(),
            slaves: EdgeList::new(),
            changed_at: 0,
            verified_at: 0,
            auto_destroy: false,
            poked: false,
            fibers: None,
            suspension: None,
            core: Some(core),
        }
    }
}

/// Result of one handler invocation, reduced to what the untyped commit
/// needs to know.
pub(crate) enum RawOutcome {
    Committed { changed: bool },
    Failed { changed: bool },
    Suspended { suspension: Suspension, mock: bool },
}

/// Object-safe face of the value-typed half of a cell.
pub(crate) trait CellCore: Send {
    /// Run the handler against the suggested value and commit the typed
    /// parts of the outcome (value, failure, ownership).
    fn evaluate(&mut self, scope: &Scope<'_>, id: CellId) -> RawOutcome;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn failure(&self) -> Option<Failure>;
    fn take_failure(&mut self) -> Option<Failure>;

    /// Dispose the committed value if this cell owns it. Used on teardown.
    fn dispose_value(&mut self, owners: &Mutex<Owning>, id: CellId);
}

/// Disposal hook for cells whose committed values the graph owns.
pub(crate) struct OwnHook<V> {
    pub(crate) identity: Box<dyn Fn(&V) -> usize + Send + Sync>,
    pub(crate) dispose: Box<dyn Fn(&V) + Send + Sync>,
}

/// The value-typed half of a cell.
pub(crate) struct TypedCore<V: Value> {
    pub(crate) handler: Box<dyn Fn(&Scope<'_>, Option<&V>) -> crate::error::Eval<V> + Send + Sync>,
    pub(crate) actual: Option<V>,
    pub(crate) suggested: Option<V>,
    pub(crate) failure: Option<Failure>,
    pub(crate) owned: Option<OwnHook<V>>,
}

impl<V: Value> TypedCore<V> {
    fn claim(&self, owners: &Mutex<Owning>, id: CellId, value: &V) {
        if let Some(hook) = &self.owned {
            owners.lock().claim((hook.identity)(value), id);
        }
    }

    fn dispose_replaced(&self, owners: &Mutex<Owning>, id: CellId, prev: &V, next: &V) {
        let Some(hook) = &self.owned else {
            return;
        };
        let prev_identity = (hook.identity)(prev);
        if prev_identity == (hook.identity)(next) {
            return;
        }
        if owners.lock().release(prev_identity, id) {
            dispose_guarded(&hook.dispose, prev);
        }
    }
}

fn dispose_guarded<V>(dispose: &(dyn Fn(&V) + Send + Sync), value: &V) {
    if catch_unwind(AssertUnwindSafe(|| dispose(value))).is_err() {
        tracing::warn!("disposing an owned value panicked");
    }
}

impl<V: Value> CellCore for TypedCore<V> {
    fn evaluate(&mut self, scope: &Scope<'_>, id: CellId) -> RawOutcome {
        match (self.handler)(scope, self.suggested.as_ref()) {
            Ok(next) => {
                let had_failure = self.failure.is_some();
                self.failure = None;
                self.suggested = None;

                let owners = scope.owners();
                let changed = match self.actual.take() {
                    Some(prev) => {
                        let next = crate::conform::conform(next, &prev);
                        let changed = had_failure || next != prev;
                        self.dispose_replaced(owners, id, &prev, &next);
                        self.claim(owners, id, &next);
                        self.actual = Some(next);
                        changed
                    }
                    None => {
                        self.claim(owners, id, &next);
                        self.actual = Some(next);
                        true
                    }
                };
                RawOutcome::Committed { changed }
            }
            Err(Interrupt::Failed(failure)) => {
                let changed = match &self.failure {
                    Some(prev) => !prev.same(&failure),
                    None => true,
                };
                self.failure = Some(failure);
                RawOutcome::Failed { changed }
            }
            Err(Interrupt::Pending(suspension)) => {
                self.failure = None;
                // A fallback supplied through the suggestion mechanism turns
                // the wait into a Mock: readers keep seeing the fallback (or
                // the previous committed value) until the result lands.
                let mock = match scope.take_suggestion::<V>() {
                    Some(fallback) => {
                        if self.actual.is_none() {
                            self.actual = Some(fallback);
                        }
                        true
                    }
                    None => false,
                };
                RawOutcome::Suspended { suspension, mock }
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn failure(&self) -> Option<Failure> {
        self.failure.clone()
    }

    fn take_failure(&mut self) -> Option<Failure> {
        self.failure.take()
    }

    fn dispose_value(&mut self, owners: &Mutex<Owning>, id: CellId) {
        let (Some(hook), Some(actual)) = (&self.owned, &self.actual) else {
            return;
        };
        if owners.lock().release((hook.identity)(actual), id) {
            dispose_guarded(&hook.dispose, actual);
        }
    }
}

struct Entry {
    generation: u32,
    slot: Option<Slot>,
}

/// The slot table. Freed indices are recycled through a free list; the
/// generation bump on free is what invalidates outstanding handles.
#[derive(Default)]
pub(crate) struct Arena {
    entries: Vec<Entry>,
    free: Vec<u32>,
}

impl Arena {
    pub(crate) fn alloc(&mut self, slot: Slot) -> CellId {
        match self.free.pop() {
            Some(index) => {
                let entry = &mut self.entries[index as usize];
                entry.slot = Some(slot);
                CellId {
                    index,
                    generation: entry.generation,
                }
            }
            None => {
                let index = self.entries.len() as u32;
                self.entries.push(Entry {
                    generation: 0,
                    slot: Some(slot),
                });
                CellId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    pub(crate) fn get(&self, id: CellId) -> Option<&Slot> {
        let entry = self.entries.get(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.slot.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: CellId) -> Option<&mut Slot> {
        let entry = self.entries.get_mut(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.slot.as_mut()
    }

    /// Panicking accessor for paths where a stale handle is a usage error.
    pub(crate) fn slot_mut(&mut self, id: CellId) -> &mut Slot {
        self.get_mut(id)
            .unwrap_or_else(|| panic!("cell {id:?} used after destroy"))
    }

    /// Free the slot, invalidating every outstanding handle to it.
    pub(crate) fn free(&mut self, id: CellId) -> Option<Slot> {
        let entry = self.entries.get_mut(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        let slot = entry.slot.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(slot)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.slot.is_some()).count()
    }
}
