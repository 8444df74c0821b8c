//! Cell Runtime
//!
//! The runtime owns the cell arena and drives the pull-based evaluation
//! protocol:
//!
//! 1. A read of an `Obsolete` cell runs its handler. Reads the handler
//!    performs through its [`Scope`] establish master/slave edges for this
//!    run; edges not re-established on the next clean run are pruned.
//!
//! 2. A committed change bumps the revision clock, stamps the cell, and
//!    marks dependents: settled slaves go to `Check`, suspended slaves are
//!    restarted. Nothing recomputes until something pulls it.
//!
//! 3. A `Check` cell resolves lazily: it demands its masters become
//!    `Actual`, then compares their change stamps against its own verified
//!    stamp. If no master actually changed, it settles back untouched —
//!    this is the early cutoff that keeps unrelated graph branches cold.
//!
//! 4. A handler that suspends parks the cell as `Pending` (or `Mock` when
//!    it suggested a fallback); its fiber cache is preserved so the next
//!    run replays resolved reads from cache.
//!
//! # Locking
//!
//! All graph state sits behind one mutex, but the lock is never held across
//! a handler invocation: evaluation takes the cell's typed core out of its
//! slot, runs it unlocked, and commits the result afterwards. Handlers may
//! therefore freely re-enter the runtime. Execution is single-threaded
//! cooperative; the lock makes the structure sound, not concurrent.

use std::any::Any;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::actions::QueueRegistry;
use crate::cell::arena::{Arena, CellCore, CellId, OwnHook, RawOutcome, Slot, TypedCore};
use crate::cell::observer::{NullObserver, Observer};
use crate::cell::status::CellStatus;
use crate::cell::{OwnedValue, Value};
use crate::error::{Eval, Failure, Interrupt};
use crate::fiber::{Completer, FiberCache, RunOwner};
use crate::owning::Owning;
use crate::pool::{ArrayPool, Lease};

pub(crate) struct GraphState {
    pub(crate) arena: Arena,
    pub(crate) revision: u64,
    pub(crate) pool: ArrayPool<CellId>,
}

pub(crate) struct Shared {
    pub(crate) state: Mutex<GraphState>,
    pub(crate) owners: Mutex<Owning>,
    pub(crate) observer: Box<dyn Observer>,
    pub(crate) registry: QueueRegistry,
}

/// Handle to one computation graph.
///
/// Clones share the same graph. All evaluation happens on the calling
/// thread; many cells and tasks may be *outstanding* at once, but only one
/// computation runs at a time.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) shared: Arc<Shared>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_observer(NullObserver)
    }

    /// Create a runtime reporting reads and changes to `observer`.
    pub fn with_observer(observer: impl Observer) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(GraphState {
                    arena: Arena::default(),
                    revision: 0,
                    pool: ArrayPool::new(),
                }),
                owners: Mutex::new(Owning::default()),
                observer: Box::new(observer),
                registry: QueueRegistry::default(),
            }),
        }
    }

    /// Create a computed cell.
    ///
    /// The handler receives the run's [`Scope`] and, on the write path, the
    /// suggested value. It may read other cells, open fibers, raise a
    /// failure, or suspend.
    pub fn cell<V, F>(&self, name: impl Into<Arc<str>>, handler: F) -> CellRef<V>
    where
        V: Value,
        F: Fn(&Scope<'_>, Option<&V>) -> Eval<V> + Send + Sync + 'static,
    {
        self.insert_cell(name.into(), Box::new(handler), None)
    }

    /// Create a plain observable cell holding `initial` until written.
    pub fn input<V: Value + Sync>(&self, name: impl Into<Arc<str>>, initial: V) -> CellRef<V> {
        self.cell(name, move |_scope, next| {
            Ok(next.cloned().unwrap_or_else(|| initial.clone()))
        })
    }

    /// Create a computed cell whose committed values the graph owns.
    ///
    /// The ownership tracker records this cell against each committed
    /// value's identity; on replacement or teardown the value is disposed
    /// exactly once, by the cell that still holds the claim.
    pub fn owned_cell<V, F>(&self, name: impl Into<Arc<str>>, handler: F) -> CellRef<V>
    where
        V: OwnedValue,
        F: Fn(&Scope<'_>, Option<&V>) -> Eval<V> + Send + Sync + 'static,
    {
        let hook = OwnHook {
            identity: Box::new(|value: &V| value.identity()),
            dispose: Box::new(|value: &V| value.dispose()),
        };
        self.insert_cell(name.into(), Box::new(handler), Some(hook))
    }

    fn insert_cell<V: Value>(
        &self,
        name: Arc<str>,
        handler: Box<dyn Fn(&Scope<'_>, Option<&V>) -> Eval<V> + Send + Sync>,
        owned: Option<OwnHook<V>>,
    ) -> CellRef<V> {
        let core: Box<dyn CellCore> = Box::new(TypedCore {
            handler,
            actual: None,
            suggested: None,
            failure: None,
            owned,
        });
        let id = self
            .shared
            .state
            .lock()
            .arena
            .alloc(Slot::new(name, core));
        CellRef {
            id,
            _marker: PhantomData,
        }
    }

    /// Read a cell, actualizing it first if needed.
    pub(crate) fn pull<V: Value>(&self, id: CellId, scope: Option<&Scope<'_>>) -> Eval<V> {
        let name = {
            let state = self.shared.state.lock();
            match state.arena.get(id) {
                Some(slot) => slot.name.clone(),
                None => panic!("cell {id:?} read after destroy"),
            }
        };
        self.shared.observer.observed(id, &name);

        loop {
            self.ensure(id)?;
            self.track(scope, id);

            let state = self.shared.state.lock();
            let state = &*state;
            let Some(slot) = state.arena.get(id) else {
                panic!("cell {id:?} read after destroy");
            };
            match slot.status {
                CellStatus::Actual | CellStatus::Mock => {
                    let core = slot
                        .core
                        .as_ref()
                        .expect("settled cell has its core in place");
                    let core = core
                        .as_any()
                        .downcast_ref::<TypedCore<V>>()
                        .unwrap_or_else(|| {
                            panic!("cell `{}` read with a different value type", slot.name)
                        });
                    if slot.status == CellStatus::Actual {
                        if let Some(failure) = &core.failure {
                            return Err(Interrupt::Failed(failure.clone()));
                        }
                    }
                    match &core.actual {
                        Some(value) => return Ok(value.clone()),
                        None => panic!("cell `{}` settled without a value", slot.name),
                    }
                }
                CellStatus::Pending => {
                    let suspension = slot
                        .suspension
                        .clone()
                        .expect("pending cell holds its suspension");
                    return Err(Interrupt::Pending(suspension));
                }
                // Restarted between actualization and readout; go again.
                _ => continue,
            }
        }
    }

    /// Establish the master/slave edge for a tracked read.
    ///
    /// Called after actualization: an edge added before the master's commit
    /// would let that very commit restart the reader for a value it is
    /// about to observe.
    fn track(&self, scope: Option<&Scope<'_>>, id: CellId) {
        let Some(scope) = scope else { return };
        let Some(reader) = scope.cell() else { return };
        if reader == id {
            return;
        }
        let mut state = self.shared.state.lock();
        if let Some(slot) = state.arena.get_mut(id) {
            if !slot.slaves.contains(&reader) {
                slot.slaves.push(reader);
            }
        }
        scope.record_read(id);
    }

    /// Drive a cell to a settled status (`Actual`, `Pending` or `Mock`).
    fn ensure(&self, id: CellId) -> Result<(), Interrupt> {
        enum Step {
            Done,
            Cycle(Arc<str>),
            Verify {
                masters: Lease<CellId>,
                verified_at: u64,
            },
            Run {
                core: Box<dyn CellCore>,
                fibers: FiberCache,
                reads: Lease<CellId>,
                name: Arc<str>,
            },
        }

        loop {
            let step = {
                let mut state = self.shared.state.lock();
                let state = &mut *state;
                let Some(slot) = state.arena.get_mut(id) else {
                    panic!("cell {id:?} read after destroy");
                };
                match slot.status {
                    CellStatus::Actual | CellStatus::Pending | CellStatus::Mock => Step::Done,
                    CellStatus::Computing => Step::Cycle(slot.name.clone()),
                    CellStatus::Check => {
                        let mut masters = state.pool.take();
                        masters.extend(slot.masters.iter().copied());
                        Step::Verify {
                            masters,
                            verified_at: slot.verified_at,
                        }
                    }
                    CellStatus::Obsolete => {
                        let core = slot
                            .core
                            .take()
                            .expect("obsolete cell has its core in place");
                        slot.status = CellStatus::Computing;
                        slot.suspension = None;
                        let fibers = slot.fibers.take().unwrap_or_else(FiberCache::new);
                        let reads = state.pool.take();
                        let name = slot.name.clone();
                        Step::Run {
                            core,
                            fibers,
                            reads,
                            name,
                        }
                    }
                }
            };

            match step {
                Step::Done => return Ok(()),
                Step::Cycle(name) => {
                    return Err(Interrupt::Failed(Failure::cycle(&name)));
                }
                Step::Verify {
                    masters,
                    verified_at,
                } => {
                    for &master in masters.iter() {
                        // A master's own failure or suspension surfaces when
                        // the handler re-reads it; here only freshness counts.
                        let _ = self.ensure(master);
                    }

                    let mut state = self.shared.state.lock();
                    let state = &mut *state;
                    let promote = masters.iter().any(|&master| {
                        match state.arena.get(master) {
                            Some(m) => m.changed_at > verified_at,
                            // A destroyed master counts as changed.
                            None => true,
                        }
                    });
                    state.pool.release(masters);
                    let revision = state.revision;
                    if let Some(slot) = state.arena.get_mut(id) {
                        if slot.status == CellStatus::Check {
                            if promote {
                                slot.status = CellStatus::Obsolete;
                            } else {
                                slot.status = CellStatus::Actual;
                                slot.verified_at = revision;
                            }
                        }
                    }
                }
                Step::Run {
                    mut core,
                    fibers,
                    reads,
                    name,
                } => {
                    let owner: Arc<dyn RunOwner> = Arc::new(CellOwner {
                        shared: Arc::downgrade(&self.shared),
                        id,
                        name: name.clone(),
                    });
                    let scope = Scope::for_cell(self, id, owner, fibers.clone(), reads);
                    let outcome = core.evaluate(&scope, id);
                    let reads = scope
                        .into_reads()
                        .expect("cell scope carries a read lease");

                    let commit = self.commit(id, core, fibers, reads, outcome);
                    if commit.report {
                        tracing::debug!(cell = %name, "committed change");
                        self.shared.observer.changed(id, &name);
                    }
                    for dead in commit.teardown {
                        self.destroy_cell(dead);
                    }
                }
            }
        }
    }

    fn commit(
        &self,
        id: CellId,
        core: Box<dyn CellCore>,
        fibers: FiberCache,
        reads: Lease<CellId>,
        outcome: RawOutcome,
    ) -> CommitResult {
        let mut result = CommitResult {
            report: false,
            teardown: Vec::new(),
        };
        let mut state = self.shared.state.lock();
        let state = &mut *state;

        match outcome {
            RawOutcome::Committed { changed } => {
                // Compaction pass: re-read masters are swapped to the front,
                // the stale tail is disconnected and truncated, new reads
                // are appended. Conditionally-read dependencies drop off
                // here when their branch stops being taken.
                let mut masters = std::mem::take(&mut state.arena.slot_mut(id).masters);
                let mut live = 0;
                for i in 0..masters.len() {
                    if reads.contains(&masters[i]) {
                        masters.swap(live, i);
                        live += 1;
                    }
                }
                for &stale in &masters[live..] {
                    disconnect(state, stale, id, &mut result.teardown);
                }
                masters.truncate(live);
                for &read in reads.iter() {
                    if !masters.contains(&read) {
                        masters.push(read);
                    }
                }

                let slot = state.arena.slot_mut(id);
                slot.masters = masters;
                slot.core = Some(core);
                slot.status = CellStatus::Actual;
                slot.suspension = None;
                slot.fibers = None;
                fibers.destroy();

                if changed {
                    state.revision += 1;
                    let revision = state.revision;
                    state.arena.slot_mut(id).changed_at = revision;
                    invalidate_slaves(state, id);
                    result.report = true;
                }
                let revision = state.revision;
                let slot = state.arena.slot_mut(id);
                slot.verified_at = revision;
                if slot.poked {
                    slot.poked = false;
                    slot.status = CellStatus::Obsolete;
                }
            }
            RawOutcome::Failed { changed } => {
                // The run did not complete a full read pass, so old edges
                // stay; pruning only happens on clean commits.
                merge_reads(state, id, &reads);
                let slot = state.arena.slot_mut(id);
                slot.core = Some(core);
                slot.status = CellStatus::Actual;
                slot.suspension = None;
                slot.fibers = None;
                fibers.destroy();

                if changed {
                    state.revision += 1;
                    let revision = state.revision;
                    state.arena.slot_mut(id).changed_at = revision;
                    invalidate_slaves(state, id);
                    result.report = true;
                }
                let revision = state.revision;
                let slot = state.arena.slot_mut(id);
                slot.verified_at = revision;
                if slot.poked {
                    slot.poked = false;
                    slot.status = CellStatus::Obsolete;
                }
            }
            RawOutcome::Suspended { suspension, mock } => {
                merge_reads(state, id, &reads);
                // An operation may resolve synchronously from inside its
                // start closure; in that case the pass re-runs immediately
                // instead of parking.
                let resolved = suspension.resolved_in(&fibers).unwrap_or(false);
                let slot = state.arena.slot_mut(id);
                slot.core = Some(core);
                slot.fibers = Some(fibers);
                if resolved || slot.poked {
                    slot.poked = false;
                    slot.status = CellStatus::Obsolete;
                    slot.suspension = None;
                } else {
                    slot.status = if mock {
                        CellStatus::Mock
                    } else {
                        CellStatus::Pending
                    };
                    slot.suspension = Some(suspension);
                }
            }
        }

        state.pool.release(reads);
        result
    }

    pub(crate) fn destroy_cell(&self, id: CellId) {
        let mut worklist = vec![id];
        while let Some(id) = worklist.pop() {
            let slot = self.shared.state.lock().arena.free(id);
            let Some(mut slot) = slot else { continue };

            if let Some(core) = slot.core.as_mut() {
                core.dispose_value(&self.shared.owners, id);
            }
            if let Some(fibers) = slot.fibers.take() {
                fibers.destroy();
            }

            let mut state = self.shared.state.lock();
            let state = &mut *state;
            for &master in &slot.masters {
                if let Some(m) = state.arena.get_mut(master) {
                    if let Some(pos) = m.slaves.iter().position(|&s| s == id) {
                        m.slaves.swap_remove(pos);
                    }
                    if m.slaves.is_empty() && m.auto_destroy {
                        worklist.push(master);
                    }
                }
            }
            for &slave in &slot.slaves {
                if let Some(s) = state.arena.get_mut(slave) {
                    if let Some(pos) = s.masters.iter().position(|&m| m == id) {
                        s.masters.swap_remove(pos);
                    }
                    match s.status {
                        CellStatus::Actual | CellStatus::Pending | CellStatus::Mock => {
                            s.status = CellStatus::Obsolete;
                            s.suspension = None;
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

struct CommitResult {
    report: bool,
    teardown: Vec<CellId>,
}

fn disconnect(
    state: &mut GraphState,
    master: CellId,
    slave: CellId,
    teardown: &mut Vec<CellId>,
) {
    if let Some(m) = state.arena.get_mut(master) {
        if let Some(pos) = m.slaves.iter().position(|&s| s == slave) {
            m.slaves.swap_remove(pos);
        }
        if m.slaves.is_empty() && m.auto_destroy {
            teardown.push(master);
        }
    }
}

fn merge_reads(state: &mut GraphState, id: CellId, reads: &[CellId]) {
    let slot = state.arena.slot_mut(id);
    for &read in reads {
        if !slot.masters.contains(&read) {
            slot.masters.push(read);
        }
    }
}

/// Mark dependents of a changed (or restarted) cell.
///
/// Settled slaves move to `Check` and resolve lazily; suspended slaves are
/// restarted outright since their parked pass read a value that is gone. A
/// slave caught mid-run is flagged to re-run after its commit.
fn invalidate_slaves(state: &mut GraphState, id: CellId) {
    let mut stack = state.pool.take();
    if let Some(slot) = state.arena.get(id) {
        stack.extend(slot.slaves.iter().copied());
    }
    while let Some(next) = stack.pop() {
        let Some(slot) = state.arena.get_mut(next) else {
            continue;
        };
        match slot.status {
            CellStatus::Actual => {
                slot.status = CellStatus::Check;
                stack.extend(slot.slaves.iter().copied());
            }
            CellStatus::Pending | CellStatus::Mock => {
                slot.status = CellStatus::Obsolete;
                slot.suspension = None;
                stack.extend(slot.slaves.iter().copied());
            }
            CellStatus::Computing => {
                slot.poked = true;
            }
            CellStatus::Check | CellStatus::Obsolete => {}
        }
    }
    state.pool.release(stack);
}

/// Restart a cell: obsolete it, invalidate dependents, report the change.
/// Fibers are left alone so resolved reads replay from cache.
pub(crate) fn retry_slot(shared: &Arc<Shared>, id: CellId) {
    let name = {
        let mut state = shared.state.lock();
        let state = &mut *state;
        let Some(slot) = state.arena.get_mut(id) else {
            // A resolution racing a teardown is dropped, not an error.
            return;
        };
        let name = slot.name.clone();
        match slot.status {
            CellStatus::Computing => slot.poked = true,
            _ => {
                slot.status = CellStatus::Obsolete;
                slot.suspension = None;
            }
        }
        invalidate_slaves(state, id);
        name
    };
    shared.observer.changed(id, &name);
}

/// Cancel a cell: unwind any committed failure's rollback chain, abort its
/// fiber cache, then restart it.
pub(crate) fn abort_slot(shared: &Arc<Shared>, id: CellId) {
    let (name, failure, fibers) = {
        let mut state = shared.state.lock();
        let state = &mut *state;
        let Some(slot) = state.arena.get_mut(id) else {
            return;
        };
        let name = slot.name.clone();
        let failure = slot.core.as_mut().and_then(|core| core.take_failure());
        let fibers = slot.fibers.take();
        match slot.status {
            CellStatus::Computing => slot.poked = true,
            _ => {
                slot.status = CellStatus::Obsolete;
                slot.suspension = None;
            }
        }
        invalidate_slaves(state, id);
        (name, failure, fibers)
    };
    if let Some(failure) = failure {
        failure.rollback();
    }
    if let Some(fibers) = fibers {
        fibers.destroy();
    }
    shared.observer.changed(id, &name);
}

/// A cell acting as the owner of its fiber runs.
struct CellOwner {
    shared: Weak<Shared>,
    id: CellId,
    name: Arc<str>,
}

impl RunOwner for CellOwner {
    fn restart(&self) {
        if let Some(shared) = self.shared.upgrade() {
            retry_slot(&shared, self.id);
        }
    }

    fn abort(&self) {
        if let Some(shared) = self.shared.upgrade() {
            abort_slot(&shared, self.id);
        }
    }

    fn label(&self) -> Arc<str> {
        self.name.clone()
    }
}

/// Evaluation scope of one cell or task run.
///
/// The scope is the explicit replacement for an ambient "currently
/// computing" pointer: every operation that needs to know who is running —
/// tracked reads, fiber lookup, mock suggestions — goes through it, which
/// also keeps independent graphs fully isolated.
pub struct Scope<'rt> {
    rt: &'rt Runtime,
    cell: Option<CellId>,
    owner: Arc<dyn RunOwner>,
    fibers: FiberCache,
    reads: RefCell<Option<Lease<CellId>>>,
    suggestion: RefCell<Option<Box<dyn Any + Send>>>,
}

impl<'rt> Scope<'rt> {
    pub(crate) fn for_cell(
        rt: &'rt Runtime,
        id: CellId,
        owner: Arc<dyn RunOwner>,
        fibers: FiberCache,
        reads: Lease<CellId>,
    ) -> Self {
        Self {
            rt,
            cell: Some(id),
            owner,
            fibers,
            reads: RefCell::new(Some(reads)),
            suggestion: RefCell::new(None),
        }
    }

    pub(crate) fn for_task(
        rt: &'rt Runtime,
        owner: Arc<dyn RunOwner>,
        fibers: FiberCache,
    ) -> Self {
        Self {
            rt,
            cell: None,
            owner,
            fibers,
            reads: RefCell::new(None),
            suggestion: RefCell::new(None),
        }
    }

    /// Tracked read: establishes a dependency edge when called from a cell
    /// run. Task runs read without tracking.
    pub fn get<V: Value>(&self, cell: CellRef<V>) -> Eval<V> {
        self.rt.pull(cell.id, Some(self))
    }

    /// Untracked write to another cell.
    pub fn set<V: Value>(&self, cell: CellRef<V>, next: V) -> Eval<V> {
        cell.set(self.rt, next)
    }

    /// Read the fiber for `key`, starting the operation on first use.
    ///
    /// The same key read again in this run (including replays after a
    /// suspension) reaches the same fiber; `start` runs at most once.
    pub fn fiber<V: Clone + Send + 'static>(
        &self,
        key: impl Into<String>,
        start: impl FnOnce(Completer<V>),
    ) -> Eval<V> {
        self.fibers.value(key.into(), &self.owner, start)
    }

    /// Suggest a fallback value shown while this run is suspended.
    ///
    /// Only consulted when the handler goes on to suspend; a run that
    /// completes discards the suggestion.
    pub fn suggest<V: Value>(&self, fallback: V) {
        *self.suggestion.borrow_mut() = Some(Box::new(fallback));
    }

    pub fn runtime(&self) -> &Runtime {
        self.rt
    }

    pub(crate) fn owners(&self) -> &Mutex<Owning> {
        &self.rt.shared.owners
    }

    pub(crate) fn run_owner(&self) -> &Arc<dyn RunOwner> {
        &self.owner
    }

    pub(crate) fn cell(&self) -> Option<CellId> {
        self.cell
    }

    pub(crate) fn record_read(&self, id: CellId) {
        if let Some(reads) = self.reads.borrow_mut().as_mut() {
            if !reads.contains(&id) {
                reads.push(id);
            }
        }
    }

    pub(crate) fn take_suggestion<V: Value>(&self) -> Option<V> {
        let boxed = self.suggestion.borrow_mut().take()?;
        boxed.downcast::<V>().ok().map(|value| *value)
    }

    pub(crate) fn into_reads(self) -> Option<Lease<CellId>> {
        self.reads.into_inner()
    }
}

/// Typed handle to a cell.
pub struct CellRef<V> {
    id: CellId,
    _marker: PhantomData<fn() -> V>,
}

impl<V> Clone for CellRef<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for CellRef<V> {}

impl<V> std::fmt::Debug for CellRef<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CellRef").field(&self.id).finish()
    }
}

impl<V: Value> CellRef<V> {
    pub fn id(&self) -> CellId {
        self.id
    }

    /// Read the committed value, recomputing first if the cell is stale.
    pub fn get(&self, rt: &Runtime) -> Eval<V> {
        rt.pull(self.id, None)
    }

    /// Write a suggested value.
    ///
    /// The value is conformed against the previous suggestion and the
    /// committed value; a no-op write leaves the cell untouched. A genuine
    /// change obsoletes the cell and actualizes it immediately.
    pub fn set(&self, rt: &Runtime, next: V) -> Eval<V> {
        {
            let mut state = rt.shared.state.lock();
            let slot = state.arena.slot_mut(self.id);
            let name = slot.name.clone();
            let core = slot
                .core
                .as_mut()
                .unwrap_or_else(|| panic!("cell `{name}` written during its own evaluation"))
                .as_any_mut()
                .downcast_mut::<TypedCore<V>>()
                .unwrap_or_else(|| panic!("cell `{name}` written with a different value type"));

            let mut next = next;
            let mut accept = true;
            if let Some(suggested) = &core.suggested {
                next = crate::conform::conform(next, suggested);
                if next == *suggested {
                    accept = false;
                }
            }
            if accept {
                if let Some(actual) = &core.actual {
                    next = crate::conform::conform(next, actual);
                    if next == *actual {
                        accept = false;
                    }
                }
            }
            if accept {
                core.suggested = Some(next);
                slot.status = CellStatus::Obsolete;
                slot.suspension = None;
            }
        }
        self.get(rt)
    }

    /// Obsolete the cell and report the change; fibers are untouched, so a
    /// suspended pass replays resolved reads from cache.
    pub fn retry(&self, rt: &Runtime) {
        retry_slot(&rt.shared, self.id);
    }

    /// Roll back any committed failure, cancel outstanding fiber
    /// operations, and restart the cell.
    pub fn abort(&self, rt: &Runtime) {
        abort_slot(&rt.shared, self.id);
    }

    /// True while an asynchronous result is outstanding.
    pub fn pending(&self, rt: &Runtime) -> bool {
        self.status(rt).pending()
    }

    /// The committed failure, if the last pass raised one.
    pub fn error(&self, rt: &Runtime) -> Option<Failure> {
        let state = rt.shared.state.lock();
        match state.arena.get(self.id) {
            Some(slot) => slot.core.as_ref().and_then(|core| core.failure()),
            None => panic!("cell {:?} read after destroy", self.id),
        }
    }

    pub fn status(&self, rt: &Runtime) -> CellStatus {
        let state = rt.shared.state.lock();
        match state.arena.get(self.id) {
            Some(slot) => slot.status,
            None => panic!("cell {:?} read after destroy", self.id),
        }
    }

    /// Tear the cell down once its last slave edge disconnects.
    pub fn release_when_unused(&self, rt: &Runtime) {
        let mut state = rt.shared.state.lock();
        state.arena.slot_mut(self.id).auto_destroy = true;
    }

    /// Tear the cell down now: dispose the owned value, cancel fibers,
    /// disconnect edges, and cascade into unused auto-destroy masters.
    pub fn destroy(&self, rt: &Runtime) {
        rt.destroy_cell(self.id);
    }
}
