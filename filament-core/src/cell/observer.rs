//! Observer Hook Points
//!
//! The engine does not schedule rendering or track external observers
//! itself; it reports the two events a binding layer needs and leaves the
//! policy to it:
//!
//! - [`observed`](Observer::observed) — a cell's value was read. An
//!   integration layer uses this to record which component is looking at
//!   which cell.
//! - [`changed`](Observer::changed) — a cell's committed value changed (or
//!   the cell was restarted). An integration layer uses this to schedule
//!   re-rendering, which re-pulls the roots it cares about.
//!
//! Both hooks are called outside the engine's internal locks, so an
//! implementation may re-enter the runtime freely.

use crate::cell::CellId;

/// Binding-layer callbacks; all methods default to no-ops.
pub trait Observer: Send + Sync + 'static {
    fn observed(&self, cell: CellId, name: &str) {
        let _ = (cell, name);
    }

    fn changed(&self, cell: CellId, name: &str) {
        let _ = (cell, name);
    }
}

/// Observer used when the caller does not install one.
pub(crate) struct NullObserver;

impl Observer for NullObserver {}
