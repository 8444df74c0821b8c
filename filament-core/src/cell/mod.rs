//! Cells
//!
//! A cell is a memoized computation node: a handler, a cached value, and
//! tracked edges to the cells it read on its last run. Reads pull values
//! through the graph; writes and asynchronous resolutions invalidate
//! dependents, which recompute lazily on their next read.
//!
//! # Concepts
//!
//! ## Masters and slaves
//!
//! A cell read by another is the reader's *master*; the reader is the
//! master's *slave*. Edges are discovered automatically while a handler
//! runs and are always mutual. Invalidation flows master to slave; demand
//! flows slave to master.
//!
//! ## Early cutoff
//!
//! A dependent is never recomputed more than once per actual upstream
//! change, and not at all when no master's committed value changed — a
//! recomputation that conforms to its previous value stops the wave.
//!
//! ## Suspension
//!
//! A handler that needs a result that is not available yet suspends
//! instead of blocking: control unwinds to the caller with a resume handle,
//! and the next run replays cached reads up to the unresolved point.

mod arena;
mod observer;
mod runtime;
mod status;

pub use arena::CellId;
pub use observer::Observer;
pub use runtime::{CellRef, Runtime, Scope};
pub use status::CellStatus;

use std::sync::Arc;

use crate::conform::Conform;

/// Bounds a cell value must satisfy.
///
/// `Conform` reconciles fresh values against committed ones, `PartialEq`
/// detects actual change for early cutoff, and `Clone` hands copies to
/// readers — share large values behind `Arc` to keep both cheap.
pub trait Value: Conform + PartialEq + Clone + Send + 'static {}

impl<T: Conform + PartialEq + Clone + Send + 'static> Value for T {}

/// A value with a teardown hook.
pub trait Disposable {
    fn dispose(&self);
}

/// A cell value the graph owns: it has a stable identity (the sharing unit
/// `conform` preserves) and a disposal hook run exactly once when the last
/// owning cell lets go.
pub trait OwnedValue: Value {
    fn identity(&self) -> usize;
    fn dispose(&self);
}

impl<T> OwnedValue for Arc<T>
where
    T: Disposable + PartialEq + Send + Sync + 'static,
{
    fn identity(&self) -> usize {
        Arc::as_ptr(self) as usize
    }

    fn dispose(&self) {
        T::dispose(self)
    }
}
