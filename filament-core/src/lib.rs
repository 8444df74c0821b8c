//! Filament Core
//!
//! This crate provides a reactive, pull-based incremental computation
//! engine. It implements:
//!
//! - Memoized computation cells with automatic dependency tracking
//! - Suspension: asynchronous results read as if they were synchronous
//! - Action queues with ordering, cancellation and optimistic rollback
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `cell`: the computation-node graph and its runtime
//! - `fiber`: per-run caches that replay asynchronous results
//! - `actions`: task queues, queries and cross-task ordering
//! - `conform`: structural reconciliation that keeps references stable
//!
//! # Example
//!
//! ```rust,ignore
//! use filament_core::{Runtime, Interrupt};
//!
//! let rt = Runtime::new();
//!
//! // A plain observable cell and a derived one.
//! let count = rt.input("count", 0);
//! let doubled = rt.cell("doubled", move |scope, _| Ok(scope.get(count)? * 2));
//!
//! assert_eq!(doubled.get(&rt).unwrap(), 0);
//! count.set(&rt, 21).unwrap();
//! assert_eq!(doubled.get(&rt).unwrap(), 42);
//!
//! // A cell backed by an asynchronous fetch: the first read suspends, the
//! // resolution invalidates it, the next read returns the result.
//! let todos = rt.cell("todos", move |scope, _| {
//!     scope.fiber("GET /todos", |completer| {
//!         spawn_fetch("/todos", completer) // resolves later
//!     })
//! });
//! ```
//!
//! Execution is single-threaded and cooperative: many cells and tasks may
//! be outstanding on pending operations at once, but computations run one
//! at a time on the calling thread, and nothing recomputes until it is
//! pulled.

pub mod actions;
pub mod cell;
pub mod conform;
pub mod error;
pub mod fiber;

mod owning;
mod pool;

pub use actions::{
    ActionFilter, ActionId, ActionIdentity, Queue, QueueMode, QueueStatus, TaskQuery,
};
pub use cell::{
    CellId, CellRef, CellStatus, Disposable, Observer, OwnedValue, Runtime, Scope, Value,
};
pub use conform::{conform, Conform};
pub use error::{Eval, Failure, FailureKind, Interrupt};
pub use fiber::{AbortSignal, Completer, Suspension};
