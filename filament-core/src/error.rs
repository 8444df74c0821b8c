//! Failure Taxonomy
//!
//! Three kinds of things unwind out of a computation, and they must never be
//! confused:
//!
//! - **Suspension** — a value is not available *yet*. This is control flow,
//!   not an error: it carries a resume handle and is never logged as a
//!   failure. Modeled as [`Interrupt::Pending`].
//! - **Ordinary failure** — terminal for the current pass. Committed onto
//!   the cell or task that raised it and re-raised to readers until the next
//!   recomputation. Modeled as [`Interrupt::Failed`] / [`Failure`].
//! - **Contract violation** — misuse of the engine (reading a destroyed
//!   cell, writing a cell from its own handler). These panic immediately
//!   with a descriptive message rather than silently misbehaving.
//!
//! Both suspensions and ordinary failures propagate through the same
//! mechanism: handlers return [`Eval`] and use `?`, so control unwinds to
//! the nearest caller prepared to deal with an interrupt.
//!
//! # Rollback Chains
//!
//! A failure may carry an ordered list of revert closures. An action that
//! applied an optimistic mutation attaches its revert step while the failure
//! propagates ([`Failure::with_rollback`]); whoever finally handles the
//! failure invokes the chain ([`Failure::rollback`]), undoing the mutations
//! in reverse application order. The chain is composed by construction on
//! the failure value itself, so nested optimistic layers unwind correctly
//! without any shared registry.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::fiber::Suspension;

/// What went wrong, minus the rollback bookkeeping.
#[derive(Debug, Error)]
pub enum FailureKind {
    #[error("{0}")]
    Message(String),

    /// A cell read itself, directly or through its masters, during its own
    /// evaluation.
    #[error("dependency cycle detected in `{0}`")]
    Cycle(String),

    #[error(transparent)]
    Source(Box<dyn std::error::Error + Send + Sync>),
}

type Revert = Box<dyn FnOnce() + Send>;

struct FailureInner {
    kind: FailureKind,
    /// Revert closures in attachment order; the innermost optimistic
    /// mutation attaches first.
    reverts: Mutex<Vec<Revert>>,
}

/// A terminal failure for one evaluation pass.
///
/// Cheap to clone; clones share the same identity and rollback chain, which
/// is what lets a failure live on a cell while readers hold copies of it.
#[derive(Clone)]
pub struct Failure {
    inner: Arc<FailureInner>,
}

impl Failure {
    pub fn new(message: impl Into<String>) -> Self {
        Self::from_kind(FailureKind::Message(message.into()))
    }

    pub fn from_error(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::from_kind(FailureKind::Source(Box::new(source)))
    }

    pub(crate) fn cycle(name: &str) -> Self {
        Self::from_kind(FailureKind::Cycle(name.to_string()))
    }

    fn from_kind(kind: FailureKind) -> Self {
        Self {
            inner: Arc::new(FailureInner {
                kind,
                reverts: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn kind(&self) -> &FailureKind {
        &self.inner.kind
    }

    /// Two handles to the same committed failure compare equal; equal
    /// messages on distinct failures do not.
    pub fn same(&self, other: &Failure) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Attach a revert step to run when this failure is finally handled.
    ///
    /// Returns the same failure, so the attachment composes with `?`:
    ///
    /// ```ignore
    /// apply_optimistic_insert(&todos);
    /// push_to_server(&todo).map_err(|i| {
    ///     i.with_rollback(move || remove_optimistic_insert(&todos))
    /// })?;
    /// ```
    pub fn with_rollback(self, revert: impl FnOnce() + Send + 'static) -> Self {
        self.inner.reverts.lock().push(Box::new(revert));
        self
    }

    /// Run the attached rollback chain.
    ///
    /// Reverts run in attachment order, which is reverse application order
    /// of the optimistic mutations. A revert that panics is logged and stops
    /// the remainder of the chain; it is never re-raised, so the original
    /// failure stays visible.
    pub fn rollback(&self) {
        let reverts: Vec<Revert> = std::mem::take(&mut *self.inner.reverts.lock());
        for revert in reverts {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(revert)) {
                let detail = panic
                    .downcast_ref::<String>()
                    .map(String::as_str)
                    .or_else(|| panic.downcast_ref::<&str>().copied())
                    .unwrap_or("non-string panic");
                tracing::error!(failure = %self, detail, "rollback step failed");
                break;
            }
        }
    }

}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner.kind, f)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("kind", &self.inner.kind)
            .field("reverts", &self.inner.reverts.lock().len())
            .finish()
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.inner.kind {
            FailureKind::Source(source) => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Failures committed on cells compare by identity: readers that re-raise
/// the same committed failure observe one error, not a stream of new ones.
impl PartialEq for Failure {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

/// The two-variant unwind type: not-yet vs. never.
#[derive(Debug)]
pub enum Interrupt {
    /// The value is still being produced; retry after the carried handle
    /// resolves.
    Pending(Suspension),
    /// Terminal failure for this pass.
    Failed(Failure),
}

impl Interrupt {
    pub fn failure(message: impl Into<String>) -> Self {
        Interrupt::Failed(Failure::new(message))
    }

    pub fn suspension(&self) -> Option<&Suspension> {
        match self {
            Interrupt::Pending(suspension) => Some(suspension),
            Interrupt::Failed(_) => None,
        }
    }

    pub fn failed(&self) -> Option<&Failure> {
        match self {
            Interrupt::Failed(failure) => Some(failure),
            Interrupt::Pending(_) => None,
        }
    }

    /// Attach a revert step if this interrupt is a failure.
    ///
    /// Suspensions pass through untouched: an optimistic mutation must not
    /// be reverted just because the pass will be replayed.
    pub fn with_rollback(self, revert: impl FnOnce() + Send + 'static) -> Self {
        match self {
            Interrupt::Failed(failure) => Interrupt::Failed(failure.with_rollback(revert)),
            pending => pending,
        }
    }
}

impl From<Failure> for Interrupt {
    fn from(failure: Failure) -> Self {
        Interrupt::Failed(failure)
    }
}

/// Result of one evaluation pass.
pub type Eval<T> = Result<T, Interrupt>;
