//! Ownership Tracking
//!
//! Cells may commit values that hold real resources (connections, caches,
//! child stores). When such a value is replaced, or its cell is torn down,
//! someone has to dispose it — but `conform` deliberately shares value
//! references across cells, so naive disposal would run twice.
//!
//! The tracker maps a value's identity to the cell that first committed it.
//! Only the recorded owner may dispose the value, and the record is removed
//! in the same step, so disposal runs exactly once no matter how many cells
//! share the reference.

use std::collections::HashMap;

use crate::cell::CellId;

/// Identity-keyed owner registry.
///
/// Identities are opaque `usize` tokens; for `Arc`-backed values this is the
/// allocation address, which is exactly the sharing unit `conform` preserves.
#[derive(Default)]
pub(crate) struct Owning {
    owners: HashMap<usize, CellId>,
}

impl Owning {
    /// Record `owner` for `identity` unless some cell already claimed it.
    pub(crate) fn claim(&mut self, identity: usize, owner: CellId) {
        self.owners.entry(identity).or_insert(owner);
    }

    /// Release `identity` if `owner` holds the claim.
    ///
    /// Returns true when the caller was the owner and should dispose the
    /// value; the claim is gone afterwards.
    pub(crate) fn release(&mut self, identity: usize, owner: CellId) -> bool {
        match self.owners.get(&identity) {
            Some(current) if *current == owner => {
                self.owners.remove(&identity);
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn owner(&self, identity: usize) -> Option<CellId> {
        self.owners.get(&identity).copied()
    }
}
