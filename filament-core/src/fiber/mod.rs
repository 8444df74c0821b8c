//! Fibers
//!
//! A fiber converts a one-shot asynchronous operation into a repeatable,
//! synchronous-looking read. The first read under a key starts the operation
//! and suspends; replayed reads before resolution re-raise the same
//! suspension without starting anything; reads after resolution return the
//! value or re-raise the failure.
//!
//! This is the mechanism that lets handlers be written as straight-line
//! code: on suspension, control unwinds to the evaluation loop, and
//! re-entering the same handler replays every already-resolved read from
//! cache until it reaches the point that is still outstanding.
//!
//! Fibers are grouped per run in a [`FiberCache`], which shares one abort
//! signal across them; destroying the cache cancels every outstanding
//! operation it holds.

mod cache;
mod handle;

pub use handle::{AbortSignal, Completer, Suspension};

pub(crate) use cache::FiberCache;
pub(crate) use handle::RunOwner;
