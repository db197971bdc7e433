//! pfx-reconcile
//!
//! Diff engine for the prefix synchroniser.
//!
//! Architectural decisions:
//! - The desired set is whatever the store returned on the last fetch
//! - KnownState is owned by exactly one [`DiffEngine`]; nothing else mutates it
//! - A cycle yields disjoint `added` / `removed` sets, never overlapping
//! - Empty batches do not exist: [`PrefixBatch`] is non-empty by construction
//!
//! Deterministic, pure logic. No IO. No store or routing calls.

mod engine;
mod types;

pub use engine::{reconcile, DiffEngine};
pub use types::*;
