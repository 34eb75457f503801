//! Owned state of one query instance: its cache and its ledger.

use crate::history::Stamp;
use crate::types::History;

/// The cache and history of one query instance.
///
/// Only the reducer mutates a slice. The engine keeps it behind a mutex and
/// hands out snapshots or scoped borrows.
#[derive(Debug, Clone)]
pub struct SliceState<A, C> {
    /// Per-key attempt ledger.
    pub history: History<A>,

    /// Merged results.
    pub cache: C,

    sequence: u64,
}

impl<A, C: Default> Default for SliceState<A, C> {
    fn default() -> Self {
        Self {
            history: History::new(),
            cache: C::default(),
            sequence: 0,
        }
    }
}

impl<A, C: Default> SliceState<A, C> {
    /// Creates an empty slice.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<A, C> SliceState<A, C> {
    /// Returns the ledger.
    pub fn history(&self) -> &History<A> {
        &self.history
    }

    /// Returns the cache.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Allocates the stamp for the next ledger transition.
    pub fn next_stamp(&mut self, time: u64) -> Stamp {
        self.sequence += 1;
        Stamp {
            time,
            sequence: self.sequence,
        }
    }

    /// Number of transitions applied so far.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}
