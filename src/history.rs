//! # History Ledger
//!
//! Every physical request leaves an entry in the ledger, nested under the
//! logical key that spawned it:
//!
//! ```text
//! History
//! ├── "sample1;sample2"
//! │   └── "sample1;sample2"  { attempts: 1, status: fulfilled, time: 100 }
//! └── "sample3"
//!     └── "sample3"          { attempts: 3, status: rejected,  time: 160 }
//! ```
//!
//! Nothing in this module has side effects except the three `record_*`
//! transitions, which only the reducer calls.

use crate::types::{
    AsyncStatus, FetchError, History, HistoryEntries, HistoryEntry, RequestId, RequestKey,
};

// =============================================================================
// Queries
// =============================================================================

/// Flattens the ledger into the entries that satisfy `predicate`.
///
/// The predicate receives the logical key, the physical request id and the
/// entry.
pub fn flatten_history<'a, A, P>(history: &'a History<A>, mut predicate: P) -> Vec<&'a HistoryEntry<A>>
where
    P: FnMut(&RequestKey, &RequestId, &HistoryEntry<A>) -> bool,
{
    history
        .iter()
        .flat_map(|(key, entries)| entries.iter().map(move |(id, entry)| (key, id, entry)))
        .filter(|(key, id, entry)| predicate(*key, *id, *entry))
        .map(|(_, _, entry)| entry)
        .collect()
}

/// Returns the entries that describe prior or in-flight coverage for a new
/// demand with key `key`.
///
/// Rejected entries cover nothing. Entries of `key` itself count only once
/// fulfilled; a pending one is judged by the admission controller instead.
pub fn flatten_filter_history<'a, A>(history: &'a History<A>, key: &RequestKey) -> Vec<&'a HistoryEntry<A>> {
    flatten_history(history, |k, _, entry| {
        !entry.is_rejected() && (k != key || entry.is_fulfilled())
    })
}

/// Returns true if `arg` was already requested by a non-rejected entry.
pub fn has_already_been_requested<A: PartialEq>(entries: &HistoryEntries<A>, arg: &A) -> bool {
    entries
        .values()
        .any(|entry| !entry.is_rejected() && &entry.arg == arg)
}

/// Returns true if a request for `arg` was rejected.
pub fn has_been_rejected<A: PartialEq>(entries: &HistoryEntries<A>, arg: &A) -> bool {
    entries
        .values()
        .any(|entry| entry.is_rejected() && &entry.arg == arg)
}

/// Returns true if a request for `arg` is in flight.
pub fn request_is_pending<A: PartialEq>(entries: &HistoryEntries<A>, arg: &A) -> bool {
    entries
        .values()
        .any(|entry| entry.is_pending() && &entry.arg == arg)
}

/// Returns the most recently transitioned entry.
pub fn most_recent_entry<A>(entries: &HistoryEntries<A>) -> Option<&HistoryEntry<A>> {
    entries.values().max_by_key(|entry| entry.sequence)
}

/// Returns the total number of dispatches across all entries.
pub fn cumulative_attempts<A>(entries: &HistoryEntries<A>) -> u32 {
    entries
        .values()
        .map(|entry| entry.attempts)
        .fold(0u32, u32::saturating_add)
}

/// Returns true if any entry has the given status.
pub fn any_with_status<A>(entries: &HistoryEntries<A>, status: AsyncStatus) -> bool {
    entries.values().any(|entry| entry.status == status)
}

// =============================================================================
// Transitions
// =============================================================================

/// Stamp applied to every transition.
#[derive(Debug, Clone, Copy)]
pub struct Stamp {
    /// Epoch seconds.
    pub time: u64,
    /// Ledger-wide sequence number.
    pub sequence: u64,
}

/// Inserts or refreshes an entry as Pending and counts the dispatch.
pub fn record_pending<A: Clone>(
    history: &mut History<A>,
    key: &RequestKey,
    request_id: &RequestId,
    arg: &A,
    stamp: Stamp,
) {
    let entries = history.entry(key.clone()).or_default();
    let attempts = entries
        .get(request_id)
        .map(|entry| entry.attempts)
        .unwrap_or(0)
        .saturating_add(1);

    entries.insert(
        request_id.clone(),
        HistoryEntry {
            arg: arg.clone(),
            attempts,
            status: AsyncStatus::Pending,
            error: None,
            time: stamp.time,
            sequence: stamp.sequence,
        },
    );
}

/// Marks an entry Fulfilled.
pub fn record_fulfilled<A: Clone>(
    history: &mut History<A>,
    key: &RequestKey,
    request_id: &RequestId,
    arg: &A,
    stamp: Stamp,
) {
    resolve(history, key, request_id, arg, AsyncStatus::Fulfilled, None, stamp);
}

/// Marks an entry Rejected and records the error.
pub fn record_rejected<A: Clone>(
    history: &mut History<A>,
    key: &RequestKey,
    request_id: &RequestId,
    arg: &A,
    error: FetchError,
    stamp: Stamp,
) {
    resolve(history, key, request_id, arg, AsyncStatus::Rejected, Some(error), stamp);
}

/// Resolves an entry in place. Attempts and dispatch time are preserved; an
/// entry that was somehow never recorded as pending counts as one attempt.
fn resolve<A: Clone>(
    history: &mut History<A>,
    key: &RequestKey,
    request_id: &RequestId,
    arg: &A,
    status: AsyncStatus,
    error: Option<FetchError>,
    stamp: Stamp,
) {
    let entries = history.entry(key.clone()).or_default();
    let entry = entries
        .entry(request_id.clone())
        .or_insert_with(|| HistoryEntry {
            arg: arg.clone(),
            attempts: 1,
            status: AsyncStatus::Pending,
            error: None,
            time: stamp.time,
            sequence: stamp.sequence,
        });

    entry.status = status;
    entry.error = error;
    entry.sequence = stamp.sequence;
}

// =============================================================================
// Tests
// =============================================================================
