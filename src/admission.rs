//! # Admission Controller
//!
//! Runs before every dispatch and either allows it, with the reduced Args to
//! send, or aborts it with an explicit reason. Aborts are not failures: the
//! caller's demand is either already handled or not yet eligible.
//!
//! ## Check Order
//!
//! ```text
//!  entries under key ──► any Pending?    ──yes──► Coalesced
//!                   └──► latest Rejected ──────► cooldown(cumulative attempts)
//!                                                 ├── None        ──► RetriesExhausted
//!                                                 └── not elapsed ──► CoolingDown
//!  own Fulfilled entries cover args? ──yes──► AlreadyFulfilled
//!  reconcile against scope ──► reduced skip? ──yes──► NothingMissing
//!                          └──► Allow { reduced, request_id }
//! ```
//!
//! Everything here is synchronous and runs while the engine holds the slice
//! lock, so two concurrent callers can never both be admitted for one key.

use std::fmt;
use std::time::Duration;

use crate::backoff::BackoffSchedule;
use crate::history::{
    any_with_status, cumulative_attempts, flatten_filter_history, most_recent_entry,
};
use crate::query::Query;
use crate::types::{AsyncStatus, History, HistoryEntry, RequestId, RequestKey};

/// Why a dispatch was vetoed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// An identical request is in flight.
    Coalesced,
    /// Requests under the same key already fetched everything asked for.
    AlreadyFulfilled,
    /// Everything requested is covered by prior or in-flight requests.
    NothingMissing,
    /// The key failed recently and is still cooling down.
    CoolingDown {
        /// Cumulative attempts for the key.
        attempts: u32,
        /// Time left before a retry is admitted.
        remaining: Duration,
    },
    /// The key failed too many times to retry automatically.
    RetriesExhausted {
        /// Cumulative attempts for the key.
        attempts: u32,
    },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Coalesced => f.write_str("request already pending"),
            AbortReason::AlreadyFulfilled => f.write_str("request already fulfilled"),
            AbortReason::NothingMissing => f.write_str("nothing missing"),
            AbortReason::CoolingDown { attempts, remaining } => write!(
                f,
                "cooling down after {} attempts ({} ms remaining)",
                attempts,
                remaining.as_millis()
            ),
            AbortReason::RetriesExhausted { attempts } => {
                write!(f, "retries exhausted after {} attempts", attempts)
            }
        }
    }
}

/// The admission decision.
#[derive(Debug)]
pub enum Admission<'h, A> {
    /// Dispatch `reduced` as physical request `request_id`.
    Allow {
        /// The missing portion of the demand.
        reduced: A,
        /// Ledger id of the physical request.
        request_id: RequestId,
        /// Scoped prior entries the reduction was computed from.
        scoped: Vec<&'h HistoryEntry<A>>,
    },
    /// Do not dispatch.
    Abort(AbortReason),
}

/// Decides whether `args` (keyed `key`) may be dispatched at `now`.
pub fn check<'h, Q: Query>(
    query: &Q,
    history: &'h History<Q::Args>,
    key: &RequestKey,
    args: &Q::Args,
    schedule: &BackoffSchedule,
    now: u64,
) -> Admission<'h, Q::Args> {
    if let Some(entries) = history.get(key) {
        if any_with_status(entries, AsyncStatus::Pending) {
            return Admission::Abort(AbortReason::Coalesced);
        }
        if let Some(latest) = most_recent_entry(entries).filter(|e| e.is_rejected()) {
            let attempts = cumulative_attempts(entries);
            let elapsed = Duration::from_secs(now.saturating_sub(latest.time));
            if !schedule.is_eligible(attempts, elapsed) {
                return Admission::Abort(match schedule.cooldown(attempts) {
                    None => AbortReason::RetriesExhausted { attempts },
                    Some(cooldown) => AbortReason::CoolingDown {
                        attempts,
                        remaining: cooldown.saturating_sub(elapsed),
                    },
                });
            }
        }
    }

    let scoped: Vec<&HistoryEntry<Q::Args>> = flatten_filter_history(history, key)
        .into_iter()
        .filter(|entry| query.in_scope(args, &entry.arg))
        .collect();

    // Entries under `key` hold reduced Args, so the key is only satisfied
    // when its own fulfilled entries cover the whole demand.
    let own: Vec<&HistoryEntry<Q::Args>> = history
        .get(key)
        .into_iter()
        .flat_map(|entries| entries.values())
        .filter(|entry| entry.is_fulfilled())
        .collect();
    let covered = own.iter().any(|entry| query.id(&entry.arg) == *key)
        || (!own.is_empty() && query.should_skip(&query.transform_args(args, history, key, &own)));
    if covered {
        return Admission::Abort(AbortReason::AlreadyFulfilled);
    }

    let reduced = query.transform_args(args, history, key, &scoped);
    if query.should_skip(&reduced) {
        return Admission::Abort(AbortReason::NothingMissing);
    }

    let request_id = RequestId::new(query.id(&reduced).as_str());
    Admission::Allow {
        reduced,
        request_id,
        scoped,
    }
}
