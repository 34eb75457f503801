//! # Domain Types for fetchgate
//!
//! The vocabulary of the engine: keys that identify demands, ledger entries
//! that record attempts, and the outcome types that flow through the reducer
//! and back to callers.
//!
//! ## Newtypes for Keys
//!
//! [`RequestKey`] and [`RequestId`] both wrap a `String`, but they name
//! different things:
//!
//! ```text
//! History
//! └── RequestKey  "stageId:S1/signalDetections:A;B;C"   (logical demand)
//!     ├── RequestId  "stageId:S1/signalDetections:A;B;C"  (first dispatch)
//!     └── RequestId  "stageId:S1/signalDetections:C"      (retry after A,B arrived)
//! ```
//!
//! Keeping them as distinct types means a ledger lookup can't accidentally
//! use one where the other is expected.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::admission::AbortReason;
use crate::error::Error;

// =============================================================================
// Keys
// =============================================================================

/// Canonical identifier of a logical demand.
///
/// Produced by [`Query::id`](crate::query::Query::id). Two Args describing
/// the same demand, regardless of element order, produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestKey(String);

impl RequestKey {
    /// Creates a key from its canonical string form.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RequestKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RequestKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of one physical request under a [`RequestKey`].
///
/// The engine derives it from the *reduced* Args that were actually
/// dispatched, so retrying identical work refreshes the same entry while a
/// retry of different (smaller) work creates a new one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Creates a request id from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&RequestKey> for RequestId {
    fn from(key: &RequestKey) -> Self {
        Self(key.0.clone())
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// =============================================================================
// Ledger Entries
// =============================================================================

/// Status of one physical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AsyncStatus {
    /// Dispatched, not yet resolved.
    Pending,
    /// Resolved successfully; its payload was merged into the cache.
    Fulfilled,
    /// Failed; the error is recorded and the cache is untouched.
    Rejected,
}

impl fmt::Display for AsyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AsyncStatus::Pending => "pending",
            AsyncStatus::Fulfilled => "fulfilled",
            AsyncStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// The serializable record of a failed request kept in the ledger.
///
/// [`Error`] itself holds non-cloneable sources; the ledger keeps this
/// flattened copy instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchError {
    /// Short classification (`transport`, `decode`, `custom`, ...).
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// HTTP status, when the transport reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl FetchError {
    /// Creates a fetch error of the given kind.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            status: None,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({}): {}", self.kind, status, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl From<&Error> for FetchError {
    fn from(err: &Error) -> Self {
        match err {
            Error::Transport(t) => Self {
                kind: "transport".to_string(),
                message: t.message.clone(),
                status: t.status,
            },
            Error::Decode(e) => Self::new("decode", e.to_string()),
            Error::CustomQuery(m) => Self::new("custom", m.clone()),
            Error::Config(m) => Self::new("config", m.clone()),
            Error::Closed(m) => Self::new("aborted", m.clone()),
            other => Self::new("internal", other.to_string()),
        }
    }
}

/// One physical request in the ledger.
///
/// Entries are created Pending at dispatch time and mutated in place to
/// Fulfilled or Rejected. They are never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry<A> {
    /// The Args that were dispatched.
    pub arg: A,

    /// How many times this request has been dispatched.
    pub attempts: u32,

    /// Current status.
    pub status: AsyncStatus,

    /// The failure, when `status` is Rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FetchError>,

    /// Epoch seconds of the last dispatch.
    pub time: u64,

    /// Ledger-wide transition counter; larger is more recent.
    pub sequence: u64,
}

impl<A> HistoryEntry<A> {
    /// Returns true if the request is still in flight.
    pub fn is_pending(&self) -> bool {
        self.status == AsyncStatus::Pending
    }

    /// Returns true if the request resolved successfully.
    pub fn is_fulfilled(&self) -> bool {
        self.status == AsyncStatus::Fulfilled
    }

    /// Returns true if the request failed.
    pub fn is_rejected(&self) -> bool {
        self.status == AsyncStatus::Rejected
    }
}

/// Entries for one logical key, by physical request id.
pub type HistoryEntries<A> = BTreeMap<RequestId, HistoryEntry<A>>;

/// The full ledger of one query instance.
pub type History<A> = BTreeMap<RequestKey, HistoryEntries<A>>;

// =============================================================================
// Outcomes
// =============================================================================

/// The three states of an asynchronous request, as consumed by the reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<R> {
    /// The request was dispatched.
    Pending,
    /// The request succeeded with this payload.
    Fulfilled(R),
    /// The request failed.
    Rejected(FetchError),
}

impl<R> Outcome<R> {
    /// The ledger status this outcome transitions to.
    pub fn status(&self) -> AsyncStatus {
        match self {
            Outcome::Pending => AsyncStatus::Pending,
            Outcome::Fulfilled(_) => AsyncStatus::Fulfilled,
            Outcome::Rejected(_) => AsyncStatus::Rejected,
        }
    }
}

/// What a caller receives from [`QueryEngine::query`](crate::api::QueryEngine::query).
///
/// Transport and configuration failures are reported through
/// [`Error`](crate::Error) instead; these variants are all non-failures.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome<R> {
    /// A request was executed and its merged result committed.
    Fulfilled(R),
    /// The Args were rejected by `should_skip`; nothing was recorded.
    Skipped,
    /// The admission controller vetoed the dispatch.
    Aborted(AbortReason),
}

impl<R> QueryOutcome<R> {
    /// Returns the result if a request was executed.
    pub fn into_fulfilled(self) -> Option<R> {
        match self {
            QueryOutcome::Fulfilled(r) => Some(r),
            QueryOutcome::Skipped | QueryOutcome::Aborted(_) => None,
        }
    }

    /// Returns true if a request was executed.
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, QueryOutcome::Fulfilled(_))
    }

    /// Returns the abort reason, if the dispatch was vetoed.
    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match self {
            QueryOutcome::Aborted(reason) => Some(reason),
            _ => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
