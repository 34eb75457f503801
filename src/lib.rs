//! # fetchgate - Deduplicating Fetch-and-Cache Engine
//!
//! fetchgate mediates every request an application makes to its backend
//! services. For each logical demand it decides:
//!
//! - **Is it already satisfied?** Prior or in-flight requests in the same
//!   scope are subtracted from the demand before anything is sent.
//! - **Is it already running?** At most one physical request per key is in
//!   flight; duplicates are coalesced.
//! - **Is it allowed yet?** Failed keys cool down on a stepped backoff
//!   schedule and eventually stop retrying.
//! - **How is it sent?** A demand may fan out into many parallel
//!   sub-requests whose responses are merged back into one result.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      QueryEngine (api)                          │
//! │        query(args) / should_skip(args) / id(args)               │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │  one critical section, no .await
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  identity → reconcile → admission (+ backoff) → reducer:Pending │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │  the only suspension point
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │          executor: fan-out → join-all → transform_result        │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │     reducer: Fulfilled (merge cache) | Rejected (record error)  │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │   EventBus ──► PopulationMiddleware ──► QueryEngine (fork)      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Canonical keys**: `id(args) == id(permute(args))`
//! 2. **Single flight**: at most one Pending entry per key
//! 3. **Ordered ledger**: Pending always precedes Fulfilled/Rejected for an entry
//! 4. **Monotonic cache**: a rejected fetch never evicts cached data
//! 5. **Bounded retries**: no automatic retry after 25 attempts
//!
//! ## Module Organization
//!
//! - [`error`]: Error type shared by every operation
//! - [`types`]: Keys, ledger entries, outcomes
//! - [`identity`]: Canonical key construction
//! - [`history`]: Ledger queries and transitions
//! - [`backoff`]: Cooldown schedule
//! - [`reconcile`]: Set-difference helpers for scope reconciliation
//! - [`admission`]: Dispatch guard
//! - [`transport`]: Request configs and the transport boundary
//! - [`query`]: The per-query definition trait
//! - [`executor`]: Fan-out / fan-in
//! - [`slice`] and [`reducer`]: The owned cache + ledger and its transitions
//! - [`api`]: The async engine handle (main entry point)
//! - [`subscription`]: Event bus for store mutations
//! - [`middleware`]: Reactive population
//! - [`queries`]: Concrete query definitions

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for engine operations.
pub mod error;

/// Domain types: request keys, history entries, outcomes.
pub mod types;

/// Wall-clock abstraction used for ledger timestamps and backoff.
pub mod clock;

/// Engine configuration.
pub mod config;

/// Canonical, order-independent request keys.
pub mod identity;

/// The per-key attempt ledger.
///
/// Queries over the history (flattening, filtering, most-recent lookups) and
/// the three entry transitions used by the reducer.
pub mod history;

/// Stepped backoff schedule for failed requests.
pub mod backoff;

/// Scope reconciliation helpers.
///
/// Computes the missing subset of a demand given what prior requests in the
/// same scope already cover.
pub mod reconcile;

/// The admission controller.
///
/// Decides whether a computed request may be dispatched now or must be
/// suppressed (coalesced, satisfied, cooling down, exhausted).
pub mod admission;

/// Transport boundary: request configs and the injected HTTP client trait.
pub mod transport;

/// The query definition trait implemented once per query type.
pub mod query;

/// Fan-out / fan-in execution of physical requests.
pub mod executor;

/// Owned cache + history state for one query instance.
pub mod slice;

/// Ledger and cache transitions driven by [`types::Outcome`].
pub mod reducer;

/// Async API for the engine.
///
/// The main entry point is [`QueryEngine`](api::QueryEngine).
pub mod api;

/// Event bus for application-state mutations.
///
/// A `tokio::sync::broadcast` channel carrying [`subscription::StoreEvent`]s
/// with filtered subscriptions on top.
pub mod subscription;

/// Reactive population middleware.
///
/// Listens on the event bus and re-invokes an engine for data that newly
/// became necessary, with a guard against retry storms.
pub mod middleware;

/// Concrete query definitions.
pub mod queries;

// =============================================================================
// Re-exports
// =============================================================================

pub use api::{EngineBuilder, QueryEngine};
pub use error::{Error, Result};

pub use admission::{AbortReason, Admission};
pub use backoff::BackoffSchedule;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use identity::{uniq_sort_strings, KeyBuilder};
pub use middleware::{MiddlewareConfig, PopulationMiddleware, Reaction, Trigger};
pub use query::Query;
pub use slice::SliceState;
pub use subscription::{EventBus, StoreEvent, Subscription};
pub use transport::{Method, RequestConfig, Transport, TransportError};
pub use types::{
    AsyncStatus, FetchError, History, HistoryEntry, Outcome, QueryOutcome, RequestId, RequestKey,
};
