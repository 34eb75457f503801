//! # Async API for fetchgate
//!
//! [`QueryEngine`] is the handle applications hold for one query type. It
//! owns that query's cache and ledger and is the only way to dispatch a
//! request for it.
//!
//! ## One Critical Section, One Suspension Point
//!
//! ```text
//! query(args)
//!   │
//!   ├─ should_skip? ──yes──► Ok(Skipped)
//!   │
//!   ├─ lock ─────────────────────────────────────────────────────────┐
//!   │    admission (coalesce / satisfied / backoff / reconcile)      │
//!   │    custom_query or prepare_request_config                      │  no .await
//!   │    reducer: Pending                                            │
//!   ├─ unlock ───────────────────────────────────────────────────────┘
//!   │
//!   └─ spawn ──► executor: fan-out ... fan-in   ◄── only suspension point
//!                  │
//!                  ├─ lock, reducer: Fulfilled | Rejected, unlock
//!                  └─ publish QueryFulfilled | QueryRejected
//! ```
//!
//! The spawned half owns everything it needs, so a Pending entry is always
//! resolved even when the caller drops its future.
//!
//! Because the admission decision and the Pending transition happen under
//! the same lock, two tasks racing on the same key can never both dispatch,
//! even on a multi-threaded runtime.
//!
//! ## Rust Concepts
//!
//! - **`std::sync::Mutex` in async code**: Fine as long as the guard never
//!   lives across an `.await`. Keeping the locked work in a plain `fn` makes
//!   that a compile-time guarantee (the returned future would not be `Send`
//!   otherwise).
//! - **`Arc` inner**: `QueryEngine` is `Clone`; all clones share one slice.
//! - **`tokio::spawn` + `JoinHandle`**: The caller awaits the handle. A
//!   dropped `JoinHandle` detaches the task instead of cancelling it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::admission::{self, AbortReason, Admission};
use crate::backoff::BackoffSchedule;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::executor::{self, Dispatch};
use crate::query::Query;
use crate::reducer;
use crate::slice::SliceState;
use crate::subscription::{EventBus, StoreEvent};
use crate::transport::{RequestConfig, Transport};
use crate::types::{FetchError, History, Outcome, QueryOutcome, RequestId, RequestKey};

// =============================================================================
// QueryEngine - The Main Async Handle
// =============================================================================

/// The async handle for one query instance.
///
/// # Thread Safety
///
/// `QueryEngine` is `Clone`, `Send`, and `Sync`. All clones share the same
/// cache and history.
///
/// # Example
///
/// ```rust,ignore
/// let engine = QueryEngine::builder(FilterDefinitionsForSignalDetections::default())
///     .transport(http_client)
///     .base_request(RequestConfig::new("http://signal-enhancement", "/filter-definitions"))
///     .build()?;
///
/// match engine.query(args).await? {
///     QueryOutcome::Fulfilled(defs) => println!("fetched {} definitions", defs.len()),
///     QueryOutcome::Skipped => {}
///     QueryOutcome::Aborted(reason) => println!("not dispatched: {}", reason),
/// }
/// ```
pub struct QueryEngine<Q: Query> {
    inner: Arc<Inner<Q>>,
}

struct Inner<Q: Query> {
    query: Q,
    state: Mutex<SliceState<Q::Args, Q::Cache>>,
    transport: Option<Arc<dyn Transport>>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    bus: Option<EventBus>,
}

impl<Q: Query> Clone for QueryEngine<Q> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Result of the locked half of a dispatch.
enum Prepared<Q: Query> {
    Aborted(AbortReason),
    Dispatch {
        key: RequestKey,
        reduced: Q::Args,
        request_id: RequestId,
        dispatch: Dispatch<'static, Q::Response>,
    },
}

impl<Q: Query> QueryEngine<Q> {
    /// Creates an engine with the default config and system clock.
    pub fn new(query: Q, transport: Arc<dyn Transport>, request: RequestConfig) -> Self {
        Self::from_parts(
            query,
            Some(transport),
            Arc::new(SystemClock),
            EngineConfig::new(request),
            None,
        )
    }

    /// Starts building an engine.
    pub fn builder(query: Q) -> EngineBuilder<Q> {
        EngineBuilder::new(query)
    }

    fn from_parts(
        query: Q,
        transport: Option<Arc<dyn Transport>>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
        bus: Option<EventBus>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                query,
                state: Mutex::new(SliceState::new()),
                transport,
                clock,
                config,
                bus,
            }),
        }
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Requests the data described by `args`.
    ///
    /// # Returns
    ///
    /// - `Ok(Fulfilled(output))` - a request ran and its result was committed
    /// - `Ok(Skipped)` - `args` were empty or ill-formed; nothing recorded
    /// - `Ok(Aborted(reason))` - the admission controller vetoed the dispatch
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when the request cannot be built; no history entry
    ///   is created
    /// - [`Error::Transport`], [`Error::Decode`], [`Error::CustomQuery`] when
    ///   execution fails; the entry is recorded Rejected and the cache is left
    ///   untouched
    /// - [`Error::Closed`] when the request task panicked; the entry is
    ///   recorded Rejected
    ///
    /// # Cancellation
    ///
    /// Once admitted, the request runs on its own task. Dropping the returned
    /// future stops waiting for it but does not stop it: the entry is still
    /// resolved and a successful result is still merged into the cache.
    pub async fn query(&self, args: Q::Args) -> Result<QueryOutcome<Q::Output>> {
        let query = &self.inner.query;
        if query.should_skip(&args) {
            debug!(query = query.name(), "skipping ill-formed args");
            return Ok(QueryOutcome::Skipped);
        }

        let (key, reduced, request_id, dispatch) = match self.prepare(&args)? {
            Prepared::Aborted(reason) => return Ok(QueryOutcome::Aborted(reason)),
            Prepared::Dispatch {
                key,
                reduced,
                request_id,
                dispatch,
            } => (key, reduced, request_id, dispatch),
        };

        debug!(
            query = query.name(),
            key = %key,
            request_id = %request_id,
            requests = dispatch.request_count(),
            "dispatching"
        );

        let task = {
            let engine = self.clone();
            let key = key.clone();
            let request_id = request_id.clone();
            let reduced = reduced.clone();
            tokio::spawn(async move { engine.complete(key, request_id, reduced, dispatch).await })
        };

        match task.await {
            Ok(result) => result.map(QueryOutcome::Fulfilled),
            Err(join_err) => {
                let err = Error::Closed(format!("request task for '{}' failed: {}", key, join_err));
                self.reject(key, &request_id, &reduced, &err);
                Err(err)
            }
        }
    }

    /// Executes an admitted request and resolves its ledger entry.
    async fn complete(
        &self,
        key: RequestKey,
        request_id: RequestId,
        reduced: Q::Args,
        dispatch: Dispatch<'static, Q::Response>,
    ) -> Result<Q::Output> {
        let query = &self.inner.query;
        match executor::execute(query, &reduced, dispatch).await {
            Ok(output) => {
                let now = self.inner.clock.now_epoch_seconds();
                {
                    let mut state = self.lock();
                    reducer::apply(
                        query,
                        &mut state,
                        &key,
                        &request_id,
                        &reduced,
                        Outcome::Fulfilled(output.clone()),
                        now,
                    );
                }
                self.publish(StoreEvent::QueryFulfilled {
                    query: query.name().to_string(),
                    key,
                });
                Ok(output)
            }
            Err(err) => {
                self.reject(key, &request_id, &reduced, &err);
                Err(err)
            }
        }
    }

    /// Records `err` against the entry and publishes the rejection.
    fn reject(&self, key: RequestKey, request_id: &RequestId, reduced: &Q::Args, err: &Error) {
        let query = &self.inner.query;
        let fetch = FetchError::from(err);
        warn!(query = query.name(), key = %key, error = %err, "request rejected");
        let now = self.inner.clock.now_epoch_seconds();
        {
            let mut state = self.lock();
            reducer::apply(
                query,
                &mut state,
                &key,
                request_id,
                reduced,
                Outcome::Rejected(fetch.clone()),
                now,
            );
        }
        self.publish(StoreEvent::QueryRejected {
            query: query.name().to_string(),
            key,
            error: fetch,
        });
    }

    /// The locked half of [`query`](Self::query): admission, request
    /// preparation and the Pending transition.
    fn prepare(&self, args: &Q::Args) -> Result<Prepared<Q>> {
        let inner = &*self.inner;
        let query = &inner.query;
        let key = query.id(args);

        let mut state = self.lock();
        let now = inner.clock.now_epoch_seconds();

        let (reduced, request_id, scoped) =
            match admission::check(query, &state.history, &key, args, &inner.config.backoff, now) {
                Admission::Abort(reason) => {
                    debug!(query = query.name(), key = %key, reason = %reason, "dispatch aborted");
                    return Ok(Prepared::Aborted(reason));
                }
                Admission::Allow {
                    reduced,
                    request_id,
                    scoped,
                } => (reduced, request_id, scoped),
            };

        let dispatch = match query.custom_query(&reduced) {
            Some(future) => Dispatch::Custom(future),
            None => {
                let transport = inner.transport.clone().ok_or_else(|| {
                    Error::Config(format!("query '{}' has no transport", query.name()))
                })?;
                if inner.config.request.base_url.is_empty() {
                    return Err(Error::Config(format!(
                        "query '{}' has no base URL",
                        query.name()
                    )));
                }
                let configs = query.prepare_request_config(&reduced, &inner.config.request, &scoped)?;
                if configs.is_empty() {
                    return Err(Error::Config(format!(
                        "query '{}' produced no request configs",
                        query.name()
                    )));
                }
                Dispatch::Transport { transport, configs }
            }
        };
        drop(scoped);

        reducer::apply(query, &mut state, &key, &request_id, &reduced, Outcome::Pending, now);

        Ok(Prepared::Dispatch {
            key,
            reduced,
            request_id,
            dispatch,
        })
    }

    fn publish(&self, event: StoreEvent) {
        if let Some(bus) = &self.inner.bus {
            bus.publish(event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, SliceState<Q::Args, Q::Cache>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Returns the query definition.
    pub fn definition(&self) -> &Q {
        &self.inner.query
    }

    /// Returns the query's name.
    pub fn name(&self) -> &str {
        self.inner.query.name()
    }

    /// Returns true if `args` would be skipped.
    pub fn should_skip(&self, args: &Q::Args) -> bool {
        self.inner.query.should_skip(args)
    }

    /// Returns the canonical key of `args`.
    pub fn id(&self, args: &Q::Args) -> RequestKey {
        self.inner.query.id(args)
    }

    /// Returns true if `args` would be dispatched right now.
    pub fn is_admissible(&self, args: &Q::Args) -> bool {
        if self.should_skip(args) {
            return false;
        }
        let key = self.id(args);
        let state = self.lock();
        let now = self.inner.clock.now_epoch_seconds();
        matches!(
            admission::check(
                &self.inner.query,
                &state.history,
                &key,
                args,
                &self.inner.config.backoff,
                now
            ),
            Admission::Allow { .. }
        )
    }

    /// Returns a snapshot of the ledger.
    pub fn history(&self) -> History<Q::Args> {
        self.lock().history.clone()
    }

    /// Runs `f` against the current cache.
    pub fn with_cache<R>(&self, f: impl FnOnce(&Q::Cache) -> R) -> R {
        f(&self.lock().cache)
    }

    /// Runs `f` against the whole slice.
    pub fn with_state<R>(&self, f: impl FnOnce(&SliceState<Q::Args, Q::Cache>) -> R) -> R {
        f(&self.lock())
    }

    /// Returns the backoff schedule in use.
    pub fn backoff(&self) -> &BackoffSchedule {
        &self.inner.config.backoff
    }

    /// Returns the event bus the engine publishes to, if any.
    pub fn event_bus(&self) -> Option<&EventBus> {
        self.inner.bus.as_ref()
    }
}

impl<Q: Query> QueryEngine<Q>
where
    Q::Cache: Clone,
{
    /// Returns a snapshot of the cache.
    pub fn cache(&self) -> Q::Cache {
        self.lock().cache.clone()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`QueryEngine`].
pub struct EngineBuilder<Q: Query> {
    query: Q,
    transport: Option<Arc<dyn Transport>>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    bus: Option<EventBus>,
    events: bool,
}

impl<Q: Query> EngineBuilder<Q> {
    /// Creates a builder with the default config and the system clock.
    pub fn new(query: Q) -> Self {
        Self {
            query,
            transport: None,
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
            bus: None,
            events: false,
        }
    }

    /// Sets the transport.
    pub fn transport<T: Transport + 'static>(self, transport: T) -> Self {
        self.shared_transport(Arc::new(transport))
    }

    /// Sets a transport shared with other engines.
    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the clock.
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Replaces the whole config.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the base request config.
    pub fn base_request(mut self, request: RequestConfig) -> Self {
        self.config.request = request;
        self
    }

    /// Sets the backoff schedule.
    pub fn backoff(mut self, backoff: BackoffSchedule) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Publishes query outcomes on `bus`.
    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Publishes query outcomes on a new bus sized by the config's
    /// `event_capacity`, unless [`event_bus`](Self::event_bus) supplies one.
    /// Reach it through [`QueryEngine::event_bus`].
    pub fn with_events(mut self) -> Self {
        self.events = true;
        self
    }

    /// Builds the engine.
    ///
    /// A missing transport or base URL is not an error here: queries with a
    /// custom query function need neither. Dispatches that do need them fail
    /// with [`Error::Config`].
    pub fn build(self) -> Result<QueryEngine<Q>> {
        self.config.validate()?;
        let bus = match self.bus {
            Some(bus) => Some(bus),
            None if self.events => Some(EventBus::from_config(&self.config)),
            None => None,
        };
        Ok(QueryEngine::from_parts(
            self.query,
            self.transport,
            self.clock,
            self.config,
            bus,
        ))
    }
}

// =============================================================================
// Tests
// =============================================================================
