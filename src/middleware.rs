//! # Reactive Population Middleware
//!
//! Some data only becomes necessary after something else arrives: filter
//! definitions are needed once signal detections are loaded, processing masks
//! once channels are known. A [`PopulationMiddleware`] watches the event bus
//! and re-invokes its engine whenever a configured trigger fires.
//!
//! ## State Machine
//!
//! ```text
//!            event
//!   Idle ───────────► matches a trigger? ──no──► Ignored
//!    ▲                       │yes
//!    │                       ▼
//!    │              args = selector()  (reads current app state)
//!    │                       │
//!    ├──── Skipped ◄── should_skip(args)?
//!    │                       │no
//!    │                       ▼
//!    └──────────────── Dispatched (spawned engine.query, errors logged)
//! ```
//!
//! ## Retry Guard
//!
//! A `QueryRejected` event for the middleware's own query is acted upon only
//! if the rejected key is still what the application needs
//! (`id(selector()) == rejected key`). Otherwise the rejection belonged to a
//! superseded demand and is answered with [`Reaction::RetryRefused`]. The
//! engine's backoff schedule bounds the retries that do happen.
//!
//! ## Rust Concepts
//!
//! - **`Arc<AtomicBool>`**: Shared running flag between the handle and the
//!   background task.
//! - **`JoinHandle`**: Each dispatch is a spawned task; the handle is returned
//!   so callers (and tests) can await it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::api::QueryEngine;
use crate::error::{Error, Result};
use crate::query::Query;
use crate::subscription::{EventBus, StoreEvent, Subscription};
use crate::types::{QueryOutcome, RequestKey};

// =============================================================================
// Configuration
// =============================================================================

/// An event that should cause the middleware to re-evaluate its demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Entities of this kind arrived.
    EntitiesArrived(String),
    /// Entities of this kind were created.
    EntitiesCreated(String),
    /// The named query committed a result.
    QueryFulfilled(String),
}

impl Trigger {
    /// Returns true if `event` fires this trigger.
    pub fn matches(&self, event: &StoreEvent) -> bool {
        match (self, event) {
            (Trigger::EntitiesArrived(want), StoreEvent::EntitiesArrived { kind, .. })
            | (Trigger::EntitiesCreated(want), StoreEvent::EntitiesCreated { kind, .. }) => {
                want == kind
            }
            (Trigger::QueryFulfilled(want), StoreEvent::QueryFulfilled { query, .. }) => {
                want == query
            }
            _ => false,
        }
    }
}

/// Configuration for a population middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiddlewareConfig {
    /// Name used in logs.
    pub name: String,

    /// Events that trigger a re-evaluation.
    pub triggers: Vec<Trigger>,
}

impl MiddlewareConfig {
    /// Creates a config with no triggers.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            triggers: Vec::new(),
        }
    }

    /// Adds a trigger.
    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }
}

// =============================================================================
// Reactions
// =============================================================================

/// What the middleware did with one event.
#[derive(Debug)]
pub enum Reaction {
    /// The event fires no trigger.
    Ignored,
    /// The current demand is empty or ill-formed.
    Skipped,
    /// A rejection for a demand the application no longer needs.
    RetryRefused,
    /// The engine was invoked on a spawned task.
    Dispatched(JoinHandle<()>),
}

impl Reaction {
    /// Returns true if the engine was invoked.
    pub fn is_dispatched(&self) -> bool {
        matches!(self, Reaction::Dispatched(_))
    }

    /// Returns the dispatch task, if any.
    pub fn into_handle(self) -> Option<JoinHandle<()>> {
        match self {
            Reaction::Dispatched(handle) => Some(handle),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Reaction::Ignored => "ignored",
            Reaction::Skipped => "skipped",
            Reaction::RetryRefused => "retry_refused",
            Reaction::Dispatched(_) => "dispatched",
        }
    }
}

// =============================================================================
// Middleware
// =============================================================================

type Selector<A> = Arc<dyn Fn() -> A + Send + Sync>;

struct Shared<Q: Query> {
    engine: QueryEngine<Q>,
    config: MiddlewareConfig,
    selector: Selector<Q::Args>,
}

/// Watches an [`EventBus`] and keeps one engine's cache populated.
pub struct PopulationMiddleware<Q: Query> {
    shared: Arc<Shared<Q>>,

    /// Whether the background task is running.
    running: Arc<AtomicBool>,

    /// Handle to the background task.
    task_handle: Option<JoinHandle<()>>,
}

impl<Q: Query> fmt::Debug for PopulationMiddleware<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PopulationMiddleware")
            .field("config", &self.shared.config)
            .field("running", &self.is_running())
            .finish()
    }
}

impl<Q: Query> PopulationMiddleware<Q> {
    /// Creates a middleware for `engine`.
    ///
    /// `selector` reads the application's current demand; it is called once
    /// per triggering event.
    pub fn new<F>(engine: QueryEngine<Q>, config: MiddlewareConfig, selector: F) -> Self
    where
        F: Fn() -> Q::Args + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                engine,
                config,
                selector: Arc::new(selector),
            }),
            running: Arc::new(AtomicBool::new(false)),
            task_handle: None,
        }
    }

    /// Returns the middleware name.
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Returns the engine this middleware drives.
    pub fn engine(&self) -> &QueryEngine<Q> {
        &self.shared.engine
    }

    /// Returns whether the background task is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Reacts to one event.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn handle_event(&self, event: &StoreEvent) -> Reaction {
        self.shared.handle_event(event)
    }

    /// Starts consuming `bus` on a background task.
    pub fn start(&mut self, bus: &EventBus) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(Error::AlreadyRunning(self.shared.config.name.clone()));
        }

        let subscription = bus.subscribe();
        let shared = Arc::clone(&self.shared);
        let running = Arc::clone(&self.running);

        running.store(true, Ordering::SeqCst);
        info!(middleware = %self.shared.config.name, "population middleware started");

        let handle = tokio::spawn(async move {
            run_population_loop(shared, subscription, running).await;
        });
        self.task_handle = Some(handle);

        Ok(())
    }

    /// Stops the background task. Dispatches already spawned run to
    /// completion.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.task_handle.take() {
            handle.abort();
            let _ = handle.await;
            info!(middleware = %self.shared.config.name, "population middleware stopped");
        }
    }
}

impl<Q: Query> Drop for PopulationMiddleware<Q> {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

impl<Q: Query> Shared<Q> {
    fn handle_event(&self, event: &StoreEvent) -> Reaction {
        let reaction = match event {
            StoreEvent::QueryRejected { query, key, .. } if query == self.engine.name() => {
                self.react(Some(key))
            }
            _ if self.config.triggers.iter().any(|t| t.matches(event)) => self.react(None),
            _ => Reaction::Ignored,
        };
        trace!(
            middleware = %self.config.name,
            event = event.kind_name(),
            reaction = reaction.name(),
            "handled event"
        );
        reaction
    }

    /// Re-reads the demand and dispatches it. `rejected` is the key of a
    /// failed request this reaction would retry.
    fn react(&self, rejected: Option<&RequestKey>) -> Reaction {
        let args = (self.selector)();
        if self.engine.should_skip(&args) {
            return Reaction::Skipped;
        }

        if let Some(rejected) = rejected {
            let current = self.engine.id(&args);
            if &current != rejected {
                debug!(
                    middleware = %self.config.name,
                    rejected = %rejected,
                    current = %current,
                    "not retrying superseded request"
                );
                return Reaction::RetryRefused;
            }
        }

        Reaction::Dispatched(self.dispatch(args))
    }

    fn dispatch(&self, args: Q::Args) -> JoinHandle<()> {
        let engine = self.engine.clone();
        let name = self.config.name.clone();

        tokio::spawn(async move {
            match engine.query(args).await {
                Ok(QueryOutcome::Fulfilled(_)) => debug!(middleware = %name, "populated"),
                Ok(QueryOutcome::Skipped) => {}
                Ok(QueryOutcome::Aborted(reason)) => {
                    debug!(middleware = %name, reason = %reason, "population not dispatched")
                }
                Err(e) => warn!(middleware = %name, error = %e, "population request failed"),
            }
        })
    }
}

/// Background loop: one reaction per event until stopped or the bus closes.
async fn run_population_loop<Q: Query>(
    shared: Arc<Shared<Q>>,
    mut subscription: Subscription,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match subscription.next().await {
            Some(Ok(event)) => {
                shared.handle_event(&event);
            }
            Some(Err(Error::SubscriptionLagged(n))) => {
                warn!(middleware = %shared.config.name, missed = n, "subscription lagged");
                // Missed events may have been triggers; state is re-read anyway.
                shared.react(None);
            }
            Some(Err(e)) => {
                warn!(middleware = %shared.config.name, error = %e, "subscription error");
                break;
            }
            None => break,
        }
    }

    running.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::time::Duration;

    use futures::future::BoxFuture;

    use crate::identity::set_key;
    use crate::types::{FetchError, History, HistoryEntry};

    /// Resolves ids locally via a custom query.
    struct Local;

    impl Query for Local {
        type Args = Vec<String>;
        type Response = Vec<String>;
        type Output = Vec<String>;
        type Cache = BTreeSet<String>;

        fn name(&self) -> &str {
            "local"
        }
        fn id(&self, args: &Self::Args) -> RequestKey {
            set_key(args)
        }
        fn should_skip(&self, args: &Self::Args) -> bool {
            args.is_empty()
        }
        fn in_scope(&self, _: &Self::Args, _: &Self::Args) -> bool {
            true
        }
        fn transform_args(
            &self,
            args: &Self::Args,
            _: &History<Self::Args>,
            _: &RequestKey,
            _: &[&HistoryEntry<Self::Args>],
        ) -> Self::Args {
            args.clone()
        }
        fn custom_query(&self, args: &Self::Args) -> Option<BoxFuture<'static, Result<Self::Response>>> {
            let ids = args.clone();
            Some(Box::pin(async move { Ok(ids) }))
        }
        fn transform_result(&self, _: &Self::Args, responses: Vec<Self::Response>) -> Self::Output {
            responses.concat()
        }
        fn update_state(&self, _: &Self::Args, output: &Self::Output, cache: &mut Self::Cache) {
            cache.extend(output.iter().cloned());
        }
    }

    fn middleware(demand: Arc<Mutex<Vec<String>>>) -> PopulationMiddleware<Local> {
        let engine = QueryEngine::builder(Local).build().unwrap();
        let config = MiddlewareConfig::new("local-population")
            .with_trigger(Trigger::EntitiesArrived("signalDetections".to_string()));
        PopulationMiddleware::new(engine, config, move || demand.lock().unwrap().clone())
    }

    fn arrived(kind: &str) -> StoreEvent {
        StoreEvent::EntitiesArrived {
            kind: kind.to_string(),
            ids: vec!["A".to_string()],
        }
    }

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_trigger_matching() {
        let trigger = Trigger::QueryFulfilled("defs".to_string());
        assert!(trigger.matches(&StoreEvent::QueryFulfilled {
            query: "defs".to_string(),
            key: RequestKey::new("k"),
        }));
        assert!(!trigger.matches(&arrived("defs")));
        assert!(Trigger::EntitiesArrived("x".to_string()).matches(&arrived("x")));
        assert!(!Trigger::EntitiesCreated("x".to_string()).matches(&arrived("x")));
    }

    #[tokio::test]
    async fn test_untriggered_event_is_ignored() {
        let mw = middleware(Arc::new(Mutex::new(ids(&["A"]))));
        assert!(matches!(mw.handle_event(&arrived("channels")), Reaction::Ignored));
    }

    #[tokio::test]
    async fn test_empty_demand_is_skipped() {
        let mw = middleware(Arc::new(Mutex::new(Vec::new())));
        assert!(matches!(mw.handle_event(&arrived("signalDetections")), Reaction::Skipped));
        assert!(mw.engine().history().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_dispatches_and_populates() {
        let mw = middleware(Arc::new(Mutex::new(ids(&["B", "A"]))));
        let handle = mw
            .handle_event(&arrived("signalDetections"))
            .into_handle()
            .unwrap();
        handle.await.unwrap();
        let expected: BTreeSet<String> = ids(&["A", "B"]).into_iter().collect();
        assert_eq!(mw.engine().cache(), expected);
    }

    #[tokio::test]
    async fn test_retry_guard() {
        let demand = Arc::new(Mutex::new(ids(&["A", "B"])));
        let mw = middleware(demand.clone());

        let rejected = |key: &str| StoreEvent::QueryRejected {
            query: "local".to_string(),
            key: RequestKey::new(key),
            error: FetchError::new("transport", "down"),
        };

        assert!(matches!(mw.handle_event(&rejected("A")), Reaction::RetryRefused));
        assert!(mw.handle_event(&rejected("A;B")).is_dispatched());

        // Another query's rejection is not ours to retry.
        let other = StoreEvent::QueryRejected {
            query: "other".to_string(),
            key: RequestKey::new("A;B"),
            error: FetchError::new("transport", "down"),
        };
        assert!(matches!(mw.handle_event(&other), Reaction::Ignored));
    }

    #[tokio::test]
    async fn test_start_stop() {
        let bus = EventBus::new(16);
        let mut mw = middleware(Arc::new(Mutex::new(ids(&["A"]))));

        mw.start(&bus).unwrap();
        assert!(mw.is_running());
        assert!(matches!(mw.start(&bus), Err(Error::AlreadyRunning(_))));

        bus.publish(arrived("signalDetections"));
        let populated = tokio::time::timeout(Duration::from_secs(5), async {
            while mw.engine().cache().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(populated.is_ok());

        mw.stop().await;
        assert!(!mw.is_running());
    }
}
