//! # Store Events & Subscriptions
//!
//! Every mutation the engine (or the host application) makes to shared state
//! is published on an [`EventBus`]. The population middleware listens here to
//! notice data that has newly become necessary.
//!
//! ```text
//!   QueryEngine ──publish(QueryFulfilled/QueryRejected)──┐
//!                                                         ▼
//!   host app ───publish(EntitiesArrived/Created)───► EventBus (broadcast)
//!                                                         │
//!                        ┌────────────────────────────────┼──────────────┐
//!                        ▼                                ▼              ▼
//!                 Subscription (filtered)        PopulationMiddleware   ...
//! ```
//!
//! ## Backpressure Handling
//!
//! If a subscriber can't keep up:
//! - The broadcast channel has a bounded capacity
//! - Lagging receivers get `RecvError::Lagged(n)` indicating n missed events
//! - [`Subscription::next`] turns that into [`Error::SubscriptionLagged`]
//!
//! Events only say *that* something changed. A lagged subscriber loses no
//! data: it re-reads current state on the next event.
//!
//! ## Rust Concepts
//!
//! - **`tokio::sync::broadcast`**: Multi-producer, multi-consumer channel where
//!   each receiver gets a copy of every message.

use std::fmt;

use tokio::sync::broadcast;

use crate::config::{EngineConfig, DEFAULT_EVENT_CAPACITY};
use crate::error::{Error, Result};
use crate::types::{FetchError, RequestKey};

// =============================================================================
// Store Events
// =============================================================================

/// A mutation of shared application state.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// Entities were loaded from a backend (for example, a batch of signal
    /// detections arriving for the current interval).
    EntitiesArrived {
        /// Entity kind, e.g. `"signalDetections"`.
        kind: String,
        /// Ids of the entities that arrived.
        ids: Vec<String>,
    },

    /// Entities were created locally.
    EntitiesCreated {
        /// Entity kind.
        kind: String,
        /// Ids of the created entities.
        ids: Vec<String>,
    },

    /// A query committed a result to its cache.
    QueryFulfilled {
        /// Name of the query.
        query: String,
        /// Key of the demand.
        key: RequestKey,
    },

    /// A query's request failed.
    QueryRejected {
        /// Name of the query.
        query: String,
        /// Key of the demand.
        key: RequestKey,
        /// What went wrong.
        error: FetchError,
    },
}

impl StoreEvent {
    /// Short name of the event variant, for logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            StoreEvent::EntitiesArrived { .. } => "entities_arrived",
            StoreEvent::EntitiesCreated { .. } => "entities_created",
            StoreEvent::QueryFulfilled { .. } => "query_fulfilled",
            StoreEvent::QueryRejected { .. } => "query_rejected",
        }
    }

    /// The query this event concerns, if it is a query event.
    pub fn query(&self) -> Option<&str> {
        match self {
            StoreEvent::QueryFulfilled { query, .. } | StoreEvent::QueryRejected { query, .. } => {
                Some(query)
            }
            _ => None,
        }
    }
}

impl fmt::Display for StoreEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreEvent::EntitiesArrived { kind, ids } | StoreEvent::EntitiesCreated { kind, ids } => {
                write!(f, "{}({}: {} ids)", self.kind_name(), kind, ids.len())
            }
            StoreEvent::QueryFulfilled { query, key } => {
                write!(f, "{}({} {})", self.kind_name(), query, key)
            }
            StoreEvent::QueryRejected { query, key, error } => {
                write!(f, "{}({} {}: {})", self.kind_name(), query, key, error)
            }
        }
    }
}

// =============================================================================
// Event Bus
// =============================================================================

/// Publishes [`StoreEvent`]s to every subscriber.
///
/// Cloning the bus shares the underlying channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StoreEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    /// Creates a bus that buffers up to `capacity` events per subscriber.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Creates a bus sized by `config.event_capacity`.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.event_capacity)
    }

    /// Publishes an event. Returns the number of subscribers that will see it.
    ///
    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, event: StoreEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns a raw broadcast receiver.
    pub fn receiver(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }

    /// Subscribes to every event.
    pub fn subscribe(&self) -> Subscription {
        Subscription::new(self.sender.subscribe())
    }

    /// Subscribes to events accepted by `filter`.
    pub fn subscribe_filtered<F>(&self, filter: F) -> Subscription
    where
        F: Fn(&StoreEvent) -> bool + Send + Sync + 'static,
    {
        Subscription::with_filter(self.sender.subscribe(), filter)
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

// =============================================================================
// Subscription
// =============================================================================

type EventFilter = Box<dyn Fn(&StoreEvent) -> bool + Send + Sync>;

/// A polling subscription over the event bus.
///
/// # Example
///
/// ```rust
/// use fetchgate::{EventBus, StoreEvent};
///
/// # tokio_test_block_on(async {
/// let bus = EventBus::new(16);
/// let mut sub = bus.subscribe();
///
/// bus.publish(StoreEvent::EntitiesArrived { kind: "signalDetections".into(), ids: vec!["A".into()] });
///
/// match sub.next().await {
///     Some(Ok(event)) => assert_eq!(event.kind_name(), "entities_arrived"),
///     other => panic!("unexpected {:?}", other),
/// }
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
pub struct Subscription {
    receiver: broadcast::Receiver<StoreEvent>,
    filter: Option<EventFilter>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("buffered", &self.receiver.len())
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

impl Subscription {
    /// Creates a subscription from a broadcast receiver.
    pub fn new(receiver: broadcast::Receiver<StoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Creates a subscription that only yields events accepted by `filter`.
    pub fn with_filter<F>(receiver: broadcast::Receiver<StoreEvent>, filter: F) -> Self
    where
        F: Fn(&StoreEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            receiver,
            filter: Some(Box::new(filter)),
        }
    }

    fn accepts(&self, event: &StoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }

    /// Receives the next event.
    ///
    /// # Returns
    ///
    /// - `Some(Ok(event))` - Next event
    /// - `Some(Err(e))` - Error (e.g., lagged)
    /// - `None` - Bus closed
    pub async fn next(&mut self) -> Option<Result<StoreEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if !self.accepts(&event) {
                        continue;
                    }
                    return Some(Ok(event));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    return Some(Err(Error::SubscriptionLagged(n)));
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return None;
                }
            }
        }
    }

    /// Tries to receive the next event without blocking.
    ///
    /// # Returns
    ///
    /// - `Some(Ok(event))` - Event available
    /// - `Some(Err(e))` - Error (e.g., lagged)
    /// - `None` - No event available, or the bus is closed
    pub fn try_next(&mut self) -> Option<Result<StoreEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if !self.accepts(&event) {
                        continue;
                    }
                    return Some(Ok(event));
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(Error::SubscriptionLagged(n)));
                }
                Err(broadcast::error::TryRecvError::Closed) => return None,
            }
        }
    }

    /// Returns the number of events buffered for this subscriber.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Returns true if no events are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Tests
// =============================================================================
