//! Population middleware driven by a live event bus.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use fetchgate::queries::FilterDefinitionsArgs;
use fetchgate::{
    EngineConfig, EventBus, ManualClock, MiddlewareConfig, PopulationMiddleware, Reaction,
    StoreEvent, Trigger,
};

use common::{eventually, filter_definitions_engine, filter_definitions_responder, MockTransport, START};

const DETECTIONS: &str = "SignalDetection";

fn demand(ids: &[&str]) -> Arc<Mutex<FilterDefinitionsArgs>> {
    Arc::new(Mutex::new(FilterDefinitionsArgs::new("AL1", ids.iter().copied())))
}

fn arrived(ids: &[&str]) -> StoreEvent {
    StoreEvent::EntitiesArrived {
        kind: DETECTIONS.to_string(),
        ids: ids.iter().map(|id| id.to_string()).collect(),
    }
}

fn config() -> MiddlewareConfig {
    MiddlewareConfig::new("filter-definitions")
        .with_trigger(Trigger::EntitiesArrived(DETECTIONS.to_string()))
}

#[tokio::test]
async fn arrival_populates_cache() {
    let bus = EventBus::from_config(&EngineConfig::default());
    let transport = Arc::new(MockTransport::new(filter_definitions_responder));
    let engine = filter_definitions_engine(transport.clone(), ManualClock::new(START), Some(bus.clone()));

    let current = demand(&["A", "B"]);
    let selector = current.clone();
    let mut middleware =
        PopulationMiddleware::new(engine.clone(), config(), move || selector.lock().unwrap().clone());
    middleware.start(&bus).unwrap();

    bus.publish(arrived(&["A", "B"]));
    eventually(Duration::from_secs(5), Duration::from_millis(5), || {
        let cache = engine.cache();
        (cache.contains_key("A-h") && cache.contains_key("B-h")).then_some(())
    })
    .await;

    // A second arrival with the same demand is answered from history.
    bus.publish(arrived(&["A"]));
    *current.lock().unwrap() = FilterDefinitionsArgs::new("AL1", ["A", "B", "C"]);
    bus.publish(arrived(&["C"]));
    eventually(Duration::from_secs(5), Duration::from_millis(5), || {
        engine.cache().contains_key("C-h").then_some(())
    })
    .await;
    assert_eq!(transport.calls(), 2);

    middleware.stop().await;
    assert!(!middleware.is_running());
}

#[tokio::test]
async fn rejection_is_retried_only_for_current_demand() {
    let bus = EventBus::new(64);
    let mut events = bus.subscribe();
    let transport = Arc::new(MockTransport::new(filter_definitions_responder));
    transport.set_failing(true);
    let engine = filter_definitions_engine(transport.clone(), ManualClock::new(START), Some(bus.clone()));

    let current = demand(&["A"]);
    let selector = current.clone();
    let middleware =
        PopulationMiddleware::new(engine.clone(), config(), move || selector.lock().unwrap().clone());

    assert!(engine.query(current.lock().unwrap().clone()).await.is_err());
    let rejected = events.next().await.unwrap().unwrap();
    assert!(matches!(rejected, StoreEvent::QueryRejected { .. }));

    *current.lock().unwrap() = FilterDefinitionsArgs::new("AL1", ["B"]);
    assert!(matches!(middleware.handle_event(&rejected), Reaction::RetryRefused));
    assert_eq!(transport.calls(), 1);

    *current.lock().unwrap() = FilterDefinitionsArgs::new("AL1", ["A"]);
    transport.set_failing(false);
    let handle = middleware.handle_event(&rejected).into_handle().unwrap();
    handle.await.unwrap();
    assert_eq!(transport.calls(), 2);
    assert!(engine.cache().contains_key("A-h"));
}

#[tokio::test]
async fn replayed_rejection_retries_at_most_once() {
    for retry_fails in [true, false] {
        let bus = EventBus::new(64);
        let mut events = bus.subscribe();
        let transport = Arc::new(MockTransport::new(filter_definitions_responder));
        transport.set_failing(true);
        let engine =
            filter_definitions_engine(transport.clone(), ManualClock::new(START), Some(bus.clone()));

        let current = demand(&["A"]);
        let selector = current.clone();
        let middleware =
            PopulationMiddleware::new(engine.clone(), config(), move || selector.lock().unwrap().clone());

        assert!(engine.query(current.lock().unwrap().clone()).await.is_err());
        let rejected = events.next().await.unwrap().unwrap();
        transport.set_failing(retry_fails);

        // The same event delivered twice, then once more after the first
        // retry settled.
        let first = middleware.handle_event(&rejected).into_handle().unwrap();
        let second = middleware.handle_event(&rejected).into_handle().unwrap();
        first.await.unwrap();
        second.await.unwrap();
        middleware.handle_event(&rejected).into_handle().unwrap().await.unwrap();

        assert_eq!(transport.calls(), 2, "retry_fails = {}", retry_fails);
        assert_eq!(engine.cache().contains_key("A-h"), !retry_fails);
    }
}

#[tokio::test]
async fn failing_transport_retries_are_bounded_by_backoff() {
    let bus = EventBus::new(64);
    let transport = Arc::new(MockTransport::new(filter_definitions_responder));
    transport.set_failing(true);
    let clock = ManualClock::new(START);
    let engine = filter_definitions_engine(transport.clone(), clock.clone(), Some(bus.clone()));

    let current = demand(&["A"]);
    let mut middleware =
        PopulationMiddleware::new(engine.clone(), config(), move || current.lock().unwrap().clone());
    middleware.start(&bus).unwrap();

    // One dispatch plus one immediate retry, then the key cools down.
    bus.publish(arrived(&["A"]));
    eventually(Duration::from_secs(5), Duration::from_millis(5), || {
        (transport.calls() == 2).then_some(())
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.calls(), 2);

    bus.publish(arrived(&["A"]));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.calls(), 2);

    // After the cooldown the next trigger dispatches again, and the
    // resulting rejection waits out a fresh cooldown.
    clock.advance(Duration::from_secs(30));
    bus.publish(arrived(&["A"]));
    eventually(Duration::from_secs(5), Duration::from_millis(5), || {
        (transport.calls() == 3).then_some(())
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.calls(), 3);

    middleware.stop().await;
}
