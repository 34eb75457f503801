#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fetchgate::queries::{FilterDefinitionsArgs, FilterDefinitionsForSignalDetections};
use fetchgate::{
    EventBus, ManualClock, QueryEngine, RequestConfig, Transport, TransportError,
};
use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::Notify;

pub const START: u64 = 1_700_000_000;

type Responder = Box<dyn Fn(&RequestConfig) -> Result<Value, TransportError> + Send + Sync>;

/// A scripted transport that records every physical request.
pub struct MockTransport {
    calls: AtomicUsize,
    requests: Mutex<Vec<RequestConfig>>,
    responder: Responder,
    failing: AtomicBool,
    gate: Option<Arc<Notify>>,
}

impl MockTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&RequestConfig) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        Self {
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            responder: Box::new(responder),
            failing: AtomicBool::new(false),
            gate: None,
        }
    }

    /// Every request waits on `gate` before answering.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RequestConfig> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    fn send(&self, config: RequestConfig) -> BoxFuture<'_, Result<Value, TransportError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(config.clone());
        Box::pin(async move {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(TransportError::with_status(503, "service unavailable"));
            }
            (self.responder)(&config)
        })
    }
}

/// Answers a filter-definition request with one ONSET definition per
/// requested detection, using hypothesis id `<detection>-h`.
pub fn filter_definitions_responder(config: &RequestConfig) -> Result<Value, TransportError> {
    let data = config.data.clone().unwrap_or(Value::Null);
    let args: FilterDefinitionsArgs =
        serde_json::from_value(data).map_err(|e| TransportError::new(e.to_string()))?;
    let defs: Vec<Value> = args
        .signal_detections
        .iter()
        .map(|sd| {
            json!({
                "signalDetectionHypothesis": { "id": format!("{}-h", sd.id) },
                "filterDefinitionByFilterDefinitionUsage": {
                    "ONSET": { "name": format!("onset for {}", sd.id) }
                }
            })
        })
        .collect();
    Ok(json!({ "filterDefinitionByUsageBySignalDetectionHypothesis": defs }))
}

pub fn filter_definitions_engine(
    transport: Arc<MockTransport>,
    clock: ManualClock,
    bus: Option<EventBus>,
) -> QueryEngine<FilterDefinitionsForSignalDetections> {
    let mut builder = QueryEngine::builder(FilterDefinitionsForSignalDetections::default())
        .shared_transport(transport)
        .clock(clock)
        .base_request(RequestConfig::new(
            "http://signal-enhancement",
            "/resource/filter-definitions-by-usage",
        ));
    if let Some(bus) = bus {
        builder = builder.event_bus(bus);
    }
    builder.build().expect("build engine")
}

pub async fn eventually<T>(
    timeout: Duration,
    interval: Duration,
    mut f: impl FnMut() -> Option<T>,
) -> T {
    let start = std::time::Instant::now();
    loop {
        if let Some(v) = f() {
            return v;
        }
        if start.elapsed() > timeout {
            panic!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(interval).await;
    }
}
