//! Engine configuration.
//!
//! Every field has a default, so a config file only needs to name what it
//! changes:
//!
//! ```json
//! {
//!   "request": { "baseURL": "http://signal-enhancement:8080", "path": "/resource/filter-definition" },
//!   "backoff": [ { "max_attempts": 1, "cooldown_ms": 0 }, { "max_attempts": 3, "cooldown_ms": 5000 } ],
//!   "event_capacity": 512
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffSchedule;
use crate::error::{Error, Result};
use crate::transport::RequestConfig;

/// Default capacity of the event bus.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Configuration of one [`QueryEngine`](crate::QueryEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base request config; queries derive their physical requests from it.
    pub request: RequestConfig,

    /// Cooldown schedule for failed keys.
    pub backoff: BackoffSchedule,

    /// Capacity of the bus built by [`EventBus::from_config`](crate::EventBus::from_config)
    /// and [`EngineBuilder::with_events`](crate::EngineBuilder::with_events).
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request: RequestConfig::default(),
            backoff: BackoffSchedule::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Creates a config for `request` with default backoff and capacity.
    pub fn new(request: RequestConfig) -> Self {
        Self {
            request,
            ..Self::default()
        }
    }

    /// Parses a config from JSON.
    ///
    /// Malformed documents are reported as [`Error::Config`].
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the backoff schedule.
    pub fn with_backoff(mut self, backoff: BackoffSchedule) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the event bus capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Checks values serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be positive".to_string()));
        }
        Ok(())
    }
}
