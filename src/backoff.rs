//! # Backoff Schedule
//!
//! After a request for a key is rejected, the next attempt is only admitted
//! once a cooldown has elapsed. The cooldown is chosen by the cumulative
//! number of attempts made for that key:
//!
//! ```text
//! attempts   cooldown
//! ────────   ────────────────
//!   0-1      0 ms (immediate)
//!   2-6      30 s
//!   7-11     60 s
//!  12-16     3 min
//!  17-24     5 min
//!   25+      never
//! ```
//!
//! The schedule is a step table so deployments can tune it from config;
//! [`BackoffSchedule::default`] is the table above.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One row of the schedule: attempts up to and including `max_attempts`
/// wait `cooldown_ms` before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffStep {
    /// Highest attempt count this step applies to.
    pub max_attempts: u32,
    /// Cooldown in milliseconds.
    pub cooldown_ms: u64,
}

impl BackoffStep {
    /// Creates a schedule step.
    pub const fn new(max_attempts: u32, cooldown_ms: u64) -> Self {
        Self {
            max_attempts,
            cooldown_ms,
        }
    }
}

/// The default step table.
pub const DEFAULT_BACKOFF_STEPS: [BackoffStep; 5] = [
    BackoffStep::new(1, 0),
    BackoffStep::new(6, 30_000),
    BackoffStep::new(11, 60_000),
    BackoffStep::new(16, 180_000),
    BackoffStep::new(24, 300_000),
];

/// A stepped cooldown schedule.
///
/// Steps must be sorted by `max_attempts`. Attempt counts beyond the last
/// step never retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<BackoffStep>", into = "Vec<BackoffStep>")]
pub struct BackoffSchedule {
    steps: Vec<BackoffStep>,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            steps: DEFAULT_BACKOFF_STEPS.to_vec(),
        }
    }
}

impl From<Vec<BackoffStep>> for BackoffSchedule {
    fn from(steps: Vec<BackoffStep>) -> Self {
        Self::new(steps)
    }
}

impl From<BackoffSchedule> for Vec<BackoffStep> {
    fn from(schedule: BackoffSchedule) -> Self {
        schedule.steps
    }
}

impl BackoffSchedule {
    /// Creates a schedule from steps, sorting them by `max_attempts`.
    pub fn new(mut steps: Vec<BackoffStep>) -> Self {
        steps.sort_by_key(|s| s.max_attempts);
        Self { steps }
    }

    /// Returns the steps of this schedule.
    pub fn steps(&self) -> &[BackoffStep] {
        &self.steps
    }

    /// Returns the cooldown for a key that has been attempted `attempts`
    /// times, or `None` if it must never be retried automatically.
    pub fn cooldown(&self, attempts: u32) -> Option<Duration> {
        self.steps
            .iter()
            .find(|step| attempts <= step.max_attempts)
            .map(|step| Duration::from_millis(step.cooldown_ms))
    }

    /// Returns true if a retry is admissible `elapsed` after the last
    /// attempt.
    pub fn is_eligible(&self, attempts: u32, elapsed: Duration) -> bool {
        match self.cooldown(attempts) {
            Some(cooldown) => elapsed >= cooldown,
            None => false,
        }
    }
}
