// src/health/status.rs
use crate::config::HealthCheckConfig;
use chrono::{DateTime, Utc};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Registered, not yet passed `healthy_threshold` probes in a row.
    Initial,
    Healthy,
    Unhealthy,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Initial => "initial",
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
        }
    }

    /// Gauge encoding used by the metrics collector.
    pub fn metric_value(&self) -> i64 {
        match self {
            HealthState::Initial => 0,
            HealthState::Healthy => 1,
            HealthState::Unhealthy => 2,
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consecutive pass/fail counters for one instance.
///
/// Owned by the instance's probe loop; the router only ever sees the
/// published [`HealthSnapshot`].
#[derive(Debug, Clone)]
pub struct HealthTracker {
    state: HealthState,
    consecutive_successes: u32,
    consecutive_failures: u32,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self {
            state: HealthState::Initial,
            consecutive_successes: 0,
            consecutive_failures: 0,
        }
    }
}

impl HealthTracker {
    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Apply one probe outcome. Returns the new state when it changed.
    pub fn record(&mut self, passed: bool, config: &HealthCheckConfig) -> Option<HealthState> {
        let next = if passed {
            self.consecutive_failures = 0;
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);

            match self.state {
                HealthState::Initial | HealthState::Unhealthy
                    if self.consecutive_successes >= config.healthy_threshold =>
                {
                    HealthState::Healthy
                }
                state => state,
            }
        } else {
            self.consecutive_successes = 0;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);

            match self.state {
                HealthState::Healthy
                    if self.consecutive_failures >= config.unhealthy_threshold =>
                {
                    HealthState::Unhealthy
                }
                // INITIAL only ever leaves towards HEALTHY.
                state => state,
            }
        };

        if next != self.state {
            self.state = next;
            Some(next)
        } else {
            None
        }
    }
}

/// Published view of an instance's health, read lock-free by the router.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub state: HealthState,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl HealthSnapshot {
    pub fn initial() -> Self {
        Self {
            state: HealthState::Initial,
            consecutive_successes: 0,
            consecutive_failures: 0,
            last_check: None,
            last_error: None,
        }
    }

    pub fn from_tracker(tracker: &HealthTracker, error: Option<String>) -> Self {
        Self {
            state: tracker.state(),
            consecutive_successes: tracker.consecutive_successes(),
            consecutive_failures: tracker.consecutive_failures(),
            last_check: Some(Utc::now()),
            last_error: error,
        }
    }
}
