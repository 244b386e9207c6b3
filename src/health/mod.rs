// src/health/mod.rs
mod checker;
mod status;

pub use checker::{HealthCheckResult, HealthChecker, ProbeError};
pub use status::{HealthSnapshot, HealthState, HealthTracker};
