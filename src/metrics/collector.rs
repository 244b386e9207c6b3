// src/metrics/collector.rs
use crate::health::HealthState;
use anyhow::{Context, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("Failed to encode metrics")?;
        Ok(buffer)
    }
}

pub struct MetricsCollector {
    // Request metrics
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,
    pub fallback_total: IntCounter,
    pub no_healthy_instance_total: IntCounterVec,

    // Health metrics
    pub instance_health_state: IntGaugeVec,
    pub health_probes_total: IntCounterVec,
    pub healthy_instances: IntGaugeVec,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("gateway_requests_total", "Requests forwarded to an upstream"),
            &["route", "upstream", "status_code"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "gateway_request_duration_seconds",
                "Upstream round-trip duration in seconds",
            ),
            &["upstream"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let fallback_total = IntCounter::new(
            "gateway_fallback_total",
            "Requests answered by the fallback rule",
        )?;
        registry.register(Box::new(fallback_total.clone()))?;

        let no_healthy_instance_total = IntCounterVec::new(
            Opts::new(
                "gateway_no_healthy_instance_total",
                "Requests rejected because the upstream had no healthy instance",
            ),
            &["upstream"],
        )?;
        registry.register(Box::new(no_healthy_instance_total.clone()))?;

        let instance_health_state = IntGaugeVec::new(
            Opts::new(
                "gateway_instance_health_state",
                "Instance health state (0=initial, 1=healthy, 2=unhealthy)",
            ),
            &["upstream", "instance"],
        )?;
        registry.register(Box::new(instance_health_state.clone()))?;

        let health_probes_total = IntCounterVec::new(
            Opts::new("gateway_health_probes_total", "Health probes by outcome"),
            &["upstream", "outcome"],
        )?;
        registry.register(Box::new(health_probes_total.clone()))?;

        let healthy_instances = IntGaugeVec::new(
            Opts::new(
                "gateway_healthy_instances",
                "Number of healthy instances per upstream",
            ),
            &["upstream"],
        )?;
        registry.register(Box::new(healthy_instances.clone()))?;

        Ok(Self {
            requests_total,
            request_duration_seconds,
            fallback_total,
            no_healthy_instance_total,
            instance_health_state,
            health_probes_total,
            healthy_instances,
        })
    }

    pub fn record_request(&self, route: u32, upstream: &str, status_code: u16, duration: Duration) {
        let route = route.to_string();
        let status = status_code.to_string();
        self.requests_total
            .with_label_values(&[&route, upstream, &status])
            .inc();

        self.request_duration_seconds
            .with_label_values(&[upstream])
            .observe(duration.as_secs_f64());
    }

    pub fn record_fallback(&self) {
        self.fallback_total.inc();
    }

    pub fn record_no_healthy_instance(&self, upstream: &str) {
        self.no_healthy_instance_total
            .with_label_values(&[upstream])
            .inc();
    }

    pub fn record_probe(&self, upstream: &str, passed: bool) {
        let outcome = if passed { "pass" } else { "fail" };
        self.health_probes_total
            .with_label_values(&[upstream, outcome])
            .inc();
    }

    pub fn update_instance_health(&self, upstream: &str, instance: &str, state: HealthState) {
        self.instance_health_state
            .with_label_values(&[upstream, instance])
            .set(state.metric_value());
    }

    pub fn update_healthy_instances(&self, upstream: &str, count: usize) {
        self.healthy_instances
            .with_label_values(&[upstream])
            .set(count as i64);
    }
}

// Helper for timing operations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
