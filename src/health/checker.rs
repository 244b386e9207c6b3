// src/health/checker.rs
use super::status::{HealthSnapshot, HealthState, HealthTracker};
use crate::config::HealthCheckConfig;
use crate::metrics::MetricsCollector;
use crate::upstream::{Instance, Upstream, UpstreamRegistry};
use anyhow::{Context, Result};
use reqwest::{redirect, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct HealthChecker {
    registry: Arc<UpstreamRegistry>,
    client: Client,
    metrics: Option<Arc<MetricsCollector>>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct HealthCheckResult {
    pub instance_id: String,
    pub passed: bool,
    pub status: Option<u16>,
    pub response_time_ms: u64,
    pub error: Option<ProbeError>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("expected HTTP {expected}, got {actual}")]
    UnexpectedStatus { expected: u16, actual: u16 },

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid probe URL: {0}")]
    Url(#[from] url::ParseError),
}

impl HealthChecker {
    pub fn new(
        registry: Arc<UpstreamRegistry>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self> {
        // Probes judge the literal status, so redirects are not followed.
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .context("Failed to create health check HTTP client")?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        Ok(Self {
            registry,
            client,
            metrics,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Spawn one probe loop per registered instance.
    pub fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        for upstream in self.registry.all() {
            info!(
                "Starting health checks for {} every {:?} on {}",
                upstream.id,
                upstream.health_check.interval(),
                upstream.health_check.path
            );
            if let Some(metrics) = &self.metrics {
                metrics.update_healthy_instances(&upstream.id, upstream.healthy_instances().len());
            }

            for instance in upstream.instances() {
                let checker = self.clone();
                let upstream = upstream.clone();
                let instance = instance.clone();
                handles.push(tokio::spawn(async move {
                    checker.run_instance(upstream, instance).await
                }));
            }
        }

        handles
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn run_instance(&self, upstream: Arc<Upstream>, instance: Arc<Instance>) {
        let mut tracker = HealthTracker::default();
        let mut ticker = interval(upstream.health_check.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();

        if let Some(metrics) = &self.metrics {
            metrics.update_instance_health(&instance.upstream, &instance.id, tracker.state());
        }

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_instance(&upstream, &instance, &mut tracker).await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        debug!("Health checks for {} stopped", instance.id);
                        break;
                    }
                }
            }
        }
    }

    /// Probe once, fold the outcome into `tracker` and publish the result.
    pub async fn check_instance(
        &self,
        upstream: &Upstream,
        instance: &Instance,
        tracker: &mut HealthTracker,
    ) -> HealthCheckResult {
        let result = self.probe(&upstream.health_check, instance).await;
        let transition = tracker.record(result.passed, &upstream.health_check);

        let error = result.error.as_ref().map(|e| e.to_string());
        match &error {
            None => debug!("Probe of {} passed in {}ms", result.instance_id, result.response_time_ms),
            Some(e) => debug!("Probe of {} failed: {}", result.instance_id, e),
        }

        instance.publish_health(HealthSnapshot::from_tracker(tracker, error));

        if let Some(state) = transition {
            match state {
                HealthState::Healthy => info!(
                    "Instance {} of {} is now healthy after {} consecutive successes",
                    instance.id,
                    upstream.id,
                    tracker.consecutive_successes()
                ),
                _ => warn!(
                    "Instance {} of {} is now {} after {} consecutive failures",
                    instance.id,
                    upstream.id,
                    state,
                    tracker.consecutive_failures()
                ),
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_probe(&upstream.id, result.passed);
            metrics.update_instance_health(&instance.upstream, &instance.id, tracker.state());
            if transition.is_some() {
                metrics.update_healthy_instances(&upstream.id, upstream.healthy_instances().len());
            }
        }

        result
    }

    /// `GET <instance><path>`; passes only on the exact matcher status.
    pub async fn probe(&self, config: &HealthCheckConfig, instance: &Instance) -> HealthCheckResult {
        let start = std::time::Instant::now();
        let outcome = self.send_probe(config, instance).await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        let (passed, status, error) = match outcome {
            Ok(status) if status == config.matcher => (true, Some(status), None),
            Ok(status) => (
                false,
                Some(status),
                Some(ProbeError::UnexpectedStatus {
                    expected: config.matcher,
                    actual: status,
                }),
            ),
            Err(e) => (false, None, Some(e)),
        };

        HealthCheckResult {
            instance_id: instance.id.clone(),
            passed,
            status,
            response_time_ms,
            error,
        }
    }

    async fn send_probe(
        &self,
        config: &HealthCheckConfig,
        instance: &Instance,
    ) -> Result<u16, ProbeError> {
        let url = instance.url.join(&config.path)?;

        let response = timeout(config.timeout(), self.client.get(url).send())
            .await
            .map_err(|_| ProbeError::Timeout(config.timeout()))??;

        Ok(response.status().as_u16())
    }
}
