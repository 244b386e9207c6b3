// src/config/models.rs
use anyhow::{bail, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstreams: Vec<UpstreamConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub id: String,
    pub port: u16,
    /// Explicit instance URLs. Empty means a single local instance on `port`.
    #[serde(default)]
    pub instances: Vec<Url>,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub stickiness: StickinessConfig,
}

impl UpstreamConfig {
    pub fn instance_urls(&self) -> Result<Vec<Url>> {
        if !self.instances.is_empty() {
            return Ok(self.instances.clone());
        }
        let url = Url::parse(&format!("http://127.0.0.1:{}", self.port))?;
        Ok(vec![url])
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_health_path")]
    pub path: String,
    /// Exact status code a probe must return to pass.
    #[serde(default = "default_matcher")]
    pub matcher: u16,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_threshold")]
    pub healthy_threshold: u32,
    #[serde(default = "default_threshold")]
    pub unhealthy_threshold: u32,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            matcher: default_matcher(),
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
            healthy_threshold: default_threshold(),
            unhealthy_threshold: default_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StickinessConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_cookie_duration_secs")]
    pub cookie_duration_secs: u64,
}

impl Default for StickinessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cookie_name: default_cookie_name(),
            cookie_duration_secs: default_cookie_duration_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    pub priority: u32,
    pub patterns: Vec<String>,
    pub upstream: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_fallback_status")]
    pub status: u16,
    #[serde(default = "default_fallback_body")]
    pub body: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            status: default_fallback_status(),
            body: default_fallback_body(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.upstreams.is_empty() {
            bail!("At least one upstream must be configured");
        }
        if self.routes.is_empty() {
            bail!("At least one route must be configured");
        }

        let mut ids = HashSet::new();
        for upstream in &self.upstreams {
            if !ids.insert(upstream.id.as_str()) {
                bail!("Duplicate upstream id '{}'", upstream.id);
            }
            upstream.health_check.validate(&upstream.id)?;
            for url in &upstream.instances {
                validate_instance_url(&upstream.id, url)?;
            }
            if upstream.stickiness.enabled && upstream.stickiness.cookie_name.is_empty() {
                bail!("Upstream '{}': stickiness cookie name is empty", upstream.id);
            }
        }

        let mut priorities = HashSet::new();
        for route in &self.routes {
            if !priorities.insert(route.priority) {
                bail!("Duplicate route priority {}", route.priority);
            }
            if !ids.contains(route.upstream.as_str()) {
                bail!(
                    "Route {} targets unknown upstream '{}'",
                    route.priority,
                    route.upstream
                );
            }
            if route.patterns.is_empty() {
                bail!("Route {} has no path patterns", route.priority);
            }
            for pattern in &route.patterns {
                validate_pattern(route.priority, pattern)?;
            }
        }

        if !(400..=599).contains(&self.fallback.status) {
            bail!("Fallback status {} is not an error status", self.fallback.status);
        }

        Ok(())
    }
}

impl HealthCheckConfig {
    fn validate(&self, upstream: &str) -> Result<()> {
        if !self.path.starts_with('/') {
            bail!("Upstream '{}': health check path must start with '/'", upstream);
        }
        if !(100..=599).contains(&self.matcher) {
            bail!("Upstream '{}': invalid matcher status {}", upstream, self.matcher);
        }
        if self.healthy_threshold == 0 || self.unhealthy_threshold == 0 {
            bail!("Upstream '{}': thresholds must be at least 1", upstream);
        }
        if self.interval_secs == 0 || self.timeout_secs == 0 {
            bail!("Upstream '{}': interval and timeout must be at least 1s", upstream);
        }
        if self.timeout_secs >= self.interval_secs {
            bail!(
                "Upstream '{}': timeout ({}s) must be shorter than interval ({}s)",
                upstream,
                self.timeout_secs,
                self.interval_secs
            );
        }
        Ok(())
    }
}

/// Instances are addressed by scheme and authority only; forwarding keeps
/// the request path, so a base path here would be silently lost.
fn validate_instance_url(upstream: &str, url: &Url) -> Result<()> {
    if url.scheme() != "http" && url.scheme() != "https" {
        bail!("Upstream '{}': instance {} must use http or https", upstream, url);
    }
    if url.host_str().is_none() {
        bail!("Upstream '{}': instance {} has no host", upstream, url);
    }
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        bail!(
            "Upstream '{}': instance {} must not carry a path or query",
            upstream,
            url
        );
    }
    Ok(())
}

fn validate_pattern(priority: u32, pattern: &str) -> Result<()> {
    if !pattern.starts_with('/') {
        bail!("Route {}: pattern '{}' must start with '/'", priority, pattern);
    }
    if let Some(pos) = pattern.find('*') {
        if pos != pattern.len() - 1 || !pattern.ends_with("/*") {
            bail!(
                "Route {}: pattern '{}' may only use '*' as a trailing '/*'",
                priority,
                pattern
            );
        }
    }
    Ok(())
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_matcher() -> u16 {
    200
}

fn default_interval_secs() -> u64 {
    30
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_threshold() -> u32 {
    2
}

fn default_cookie_name() -> String {
    "GWAFFINITY".to_string()
}

fn default_cookie_duration_secs() -> u64 {
    86_400
}

fn default_fallback_status() -> u16 {
    404
}

fn default_fallback_body() -> String {
    "Not Found - Use /health, /auth/, /funds/, or /notifications/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}
