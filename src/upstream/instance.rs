// src/upstream/instance.rs
use crate::health::{HealthSnapshot, HealthState};
use arc_swap::ArcSwap;
use std::sync::Arc;
use url::Url;

#[derive(Debug)]
pub struct Instance {
    pub id: String,
    pub upstream: String,
    pub url: Url,

    // Written only by this instance's probe loop
    health: ArcSwap<HealthSnapshot>,
}

impl Instance {
    pub fn new(upstream: &str, url: Url) -> Self {
        let id = format!(
            "{}:{}",
            url.host_str().unwrap_or("unknown"),
            url.port_or_known_default().unwrap_or(80)
        );

        Self {
            id,
            upstream: upstream.to_string(),
            url,
            health: ArcSwap::from_pointee(HealthSnapshot::initial()),
        }
    }

    pub fn state(&self) -> HealthState {
        self.health.load().state
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == HealthState::Healthy
    }

    pub fn health(&self) -> Arc<HealthSnapshot> {
        self.health.load_full()
    }

    pub fn publish_health(&self, snapshot: HealthSnapshot) {
        self.health.store(Arc::new(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_includes_default_port() {
        let instance = Instance::new("funds", Url::parse("http://funds.internal").unwrap());
        assert_eq!(instance.id, "funds.internal:80");

        let instance = Instance::new("auth", Url::parse("https://auth.internal").unwrap());
        assert_eq!(instance.id, "auth.internal:443");
    }

    #[test]
    fn starts_initial_and_not_routable() {
        let instance = Instance::new("auth", Url::parse("http://127.0.0.1:8002").unwrap());
        assert_eq!(instance.state(), HealthState::Initial);
        assert!(!instance.is_healthy());
        assert!(instance.health().last_check.is_none());
    }

    #[test]
    fn published_snapshot_is_visible() {
        let instance = Instance::new("auth", Url::parse("http://127.0.0.1:8002").unwrap());
        let mut snapshot = HealthSnapshot::initial();
        snapshot.state = HealthState::Healthy;
        instance.publish_health(snapshot);
        assert!(instance.is_healthy());
    }
}
