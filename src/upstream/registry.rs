// src/upstream/registry.rs
use super::instance::Instance;
use crate::config::{HealthCheckConfig, StickinessConfig, UpstreamConfig};
use crate::load_balancer::{sticky, LoadBalancer, RoundRobinBalancer};
use anyhow::{bail, Result};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

/// Instance chosen for one request.
#[derive(Debug, Clone)]
pub struct Selection {
    pub instance: Arc<Instance>,
    /// True when an affinity cookie picked the instance.
    pub pinned: bool,
}

pub struct Upstream {
    pub id: String,
    pub port: u16,
    pub health_check: HealthCheckConfig,
    pub stickiness: StickinessConfig,
    instances: Vec<Arc<Instance>>,
    balancer: Arc<dyn LoadBalancer>,
}

impl Upstream {
    pub fn from_config(config: &UpstreamConfig) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut instances = Vec::new();

        for url in config.instance_urls()? {
            let instance = Instance::new(&config.id, url);
            if !seen.insert(instance.id.clone()) {
                bail!("Upstream '{}' lists instance {} twice", config.id, instance.id);
            }
            instances.push(Arc::new(instance));
        }

        Ok(Self {
            id: config.id.clone(),
            port: config.port,
            health_check: config.health_check.clone(),
            stickiness: config.stickiness.clone(),
            instances,
            balancer: Arc::new(RoundRobinBalancer::new()),
        })
    }

    pub fn instances(&self) -> &[Arc<Instance>] {
        &self.instances
    }

    /// HEALTHY instances in declaration order.
    pub fn healthy_instances(&self) -> Vec<Arc<Instance>> {
        self.instances
            .iter()
            .filter(|i| i.is_healthy())
            .cloned()
            .collect()
    }

    /// Pick a HEALTHY instance, honouring `affinity` when stickiness is on.
    pub fn select(&self, affinity: Option<&str>) -> Option<Selection> {
        let healthy = self.healthy_instances();

        if self.stickiness.enabled {
            if let Some(instance) = sticky::pinned_instance(affinity, &healthy) {
                return Some(Selection {
                    instance,
                    pinned: true,
                });
            }
        }

        self.balancer
            .select_instance(&healthy)
            .map(|instance| Selection {
                instance,
                pinned: false,
            })
    }

    pub fn balancer_name(&self) -> &'static str {
        self.balancer.name()
    }
}

/// Upstreams registered at start, keyed by id.
pub struct UpstreamRegistry {
    upstreams: DashMap<String, Arc<Upstream>>,
}

impl UpstreamRegistry {
    pub fn from_config(configs: &[UpstreamConfig]) -> Result<Self> {
        let upstreams = DashMap::new();

        for config in configs {
            let upstream = Upstream::from_config(config)?;
            tracing::info!(
                "Registered upstream {} with {} instance(s), balancer {}",
                upstream.id,
                upstream.instances.len(),
                upstream.balancer_name()
            );
            upstreams.insert(upstream.id.clone(), Arc::new(upstream));
        }

        Ok(Self { upstreams })
    }

    pub fn get(&self, id: &str) -> Option<Arc<Upstream>> {
        self.upstreams.get(id).map(|u| u.clone())
    }

    /// All upstreams, ordered by id.
    pub fn all(&self) -> Vec<Arc<Upstream>> {
        let mut all: Vec<_> = self.upstreams.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}
