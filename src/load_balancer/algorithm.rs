// src/load_balancer/algorithm.rs
use crate::upstream::Instance;
use std::sync::Arc;

/// Chooses one instance out of the currently HEALTHY set of an upstream.
///
/// Called synchronously on the request path, after route resolution and
/// before forwarding.
pub trait LoadBalancer: Send + Sync {
    fn select_instance(&self, instances: &[Arc<Instance>]) -> Option<Arc<Instance>>;

    fn name(&self) -> &'static str;
}
