//! Uniform random load balancing strategy.

use crate::load_balancer::LoadBalancer;

/// Picks each endpoint with equal probability.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomBalancer;

impl RandomBalancer {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for RandomBalancer {
    fn next_endpoint<'a>(&self, endpoints: &'a [String]) -> Option<&'a str> {
        if endpoints.is_empty() {
            return None;
        }
        Some(endpoints[fastrand::usize(..endpoints.len())].as_str())
    }
}
