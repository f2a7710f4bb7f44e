//! Load-balancing strategies over service instances.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

/// Health of a service instance as seen by the balancer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum InstanceHealth {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

impl InstanceHealth {
    /// Whether the instance may receive traffic.
    pub fn is_healthy(self) -> bool {
        self == Self::Healthy
    }
}

/// A dispatch target tracked by the balancer.
#[derive(Debug, Clone)]
pub struct ServiceInstance {
    pub id: String,
    pub health: InstanceHealth,
    pub active_connections: u32,
    pub response_time_ms: f64,
}

impl ServiceInstance {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            health: InstanceHealth::Healthy,
            active_connections: 0,
            response_time_ms: 0.0,
        }
    }
}

/// Selection strategies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Strategy {
    #[default]
    RoundRobin,
    LeastConnections,
    Random,
    WeightedResponseTime,
    IpHash,
}

/// Picks a service instance for each dispatch.
///
/// Non-healthy instances are filtered out before the strategy runs over
/// the survivors. Selection returns `None` when no healthy instance exists.
pub struct LoadBalancer {
    strategy: Strategy,
    round_robin_counter: AtomicUsize,
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(Strategy::RoundRobin)
    }
}

impl LoadBalancer {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            round_robin_counter: AtomicUsize::new(0),
        }
    }

    /// The configured strategy.
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Select an instance for the next dispatch.
    pub fn select<'a>(
        &self,
        instances: &'a [ServiceInstance],
        client_ip: Option<&str>,
    ) -> Option<&'a ServiceInstance> {
        let healthy: Vec<&ServiceInstance> = instances
            .iter()
            .filter(|instance| instance.health.is_healthy())
            .collect();
        if healthy.is_empty() {
            return None;
        }

        let selected = match self.strategy {
            Strategy::RoundRobin => {
                let turn = self.round_robin_counter.fetch_add(1, Ordering::Relaxed);
                healthy[turn % healthy.len()]
            }
            Strategy::LeastConnections => healthy
                .iter()
                .copied()
                .min_by_key(|instance| instance.active_connections)?,
            Strategy::Random => {
                let index = rand::rng().random_range(0..healthy.len());
                healthy[index]
            }
            Strategy::WeightedResponseTime => healthy
                .iter()
                .copied()
                .min_by(|a, b| a.response_time_ms.total_cmp(&b.response_time_ms))?,
            Strategy::IpHash => match client_ip {
                Some(ip) => {
                    let mut hasher = DefaultHasher::new();
                    ip.hash(&mut hasher);
                    healthy[(hasher.finish() as usize) % healthy.len()]
                }
                None => healthy[0],
            },
        };
        Some(selected)
    }
}
