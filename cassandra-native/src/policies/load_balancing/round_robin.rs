use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{trace, warn};

use super::{HostDistance, HostSource, LoadBalancingPolicy, QueryPlan};
use crate::cluster::host::Host;
use crate::routing::RoutingKey;

/// A round-robin load balancing policy.
///
/// Every plan lists all known hosts, starting one position further than the
/// previous plan. All hosts are [Local](HostDistance::Local).
#[derive(Debug)]
pub struct RoundRobinPolicy {
    hosts: RwLock<Option<Arc<dyn HostSource>>>,
    index: AtomicUsize,
}

impl RoundRobinPolicy {
    /// Creates a policy starting at a random position.
    pub fn new() -> Self {
        Self {
            hosts: RwLock::new(None),
            index: AtomicUsize::new(rand::random::<u32>() as usize),
        }
    }
}

impl Default for RoundRobinPolicy {
    fn default() -> Self {
        Self::new()
    }
}

const ORDER_TYPE: Ordering = Ordering::Relaxed;

impl LoadBalancingPolicy for RoundRobinPolicy {
    fn initialize(&self, hosts: Arc<dyn HostSource>) {
        *self.hosts.write().unwrap() = Some(hosts);
    }

    fn new_query_plan(&self, _routing_key: Option<&RoutingKey>) -> QueryPlan {
        let Some(source) = self.hosts.read().unwrap().clone() else {
            warn!("RoundRobinPolicy used before initialization, returning an empty plan");
            return Box::new(std::iter::empty());
        };
        let hosts = source.all_hosts();
        let len = hosts.len();
        if len == 0 {
            return Box::new(std::iter::empty());
        }
        let start = self.index.fetch_add(1, ORDER_TYPE) % len;
        trace!(start, len, "RoundRobin");

        Box::new((0..len).map(move |i| Arc::clone(&hosts[(start + i) % len])))
    }

    fn distance(&self, _host: &Host) -> HostDistance {
        HostDistance::Local
    }

    fn name(&self) -> String {
        "RoundRobinPolicy".to_string()
    }
}
