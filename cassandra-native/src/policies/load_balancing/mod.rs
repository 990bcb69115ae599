//! Load balancing configurations\
//! `Session` can use any load balancing policy which implements the `LoadBalancingPolicy` trait.

use std::fmt::Debug;
use std::sync::Arc;

use crate::cluster::host::Host;
use crate::routing::RoutingKey;

mod round_robin;
pub use round_robin::RoundRobinPolicy;

/// Ordered, single-use sequence of hosts to try for one routing attempt.
pub type QueryPlan = Box<dyn Iterator<Item = Arc<Host>> + Send>;

/// Classification of a host deciding how many connections the session keeps to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostDistance {
    /// Pooled with the local limits.
    Local,
    /// Pooled with the (usually smaller) remote limits.
    Remote,
    /// Never connected to.
    Ignored,
}

/// Source of the currently known hosts, given to a policy on initialization.
///
/// Every call reflects the latest membership changes.
pub trait HostSource: Debug + Send + Sync {
    /// Snapshot of all known hosts, up or down.
    fn all_hosts(&self) -> Arc<Vec<Arc<Host>>>;
}

/// Policy that decides which hosts to contact for each request, and how far they are.
///
/// The session computes a fresh plan every time it needs a connection: on the
/// first attempt of a request, on each failover and on each retry. The session
/// itself skips hosts that are down or [Ignored](HostDistance::Ignored), so a plan
/// may contain them.
pub trait LoadBalancingPolicy: Send + Sync + Debug {
    /// Called once by the session before the first plan is requested.
    fn initialize(&self, hosts: Arc<dyn HostSource>);

    /// Returns a new plan for a request with the given routing key.
    fn new_query_plan(&self, routing_key: Option<&RoutingKey>) -> QueryPlan;

    /// Returns the distance of the given host.
    fn distance(&self, host: &Host) -> HostDistance;

    /// Returns the name of load balancing policy.
    fn name(&self) -> String;
}
