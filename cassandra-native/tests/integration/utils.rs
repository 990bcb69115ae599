use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cassandra_native::client::session::Session;
use cassandra_native::client::session_builder::SessionBuilder;
use cassandra_native::policies::load_balancing::LoadBalancingPolicy;
use cassandra_native::test_utils::{FixedOrderPolicy, MockCluster};

pub(crate) fn setup_tracing() {
    let _ = tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(tracing_subscriber::fmt::TestWriter::new())
        .try_init();
}

pub(crate) fn addr(last: u8) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, last], 9042))
}

/// Builder for a session over `hosts` of `cluster`, routing in address order.
pub(crate) fn create_new_session_builder(
    cluster: &MockCluster,
    hosts: &[SocketAddr],
) -> SessionBuilder {
    create_session_builder_with_policy(cluster, hosts, Arc::new(FixedOrderPolicy::new()))
}

pub(crate) fn create_session_builder_with_policy(
    cluster: &MockCluster,
    hosts: &[SocketAddr],
    policy: Arc<dyn LoadBalancingPolicy>,
) -> SessionBuilder {
    SessionBuilder::new()
        .known_nodes_addr(hosts)
        .connector(cluster.connector())
        .load_balancing(policy)
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub(crate) async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

/// Whether the session considers `address` up, `None` if it does not know it.
pub(crate) fn host_state(session: &Session, address: SocketAddr) -> Option<bool> {
    session
        .hosts()
        .iter()
        .find(|host| host.address() == address)
        .map(|host| host.is_up())
}
