use std::sync::Weak;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::frame::response::event::{Event, RawEvent, StatusChangeEvent, TopologyChangeEvent};
use crate::network::connection_pool::ConnectionPools;

/// Capacity of the channel between the event connection and the worker.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Applies server events received on the event connection, one at a time,
/// in the order they arrive.
pub(crate) struct EventWorker {
    pools: Weak<ConnectionPools>,
    events: mpsc::Receiver<RawEvent>,
}

impl EventWorker {
    pub(crate) fn new(pools: Weak<ConnectionPools>, events: mpsc::Receiver<RawEvent>) -> Self {
        Self { pools, events }
    }

    pub(crate) async fn work(mut self) {
        while let Some(raw_event) = self.events.recv().await {
            let Some(pools) = self.pools.upgrade() else {
                break;
            };
            apply_event(&pools, raw_event).await;
        }
        debug!("Event worker finished");
    }
}

/// Updates the host registry according to one server event.
///
/// An event that cannot be understood is dropped with a warning; later
/// events are still applied.
pub(crate) async fn apply_event(pools: &ConnectionPools, raw_event: RawEvent) {
    let event = match Event::try_from(raw_event) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "Protocol violation: dropping unexpected server event");
            return;
        }
    };

    match event {
        Event::StatusChange(StatusChangeEvent::Up(address))
        | Event::TopologyChange(TopologyChangeEvent::NewNode(address)) => {
            let mut state = pools.lock().await;
            if !state.registry.add_host(address) {
                state.registry.bring_up(address);
            }
        }
        Event::StatusChange(StatusChangeEvent::Down(address)) => {
            if !pools.lock().await.registry.set_down(address) {
                debug!(host = %address, "DOWN event for unknown host");
            }
        }
        Event::TopologyChange(TopologyChangeEvent::RemovedNode(address)) => {
            let mut state = pools.lock().await;
            if state.registry.remove_host(address).is_some() {
                let connections = state.take_pool(address);
                drop(state);
                pools.retire(connections);
            }
        }
        Event::SchemaChange(change) => {
            debug!(
                keyspace = %change.keyspace_name,
                change = ?change.change_type,
                target = ?change.target,
                "Schema changed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::cluster::registry::HostRegistry;
    use crate::network::connection_pool::{Acquired, Route};
    use crate::network::PoolingOptions;
    use crate::policies::load_balancing::LoadBalancingPolicy;
    use crate::policies::reconnection::ConstantReconnectionPolicy;
    use crate::test_utils::{setup_tracing, FixedOrderPolicy, MockCluster};

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, last], 9042))
    }

    fn pools(cluster: &MockCluster, hosts: &[SocketAddr]) -> ConnectionPools {
        let mut registry = HostRegistry::new(Arc::new(ConstantReconnectionPolicy::new(
            Duration::from_secs(1),
        )));
        for host in hosts {
            registry.add_host(*host);
        }
        let policy = Arc::new(FixedOrderPolicy::new());
        policy.initialize(Arc::new(registry.view()));
        ConnectionPools::new(
            registry,
            None,
            cluster.connector(),
            PoolingOptions::new(),
            policy,
            Duration::from_secs(1),
        )
    }

    async fn known(pools: &ConnectionPools) -> Vec<(SocketAddr, bool)> {
        pools
            .lock()
            .await
            .registry
            .all_hosts()
            .iter()
            .map(|h| (h.address(), h.is_up()))
            .collect()
    }

    #[tokio::test]
    #[ntest::timeout(5000)]
    async fn membership_events_update_registry() {
        setup_tracing();
        let cluster = MockCluster::new();
        let pools = pools(&cluster, &[addr(1)]);

        apply_event(&pools, RawEvent::status("DOWN", addr(1))).await;
        assert_eq!(known(&pools).await, vec![(addr(1), false)]);

        // UP for a known host brings it up, for an unknown one adds it.
        apply_event(&pools, RawEvent::status("UP", addr(1))).await;
        apply_event(&pools, RawEvent::status("UP", addr(2))).await;
        assert_eq!(known(&pools).await, vec![(addr(1), true), (addr(2), true)]);

        apply_event(&pools, RawEvent::topology("NEW_NODE", addr(3))).await;
        apply_event(&pools, RawEvent::topology("REMOVED_NODE", addr(2))).await;
        apply_event(&pools, RawEvent::topology("REMOVED_NODE", addr(2))).await;
        apply_event(&pools, RawEvent::status("DOWN", addr(9))).await;
        assert_eq!(known(&pools).await, vec![(addr(1), true), (addr(3), true)]);
    }

    #[tokio::test]
    #[ntest::timeout(5000)]
    async fn malformed_and_schema_events_leave_registry_alone() {
        setup_tracing();
        let cluster = MockCluster::new();
        let pools = pools(&cluster, &[addr(1)]);

        let mut unknown = RawEvent::status("UP", addr(2));
        unknown.event_type = "KEYSPACE_CHANGE".to_string();
        apply_event(&pools, unknown).await;
        apply_event(&pools, RawEvent::status("SIDEWAYS", addr(2))).await;
        apply_event(&pools, RawEvent::schema("CREATED", "TABLE", "ks", Some("t"))).await;

        assert_eq!(known(&pools).await, vec![(addr(1), true)]);
    }

    #[tokio::test]
    #[ntest::timeout(5000)]
    async fn removed_host_pool_is_closed() {
        setup_tracing();
        let cluster = MockCluster::new();
        let pools = pools(&cluster, &[addr(1)]);
        let mut route = Route::new(None);
        let Ok(Acquired::Connection(busy)) = pools.acquire(&mut route, None).await else {
            panic!("acquire failed");
        };
        let guard = cluster.hold_stream(&busy);
        assert_eq!(cluster.live_connections(addr(1)), 2);

        apply_event(&pools, RawEvent::topology("REMOVED_NODE", addr(1))).await;
        // The idle connection is closed right away, the busy one is retired.
        assert_eq!(cluster.live_connections(addr(1)), 1);
        assert_eq!(cluster.close_count(&busy), 0);
        assert_eq!(pools.trash_size(), 1);

        drop(guard);
        pools.close().await;
        assert_eq!(cluster.close_count(&busy), 1);
    }

    #[tokio::test]
    #[ntest::timeout(5000)]
    async fn worker_applies_events_in_order_and_stops_with_pools() {
        setup_tracing();
        let cluster = MockCluster::new();
        let pools = Arc::new(pools(&cluster, &[addr(1)]));
        let (sender, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let worker = tokio::spawn(EventWorker::new(Arc::downgrade(&pools), receiver).work());

        sender.send(RawEvent::status("DOWN", addr(1))).await.unwrap();
        sender.send(RawEvent::status("UP", addr(1))).await.unwrap();
        sender.send(RawEvent::status("DOWN", addr(1))).await.unwrap();
        drop(sender);
        worker.await.unwrap();

        assert_eq!(known(&pools).await, vec![(addr(1), false)]);
    }
}
