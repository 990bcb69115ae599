use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::debug;

use super::host::Host;
use crate::policies::load_balancing::HostSource;
use crate::policies::reconnection::ReconnectionPolicy;

/// Known cluster members and their up/down state.
///
/// Lives inside the pool state, so every mutation happens under the pool lock.
/// After each change a snapshot is published for lock-free readers
/// (the load balancing policy, `Session::hosts`).
pub(crate) struct HostRegistry {
    hosts: BTreeMap<SocketAddr, Arc<Host>>,
    reconnection_policy: Arc<dyn ReconnectionPolicy>,
    snapshot: Arc<ArcSwap<Vec<Arc<Host>>>>,
}

impl HostRegistry {
    pub(crate) fn new(reconnection_policy: Arc<dyn ReconnectionPolicy>) -> Self {
        Self {
            hosts: BTreeMap::new(),
            reconnection_policy,
            snapshot: Arc::new(ArcSwap::from_pointee(Vec::new())),
        }
    }

    /// Read-only view following every future change.
    pub(crate) fn view(&self) -> HostRegistryView {
        HostRegistryView {
            snapshot: Arc::clone(&self.snapshot),
        }
    }

    fn publish(&self) {
        self.snapshot
            .store(Arc::new(self.hosts.values().cloned().collect()));
    }

    pub(crate) fn get(&self, address: SocketAddr) -> Option<&Arc<Host>> {
        self.hosts.get(&address)
    }

    /// Adds a host, unless one with this address is already known.
    /// Returns whether the host was added.
    pub(crate) fn add_host(&mut self, address: SocketAddr) -> bool {
        if self.hosts.contains_key(&address) {
            return false;
        }
        let host = Arc::new(Host::new(address, Arc::clone(&self.reconnection_policy)));
        self.hosts.insert(address, host);
        debug!(host = %address, "Host added");
        self.publish();
        true
    }

    /// Removes a host. Removing an unknown address does nothing.
    pub(crate) fn remove_host(&mut self, address: SocketAddr) -> Option<Arc<Host>> {
        let removed = self.hosts.remove(&address);
        if removed.is_some() {
            debug!(host = %address, "Host removed");
            self.publish();
        }
        removed
    }

    /// Marks a known host down. Returns whether the address is known.
    pub(crate) fn set_down(&mut self, address: SocketAddr) -> bool {
        match self.hosts.get(&address) {
            Some(host) => {
                host.set_down();
                true
            }
            None => false,
        }
    }

    /// Marks a known host up. Returns whether the address is known.
    pub(crate) fn bring_up(&mut self, address: SocketAddr) -> bool {
        match self.hosts.get(&address) {
            Some(host) => {
                host.bring_up();
                true
            }
            None => false,
        }
    }

    pub(crate) fn all_hosts(&self) -> Vec<Arc<Host>> {
        self.hosts.values().cloned().collect()
    }
}

/// Lock-free view of a [HostRegistry], handed to the load balancing policy.
#[derive(Debug, Clone)]
pub(crate) struct HostRegistryView {
    snapshot: Arc<ArcSwap<Vec<Arc<Host>>>>,
}

impl HostSource for HostRegistryView {
    fn all_hosts(&self) -> Arc<Vec<Arc<Host>>> {
        self.snapshot.load_full()
    }
}
