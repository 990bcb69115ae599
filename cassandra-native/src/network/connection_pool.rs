use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use itertools::Itertools;
use tracing::{debug, trace, warn};

use super::connection::{
    same_connection, use_keyspace, use_keyspace_waiting_for_stream, Connection, Connector,
    VerifiedKeyspaceName,
};
use crate::cluster::host::Host;
use crate::cluster::registry::HostRegistry;
use crate::errors::{
    ConnectionError, ExecutionError, HostUnavailableReason, NoHostAvailableError, UseKeyspaceError,
};
use crate::policies::load_balancing::{HostDistance, LoadBalancingPolicy};
use crate::routing::RoutingKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DistanceLimits {
    core_connections: usize,
    max_connections: usize,
    min_simultaneous_requests: usize,
    max_simultaneous_requests: usize,
}

/// Pool sizing thresholds, per [HostDistance].
///
/// * `core_connections`: number of connections a pool grows to,
/// * `max_connections`: the pool never holds more connections than this,
/// * `max_simultaneous_requests`: a connection carrying that many requests is busy,
/// * `min_simultaneous_requests`: a surplus connection carrying fewer requests is retired.
///
/// Hosts at [HostDistance::Ignored] get no connections: all their thresholds are 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolingOptions {
    local: DistanceLimits,
    remote: DistanceLimits,
}

impl Default for PoolingOptions {
    fn default() -> Self {
        Self {
            local: DistanceLimits {
                core_connections: 2,
                max_connections: 8,
                min_simultaneous_requests: 25,
                max_simultaneous_requests: 100,
            },
            remote: DistanceLimits {
                core_connections: 1,
                max_connections: 2,
                min_simultaneous_requests: 25,
                max_simultaneous_requests: 100,
            },
        }
    }
}

impl PoolingOptions {
    /// Creates options with the default thresholds.
    pub fn new() -> Self {
        Self::default()
    }

    fn limits(&self, distance: HostDistance) -> Option<&DistanceLimits> {
        match distance {
            HostDistance::Local => Some(&self.local),
            HostDistance::Remote => Some(&self.remote),
            HostDistance::Ignored => None,
        }
    }

    fn limits_mut(&mut self, distance: HostDistance) -> Option<&mut DistanceLimits> {
        match distance {
            HostDistance::Local => Some(&mut self.local),
            HostDistance::Remote => Some(&mut self.remote),
            HostDistance::Ignored => None,
        }
    }

    /// Number of connections a pool grows to.
    pub fn core_connections(&self, distance: HostDistance) -> usize {
        self.limits(distance).map_or(0, |l| l.core_connections)
    }

    /// Upper bound on the size of a pool.
    pub fn max_connections(&self, distance: HostDistance) -> usize {
        self.limits(distance).map_or(0, |l| l.max_connections)
    }

    /// Load below which a surplus connection is retired.
    pub fn min_simultaneous_requests(&self, distance: HostDistance) -> usize {
        self.limits(distance).map_or(0, |l| l.min_simultaneous_requests)
    }

    /// Load at which a connection is considered busy.
    pub fn max_simultaneous_requests(&self, distance: HostDistance) -> usize {
        self.limits(distance).map_or(0, |l| l.max_simultaneous_requests)
    }

    /// Sets the core pool size. Raises the maximum if it is lower.
    /// Has no effect for [HostDistance::Ignored].
    pub fn with_core_connections(mut self, distance: HostDistance, core: usize) -> Self {
        if let Some(limits) = self.limits_mut(distance) {
            limits.core_connections = core;
            limits.max_connections = limits.max_connections.max(core);
        }
        self
    }

    /// Sets the maximum pool size. Lowers the core size if it is higher.
    /// Has no effect for [HostDistance::Ignored].
    pub fn with_max_connections(mut self, distance: HostDistance, max: usize) -> Self {
        if let Some(limits) = self.limits_mut(distance) {
            limits.max_connections = max;
            limits.core_connections = limits.core_connections.min(max);
        }
        self
    }

    /// Sets the retirement threshold. Raises the busy threshold if it is lower.
    /// Has no effect for [HostDistance::Ignored].
    pub fn with_min_simultaneous_requests(mut self, distance: HostDistance, min: usize) -> Self {
        if let Some(limits) = self.limits_mut(distance) {
            limits.min_simultaneous_requests = min;
            limits.max_simultaneous_requests = limits.max_simultaneous_requests.max(min);
        }
        self
    }

    /// Sets the busy threshold. Lowers the retirement threshold if it is higher.
    /// Has no effect for [HostDistance::Ignored].
    pub fn with_max_simultaneous_requests(mut self, distance: HostDistance, max: usize) -> Self {
        if let Some(limits) = self.limits_mut(distance) {
            limits.max_simultaneous_requests = max;
            limits.min_simultaneous_requests = limits.min_simultaneous_requests.min(max);
        }
        self
    }
}

/// Routing progress of one operation, kept across connection acquisitions.
#[derive(Debug)]
pub(crate) struct Route {
    routing_key: Option<RoutingKey>,
    current: Option<Arc<Host>>,
    /// Hosts the operation already failed over from.
    excluded: HashSet<SocketAddr>,
    failures: BTreeMap<SocketAddr, HostUnavailableReason>,
}

impl Route {
    pub(crate) fn new(routing_key: Option<RoutingKey>) -> Self {
        Self {
            routing_key,
            current: None,
            excluded: HashSet::new(),
            failures: BTreeMap::new(),
        }
    }

    /// Host of the last acquired connection.
    pub(crate) fn current(&self) -> Option<&Arc<Host>> {
        self.current.as_ref()
    }

    /// Gives up on the current host for the rest of the operation.
    pub(crate) fn fail_over(&mut self, reason: HostUnavailableReason) {
        if let Some(host) = self.current.take() {
            self.excluded.insert(host.address());
            self.failures.insert(host.address(), reason);
        }
    }

    fn no_host_available(&self) -> NoHostAvailableError {
        NoHostAvailableError {
            tried: self.failures.clone(),
        }
    }
}

/// Outcome of a successful acquisition.
#[derive(Debug)]
pub(crate) enum Acquired {
    Connection(Arc<dyn Connection>),
    /// The event connection was found dead and dropped from its pool.
    /// The caller has to register a new one, then acquire again.
    EventConnectionLost,
}

enum HostAttempt {
    Acquired(Arc<dyn Connection>),
    EventConnectionLost,
    Unavailable(HostUnavailableReason),
    Fatal(ConnectionError),
}

/// Everything guarded by the pool lock.
pub(crate) struct PoolsState {
    pub(crate) registry: HostRegistry,
    pools: HashMap<SocketAddr, Vec<Arc<dyn Connection>>>,
    keyspace: Option<VerifiedKeyspaceName>,
    closed: bool,
}

impl PoolsState {
    /// Takes all connections of a host's pool out of the pool.
    pub(crate) fn take_pool(&mut self, address: SocketAddr) -> Vec<Arc<dyn Connection>> {
        self.pools.remove(&address).unwrap_or_default()
    }
}

/// Per-host connection pools of a session, together with the host registry.
///
/// One lock guards the registry and all pools; it is held while new connections
/// are opened. Retired connections wait in a trash set behind a separate lock
/// until they carry no requests, then they are closed.
pub(crate) struct ConnectionPools {
    state: tokio::sync::Mutex<PoolsState>,
    trash: Mutex<Vec<Arc<dyn Connection>>>,
    connector: Arc<dyn Connector>,
    pooling: PoolingOptions,
    load_balancing: Arc<dyn LoadBalancingPolicy>,
    connect_timeout: Duration,
}

impl ConnectionPools {
    pub(crate) fn new(
        registry: HostRegistry,
        keyspace: Option<VerifiedKeyspaceName>,
        connector: Arc<dyn Connector>,
        pooling: PoolingOptions,
        load_balancing: Arc<dyn LoadBalancingPolicy>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            state: tokio::sync::Mutex::new(PoolsState {
                registry,
                pools: HashMap::new(),
                keyspace,
                closed: false,
            }),
            trash: Mutex::new(Vec::new()),
            connector,
            pooling,
            load_balancing,
            connect_timeout,
        }
    }

    pub(crate) async fn lock(&self) -> tokio::sync::MutexGuard<'_, PoolsState> {
        self.state.lock().await
    }

    /// Finds a connection for the next attempt of an operation.
    ///
    /// Hosts are tried in query plan order, with the route's current host first
    /// unless the route failed over from it. Down and ignored hosts are skipped.
    /// For each host, unhealthy connections are dropped, then the first
    /// connection that is not busy is returned; surplus idle connections met
    /// after it are retired. With no usable connection the pool grows towards
    /// its core size, unless it already holds `max - 1` connections.
    pub(crate) async fn acquire(
        &self,
        route: &mut Route,
        event_connection: Option<&Arc<dyn Connection>>,
    ) -> Result<Acquired, ExecutionError> {
        self.sweep_trash();

        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ExecutionError::SessionClosed);
        }

        let mut candidates: Vec<Arc<Host>> = self
            .load_balancing
            .new_query_plan(route.routing_key.as_ref())
            .filter(|host| !route.excluded.contains(&host.address()))
            .unique_by(|host| host.address())
            .collect();
        if let Some(current) = &route.current {
            if let Some(pos) = candidates
                .iter()
                .position(|host| host.address() == current.address())
            {
                let host = candidates.remove(pos);
                candidates.insert(0, host);
            }
        }
        trace!(
            hosts = %candidates.iter().map(|h| h.address()).join(","),
            "Acquiring connection"
        );

        for host in candidates {
            let address = host.address();
            if !host.is_up() {
                route.failures.insert(address, HostUnavailableReason::Down);
                continue;
            }
            let distance = self.load_balancing.distance(&host);
            if distance == HostDistance::Ignored {
                route.failures.insert(address, HostUnavailableReason::Ignored);
                continue;
            }

            match self
                .acquire_from_host(&mut state, address, distance, event_connection)
                .await
            {
                HostAttempt::Acquired(connection) => {
                    route.current = Some(host);
                    return Ok(Acquired::Connection(connection));
                }
                HostAttempt::EventConnectionLost => {
                    warn!(host = %address, "Event connection is broken");
                    return Ok(Acquired::EventConnectionLost);
                }
                HostAttempt::Unavailable(reason) => {
                    trace!(host = %address, reason = %reason, "Host unavailable");
                    if state.pools.get(&address).is_some_and(Vec::is_empty) {
                        state.pools.remove(&address);
                    }
                    route.failures.insert(address, reason);
                }
                HostAttempt::Fatal(err) => return Err(ExecutionError::ConnectionSetup(err)),
            }
        }

        Err(route.no_host_available().into())
    }

    async fn acquire_from_host(
        &self,
        state: &mut PoolsState,
        address: SocketAddr,
        distance: HostDistance,
        event_connection: Option<&Arc<dyn Connection>>,
    ) -> HostAttempt {
        let core = self.pooling.core_connections(distance);
        let max_connections = self.pooling.max_connections(distance);
        let max_requests = self.pooling.max_simultaneous_requests(distance);
        let min_requests = self.pooling.min_simultaneous_requests(distance);
        let is_event_connection =
            |conn: &Arc<dyn Connection>| event_connection.is_some_and(|e| same_connection(e, conn));

        let keyspace = state.keyspace.clone();
        let pool = state.pools.entry(address).or_default();

        let mut event_connection_lost = false;
        pool.retain(|conn| {
            if conn.is_healthy() {
                return true;
            }
            if is_event_connection(conn) {
                event_connection_lost = true;
            }
            debug!(host = %address, "Dropping unhealthy connection");
            conn.close();
            false
        });
        if event_connection_lost {
            return HostAttempt::EventConnectionLost;
        }

        let mut selected: Option<Arc<dyn Connection>> = None;
        let mut pool_size = pool.len();
        let mut retired = Vec::new();
        pool.retain(|conn| {
            if selected.is_none() {
                if conn.in_flight() < max_requests.min(conn.max_streams()) {
                    selected = Some(Arc::clone(conn));
                }
                return true;
            }
            if pool_size > core && conn.in_flight() < min_requests && !is_event_connection(conn) {
                pool_size -= 1;
                retired.push(Arc::clone(conn));
                return false;
            }
            true
        });
        if !retired.is_empty() {
            debug!(host = %address, count = retired.len(), "Retiring surplus connections");
            self.trash.lock().unwrap().extend(retired);
        }
        if let Some(connection) = selected {
            return HostAttempt::Acquired(connection);
        }

        if pool.len() >= max_connections.saturating_sub(1) {
            return HostAttempt::Unavailable(HostUnavailableReason::Exhausted);
        }

        let first = match self.open_connection(address, keyspace.as_ref()).await {
            Ok(connection) => connection,
            Err(err) => return Self::open_failure(address, err),
        };
        pool.push(Arc::clone(&first));
        while pool.len() < core {
            match self.open_connection(address, keyspace.as_ref()).await {
                Ok(connection) => pool.push(connection),
                Err(err) => return Self::open_failure(address, err),
            }
        }
        debug!(host = %address, size = pool.len(), "Pool grown");
        HostAttempt::Acquired(first)
    }

    fn open_failure(address: SocketAddr, err: ConnectionError) -> HostAttempt {
        if err.is_transport_error() {
            debug!(host = %address, error = %err, "Failed to open connection");
            HostAttempt::Unavailable(HostUnavailableReason::ConnectFailed(err))
        } else {
            HostAttempt::Fatal(err)
        }
    }

    async fn open_connection(
        &self,
        address: SocketAddr,
        keyspace: Option<&VerifiedKeyspaceName>,
    ) -> Result<Arc<dyn Connection>, ConnectionError> {
        let connection = tokio::time::timeout(self.connect_timeout, self.connector.connect(address))
            .await
            .map_err(|_| ConnectionError::ConnectTimeout)??;

        if let Some(keyspace) = keyspace {
            if let Err(err) = use_keyspace(connection.as_ref(), keyspace).await {
                connection.close();
                return Err(err.into());
            }
        }
        trace!(host = %address, "Opened connection");
        Ok(connection)
    }

    /// Closes retired connections that no longer carry requests.
    fn sweep_trash(&self) {
        let idle: Vec<Arc<dyn Connection>> = {
            let mut trash = self.trash.lock().unwrap();
            let (idle, busy) = std::mem::take(&mut *trash)
                .into_iter()
                .partition(|conn| conn.in_flight() == 0);
            *trash = busy;
            idle
        };
        for connection in idle {
            trace!(connection = %connection.connect_address(), "Closing retired connection");
            connection.close();
        }
    }

    /// Closes idle connections right away and retires the busy ones.
    pub(crate) fn retire(&self, connections: Vec<Arc<dyn Connection>>) {
        let (idle, busy): (Vec<_>, Vec<_>) = connections
            .into_iter()
            .partition(|conn| conn.in_flight() == 0);
        for connection in idle {
            connection.close();
        }
        self.trash.lock().unwrap().extend(busy);
    }

    /// Switches every healthy pooled connection to `keyspace`, and every future one.
    pub(crate) async fn change_keyspace(
        &self,
        keyspace: VerifiedKeyspaceName,
    ) -> Result<(), UseKeyspaceError> {
        let mut state = self.state.lock().await;
        let connections: Vec<Arc<dyn Connection>> = state
            .pools
            .values()
            .flatten()
            .filter(|conn| conn.is_healthy())
            .cloned()
            .collect();
        debug!(
            keyspace = keyspace.as_str(),
            connections = connections.len(),
            "Changing keyspace"
        );

        futures::future::try_join_all(
            connections
                .iter()
                .map(|conn| use_keyspace_waiting_for_stream(conn.as_ref(), &keyspace)),
        )
        .await?;

        state.keyspace = Some(keyspace);
        Ok(())
    }

    /// Closes every pooled and retired connection; later acquisitions fail.
    /// Dropping the pools has the same effect.
    pub(crate) async fn close(&self) {
        let mut state = self.state.lock().await;
        Self::shut_down(&mut state, &self.trash);
    }

    fn shut_down(state: &mut PoolsState, trash: &Mutex<Vec<Arc<dyn Connection>>>) {
        if state.closed {
            return;
        }
        state.closed = true;
        let pooled = state.pools.drain().flat_map(|(_, pool)| pool);
        let retired = std::mem::take(&mut *trash.lock().unwrap());
        let mut count = 0;
        for connection in pooled.chain(retired) {
            connection.close();
            count += 1;
        }
        debug!(connections = count, "Connection pools closed");
    }

    #[cfg(test)]
    pub(crate) async fn pool_size(&self, address: SocketAddr) -> usize {
        self.state
            .lock()
            .await
            .pools
            .get(&address)
            .map_or(0, Vec::len)
    }

    #[cfg(test)]
    pub(crate) fn trash_size(&self) -> usize {
        self.trash.lock().unwrap().len()
    }
}

impl Drop for ConnectionPools {
    fn drop(&mut self) {
        Self::shut_down(self.state.get_mut(), &self.trash);
    }
}
