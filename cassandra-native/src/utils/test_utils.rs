//! In-memory cluster used by the driver's own tests.
//!
//! [MockCluster] hands out a [Connector] whose connections answer requests
//! through a configurable responder, count their closes and can be broken
//! on demand.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use rand::Rng;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::trace;

use crate::cluster::host::Host;
use crate::errors::{ConnectionError, ConnectionFault};
use crate::frame::request::Request;
use crate::frame::response::event::RawEvent;
use crate::frame::response::result::{self, Prepared, PreparedMetadata, ResultMetadata, Row, Rows};
use crate::frame::response::Response;
use crate::network::{Connection, Connector, ResponseFuture};
use crate::policies::load_balancing::{HostDistance, HostSource, LoadBalancingPolicy, QueryPlan};
use crate::routing::RoutingKey;

/// How a mock connection answers one request.
#[derive(Debug)]
pub enum MockReply {
    /// Answers with the given response.
    Respond(Response),
    /// Accepts the request, then fails it.
    Fail(ConnectionFault),
    /// Refuses to write the request.
    Refuse(ConnectionFault),
    /// Answers once a permit is available on the semaphore.
    AfterPermit(Arc<Semaphore>, Response),
    /// Never answers; the request fails when the connection breaks.
    Hang,
}

type Responder = dyn Fn(SocketAddr, &Request) -> Option<MockReply> + Send + Sync;

/// Keeps one stream of a mock connection busy while alive.
pub struct StreamGuard {
    in_flight: Arc<AtomicUsize>,
}

impl StreamGuard {
    fn new(in_flight: Arc<AtomicUsize>) -> Self {
        in_flight.fetch_add(1, Ordering::AcqRel);
        Self { in_flight }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Connection of a [MockCluster].
pub struct MockConnection {
    address: SocketAddr,
    max_streams: usize,
    broken: watch::Sender<bool>,
    in_flight: Arc<AtomicUsize>,
    close_count: AtomicUsize,
    keyspace: Mutex<Option<String>>,
    event_sender: Mutex<Option<mpsc::Sender<RawEvent>>>,
    responder: Arc<RwLock<Option<Arc<Responder>>>>,
    requests: Arc<Mutex<Vec<(SocketAddr, Request)>>>,
}

impl fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConnection")
            .field("address", &self.address)
            .field("healthy", &self.is_healthy())
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl MockConnection {
    /// Keyspace the last successful `USE` switched to.
    pub fn keyspace(&self) -> Option<String> {
        self.keyspace.lock().unwrap().clone()
    }

    /// How many times `close` was called.
    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::Acquire)
    }

    /// Whether the connection was registered for events.
    pub fn is_event_connection(&self) -> bool {
        self.event_sender.lock().unwrap().is_some()
    }

    fn break_connection(&self) {
        self.broken.send_replace(true);
    }

    fn default_reply(&self, request: &Request) -> MockReply {
        let response = match request {
            Request::Query { contents, .. } if contents.starts_with("USE ") => {
                let name = contents["USE ".len()..].trim_matches('"').to_string();
                Response::Result(result::Result::SetKeyspace(result::SetKeyspace {
                    keyspace_name: name,
                }))
            }
            Request::Query { contents, .. } if contents.starts_with("SELECT") => {
                Response::Result(result::Result::Rows(Rows {
                    metadata: ResultMetadata::default(),
                    rows: vec![Row {
                        columns: vec![Some(Bytes::from(self.address.to_string()))],
                    }],
                }))
            }
            Request::Query { .. } | Request::Execute { .. } => {
                Response::Result(result::Result::Void)
            }
            Request::Prepare { contents } => Response::Result(result::Result::Prepared(Prepared {
                id: Bytes::copy_from_slice(contents.as_bytes()),
                prepared_metadata: PreparedMetadata::default(),
                result_metadata: ResultMetadata::default(),
            })),
            Request::Register { .. } => Response::Ready,
        };
        MockReply::Respond(response)
    }

    fn record_keyspace(&self, response: &Response) {
        if let Response::Result(result::Result::SetKeyspace(set)) = response {
            *self.keyspace.lock().unwrap() = Some(set.keyspace_name.clone());
        }
    }
}

impl Connection for MockConnection {
    fn connect_address(&self) -> SocketAddr {
        self.address
    }

    fn begin_request(&self, request: Request) -> Result<ResponseFuture, ConnectionFault> {
        if !self.is_healthy() {
            return Err(ConnectionFault::Closed);
        }
        if self.in_flight() >= self.max_streams {
            return Err(ConnectionFault::UnableToAllocStreamId);
        }
        self.requests
            .lock()
            .unwrap()
            .push((self.address, request.clone()));
        trace!(connection = %self.address, opcode = %request.opcode(), "Mock request");

        let responder = self.responder.read().unwrap().clone();
        let reply = responder
            .and_then(|respond| respond(self.address, &request))
            .unwrap_or_else(|| self.default_reply(&request));
        if let MockReply::Refuse(fault) = reply {
            return Err(fault);
        }

        let guard = StreamGuard::new(Arc::clone(&self.in_flight));
        let mut broken = self.broken.subscribe();
        let response = async move {
            let _guard = guard;
            let answer = async {
                match reply {
                    MockReply::Respond(response) => Ok(response),
                    MockReply::Fail(fault) | MockReply::Refuse(fault) => Err(fault),
                    MockReply::AfterPermit(semaphore, response) => {
                        let _permit = semaphore
                            .acquire()
                            .await
                            .map_err(|_| ConnectionFault::Closed)?;
                        Ok(response)
                    }
                    MockReply::Hang => futures::future::pending().await,
                }
            };
            tokio::select! {
                res = answer => res,
                _ = broken.wait_for(|b| *b).map(|_| ()) => Err(ConnectionFault::Closed),
            }
        };
        Ok(response.boxed())
    }

    fn is_healthy(&self) -> bool {
        !*self.broken.borrow()
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    fn max_streams(&self) -> usize {
        self.max_streams
    }

    fn set_event_sender(&self, sender: mpsc::Sender<RawEvent>) {
        *self.event_sender.lock().unwrap() = Some(sender);
    }

    fn close(&self) {
        self.close_count.fetch_add(1, Ordering::AcqRel);
        self.break_connection();
    }
}

// Lets the connection remember the keyspace of every `SetKeyspace` answer.
fn track_keyspace(connection: &Arc<MockConnection>, future: ResponseFuture) -> ResponseFuture {
    let connection = Arc::clone(connection);
    async move {
        let response = future.await?;
        connection.record_keyspace(&response);
        Ok(response)
    }
    .boxed()
}

/// [Connection] handed out by the mock connector.
#[derive(Debug)]
struct TrackedConnection(Arc<MockConnection>);

impl Connection for TrackedConnection {
    fn connect_address(&self) -> SocketAddr {
        self.0.connect_address()
    }

    fn begin_request(&self, request: Request) -> Result<ResponseFuture, ConnectionFault> {
        let future = self.0.begin_request(request)?;
        Ok(track_keyspace(&self.0, future))
    }

    fn is_healthy(&self) -> bool {
        self.0.is_healthy()
    }

    fn in_flight(&self) -> usize {
        self.0.in_flight()
    }

    fn max_streams(&self) -> usize {
        self.0.max_streams()
    }

    fn set_event_sender(&self, sender: mpsc::Sender<RawEvent>) {
        self.0.set_event_sender(sender)
    }

    fn close(&self) {
        self.0.close()
    }
}

#[derive(Default)]
struct ClusterState {
    refused: HashMap<SocketAddr, bool>,
    attempts: HashMap<SocketAddr, usize>,
    connect_delay: Option<Duration>,
    connections: Vec<(Arc<dyn Connection>, Arc<MockConnection>)>,
}

/// A set of in-memory nodes.
#[derive(Clone)]
pub struct MockCluster {
    state: Arc<Mutex<ClusterState>>,
    responder: Arc<RwLock<Option<Arc<Responder>>>>,
    requests: Arc<Mutex<Vec<(SocketAddr, Request)>>>,
    max_streams: Arc<AtomicUsize>,
    refuse_all: Arc<AtomicBool>,
}

impl fmt::Debug for MockCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockCluster").finish_non_exhaustive()
    }
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCluster {
    /// Creates a cluster where every address accepts connections.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ClusterState::default())),
            responder: Arc::new(RwLock::new(None)),
            requests: Arc::new(Mutex::new(Vec::new())),
            max_streams: Arc::new(AtomicUsize::new(1024)),
            refuse_all: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Connector opening connections to this cluster.
    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MockConnector {
            cluster: self.clone(),
        })
    }

    /// Overrides answers. Requests for which `responder` returns `None`
    /// get the default answer.
    pub fn set_responder(
        &self,
        responder: impl Fn(SocketAddr, &Request) -> Option<MockReply> + Send + Sync + 'static,
    ) {
        *self.responder.write().unwrap() = Some(Arc::new(responder));
    }

    /// Makes connection attempts to `address` fail (or succeed again).
    pub fn refuse_connections(&self, address: SocketAddr, refuse: bool) {
        self.state.lock().unwrap().refused.insert(address, refuse);
    }

    /// Makes every connection attempt fail (or succeed again).
    pub fn refuse_all_connections(&self, refuse: bool) {
        self.refuse_all.store(refuse, Ordering::Release);
    }

    /// Delays every connection attempt.
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().connect_delay = delay;
    }

    /// Stream capacity of connections opened from now on.
    pub fn set_max_streams(&self, max_streams: usize) {
        self.max_streams.store(max_streams, Ordering::Release);
    }

    fn find(&self, connection: &Arc<dyn Connection>) -> Arc<MockConnection> {
        self.state
            .lock()
            .unwrap()
            .connections
            .iter()
            .find(|(handed_out, _)| {
                std::ptr::addr_eq(Arc::as_ptr(handed_out), Arc::as_ptr(connection))
            })
            .map(|(_, mock)| Arc::clone(mock))
            .expect("connection was not opened by this cluster")
    }

    /// All connections opened so far, closed ones included.
    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.state
            .lock()
            .unwrap()
            .connections
            .iter()
            .map(|(_, mock)| Arc::clone(mock))
            .collect()
    }

    /// Connections opened to `address` so far.
    pub fn connections_to(&self, address: SocketAddr) -> Vec<Arc<MockConnection>> {
        self.connections()
            .into_iter()
            .filter(|conn| conn.address == address)
            .collect()
    }

    /// Number of connections opened to `address` so far.
    pub fn opened_connections(&self, address: SocketAddr) -> usize {
        self.connections_to(address).len()
    }

    /// Number of connection attempts to `address`, refused ones included.
    pub fn connect_attempts(&self, address: SocketAddr) -> usize {
        self.state
            .lock()
            .unwrap()
            .attempts
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    /// Number of connections to `address` that are open and healthy.
    pub fn live_connections(&self, address: SocketAddr) -> usize {
        self.connections_to(address)
            .iter()
            .filter(|conn| conn.is_healthy())
            .count()
    }

    /// Sum of `close` calls over all connections.
    pub fn total_close_calls(&self) -> usize {
        self.connections().iter().map(|conn| conn.close_count()).sum()
    }

    /// Number of `close` calls on the given connection.
    pub fn close_count(&self, connection: &Arc<dyn Connection>) -> usize {
        self.find(connection).close_count()
    }

    /// Keeps one stream of the connection busy until the guard is dropped.
    pub fn hold_stream(&self, connection: &Arc<dyn Connection>) -> StreamGuard {
        StreamGuard::new(Arc::clone(&self.find(connection).in_flight))
    }

    /// Breaks the connection as if the peer went away.
    pub fn break_connection(&self, connection: &Arc<dyn Connection>) {
        self.find(connection).break_connection();
    }

    /// Breaks every connection to `address`.
    pub fn break_connections_to(&self, address: SocketAddr) {
        for conn in self.connections_to(address) {
            conn.break_connection();
        }
    }

    /// Breaks the connection registered for events, returning its address.
    pub fn break_event_connection(&self) -> Option<SocketAddr> {
        let conn = self
            .connections()
            .into_iter()
            .find(|conn| conn.is_healthy() && conn.is_event_connection())?;
        conn.break_connection();
        Some(conn.address)
    }

    /// Picks a random healthy connection.
    pub fn random_open_connection(&self, rng: &mut impl Rng) -> Option<Arc<dyn Connection>> {
        let state = self.state.lock().unwrap();
        let open: Vec<_> = state
            .connections
            .iter()
            .filter(|(conn, _)| conn.is_healthy())
            .collect();
        if open.is_empty() {
            return None;
        }
        Some(Arc::clone(&open[rng.random_range(0..open.len())].0))
    }

    /// Pushes a server event through a healthy registered connection whose
    /// listener is still running. Returns whether one took the event.
    pub async fn push_event(&self, event: RawEvent) -> bool {
        let senders: Vec<_> = self
            .connections()
            .into_iter()
            .filter(|conn| conn.is_healthy())
            .filter_map(|conn| conn.event_sender.lock().unwrap().clone())
            .collect();
        for sender in senders {
            if sender.send(event.clone()).await.is_ok() {
                return true;
            }
        }
        false
    }

    /// Every request sent so far, with the address it was sent to.
    pub fn requests(&self) -> Vec<(SocketAddr, Request)> {
        self.requests.lock().unwrap().clone()
    }

    /// Addresses that received a request with the given contents.
    pub fn hosts_that_received(&self, contents: &str) -> Vec<SocketAddr> {
        self.requests()
            .into_iter()
            .filter(|(_, request)| matches!(request, Request::Query { contents: c, .. } if c == contents))
            .map(|(addr, _)| addr)
            .collect()
    }
}

/// [Connector] of a [MockCluster].
#[derive(Debug)]
struct MockConnector {
    cluster: MockCluster,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, address: SocketAddr) -> Result<Arc<dyn Connection>, ConnectionError> {
        let (refused, delay) = {
            let mut state = self.cluster.state.lock().unwrap();
            *state.attempts.entry(address).or_default() += 1;
            (
                state.refused.get(&address).copied().unwrap_or(false),
                state.connect_delay,
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if refused || self.cluster.refuse_all.load(Ordering::Acquire) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("{address} refused the connection"),
            )
            .into());
        }

        let (broken, _) = watch::channel(false);
        let mock = Arc::new(MockConnection {
            address,
            max_streams: self.cluster.max_streams.load(Ordering::Acquire),
            broken,
            in_flight: Arc::new(AtomicUsize::new(0)),
            close_count: AtomicUsize::new(0),
            keyspace: Mutex::new(None),
            event_sender: Mutex::new(None),
            responder: Arc::clone(&self.cluster.responder),
            requests: Arc::clone(&self.cluster.requests),
        });
        let connection: Arc<dyn Connection> = Arc::new(TrackedConnection(Arc::clone(&mock)));
        self.cluster
            .state
            .lock()
            .unwrap()
            .connections
            .push((Arc::clone(&connection), mock));
        trace!(host = %address, "Mock connection opened");
        Ok(connection)
    }
}

/// Load balancing policy returning all hosts in address order.
#[derive(Debug, Default)]
pub struct FixedOrderPolicy {
    hosts: RwLock<Option<Arc<dyn HostSource>>>,
    distances: HashMap<SocketAddr, HostDistance>,
}

impl FixedOrderPolicy {
    /// Every host is [HostDistance::Local] until told otherwise.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the distance reported for one host.
    pub fn with_distance(mut self, address: SocketAddr, distance: HostDistance) -> Self {
        self.distances.insert(address, distance);
        self
    }
}

impl LoadBalancingPolicy for FixedOrderPolicy {
    fn initialize(&self, hosts: Arc<dyn HostSource>) {
        *self.hosts.write().unwrap() = Some(hosts);
    }

    fn new_query_plan(&self, _routing_key: Option<&RoutingKey>) -> QueryPlan {
        let hosts: Vec<Arc<Host>> = match self.hosts.read().unwrap().as_ref() {
            Some(source) => source.all_hosts().iter().cloned().collect(),
            None => Vec::new(),
        };
        Box::new(hosts.into_iter())
    }

    fn distance(&self, host: &Host) -> HostDistance {
        self.distances
            .get(&host.address())
            .copied()
            .unwrap_or(HostDistance::Local)
    }

    fn name(&self) -> String {
        "FixedOrderPolicy".to_string()
    }
}

#[cfg(test)]
pub(crate) fn setup_tracing() {
    let _ = tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(tracing_subscriber::fmt::TestWriter::new())
        .try_init();
}
