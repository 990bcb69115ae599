//! `Session` is the main object used in the driver.\
//! It manages all connections to the cluster and allows to execute CQL requests.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use futures::future::RemoteHandle;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::cluster::events::{EventWorker, EVENT_CHANNEL_CAPACITY};
use crate::cluster::host::{resolve_contact_points, Host, KnownNode};
use crate::cluster::registry::{HostRegistry, HostRegistryView};
use crate::errors::{
    EventRegistrationError, ExecutionError, HostUnavailableReason, NewSessionError,
    RequestAttemptError, UseKeyspaceError,
};
use crate::execution::operation::{
    ExecuteOperation, LongRunningOperation, PrepareOperation, QueryOperation,
    SetKeyspaceOperation,
};
use crate::execution::token::{Completed, ConnectionSource, OperationToken};
use crate::execution::RequestHandle;
use crate::frame::request::Request;
use crate::frame::response::Response;
use crate::frame::server_event_type::EventType;
use crate::frame::types::Consistency;
use crate::frame::value::SerializedValues;
use crate::network::connection::{send_request, verify_keyspace_matches, VerifiedKeyspaceName};
use crate::network::connection_pool::{Acquired, ConnectionPools, Route};
use crate::network::{Connection, Connector, PoolingOptions};
use crate::policies::load_balancing::{HostSource, LoadBalancingPolicy, RoundRobinPolicy};
use crate::policies::reconnection::{ExponentialReconnectionPolicy, ReconnectionPolicy};
use crate::policies::retry::{DefaultRetryPolicy, RetryPolicy};
use crate::response::query_result::QueryResult;
use crate::routing::RoutingKey;
use crate::statement::prepared::PreparedStatement;
use crate::statement::unprepared::Statement;

/// Configuration options for [`Session`].
/// Can be created manually, but usually it's easier to use
/// [SessionBuilder](super::session_builder::SessionBuilder)
#[derive(Clone)]
#[non_exhaustive]
pub struct SessionConfig {
    /// List of database servers known on Session startup.
    /// Each node can be represented as a hostname or an IP address.
    pub known_nodes: Vec<KnownNode>,

    /// Opens the connections of the session. Required.
    pub connector: Option<Arc<dyn Connector>>,

    /// Keyspace to be used on all connections.
    /// Each connection will send `"USE <keyspace_name>"` before sending any requests.
    /// This can be later changed with [`Session::use_keyspace`].
    pub used_keyspace: Option<String>,

    /// Whether the keyspace name is case-sensitive.
    pub keyspace_case_sensitive: bool,

    /// Consistency of statements that do not set their own.
    pub default_consistency: Consistency,

    /// Decides which hosts serve each request, and how many connections each gets.
    pub load_balancing_policy: Arc<dyn LoadBalancingPolicy>,

    /// Decides what to do after a server error.
    pub retry_policy: Arc<dyn RetryPolicy>,

    /// Produces the reconnection schedule of each host.
    pub reconnection_policy: Arc<dyn ReconnectionPolicy>,

    /// Pool sizing thresholds.
    pub pooling_options: PoolingOptions,

    /// Timeout for opening a single connection, including its `USE` request.
    pub connect_timeout: Duration,

    /// Timeout of resolving each known node hostname. `None` means no timeout.
    pub hostname_resolution_timeout: Option<Duration>,
}

impl SessionConfig {
    /// Creates a [`SessionConfig`] with default configuration
    /// # Default configuration
    /// * Consistency: LocalQuorum
    /// * Connect timeout: 5 seconds
    pub fn new() -> Self {
        SessionConfig {
            known_nodes: Vec::new(),
            connector: None,
            used_keyspace: None,
            keyspace_case_sensitive: false,
            default_consistency: Consistency::default(),
            load_balancing_policy: Arc::new(RoundRobinPolicy::new()),
            retry_policy: Arc::new(DefaultRetryPolicy::new()),
            reconnection_policy: Arc::new(ExponentialReconnectionPolicy::default()),
            pooling_options: PoolingOptions::default(),
            connect_timeout: Duration::from_secs(5),
            hostname_resolution_timeout: Some(Duration::from_secs(5)),
        }
    }

    /// Adds a known database server with a hostname.
    /// If the port is not explicitly specified, 9042 is used as default
    pub fn add_known_node(&mut self, hostname: impl AsRef<str>) {
        self.known_nodes
            .push(KnownNode::Hostname(hostname.as_ref().to_string()));
    }

    /// Adds a known database server with an IP address
    pub fn add_known_node_addr(&mut self, node_addr: SocketAddr) {
        self.known_nodes.push(KnownNode::Address(node_addr));
    }

    /// Adds a list of known database server with hostnames.
    pub fn add_known_nodes(&mut self, hostnames: impl IntoIterator<Item = impl AsRef<str>>) {
        for hostname in hostnames {
            self.add_known_node(hostname);
        }
    }

    /// Adds a list of known database servers with IP addresses
    pub fn add_known_nodes_addr(
        &mut self,
        node_addrs: impl IntoIterator<Item = impl std::borrow::Borrow<SocketAddr>>,
    ) {
        for address in node_addrs {
            self.add_known_node_addr(*address.borrow());
        }
    }
}

/// Creates default [`SessionConfig`], same as [`SessionConfig::new`]
impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The connection registered for server events, and the worker applying them.
struct EventListener {
    connection: Arc<dyn Connection>,
    _worker: RemoteHandle<()>,
}

struct SessionInner {
    pools: Arc<ConnectionPools>,
    hosts: HostRegistryView,
    retry_policy: Arc<dyn RetryPolicy>,
    default_consistency: Consistency,
    keyspace: ArcSwapOption<String>,
    event_listener: ArcSwapOption<EventListener>,
    // Set while the last replacement of the event connection failed.
    listener_missing: AtomicBool,
    // Serializes event connection replacement.
    listener_lock: tokio::sync::Mutex<()>,
}

/// `Session` manages connections to the cluster and allows to execute CQL requests.
///
/// Every request goes through the same dispatch loop: a connection is taken from the
/// pool of the first usable host of a fresh query plan, and failures are either
/// retried, failed over to the next host, or returned, as the
/// [RetryPolicy] decides. Dropping the session closes all its connections.
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("hosts", &self.inner.hosts.all_hosts())
            .field("keyspace", &self.inner.keyspace.load_full())
            .field("default_consistency", &self.inner.default_consistency)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Estabilishes a CQL session with the database
    ///
    /// Usually it's easier to use [SessionBuilder](crate::client::session_builder::SessionBuilder)
    /// instead of calling `Session::connect` directly, because it's more convenient.
    ///
    /// Resolves the known nodes, then registers one pooled connection for server
    /// events. Failing to register fails the whole call.
    pub async fn connect(config: SessionConfig) -> Result<Session, NewSessionError> {
        if config.known_nodes.is_empty() {
            return Err(NewSessionError::EmptyKnownNodesList);
        }
        let connector = config
            .connector
            .ok_or(NewSessionError::MissingConnector)?;
        let keyspace = config
            .used_keyspace
            .map(|name| VerifiedKeyspaceName::new(name, config.keyspace_case_sensitive))
            .transpose()?;

        let (addresses, hostnames) =
            resolve_contact_points(&config.known_nodes, config.hostname_resolution_timeout).await;
        if addresses.is_empty() {
            return Err(NewSessionError::FailedToResolveAnyHostname(hostnames));
        }

        let mut registry = HostRegistry::new(config.reconnection_policy);
        for address in addresses {
            registry.add_host(address);
        }
        let hosts = registry.view();
        config
            .load_balancing_policy
            .initialize(Arc::new(hosts.clone()));

        let keyspace_mirror = keyspace
            .as_ref()
            .map(|ks| Arc::new(ks.as_str().to_string()));
        let pools = Arc::new(ConnectionPools::new(
            registry,
            keyspace,
            connector,
            config.pooling_options,
            config.load_balancing_policy,
            config.connect_timeout,
        ));

        let inner = Arc::new(SessionInner {
            pools,
            hosts,
            retry_policy: config.retry_policy,
            default_consistency: config.default_consistency,
            keyspace: ArcSwapOption::new(keyspace_mirror),
            event_listener: ArcSwapOption::empty(),
            listener_missing: AtomicBool::new(false),
            listener_lock: tokio::sync::Mutex::new(()),
        });
        inner.register_event_listener().await?;

        debug!(hosts = inner.hosts.all_hosts().len(), "Session connected");
        Ok(Session { inner })
    }

    /// Sends a request to the database and receives a response.\
    /// Performs an unprepared statement without paging.
    ///
    /// If the result acknowledges a `USE` statement, the whole session switches
    /// to the new keyspace before this call returns.
    pub async fn query(&self, statement: impl Into<Statement>) -> Result<QueryResult, ExecutionError> {
        self.inner.query(statement.into()).await
    }

    /// Starts [Session::query] on a separate task.
    pub fn begin_query(&self, statement: impl Into<Statement>) -> RequestHandle<QueryResult> {
        let inner = Arc::clone(&self.inner);
        let statement = statement.into();
        RequestHandle::spawn(async move { inner.query(statement).await })
    }

    /// Prepares a statement on the server side and returns a prepared statement,
    /// which can later be used to perform more efficient requests.
    pub async fn prepare(
        &self,
        statement: impl Into<Statement>,
    ) -> Result<PreparedStatement, ExecutionError> {
        self.inner.prepare(statement.into()).await
    }

    /// Starts [Session::prepare] on a separate task.
    pub fn begin_prepare(&self, statement: impl Into<Statement>) -> RequestHandle<PreparedStatement> {
        let inner = Arc::clone(&self.inner);
        let statement = statement.into();
        RequestHandle::spawn(async move { inner.prepare(statement).await })
    }

    /// Executes a prepared statement with the given bound values.
    pub async fn execute(
        &self,
        prepared: &PreparedStatement,
        values: SerializedValues,
    ) -> Result<QueryResult, ExecutionError> {
        self.inner.execute(prepared, values).await
    }

    /// Starts [Session::execute] on a separate task.
    pub fn begin_execute(
        &self,
        prepared: &PreparedStatement,
        values: SerializedValues,
    ) -> RequestHandle<QueryResult> {
        let inner = Arc::clone(&self.inner);
        let prepared = prepared.clone();
        RequestHandle::spawn(async move { inner.execute(&prepared, values).await })
    }

    /// Sends `USE <keyspace_name>` request on all connections\
    /// This allows to write `SELECT * FROM table` instead of `SELECT * FROM keyspace.table`\
    ///
    /// Note that even failed `use_keyspace` can change currently used keyspace - the request is sent on all connections and
    /// can overwrite previously used keyspace.
    ///
    /// Call only one `use_keyspace` at a time.\
    /// Trying to do two `use_keyspace` requests simultaneously with different names
    /// can end with some connections using one keyspace and the rest using the other.
    ///
    /// # Arguments
    ///
    /// * `keyspace_name` - keyspace name to use,
    ///   keyspace names can have up to 48 alphanumeric characters and contain underscores
    /// * `case_sensitive` - if set to true the generated request will put keyspace name in quotes
    pub async fn use_keyspace(
        &self,
        keyspace_name: impl Into<String>,
        case_sensitive: bool,
    ) -> Result<(), ExecutionError> {
        let keyspace = VerifiedKeyspaceName::new(keyspace_name.into(), case_sensitive)
            .map_err(UseKeyspaceError::from)?;
        let operation = SetKeyspaceOperation {
            keyspace: keyspace.clone(),
        };
        let completed = self.inner.run(&operation, None, None).await?;
        self.inner.switch_keyspace(keyspace, &completed.output).await
    }

    /// Keyspace the session currently uses, if any.
    pub fn get_keyspace(&self) -> Option<Arc<String>> {
        self.inner.keyspace.load_full()
    }

    /// Snapshot of all hosts known to the session, up or down.
    pub fn hosts(&self) -> Vec<Arc<Host>> {
        self.inner.hosts.all_hosts().as_ref().clone()
    }

    /// Closes every connection of the session and stops listening for events.
    ///
    /// Requests issued afterwards fail with [ExecutionError::SessionClosed];
    /// requests in flight fail over and end the same way.
    /// Dropping the session has the same effect.
    pub async fn close(&self) {
        let _guard = self.inner.listener_lock.lock().await;
        self.inner.listener_missing.store(false, Ordering::Release);
        self.inner.event_listener.store(None);
        self.inner.pools.close().await;
    }
}

impl SessionInner {
    async fn run<O: LongRunningOperation>(
        &self,
        operation: &O,
        consistency: Option<Consistency>,
        routing_key: Option<RoutingKey>,
    ) -> Result<Completed<O::Output>, ExecutionError> {
        let token = OperationToken::new(
            consistency.unwrap_or(self.default_consistency),
            routing_key,
        );
        token
            .run(operation, self, self.retry_policy.as_ref())
            .await
    }

    async fn query(&self, statement: Statement) -> Result<QueryResult, ExecutionError> {
        let operation = QueryOperation {
            contents: statement.contents,
        };
        let completed = self
            .run(&operation, statement.consistency, statement.routing_key)
            .await?;
        self.finish_query_result(completed).await
    }

    async fn prepare(&self, statement: Statement) -> Result<PreparedStatement, ExecutionError> {
        let operation = PrepareOperation {
            contents: statement.contents,
        };
        let completed = self
            .run(&operation, statement.consistency, statement.routing_key.clone())
            .await?;
        let prepared = completed.output;
        let mut prepared_statement = PreparedStatement::new(
            prepared.id,
            operation.contents,
            prepared.prepared_metadata,
            prepared.result_metadata,
        );
        prepared_statement.consistency = statement.consistency;
        prepared_statement.routing_key = statement.routing_key;
        Ok(prepared_statement)
    }

    async fn execute(
        &self,
        prepared: &PreparedStatement,
        values: SerializedValues,
    ) -> Result<QueryResult, ExecutionError> {
        let operation = ExecuteOperation {
            id: prepared.get_id().clone(),
            values,
        };
        let completed = self
            .run(&operation, prepared.consistency, prepared.routing_key.clone())
            .await?;
        self.finish_query_result(completed).await
    }

    async fn finish_query_result(
        &self,
        completed: Completed<crate::frame::response::result::Result>,
    ) -> Result<QueryResult, ExecutionError> {
        let result = QueryResult::new(completed.output, completed.coordinator);
        if let Some(keyspace_name) = result.set_keyspace() {
            debug!(
                keyspace = keyspace_name,
                "Detected USE KEYSPACE query, switching the session"
            );
            let keyspace = VerifiedKeyspaceName::new(keyspace_name.to_string(), true)
                .map_err(UseKeyspaceError::from)?;
            self.switch_keyspace(keyspace, keyspace_name).await?;
        }
        Ok(result)
    }

    /// Checks the server's confirmation, then moves every pooled connection
    /// and the session's keyspace to `keyspace`.
    async fn switch_keyspace(
        &self,
        keyspace: VerifiedKeyspaceName,
        confirmed_name: &str,
    ) -> Result<(), ExecutionError> {
        verify_keyspace_matches(&keyspace, confirmed_name)?;
        let name = Arc::new(keyspace.as_str().to_string());
        self.pools.change_keyspace(keyspace).await?;
        self.keyspace.store(Some(name));
        Ok(())
    }

    /// Designates a pooled connection for server events.
    ///
    /// Hosts are tried in query plan order; a connection fault moves on to the
    /// next one. Any answer but READY is fatal.
    async fn register_event_listener(&self) -> Result<(), ExecutionError> {
        let mut route = Route::new(None);
        loop {
            let connection = match self.pools.acquire(&mut route, None).await? {
                Acquired::Connection(connection) => connection,
                Acquired::EventConnectionLost => continue,
            };

            let (sender, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            connection.set_event_sender(sender);
            let request = Request::Register {
                event_types: EventType::ALL.to_vec(),
            };
            let response = match send_request(connection.as_ref(), request).await {
                Ok(response) => response,
                Err(fault) => {
                    debug!(
                        connection = %connection.connect_address(),
                        error = %fault,
                        "Event registration failed, trying next host"
                    );
                    route.fail_over(HostUnavailableReason::RequestFailed(
                        RequestAttemptError::Fault(fault),
                    ));
                    continue;
                }
            };
            match response {
                Response::Ready => {}
                Response::Error(err) => {
                    return Err(EventRegistrationError::DbError(err.error, err.reason).into())
                }
                other => return Err(EventRegistrationError::UnexpectedResponse(other.kind()).into()),
            }

            let worker = EventWorker::new(Arc::downgrade(&self.pools), receiver);
            let (fut, worker_handle) = worker.work().remote_handle();
            tokio::spawn(fut);

            debug!(connection = %connection.connect_address(), "Registered for server events");
            self.event_listener.store(Some(Arc::new(EventListener {
                connection,
                _worker: worker_handle,
            })));
            return Ok(());
        }
    }

    /// Replaces a dead event connection.
    ///
    /// A failed replacement is returned to the caller and leaves the listener
    /// missing, to be retried by later requests.
    async fn replace_event_listener(
        &self,
        lost: Option<&Arc<dyn Connection>>,
    ) -> Result<(), ExecutionError> {
        let _guard = self.listener_lock.lock().await;
        let current = self.event_listener.load_full();
        let still_current = match (&current, lost) {
            (Some(listener), Some(lost)) => Arc::ptr_eq(&listener.connection, lost),
            (None, _) => true,
            (Some(_), None) => false,
        };
        if !still_current {
            trace!("Event connection already replaced");
            return Ok(());
        }
        warn!("Event connection lost, registering a new one");
        self.event_listener.store(None);
        self.register_or_mark_missing().await
    }

    /// Registers again after an earlier replacement failed. Failures are only logged.
    async fn retry_missing_event_listener(&self) {
        let _guard = self.listener_lock.lock().await;
        if !self.listener_missing.load(Ordering::Acquire) {
            return;
        }
        if let Err(err) = self.register_or_mark_missing().await {
            warn!(error = %err, "Event connection still missing");
        }
    }

    async fn register_or_mark_missing(&self) -> Result<(), ExecutionError> {
        let result = self.register_event_listener().await;
        self.listener_missing.store(result.is_err(), Ordering::Release);
        result
    }

    /// Makes sure a live connection listens for events before routing a request.
    ///
    /// Covers event connections the pools no longer scan: those of removed
    /// hosts and of hosts marked down.
    async fn check_event_listener(&self) -> Result<(), ExecutionError> {
        if self.listener_missing.load(Ordering::Acquire) {
            self.retry_missing_event_listener().await;
            return Ok(());
        }
        let Some(listener) = self.event_listener.load_full() else {
            return Ok(());
        };
        if listener.connection.is_healthy() {
            return Ok(());
        }
        self.replace_event_listener(Some(&listener.connection)).await
    }
}

#[async_trait]
impl ConnectionSource for SessionInner {
    async fn connection(&self, route: &mut Route) -> Result<Arc<dyn Connection>, ExecutionError> {
        self.check_event_listener().await?;
        loop {
            let event_connection = self
                .event_listener
                .load_full()
                .map(|listener| Arc::clone(&listener.connection));
            match self.pools.acquire(route, event_connection.as_ref()).await? {
                Acquired::Connection(connection) => return Ok(connection),
                Acquired::EventConnectionLost => {
                    self.replace_event_listener(event_connection.as_ref())
                        .await?;
                }
            }
        }
    }
}
