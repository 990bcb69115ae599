//! SessionBuilder provides an easy way to create new Sessions

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use super::session::{Session, SessionConfig};
use crate::cluster::host::KnownNode;
use crate::errors::NewSessionError;
use crate::frame::types::Consistency;
use crate::network::{Connector, PoolingOptions};
use crate::policies::load_balancing::LoadBalancingPolicy;
use crate::policies::reconnection::ReconnectionPolicy;
use crate::policies::retry::RetryPolicy;

/// SessionBuilder is used to create new Session instances
/// # Example
///
/// ```
/// # use std::sync::Arc;
/// # use cassandra_native::client::session::Session;
/// # use cassandra_native::client::session_builder::SessionBuilder;
/// # use cassandra_native::network::Connector;
/// # use cassandra_native::Consistency;
/// # async fn example(connector: Arc<dyn Connector>) -> Result<(), Box<dyn std::error::Error>> {
/// let session: Session = SessionBuilder::new()
///     .known_node("127.0.0.1:9042")
///     .connector(connector)
///     .default_consistency(Consistency::Quorum)
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SessionBuilder {
    /// Configuration the session will be built with.
    pub config: SessionConfig,
}

impl SessionBuilder {
    /// Creates new SessionBuilder with default configuration
    /// # Default configuration
    /// * Consistency: LocalQuorum
    /// * Load balancing: round robin
    /// * Retries: [DefaultRetryPolicy](crate::policies::retry::DefaultRetryPolicy)
    /// * Reconnection: exponential, 1s up to 10 minutes
    pub fn new() -> Self {
        SessionBuilder {
            config: SessionConfig::new(),
        }
    }

    /// Add a known node with a hostname
    /// # Examples
    /// ```
    /// # use std::sync::Arc;
    /// # use cassandra_native::client::session::Session;
    /// # use cassandra_native::client::session_builder::SessionBuilder;
    /// # use cassandra_native::network::Connector;
    /// # async fn example(connector: Arc<dyn Connector>) -> Result<(), Box<dyn std::error::Error>> {
    /// let session: Session = SessionBuilder::new()
    ///     .known_node("db1.example.com")
    ///     .connector(connector)
    ///     .build()
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn known_node(mut self, hostname: impl AsRef<str>) -> Self {
        self.config.add_known_node(hostname);
        self
    }

    /// Add a known node with an IP address
    pub fn known_node_addr(mut self, node_addr: SocketAddr) -> Self {
        self.config.add_known_node_addr(node_addr);
        self
    }

    /// Add a list of known nodes with hostnames
    pub fn known_nodes(mut self, hostnames: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        self.config.add_known_nodes(hostnames);
        self
    }

    /// Add a list of known nodes with IP addresses
    pub fn known_nodes_addr(
        mut self,
        node_addrs: impl IntoIterator<Item = impl std::borrow::Borrow<SocketAddr>>,
    ) -> Self {
        self.config.add_known_nodes_addr(node_addrs);
        self
    }

    /// Sets the connector used to open every connection of the session.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.config.connector = Some(connector);
        self
    }

    /// Set keyspace to be used on all connections.\
    /// Each connection will send `"USE <keyspace_name>"` before sending any requests.\
    /// This can be later changed with [`Session::use_keyspace`]
    pub fn use_keyspace(mut self, keyspace_name: impl Into<String>, case_sensitive: bool) -> Self {
        self.config.used_keyspace = Some(keyspace_name.into());
        self.config.keyspace_case_sensitive = case_sensitive;
        self
    }

    /// Consistency used by statements that do not set their own.
    pub fn default_consistency(mut self, consistency: Consistency) -> Self {
        self.config.default_consistency = consistency;
        self
    }

    /// Sets the load balancing policy.
    pub fn load_balancing(mut self, policy: Arc<dyn LoadBalancingPolicy>) -> Self {
        self.config.load_balancing_policy = policy;
        self
    }

    /// Sets the policy deciding what to do after server errors.
    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.config.retry_policy = policy;
        self
    }

    /// Sets the policy producing reconnection schedules of down hosts.
    pub fn reconnection_policy(mut self, policy: Arc<dyn ReconnectionPolicy>) -> Self {
        self.config.reconnection_policy = policy;
        self
    }

    /// Sets pool sizing thresholds.
    pub fn pooling_options(mut self, options: PoolingOptions) -> Self {
        self.config.pooling_options = options;
        self
    }

    /// Changes connection timeout
    /// The default is 5 seconds.
    /// If it's higher than underlying os's default connection timeout it won't effect.
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.config.connect_timeout = duration;
        self
    }

    /// Changes DNS hostname resolution timeout.
    /// The default is 5 seconds.
    /// `None` means no timeout.
    pub fn hostname_resolution_timeout(mut self, duration: Option<Duration>) -> Self {
        self.config.hostname_resolution_timeout = duration;
        self
    }

    /// Builds the Session after setting all the options.
    pub async fn build(&self) -> Result<Session, NewSessionError> {
        Session::connect(self.config.clone()).await
    }
}

/// Creates a [`SessionBuilder`] with default configuration, same as [`SessionBuilder::new`]
impl Default for SessionBuilder {
    fn default() -> Self {
        SessionBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::load_balancing::RoundRobinPolicy;
    use crate::policies::retry::FallthroughRetryPolicy;

    #[test]
    fn default_session_builder() {
        let builder = SessionBuilder::new();

        assert!(builder.config.known_nodes.is_empty());
        assert!(builder.config.connector.is_none());
        assert!(builder.config.used_keyspace.is_none());
        assert_eq!(builder.config.default_consistency, Consistency::LocalQuorum);
        assert_eq!(builder.config.connect_timeout, Duration::from_secs(5));
        assert_eq!(
            builder.config.hostname_resolution_timeout,
            Some(Duration::from_secs(5))
        );
        assert_eq!(builder.config.pooling_options, PoolingOptions::default());
    }

    #[test]
    fn add_known_nodes() {
        let addr: SocketAddr = "172.17.0.4:9042".parse().unwrap();
        let builder = SessionBuilder::new()
            .known_node("test_hostname")
            .known_nodes(["a", "b"])
            .known_node_addr(addr)
            .known_nodes_addr([addr]);

        assert_eq!(
            builder.config.known_nodes,
            vec![
                KnownNode::Hostname("test_hostname".into()),
                KnownNode::Hostname("a".into()),
                KnownNode::Hostname("b".into()),
                KnownNode::Address(addr),
                KnownNode::Address(addr),
            ]
        );
    }

    #[test]
    fn set_options() {
        let builder = SessionBuilder::new()
            .use_keyspace("ks_name", true)
            .default_consistency(Consistency::One)
            .load_balancing(Arc::new(RoundRobinPolicy::new()))
            .retry_policy(Arc::new(FallthroughRetryPolicy::new()))
            .connection_timeout(Duration::from_secs(1))
            .hostname_resolution_timeout(None);

        assert_eq!(builder.config.used_keyspace.as_deref(), Some("ks_name"));
        assert!(builder.config.keyspace_case_sensitive);
        assert_eq!(builder.config.default_consistency, Consistency::One);
        assert_eq!(builder.config.load_balancing_policy.name(), "RoundRobinPolicy");
        assert_eq!(builder.config.connect_timeout, Duration::from_secs(1));
        assert_eq!(builder.config.hostname_resolution_timeout, None);
    }
}
