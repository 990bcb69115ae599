//! Routing information attached to statements.

use bytes::Bytes;

/// Serialized partition key of a statement.
///
/// Passed to the load balancing policy when computing a query plan,
/// so that token-aware policies can route to replicas first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey(Bytes);

impl RoutingKey {
    /// Wraps an already serialized partition key.
    pub fn new(key: impl Into<Bytes>) -> Self {
        Self(key.into())
    }

    /// Raw bytes of the key.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}
