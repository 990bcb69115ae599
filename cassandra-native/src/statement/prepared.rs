//! Prepared statements.

use bytes::Bytes;

use crate::frame::response::result::{PreparedMetadata, ResultMetadata};
use crate::frame::types::Consistency;
use crate::routing::RoutingKey;

/// Represents a statement prepared on the server.
///
/// Obtained from [`Session::prepare`](crate::client::session::Session::prepare).
/// Cloning is cheap: the id is reference counted.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    id: Bytes,
    statement: String,
    prepared_metadata: PreparedMetadata,
    result_metadata: ResultMetadata,
    pub(crate) consistency: Option<Consistency>,
    pub(crate) routing_key: Option<RoutingKey>,
}

impl PreparedStatement {
    pub(crate) fn new(
        id: Bytes,
        statement: String,
        prepared_metadata: PreparedMetadata,
        result_metadata: ResultMetadata,
    ) -> Self {
        Self {
            id,
            statement,
            prepared_metadata,
            result_metadata,
            consistency: None,
            routing_key: None,
        }
    }

    /// Server-assigned statement id.
    pub fn get_id(&self) -> &Bytes {
        &self.id
    }

    /// Text of the prepared statement.
    pub fn get_statement(&self) -> &str {
        &self.statement
    }

    /// Metadata of the bind markers.
    pub fn get_prepared_metadata(&self) -> &PreparedMetadata {
        &self.prepared_metadata
    }

    /// Metadata of the result columns.
    pub fn get_result_metadata(&self) -> &ResultMetadata {
        &self.result_metadata
    }

    /// Sets the consistency to be used when executing this statement.
    pub fn set_consistency(&mut self, c: Consistency) {
        self.consistency = Some(c);
    }

    /// Gets the consistency to be used when executing this statement if it is filled.
    pub fn get_consistency(&self) -> Option<Consistency> {
        self.consistency
    }

    /// Sets the routing key handed to the load balancing policy.
    pub fn set_routing_key(&mut self, key: Option<RoutingKey>) {
        self.routing_key = key;
    }

    /// Gets the routing key, if set.
    pub fn get_routing_key(&self) -> Option<&RoutingKey> {
        self.routing_key.as_ref()
    }
}
