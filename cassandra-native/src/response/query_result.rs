use std::net::SocketAddr;

use crate::frame::response::event::SchemaChangeEvent;
use crate::frame::response::result::{self, Row, Rows};

/// Result of a query or of an executed prepared statement.
#[derive(Debug, Clone)]
pub struct QueryResult {
    rows: Option<Rows>,
    set_keyspace: Option<String>,
    schema_change: Option<SchemaChangeEvent>,
    coordinator: SocketAddr,
}

impl QueryResult {
    pub(crate) fn new(result: result::Result, coordinator: SocketAddr) -> Self {
        let mut query_result = QueryResult {
            rows: None,
            set_keyspace: None,
            schema_change: None,
            coordinator,
        };
        match result {
            result::Result::Rows(rows) => query_result.rows = Some(rows),
            result::Result::SetKeyspace(sk) => query_result.set_keyspace = Some(sk.keyspace_name),
            result::Result::SchemaChange(sc) => query_result.schema_change = Some(sc.event),
            result::Result::Void | result::Result::Prepared(_) => {}
        }
        query_result
    }

    /// Address of the host that served the request.
    pub fn coordinator(&self) -> SocketAddr {
        self.coordinator
    }

    /// Whether the statement returned rows at all (e.g. `SELECT`).
    pub fn is_rows(&self) -> bool {
        self.rows.is_some()
    }

    /// Returned rows; empty for statements that return none.
    pub fn rows(&self) -> &[Row] {
        self.rows.as_ref().map(|r| r.rows.as_slice()).unwrap_or(&[])
    }

    /// Consumes the result, returning the rows result if present.
    pub fn into_rows(self) -> Option<Rows> {
        self.rows
    }

    /// Keyspace switched to, if the statement was a `USE`.
    pub fn set_keyspace(&self) -> Option<&str> {
        self.set_keyspace.as_deref()
    }

    /// Schema change caused by the statement, if any.
    pub fn schema_change(&self) -> Option<&SchemaChangeEvent> {
        self.schema_change.as_ref()
    }
}
