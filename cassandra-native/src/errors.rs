//! Errors returned by the driver.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use itertools::Itertools;
use thiserror::Error;

pub use cassandra_native_cql::frame::frame_errors::CqlEventParseError;
pub use cassandra_native_cql::frame::response::error::{DbError, WriteType};
pub use cassandra_native_cql::frame::response::CqlResponseKind;

/// A failure of a single connection.
///
/// Connections report it when a request cannot be written or its response
/// will never arrive. The session recovers from it by failing over to the next host.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ConnectionFault {
    /// Every stream slot of the connection is taken.
    #[error("Unable to allocate stream id")]
    UnableToAllocStreamId,

    /// The underlying transport failed.
    #[error("Connection I/O failed: {0}")]
    Io(Arc<std::io::Error>),

    /// The connection was closed, either by the driver or by the peer.
    #[error("Connection is closed")]
    Closed,
}

impl From<std::io::Error> for ConnectionFault {
    fn from(io_error: std::io::Error) -> ConnectionFault {
        ConnectionFault::Io(Arc::new(io_error))
    }
}

/// Error that occurred while opening a new pooled connection.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ConnectionError {
    /// The connector failed to reach the host.
    #[error("Failed to connect: {0}")]
    ConnectError(Arc<std::io::Error>),

    /// The connector did not finish within the configured timeout.
    #[error("Connect timeout elapsed")]
    ConnectTimeout,

    /// The new connection could not be switched to the session keyspace.
    #[error("Failed to set the session keyspace on a new connection: {0}")]
    UseKeyspace(#[from] UseKeyspaceError),

    /// The connection broke while being set up.
    #[error(transparent)]
    Fault(#[from] ConnectionFault),
}

impl From<std::io::Error> for ConnectionError {
    fn from(io_error: std::io::Error) -> ConnectionError {
        ConnectionError::ConnectError(Arc::new(io_error))
    }
}

impl ConnectionError {
    /// Whether the failure comes from the network rather than from the server's answer.
    ///
    /// Transport failures make the pool move on to the next host; any other
    /// failure aborts the operation.
    pub fn is_transport_error(&self) -> bool {
        match self {
            ConnectionError::ConnectError(_)
            | ConnectionError::ConnectTimeout
            | ConnectionError::Fault(_) => true,
            ConnectionError::UseKeyspace(UseKeyspaceError::RequestError(
                RequestAttemptError::Fault(_),
            )) => true,
            ConnectionError::UseKeyspace(_) => false,
        }
    }
}

/// Error of a single attempt to run a request on one connection.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum RequestAttemptError {
    /// Database sent a response containing some error with a message
    #[error("Database returned an error: {0}, Error message: {1}")]
    DbError(DbError, String),

    /// The response does not have the shape the request calls for.
    #[error("Received unexpected response from the server: {0}")]
    UnexpectedResponse(CqlResponseKind),

    #[error(transparent)]
    Fault(#[from] ConnectionFault),
}

/// Why a host from the query plan did not serve the request.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum HostUnavailableReason {
    #[error("host is down")]
    Down,

    #[error("host is ignored by the load balancing policy")]
    Ignored,

    /// Every pooled connection is busy and the pool may not grow.
    #[error("host connection pool is exhausted")]
    Exhausted,

    #[error("failed to open a connection: {0}")]
    ConnectFailed(ConnectionError),

    /// A request was sent to the host and failed there; the session moved on.
    #[error("request failed: {0}")]
    RequestFailed(RequestAttemptError),
}

/// No host of the query plan could serve the request.
#[derive(Error, Debug, Clone)]
#[error("No host available to serve the request, tried: {}", describe_tried(.tried))]
pub struct NoHostAvailableError {
    /// Every host the request was routed to or skipped, with the latest reason.
    pub tried: BTreeMap<SocketAddr, HostUnavailableReason>,
}

fn describe_tried(tried: &BTreeMap<SocketAddr, HostUnavailableReason>) -> String {
    if tried.is_empty() {
        return "[] (the query plan was empty)".to_string();
    }
    format!(
        "[{}]",
        tried
            .iter()
            .map(|(addr, reason)| format!("{addr}: {reason}"))
            .join(", ")
    )
}

/// Error that occurred during request execution
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ExecutionError {
    #[error(transparent)]
    NoHostAvailable(#[from] NoHostAvailableError),

    /// Database sent a response containing some error with a message,
    /// and the retry policy chose not to retry.
    #[error("Database returned an error: {0}, Error message: {1}")]
    DbError(DbError, String),

    /// The response does not have the shape the request calls for.
    #[error("Protocol violation, received unexpected response: {0}")]
    UnexpectedResponse(CqlResponseKind),

    /// A new connection failed for a reason other than the network.
    #[error("Connection setup failed: {0}")]
    ConnectionSetup(ConnectionError),

    /// The event connection could not be (re)registered.
    #[error(transparent)]
    EventRegistration(#[from] EventRegistrationError),

    #[error(transparent)]
    UseKeyspace(#[from] UseKeyspaceError),

    /// The session was closed.
    #[error("Session is closed")]
    SessionClosed,

    /// The task running the request terminated without producing a result.
    #[error("Request task terminated before completing")]
    WorkerTerminated,
}

/// Failure to register a connection for server events.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum EventRegistrationError {
    #[error("Database refused event registration: {0}, Error message: {1}")]
    DbError(DbError, String),

    #[error("Expected READY in response to REGISTER, got {0}")]
    UnexpectedResponse(CqlResponseKind),
}

/// Invalid keyspace name given to `Session::use_keyspace()`
#[derive(Debug, Error, Clone)]
pub enum BadKeyspaceName {
    /// Keyspace name is empty
    #[error("Keyspace name is empty")]
    Empty,

    /// Keyspace name too long, must be up to 48 characters
    #[error("Keyspace name too long, must be up to 48 characters, found {1} characters. Bad keyspace name: '{0}'")]
    TooLong(String, usize),

    /// Illegal character - only alphanumeric and underscores allowed.
    #[error("Illegal character found: '{1}', only alphanumeric and underscores allowed. Bad keyspace name: '{0}'")]
    IllegalCharacter(String, char),
}

/// Error occurring while switching connections to a keyspace.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum UseKeyspaceError {
    /// Caller passed invalid keyspace name
    #[error(transparent)]
    BadKeyspaceName(#[from] BadKeyspaceName),

    /// The server confirmed a keyspace other than the requested one.
    #[error(
        "Keyspace name mismatch; expected: {expected_keyspace_name_lowercase}, received: {result_keyspace_name_lowercase}"
    )]
    KeyspaceNameMismatch {
        expected_keyspace_name_lowercase: String,
        result_keyspace_name_lowercase: String,
    },

    /// The `USE` request failed.
    #[error(transparent)]
    RequestError(#[from] RequestAttemptError),
}

/// Error that occurred during session creation
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum NewSessionError {
    /// List of known nodes passed to Session constructor is empty
    /// There needs to be at least one node to connect to
    #[error("Empty known nodes list")]
    EmptyKnownNodesList,

    /// Failed to resolve hostname passed in Session creation
    #[error("Couldn't resolve any hostname: {0:?}")]
    FailedToResolveAnyHostname(Vec<String>),

    /// No connector was configured.
    #[error("No connector configured, the session has no way to open connections")]
    MissingConnector,

    /// The initial keyspace name is invalid.
    #[error(transparent)]
    BadKeyspaceName(#[from] BadKeyspaceName),

    /// Opening the first connection or registering for events failed.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_host_available_lists_every_host() {
        let mut tried = BTreeMap::new();
        tried.insert(
            "127.0.0.1:9042".parse().unwrap(),
            HostUnavailableReason::Down,
        );
        tried.insert(
            "127.0.0.2:9042".parse().unwrap(),
            HostUnavailableReason::ConnectFailed(ConnectionError::ConnectTimeout),
        );
        let msg = NoHostAvailableError { tried }.to_string();
        assert!(msg.contains("127.0.0.1:9042: host is down"), "{msg}");
        assert!(msg.contains("127.0.0.2:9042: failed to open a connection"), "{msg}");

        let empty = NoHostAvailableError {
            tried: BTreeMap::new(),
        };
        assert!(empty.to_string().contains("empty"));
    }

    #[test]
    fn transport_errors_are_classified() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(ConnectionError::from(io).is_transport_error());
        assert!(ConnectionError::Fault(ConnectionFault::Closed).is_transport_error());
        assert!(ConnectionError::UseKeyspace(UseKeyspaceError::RequestError(
            RequestAttemptError::Fault(ConnectionFault::UnableToAllocStreamId)
        ))
        .is_transport_error());
        assert!(!ConnectionError::UseKeyspace(UseKeyspaceError::RequestError(
            RequestAttemptError::DbError(DbError::Invalid, "no such keyspace".to_string())
        ))
        .is_transport_error());
    }
}
