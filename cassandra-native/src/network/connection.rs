use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::trace;

use crate::errors::{
    BadKeyspaceName, ConnectionError, ConnectionFault, RequestAttemptError, UseKeyspaceError,
};
use crate::frame::request::Request;
use crate::frame::response::event::RawEvent;
use crate::frame::response::{result, Response};
use crate::frame::types::Consistency;

/// Future resolving to the response of one request.
///
/// Dropping it abandons the response; the stream is still released by the
/// connection once the response arrives.
pub type ResponseFuture = BoxFuture<'static, Result<Response, ConnectionFault>>;

/// An open, multiplexed request/response channel to one node.
///
/// Framing, stream id allocation and the transport are the implementor's concern.
/// Once closed or broken, a connection must fail every pending and future request
/// with a [ConnectionFault].
pub trait Connection: Send + Sync + Debug {
    /// Address of the node this connection talks to.
    fn connect_address(&self) -> SocketAddr;

    /// Writes a request, returning a future for its response.
    ///
    /// Fails immediately if no stream id is available or the connection is unusable.
    fn begin_request(&self, request: Request) -> Result<ResponseFuture, ConnectionFault>;

    /// Whether the connection can still carry requests.
    fn is_healthy(&self) -> bool;

    /// Number of requests written and not yet answered.
    fn in_flight(&self) -> usize;

    /// Number of requests the connection can carry at once.
    fn max_streams(&self) -> usize;

    /// Sets the channel receiving server push notifications.
    ///
    /// Only the connection registered for events receives any.
    fn set_event_sender(&self, sender: mpsc::Sender<RawEvent>);

    /// Closes the connection, failing everything still in flight.
    fn close(&self);
}

/// Opens connections to nodes.
#[async_trait]
pub trait Connector: Send + Sync + Debug {
    /// Opens a new connection, ready to accept requests.
    async fn connect(&self, address: SocketAddr) -> Result<Arc<dyn Connection>, ConnectionError>;
}

pub(crate) fn same_connection(a: &Arc<dyn Connection>, b: &Arc<dyn Connection>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Sends a request and waits for its response.
pub(crate) async fn send_request(
    connection: &dyn Connection,
    request: Request,
) -> Result<Response, ConnectionFault> {
    connection.begin_request(request)?.await
}

/// Switches a connection to the given keyspace.
pub(crate) async fn use_keyspace(
    connection: &dyn Connection,
    keyspace_name: &VerifiedKeyspaceName,
) -> Result<(), UseKeyspaceError> {
    let request = Request::Query {
        contents: keyspace_name.use_statement(),
        consistency: Consistency::default(),
    };
    let response = send_request(connection, request)
        .await
        .map_err(RequestAttemptError::from)?;
    verify_use_keyspace_result(keyspace_name, response)
}

const STREAM_EXHAUSTED_BACKOFF: Duration = Duration::from_millis(1);

/// Like [use_keyspace], but waits for a free stream instead of failing.
pub(crate) async fn use_keyspace_waiting_for_stream(
    connection: &dyn Connection,
    keyspace_name: &VerifiedKeyspaceName,
) -> Result<(), UseKeyspaceError> {
    loop {
        match use_keyspace(connection, keyspace_name).await {
            Err(UseKeyspaceError::RequestError(RequestAttemptError::Fault(
                ConnectionFault::UnableToAllocStreamId,
            ))) => {
                trace!(
                    connection = %connection.connect_address(),
                    "No stream available for USE, waiting"
                );
                tokio::time::sleep(STREAM_EXHAUSTED_BACKOFF).await;
            }
            other => return other,
        }
    }
}

fn verify_use_keyspace_result(
    keyspace_name: &VerifiedKeyspaceName,
    response: Response,
) -> Result<(), UseKeyspaceError> {
    match response {
        Response::Result(result::Result::SetKeyspace(set_keyspace)) => {
            verify_keyspace_matches(keyspace_name, &set_keyspace.keyspace_name)
        }
        Response::Error(err) => Err(UseKeyspaceError::RequestError(
            RequestAttemptError::DbError(err.error, err.reason),
        )),
        other => Err(UseKeyspaceError::RequestError(
            RequestAttemptError::UnexpectedResponse(other.kind()),
        )),
    }
}

/// Checks the keyspace confirmed by the server against the requested one.
pub(crate) fn verify_keyspace_matches(
    keyspace_name: &VerifiedKeyspaceName,
    result_keyspace_name: &str,
) -> Result<(), UseKeyspaceError> {
    if !result_keyspace_name.eq_ignore_ascii_case(keyspace_name.as_str()) {
        return Err(UseKeyspaceError::KeyspaceNameMismatch {
            expected_keyspace_name_lowercase: keyspace_name.as_str().to_lowercase(),
            result_keyspace_name_lowercase: result_keyspace_name.to_lowercase(),
        });
    }
    Ok(())
}

/// This type can only hold a valid keyspace name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct VerifiedKeyspaceName {
    name: Arc<String>,
    pub(crate) is_case_sensitive: bool,
}

impl VerifiedKeyspaceName {
    pub(crate) fn new(keyspace_name: String, case_sensitive: bool) -> Result<Self, BadKeyspaceName> {
        Self::verify_keyspace_name_is_valid(&keyspace_name)?;

        Ok(VerifiedKeyspaceName {
            name: Arc::new(keyspace_name),
            is_case_sensitive: case_sensitive,
        })
    }

    pub(crate) fn as_str(&self) -> &str {
        self.name.as_str()
    }

    /// `USE` statement switching to this keyspace; the name is quoted when case sensitive.
    pub(crate) fn use_statement(&self) -> String {
        if self.is_case_sensitive {
            format!("USE \"{}\"", self.as_str())
        } else {
            format!("USE {}", self.as_str())
        }
    }

    // Up to 48 ASCII alphanumeric characters or underscores. Servers accept
    // an underscore as the first character too.
    fn verify_keyspace_name_is_valid(keyspace_name: &str) -> Result<(), BadKeyspaceName> {
        if keyspace_name.is_empty() {
            return Err(BadKeyspaceName::Empty);
        }

        let keyspace_name_len: usize = keyspace_name.chars().count();
        if keyspace_name_len > 48 {
            return Err(BadKeyspaceName::TooLong(
                keyspace_name.to_string(),
                keyspace_name_len,
            ));
        }

        if let Some(character) = keyspace_name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
        {
            return Err(BadKeyspaceName::IllegalCharacter(
                keyspace_name.to_string(),
                character,
            ));
        }

        Ok(())
    }
}
