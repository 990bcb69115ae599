use bytes::Bytes;

use crate::errors::RequestAttemptError;
use crate::frame::request::Request;
use crate::frame::response::result::{self, Prepared};
use crate::frame::response::Response;
use crate::frame::types::Consistency;
use crate::frame::value::SerializedValues;
use crate::network::connection::VerifiedKeyspaceName;

/// A request kind the dispatch loop knows how to run.
///
/// The same operation value is reused for every attempt: `request` builds the
/// payload for the attempt's consistency, `process_response` turns the answer
/// into the operation's output.
pub(crate) trait LongRunningOperation: Send + Sync {
    type Output: Send;

    fn request(&self, consistency: Consistency) -> Request;

    fn process_response(&self, response: Response) -> Result<Self::Output, RequestAttemptError>;
}

fn into_result(response: Response) -> Result<result::Result, RequestAttemptError> {
    match response {
        Response::Result(result) => Ok(result),
        Response::Error(err) => Err(RequestAttemptError::DbError(err.error, err.reason)),
        other => Err(RequestAttemptError::UnexpectedResponse(other.kind())),
    }
}

// QUERY and EXECUTE share the set of results they may produce.
fn statement_result(response: Response) -> Result<result::Result, RequestAttemptError> {
    match into_result(response)? {
        result @ (result::Result::Void
        | result::Result::Rows(_)
        | result::Result::SetKeyspace(_)
        | result::Result::SchemaChange(_)) => Ok(result),
        other => Err(RequestAttemptError::UnexpectedResponse(other.kind())),
    }
}

/// Runs an unprepared statement.
pub(crate) struct QueryOperation {
    pub(crate) contents: String,
}

impl LongRunningOperation for QueryOperation {
    type Output = result::Result;

    fn request(&self, consistency: Consistency) -> Request {
        Request::Query {
            contents: self.contents.clone(),
            consistency,
        }
    }

    fn process_response(&self, response: Response) -> Result<Self::Output, RequestAttemptError> {
        statement_result(response)
    }
}

/// Prepares a statement on the coordinator.
pub(crate) struct PrepareOperation {
    pub(crate) contents: String,
}

impl LongRunningOperation for PrepareOperation {
    type Output = Prepared;

    fn request(&self, _consistency: Consistency) -> Request {
        Request::Prepare {
            contents: self.contents.clone(),
        }
    }

    fn process_response(&self, response: Response) -> Result<Self::Output, RequestAttemptError> {
        match into_result(response)? {
            result::Result::Prepared(prepared) => Ok(prepared),
            other => Err(RequestAttemptError::UnexpectedResponse(other.kind())),
        }
    }
}

/// Runs a prepared statement with bound values.
pub(crate) struct ExecuteOperation {
    pub(crate) id: Bytes,
    pub(crate) values: SerializedValues,
}

impl LongRunningOperation for ExecuteOperation {
    type Output = result::Result;

    fn request(&self, consistency: Consistency) -> Request {
        Request::Execute {
            id: self.id.clone(),
            values: self.values.clone(),
            consistency,
        }
    }

    fn process_response(&self, response: Response) -> Result<Self::Output, RequestAttemptError> {
        statement_result(response)
    }
}

/// Sends `USE <keyspace>` and yields the keyspace name the server confirmed.
pub(crate) struct SetKeyspaceOperation {
    pub(crate) keyspace: VerifiedKeyspaceName,
}

impl LongRunningOperation for SetKeyspaceOperation {
    type Output = String;

    fn request(&self, consistency: Consistency) -> Request {
        Request::Query {
            contents: self.keyspace.use_statement(),
            consistency,
        }
    }

    fn process_response(&self, response: Response) -> Result<Self::Output, RequestAttemptError> {
        match into_result(response)? {
            result::Result::SetKeyspace(set_keyspace) => Ok(set_keyspace.keyspace_name),
            other => Err(RequestAttemptError::UnexpectedResponse(other.kind())),
        }
    }
}
