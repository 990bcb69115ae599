//! Responses a connection hands back to the driver core.

pub mod error;
pub mod event;
pub mod result;

use std::fmt;

pub use error::Error;

/// A response decoded by a connection.
#[derive(Debug, Clone)]
pub enum Response {
    /// The server rejected the request.
    Error(Error),
    /// Acknowledges `REGISTER` (and connection startup).
    Ready,
    /// The result of a query, prepare or execute.
    Result(result::Result),
    /// A push notification, only ever received on a registered connection.
    Event(event::RawEvent),
}

impl Response {
    pub fn kind(&self) -> CqlResponseKind {
        match self {
            Response::Error(_) => CqlResponseKind::Error,
            Response::Ready => CqlResponseKind::Ready,
            Response::Event(_) => CqlResponseKind::Event,
            Response::Result(result) => result.kind(),
        }
    }

    /// Turns an `ERROR` response into `Err`, passing everything else through.
    pub fn into_non_error_response(self) -> Result<NonErrorResponse, Error> {
        match self {
            Response::Error(err) => Err(err),
            Response::Ready => Ok(NonErrorResponse::Ready),
            Response::Result(res) => Ok(NonErrorResponse::Result(res)),
            Response::Event(ev) => Ok(NonErrorResponse::Event(ev)),
        }
    }
}

/// A response that is known not to be an `ERROR`.
#[derive(Debug, Clone)]
pub enum NonErrorResponse {
    Ready,
    Result(result::Result),
    Event(event::RawEvent),
}

impl NonErrorResponse {
    pub fn kind(&self) -> CqlResponseKind {
        match self {
            NonErrorResponse::Ready => CqlResponseKind::Ready,
            NonErrorResponse::Event(_) => CqlResponseKind::Event,
            NonErrorResponse::Result(res) => res.kind(),
        }
    }
}

/// Shape of a response, with `RESULT` responses split by result kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CqlResponseKind {
    Error,
    Ready,
    Event,
    Void,
    Rows,
    SetKeyspace,
    Prepared,
    SchemaChange,
}

impl fmt::Display for CqlResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind_str = match self {
            CqlResponseKind::Error => "ERROR",
            CqlResponseKind::Ready => "READY",
            CqlResponseKind::Event => "EVENT",
            CqlResponseKind::Void => "RESULT:Void",
            CqlResponseKind::Rows => "RESULT:Rows",
            CqlResponseKind::SetKeyspace => "RESULT:SetKeyspace",
            CqlResponseKind::Prepared => "RESULT:Prepared",
            CqlResponseKind::SchemaChange => "RESULT:SchemaChange",
        };

        f.write_str(kind_str)
    }
}
