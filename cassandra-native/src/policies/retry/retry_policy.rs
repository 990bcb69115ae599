//! Request retries configurations\
//! To decide what to do after a server error the `Session` can use any object which implements
//! the `RetryPolicy` trait

use crate::errors::DbError;
use crate::frame::types::Consistency;

/// Information about a request that failed with a server error
pub struct RequestInfo<'a> {
    /// The error with which the request failed
    pub error: &'a DbError,
    /// Message sent by the server along with the error
    pub reason: &'a str,
    /// Consistency with which the request failed
    pub consistency: Consistency,
    /// How many times this request was already retried
    pub attempt_count: u32,
}

/// What the session should do after a server error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Send the request again to the same host, optionally with another consistency.
    /// `None` keeps the current consistency.
    Retry(Option<Consistency>),
    /// Hand the error to the caller.
    Rethrow,
    /// No opinion: the session treats the host as faulty and fails over to the next one
    /// without counting an attempt.
    Abstain,
}

/// Specifies a policy used to decide what to do after a server error.
///
/// The session enforces no limit on the number of retries: a policy that keeps
/// answering [RetryDecision::Retry] keeps the request running.
pub trait RetryPolicy: std::fmt::Debug + Send + Sync {
    /// Called after a request failed with a server error.
    fn decide(&self, request_info: RequestInfo<'_>) -> RetryDecision;
}
