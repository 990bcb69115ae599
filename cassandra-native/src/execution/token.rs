use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace, trace_span, Instrument};

use super::operation::LongRunningOperation;
use crate::errors::{ExecutionError, HostUnavailableReason, RequestAttemptError};
use crate::frame::types::Consistency;
use crate::network::connection_pool::Route;
use crate::network::Connection;
use crate::policies::retry::{RequestInfo, RetryDecision, RetryPolicy};
use crate::routing::RoutingKey;

/// Where the dispatch loop gets its connections from.
#[async_trait]
pub(crate) trait ConnectionSource: Send + Sync {
    /// Acquires a connection for the next attempt, following the route.
    async fn connection(&self, route: &mut Route) -> Result<Arc<dyn Connection>, ExecutionError>;
}

/// Successful outcome of an operation.
#[derive(Debug)]
pub(crate) struct Completed<T> {
    pub(crate) output: T,
    /// Node that served the final attempt.
    pub(crate) coordinator: SocketAddr,
}

/// State of one operation across all its attempts.
///
/// Attempts of a token run strictly one after another; a token is never in
/// flight on two connections at once.
pub(crate) struct OperationToken {
    route: Route,
    consistency: Consistency,
    attempt_count: u32,
}

impl OperationToken {
    pub(crate) fn new(consistency: Consistency, routing_key: Option<RoutingKey>) -> Self {
        Self {
            route: Route::new(routing_key),
            consistency,
            attempt_count: 0,
        }
    }

    /// Runs the operation until it succeeds, the retry policy rethrows a
    /// server error, or no host is left to fail over to.
    ///
    /// Connection faults, both when writing the request and while waiting for
    /// the response, fail over to the next host with the attempt count unchanged.
    /// So does a server error the retry policy abstains on. A retry stays on the
    /// same host. The number of retries is bounded only by the policy.
    pub(crate) async fn run<O: LongRunningOperation>(
        mut self,
        operation: &O,
        source: &dyn ConnectionSource,
        retry_policy: &dyn RetryPolicy,
    ) -> Result<Completed<O::Output>, ExecutionError> {
        loop {
            let connection = source.connection(&mut self.route).await?;
            let coordinator = connection.connect_address();
            let span = trace_span!(
                "Executing request",
                node = %coordinator,
                attempt = self.attempt_count,
                consistency = %self.consistency,
            );

            let request = operation.request(self.consistency);
            trace!(parent: &span, opcode = %request.opcode(), "Sending");
            let outcome = match connection.begin_request(request) {
                Ok(response) => response.instrument(span.clone()).await,
                Err(fault) => Err(fault),
            };
            // The connection stays in its pool; this attempt no longer needs it.
            drop(connection);

            let error = match outcome
                .map_err(RequestAttemptError::from)
                .and_then(|response| operation.process_response(response))
            {
                Ok(output) => {
                    trace!(parent: &span, "Request succeeded");
                    return Ok(Completed {
                        output,
                        coordinator,
                    });
                }
                Err(e) => e,
            };

            match error {
                RequestAttemptError::Fault(fault) => {
                    debug!(parent: &span, error = %fault, "Connection fault, failing over");
                    self.route.fail_over(HostUnavailableReason::RequestFailed(
                        RequestAttemptError::Fault(fault),
                    ));
                }
                RequestAttemptError::DbError(db_error, reason) => {
                    let decision = retry_policy.decide(RequestInfo {
                        error: &db_error,
                        reason: &reason,
                        consistency: self.consistency,
                        attempt_count: self.attempt_count,
                    });
                    trace!(
                        parent: &span,
                        error = %db_error,
                        retry_decision = ?decision,
                        "Server error"
                    );
                    match decision {
                        RetryDecision::Retry(new_consistency) => {
                            self.consistency = new_consistency.unwrap_or(self.consistency);
                            self.attempt_count += 1;
                        }
                        RetryDecision::Rethrow => {
                            return Err(ExecutionError::DbError(db_error, reason));
                        }
                        RetryDecision::Abstain => {
                            self.route.fail_over(HostUnavailableReason::RequestFailed(
                                RequestAttemptError::DbError(db_error, reason),
                            ));
                        }
                    }
                }
                RequestAttemptError::UnexpectedResponse(kind) => {
                    debug!(parent: &span, response = %kind, "Protocol violation");
                    return Err(ExecutionError::UnexpectedResponse(kind));
                }
            }
        }
    }
}
