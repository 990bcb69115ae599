use crate::errors::{DbError, WriteType};

use super::{RequestInfo, RetryDecision, RetryPolicy};

/// Default retry policy - retries when there is a high chance that a retry might help.
///
/// * read timeouts are retried once, on the same host, when enough replicas
///   answered but the data replica did not,
/// * write timeouts are retried once when the batch log write timed out,
/// * errors local to the coordinator (overloaded, bootstrapping, server and truncate
///   errors) abstain, moving the request to the next host,
/// * everything else, including any error at serial consistency, is rethrown.
#[derive(Debug)]
pub struct DefaultRetryPolicy;

impl DefaultRetryPolicy {
    /// Creates a new instance of [DefaultRetryPolicy].
    pub fn new() -> DefaultRetryPolicy {
        DefaultRetryPolicy
    }
}

impl Default for DefaultRetryPolicy {
    fn default() -> DefaultRetryPolicy {
        DefaultRetryPolicy::new()
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn decide(&self, request_info: RequestInfo<'_>) -> RetryDecision {
        if request_info.consistency.is_serial() {
            return RetryDecision::Rethrow;
        };
        let first_attempt = request_info.attempt_count == 0;
        match request_info.error {
            // Basic errors - there are some problems on this node
            DbError::Overloaded
            | DbError::IsBootstrapping
            | DbError::ServerError
            | DbError::TruncateError => RetryDecision::Abstain,
            // Enough replicas replied, but only with digests. The coordinator will
            // notice the dead data replica by the time we retry.
            DbError::ReadTimeout {
                received,
                required,
                data_present,
                ..
            } => {
                if first_attempt && received >= required && !*data_present {
                    RetryDecision::Retry(None)
                } else {
                    RetryDecision::Rethrow
                }
            }
            DbError::WriteTimeout { write_type, .. } => {
                if first_attempt && *write_type == WriteType::BatchLog {
                    RetryDecision::Retry(None)
                } else {
                    RetryDecision::Rethrow
                }
            }
            // In all other cases propagate the error to the user
            _ => RetryDecision::Rethrow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DefaultRetryPolicy, RequestInfo, RetryDecision, RetryPolicy};
    use crate::errors::{DbError, WriteType};
    use crate::frame::types::Consistency;
    use crate::test_utils::setup_tracing;
    use bytes::Bytes;

    fn decide(error: &DbError, attempt_count: u32) -> RetryDecision {
        DefaultRetryPolicy::new().decide(RequestInfo {
            error,
            reason: "",
            consistency: Consistency::One,
            attempt_count,
        })
    }

    #[test]
    fn default_never_retries() {
        setup_tracing();
        let never_retried_dberrors = vec![
            DbError::SyntaxError,
            DbError::Invalid,
            DbError::AlreadyExists {
                keyspace: String::new(),
                table: String::new(),
            },
            DbError::FunctionFailure {
                keyspace: String::new(),
                function: String::new(),
                arg_types: vec![],
            },
            DbError::AuthenticationError,
            DbError::Unauthorized,
            DbError::ConfigError,
            DbError::Unavailable {
                consistency: Consistency::Two,
                required: 2,
                alive: 1,
            },
            DbError::ReadFailure {
                consistency: Consistency::Two,
                received: 2,
                required: 1,
                numfailures: 1,
                data_present: false,
            },
            DbError::WriteFailure {
                consistency: Consistency::Two,
                received: 1,
                required: 2,
                numfailures: 1,
                write_type: WriteType::BatchLog,
            },
            DbError::Unprepared {
                statement_id: Bytes::from_static(b"deadbeef"),
            },
            DbError::ProtocolError,
            DbError::Other(0x124816),
        ];

        for dberror in never_retried_dberrors {
            assert_eq!(decide(&dberror, 0), RetryDecision::Rethrow, "{dberror:?}");
        }
    }

    #[test]
    fn default_abstains_on_coordinator_problems() {
        setup_tracing();
        for dberror in [
            DbError::Overloaded,
            DbError::IsBootstrapping,
            DbError::ServerError,
            DbError::TruncateError,
        ] {
            assert_eq!(decide(&dberror, 0), RetryDecision::Abstain);
            assert_eq!(decide(&dberror, 5), RetryDecision::Abstain);
        }
    }

    #[test]
    fn default_read_timeout() {
        setup_tracing();
        // Enough responses and data_present == false - retry once
        let enough_responses_no_data = DbError::ReadTimeout {
            consistency: Consistency::Two,
            received: 2,
            required: 2,
            data_present: false,
        };
        assert_eq!(decide(&enough_responses_no_data, 0), RetryDecision::Retry(None));
        assert_eq!(decide(&enough_responses_no_data, 1), RetryDecision::Rethrow);

        // Enough responses but with data - don't retry
        let enough_responses_with_data = DbError::ReadTimeout {
            consistency: Consistency::Two,
            received: 2,
            required: 2,
            data_present: true,
        };
        assert_eq!(decide(&enough_responses_with_data, 0), RetryDecision::Rethrow);

        // Not enough responses - don't retry
        let not_enough_responses = DbError::ReadTimeout {
            consistency: Consistency::Two,
            received: 1,
            required: 2,
            data_present: false,
        };
        assert_eq!(decide(&not_enough_responses, 0), RetryDecision::Rethrow);
    }

    #[test]
    fn default_write_timeout() {
        setup_tracing();
        let good_write_type = DbError::WriteTimeout {
            consistency: Consistency::Two,
            received: 1,
            required: 2,
            write_type: WriteType::BatchLog,
        };
        assert_eq!(decide(&good_write_type, 0), RetryDecision::Retry(None));
        assert_eq!(decide(&good_write_type, 1), RetryDecision::Rethrow);

        let bad_write_type = DbError::WriteTimeout {
            consistency: Consistency::Two,
            received: 4,
            required: 2,
            write_type: WriteType::Simple,
        };
        assert_eq!(decide(&bad_write_type, 0), RetryDecision::Rethrow);
    }

    #[test]
    fn default_rethrows_at_serial_consistency() {
        setup_tracing();
        let decision = DefaultRetryPolicy::new().decide(RequestInfo {
            error: &DbError::Overloaded,
            reason: "",
            consistency: Consistency::LocalSerial,
            attempt_count: 0,
        });
        assert_eq!(decision, RetryDecision::Rethrow);
    }
}
