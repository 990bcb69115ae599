use tracing::debug;

use super::{RequestInfo, RetryDecision, RetryPolicy};
use crate::errors::{DbError, WriteType};
use crate::frame::types::Consistency;

/// Downgrading consistency retry policy - retries once with a lower consistency level
/// when it knows that the requested one is unreachable.
///
/// Otherwise it behaves like [DefaultRetryPolicy](super::DefaultRetryPolicy).
#[derive(Debug)]
pub struct DowngradingConsistencyRetryPolicy;

impl DowngradingConsistencyRetryPolicy {
    /// Creates a new instance of [DowngradingConsistencyRetryPolicy].
    pub fn new() -> DowngradingConsistencyRetryPolicy {
        DowngradingConsistencyRetryPolicy
    }
}

impl Default for DowngradingConsistencyRetryPolicy {
    fn default() -> DowngradingConsistencyRetryPolicy {
        DowngradingConsistencyRetryPolicy::new()
    }
}

fn max_likely_to_work_cl(known_ok: i32, previous_cl: Consistency) -> RetryDecision {
    let decision = if known_ok >= 3 {
        RetryDecision::Retry(Some(Consistency::Three))
    } else if known_ok == 2 {
        RetryDecision::Retry(Some(Consistency::Two))
    } else if known_ok == 1 || previous_cl == Consistency::EachQuorum {
        // EACH_QUORUM does not report a global number of alive replicas,
        // so a replica may still be up in another datacenter.
        RetryDecision::Retry(Some(Consistency::One))
    } else {
        RetryDecision::Rethrow
    };
    if let RetryDecision::Retry(new_cl) = decision {
        debug!(
            "Decided to lower required consistency from {} to {:?}.",
            previous_cl, new_cl
        );
    }
    decision
}

impl RetryPolicy for DowngradingConsistencyRetryPolicy {
    fn decide(&self, request_info: RequestInfo<'_>) -> RetryDecision {
        let cl = request_info.consistency;
        if cl.is_serial() {
            // An unavailable serial request failed in the Paxos phase;
            // the coordinator may be the one cut off.
            return match request_info.error {
                DbError::Unavailable { .. } => RetryDecision::Abstain,
                _ => RetryDecision::Rethrow,
            };
        }
        let was_retry = request_info.attempt_count > 0;

        match request_info.error {
            DbError::Overloaded
            | DbError::IsBootstrapping
            | DbError::ServerError
            | DbError::TruncateError => RetryDecision::Abstain,
            DbError::Unavailable { alive, .. } => {
                if was_retry {
                    RetryDecision::Rethrow
                } else {
                    max_likely_to_work_cl(*alive, cl)
                }
            }
            DbError::ReadTimeout {
                received,
                required,
                data_present,
                ..
            } => {
                if was_retry {
                    RetryDecision::Rethrow
                } else if received < required {
                    max_likely_to_work_cl(*received, cl)
                } else if !*data_present {
                    RetryDecision::Retry(None)
                } else {
                    RetryDecision::Rethrow
                }
            }
            DbError::WriteTimeout {
                write_type,
                received,
                ..
            } => {
                if was_retry {
                    return RetryDecision::Rethrow;
                }
                match write_type {
                    // Only part of the batch may be persisted; retry at whatever
                    // consistency should allow to persist all of it.
                    WriteType::UnloggedBatch => max_likely_to_work_cl(*received, cl),
                    WriteType::BatchLog => RetryDecision::Retry(None),
                    _ => RetryDecision::Rethrow,
                }
            }
            _ => RetryDecision::Rethrow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::setup_tracing;

    const CONSISTENCY_LEVELS: &[Consistency] = &[
        Consistency::All,
        Consistency::Any,
        Consistency::EachQuorum,
        Consistency::LocalOne,
        Consistency::LocalQuorum,
        Consistency::One,
        Consistency::Quorum,
        Consistency::Three,
        Consistency::Two,
    ];

    fn decide(error: &DbError, cl: Consistency, attempt_count: u32) -> RetryDecision {
        DowngradingConsistencyRetryPolicy::new().decide(RequestInfo {
            error,
            reason: "",
            consistency: cl,
            attempt_count,
        })
    }

    #[test]
    fn downgrading_consistency_unavailable() {
        setup_tracing();
        let alive = 1;
        let error = DbError::Unavailable {
            consistency: Consistency::Two,
            required: 2,
            alive,
        };
        for &cl in CONSISTENCY_LEVELS {
            assert_eq!(
                decide(&error, cl, 0),
                RetryDecision::Retry(Some(Consistency::One))
            );
            assert_eq!(decide(&error, cl, 1), RetryDecision::Rethrow);
        }
    }

    #[test]
    fn downgrading_consistency_read_timeout() {
        setup_tracing();
        let not_enough = DbError::ReadTimeout {
            consistency: Consistency::Three,
            received: 2,
            required: 3,
            data_present: true,
        };
        assert_eq!(
            decide(&not_enough, Consistency::Three, 0),
            RetryDecision::Retry(Some(Consistency::Two))
        );

        let enough_no_data = DbError::ReadTimeout {
            consistency: Consistency::Two,
            received: 2,
            required: 2,
            data_present: false,
        };
        assert_eq!(
            decide(&enough_no_data, Consistency::Two, 0),
            RetryDecision::Retry(None)
        );
        assert_eq!(
            decide(&enough_no_data, Consistency::Two, 1),
            RetryDecision::Rethrow
        );
    }

    #[test]
    fn downgrading_consistency_write_timeout() {
        setup_tracing();
        let unlogged = DbError::WriteTimeout {
            consistency: Consistency::Quorum,
            received: 0,
            required: 2,
            write_type: WriteType::UnloggedBatch,
        };
        assert_eq!(
            decide(&unlogged, Consistency::EachQuorum, 0),
            RetryDecision::Retry(Some(Consistency::One))
        );
        assert_eq!(
            decide(&unlogged, Consistency::Quorum, 0),
            RetryDecision::Rethrow
        );
    }

    #[test]
    fn downgrading_consistency_serial() {
        setup_tracing();
        let unavailable = DbError::Unavailable {
            consistency: Consistency::Serial,
            required: 2,
            alive: 1,
        };
        assert_eq!(
            decide(&unavailable, Consistency::Serial, 0),
            RetryDecision::Abstain
        );
        assert_eq!(
            decide(&DbError::Overloaded, Consistency::LocalSerial, 0),
            RetryDecision::Rethrow
        );
    }
}
