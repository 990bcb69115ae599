use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use assert_matches::assert_matches;
use cassandra_native::errors::{DbError, ExecutionError};
use cassandra_native::frame::request::Request;
use cassandra_native::frame::response::error::Error;
use cassandra_native::frame::response::Response;
use cassandra_native::policies::retry::{
    DowngradingConsistencyRetryPolicy, RequestInfo, RetryDecision, RetryPolicy,
};
use cassandra_native::statement::unprepared::Statement;
use cassandra_native::test_utils::{MockCluster, MockReply};
use cassandra_native::Consistency;

use crate::utils::{addr, create_new_session_builder, setup_tracing};

fn server_error(error: DbError) -> MockReply {
    MockReply::Respond(Response::Error(Error {
        error,
        reason: "injected".to_string(),
    }))
}

/// Retries the first failure at ONE, rethrows every later one.
#[derive(Debug, Default)]
struct RetryOnceAtOne {
    decisions: AtomicU32,
}

impl RetryPolicy for RetryOnceAtOne {
    fn decide(&self, info: RequestInfo<'_>) -> RetryDecision {
        self.decisions.fetch_add(1, Ordering::SeqCst);
        if info.attempt_count == 0 {
            RetryDecision::Retry(Some(Consistency::One))
        } else {
            RetryDecision::Rethrow
        }
    }
}

fn consistencies_of(cluster: &MockCluster, contents: &str) -> Vec<Consistency> {
    cluster
        .requests()
        .into_iter()
        .filter_map(|(_, request)| match request {
            Request::Query {
                contents: sent,
                consistency,
            } if sent == contents => Some(consistency),
            _ => None,
        })
        .collect()
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn policy_retry_then_rethrow() {
    setup_tracing();
    let cluster = MockCluster::new();
    cluster.set_responder(|_, request| match request {
        Request::Query { contents, .. } if contents == "SELECT failing" => {
            Some(server_error(DbError::Overloaded))
        }
        _ => None,
    });
    let policy = Arc::new(RetryOnceAtOne::default());
    let session = create_new_session_builder(&cluster, &[addr(1), addr(2)])
        .retry_policy(policy.clone())
        .default_consistency(Consistency::Quorum)
        .build()
        .await
        .unwrap();

    let err = session.query("SELECT failing").await.unwrap_err();
    assert_matches!(err, ExecutionError::DbError(DbError::Overloaded, _));
    assert_eq!(policy.decisions.load(Ordering::SeqCst), 2);

    // Both attempts went to the same coordinator, the second one at ONE.
    assert_eq!(
        cluster.hosts_that_received("SELECT failing"),
        vec![addr(1), addr(1)]
    );
    assert_eq!(
        consistencies_of(&cluster, "SELECT failing"),
        vec![Consistency::Quorum, Consistency::One]
    );
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn downgrading_policy_lowers_consistency() {
    setup_tracing();
    let cluster = MockCluster::new();
    cluster.set_responder(|_, request| match request {
        Request::Query {
            contents,
            consistency: Consistency::Quorum,
        } if contents == "SELECT scarce" => Some(server_error(DbError::Unavailable {
            consistency: Consistency::Quorum,
            required: 2,
            alive: 1,
        })),
        _ => None,
    });
    let session = create_new_session_builder(&cluster, &[addr(1)])
        .retry_policy(Arc::new(DowngradingConsistencyRetryPolicy::new()))
        .build()
        .await
        .unwrap();

    let mut statement = Statement::new("SELECT scarce");
    statement.set_consistency(Consistency::Quorum);
    let result = session.query(statement).await.unwrap();
    assert_eq!(result.coordinator(), addr(1));
    assert_eq!(
        consistencies_of(&cluster, "SELECT scarce"),
        vec![Consistency::Quorum, Consistency::One]
    );
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn default_policy_fails_over_on_overloaded_coordinator() {
    setup_tracing();
    let cluster = MockCluster::new();
    cluster.set_responder(|address, request| match request {
        Request::Query { contents, .. } if contents == "SELECT busy" && address == addr(1) => {
            Some(server_error(DbError::Overloaded))
        }
        _ => None,
    });
    let session = create_new_session_builder(&cluster, &[addr(1), addr(2)])
        .build()
        .await
        .unwrap();

    let result = session.query("SELECT busy").await.unwrap();
    assert_eq!(result.coordinator(), addr(2));
    assert_eq!(
        cluster.hosts_that_received("SELECT busy"),
        vec![addr(1), addr(2)]
    );
}
