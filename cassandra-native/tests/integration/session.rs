use std::sync::Arc;

use assert_matches::assert_matches;
use cassandra_native::errors::{
    ConnectionFault, ExecutionError, HostUnavailableReason, UseKeyspaceError,
};
use cassandra_native::frame::request::Request;
use cassandra_native::frame::response::event::RawEvent;
use cassandra_native::frame::response::{result, Response};
use cassandra_native::network::{Connection, PoolingOptions};
use cassandra_native::policies::load_balancing::{HostDistance, RoundRobinPolicy};
use cassandra_native::test_utils::{MockCluster, MockReply};

use crate::utils::{
    addr, create_new_session_builder, create_session_builder_with_policy, host_state,
    setup_tracing, wait_until,
};

#[tokio::test]
#[ntest::timeout(10000)]
async fn down_host_is_never_routed_to() {
    setup_tracing();
    let cluster = MockCluster::new();
    cluster.refuse_connections(addr(1), true);
    let session = create_session_builder_with_policy(
        &cluster,
        &[addr(1), addr(2), addr(3)],
        Arc::new(RoundRobinPolicy::new()),
    )
    .build()
    .await
    .unwrap();

    assert!(cluster.push_event(RawEvent::status("DOWN", addr(1))).await);
    wait_until("host 1 to be marked down", || {
        host_state(&session, addr(1)) == Some(false)
    })
    .await;

    let attempts_before = cluster.connect_attempts(addr(1));
    for i in 0..12 {
        let result = session.query(format!("SELECT {i}")).await.unwrap();
        assert_ne!(result.coordinator(), addr(1));
    }
    assert_eq!(cluster.connect_attempts(addr(1)), attempts_before);
    assert_eq!(cluster.opened_connections(addr(1)), 0);

    // With both remaining hosts failing, every host shows up in the error.
    cluster.set_responder(|_, request| match request {
        Request::Query { contents, .. } if contents == "SELECT doomed" => {
            Some(MockReply::Fail(ConnectionFault::Closed))
        }
        _ => None,
    });
    let err = session.query("SELECT doomed").await.unwrap_err();
    let ExecutionError::NoHostAvailable(no_host) = err else {
        panic!("expected NoHostAvailable, got {err:?}");
    };
    assert_eq!(no_host.tried.len(), 3);
    assert_matches!(no_host.tried.get(&addr(1)), Some(HostUnavailableReason::Down));
    assert_matches!(
        no_host.tried.get(&addr(2)),
        Some(HostUnavailableReason::RequestFailed(_))
    );
    assert_matches!(
        no_host.tried.get(&addr(3)),
        Some(HostUnavailableReason::RequestFailed(_))
    );
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn pool_stabilizes_at_core_size() {
    setup_tracing();
    let cluster = MockCluster::new();
    let session = create_new_session_builder(&cluster, &[addr(1)])
        .pooling_options(
            PoolingOptions::new()
                .with_core_connections(HostDistance::Local, 2)
                .with_max_connections(HostDistance::Local, 4),
        )
        .build()
        .await
        .unwrap();

    for i in 0..5 {
        session.query(format!("SELECT {i}")).await.unwrap();
    }
    assert_eq!(cluster.opened_connections(addr(1)), 2);
    assert_eq!(cluster.live_connections(addr(1)), 2);
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn keyspace_round_trip() {
    setup_tracing();
    let cluster = MockCluster::new();
    let session = create_new_session_builder(&cluster, &[addr(1), addr(2)])
        .build()
        .await
        .unwrap();

    session.use_keyspace("ks1", false).await.unwrap();
    assert_eq!(session.get_keyspace().as_deref().map(String::as_str), Some("ks1"));

    let result = session.query("SELECT a FROM t").await.unwrap();
    let serving = cluster
        .connections_to(result.coordinator())
        .into_iter()
        .filter(|conn| conn.is_healthy())
        .collect::<Vec<_>>();
    assert!(!serving.is_empty());
    for conn in serving {
        assert_eq!(conn.keyspace().as_deref(), Some("ks1"));
    }

    // A USE statement sent as a plain query switches the session as well.
    let result = session.query("USE ks2").await.unwrap();
    assert_eq!(result.set_keyspace(), Some("ks2"));
    assert_eq!(session.get_keyspace().as_deref().map(String::as_str), Some("ks2"));
    for conn in cluster.connections() {
        if conn.is_healthy() {
            assert_eq!(conn.keyspace().as_deref(), Some("ks2"));
        }
    }
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn keyspace_reaches_connections_opened_later() {
    setup_tracing();
    let cluster = MockCluster::new();
    let session = create_new_session_builder(&cluster, &[addr(1), addr(2)])
        .use_keyspace("Initial", true)
        .build()
        .await
        .unwrap();
    session.use_keyspace("later", false).await.unwrap();

    // Host 2 had no pool yet; its connections get the current keyspace.
    cluster.refuse_connections(addr(1), true);
    cluster.break_connections_to(addr(1));
    let result = session.query("SELECT x").await.unwrap();
    assert_eq!(result.coordinator(), addr(2));
    for conn in cluster.connections_to(addr(2)) {
        assert_eq!(conn.keyspace().as_deref(), Some("later"));
    }
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn bad_keyspace_names_and_mismatches_are_rejected() {
    setup_tracing();
    let cluster = MockCluster::new();
    cluster.set_responder(|_, request| match request {
        Request::Query { contents, .. } if contents == "USE liar" => Some(MockReply::Respond(
            Response::Result(result::Result::SetKeyspace(result::SetKeyspace {
                keyspace_name: "other".to_string(),
            })),
        )),
        _ => None,
    });
    let session = create_new_session_builder(&cluster, &[addr(1)])
        .build()
        .await
        .unwrap();
    session.use_keyspace("good", false).await.unwrap();

    assert_matches!(
        session.use_keyspace("", false).await,
        Err(ExecutionError::UseKeyspace(UseKeyspaceError::BadKeyspaceName(_)))
    );
    assert_matches!(
        session.use_keyspace("liar", false).await,
        Err(ExecutionError::UseKeyspace(UseKeyspaceError::KeyspaceNameMismatch { .. }))
    );
    assert_eq!(session.get_keyspace().as_deref().map(String::as_str), Some("good"));
}
