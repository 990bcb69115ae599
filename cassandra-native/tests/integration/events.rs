use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use assert_matches::assert_matches;
use cassandra_native::errors::{ConnectionFault, DbError, EventRegistrationError, ExecutionError};
use cassandra_native::frame::request::Request;
use cassandra_native::frame::response::event::RawEvent;
use cassandra_native::frame::response::{result, Error, Response};
use cassandra_native::test_utils::{MockCluster, MockReply};
use tokio::sync::Semaphore;

use crate::utils::{addr, create_new_session_builder, host_state, setup_tracing, wait_until};

fn registrations(cluster: &MockCluster) -> usize {
    cluster
        .requests()
        .iter()
        .filter(|(_, request)| matches!(request, Request::Register { .. }))
        .count()
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn down_event_spares_requests_in_flight() {
    setup_tracing();
    let cluster = MockCluster::new();
    let permit = Arc::new(Semaphore::new(0));
    let slow_permit = Arc::clone(&permit);
    cluster.set_responder(move |address, request| match request {
        Request::Query { contents, .. } if contents == "SELECT slow" && address == addr(1) => {
            Some(MockReply::AfterPermit(
                Arc::clone(&slow_permit),
                Response::Result(result::Result::Void),
            ))
        }
        _ => None,
    });
    let session = create_new_session_builder(&cluster, &[addr(1), addr(2)])
        .build()
        .await
        .unwrap();

    let slow = session.begin_query("SELECT slow");
    wait_until("the slow query to reach host 1", || {
        cluster.hosts_that_received("SELECT slow") == vec![addr(1)]
    })
    .await;

    assert!(cluster.push_event(RawEvent::status("DOWN", addr(1))).await);
    wait_until("host 1 to be marked down", || {
        host_state(&session, addr(1)) == Some(false)
    })
    .await;

    let result = session.query("SELECT next").await.unwrap();
    assert_eq!(result.coordinator(), addr(2));

    permit.add_permits(1);
    let slow_result = slow.await.unwrap();
    assert_eq!(slow_result.coordinator(), addr(1));
    assert_eq!(cluster.hosts_that_received("SELECT slow"), vec![addr(1)]);
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn up_event_makes_host_routable_again() {
    setup_tracing();
    let cluster = MockCluster::new();
    let session = create_new_session_builder(&cluster, &[addr(1), addr(2)])
        .build()
        .await
        .unwrap();

    assert!(cluster.push_event(RawEvent::status("DOWN", addr(1))).await);
    wait_until("host 1 to be marked down", || {
        host_state(&session, addr(1)) == Some(false)
    })
    .await;
    assert_eq!(session.query("SELECT a").await.unwrap().coordinator(), addr(2));

    assert!(cluster.push_event(RawEvent::status("UP", addr(1))).await);
    wait_until("host 1 to be marked up", || {
        host_state(&session, addr(1)) == Some(true)
    })
    .await;
    assert_eq!(session.query("SELECT b").await.unwrap().coordinator(), addr(1));
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn lost_event_connection_is_replaced() {
    setup_tracing();
    let cluster = MockCluster::new();
    let session = create_new_session_builder(&cluster, &[addr(1), addr(2)])
        .build()
        .await
        .unwrap();
    assert_eq!(registrations(&cluster), 1);

    assert_eq!(cluster.break_event_connection(), Some(addr(1)));
    assert!(!cluster.push_event(RawEvent::status("DOWN", addr(2))).await);

    // The next request notices the loss and registers another connection.
    session.query("SELECT a").await.unwrap();
    assert_eq!(registrations(&cluster), 2);

    assert!(cluster.push_event(RawEvent::status("DOWN", addr(2))).await);
    wait_until("host 2 to be marked down", || {
        host_state(&session, addr(2)) == Some(false)
    })
    .await;
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn unreadable_event_does_not_stop_listener() {
    setup_tracing();
    let cluster = MockCluster::new();
    let session = create_new_session_builder(&cluster, &[addr(1), addr(2)])
        .build()
        .await
        .unwrap();

    let mut unknown = RawEvent::status("DOWN", addr(1));
    unknown.event_type = "KEYSPACE_CHANGE".to_string();
    assert!(cluster.push_event(unknown).await);
    assert!(cluster.push_event(RawEvent::status("SIDEWAYS", addr(1))).await);
    assert!(cluster
        .push_event(RawEvent::schema("CREATED", "TABLE", "ks", Some("t")))
        .await);
    assert!(cluster.push_event(RawEvent::status("DOWN", addr(2))).await);

    wait_until("host 2 to be marked down", || {
        host_state(&session, addr(2)) == Some(false)
    })
    .await;
    assert_eq!(host_state(&session, addr(1)), Some(true));
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn topology_events_add_and_remove_hosts() {
    setup_tracing();
    let cluster = MockCluster::new();
    cluster.set_responder(|address, request| match request {
        Request::Query { contents, .. } if contents == "SELECT far" && address != addr(3) => {
            Some(MockReply::Fail(ConnectionFault::Closed))
        }
        _ => None,
    });
    let session = create_new_session_builder(&cluster, &[addr(1), addr(2)])
        .build()
        .await
        .unwrap();

    assert!(cluster.push_event(RawEvent::topology("NEW_NODE", addr(3))).await);
    wait_until("host 3 to join", || host_state(&session, addr(3)) == Some(true)).await;

    let result = session.query("SELECT far").await.unwrap();
    assert_eq!(result.coordinator(), addr(3));
    assert!(cluster.live_connections(addr(3)) > 0);

    assert!(cluster
        .push_event(RawEvent::topology("REMOVED_NODE", addr(3)))
        .await);
    wait_until("host 3 to leave", || host_state(&session, addr(3)).is_none()).await;
    wait_until("host 3 connections to close", || {
        cluster.live_connections(addr(3)) == 0
    })
    .await;
    assert!(session.query("SELECT far").await.is_err());
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn removing_event_connection_host_moves_listener() {
    setup_tracing();
    let cluster = MockCluster::new();
    let session = create_new_session_builder(&cluster, &[addr(1), addr(2)])
        .build()
        .await
        .unwrap();
    assert_eq!(registrations(&cluster), 1);

    // The event connection lives on host 1 and is closed with its pool.
    assert!(cluster
        .push_event(RawEvent::topology("REMOVED_NODE", addr(1)))
        .await);
    wait_until("host 1 to leave", || host_state(&session, addr(1)).is_none()).await;
    wait_until("host 1 connections to close", || {
        cluster.live_connections(addr(1)) == 0
    })
    .await;

    let result = session.query("SELECT a").await.unwrap();
    assert_eq!(result.coordinator(), addr(2));
    assert_eq!(registrations(&cluster), 2);

    assert!(cluster.push_event(RawEvent::topology("NEW_NODE", addr(3))).await);
    wait_until("host 3 to join", || host_state(&session, addr(3)) == Some(true)).await;
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn event_connection_of_down_host_is_replaced() {
    setup_tracing();
    let cluster = MockCluster::new();
    let session = create_new_session_builder(&cluster, &[addr(1), addr(2)])
        .build()
        .await
        .unwrap();

    assert!(cluster.push_event(RawEvent::status("DOWN", addr(1))).await);
    wait_until("host 1 to be marked down", || {
        host_state(&session, addr(1)) == Some(false)
    })
    .await;
    // Pools of down hosts are not scanned, so the loss is not seen there.
    assert_eq!(cluster.break_event_connection(), Some(addr(1)));

    let result = session.query("SELECT a").await.unwrap();
    assert_eq!(result.coordinator(), addr(2));
    assert_eq!(registrations(&cluster), 2);

    assert!(cluster.push_event(RawEvent::status("UP", addr(1))).await);
    wait_until("host 1 to be marked up", || {
        host_state(&session, addr(1)) == Some(true)
    })
    .await;
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn failed_listener_replacement_is_retried() {
    setup_tracing();
    let cluster = MockCluster::new();
    let refuse_registration = Arc::new(AtomicBool::new(false));
    let refuse = Arc::clone(&refuse_registration);
    cluster.set_responder(move |_, request| match request {
        Request::Register { .. } if refuse.load(Ordering::SeqCst) => {
            Some(MockReply::Respond(Response::Error(Error {
                error: DbError::Overloaded,
                reason: "busy".to_string(),
            })))
        }
        _ => None,
    });
    let session = create_new_session_builder(&cluster, &[addr(1), addr(2)])
        .build()
        .await
        .unwrap();

    refuse_registration.store(true, Ordering::SeqCst);
    assert_eq!(cluster.break_event_connection(), Some(addr(1)));

    // Only the request that found the listener dead fails.
    assert_matches!(
        session.query("SELECT a").await,
        Err(ExecutionError::EventRegistration(EventRegistrationError::DbError(
            DbError::Overloaded,
            _
        )))
    );
    assert_eq!(registrations(&cluster), 2);

    session.query("SELECT b").await.unwrap();
    assert_eq!(registrations(&cluster), 3);
    assert!(!cluster.push_event(RawEvent::status("DOWN", addr(2))).await);

    refuse_registration.store(false, Ordering::SeqCst);
    session.query("SELECT c").await.unwrap();
    session.query("SELECT d").await.unwrap();
    assert_eq!(registrations(&cluster), 4);

    assert!(cluster.push_event(RawEvent::status("DOWN", addr(2))).await);
    wait_until("host 2 to be marked down", || {
        host_state(&session, addr(2)) == Some(false)
    })
    .await;
}
