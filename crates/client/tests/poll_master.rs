//! Polling helpers driven against a live mini cluster.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use quarry_client::{ClientError, PollPolicy, wait_for_create_table_done, wait_for_replica_count};
use quarry_test_utils::{MiniCluster, MiniClusterOptions, init_test_logging};
use quarry_types::{ColumnSchema, DataType, Schema, TabletId};
use quarry_wire::admin::{CreateTableRequest, GetTableLocationsRequest};

fn uint32_schema() -> Schema {
    Schema::new(vec![ColumnSchema::new("c1", DataType::Uint32)], 1).expect("valid schema")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wait_for_create_table_done_and_replicas() {
    init_test_logging();
    let cluster = MiniCluster::start(MiniClusterOptions::default());
    let service = cluster.mini_master().service();

    service
        .create_table(CreateTableRequest {
            name: "poll-me".to_string(),
            schema: uint32_schema(),
            replication_factor: 1,
        })
        .await
        .expect("create table");

    wait_for_create_table_done(&service, "poll-me", &PollPolicy::default())
        .await
        .expect("creation completes under the default budget");

    let locations = service
        .get_table_locations(GetTableLocationsRequest { name: "poll-me".to_string() })
        .await
        .expect("table locations");
    let tablet_id = locations.tablet_locations[0].tablet_id;
    let locs = wait_for_replica_count(&service, tablet_id, 1, &PollPolicy::default())
        .await
        .expect("exactly one replica");
    assert_eq!(locs.replicas.len(), 1);
    assert!(!locs.replicas[0].rpc_endpoints.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_table_is_definitive() {
    init_test_logging();
    let cluster = MiniCluster::start(MiniClusterOptions::default());
    let service = cluster.mini_master().service();

    // NotFound is not worth polling on: it aborts immediately.
    let err = wait_for_create_table_done(&service, "never-created", &PollPolicy::default())
        .await
        .expect_err("unknown table");
    assert!(matches!(err, ClientError::Master { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_tablet_is_definitive() {
    init_test_logging();
    let cluster = MiniCluster::start(MiniClusterOptions::default());
    let service = cluster.mini_master().service();

    let err = wait_for_replica_count(&service, TabletId::generate(), 1, &PollPolicy::default())
        .await
        .expect_err("unknown tablet");
    assert!(matches!(err, ClientError::Master { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_budget_exhaustion_during_master_downtime() {
    init_test_logging();
    let cluster = MiniCluster::start(MiniClusterOptions::default());
    let service = cluster.mini_master().service();
    service
        .create_table(CreateTableRequest {
            name: "t".to_string(),
            schema: uint32_schema(),
            replication_factor: 1,
        })
        .await
        .expect("create table");
    wait_for_create_table_done(&service, "t", &PollPolicy::default())
        .await
        .expect("creation completes");

    // Demote the master: every poll attempt now fails retryably, and the
    // budget converts that into a client-side timeout.
    cluster.mini_master().with_master(|m| m.oracle().set_role(quarry_master::Role::Follower));
    let err = wait_for_create_table_done(
        &service,
        "t",
        &PollPolicy::builder()
            .initial_backoff(Duration::from_micros(200))
            .max_backoff(Duration::from_millis(2))
            .max_attempts(5)
            .build(),
    )
    .await
    .expect_err("gate closed for the whole budget");
    match err {
        ClientError::Timeout { attempts, .. } => assert_eq!(attempts, 5),
        other => panic!("expected timeout, got {other}"),
    }
}
