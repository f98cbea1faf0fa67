//! Tablet-server registration and tablet-report integration tests.
//!
//! Drives a mini cluster end to end: registration and re-registration
//! across master restarts, asynchronous table creation observed through
//! polling, replica reports and their effect on the sys-catalog mutation
//! counters, and the security bootstrap over heartbeats.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use serial_test::serial;

use quarry_client::{PollPolicy, wait_for_create_table_done, wait_for_replica_count};
use quarry_master::{ClusterStatus, MatchMode};
use quarry_test_utils::{MiniCluster, MiniClusterOptions, assert_eventually, init_test_logging};
use quarry_types::{ColumnSchema, DataType, Schema, TabletId};
use quarry_wire::admin::{CreateTableRequest, GetTableLocationsRequest, GetTableSchemaRequest};

const EVENTUALLY: Duration = Duration::from_secs(10);

fn uint32_schema() -> Schema {
    Schema::new(vec![ColumnSchema::new("c1", DataType::Uint32)], 1).expect("valid schema")
}

/// Creates a single-tablet table, waits for creation to complete, and
/// returns the tablet's id.
async fn create_table_for_testing(cluster: &MiniCluster, name: &str) -> TabletId {
    let service = cluster.mini_master().service();
    service
        .create_table(CreateTableRequest {
            name: name.to_string(),
            schema: uint32_schema(),
            replication_factor: 1,
        })
        .await
        .expect("create table");

    wait_for_create_table_done(&service, name, &PollPolicy::default())
        .await
        .expect("table creation completes within the polling budget");

    let schema = service
        .get_table_schema(GetTableSchemaRequest { name: name.to_string() })
        .await
        .expect("get schema");
    assert!(schema.create_table_done);

    let locations = service
        .get_table_locations(GetTableLocationsRequest { name: name.to_string() })
        .await
        .expect("get table locations");
    assert_eq!(locations.tablet_locations.len(), 1);
    locations.tablet_locations[0].tablet_id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ts_registers() {
    init_test_logging();
    let cluster = MiniCluster::start(MiniClusterOptions::default());

    let descs = cluster.wait_for_tablet_server_count(1, MatchMode::All).await;
    assert_eq!(descs.len(), 1);
    assert_eq!(descs[0].id(), cluster.mini_tablet_server(0).id());

    // The stored registration must never carry a wildcard address.
    let registration = descs[0].registration();
    for endpoint in &registration.rpc_endpoints {
        assert!(!endpoint.is_wildcard(), "wildcard endpoint stored: {endpoint}");
    }

    // The status snapshot lists the server's UUID and software version.
    let service = cluster.mini_master().service();
    let status =
        ClusterStatus::gather(service.registry(), service.master_registration()).to_string();
    assert!(status.contains(&cluster.mini_tablet_server(0).id().to_string()));
    assert!(status.contains(&quarry_master::software_version()));

    // Restart the master so it loses the descriptor, and ensure the
    // heartbeater re-registers under the same UUID.
    cluster.mini_master().shutdown();
    cluster.mini_master().restart();
    let descs = cluster.wait_for_tablet_server_count(1, MatchMode::All).await;
    assert_eq!(descs[0].id(), cluster.mini_tablet_server(0).id());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_master_software_version() {
    init_test_logging();
    let cluster = MiniCluster::start(MiniClusterOptions::default());
    let registration = cluster.mini_master().service().master_registration().clone();
    assert!(registration.software_version.contains(env!("CARGO_PKG_VERSION")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multiple_ts_register() {
    init_test_logging();
    let mut cluster = MiniCluster::start(MiniClusterOptions::default());
    cluster.add_tablet_server();
    cluster.wait_for_tablet_server_count(2, MatchMode::All).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_tablet_reports() {
    init_test_logging();
    let cluster = MiniCluster::start(MiniClusterOptions::default());
    let master = cluster.mini_master();
    let ts = cluster.mini_tablet_server(0);
    cluster.wait_for_tablet_server_count(1, MatchMode::All).await;

    // Creating a single-tablet table inserts exactly one row for the
    // table and one for the tablet, and updates nothing.
    let startup_inserted = master.rows_inserted();
    let startup_updated = master.rows_updated();
    let service = master.service();
    service
        .create_table(CreateTableRequest {
            name: "fake-table".to_string(),
            schema: uint32_schema(),
            replication_factor: 1,
        })
        .await
        .expect("create table");
    assert_eq!(master.rows_inserted() - startup_inserted, 2);
    assert_eq!(master.rows_updated() - startup_updated, 0);

    wait_for_create_table_done(&service, "fake-table", &PollPolicy::default())
        .await
        .expect("creation completes");
    let locations = service
        .get_table_locations(GetTableLocationsRequest { name: "fake-table".to_string() })
        .await
        .expect("table locations");
    let tablet_id_1 = locations.tablet_locations[0].tablet_id;

    let locs = wait_for_replica_count(&service, tablet_id_1, 1, &PollPolicy::default())
        .await
        .expect("one replica reported");
    assert_eq!(locs.replicas.len(), 1);
    assert_eq!(locs.replicas[0].ts_id, ts.id());

    // The first replica report inserted one replica row, and the
    // creation-complete transition updated the table row once.
    assert_eq!(master.rows_inserted() - startup_inserted, 3);
    assert_eq!(master.rows_updated() - startup_updated, 1);

    // A second table reports through the incremental path.
    let tablet_id_2 = create_table_for_testing(&cluster, "fake-table2").await;
    wait_for_replica_count(&service, tablet_id_2, 1, &PollPolicy::default())
        .await
        .expect("second tablet reported");

    // Full restart: the tablet server bumps its replica terms, so the
    // master rewrites exactly one row per replica and inserts nothing.
    ts.shutdown();
    master.shutdown();
    master.restart();
    ts.start();

    let service = master.service();
    wait_for_replica_count(&service, tablet_id_1, 1, &PollPolicy::default())
        .await
        .expect("tablet 1 known after restart");
    wait_for_replica_count(&service, tablet_id_2, 1, &PollPolicy::default())
        .await
        .expect("tablet 2 known after restart");
    assert!(
        assert_eventually(EVENTUALLY, || master.rows_updated() == 2).await,
        "expected exactly one update per term-bumped replica, saw {}",
        master.rows_updated()
    );
    assert_eq!(master.rows_inserted(), 0);

    // Master-only restart: nothing about the tablets changed, so the
    // re-heartbeats write nothing at all.
    master.shutdown();
    master.restart();
    cluster.wait_for_tablet_server_count(1, MatchMode::All).await;
    let reported = assert_eventually(EVENTUALLY, || {
        master
            .service()
            .registry()
            .get(ts.id())
            .is_some_and(|d| d.latest_report_seq().is_some())
    })
    .await;
    assert!(reported, "tablet server should re-report after master restart");
    assert_eq!(master.rows_inserted(), 0);
    assert_eq!(master.rows_updated(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_create_table_not_done_without_tablet_servers() {
    init_test_logging();
    let mut cluster = MiniCluster::start(MiniClusterOptions {
        num_tablet_servers: 0,
        ..MiniClusterOptions::default()
    });
    let service = cluster.mini_master().service();
    service
        .create_table(CreateTableRequest {
            name: "fake-table".to_string(),
            schema: uint32_schema(),
            replication_factor: 1,
        })
        .await
        .expect("create table");

    // With nobody to report a replica, creation never completes.
    let err = wait_for_create_table_done(
        &service,
        "fake-table",
        &PollPolicy::builder()
            .initial_backoff(Duration::from_micros(200))
            .max_backoff(Duration::from_millis(2))
            .max_attempts(10)
            .build(),
    )
    .await
    .expect_err("cannot complete without replicas");
    assert!(matches!(err, quarry_client::ClientError::Timeout { .. }));

    // Once a tablet server joins, the same poll succeeds.
    cluster.add_tablet_server();
    wait_for_create_table_done(&service, "fake-table", &PollPolicy::default())
        .await
        .expect("completes once a server reports");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ts_gets_signed_certificate() {
    init_test_logging();
    let cluster = MiniCluster::start(MiniClusterOptions::default());
    let ts = cluster.mini_tablet_server(0);

    assert!(
        assert_eventually(EVENTUALLY, || ts.has_signed_cert()).await,
        "tablet server should obtain a signed certificate over heartbeats"
    );
    let cert = ts.certificate().expect("certificate present");
    assert_eq!(cert.payload.subject, ts.id());

    // The certificate verifies under the master's authority key.
    let authority = cluster.mini_master().service().security().authority_key();
    cert.verify(&authority).expect("valid signature");

    // The master's view agrees.
    let descs = cluster.wait_for_tablet_server_count(1, MatchMode::All).await;
    assert!(descs[0].has_signed_cert());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ts_gets_signing_keys() {
    init_test_logging();
    let cluster = MiniCluster::start(MiniClusterOptions::default());
    let ts = cluster.mini_tablet_server(0);

    assert!(
        assert_eventually(EVENTUALLY, || !ts.exported_signing_keys().is_empty()).await,
        "tablet server should receive the signing-key set over heartbeats"
    );

    // Rotation distributes the new key while the old one stays in the
    // node's append-only local view.
    cluster.mini_master().service().security().rotate_signing_key();
    assert!(
        assert_eventually(EVENTUALLY, || ts.exported_signing_keys().len() >= 2).await,
        "rotated key should reach the tablet server"
    );
    let seqs: Vec<u64> = ts.exported_signing_keys().iter().map(|k| k.seq).collect();
    assert!(seqs.contains(&1), "original key retained: {seqs:?}");
    assert!(seqs.contains(&2), "rotated key received: {seqs:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_certificate_survives_master_restart_reissue() {
    init_test_logging();
    let cluster = MiniCluster::start(MiniClusterOptions::default());
    let ts = cluster.mini_tablet_server(0);
    assert!(assert_eventually(EVENTUALLY, || ts.has_signed_cert()).await);

    // A restarted master mints a fresh CA; the restarted tablet server
    // obtains a certificate under it.
    cluster.mini_master().shutdown();
    ts.shutdown();
    cluster.mini_master().restart();
    ts.start();
    assert!(
        assert_eventually(EVENTUALLY, || ts.has_signed_cert()).await,
        "tablet server should be re-certified after restarts"
    );
    let authority = cluster.mini_master().service().security().authority_key();
    ts.certificate().expect("certificate").verify(&authority).expect("new CA signed it");
}
