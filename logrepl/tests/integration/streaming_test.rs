use config::shared::SourceConfig;
use logrepl::concurrency::shutdown::create_shutdown_channel;
use logrepl::replication::apply::{start_apply_loop, start_apply_loop_with_acks};
use logrepl::replication::client::PgReplicationClient;
use logrepl::replication::endpoints::{cleanup, prepare};
use logrepl::replication::handler::CdcHandler;
use logrepl::replication::position::decode_cdc_position;
use logrepl::replication::progress::create_ack_channel;
use logrepl::test_utils::database::TestDatabase;
use logrepl::types::{Cell, Operation, Record};
use rand::random;
use std::collections::HashMap;
use std::time::Duration;
use telemetry::tracing::init_test_tracing;
use tokio::sync::mpsc;
use tokio_postgres::SimpleQueryMessage;

#[tokio::test(flavor = "multi_thread")]
async fn inserts_updates_and_deletes_are_streamed_as_records() {
    init_test_tracing();
    let database = TestDatabase::new().await.unwrap();
    database.create_table("users").await.unwrap();

    let suffix: u32 = random();
    let slot = format!("streamslot_{suffix}");
    let publication = format!("streampub_{suffix}");

    let mut endpoint = database.endpoint_config(Some(&slot), Some(&publication));
    endpoint.tables = vec!["users".to_string()];
    prepare(&endpoint).await.unwrap();

    let source_config = SourceConfig {
        endpoint: endpoint.clone(),
        table_keys: HashMap::from([("users".to_string(), "id".to_string())]),
        record_buffer_size: 16,
        position: None,
    };

    let client = database.client();
    client
        .simple_query("insert into users (id, name) values (1, 'ada')")
        .await
        .unwrap();
    client
        .simple_query("update users set name = 'grace' where id = 1")
        .await
        .unwrap();
    client
        .simple_query("delete from users where id = 1")
        .await
        .unwrap();

    let (records_tx, mut records_rx) = mpsc::channel(source_config.record_buffer_size);
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let handler = CdcHandler::new(
        source_config.table_keys.clone(),
        records_tx,
        shutdown_tx.subscribe(),
    );

    let replication_client = PgReplicationClient::connect(&endpoint).await.unwrap();
    let apply_config = source_config.clone();
    let apply_loop = tokio::spawn(async move {
        start_apply_loop(replication_client, &apply_config, handler, shutdown_rx).await
    });

    let mut records = Vec::new();
    while records.len() < 3 {
        let record = tokio::time::timeout(Duration::from_secs(30), records_rx.recv())
            .await
            .expect("timed out waiting for records")
            .expect("record channel closed");
        records.push(record);
    }

    shutdown_tx.shutdown();
    apply_loop.await.unwrap().unwrap();

    let operations = records.iter().map(|r| r.operation).collect::<Vec<_>>();
    assert_eq!(
        operations,
        vec![Operation::Create, Operation::Update, Operation::Delete]
    );

    for record in &records {
        assert_eq!(record.collection(), "users");
        assert_eq!(record.key.get("id"), Some(&Cell::I32(1)));
    }

    assert_eq!(
        records[0].payload.after.as_ref().unwrap().get("name"),
        Some(&Cell::String("ada".to_string()))
    );
    assert_eq!(
        records[1].payload.after.as_ref().unwrap().get("name"),
        Some(&Cell::String("grace".to_string()))
    );
    // Default replica identity: no before-image with all columns is logged for updates.
    assert!(records[1].payload.before.is_none());
    assert!(records[2].payload.after.is_none());

    let positions = records
        .iter()
        .map(|r| decode_cdc_position(&r.position).unwrap())
        .collect::<Vec<_>>();
    assert!(positions.windows(2).all(|pair| pair[0] <= pair[1]));

    cleanup(&endpoint).await.unwrap();
    database.drop_database().await.unwrap();
}

/// Waits until no walsender uses `slot`, so a new session can start from it.
async fn wait_for_inactive_slot(client: &tokio_postgres::Client, slot: &str) {
    let query = format!("select active from pg_replication_slots where slot_name = '{slot}'");
    for _ in 0..50 {
        let messages = client.simple_query(&query).await.unwrap();
        let active = messages.iter().any(|message| {
            matches!(message, SimpleQueryMessage::Row(row) if row.get("active") == Some("t"))
        });
        if !active {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("replication slot {slot} stayed active");
}

/// Runs one acknowledged streaming session and returns the first record it delivers.
async fn stream_first_record(source_config: &SourceConfig, acknowledge: bool) -> Record {
    let (records_tx, mut records_rx) = mpsc::channel(source_config.record_buffer_size);
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let (ack_tx, ack_rx) = create_ack_channel();
    let handler = CdcHandler::new(
        source_config.table_keys.clone(),
        records_tx,
        shutdown_tx.subscribe(),
    );

    let client = PgReplicationClient::connect(&source_config.endpoint)
        .await
        .unwrap();
    let apply_config = source_config.clone();
    let apply_loop = tokio::spawn(async move {
        start_apply_loop_with_acks(client, &apply_config, handler, shutdown_rx, ack_rx).await
    });

    let record = tokio::time::timeout(Duration::from_secs(30), records_rx.recv())
        .await
        .expect("timed out waiting for a record")
        .expect("record channel closed");
    if acknowledge {
        ack_tx.acknowledge_record(&record).unwrap();
    }

    shutdown_tx.shutdown();
    drop(records_rx);
    apply_loop.await.unwrap().unwrap();

    record
}

#[tokio::test(flavor = "multi_thread")]
async fn unacknowledged_records_are_delivered_again() {
    init_test_tracing();
    let database = TestDatabase::new().await.unwrap();
    database.create_table("users").await.unwrap();

    let suffix: u32 = random();
    let slot = format!("ackslot_{suffix}");
    let publication = format!("ackpub_{suffix}");

    let mut endpoint = database.endpoint_config(Some(&slot), Some(&publication));
    endpoint.tables = vec!["users".to_string()];
    prepare(&endpoint).await.unwrap();

    let source_config = SourceConfig {
        endpoint: endpoint.clone(),
        table_keys: HashMap::from([("users".to_string(), "id".to_string())]),
        record_buffer_size: 16,
        position: None,
    };

    let client = PgReplicationClient::connect(&endpoint).await.unwrap();
    let initial_lsn = client.get_slot(&slot).await.unwrap().confirmed_flush_lsn;

    database
        .client()
        .simple_query("insert into users (id, name) values (1, 'ada')")
        .await
        .unwrap();

    let first = stream_first_record(&source_config, false).await;
    wait_for_inactive_slot(database.client(), &slot).await;
    assert_eq!(
        client.get_slot(&slot).await.unwrap().confirmed_flush_lsn,
        initial_lsn
    );

    let second = stream_first_record(&source_config, true).await;
    assert_eq!(second.operation, Operation::Create);
    assert_eq!(second.position, first.position);

    // The server applies the final status update asynchronously.
    let acknowledged_lsn = decode_cdc_position(&second.position).unwrap();
    let mut confirmed_lsn = initial_lsn;
    for _ in 0..50 {
        confirmed_lsn = client.get_slot(&slot).await.unwrap().confirmed_flush_lsn;
        if confirmed_lsn == acknowledged_lsn {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(confirmed_lsn, acknowledged_lsn);

    drop(client);
    cleanup(&endpoint).await.unwrap();
    database.drop_database().await.unwrap();
}
