use logrepl::error::ErrorKind;
use logrepl::replication::client::PgReplicationClient;
use logrepl::replication::endpoints::{
    PublicationOptions, ReplicationEndpoints, cleanup, cleanup_endpoints,
};
use logrepl::test_utils::database::TestDatabase;
use rand::random;
use telemetry::tracing::init_test_tracing;

/// Returns names unique across test runs, since slots are shared by the whole server.
fn endpoint_names(index: u8) -> (String, String) {
    let suffix: u32 = random();
    (
        format!("cleanupslot{index}_{suffix}"),
        format!("cleanuppub{index}_{suffix}"),
    )
}

async fn create_publication(client: &PgReplicationClient, name: &str) {
    let options = PublicationOptions::new(vec!["users".to_string()], vec![]);
    client.create_publication(name, &options).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn cleanup_drops_existing_slot_and_publication() {
    init_test_tracing();
    let database = TestDatabase::new().await.unwrap();
    database.create_table("users").await.unwrap();
    let (slot, publication) = endpoint_names(1);

    let config = database.endpoint_config(Some(&slot), Some(&publication));
    let client = PgReplicationClient::connect(&config).await.unwrap();
    create_publication(&client, &publication).await;
    client.create_slot(&slot).await.unwrap();

    cleanup(&config).await.unwrap();

    assert!(!client.slot_exists(&slot).await.unwrap());
    assert!(!client.publication_exists(&publication).await.unwrap());

    drop(client);
    database.drop_database().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn cleanup_drops_publication_only() {
    init_test_tracing();
    let database = TestDatabase::new().await.unwrap();
    database.create_table("users").await.unwrap();
    let (_, publication) = endpoint_names(2);

    let config = database.endpoint_config(None, Some(&publication));
    let client = PgReplicationClient::connect(&config).await.unwrap();
    create_publication(&client, &publication).await;

    cleanup(&config).await.unwrap();

    assert!(!client.publication_exists(&publication).await.unwrap());

    drop(client);
    database.drop_database().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn cleanup_drops_slot_only() {
    init_test_tracing();
    let database = TestDatabase::new().await.unwrap();
    let (slot, _) = endpoint_names(3);

    let config = database.endpoint_config(Some(&slot), None);
    let client = PgReplicationClient::connect(&config).await.unwrap();
    client.create_slot(&slot).await.unwrap();

    cleanup(&config).await.unwrap();

    assert!(!client.slot_exists(&slot).await.unwrap());

    drop(client);
    database.drop_database().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn cleanup_reports_missing_slot() {
    init_test_tracing();
    let database = TestDatabase::new().await.unwrap();
    database.create_table("users").await.unwrap();
    let (slot, publication) = endpoint_names(4);

    let config = database.endpoint_config(Some(&slot), Some(&publication));
    let client = PgReplicationClient::connect(&config).await.unwrap();
    create_publication(&client, &publication).await;

    let err = cleanup_endpoints(&client, &config).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ReplicationSlotNotFound);
    assert!(
        err.to_string()
            .contains(&format!(r#"replication slot "{slot}" does not exist"#))
    );
    assert!(!client.publication_exists(&publication).await.unwrap());

    drop(client);
    database.drop_database().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn cleanup_ignores_missing_publication() {
    init_test_tracing();
    let database = TestDatabase::new().await.unwrap();
    let (slot, publication) = endpoint_names(5);

    let config = database.endpoint_config(Some(&slot), Some(&publication));
    let client = PgReplicationClient::connect(&config).await.unwrap();
    client.create_slot(&slot).await.unwrap();

    cleanup(&config).await.unwrap();

    assert!(!client.slot_exists(&slot).await.unwrap());

    drop(client);
    database.drop_database().await.unwrap();
}
