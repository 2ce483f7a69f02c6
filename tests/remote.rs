use sea_orm::{ConnectOptions, Database};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use flowdesk::backend::factory;
use flowdesk::backend::{RelationalRemote, RemoteStore, StaticIdentity};
use flowdesk::config::Config;
use flowdesk::error::RemoteError;
use flowdesk::logger::Logger;
use flowdesk::records::{EntityType, Record};
use flowdesk::storage::LocalStorage;
use flowdesk::sync::{StorageMode, SyncService};

/// Remote store over a private in-memory SQLite database.
async fn sqlite_remote(identity: Arc<StaticIdentity>) -> RelationalRemote {
    // One pooled connection, so every query sees the same in-memory database
    let mut options = ConnectOptions::new("sqlite::memory:".to_string());
    options.max_connections(1).min_connections(1).sqlx_logging(false);
    let conn = Database::connect(options).await.unwrap();
    RelationalRemote::from_connection(conn, identity, Duration::from_secs(5))
}

fn owner(id: &str) -> Arc<StaticIdentity> {
    Arc::new(StaticIdentity::new(Some(id.to_string())))
}

#[tokio::test]
async fn test_upsert_and_fetch() {
    let remote = sqlite_remote(owner("alice")).await;
    assert_eq!(remote.backend_type(), "sqlite");

    let record = Record::with_id("t1", EntityType::Task, json!({"title": "Write report", "done": false}));
    let stored = remote.upsert(EntityType::Task, record).await.unwrap();
    assert_eq!(stored.owner_id.as_deref(), Some("alice"));

    let fetched = remote.fetch(EntityType::Task, "t1").await.unwrap();
    assert_eq!(fetched.id, "t1");
    assert_eq!(fetched.entity_type, EntityType::Task);
    assert_eq!(fetched.payload, json!({"title": "Write report", "done": false}));
    assert_eq!(fetched.owner_id.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_upsert_replaces_existing_record() {
    let remote = sqlite_remote(owner("alice")).await;

    for title in ["draft", "final"] {
        remote
            .upsert(EntityType::Task, Record::with_id("t1", EntityType::Task, json!({"title": title})))
            .await
            .unwrap();
    }

    assert_eq!(remote.count(EntityType::Task).await.unwrap(), 1);
    let fetched = remote.fetch(EntityType::Task, "t1").await.unwrap();
    assert_eq!(fetched.payload, json!({"title": "final"}));
}

#[tokio::test]
async fn test_entity_types_are_separate() {
    let remote = sqlite_remote(owner("alice")).await;
    remote
        .upsert(EntityType::Task, Record::with_id("x", EntityType::Task, json!({})))
        .await
        .unwrap();
    remote
        .upsert(EntityType::Session, Record::with_id("x", EntityType::Session, json!({"minutes": 25})))
        .await
        .unwrap();

    assert_eq!(remote.count(EntityType::Task).await.unwrap(), 1);
    assert_eq!(remote.count(EntityType::Session).await.unwrap(), 1);
    assert_eq!(remote.list(EntityType::Achievement).await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_records_are_scoped_to_owner() {
    let identity = owner("alice");
    let remote = sqlite_remote(identity.clone()).await;
    remote
        .upsert(EntityType::Task, Record::with_id("t1", EntityType::Task, json!({})))
        .await
        .unwrap();

    identity.set_owner(Some("bob".to_string()));
    assert!(remote.list(EntityType::Task).await.unwrap().is_empty());
    assert_eq!(remote.count(EntityType::Task).await.unwrap(), 0);
    assert!(matches!(
        remote.fetch(EntityType::Task, "t1").await,
        Err(RemoteError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_missing_owner_fails_fast() {
    let identity = Arc::new(StaticIdentity::new(None));
    let remote = sqlite_remote(identity).await;

    assert!(matches!(remote.probe().await, Err(RemoteError::Unauthenticated(_))));
    assert!(matches!(
        remote.list(EntityType::Task).await,
        Err(RemoteError::Unauthenticated(_))
    ));
    assert!(matches!(
        remote
            .upsert(EntityType::Task, Record::with_id("t1", EntityType::Task, json!({})))
            .await,
        Err(RemoteError::Unauthenticated(_))
    ));
}

#[tokio::test]
async fn test_delete() {
    let remote = sqlite_remote(owner("alice")).await;
    remote
        .upsert(EntityType::Achievement, Record::with_id("a1", EntityType::Achievement, json!({})))
        .await
        .unwrap();

    assert!(remote.delete(EntityType::Achievement, "a1").await.is_ok());
    assert!(matches!(
        remote.delete(EntityType::Achievement, "a1").await,
        Err(RemoteError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_malformed_payload_is_rejected() {
    let remote = sqlite_remote(owner("alice")).await;
    let err = remote
        .upsert(EntityType::Task, Record::with_id("t1", EntityType::Task, json!("just a string")))
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteError::Validation(_)));
    assert!(!err.triggers_fallback());
}

#[tokio::test]
async fn test_probe_on_fresh_database() {
    let remote = sqlite_remote(owner("alice")).await;
    assert!(remote.probe().await.is_ok());
    assert!(remote.probe().await.is_ok());
}

#[tokio::test]
async fn test_service_over_relational_remote() {
    let remote: Arc<dyn RemoteStore> = Arc::new(sqlite_remote(owner("alice")).await);
    let local = LocalStorage::in_memory();
    let service = SyncService::new(&Default::default(), local.clone(), Some(remote.clone()), Logger::new()).await;
    assert_eq!(service.current_mode(), StorageMode::Remote);

    let sessions = service.entity(EntityType::Session);
    let written = sessions
        .write(Record::with_id("s1", EntityType::Session, json!({"minutes": 50})))
        .await
        .unwrap();
    assert_eq!(written.owner_id.as_deref(), Some("alice"));

    let read = sessions.read("s1").await.unwrap().unwrap();
    assert_eq!(read.payload, json!({"minutes": 50}));
    assert!(local.get(EntityType::Session, "s1").unwrap().is_none());
    assert_eq!(remote.count(EntityType::Session).await.unwrap(), 1);
}

#[tokio::test]
async fn test_migration_into_relational_remote() {
    let remote: Arc<dyn RemoteStore> = Arc::new(sqlite_remote(owner("alice")).await);
    let local = LocalStorage::in_memory();
    for i in 0..3 {
        local
            .put(EntityType::Task, Record::with_id(format!("t{i}"), EntityType::Task, json!({"n": i})))
            .unwrap();
    }
    let service = SyncService::new(&Default::default(), local, Some(remote.clone()), Logger::new()).await;

    let first = service.migrate(None).await.unwrap();
    let second = service.migrate(None).await.unwrap();
    assert!(first.success && second.success);
    assert_eq!(remote.count(EntityType::Task).await.unwrap(), 3);

    let report = service.validate_migration(&second, None).await.unwrap();
    assert!(report.is_consistent());
}

#[tokio::test]
async fn test_factory_without_database_url_is_local_only() {
    let mut config = Config::default();
    config.remote.database_url_env = "FLOWDESK_TEST_DATABASE_URL_NEVER_SET".to_string();
    config.remote.owner_id_env = "FLOWDESK_TEST_OWNER_NEVER_SET".to_string();

    let identity = factory::identity_from_config(&config);
    assert!(flowdesk::backend::IdentityProvider::current_owner(identity.as_ref()).is_none());

    let remote = factory::connect_remote(&config, identity).await.unwrap();
    assert!(remote.is_none());
}
