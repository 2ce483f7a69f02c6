use serde_json::json;

use flowdesk::error::LocalError;
use flowdesk::records::{EntityType, Record};
use flowdesk::storage::LocalStorage;

#[test]
fn test_records_survive_reopening_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    {
        let storage = LocalStorage::open(dir.path(), None).unwrap();
        storage
            .put(EntityType::Task, Record::with_id("t1", EntityType::Task, json!({"title": "Plan week"})))
            .unwrap();
        storage
            .put(EntityType::Session, Record::with_id("s1", EntityType::Session, json!({"minutes": 25})))
            .unwrap();
    }

    let reopened = LocalStorage::open(dir.path(), None).unwrap();
    let task = reopened.get(EntityType::Task, "t1").unwrap().unwrap();
    assert_eq!(task.payload, json!({"title": "Plan week"}));
    assert_eq!(reopened.count(EntityType::Session).unwrap(), 1);
    assert!(dir.path().join("flowdesk_task.json").exists());
}

#[test]
fn test_corrupted_file_reads_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("flowdesk_achievement.json"), "[{\"id\":").unwrap();

    let storage = LocalStorage::open(dir.path(), None).unwrap();
    assert!(storage.list(EntityType::Achievement).unwrap().is_empty());

    // The next write replaces the corrupted value
    storage
        .put(EntityType::Achievement, Record::with_id("a1", EntityType::Achievement, json!({})))
        .unwrap();
    assert_eq!(storage.count(EntityType::Achievement).unwrap(), 1);
}

#[test]
fn test_quota_exceeded_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let storage = LocalStorage::open(dir.path(), Some(64)).unwrap();

    let large = json!({"notes": "x".repeat(128)});
    let err = storage
        .put(EntityType::Task, Record::with_id("t1", EntityType::Task, large))
        .unwrap_err();
    assert!(matches!(err, LocalError::StorageUnavailable(_)));
    assert!(storage.get(EntityType::Task, "t1").unwrap().is_none());
}

#[test]
fn test_snapshot_and_typed_values() {
    let dir = tempfile::tempdir().unwrap();
    let storage = LocalStorage::open(dir.path(), None).unwrap();
    for id in ["t1", "t2"] {
        storage
            .put(EntityType::Task, Record::with_id(id, EntityType::Task, json!({})))
            .unwrap();
    }
    storage.set_value("onboarding_done", &true).unwrap();

    let snapshot = storage.export_snapshot().unwrap();
    assert_eq!(snapshot.entities.len(), EntityType::ALL.len());
    assert_eq!(snapshot.count(EntityType::Task), 2);
    assert_eq!(snapshot.total_records(), 2);

    assert!(storage.get_value::<bool>("onboarding_done").unwrap());
    assert!(!storage.get_value::<bool>("never_written").unwrap());

    assert!(storage.delete(EntityType::Task, "t1").unwrap());
    assert!(!storage.delete(EntityType::Task, "t1").unwrap());
    storage.clear(EntityType::Task).unwrap();
    assert_eq!(storage.count(EntityType::Task).unwrap(), 0);
}

#[test]
fn test_values_do_not_shadow_entity_records() {
    let dir = tempfile::tempdir().unwrap();
    let storage = LocalStorage::open(dir.path(), None).unwrap();
    storage
        .put(EntityType::Task, Record::with_id("t1", EntityType::Task, json!({"title": "Keep me"})))
        .unwrap();

    storage.set_value("task", &vec![1, 2, 3]).unwrap();
    assert_eq!(storage.get_value::<Vec<u32>>("task").unwrap(), vec![1, 2, 3]);
    assert_eq!(storage.count(EntityType::Task).unwrap(), 1);
    assert_eq!(
        storage.get(EntityType::Task, "t1").unwrap().unwrap().payload,
        json!({"title": "Keep me"})
    );
    assert!(dir.path().join("flowdesk_value_task.json").exists());
}
