use goodforme_core::{
    Persistable, PersistentStore, StoreConfig, StoreError, UserActivity, DAY_MS,
};
use std::time::Duration;

fn memory_store() -> PersistentStore {
    PersistentStore::open_in_memory().unwrap()
}

#[test]
fn saved_value_is_fetched_with_storage_id_after_commit() {
    let mut store = memory_store();
    let run = UserActivity::new("Run");

    store.save(&run).unwrap();
    assert!(store.fetch_all::<UserActivity>().is_empty());

    let report = store.commit().unwrap();
    let fetched = store.fetch_all::<UserActivity>();

    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].name(), "Run");
    assert!(fetched[0].dates().is_empty());
    assert_eq!(fetched[0].id(), run.id());
    assert!(fetched[0].storage_id().is_some());
    assert_eq!(report.storage_id_for(run.id()), fetched[0].storage_id());
    assert!(report.touches("user_activity"));
}

#[test]
fn create_returns_detached_blank_record() {
    let store = memory_store();
    let record = store.create::<UserActivity>();

    assert!(record.storage_id().is_none());
    assert_eq!(record.family(), "user_activity");
    assert_eq!(record.text("name").unwrap(), "");
    assert!(record.integer_list("dates").unwrap().is_empty());
    assert!(!store.has_pending());
}

#[test]
fn saving_unpersisted_value_twice_keeps_one_record() {
    let mut store = memory_store();
    let run = UserActivity::new("Run");

    store.save(&run).unwrap();
    store.save(&run.renamed("Run far")).unwrap();
    assert_eq!(store.pending_len(), 1);
    store.commit().unwrap();

    // still no StorageId on the caller's copy: matched by LogicalId
    store.save(&run.with_date(DAY_MS)).unwrap();
    store.commit().unwrap();

    let fetched = store.fetch_all::<UserActivity>();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].name(), "Run");
    assert_eq!(fetched[0].dates(), &[DAY_MS]);
}

#[test]
fn save_with_storage_id_overwrites_every_field() {
    let mut store = memory_store();
    store.save(&UserActivity::new("Read")).unwrap();
    store.commit().unwrap();

    let stored = store.fetch_all::<UserActivity>().remove(0);
    let changed = stored.renamed("Read more").with_date(2 * DAY_MS);
    store.save(&changed).unwrap();
    let report = store.commit().unwrap();

    assert_eq!(report.updated, vec![stored.storage_id().unwrap()]);
    assert!(report.created.is_empty());
    assert_eq!(store.fetch_all::<UserActivity>(), vec![changed]);
}

#[test]
fn unchanged_save_queues_nothing() {
    let mut store = memory_store();
    store.save(&UserActivity::new("Swim")).unwrap();
    store.commit().unwrap();

    let stored = store.fetch_all::<UserActivity>().remove(0);
    store.save(&stored).unwrap();

    assert!(!store.has_pending());
    assert!(store.commit().unwrap().is_empty());
}

#[test]
fn commit_without_pending_changes_is_a_no_op() {
    let mut store = memory_store();
    let report = store.commit().unwrap();
    assert!(report.is_empty());
    assert!(report.families.is_empty());
}

#[test]
fn delete_without_storage_id_is_a_no_op() {
    let mut store = memory_store();
    store.delete(&UserActivity::new("Ghost")).unwrap();
    assert!(!store.has_pending());
}

#[test]
fn delete_removes_committed_record_and_is_idempotent_while_pending() {
    let mut store = memory_store();
    store.save(&UserActivity::new("Run")).unwrap();
    store.save(&UserActivity::new("Read")).unwrap();
    store.commit().unwrap();

    let fetched = store.fetch_all::<UserActivity>();
    store.delete(&fetched[0]).unwrap();
    store.delete(&fetched[0]).unwrap();
    assert_eq!(store.pending_len(), 1);

    let report = store.commit().unwrap();
    assert_eq!(report.deleted, vec![fetched[0].storage_id().unwrap()]);
    assert_eq!(store.fetch_all::<UserActivity>(), vec![fetched[1].clone()]);

    let err = store.delete(&fetched[0]).unwrap_err();
    assert!(matches!(err, StoreError::RecordNotFound { .. }));
}

#[test]
fn fetch_by_logical_id_reads_committed_state_only() {
    let mut store = memory_store();
    let run = UserActivity::new("Run");
    store.save(&run).unwrap();
    assert!(store
        .fetch_by_logical_id::<UserActivity>(run.id())
        .unwrap()
        .is_none());

    store.commit().unwrap();
    let fetched = store
        .fetch_by_logical_id::<UserActivity>(run.id())
        .unwrap()
        .unwrap();
    assert_eq!(fetched.name(), "Run");
}

#[test]
fn failed_commit_keeps_pending_changes_for_retry() {
    let mut store = memory_store();
    store
        .connection()
        .execute_batch(
            "CREATE TRIGGER block_inserts BEFORE INSERT ON records
             BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
        )
        .unwrap();

    store.save(&UserActivity::new("Run")).unwrap();
    let err = store.commit().unwrap_err();
    assert!(matches!(err, StoreError::Commit(_)));
    assert_eq!(err.code(), "store_commit_failed");
    assert_eq!(store.pending_len(), 1);
    assert!(store.fetch_all::<UserActivity>().is_empty());

    store
        .connection()
        .execute_batch("DROP TRIGGER block_inserts;")
        .unwrap();
    let report = store.commit().unwrap();
    assert_eq!(report.created.len(), 1);
    assert!(!store.has_pending());
    assert_eq!(store.fetch_all::<UserActivity>().len(), 1);
}

#[test]
fn commit_blocked_by_another_writer_is_retryable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contended.sqlite3");
    let mut config = StoreConfig::file(&path);
    config.busy_timeout = Duration::from_millis(10);
    let mut store = PersistentStore::open(config).unwrap();
    store.save(&UserActivity::new("Run")).unwrap();

    let other = rusqlite::Connection::open(&path).unwrap();
    other.execute_batch("BEGIN EXCLUSIVE;").unwrap();
    let err = store.commit().unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.code(), "store_commit_failed");
    assert_eq!(store.pending_len(), 1);

    other.execute_batch("ROLLBACK;").unwrap();
    assert_eq!(store.commit().unwrap().created.len(), 1);
}

#[test]
fn constraint_failure_is_not_retryable() {
    let mut store = memory_store();
    store
        .connection()
        .execute_batch(
            "CREATE TRIGGER block_inserts BEFORE INSERT ON records
             BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
        )
        .unwrap();

    store.save(&UserActivity::new("Run")).unwrap();
    assert!(!store.commit().unwrap_err().is_retryable());
}

#[test]
fn failed_commit_is_all_or_nothing() {
    let mut store = memory_store();
    store.save(&UserActivity::new("Run")).unwrap();
    store.commit().unwrap();
    let run = store.fetch_all::<UserActivity>().remove(0);

    store
        .connection()
        .execute_batch(
            "CREATE TRIGGER block_inserts BEFORE INSERT ON records
             BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
        )
        .unwrap();
    store.save(&run.renamed("Run fast")).unwrap();
    store.save(&UserActivity::new("Read")).unwrap();
    assert!(store.commit().is_err());

    assert_eq!(store.fetch_all::<UserActivity>(), vec![run]);

    store.discard_pending();
    assert!(!store.has_pending());
}

#[test]
fn committed_state_survives_reopen_of_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::named(dir.path(), "goodforme");

    let mut store = PersistentStore::open(config.clone()).unwrap();
    store.save(&UserActivity::new("Run").with_date(DAY_MS)).unwrap();
    store.commit().unwrap();
    store.save(&UserActivity::new("Uncommitted")).unwrap();

    store.reopen().unwrap();
    assert!(!store.has_pending());
    let fetched = store.fetch_all::<UserActivity>();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].dates(), &[DAY_MS]);
    drop(store);

    let reopened = PersistentStore::open(config).unwrap();
    assert_eq!(reopened.fetch_all::<UserActivity>(), fetched);
}

#[test]
fn fetch_all_orders_by_creation() {
    let mut store = memory_store();
    for name in ["c", "a", "b"] {
        store.save(&UserActivity::new(name)).unwrap();
        store.commit().unwrap();
    }

    let names: Vec<String> = store
        .fetch_all::<UserActivity>()
        .iter()
        .map(|activity| activity.name().to_string())
        .collect();
    assert_eq!(names, vec!["c", "a", "b"]);
}
