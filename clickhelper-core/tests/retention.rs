use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use clickhelper_core::contract::{BackupObject, MockObjectStore, ObjectStore};
use clickhelper_core::error::{RemoteError, RetentionConfigError, RetentionError};
use clickhelper_core::retention::{enforce_retention, partition_backups, RetentionPolicy};

/// Object store kept in memory, so repeated passes see the effect of earlier deletes.
#[derive(Default)]
struct MemoryStore {
    objects: Mutex<Vec<BackupObject>>,
    undeletable: Vec<String>,
}

impl MemoryStore {
    fn with_objects(objects: Vec<BackupObject>) -> Self {
        Self {
            objects: Mutex::new(objects),
            undeletable: Vec::new(),
        }
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .map(|o| o.key.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_backup_objects(&self, prefix: &str) -> Result<Vec<BackupObject>, RemoteError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn put_object(&self, key: &str, _bytes: Vec<u8>) -> Result<(), RemoteError> {
        self.objects.lock().unwrap().push(BackupObject {
            key: key.to_string(),
            last_modified: Utc::now(),
        });
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), RemoteError> {
        if self.undeletable.iter().any(|k| k == key) {
            return Err(RemoteError::Status {
                status: 403,
                body: "AccessDenied".into(),
            });
        }
        self.objects.lock().unwrap().retain(|o| o.key != key);
        Ok(())
    }
}

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

/// `count` backups under `folder/`, one day apart; day 0 is the oldest.
fn daily_backups(folder: &str, count: i64) -> Vec<BackupObject> {
    (0..count)
        .map(|day| BackupObject {
            key: format!("{folder}/{folder}-backup-day{day:02}.zip"),
            last_modified: base() + Duration::days(day),
        })
        .collect()
}

#[tokio::test]
async fn deletes_exactly_the_oldest_excess_backups() {
    let store = MemoryStore::with_objects(daily_backups("docs", 7));

    let report = enforce_retention(&store, "docs/docs-backup-", 3).await.unwrap();

    assert_eq!(report.deleted.len(), 4);
    assert!(report.failed.is_empty());
    for day in 0..4 {
        assert!(report
            .deleted
            .contains(&format!("docs/docs-backup-day{day:02}.zip")));
    }
    assert_eq!(
        store.keys(),
        vec![
            "docs/docs-backup-day04.zip",
            "docs/docs-backup-day05.zip",
            "docs/docs-backup-day06.zip",
        ]
    );
}

#[tokio::test]
async fn second_pass_without_new_uploads_deletes_nothing() {
    let store = MemoryStore::with_objects(daily_backups("docs", 5));

    let first = enforce_retention(&store, "docs/docs-backup-", 2).await.unwrap();
    let second = enforce_retention(&store, "docs/docs-backup-", 2).await.unwrap();

    assert_eq!(first.deleted.len(), 3);
    assert!(second.deleted.is_empty());
    assert_eq!(second.kept.len(), 2);
}

#[tokio::test]
async fn fewer_backups_than_the_limit_is_a_no_op() {
    let store = MemoryStore::with_objects(daily_backups("docs", 2));

    let report = enforce_retention(&store, "docs/docs-backup-", 30).await.unwrap();

    assert!(report.deleted.is_empty());
    assert_eq!(report.kept.len(), 2);
}

#[tokio::test]
async fn other_projects_are_never_touched() {
    let mut objects = daily_backups("docs", 4);
    objects.extend(daily_backups("docs-internal", 4));
    let store = MemoryStore::with_objects(objects);

    enforce_retention(&store, "docs/docs-backup-", 1).await.unwrap();

    let remaining = store.keys();
    assert_eq!(
        remaining
            .iter()
            .filter(|k| k.starts_with("docs-internal/"))
            .count(),
        4
    );
    assert_eq!(remaining.iter().filter(|k| k.starts_with("docs/")).count(), 1);
}

#[tokio::test]
async fn archives_outside_the_project_prefix_are_never_counted_or_deleted() {
    let mut store = MockObjectStore::new();
    store.expect_list_backup_objects().returning(|_| {
        let mut objects = daily_backups("docs", 3);
        objects.extend(
            daily_backups("internal", 3)
                .into_iter()
                .map(|mut o| {
                    o.key = format!("docs/{}", o.key);
                    o
                }),
        );
        objects.push(BackupObject {
            key: "docs/docs-backup-nested/old.zip".into(),
            last_modified: base() - Duration::days(30),
        });
        Ok(objects)
    });
    store
        .expect_delete_object()
        .withf(|key| key == "docs/docs-backup-day00.zip")
        .times(1)
        .returning(|_| Ok(()));

    let report = enforce_retention(&store, "docs/docs-backup-", 2).await.unwrap();

    assert_eq!(report.deleted, vec!["docs/docs-backup-day00.zip"]);
    assert_eq!(
        report.kept,
        vec!["docs/docs-backup-day02.zip", "docs/docs-backup-day01.zip"]
    );
}

#[tokio::test]
async fn failed_delete_is_recorded_and_the_rest_continue() {
    let mut store = MemoryStore::with_objects(daily_backups("docs", 4));
    store.undeletable = vec!["docs/docs-backup-day00.zip".into()];

    let report = enforce_retention(&store, "docs/docs-backup-", 1).await.unwrap();

    assert_eq!(report.deleted.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].key, "docs/docs-backup-day00.zip");
}

#[tokio::test]
async fn non_positive_count_is_rejected_before_touching_the_store() {
    for count in [0, -1, -30] {
        let mut store = MockObjectStore::new();
        store.expect_list_backup_objects().never();
        store.expect_delete_object().never();

        let err = enforce_retention(&store, "docs/docs-backup-", count).await.unwrap_err();

        assert!(matches!(
            err,
            RetentionError::Config(RetentionConfigError(c)) if c == count
        ));
    }
}

#[tokio::test]
async fn listing_failure_is_an_error() {
    let mut store = MockObjectStore::new();
    store
        .expect_list_backup_objects()
        .returning(|_| Err(RemoteError::Transport("connection reset".into())));
    store.expect_delete_object().never();

    let err = enforce_retention(&store, "docs/docs-backup-", 3).await.unwrap_err();

    assert!(matches!(err, RetentionError::Remote(_)));
}

#[test]
fn equal_timestamps_keep_the_greater_key() {
    let same = base();
    let objects = vec![
        BackupObject {
            key: "docs/a.zip".into(),
            last_modified: same,
        },
        BackupObject {
            key: "docs/c.zip".into(),
            last_modified: same,
        },
        BackupObject {
            key: "docs/b.zip".into(),
            last_modified: same,
        },
    ];

    let (keep, evict) = partition_backups(objects, 2);

    let keep: Vec<_> = keep.into_iter().map(|o| o.key).collect();
    let evict: Vec<_> = evict.into_iter().map(|o| o.key).collect();
    assert_eq!(keep, vec!["docs/c.zip", "docs/b.zip"]);
    assert_eq!(evict, vec!["docs/a.zip"]);
}

#[test]
fn policy_accepts_only_positive_counts() {
    assert_eq!(RetentionPolicy::new(1).unwrap().keep(), 1);
    assert_eq!(RetentionPolicy::new(0), Err(RetentionConfigError(0)));
    assert_eq!(RetentionPolicy::new(-5), Err(RetentionConfigError(-5)));
}
