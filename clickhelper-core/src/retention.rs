//! Count-based retention over the backup objects of one project.
//!
//! The retained set is always the `retention_count` most recently modified archives of one
//! project. Archives are matched by their key prefix, `{folder}/{project_id}-backup-`, and a key
//! with a further `/` after that prefix belongs to someone else. Equal timestamps are ordered by key, lexicographically greater first, so the
//! outcome is deterministic. Every pass starts from a fresh listing; running it again without new
//! uploads deletes nothing.

use std::num::NonZeroUsize;

use serde::Serialize;
use tracing::{error, info};

use crate::contract::{BackupObject, ObjectStore};
use crate::error::{RetentionConfigError, RetentionError};

/// A validated, strictly positive retention count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    keep: NonZeroUsize,
}

impl RetentionPolicy {
    /// Rejects zero and negative counts instead of treating them as "delete everything".
    pub fn new(retention_count: i64) -> Result<Self, RetentionConfigError> {
        usize::try_from(retention_count)
            .ok()
            .and_then(NonZeroUsize::new)
            .map(|keep| Self { keep })
            .ok_or(RetentionConfigError(retention_count))
    }

    pub fn keep(&self) -> usize {
        self.keep.get()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDeletion {
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub prefix: String,
    pub retention_count: usize,
    pub kept: Vec<String>,
    pub deleted: Vec<String>,
    pub failed: Vec<FailedDeletion>,
}

/// Split objects into `(keep, evict)`: newest first, the first `keep` retained.
pub fn partition_backups(
    mut objects: Vec<BackupObject>,
    keep: usize,
) -> (Vec<BackupObject>, Vec<BackupObject>) {
    objects.sort_by(|a, b| {
        b.last_modified
            .cmp(&a.last_modified)
            .then_with(|| b.key.cmp(&a.key))
    });
    let evict = objects.split_off(keep.min(objects.len()));
    (objects, evict)
}

/// Validate `retention_count`, then enforce it over the archives matching `prefix`.
///
/// Validation happens before the store is touched, so a bad count never lists or deletes.
pub async fn enforce_retention(
    store: &dyn ObjectStore,
    prefix: &str,
    retention_count: i64,
) -> Result<DeletionReport, RetentionError> {
    let policy = RetentionPolicy::new(retention_count)?;
    enforce(store, prefix, policy).await
}

pub async fn enforce(
    store: &dyn ObjectStore,
    prefix: &str,
    policy: RetentionPolicy,
) -> Result<DeletionReport, RetentionError> {
    info!(prefix, retention_count = policy.keep(), "[RETENTION] Enforcing backup retention");

    let objects: Vec<BackupObject> = store
        .list_backup_objects(prefix)
        .await
        .map_err(|e| {
            error!(prefix, error = %e, "[RETENTION] Failed to list backups");
            e
        })?
        .into_iter()
        .filter(|object| {
            object
                .key
                .strip_prefix(prefix)
                .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
        })
        .collect();

    let found = objects.len();
    let (keep, evict) = partition_backups(objects, policy.keep());
    let mut report = DeletionReport {
        prefix: prefix.to_string(),
        retention_count: policy.keep(),
        kept: keep.into_iter().map(|object| object.key).collect(),
        ..Default::default()
    };

    if evict.is_empty() {
        info!(prefix, found, "[RETENTION] Nothing to delete");
        return Ok(report);
    }

    info!(prefix, found, evicting = evict.len(), "[RETENTION] Deleting old backups");
    for object in evict {
        match store.delete_object(&object.key).await {
            Ok(()) => {
                info!(key = %object.key, last_modified = %object.last_modified, "[RETENTION] Deleted old backup");
                report.deleted.push(object.key);
            }
            Err(e) => {
                error!(key = %object.key, error = %e, "[RETENTION] Failed to delete old backup");
                report.failed.push(FailedDeletion {
                    key: object.key,
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        prefix,
        deleted = report.deleted.len(),
        failed = report.failed.len(),
        "[RETENTION] Retention pass complete"
    );
    Ok(report)
}
