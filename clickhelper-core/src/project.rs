//! Project engine: walks a project's publications in configuration order and runs its backup.
//!
//! A failing publication never stops its siblings, and the backup runs regardless of how the
//! publications fared. Retention is only evaluated after a new archive has landed in the object
//! store, so a failed backup never prunes the previous good ones.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::error::ActionError;
use crate::model::{ActionOutcome, Failure, FailureKind, Project};
use crate::poll::wait_for_task;
use crate::publication::execute_publication;
use crate::report::{BackupOutcome, InvalidPublication, ProjectOutcome};
use crate::retention;
use crate::workflow::{RunContext, Step};

/// Platform storage folder the backup archives are written to.
pub const BACKUP_STORAGE_DIR: &str = "Storage/Backups";

/// Run every publication of `project`, appending the results to `outcome`.
pub async fn execute_publications(
    ctx: &RunContext<'_>,
    project: &Project,
    outcome: &mut ProjectOutcome,
) {
    info!(
        project_id = %project.project_id,
        name = %project.display_name(),
        publications = project.publications.len(),
        "[PUBLICATION] Processing project"
    );

    for publication in &project.publications {
        if !publication.is_valid() {
            warn!(
                project_id = %project.project_id,
                publication_id = %publication.id(),
                "[PUBLICATION] Publication has no update, visibility or output_tags; excluded from execution"
            );
            outcome.invalid.push(InvalidPublication {
                project_id: project.project_id.clone(),
                publication_id: publication.id().to_string(),
                reason: "no update, visibility or output_tags configured".into(),
            });
            continue;
        }

        let result = execute_publication(ctx, &project.project_id, publication).await;
        if !result.actions.is_empty() {
            outcome.publications.push(result);
        }
    }
}

/// Run the whole project: publications first, then the backup when the run includes one.
///
/// [`run_workflow`](crate::workflow::run_workflow) does not call this; it runs the same two
/// halves as separate phases across all projects, so every publish lands before any backup.
pub async fn execute_project(ctx: &RunContext<'_>, project: &Project) -> ProjectOutcome {
    let mut outcome = ProjectOutcome::new(&project.project_id);
    if ctx.workflow.runs_publications() {
        execute_publications(ctx, project, &mut outcome).await;
    }
    if ctx.enables(Step::Backup) && ctx.retention.is_some() {
        outcome.backup = Some(backup_project(ctx, project).await);
    }
    outcome
}

/// Archive name for a backup taken at `at`, e.g. `docs-backup-20240102T030405Z.zip`.
pub fn backup_file_name(project_id: &str, at: DateTime<Utc>) -> String {
    format!("{project_id}-backup-{}.zip", at.format("%Y%m%dT%H%M%SZ"))
}

/// Object-store key prefix shared by every archive of `project`, and by nothing else.
pub fn backup_key_prefix(project: &Project) -> String {
    format!("{}/{}-backup-", project.backup_folder(), project.project_id)
}

/// Back up one project into the object store, then prune its old backups.
pub async fn backup_project(ctx: &RunContext<'_>, project: &Project) -> BackupOutcome {
    let mut outcome = BackupOutcome {
        project_id: project.project_id.clone(),
        key: None,
        outcome: ActionOutcome::Pending,
        retention: None,
        warnings: Vec::new(),
    };

    let (Some(store), Some(policy)) = (ctx.services.store, ctx.retention) else {
        outcome.outcome = ActionOutcome::Skipped("object-store backup not enabled".into());
        return outcome;
    };

    let file_name = backup_file_name(&project.project_id, ctx.services.clock.utc_now());
    let key = format!("{}/{}", project.backup_folder(), file_name);

    info!(
        project_id = %project.project_id,
        %key,
        "[BACKUP] Starting project backup"
    );

    let bytes = match archive_project(ctx, project, &file_name, &mut outcome.warnings).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(project_id = %project.project_id, error = %e, "[BACKUP] Backup failed");
            outcome.outcome = ActionOutcome::Failed(Failure::from(&e));
            return outcome;
        }
    };
    let size = bytes.len();

    if let Err(e) = store.put_object(&key, bytes).await {
        error!(project_id = %project.project_id, %key, error = %e, "[BACKUP] Upload to object store failed");
        outcome.outcome = ActionOutcome::Failed(Failure::from(ActionError::from(e)));
        return outcome;
    }
    info!(project_id = %project.project_id, %key, size, "[BACKUP] Backup stored");
    outcome.key = Some(key.clone());

    let prefix = backup_key_prefix(project);
    match retention::enforce(store, &prefix, policy).await {
        Ok(report) if !report.failed.is_empty() => {
            let undeleted: Vec<&str> = report.failed.iter().map(|f| f.key.as_str()).collect();
            error!(
                project_id = %project.project_id,
                retention_count = report.retention_count,
                ?undeleted,
                "[BACKUP] Retention limit not enforced"
            );
            outcome.outcome = ActionOutcome::Failed(Failure::new(
                FailureKind::Remote,
                format!(
                    "backup stored as {key}, but {} old backup(s) could not be deleted: {}",
                    report.failed.len(),
                    report
                        .failed
                        .iter()
                        .map(|f| format!("{} ({})", f.key, f.error))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ));
            outcome.retention = Some(report);
        }
        Ok(report) => {
            outcome.retention = Some(report);
            outcome.outcome = ActionOutcome::Succeeded(format!("stored as {key}"));
        }
        Err(e) => {
            error!(project_id = %project.project_id, %prefix, error = %e, "[BACKUP] Retention failed");
            outcome.outcome = ActionOutcome::Failed(Failure::new(
                FailureKind::Remote,
                format!("backup stored as {key}, but retention failed: {e}"),
            ));
        }
    }
    outcome
}

/// Ask the platform for an archive, wait for it, and pull it out of platform storage.
async fn archive_project(
    ctx: &RunContext<'_>,
    project: &Project,
    file_name: &str,
    warnings: &mut Vec<String>,
) -> Result<Vec<u8>, ActionError> {
    let platform = ctx.services.platform;
    let storage_path = format!("{BACKUP_STORAGE_DIR}/{file_name}");

    let handle = platform
        .start_backup(&project.project_id, &storage_path)
        .await?;
    wait_for_task(
        ctx.services.clock,
        ctx.settings.poll_policy(),
        &handle.task_id,
        "backup",
        || platform.get_task_status(&handle.task_id),
    )
    .await?;

    let bytes = platform.download_storage_file(&storage_path).await?;
    info!(
        project_id = %project.project_id,
        path = %storage_path,
        size = bytes.len(),
        "[BACKUP] Downloaded archive from platform storage"
    );

    if let Err(e) = platform.delete_storage_file(&storage_path).await {
        warn!(path = %storage_path, error = %e, "[BACKUP] Could not remove archive from platform storage");
        warnings.push(format!("archive left in platform storage at {storage_path}: {e}"));
    }
    Ok(bytes)
}
