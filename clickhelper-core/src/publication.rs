//! Publication engine: reconciles a publication's existence on the platform, then executes its
//! actions in derived order.
//!
//! # Responsibilities
//! - Existence check against the run's shared snapshot (never a per-publication listing)
//! - Create when absent (failure is terminal for the publication), update when present
//!   (failure only marks the outcome degraded; the publish is still attempted)
//! - Strict action order with fail-fast: once an action fails, later ones are skipped
//! - Waiting on remote tasks through [`crate::poll::wait_for_task`]
//!
//! Nothing in here returns an error to the caller. Every failure ends up in the
//! [`PublicationOutcome`], so sibling publications are unaffected.

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::contract::{DocumentMetadata, ExportRequest, PublicationRequest, PublishRequest, TaskHandle};
use crate::error::ActionError;
use crate::model::{Action, ActionKind, ActionOutcome, Failure, FailureKind, Publication};
use crate::poll::wait_for_task;
use crate::report::{PublicationOutcome, Reconciliation};
use crate::workflow::{RunContext, SnapshotState, Step};

/// Execute the actions of `publication` that the run's workflow enables.
pub async fn execute_publication(
    ctx: &RunContext<'_>,
    project_id: &str,
    publication: &Publication,
) -> PublicationOutcome {
    let mut outcome = PublicationOutcome {
        project_id: project_id.to_string(),
        publication_id: publication.id().to_string(),
        title: publication.title().to_string(),
        reconciliation: Reconciliation::NotAttempted,
        degraded: false,
        actions: publication
            .actions()
            .iter()
            .copied()
            .filter(|kind| ctx.enables(Step::from(*kind)))
            .map(Action::pending)
            .collect(),
    };

    if outcome.actions.is_empty() {
        return outcome;
    }

    info!(
        project_id,
        publication_id = %publication.id(),
        title = %publication.title(),
        actions = outcome.actions.len(),
        "[PUBLICATION] Processing publication"
    );

    if ctx.enables(Step::Publish) {
        match reconcile(ctx, project_id, publication).await {
            Ok(reconciliation) => {
                outcome.degraded = matches!(reconciliation, Reconciliation::UpdateFailed(_));
                outcome.reconciliation = reconciliation;
            }
            Err(failure) => {
                error!(
                    project_id,
                    publication_id = %publication.id(),
                    %failure,
                    "[PUBLICATION] Publication could not be created; no action attempted"
                );
                for action in &mut outcome.actions {
                    action.outcome = match action.kind {
                        ActionKind::Publish => ActionOutcome::Failed(failure.clone()),
                        _ => ActionOutcome::Skipped("publication could not be created".into()),
                    };
                }
                outcome.reconciliation = Reconciliation::CreateFailed(failure);
                return outcome;
            }
        }
    }

    let export_in_run = outcome
        .actions
        .iter()
        .any(|action| action.kind == ActionKind::ExportPdf);
    let mut artifact: Option<PathBuf> = None;
    let mut failed: Option<ActionKind> = None;

    for action in &mut outcome.actions {
        if let Some(failed_kind) = failed {
            action.outcome = if action.kind == ActionKind::UploadTribble {
                ActionOutcome::Skipped(format!("no artifact ({failed_kind} failed)"))
            } else {
                ActionOutcome::Skipped(format!("{failed_kind} failed"))
            };
            continue;
        }

        let result = match action.kind {
            ActionKind::Publish => run_publish(ctx, project_id, publication).await,
            ActionKind::ExportPdf => run_export(ctx, project_id, publication, &mut artifact).await,
            ActionKind::UploadTribble => {
                run_upload(ctx, publication, artifact.as_deref(), export_in_run).await
            }
        };

        action.outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    project_id,
                    publication_id = %publication.id(),
                    action = %action.kind,
                    error = %e,
                    "[PUBLICATION] Action failed"
                );
                failed = Some(action.kind);
                ActionOutcome::Failed(Failure::from(&e))
            }
        };
    }

    outcome
}

async fn reconcile(
    ctx: &RunContext<'_>,
    project_id: &str,
    publication: &Publication,
) -> Result<Reconciliation, Failure> {
    let snapshot = match &ctx.snapshot {
        SnapshotState::Ready(snapshot) => snapshot,
        SnapshotState::Unavailable(reason) => {
            return Err(Failure::new(
                FailureKind::Remote,
                format!("platform listing unavailable: {reason}"),
            ))
        }
        SnapshotState::NotFetched => {
            return Err(Failure::new(
                FailureKind::Config,
                "platform listing was not fetched for this run",
            ))
        }
    };

    if !snapshot.has_project(project_id) {
        return Err(Failure::new(
            FailureKind::Config,
            format!("project '{project_id}' not found on the documentation platform"),
        ));
    }

    let platform = ctx.services.platform;
    if snapshot.has_publication(project_id, publication.id()) {
        let req = PublicationRequest {
            project_id: project_id.to_string(),
            publication_id: publication.id().to_string(),
            title: publication.title().to_string(),
            visibility: publication.publish_visibility(),
            output_tags: publication.output_tags().to_vec(),
        };
        return match platform.update_publication(&req).await {
            Ok(()) => Ok(Reconciliation::Updated),
            Err(e) => {
                warn!(
                    project_id,
                    publication_id = %publication.id(),
                    error = %e,
                    "[PUBLICATION] Metadata update failed; publishing anyway (degraded)"
                );
                Ok(Reconciliation::UpdateFailed(Failure::from(ActionError::from(e))))
            }
        };
    }

    info!(
        project_id,
        publication_id = %publication.id(),
        "[PUBLICATION] Publication not found on platform; creating it"
    );
    let req = PublicationRequest {
        project_id: project_id.to_string(),
        publication_id: publication.id().to_string(),
        title: publication.title().to_string(),
        visibility: publication.create_visibility(),
        output_tags: publication.output_tags().to_vec(),
    };
    let created = async {
        if let Some(handle) = platform.create_publication(&req).await? {
            if ctx.settings.wait_for_publish {
                await_platform_task(ctx, &handle, "create").await?;
            }
        }
        Ok::<_, ActionError>(())
    };
    created.await.map_err(|e| Failure::from(&e))?;
    Ok(Reconciliation::Created)
}

async fn run_publish(
    ctx: &RunContext<'_>,
    project_id: &str,
    publication: &Publication,
) -> Result<ActionOutcome, ActionError> {
    let req = PublishRequest {
        project_id: project_id.to_string(),
        publication_id: publication.id().to_string(),
        title: publication.title().to_string(),
        update_mode: publication.publish_update_mode(),
        visibility: publication.publish_visibility(),
        output_tags: publication.output_tags().to_vec(),
    };
    info!(
        project_id,
        publication_id = %publication.id(),
        update_mode = req.update_mode.as_api_str(),
        visibility = req.visibility.as_api_str(),
        "[PUBLICATION] Publishing"
    );

    match ctx.services.platform.publish(&req).await? {
        Some(handle) if ctx.settings.wait_for_publish => {
            await_platform_task(ctx, &handle, "publish").await?;
            Ok(ActionOutcome::Succeeded(format!(
                "publish task {} completed",
                handle.task_id
            )))
        }
        Some(handle) => Ok(ActionOutcome::Succeeded(format!(
            "publish task {} submitted",
            handle.task_id
        ))),
        None => Ok(ActionOutcome::Succeeded("published".into())),
    }
}

async fn run_export(
    ctx: &RunContext<'_>,
    project_id: &str,
    publication: &Publication,
    artifact: &mut Option<PathBuf>,
) -> Result<ActionOutcome, ActionError> {
    let req = ExportRequest {
        project_id: project_id.to_string(),
        publication_id: publication.id().to_string(),
        title: publication.title().to_string(),
        export_preset_name: publication.export_preset_name().to_string(),
    };
    info!(
        project_id,
        publication_id = %publication.id(),
        preset = %req.export_preset_name,
        "[PUBLICATION] Starting PDF export"
    );
    let handle = ctx.services.platform.export_pdf(&req).await?;

    if !ctx.settings.wait_for_export {
        info!(task_id = %handle.task_id, "[PUBLICATION] Export submitted; not waiting for completion");
        return Ok(ActionOutcome::Succeeded(format!(
            "export task {} submitted",
            handle.task_id
        )));
    }

    await_platform_task(ctx, &handle, "export").await?;

    if !ctx.enables(Step::UploadTribble) {
        return Ok(ActionOutcome::Succeeded(format!(
            "export task {} completed",
            handle.task_id
        )));
    }

    let path = fetch_exported_pdf(ctx, publication).await?;
    let detail = format!("exported to {}", path.display());
    *artifact = Some(path);
    Ok(ActionOutcome::Succeeded(detail))
}

async fn run_upload(
    ctx: &RunContext<'_>,
    publication: &Publication,
    artifact: Option<&Path>,
    export_in_run: bool,
) -> Result<ActionOutcome, ActionError> {
    let ingestor = ctx
        .services
        .ingestor
        .ok_or_else(|| ActionError::Config("no ingestion client configured".into()))?;

    let path = match artifact {
        Some(path) => path.to_path_buf(),
        None if export_in_run => {
            warn!(
                publication_id = %publication.id(),
                "[PUBLICATION] Export produced no local PDF; skipping upload"
            );
            return Ok(ActionOutcome::Skipped("no artifact".into()));
        }
        // Export was not part of this run: use the PDF a previous run left in platform storage.
        None => fetch_exported_pdf(ctx, publication).await?,
    };

    let metadata = DocumentMetadata {
        label: publication.label().to_string(),
    };
    info!(
        publication_id = %publication.id(),
        path = %path.display(),
        label = %metadata.label,
        "[PUBLICATION] Uploading PDF for ingestion"
    );
    let job_id = ingestor.upload_document(&path, &metadata).await?;
    info!(publication_id = %publication.id(), %job_id, "[PUBLICATION] Upload accepted");

    if !ctx.settings.wait_for_processing {
        return Ok(ActionOutcome::Succeeded(format!("uploaded as job {job_id}")));
    }

    let waited = wait_for_task(
        ctx.services.clock,
        ctx.settings.poll_policy(),
        &job_id,
        "ingestion",
        || ingestor.ingestion_status(&job_id),
    )
    .await;
    match waited {
        Ok(_) => Ok(ActionOutcome::Succeeded(format!(
            "uploaded as job {job_id}; processed"
        ))),
        // The document was accepted; retrying would duplicate it.
        Err(ActionError::Timeout { waited, .. }) => {
            warn!(%job_id, waited_secs = waited.as_secs(), "[PUBLICATION] Ingestion processing not confirmed in time");
            Ok(ActionOutcome::Succeeded(format!(
                "uploaded as job {job_id}; processing not confirmed within {}s",
                waited.as_secs()
            )))
        }
        Err(e) => Err(e),
    }
}

async fn await_platform_task(
    ctx: &RunContext<'_>,
    handle: &TaskHandle,
    task_kind: &str,
) -> Result<(), ActionError> {
    let platform = ctx.services.platform;
    wait_for_task(
        ctx.services.clock,
        ctx.settings.poll_policy(),
        &handle.task_id,
        task_kind,
        || platform.get_task_status(&handle.task_id),
    )
    .await?;
    Ok(())
}

async fn fetch_exported_pdf(
    ctx: &RunContext<'_>,
    publication: &Publication,
) -> Result<PathBuf, ActionError> {
    let bytes = ctx
        .services
        .platform
        .download_exported_pdf(publication.title())
        .await?;
    tokio::fs::create_dir_all(&ctx.settings.download_dir).await?;
    let path = ctx.settings.download_dir.join(publication.artifact_file_name());
    tokio::fs::write(&path, &bytes).await?;
    info!(
        publication_id = %publication.id(),
        path = %path.display(),
        size = bytes.len(),
        "[PUBLICATION] Saved exported PDF"
    );
    Ok(path)
}
