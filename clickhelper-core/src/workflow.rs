//! Workflow runner: selects which steps run, walks every project, and aggregates the run report.
//!
//! # Step selection
//! Each [`Workflow`] maps to a fixed set of [`Step`]s; the engines consult that set instead of
//! branching on workflow names.
//!
//! | workflow        | steps                                      |
//! |-----------------|--------------------------------------------|
//! | publish         | Publish, ExportPdf                         |
//! | tribble-upload  | UploadTribble                              |
//! | backup          | Backup                                     |
//! | all             | Publish, ExportPdf, UploadTribble, Backup  |
//!
//! # Error Handling
//! Per-publication and per-project failures are recorded in the report. Only configuration
//! problems that make the run unsafe or impossible escape as [`WorkflowError`], and they are
//! detected before any remote call is made. A phase that cannot run at all, such as backups
//! under `all` with a bad retention count, is recorded in [`RunReport::run_failures`].

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::contract::{DocsPlatform, Ingestor, ObjectStore, PlatformSnapshot};
use crate::error::{RetentionConfigError, WorkflowError};
use crate::model::{ActionKind, Failure, FailureKind, Project};
use crate::poll::PollPolicy;
use crate::project::{backup_project, execute_publications};
use crate::report::{FailureDetail, ProjectOutcome, RunReport};
use crate::retention::RetentionPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Step {
    Publish,
    ExportPdf,
    UploadTribble,
    Backup,
}

impl From<ActionKind> for Step {
    fn from(kind: ActionKind) -> Self {
        match kind {
            ActionKind::Publish => Step::Publish,
            ActionKind::ExportPdf => Step::ExportPdf,
            ActionKind::UploadTribble => Step::UploadTribble,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Workflow {
    Publish,
    TribbleUpload,
    Backup,
    All,
}

impl Workflow {
    pub fn steps(self) -> &'static [Step] {
        match self {
            Workflow::Publish => &[Step::Publish, Step::ExportPdf],
            Workflow::TribbleUpload => &[Step::UploadTribble],
            Workflow::Backup => &[Step::Backup],
            Workflow::All => &[
                Step::Publish,
                Step::ExportPdf,
                Step::UploadTribble,
                Step::Backup,
            ],
        }
    }

    pub fn enables(self, step: Step) -> bool {
        self.steps().contains(&step)
    }

    /// True when any per-publication action can run under this workflow.
    pub fn runs_publications(self) -> bool {
        self.steps().iter().any(|step| *step != Step::Backup)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Workflow::Publish => "publish",
            Workflow::TribbleUpload => "tribble-upload",
            Workflow::Backup => "backup",
            Workflow::All => "all",
        }
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Global execution settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub wait_for_export: bool,
    pub wait_for_publish: bool,
    pub wait_for_processing: bool,
    pub max_wait: Duration,
    pub poll_interval: Duration,
    /// Where exported PDFs are written before upload.
    pub download_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        let policy = PollPolicy::default();
        Self {
            wait_for_export: true,
            wait_for_publish: true,
            wait_for_processing: true,
            max_wait: policy.max_wait,
            poll_interval: policy.poll_interval,
            download_dir: PathBuf::from("./downloads"),
        }
    }
}

impl Settings {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            poll_interval: self.poll_interval,
            max_wait: self.max_wait,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupSettings {
    pub enabled: bool,
    /// Validated when a backup runs; kept raw so a bad value is reported, not coerced.
    pub retention_count: i64,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            retention_count: 30,
        }
    }
}

/// Validated in-memory configuration handed over by the config layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunConfig {
    pub projects: Vec<Project>,
    pub settings: Settings,
    pub backup: BackupSettings,
}

/// Remote clients available to the run. Optional clients are only needed by some workflows.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub platform: &'a dyn DocsPlatform,
    pub ingestor: Option<&'a dyn Ingestor>,
    pub store: Option<&'a dyn ObjectStore>,
    pub clock: &'a dyn Clock,
}

/// The platform listing used for existence checks, fetched at most once per run.
#[derive(Debug, Clone)]
pub enum SnapshotState {
    NotFetched,
    Ready(PlatformSnapshot),
    Unavailable(String),
}

/// Everything the engines need, shared read-only across all units of a run.
pub struct RunContext<'a> {
    pub services: Services<'a>,
    pub settings: &'a Settings,
    pub workflow: Workflow,
    pub snapshot: SnapshotState,
    /// Present when backups run in this invocation.
    pub retention: Option<RetentionPolicy>,
}

impl RunContext<'_> {
    pub fn enables(&self, step: Step) -> bool {
        self.workflow.enables(step)
    }
}

/// Run `workflow` over every configured project.
///
/// Publication steps run for all projects first, then backups, so a backup never precedes a
/// publish of the same run. An invalid retention count fails `backup` outright; under `all` it
/// only cancels the backup phase and is recorded as a run-level failure.
pub async fn run_workflow(
    config: &RunConfig,
    workflow: Workflow,
    services: Services<'_>,
) -> Result<RunReport, WorkflowError> {
    info!(
        %workflow,
        projects = config.projects.len(),
        "[RUN] Starting workflow"
    );

    let (retention, retention_failure) = match backup_policy(config, workflow) {
        Ok(policy) => (policy, None),
        Err(e) if workflow == Workflow::All => {
            warn!(error = %e, "[RUN] Publication steps still run; the backup phase is skipped");
            (None, Some(e))
        }
        Err(e) => return Err(e.into()),
    };
    check_clients(config, workflow, &services, retention.is_some())?;

    let needs_snapshot = workflow.enables(Step::Publish)
        && config
            .projects
            .iter()
            .flat_map(|project| &project.publications)
            .any(|publication| publication.is_valid());
    let snapshot = if needs_snapshot {
        fetch_snapshot(services.platform).await
    } else {
        SnapshotState::NotFetched
    };

    let ctx = RunContext {
        services,
        settings: &config.settings,
        workflow,
        snapshot,
        retention,
    };

    let mut report = RunReport::new(workflow);
    report.projects = config
        .projects
        .iter()
        .map(|project| ProjectOutcome::new(&project.project_id))
        .collect();
    if let Some(e) = retention_failure {
        report.run_failures.push(FailureDetail {
            unit: "backup".into(),
            failure: Failure::new(FailureKind::Config, e.to_string()),
        });
    }

    if workflow.runs_publications() {
        for (project, outcome) in config.projects.iter().zip(report.projects.iter_mut()) {
            execute_publications(&ctx, project, outcome).await;
        }
    }

    if ctx.retention.is_some() {
        for (project, outcome) in config.projects.iter().zip(report.projects.iter_mut()) {
            outcome.backup = Some(backup_project(&ctx, project).await);
        }
    }

    let summary = report.summary();
    if report.has_failures() {
        warn!(%workflow, ?summary, "[RUN] Workflow finished with failures");
    } else {
        info!(%workflow, ?summary, "[RUN] Workflow finished");
    }
    Ok(report)
}

fn backup_policy(
    config: &RunConfig,
    workflow: Workflow,
) -> Result<Option<RetentionPolicy>, RetentionConfigError> {
    if !workflow.enables(Step::Backup) {
        return Ok(None);
    }
    if !config.backup.enabled {
        warn!("[RUN] Object-store backup is not enabled in configuration; skipping backups");
        return Ok(None);
    }
    let policy = RetentionPolicy::new(config.backup.retention_count).map_err(|e| {
        error!(error = %e, "[RUN] Refusing to run backups with an invalid retention count");
        e
    })?;
    Ok(Some(policy))
}

fn check_clients(
    config: &RunConfig,
    workflow: Workflow,
    services: &Services<'_>,
    backups: bool,
) -> Result<(), WorkflowError> {
    let uploads = workflow.enables(Step::UploadTribble)
        && config
            .projects
            .iter()
            .flat_map(|project| &project.publications)
            .any(|publication| publication.actions().contains(&ActionKind::UploadTribble));
    if uploads && services.ingestor.is_none() {
        return Err(WorkflowError::MissingClient("ingestion"));
    }
    if backups && services.store.is_none() {
        return Err(WorkflowError::MissingClient("object store"));
    }
    Ok(())
}

async fn fetch_snapshot(platform: &dyn DocsPlatform) -> SnapshotState {
    info!("[RUN] Fetching existing projects and publications");
    match platform.list_projects_and_publications().await {
        Ok(snapshot) => {
            info!(
                projects = snapshot.project_count(),
                publications = snapshot.publication_count(),
                "[RUN] Platform snapshot ready"
            );
            SnapshotState::Ready(snapshot)
        }
        Err(e) => {
            error!(error = %e, "[RUN] Could not list projects and publications");
            SnapshotState::Unavailable(e.to_string())
        }
    }
}
