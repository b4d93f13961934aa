///
/// This module implements the CLI for clickhelper: argument parsing, client construction and
/// report rendering.
///
/// All business logic (action derivation, publication and backup engines, retention) lives in
/// the [`clickhelper-core`] crate. This module only wires real clients into it.
///
/// ## How To Use
/// - From the command line: `clickhelper [WORKFLOW] [--config PATH] [--json]`.
/// - Programmatically or in tests: build a [`Cli`] and call [`run`], then [`render_report`].
///
/// Only the clients the selected workflow needs are constructed, so `publish` runs without
/// Tribble or AWS credentials.
///
/// [`clickhelper-core`]: ../../clickhelper_core/
use crate::clickhelp::ClickHelpClient;
use crate::load_config::load_config;
use crate::s3::{S3BackupStore, S3Config};
use crate::tribble::TribbleClient;
use anyhow::Result;
use clap::{Parser, ValueEnum};
use clickhelper_core::clock::SystemClock;
use clickhelper_core::contract::{Ingestor, ObjectStore};
use clickhelper_core::model::ActionKind;
use clickhelper_core::report::RunReport;
use clickhelper_core::workflow::{run_workflow, Services, Step, Workflow};
use std::fmt::Write as _;
use std::path::PathBuf;

/// Publish, export and back up ClickHelp documentation.
#[derive(Debug, Parser)]
#[command(
    name = "clickhelper",
    version,
    about = "Publish ClickHelp publications, export them as PDF for Tribble, and back projects up to S3"
)]
pub struct Cli {
    /// Workflow to run
    #[arg(value_enum, default_value_t = WorkflowArg::All)]
    pub workflow: WorkflowArg,

    /// Path to the YAML config file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Print the run report as JSON instead of a summary
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WorkflowArg {
    /// Create/update and publish publications, then export PDFs
    Publish,
    /// Upload previously exported PDFs to Tribble
    TribbleUpload,
    /// Back projects up to S3 and prune old backups
    Backup,
    /// Everything above, publications first, then backups
    All,
}

impl From<WorkflowArg> for Workflow {
    fn from(arg: WorkflowArg) -> Self {
        match arg {
            WorkflowArg::Publish => Workflow::Publish,
            WorkflowArg::TribbleUpload => Workflow::TribbleUpload,
            WorkflowArg::Backup => Workflow::Backup,
            WorkflowArg::All => Workflow::All,
        }
    }
}

/// Load the configuration, build the clients the workflow needs, and run it.
pub async fn run(cli: Cli) -> Result<RunReport> {
    tracing::info!("trace_initialised");

    let workflow = Workflow::from(cli.workflow);
    let config = load_config(&cli.config)?;
    tracing::info!(%workflow, config = ?cli.config, "Starting workflow");

    let platform = ClickHelpClient::new_from_env(config.clickhelp.portal_url.as_deref())?;

    let needs_ingestor = workflow.enables(Step::UploadTribble)
        && config
            .run
            .projects
            .iter()
            .flat_map(|project| &project.publications)
            .any(|publication| publication.actions().contains(&ActionKind::UploadTribble));
    let ingestor = if needs_ingestor {
        Some(TribbleClient::new_from_env(config.tribble.base_url.as_deref())?)
    } else {
        None
    };

    let store = if workflow.enables(Step::Backup) && config.s3_backup.enabled {
        let s3 = S3Config::from_env(config.s3_backup.region.as_deref())?;
        Some(S3BackupStore::new(s3).await)
    } else {
        None
    };

    let clock = SystemClock;
    let services = Services {
        platform: &platform,
        ingestor: ingestor.as_ref().map(|client| client as &dyn Ingestor),
        store: store.as_ref().map(|store| store as &dyn ObjectStore),
        clock: &clock,
    };

    match run_workflow(&config.run, workflow, services).await {
        Ok(report) => {
            tracing::info!(%workflow, failed = report.has_failures(), "Workflow complete");
            Ok(report)
        }
        Err(e) => {
            tracing::error!(%workflow, error = %e, "Workflow aborted");
            Err(anyhow::Error::new(e))
        }
    }
}

/// Human-readable rendering of a run report: failures and warnings first, then the totals.
pub fn render_report(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "clickhelper {} report", report.workflow);

    for project in &report.projects {
        for invalid in &project.invalid {
            let _ = writeln!(
                out,
                "  INVALID {}/{}: {}",
                invalid.project_id, invalid.publication_id, invalid.reason
            );
        }
        for publication in project.publications.iter().filter(|p| p.degraded) {
            let _ = writeln!(
                out,
                "  DEGRADED {}/{}: metadata update failed, published with previous metadata",
                publication.project_id, publication.publication_id
            );
        }
        if let Some(backup) = &project.backup {
            for warning in &backup.warnings {
                let _ = writeln!(out, "  WARNING {}/backup: {}", backup.project_id, warning);
            }
        }
    }
    for failure in report.failures() {
        let _ = writeln!(out, "  FAILED {}: {}", failure.unit, failure.failure);
    }

    let _ = write!(out, "{}", report.summary());
    out
}
