//! Outcome records produced by the engines and aggregated into a run report.
//!
//! Records only ever get appended; no engine rewrites an outcome produced by another unit.

use std::fmt;

use serde::Serialize;

use crate::model::{Action, ActionOutcome, Failure};
use crate::retention::DeletionReport;
use crate::workflow::Workflow;

/// Result of the existence check that precedes a publication's actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Reconciliation {
    /// The Publish step is not part of this run.
    NotAttempted,
    Created,
    Updated,
    /// Metadata update failed; the publish was still attempted.
    UpdateFailed(Failure),
    /// Creation failed; the Publish action carries the same failure and nothing else ran.
    CreateFailed(Failure),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicationOutcome {
    pub project_id: String,
    pub publication_id: String,
    pub title: String,
    pub reconciliation: Reconciliation,
    /// Set when the publication ran on stale metadata after a failed update.
    pub degraded: bool,
    pub actions: Vec<Action>,
}

impl PublicationOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.reconciliation, Reconciliation::CreateFailed(_))
            || self.actions.iter().any(|action| action.outcome.is_failed())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidPublication {
    pub project_id: String,
    pub publication_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupOutcome {
    pub project_id: String,
    /// Object-store key of the uploaded archive, once the put succeeded.
    pub key: Option<String>,
    pub outcome: ActionOutcome,
    /// Present only when retention ran, which requires a successful upload.
    pub retention: Option<DeletionReport>,
    pub warnings: Vec<String>,
}

impl BackupOutcome {
    pub fn is_failed(&self) -> bool {
        self.outcome.is_failed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectOutcome {
    pub project_id: String,
    pub publications: Vec<PublicationOutcome>,
    pub invalid: Vec<InvalidPublication>,
    pub backup: Option<BackupOutcome>,
}

impl ProjectOutcome {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            publications: Vec::new(),
            invalid: Vec::new(),
            backup: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.publications.iter().any(PublicationOutcome::is_failed)
            || self.backup.as_ref().is_some_and(BackupOutcome::is_failed)
    }
}

/// A failure attributed to a specific unit, e.g. `release-notes/rn-2024/export_pdf`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureDetail {
    pub unit: String,
    pub failure: Failure,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub actions_succeeded: usize,
    pub actions_failed: usize,
    pub actions_skipped: usize,
    pub publications_invalid: usize,
    pub projects_succeeded: usize,
    pub projects_failed: usize,
    pub backups_succeeded: usize,
    pub backups_failed: usize,
    pub backups_deleted: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "actions:  {} succeeded, {} failed, {} skipped",
            self.actions_succeeded, self.actions_failed, self.actions_skipped
        )?;
        writeln!(
            f,
            "projects: {} succeeded, {} failed ({} invalid publication(s) excluded)",
            self.projects_succeeded, self.projects_failed, self.publications_invalid
        )?;
        write!(
            f,
            "backups:  {} succeeded, {} failed, {} old backup(s) removed",
            self.backups_succeeded, self.backups_failed, self.backups_deleted
        )
    }
}

/// Aggregated result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub workflow: Workflow,
    pub projects: Vec<ProjectOutcome>,
    /// Failures that stopped a whole phase rather than one unit, e.g. an invalid retention count.
    pub run_failures: Vec<FailureDetail>,
}

impl RunReport {
    pub fn new(workflow: Workflow) -> Self {
        Self {
            workflow,
            projects: Vec::new(),
            run_failures: Vec::new(),
        }
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for project in &self.projects {
            if project.is_failed() {
                summary.projects_failed += 1;
            } else {
                summary.projects_succeeded += 1;
            }
            summary.publications_invalid += project.invalid.len();
            for action in project.publications.iter().flat_map(|p| &p.actions) {
                match action.outcome {
                    ActionOutcome::Succeeded(_) => summary.actions_succeeded += 1,
                    ActionOutcome::Failed(_) => summary.actions_failed += 1,
                    ActionOutcome::Skipped(_) => summary.actions_skipped += 1,
                    ActionOutcome::Pending => {}
                }
            }
            if let Some(backup) = &project.backup {
                if backup.is_failed() {
                    summary.backups_failed += 1;
                } else {
                    summary.backups_succeeded += 1;
                }
                if let Some(retention) = &backup.retention {
                    summary.backups_deleted += retention.deleted.len();
                }
            }
        }
        summary
    }

    /// Every failure in the run, attributed to its project, publication and action.
    pub fn failures(&self) -> Vec<FailureDetail> {
        let mut failures = self.run_failures.clone();
        for project in &self.projects {
            for publication in &project.publications {
                let unit = format!("{}/{}", project.project_id, publication.publication_id);
                for action in &publication.actions {
                    if let ActionOutcome::Failed(failure) = &action.outcome {
                        failures.push(FailureDetail {
                            unit: format!("{unit}/{}", action.kind),
                            failure: failure.clone(),
                        });
                    }
                }
            }
            if let Some(BackupOutcome {
                outcome: ActionOutcome::Failed(failure),
                ..
            }) = &project.backup
            {
                failures.push(FailureDetail {
                    unit: format!("{}/backup", project.project_id),
                    failure: failure.clone(),
                });
            }
        }
        failures
    }

    pub fn has_failures(&self) -> bool {
        !self.run_failures.is_empty() || self.projects.iter().any(ProjectOutcome::is_failed)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
