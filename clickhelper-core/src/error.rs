//! Error taxonomy for the workflow engine.
//!
//! Per-unit errors ([`RemoteError`], [`ActionError`]) are converted into outcome records by the
//! engines and never abort a run. Only [`WorkflowError`] escapes [`crate::workflow::run_workflow`].

use std::time::Duration;

use thiserror::Error;

/// Failure reported by one of the remote services behind the façade traits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The service answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    /// The requested resource (task, file, object) does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The request never produced a response (connection, TLS, timeout at socket level).
    #[error("transport error: {0}")]
    Transport(String),
    /// A remote job reached a terminal failure state.
    #[error("task {task_id} failed: {reason}")]
    TaskFailed { task_id: String, reason: String },
    /// The response could not be understood, or the service reported failure in its body.
    #[error("unexpected response: {0}")]
    Protocol(String),
}

/// Error raised while executing a single action or backup step.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("task {task_id} did not reach a terminal state within {}s", waited.as_secs())]
    Timeout { task_id: String, waited: Duration },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A non-positive retention count. Rejected before any listing or deletion happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("retention_count must be a positive integer, got {0}")]
pub struct RetentionConfigError(pub i64);

/// Errors that abort a whole run instead of being recorded per unit.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    RetentionConfig(#[from] RetentionConfigError),
    #[error("workflow requires the {0} client, but none was configured")]
    MissingClient(&'static str),
}

/// Errors from a retention pass. Individual delete failures are not errors; they are recorded
/// in the deletion report.
#[derive(Debug, Error)]
pub enum RetentionError {
    #[error(transparent)]
    Config(#[from] RetentionConfigError),
    #[error("listing backups failed: {0}")]
    Remote(#[from] RemoteError),
}
