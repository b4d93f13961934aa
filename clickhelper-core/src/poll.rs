//! Generic polling protocol for asynchronous remote jobs.
//!
//! A job moves Queued → Running → {Succeeded, Failed}; the poller adds a Timeout exit when the
//! job has not reached a terminal state within `max_wait`. A timed-out job is abandoned, not
//! cancelled: the backends offer no cancellation call. The final poll happens exactly at the
//! deadline and nothing is polled after it.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::contract::TaskState;
use crate::error::{ActionError, RemoteError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_wait: Duration::from_secs(600),
        }
    }
}

/// A remote job that reached terminal success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTask {
    pub task_id: String,
    pub status: TaskState,
    pub elapsed: Duration,
    pub polls: u32,
}

/// Poll `fetch` until the job is terminal or `policy.max_wait` has elapsed on `clock`.
///
/// Terminal failure becomes [`RemoteError::TaskFailed`]; an error from `fetch` aborts the wait
/// immediately; running out of time becomes [`ActionError::Timeout`].
pub async fn wait_for_task<F, Fut>(
    clock: &dyn Clock,
    policy: PollPolicy,
    task_id: &str,
    task_kind: &str,
    mut fetch: F,
) -> Result<RemoteTask, ActionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<TaskState, RemoteError>>,
{
    info!(task_id, task_kind, max_wait_secs = policy.max_wait.as_secs(), "[POLL] Waiting for task");
    let start = clock.now();
    let mut polls: u32 = 0;

    loop {
        let state = fetch().await.map_err(|e| {
            warn!(task_id, task_kind, error = %e, "[POLL] Status request failed");
            e
        })?;
        polls += 1;
        let elapsed = clock.now().saturating_duration_since(start);
        debug!(task_id, task_kind, ?state, polls, elapsed_secs = elapsed.as_secs(), "[POLL] Task status");

        match state {
            TaskState::Succeeded => {
                info!(task_id, task_kind, polls, elapsed_secs = elapsed.as_secs(), "[POLL] Task succeeded");
                return Ok(RemoteTask {
                    task_id: task_id.to_string(),
                    status: TaskState::Succeeded,
                    elapsed,
                    polls,
                });
            }
            TaskState::Failed(reason) => {
                warn!(task_id, task_kind, %reason, "[POLL] Task failed");
                return Err(RemoteError::TaskFailed {
                    task_id: task_id.to_string(),
                    reason,
                }
                .into());
            }
            TaskState::Queued | TaskState::Running => {}
        }

        if elapsed >= policy.max_wait {
            warn!(task_id, task_kind, polls, elapsed_secs = elapsed.as_secs(), "[POLL] Task timed out; abandoning");
            return Err(ActionError::Timeout {
                task_id: task_id.to_string(),
                waited: elapsed,
            });
        }

        let remaining = policy.max_wait - elapsed;
        clock.sleep(policy.poll_interval.min(remaining)).await;
    }
}
