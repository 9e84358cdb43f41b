use std::fmt;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How a scheduled task ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TaskOutcome {
    Completed,
    /// User code failed; the rendered error was delivered as a result.
    Failed(String),
    /// Cancelled through its handle before finishing.
    Cancelled,
    /// The scheduler dropped the task without running it to completion.
    Aborted,
}

/// Cancellation-capable handle to one task on the scheduler.
pub struct TaskHandle {
    token: CancellationToken,
    join: JoinHandle<TaskOutcome>,
}

impl TaskHandle {
    pub(crate) fn new(token: CancellationToken, join: JoinHandle<TaskOutcome>) -> Self {
        Self { token, join }
    }

    /// Request cancellation. The task observes it at its next await point.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// A token that cancels this task when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn join(self) -> TaskOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => TaskOutcome::Failed("task panicked".into()),
            Err(_) => TaskOutcome::Aborted,
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("cancelled", &self.token.is_cancelled())
            .field("finished", &self.join.is_finished())
            .finish()
    }
}
