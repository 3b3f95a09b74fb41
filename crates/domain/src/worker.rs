//! Worker lifecycle records owned by the supervisor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of one supervised worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Running,
    Stopped,
    Crashed,
    Restarting,
    /// Terminal: the restart ceiling was exceeded. Requires a manual reset.
    Failed,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerStatus::Running => "running",
            WorkerStatus::Stopped => "stopped",
            WorkerStatus::Crashed => "crashed",
            WorkerStatus::Restarting => "restarting",
            WorkerStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Bookkeeping for one supervised worker. Owned exclusively by the
/// supervisor; everyone else sees snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub name: String,
    pub status: WorkerStatus,
    pub restart_count: u32,
    pub max_restarts: u32,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_crashed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl WorkerRecord {
    pub fn new(name: impl Into<String>, max_restarts: u32) -> Self {
        Self {
            name: name.into(),
            status: WorkerStatus::Stopped,
            restart_count: 0,
            max_restarts,
            last_started_at: None,
            last_crashed_at: None,
            last_error: None,
        }
    }

    /// True once the restart budget is exhausted.
    pub fn exhausted(&self) -> bool {
        self.restart_count > self.max_restarts
    }
}

/// Outcome of one restart attempt, for the history log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartOutcome {
    Restarted,
    GaveUp,
}

/// One entry in the supervisor's restart history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartAttempt {
    pub worker: String,
    pub attempt: u32,
    pub at: DateTime<Utc>,
    pub outcome: RestartOutcome,
    pub error: Option<String>,
}
