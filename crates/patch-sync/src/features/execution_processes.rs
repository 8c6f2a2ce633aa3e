use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;
use uuid::Uuid;

use crate::endpoint::Endpoint;

pub const STREAM_PATH: &str = "/api/execution-processes/stream/session/ws";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProcessStatus {
    Running,
    Completed,
    Failed,
    Killed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunReason {
    SetupScript,
    CleanupScript,
    CodingAgent,
    DevServer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionProcess {
    pub id: Uuid,
    pub session_id: Uuid,
    pub run_reason: RunReason,
    #[serde(default)]
    pub executor_action: Value,
    pub status: ExecutionProcessStatus,
    pub exit_code: Option<i64>,
    /// Excluded from the current history view; still listed with soft-deleted processes.
    #[serde(default)]
    pub dropped: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `{ "execution_processes": { <id>: ExecutionProcess } }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionProcesses {
    #[serde(default)]
    pub execution_processes: BTreeMap<String, ExecutionProcess>,
}

impl ExecutionProcesses {
    pub fn sorted_by_created_at(&self) -> Vec<&ExecutionProcess> {
        let mut processes: Vec<_> = self.execution_processes.values().collect();
        processes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        processes
    }

    /// Processes that belong to the current history view, oldest first.
    pub fn visible(&self) -> Vec<&ExecutionProcess> {
        let mut processes = self.sorted_by_created_at();
        processes.retain(|process| !process.dropped);
        processes
    }

    /// A visible process other than a dev server is still running.
    pub fn is_any_running(&self) -> bool {
        self.visible().into_iter().any(|process| {
            process.status == ExecutionProcessStatus::Running
                && process.run_reason != RunReason::DevServer
        })
    }

    pub fn get(&self, id: Uuid) -> Option<&ExecutionProcess> {
        self.execution_processes.get(&id.to_string())
    }
}

pub fn endpoint(base: &Url, session_id: Uuid, show_soft_deleted: bool) -> Endpoint {
    Endpoint::new(base, STREAM_PATH)
        .query("session_id", session_id)
        .query("show_soft_deleted", show_soft_deleted)
}

pub fn placeholder() -> Value {
    json!({ "execution_processes": {} })
}
