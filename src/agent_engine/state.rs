use serde::{Deserialize, Serialize};

use crate::config::ResultStatus;

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Review,
    Finished,
    Failed,
    Cancelling,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    /// Terminal, or awaiting review of a declared result.
    pub fn is_settled(&self) -> bool {
        self.is_terminal() || *self == TaskStatus::Review
    }
}

impl From<ResultStatus> for TaskStatus {
    fn from(status: ResultStatus) -> Self {
        match status {
            ResultStatus::Review => TaskStatus::Review,
            ResultStatus::Finished => TaskStatus::Finished,
        }
    }
}

/// One unit of work for the solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub error: Option<String>,
    /// Final answer from a `result` action.
    pub result: Option<String>,
    pub steps: u32,
    pub owner_id: Option<String>,
    /// Free-form task parameters; `site` is opened before the first step.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            status: TaskStatus::Pending,
            error: None,
            result: None,
            steps: 0,
            owner_id: None,
            parameters: serde_json::Map::new(),
            created_at: chrono::Utc::now(),
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner_id = Some(owner.into());
        self
    }

    pub fn with_parameter(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn site(&self) -> Option<&str> {
        self.parameters.get("site").and_then(|v| v.as_str())
    }
}
