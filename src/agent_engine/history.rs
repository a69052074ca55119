use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::agent_engine::state::TaskStatus;
use crate::errors::DeskZoomResult;

/// One line of the session journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: i64,
    pub task_id: String,
    #[serde(flatten)]
    pub event: HistoryEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryEvent {
    Status {
        status: TaskStatus,
        error: Option<String>,
        result: Option<String>,
    },
    Message {
        channel: String,
        text: String,
        images: usize,
    },
    Prompt {
        prompt: serde_json::Value,
    },
    Action {
        action: serde_json::Value,
        result: Option<String>,
    },
}

impl HistoryEntry {
    pub fn now(task_id: &str, event: HistoryEvent) -> Self {
        Self {
            ts: chrono::Utc::now().timestamp_millis(),
            task_id: task_id.to_string(),
            event,
        }
    }
}

/// Append-only JSONL file, one per store session.
pub struct SessionHistory {
    pub session_id: String,
    file_path: PathBuf,
}

impl SessionHistory {
    /// Journal at `<dir>/sessions/session_<uuid>.jsonl`.
    pub fn create(dir: &Path) -> DeskZoomResult<Self> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let sessions = dir.join("sessions");
        std::fs::create_dir_all(&sessions)?;
        let file_path = sessions.join(format!("session_{session_id}.jsonl"));
        tracing::info!(path = %file_path.display(), "session journal opened");
        Ok(Self {
            session_id,
            file_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn append(&self, entry: &HistoryEntry) -> DeskZoomResult<()> {
        let line = serde_json::to_string(entry)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        writeln!(file, "{}", line)?;
        tracing::trace!(path = %self.file_path.display(), "history entry flushed");
        Ok(())
    }
}
