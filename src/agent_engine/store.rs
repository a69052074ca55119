//! Task store: the solver's status source and passive recorder.
use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::agent_engine::history::{HistoryEntry, HistoryEvent, SessionHistory};
use crate::agent_engine::state::{Task, TaskStatus};
use crate::errors::{DeskZoomError, DeskZoomResult};
use crate::executor::action::AgentAction;
use crate::llm::provider::PromptRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// User-visible progress.
    Default,
    /// Screenshots, zoom composites, per-level selections.
    Debug,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Default => "default",
            Channel::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostedMessage {
    pub task_id: String,
    pub channel: Channel,
    pub role: String,
    pub text: String,
    /// Data URIs. Emptied once the task settles; `image_count` remains.
    pub images: Vec<String>,
    #[serde(default)]
    pub image_count: usize,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl PostedMessage {
    pub fn new(task_id: &str, channel: Channel, text: impl Into<String>) -> Self {
        Self {
            task_id: task_id.to_string(),
            channel,
            role: "assistant".into(),
            text: text.into(),
            images: Vec::new(),
            image_count: 0,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.image_count = images.len();
        self.images = images;
        self
    }
}

/// An executed action, tied to the prompt that chose it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub task_id: String,
    pub action: AgentAction,
    pub result: Option<String>,
    pub prompt_id: String,
    pub model: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Live status as last written by anyone, including cancellation requests.
    async fn status(&self, task_id: &str) -> DeskZoomResult<Option<TaskStatus>>;

    async fn save(&self, task: &Task) -> DeskZoomResult<()>;

    async fn post_message(&self, message: PostedMessage) -> DeskZoomResult<()>;

    async fn add_prompt(&self, task_id: &str, prompt: &PromptRecord) -> DeskZoomResult<()>;

    async fn record_action(&self, record: ActionRecord) -> DeskZoomResult<()>;
}

#[derive(Default)]
struct StoreInner {
    tasks: HashMap<String, Task>,
    messages: Vec<PostedMessage>,
    prompts: Vec<(String, PromptRecord)>,
    actions: Vec<ActionRecord>,
}

impl StoreInner {
    /// Drop the data URIs posted for a task. Returns how many were dropped.
    fn release_images(&mut self, task_id: &str) -> usize {
        self.messages
            .iter_mut()
            .filter(|m| m.task_id == task_id)
            .map(|m| std::mem::take(&mut m.images).len())
            .sum()
    }
}

/// In-process store, optionally mirrored to a JSONL journal.
#[derive(Default)]
pub struct MemoryTaskStore {
    inner: Mutex<StoreInner>,
    journal: Option<SessionHistory>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: SessionHistory) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            journal: Some(journal),
        }
    }

    fn journal(&self, task_id: &str, event: HistoryEvent) {
        let Some(journal) = &self.journal else {
            return;
        };
        if let Err(e) = journal.append(&HistoryEntry::now(task_id, event)) {
            tracing::warn!(error = %e, task_id, "journal append failed");
        }
    }

    /// Ask a running task to stop at its next step boundary.
    pub async fn request_cancel(&self, task_id: &str) -> DeskZoomResult<()> {
        {
            let mut inner = self.inner.lock().await;
            let task = inner
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| DeskZoomError::Store(format!("unknown task {task_id}")))?;
            if task.status.is_settled() {
                tracing::debug!(task_id, status = ?task.status, "cancel ignored, task already settled");
                return Ok(());
            }
            task.status = TaskStatus::Cancelling;
        }
        tracing::info!(task_id, "cancellation requested");
        self.journal(
            task_id,
            HistoryEvent::Status {
                status: TaskStatus::Cancelling,
                error: None,
                result: None,
            },
        );
        Ok(())
    }

    pub async fn task(&self, task_id: &str) -> Option<Task> {
        self.inner.lock().await.tasks.get(task_id).cloned()
    }

    pub async fn messages(&self, task_id: &str) -> Vec<PostedMessage> {
        let inner = self.inner.lock().await;
        inner
            .messages
            .iter()
            .filter(|m| m.task_id == task_id)
            .cloned()
            .collect()
    }

    pub async fn prompts(&self, task_id: &str) -> Vec<PromptRecord> {
        let inner = self.inner.lock().await;
        inner
            .prompts
            .iter()
            .filter(|(id, _)| id == task_id)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub async fn actions(&self, task_id: &str) -> Vec<ActionRecord> {
        let inner = self.inner.lock().await;
        inner
            .actions
            .iter()
            .filter(|a| a.task_id == task_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn status(&self, task_id: &str) -> DeskZoomResult<Option<TaskStatus>> {
        Ok(self.inner.lock().await.tasks.get(task_id).map(|t| t.status))
    }

    async fn save(&self, task: &Task) -> DeskZoomResult<()> {
        let mut stored = task.clone();
        let event = {
            let mut inner = self.inner.lock().await;
            // A pending cancellation outlives progress updates from the solver.
            if let Some(existing) = inner.tasks.get(&task.id) {
                if existing.status == TaskStatus::Cancelling && !task.status.is_settled() {
                    stored.status = TaskStatus::Cancelling;
                }
            }
            if stored.status.is_settled() {
                let released = inner.release_images(&task.id);
                if released > 0 {
                    tracing::debug!(task_id = %task.id, released, "image payloads released");
                }
            }
            let event = HistoryEvent::Status {
                status: stored.status,
                error: stored.error.clone(),
                result: stored.result.clone(),
            };
            inner.tasks.insert(task.id.clone(), stored);
            event
        };
        self.journal(&task.id, event);
        Ok(())
    }

    async fn post_message(&self, message: PostedMessage) -> DeskZoomResult<()> {
        tracing::debug!(
            task_id = %message.task_id,
            channel = message.channel.as_str(),
            text = %message.text,
            images = message.image_count,
            "message posted"
        );
        self.journal(
            &message.task_id,
            HistoryEvent::Message {
                channel: message.channel.as_str().to_string(),
                text: message.text.clone(),
                images: message.image_count,
            },
        );
        self.inner.lock().await.messages.push(message);
        Ok(())
    }

    async fn add_prompt(&self, task_id: &str, prompt: &PromptRecord) -> DeskZoomResult<()> {
        self.journal(
            task_id,
            HistoryEvent::Prompt {
                prompt: serde_json::to_value(prompt)?,
            },
        );
        self.inner
            .lock()
            .await
            .prompts
            .push((task_id.to_string(), prompt.clone()));
        Ok(())
    }

    async fn record_action(&self, record: ActionRecord) -> DeskZoomResult<()> {
        self.journal(
            &record.task_id,
            HistoryEvent::Action {
                action: serde_json::to_value(&record.action)?,
                result: record.result.clone(),
            },
        );
        self.inner.lock().await.actions.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_survives_progress_saves() {
        let store = MemoryTaskStore::new();
        let mut task = Task::new("open the calculator");
        store.save(&task).await.unwrap();
        store.request_cancel(&task.id).await.unwrap();

        task.status = TaskStatus::InProgress;
        task.steps = 2;
        store.save(&task).await.unwrap();

        let stored = store.task(&task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Cancelling);
        assert_eq!(stored.steps, 2);

        task.status = TaskStatus::Cancelled;
        store.save(&task).await.unwrap();
        assert_eq!(store.status(&task.id).await.unwrap(), Some(TaskStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_images_released_when_task_settles() {
        let store = MemoryTaskStore::new();
        let mut task = Task::new("open the calculator");
        store.save(&task).await.unwrap();
        store
            .post_message(
                PostedMessage::new(&task.id, Channel::Debug, "step 1 screenshot")
                    .with_images(vec!["data:image/png;base64,AAAA".into()]),
            )
            .await
            .unwrap();
        task.status = TaskStatus::InProgress;
        store.save(&task).await.unwrap();
        assert_eq!(store.messages(&task.id).await[0].images.len(), 1);

        task.status = TaskStatus::Review;
        store.save(&task).await.unwrap();
        let kept = &store.messages(&task.id).await[0];
        assert!(kept.images.is_empty());
        assert_eq!(kept.image_count, 1);
        assert_eq!(kept.text, "step 1 screenshot");
    }

    #[tokio::test]
    async fn test_cancel_unknown_task() {
        let store = MemoryTaskStore::new();
        assert!(matches!(
            store.request_cancel("nope").await,
            Err(DeskZoomError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_after_settle_is_ignored() {
        let store = MemoryTaskStore::new();
        let mut task = Task::new("x");
        task.status = TaskStatus::Finished;
        store.save(&task).await.unwrap();
        store.request_cancel(&task.id).await.unwrap();
        assert_eq!(store.status(&task.id).await.unwrap(), Some(TaskStatus::Finished));
    }

    #[tokio::test]
    async fn test_journal_mirrors_events() {
        let dir = tempfile::tempdir().unwrap();
        let history = SessionHistory::create(dir.path()).unwrap();
        let path = history.path().to_path_buf();
        let store = MemoryTaskStore::with_journal(history);

        let task = Task::new("x");
        store.save(&task).await.unwrap();
        store
            .post_message(PostedMessage::new(&task.id, Channel::Debug, "zoom 1").with_images(vec!["data:".into()]))
            .await
            .unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        let kinds: Vec<String> = content
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["kind"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds, vec!["status", "message"]);
        assert_eq!(store.messages(&task.id).await[0].channel, Channel::Debug);
    }
}
