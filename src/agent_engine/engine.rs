use std::sync::Arc;
use std::time::Duration;

use crate::agent_engine::loop_control::RetryPolicy;
use crate::agent_engine::state::{Task, TaskStatus};
use crate::agent_engine::store::{ActionRecord, Channel, PostedMessage, TaskStore};
use crate::config::AppConfig;
use crate::device::{Device, DeviceCapabilities};
use crate::errors::{DeskZoomError, DeskZoomResult};
use crate::executor::action::result_text;
use crate::executor::{ActionCatalog, ActionExecutor, ActionSelection, AgentAction, ExecutorSettings};
use crate::grounding::Grounder;
use crate::llm::provider::{GatewayRole, ModelGateway, ModelReply, ResponseSchema};
use crate::llm::types::{ChatMessage, Conversation};
use crate::perception::screenshot::to_data_uri;

const SYSTEM_PROMPT: &str = "\
You are DeskZoom, an agent that operates a desktop computer to complete a task.

Task: {task}

On every turn you receive a fresh screenshot and choose exactly one action.
Available actions (JSON schema of their parameters):
{actions}

Rules:
- Describe elements to click in plain words; coordinates are worked out for you.
- When the task is complete, use the `result` action with the answer as `value`.
- Reply only with JSON matching this schema:
{schema}";

const STEP_PROMPT: &str = "\
Here is the current screenshot. Choose the next action. \
Reply only with JSON matching this schema:
{schema}";

/// Timing and policy knobs for the solver.
#[derive(Debug, Clone)]
pub struct SolverSettings {
    pub step_delay: Duration,
    pub site_wait: Duration,
    pub request_timeout: Duration,
    /// Status applied when the model declares a result.
    pub result_status: TaskStatus,
    pub executor: ExecutorSettings,
}

impl SolverSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let images_dir = config
            .grounding
            .save_images
            .then(|| config.storage.resolve_data_dir().join("images"));
        Self {
            step_delay: Duration::from_millis(config.agent.step_delay_ms),
            site_wait: Duration::from_millis(config.agent.site_wait_ms),
            request_timeout: Duration::from_secs(config.agent.request_timeout_secs),
            result_status: config.agent.result_status.into(),
            executor: ExecutorSettings {
                max_depth: config.grounding.max_depth,
                grid_size: config.grounding.grid_size,
                settle: Duration::from_millis(config.device.settle_ms),
                images_dir,
            },
        }
    }
}

enum StepOutcome {
    Continue,
    Done,
}

/// The perception-action loop: screenshot, ask, act, repeat.
pub struct TaskSolver {
    gateway: Arc<dyn ModelGateway>,
    store: Arc<dyn TaskStore>,
    grounder: Grounder,
    catalog: ActionCatalog,
    selection_schema: ResponseSchema,
    retry: RetryPolicy,
    settings: SolverSettings,
}

impl TaskSolver {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        store: Arc<dyn TaskStore>,
        config: &AppConfig,
    ) -> DeskZoomResult<Self> {
        let settings = SolverSettings::from_config(config);
        Ok(Self {
            grounder: Grounder::new(gateway.clone(), &config.grounding, settings.request_timeout)?,
            gateway,
            store,
            catalog: ActionCatalog::builtin()?,
            selection_schema: ResponseSchema::of::<ActionSelection>(),
            retry: RetryPolicy::from_config(&config.agent),
            settings,
        })
    }

    /// Make `task` known to the store so it can be cancelled before a
    /// worker picks it up.
    pub async fn register(&self, task: &Task) -> DeskZoomResult<()> {
        self.store.save(task).await
    }

    /// Drive `task` on `device` for at most `max_steps` steps.
    ///
    /// Only a device lacking required capabilities is reported as `Err`,
    /// before anything is touched. Every other outcome, failures included,
    /// comes back as the task with its final status.
    pub async fn solve(&self, mut task: Task, device: &dyn Device, max_steps: u32) -> DeskZoomResult<Task> {
        let missing = device.capabilities().missing(&DeviceCapabilities::REQUIRED);
        if !missing.is_empty() {
            return Err(DeskZoomError::UnsupportedDevice {
                device: device.name().to_string(),
                missing: missing.join(", "),
            });
        }

        tracing::info!(task_id = %task.id, device = device.name(), max_steps, "solving task");
        if let Err(e) = self.run(&mut task, device, max_steps).await {
            tracing::error!(task_id = %task.id, step = task.steps, error = %e, "task failed");
            self.finish(&mut task, TaskStatus::Failed, Some(e.to_string())).await;
        }
        Ok(task)
    }

    async fn run(&self, task: &mut Task, device: &dyn Device, max_steps: u32) -> DeskZoomResult<()> {
        task.status = TaskStatus::InProgress;
        self.store.save(task).await?;
        self.post(task, Channel::Default, format!("Starting task: {}", task.description))
            .await?;

        if let Some(site) = task.site().map(str::to_string) {
            tracing::info!(task_id = %task.id, site = %site, "opening start site");
            device.navigate(&site).await?;
            tokio::time::sleep(self.settings.site_wait).await;
        }

        let mut context = self.seed(task).await?;

        for step in 1..=max_steps {
            task.steps = step;
            if let StepOutcome::Done = self.step_with_retry(task, device, &mut context).await? {
                return Ok(());
            }
            self.store.save(task).await?;
            tokio::time::sleep(self.settings.step_delay).await;
        }

        tracing::warn!(task_id = %task.id, max_steps, "max steps reached");
        self.finish(task, TaskStatus::Failed, Some("max steps reached".into()))
            .await;
        Ok(())
    }

    /// Durable context primed with the task, the action catalog and the reply schema.
    async fn seed(&self, task: &Task) -> DeskZoomResult<Conversation> {
        let text = SYSTEM_PROMPT
            .replace("{actions}", &self.catalog.model_schema().to_string())
            .replace("{schema}", &self.selection_schema.to_prompt_string())
            .replace("{task}", &task.description);
        let mut context = Conversation::new();
        context.post("system", text, vec![]);

        let reply = self.request(GatewayRole::System, &context, None).await?;
        self.store.add_prompt(&task.id, &reply.prompt).await?;
        context.push(reply.message);
        Ok(context)
    }

    async fn step_with_retry(
        &self,
        task: &mut Task,
        device: &dyn Device,
        context: &mut Conversation,
    ) -> DeskZoomResult<StepOutcome> {
        let mut attempt = 1;
        loop {
            match self.take_action(task, device, context).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if self.retry.should_retry(&e, attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        task_id = %task.id,
                        step = task.steps,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %e,
                        ?delay,
                        "step failed, retrying"
                    );
                    self.post(
                        task,
                        Channel::Default,
                        format!(
                            "Retrying step {} after error: {e} (attempt {}/{})",
                            task.steps,
                            attempt + 1,
                            self.retry.max_attempts
                        ),
                    )
                    .await?;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn take_action(
        &self,
        task: &mut Task,
        device: &dyn Device,
        context: &mut Conversation,
    ) -> DeskZoomResult<StepOutcome> {
        match self.store.status(&task.id).await? {
            Some(TaskStatus::Cancelling) => {
                tracing::info!(task_id = %task.id, step = task.steps, "cancellation observed");
                self.finish(task, TaskStatus::Cancelled, None).await;
                return Ok(StepOutcome::Done);
            }
            Some(TaskStatus::Cancelled) => {
                task.status = TaskStatus::Cancelled;
                return Ok(StepOutcome::Done);
            }
            _ => {}
        }

        let screenshot = device.capture_screenshot().await?;
        let shot_uri = to_data_uri(&screenshot)?;
        let prompt = STEP_PROMPT.replace("{schema}", &self.selection_schema.to_prompt_string());
        let step_message = ChatMessage::with_images("user", prompt, vec![shot_uri.clone()]);

        let mut working = context.working_copy();
        working.push(step_message.clone());
        let reply = self
            .request(GatewayRole::Action, &working, Some(&self.selection_schema))
            .await?;
        self.store.add_prompt(&task.id, &reply.prompt).await?;

        let selection: ActionSelection = reply.parse().ok_or_else(|| {
            DeskZoomError::MalformedReply(format!("no action selection in: {}", reply.text()))
        })?;
        tracing::info!(
            task_id = %task.id,
            step = task.steps,
            action = %selection.action.name,
            observation = %selection.observation,
            "action selected"
        );
        self.post(
            task,
            Channel::Default,
            format!("{}\n{}", selection.observation, selection.reason),
        )
        .await?;
        self.store
            .post_message(
                PostedMessage::new(&task.id, Channel::Debug, format!("step {} screenshot", task.steps))
                    .with_images(vec![shot_uri]),
            )
            .await?;

        let action = self.catalog.build(&selection.action)?;

        if let AgentAction::Result { value } = &action {
            let answer = result_text(value);
            task.result = Some(answer.clone());
            self.record(task, &action, Some(answer), &reply).await?;
            self.finish(task, self.settings.result_status, None).await;
            return Ok(StepOutcome::Done);
        }

        let executor = ActionExecutor {
            device,
            grounder: &self.grounder,
            store: self.store.as_ref(),
            task_id: &task.id,
            settings: &self.settings.executor,
        };
        let outcome = executor.execute(&action).await?;
        self.record(task, &action, outcome, &reply).await?;

        context.push(step_message);
        context.push(reply.message);
        Ok(StepOutcome::Continue)
    }

    async fn record(
        &self,
        task: &Task,
        action: &AgentAction,
        result: Option<String>,
        reply: &ModelReply,
    ) -> DeskZoomResult<()> {
        self.store
            .record_action(ActionRecord {
                task_id: task.id.clone(),
                action: action.clone(),
                result,
                prompt_id: reply.prompt.id.clone(),
                model: reply.model.clone(),
                timestamp: chrono::Utc::now(),
            })
            .await
    }

    async fn request(
        &self,
        role: GatewayRole,
        conversation: &Conversation,
        expect: Option<&ResponseSchema>,
    ) -> DeskZoomResult<ModelReply> {
        tokio::time::timeout(
            self.settings.request_timeout,
            self.gateway.request(role, conversation, expect),
        )
        .await
        .map_err(|_| {
            DeskZoomError::Timeout(format!(
                "{} request after {:?}",
                role.as_str(),
                self.settings.request_timeout
            ))
        })?
    }

    async fn post(&self, task: &Task, channel: Channel, text: String) -> DeskZoomResult<()> {
        self.store
            .post_message(PostedMessage::new(&task.id, channel, text))
            .await
    }

    /// Apply a final status. Store failures here are logged, not raised.
    async fn finish(&self, task: &mut Task, status: TaskStatus, error: Option<String>) {
        task.status = status;
        task.error = error;
        if let Err(e) = self.store.save(task).await {
            tracing::warn!(task_id = %task.id, error = %e, "saving final status failed");
        }
        let text = match status {
            TaskStatus::Failed => format!("Task failed: {}", task.error.as_deref().unwrap_or("unknown error")),
            TaskStatus::Cancelled => "Task cancelled".to_string(),
            _ => format!("Task completed: {}", task.result.as_deref().unwrap_or("")),
        };
        tracing::info!(task_id = %task.id, status = ?status, steps = task.steps, "task settled");
        if let Err(e) = self.post(task, Channel::Default, text).await {
            tracing::warn!(task_id = %task.id, error = %e, "posting final status failed");
        }
    }
}
