// Runs typed agent actions against a device.
use std::path::PathBuf;
use std::time::Duration;

use image::DynamicImage;

use crate::agent_engine::store::{Channel, PostedMessage, TaskStore};
use crate::device::{Device, MouseButton};
use crate::errors::DeskZoomResult;
use crate::executor::action::{result_text, AgentAction, ClickKind};
use crate::executor::{coordinator, input};
use crate::grounding::{Grounder, GroundingRequest, GroundingTrace};
use crate::perception::screenshot::to_data_uri;

/// Longest pause a `wait` action may request.
const MAX_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub max_depth: u32,
    pub grid_size: u32,
    /// Pause between moving the pointer and clicking.
    pub settle: Duration,
    /// Where grounding images go when saving is enabled.
    pub images_dir: Option<PathBuf>,
}

/// Executes actions for one task on one device.
pub struct ActionExecutor<'a> {
    pub device: &'a dyn Device,
    pub grounder: &'a Grounder,
    pub store: &'a dyn TaskStore,
    pub task_id: &'a str,
    pub settings: &'a ExecutorSettings,
}

impl ActionExecutor<'_> {
    /// Run `action`; the returned text, if any, is the action's result.
    pub async fn execute(&self, action: &AgentAction) -> DeskZoomResult<Option<String>> {
        tracing::info!(task_id = self.task_id, action = action.name(), "executing action");
        match action {
            AgentAction::ClickObject {
                description,
                kind,
                button,
            } => self.click_object(description, *kind, *button).await,
            AgentAction::TypeText { text } => {
                self.device.type_text(text).await?;
                Ok(None)
            }
            AgentAction::PressKey { key } => {
                self.device.press_key(key).await?;
                Ok(None)
            }
            AgentAction::HotKey { keys } => {
                self.device.hot_key(keys).await?;
                Ok(None)
            }
            AgentAction::Scroll { clicks } => {
                self.device.scroll(*clicks).await?;
                Ok(None)
            }
            AgentAction::OpenUrl { url } => {
                self.device.navigate(url).await?;
                Ok(None)
            }
            AgentAction::Wait { seconds } => {
                let wait = Duration::try_from_secs_f64(seconds.max(0.0))
                    .unwrap_or(MAX_WAIT)
                    .min(MAX_WAIT);
                tokio::time::sleep(wait).await;
                Ok(None)
            }
            AgentAction::Result { value } => Ok(Some(result_text(value))),
            AgentAction::MoveMouse { x, y } => {
                self.device.move_pointer(*x, *y).await?;
                Ok(None)
            }
            AgentAction::Click { button } => {
                self.device.click(*button).await?;
                Ok(None)
            }
            AgentAction::DoubleClick { button } => {
                self.device.double_click(*button).await?;
                Ok(None)
            }
            AgentAction::DragMouse { x, y } => {
                self.device.drag_to(*x, *y).await?;
                Ok(None)
            }
            AgentAction::MouseCoordinates {} => {
                let (x, y) = self.device.pointer_position().await?;
                Ok(Some(serde_json::json!({ "x": x, "y": y }).to_string()))
            }
            AgentAction::TakeScreenshot {} => {
                let shot = self.device.capture_screenshot().await?;
                self.store
                    .post_message(
                        PostedMessage::new(self.task_id, Channel::Debug, "screenshot")
                            .with_images(vec![to_data_uri(&shot)?]),
                    )
                    .await?;
                Ok(None)
            }
        }
    }

    async fn click_object(
        &self,
        description: &str,
        kind: ClickKind,
        button: MouseButton,
    ) -> DeskZoomResult<Option<String>> {
        let screenshot = self.device.capture_screenshot().await?;
        let request = GroundingRequest {
            description: description.to_string(),
            max_depth: self.settings.max_depth,
            grid_size: self.settings.grid_size,
        };
        let mut trace = GroundingTrace::new(description);
        let located = self.grounder.locate(&request, &screenshot, &mut trace).await;

        // The audit trail is published whether or not grounding succeeded.
        if let Err(e) = self.publish_trace(&trace, &screenshot).await {
            tracing::warn!(error = %e, task_id = self.task_id, "publishing grounding trace failed");
        }
        let point = located?;

        let screen = self.device.screen_size().await?;
        let (x, y) = coordinator::to_screen(point, (screenshot.width(), screenshot.height()), screen);
        tracing::info!(target_desc = description, x, y, "clicking grounded object");
        input::click_at(self.device, x, y, kind, button, self.settings.settle).await?;
        Ok(Some(format!("clicked '{description}' at ({x}, {y})")))
    }

    async fn publish_trace(&self, trace: &GroundingTrace, screenshot: &DynamicImage) -> DeskZoomResult<()> {
        for it in &trace.iterations {
            self.store.add_prompt(self.task_id, &it.prompt).await?;
            let annotated = to_data_uri(&DynamicImage::ImageRgba8(it.annotated.clone()))?;
            self.store
                .post_message(
                    PostedMessage::new(
                        self.task_id,
                        Channel::Debug,
                        format!("zoom level {} for '{}': {}", it.depth, trace.description, it.reply),
                    )
                    .with_images(vec![annotated]),
                )
                .await?;
        }
        if trace.point.is_some() {
            let debug = to_data_uri(&DynamicImage::ImageRgba8(trace.debug_image(screenshot)))?;
            self.store
                .post_message(
                    PostedMessage::new(self.task_id, Channel::Debug, format!("grounded '{}'", trace.description))
                        .with_images(vec![debug]),
                )
                .await?;
        }
        if let Some(dir) = &self.settings.images_dir {
            trace.save_images(screenshot, &dir.join(self.task_id))?;
        }
        Ok(())
    }
}
