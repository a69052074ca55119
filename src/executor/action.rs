use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::device::MouseButton;
use crate::errors::{DeskZoomError, DeskZoomResult};

/// What the action model replies with on every step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ActionSelection {
    /// What is visible on the screen right now.
    pub observation: String,
    /// Why the chosen action moves the task forward.
    #[serde(alias = "reasoning")]
    pub reason: String,
    pub action: ActionCall,
}

/// An action name plus its parameters, as named by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ActionCall {
    pub name: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickKind {
    #[default]
    Single,
    Double,
}

/// Every action the executor knows how to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "parameters", rename_all = "snake_case")]
pub enum AgentAction {
    ClickObject {
        description: String,
        #[serde(rename = "type", default)]
        kind: ClickKind,
        #[serde(default)]
        button: MouseButton,
    },
    TypeText {
        text: String,
    },
    PressKey {
        key: String,
    },
    HotKey {
        keys: Vec<String>,
    },
    Scroll {
        clicks: i32,
    },
    OpenUrl {
        url: String,
    },
    Wait {
        seconds: f64,
    },
    Result {
        value: serde_json::Value,
    },
    // Primitives reached directly only by scripted callers.
    MoveMouse {
        x: i32,
        y: i32,
    },
    Click {
        #[serde(default)]
        button: MouseButton,
    },
    DoubleClick {
        #[serde(default)]
        button: MouseButton,
    },
    DragMouse {
        x: i32,
        y: i32,
    },
    MouseCoordinates {},
    TakeScreenshot {},
}

impl AgentAction {
    /// Build a typed action from a model call. The name must already be known.
    pub fn from_call(call: &ActionCall) -> DeskZoomResult<Self> {
        let value = serde_json::json!({
            "name": call.name,
            "parameters": call.parameters,
        });
        serde_json::from_value(value).map_err(|e| DeskZoomError::InvalidParameters {
            action: call.name.clone(),
            reason: e.to_string(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            AgentAction::ClickObject { .. } => "click_object",
            AgentAction::TypeText { .. } => "type_text",
            AgentAction::PressKey { .. } => "press_key",
            AgentAction::HotKey { .. } => "hot_key",
            AgentAction::Scroll { .. } => "scroll",
            AgentAction::OpenUrl { .. } => "open_url",
            AgentAction::Wait { .. } => "wait",
            AgentAction::Result { .. } => "result",
            AgentAction::MoveMouse { .. } => "move_mouse",
            AgentAction::Click { .. } => "click",
            AgentAction::DoubleClick { .. } => "double_click",
            AgentAction::DragMouse { .. } => "drag_mouse",
            AgentAction::MouseCoordinates {} => "mouse_coordinates",
            AgentAction::TakeScreenshot {} => "take_screenshot",
        }
    }
}

/// Final answer text of a `result` value; strings are taken verbatim.
pub fn result_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
