use serde::{Deserialize, Serialize};

use crate::errors::{DeskZoomError, DeskZoomResult};
use crate::executor::action::{ActionCall, AgentAction};

/// One catalog entry: name, prompt description and JSON-schema parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    /// Registered and dispatchable, but never offered to the model.
    #[serde(default)]
    pub hidden: bool,
}

/// Registry of actions the agent may run. Lookups fail closed.
#[derive(Debug, Clone)]
pub struct ActionCatalog {
    actions: Vec<ActionDef>,
}

impl ActionCatalog {
    /// Loads the built-in catalog from prompts/actions.json.
    /// The JSON is embedded at compile time via include_str!.
    pub fn builtin() -> DeskZoomResult<Self> {
        let json = include_str!("../../prompts/actions.json");
        let actions: Vec<ActionDef> = serde_json::from_str(json)
            .map_err(|e| DeskZoomError::Config(format!("Failed to parse action catalog: {e}")))?;
        Ok(Self { actions })
    }

    pub fn resolve(&self, name: &str) -> DeskZoomResult<&ActionDef> {
        self.actions
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| DeskZoomError::UnknownAction(name.to_string()))
    }

    /// Resolve the call's name, then type its parameters.
    pub fn build(&self, call: &ActionCall) -> DeskZoomResult<AgentAction> {
        self.resolve(&call.name)?;
        AgentAction::from_call(call)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(|a| a.name.as_str())
    }

    /// The actions offered to the model, hidden primitives left out.
    pub fn model_schema(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.actions
                .iter()
                .filter(|a| !a.hidden)
                .map(|a| {
                    serde_json::json!({
                        "name": a.name,
                        "description": a.description,
                        "parameters": a.parameters,
                    })
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HIDDEN: [&str; 6] = [
        "move_mouse",
        "click",
        "double_click",
        "drag_mouse",
        "mouse_coordinates",
        "take_screenshot",
    ];

    #[test]
    fn test_builtin_catalog_loads() {
        let catalog = ActionCatalog::builtin().unwrap();
        assert_eq!(catalog.names().count(), 14);
        assert!(catalog.resolve("click_object").is_ok());
        assert!(matches!(
            catalog.resolve("launch_rocket"),
            Err(DeskZoomError::UnknownAction(_))
        ));
    }

    #[test]
    fn test_model_schema_hides_primitives() {
        let catalog = ActionCatalog::builtin().unwrap();
        let schema = catalog.model_schema();
        let offered: Vec<&str> = schema
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["name"].as_str().unwrap())
            .collect();
        for name in HIDDEN {
            assert!(!offered.contains(&name), "{name} should be hidden");
            assert!(catalog.resolve(name).is_ok(), "{name} should stay dispatchable");
        }
        assert!(offered.contains(&"result"));
    }

    #[test]
    fn test_every_entry_builds_a_typed_action() {
        let catalog = ActionCatalog::builtin().unwrap();
        let samples = serde_json::json!({
            "click_object": { "description": "Home icon" },
            "type_text": { "text": "hello" },
            "press_key": { "key": "enter" },
            "hot_key": { "keys": ["ctrl", "c"] },
            "scroll": { "clicks": -3 },
            "open_url": { "url": "https://example.com" },
            "wait": { "seconds": 1 },
            "result": { "value": "done" },
            "move_mouse": { "x": 1, "y": 2 },
            "click": {},
            "double_click": { "button": "left" },
            "drag_mouse": { "x": 3, "y": 4 },
            "mouse_coordinates": {},
            "take_screenshot": {},
        });
        for name in catalog.names() {
            let call = ActionCall {
                name: name.to_string(),
                parameters: samples[name].as_object().cloned().unwrap(),
            };
            let action = catalog.build(&call).unwrap();
            assert_eq!(action.name(), name);
        }
    }

    #[test]
    fn test_unknown_name_fails_before_parameters() {
        let catalog = ActionCatalog::builtin().unwrap();
        let call = ActionCall {
            name: "fly".into(),
            parameters: Default::default(),
        };
        assert!(matches!(catalog.build(&call), Err(DeskZoomError::UnknownAction(_))));
    }
}
