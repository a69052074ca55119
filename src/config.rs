use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{DeskZoomError, DeskZoomResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub grounding: GroundingConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    pub active_provider: String,
    pub providers: HashMap<String, ProviderEntry>,
    /// Role-to-model mapping. If a role is absent, falls back to active_provider defaults.
    #[serde(default)]
    pub roles: RolesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    /// Full chat-completions endpoint URL.
    pub api_base: String,
    /// Default model for this provider (used as fallback when no role config exists).
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Optional API key stored in config.toml (falls back to env var DESKZOOM_<ID>_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

/// Maps agent roles to specific provider+model combinations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolesConfig {
    /// Opening handshake that primes the model with the task and action schema.
    pub system: Option<RoleEntry>,
    /// Per-step action selection from a screenshot.
    pub action: Option<RoleEntry>,
    /// Grid zoom selection during grounding.
    pub zoom: Option<RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    /// Model name sent to the API.
    pub model: String,
    /// Overrides the provider-level temperature for this role.
    pub temperature: Option<f64>,
    /// Ask the endpoint for a JSON object reply when a schema is expected.
    #[serde(default = "default_true")]
    pub json_mode: bool,
}

fn default_temperature() -> f64 {
    0.1
}

fn default_provider_timeout() -> u64 {
    120
}

/// Terminal status applied when the model declares a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    #[default]
    Review,
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_steps: u32,
    /// Attempts per step, including the first one.
    pub max_attempts: u32,
    /// Base delay before a retry; attempt `n` waits `n * retry_delay_ms`.
    pub retry_delay_ms: u64,
    /// Pause between successful steps so the desktop can settle.
    pub step_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub result_status: ResultStatus,
    pub site_wait_ms: u64,
    pub workers: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 30,
            max_attempts: 5,
            retry_delay_ms: 2000,
            step_delay_ms: 2000,
            request_timeout_secs: 120,
            result_status: ResultStatus::Review,
            site_wait_ms: 5000,
            workers: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GroundingStrategy {
    /// Numbered cells; zoom a fixed number of levels and click the final centre.
    #[default]
    Cells,
    /// Numbered markers at grid intersections; stop as soon as the model reports an exact hit.
    Markers,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundingConfig {
    pub strategy: GroundingStrategy,
    pub max_depth: u32,
    pub grid_size: u32,
    pub color_circle: String,
    pub color_text: String,
    pub opacity: f32,
    pub grayscale: bool,
    /// Zooming stops once a grid cell would be narrower than this.
    pub min_cell_px: u32,
    pub save_images: bool,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            strategy: GroundingStrategy::Cells,
            max_depth: 3,
            grid_size: 3,
            color_circle: "red".into(),
            color_text: "yellow".into(),
            opacity: 1.0,
            grayscale: true,
            min_cell_px: 4,
            save_images: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    /// Pause between moving the pointer and clicking.
    pub settle_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 30,
            settle_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Append every task event to a JSONL session file.
    pub journal: bool,
    pub data_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            journal: true,
            data_dir: None,
        }
    }
}

impl StorageConfig {
    /// `<local data dir>/DeskZoom`, falling back to the current working directory.
    pub fn resolve_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        match dirs::data_local_dir() {
            Some(base) => base.join("DeskZoom"),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

fn default_true() -> bool {
    true
}

fn resolve_config_path() -> DeskZoomResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(DeskZoomError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config() -> DeskZoomResult<AppConfig> {
    let path = resolve_config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> DeskZoomResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    config.validate()?;
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}

pub fn save_config(config: &AppConfig, path: &Path) -> DeskZoomResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

impl AppConfig {
    pub fn validate(&self) -> DeskZoomResult<()> {
        if self.agent.max_attempts == 0 {
            return Err(DeskZoomError::Config("agent.max_attempts must be at least 1".into()));
        }
        if self.grounding.grid_size < 2 {
            return Err(DeskZoomError::Config("grounding.grid_size must be at least 2".into()));
        }
        if self.grounding.strategy == GroundingStrategy::Markers && self.grounding.grid_size < 3 {
            return Err(DeskZoomError::Config(
                "grounding.grid_size must be at least 3 for the markers strategy".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [llm]
        active_provider = "openai"

        [llm.providers.openai]
        display_name = "OpenAI"
        api_base = "https://api.openai.com/v1/chat/completions"
        model = "gpt-4o"
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg: AppConfig = toml::from_str(MINIMAL).unwrap();
        assert_eq!(cfg.agent.max_steps, 30);
        assert_eq!(cfg.agent.max_attempts, 5);
        assert_eq!(cfg.agent.result_status, ResultStatus::Review);
        assert_eq!(cfg.grounding.strategy, GroundingStrategy::Cells);
        assert_eq!(cfg.grounding.max_depth, 3);
        assert_eq!(cfg.llm.providers["openai"].temperature, 0.1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_markers_need_three_cells() {
        let mut cfg: AppConfig = toml::from_str(MINIMAL).unwrap();
        cfg.grounding.strategy = GroundingStrategy::Markers;
        cfg.grounding.grid_size = 2;
        assert!(matches!(cfg.validate(), Err(DeskZoomError::Config(_))));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut cfg: AppConfig = toml::from_str(MINIMAL).unwrap();
        cfg.grounding.grid_size = 6;
        cfg.agent.result_status = ResultStatus::Finished;
        save_config(&cfg, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.grounding.grid_size, 6);
        assert_eq!(loaded.agent.result_status, ResultStatus::Finished);
    }
}
