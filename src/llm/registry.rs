use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{AppConfig, LlmConfig, RoleEntry};
use crate::errors::{DeskZoomError, DeskZoomResult};
use crate::llm::provider::{
    extract_json, sanitize_messages, GatewayRole, LlmProvider, ModelGateway, ModelReply,
    PromptRecord, ResponseSchema,
};
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::{CallConfig, ChatMessage, Conversation};

/// Registry of all available LLM providers, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    active: String,
    /// Kept for role-to-model lookups (does not need to be mutable after init).
    llm_config: LlmConfig,
}

impl ProviderRegistry {
    pub fn new(active: String) -> Self {
        Self {
            providers: HashMap::new(),
            active,
            llm_config: LlmConfig::default(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get_active(&self) -> DeskZoomResult<Arc<dyn LlmProvider>> {
        self.providers
            .get(&self.active)
            .cloned()
            .ok_or_else(|| DeskZoomError::Config(format!("Active provider '{}' not found in registry", self.active)))
    }

    pub fn list_names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    fn role_entry(&self, role: GatewayRole) -> Option<&RoleEntry> {
        let roles = &self.llm_config.roles;
        match role {
            GatewayRole::System => roles.system.as_ref(),
            GatewayRole::Action => roles.action.as_ref(),
            GatewayRole::Zoom => roles.zoom.as_ref(),
        }
    }

    /// Return the provider and call configuration for a named agent role.
    ///
    /// Role resolution order:
    /// 1. `[llm.roles.<role>]` in config.toml
    /// 2. Fallback: active provider with its default model / temperature, JSON mode on
    pub fn call_config_for_role(&self, role: GatewayRole) -> DeskZoomResult<(Arc<dyn LlmProvider>, CallConfig)> {
        if let Some(entry) = self.role_entry(role) {
            let provider = self.providers.get(&entry.provider).cloned().ok_or_else(|| {
                DeskZoomError::Config(format!(
                    "Role '{}' references unknown provider '{}'",
                    role.as_str(),
                    entry.provider
                ))
            })?;
            let temperature = entry.temperature.unwrap_or_else(|| {
                self.llm_config
                    .providers
                    .get(&entry.provider)
                    .map(|p| p.temperature)
                    .unwrap_or(0.1)
            });
            tracing::debug!(
                role = role.as_str(),
                provider = %entry.provider,
                model = %entry.model,
                temperature = temperature,
                "resolved role config"
            );
            return Ok((
                provider,
                CallConfig {
                    model: entry.model.clone(),
                    temperature,
                    json_mode: entry.json_mode,
                },
            ));
        }

        // Fallback: active provider, provider-level defaults
        let provider = self.get_active()?;
        let entry = self.llm_config.providers.get(&self.active);
        let (model, temperature) = entry
            .map(|p| (p.model.clone(), p.temperature))
            .unwrap_or_else(|| (String::new(), 0.1));
        tracing::debug!(
            role = role.as_str(),
            provider = %self.active,
            model = %model,
            "role not configured, using active provider fallback"
        );
        Ok((
            provider,
            CallConfig {
                model,
                temperature,
                json_mode: true,
            },
        ))
    }

    /// Build a registry from the loaded app config.
    /// API keys are read from environment variables named `DESKZOOM_<ID>_API_KEY`.
    pub fn from_config(config: &AppConfig) -> DeskZoomResult<Self> {
        let mut registry = Self {
            providers: HashMap::new(),
            active: config.llm.active_provider.clone(),
            llm_config: config.llm.clone(),
        };
        for (id, entry) in &config.llm.providers {
            let api_key = std::env::var(format!("DESKZOOM_{}_API_KEY", id.to_uppercase()))
                .unwrap_or_else(|_| entry.api_key.clone().unwrap_or_default());
            let provider = OpenAiCompatibleProvider::new(
                id.clone(),
                entry.api_base.clone(),
                api_key,
                Duration::from_secs(entry.timeout_secs),
            )?;
            registry.register(Arc::new(provider));
        }
        Ok(registry)
    }
}

#[async_trait]
impl ModelGateway for ProviderRegistry {
    async fn request(
        &self,
        role: GatewayRole,
        conversation: &Conversation,
        expect: Option<&ResponseSchema>,
    ) -> DeskZoomResult<ModelReply> {
        let (provider, mut cfg) = self.call_config_for_role(role)?;
        cfg.json_mode &= expect.is_some();

        let response = provider.chat(conversation.messages(), &cfg).await?;
        let parsed = expect.and_then(|_| extract_json(&response.content));
        if expect.is_some() && parsed.is_none() {
            tracing::warn!(role = role.as_str(), "structured reply expected but none found");
        }
        let model = response.model.unwrap_or_else(|| cfg.model.clone());

        Ok(ModelReply {
            prompt: PromptRecord {
                id: uuid::Uuid::new_v4().to_string(),
                role,
                model: model.clone(),
                messages: sanitize_messages(conversation.messages()),
                response: response.content.clone(),
                timestamp: chrono::Utc::now(),
            },
            message: ChatMessage::text("assistant", response.content),
            parsed,
            model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::LlmResponse;

    struct Canned {
        id: String,
        reply: String,
    }

    #[async_trait]
    impl LlmProvider for Canned {
        fn name(&self) -> &str {
            &self.id
        }

        async fn chat(&self, _messages: &[ChatMessage], cfg: &CallConfig) -> DeskZoomResult<LlmResponse> {
            Ok(LlmResponse {
                content: format!("{} json_mode={}", self.reply, cfg.json_mode),
                model: None,
            })
        }
    }

    fn registry_with(reply: &str) -> ProviderRegistry {
        let cfg: AppConfig = toml::from_str(
            r#"
            [llm]
            active_provider = "canned"
            [llm.providers.canned]
            display_name = "Canned"
            api_base = "http://localhost"
            model = "base-model"
            [llm.roles.zoom]
            provider = "canned"
            model = "zoom-model"
            temperature = 0.0
            "#,
        )
        .unwrap();
        let mut registry = ProviderRegistry::new(cfg.llm.active_provider.clone());
        registry.llm_config = cfg.llm.clone();
        registry.register(Arc::new(Canned {
            id: "canned".into(),
            reply: reply.into(),
        }));
        registry
    }

    #[test]
    fn test_role_resolution() {
        let registry = registry_with("");
        let (_, zoom) = registry.call_config_for_role(GatewayRole::Zoom).unwrap();
        assert_eq!(zoom.model, "zoom-model");
        assert_eq!(zoom.temperature, 0.0);

        let (_, action) = registry.call_config_for_role(GatewayRole::Action).unwrap();
        assert_eq!(action.model, "base-model");
    }

    #[test]
    fn test_unknown_active_provider() {
        let registry = ProviderRegistry::new("missing".into());
        assert!(matches!(
            registry.call_config_for_role(GatewayRole::Action),
            Err(DeskZoomError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_request_parses_when_schema_expected() {
        let registry = registry_with(r#"{"number": 2}"#);
        let mut conv = Conversation::new();
        conv.post("user", "pick", vec![]);

        let schema = ResponseSchema {
            name: "Pick".into(),
            schema: serde_json::json!({}),
        };
        let reply = registry.request(GatewayRole::Zoom, &conv, Some(&schema)).await.unwrap();
        assert_eq!(reply.parsed.as_ref().unwrap()["number"], 2);
        assert!(reply.text().ends_with("json_mode=true"));
        assert_eq!(reply.model, "zoom-model");

        let free = registry.request(GatewayRole::Zoom, &conv, None).await.unwrap();
        assert!(free.parsed.is_none());
        assert!(free.text().ends_with("json_mode=false"));
    }
}
