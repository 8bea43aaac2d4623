use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::prompt_template::{load_embedded, AGENT_BUILDER_PROMPT};

pub const AGENT_BUILDER_SLUG: &str = "agent-builder";

/// Per-agent chat behaviour flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatConfig {
    pub enable_history_count: bool,
    pub history_count: usize,
    pub input_template: Option<String>,
    pub enable_reasoning: bool,
    pub reasoning_budget_token: Option<u32>,
    pub reasoning_effort: Option<String>,
    pub thinking: Option<String>,
    pub thinking_budget: Option<i64>,
    pub disable_context_caching: bool,
    pub enable_streaming: bool,
    pub enable_max_tokens: bool,
    pub enable_reasoning_effort: bool,
    pub include_historical_thinking: bool,
    pub enable_memory: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        ChatConfig {
            enable_history_count: false,
            history_count: 20,
            input_template: None,
            enable_reasoning: false,
            reasoning_budget_token: None,
            reasoning_effort: None,
            thinking: None,
            thinking_budget: None,
            disable_context_caching: false,
            enable_streaming: true,
            enable_max_tokens: false,
            enable_reasoning_effort: false,
            include_historical_thinking: false,
            enable_memory: false,
        }
    }
}

impl ChatConfig {
    /// Overlay camelCase keys from `patch` on top of this config
    pub fn merged(&self, patch: &Map<String, Value>) -> Result<ChatConfig> {
        if patch.is_empty() {
            return Ok(self.clone());
        }
        let mut base = serde_json::to_value(self)?;
        if let Value::Object(fields) = &mut base {
            for (key, value) in patch {
                fields.insert(key.clone(), value.clone());
            }
        }
        Ok(serde_json::from_value(base)?)
    }
}

/// Generation parameters sent with every request
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub max_tokens: Option<u32>,
    pub reasoning_effort: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub id: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub system_role: String,
    #[serde(default)]
    pub plugins: Vec<String>,
    pub model: String,
    pub provider: String,
    #[serde(default)]
    pub params: ModelParams,
    #[serde(default)]
    pub chat_config: ChatConfig,
}

impl AgentConfig {
    pub fn new(id: impl Into<String>, model: impl Into<String>, provider: impl Into<String>) -> Self {
        AgentConfig {
            id: id.into(),
            slug: None,
            system_role: String::new(),
            plugins: Vec::new(),
            model: model.into(),
            provider: provider.into(),
            params: ModelParams::default(),
            chat_config: ChatConfig::default(),
        }
    }
}

/// Storage of agent configuration
#[async_trait]
pub trait AgentConfigService: Send + Sync {
    async fn get_agent_config(&self, agent_id: &str) -> Result<AgentConfig>;

    async fn get_chat_config(&self, agent_id: &str) -> Result<ChatConfig> {
        Ok(self.get_agent_config(agent_id).await?.chat_config)
    }
}

/// In-memory agent store, falling back to a default agent for unknown ids
#[derive(Debug, Clone, Default)]
pub struct StaticAgentConfigs {
    agents: HashMap<String, AgentConfig>,
    fallback: Option<AgentConfig>,
}

impl StaticAgentConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, agent: AgentConfig) -> Self {
        self.agents.insert(agent.id.clone(), agent);
        self
    }

    pub fn with_fallback(mut self, agent: AgentConfig) -> Self {
        self.fallback = Some(agent);
        self
    }
}

#[async_trait]
impl AgentConfigService for StaticAgentConfigs {
    async fn get_agent_config(&self, agent_id: &str) -> Result<AgentConfig> {
        self.agents
            .get(agent_id)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| anyhow!("Agent not found: {}", agent_id))
    }
}

/// Ambient values a builtin agent can adapt to
#[derive(Debug, Clone, Default)]
pub struct RuntimeContext {
    pub model: String,
    pub provider: String,
    pub target_document: Option<String>,
}

/// Values a builtin agent overrides at request time. Empty values keep the stored ones.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOverride {
    pub system_role: Option<String>,
    pub plugins: Vec<String>,
    pub chat_config: Map<String, Value>,
}

pub trait BuiltinAgentRuntime: Send + Sync {
    fn slug(&self) -> &str;
    fn runtime(&self, context: &RuntimeContext) -> Result<RuntimeOverride>;
}

/// Runtime for the assistant that helps users author other agents
pub struct AgentBuilderRuntime;

impl BuiltinAgentRuntime for AgentBuilderRuntime {
    fn slug(&self) -> &str {
        AGENT_BUILDER_SLUG
    }

    fn runtime(&self, context: &RuntimeContext) -> Result<RuntimeOverride> {
        let system_role = load_embedded(
            AGENT_BUILDER_PROMPT,
            &json!({
                "model": context.model,
                "provider": context.provider,
                "target_document": context.target_document.clone().unwrap_or_default(),
            }),
        )?;

        let mut chat_config = Map::new();
        chat_config.insert("enableHistoryCount".to_string(), json!(false));

        Ok(RuntimeOverride {
            system_role: Some(system_role),
            plugins: vec![AGENT_BUILDER_SLUG.to_string()],
            chat_config,
        })
    }
}

/// Request-scoped overrides supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct AgentOverrides {
    pub plugins: Option<Vec<String>>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub target_document: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAgentConfig {
    pub agent_id: String,
    pub model: String,
    pub provider: String,
    pub system_role: String,
    pub plugins: Vec<String>,
    pub params: ModelParams,
    pub chat_config: ChatConfig,
    pub builtin: bool,
}

pub struct AgentConfigResolver {
    service: Arc<dyn AgentConfigService>,
    builtins: HashMap<String, Arc<dyn BuiltinAgentRuntime>>,
}

impl AgentConfigResolver {
    pub fn new(service: Arc<dyn AgentConfigService>) -> Self {
        AgentConfigResolver {
            service,
            builtins: HashMap::new(),
        }
    }

    /// Resolver with the runtimes of every builtin agent registered
    pub fn with_builtin_runtimes(service: Arc<dyn AgentConfigService>) -> Self {
        Self::new(service).register(Arc::new(AgentBuilderRuntime))
    }

    pub fn register(mut self, runtime: Arc<dyn BuiltinAgentRuntime>) -> Self {
        self.builtins.insert(runtime.slug().to_string(), runtime);
        self
    }

    pub async fn resolve(
        &self,
        agent_id: &str,
        overrides: &AgentOverrides,
    ) -> Result<ResolvedAgentConfig> {
        let stored = self.service.get_agent_config(agent_id).await?;
        let model = overrides.model.clone().unwrap_or(stored.model);
        let provider = overrides.provider.clone().unwrap_or(stored.provider);

        let mut system_role = stored.system_role;
        let mut plugins = stored.plugins;
        let mut chat_config = stored.chat_config;

        let runtime = stored.slug.as_deref().and_then(|slug| self.builtins.get(slug));
        if let Some(runtime) = runtime {
            let context = RuntimeContext {
                model: model.clone(),
                provider: provider.clone(),
                target_document: overrides.target_document.clone(),
            };
            let runtime_config = runtime.runtime(&context)?;
            if let Some(role) = runtime_config.system_role.filter(|r| !r.is_empty()) {
                system_role = role;
            }
            if !runtime_config.plugins.is_empty() {
                plugins = runtime_config.plugins;
            }
            chat_config = chat_config.merged(&runtime_config.chat_config)?;
            tracing::debug!(agent = %agent_id, slug = %runtime.slug(), "applied builtin agent runtime");
        }

        if let Some(toggles) = &overrides.plugins {
            plugins = toggles.clone();
        }

        let mut params = stored.params;
        if !chat_config.enable_max_tokens {
            params.max_tokens = None;
        }
        if !chat_config.enable_reasoning_effort {
            params.reasoning_effort = None;
        }

        Ok(ResolvedAgentConfig {
            agent_id: agent_id.to_string(),
            model,
            provider,
            system_role,
            plugins,
            params,
            chat_config,
            builtin: runtime.is_some(),
        })
    }
}
