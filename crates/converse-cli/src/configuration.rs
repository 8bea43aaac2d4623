use crate::error::{to_env_var, ConfigError, ENV_PREFIX};
use config::{Config, Environment, File};
use converse::agent_config::{AgentConfig, ChatConfig, ModelParams};
use converse::chat::ChatServiceOptions;
use converse::placeholder::UserContext;
use converse::providers::configs::ProviderAuthPayload;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_AGENT_ID: &str = "default";

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_agent_id")]
    pub id: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Required, there is no sensible default provider
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub system_role: String,
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    #[serde(default = "default_true")]
    pub enable_streaming: bool,
    #[serde(default)]
    pub enable_history_count: bool,
    #[serde(default = "default_history_count")]
    pub history_count: usize,
    #[serde(default)]
    pub input_template: Option<String>,
    #[serde(default)]
    pub enable_reasoning: bool,
    #[serde(default)]
    pub reasoning_budget_token: Option<u32>,
    #[serde(default)]
    pub disable_context_caching: bool,
    #[serde(default)]
    pub include_historical_thinking: bool,
}

/// Credentials for one provider, in snake_case so they can come from the environment
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeyVaultSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl KeyVaultSettings {
    pub fn into_auth(self) -> ProviderAuthPayload {
        ProviderAuthPayload {
            api_key: self.api_key,
            base_url: self.base_url,
            api_version: self.api_version,
            region: self.region,
            access_key_id: self.access_key_id,
            secret_access_key: self.secret_access_key,
            session_token: self.session_token,
            account_id: self.account_id,
            endpoint: self.endpoint,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeploymentSettings {
    #[serde(default)]
    pub server_mode: bool,
    #[serde(default)]
    pub include_file_url: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessSettings {
    #[serde(default)]
    pub auth_enabled: bool,
    #[serde(default)]
    pub signed_in: bool,
    #[serde(default)]
    pub fetch_on_client: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserSettings {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub agent: AgentSettings,
    #[serde(default)]
    pub key_vaults: HashMap<String, KeyVaultSettings>,
    #[serde(default)]
    pub deployment: DeploymentSettings,
    #[serde(default)]
    pub access: AccessSettings,
    #[serde(default)]
    pub user: UserSettings,
    /// JSON file with the tool manifests offered to the model
    #[serde(default)]
    pub tools_file: Option<PathBuf>,
}

impl Settings {
    /// Load from the default config file (if any) and the environment
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate(default_config_file().as_deref())
    }

    /// Load from `path` (if it exists) and the environment
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::load_and_validate(Some(path))
    }

    fn load_and_validate(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("agent.id", default_agent_id())?
            .set_default("agent.model", default_model())?;
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();
        let settings = match result {
            Ok(settings) => settings,
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);
                return Err(match &err {
                    config::ConfigError::NotFound(field) => ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    },
                    _ => ConfigError::Other(err),
                });
            }
        };

        if settings.agent.provider.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingEnvVar {
                env_var: to_env_var("agent.provider"),
            });
        }
        Ok(settings)
    }

    pub fn provider(&self) -> &str {
        self.agent.provider.as_deref().unwrap_or_default()
    }

    pub fn agent_config(&self) -> AgentConfig {
        let agent = &self.agent;
        let mut config = AgentConfig::new(&agent.id, &agent.model, self.provider());
        config.system_role = agent.system_role.clone();
        config.plugins = agent.plugins.clone();
        config.params = ModelParams {
            temperature: agent.temperature,
            top_p: agent.top_p,
            max_tokens: agent.max_tokens,
            reasoning_effort: agent.reasoning_effort.clone(),
            ..Default::default()
        };
        config.chat_config = ChatConfig {
            enable_streaming: agent.enable_streaming,
            enable_history_count: agent.enable_history_count,
            history_count: agent.history_count,
            input_template: agent.input_template.clone(),
            enable_reasoning: agent.enable_reasoning,
            reasoning_budget_token: agent.reasoning_budget_token,
            disable_context_caching: agent.disable_context_caching,
            include_historical_thinking: agent.include_historical_thinking,
            enable_max_tokens: agent.max_tokens.is_some(),
            enable_reasoning_effort: agent.reasoning_effort.is_some(),
            ..Default::default()
        };
        config
    }

    pub fn key_vaults(&self) -> HashMap<String, ProviderAuthPayload> {
        self.key_vaults
            .iter()
            .map(|(id, vault)| (id.clone(), vault.clone().into_auth()))
            .collect()
    }

    pub fn service_options(&self) -> ChatServiceOptions {
        ChatServiceOptions {
            server_mode: self.deployment.server_mode,
            include_file_url: self.deployment.include_file_url,
            auth_enabled: self.access.auth_enabled,
            signed_in: self.access.signed_in,
            fetch_on_client: self.access.fetch_on_client,
        }
    }

    pub fn user_context(&self) -> UserContext {
        UserContext {
            username: self.user.username.clone(),
            nickname: self.user.nickname.clone(),
            language: self.user.language.clone(),
            model: Some(self.agent.model.clone()),
            provider: self.agent.provider.clone(),
        }
    }
}

pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("converse"))
}

fn default_config_file() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

fn default_agent_id() -> String {
    DEFAULT_AGENT_ID.to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_true() -> bool {
    true
}

fn default_history_count() -> usize {
    20
}
