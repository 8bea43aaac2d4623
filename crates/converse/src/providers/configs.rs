//! Per-provider credential mapping.
//!
//! Every provider stores its credentials under a different shape. The adapter table
//! below turns the stored [`ProviderAuthPayload`] into the [`RuntimeOptions`] a client
//! is constructed from. Missing fields become empty values; validation happens when
//! the request is sent.
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Credentials as kept in a user's key vault
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderAuthPayload {
    pub api_key: Option<String>,
    #[serde(alias = "baseURL")]
    pub base_url: Option<String>,
    pub api_version: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub account_id: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub endpoint: Option<String>,
}

/// Options a provider client is built from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeOptions {
    pub api_key: String,
    pub base_url: Option<String>,
    pub api_version: Option<String>,
    pub azure_api_version: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_region: Option<String>,
    pub aws_session_token: Option<String>,
    pub base_url_or_account_id: Option<String>,
    pub cloudflare_base_url_or_account_id: Option<String>,
}

impl RuntimeOptions {
    /// Look up an option by name. Empty strings count as absent.
    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "api_key" => Some(self.api_key.as_str()),
            "base_url" => self.base_url.as_deref(),
            "api_version" => self.api_version.as_deref(),
            "region" => self.region.as_deref(),
            "access_key_id" => self.access_key_id.as_deref(),
            "secret_access_key" => self.secret_access_key.as_deref(),
            "session_token" => self.session_token.as_deref(),
            "base_url_or_account_id" => self.base_url_or_account_id.as_deref(),
            _ => None,
        };
        value.filter(|v| !v.trim().is_empty())
    }

    /// The first of `required` that has no value
    pub fn missing_field(&self, required: &[&'static str]) -> Option<&'static str> {
        required.iter().copied().find(|name| self.field(name).is_none())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    OpenAiCompatible,
    Azure,
    AzureAi,
    Anthropic,
}

/// How one provider's credentials map onto a client
#[derive(Clone, Copy)]
pub struct AdapterDescriptor {
    pub family: ProviderFamily,
    pub required_fields: &'static [&'static str],
    pub default_base_url: Option<&'static str>,
    pub map: fn(&ProviderAuthPayload) -> RuntimeOptions,
}

fn value(field: &Option<String>) -> String {
    field.clone().unwrap_or_default()
}

fn map_default(auth: &ProviderAuthPayload) -> RuntimeOptions {
    RuntimeOptions {
        api_key: value(&auth.api_key),
        base_url: auth.base_url.clone(),
        ..Default::default()
    }
}

fn map_bedrock(auth: &ProviderAuthPayload) -> RuntimeOptions {
    RuntimeOptions {
        api_key: format!("{}{}", value(&auth.secret_access_key), value(&auth.access_key_id)),
        base_url: auth.base_url.clone(),
        region: auth.region.clone(),
        access_key_id: auth.access_key_id.clone(),
        secret_access_key: auth.secret_access_key.clone(),
        session_token: auth.session_token.clone(),
        aws_access_key_id: auth.access_key_id.clone(),
        aws_secret_access_key: auth.secret_access_key.clone(),
        aws_region: auth.region.clone(),
        aws_session_token: auth.session_token.clone(),
        ..Default::default()
    }
}

fn map_azure(auth: &ProviderAuthPayload) -> RuntimeOptions {
    RuntimeOptions {
        api_key: value(&auth.api_key),
        base_url: auth.base_url.clone().or_else(|| auth.endpoint.clone()),
        api_version: auth.api_version.clone(),
        azure_api_version: auth.api_version.clone(),
        ..Default::default()
    }
}

fn map_ollama(auth: &ProviderAuthPayload) -> RuntimeOptions {
    RuntimeOptions {
        base_url: auth.base_url.clone(),
        ..Default::default()
    }
}

fn map_cloudflare(auth: &ProviderAuthPayload) -> RuntimeOptions {
    let target = auth.base_url.clone().or_else(|| auth.account_id.clone());
    RuntimeOptions {
        api_key: value(&auth.api_key),
        base_url_or_account_id: target.clone(),
        cloudflare_base_url_or_account_id: target,
        ..Default::default()
    }
}

fn map_wenxin(auth: &ProviderAuthPayload) -> RuntimeOptions {
    RuntimeOptions {
        api_key: format!("{}{}", value(&auth.access_key), value(&auth.secret_key)),
        base_url: auth.base_url.clone(),
        ..Default::default()
    }
}

const OPENAI_FAMILY: &[(&str, &str)] = &[
    ("openai", "https://api.openai.com/v1"),
    ("google", "https://generativelanguage.googleapis.com/v1beta/openai"),
    ("moonshot", "https://api.moonshot.cn/v1"),
    ("perplexity", "https://api.perplexity.ai"),
    ("mistral", "https://api.mistral.ai/v1"),
    ("openrouter", "https://openrouter.ai/api/v1"),
    ("togetherai", "https://api.together.xyz/v1"),
    ("zeroone", "https://api.lingyiwanwu.com/v1"),
    ("groq", "https://api.groq.com/openai/v1"),
    ("deepseek", "https://api.deepseek.com/v1"),
    ("qwen", "https://dashscope.aliyuncs.com/compatible-mode/v1"),
    ("zhipu", "https://open.bigmodel.cn/api/paas/v4"),
    ("minimax", "https://api.minimax.chat/v1"),
    ("volcengine", "https://ark.cn-beijing.volces.com/api/v3"),
];

pub const OPENAI_PROVIDER_ID: &str = "openai";
pub const DEFAULT_BEDROCK_REGION: &str = "us-east-1";
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-06-01";

lazy_static! {
    static ref ADAPTERS: HashMap<&'static str, AdapterDescriptor> = {
        let mut adapters = HashMap::new();
        for (id, base_url) in OPENAI_FAMILY {
            adapters.insert(
                *id,
                AdapterDescriptor {
                    family: ProviderFamily::OpenAiCompatible,
                    required_fields: &["api_key"],
                    default_base_url: Some(*base_url),
                    map: map_default,
                },
            );
        }
        adapters.insert(
            "ollama",
            AdapterDescriptor {
                family: ProviderFamily::OpenAiCompatible,
                required_fields: &[],
                default_base_url: Some("http://127.0.0.1:11434/v1"),
                map: map_ollama,
            },
        );
        adapters.insert(
            "wenxin",
            AdapterDescriptor {
                family: ProviderFamily::OpenAiCompatible,
                required_fields: &["api_key"],
                default_base_url: Some("https://qianfan.baidubce.com/v2"),
                map: map_wenxin,
            },
        );
        adapters.insert(
            "cloudflare",
            AdapterDescriptor {
                family: ProviderFamily::OpenAiCompatible,
                required_fields: &["api_key", "base_url_or_account_id"],
                default_base_url: None,
                map: map_cloudflare,
            },
        );
        adapters.insert(
            "bedrock",
            AdapterDescriptor {
                family: ProviderFamily::OpenAiCompatible,
                required_fields: &["access_key_id", "secret_access_key"],
                default_base_url: None,
                map: map_bedrock,
            },
        );
        adapters.insert(
            "azure",
            AdapterDescriptor {
                family: ProviderFamily::Azure,
                required_fields: &["api_key", "base_url"],
                default_base_url: None,
                map: map_azure,
            },
        );
        adapters.insert(
            "azureai",
            AdapterDescriptor {
                family: ProviderFamily::AzureAi,
                required_fields: &["api_key", "base_url"],
                default_base_url: None,
                map: map_azure,
            },
        );
        adapters.insert(
            "anthropic",
            AdapterDescriptor {
                family: ProviderFamily::Anthropic,
                required_fields: &["api_key"],
                default_base_url: Some("https://api.anthropic.com"),
                map: map_default,
            },
        );
        adapters
    };

    static ref FALLBACK: AdapterDescriptor = AdapterDescriptor {
        family: ProviderFamily::OpenAiCompatible,
        required_fields: &["api_key"],
        default_base_url: Some("https://api.openai.com/v1"),
        map: map_default,
    };
}

/// The adapter registered for `provider_id`, if any. Lookup ignores case.
pub fn adapter(provider_id: &str) -> Option<&'static AdapterDescriptor> {
    ADAPTERS.get(provider_id.to_lowercase().as_str())
}

/// The adapter for `provider_id`, or the OpenAI-compatible adapter for unknown ids
pub fn adapter_or_default(provider_id: &str) -> &'static AdapterDescriptor {
    adapter(provider_id).unwrap_or(&*FALLBACK)
}

/// Map stored credentials to client options for `provider_id`
pub fn runtime_options(provider_id: &str, auth: &ProviderAuthPayload) -> RuntimeOptions {
    (adapter_or_default(provider_id).map)(auth)
}
