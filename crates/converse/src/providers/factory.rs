use anyhow::Result;

use super::anthropic::AnthropicProvider;
use super::base::Provider;
use super::configs::{
    adapter_or_default, AdapterDescriptor, ProviderAuthPayload, ProviderFamily, RuntimeOptions,
    DEFAULT_AZURE_API_VERSION, DEFAULT_BEDROCK_REGION,
};
use super::openai::{Endpoint, OpenAiCompatibleProvider};

const CLOUDFLARE_API: &str = "https://api.cloudflare.com/client/v4/accounts";

/// `base_url_or_account_id` is either a full gateway URL or a bare account id
fn cloudflare_base_url(target: &str) -> String {
    if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else {
        format!("{}/{}/ai/v1", CLOUDFLARE_API, target)
    }
}

fn bedrock_base_url(options: &RuntimeOptions) -> String {
    let region = options.field("region").unwrap_or(DEFAULT_BEDROCK_REGION);
    format!("https://bedrock-runtime.{}.amazonaws.com/openai/v1", region)
}

fn base_url(provider_id: &str, adapter: &AdapterDescriptor, options: &RuntimeOptions) -> String {
    match provider_id {
        "cloudflare" => options
            .field("base_url_or_account_id")
            .map(cloudflare_base_url)
            .unwrap_or_default(),
        "bedrock" => options
            .field("base_url")
            .map(str::to_string)
            .unwrap_or_else(|| bedrock_base_url(options)),
        _ => options
            .field("base_url")
            .or(adapter.default_base_url)
            .unwrap_or_default()
            .to_string(),
    }
}

/// Build a client for `provider_id` from stored credentials.
///
/// The lookup ignores case and unknown ids get the OpenAI-compatible client.
/// Nothing is sent over the network here; missing credentials surface on the
/// first request.
pub fn initialize(provider_id: &str, auth: &ProviderAuthPayload) -> Result<Box<dyn Provider>> {
    let id = provider_id.to_lowercase();
    let adapter = adapter_or_default(&id);
    let options = (adapter.map)(auth);
    let missing = options.missing_field(adapter.required_fields);
    let base_url = base_url(&id, adapter, &options);
    let api_version = options
        .azure_api_version
        .clone()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string());

    let endpoint = match adapter.family {
        ProviderFamily::Anthropic => {
            return Ok(Box::new(AnthropicProvider::new(base_url, options.api_key)?));
        }
        ProviderFamily::OpenAiCompatible => Endpoint::Standard { base_url },
        ProviderFamily::Azure => Endpoint::AzureDeployment {
            base_url,
            api_version,
        },
        ProviderFamily::AzureAi => Endpoint::AzureInference {
            base_url,
            api_version,
        },
    };

    tracing::debug!(provider = %id, endpoint = ?endpoint, "initialized provider client");
    Ok(Box::new(
        OpenAiCompatibleProvider::new(id, endpoint, options.api_key)?.with_missing_credential(missing),
    ))
}
