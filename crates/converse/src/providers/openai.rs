use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::base::{ChatPayload, ChatResponse, Provider};
use super::utils::{
    check_openai_context_length_error, openai_event_stream, openai_request_body,
    openai_response_to_completion, send, MissingCredentialError, ProviderHttpError,
    RequestAbortedError,
};

/// Where chat completion requests are sent
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    /// `{base}/chat/completions` with bearer auth
    Standard { base_url: String },
    /// Azure OpenAI: the model names a deployment and the key goes in `api-key`
    AzureDeployment { base_url: String, api_version: String },
    /// Azure AI inference: `{base}/chat/completions?api-version=`
    AzureInference { base_url: String, api_version: String },
}

impl Endpoint {
    pub fn url(&self, model: &str) -> String {
        match self {
            Endpoint::Standard { base_url } => {
                format!("{}/chat/completions", base_url.trim_end_matches('/'))
            }
            Endpoint::AzureDeployment {
                base_url,
                api_version,
            } => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                base_url.trim_end_matches('/'),
                model,
                api_version
            ),
            Endpoint::AzureInference {
                base_url,
                api_version,
            } => format!(
                "{}/chat/completions?api-version={}",
                base_url.trim_end_matches('/'),
                api_version
            ),
        }
    }

    fn is_azure(&self) -> bool {
        !matches!(self, Endpoint::Standard { .. })
    }
}

/// Client for every provider that speaks the OpenAI chat completions protocol
pub struct OpenAiCompatibleProvider {
    id: String,
    client: Client,
    endpoint: Endpoint,
    api_key: String,
    missing_credential: Option<&'static str>,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: impl Into<String>, endpoint: Endpoint, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self {
            id: id.into(),
            client,
            endpoint,
            api_key: api_key.into(),
            missing_credential: None,
        })
    }

    /// Fail every request with a missing credential error for `field`
    pub fn with_missing_credential(mut self, field: Option<&'static str>) -> Self {
        self.missing_credential = field;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn chat(&self, payload: ChatPayload, cancel: CancellationToken) -> Result<ChatResponse> {
        if let Some(field) = self.missing_credential {
            return Err(MissingCredentialError {
                provider: self.id.clone(),
                field: field.to_string(),
            }
            .into());
        }

        let body = openai_request_body(&payload)?;
        let url = self.endpoint.url(&payload.model);
        tracing::debug!(provider = %self.id, model = %payload.model, stream = payload.stream, "dispatching chat request");

        let mut request = self.client.post(&url).json(&body);
        if self.endpoint.is_azure() {
            request = request.header("api-key", &self.api_key);
        } else if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = send(request, &cancel).await?;
        if payload.stream {
            return Ok(ChatResponse::Stream(openai_event_stream(response)));
        }

        let response: Value = tokio::select! {
            _ = cancel.cancelled() => return Err(RequestAbortedError.into()),
            body = response.json() => body?,
        };

        // Raise specific error if context length is exceeded
        if let Some(error) = response.get("error") {
            if let Some(err) = check_openai_context_length_error(error) {
                return Err(err.into());
            }
            return Err(ProviderHttpError {
                status: 200,
                body: error.clone(),
            }
            .into());
        }

        Ok(ChatResponse::Complete(openai_response_to_completion(&response)?))
    }
}
