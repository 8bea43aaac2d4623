use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};
use thiserror::Error;

/// Error categories surfaced to chat callers.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum ChatErrorType {
    InvalidAccessCode,
    BadRequest,
    #[serde(rename = "InvalidProviderAPIKey")]
    #[strum(serialize = "InvalidProviderAPIKey")]
    InvalidProviderApiKey,
    QuotaLimitReached,
    ExceededContextWindow,
    ProviderError,
    AbortError,
    TemplateRenderError,
}

#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[error("{error_type}: {message}")]
pub struct ChatError {
    pub error_type: ChatErrorType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl ChatError {
    pub fn new(error_type: ChatErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            error: None,
            provider: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ChatErrorType::BadRequest, message)
    }

    pub fn aborted() -> Self {
        Self::new(ChatErrorType::AbortError, "The request was aborted")
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_error(mut self, error: Value) -> Self {
        self.error = Some(error);
        self
    }

    pub fn is_abort(&self) -> bool {
        self.error_type == ChatErrorType::AbortError
    }
}

pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_error_type_names() {
        assert_eq!(ChatErrorType::InvalidProviderApiKey.to_string(), "InvalidProviderAPIKey");
        assert_eq!(
            ChatErrorType::from_str("QuotaLimitReached").unwrap(),
            ChatErrorType::QuotaLimitReached
        );
    }

    #[test]
    fn test_chat_error_serialization() {
        let err = ChatError::bad_request("missing model")
            .with_provider("openai")
            .with_error(json!({"status": 400}));

        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["error_type"], "BadRequest");
        assert_eq!(value["provider"], "openai");
        assert_eq!(value["error"]["status"], 400);
        assert_eq!(err.to_string(), "BadRequest: missing model");
    }

    #[test]
    fn test_abort_is_not_provider_failure() {
        let err = ChatError::aborted();
        assert!(err.is_abort());
        assert!(err.provider.is_none());
    }
}
