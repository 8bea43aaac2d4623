use serde::{Deserialize, Serialize};

use super::message::{Reasoning, Role};

pub const DEFAULT_IMAGE_DETAIL: &str = "auto";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    VideoUrl { video_url: VideoUrl },
    Thinking { thinking: String, signature: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: url.into(),
                detail: DEFAULT_IMAGE_DETAIL.to_string(),
            },
        }
    }

    pub fn video(url: impl Into<String>) -> Self {
        ContentPart::VideoUrl {
            video_url: VideoUrl { url: url.into() },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Message content is either a plain string or an ordered list of parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for WireContent {
    fn default() -> Self {
        WireContent::Text(String::new())
    }
}

impl WireContent {
    /// Concatenated text of the content, ignoring non-text parts
    pub fn text(&self) -> String {
        match self {
            WireContent::Text(text) => text.clone(),
            WireContent::Parts(parts) => parts
                .iter()
                .filter_map(ContentPart::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            WireContent::Text(text) => text.is_empty(),
            WireContent::Parts(parts) => parts.is_empty(),
        }
    }

    /// Apply `f` to the string content or to every text part
    pub fn map_text<F>(self, mut f: F) -> Self
    where
        F: FnMut(String) -> String,
    {
        match self {
            WireContent::Text(text) => WireContent::Text(f(text)),
            WireContent::Parts(parts) => WireContent::Parts(
                parts
                    .into_iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => ContentPart::Text { text: f(text) },
                        other => other,
                    })
                    .collect(),
            ),
        }
    }
}

impl From<&str> for WireContent {
    fn from(text: &str) -> Self {
        WireContent::Text(text.to_string())
    }
}

impl From<String> for WireContent {
    fn from(text: String) -> Self {
        WireContent::Text(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFunction {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: WireFunction,
}

impl WireToolCall {
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: "function".to_string(),
            function: WireFunction {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// The exact message shape sent to a provider's chat-completion endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: WireContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Prior assistant reasoning, for providers that take it back as a field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Reasoning>,
}

impl WireMessage {
    pub fn new(role: Role, content: impl Into<WireContent>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            name: None,
            reasoning: None,
        }
    }

    pub fn system(content: impl Into<WireContent>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<WireContent>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<WireContent>) -> Self {
        Self::new(Role::Assistant, content)
    }
}
