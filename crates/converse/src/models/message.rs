use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageItem {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub alt: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VideoItem {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub alt: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileItem {
    pub id: String,
    pub name: String,
    pub file_type: String,
    pub size: u64,
    pub url: String,
}

/// A tool call made by the assistant, or the call a tool result answers
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub id: String,
    pub identifier: String,
    pub api_name: String,
    #[serde(default)]
    pub arguments: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub tool_type: Option<String>,
}

impl ToolInvocation {
    pub fn new(
        id: impl Into<String>,
        identifier: impl Into<String>,
        api_name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            identifier: identifier.into(),
            api_name: api_name.into(),
            arguments: arguments.into(),
            tool_type: None,
        }
    }

    pub fn with_type(mut self, tool_type: impl Into<String>) -> Self {
        self.tool_type = Some(tool_type.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Reasoning {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

/// A conversation turn as stored in history, before any provider-specific shaping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    #[serde(default)]
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub image_list: Vec<ImageItem>,
    #[serde(default)]
    pub video_list: Vec<VideoItem>,
    #[serde(default)]
    pub file_list: Vec<FileItem>,
    #[serde(default)]
    pub tools: Vec<ToolInvocation>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub plugin: Option<ToolInvocation>,
    #[serde(default)]
    pub reasoning: Option<Reasoning>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl ChatTurn {
    pub fn new(role: Role) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        ChatTurn {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: None,
            created_at: now,
            updated_at: now,
            image_list: Vec::new(),
            video_list: Vec::new(),
            file_list: Vec::new(),
            tools: Vec::new(),
            tool_call_id: None,
            plugin: None,
            reasoning: None,
            meta: Map::new(),
        }
    }

    pub fn user() -> Self {
        Self::new(Role::User)
    }

    pub fn assistant() -> Self {
        Self::new(Role::Assistant)
    }

    pub fn system() -> Self {
        Self::new(Role::System)
    }

    /// A tool result answering the call `call_id`
    pub fn tool_result(call_id: impl Into<String>, plugin: ToolInvocation) -> Self {
        let mut turn = Self::new(Role::Tool);
        turn.tool_call_id = Some(call_id.into());
        turn.plugin = Some(plugin);
        turn
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.content = Some(text.into());
        self
    }

    pub fn with_image(mut self, id: impl Into<String>, url: impl Into<String>) -> Self {
        self.image_list.push(ImageItem {
            id: id.into(),
            url: url.into(),
            alt: String::new(),
        });
        self
    }

    pub fn with_video(mut self, id: impl Into<String>, url: impl Into<String>) -> Self {
        self.video_list.push(VideoItem {
            id: id.into(),
            url: url.into(),
            alt: String::new(),
        });
        self
    }

    pub fn with_file(mut self, file: FileItem) -> Self {
        self.file_list.push(file);
        self
    }

    pub fn with_tool(mut self, tool: ToolInvocation) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_reasoning(mut self, content: impl Into<String>, signature: Option<String>) -> Self {
        self.reasoning = Some(Reasoning {
            content: Some(content.into()),
            signature,
        });
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}
