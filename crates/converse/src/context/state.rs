use serde_json::{Map, Value};

use crate::models::message::{
    ChatTurn, FileItem, ImageItem, Reasoning, Role, ToolInvocation, VideoItem,
};
use crate::models::wire::{WireContent, WireMessage, WireToolCall};
use crate::tool_name::ToolNameResolver;

pub const SYSTEM_ROLE_SEPARATOR: &str = "\n\n";

/// A message in flight: wire fields plus the internal fields processors still need
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineMessage {
    pub role: Role,
    pub content: WireContent,
    pub tool_calls: Option<Vec<WireToolCall>>,
    pub tool_call_id: Option<String>,
    pub name: Option<String>,
    /// Reasoning handed back to the provider as a message field
    pub kept_reasoning: Option<Reasoning>,

    pub id: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub image_list: Vec<ImageItem>,
    pub video_list: Vec<VideoItem>,
    pub file_list: Vec<FileItem>,
    pub tools: Vec<ToolInvocation>,
    pub plugin: Option<ToolInvocation>,
    pub reasoning: Option<Reasoning>,
    pub meta: Map<String, Value>,
}

impl PipelineMessage {
    pub fn new(role: Role, content: impl Into<WireContent>) -> Self {
        PipelineMessage {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            name: None,
            kept_reasoning: None,
            id: String::new(),
            created_at: 0,
            updated_at: 0,
            image_list: Vec::new(),
            video_list: Vec::new(),
            file_list: Vec::new(),
            tools: Vec::new(),
            plugin: None,
            reasoning: None,
            meta: Map::new(),
        }
    }

    pub fn system(content: impl Into<WireContent>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn text(&self) -> String {
        self.content.text()
    }

    pub fn into_wire(self) -> WireMessage {
        WireMessage {
            role: self.role,
            content: self.content,
            tool_calls: self.tool_calls.filter(|calls| !calls.is_empty()),
            tool_call_id: self.tool_call_id,
            name: self.name,
            reasoning: self.kept_reasoning,
        }
    }
}

impl From<ChatTurn> for PipelineMessage {
    fn from(turn: ChatTurn) -> Self {
        PipelineMessage {
            role: turn.role,
            content: WireContent::Text(turn.content.unwrap_or_default()),
            tool_calls: None,
            tool_call_id: turn.tool_call_id,
            name: None,
            kept_reasoning: None,
            id: turn.id,
            created_at: turn.created_at,
            updated_at: turn.updated_at,
            image_list: turn.image_list,
            video_list: turn.video_list,
            file_list: turn.file_list,
            tools: turn.tools,
            plugin: turn.plugin,
            reasoning: turn.reasoning,
            meta: turn.meta,
        }
    }
}

/// The accumulator threaded through one pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    pub messages: Vec<PipelineMessage>,
    pub metadata: Map<String, Value>,
    pub tool_names: ToolNameResolver,
    abort_reason: Option<String>,
}

impl PipelineState {
    pub fn new(messages: Vec<PipelineMessage>) -> Self {
        PipelineState {
            messages,
            ..Default::default()
        }
    }

    pub fn from_turns(turns: Vec<ChatTurn>) -> Self {
        Self::new(turns.into_iter().map(PipelineMessage::from).collect())
    }

    pub fn with_tool_names(mut self, tool_names: ToolNameResolver) -> Self {
        self.tool_names = tool_names;
        self
    }

    /// Stop the pipeline after the current processor
    pub fn abort(&mut self, reason: impl Into<String>) {
        self.abort_reason = Some(reason.into());
    }

    pub fn is_aborted(&self) -> bool {
        self.abort_reason.is_some()
    }

    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    pub fn set_metadata(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    /// Append a fragment to the single leading system message, creating it if needed
    pub fn append_system(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        match self.messages.first_mut() {
            Some(first) if first.role == Role::System => {
                let existing = first.text();
                first.content = if existing.is_empty() {
                    WireContent::Text(fragment.to_string())
                } else {
                    WireContent::Text(format!("{}{}{}", existing, SYSTEM_ROLE_SEPARATOR, fragment))
                };
            }
            _ => self.messages.insert(0, PipelineMessage::system(fragment)),
        }
    }

    /// Put a fragment in front of the leading system message, creating it if needed
    pub fn prepend_system(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        match self.messages.first_mut() {
            Some(first) if first.role == Role::System => {
                let existing = first.text();
                first.content = if existing.is_empty() {
                    WireContent::Text(fragment.to_string())
                } else {
                    WireContent::Text(format!("{}{}{}", fragment, SYSTEM_ROLE_SEPARATOR, existing))
                };
            }
            _ => self.messages.insert(0, PipelineMessage::system(fragment)),
        }
    }
}
