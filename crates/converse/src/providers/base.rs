use anyhow::Result;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

use crate::models::message::Reasoning;
use crate::models::wire::{WireMessage, WireToolCall};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// A provider-agnostic chat completion request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Model specific parameters merged into the request body as-is
    #[serde(flatten)]
    pub extend: Map<String, Value>,
}

impl ChatPayload {
    pub fn new(model: impl Into<String>, messages: Vec<WireMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatStreamEvent {
    Text(String),
    Reasoning(String),
    ReasoningSignature(String),
    /// The complete set of tool calls requested in this turn
    ToolCalls(Vec<WireToolCall>),
    Usage(Usage),
    Stop(Option<String>),
    /// Search citations attached by providers with built-in search
    Grounding(Value),
}

pub type ChatEventStream = Pin<Box<dyn Stream<Item = Result<ChatStreamEvent>> + Send>>;

/// The assembled result of one chat turn
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: String,
    pub reasoning: Option<Reasoning>,
    pub tool_calls: Vec<WireToolCall>,
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
    pub grounding: Option<Value>,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Fold one stream event into the completion
    pub fn apply(&mut self, event: &ChatStreamEvent) {
        match event {
            ChatStreamEvent::Text(text) => self.content.push_str(text),
            ChatStreamEvent::Reasoning(text) => {
                let reasoning = self.reasoning.get_or_insert_with(Reasoning::default);
                reasoning
                    .content
                    .get_or_insert_with(String::new)
                    .push_str(text);
            }
            ChatStreamEvent::ReasoningSignature(signature) => {
                self.reasoning.get_or_insert_with(Reasoning::default).signature =
                    Some(signature.clone());
            }
            ChatStreamEvent::ToolCalls(calls) => self.tool_calls = calls.clone(),
            ChatStreamEvent::Usage(usage) => self.usage = Some(usage.clone()),
            ChatStreamEvent::Stop(reason) => self.finish_reason = reason.clone(),
            ChatStreamEvent::Grounding(value) => self.grounding = Some(value.clone()),
        }
    }

    /// Drain a stream into a single completion
    pub async fn collect(mut stream: ChatEventStream) -> Result<Self> {
        let mut completion = Completion::default();
        while let Some(event) = stream.next().await {
            completion.apply(&event?);
        }
        Ok(completion)
    }
}

pub enum ChatResponse {
    Complete(Completion),
    Stream(ChatEventStream),
}

impl ChatResponse {
    /// Resolve either shape into a finished completion
    pub async fn into_completion(self) -> Result<Completion> {
        match self {
            ChatResponse::Complete(completion) => Ok(completion),
            ChatResponse::Stream(stream) => Completion::collect(stream).await,
        }
    }
}

/// A chat completion backend
#[async_trait]
pub trait Provider: Send + Sync {
    /// The provider id this client was built for
    fn id(&self) -> &str;

    /// Send a chat request. Cancelling the token aborts the in-flight HTTP call.
    async fn chat(&self, payload: ChatPayload, cancel: CancellationToken) -> Result<ChatResponse>;
}
