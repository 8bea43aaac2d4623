use anyhow::{anyhow, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::base::{ChatEventStream, ChatPayload, ChatResponse, ChatStreamEvent, Completion, Provider, Usage};
use super::utils::{send, MissingCredentialError, ProviderHttpError, RequestAbortedError};
use crate::models::message::{Reasoning, Role};
use crate::models::wire::{ContentPart, WireContent, WireMessage, WireToolCall};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    client: Client,
    host: String,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self {
            client,
            host: host.into(),
            api_key: api_key.into(),
        })
    }

    fn get_usage(data: &Value) -> Option<Usage> {
        let usage = data.get("usage")?;
        let input_tokens = usage
            .get("input_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);
        let output_tokens = usage
            .get("output_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);
        let total_tokens = match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        };
        Some(Usage::new(input_tokens, output_tokens, total_tokens))
    }
}

fn text_block(text: &str) -> Value {
    json!({"type": "text", "text": text})
}

fn image_block(url: &str) -> Value {
    match url
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
    {
        Some((media_type, data)) => json!({
            "type": "image",
            "source": {"type": "base64", "media_type": media_type, "data": data}
        }),
        None => json!({"type": "image", "source": {"type": "url", "url": url}}),
    }
}

fn content_blocks(content: &WireContent) -> Vec<Value> {
    match content {
        WireContent::Text(text) if text.is_empty() => Vec::new(),
        WireContent::Text(text) => vec![text_block(text)],
        WireContent::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } if text.is_empty() => None,
                ContentPart::Text { text } => Some(text_block(text)),
                ContentPart::ImageUrl { image_url } => Some(image_block(&image_url.url)),
                // No video input on the messages API
                ContentPart::VideoUrl { .. } => None,
                ContentPart::Thinking {
                    thinking,
                    signature,
                } => Some(json!({
                    "type": "thinking",
                    "thinking": thinking,
                    "signature": signature
                })),
            })
            .collect(),
    }
}

fn tool_use_block(call: &WireToolCall) -> Value {
    let input = serde_json::from_str::<Value>(&call.function.arguments)
        .ok()
        .filter(|v| v.is_object())
        .unwrap_or_else(|| json!({}));
    json!({
        "type": "tool_use",
        "id": call.id,
        "name": call.function.name,
        "input": input
    })
}

/// Split off the system prompt and convert the rest into Anthropic messages.
///
/// Consecutive tool results are merged into one user message.
pub fn messages_to_anthropic_spec(messages: &[WireMessage]) -> (Option<String>, Vec<Value>) {
    let mut system: Vec<String> = Vec::new();
    let mut converted: Vec<Value> = Vec::new();

    for message in messages {
        match message.role {
            Role::System => system.push(message.content.text()),
            Role::Tool => {
                let result = json!({
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                    "content": message.content.text()
                });
                let append = converted
                    .last()
                    .map(|last| {
                        last["role"] == "user"
                            && last["content"]
                                .as_array()
                                .map(|blocks| blocks.iter().all(|b| b["type"] == "tool_result"))
                                .unwrap_or(false)
                    })
                    .unwrap_or(false);
                if !append {
                    converted.push(json!({"role": "user", "content": []}));
                }
                if let Some(blocks) = converted
                    .last_mut()
                    .and_then(|last| last["content"].as_array_mut())
                {
                    blocks.push(result);
                }
            }
            Role::User | Role::Assistant => {
                let mut blocks = content_blocks(&message.content);
                if message.role == Role::Assistant {
                    blocks.extend(message.tool_calls.iter().flatten().map(tool_use_block));
                }
                if blocks.is_empty() {
                    continue;
                }
                let role = if message.role == Role::User { "user" } else { "assistant" };
                converted.push(json!({"role": role, "content": blocks}));
            }
        }
    }

    let system = system.join("\n\n");
    ((!system.is_empty()).then_some(system), converted)
}

fn tools_to_anthropic_spec(tools: &[Value]) -> Vec<Value> {
    tools
        .iter()
        .filter_map(|tool| {
            let function = tool.get("function")?;
            Some(json!({
                "name": function.get("name")?,
                "description": function.get("description").cloned().unwrap_or_else(|| json!("")),
                "input_schema": function
                    .get("parameters")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}}))
            }))
        })
        .collect()
}

/// Build the `/v1/messages` request body
pub fn create_request(payload: &ChatPayload) -> Result<Value> {
    let (system, messages) = messages_to_anthropic_spec(&payload.messages);
    let mut extend = payload.extend.clone();
    let caching = extend
        .remove("enabled_context_caching")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    let thinking = extend.remove("thinking");
    let thinking_enabled = thinking
        .as_ref()
        .map(|t| t["type"] == "enabled")
        .unwrap_or(false);

    let mut body = Map::new();
    body.insert("model".to_string(), json!(payload.model));
    body.insert("messages".to_string(), json!(messages));
    body.insert(
        "max_tokens".to_string(),
        json!(payload.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
    );
    body.insert("stream".to_string(), json!(payload.stream));

    if let Some(system) = system {
        let mut block = text_block(&system);
        if caching {
            block["cache_control"] = json!({"type": "ephemeral"});
        }
        body.insert("system".to_string(), json!([block]));
    }

    let mut tools = tools_to_anthropic_spec(&payload.tools);
    if caching {
        if let Some(last) = tools.last_mut() {
            last["cache_control"] = json!({"type": "ephemeral"});
        }
    }
    if !tools.is_empty() {
        body.insert("tools".to_string(), json!(tools));
    }

    if thinking_enabled {
        if let Some(thinking) = thinking {
            body.insert("thinking".to_string(), thinking);
        }
    } else {
        // Sampling range is half of the OpenAI one
        if let Some(temperature) = payload.temperature {
            body.insert("temperature".to_string(), json!(temperature / 2.0));
        }
        if let Some(top_p) = payload.top_p {
            body.insert("top_p".to_string(), json!(top_p));
        }
    }

    Ok(Value::Object(body))
}

/// Parse a non-streaming `/v1/messages` response
pub fn response_to_completion(response: &Value) -> Result<Completion> {
    let blocks = response
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| anyhow!("Invalid response format from Anthropic API"))?;

    let mut completion = Completion {
        usage: AnthropicProvider::get_usage(response),
        finish_reason: response["stop_reason"].as_str().map(str::to_string),
        ..Default::default()
    };
    for block in blocks {
        match block["type"].as_str() {
            Some("text") => completion
                .content
                .push_str(block["text"].as_str().unwrap_or_default()),
            Some("thinking") => {
                completion.reasoning = Some(Reasoning {
                    content: block["thinking"].as_str().map(str::to_string),
                    signature: block["signature"].as_str().map(str::to_string),
                })
            }
            Some("tool_use") => completion.tool_calls.push(WireToolCall::function(
                block["id"].as_str().unwrap_or_default(),
                block["name"].as_str().unwrap_or_default(),
                block["input"].to_string(),
            )),
            _ => {}
        }
    }
    Ok(completion)
}

#[derive(Default)]
struct PartialToolUse {
    id: String,
    name: String,
    input: String,
}

/// Decode the Anthropic SSE event stream into chat events
pub fn anthropic_event_stream(response: Response) -> ChatEventStream {
    let mut events = response.bytes_stream().eventsource();

    Box::pin(async_stream::try_stream! {
        let mut tool_uses: Vec<(u64, PartialToolUse)> = Vec::new();
        let mut input_tokens = None;
        let mut output_tokens = None;
        let mut stop_reason = None;

        while let Some(event) = events.next().await {
            let event = event.map_err(|e| anyhow!("SSE stream error: {}", e))?;
            tracing::trace!(event = %event.event, data = %event.data, "sse event");
            if event.data.trim().is_empty() {
                continue;
            }

            let data: Value = serde_json::from_str(&event.data)?;
            match data["type"].as_str().unwrap_or_default() {
                "message_start" => {
                    input_tokens = data["message"]["usage"]["input_tokens"].as_i64().map(|v| v as i32);
                }
                "content_block_start" => {
                    let block = &data["content_block"];
                    if block["type"] == "tool_use" {
                        tool_uses.push((
                            data["index"].as_u64().unwrap_or_default(),
                            PartialToolUse {
                                id: block["id"].as_str().unwrap_or_default().to_string(),
                                name: block["name"].as_str().unwrap_or_default().to_string(),
                                input: String::new(),
                            },
                        ));
                    }
                }
                "content_block_delta" => {
                    let delta = &data["delta"];
                    match delta["type"].as_str().unwrap_or_default() {
                        "text_delta" => {
                            yield ChatStreamEvent::Text(delta["text"].as_str().unwrap_or_default().to_string());
                        }
                        "thinking_delta" => {
                            yield ChatStreamEvent::Reasoning(delta["thinking"].as_str().unwrap_or_default().to_string());
                        }
                        "signature_delta" => {
                            yield ChatStreamEvent::ReasoningSignature(delta["signature"].as_str().unwrap_or_default().to_string());
                        }
                        "input_json_delta" => {
                            let index = data["index"].as_u64().unwrap_or_default();
                            if let Some((_, tool_use)) = tool_uses.iter_mut().find(|(i, _)| *i == index) {
                                tool_use.input.push_str(delta["partial_json"].as_str().unwrap_or_default());
                            }
                        }
                        _ => {}
                    }
                }
                "message_delta" => {
                    if let Some(reason) = data["delta"]["stop_reason"].as_str() {
                        stop_reason = Some(reason.to_string());
                    }
                    if let Some(tokens) = data["usage"]["output_tokens"].as_i64() {
                        output_tokens = Some(tokens as i32);
                    }
                }
                "error" => {
                    Err::<(), _>(ProviderHttpError { status: 200, body: data["error"].clone() })?;
                }
                "message_stop" => break,
                _ => {}
            }
        }

        if input_tokens.is_some() || output_tokens.is_some() {
            let total = input_tokens.zip(output_tokens).map(|(i, o)| i + o);
            yield ChatStreamEvent::Usage(Usage::new(input_tokens, output_tokens, total));
        }
        if !tool_uses.is_empty() {
            yield ChatStreamEvent::ToolCalls(
                tool_uses
                    .into_iter()
                    .map(|(_, t)| {
                        let input = if t.input.is_empty() { "{}".to_string() } else { t.input };
                        WireToolCall::function(t.id, t.name, input)
                    })
                    .collect(),
            );
        }
        yield ChatStreamEvent::Stop(stop_reason);
    })
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    async fn chat(&self, payload: ChatPayload, cancel: CancellationToken) -> Result<ChatResponse> {
        if self.api_key.trim().is_empty() {
            return Err(MissingCredentialError {
                provider: self.id().to_string(),
                field: "api_key".to_string(),
            }
            .into());
        }

        let body = create_request(&payload)?;
        let url = format!("{}/v1/messages", self.host.trim_end_matches('/'));
        let request = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);

        let response = send(request, &cancel).await?;
        if payload.stream {
            return Ok(ChatResponse::Stream(anthropic_event_stream(response)));
        }

        let response: Value = tokio::select! {
            _ = cancel.cancelled() => return Err(RequestAbortedError.into()),
            body = response.json() => body?,
        };
        Ok(ChatResponse::Complete(response_to_completion(&response)?))
    }
}
