use anyhow::{anyhow, Result};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{RequestBuilder, Response};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

use super::base::{ChatEventStream, ChatPayload, ChatStreamEvent, Completion, Usage};
use crate::models::message::Reasoning;
use crate::models::wire::WireToolCall;

/// A non-success HTTP status from a provider
#[derive(Debug, thiserror::Error)]
#[error("Provider request failed with status {status}: {body}")]
pub struct ProviderHttpError {
    pub status: u16,
    pub body: Value,
}

#[derive(Debug, thiserror::Error)]
#[error("Context length exceeded. Message: {0}")]
pub struct ContextLengthExceededError(pub String);

#[derive(Debug, thiserror::Error)]
#[error("The request was aborted")]
pub struct RequestAbortedError;

/// A credential the provider needs was not configured
#[derive(Debug, thiserror::Error)]
#[error("Missing {field} for provider {provider}")]
pub struct MissingCredentialError {
    pub provider: String,
    pub field: String,
}

/// Send a request, racing it against `cancel`, and turn error statuses into typed errors
pub async fn send(request: RequestBuilder, cancel: &CancellationToken) -> Result<Response> {
    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(RequestAbortedError.into()),
        response = request.send() => response?,
    };

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
    let detail = body.get("error").unwrap_or(&body);
    if let Some(err) = check_openai_context_length_error(detail)
        .or_else(|| check_anthropic_context_length_error(detail))
    {
        return Err(err.into());
    }
    Err(ProviderHttpError {
        status: status.as_u16(),
        body,
    }
    .into())
}

/// Request body for OpenAI-compatible chat completion endpoints
pub fn openai_request_body(payload: &ChatPayload) -> Result<Value> {
    let mut body = serde_json::to_value(payload)?;
    if payload.stream {
        if let Some(object) = body.as_object_mut() {
            object.insert("stream_options".to_string(), json!({ "include_usage": true }));
        }
    }
    Ok(body)
}

pub fn get_openai_usage(data: &Value) -> Option<Usage> {
    let usage = data.get("usage").filter(|u| u.is_object())?;

    let input_tokens = usage
        .get("prompt_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32);

    let output_tokens = usage
        .get("completion_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32);

    let total_tokens = usage
        .get("total_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32)
        .or_else(|| match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        });

    Some(Usage::new(input_tokens, output_tokens, total_tokens))
}

fn parse_tool_calls(value: &Value) -> Vec<WireToolCall> {
    value
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .map(|call| {
                    WireToolCall::function(
                        call["id"].as_str().unwrap_or_default(),
                        call["function"]["name"].as_str().unwrap_or_default(),
                        call["function"]["arguments"].as_str().unwrap_or_default(),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

fn reasoning_text(value: &Value) -> Option<&str> {
    value
        .get("reasoning_content")
        .or_else(|| value.get("reasoning"))
        .and_then(|v| v.as_str())
}

/// Convert an OpenAI-compatible response body into a completion
pub fn openai_response_to_completion(response: &Value) -> Result<Completion> {
    let choice = response
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| anyhow!("No choices in response: {}", response))?;
    let message = &choice["message"];

    Ok(Completion {
        content: message["content"].as_str().unwrap_or_default().to_string(),
        reasoning: reasoning_text(message)
            .filter(|r| !r.is_empty())
            .map(|r| Reasoning {
                content: Some(r.to_string()),
                signature: None,
            }),
        tool_calls: parse_tool_calls(&message["tool_calls"]),
        usage: get_openai_usage(response),
        finish_reason: choice["finish_reason"].as_str().map(str::to_string),
        grounding: response.get("citations").cloned(),
    })
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Decode an OpenAI-compatible SSE body into chat events.
///
/// Tool call deltas are accumulated and emitted once, before the final `Stop`.
pub fn openai_event_stream(response: Response) -> ChatEventStream {
    let mut events = response.bytes_stream().eventsource();

    Box::pin(async_stream::try_stream! {
        // Keyed by the provider's index, which is not trusted to be dense
        let mut calls: BTreeMap<u64, PartialToolCall> = BTreeMap::new();
        let mut finish_reason = None;

        while let Some(event) = events.next().await {
            let event = event.map_err(|e| anyhow!("SSE stream error: {}", e))?;
            tracing::trace!(data = %event.data, "sse event");

            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                break;
            }

            let chunk: Value = serde_json::from_str(data)?;
            if let Some(error) = chunk.get("error") {
                Err::<(), _>(ProviderHttpError { status: 200, body: error.clone() })?;
            }

            for choice in chunk["choices"].as_array().into_iter().flatten() {
                let delta = &choice["delta"];
                if let Some(reasoning) = reasoning_text(delta).filter(|r| !r.is_empty()) {
                    yield ChatStreamEvent::Reasoning(reasoning.to_string());
                }
                if let Some(text) = delta["content"].as_str().filter(|t| !t.is_empty()) {
                    yield ChatStreamEvent::Text(text.to_string());
                }
                for call in delta["tool_calls"].as_array().into_iter().flatten() {
                    let index = call["index"].as_u64().unwrap_or(calls.len() as u64);
                    let partial = calls.entry(index).or_default();
                    if let Some(id) = call["id"].as_str() {
                        partial.id = id.to_string();
                    }
                    if let Some(name) = call["function"]["name"].as_str() {
                        partial.name.push_str(name);
                    }
                    if let Some(arguments) = call["function"]["arguments"].as_str() {
                        partial.arguments.push_str(arguments);
                    }
                }
                if let Some(reason) = choice["finish_reason"].as_str() {
                    finish_reason = Some(reason.to_string());
                }
            }

            if let Some(citations) = chunk.get("citations") {
                yield ChatStreamEvent::Grounding(citations.clone());
            }
            if let Some(usage) = get_openai_usage(&chunk) {
                yield ChatStreamEvent::Usage(usage);
            }
        }

        if !calls.is_empty() {
            yield ChatStreamEvent::ToolCalls(
                calls
                    .into_values()
                    .map(|c| WireToolCall::function(c.id, c.name, c.arguments))
                    .collect(),
            );
        }
        yield ChatStreamEvent::Stop(finish_reason);
    })
}

pub fn check_openai_context_length_error(error: &Value) -> Option<ContextLengthExceededError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ContextLengthExceededError(message))
    } else {
        None
    }
}

pub fn check_anthropic_context_length_error(error: &Value) -> Option<ContextLengthExceededError> {
    let message = error.get("message")?.as_str()?;
    let lowered = message.to_lowercase();
    if lowered.contains("prompt is too long") || lowered.contains("context window") {
        Some(ContextLengthExceededError(message.to_string()))
    } else {
        None
    }
}
