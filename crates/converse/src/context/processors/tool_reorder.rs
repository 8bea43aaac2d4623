use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

use crate::context::engine::ContextProcessor;
use crate::context::state::{PipelineMessage, PipelineState};
use crate::models::message::Role;

/// Places each tool result directly after the assistant message that requested it.
///
/// Results nobody asked for, and repeated results for the same call, are dropped.
pub struct ToolReorderProcessor;

#[async_trait]
impl ContextProcessor for ToolReorderProcessor {
    fn name(&self) -> &str {
        "ToolMessageReorder"
    }

    async fn process(&self, mut state: PipelineState) -> Result<PipelineState> {
        if !state.messages.iter().any(|m| m.role == Role::Tool) {
            return Ok(state);
        }

        let messages = std::mem::take(&mut state.messages);
        let mut results: HashMap<String, PipelineMessage> = HashMap::new();
        let mut rest = Vec::with_capacity(messages.len());
        let mut dropped = 0;

        for message in messages {
            if message.role != Role::Tool {
                rest.push(message);
                continue;
            }
            match message.tool_call_id.clone() {
                Some(id) if !results.contains_key(&id) => {
                    results.insert(id, message);
                }
                _ => dropped += 1,
            }
        }

        let mut ordered = Vec::with_capacity(rest.len() + results.len());
        for message in rest {
            let call_ids: Vec<String> = message
                .tool_calls
                .iter()
                .flatten()
                .map(|call| call.id.clone())
                .collect();
            ordered.push(message);
            for id in call_ids {
                if let Some(result) = results.remove(&id) {
                    ordered.push(result);
                }
            }
        }

        dropped += results.len();
        if dropped > 0 {
            tracing::debug!(dropped, "dropped tool messages without a matching call");
        }
        state.messages = ordered;
        state.set_metadata("orphan_tool_messages_dropped", dropped);
        Ok(state)
    }
}
