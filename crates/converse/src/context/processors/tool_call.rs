use anyhow::Result;
use async_trait::async_trait;

use crate::context::engine::ContextProcessor;
use crate::context::state::{PipelineMessage, PipelineState};
use crate::models::message::Role;
use crate::models::wire::WireToolCall;
use crate::tool_name::ToolNameResolver;

/// Converts stored tool invocations into provider `tool_calls`, or flattens them
/// into plain conversation when the model cannot call functions.
pub struct ToolCallProcessor {
    supports_function_call: bool,
}

impl ToolCallProcessor {
    pub fn new(supports_function_call: bool) -> Self {
        ToolCallProcessor {
            supports_function_call,
        }
    }
}

#[derive(Default)]
struct Counters {
    processed: usize,
    calls_converted: usize,
    messages_converted: usize,
}

fn convert_assistant(message: &mut PipelineMessage, names: &mut ToolNameResolver) -> bool {
    if message.tools.is_empty() {
        return false;
    }
    let calls = std::mem::take(&mut message.tools)
        .into_iter()
        .map(|tool| {
            let name = names.encode(&tool.identifier, &tool.api_name, tool.tool_type.as_deref());
            WireToolCall::function(tool.id, name, tool.arguments)
        })
        .collect();
    message.tool_calls = Some(calls);
    true
}

fn convert_tool_result(message: &mut PipelineMessage, names: &mut ToolNameResolver) -> bool {
    match message.plugin.take() {
        Some(plugin) => {
            message.name =
                Some(names.encode(&plugin.identifier, &plugin.api_name, plugin.tool_type.as_deref()));
            true
        }
        None => false,
    }
}

fn strip_tool_metadata(message: &mut PipelineMessage) {
    message.tools.clear();
    message.tool_calls = None;
    if message.role == Role::Tool {
        message.role = Role::User;
        message.content = message.text().into();
        message.tool_call_id = None;
        message.name = None;
        message.plugin = None;
    }
}

#[async_trait]
impl ContextProcessor for ToolCallProcessor {
    fn name(&self) -> &str {
        "ToolCallProcessor"
    }

    async fn process(&self, mut state: PipelineState) -> Result<PipelineState> {
        let mut counters = Counters::default();
        let names = &mut state.tool_names;

        for message in &mut state.messages {
            if !self.supports_function_call {
                strip_tool_metadata(message);
                continue;
            }
            match message.role {
                Role::Assistant => {
                    if convert_assistant(message, names) {
                        counters.processed += 1;
                        counters.calls_converted += 1;
                    }
                }
                Role::Tool => {
                    if convert_tool_result(message, names) {
                        counters.messages_converted += 1;
                    }
                    counters.processed += 1;
                }
                _ => {}
            }
        }

        state.set_metadata("tool_call_processed", counters.processed);
        state.set_metadata("tool_calls_converted", counters.calls_converted);
        state.set_metadata("tool_messages_converted", counters.messages_converted);
        state.set_metadata("support_tools", self.supports_function_call);
        Ok(state)
    }
}
