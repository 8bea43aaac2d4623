use anyhow::Result;
use async_trait::async_trait;

use crate::context::engine::ContextProcessor;
use crate::context::state::PipelineState;

/// Last stage: strips everything the provider should not see. Idempotent.
pub struct CleanupProcessor;

#[async_trait]
impl ContextProcessor for CleanupProcessor {
    fn name(&self) -> &str {
        "MessageCleanup"
    }

    async fn process(&self, mut state: PipelineState) -> Result<PipelineState> {
        for message in &mut state.messages {
            message.id.clear();
            message.created_at = 0;
            message.updated_at = 0;
            message.image_list.clear();
            message.video_list.clear();
            message.file_list.clear();
            message.tools.clear();
            message.plugin = None;
            message.reasoning = None;
            message.meta.clear();
            if message.tool_calls.as_ref().is_some_and(|calls| calls.is_empty()) {
                message.tool_calls = None;
            }
        }
        Ok(state)
    }
}
