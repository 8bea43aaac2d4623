use anyhow::Result;
use async_trait::async_trait;

use crate::context::engine::ContextProcessor;
use crate::context::state::PipelineState;
use crate::memory::UserMemory;

/// Adds the user's long-term memory to the system buffer
pub struct UserMemoryProcessor {
    memory: Option<UserMemory>,
}

impl UserMemoryProcessor {
    pub fn new(memory: Option<UserMemory>) -> Self {
        UserMemoryProcessor { memory }
    }
}

#[async_trait]
impl ContextProcessor for UserMemoryProcessor {
    fn name(&self) -> &str {
        "UserMemoryInjector"
    }

    async fn process(&self, mut state: PipelineState) -> Result<PipelineState> {
        let Some(memory) = self.memory.as_ref().filter(|m| !m.is_empty()) else {
            return Ok(state);
        };

        match memory.render() {
            Ok(Some(rendered)) => {
                state.append_system(&rendered);
                state.set_metadata("user_memory_injected", true);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "failed to render user memory, skipping"),
        }
        Ok(state)
    }
}
