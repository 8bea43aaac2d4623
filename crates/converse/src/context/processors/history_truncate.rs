use anyhow::Result;
use async_trait::async_trait;

use crate::context::engine::ContextProcessor;
use crate::context::state::PipelineState;

/// Keeps the most recent `history_count` messages.
///
/// Tool results stranded by the cut are dropped later by the reorder stage.
pub struct HistoryTruncateProcessor {
    enabled: bool,
    history_count: usize,
}

impl HistoryTruncateProcessor {
    pub fn new(enabled: bool, history_count: usize) -> Self {
        HistoryTruncateProcessor {
            enabled,
            history_count,
        }
    }
}

#[async_trait]
impl ContextProcessor for HistoryTruncateProcessor {
    fn name(&self) -> &str {
        "HistoryTruncate"
    }

    async fn process(&self, mut state: PipelineState) -> Result<PipelineState> {
        if !self.enabled {
            return Ok(state);
        }
        let len = state.messages.len();
        if len > self.history_count {
            state.messages.drain(..len - self.history_count);
        }
        state.set_metadata("history_truncated", len - state.messages.len());
        Ok(state)
    }
}
