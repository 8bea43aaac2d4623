use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use crate::context::engine::ContextProcessor;
use crate::context::state::PipelineState;
use crate::prompt_template::{load_embedded, HISTORY_SUMMARY_PROMPT};

/// Adds the compressed summary of older turns to the system buffer
pub struct HistorySummaryProcessor {
    summary: Option<String>,
}

impl HistorySummaryProcessor {
    pub fn new(summary: Option<String>) -> Self {
        HistorySummaryProcessor { summary }
    }
}

#[async_trait]
impl ContextProcessor for HistorySummaryProcessor {
    fn name(&self) -> &str {
        "HistorySummaryProvider"
    }

    async fn process(&self, mut state: PipelineState) -> Result<PipelineState> {
        let Some(summary) = self.summary.as_deref().filter(|s| !s.trim().is_empty()) else {
            return Ok(state);
        };

        match load_embedded(HISTORY_SUMMARY_PROMPT, &json!({ "summary": summary })) {
            Ok(rendered) => {
                state.append_system(&rendered);
                state.set_metadata("history_summary_injected", true);
            }
            Err(e) => tracing::warn!(error = %e, "failed to format history summary, skipping"),
        }
        Ok(state)
    }
}
