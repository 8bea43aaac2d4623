use anyhow::Result;
use async_trait::async_trait;

use crate::context::engine::ContextProcessor;
use crate::context::state::PipelineState;
use crate::placeholder::VariableGenerators;

/// Expands `{{name}}` tokens in every message using the generator registry
pub struct PlaceholderProcessor {
    generators: VariableGenerators,
}

impl PlaceholderProcessor {
    pub fn new(generators: VariableGenerators) -> Self {
        PlaceholderProcessor { generators }
    }
}

#[async_trait]
impl ContextProcessor for PlaceholderProcessor {
    fn name(&self) -> &str {
        "PlaceholderVariables"
    }

    async fn process(&self, mut state: PipelineState) -> Result<PipelineState> {
        if self.generators.is_empty() {
            return Ok(state);
        }

        let mut replaced = 0;
        for message in &mut state.messages {
            let content = std::mem::take(&mut message.content);
            message.content = content.map_text(|text| {
                let substituted = self.generators.substitute(&text);
                if substituted != text {
                    replaced += 1;
                }
                substituted
            });
        }
        state.set_metadata("placeholder_messages_processed", replaced);
        Ok(state)
    }
}
