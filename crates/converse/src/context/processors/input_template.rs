use anyhow::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::json;

use crate::context::engine::ContextProcessor;
use crate::context::state::PipelineState;
use crate::errors::ChatErrorType;
use crate::models::message::Role;
use crate::prompt_template::load_prompt;

lazy_static! {
    static ref TEMPLATE_VARIABLE: Regex = Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").unwrap();
}

/// Only `{{text}}` belongs to the template; every other token is left for the placeholder stage.
fn protect_foreign_variables(template: &str) -> String {
    TEMPLATE_VARIABLE
        .replace_all(template, |caps: &Captures| {
            if &caps[1] == "text" {
                caps[0].to_string()
            } else {
                format!("{{% raw %}}{}{{% endraw %}}", &caps[0])
            }
        })
        .into_owned()
}

/// Wraps the latest user input in the agent's input template
pub struct InputTemplateProcessor {
    template: Option<String>,
}

impl InputTemplateProcessor {
    pub fn new(template: Option<String>) -> Self {
        InputTemplateProcessor { template }
    }
}

#[async_trait]
impl ContextProcessor for InputTemplateProcessor {
    fn name(&self) -> &str {
        "InputTemplate"
    }

    async fn process(&self, mut state: PipelineState) -> Result<PipelineState> {
        let Some(template) = self.template.as_deref().filter(|t| !t.is_empty()) else {
            return Ok(state);
        };
        let Some(message) = state.messages.iter_mut().rev().find(|m| m.role == Role::User) else {
            return Ok(state);
        };

        let template = protect_foreign_variables(template);
        let mut failed = false;
        let content = std::mem::take(&mut message.content);
        message.content = content.map_text(|text| {
            match load_prompt(&template, &json!({ "text": text })) {
                Ok(rendered) => rendered,
                Err(e) => {
                    tracing::warn!(
                        error_type = %ChatErrorType::TemplateRenderError,
                        error = %e,
                        "input template failed to render, keeping original message"
                    );
                    failed = true;
                    text
                }
            }
        });
        state.set_metadata("input_template_applied", !failed);
        Ok(state)
    }
}
