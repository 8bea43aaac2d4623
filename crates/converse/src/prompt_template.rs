use serde::Serialize;
use tera::{Context, Error as TeraError, Tera};

pub const PLUGINS_PROMPT: &str = include_str!("prompts/plugins.md");
pub const FILES_CONTEXT_PROMPT: &str = include_str!("prompts/files_context.md");
pub const HISTORY_SUMMARY_PROMPT: &str = include_str!("prompts/history_summary.md");
pub const USER_MEMORY_PROMPT: &str = include_str!("prompts/user_memory.md");
pub const AGENT_BUILDER_PROMPT: &str = include_str!("prompts/agent_builder.md");

/// Render a template string. The template name has no `.html` suffix, so output is not escaped.
pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered)
}

/// Render one of the embedded prompts, trimming the trailing newline of the file
pub fn load_embedded<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    Ok(load_prompt(template, context_data)?.trim().to_string())
}
