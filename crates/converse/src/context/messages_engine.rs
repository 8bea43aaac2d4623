use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use super::engine::{ContextEngine, ContextProcessor, EngineStats, PipelineError};
use super::processors::{
    CleanupProcessor, FileContextConfig, HistorySummaryProcessor, HistoryTruncateProcessor,
    ImageLoader, InputTemplateProcessor, MessageContentProcessor, PlaceholderProcessor,
    SystemRoleProcessor, ToolCallProcessor, ToolReorderProcessor, ToolSystemRoleProcessor,
    UserMemoryProcessor,
};
use super::state::PipelineState;
use crate::memory::UserMemory;
use crate::models::message::ChatTurn;
use crate::models::wire::WireMessage;
use crate::placeholder::VariableGenerators;
use crate::registry::capability::CapabilityFlags;
use crate::tool_name::ToolNameResolver;

/// Tools enabled for this request and their pre-rendered system prompt
#[derive(Debug, Clone, Default)]
pub struct ToolsConfig {
    pub tools: Vec<String>,
    pub system_roles: Option<String>,
}

/// Everything the chat pipeline needs, captured once per request
#[derive(Debug, Clone, Default)]
pub struct MessagesEngineParams {
    pub messages: Vec<ChatTurn>,
    pub model: String,
    pub provider: String,
    pub capabilities: CapabilityFlags,

    pub enable_history_count: bool,
    pub history_count: usize,
    pub system_role: Option<String>,
    pub tools_config: ToolsConfig,
    pub history_summary: Option<String>,
    pub user_memory: Option<UserMemory>,
    pub input_template: Option<String>,
    pub variable_generators: VariableGenerators,
    pub file_context: FileContextConfig,
    pub include_historical_thinking: bool,

    /// Receives every tool name encoded while the pipeline runs
    pub tool_names: ToolNameResolver,
}

impl MessagesEngineParams {
    pub fn new(messages: Vec<ChatTurn>, model: impl Into<String>, provider: impl Into<String>) -> Self {
        MessagesEngineParams {
            messages,
            model: model.into(),
            provider: provider.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub messages: Vec<WireMessage>,
    pub metadata: Map<String, Value>,
    pub stats: EngineStats,
    pub processed_count: usize,
    pub total_duration: Duration,
    /// Reverse table for the tool names sent to the provider
    pub tool_names: ToolNameResolver,
}

/// The fixed chat pipeline
pub struct MessagesEngine {
    engine: ContextEngine,
    messages: Vec<ChatTurn>,
    tool_names: ToolNameResolver,
    model: String,
    provider: String,
}

impl MessagesEngine {
    pub fn new(params: MessagesEngineParams, image_loader: Arc<dyn ImageLoader>) -> Self {
        let MessagesEngineParams {
            messages,
            model,
            provider,
            capabilities,
            enable_history_count,
            history_count,
            system_role,
            tools_config,
            history_summary,
            user_memory,
            input_template,
            variable_generators,
            file_context,
            include_historical_thinking,
            tool_names,
        } = params;

        let processors: Vec<Arc<dyn ContextProcessor>> = vec![
            Arc::new(HistoryTruncateProcessor::new(enable_history_count, history_count)),
            Arc::new(SystemRoleProcessor::new(system_role)),
            Arc::new(ToolSystemRoleProcessor::new(
                tools_config.tools,
                tools_config.system_roles,
                capabilities.supports_function_call,
            )),
            Arc::new(HistorySummaryProcessor::new(history_summary)),
            Arc::new(UserMemoryProcessor::new(user_memory)),
            Arc::new(InputTemplateProcessor::new(input_template)),
            Arc::new(PlaceholderProcessor::new(variable_generators)),
            Arc::new(MessageContentProcessor::new(
                provider.clone(),
                capabilities.supports_vision,
                file_context,
                include_historical_thinking,
                image_loader,
            )
            .with_video_support(capabilities.supports_video)),
            Arc::new(ToolCallProcessor::new(capabilities.supports_function_call)),
            Arc::new(ToolReorderProcessor),
            Arc::new(CleanupProcessor),
        ];

        MessagesEngine {
            engine: ContextEngine::with_processors(processors),
            messages,
            tool_names,
            model,
            provider,
        }
    }

    pub fn stats(&self) -> EngineStats {
        self.engine.stats()
    }

    pub async fn process(self) -> Result<EngineOutput, PipelineError> {
        let stats = self.engine.stats();
        if self.messages.is_empty() {
            return Ok(EngineOutput {
                messages: Vec::new(),
                metadata: Map::new(),
                stats,
                processed_count: 0,
                total_duration: Duration::ZERO,
                tool_names: self.tool_names,
            });
        }

        let mut state = PipelineState::from_turns(self.messages).with_tool_names(self.tool_names);
        state.set_metadata("model", self.model.as_str());
        state.set_metadata("provider", self.provider.as_str());

        let outcome = self.engine.process(state).await?;
        tracing::debug!(
            model = %self.model,
            provider = %self.provider,
            messages = outcome.state.messages.len(),
            processed = outcome.processed_count,
            elapsed_ms = outcome.total_duration.as_millis() as u64,
            "messages engine finished"
        );

        let PipelineState {
            messages,
            metadata,
            tool_names,
            ..
        } = outcome.state;
        Ok(EngineOutput {
            messages: messages.into_iter().map(|m| m.into_wire()).collect(),
            metadata,
            stats,
            processed_count: outcome.processed_count,
            total_duration: outcome.total_duration,
            tool_names,
        })
    }

    /// Run the pipeline and keep only the messages
    pub async fn process_messages(self) -> Result<Vec<WireMessage>, PipelineError> {
        Ok(self.process().await?.messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::processors::HttpImageLoader;
    use crate::models::message::{Role, ToolInvocation};
    use anyhow::Result;

    fn loader() -> Arc<dyn ImageLoader> {
        Arc::new(HttpImageLoader::new().unwrap())
    }

    #[tokio::test]
    async fn test_builds_eleven_stages_in_order() {
        let engine = MessagesEngine::new(MessagesEngineParams::default(), loader());
        assert_eq!(
            engine.stats().processor_names,
            vec![
                "HistoryTruncate",
                "SystemRoleInjector",
                "ToolSystemRoleProvider",
                "HistorySummaryProvider",
                "UserMemoryInjector",
                "InputTemplate",
                "PlaceholderVariables",
                "MessageContent",
                "ToolCallProcessor",
                "ToolMessageReorder",
                "MessageCleanup",
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_messages() -> Result<()> {
        let output = MessagesEngine::new(MessagesEngineParams::default(), loader())
            .process()
            .await?;
        assert!(output.messages.is_empty());
        assert_eq!(output.processed_count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_full_conversation() -> Result<()> {
        let search = ToolInvocation::new("call_1", "web", "search", "{}");
        let mut params = MessagesEngineParams::new(
            vec![
                ChatTurn::user().with_text("find rust news"),
                ChatTurn::assistant().with_text("").with_tool(search.clone()),
                ChatTurn::tool_result("call_1", search).with_text("[]"),
                ChatTurn::user().with_text("and on {{date}}?"),
            ],
            "gpt-4o",
            "openai",
        );
        params.capabilities.supports_function_call = true;
        params.system_role = Some("You are a news bot".to_string());
        params.tools_config = ToolsConfig {
            tools: vec!["web".to_string()],
            system_roles: Some("<plugins>web</plugins>".to_string()),
        };
        params.history_summary = Some("They like Rust".to_string());
        params.input_template = Some("Q: {{text}}".to_string());
        params.variable_generators =
            VariableGenerators::new().with("date", || "2024-01-01".to_string());

        let output = MessagesEngine::new(params, loader()).process().await?;
        let roles: Vec<Role> = output.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::User]
        );

        let system = output.messages[0].content.text();
        assert!(system.starts_with("You are a news bot\n\n<plugins>web</plugins>\n\n<chat_history_summary>"));
        assert_eq!(output.messages[4].content.text(), "Q: and on 2024-01-01?");
        assert_eq!(output.messages[3].name.as_deref(), Some("web____search"));
        assert_eq!(output.tool_names.decode("web____search").map(|t| t.api_name.as_str()), Some("search"));
        assert_eq!(output.metadata["model"], "gpt-4o");
        assert_eq!(output.processed_count, 11);
        Ok(())
    }
}
