//! Per-request chat orchestration.
//!
//! A request walks through a fixed set of states: agent config and memory are
//! resolved, the enabled tools are rendered, the message pipeline runs and the
//! result is dispatched to the provider. A single [`CancellationToken`] is raced
//! against every await, so cancelling a request never leaves work behind.
use anyhow::Result;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use strum_macros::Display;
use tokio_util::sync::CancellationToken;

use crate::agent_config::{AgentConfigResolver, AgentOverrides, ModelParams, ResolvedAgentConfig};
use crate::context::messages_engine::{EngineOutput, MessagesEngine, MessagesEngineParams, ToolsConfig};
use crate::context::processors::{FileContextConfig, HttpImageLoader, ImageLoader};
use crate::errors::{ChatError, ChatErrorType, ChatResult};
use crate::extend_params::resolve_extend_params;
use crate::memory::{MemoryResolver, UserMemory};
use crate::models::message::{ChatTurn, ToolInvocation};
use crate::models::wire::WireMessage;
use crate::placeholder::{UserContext, VariableGenerators};
use crate::providers::base::{ChatPayload, ChatResponse, ChatStreamEvent, Completion, Provider};
use crate::providers::configs::ProviderAuthPayload;
use crate::providers::factory;
use crate::providers::utils::{
    ContextLengthExceededError, MissingCredentialError, ProviderHttpError, RequestAbortedError,
};
use crate::registry::capability::{CapabilityFlags, CapabilityRegistry};
use crate::registry::tools::ToolRegistry;
use crate::tool_name::ToolNameResolver;

/// Providers whose requests address a deployment rather than a model id
const DEPLOYMENT_PROVIDERS: [&str; 4] = ["azure", "azureai", "volcengine", "qwen"];

/// Extra messages kept on top of the configured history count
const HISTORY_COUNT_OFFSET: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ChatState {
    Idle,
    ResolvingAgentConfig,
    ResolvingMemory,
    BuildingTools,
    RunningPipeline,
    Dispatching,
    Streaming,
    Buffered,
    Done,
    Errored,
    Aborted,
}

impl ChatState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChatState::Done | ChatState::Errored | ChatState::Aborted)
    }

    pub fn can_transition_to(self, next: ChatState) -> bool {
        use ChatState::*;

        if self.is_terminal() {
            return false;
        }
        if matches!(next, Errored | Aborted) {
            return true;
        }
        matches!(
            (self, next),
            (Idle, ResolvingAgentConfig)
                // preset tasks have no agent, memory or tools
                | (Idle, RunningPipeline)
                | (ResolvingAgentConfig, ResolvingMemory)
                | (ResolvingMemory, BuildingTools)
                | (BuildingTools, RunningPipeline)
                | (RunningPipeline, Dispatching)
                | (Dispatching, Streaming)
                | (Dispatching, Buffered)
                | (Streaming, Done)
                | (Buffered, Done)
        )
    }
}

/// Validated, logged state transitions for one request
#[derive(Debug)]
struct StateMachine {
    state: ChatState,
    history: Vec<ChatState>,
}

impl StateMachine {
    fn new() -> Self {
        StateMachine {
            state: ChatState::Idle,
            history: vec![ChatState::Idle],
        }
    }

    fn advance(&mut self, next: ChatState) -> ChatResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(ChatError::bad_request(format!(
                "Invalid chat state transition {} -> {}",
                self.state, next
            )));
        }
        tracing::debug!(from = %self.state, to = %next, "chat state transition");
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Move to a terminal state; a request that already settled stays put
    fn settle(&mut self, terminal: ChatState) {
        match self.advance(terminal) {
            Ok(()) => tracing::debug!(states = ?self.history, "chat request settled"),
            Err(err) => tracing::warn!(error = %err, "chat request settled twice"),
        }
    }
}

/// Hooks invoked while a request runs.
///
/// `on_error` fires at most once per request and never for a cancelled one.
/// `on_loading_change(false)` is always the last call.
#[derive(Default)]
pub struct ChatCallbacks {
    on_message: Option<Box<dyn FnMut(&ChatStreamEvent) + Send>>,
    on_finish: Option<Box<dyn FnMut(&ChatFinish) + Send>>,
    on_error: Option<Box<dyn FnMut(&ChatError) + Send>>,
    on_abort: Option<Box<dyn FnMut() + Send>>,
    on_loading_change: Option<Box<dyn FnMut(bool) + Send>>,
}

impl ChatCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: FnMut(&ChatStreamEvent) + Send + 'static,
    {
        self.on_message = Some(Box::new(f));
        self
    }

    pub fn on_finish<F>(mut self, f: F) -> Self
    where
        F: FnMut(&ChatFinish) + Send + 'static,
    {
        self.on_finish = Some(Box::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: FnMut(&ChatError) + Send + 'static,
    {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_abort<F>(mut self, f: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.on_abort = Some(Box::new(f));
        self
    }

    pub fn on_loading_change<F>(mut self, f: F) -> Self
    where
        F: FnMut(bool) + Send + 'static,
    {
        self.on_loading_change = Some(Box::new(f));
        self
    }

    fn message(&mut self, event: &ChatStreamEvent) {
        if let Some(handler) = self.on_message.as_mut() {
            handler(event);
        }
    }

    fn loading(&mut self, loading: bool) {
        if let Some(handler) = self.on_loading_change.as_mut() {
            handler(loading);
        }
    }
}

/// A user turn to answer on behalf of an agent
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub agent_id: String,
    pub messages: Vec<ChatTurn>,
    pub overrides: AgentOverrides,
    pub session_id: Option<String>,
    pub topic_id: Option<String>,
    pub history_summary: Option<String>,
    pub user: UserContext,
}

impl ChatRequest {
    pub fn new(agent_id: impl Into<String>, messages: Vec<ChatTurn>) -> Self {
        ChatRequest {
            agent_id: agent_id.into(),
            messages,
            ..Default::default()
        }
    }
}

/// A one-off completion outside any agent, such as a topic title or a translation
#[derive(Debug, Clone, Default)]
pub struct PresetTask {
    pub messages: Vec<ChatTurn>,
    pub model: String,
    pub provider: String,
    pub params: ModelParams,
    pub stream: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatFinish {
    pub completion: Completion,
    /// Tool calls mapped back to the plugins that own them
    pub tool_calls: Vec<ToolInvocation>,
    pub model: String,
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    Finished(ChatFinish),
    Errored(ChatError),
    Aborted,
}

impl ChatOutcome {
    pub fn finish(&self) -> Option<&ChatFinish> {
        match self {
            ChatOutcome::Finished(finish) => Some(finish),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ChatError> {
        match self {
            ChatOutcome::Errored(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, ChatOutcome::Aborted)
    }
}

/// Hands out provider clients by id
pub trait ProviderResolver: Send + Sync {
    fn provider(&self, provider_id: &str) -> Result<Box<dyn Provider>>;
}

/// Builds clients from the credentials stored per provider
#[derive(Debug, Clone, Default)]
pub struct KeyVaultProviders {
    vaults: HashMap<String, ProviderAuthPayload>,
}

impl KeyVaultProviders {
    pub fn new(vaults: HashMap<String, ProviderAuthPayload>) -> Self {
        KeyVaultProviders {
            vaults: vaults
                .into_iter()
                .map(|(id, auth)| (id.to_lowercase(), auth))
                .collect(),
        }
    }

    pub fn with_vault(mut self, provider_id: &str, auth: ProviderAuthPayload) -> Self {
        self.vaults.insert(provider_id.to_lowercase(), auth);
        self
    }
}

impl ProviderResolver for KeyVaultProviders {
    fn provider(&self, provider_id: &str) -> Result<Box<dyn Provider>> {
        let auth = self
            .vaults
            .get(&provider_id.to_lowercase())
            .cloned()
            .unwrap_or_default();
        factory::initialize(provider_id, &auth)
    }
}

/// Deployment and access settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChatServiceOptions {
    /// Attachments are stored server side and described to the model as text
    pub server_mode: bool,
    pub include_file_url: bool,
    pub auth_enabled: bool,
    pub signed_in: bool,
    /// Requests are sent from the client rather than through a server
    pub fetch_on_client: bool,
}

/// Map a provider failure onto the chat error taxonomy
pub fn classify_provider_error(err: &anyhow::Error, provider: &str) -> ChatError {
    if err.downcast_ref::<RequestAbortedError>().is_some() {
        return ChatError::aborted();
    }

    let chat_error = if let Some(exceeded) = err.downcast_ref::<ContextLengthExceededError>() {
        ChatError::new(ChatErrorType::ExceededContextWindow, exceeded.to_string())
    } else if let Some(missing) = err.downcast_ref::<MissingCredentialError>() {
        ChatError::new(ChatErrorType::InvalidProviderApiKey, missing.to_string())
    } else if let Some(http) = err.downcast_ref::<ProviderHttpError>() {
        let error_type = match http.status {
            401 | 403 => ChatErrorType::InvalidProviderApiKey,
            429 => ChatErrorType::QuotaLimitReached,
            _ => ChatErrorType::ProviderError,
        };
        ChatError::new(error_type, http.to_string())
            .with_error(json!({"status": http.status, "body": http.body}))
    } else {
        ChatError::new(ChatErrorType::ProviderError, err.to_string())
    };
    chat_error.with_provider(provider)
}

async fn race<T, F>(cancel: &CancellationToken, future: F) -> ChatResult<T>
where
    F: Future<Output = ChatResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ChatError::aborted()),
        result = future => result,
    }
}

fn apply_model_params(payload: &mut ChatPayload, params: &ModelParams) {
    payload.temperature = params.temperature.map(|v| v as f32);
    payload.top_p = params.top_p.map(|v| v as f32);
    payload.presence_penalty = params.presence_penalty.map(|v| v as f32);
    payload.frequency_penalty = params.frequency_penalty.map(|v| v as f32);
    payload.max_tokens = params.max_tokens;
    if let Some(effort) = &params.reasoning_effort {
        payload
            .extend
            .entry("reasoning_effort")
            .or_insert_with(|| json!(effort));
    }
}

/// The events a buffered completion is replayed as
fn completion_events(completion: &Completion) -> Vec<ChatStreamEvent> {
    let mut events = Vec::new();
    if let Some(reasoning) = &completion.reasoning {
        if let Some(content) = &reasoning.content {
            events.push(ChatStreamEvent::Reasoning(content.clone()));
        }
        if let Some(signature) = &reasoning.signature {
            events.push(ChatStreamEvent::ReasoningSignature(signature.clone()));
        }
    }
    if !completion.content.is_empty() {
        events.push(ChatStreamEvent::Text(completion.content.clone()));
    }
    if !completion.tool_calls.is_empty() {
        events.push(ChatStreamEvent::ToolCalls(completion.tool_calls.clone()));
    }
    if let Some(grounding) = &completion.grounding {
        events.push(ChatStreamEvent::Grounding(grounding.clone()));
    }
    if let Some(usage) = &completion.usage {
        events.push(ChatStreamEvent::Usage(usage.clone()));
    }
    events.push(ChatStreamEvent::Stop(completion.finish_reason.clone()));
    events
}

pub struct ChatService {
    agents: AgentConfigResolver,
    memory: Option<MemoryResolver>,
    tools: Arc<ToolRegistry>,
    capabilities: Arc<CapabilityRegistry>,
    providers: Arc<dyn ProviderResolver>,
    image_loader: Arc<dyn ImageLoader>,
    options: ChatServiceOptions,
}

impl ChatService {
    pub fn new(
        agents: AgentConfigResolver,
        capabilities: Arc<CapabilityRegistry>,
        tools: Arc<ToolRegistry>,
        providers: Arc<dyn ProviderResolver>,
    ) -> Result<Self> {
        Ok(ChatService {
            agents,
            memory: None,
            tools,
            capabilities,
            providers,
            image_loader: Arc::new(HttpImageLoader::new()?),
            options: ChatServiceOptions::default(),
        })
    }

    pub fn with_memory(mut self, memory: MemoryResolver) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_image_loader(mut self, image_loader: Arc<dyn ImageLoader>) -> Self {
        self.image_loader = image_loader;
        self
    }

    pub fn with_options(mut self, options: ChatServiceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    /// Answer `request` with the agent's configured model, reporting progress through `callbacks`
    pub async fn create_assistant_message(
        &self,
        request: ChatRequest,
        callbacks: &mut ChatCallbacks,
        cancel: CancellationToken,
    ) -> ChatOutcome {
        let mut machine = StateMachine::new();
        callbacks.loading(true);
        let result = self.run(request, callbacks, &cancel, &mut machine).await;
        let outcome = settle(result, callbacks, &mut machine);
        callbacks.loading(false);
        outcome
    }

    /// Run a preset completion: no agent, no memory and no tools
    pub async fn fetch_preset_task_result(
        &self,
        task: PresetTask,
        callbacks: &mut ChatCallbacks,
        cancel: CancellationToken,
    ) -> ChatOutcome {
        let mut machine = StateMachine::new();
        callbacks.loading(true);
        let result = self.run_preset(task, callbacks, &cancel, &mut machine).await;
        let outcome = settle(result, callbacks, &mut machine);
        callbacks.loading(false);
        outcome
    }

    /// Send a prepared payload to `provider_id`
    pub async fn get_chat_completion(
        &self,
        payload: ChatPayload,
        provider_id: &str,
        cancel: CancellationToken,
    ) -> ChatResult<ChatResponse> {
        let provider = self
            .providers
            .provider(provider_id)
            .map_err(|err| classify_provider_error(&err, provider_id))?;
        tracing::debug!(
            provider = %provider_id,
            model = %payload.model,
            messages = payload.messages.len(),
            stream = payload.stream,
            "requesting chat completion"
        );

        race(&cancel, async {
            provider
                .chat(payload, cancel.clone())
                .await
                .map_err(|err| classify_provider_error(&err, provider_id))
        })
        .await
    }

    fn check_access(&self) -> ChatResult<()> {
        let options = self.options;
        if options.fetch_on_client && options.auth_enabled && !options.signed_in {
            return Err(ChatError::new(
                ChatErrorType::InvalidAccessCode,
                "Sign in to send messages from this client",
            ));
        }
        Ok(())
    }

    fn dispatch_model(&self, model: &str, provider: &str) -> String {
        let provider = provider.to_lowercase();
        if DEPLOYMENT_PROVIDERS.contains(&provider.as_str()) {
            if let Some(deployment) = self.capabilities.deployment_name(model, &provider) {
                return deployment;
            }
        }
        model.to_string()
    }

    fn file_context(&self) -> FileContextConfig {
        FileContextConfig {
            enabled: self.options.server_mode,
            include_file_url: self.options.include_file_url,
        }
    }

    async fn run(
        &self,
        request: ChatRequest,
        callbacks: &mut ChatCallbacks,
        cancel: &CancellationToken,
        machine: &mut StateMachine,
    ) -> ChatResult<ChatFinish> {
        self.check_access()?;

        machine.advance(ChatState::ResolvingAgentConfig)?;
        let agent = race(cancel, async {
            self.agents
                .resolve(&request.agent_id, &request.overrides)
                .await
                .map_err(|err| ChatError::bad_request(err.to_string()))
        })
        .await?;

        machine.advance(ChatState::ResolvingMemory)?;
        let memory = self.resolve_memory(&agent, &request, cancel).await?;

        machine.advance(ChatState::BuildingTools)?;
        let capabilities = self.capabilities.capabilities(&agent.model, &agent.provider);
        let mut tool_names = ToolNameResolver::new();
        let (tools_config, tool_schemas) =
            self.build_tools(&agent.plugins, &capabilities, &mut tool_names);

        machine.advance(ChatState::RunningPipeline)?;
        let mut user = request.user;
        user.model.get_or_insert_with(|| agent.model.clone());
        user.provider.get_or_insert_with(|| agent.provider.clone());

        let chat_config = &agent.chat_config;
        let mut params = MessagesEngineParams::new(request.messages, &agent.model, &agent.provider);
        params.capabilities = capabilities.clone();
        params.enable_history_count = chat_config.enable_history_count;
        params.history_count = chat_config.history_count + HISTORY_COUNT_OFFSET;
        params.system_role = Some(agent.system_role.clone()).filter(|role| !role.trim().is_empty());
        params.tools_config = tools_config;
        params.history_summary = request.history_summary;
        params.user_memory = memory;
        params.input_template = chat_config.input_template.clone();
        params.variable_generators = VariableGenerators::standard(&user);
        params.file_context = self.file_context();
        params.include_historical_thinking = chat_config.include_historical_thinking;
        params.tool_names = tool_names;
        let output = self.run_pipeline(params, cancel).await?;

        machine.advance(ChatState::Dispatching)?;
        let payload = self.build_payload(&agent, &capabilities, output.messages, tool_schemas);
        let response = self
            .get_chat_completion(payload, &agent.provider, cancel.clone())
            .await?;
        let completion = self
            .consume(response, &agent.provider, callbacks, cancel, machine)
            .await?;

        let tool_calls = output.tool_names.resolve(&completion.tool_calls);
        Ok(ChatFinish {
            completion,
            tool_calls,
            model: agent.model,
            provider: agent.provider,
        })
    }

    async fn run_preset(
        &self,
        task: PresetTask,
        callbacks: &mut ChatCallbacks,
        cancel: &CancellationToken,
        machine: &mut StateMachine,
    ) -> ChatResult<ChatFinish> {
        self.check_access()?;

        machine.advance(ChatState::RunningPipeline)?;
        let mut params = MessagesEngineParams::new(task.messages, &task.model, &task.provider);
        params.capabilities = self.capabilities.capabilities(&task.model, &task.provider);
        params.file_context = self.file_context();
        let output = self.run_pipeline(params, cancel).await?;

        machine.advance(ChatState::Dispatching)?;
        let mut payload = ChatPayload::new(
            self.dispatch_model(&task.model, &task.provider),
            output.messages,
        );
        payload.stream = task.stream;
        apply_model_params(&mut payload, &task.params);

        let response = self
            .get_chat_completion(payload, &task.provider, cancel.clone())
            .await?;
        let completion = self
            .consume(response, &task.provider, callbacks, cancel, machine)
            .await?;

        Ok(ChatFinish {
            completion,
            tool_calls: Vec::new(),
            model: task.model,
            provider: task.provider,
        })
    }

    async fn resolve_memory(
        &self,
        agent: &ResolvedAgentConfig,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> ChatResult<Option<UserMemory>> {
        let resolver = match &self.memory {
            Some(resolver) if agent.chat_config.enable_memory => resolver,
            _ => return Ok(None),
        };

        let fetched = race(cancel, async {
            Ok(resolver
                .resolve(
                    request.session_id.as_deref(),
                    request.topic_id.as_deref(),
                    &request.messages,
                )
                .await)
        })
        .await?;

        match fetched {
            Ok(memory) if memory.is_empty() => Ok(None),
            Ok(memory) => Ok(Some(memory)),
            Err(err) => {
                tracing::warn!(error = %err, "user memory unavailable, continuing without it");
                Ok(None)
            }
        }
    }

    fn build_tools(
        &self,
        plugins: &[String],
        capabilities: &CapabilityFlags,
        tool_names: &mut ToolNameResolver,
    ) -> (ToolsConfig, Vec<Value>) {
        if plugins.is_empty() {
            return (ToolsConfig::default(), Vec::new());
        }

        let system_roles = match self.tools.enabled_system_roles(plugins, tool_names) {
            Ok(roles) => roles,
            Err(err) => {
                tracing::warn!(
                    error_type = %ChatErrorType::TemplateRenderError,
                    error = %err,
                    "failed to render tool system roles"
                );
                None
            }
        };
        let schemas = if capabilities.supports_function_call {
            self.tools.tool_schemas(plugins, tool_names)
        } else {
            Vec::new()
        };

        (
            ToolsConfig {
                tools: plugins.to_vec(),
                system_roles,
            },
            schemas,
        )
    }

    async fn run_pipeline(
        &self,
        params: MessagesEngineParams,
        cancel: &CancellationToken,
    ) -> ChatResult<EngineOutput> {
        let engine = MessagesEngine::new(params, Arc::clone(&self.image_loader));
        race(cancel, async {
            engine
                .process()
                .await
                .map_err(|err| ChatError::bad_request(err.to_string()))
        })
        .await
    }

    fn build_payload(
        &self,
        agent: &ResolvedAgentConfig,
        capabilities: &CapabilityFlags,
        messages: Vec<WireMessage>,
        tools: Vec<Value>,
    ) -> ChatPayload {
        let mut payload = ChatPayload::new(self.dispatch_model(&agent.model, &agent.provider), messages);
        payload.stream = agent.chat_config.enable_streaming;
        payload.tools = tools;
        payload.extend = resolve_extend_params(&capabilities.extend_params, &agent.chat_config);
        apply_model_params(&mut payload, &agent.params);
        payload.extend.retain(|_, value| !value.is_null());
        payload
    }

    async fn consume(
        &self,
        response: ChatResponse,
        provider: &str,
        callbacks: &mut ChatCallbacks,
        cancel: &CancellationToken,
        machine: &mut StateMachine,
    ) -> ChatResult<Completion> {
        match response {
            ChatResponse::Complete(completion) => {
                machine.advance(ChatState::Buffered)?;
                for event in completion_events(&completion) {
                    callbacks.message(&event);
                }
                Ok(completion)
            }
            ChatResponse::Stream(mut stream) => {
                machine.advance(ChatState::Streaming)?;
                let mut completion = Completion::default();
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ChatError::aborted()),
                        next = stream.next() => next,
                    };
                    match next {
                        Some(Ok(event)) => {
                            completion.apply(&event);
                            callbacks.message(&event);
                        }
                        Some(Err(err)) => return Err(classify_provider_error(&err, provider)),
                        None => break,
                    }
                }
                Ok(completion)
            }
        }
    }
}

fn settle(
    result: ChatResult<ChatFinish>,
    callbacks: &mut ChatCallbacks,
    machine: &mut StateMachine,
) -> ChatOutcome {
    match result {
        Ok(finish) => {
            machine.settle(ChatState::Done);
            if let Some(handler) = callbacks.on_finish.as_mut() {
                handler(&finish);
            }
            ChatOutcome::Finished(finish)
        }
        Err(err) if err.is_abort() => {
            machine.settle(ChatState::Aborted);
            if let Some(handler) = callbacks.on_abort.as_mut() {
                handler();
            }
            ChatOutcome::Aborted
        }
        Err(err) => {
            machine.settle(ChatState::Errored);
            tracing::warn!(
                error_type = %err.error_type,
                provider = ?err.provider,
                message = %err.message,
                "chat request failed"
            );
            if let Some(handler) = callbacks.on_error.as_mut() {
                handler(&err);
            }
            ChatOutcome::Errored(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_config::{AgentConfig, StaticAgentConfigs};
    use crate::models::message::Role;
    use crate::models::tool::{ApiSchema, ToolManifest};
    use crate::models::wire::WireToolCall;
    use crate::providers::mock::{MockProvider, MockReply};
    use std::sync::Mutex;
    use std::time::Duration;

    struct MockProviders(MockProvider);

    impl ProviderResolver for MockProviders {
        fn provider(&self, provider_id: &str) -> Result<Box<dyn Provider>> {
            Ok(Box::new(self.0.clone().with_id(provider_id)))
        }
    }

    fn agent() -> AgentConfig {
        let mut agent = AgentConfig::new("news", "gpt-4o", "openai");
        agent.system_role = "You are a news bot".to_string();
        agent.plugins = vec!["web".to_string()];
        agent.params.temperature = Some(0.5);
        agent
    }

    fn service(agent: AgentConfig, mock: &MockProvider) -> ChatService {
        let agents = AgentConfigResolver::new(Arc::new(StaticAgentConfigs::new().with_agent(agent)));
        let tools = ToolRegistry::from_manifests(vec![ToolManifest::new(
            "web",
            vec![ApiSchema::new(
                "search",
                "Search the web",
                json!({"type": "object", "properties": {"q": {"type": "string"}}}),
            )],
        )]);
        ChatService::new(
            agents,
            Arc::new(CapabilityRegistry::builtin(&[]).unwrap()),
            Arc::new(tools),
            Arc::new(MockProviders(mock.clone())),
        )
        .unwrap()
    }

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn callbacks(&self) -> ChatCallbacks {
            let (message, finish, error, abort, loading) = (
                self.clone(),
                self.clone(),
                self.clone(),
                self.clone(),
                self.clone(),
            );
            ChatCallbacks::new()
                .on_message(move |event| message.push(format!("message:{:?}", event)))
                .on_finish(move |_| finish.push("finish".to_string()))
                .on_error(move |err| error.push(format!("error:{}", err.error_type)))
                .on_abort(move || abort.push("abort".to_string()))
                .on_loading_change(move |loading_state| loading.push(format!("loading:{}", loading_state)))
        }

        fn push(&self, entry: String) {
            self.calls.lock().unwrap().push(entry);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.calls().iter().filter(|c| c.starts_with(prefix)).count()
        }
    }

    #[test]
    fn test_state_transitions() {
        let mut machine = StateMachine::new();
        assert!(machine.advance(ChatState::Dispatching).is_err());
        assert!(machine.advance(ChatState::ResolvingAgentConfig).is_ok());
        assert!(machine.advance(ChatState::Aborted).is_ok());
        assert!(machine.advance(ChatState::Errored).is_err());
        assert_eq!(
            machine.history,
            vec![ChatState::Idle, ChatState::ResolvingAgentConfig, ChatState::Aborted]
        );

        assert!(ChatState::Dispatching.can_transition_to(ChatState::Streaming));
        assert!(ChatState::Dispatching.can_transition_to(ChatState::Aborted));
        assert!(!ChatState::Streaming.can_transition_to(ChatState::Buffered));
        assert!(!ChatState::Done.can_transition_to(ChatState::Aborted));
    }

    #[tokio::test]
    async fn test_streamed_tool_call_round_trip() {
        let mock = MockProvider::new(vec![MockReply::Events(vec![
            ChatStreamEvent::Text("Searching".to_string()),
            ChatStreamEvent::ToolCalls(vec![WireToolCall::function(
                "call_1",
                "web____search",
                "{\"q\":\"rust\"}",
            )]),
            ChatStreamEvent::Stop(Some("tool_calls".to_string())),
        ])]);
        let service = service(agent(), &mock);
        let recorder = Recorder::default();

        let outcome = service
            .create_assistant_message(
                ChatRequest::new("news", vec![ChatTurn::user().with_text("rust news?")]),
                &mut recorder.callbacks(),
                CancellationToken::new(),
            )
            .await;

        let finish = outcome.finish().unwrap();
        assert_eq!(finish.completion.content, "Searching");
        assert_eq!(finish.tool_calls.len(), 1);
        assert_eq!(finish.tool_calls[0].identifier, "web");
        assert_eq!(finish.tool_calls[0].api_name, "search");
        assert_eq!(finish.tool_calls[0].arguments, "{\"q\":\"rust\"}");

        let calls = recorder.calls();
        assert_eq!(calls.first().map(String::as_str), Some("loading:true"));
        assert_eq!(calls.last().map(String::as_str), Some("loading:false"));
        assert_eq!(recorder.count("message:"), 3);
        assert_eq!(recorder.count("finish"), 1);
        assert_eq!(recorder.count("error"), 0);

        let request = &mock.requests()[0];
        assert!(request.stream);
        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.temperature, Some(0.5));
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.tools[0]["function"]["name"], "web____search");
        assert_eq!(request.messages[0].role, Role::System);
        assert!(request.messages[0]
            .content
            .text()
            .starts_with("You are a news bot"));
    }

    #[tokio::test]
    async fn test_buffered_response_and_history_budget() {
        let mock = MockProvider::new(vec![MockReply::Complete(Completion::text("Done"))]);
        let mut agent = agent();
        agent.system_role = String::new();
        agent.plugins = Vec::new();
        agent.chat_config.enable_streaming = false;
        agent.chat_config.enable_history_count = true;
        agent.chat_config.history_count = 1;
        let service = service(agent, &mock);
        let recorder = Recorder::default();

        let messages = (0..6)
            .map(|i| ChatTurn::user().with_text(format!("message {}", i)))
            .collect();
        let outcome = service
            .create_assistant_message(
                ChatRequest::new("news", messages),
                &mut recorder.callbacks(),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.finish().unwrap().completion.content, "Done");
        let request = &mock.requests()[0];
        assert!(!request.stream);
        assert!(request.tools.is_empty());
        let texts: Vec<String> = request.messages.iter().map(|m| m.content.text()).collect();
        assert_eq!(texts, vec!["message 3", "message 4", "message 5"]);
        assert_eq!(recorder.count("message:"), 2);
    }

    #[tokio::test]
    async fn test_deployment_name_replaces_model() {
        let mock = MockProvider::new(vec![MockReply::Complete(Completion::text("ok"))]);
        let mut agent = AgentConfig::new("qwen", "qwen-max", "qwen");
        agent.chat_config.enable_streaming = false;
        let service = service(agent, &mock);

        let outcome = service
            .create_assistant_message(
                ChatRequest::new("qwen", vec![ChatTurn::user().with_text("hi")]),
                &mut ChatCallbacks::new(),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.finish().unwrap().model, "qwen-max");
        assert_eq!(mock.requests()[0].model, "qwen-max-latest");
    }

    #[tokio::test]
    async fn test_provider_error_reported_once() {
        let mock = MockProvider::new(vec![MockReply::Status(401)]);
        let service = service(agent(), &mock);
        let recorder = Recorder::default();

        let outcome = service
            .create_assistant_message(
                ChatRequest::new("news", vec![ChatTurn::user().with_text("hi")]),
                &mut recorder.callbacks(),
                CancellationToken::new(),
            )
            .await;

        let err = outcome.error().unwrap();
        assert_eq!(err.error_type, ChatErrorType::InvalidProviderApiKey);
        assert_eq!(err.provider.as_deref(), Some("openai"));
        assert_eq!(err.error.as_ref().unwrap()["status"], 401);
        assert_eq!(recorder.count("error:InvalidProviderAPIKey"), 1);
        assert_eq!(recorder.count("finish"), 0);
        assert_eq!(recorder.calls().last().map(String::as_str), Some("loading:false"));
    }

    #[tokio::test]
    async fn test_unknown_agent_is_bad_request() {
        let mock = MockProvider::new(vec![]);
        let service = service(agent(), &mock);

        let outcome = service
            .create_assistant_message(
                ChatRequest::new("missing", vec![ChatTurn::user().with_text("hi")]),
                &mut ChatCallbacks::new(),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.error().unwrap().error_type, ChatErrorType::BadRequest);
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_abort_during_dispatch() {
        let mock = MockProvider::new(vec![MockReply::Hang]);
        let service = service(agent(), &mock);
        let recorder = Recorder::default();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let outcome = service
            .create_assistant_message(
                ChatRequest::new("news", vec![ChatTurn::user().with_text("hi")]),
                &mut recorder.callbacks(),
                cancel,
            )
            .await;

        assert!(outcome.is_aborted());
        assert_eq!(recorder.count("abort"), 1);
        assert_eq!(recorder.count("error"), 0);
        assert_eq!(recorder.calls().last().map(String::as_str), Some("loading:false"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let mock = MockProvider::new(vec![]);
        let service = service(agent(), &mock);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = service
            .create_assistant_message(
                ChatRequest::new("news", vec![ChatTurn::user().with_text("hi")]),
                &mut ChatCallbacks::new(),
                cancel,
            )
            .await;

        assert!(outcome.is_aborted());
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_access_guard() {
        let mock = MockProvider::new(vec![]);
        let service = service(agent(), &mock).with_options(ChatServiceOptions {
            auth_enabled: true,
            fetch_on_client: true,
            signed_in: false,
            ..Default::default()
        });
        let recorder = Recorder::default();

        let outcome = service
            .create_assistant_message(
                ChatRequest::new("news", vec![ChatTurn::user().with_text("hi")]),
                &mut recorder.callbacks(),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(
            outcome.error().unwrap().error_type,
            ChatErrorType::InvalidAccessCode
        );
        assert_eq!(recorder.count("error:"), 1);
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_preset_task() {
        let mock = MockProvider::new(vec![MockReply::Complete(Completion::text("Rust news"))]);
        let service = service(agent(), &mock);
        let recorder = Recorder::default();

        let task = PresetTask {
            messages: vec![
                ChatTurn::system().with_text("Summarize as a title"),
                ChatTurn::user().with_text("what happened in rust this week"),
            ],
            model: "gpt-4o-mini".to_string(),
            provider: "openai".to_string(),
            ..Default::default()
        };
        let outcome = service
            .fetch_preset_task_result(task, &mut recorder.callbacks(), CancellationToken::new())
            .await;

        assert_eq!(outcome.finish().unwrap().completion.content, "Rust news");
        let request = &mock.requests()[0];
        assert!(request.tools.is_empty());
        assert_eq!(request.messages.len(), 2);
        assert_eq!(recorder.calls().first().map(String::as_str), Some("loading:true"));
        assert_eq!(recorder.calls().last().map(String::as_str), Some("loading:false"));
    }

    #[tokio::test]
    async fn test_preset_abort_skips_error() {
        let mock = MockProvider::new(vec![MockReply::Hang]);
        let service = service(agent(), &mock);
        let recorder = Recorder::default();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let task = PresetTask {
            messages: vec![ChatTurn::user().with_text("translate")],
            model: "gpt-4o-mini".to_string(),
            provider: "openai".to_string(),
            ..Default::default()
        };
        let outcome = service
            .fetch_preset_task_result(task, &mut recorder.callbacks(), cancel)
            .await;

        assert!(outcome.is_aborted());
        assert_eq!(recorder.count("error"), 0);
    }

    #[test]
    fn test_classify_provider_error() {
        let quota = anyhow::Error::from(ProviderHttpError {
            status: 429,
            body: json!({}),
        });
        assert_eq!(
            classify_provider_error(&quota, "openai").error_type,
            ChatErrorType::QuotaLimitReached
        );

        let server = anyhow::Error::from(ProviderHttpError {
            status: 503,
            body: json!("unavailable"),
        });
        assert_eq!(
            classify_provider_error(&server, "openai").error_type,
            ChatErrorType::ProviderError
        );

        let context = anyhow::Error::from(ContextLengthExceededError("too long".to_string()));
        assert_eq!(
            classify_provider_error(&context, "openai").error_type,
            ChatErrorType::ExceededContextWindow
        );

        let aborted = anyhow::Error::from(RequestAbortedError);
        let classified = classify_provider_error(&aborted, "openai");
        assert!(classified.is_abort());
        assert!(classified.provider.is_none());
    }

    #[test]
    fn test_extend_params_and_null_removal() {
        let mock = MockProvider::new(vec![]);
        let service = service(agent(), &mock);
        let mut agent = resolved_agent();
        agent.params.reasoning_effort = Some("high".to_string());
        let capabilities = CapabilityFlags {
            extend_params: vec!["disableContextCaching".to_string()],
            ..Default::default()
        };
        agent.chat_config.disable_context_caching = true;

        let payload = service.build_payload(&agent, &capabilities, Vec::new(), Vec::new());
        assert_eq!(payload.extend["enabled_context_caching"], false);
        assert_eq!(payload.extend["reasoning_effort"], "high");
        assert!(payload.extend.values().all(|v| !v.is_null()));
    }

    fn resolved_agent() -> ResolvedAgentConfig {
        let agent = agent();
        ResolvedAgentConfig {
            agent_id: agent.id,
            model: agent.model,
            provider: agent.provider,
            system_role: agent.system_role,
            plugins: agent.plugins,
            params: agent.params,
            chat_config: agent.chat_config,
            builtin: false,
        }
    }
}
