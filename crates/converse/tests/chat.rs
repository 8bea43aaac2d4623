use anyhow::Result;
use converse::agent_config::{AgentConfig, AgentConfigResolver, StaticAgentConfigs};
use converse::chat::{ChatCallbacks, ChatRequest, ChatService, KeyVaultProviders};
use converse::errors::ChatErrorType;
use converse::models::message::ChatTurn;
use converse::models::tool::{ApiSchema, ToolManifest};
use converse::providers::base::ChatStreamEvent;
use converse::providers::configs::ProviderAuthPayload;
use converse::registry::capability::CapabilityRegistry;
use converse::registry::tools::ToolRegistry;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn weather_agent() -> AgentConfig {
    let mut agent = AgentConfig::new("weather", "gpt-4o", "openai");
    agent.system_role = "You report the weather.".to_string();
    agent.plugins = vec!["weather".to_string()];
    agent
}

fn service(providers: KeyVaultProviders) -> Result<ChatService> {
    let agents =
        AgentConfigResolver::new(Arc::new(StaticAgentConfigs::new().with_agent(weather_agent())));
    let tools = ToolRegistry::from_manifests(vec![ToolManifest::new(
        "weather",
        vec![ApiSchema::new(
            "current",
            "Get the current weather for a city",
            json!({
                "type": "object",
                "required": ["city"],
                "properties": {"city": {"type": "string"}}
            }),
        )],
    )]);
    ChatService::new(
        agents,
        Arc::new(CapabilityRegistry::builtin(&[])?),
        Arc::new(tools),
        Arc::new(providers),
    )
}

fn vault(server: &MockServer, api_key: &str) -> KeyVaultProviders {
    KeyVaultProviders::default().with_vault(
        "openai",
        ProviderAuthPayload {
            api_key: Some(api_key.to_string()),
            base_url: Some(server.uri()),
            ..Default::default()
        },
    )
}

#[derive(Clone, Default)]
struct Events {
    text: Arc<Mutex<String>>,
    errors: Arc<Mutex<Vec<ChatErrorType>>>,
    loading: Arc<Mutex<Vec<bool>>>,
}

impl Events {
    fn callbacks(&self) -> ChatCallbacks {
        let (text, errors, loading) = (self.text.clone(), self.errors.clone(), self.loading.clone());
        ChatCallbacks::new()
            .on_message(move |event| {
                if let ChatStreamEvent::Text(chunk) = event {
                    text.lock().unwrap().push_str(chunk);
                }
            })
            .on_error(move |err| errors.lock().unwrap().push(err.error_type))
            .on_loading_change(move |state| loading.lock().unwrap().push(state))
    }
}

fn question() -> ChatRequest {
    ChatRequest::new(
        "weather",
        vec![ChatTurn::user().with_text("Is it raining in Paris?")],
    )
}

#[tokio::test]
async fn test_streamed_answer_with_tool_call() -> Result<()> {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Checking\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_7\",\"function\":{\"name\":\"weather____current\",\"arguments\":\"{\\\"city\\\":\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"Paris\\\"}\"}}]},\"finish_reason\":\"tool_calls\"}]}\n\n",
        "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":30,\"completion_tokens\":12,\"total_tokens\":42}}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o",
            "stream": true,
            "tools": [{"type": "function", "function": {"name": "weather____current"}}]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let service = service(vault(&server, "sk-test"))?;
    let events = Events::default();
    let outcome = service
        .create_assistant_message(question(), &mut events.callbacks(), CancellationToken::new())
        .await;

    let finish = outcome.finish().expect("request should finish");
    assert_eq!(finish.completion.content, "Checking");
    assert_eq!(finish.completion.finish_reason.as_deref(), Some("tool_calls"));
    assert_eq!(
        finish.completion.usage.as_ref().and_then(|u| u.total_tokens),
        Some(42)
    );
    assert_eq!(finish.tool_calls.len(), 1);
    assert_eq!(finish.tool_calls[0].id, "call_7");
    assert_eq!(finish.tool_calls[0].identifier, "weather");
    assert_eq!(finish.tool_calls[0].api_name, "current");
    assert_eq!(finish.tool_calls[0].arguments, r#"{"city":"Paris"}"#);

    assert_eq!(*events.text.lock().unwrap(), "Checking");
    assert!(events.errors.lock().unwrap().is_empty());
    assert_eq!(*events.loading.lock().unwrap(), vec![true, false]);
    Ok(())
}

#[tokio::test]
async fn test_rejected_key_is_reported_once() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided", "code": "invalid_api_key"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let service = service(vault(&server, "sk-wrong"))?;
    let events = Events::default();
    let outcome = service
        .create_assistant_message(question(), &mut events.callbacks(), CancellationToken::new())
        .await;

    let error = outcome.error().expect("request should fail");
    assert_eq!(error.error_type, ChatErrorType::InvalidProviderApiKey);
    assert_eq!(error.provider.as_deref(), Some("openai"));
    assert_eq!(
        *events.errors.lock().unwrap(),
        vec![ChatErrorType::InvalidProviderApiKey]
    );
    assert_eq!(*events.loading.lock().unwrap(), vec![true, false]);
    Ok(())
}

#[tokio::test]
async fn test_missing_key_never_reaches_the_network() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let service = service(vault(&server, ""))?;
    let events = Events::default();
    let outcome = service
        .create_assistant_message(question(), &mut events.callbacks(), CancellationToken::new())
        .await;

    let error = outcome.error().expect("request should fail");
    assert_eq!(error.error_type, ChatErrorType::InvalidProviderApiKey);
    Ok(())
}

#[tokio::test]
async fn test_context_window_overflow() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "message": "This model's maximum context length is 128000 tokens.",
                "code": "context_length_exceeded"
            }
        })))
        .mount(&server)
        .await;

    let service = service(vault(&server, "sk-test"))?;
    let outcome = service
        .create_assistant_message(question(), &mut ChatCallbacks::new(), CancellationToken::new())
        .await;

    let error = outcome.error().expect("request should fail");
    assert_eq!(error.error_type, ChatErrorType::ExceededContextWindow);
    Ok(())
}

#[tokio::test]
async fn test_cancel_while_waiting_for_provider() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(std::time::Duration::from_secs(30))
                .set_body_json(json!({"choices": []})),
        )
        .mount(&server)
        .await;

    let service = service(vault(&server, "sk-test"))?;
    let events = Events::default();
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let outcome = service
        .create_assistant_message(question(), &mut events.callbacks(), cancel)
        .await;

    assert!(outcome.is_aborted());
    assert!(events.errors.lock().unwrap().is_empty());
    assert_eq!(*events.loading.lock().unwrap(), vec![true, false]);
    Ok(())
}
