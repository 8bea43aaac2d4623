use anyhow::{anyhow, Result};
use async_trait::async_trait;
use converse::context::processors::{CleanupProcessor, ImageLoader, ToolCallProcessor};
use converse::context::{ContextProcessor, MessagesEngine, MessagesEngineParams, PipelineState};
use converse::models::message::{ChatTurn, Role, ToolInvocation};
use converse::models::wire::{ContentPart, WireContent, WireMessage};
use converse::placeholder::VariableGenerators;
use converse::registry::capability::CapabilityFlags;
use converse::tool_name::encode_tool_name;
use indoc::indoc;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts how often the pipeline asks for an inline copy of an image
#[derive(Default)]
struct CountingLoader {
    calls: AtomicUsize,
}

#[async_trait]
impl ImageLoader for CountingLoader {
    async fn to_data_uri(&self, url: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if url.ends_with(".png") {
            Ok("data:image/png;base64,iVBORw0KGgo=".to_string())
        } else {
            Err(anyhow!("not an image: {}", url))
        }
    }
}

fn capabilities(vision: bool, function_call: bool) -> CapabilityFlags {
    CapabilityFlags {
        supports_vision: vision,
        supports_function_call: function_call,
        ..Default::default()
    }
}

async fn run(params: MessagesEngineParams) -> Result<Vec<WireMessage>> {
    let loader: Arc<dyn ImageLoader> = Arc::new(CountingLoader::default());
    Ok(MessagesEngine::new(params, loader).process_messages().await?)
}

fn search_tool(call_id: &str) -> ToolInvocation {
    ToolInvocation::new(call_id, "web-search", "search", r#"{"query":"rust"}"#).with_type("builtin")
}

#[tokio::test]
async fn test_empty_history_yields_no_messages() -> Result<()> {
    let mut params = MessagesEngineParams::new(Vec::new(), "gpt-4o", "openai");
    params.system_role = Some("You are helpful".to_string());

    assert!(run(params).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_system_role_and_tool_instructions_share_one_message() -> Result<()> {
    let mut params = MessagesEngineParams::new(
        vec![ChatTurn::user().with_text("hi")],
        "gpt-4o",
        "openai",
    );
    params.capabilities = capabilities(false, true);
    params.system_role = Some("base".to_string());
    params.tools_config.tools = vec!["x".to_string()];
    params.tools_config.system_roles = Some("Tool X instructions".to_string());

    let messages = run(params).await?;

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(messages[0].content.text(), "base\n\nTool X instructions");
    assert_eq!(messages[1].content.text(), "hi");
    Ok(())
}

#[tokio::test]
async fn test_tool_instructions_skipped_without_function_calling() -> Result<()> {
    let mut params = MessagesEngineParams::new(
        vec![ChatTurn::user().with_text("hi")],
        "gpt-3.5",
        "openai",
    );
    params.system_role = Some("base".to_string());
    params.tools_config.tools = vec!["x".to_string()];
    params.tools_config.system_roles = Some("Tool X instructions".to_string());

    let messages = run(params).await?;
    assert_eq!(messages[0].content.text(), "base");
    Ok(())
}

#[tokio::test]
async fn test_tool_round_trip_is_reordered_and_named() -> Result<()> {
    // The tool result was persisted after the follow-up question
    let history = vec![
        ChatTurn::user().with_text("search rust"),
        ChatTurn::assistant().with_tool(search_tool("call_1")),
        ChatTurn::user().with_text("and then?"),
        ChatTurn::tool_result("call_1", search_tool("call_1")).with_text("results"),
        ChatTurn::tool_result("call_404", search_tool("call_404")).with_text("orphan"),
    ];
    let mut params = MessagesEngineParams::new(history, "gpt-4o", "openai");
    params.capabilities = capabilities(false, true);

    let loader: Arc<dyn ImageLoader> = Arc::new(CountingLoader::default());
    let output = MessagesEngine::new(params, loader).process().await?;
    let messages = output.messages;
    let expected_name = encode_tool_name("web-search", "search", Some("builtin"));

    let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::User]);

    let calls = messages[1].tool_calls.as_ref().expect("assistant tool calls");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, "call_1");
    assert_eq!(calls[0].function.name, expected_name);
    assert_eq!(calls[0].function.arguments, r#"{"query":"rust"}"#);

    assert_eq!(messages[2].tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(messages[2].name.as_deref(), Some(expected_name.as_str()));
    assert_eq!(messages[2].content.text(), "results");

    let decoded = output.tool_names.decode(&expected_name).expect("recorded name");
    assert_eq!(decoded.identifier, "web-search");
    assert_eq!(decoded.api_name, "search");
    Ok(())
}

#[tokio::test]
async fn test_tool_results_flatten_without_function_calling() -> Result<()> {
    let history = vec![
        ChatTurn::user().with_text("search rust"),
        ChatTurn::assistant().with_text("searching").with_tool(search_tool("call_1")),
        ChatTurn::tool_result("call_1", search_tool("call_1")).with_text("results"),
    ];
    let params = MessagesEngineParams::new(history, "gpt-3.5", "openai");

    let messages = run(params).await?;

    let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
    assert!(messages.iter().all(|m| m.tool_calls.is_none()));
    assert!(messages.iter().all(|m| m.tool_call_id.is_none()));
    assert_eq!(messages[2].content.text(), "results");
    Ok(())
}

#[tokio::test]
async fn test_truncation_keeps_most_recent() -> Result<()> {
    for (count, history_len) in [(2usize, 5usize), (5, 3), (0, 2)] {
        let history = (0..history_len)
            .map(|i| ChatTurn::user().with_text(format!("m{}", i)))
            .collect();
        let mut params = MessagesEngineParams::new(history, "gpt-4o", "openai");
        params.enable_history_count = true;
        params.history_count = count;

        let messages = run(params).await?;
        let kept = count.min(history_len);
        assert_eq!(messages.len(), kept);

        let texts: Vec<String> = messages.iter().map(|m| m.content.text()).collect();
        let expected: Vec<String> = (history_len - kept..history_len)
            .map(|i| format!("m{}", i))
            .collect();
        assert_eq!(texts, expected);
    }
    Ok(())
}

#[tokio::test]
async fn test_placeholders_substitute_known_variables() -> Result<()> {
    let mut params = MessagesEngineParams::new(
        vec![ChatTurn::user().with_text("Hello {{username}}, today is {{date}} {{missing_var}}")],
        "gpt-4o",
        "openai",
    );
    params.variable_generators = VariableGenerators::new()
        .with("username", || "TestUser".to_string())
        .with("date", || "2023-12-25".to_string());

    let messages = run(params).await?;
    assert_eq!(
        messages[0].content.text(),
        "Hello TestUser, today is 2023-12-25 {{missing_var}}"
    );
    Ok(())
}

#[tokio::test]
async fn test_input_template_runs_before_placeholders() -> Result<()> {
    let mut params = MessagesEngineParams::new(
        vec![ChatTurn::user().with_text("translate this")],
        "gpt-4o",
        "openai",
    );
    params.input_template = Some(
        indoc! {"
            From {{username}}:
            {{text}}"}
        .to_string(),
    );
    params.variable_generators = VariableGenerators::new().with("username", || "Ada".to_string());

    let messages = run(params).await?;
    assert_eq!(messages[0].content.text(), "From Ada:\ntranslate this");
    Ok(())
}

#[tokio::test]
async fn test_vision_gating_and_local_images() -> Result<()> {
    let history = || {
        vec![ChatTurn::user()
            .with_text("what is this")
            .with_image("img_local", "http://127.0.0.1:3210/f/cat.png")
            .with_image("img_remote", "https://cdn.example.com/dog.png")]
    };

    let loader = Arc::new(CountingLoader::default());
    let mut params = MessagesEngineParams::new(history(), "gpt-4o", "openai");
    params.capabilities = capabilities(true, false);
    let messages = MessagesEngine::new(params, loader.clone())
        .process_messages()
        .await?;

    assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        messages[0].content,
        WireContent::Parts(vec![
            ContentPart::text("what is this"),
            ContentPart::image("data:image/png;base64,iVBORw0KGgo="),
            ContentPart::image("https://cdn.example.com/dog.png"),
        ])
    );

    let blind_loader = Arc::new(CountingLoader::default());
    let params = MessagesEngineParams::new(history(), "gpt-3.5", "openai");
    let messages = MessagesEngine::new(params, blind_loader.clone())
        .process_messages()
        .await?;

    assert_eq!(blind_loader.calls.load(Ordering::SeqCst), 0);
    assert_eq!(messages[0].content, WireContent::Text("what is this".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_video_parts_follow_video_capability() -> Result<()> {
    let history = || {
        vec![ChatTurn::user()
            .with_text("summarize the clip")
            .with_video("vid1", "https://cdn.example.com/clip.mp4")]
    };

    let mut params = MessagesEngineParams::new(history(), "gemini-2.5-flash", "google");
    params.capabilities = CapabilityFlags {
        supports_video: true,
        ..capabilities(true, true)
    };
    let messages = run(params).await?;
    assert_eq!(
        messages[0].content,
        WireContent::Parts(vec![
            ContentPart::text("summarize the clip"),
            ContentPart::video("https://cdn.example.com/clip.mp4"),
        ])
    );

    let mut params = MessagesEngineParams::new(history(), "gpt-4o", "openai");
    params.capabilities = capabilities(true, true);
    let messages = run(params).await?;
    assert_eq!(
        messages[0].content,
        WireContent::Text("summarize the clip".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn test_historical_reasoning_sent_as_field_for_moonshot() -> Result<()> {
    let history = vec![
        ChatTurn::user().with_text("is it right?"),
        ChatTurn::assistant()
            .with_text("The answer is correct.")
            .with_reasoning("Analyzing the problem step by step.", None),
        ChatTurn::user().with_text("why?"),
    ];
    let mut params = MessagesEngineParams::new(history, "kimi-k2-0711-preview", "moonshot");
    params.include_historical_thinking = true;

    let messages = run(params).await?;
    let wire = serde_json::to_value(&messages)?;

    assert_eq!(wire[1]["content"], "The answer is correct.");
    assert_eq!(wire[1]["reasoning"]["content"], "Analyzing the problem step by step.");
    assert!(wire[0].get("reasoning").is_none());
    Ok(())
}

#[tokio::test]
async fn test_history_summary_and_memory_land_in_system_message() -> Result<()> {
    let mut params = MessagesEngineParams::new(
        vec![ChatTurn::user().with_text("continue")],
        "gpt-4o",
        "openai",
    );
    params.system_role = Some("base".to_string());
    params.history_summary = Some("We discussed lifetimes.".to_string());

    let messages = run(params).await?;
    assert_eq!(messages[0].role, Role::System);
    let system = messages[0].content.text();
    assert!(system.starts_with("base"));
    assert!(system.contains("We discussed lifetimes."));
    Ok(())
}

#[tokio::test]
async fn test_wire_output_is_clean() -> Result<()> {
    let history = vec![
        ChatTurn::user().with_text("hi"),
        ChatTurn::assistant()
            .with_text("hello")
            .with_reasoning("greeting back", Some("sig".to_string())),
    ];
    let mut params = MessagesEngineParams::new(history, "gpt-4o", "openai");
    params.capabilities = capabilities(false, true);

    let messages = run(params).await?;
    let wire = serde_json::to_value(&messages)?;

    assert_eq!(
        wire,
        json!([
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": "hello"}
        ])
    );
    Ok(())
}

#[tokio::test]
async fn test_structured_thinking_for_anthropic() -> Result<()> {
    let history = vec![
        ChatTurn::user().with_text("hi"),
        ChatTurn::assistant()
            .with_text("hello")
            .with_reasoning("greeting back", Some("sig".to_string())),
    ];
    let params = MessagesEngineParams::new(history, "claude-3-7-sonnet", "anthropic");

    let messages = run(params).await?;
    assert_eq!(
        messages[1].content,
        WireContent::Parts(vec![
            ContentPart::Thinking {
                thinking: "greeting back".to_string(),
                signature: "sig".to_string(),
            },
            ContentPart::text("hello"),
        ])
    );
    Ok(())
}

#[tokio::test]
async fn test_cleanup_is_idempotent() -> Result<()> {
    let history = vec![
        ChatTurn::user().with_text("search rust").with_image("img", "https://cdn.example.com/a.png"),
        ChatTurn::assistant().with_tool(search_tool("call_1")),
        ChatTurn::tool_result("call_1", search_tool("call_1")).with_text("results"),
    ];
    let state = ToolCallProcessor::new(true)
        .process(PipelineState::from_turns(history))
        .await?;

    let once = CleanupProcessor.process(state).await?;
    let once_wire: Vec<WireMessage> = once.messages.iter().cloned().map(|m| m.into_wire()).collect();
    assert!(once.messages.iter().all(|m| m.id.is_empty() && m.image_list.is_empty()));

    let twice = CleanupProcessor.process(once).await?;
    let twice_wire: Vec<WireMessage> = twice.messages.into_iter().map(|m| m.into_wire()).collect();

    assert_eq!(once_wire, twice_wire);
    Ok(())
}
