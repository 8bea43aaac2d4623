use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use converse::agent_config::{AgentConfigResolver, StaticAgentConfigs};
use converse::chat::{ChatService, KeyVaultProviders};
use converse::models::tool::ToolManifest;
use converse::registry::capability::CapabilityRegistry;
use converse::registry::tools::ToolRegistry;

use crate::configuration::Settings;
use crate::prompt::cliclack::CliclackPrompt;
use crate::session::session_file::{ensure_session_dir, session_path};
use crate::session::Session;

fn load_manifests(path: &Path) -> Result<Vec<ToolManifest>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tool manifests from {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Invalid tool manifests in {}", path.display()))
}

/// Wire the chat service from settings, with the configured agent as the fallback for any id
pub fn build_service(settings: &Settings) -> Result<ChatService> {
    let agent = settings.agent_config();
    let agents = AgentConfigResolver::with_builtin_runtimes(Arc::new(
        StaticAgentConfigs::new()
            .with_agent(agent.clone())
            .with_fallback(agent),
    ));

    let tools = match &settings.tools_file {
        Some(path) => ToolRegistry::from_manifests(load_manifests(path)?),
        None => ToolRegistry::from_manifests(Vec::new()),
    };

    let service = ChatService::new(
        agents,
        Arc::new(CapabilityRegistry::builtin(&[])?),
        Arc::new(tools),
        Arc::new(KeyVaultProviders::new(settings.key_vaults())),
    )?
    .with_options(settings.service_options());
    Ok(service)
}

pub fn build_session(
    settings: &Settings,
    name: Option<String>,
    resume: bool,
) -> Result<Session<'static>> {
    let name = name.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let session_file = session_path(&ensure_session_dir()?, &name);
    tracing::debug!(session = %name, file = %session_file.display(), "building session");

    let session = Session::new(
        build_service(settings)?,
        &settings.agent.id,
        Box::new(CliclackPrompt::new()),
        session_file,
    )
    .with_user(settings.user_context());

    if resume {
        session.resume()
    } else {
        Ok(session)
    }
}

pub async fn execute(settings: Settings, name: Option<String>, resume: bool) -> Result<()> {
    let mut session = build_session(&settings, name, resume)?;
    session.start().await
}
