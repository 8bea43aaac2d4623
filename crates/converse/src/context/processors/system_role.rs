use anyhow::Result;
use async_trait::async_trait;

use crate::context::engine::ContextProcessor;
use crate::context::state::{PipelineMessage, PipelineState, SYSTEM_ROLE_SEPARATOR};
use crate::models::message::Role;

/// Folds every system message into one leading message and puts the agent's
/// system role in front of it.
pub struct SystemRoleProcessor {
    system_role: Option<String>,
}

impl SystemRoleProcessor {
    pub fn new(system_role: Option<String>) -> Self {
        SystemRoleProcessor { system_role }
    }
}

fn consolidate(state: &mut PipelineState) {
    let system_count = state
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .count();
    let leading = state
        .messages
        .first()
        .is_some_and(|m| m.role == Role::System);
    if system_count == 0 || (system_count == 1 && leading) {
        return;
    }

    let (system, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut state.messages)
        .into_iter()
        .partition(|m| m.role == Role::System);
    let merged: Vec<String> = system
        .iter()
        .map(PipelineMessage::text)
        .filter(|t| !t.is_empty())
        .collect();

    state.messages = rest;
    if !merged.is_empty() {
        state
            .messages
            .insert(0, PipelineMessage::system(merged.join(SYSTEM_ROLE_SEPARATOR)));
    }
}

#[async_trait]
impl ContextProcessor for SystemRoleProcessor {
    fn name(&self) -> &str {
        "SystemRoleInjector"
    }

    async fn process(&self, mut state: PipelineState) -> Result<PipelineState> {
        consolidate(&mut state);
        if let Some(role) = self.system_role.as_deref().map(str::trim) {
            if !role.is_empty() {
                state.prepend_system(role);
                state.set_metadata("system_role_injected", true);
            }
        }
        Ok(state)
    }
}
