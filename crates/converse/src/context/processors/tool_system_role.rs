use anyhow::Result;
use async_trait::async_trait;

use crate::context::engine::ContextProcessor;
use crate::context::state::PipelineState;

/// Appends the enabled tools' system roles when the model can call functions
pub struct ToolSystemRoleProcessor {
    tools: Vec<String>,
    system_roles: Option<String>,
    supports_function_call: bool,
}

impl ToolSystemRoleProcessor {
    pub fn new(tools: Vec<String>, system_roles: Option<String>, supports_function_call: bool) -> Self {
        ToolSystemRoleProcessor {
            tools,
            system_roles,
            supports_function_call,
        }
    }
}

#[async_trait]
impl ContextProcessor for ToolSystemRoleProcessor {
    fn name(&self) -> &str {
        "ToolSystemRoleProvider"
    }

    async fn process(&self, mut state: PipelineState) -> Result<PipelineState> {
        if self.tools.is_empty() || !self.supports_function_call {
            return Ok(state);
        }
        if let Some(roles) = self.system_roles.as_deref().filter(|r| !r.is_empty()) {
            state.append_system(roles);
            state.set_metadata("tool_system_role_injected", true);
        }
        Ok(state)
    }
}
