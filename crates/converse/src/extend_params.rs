//! Model-specific generation parameters gated by capability and user configuration.
use serde_json::{json, Map, Value};

use crate::agent_config::ChatConfig;

pub const DEFAULT_REASONING_BUDGET: u32 = 1024;

/// Build the extra request fields for a model declaring `extend_params`
pub fn resolve_extend_params(extend_params: &[String], chat_config: &ChatConfig) -> Map<String, Value> {
    let supports = |name: &str| extend_params.iter().any(|p| p == name);
    let mut params = Map::new();

    if supports("enableReasoning") {
        let thinking = if chat_config.enable_reasoning {
            json!({
                "type": "enabled",
                "budget_tokens": chat_config.reasoning_budget_token.unwrap_or(DEFAULT_REASONING_BUDGET),
            })
        } else {
            json!({"type": "disabled", "budget_tokens": 0})
        };
        params.insert("thinking".to_string(), thinking);
    } else if supports("reasoningBudgetToken") {
        params.insert(
            "thinking".to_string(),
            json!({
                "type": "enabled",
                "budget_tokens": chat_config.reasoning_budget_token.unwrap_or(DEFAULT_REASONING_BUDGET),
            }),
        );
    }

    if supports("disableContextCaching") && chat_config.disable_context_caching {
        params.insert("enabled_context_caching".to_string(), json!(false));
    }

    if supports("reasoningEffort") {
        if let Some(effort) = &chat_config.reasoning_effort {
            params.insert("reasoning_effort".to_string(), json!(effort));
        }
    }

    if supports("thinking") {
        if let Some(kind) = &chat_config.thinking {
            params.insert("thinking".to_string(), json!({"type": kind}));
        }
    }

    if supports("thinkingBudget") {
        if let Some(budget) = chat_config.thinking_budget {
            params.insert("thinking_budget".to_string(), json!(budget));
        }
    }

    params
}
