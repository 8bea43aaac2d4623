pub mod agent_config;
pub mod chat;
pub mod context;
pub mod errors;
pub mod extend_params;
pub mod memory;
pub mod models;
pub mod placeholder;
pub mod prompt_template;
pub mod providers;
pub mod registry;
pub mod tool_name;
