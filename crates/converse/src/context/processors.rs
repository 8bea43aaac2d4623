//! The stages of the chat context pipeline, in the order they must run
pub mod cleanup;
pub mod history_summary;
pub mod history_truncate;
pub mod input_template;
pub mod message_content;
pub mod placeholder;
pub mod system_role;
pub mod tool_call;
pub mod tool_reorder;
pub mod tool_system_role;
pub mod user_memory;

pub use cleanup::CleanupProcessor;
pub use history_summary::HistorySummaryProcessor;
pub use history_truncate::HistoryTruncateProcessor;
pub use input_template::InputTemplateProcessor;
pub use message_content::{FileContextConfig, HttpImageLoader, ImageLoader, MessageContentProcessor};
pub use placeholder::PlaceholderProcessor;
pub use system_role::SystemRoleProcessor;
pub use tool_call::ToolCallProcessor;
pub use tool_reorder::ToolReorderProcessor;
pub use tool_system_role::ToolSystemRoleProcessor;
pub use user_memory::UserMemoryProcessor;
