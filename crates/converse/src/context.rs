//! Context engineering: turning stored chat turns into provider wire messages.
//!
//! A [`ContextEngine`] runs an ordered list of [`ContextProcessor`]s over a
//! [`PipelineState`]. [`MessagesEngine`] assembles the fixed chat pipeline from a single
//! parameter struct, so every processor sees only the snapshot it was built with.
pub mod engine;
pub mod messages_engine;
pub mod processors;
pub mod state;

pub use engine::{ContextEngine, ContextProcessor, PipelineError, PipelineOutcome};
pub use messages_engine::{EngineOutput, MessagesEngine, MessagesEngineParams, ToolsConfig};
pub use state::{PipelineMessage, PipelineState};
