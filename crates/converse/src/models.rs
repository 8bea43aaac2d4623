//! These models represent the objects passed through the chat pipeline
//!
//! There are two related formats we need to interact with:
//! - chat turns, the conversation history as stored upstream (with images, files,
//!   reasoning blocks and tool invocations attached)
//! - wire messages, the exact shape a provider's chat-completion endpoint accepts
//!
//! The context pipeline converts the first into the second. Tool manifests describe
//! the plugins that can be exposed to the model as callable functions.
pub mod message;
pub mod tool;
pub mod wire;
