use anyhow::Result;
use async_trait::async_trait;
use futures::stream;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::providers::base::{
    ChatPayload, ChatResponse, ChatStreamEvent, Completion, Provider,
};
use crate::providers::utils::{ProviderHttpError, RequestAbortedError};

/// One scripted reply
#[derive(Debug, Clone)]
pub enum MockReply {
    Complete(Completion),
    Events(Vec<ChatStreamEvent>),
    /// Fail with an HTTP error of this status
    Status(u16),
    /// Never answer; only cancellation ends the request
    Hang,
}

/// A mock provider that returns pre-configured responses for testing
#[derive(Clone)]
pub struct MockProvider {
    id: String,
    replies: Arc<Mutex<Vec<MockReply>>>,
    requests: Arc<Mutex<Vec<ChatPayload>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of replies
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            id: "mock".to_string(),
            replies: Arc::new(Mutex::new(replies)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Every payload received so far
    pub fn requests(&self) -> Vec<ChatPayload> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn chat(&self, payload: ChatPayload, cancel: CancellationToken) -> Result<ChatResponse> {
        let stream = payload.stream;
        self.requests.lock().unwrap().push(payload);
        let reply = {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                // Return empty response if no more pre-configured replies
                MockReply::Complete(Completion::default())
            } else {
                replies.remove(0)
            }
        };

        match reply {
            MockReply::Complete(completion) if stream => {
                let mut events = Vec::new();
                if !completion.content.is_empty() {
                    events.push(ChatStreamEvent::Text(completion.content.clone()));
                }
                if !completion.tool_calls.is_empty() {
                    events.push(ChatStreamEvent::ToolCalls(completion.tool_calls.clone()));
                }
                events.push(ChatStreamEvent::Stop(completion.finish_reason));
                Ok(ChatResponse::Stream(Box::pin(stream::iter(events.into_iter().map(Ok)))))
            }
            MockReply::Complete(completion) => Ok(ChatResponse::Complete(completion)),
            MockReply::Events(events) => Ok(ChatResponse::Stream(Box::pin(stream::iter(
                events.into_iter().map(Ok),
            )))),
            MockReply::Status(status) => Err(ProviderHttpError {
                status,
                body: serde_json::json!({"error": {"message": format!("status {}", status)}}),
            }
            .into()),
            MockReply::Hang => {
                cancel.cancelled().await;
                Err(RequestAbortedError.into())
            }
        }
    }
}
