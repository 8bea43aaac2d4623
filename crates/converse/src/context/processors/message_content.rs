use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::context::engine::ContextProcessor;
use crate::context::state::{PipelineMessage, PipelineState};
use crate::models::message::{ImageItem, Role};
use crate::models::wire::{ContentPart, WireContent};
use crate::prompt_template::{load_embedded, FILES_CONTEXT_PROMPT};

/// Providers that accept signed `thinking` parts in assistant history
const STRUCTURED_THINKING_PROVIDERS: &[&str] = &["anthropic", "bedrock"];
/// Providers that reject reasoning inlined as `<think>` text
const NO_INLINE_THINKING_PROVIDERS: &[&str] = &["anthropic", "google", "vertexai"];
/// Providers that take prior reasoning back as a `reasoning` message field
const REASONING_FIELD_PROVIDERS: &[&str] = &["minimax", "moonshot"];

const LOCAL_HOST: &str = "127.0.0.1";

/// Turns an image URL the provider cannot reach into an inline data URI
#[async_trait]
pub trait ImageLoader: Send + Sync {
    async fn to_data_uri(&self, url: &str) -> Result<String>;
}

pub struct HttpImageLoader {
    client: Client,
}

impl HttpImageLoader {
    pub fn new() -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageLoader for HttpImageLoader {
    async fn to_data_uri(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| v.starts_with("image/"))
            .ok_or_else(|| anyhow!("{} did not return an image", url))?;
        let bytes = response.bytes().await?;
        Ok(format!("data:{};base64,{}", mime_type, STANDARD.encode(&bytes)))
    }
}

/// Whether the URL is served from the local machine and unreachable by a provider
pub fn is_local_url(url: &str) -> bool {
    url::Url::parse(url)
        .map(|parsed| parsed.host_str() == Some(LOCAL_HOST))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileContextConfig {
    pub enabled: bool,
    pub include_file_url: bool,
}

/// Shapes message content for the target model: media parts, the attached
/// files block, and assistant reasoning.
pub struct MessageContentProcessor {
    provider: String,
    supports_vision: bool,
    supports_video: bool,
    file_context: FileContextConfig,
    include_historical_thinking: bool,
    image_loader: Arc<dyn ImageLoader>,
}

impl MessageContentProcessor {
    pub fn new(
        provider: impl Into<String>,
        supports_vision: bool,
        file_context: FileContextConfig,
        include_historical_thinking: bool,
        image_loader: Arc<dyn ImageLoader>,
    ) -> Self {
        Self {
            provider: provider.into().to_lowercase(),
            supports_vision,
            supports_video: false,
            file_context,
            include_historical_thinking,
            image_loader,
        }
    }

    pub fn with_video_support(mut self, supports_video: bool) -> Self {
        self.supports_video = supports_video;
        self
    }

    fn files_block(&self, message: &PipelineMessage) -> Result<Option<String>> {
        if !self.file_context.enabled
            || (message.image_list.is_empty()
                && message.video_list.is_empty()
                && message.file_list.is_empty())
        {
            return Ok(None);
        }

        let images: Vec<_> = message
            .image_list
            .iter()
            .map(|image| {
                let name = if image.alt.is_empty() { &image.id } else { &image.alt };
                json!({ "name": name, "url": image.url })
            })
            .collect();
        let videos: Vec<_> = message
            .video_list
            .iter()
            .map(|video| {
                let name = if video.alt.is_empty() { &video.id } else { &video.alt };
                json!({ "name": name, "url": video.url })
            })
            .collect();
        let files: Vec<_> = message
            .file_list
            .iter()
            .map(|file| {
                json!({
                    "id": file.id,
                    "name": file.name,
                    "file_type": file.file_type,
                    "size": file.size,
                    "url": file.url,
                })
            })
            .collect();
        let rendered = load_embedded(
            FILES_CONTEXT_PROMPT,
            &json!({
                "images": images,
                "videos": videos,
                "files": files,
                "include_url": self.file_context.include_file_url,
            }),
        )?;
        Ok(Some(rendered))
    }

    async fn image_parts(&self, images: &[ImageItem]) -> Vec<ContentPart> {
        let mut parts = Vec::with_capacity(images.len());
        for image in images {
            let url = if is_local_url(&image.url) {
                match self.image_loader.to_data_uri(&image.url).await {
                    Ok(data_uri) => data_uri,
                    Err(e) => {
                        tracing::warn!(url = %image.url, error = %e, "failed to inline local image");
                        image.url.clone()
                    }
                }
            } else {
                image.url.clone()
            };
            parts.push(ContentPart::image(url));
        }
        parts
    }

    async fn shape(&self, message: &mut PipelineMessage) -> Result<bool> {
        let mut text = message.text();
        let mut thinking = None;

        match message.role {
            Role::User => {
                if let Some(block) = self.files_block(message)? {
                    text = [text.as_str(), block.as_str()]
                        .iter()
                        .filter(|s| !s.is_empty())
                        .copied()
                        .collect::<Vec<_>>()
                        .join("\n\n")
                        .trim()
                        .to_string();
                }
            }
            Role::Assistant => {
                if let Some(reasoning) = message.reasoning.take() {
                    let provider = self.provider.as_str();
                    if self.include_historical_thinking
                        && REASONING_FIELD_PROVIDERS.contains(&provider)
                    {
                        message.kept_reasoning = Some(reasoning.clone());
                    }
                    let content = reasoning.content.unwrap_or_default();
                    let structured = STRUCTURED_THINKING_PROVIDERS.contains(&provider);
                    match reasoning.signature {
                        Some(signature) if structured && !content.is_empty() => {
                            thinking = Some(ContentPart::Thinking {
                                thinking: content,
                                signature,
                            });
                        }
                        _ if self.include_historical_thinking
                            && !content.is_empty()
                            && message.kept_reasoning.is_none()
                            && !NO_INLINE_THINKING_PROVIDERS.contains(&provider) =>
                        {
                            text = format!("<think>{}</think>\n{}", content, text);
                        }
                        _ => {}
                    }
                }
            }
            _ => return Ok(false),
        }

        let with_images = self.supports_vision && !message.image_list.is_empty();
        let with_videos = self.supports_video && !message.video_list.is_empty();
        if thinking.is_none() && !with_images && !with_videos {
            let changed = message.content != WireContent::Text(text.clone());
            message.content = WireContent::Text(text);
            return Ok(changed);
        }

        let mut parts: Vec<ContentPart> = thinking.into_iter().collect();
        if !text.is_empty() {
            parts.push(ContentPart::text(text));
        }
        if with_images {
            parts.extend(self.image_parts(&message.image_list).await);
        }
        if with_videos {
            parts.extend(
                message
                    .video_list
                    .iter()
                    .map(|video| ContentPart::video(video.url.clone())),
            );
        }
        message.content = WireContent::Parts(parts);
        Ok(true)
    }
}

#[async_trait]
impl ContextProcessor for MessageContentProcessor {
    fn name(&self) -> &str {
        "MessageContent"
    }

    async fn process(&self, mut state: PipelineState) -> Result<PipelineState> {
        let mut processed = 0;
        for message in &mut state.messages {
            match self.shape(message).await {
                Ok(true) => processed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(message_id = %message.id, error = %e, "failed to shape message content, keeping it")
                }
            }
        }
        state.set_metadata("message_content_processed", processed);
        Ok(state)
    }
}
