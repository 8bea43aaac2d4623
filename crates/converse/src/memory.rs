use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use serde_json::json;
use moka::sync::Cache;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::models::message::{ChatTurn, Role};
use crate::prompt_template::{load_embedded, USER_MEMORY_PROMPT};

const DEFAULT_RECENT_WINDOW: usize = 3;
const DEFAULT_CACHE_CAPACITY: u64 = 512;
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContextMemory {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperienceMemory {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub situation: Option<String>,
    #[serde(default)]
    pub key_learning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceMemory {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "conclusionDirectives")]
    pub directive: Option<String>,
}

/// Long-term memory about the user, as returned by the memory service
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMemory {
    #[serde(default)]
    pub preferences: Vec<PreferenceMemory>,
    #[serde(default)]
    pub experiences: Vec<ExperienceMemory>,
    #[serde(default)]
    pub contexts: Vec<ContextMemory>,
    /// Milliseconds since the epoch
    #[serde(default)]
    pub fetched_at: i64,
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

impl UserMemory {
    pub fn is_empty(&self) -> bool {
        self.preferences.is_empty() && self.experiences.is_empty() && self.contexts.is_empty()
    }

    /// Render the `<user_memory>` block, or `None` when there is nothing to say
    pub fn render(&self) -> Result<Option<String>> {
        let preferences: Vec<_> = self
            .preferences
            .iter()
            .filter(|p| p.directive.as_deref().is_some_and(|d| !d.is_empty()))
            .map(|p| json!({"id": text(&p.id), "directive": text(&p.directive)}))
            .collect();
        let experiences: Vec<_> = self
            .experiences
            .iter()
            .map(|e| {
                json!({
                    "id": text(&e.id),
                    "situation": text(&e.situation),
                    "key_learning": text(&e.key_learning),
                })
            })
            .collect();
        let contexts: Vec<_> = self
            .contexts
            .iter()
            .map(|c| {
                json!({
                    "id": text(&c.id),
                    "title": text(&c.title),
                    "description": text(&c.description),
                })
            })
            .collect();

        if preferences.is_empty() && experiences.is_empty() && contexts.is_empty() {
            return Ok(None);
        }

        let fetched_at = DateTime::from_timestamp_millis(self.fetched_at)
            .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default();

        let rendered = load_embedded(
            USER_MEMORY_PROMPT,
            &json!({
                "fetched_at": fetched_at,
                "preferences": preferences,
                "experiences": experiences,
                "contexts": contexts,
            }),
        )?;
        Ok(Some(rendered))
    }
}

/// Parameters sent to the memory service
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MemoryQuery {
    pub session_id: Option<String>,
    pub topic_id: Option<String>,
    pub recent_messages: Vec<String>,
}

impl MemoryQuery {
    /// Deterministic cache key over session, topic and recent user text
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.session_id.as_deref().unwrap_or_default());
        hasher.update([0u8]);
        hasher.update(self.topic_id.as_deref().unwrap_or_default());
        for message in &self.recent_messages {
            hasher.update([0u8]);
            hasher.update(message.as_bytes());
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

#[async_trait]
pub trait MemoryService: Send + Sync {
    async fn retrieve_memory(&self, query: &MemoryQuery) -> Result<UserMemory>;
}

/// Resolves user memory for a request, caching results by query.
///
/// The cache is bounded by entry count and each entry expires after a fixed time.
pub struct MemoryResolver {
    service: Arc<dyn MemoryService>,
    cache: Cache<String, UserMemory>,
    recent_window: usize,
}

fn build_cache(capacity: u64, ttl: Duration) -> Cache<String, UserMemory> {
    Cache::builder()
        .max_capacity(capacity)
        .time_to_live(ttl)
        .build()
}

impl MemoryResolver {
    pub fn new(service: Arc<dyn MemoryService>) -> Self {
        MemoryResolver {
            service,
            cache: build_cache(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL),
            recent_window: DEFAULT_RECENT_WINDOW,
        }
    }

    pub fn with_recent_window(mut self, recent_window: usize) -> Self {
        self.recent_window = recent_window;
        self
    }

    /// Replace the cache with one holding at most `capacity` entries for `ttl` each
    pub fn with_cache_limits(mut self, capacity: u64, ttl: Duration) -> Self {
        self.cache = build_cache(capacity, ttl);
        self
    }

    pub fn query_for(
        &self,
        session_id: Option<&str>,
        topic_id: Option<&str>,
        messages: &[ChatTurn],
    ) -> MemoryQuery {
        let mut recent: Vec<String> = messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::User && !m.text().is_empty())
            .take(self.recent_window)
            .map(|m| m.text().to_string())
            .collect();
        recent.reverse();

        MemoryQuery {
            session_id: session_id.map(str::to_string),
            topic_id: topic_id.map(str::to_string),
            recent_messages: recent,
        }
    }

    pub async fn resolve(
        &self,
        session_id: Option<&str>,
        topic_id: Option<&str>,
        messages: &[ChatTurn],
    ) -> Result<UserMemory> {
        let query = self.query_for(session_id, topic_id, messages);
        let key = query.cache_key();

        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!(key = %key, "user memory cache hit");
            return Ok(hit);
        }

        let memory = self.service.retrieve_memory(&query).await?;
        self.cache.insert(key, memory.clone());
        Ok(memory)
    }

    /// Number of cached entries, after pending evictions have run
    pub fn cached_entries(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}
