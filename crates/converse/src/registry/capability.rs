//! Model capability catalog.
//!
//! The built-in catalog ships with the crate; user customized entries are merged over
//! it field by field. Readers take an `Arc` snapshot, so a reload never changes what an
//! in-flight request sees.
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

const BUILTIN_CATALOG: &str = include_str!("../catalog/models.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Abilities {
    #[serde(default)]
    pub vision: bool,
    #[serde(default)]
    pub video: bool,
    #[serde(default)]
    pub function_call: bool,
    #[serde(default)]
    pub reasoning: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCard {
    pub id: String,
    pub provider: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub abilities: Abilities,
    #[serde(default)]
    pub extend_params: Vec<String>,
    #[serde(default)]
    pub deployment_name: Option<String>,
    #[serde(default)]
    pub context_window_tokens: Option<u64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbilitiesOverride {
    pub vision: Option<bool>,
    pub video: Option<bool>,
    pub function_call: Option<bool>,
    pub reasoning: Option<bool>,
}

/// A user customized catalog entry; unset fields keep the built-in value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCardOverride {
    pub id: String,
    pub provider: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub abilities: Option<AbilitiesOverride>,
    #[serde(default)]
    pub extend_params: Option<Vec<String>>,
    #[serde(default)]
    pub deployment_name: Option<String>,
    #[serde(default)]
    pub context_window_tokens: Option<u64>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl ModelCard {
    fn blank(id: &str, provider: &str) -> Self {
        ModelCard {
            id: id.to_string(),
            provider: provider.to_string(),
            display_name: None,
            abilities: Abilities::default(),
            extend_params: Vec::new(),
            deployment_name: None,
            context_window_tokens: None,
            enabled: true,
        }
    }

    fn apply(&mut self, patch: &ModelCardOverride) {
        if let Some(name) = &patch.display_name {
            self.display_name = Some(name.clone());
        }
        if let Some(abilities) = &patch.abilities {
            let current = &mut self.abilities;
            current.vision = abilities.vision.unwrap_or(current.vision);
            current.video = abilities.video.unwrap_or(current.video);
            current.function_call = abilities.function_call.unwrap_or(current.function_call);
            current.reasoning = abilities.reasoning.unwrap_or(current.reasoning);
        }
        if let Some(params) = &patch.extend_params {
            self.extend_params = params.clone();
        }
        if let Some(deployment) = &patch.deployment_name {
            self.deployment_name = Some(deployment.clone());
        }
        if let Some(window) = patch.context_window_tokens {
            self.context_window_tokens = Some(window);
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
    }
}

/// What a `(model, provider)` pair supports
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilityFlags {
    pub supports_vision: bool,
    pub supports_video: bool,
    pub supports_function_call: bool,
    pub supports_reasoning: bool,
    pub extend_params: Vec<String>,
}

impl From<&ModelCard> for CapabilityFlags {
    fn from(card: &ModelCard) -> Self {
        CapabilityFlags {
            supports_vision: card.abilities.vision,
            supports_video: card.abilities.video,
            supports_function_call: card.abilities.function_call,
            supports_reasoning: card.abilities.reasoning,
            extend_params: card.extend_params.clone(),
        }
    }
}

fn catalog_key(model: &str, provider: &str) -> (String, String) {
    (provider.to_lowercase(), model.to_string())
}

/// An immutable, merged view of the catalog
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    cards: HashMap<(String, String), ModelCard>,
}

impl Catalog {
    pub fn merged(builtin: Vec<ModelCard>, custom: &[ModelCardOverride]) -> Self {
        let mut cards: HashMap<_, _> = builtin
            .into_iter()
            .map(|card| (catalog_key(&card.id, &card.provider), card))
            .collect();

        for patch in custom {
            cards
                .entry(catalog_key(&patch.id, &patch.provider))
                .or_insert_with(|| ModelCard::blank(&patch.id, &patch.provider))
                .apply(patch);
        }

        Catalog { cards }
    }

    pub fn card(&self, model: &str, provider: &str) -> Option<&ModelCard> {
        self.cards.get(&catalog_key(model, provider))
    }

    pub fn capabilities(&self, model: &str, provider: &str) -> CapabilityFlags {
        self.card(model, provider)
            .filter(|card| card.enabled)
            .map(CapabilityFlags::from)
            .unwrap_or_default()
    }

    pub fn models_for(&self, provider: &str) -> Vec<&ModelCard> {
        let provider = provider.to_lowercase();
        let mut cards: Vec<_> = self
            .cards
            .iter()
            .filter(|((p, _), card)| *p == provider && card.enabled)
            .map(|(_, card)| card)
            .collect();
        cards.sort_by(|a, b| a.id.cmp(&b.id));
        cards
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

pub struct CapabilityRegistry {
    builtin: Vec<ModelCard>,
    catalog: RwLock<Arc<Catalog>>,
}

impl CapabilityRegistry {
    pub fn new(builtin: Vec<ModelCard>, custom: &[ModelCardOverride]) -> Self {
        let catalog = Catalog::merged(builtin.clone(), custom);
        CapabilityRegistry {
            builtin,
            catalog: RwLock::new(Arc::new(catalog)),
        }
    }

    /// Registry over the catalog bundled with the crate
    pub fn builtin(custom: &[ModelCardOverride]) -> Result<Self> {
        let cards: Vec<ModelCard> = serde_json::from_str(BUILTIN_CATALOG)?;
        Ok(Self::new(cards, custom))
    }

    pub fn snapshot(&self) -> Arc<Catalog> {
        match self.catalog.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Replace the custom entries. Requests already holding a snapshot keep it.
    pub fn reload(&self, custom: &[ModelCardOverride]) {
        let catalog = Arc::new(Catalog::merged(self.builtin.clone(), custom));
        match self.catalog.write() {
            Ok(mut guard) => *guard = catalog,
            Err(poisoned) => *poisoned.into_inner() = catalog,
        }
        tracing::debug!(custom = custom.len(), "capability catalog reloaded");
    }

    pub fn capabilities(&self, model: &str, provider: &str) -> CapabilityFlags {
        self.snapshot().capabilities(model, provider)
    }

    pub fn deployment_name(&self, model: &str, provider: &str) -> Option<String> {
        self.snapshot()
            .card(model, provider)
            .and_then(|card| card.deployment_name.clone())
    }
}
