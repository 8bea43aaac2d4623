use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::models::tool::ToolManifest;
use crate::prompt_template::{load_embedded, PLUGINS_PROMPT};
use crate::tool_name::ToolNameResolver;

/// Where manifests come from: the user's installed plugins and the builtin tools
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn list_installed_manifests(&self) -> Result<Vec<ToolManifest>>;
    async fn list_builtin_manifests(&self) -> Result<Vec<ToolManifest>>;
}

/// In-memory manifest source
#[derive(Debug, Clone, Default)]
pub struct StaticManifests {
    pub installed: Vec<ToolManifest>,
    pub builtin: Vec<ToolManifest>,
}

#[async_trait]
impl ManifestSource for StaticManifests {
    async fn list_installed_manifests(&self) -> Result<Vec<ToolManifest>> {
        Ok(self.installed.clone())
    }

    async fn list_builtin_manifests(&self) -> Result<Vec<ToolManifest>> {
        Ok(self.builtin.clone())
    }
}

#[derive(Serialize)]
struct ApiEntry {
    name: String,
    description: String,
}

#[derive(Serialize)]
struct Collection {
    name: String,
    instructions: String,
    apis: Vec<ApiEntry>,
}

pub struct ToolRegistry {
    manifests: RwLock<Arc<HashMap<String, ToolManifest>>>,
}

impl ToolRegistry {
    pub fn from_manifests(manifests: Vec<ToolManifest>) -> Self {
        ToolRegistry {
            manifests: RwLock::new(Arc::new(index(manifests))),
        }
    }

    pub async fn load(source: &dyn ManifestSource) -> Result<Self> {
        Ok(Self::from_manifests(collect(source).await?))
    }

    /// Swap in a fresh manifest set. Builtin manifests win identifier clashes.
    pub async fn reload(&self, source: &dyn ManifestSource) -> Result<()> {
        let manifests = Arc::new(index(collect(source).await?));
        tracing::debug!(count = manifests.len(), "tool registry reloaded");
        match self.manifests.write() {
            Ok(mut guard) => *guard = manifests,
            Err(poisoned) => *poisoned.into_inner() = manifests,
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Arc<HashMap<String, ToolManifest>> {
        match self.manifests.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn manifest(&self, identifier: &str) -> Option<ToolManifest> {
        self.snapshot().get(identifier).cloned()
    }

    fn enabled(&self, tool_ids: &[String]) -> Vec<ToolManifest> {
        let snapshot = self.snapshot();
        tool_ids
            .iter()
            .filter_map(|id| {
                let manifest = snapshot.get(id);
                if manifest.is_none() {
                    tracing::debug!(tool = %id, "enabled tool has no manifest");
                }
                manifest.cloned()
            })
            .collect()
    }

    /// Render the `<plugins>` system role block for the enabled tools
    pub fn enabled_system_roles(
        &self,
        tool_ids: &[String],
        resolver: &mut ToolNameResolver,
    ) -> Result<Option<String>> {
        let collections: Vec<Collection> = self
            .enabled(tool_ids)
            .into_iter()
            .filter(|manifest| !manifest.api.is_empty())
            .map(|manifest| Collection {
                name: manifest.display_name().to_string(),
                instructions: manifest.system_role.clone().unwrap_or_default(),
                apis: manifest
                    .api
                    .iter()
                    .map(|api| ApiEntry {
                        name: resolver.encode(
                            &manifest.identifier,
                            &api.name,
                            manifest.tool_type.as_deref(),
                        ),
                        description: api.description.clone(),
                    })
                    .collect(),
            })
            .collect();

        if collections.is_empty() {
            return Ok(None);
        }
        let rendered = load_embedded(PLUGINS_PROMPT, &json!({ "collections": collections }))?;
        Ok(Some(rendered))
    }

    /// Function schemas for the provider's `tools` parameter
    pub fn tool_schemas(&self, tool_ids: &[String], resolver: &mut ToolNameResolver) -> Vec<Value> {
        self.enabled(tool_ids)
            .iter()
            .flat_map(|manifest| {
                manifest
                    .api
                    .iter()
                    .map(|api| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": resolver.encode(&manifest.identifier, &api.name, manifest.tool_type.as_deref()),
                                "description": api.description,
                                "parameters": api.parameters,
                            }
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

async fn collect(source: &dyn ManifestSource) -> Result<Vec<ToolManifest>> {
    let mut manifests = source.list_installed_manifests().await?;
    manifests.extend(source.list_builtin_manifests().await?);
    Ok(manifests)
}

fn index(manifests: Vec<ToolManifest>) -> HashMap<String, ToolManifest> {
    manifests
        .into_iter()
        .map(|manifest| (manifest.identifier.clone(), manifest))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tool::ApiSchema;

    fn seo() -> ToolManifest {
        ToolManifest::new(
            "seo",
            vec![ApiSchema::new(
                "getData",
                "Get data from users",
                json!({"type": "object", "properties": {"url": {"type": "string"}}}),
            )],
        )
        .with_title("SEO")
        .with_system_role("Always cite the page url")
    }

    fn source() -> StaticManifests {
        StaticManifests {
            installed: vec![seo()],
            builtin: vec![ToolManifest::new(
                "web-browsing",
                vec![ApiSchema::new("search", "Search the web", json!({"type": "object"}))],
            )
            .with_type("builtin")],
        }
    }

    #[tokio::test]
    async fn test_load_and_lookup() -> Result<()> {
        let registry = ToolRegistry::load(&source()).await?;
        assert!(registry.manifest("seo").is_some());
        assert!(registry.manifest("web-browsing").is_some());
        assert!(registry.manifest("missing").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_enabled_system_roles() -> Result<()> {
        let registry = ToolRegistry::load(&source()).await?;
        let mut resolver = ToolNameResolver::new();
        let roles = registry
            .enabled_system_roles(&["seo".to_string()], &mut resolver)?
            .unwrap();

        assert!(roles.starts_with("<plugins description=\"The plugins you can use below\">"));
        assert!(roles.contains("<collection name=\"SEO\">"));
        assert!(roles.contains(
            "<collection.instructions>Always cite the page url</collection.instructions>"
        ));
        assert!(roles.contains("<api identifier=\"seo____getData\">Get data from users</api>"));
        assert!(resolver.decode("seo____getData").is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_no_enabled_tools_renders_nothing() -> Result<()> {
        let registry = ToolRegistry::load(&source()).await?;
        let mut resolver = ToolNameResolver::new();
        assert!(registry
            .enabled_system_roles(&["missing".to_string()], &mut resolver)?
            .is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_tool_schemas_use_encoded_names() -> Result<()> {
        let registry = ToolRegistry::load(&source()).await?;
        let mut resolver = ToolNameResolver::new();
        let schemas = registry.tool_schemas(
            &["seo".to_string(), "web-browsing".to_string()],
            &mut resolver,
        );

        assert_eq!(schemas.len(), 2);
        assert_eq!(schemas[0]["function"]["name"], "seo____getData");
        assert_eq!(schemas[1]["function"]["name"], "web-browsing____search____builtin");
        assert_eq!(schemas[0]["function"]["parameters"]["type"], "object");
        Ok(())
    }

    #[tokio::test]
    async fn test_reload_replaces_snapshot() -> Result<()> {
        let registry = ToolRegistry::from_manifests(vec![]);
        let before = registry.snapshot();
        registry.reload(&source()).await?;
        assert!(before.is_empty());
        assert_eq!(registry.snapshot().len(), 2);
        Ok(())
    }
}
