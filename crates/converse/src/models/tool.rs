use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One callable API exposed by a tool manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}

impl ApiSchema {
    pub fn new<N, D>(name: N, description: D, parameters: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        ApiSchema {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolMeta {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// A tool (plugin) manifest describing its API surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolManifest {
    pub identifier: String,
    pub api: Vec<ApiSchema>,
    #[serde(default)]
    pub meta: ToolMeta,
    #[serde(default)]
    pub system_role: Option<String>,
    #[serde(default)]
    pub gateway_url: Option<String>,
    #[serde(default, rename = "type")]
    pub tool_type: Option<String>,
}

impl ToolManifest {
    pub fn new(identifier: impl Into<String>, api: Vec<ApiSchema>) -> Self {
        ToolManifest {
            identifier: identifier.into(),
            api,
            meta: ToolMeta::default(),
            system_role: None,
            gateway_url: None,
            tool_type: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.meta.title = title.into();
        self
    }

    pub fn with_system_role(mut self, system_role: impl Into<String>) -> Self {
        self.system_role = Some(system_role.into());
        self
    }

    pub fn with_type(mut self, tool_type: impl Into<String>) -> Self {
        self.tool_type = Some(tool_type.into());
        self
    }

    /// Display name used when grouping the manifest's APIs in prompts
    pub fn display_name(&self) -> &str {
        if self.meta.title.is_empty() {
            &self.identifier
        } else {
            &self.meta.title
        }
    }
}
