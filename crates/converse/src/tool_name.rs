//! Flat function names for plugin APIs.
//!
//! Providers only accept a single `[a-zA-Z0-9_-]{1,64}` function name, while a plugin
//! API is addressed by `(identifier, api name, type)`. Names are joined with
//! [`TOOL_NAME_SEPARATOR`]. A component is replaced by a short sha256 digest when it
//! could make the joined name ambiguous or illegal:
//! - it is empty, or contains characters outside `[a-zA-Z0-9_-]`
//! - it contains the separator, or starts or ends with `_`
//! - it already looks like a digest
//!
//! The api component (then the identifier) is also digested when the joined name would
//! reach [`MAX_TOOL_NAME_LENGTH`]. Digests cannot be reversed, so decoding goes through
//! the table a [`ToolNameResolver`] builds while encoding.
use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::models::message::ToolInvocation;
use crate::models::wire::WireToolCall;

pub const TOOL_NAME_SEPARATOR: &str = "____";
pub const MAX_TOOL_NAME_LENGTH: usize = 64;
pub const DEFAULT_TOOL_TYPE: &str = "default";
const HASH_PREFIX: &str = "HASH_";

lazy_static! {
    static ref NAME_SAFE: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolName {
    pub identifier: String,
    pub api_name: String,
    pub tool_type: Option<String>,
}

fn digest(component: &str) -> String {
    let hash = Sha256::digest(component.as_bytes());
    let hex: String = hash.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    format!("{}{}", HASH_PREFIX, hex)
}

fn needs_digest(component: &str) -> bool {
    component.is_empty()
        || !NAME_SAFE.is_match(component)
        || component.contains(TOOL_NAME_SEPARATOR)
        || component.starts_with('_')
        || component.ends_with('_')
        || component.starts_with(HASH_PREFIX)
}

fn safe_component(component: &str) -> String {
    if needs_digest(component) {
        digest(component)
    } else {
        component.to_string()
    }
}

fn effective_type(tool_type: Option<&str>) -> Option<&str> {
    tool_type.filter(|t| !t.is_empty() && *t != DEFAULT_TOOL_TYPE)
}

fn join(parts: &[&str]) -> String {
    parts.join(TOOL_NAME_SEPARATOR)
}

/// Encode a plugin API into a flat function name. Deterministic for equal inputs.
pub fn encode_tool_name(identifier: &str, api_name: &str, tool_type: Option<&str>) -> String {
    let mut identifier = safe_component(identifier);
    let mut api = safe_component(api_name);
    let suffix = effective_type(tool_type).map(safe_component);

    let assemble = |identifier: &str, api: &str| match &suffix {
        Some(suffix) => join(&[identifier, api, suffix]),
        None => join(&[identifier, api]),
    };

    let mut name = assemble(&identifier, &api);
    if name.len() >= MAX_TOOL_NAME_LENGTH && !api.starts_with(HASH_PREFIX) {
        api = digest(api_name);
        name = assemble(&identifier, &api);
    }
    if name.len() >= MAX_TOOL_NAME_LENGTH && !identifier.starts_with(HASH_PREFIX) {
        identifier = digest(&identifier);
        name = assemble(&identifier, &api);
    }
    name
}

/// Split a name on the separator. Digested components come back as digests.
pub fn parse_tool_name(name: &str) -> Option<ToolName> {
    let mut parts = name.splitn(3, TOOL_NAME_SEPARATOR);
    let identifier = parts.next().filter(|p| !p.is_empty())?;
    let api_name = parts.next().filter(|p| !p.is_empty())?;
    let tool_type = parts.next().map(str::to_string);
    Some(ToolName {
        identifier: identifier.to_string(),
        api_name: api_name.to_string(),
        tool_type,
    })
}

/// Per-request encoder that remembers every name it produced.
///
/// Construct a fresh resolver for each request; its table must not be shared
/// between independent conversations.
#[derive(Debug, Clone, Default)]
pub struct ToolNameResolver {
    names: HashMap<String, ToolName>,
}

impl ToolNameResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&mut self, identifier: &str, api_name: &str, tool_type: Option<&str>) -> String {
        let name = encode_tool_name(identifier, api_name, tool_type);
        self.names.entry(name.clone()).or_insert_with(|| ToolName {
            identifier: identifier.to_string(),
            api_name: api_name.to_string(),
            tool_type: effective_type(tool_type).map(str::to_string),
        });
        name
    }

    /// Exact-match reverse lookup of a previously encoded name
    pub fn decode(&self, name: &str) -> Option<&ToolName> {
        self.names.get(name)
    }

    /// Map provider tool calls back to plugin invocations.
    ///
    /// Names this resolver never produced fall back to splitting on the separator.
    pub fn resolve(&self, calls: &[WireToolCall]) -> Vec<ToolInvocation> {
        calls
            .iter()
            .filter_map(|call| {
                let name = &call.function.name;
                let decoded = match self.decode(name) {
                    Some(decoded) => decoded.clone(),
                    None => {
                        tracing::warn!(tool_name = %name, "tool call name was not issued for this request");
                        parse_tool_name(name)?
                    }
                };
                Some(ToolInvocation {
                    id: call.id.clone(),
                    identifier: decoded.identifier,
                    api_name: decoded.api_name,
                    arguments: call.function.arguments.clone(),
                    tool_type: decoded.tool_type,
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
