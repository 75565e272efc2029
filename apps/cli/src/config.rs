//! Reads a local JSON description of rules and resources into an
//! [`InMemoryConfigStore`], standing in for the real cluster configuration
//! store this workspace only defines as a trait boundary (`ConfigStore`) —
//! see `DESIGN.md` for why no production adapter ships here.

use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;

use rgm_forest::{ConfigNode, InMemoryConfigStore, RESOURCES_PATH, RULES_PATH};

#[derive(Debug, Deserialize)]
struct RuleSpec {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    root: bool,
    #[serde(default)]
    required: Vec<String>,
    #[serde(default)]
    optional: Vec<String>,
    #[serde(default)]
    children: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ResourceSpec {
    #[serde(rename = "type")]
    type_name: String,
    /// Insertion order matters: a root resource's first attribute is its
    /// group name (`Resource::primary_key`), so this must stay ordered the
    /// way the file declares it rather than sorted by key.
    #[serde(default)]
    attrs: IndexMap<String, String>,
    #[serde(default)]
    children: Vec<ResourceSpec>,
}

#[derive(Debug, Deserialize, Default)]
struct FileSpec {
    #[serde(default)]
    rules: Vec<RuleSpec>,
    #[serde(default)]
    resources: Vec<ResourceSpec>,
}

fn rule_node(rule: &RuleSpec) -> ConfigNode {
    let mut entries = vec![("@type".to_string(), ConfigNode::Leaf(rule.type_name.clone()))];
    if rule.root {
        entries.push(("@root".to_string(), ConfigNode::Leaf("1".to_string())));
    }
    for name in &rule.required {
        entries.push(("required".to_string(), ConfigNode::Leaf(name.clone())));
    }
    for name in &rule.optional {
        entries.push(("optional".to_string(), ConfigNode::Leaf(name.clone())));
    }
    for name in &rule.children {
        entries.push(("child".to_string(), ConfigNode::Leaf(name.clone())));
    }
    ConfigNode::Element(entries)
}

fn resource_node(resource: &ResourceSpec) -> ConfigNode {
    let mut entries: Vec<(String, ConfigNode)> = resource
        .attrs
        .iter()
        .map(|(key, value)| (format!("@{key}"), ConfigNode::Leaf(value.clone())))
        .collect();
    for child in &resource.children {
        entries.push((child.type_name.clone(), resource_node(child)));
    }
    ConfigNode::Element(entries)
}

/// Reads `path` as JSON and builds an [`InMemoryConfigStore`] primed with
/// its rules and resources at version 1.
pub fn load(path: &Path) -> Result<InMemoryConfigStore> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let spec: FileSpec = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;

    let store = InMemoryConfigStore::new();
    store.set(
        RULES_PATH,
        ConfigNode::Element(spec.rules.iter().map(|rule| ("rule".to_string(), rule_node(rule))).collect()),
    );
    store.set(
        RESOURCES_PATH,
        ConfigNode::Element(spec.resources.iter().map(|r| (r.type_name.clone(), resource_node(r))).collect()),
    );
    store.bump_version();
    Ok(store)
}
