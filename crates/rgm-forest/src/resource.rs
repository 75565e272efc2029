//! Resource instances: one per `<type attr="value" ...>` entry under the
//! resource manager's configuration subtree, validated against a [`Rule`].

use rgm_error::RgmError;

use crate::config_store::ConfigNode;
use crate::rule::Rule;

/// An index into a [`crate::forest::Forest`]'s resource arena. Non-owning:
/// tree nodes hold a `ResourceKey`, never a `Resource`.
pub type ResourceKey = usize;

/// Flags carried on a resource across a reconfigure, set by delta
/// computation and consumed by the tree executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceFlags {
    /// This resource (or an ancestor) changed in a way that requires a
    /// stop-then-start cycle.
    pub needstart: bool,
    /// This resource was removed, or its parent was, and must be stopped.
    pub needstop: bool,
}

/// A single configured resource instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// The [`Rule::type_name`] this instance was validated against.
    pub rule_name: String,
    /// Ordered attribute list as declared in configuration. `attrs[0]` is
    /// the primary key (the resource group name) when this resource is a
    /// tree root.
    pub attrs: Vec<(String, String)>,
    /// The parent resource in the tree, or `None` for a root.
    pub parent: Option<ResourceKey>,
    /// Start/stop bookkeeping set by reconfiguration.
    pub flags: ResourceFlags,
}

impl Resource {
    /// The first attribute's value, conventionally the resource's name or
    /// (for a root) the group name.
    #[must_use]
    pub fn primary_key(&self) -> Option<&str> {
        self.attrs.first().map(|(_, v)| v.as_str())
    }

    /// Look up an attribute by name.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// Two resources are identical iff they share a rule and an attribute
    /// multiset, independent of attribute order.
    #[must_use]
    pub fn is_identical_to(&self, other: &Resource) -> bool {
        if self.rule_name != other.rule_name || self.attrs.len() != other.attrs.len() {
            return false;
        }
        let mut mine = self.attrs.clone();
        let mut theirs = other.attrs.clone();
        mine.sort();
        theirs.sort();
        mine == theirs
    }
}

/// Recursively flattens a configuration subtree into a resource pool.
///
/// Attribute children are encoded as `@name` tags; nested resources are any
/// other tag, read as the child's `rule_name`. Each resource is validated
/// against the [`Rule`] for its tag as soon as it is parsed.
pub fn load_resources(root: &ConfigNode, rules: &[Rule]) -> Result<Vec<Resource>, RgmError> {
    let mut pool = Vec::new();
    for (tag, node) in root.children() {
        load_one(tag, node, None, rules, &mut pool)?;
    }
    Ok(pool)
}

fn load_one(
    tag: &str,
    node: &ConfigNode,
    parent: Option<ResourceKey>,
    rules: &[Rule],
    pool: &mut Vec<Resource>,
) -> Result<ResourceKey, RgmError> {
    let rule = rules
        .iter()
        .find(|r| r.type_name == tag)
        .ok_or_else(|| RgmError::Configuration(format!("no rule defines resource type '{tag}'")))?;

    let attrs: Vec<(String, String)> = node
        .children()
        .iter()
        .filter_map(|(key, child)| {
            key.strip_prefix('@')
                .and_then(|name| child.as_leaf().map(|value| (name.to_string(), value.to_string())))
        })
        .collect();
    rule.validate_attrs(&attrs)?;

    let key = pool.len();
    pool.push(Resource {
        rule_name: tag.to_string(),
        attrs,
        parent,
        flags: ResourceFlags::default(),
    });

    for (child_tag, child_node) in node.children() {
        if child_tag.starts_with('@') {
            continue;
        }
        if !rule.accepts_child(child_tag) {
            return Err(RgmError::Configuration(format!(
                "resource type '{tag}' does not accept child type '{child_tag}'"
            )));
        }
        load_one(child_tag, child_node, Some(key), rules, pool)?;
    }

    Ok(key)
}
