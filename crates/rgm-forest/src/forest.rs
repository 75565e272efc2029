//! The forest: the loaded, validated snapshot of rules, resources, trees,
//! and failover domains that every other component reads.
//!
//! Held behind a single `parking_lot::RwLock` (the forest lock): readers —
//! the evaluator, the tree executor, the admin surface — take a shared
//! read guard; a reconfigure takes the exclusive write guard only for the
//! instant it swaps in a freshly built forest. No component is ever handed
//! an owned `Forest`; they borrow through [`ForestHandle`].

use std::sync::Arc;

use parking_lot::RwLock;

use rgm_core::GroupName;
use rgm_error::RgmError;

use crate::config_store::{ConfigNode, ConfigStore};
use crate::delta::compute_delta;
use crate::domain::{load_domains, Domain};
use crate::resource::{load_resources, Resource, ResourceKey};
use crate::rule::Rule;
use crate::tree::{build_tree, ResourceNode};

/// Path under which resource rules are configured.
pub const RULES_PATH: &str = "/cluster/rm/resource_rules";
/// Path under which the resource manager's resource tree is configured.
pub const RESOURCES_PATH: &str = "/cluster/rm";

/// The validated, linked configuration snapshot.
#[derive(Debug, Clone, Default)]
pub struct Forest {
    /// Rules, keyed by type name.
    pub rules: Vec<Rule>,
    /// Every configured resource instance, addressable by [`ResourceKey`].
    pub resources: Vec<Resource>,
    /// One tree per resource group, rooted at a resource whose rule is
    /// `is_root`.
    pub tree_roots: Vec<ResourceNode>,
    /// Configured failover domains.
    pub domains: Vec<Domain>,
    /// The config store version this forest was built from.
    pub version: u64,
}

impl Forest {
    /// Loads rules, resources, and domains from `store` and links them into
    /// a forest (components C1-C4).
    pub async fn load(store: &dyn ConfigStore) -> Result<Forest, RgmError> {
        let version = store.get_version().await?;

        let rules_node = store.get(RULES_PATH).await?.unwrap_or(ConfigNode::Element(Vec::new()));
        let rules = load_rule_set(&rules_node)?;

        let resources_node = store
            .get(RESOURCES_PATH)
            .await?
            .unwrap_or(ConfigNode::Element(Vec::new()));
        let resources = load_resources(&resources_node, &rules)?;
        let tree_roots = build_tree(&rules, &resources)?;
        let domains = load_domains(&resources_node)?;

        Ok(Forest {
            rules,
            resources,
            tree_roots,
            domains,
            version,
        })
    }

    /// Finds a resource group's root node by name.
    #[must_use]
    pub fn find_group(&self, name: &GroupName) -> Option<&ResourceNode> {
        self.tree_roots
            .iter()
            .find(|root| self.resources[root.resource].primary_key() == Some(name.as_str()))
    }

    /// Every configured group name, in tree order.
    #[must_use]
    pub fn group_names(&self) -> Vec<GroupName> {
        self.tree_roots
            .iter()
            .filter_map(|root| self.resources[root.resource].primary_key())
            .map(GroupName::new)
            .collect()
    }

    /// Looks up the failover domain named by a group's `domain` attribute,
    /// if any.
    #[must_use]
    pub fn domain_for(&self, group: &GroupName) -> Option<&Domain> {
        let root = self.find_group(group)?;
        let domain_name = self.resources[root.resource].attr("domain")?;
        self.domains.iter().find(|d| d.name == domain_name)
    }
}

fn load_rule_set(node: &ConfigNode) -> Result<Vec<Rule>, RgmError> {
    let mut rules = Vec::new();
    for (tag, child) in node.children() {
        if tag != "rule" {
            continue;
        }
        rules.push(load_one_rule(child)?);
    }
    Ok(rules)
}

fn load_one_rule(node: &ConfigNode) -> Result<Rule, RgmError> {
    let mut type_name = None;
    let mut required_attrs = Vec::new();
    let mut optional_attrs = Vec::new();
    let mut child_types_in_order = Vec::new();
    let mut is_root = false;

    for (tag, child) in node.children() {
        match tag.as_str() {
            "@type" => type_name = child.as_leaf().map(ToString::to_string),
            "@root" => is_root = matches!(child.as_leaf(), Some("1") | Some("true")),
            "required" => {
                if let Some(name) = child.as_leaf() {
                    required_attrs.push(name.to_string());
                }
            }
            "optional" => {
                if let Some(name) = child.as_leaf() {
                    optional_attrs.push(name.to_string());
                }
            }
            "child" => {
                if let Some(name) = child.as_leaf() {
                    child_types_in_order.push(name.to_string());
                }
            }
            _ => {}
        }
    }

    let type_name = type_name.ok_or_else(|| RgmError::Configuration("rule missing type name".into()))?;
    Ok(Rule {
        type_name,
        required_attrs,
        optional_attrs,
        child_types_in_order,
        is_root,
    })
}

/// A shared, lockable handle to the current forest.
pub type ForestHandle = Arc<RwLock<Forest>>;

/// Wraps a freshly loaded forest in a [`ForestHandle`].
#[must_use]
pub fn new_handle(forest: Forest) -> ForestHandle {
    Arc::new(RwLock::new(forest))
}

/// Swaps `handle` to `new_forest`, returning the flagged replacement
/// resources and the old resource keys that must be stopped first.
///
/// Callers are expected to have already driven every `needstop` resource to
/// `STOPPED` before calling this; the swap itself is
/// just the exclusive-lock critical section, held only long enough to
/// replace the three vectors.
pub fn reconfigure(handle: &ForestHandle, new_forest: Forest) -> (Vec<Resource>, Vec<ResourceKey>) {
    let mut guard = handle.write();
    let (flagged_new, stop_old) =
        compute_delta(&guard.resources, &guard.tree_roots, &new_forest.resources, &new_forest.tree_roots);
    *guard = Forest {
        resources: flagged_new.clone(),
        ..new_forest
    };
    (flagged_new, stop_old)
}
