//! Failover domains: named, ordered subsets of cluster nodes that
//! a resource group is restricted or preferred to run on.

use rgm_core::{NodeId, Priority};
use rgm_error::RgmError;

use crate::config_store::ConfigNode;

/// A named failover domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    /// The domain's configured name, referenced by a resource group's
    /// `domain` attribute.
    pub name: String,
    /// Whether members are tried strictly in priority order (lowest
    /// first) rather than treated as an unordered preference set.
    pub ordered: bool,
    /// Whether the group may run *only* on a listed member, or may fall
    /// back to any cluster node if no member is available.
    pub restricted: bool,
    /// Member nodes and their priority (lower runs first when `ordered`).
    pub members: Vec<(NodeId, Priority)>,
}

impl Domain {
    /// Member nodes in evaluation order: by priority when `ordered`,
    /// otherwise in configured order.
    #[must_use]
    pub fn candidates_in_order(&self) -> Vec<NodeId> {
        let mut members = self.members.clone();
        if self.ordered {
            members.sort_by_key(|(_, priority)| *priority);
        }
        members.into_iter().map(|(node, _)| node).collect()
    }

    /// Whether `node` is a listed member of this domain.
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.members.iter().any(|(member, _)| *member == node)
    }
}

/// Loads every `<failoverdomain>` entry under the config subtree.
pub fn load_domains(root: &ConfigNode) -> Result<Vec<Domain>, RgmError> {
    let mut domains = Vec::new();
    for (tag, node) in root.children() {
        if tag != "failoverdomain" {
            continue;
        }
        domains.push(load_one(node)?);
    }
    Ok(domains)
}

fn load_one(node: &ConfigNode) -> Result<Domain, RgmError> {
    let mut name = None;
    let mut ordered = false;
    let mut restricted = false;
    let mut members = Vec::new();

    for (tag, child) in node.children() {
        match tag.as_str() {
            "@name" => name = child.as_leaf().map(ToString::to_string),
            "@ordered" => ordered = is_truthy(child.as_leaf()),
            "@restricted" => restricted = is_truthy(child.as_leaf()),
            "node" => members.push(load_member(child)?),
            _ => {}
        }
    }

    let name = name.ok_or_else(|| RgmError::Configuration("failover domain missing name".into()))?;
    Ok(Domain {
        name,
        ordered,
        restricted,
        members,
    })
}

fn load_member(node: &ConfigNode) -> Result<(NodeId, Priority), RgmError> {
    let mut id = None;
    let mut priority = Priority::default();

    for (tag, child) in node.children() {
        match tag.as_str() {
            "@id" => {
                let value: u64 = child
                    .as_leaf()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| RgmError::Configuration("failover domain member has invalid id".into()))?;
                id = Some(NodeId::from(value));
            }
            "@priority" => {
                if let Some(value) = child.as_leaf().and_then(|s| s.parse::<u32>().ok()) {
                    priority = Priority::from(value);
                }
            }
            _ => {}
        }
    }

    let id = id.ok_or_else(|| RgmError::Configuration("failover domain member missing id".into()))?;
    Ok((id, priority))
}

fn is_truthy(value: Option<&str>) -> bool {
    matches!(value, Some("1") | Some("true") | Some("yes"))
}
