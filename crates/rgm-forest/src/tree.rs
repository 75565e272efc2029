//! Tree builder: links a flat resource pool into the forest
//! of resource-group trees, in rule-declared sibling order, rejecting
//! cycles and any resource that would otherwise appear in more than one
//! tree position.
//!
//! Cycle detection and sibling ordering are generalized from an arbitrary
//! multi-parent dependency DAG walk down to the stricter single-parent tree
//! this system requires: a resource has at most one parent, so "no DAG
//! sharing" falls out of the data structure rather than needing a separate
//! check.

use std::collections::HashSet;

use rgm_error::RgmError;

use crate::resource::{Resource, ResourceKey};
use crate::rule::Rule;

/// A node in a resource-group tree: a resource together with its ordered
/// children. Holds only a [`ResourceKey`], never a [`Resource`] — the
/// resource pool owns the resources; trees borrow references to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNode {
    /// The resource this node wraps.
    pub resource: ResourceKey,
    /// Children, ordered per the parent's rule's `child_types_in_order`.
    pub children: Vec<ResourceNode>,
}

impl ResourceNode {
    /// Depth-first iterator over this node and all its descendants.
    pub fn walk(&self) -> impl Iterator<Item = &ResourceNode> {
        TreeWalk { stack: vec![self] }
    }
}

struct TreeWalk<'a> {
    stack: Vec<&'a ResourceNode>,
}

impl<'a> Iterator for TreeWalk<'a> {
    type Item = &'a ResourceNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        // Push in reverse so children are visited in declared order.
        for child in node.children.iter().rev() {
            self.stack.push(child);
        }
        Some(node)
    }
}

/// Builds one tree per root resource, validating parent links, rejecting
/// cycles, and ordering siblings by rule declaration.
pub fn build_tree(rules: &[Rule], resources: &[Resource]) -> Result<Vec<ResourceNode>, RgmError> {
    for (key, resource) in resources.iter().enumerate() {
        if let Some(parent) = resource.parent {
            if parent >= resources.len() {
                return Err(RgmError::Configuration(format!(
                    "resource {key} references a nonexistent parent {parent}"
                )));
            }
        }
    }

    detect_cycles(resources)?;

    let rule_for = |type_name: &str| rules.iter().find(|r| r.type_name == type_name);

    let mut roots = Vec::new();
    let mut root_keys: Vec<&str> = Vec::new();
    for (key, resource) in resources.iter().enumerate() {
        if resource.parent.is_some() {
            continue;
        }
        let rule = rule_for(&resource.rule_name)
            .ok_or_else(|| RgmError::Configuration(format!("resource {key} has no matching rule")))?;
        if !rule.is_root {
            return Err(RgmError::Configuration(format!(
                "resource type '{}' may not head a tree",
                resource.rule_name
            )));
        }
        if let Some(name) = resource.primary_key() {
            if root_keys.contains(&name) {
                return Err(RgmError::Configuration(format!(
                    "duplicate resource group name '{name}'"
                )));
            }
            root_keys.push(name);
        }
        roots.push(build_node(key, rules, resources));
    }

    Ok(roots)
}

fn build_node(key: ResourceKey, rules: &[Rule], resources: &[Resource]) -> ResourceNode {
    let mut children: Vec<(usize, ResourceKey)> = resources
        .iter()
        .enumerate()
        .filter(|(_, r)| r.parent == Some(key))
        .map(|(child_key, r)| {
            let order = rules
                .iter()
                .find(|rule| rule.type_name == resources[key].rule_name)
                .and_then(|rule| rule.child_order_index(&r.rule_name))
                .unwrap_or(usize::MAX);
            (order, child_key)
        })
        .collect();
    children.sort_by_key(|(order, _)| *order);

    ResourceNode {
        resource: key,
        children: children
            .into_iter()
            .map(|(_, child_key)| build_node(child_key, rules, resources))
            .collect(),
    }
}

fn detect_cycles(resources: &[Resource]) -> Result<(), RgmError> {
    for start in 0..resources.len() {
        let mut visited = HashSet::new();
        let mut current = start;
        loop {
            if !visited.insert(current) {
                return Err(RgmError::Configuration(format!(
                    "resource {start} has a cyclic ancestry"
                )));
            }
            match resources[current].parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rules() -> Vec<Rule> {
        vec![
            Rule {
                type_name: "service".into(),
                required_attrs: vec!["name".into()],
                optional_attrs: vec![],
                child_types_in_order: vec!["ip".into(), "script".into()],
                is_root: true,
            },
            Rule {
                type_name: "ip".into(),
                required_attrs: vec!["address".into()],
                optional_attrs: vec![],
                child_types_in_order: vec![],
                is_root: false,
            },
            Rule {
                type_name: "script".into(),
                required_attrs: vec!["file".into()],
                optional_attrs: vec![],
                child_types_in_order: vec![],
                is_root: false,
            },
        ]
    }

    fn res(rule_name: &str, key: &str, value: &str, parent: Option<ResourceKey>) -> Resource {
        Resource {
            rule_name: rule_name.into(),
            attrs: vec![(key.into(), value.into())],
            parent,
            flags: Default::default(),
        }
    }

    #[test]
    fn builds_tree_with_siblings_in_rule_order() {
        let resources = vec![
            res("service", "name", "web", None),
            res("script", "file", "/x", Some(0)),
            res("ip", "address", "10.0.0.5", Some(0)),
        ];
        let forest = build_tree(&rules(), &resources).unwrap();
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].resource, 0);
        // ip (index 2) is declared before script (index 1) in the rule.
        assert_eq!(forest[0].children[0].resource, 2);
        assert_eq!(forest[0].children[1].resource, 1);
    }

    #[test]
    fn rejects_cycle() {
        let mut resources = vec![
            res("service", "name", "web", None),
            res("ip", "address", "10.0.0.5", None),
        ];
        resources[0].parent = Some(1);
        resources[1].parent = Some(0);
        assert!(build_tree(&rules(), &resources).is_err());
    }

    #[test]
    fn rejects_non_root_rule_heading_a_tree() {
        let resources = vec![res("ip", "address", "10.0.0.5", None)];
        assert!(build_tree(&rules(), &resources).is_err());
    }

    #[test]
    fn rejects_duplicate_group_names() {
        let resources = vec![
            res("service", "name", "web", None),
            res("service", "name", "web", None),
        ];
        assert!(build_tree(&rules(), &resources).is_err());
    }

    #[test]
    fn walk_visits_preorder() {
        let resources = vec![
            res("service", "name", "web", None),
            res("ip", "address", "10.0.0.5", Some(0)),
        ];
        let forest = build_tree(&rules(), &resources).unwrap();
        let order: Vec<ResourceKey> = forest[0].walk().map(|n| n.resource).collect();
        assert_eq!(order, vec![0, 1]);
    }
}
