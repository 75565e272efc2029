//! The resource model: rules, resources, their trees, and failover domains.
//!
//! This crate owns everything the resource manager treats as configuration
//! state: loading and validating rules and resources (components C1-C2),
//! linking resources into per-group trees (C3), loading failover domains
//! (C4), and diffing two forests across a reconfigure (the config half of
//! C10). It has no notion of cluster membership, placement scoring, or
//! runtime state — those live in `rgm-engine` and `rgm-state`, which treat
//! a [`Forest`] as read-only input.

mod config_store;
mod delta;
mod domain;
mod forest;
mod resource;
mod rule;
mod tree;

pub use config_store::{ConfigNode, ConfigStore};
pub use delta::compute_delta;
pub use domain::{load_domains, Domain};
pub use forest::{new_handle, reconfigure, Forest, ForestHandle, RESOURCES_PATH, RULES_PATH};
pub use resource::{load_resources, Resource, ResourceFlags, ResourceKey};
pub use rule::Rule;
pub use tree::{build_tree, ResourceNode};

#[cfg(any(test, feature = "testing"))]
pub use config_store::test_double::InMemoryConfigStore;
