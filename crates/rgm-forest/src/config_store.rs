//! The cluster configuration store port.
//!
//! Rules, resources, and failover domains are all loaded from the same
//! external collaborator: a versioned, hierarchical key-value store holding
//! the cluster's resource manager configuration. The forest never talks to
//! the store's transport directly; it only sees this trait, so unit tests
//! can supply an in-memory double.

use async_trait::async_trait;

use rgm_error::RgmError;

/// A single configuration entry: a path and its children or leaf value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigNode {
    /// A leaf attribute value.
    Leaf(String),
    /// An element with nested children, keyed by local tag name. Multiple
    /// children may share a tag (e.g. several `<ip>` children of a service).
    Element(Vec<(String, ConfigNode)>),
}

impl ConfigNode {
    /// Returns the leaf string, if this node is a leaf.
    #[must_use]
    pub fn as_leaf(&self) -> Option<&str> {
        match self {
            ConfigNode::Leaf(s) => Some(s.as_str()),
            ConfigNode::Element(_) => None,
        }
    }

    /// Returns this element's children, if this node is an element.
    #[must_use]
    pub fn children(&self) -> &[(String, ConfigNode)] {
        match self {
            ConfigNode::Element(children) => children,
            ConfigNode::Leaf(_) => &[],
        }
    }
}

/// Read access to the cluster configuration store (external interface 6.1).
///
/// The store is versioned: `get_version` lets callers detect that the
/// configuration changed between two reads without diffing the whole tree.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetch the node at `path`, or `None` if it does not exist.
    async fn get(&self, path: &str) -> Result<Option<ConfigNode>, RgmError>;

    /// The store's current version counter. Bumped on every write that is
    /// visible to readers.
    async fn get_version(&self) -> Result<u64, RgmError>;
}

#[cfg(any(test, feature = "testing"))]
pub mod test_double {
    use std::collections::HashMap;

    use parking_lot::Mutex;

    use super::{ConfigNode, ConfigStore, RgmError};
    use async_trait::async_trait;

    /// An in-memory config store for unit tests: a flat path -> node map
    /// plus a version counter callers can bump to simulate a reconfigure.
    #[derive(Default)]
    pub struct InMemoryConfigStore {
        entries: Mutex<HashMap<String, ConfigNode>>,
        version: Mutex<u64>,
    }

    impl InMemoryConfigStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, path: impl Into<String>, node: ConfigNode) {
            self.entries.lock().insert(path.into(), node);
        }

        pub fn bump_version(&self) {
            *self.version.lock() += 1;
        }
    }

    #[async_trait]
    impl ConfigStore for InMemoryConfigStore {
        async fn get(&self, path: &str) -> Result<Option<ConfigNode>, RgmError> {
            Ok(self.entries.lock().get(path).cloned())
        }

        async fn get_version(&self) -> Result<u64, RgmError> {
            Ok(*self.version.lock())
        }
    }
}
