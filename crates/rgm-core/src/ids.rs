//! Cluster-scoped identifiers.

use domain_key::define_uuid;
use std::fmt;

define_uuid!(RequestIdDomain => RequestId);

/// A cluster membership node identifier.
///
/// Corresponds to the source's `uint64_t nodeid` / `cman_node_t::cn_nodeid`.
/// `0` is reserved to mean "no owner" (see [`NodeId::NONE`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Sentinel meaning "unowned" — matches `rg_state.owner == 0`.
    pub const NONE: NodeId = NodeId(0);

    /// Returns `true` if this is the unowned sentinel.
    #[must_use]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// A resource group's primary key — the value of the root resource's first
/// attribute (`attrs[0]`), unique within a forest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct GroupName(String);

impl GroupName {
    /// Build a group name from any string-like value.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for GroupName {
    fn from(v: String) -> Self {
        Self(v)
    }
}

impl From<&str> for GroupName {
    fn from(v: &str) -> Self {
        Self(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_none_sentinel() {
        assert!(NodeId::NONE.is_none());
        assert!(!NodeId(1).is_none());
    }

    #[test]
    fn node_id_display() {
        assert_eq!(NodeId(7).to_string(), "7");
    }

    #[test]
    fn group_name_equality_and_display() {
        let a = GroupName::new("svc_a");
        let b: GroupName = "svc_a".into();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "svc_a");
    }

    #[test]
    fn group_name_ordering_is_lexicographic() {
        let a = GroupName::new("svc_a");
        let b = GroupName::new("svc_b");
        assert!(a < b);
    }

    #[test]
    fn request_id_v4_is_non_nil() {
        let id = RequestId::v4();
        assert!(!id.is_nil());
    }

    #[test]
    fn node_id_serde_roundtrip() {
        let id = NodeId(42);
        let json = serde_json::to_string(&id).unwrap();
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn group_name_serde_roundtrip() {
        let name = GroupName::new("svc_f");
        let json = serde_json::to_string(&name).unwrap();
        let back: GroupName = serde_json::from_str(&json).unwrap();
        assert_eq!(name, back);
    }
}
