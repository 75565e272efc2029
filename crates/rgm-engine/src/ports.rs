//! Cluster membership and the admin surface (external interfaces 6.2 and
//! 6.6). The config store, distributed lock, message transport, and agent
//! invocation ports live in `rgm-forest`/`rgm-state`, which the evaluator
//! and operation dispatcher consume directly; this module adds the one
//! port specific to the evaluator — membership — plus the admin-facing
//! request/response shapes `apps/cli` talks to.

use async_trait::async_trait;

use rgm_core::NodeId;
use rgm_error::RgmError;

/// A cluster member as seen by the membership service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterMember {
    /// The member's node id.
    pub node_id: NodeId,
    /// Whether the member is currently a live, communicating participant.
    pub is_live: bool,
}

/// The cluster membership service (external interface 6.2).
#[async_trait]
pub trait MembershipService: Send + Sync {
    /// A point-in-time snapshot of cluster membership.
    async fn members(&self) -> Result<Vec<ClusterMember>, RgmError>;
}

/// The membership-change or timer event that drives one `evaluate` pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipEvent {
    /// A node joined (or rejoined) the cluster.
    Joined(NodeId),
    /// A node left the cluster (graceful leave or fencing).
    Left(NodeId),
    /// The periodic evaluator timer fired with no membership change.
    Timer,
}

/// An administrative operation against a single group (external interface
/// 6.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminOp {
    /// Start the group if it is not already running.
    Start,
    /// Stop the group.
    Stop,
    /// Stop the group and exclude it from evaluation.
    Disable,
    /// Move the group to whichever node currently scores best.
    Relocate,
    /// Run a status walk without changing state.
    Status,
    /// Move the group to an administrator-chosen node.
    Migrate {
        /// The destination node.
        target: NodeId,
    },
}

#[cfg(any(test, feature = "testing"))]
pub mod test_double {
    use super::{ClusterMember, MembershipService, RgmError};
    use async_trait::async_trait;
    use parking_lot::RwLock;

    /// An in-memory membership view a test can mutate between `evaluate`
    /// calls to simulate joins, leaves, and fencing.
    #[derive(Default)]
    pub struct InMemoryMembership {
        members: RwLock<Vec<ClusterMember>>,
    }

    impl InMemoryMembership {
        #[must_use]
        pub fn new(members: Vec<ClusterMember>) -> Self {
            Self {
                members: RwLock::new(members),
            }
        }

        pub fn set(&self, members: Vec<ClusterMember>) {
            *self.members.write() = members;
        }
    }

    #[async_trait]
    impl MembershipService for InMemoryMembership {
        async fn members(&self) -> Result<Vec<ClusterMember>, RgmError> {
            Ok(self.members.read().clone())
        }
    }
}
