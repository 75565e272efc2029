//! External collaborators consumed by the per-group state machine and tree
//! executor: the distributed lock, the resource agent, and the inter-node
//! message transport.
//!
//! Everything here is a trait. Production wiring supplies real
//! implementations talking to the cluster's lock manager, agent scripts,
//! and transport; tests supply in-memory doubles.

use std::time::Duration;

use async_trait::async_trait;

use rgm_core::GroupName;
use rgm_error::RgmError;

use crate::rg_state::RgStateRecord;

/// A held distributed lock on a single resource group, returned by
/// [`DistributedLock::lock`]. Opaque to callers; only the lock
/// implementation interprets its contents.
#[derive(Debug, Clone)]
pub struct LockHandle {
    /// The group this handle locks.
    pub group: GroupName,
    /// An implementation-defined fencing token, used to reject stale
    /// writes from a lock holder that has since been preempted.
    pub fence: u64,
}

/// The per-group distributed lock service (external interface 6.3).
///
/// `rg_state_get`/`rg_state_set` require the caller to already hold the
/// named group's lock; implementations may assert this using the fencing
/// token carried in [`LockHandle`].
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Acquire the lock for `group`, blocking up to `deadline`.
    async fn lock(&self, group: &GroupName, deadline: Duration) -> Result<LockHandle, RgmError>;

    /// Release a previously acquired lock.
    async fn unlock(&self, handle: LockHandle) -> Result<(), RgmError>;

    /// Read the durable `rg_state` record for `handle`'s group.
    async fn rg_state_get(&self, handle: &LockHandle) -> Result<RgStateRecord, RgmError>;

    /// Write the durable `rg_state` record for `handle`'s group.
    async fn rg_state_set(&self, handle: &LockHandle, record: &RgStateRecord) -> Result<(), RgmError>;
}

/// OCF result codes a resource agent may return (external interface 6.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcfCode {
    /// The action completed successfully.
    Success,
    /// The agent's binary is not present on this node.
    NotInstalled,
    /// The agent is present but not configured for this resource.
    NotConfigured,
    /// The action failed for a reason the agent did not distinguish.
    GenericError,
}

impl OcfCode {
    /// For a `stop` action, `NotInstalled`/`NotConfigured` are treated as
    /// success: a resource that is not there to stop is, trivially,
    /// stopped.
    #[must_use]
    pub fn is_stop_benign(self) -> bool {
        matches!(self, Self::Success | Self::NotInstalled | Self::NotConfigured)
    }

    /// For any action other than `stop`, only `Success` counts as success.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// The resource agent action being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentAction {
    /// Bring the resource up.
    Start,
    /// Bring the resource down.
    Stop,
    /// Check whether the resource is currently running correctly.
    Status,
}

/// Invokes a resource type's agent script (external interface 6.5).
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Run `action` against a resource of `resource_type` with the given
    /// attributes, returning the agent's OCF result code.
    async fn invoke(
        &self,
        resource_type: &str,
        action: AgentAction,
        attrs: &[(String, String)],
    ) -> Result<OcfCode, RgmError>;
}

/// An inter-node message: a group's `rg_state` or an administrative
/// command.
#[derive(Debug, Clone)]
pub enum Message {
    /// A group's current `rg_state`, broadcast after every transition.
    RgState(RgStateRecord),
    /// The terminal marker ending a `status_all` stream.
    StreamEnd,
}

/// A transport context: one logical conversation with a peer or group of
/// peers (external interface 6.4).
///
/// Deliberately unwired: no production call path constructs a
/// `MessageTransport` or sends a `Message` today (this node's `rg_state` is
/// read back through `DistributedLock::rg_state_get`, not broadcast). The
/// trait boundary is kept for the same reason `rgm-resilience`'s
/// `CircuitBreaker` is — see `DESIGN.md`.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Send `msg` on this context.
    async fn send(&self, msg: Message) -> Result<(), RgmError>;

    /// Receive the next message, waiting up to `timeout`. Returns `Ok(None)`
    /// on timeout, never an error for a plain timeout.
    async fn recv(&self, timeout: Duration) -> Result<Option<Message>, RgmError>;

    /// Close the context. Further `send`/`recv` calls are an error.
    async fn close(&self) -> Result<(), RgmError>;
}

#[cfg(any(test, feature = "testing"))]
pub mod test_double {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    use dashmap::DashMap;

    use super::{AgentAction, AgentInvoker, DistributedLock, LockHandle, OcfCode, RgStateRecord, RgmError};
    use async_trait::async_trait;
    use rgm_core::GroupName;

    /// An in-process stand-in for the cluster's distributed lock service.
    /// Locks are uncontended within a single process; the fence counter
    /// still increments on every acquisition so tests can exercise stale
    /// fencing-token rejection.
    #[derive(Default)]
    pub struct InMemoryLock {
        records: DashMap<GroupName, RgStateRecord>,
        fence: AtomicU64,
    }

    impl InMemoryLock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed(&self, record: RgStateRecord) {
            self.records.insert(record.name.clone(), record);
        }

        /// Snapshots every record currently held, for callers that need to
        /// persist this process's state across restarts (the CLI's sidecar
        /// state file; see `apps/cli/src/state.rs`).
        pub fn dump(&self) -> Vec<RgStateRecord> {
            self.records.iter().map(|entry| entry.value().clone()).collect()
        }
    }

    #[async_trait]
    impl DistributedLock for InMemoryLock {
        async fn lock(&self, group: &GroupName, _deadline: std::time::Duration) -> Result<LockHandle, RgmError> {
            let fence = self.fence.fetch_add(1, Ordering::SeqCst);
            self.records
                .entry(group.clone())
                .or_insert_with(|| RgStateRecord::new(group.clone()));
            Ok(LockHandle {
                group: group.clone(),
                fence,
            })
        }

        async fn unlock(&self, _handle: LockHandle) -> Result<(), RgmError> {
            Ok(())
        }

        async fn rg_state_get(&self, handle: &LockHandle) -> Result<RgStateRecord, RgmError> {
            self.records
                .get(&handle.group)
                .map(|r| r.clone())
                .ok_or_else(|| RgmError::UnknownGroup(handle.group.clone()))
        }

        async fn rg_state_set(&self, handle: &LockHandle, record: &RgStateRecord) -> Result<(), RgmError> {
            self.records.insert(handle.group.clone(), record.clone());
            Ok(())
        }
    }

    /// An in-process resource agent stub: returns a scripted [`OcfCode`]
    /// per `(resource_type, action)` pair, defaulting to `Success`.
    #[derive(Default)]
    pub struct ScriptedAgent {
        scripts: std::sync::Mutex<HashMap<(String, String), OcfCode>>,
    }

    impl ScriptedAgent {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn script(&self, resource_type: &str, action: AgentAction, code: OcfCode) {
            self.scripts
                .lock()
                .unwrap()
                .insert((resource_type.to_string(), action_key(action)), code);
        }
    }

    fn action_key(action: AgentAction) -> String {
        match action {
            AgentAction::Start => "start".into(),
            AgentAction::Stop => "stop".into(),
            AgentAction::Status => "status".into(),
        }
    }

    #[async_trait]
    impl AgentInvoker for ScriptedAgent {
        async fn invoke(
            &self,
            resource_type: &str,
            action: AgentAction,
            _attrs: &[(String, String)],
        ) -> Result<OcfCode, RgmError> {
            let key = (resource_type.to_string(), action_key(action));
            Ok(self.scripts.lock().unwrap().get(&key).copied().unwrap_or(OcfCode::Success))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_benign_codes() {
        assert!(OcfCode::Success.is_stop_benign());
        assert!(OcfCode::NotInstalled.is_stop_benign());
        assert!(OcfCode::NotConfigured.is_stop_benign());
        assert!(!OcfCode::GenericError.is_stop_benign());
    }

    #[test]
    fn non_stop_actions_require_success() {
        assert!(!OcfCode::NotInstalled.is_success());
        assert!(!OcfCode::NotConfigured.is_success());
        assert!(OcfCode::Success.is_success());
    }
}
