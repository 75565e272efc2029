//! The per-request operation dispatcher: turns a dequeued [`Request`] into
//! tree-executor calls and `rg_state` transitions (spanning components C6
//! and C7, driven by the request queue, C8).
//!
//! One [`Dispatcher`] per node. Every operation takes the distributed lock
//! only long enough to read or write the durable record; the (potentially
//! slow) agent invocations run with the lock released, matching how the
//! evaluator minimizes its own forest-lock hold time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use rgm_core::{GroupName, NodeId};
use rgm_error::RgmError;
use rgm_forest::{ForestHandle, Resource, ResourceNode};
use rgm_resilience::RetryConfig;
use rgm_state::{
    acquire_with_retry, conditional_start, conditional_stop, start_tree, status_tree, stop_tree, AgentInvoker, DistributedLock,
    LockHandle, Request, RequestHandler, RequestKind, RgState, RgStateRecord,
};

/// Dispatches queued requests for one node's resource groups.
pub struct Dispatcher {
    forest: ForestHandle,
    self_node: NodeId,
    lock: Arc<dyn DistributedLock>,
    agent: Arc<dyn AgentInvoker>,
    lock_deadline: Duration,
    retry: RetryConfig,
}

impl Dispatcher {
    /// Builds a dispatcher with a sensible default lock deadline.
    #[must_use]
    pub fn new(forest: ForestHandle, self_node: NodeId, lock: Arc<dyn DistributedLock>, agent: Arc<dyn AgentInvoker>) -> Self {
        Self {
            forest,
            self_node,
            lock,
            agent,
            lock_deadline: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }

    /// Acquires `group`'s distributed lock, retrying transient failures
    /// before surfacing one.
    async fn acquire(&self, group: &GroupName) -> Result<LockHandle, RgmError> {
        acquire_with_retry(self.lock.as_ref(), group, self.lock_deadline, self.retry).await
    }

    /// Clones a group's current tree shape and resource pool out from under
    /// the forest read lock, so the agent calls that follow never hold it.
    fn snapshot_tree(&self, group: &GroupName) -> Option<(ResourceNode, Vec<Resource>)> {
        let guard = self.forest.read();
        let root = guard.find_group(group)?.clone();
        Some((root, guard.resources.clone()))
    }

    async fn do_start(&self, group: &GroupName) -> Result<(), RgmError> {
        let handle = self.acquire(group).await?;
        let mut record = self.lock.rg_state_get(&handle).await?;
        if record.state != RgState::Stopped {
            self.lock.unlock(handle).await?;
            return Ok(());
        }
        let from = record.state;
        record.transition_to(RgState::Starting, self.self_node)?;
        rgm_log::log_transition!(group, from, record.state, "start requested");
        self.lock.rg_state_set(&handle, &record).await?;
        self.lock.unlock(handle).await?;

        let Some((root, resources)) = self.snapshot_tree(group) else {
            return Err(RgmError::UnknownGroup(group.clone()));
        };
        let result = start_tree(&root, group, &resources, self.agent.as_ref()).await;

        let handle = self.acquire(group).await?;
        let mut record = self.lock.rg_state_get(&handle).await?;
        let from = record.state;
        match &result {
            Ok(()) => {
                record.transition_to(RgState::Started, self.self_node)?;
                rgm_log::log_transition!(group, from, record.state, "start walk succeeded");
            }
            Err(err) => {
                record.transition_to(RgState::Failed, NodeId::NONE)?;
                rgm_log::log_transition!(group, from, record.state, err);
            }
        }
        self.lock.rg_state_set(&handle, &record).await?;
        self.lock.unlock(handle).await?;
        result
    }

    /// Shared by `Stop`, `Relocate`, and `Migrate`: only the node that
    /// currently owns the group has anything to stop locally.
    async fn do_stop(&self, group: &GroupName) -> Result<(), RgmError> {
        let handle = self.acquire(group).await?;
        let mut record = self.lock.rg_state_get(&handle).await?;
        if record.state != RgState::Started || record.owner != self.self_node {
            self.lock.unlock(handle).await?;
            return Ok(());
        }
        let from = record.state;
        record.transition_to(RgState::Stopping, self.self_node)?;
        rgm_log::log_transition!(group, from, record.state, "stop requested");
        self.lock.rg_state_set(&handle, &record).await?;
        self.lock.unlock(handle).await?;

        let Some((root, resources)) = self.snapshot_tree(group) else {
            return Err(RgmError::UnknownGroup(group.clone()));
        };
        let result = stop_tree(&root, group, &resources, self.agent.as_ref()).await;

        let handle = self.acquire(group).await?;
        let mut record = self.lock.rg_state_get(&handle).await?;
        let from = record.state;
        match &result {
            Ok(()) => {
                record.transition_to(RgState::Stopped, NodeId::NONE)?;
                rgm_log::log_transition!(group, from, record.state, "stop walk succeeded");
            }
            Err(err) => {
                record.transition_to(RgState::Error, NodeId::NONE)?;
                rgm_log::log_transition!(group, from, record.state, err);
            }
        }
        self.lock.rg_state_set(&handle, &record).await?;
        self.lock.unlock(handle).await?;
        result
    }

    async fn do_disable(&self, group: &GroupName) -> Result<(), RgmError> {
        let handle = self.acquire(group).await?;
        let record = self.lock.rg_state_get(&handle).await?;
        let owns_it = record.state == RgState::Started && record.owner == self.self_node;
        self.lock.unlock(handle).await?;

        if owns_it {
            if let Some((root, resources)) = self.snapshot_tree(group) {
                stop_tree(&root, group, &resources, self.agent.as_ref()).await?;
            }
        }

        let handle = self.acquire(group).await?;
        let mut record = self.lock.rg_state_get(&handle).await?;
        let from = record.state;
        record.transition_to(RgState::Disabled, NodeId::NONE)?;
        rgm_log::log_transition!(group, from, record.state, "disabled by administrator");
        self.lock.rg_state_set(&handle, &record).await?;
        self.lock.unlock(handle).await?;
        Ok(())
    }

    async fn do_status(&self, group: &GroupName) -> Result<(), RgmError> {
        let Some((root, resources)) = self.snapshot_tree(group) else {
            return Err(RgmError::UnknownGroup(group.clone()));
        };
        let result = status_tree(&root, group, &resources, self.agent.as_ref()).await;

        if let Err(err) = &result {
            let handle = self.acquire(group).await?;
            let mut record = self.lock.rg_state_get(&handle).await?;
            if record.state == RgState::Started {
                let from = record.state;
                let owner = record.owner;
                record.transition_to(RgState::Recover, owner)?;
                rgm_log::log_transition!(group, from, record.state, err);
                self.lock.rg_state_set(&handle, &record).await?;
            }
            self.lock.unlock(handle).await?;
        }
        Ok(())
    }

    /// Initializes a freshly reconfigured root's `rg_state`: `STOPPED` if
    /// autostart is not explicitly disabled, `DISABLED` otherwise.
    async fn do_init(&self, group: &GroupName) -> Result<(), RgmError> {
        let autostart = {
            let guard = self.forest.read();
            guard
                .find_group(group)
                .and_then(|root| guard.resources[root.resource].attr("autostart"))
                .is_none_or(|value| value != "0")
        };

        let handle = self.acquire(group).await?;
        let mut record = RgStateRecord::new(group.clone());
        let from = record.state;
        record.transition_to(RgState::Stopped, NodeId::NONE)?;
        if !autostart {
            record.transition_to(RgState::Disabled, NodeId::NONE)?;
        }
        rgm_log::log_transition!(group, from, record.state, "group initialized from configuration");
        self.lock.rg_state_set(&handle, &record).await?;
        self.lock.unlock(handle).await?;
        Ok(())
    }

    async fn do_cond_start(&self, group: &GroupName) -> Result<(), RgmError> {
        let Some((root, resources)) = self.snapshot_tree(group) else {
            return Err(RgmError::UnknownGroup(group.clone()));
        };
        conditional_start(&root, group, &resources, self.agent.as_ref()).await
    }

    async fn do_cond_stop(&self, group: &GroupName) -> Result<(), RgmError> {
        let Some((root, resources)) = self.snapshot_tree(group) else {
            return Err(RgmError::UnknownGroup(group.clone()));
        };
        conditional_stop(&root, group, &resources, self.agent.as_ref()).await
    }

    /// The root resource's `recovery` attribute: `restart` (default),
    /// `relocate`, or `disable`.
    fn recovery_policy(&self, group: &GroupName) -> RecoveryPolicy {
        let guard = self.forest.read();
        guard
            .find_group(group)
            .and_then(|root| guard.resources[root.resource].attr("recovery"))
            .map_or(RecoveryPolicy::Restart, RecoveryPolicy::from_attr)
    }

    /// The root resource's `max_restarts` attribute, defaulting to 3.
    fn restart_limit(&self, group: &GroupName) -> u32 {
        let guard = self.forest.read();
        guard
            .find_group(group)
            .and_then(|root| guard.resources[root.resource].attr("max_restarts"))
            .and_then(|value| value.parse().ok())
            .unwrap_or(3)
    }

    /// Runs the recovery policy (spec §4.5, §9) for a group a status check
    /// has put into `RECOVER`: stop the tree, then either restart locally
    /// (policy `restart`, under the restart limit), disable (policy
    /// `disable`), or leave the group `STOPPED` for the evaluator's normal
    /// placement to pick a new owner (policy `relocate`, or `restart` with
    /// its retries exhausted).
    async fn do_recover(&self, group: &GroupName) -> Result<(), RgmError> {
        let handle = self.acquire(group).await?;
        let mut record = self.lock.rg_state_get(&handle).await?;
        if record.state != RgState::Recover {
            self.lock.unlock(handle).await?;
            return Ok(());
        }
        let owner = record.owner;
        let from = record.state;
        record.transition_to(RgState::Stopping, owner)?;
        rgm_log::log_transition!(group, from, record.state, "recovery stop");
        self.lock.rg_state_set(&handle, &record).await?;
        self.lock.unlock(handle).await?;

        let Some((root, resources)) = self.snapshot_tree(group) else {
            return Err(RgmError::UnknownGroup(group.clone()));
        };
        let stop_result = stop_tree(&root, group, &resources, self.agent.as_ref()).await;

        let handle = self.acquire(group).await?;
        let mut record = self.lock.rg_state_get(&handle).await?;
        let from = record.state;
        if let Err(err) = &stop_result {
            record.transition_to(RgState::Error, NodeId::NONE)?;
            rgm_log::log_transition!(group, from, record.state, err);
            self.lock.rg_state_set(&handle, &record).await?;
            self.lock.unlock(handle).await?;
            return stop_result;
        }
        record.transition_to(RgState::Stopped, NodeId::NONE)?;
        rgm_log::log_transition!(group, from, record.state, "recovery stop completed");

        let policy = self.recovery_policy(group);
        let limit = self.restart_limit(group);
        let restart_locally = policy == RecoveryPolicy::Restart && record.restart_count < limit;
        if policy == RecoveryPolicy::Disable {
            let from = record.state;
            record.transition_to(RgState::Disabled, NodeId::NONE)?;
            rgm_log::log_transition!(group, from, record.state, "recovery policy disable");
        }
        self.lock.rg_state_set(&handle, &record).await?;
        self.lock.unlock(handle).await?;

        if restart_locally {
            self.do_start(group).await?;
        }
        Ok(())
    }
}

/// The per-group `recovery` attribute's three possible values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecoveryPolicy {
    /// Restart on this node, up to `max_restarts` consecutive attempts.
    Restart,
    /// Stop here and let the evaluator place the group on another node.
    Relocate,
    /// Stop here and transition to `DISABLED`, requiring admin re-enable.
    Disable,
}

impl RecoveryPolicy {
    fn from_attr(value: &str) -> Self {
        match value {
            "relocate" => Self::Relocate,
            "disable" => Self::Disable,
            _ => Self::Restart,
        }
    }
}

#[async_trait]
impl RequestHandler for Dispatcher {
    async fn handle(&self, request: &Request) -> Result<(), RgmError> {
        match &request.kind {
            RequestKind::Start => self.do_start(&request.group).await,
            RequestKind::Stop | RequestKind::Relocate { .. } | RequestKind::Migrate { .. } => self.do_stop(&request.group).await,
            RequestKind::Disable => self.do_disable(&request.group).await,
            RequestKind::Status => self.do_status(&request.group).await,
            RequestKind::Init => self.do_init(&request.group).await,
            RequestKind::CondStart => self.do_cond_start(&request.group).await,
            RequestKind::CondStop => self.do_cond_stop(&request.group).await,
            RequestKind::Recover => self.do_recover(&request.group).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rgm_forest::{ConfigNode, Forest};
    use rgm_state::{InMemoryLock, ScriptedAgent};

    async fn forest_with_one_group() -> ForestHandle {
        let store = rgm_forest::InMemoryConfigStore::new();
        store.set(
            rgm_forest::RULES_PATH,
            ConfigNode::Element(vec![(
                "rule".into(),
                ConfigNode::Element(vec![
                    ("@type".into(), ConfigNode::Leaf("service".into())),
                    ("@root".into(), ConfigNode::Leaf("1".into())),
                    ("required".into(), ConfigNode::Leaf("name".into())),
                    ("optional".into(), ConfigNode::Leaf("autostart".into())),
                ]),
            )]),
        );
        store.set(
            rgm_forest::RESOURCES_PATH,
            ConfigNode::Element(vec![(
                "service".into(),
                ConfigNode::Element(vec![("@name".into(), ConfigNode::Leaf("web".into()))]),
            )]),
        );
        store.bump_version();
        let forest = Forest::load(&store).await.unwrap();
        rgm_forest::new_handle(forest)
    }

    #[tokio::test]
    async fn start_transitions_stopped_group_to_started() {
        let forest = forest_with_one_group().await;
        let lock = Arc::new(InMemoryLock::new());
        let mut record = RgStateRecord::new(GroupName::new("web"));
        record.transition_to(RgState::Stopped, NodeId::NONE).unwrap();
        lock.seed(record);

        let agent = Arc::new(ScriptedAgent::new());
        let dispatcher = Dispatcher::new(forest, NodeId::from(1), lock.clone(), agent);

        let request = Request {
            id: rgm_core::RequestId::v4(),
            group: GroupName::new("web"),
            kind: RequestKind::Start,
        };
        dispatcher.handle(&request).await.unwrap();

        let handle = lock.lock(&GroupName::new("web"), Duration::from_secs(1)).await.unwrap();
        let after = lock.rg_state_get(&handle).await.unwrap();
        assert_eq!(after.state, RgState::Started);
        assert_eq!(after.owner, NodeId::from(1));
    }

    #[tokio::test]
    async fn start_failure_leaves_group_failed() {
        let forest = forest_with_one_group().await;
        let lock = Arc::new(InMemoryLock::new());
        let mut record = RgStateRecord::new(GroupName::new("web"));
        record.transition_to(RgState::Stopped, NodeId::NONE).unwrap();
        lock.seed(record);

        let agent = Arc::new(ScriptedAgent::new());
        agent.script("service", rgm_state::AgentAction::Start, rgm_state::OcfCode::GenericError);
        let dispatcher = Dispatcher::new(forest, NodeId::from(1), lock.clone(), agent);

        let request = Request {
            id: rgm_core::RequestId::v4(),
            group: GroupName::new("web"),
            kind: RequestKind::Start,
        };
        assert!(dispatcher.handle(&request).await.is_err());

        let handle = lock.lock(&GroupName::new("web"), Duration::from_secs(1)).await.unwrap();
        let after = lock.rg_state_get(&handle).await.unwrap();
        assert_eq!(after.state, RgState::Failed);
    }

    #[tokio::test]
    async fn stop_is_a_no_op_for_a_node_that_is_not_the_owner() {
        let forest = forest_with_one_group().await;
        let lock = Arc::new(InMemoryLock::new());
        let mut record = RgStateRecord::new(GroupName::new("web"));
        record.transition_to(RgState::Stopped, NodeId::NONE).unwrap();
        record.transition_to(RgState::Starting, NodeId::from(2)).unwrap();
        record.transition_to(RgState::Started, NodeId::from(2)).unwrap();
        lock.seed(record);

        let agent = Arc::new(ScriptedAgent::new());
        let dispatcher = Dispatcher::new(forest, NodeId::from(1), lock.clone(), agent);

        let request = Request {
            id: rgm_core::RequestId::v4(),
            group: GroupName::new("web"),
            kind: RequestKind::Stop,
        };
        dispatcher.handle(&request).await.unwrap();

        let handle = lock.lock(&GroupName::new("web"), Duration::from_secs(1)).await.unwrap();
        let after = lock.rg_state_get(&handle).await.unwrap();
        assert_eq!(after.state, RgState::Started);
    }

    #[tokio::test]
    async fn init_disables_group_without_autostart() {
        let store = rgm_forest::InMemoryConfigStore::new();
        store.set(
            rgm_forest::RULES_PATH,
            ConfigNode::Element(vec![(
                "rule".into(),
                ConfigNode::Element(vec![
                    ("@type".into(), ConfigNode::Leaf("service".into())),
                    ("@root".into(), ConfigNode::Leaf("1".into())),
                    ("required".into(), ConfigNode::Leaf("name".into())),
                    ("optional".into(), ConfigNode::Leaf("autostart".into())),
                ]),
            )]),
        );
        store.set(
            rgm_forest::RESOURCES_PATH,
            ConfigNode::Element(vec![(
                "service".into(),
                ConfigNode::Element(vec![
                    ("@name".into(), ConfigNode::Leaf("web".into())),
                    ("@autostart".into(), ConfigNode::Leaf("0".into())),
                ]),
            )]),
        );
        store.bump_version();
        let forest = rgm_forest::new_handle(Forest::load(&store).await.unwrap());

        let lock = Arc::new(InMemoryLock::new());
        let agent = Arc::new(ScriptedAgent::new());
        let dispatcher = Dispatcher::new(forest, NodeId::from(1), lock.clone(), agent);

        let request = Request {
            id: rgm_core::RequestId::v4(),
            group: GroupName::new("web"),
            kind: RequestKind::Init,
        };
        dispatcher.handle(&request).await.unwrap();

        let handle = lock.lock(&GroupName::new("web"), Duration::from_secs(1)).await.unwrap();
        let after = lock.rg_state_get(&handle).await.unwrap();
        assert_eq!(after.state, RgState::Disabled);
    }

    async fn forest_with_recovery_attrs(attrs: &[(&str, &str)]) -> ForestHandle {
        let store = rgm_forest::InMemoryConfigStore::new();
        store.set(
            rgm_forest::RULES_PATH,
            ConfigNode::Element(vec![(
                "rule".into(),
                ConfigNode::Element(vec![
                    ("@type".into(), ConfigNode::Leaf("service".into())),
                    ("@root".into(), ConfigNode::Leaf("1".into())),
                    ("required".into(), ConfigNode::Leaf("name".into())),
                    ("optional".into(), ConfigNode::Leaf("recovery".into())),
                    ("optional".into(), ConfigNode::Leaf("max_restarts".into())),
                ]),
            )]),
        );
        let mut resource_attrs = vec![("@name".to_string(), ConfigNode::Leaf("web".into()))];
        for (key, value) in attrs {
            resource_attrs.push((format!("@{key}"), ConfigNode::Leaf((*value).into())));
        }
        store.set(
            rgm_forest::RESOURCES_PATH,
            ConfigNode::Element(vec![("service".into(), ConfigNode::Element(resource_attrs))]),
        );
        store.bump_version();
        rgm_forest::new_handle(Forest::load(&store).await.unwrap())
    }

    fn recovering_record(owner: NodeId, restart_count: u32) -> RgStateRecord {
        let mut record = RgStateRecord::new(GroupName::new("web"));
        record.transition_to(RgState::Stopped, NodeId::NONE).unwrap();
        record.transition_to(RgState::Starting, owner).unwrap();
        record.transition_to(RgState::Started, owner).unwrap();
        record.transition_to(RgState::Recover, owner).unwrap();
        record.restart_count = restart_count;
        record
    }

    #[tokio::test]
    async fn recover_with_default_restart_policy_restarts_locally() {
        let forest = forest_with_recovery_attrs(&[]).await;
        let lock = Arc::new(InMemoryLock::new());
        lock.seed(recovering_record(NodeId::from(1), 1));

        let agent = Arc::new(ScriptedAgent::new());
        let dispatcher = Dispatcher::new(forest, NodeId::from(1), lock.clone(), agent);

        let request = Request {
            id: rgm_core::RequestId::v4(),
            group: GroupName::new("web"),
            kind: RequestKind::Recover,
        };
        dispatcher.handle(&request).await.unwrap();

        let handle = lock.lock(&GroupName::new("web"), Duration::from_secs(1)).await.unwrap();
        let after = lock.rg_state_get(&handle).await.unwrap();
        assert_eq!(after.state, RgState::Started);
        assert_eq!(after.owner, NodeId::from(1));
    }

    #[tokio::test]
    async fn recover_with_restart_policy_exhausted_leaves_group_stopped() {
        let forest = forest_with_recovery_attrs(&[("max_restarts", "2")]).await;
        let lock = Arc::new(InMemoryLock::new());
        lock.seed(recovering_record(NodeId::from(1), 2));

        let agent = Arc::new(ScriptedAgent::new());
        let dispatcher = Dispatcher::new(forest, NodeId::from(1), lock.clone(), agent);

        let request = Request {
            id: rgm_core::RequestId::v4(),
            group: GroupName::new("web"),
            kind: RequestKind::Recover,
        };
        dispatcher.handle(&request).await.unwrap();

        let handle = lock.lock(&GroupName::new("web"), Duration::from_secs(1)).await.unwrap();
        let after = lock.rg_state_get(&handle).await.unwrap();
        assert_eq!(after.state, RgState::Stopped);
        assert_eq!(after.owner, NodeId::NONE);
    }

    #[tokio::test]
    async fn recover_with_relocate_policy_leaves_group_stopped_for_placement() {
        let forest = forest_with_recovery_attrs(&[("recovery", "relocate")]).await;
        let lock = Arc::new(InMemoryLock::new());
        lock.seed(recovering_record(NodeId::from(1), 0));

        let agent = Arc::new(ScriptedAgent::new());
        let dispatcher = Dispatcher::new(forest, NodeId::from(1), lock.clone(), agent);

        let request = Request {
            id: rgm_core::RequestId::v4(),
            group: GroupName::new("web"),
            kind: RequestKind::Recover,
        };
        dispatcher.handle(&request).await.unwrap();

        let handle = lock.lock(&GroupName::new("web"), Duration::from_secs(1)).await.unwrap();
        let after = lock.rg_state_get(&handle).await.unwrap();
        assert_eq!(after.state, RgState::Stopped);
    }

    #[tokio::test]
    async fn recover_with_disable_policy_disables_the_group() {
        let forest = forest_with_recovery_attrs(&[("recovery", "disable")]).await;
        let lock = Arc::new(InMemoryLock::new());
        lock.seed(recovering_record(NodeId::from(1), 0));

        let agent = Arc::new(ScriptedAgent::new());
        let dispatcher = Dispatcher::new(forest, NodeId::from(1), lock.clone(), agent);

        let request = Request {
            id: rgm_core::RequestId::v4(),
            group: GroupName::new("web"),
            kind: RequestKind::Recover,
        };
        dispatcher.handle(&request).await.unwrap();

        let handle = lock.lock(&GroupName::new("web"), Duration::from_secs(1)).await.unwrap();
        let after = lock.rg_state_get(&handle).await.unwrap();
        assert_eq!(after.state, RgState::Disabled);
    }
}
