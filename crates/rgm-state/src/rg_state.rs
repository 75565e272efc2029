//! The per-group state machine: the durable `rg_state`
//! record and its transition table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rgm_core::{GroupName, NodeId};
use rgm_error::RgmError;

/// A resource group's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RgState {
    /// Never evaluated since this group first appeared.
    Uninitialized,
    /// Not running anywhere; eligible for placement.
    Stopped,
    /// The agent `start` walk is in progress.
    Starting,
    /// Running on `owner`.
    Started,
    /// The agent `stop` walk is in progress.
    Stopping,
    /// A status check failed; awaiting the recovery policy's decision.
    Recover,
    /// The agent returned a code the state machine could not classify.
    Error,
    /// Excluded from evaluation until an administrator re-enables it.
    Disabled,
    /// The agent `start` walk failed.
    Failed,
}

impl RgState {
    /// Returns `true` if a group in this state must carry a non-zero
    /// `owner` (the "who holds this resource group" invariant).
    #[must_use]
    pub fn requires_owner(self) -> bool {
        matches!(self, Self::Starting | Self::Started | Self::Stopping | Self::Recover)
    }

    /// Returns `true` if the evaluator should skip this group entirely.
    ///
    /// `Recover` is deliberately not exempt: the evaluator is what enqueues
    /// the recovery-policy request that gets a group back out of `Recover`
    /// (see `rgm-engine::evaluator::evaluate`'s handling of it).
    #[must_use]
    pub fn is_evaluator_exempt(self) -> bool {
        matches!(self, Self::Disabled | Self::Failed)
    }
}

impl std::fmt::Display for RgState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Started => write!(f, "started"),
            Self::Stopping => write!(f, "stopping"),
            Self::Recover => write!(f, "recover"),
            Self::Error => write!(f, "error"),
            Self::Disabled => write!(f, "disabled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Returns `true` if transitioning from `from` to `to` is permitted.
///
/// Two wildcards sit outside the explicit table: any state may transition
/// to `Disabled` (an administrator may disable a group at any time), and
/// any state but `Error` itself may transition to `Error` (the agent
/// returned a code the executor could not classify into success/failure).
#[must_use]
pub fn can_transition(from: RgState, to: RgState) -> bool {
    if from == to {
        return false;
    }
    if to == RgState::Disabled {
        return true;
    }
    if to == RgState::Error {
        return true;
    }

    matches!(
        (from, to),
        (RgState::Uninitialized, RgState::Stopped)
            | (RgState::Stopped, RgState::Starting)
            | (RgState::Starting, RgState::Started)
            | (RgState::Starting, RgState::Failed)
            | (RgState::Started, RgState::Stopping)
            | (RgState::Started, RgState::Recover)
            | (RgState::Stopping, RgState::Stopped)
            | (RgState::Recover, RgState::Stopping)
            | (RgState::Failed, RgState::Stopped)
            | (RgState::Disabled, RgState::Stopped)
            | (RgState::Error, RgState::Stopped)
    )
}

/// The durable per-group record, read and written only while holding the
/// group's distributed lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RgStateRecord {
    /// The resource group this record belongs to.
    pub name: GroupName,
    /// Current lifecycle state.
    pub state: RgState,
    /// The node currently running this group, or [`NodeId::NONE`].
    pub owner: NodeId,
    /// The node that last ran this group, kept for relocate decisions even
    /// after `owner` is cleared.
    pub last_owner: NodeId,
    /// When `state` was last changed.
    pub transition_timestamp: DateTime<Utc>,
    /// Consecutive start attempts since the group last reached `Started`.
    pub restart_count: u32,
}

impl RgStateRecord {
    /// A freshly created record for a group that has never been evaluated.
    #[must_use]
    pub fn new(name: GroupName) -> Self {
        Self {
            name,
            state: RgState::Uninitialized,
            owner: NodeId::NONE,
            last_owner: NodeId::NONE,
            transition_timestamp: Utc::now(),
            restart_count: 0,
        }
    }

    /// Attempt a transition to `to`, validating it against the transition
    /// table and maintaining the owner/restart_count bookkeeping.
    pub fn transition_to(&mut self, to: RgState, owner: NodeId) -> Result<(), RgmError> {
        if !can_transition(self.state, to) {
            return Err(RgmError::InvalidTransition {
                group: self.name.clone(),
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }

        if to == RgState::Starting {
            self.restart_count += 1;
        }
        if to == RgState::Started {
            self.restart_count = 0;
        }
        if self.owner != NodeId::NONE {
            self.last_owner = self.owner;
        }
        self.owner = if to.requires_owner() { owner } else { NodeId::NONE };
        self.state = to;
        self.transition_timestamp = Utc::now();

        self.check_owner_invariant()
    }

    /// Validates the `owner != 0 <=> state requires an owner` invariant.
    pub fn check_owner_invariant(&self) -> Result<(), RgmError> {
        if self.state.requires_owner() && self.owner == NodeId::NONE {
            return Err(RgmError::Configuration(format!(
                "group '{}' is in state {} but has no owner",
                self.name, self.state
            )));
        }
        if !self.state.requires_owner() && self.owner != NodeId::NONE {
            return Err(RgmError::Configuration(format!(
                "group '{}' is in state {} but has an owner",
                self.name, self.state
            )));
        }
        Ok(())
    }

    /// Forcibly resets a record whose owner has been confirmed dead by the
    /// membership service, bypassing the normal transition table.
    ///
    /// Owner-failure scenario: when the node holding
    /// `STARTED` leaves the cluster, no peer can run that node's `stop`
    /// walk — the node is gone. Once membership (and, in a real cluster,
    /// fencing) has confirmed it cannot still be running, a peer's
    /// evaluator reclaims the group by resetting it straight to `STOPPED`
    /// rather than routing through `STOPPING`, which would require an
    /// agent invocation nothing can perform.
    pub fn reclaim_from_dead_owner(&mut self, dead_owner: NodeId) {
        if self.owner != dead_owner {
            return;
        }
        self.last_owner = self.owner;
        self.owner = NodeId::NONE;
        self.state = RgState::Stopped;
        self.transition_timestamp = Utc::now();
    }
}
