//! Shared error taxonomy for the resource group manager.
//!
//! Errors are distinguished by *kind* rather than by type name:
//! configuration errors, transient lock/network errors, agent failures,
//! state-transition errors, and concurrency violations (the last of which
//! is modeled as a panic, not a `Result`, since it indicates a bug rather
//! than a recoverable fault — see [`concurrency_violation`]).

use rgm_core::{GroupName, NodeId};
use thiserror::Error;

/// Crate-wide error type for the resource group manager.
#[derive(Debug, Error)]
pub enum RgmError {
    /// A configuration load error: malformed rules, missing required
    /// attributes, a cycle in the dependency tree, or a duplicate group
    /// name. The current forest is kept and the new one discarded.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A lock or membership-transport call failed or timed out. Callers
    /// retry with backoff (see `rgm-resilience`) before surfacing this.
    #[error("transient error talking to {service}: {message}")]
    Transient {
        /// Which external collaborator failed (`"lock"`, `"membership"`,
        /// `"config_store"`, `"transport"`).
        service: &'static str,
        /// Human-readable detail.
        message: String,
    },

    /// A resource agent invocation returned a non-success OCF code that was
    /// not classified as benign.
    #[error("agent failure for resource group {group}: {message}")]
    AgentFailure {
        /// The affected group.
        group: GroupName,
        /// Human-readable detail.
        message: String,
    },

    /// A `rg_state` transition was attempted that the state machine does
    /// not permit.
    #[error("invalid state transition for group {group}: {from} -> {to}")]
    InvalidTransition {
        /// The affected group.
        group: GroupName,
        /// The state transitioned from.
        from: String,
        /// The state transitioned to.
        to: String,
    },

    /// A deadline (lock acquisition or agent invocation) was exceeded.
    #[error("deadline exceeded for group {group} during {operation}")]
    DeadlineExceeded {
        /// The affected group.
        group: GroupName,
        /// The operation that was in flight (`"lock"`, `"agent"`).
        operation: &'static str,
    },

    /// A group was not found in the current forest.
    #[error("unknown resource group: {0}")]
    UnknownGroup(GroupName),

    /// A placement request named a node that is not a current live member.
    #[error("node {0} is not a live cluster member")]
    UnknownNode(NodeId),
}

/// Abort the process: a lock-ordering or invariant violation that indicates
/// a programming bug rather than an operational fault.
///
/// Never call this for a recoverable condition — prefer `RgmError`.
#[track_caller]
pub fn concurrency_violation(message: impl std::fmt::Display) -> ! {
    panic!("concurrency violation: {message}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_display() {
        let err = RgmError::Configuration("missing required attribute 'device'".into());
        assert_eq!(
            err.to_string(),
            "configuration error: missing required attribute 'device'"
        );
    }

    #[test]
    fn invalid_transition_display() {
        let err = RgmError::InvalidTransition {
            group: GroupName::new("svc_a"),
            from: "STARTED".into(),
            to: "UNINITIALIZED".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid state transition for group svc_a: STARTED -> UNINITIALIZED"
        );
    }

    #[test]
    fn deadline_exceeded_display() {
        let err = RgmError::DeadlineExceeded {
            group: GroupName::new("svc_b"),
            operation: "lock",
        };
        assert!(err.to_string().contains("svc_b"));
        assert!(err.to_string().contains("lock"));
    }

    #[test]
    #[should_panic(expected = "concurrency violation: forest writer held a per-group lock")]
    fn concurrency_violation_panics() {
        concurrency_violation("forest writer held a per-group lock");
    }
}
