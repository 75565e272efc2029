//! Placement scoring, the event-driven evaluator, the per-request operation
//! dispatcher, and the reconfiguration driver: the cluster-aware half of the
//! resource group manager.
//!
//! `rgm-forest` supplies the configuration model and `rgm-state` the
//! per-group state machine, tree executor, and request queue; this crate
//! adds everything that needs a view of the whole cluster — membership,
//! failover-domain-aware placement (components C4-C5), the evaluator loop
//! (C9), and the driver that walks a reconfiguration from an old forest to a
//! new one (C10) — and assembles all of it into one node's [`Engine`].

mod engine;
mod evaluator;
mod handler;
mod placement;
mod ports;
mod reconfigure;

pub use engine::Engine;
pub use evaluator::{best_target_for, evaluate, EvaluatorContext};
pub use handler::Dispatcher;
pub use placement::{best_target_node, is_best_target, score, Candidate};
pub use ports::{AdminOp, ClusterMember, MembershipEvent, MembershipService};
pub use reconfigure::ReconfigureDriver;

#[cfg(any(test, feature = "testing"))]
pub use ports::test_double::InMemoryMembership;
