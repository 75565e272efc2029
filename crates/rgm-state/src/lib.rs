//! Per-group state machine, tree executor, and request queue.
//!
//! This crate owns everything that runs once a [`rgm_forest::Forest`] has
//! told it *what* a group looks like: the durable `rg_state` record and its
//! transition table, the tree walks that drive resource
//! agents in dependency order (C7), and the per-group FIFO that serializes
//! operations against the same group while letting different groups run
//! concurrently (C8). It depends on `rgm-forest` for the tree shape but has
//! no notion of cluster membership or placement scoring — those live in
//! `rgm-engine`, which drives this crate's executor and queue.

mod executor;
mod ports;
mod queue;
mod retry;
mod rg_state;

pub use executor::{conditional_start, conditional_stop, start_tree, stop_tree, status_tree};
pub use ports::{AgentAction, AgentInvoker, DistributedLock, LockHandle, Message, MessageTransport, OcfCode};
pub use queue::{spawn_workers, shutdown_and_join, Request, RequestHandler, RequestKind, RequestQueue};
pub use retry::acquire_with_retry;
pub use rg_state::{can_transition, RgState, RgStateRecord};

#[cfg(any(test, feature = "testing"))]
pub use ports::test_double::{InMemoryLock, ScriptedAgent};
