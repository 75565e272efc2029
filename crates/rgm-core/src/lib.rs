//! Core identifiers and shared types for the resource group manager.
//!
//! Every id that crosses a cluster boundary (node ids, group names) is a
//! distinct newtype so that, for example, a [`NodeId`] can never be passed
//! where a resource attribute key was expected.

mod ids;
mod priority;

pub use ids::{GroupName, NodeId, RequestId};
pub use priority::Priority;
