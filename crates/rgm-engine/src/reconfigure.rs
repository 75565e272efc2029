//! The reconfiguration driver: loads a new forest from the
//! configuration store, runs the conditional-stop pass against the
//! outgoing tree, swaps the forest, runs the conditional-start pass
//! against the incoming tree, initializes brand-new groups, and triggers
//! one evaluation pass so anything left idle gets placed.
//!
//! Every tree walk here runs against a snapshot cloned out from under the
//! forest lock first — the same discipline the evaluator and dispatcher
//! use — so a (potentially slow) agent invocation never holds the lock.

use std::sync::Arc;

use rgm_core::GroupName;
use rgm_error::RgmError;
use rgm_forest::{compute_delta, reconfigure as swap_forest, ConfigStore, Forest, ForestHandle, Resource, ResourceNode};
use rgm_state::{conditional_start, conditional_stop, AgentInvoker, RequestKind, RequestQueue};

use crate::evaluator::{evaluate, EvaluatorContext};
use crate::ports::MembershipEvent;

/// Drives one reconfiguration pass.
pub struct ReconfigureDriver {
    forest: ForestHandle,
    queue: Arc<RequestQueue>,
    agent: Arc<dyn AgentInvoker>,
}

impl ReconfigureDriver {
    #[must_use]
    pub fn new(forest: ForestHandle, queue: Arc<RequestQueue>, agent: Arc<dyn AgentInvoker>) -> Self {
        Self { forest, queue, agent }
    }

    /// Loads `store`'s current configuration and reconfigures the forest to
    /// match it.
    pub async fn run(&self, store: &dyn ConfigStore, eval_ctx: &EvaluatorContext) -> Result<(), RgmError> {
        let new_forest = Forest::load(store).await?;

        let (old_resources, old_roots) = {
            let guard = self.forest.read();
            (guard.resources.clone(), guard.tree_roots.clone())
        };

        let (_, stop_old) = compute_delta(&old_resources, &old_roots, &new_forest.resources, &new_forest.tree_roots);

        let mut flagged_old = old_resources.clone();
        for key in &stop_old {
            flagged_old[*key].flags.needstop = true;
        }

        let old_group_names: Vec<GroupName> = old_roots
            .iter()
            .filter_map(|root| old_resources[root.resource].primary_key())
            .map(GroupName::new)
            .collect();

        for name in &old_group_names {
            self.queue.begin_exclusive(name).await;
        }

        // `begin_exclusive` above claims every old group for the duration of
        // this pass; release every one of them on the way out regardless of
        // whether the stop/swap/start walk below succeeds, or a single
        // failed agent call would wedge those groups out of placement and
        // out of every future reconfigure for the life of the process.
        let result = self.stop_swap_start(&old_roots, &flagged_old, new_forest, &old_group_names).await;

        for name in &old_group_names {
            self.queue.end_exclusive(name);
        }
        let brand_new = result?;

        for name in &brand_new {
            self.queue.enqueue(name.clone(), RequestKind::Init);
        }

        evaluate(eval_ctx, MembershipEvent::Timer).await
    }

    /// Runs the conditional-stop pass against the outgoing tree, swaps the
    /// forest, then runs the conditional-start pass against the incoming
    /// tree. Returns the brand-new root groups the swap introduced.
    async fn stop_swap_start(&self, old_roots: &[ResourceNode], flagged_old: &[Resource], new_forest: Forest, old_group_names: &[GroupName]) -> Result<Vec<GroupName>, RgmError> {
        for root in old_roots {
            if root.walk().any(|node| flagged_old[node.resource].flags.needstop) {
                if let Some(name) = flagged_old[root.resource].primary_key().map(GroupName::new) {
                    conditional_stop(root, &name, flagged_old, self.agent.as_ref()).await?;
                }
            }
        }

        let new_group_names: Vec<GroupName> = new_forest
            .tree_roots
            .iter()
            .filter_map(|root| new_forest.resources[root.resource].primary_key())
            .map(GroupName::new)
            .collect();
        let brand_new: Vec<GroupName> = new_group_names.into_iter().filter(|name| !old_group_names.contains(name)).collect();

        let new_roots = new_forest.tree_roots.clone();
        let (flagged_new, _) = swap_forest(&self.forest, new_forest);

        for root in &new_roots {
            if root.walk().any(|node| flagged_new[node.resource].flags.needstart) {
                if let Some(name) = flagged_new[root.resource].primary_key().map(GroupName::new) {
                    conditional_start(root, &name, &flagged_new, self.agent.as_ref()).await?;
                }
            }
        }

        Ok(brand_new)
    }
}
