//! The event loop / evaluator: on every membership event or periodic
//! timer, decides per-group whether to start, relocate, stop, or ignore.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rgm_core::{GroupName, NodeId};
use rgm_error::RgmError;
use rgm_forest::ForestHandle;
use rgm_resilience::RetryConfig;
use rgm_state::{acquire_with_retry, DistributedLock, LockHandle, RequestKind, RequestQueue, RgState};

use crate::placement::{best_target_node, is_best_target, Candidate};
use crate::ports::{ClusterMember, MembershipEvent, MembershipService};

/// Everything the evaluator needs to reach a decision: a read-only view of
/// the forest, this node's identity, and the external collaborators it
/// consults.
pub struct EvaluatorContext {
    /// The forest to walk every root of.
    pub forest: ForestHandle,
    /// This process's cluster node id.
    pub self_node: NodeId,
    /// The per-group distributed lock (external interface 6.3).
    pub lock: Arc<dyn DistributedLock>,
    /// The membership service (external interface 6.2).
    pub membership: Arc<dyn MembershipService>,
    /// Where decisions are enqueued for the worker pool to carry out.
    pub queue: Arc<RequestQueue>,
    /// Deadline for each lock acquisition during evaluation.
    pub lock_deadline: Duration,
    /// Retry/backoff policy for transient lock failures.
    pub lock_retry: RetryConfig,
    /// Administrative hold: while `true`, `evaluate` is a no-op — the
    /// engine is globally locked, so evaluation is skipped.
    pub admin_locked: AtomicBool,
}

impl EvaluatorContext {
    /// Builds a context with a sensible default lock deadline.
    #[must_use]
    pub fn new(
        forest: ForestHandle,
        self_node: NodeId,
        lock: Arc<dyn DistributedLock>,
        membership: Arc<dyn MembershipService>,
        queue: Arc<RequestQueue>,
    ) -> Self {
        Self {
            forest,
            self_node,
            lock,
            membership,
            queue,
            lock_deadline: Duration::from_secs(10),
            lock_retry: RetryConfig::default(),
            admin_locked: AtomicBool::new(false),
        }
    }

    /// Sets or clears the administrative hold.
    pub fn set_admin_lock(&self, locked: bool) {
        self.admin_locked.store(locked, Ordering::SeqCst);
    }

    /// Acquires `group`'s distributed lock, retrying transient failures
    /// before surfacing one.
    async fn acquire(&self, group: &GroupName) -> Result<LockHandle, RgmError> {
        acquire_with_retry(self.lock.as_ref(), group, self.lock_deadline, self.lock_retry).await
    }
}

fn is_truthy(value: Option<&str>) -> bool {
    matches!(value, Some("1") | Some("true") | Some("yes"))
}

/// One group's evaluation inputs snapshotted from the forest under its
/// read lock: just enough to score placement and check exclusivity
/// without holding the lock across the distributed-lock calls that follow.
struct GroupSnapshot {
    name: GroupName,
    domain_name: Option<String>,
    exclusive: bool,
}

fn snapshot_groups(forest: &ForestHandle) -> Vec<GroupSnapshot> {
    let guard = forest.read();
    guard
        .tree_roots
        .iter()
        .filter_map(|root| {
            let resource = &guard.resources[root.resource];
            let name = resource.primary_key()?;
            Some(GroupSnapshot {
                name: GroupName::new(name),
                domain_name: resource.attr("domain").map(ToString::to_string),
                exclusive: is_truthy(resource.attr("exclusive")),
            })
        })
        .collect()
}

/// Counts, under the distributed lock, how many groups are currently
/// `STARTED` with `owner == node`.
///
/// Rather than leaving exclusivity as a domain-level declaration only,
/// this counts live service ownership directly, reading every group's
/// durable record. See `DESIGN.md` for the tradeoff this implies.
async fn count_running_services(ctx: &EvaluatorContext, groups: &[GroupSnapshot], node: NodeId) -> Result<usize, RgmError> {
    let mut count = 0;
    for group in groups {
        let handle = ctx.acquire(&group.name).await?;
        let record = ctx.lock.rg_state_get(&handle).await?;
        ctx.lock.unlock(handle).await?;
        if record.state == RgState::Started && record.owner == node {
            count += 1;
        }
    }
    Ok(count)
}

async fn build_candidates(
    ctx: &EvaluatorContext,
    groups: &[GroupSnapshot],
    members: &[ClusterMember],
    exclusive: bool,
) -> Result<Vec<Candidate>, RgmError> {
    let mut candidates = Vec::with_capacity(members.len());
    for member in members.iter().filter(|m| m.is_live) {
        let runs_no_services = if exclusive {
            count_running_services(ctx, groups, member.node_id).await? == 0
        } else {
            true
        };
        candidates.push(Candidate {
            node: member.node_id,
            runs_no_services,
        });
    }
    Ok(candidates)
}

/// Enqueues a `START` for `group` only if `ctx.self_node` is the unique
/// best-scoring live candidate.
async fn consider_start(ctx: &EvaluatorContext, group: &GroupSnapshot, groups: &[GroupSnapshot], members: &[ClusterMember]) -> Result<(), RgmError> {
    let domain = {
        let guard = ctx.forest.read();
        group
            .domain_name
            .as_ref()
            .and_then(|name| guard.domains.iter().find(|d| &d.name == name).cloned())
    };
    let candidates = build_candidates(ctx, groups, members, group.exclusive).await?;

    if is_best_target(ctx.self_node, &candidates, domain.as_ref(), group.exclusive) {
        ctx.queue.enqueue(group.name.clone(), RequestKind::Start);
    }
    Ok(())
}

/// Enqueues a `RELOCATE` to `target` if it strictly outscores `ctx.self_node`,
/// preserving placement monotonicity: never relocate to a strictly worse
/// node.
async fn consider_relocate(
    ctx: &EvaluatorContext,
    group: &GroupSnapshot,
    groups: &[GroupSnapshot],
    members: &[ClusterMember],
    target: NodeId,
) -> Result<(), RgmError> {
    let domain = {
        let guard = ctx.forest.read();
        group
            .domain_name
            .as_ref()
            .and_then(|name| guard.domains.iter().find(|d| &d.name == name).cloned())
    };
    let candidates = build_candidates(ctx, groups, members, group.exclusive).await?;

    let score_of = |node: NodeId| {
        candidates
            .iter()
            .find(|c| c.node == node)
            .map(|c| crate::placement::score(*c, domain.as_ref(), group.exclusive))
            .unwrap_or(0)
    };

    if score_of(target) > score_of(ctx.self_node) {
        ctx.queue.enqueue(group.name.clone(), RequestKind::Relocate { target });
    }
    Ok(())
}

/// Runs one evaluation pass. Returns immediately, doing nothing, if the
/// engine is under an administrative hold.
pub async fn evaluate(ctx: &EvaluatorContext, event: MembershipEvent) -> Result<(), RgmError> {
    if ctx.admin_locked.load(Ordering::SeqCst) {
        tracing::debug!("evaluator skipped: administrative hold in effect");
        return Ok(());
    }

    let groups = snapshot_groups(&ctx.forest);
    let members = ctx.membership.members().await?;

    for group in &groups {
        let lock_handle = ctx.acquire(&group.name).await?;
        let mut record = ctx.lock.rg_state_get(&lock_handle).await?;

        if record.state.is_evaluator_exempt() {
            ctx.lock.unlock(lock_handle).await?;
            continue;
        }

        // A failed status check put this group into RECOVER; hand it to
        // the recovery policy (restart/relocate/disable, spec §4.5, §9)
        // instead of running the usual placement steps below.
        if record.state == RgState::Recover {
            ctx.lock.unlock(lock_handle).await?;
            ctx.queue.enqueue(group.name.clone(), RequestKind::Recover);
            continue;
        }

        // Step 3: a remote node that owned this group left — reclaim it so
        // a fresh placement decision can be made.
        if let MembershipEvent::Left(dead) = event {
            if record.owner == dead {
                record.reclaim_from_dead_owner(dead);
                ctx.lock.rg_state_set(&lock_handle, &record).await?;
            }
        }
        ctx.lock.unlock(lock_handle).await?;

        // Step 4: we own a running group and a node just joined that might
        // outrank us.
        if record.state == RgState::Started && record.owner == ctx.self_node {
            if let MembershipEvent::Joined(joined) = event {
                consider_relocate(ctx, group, &groups, &members, joined).await?;
            }
        }

        // Step 5: anything sitting idle gets a fresh placement attempt.
        if record.state == RgState::Stopped {
            consider_start(ctx, group, &groups, &members).await?;
        }
    }

    Ok(())
}

/// `best_target_node` exposed for callers (e.g. the reconfiguration driver)
/// that need a placement decision outside a full evaluation pass.
#[must_use]
pub fn best_target_for(candidates: &[Candidate], exclude_owner: Option<NodeId>, domain: Option<&rgm_forest::Domain>, exclusive: bool) -> Option<NodeId> {
    best_target_node(candidates, exclude_owner, domain, exclusive)
}
