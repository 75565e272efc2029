//! The per-group request queue: one logical FIFO per group
//! name, draining collapsed/deduplicated requests through a worker pool
//! while guaranteeing at most one in-flight operation per group.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rgm_core::{GroupName, NodeId, RequestId};
use rgm_error::RgmError;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// The operation a queued request asks the worker pool to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// Walk the group's tree and start every resource.
    Start,
    /// Walk the group's tree and stop every resource.
    Stop,
    /// Stop the group and transition it to `DISABLED`.
    Disable,
    /// Stop on the current owner, let placement pick a new one, start there.
    Relocate {
        /// The node the evaluator determined should take over.
        target: NodeId,
    },
    /// Run a status walk without changing `rg_state`.
    Status,
    /// Administrator-requested move to a specific node.
    Migrate {
        /// The administrator-chosen destination node.
        target: NodeId,
    },
    /// First-time initialization of a newly reconfigured root: create its
    /// `rg_state` record.
    Init,
    /// Reconfiguration conditional start: only resources flagged
    /// `needstart`.
    CondStart,
    /// Reconfiguration conditional stop: only resources flagged
    /// `needstop`.
    CondStop,
    /// A status check failed; run the recovery policy (restart, relocate,
    /// or disable) consolidated in `rgm-engine::handler::Dispatcher::do_recover`.
    Recover,
}

impl RequestKind {
    /// Requests that make an already-queued `Status` for the same group
    /// redundant: anything that changes the group's running state will
    /// observe (or produce) a fresher status than a stale queued check.
    fn supersedes_queued_status(&self) -> bool {
        matches!(
            self,
            RequestKind::Start
                | RequestKind::Stop
                | RequestKind::Disable
                | RequestKind::Relocate { .. }
                | RequestKind::Migrate { .. }
                | RequestKind::CondStart
                | RequestKind::CondStop
                | RequestKind::Recover
        )
    }
}

/// A single queued operation against one resource group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Identifies this request for logging and journal correlation.
    pub id: RequestId,
    /// The group this request targets.
    pub group: GroupName,
    /// What to do.
    pub kind: RequestKind,
}

impl Request {
    #[must_use]
    fn new(group: GroupName, kind: RequestKind) -> Self {
        Self {
            id: RequestId::v4(),
            group,
            kind,
        }
    }
}

#[derive(Default)]
struct GroupQueue {
    pending: VecDeque<Request>,
    running: bool,
}

/// A per-group FIFO of requests, drained by a worker pool that never runs
/// two requests for the same group concurrently.
pub struct RequestQueue {
    groups: DashMap<GroupName, GroupQueue>,
    wake: Notify,
    shutting_down: AtomicBool,
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestQueue {
    /// Creates an empty, accepting queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
            wake: Notify::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Enqueues `kind` for `group`, applying the collapse rules below.
    /// Silently dropped if the queue is shutting down.
    ///
    /// Returns the enqueued request's id, or `None` if the request was
    /// dropped (either by a collapse rule or because of shutdown).
    pub fn enqueue(&self, group: GroupName, kind: RequestKind) -> Option<RequestId> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return None;
        }

        let mut entry = self.groups.entry(group.clone()).or_default();

        if kind.supersedes_queued_status() {
            entry.pending.retain(|r| r.kind != RequestKind::Status);
        }
        if entry.pending.back().is_some_and(|last| last.kind == kind) {
            // Identical request already queued directly behind the last
            // one: nothing new to learn by queueing it again.
            return None;
        }

        let request = Request::new(group, kind);
        let id = request.id;
        entry.pending.push_back(request);
        drop(entry);
        self.wake.notify_waiters();
        Some(id)
    }

    /// Claims the oldest runnable request for an idle group, marking that
    /// group busy until [`RequestQueue::release`] is called.
    fn try_claim(&self) -> Option<Request> {
        for mut entry in self.groups.iter_mut() {
            if entry.running {
                continue;
            }
            if let Some(request) = entry.pending.pop_front() {
                entry.running = true;
                return Some(request);
            }
        }
        None
    }

    /// Marks `group` idle again and wakes any worker waiting for work.
    fn release(&self, group: &GroupName) {
        if let Some(mut entry) = self.groups.get_mut(group) {
            entry.running = false;
        }
        self.wake.notify_waiters();
    }

    /// Whether `group` has no pending requests and nothing running.
    #[must_use]
    pub fn is_idle(&self, group: &GroupName) -> bool {
        self.groups
            .get(group)
            .is_none_or(|entry| !entry.running && entry.pending.is_empty())
    }

    /// Waits until `group` has fully drained: used by the reconfiguration
    /// driver, which must see a conditional stop/start pass complete before
    /// moving on.
    pub async fn wait_idle(&self, group: &GroupName) {
        loop {
            if self.is_idle(group) {
                return;
            }
            self.wake.notified().await;
        }
    }

    /// Marks `group` busy without dequeuing a [`Request`], so that no
    /// worker can claim it, then waits for any request already running for
    /// it to finish first.
    ///
    /// Used by the reconfiguration driver, which walks a
    /// group's tree directly rather than through a queued [`Request`] but
    /// must still honor "only one in-flight operation per group" with
    /// respect to the worker pool.
    pub async fn begin_exclusive(&self, group: &GroupName) {
        loop {
            {
                let mut entry = self.groups.entry(group.clone()).or_default();
                if !entry.running {
                    entry.running = true;
                    return;
                }
            }
            self.wake.notified().await;
        }
    }

    /// Releases a group claimed with [`RequestQueue::begin_exclusive`].
    pub fn end_exclusive(&self, group: &GroupName) {
        self.release(group);
    }

    /// Stops accepting new requests. Already-queued and in-flight requests
    /// are still processed (shutdown is two-phase).
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    #[must_use]
    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    #[must_use]
    fn all_idle(&self) -> bool {
        self.groups.iter().all(|entry| !entry.running && entry.pending.is_empty())
    }
}

/// Executes a single dequeued request. Implemented by the engine crate's
/// operation dispatcher, which knows how to turn a [`Request`] into tree
/// walks and `rg_state` transitions.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Run `request` to completion. Errors are logged by the worker loop
    /// and do not stop other groups' requests from running.
    async fn handle(&self, request: &Request) -> Result<(), RgmError>;
}

/// Spawns `worker_count` tasks that drain `queue` via `handler` until
/// `shutdown` is cancelled and the queue is fully drained, or a bounded
/// timeout elapses first.
pub fn spawn_workers(
    queue: Arc<RequestQueue>,
    handler: Arc<dyn RequestHandler>,
    worker_count: usize,
    shutdown: CancellationToken,
) -> JoinSet<()> {
    let mut workers = JoinSet::new();
    for _ in 0..worker_count.max(1) {
        let queue = Arc::clone(&queue);
        let handler = Arc::clone(&handler);
        let shutdown = shutdown.clone();
        workers.spawn(async move { worker_loop(queue, handler, shutdown).await });
    }
    workers
}

async fn worker_loop(queue: Arc<RequestQueue>, handler: Arc<dyn RequestHandler>, shutdown: CancellationToken) {
    loop {
        match queue.try_claim() {
            Some(request) => {
                if let Err(err) = handler.handle(&request).await {
                    tracing::warn!(
                        group = %request.group,
                        request_id = %request.id,
                        kind = ?request.kind,
                        error = %err,
                        "request failed"
                    );
                }
                queue.release(&request.group);
            }
            None => {
                if shutdown.is_cancelled() && queue.is_shutting_down() && queue.all_idle() {
                    return;
                }
                tokio::select! {
                    () = queue.wake.notified() => {}
                    () = shutdown.cancelled() => {
                        if queue.is_shutting_down() && queue.all_idle() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Stops accepting new work, then waits up to `timeout` for in-flight and
/// already-queued requests to drain before returning (a bounded-join
/// shutdown).
pub async fn shutdown_and_join(queue: &Arc<RequestQueue>, workers: &mut JoinSet<()>, token: &CancellationToken, timeout: Duration) {
    queue.begin_shutdown();
    token.cancel();

    let join_all = async {
        while workers.join_next().await.is_some() {}
    };
    if tokio::time::timeout(timeout, join_all).await.is_err() {
        tracing::warn!("request queue workers did not join within the shutdown timeout; aborting remaining tasks");
        workers.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn group(name: &str) -> GroupName {
        GroupName::new(name)
    }

    #[test]
    fn enqueue_collapses_status_behind_stop() {
        let queue = RequestQueue::new();
        queue.enqueue(group("web"), RequestKind::Status);
        queue.enqueue(group("web"), RequestKind::Stop);
        // The Status should have been dropped; Stop remains alone.
        let claimed = queue.try_claim().unwrap();
        assert_eq!(claimed.kind, RequestKind::Stop);
        assert!(queue.try_claim().is_none());
    }

    #[test]
    fn enqueue_drops_exact_duplicate_tail() {
        let queue = RequestQueue::new();
        queue.enqueue(group("web"), RequestKind::Start);
        queue.enqueue(group("web"), RequestKind::Start);
        let _ = queue.try_claim();
        assert!(queue.try_claim().is_none());
    }

    #[test]
    fn claim_marks_group_busy_until_released() {
        let queue = RequestQueue::new();
        queue.enqueue(group("web"), RequestKind::Start);
        queue.enqueue(group("web"), RequestKind::Stop);

        let first = queue.try_claim().unwrap();
        assert_eq!(first.kind, RequestKind::Start);
        // The group is marked running, so the second request cannot be
        // claimed concurrently even though it is pending.
        assert!(queue.try_claim().is_none());

        queue.release(&group("web"));
        let second = queue.try_claim().unwrap();
        assert_eq!(second.kind, RequestKind::Stop);
    }

    #[tokio::test]
    async fn begin_exclusive_blocks_worker_claims_until_released() {
        let queue = RequestQueue::new();
        queue.begin_exclusive(&group("web")).await;
        queue.enqueue(group("web"), RequestKind::Start);
        assert!(queue.try_claim().is_none());

        queue.end_exclusive(&group("web"));
        assert!(queue.try_claim().is_some());
    }

    #[test]
    fn different_groups_claim_independently() {
        let queue = RequestQueue::new();
        queue.enqueue(group("web"), RequestKind::Start);
        queue.enqueue(group("db"), RequestKind::Start);

        let a = queue.try_claim().unwrap();
        let b = queue.try_claim().unwrap();
        assert_ne!(a.group, b.group);
    }

    #[test]
    fn enqueue_after_shutdown_is_dropped() {
        let queue = RequestQueue::new();
        queue.begin_shutdown();
        assert!(queue.enqueue(group("web"), RequestKind::Start).is_none());
    }

    struct CountingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RequestHandler for CountingHandler {
        async fn handle(&self, _request: &Request) -> Result<(), RgmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn worker_pool_drains_then_joins_on_shutdown() {
        let queue = Arc::new(RequestQueue::new());
        for i in 0..5 {
            queue.enqueue(group(&format!("svc_{i}")), RequestKind::Start);
        }
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });
        let shutdown = CancellationToken::new();
        let mut workers = spawn_workers(Arc::clone(&queue), handler.clone(), 3, shutdown.clone());

        // Give workers a chance to drain the five seeded requests.
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_and_join(&queue, &mut workers, &shutdown, Duration::from_secs(1)).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn wait_idle_returns_once_group_drains() {
        let queue = Arc::new(RequestQueue::new());
        queue.enqueue(group("web"), RequestKind::Start);
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });
        let shutdown = CancellationToken::new();
        let mut workers = spawn_workers(Arc::clone(&queue), handler, 1, shutdown.clone());

        queue.wait_idle(&group("web")).await;
        assert!(queue.is_idle(&group("web")));

        shutdown_and_join(&queue, &mut workers, &shutdown, Duration::from_secs(1)).await;
    }
}
