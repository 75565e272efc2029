//! Wraps per-group distributed lock acquisition with the retry-then-surface
//! discipline transient lock/network errors get: retry with backoff,
//! then surface.

use std::time::Duration;

use rgm_core::GroupName;
use rgm_error::RgmError;
use rgm_resilience::{retry_with_backoff, ResilienceError, RetryConfig};

use crate::ports::{DistributedLock, LockHandle};
use crate::rg_state::RgStateRecord;

/// Acquires `group`'s distributed lock, retrying transient failures under
/// `retry` before surfacing a [`RgmError::Transient`].
///
/// A single acquisition attempt still honors `deadline` (passed through to
/// [`DistributedLock::lock`]); `retry` governs how many such attempts are
/// made and how long to wait between them.
pub async fn acquire_with_retry(
    lock: &dyn DistributedLock,
    group: &GroupName,
    deadline: Duration,
    retry: RetryConfig,
) -> Result<LockHandle, RgmError> {
    retry_with_backoff(retry, || lock.lock(group, deadline))
        .await
        .map_err(|err| match err {
            ResilienceError::RetriesExhausted { source, .. } => source,
            ResilienceError::CircuitOpen => RgmError::Transient {
                service: "lock",
                message: "circuit open".into(),
            },
        })
}
