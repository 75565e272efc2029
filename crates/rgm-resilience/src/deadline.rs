//! Deadline enforcement for blocking external calls.

use std::future::Future;
use std::time::Duration;

/// Outcome of running an operation under [`with_deadline`].
#[derive(Debug, thiserror::Error)]
pub enum DeadlineError<E> {
    /// The operation itself failed before the deadline.
    #[error(transparent)]
    Failed(E),

    /// The deadline elapsed before the operation completed.
    #[error("operation exceeded its deadline of {0:?}")]
    Exceeded(Duration),
}

/// Run `op`, failing with [`DeadlineError::Exceeded`] if it has not
/// completed within `timeout`, or [`DeadlineError::Failed`] if it completes
/// but returns an error.
///
/// Every distributed-lock acquisition and every agent invocation has a
/// configurable deadline; exceeding it transitions the group to `FAILED`.
/// This function enforces the deadline; mapping the resulting error to a
/// `FAILED` transition is the caller's job (see `rgm-state::state`).
pub async fn with_deadline<T, E, Fut>(timeout: Duration, op: Fut) -> Result<T, DeadlineError<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(timeout, op).await {
        Ok(result) => result.map_err(DeadlineError::Failed),
        Err(_elapsed) => Err(DeadlineError::Exceeded(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn completes_within_deadline() {
        let result: Result<u32, DeadlineError<()>> =
            with_deadline(Duration::from_secs(1), async { Ok::<u32, ()>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn exceeds_deadline() {
        let result: Result<u32, DeadlineError<()>> = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<u32, ()>(7)
        })
        .await;

        assert!(matches!(
            result.unwrap_err(),
            DeadlineError::Exceeded(d) if d == Duration::from_millis(10)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn propagates_inner_failure() {
        let result: Result<u32, DeadlineError<&str>> =
            with_deadline(Duration::from_secs(1), async { Err("bad agent") }).await;

        assert!(matches!(result.unwrap_err(), DeadlineError::Failed("bad agent")));
    }
}
