//! Retry, backoff, and deadline handling for the engine's external
//! collaborators: distributed lock, config store, membership, transport,
//! agent invocation.
//!
//! Lock and network failures are classified as *transient*: retry with
//! backoff, then surface. Every lock acquisition and agent invocation
//! gets a configurable deadline, exceeding which fails the operation.
//! This crate provides both primitives plus a circuit breaker, trimmed
//! to retry, deadline, and breaker only — this system has no need for
//! rate limiting or bulkheads.

mod backoff;
mod breaker;
mod deadline;

pub use backoff::{retry_with_backoff, RetryConfig};
pub use breaker::{CircuitBreaker, CircuitBreakerConfig, State};
pub use deadline::{with_deadline, DeadlineError};

/// Errors produced by the retry primitive.
#[derive(Debug, thiserror::Error)]
pub enum ResilienceError<E: std::fmt::Debug> {
    /// All retry attempts were exhausted.
    #[error("retries exhausted after {attempts} attempts: {source:?}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last underlying error.
        source: E,
    },

    /// The circuit breaker is open; the operation was not attempted.
    #[error("circuit breaker is open")]
    CircuitOpen,
}
