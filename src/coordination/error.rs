//! # Error Types
//!
//! Two layers of failure exist in this crate:
//!
//! ```text
//!     ToolkitError ──► protocol violations, stalls, timeouts, dead components
//!          │            (returned from caller-facing operations)
//!          │
//!     JobFailure ────► a single job went wrong inside a worker
//!                      (carried inside the JobResult, the pool keeps running)
//! ```

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the caller-facing operations of every component.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolkitError {
    /// A configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// A job was submitted after the input queue was closed.
    #[error("job queue is closed")]
    QueueClosed,

    /// The input queue was closed twice.
    #[error("job queue was already closed")]
    AlreadyClosed,

    /// The operation observed a cancellation signal.
    #[error("operation cancelled")]
    Cancelled,

    /// The state actor exited before answering.
    #[error("state actor has stopped")]
    ActorStopped,

    /// The limiter's refill thread is gone, so no token will ever arrive.
    #[error("rate limiter has stopped issuing tokens")]
    LimiterStopped,

    /// A bounded wait elapsed.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// A consumer or producer waited on a pool that could make no progress.
    #[error("stalled: waited {waited:?} on a pool that made no progress")]
    Stalled {
        /// How long the caller sat idle before giving up.
        waited: Duration,
    },

    /// A multi-way wait was asked to wait on nothing.
    #[error("select has no sources to wait on")]
    NoSources,

    /// The OS refused to start a thread.
    #[error("failed to spawn thread `{name}`: {reason}")]
    Spawn {
        /// Name the thread would have had.
        name: String,
        /// The underlying I/O error, rendered.
        reason: String,
    },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ToolkitError>;

/// Failure of a single job, reported inside its result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobFailure<E> {
    /// The handler returned an error.
    #[error("job failed: {0}")]
    Failed(E),

    /// The handler panicked; the payload message is kept.
    #[error("job panicked: {0}")]
    Panicked(String),
}

impl<E> JobFailure<E> {
    /// Returns true if the handler panicked rather than returning an error.
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }
}
