use std::time::Duration;

use crate::model::{IndexerId, Priority};

/// The four-way error taxonomy delivered to callers through `OnComplete`.
///
/// Every indexer-level failure surfaces as one of these variants;
/// none of them is fatal to the scheduler itself.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulerError {
    /// The task's required rate-limit wait exceeded its `MaxWait` budget.
    #[error(
        "rate limit wait for indexer {indexer_name} ({indexer_id}) would be {wait:?}, exceeding max wait {max_wait:?}"
    )]
    RateLimitWait {
        indexer_id: IndexerId,
        indexer_name: String,
        wait: Duration,
        max_wait: Duration,
        priority: Priority,
    },
    /// The caller's context was cancelled before or during execution.
    #[error("context cancelled")]
    ContextCanceled,
    /// `exec` returned an error.
    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),
    /// `exec`, `onStart`, or `onDone` panicked. The panic payload is captured as text
    /// where possible; the worker remains alive regardless.
    #[error("executor panicked: {message}")]
    ExecutorPanic { message: String },
}

/// Error returned by an `Executor::run` call, independent of any transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutorError {
    /// A remote/transport-level failure. The text is inspected by
    /// [`crate::executor::detect_rate_limit_signal`] for rate-limit signatures.
    #[error("{0}")]
    Remote(String),
    /// The caller's context was cancelled while `exec` was running.
    #[error("context cancelled during execution")]
    Canceled,
}

/// Faults that can occur at `Submit` time, before a task is ever enqueued.
///
/// Per-indexer faults are never reported here; they always go through `OnComplete`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubmitError {
    /// The caller's context was already cancelled when `submit` was called.
    #[error("context cancelled before enqueue")]
    ContextCanceled,
    /// The scheduler's loop has already shut down.
    #[error("scheduler is shut down")]
    SchedulerStopped,
}
