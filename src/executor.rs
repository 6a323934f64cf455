use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::context::CancellationToken;
use crate::error::ExecutorError;
use crate::model::{IndexerDescriptor, SearchContext};
use std::collections::HashMap;

/// What a single indexer search produced: the opaque result payload plus the coverage
/// contribution for this task.
#[derive(Debug, Clone, Default)]
pub struct ExecOutcome {
    /// Opaque per-indexer results; the scheduler never inspects these.
    pub results: Vec<serde_json::Value>,
    /// Indexer IDs this attempt should count toward the job's coverage set. In the
    /// common case this is just the indexer the task targeted, but `exec` may report
    /// additional coverage (e.g. an aggregator indexer fanning out internally).
    pub coverage: Vec<u32>,
}

/// The out-of-scope collaborator the scheduler hands every ready task to: an opaque
/// `exec(ctx, indexer, params, meta) -> (results, coverage, error)` call.
///
/// Implement this (or pass a closure, see the blanket impl below) to wire the scheduler
/// up to a real Torznab HTTP client; the scheduler core never implements transport itself.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(
        &self,
        ctx: CancellationToken,
        indexer: Arc<IndexerDescriptor>,
        params: Arc<HashMap<String, String>>,
        meta: SearchContext,
    ) -> Result<ExecOutcome, ExecutorError>;
}

pub type SharedExecutor = Arc<dyn Executor>;

/// Blanket impl so a plain async closure can be passed to `Submit` without a caller
/// having to name an `Executor` type.
#[async_trait]
impl<F, Fut> Executor for F
where
    F: Fn(CancellationToken, Arc<IndexerDescriptor>, Arc<HashMap<String, String>>, SearchContext) -> Fut
        + Send
        + Sync,
    Fut: std::future::Future<Output = Result<ExecOutcome, ExecutorError>> + Send,
{
    async fn run(
        &self,
        ctx: CancellationToken,
        indexer: Arc<IndexerDescriptor>,
        params: Arc<HashMap<String, String>>,
        meta: SearchContext,
    ) -> Result<ExecOutcome, ExecutorError> {
        (self)(ctx, indexer, params, meta).await
    }
}

/// Default cooldown applied when an exec error carries a rate-limit signature but no
/// parseable `retry-after`.
pub const DEFAULT_RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(30 * 60);

/// Inspects the textual form of an exec error for rate-limit signatures and returns the
/// cooldown that should be applied, if any.
///
/// Matches `"429"`, `"rate limit"`, `"too many requests"` case-insensitively. When a
/// `retry-after: <seconds>` fragment is present its value is used instead of the default
/// 30-minute cooldown.
pub fn detect_rate_limit_signal(error_text: &str) -> Option<Duration> {
    let lower = error_text.to_ascii_lowercase();
    let is_rate_limited =
        lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests");
    if !is_rate_limited {
        return None;
    }

    Some(parse_retry_after(&lower).unwrap_or(DEFAULT_RATE_LIMIT_COOLDOWN))
}

fn parse_retry_after(lower: &str) -> Option<Duration> {
    let marker = "retry-after:";
    let start = lower.find(marker)? + marker.len();
    let rest = lower[start..].trim_start();
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<u64>().ok().map(Duration::from_secs)
}
