use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use crate::context::CancellationToken;
use crate::executor::SharedExecutor;
use crate::job::{JobTracker, TaskHooks};

/// Unique, positive identifier of an indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexerId(pub NonZeroU32);

impl fmt::Display for IndexerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic job identifier, assigned by [`crate::scheduler::Scheduler::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Monotonic task identifier, unique for the lifetime of one scheduler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

/// Immutable snapshot handed to the scheduler describing one remote indexer.
///
/// The scheduler never mutates this; callers own its lifetime and are expected to keep
/// it alive at least as long as any task referring to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerDescriptor {
    pub id: IndexerId,
    pub name: String,
    pub hourly_request_limit: Option<NonZeroU32>,
    pub daily_request_limit: Option<NonZeroU32>,
}

impl IndexerDescriptor {
    pub fn new(id: u32, name: impl Into<String>) -> Option<Self> {
        Some(Self {
            id: IndexerId(NonZeroU32::new(id)?),
            name: name.into(),
            hourly_request_limit: None,
            daily_request_limit: None,
        })
    }

    pub fn with_hourly_limit(mut self, limit: u32) -> Self {
        self.hourly_request_limit = NonZeroU32::new(limit);
        self
    }

    pub fn with_daily_limit(mut self, limit: u32) -> Self {
        self.daily_request_limit = NonZeroU32::new(limit);
        self
    }
}

/// Priority band a task is dispatched under.
///
/// Ordered so that `Priority::Interactive < Priority::Background` holds, matching the
/// heap's "smaller value = higher priority" rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Interactive = 0,
    Rss = 1,
    Completion = 2,
    #[default]
    Background = 3,
}

/// Per-call rate-limiter tuning.
#[derive(Debug, Clone, Default)]
pub struct RateLimitOptions {
    pub priority: Priority,
    /// Overrides the limiter's base interval for this call only.
    pub min_interval: Option<Duration>,
    /// Duration budget above which the task is failed rather than queued.
    ///
    /// `None` means "use the priority default";
    /// `Some(Duration::ZERO)` means "queue indefinitely."
    pub max_wait: Option<Duration>,
}

/// Caller-supplied metadata carried alongside a search.
#[derive(Debug, Clone, Default)]
pub struct SearchContext {
    pub rate_limit: RateLimitOptions,
    pub scope: String,
    pub categories: Vec<u32>,
}

/// One indexer-search attempt, created once per indexer per `Submit`.
pub struct Task {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub indexer: Arc<IndexerDescriptor>,
    pub params: Arc<HashMap<String, String>>,
    pub meta: SearchContext,
    pub exec: SharedExecutor,
    pub ctx: CancellationToken,
    pub is_rss: bool,
    pub created_at: u64,
    pub tracker: Arc<JobTracker>,
    pub hooks: Option<Arc<dyn TaskHooks>>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("job_id", &self.job_id)
            .field("task_id", &self.task_id)
            .field("indexer", &self.indexer.id)
            .field("is_rss", &self.is_rss)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl Task {
    pub fn priority(&self) -> Priority {
        self.meta.rate_limit.priority
    }
}

/// Monotonic tick source used as `HeapItem`'s `createdAt` tiebreaker.
///
/// A tick counter rather than a wall-clock timestamp keeps tie-breaking stable and
/// test-deterministic without depending on clock resolution.
#[derive(Debug, Default)]
pub struct TickSource(AtomicU64);

impl TickSource {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, AtomicOrdering::Relaxed)
    }
}

/// Heap entry ordering key: `(priority, createdAt)`, smaller sorts first.
#[derive(Debug, PartialEq, Eq)]
pub struct HeapItem {
    pub task: Task,
}

impl HeapItem {
    fn key(&self) -> (Priority, u64) {
        (self.task.priority(), self.task.created_at)
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.task_id == other.task_id
    }
}
impl Eq for Task {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}
