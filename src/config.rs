use std::time::{Duration, Instant};

use derive_builder::Builder;

use crate::model::Priority;

/// Default base interval between requests to the same indexer.
pub const DEFAULT_BASE_INTERVAL: Duration = Duration::from_secs(60);

/// Default coalescing-timer interval batching bursts of `Submit` calls.
pub const DEFAULT_COALESCE_INTERVAL: Duration = Duration::from_millis(5);

/// Default bound on a worker's intake queue.
pub const DEFAULT_WORKER_QUEUE_CAPACITY: usize = 32;

/// Default bound on the scheduler's submit channel.
pub const DEFAULT_SUBMIT_CHANNEL_CAPACITY: usize = 256;

/// Returns the priority multiplier applied to the base/override interval.
///
/// Interactive 0.1, RSS 0.5, Completion 0.7, Background 1.0.
pub fn priority_multiplier(priority: Priority) -> f64 {
    match priority {
        Priority::Interactive => 0.1,
        Priority::Rss => 0.5,
        Priority::Completion => 0.7,
        Priority::Background => 1.0,
    }
}

/// Returns the `MaxWait` default applied when a task leaves `MaxWait` unset.
///
/// `None` means "no limit, queue indefinitely."
pub fn default_max_wait(priority: Priority) -> Option<Duration> {
    match priority {
        Priority::Interactive => None,
        Priority::Rss => Some(Duration::from_secs(15)),
        Priority::Completion => None,
        Priority::Background => Some(Duration::from_secs(60)),
    }
}

/// Tunables for a [`crate::scheduler::Scheduler`] instance.
///
/// Everything here defaults to the documented constants; embedders and tests may
/// override any of them, most commonly `coalesce_interval` and the queue capacities.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into), build_fn(name = "try_build"))]
pub struct SchedulerConfig {
    /// Base interval between requests to the same indexer, before priority scaling and
    /// before any per-call `MinInterval` override.
    #[builder(default = "DEFAULT_BASE_INTERVAL")]
    pub base_interval: Duration,
    /// How long the loop waits to batch bursts of `Submit` calls into one dispatch pass.
    #[builder(default = "DEFAULT_COALESCE_INTERVAL")]
    pub coalesce_interval: Duration,
    /// Bound on each indexer worker's intake channel.
    #[builder(default = "DEFAULT_WORKER_QUEUE_CAPACITY")]
    pub worker_queue_capacity: usize,
    /// Bound on the scheduler's submit channel.
    #[builder(default = "DEFAULT_SUBMIT_CHANNEL_CAPACITY")]
    pub submit_channel_capacity: usize,
}

impl SchedulerConfigBuilder {
    /// Build the config, falling back to defaults for anything unset.
    pub fn build(&self) -> SchedulerConfig {
        self.try_build().expect("SchedulerConfig fields all have defaults")
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfigBuilder::default().build()
    }
}

/// A source of "now," abstracted so rate-limit tests can drive time deterministically
/// instead of depending on wall-clock sleeps.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Instant;
}

/// The real clock, backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
