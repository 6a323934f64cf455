//! # Torznab search scheduler
//!
//! A priority-aware, rate-limited scheduler for fanning a single search out across many
//! Torznab-style indexers.
//!
//! The scheduler itself never speaks HTTP and knows nothing about Torznab's wire
//! format; callers hand it an [`Executor`] that performs the actual per-indexer search,
//! and the scheduler's job is purely about *when* and *how often* that executor runs:
//! priority ordering, per-indexer rate limiting, in-flight serialization, RSS
//! deduplication, and panic-isolated delivery of results back to the caller.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use torznab_scheduler::*;
//!
//! # struct Callbacks;
//! # impl JobCallbacks for Callbacks {
//! #     fn on_complete(&self, _: JobId, _: Arc<IndexerDescriptor>, _: Result<ExecOutcome, SchedulerError>) {}
//! #     fn on_job_done(&self, _: JobId) {}
//! # }
//! # async fn run() {
//! let scheduler = Scheduler::new(SchedulerConfig::default());
//! let indexer = Arc::new(IndexerDescriptor::new(1, "example").unwrap());
//! let exec: SharedExecutor = Arc::new(|_ctx, _indexer, _params, _meta| async move {
//!     Ok::<_, ExecutorError>(ExecOutcome::default())
//! });
//!
//! scheduler
//!     .submit(
//!         vec![indexer],
//!         Arc::new(HashMap::new()),
//!         SearchContext::default(),
//!         exec,
//!         CancellationToken::new(),
//!         false,
//!         Arc::new(Callbacks),
//!         None,
//!     )
//!     .await
//!     .unwrap();
//! # }
//! ```

mod config;
mod context;
mod error;
mod executor;
mod heap;
mod job;
mod model;
mod rate_limiter;
mod scheduler;
mod worker;

pub use config::{Clock, SchedulerConfig, SchedulerConfigBuilder, SystemClock};
pub use context::{CancellationToken, RequestContext, ScopeOverride};
pub use error::{ExecutorError, SchedulerError, SubmitError};
pub use executor::{detect_rate_limit_signal, ExecOutcome, Executor, SharedExecutor};
pub use job::{JobCallbacks, TaskHooks};
pub use model::{
    IndexerDescriptor, IndexerId, JobId, Priority, RateLimitOptions, SearchContext, TaskId,
};
pub use scheduler::{Scheduler, SchedulerHandle};
