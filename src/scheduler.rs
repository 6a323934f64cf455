use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, info_span, warn};

use crate::config::{Clock, SchedulerConfig, SystemClock};
use crate::context::CancellationToken;
use crate::error::{SchedulerError, SubmitError};
use crate::executor::SharedExecutor;
use crate::heap::PriorityHeap;
use crate::job::{JobCallbacks, JobTracker, TaskHooks};
use crate::model::{IndexerDescriptor, IndexerId, JobId, SearchContext, Task, TaskId, TickSource};
use crate::rate_limiter::RateLimiter;
use crate::worker::{self, WorkerHandle};

/// Everything the dispatch loop mutates, behind a single synchronous lock.
///
/// Plain `parking_lot::Mutex` rather than `tokio::sync::Mutex`: nothing here is ever
/// held across an `.await`, so the synchronous lock avoids the async-mutex's extra
/// bookkeeping.
struct SchedulerState {
    heap: PriorityHeap,
    /// Indexers with an RSS task already enqueued or in flight; a second RSS `Submit`
    /// for the same indexer is dropped rather than queued again.
    pending_rss: HashSet<IndexerId>,
    /// Indexers with a task currently running on their worker.
    in_flight: HashSet<IndexerId>,
    workers: HashMap<IndexerId, WorkerHandle>,
    jobs: HashMap<JobId, Arc<JobTracker>>,
    next_task_id: u64,
}

impl SchedulerState {
    fn new() -> Self {
        Self {
            heap: PriorityHeap::new(),
            pending_rss: HashSet::new(),
            in_flight: HashSet::new(),
            workers: HashMap::new(),
            jobs: HashMap::new(),
            next_task_id: 1,
        }
    }
}

/// One accepted `Submit` call, carried across the submit channel to the dispatch loop so
/// the heap/job table are only ever touched from that one task.
struct SubmitRequest {
    job_id: JobId,
    indexers: Vec<Arc<IndexerDescriptor>>,
    params: Arc<HashMap<String, String>>,
    meta: SearchContext,
    exec: SharedExecutor,
    ctx: CancellationToken,
    is_rss: bool,
    callbacks: Arc<dyn JobCallbacks>,
    hooks: Option<Arc<dyn TaskHooks>>,
}

/// A cheap, cloneable reference back into a running [`Scheduler`], handed to
/// [`JobTracker`]s and workers so they can report back without owning the scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Arc<Shared>,
}

struct Shared {
    state: Mutex<SchedulerState>,
    wake_up: Notify,
    rate_limiter: RateLimiter,
    config: SchedulerConfig,
    tick: TickSource,
    next_job_id: AtomicU64,
}

impl SchedulerHandle {
    /// Removes a finished job's tracker from the scheduler's table.
    pub fn forget_job(&self, job_id: JobId) {
        self.inner.state.lock().jobs.remove(&job_id);
    }

    /// Called by a worker once a task finishes, clearing in-flight/RSS-pending state
    /// and waking the dispatch loop so the freed indexer can be reconsidered.
    pub fn on_task_finished(&self, indexer_id: IndexerId, was_rss: bool) {
        {
            let mut state = self.inner.state.lock();
            state.in_flight.remove(&indexer_id);
            if was_rss {
                state.pending_rss.remove(&indexer_id);
            }
        }
        self.inner.wake_up.notify_one();
    }

    /// Reports an exec error's text to the rate limiter so a detected rate-limit
    /// signature becomes a cooldown.
    pub fn apply_rate_limit_signal(&self, indexer_id: IndexerId, cooldown: Duration) {
        let until = self.inner.rate_limiter.clock_now() + cooldown;
        self.inner.rate_limiter.set_cooldown(indexer_id, until);
    }
}

/// The Torznab search scheduler: accepts jobs via [`Scheduler::submit`], fans each job
/// out into one [`Task`] per indexer, and dispatches tasks to per-indexer workers
/// subject to priority ordering, rate limiting, and in-flight serialization.
pub struct Scheduler {
    handle: SchedulerHandle,
    stop_tx: mpsc::Sender<()>,
    submit_tx: mpsc::Sender<SubmitRequest>,
}

impl Scheduler {
    /// Starts a new scheduler with the default clock and spawns its dispatch loop.
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        let rate_limiter = RateLimiter::new(config.base_interval, clock);
        let submit_capacity = config.submit_channel_capacity;
        let inner = Arc::new(Shared {
            state: Mutex::new(SchedulerState::new()),
            wake_up: Notify::new(),
            rate_limiter,
            config,
            tick: TickSource::default(),
            next_job_id: AtomicU64::new(1),
        });
        let handle = SchedulerHandle { inner };
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (submit_tx, submit_rx) = mpsc::channel(submit_capacity);

        let loop_handle = handle.clone();
        tokio::spawn(async move {
            run_loop(loop_handle, stop_rx, submit_rx).await;
        });

        Self { handle, stop_tx, submit_tx }
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Enqueues one task per `indexers` entry for `job_id`'s callbacks, returning the
    /// assigned job ID.
    ///
    /// An empty `indexers` list is a valid, immediately-complete job: `JobTracker::new`
    /// fires `OnJobDone` from within this call in that case. A context already cancelled
    /// at submission time is rejected outright rather than enqueued and failed one task
    /// at a time.
    ///
    /// The request is handed to the dispatch loop over a channel bounded by
    /// `SchedulerConfig::submit_channel_capacity`; when that channel is full this call
    /// waits for room rather than touching scheduler state directly, and bails out early
    /// with `SubmitError::ContextCanceled` if `ctx` is cancelled while waiting. Once the
    /// scheduler has shut down the channel's receiving end is gone, and any further
    /// `submit` fails with `SubmitError::SchedulerStopped` instead of silently queuing a
    /// job nobody will ever dispatch.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit(
        &self,
        indexers: Vec<Arc<IndexerDescriptor>>,
        params: Arc<HashMap<String, String>>,
        meta: SearchContext,
        exec: SharedExecutor,
        ctx: CancellationToken,
        is_rss: bool,
        callbacks: Arc<dyn JobCallbacks>,
        hooks: Option<Arc<dyn TaskHooks>>,
    ) -> Result<JobId, SubmitError> {
        if ctx.is_cancelled() {
            return Err(SubmitError::ContextCanceled);
        }

        let job_id = JobId(self.handle.inner.next_job_id.fetch_add(1, AtomicOrdering::SeqCst));
        let request = SubmitRequest {
            job_id,
            indexers,
            params,
            meta,
            exec,
            ctx: ctx.clone(),
            is_rss,
            callbacks,
            hooks,
        };

        tokio::select! {
            sent = self.submit_tx.send(request) => {
                sent.map_err(|_| SubmitError::SchedulerStopped)?;
            }
            _ = ctx.cancelled() => {
                return Err(SubmitError::ContextCanceled);
            }
        }

        Ok(job_id)
    }

    /// Signals the dispatch loop to stop. Tasks already dispatched to a worker run to
    /// completion; anything still queued in the heap is dropped.
    pub async fn shutdown(&self) {
        let _ = self.stop_tx.send(()).await;
    }
}

async fn run_loop(
    handle: SchedulerHandle,
    mut stop_rx: mpsc::Receiver<()>,
    mut submit_rx: mpsc::Receiver<SubmitRequest>,
) {
    let coalesce = handle.inner.config.coalesce_interval;
    let mut retry_at: Option<tokio::time::Instant> = None;

    loop {
        let sleep = match retry_at {
            Some(at) => tokio::time::sleep_until(at),
            None => tokio::time::sleep(Duration::from_secs(3600)),
        };
        tokio::pin!(sleep);

        tokio::select! {
            _ = stop_rx.recv() => {
                info!("scheduler loop stopping");
                return;
            }
            Some(request) = submit_rx.recv() => {
                insert_submission(&handle, request);
                // Drain any other submits already queued up so one wakeup dispatches
                // the whole burst rather than looping once per submit.
                while let Ok(request) = submit_rx.try_recv() {
                    insert_submission(&handle, request);
                }
            }
            _ = handle.inner.wake_up.notified() => {}
            _ = &mut sleep, if retry_at.is_some() => {}
        }

        if !coalesce.is_zero() {
            tokio::time::sleep(coalesce).await;
        }

        retry_at = dispatch_pass(&handle).await;
    }
}

/// Applies one accepted `Submit` call to scheduler state: fans it out into one task per
/// accepted indexer, registers the job's tracker, and pushes every task onto the heap.
fn insert_submission(handle: &SchedulerHandle, request: SubmitRequest) {
    let SubmitRequest { job_id, indexers, params, meta, exec, ctx, is_rss, callbacks, hooks } = request;

    let mut state = handle.inner.state.lock();

    let mut accepted = Vec::with_capacity(indexers.len());
    for indexer in indexers {
        if is_rss && !state.pending_rss.insert(indexer.id) {
            // Already has an RSS task pending or in flight; silently dropped.
            continue;
        }
        accepted.push(indexer);
    }

    let tracker = JobTracker::new(job_id, accepted.len(), callbacks, handle.clone());

    for indexer in accepted {
        let task_id = TaskId(state.next_task_id);
        state.next_task_id += 1;
        let created_at = handle.inner.tick.next();
        let task = Task {
            job_id,
            task_id,
            indexer,
            params: params.clone(),
            meta: meta.clone(),
            exec: exec.clone(),
            ctx: ctx.clone(),
            is_rss,
            created_at,
            tracker: tracker.clone(),
            hooks: hooks.clone(),
        };
        state.heap.push(task);
    }

    state.jobs.insert(job_id, tracker);
    drop(state);
    handle.inner.wake_up.notify_one();
}

/// One pass over the heap: pop every ready task and either dispatch it or re-queue it
/// for a later pass.
async fn dispatch_pass(handle: &SchedulerHandle) -> Option<tokio::time::Instant> {
    let span = info_span!("dispatch_pass");
    let _enter = span.enter();

    let mut deferred = Vec::new();
    let mut next_retry: Option<Duration> = None;

    loop {
        let task = {
            let mut state = handle.inner.state.lock();
            state.heap.pop()
        };
        let Some(task) = task else { break };

        if !task.is_rss && task.ctx.is_cancelled() {
            debug!(job_id = %task.job_id, task_id = ?task.task_id, "dropping cancelled task");
            complete_with(task, Err(SchedulerError::ContextCanceled)).await;
            continue;
        }

        let indexer_id = task.indexer.id;
        let already_in_flight = {
            let state = handle.inner.state.lock();
            state.in_flight.contains(&indexer_id)
        };
        if already_in_flight {
            deferred.push(task);
            continue;
        }

        let wait = handle.inner.rate_limiter.next_wait(
            indexer_id,
            &task.meta.rate_limit,
            task.indexer.hourly_request_limit.map(|n| n.get()),
            task.indexer.daily_request_limit.map(|n| n.get()),
        );

        if !wait.is_zero() {
            let effective_max_wait = task
                .meta
                .rate_limit
                .max_wait
                .or_else(|| crate::config::default_max_wait(task.priority()));

            match effective_max_wait {
                Some(max_wait) if !max_wait.is_zero() && wait > max_wait => {
                    warn!(
                        indexer_id = %indexer_id,
                        wait = ?wait,
                        max_wait = ?max_wait,
                        "rate limit wait exceeds max wait"
                    );
                    let err = SchedulerError::RateLimitWait {
                        indexer_id,
                        indexer_name: task.indexer.name.clone(),
                        wait,
                        max_wait,
                        priority: task.priority(),
                    };
                    let is_rss = task.is_rss;
                    complete_with(task, Err(err)).await;
                    if is_rss {
                        handle.inner.state.lock().pending_rss.remove(&indexer_id);
                    }
                    continue;
                }
                _ => {
                    next_retry = Some(match next_retry {
                        Some(current) => current.min(wait),
                        None => wait,
                    });
                    deferred.push(task);
                    continue;
                }
            }
        }

        handle.inner.rate_limiter.record_request(indexer_id, handle.inner.rate_limiter.clock_now());

        let worker = get_or_spawn_worker(handle, &task);
        {
            let mut state = handle.inner.state.lock();
            state.in_flight.insert(indexer_id);
        }

        match worker.try_send(task) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(task)) => {
                handle.inner.state.lock().in_flight.remove(&indexer_id);
                deferred.push(task);
                // Backpressure: this worker's queue is saturated, stop the pass rather
                // than spin through the rest of the heap.
                break;
            }
            Err(mpsc::error::TrySendError::Closed(task)) => {
                handle.inner.state.lock().in_flight.remove(&indexer_id);
                let is_rss = task.is_rss;
                complete_with(task, Err(SchedulerError::ContextCanceled)).await;
                if is_rss {
                    handle.inner.state.lock().pending_rss.remove(&indexer_id);
                }
            }
        }
    }

    if !deferred.is_empty() {
        let mut state = handle.inner.state.lock();
        for task in deferred {
            state.heap.push(task);
        }
    }

    next_retry.map(|d| tokio::time::Instant::now() + d)
}

async fn complete_with(task: Task, outcome: Result<crate::executor::ExecOutcome, SchedulerError>) {
    task.tracker.complete(task.indexer.clone(), outcome).await;
}

fn get_or_spawn_worker(handle: &SchedulerHandle, task: &Task) -> mpsc::Sender<Task> {
    let indexer_id = task.indexer.id;
    let mut state = handle.inner.state.lock();
    if let Some(existing) = state.workers.get(&indexer_id) {
        return existing.sender.clone();
    }
    let capacity = handle.inner.config.worker_queue_capacity;
    let worker = worker::spawn_worker(handle.clone(), capacity);
    let sender = worker.sender.clone();
    state.workers.insert(indexer_id, worker);
    sender
}
