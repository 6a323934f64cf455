use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{info_span, warn};

use crate::error::SchedulerError;
use crate::executor::ExecOutcome;
use crate::model::{IndexerDescriptor, JobId};
use crate::context::CancellationToken;
use crate::model::IndexerId;
use crate::scheduler::SchedulerHandle;

/// Optional per-task lifecycle hooks.
///
/// Distinct from [`JobCallbacks`]: hooks are per-task and run on the worker itself, not
/// spawned onto a fresh task, so an implementation should be quick and must not panic,
/// though a panic here is still caught and swallowed the same as in `exec`.
/// Both methods default to no-ops so embedders only override what they need.
pub trait TaskHooks: Send + Sync {
    /// Runs immediately before `exec`. Returning `Some` replaces the task's own
    /// cancellation token for the duration of the call, letting a caller impose an
    /// additional cancellation source (e.g. a deadline) without the scheduler knowing.
    fn on_start(&self, _job_id: JobId, _indexer_id: IndexerId) -> Option<CancellationToken> {
        None
    }

    /// Runs immediately after `exec` returns, before the outcome is handed to
    /// [`JobTracker::complete`].
    fn on_done(&self, _job_id: JobId, _indexer_id: IndexerId, _err: Option<&SchedulerError>) {}
}

/// The two callback hooks a caller supplies at `Submit` time.
///
/// `on_complete` fires once per task, `on_job_done` exactly once per job, after every
/// `on_complete` for that job has returned. Both are invoked on a fresh Tokio
/// task so a slow or panicking callback never blocks the scheduler loop or a worker.
pub trait JobCallbacks: Send + Sync {
    fn on_complete(
        &self,
        job_id: JobId,
        indexer: Arc<IndexerDescriptor>,
        outcome: Result<ExecOutcome, SchedulerError>,
    );

    fn on_job_done(&self, job_id: JobId);
}

/// Per-submission state: remaining task count and the caller's callbacks.
///
/// Shared by every `Task` belonging to one job via `Arc`. `OnJobDone` fires exactly once,
/// guarded by a lock rather than a second atomic so the "already fired" check and the
/// scheduler-table removal happen together.
pub struct JobTracker {
    job_id: JobId,
    total_tasks: usize,
    completed: AtomicUsize,
    callbacks: Arc<dyn JobCallbacks>,
    done_fired: Mutex<bool>,
    scheduler: Option<SchedulerHandle>,
}

impl JobTracker {
    pub fn new(
        job_id: JobId,
        total_tasks: usize,
        callbacks: Arc<dyn JobCallbacks>,
        scheduler: SchedulerHandle,
    ) -> Arc<Self> {
        let tracker = Arc::new(Self {
            job_id,
            total_tasks,
            completed: AtomicUsize::new(0),
            callbacks,
            done_fired: Mutex::new(false),
            scheduler: Some(scheduler),
        });
        if total_tasks == 0 {
            tracker.finish_if_done();
        }
        tracker
    }

    #[cfg(test)]
    pub fn new_for_test(job_id: JobId, total_tasks: usize) -> Arc<Self> {
        struct Noop;
        impl JobCallbacks for Noop {
            fn on_complete(&self, _: JobId, _: Arc<IndexerDescriptor>, _: Result<ExecOutcome, SchedulerError>) {}
            fn on_job_done(&self, _: JobId) {}
        }
        Arc::new(Self {
            job_id,
            total_tasks,
            completed: AtomicUsize::new(0),
            callbacks: Arc::new(Noop),
            done_fired: Mutex::new(false),
            scheduler: None,
        })
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Delivers a task's outcome via `OnComplete` on a fresh Tokio task, then decrements
    /// the remaining-task count and fires `OnJobDone` once it reaches zero.
    ///
    /// Awaits the `OnComplete` task's own completion before checking the remaining count,
    /// so that when this is the job's last task, `OnJobDone` is never spawned until that
    /// `OnComplete` invocation has actually returned. Two independently spawned tasks have
    /// no relative ordering guarantee on a multi-thread runtime, so this is the only way to
    /// keep `OnJobDone` happening strictly after every `OnComplete` for the job.
    pub async fn complete(
        self: &Arc<Self>,
        indexer: Arc<IndexerDescriptor>,
        outcome: Result<ExecOutcome, SchedulerError>,
    ) {
        let job_id = self.job_id;
        let span = info_span!("on_complete", job_id = %job_id, indexer_id = %indexer.id);
        let callbacks = self.callbacks.clone();
        // Span guards must not be held across an `.await`, so entering it only covers the
        // spawn call itself.
        let on_complete = {
            let _enter = span.enter();
            tokio::spawn(async move {
                let result = std::panic::AssertUnwindSafe(|| {
                    callbacks.on_complete(job_id, indexer, outcome);
                });
                if let Err(payload) = std::panic::catch_unwind(result) {
                    warn!(
                        job_id = %job_id,
                        panic = %panic_message(&payload),
                        "OnComplete callback panicked; swallowing"
                    );
                }
            })
        };

        let remaining = self.total_tasks - self.completed.fetch_add(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            let _ = on_complete.await;
            self.finish_if_done();
        }
    }

    fn finish_if_done(self: &Arc<Self>) {
        let mut fired = self.done_fired.lock();
        if *fired {
            return;
        }
        *fired = true;
        drop(fired);

        let callbacks = self.callbacks.clone();
        let job_id = self.job_id;
        let scheduler = self.scheduler.clone();
        tokio::spawn(async move {
            let result = std::panic::AssertUnwindSafe(|| {
                callbacks.on_job_done(job_id);
            });
            if let Err(payload) = std::panic::catch_unwind(result) {
                warn!(
                    job_id = %job_id,
                    panic = %panic_message(&payload),
                    "OnJobDone callback panicked; swallowing"
                );
            }
            if let Some(scheduler) = scheduler {
                scheduler.forget_job(job_id);
            }
        });
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
