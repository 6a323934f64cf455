use std::panic::AssertUnwindSafe;

use tokio::sync::mpsc;
use tracing::{info_span, warn};

use crate::error::{ExecutorError, SchedulerError};
use crate::executor::detect_rate_limit_signal;
use crate::model::Task;
use crate::scheduler::SchedulerHandle;

/// A running indexer worker's intake channel. One worker exists per indexer that has
/// ever had a task dispatched to it; tasks for the same indexer are always handed to
/// the same worker, so they execute strictly serially.
pub struct WorkerHandle {
    pub sender: mpsc::Sender<Task>,
}

/// Spawns a worker loop bound to one indexer and returns a handle to its queue.
pub fn spawn_worker(scheduler: SchedulerHandle, queue_capacity: usize) -> WorkerHandle {
    let (sender, receiver) = mpsc::channel(queue_capacity);
    tokio::spawn(worker_loop(scheduler, receiver));
    WorkerHandle { sender }
}

async fn worker_loop(scheduler: SchedulerHandle, mut receiver: mpsc::Receiver<Task>) {
    while let Some(task) = receiver.recv().await {
        let indexer_id = task.indexer.id;
        let is_rss = task.is_rss;
        run_one(&task, &scheduler).await;
        scheduler.on_task_finished(indexer_id, is_rss);
    }
}

/// Runs `onStart`/`exec`/`onDone` for a single task, isolating panics in any of the
/// three from taking down the worker.
async fn run_one(task: &Task, scheduler: &SchedulerHandle) {
    let span = info_span!("worker_task", job_id = %task.job_id, indexer_id = %task.indexer.id);
    let _enter = span.enter();

    let override_ctx = task.hooks.as_ref().and_then(|hooks| {
        let job_id = task.job_id;
        let indexer_id = task.indexer.id;
        match std::panic::catch_unwind(AssertUnwindSafe(|| hooks.on_start(job_id, indexer_id))) {
            Ok(ctx) => ctx,
            Err(payload) => {
                warn!(panic = %panic_message(&payload), "onStart hook panicked; swallowing");
                None
            }
        }
    });
    let ctx = override_ctx.unwrap_or_else(|| task.ctx.clone());

    if !task.is_rss && ctx.is_cancelled() {
        finish(task, Err(SchedulerError::ContextCanceled)).await;
        return;
    }

    let exec = task.exec.clone();
    let run_ctx = ctx.clone();
    let indexer = task.indexer.clone();
    let params = task.params.clone();
    let meta = task.meta.clone();
    let join = tokio::spawn(async move { exec.run(run_ctx, indexer, params, meta).await }).await;

    let outcome = match join {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(err)) => Err(SchedulerError::Executor(err)),
        Err(join_err) if join_err.is_panic() => {
            let payload = join_err.into_panic();
            let message = panic_message(&payload);
            warn!(panic = %message, "exec panicked; recovering");
            Err(SchedulerError::ExecutorPanic { message })
        }
        Err(_) => Err(SchedulerError::Executor(ExecutorError::Canceled)),
    };

    if let Err(SchedulerError::Executor(ExecutorError::Remote(text))) = &outcome {
        if let Some(cooldown) = detect_rate_limit_signal(text) {
            scheduler.apply_rate_limit_signal(task.indexer.id, cooldown);
        }
    }

    finish(task, outcome).await;
}

async fn finish(task: &Task, outcome: Result<crate::executor::ExecOutcome, SchedulerError>) {
    if let Some(hooks) = &task.hooks {
        let job_id = task.job_id;
        let indexer_id = task.indexer.id;
        let err_ref = outcome.as_ref().err();
        if let Err(payload) =
            std::panic::catch_unwind(AssertUnwindSafe(|| hooks.on_done(job_id, indexer_id, err_ref)))
        {
            warn!(panic = %panic_message(&payload), "onDone hook panicked; swallowing");
        }
    }
    task.tracker.complete(task.indexer.clone(), outcome).await;
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
