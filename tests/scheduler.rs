use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use torznab_scheduler::{
    CancellationToken, Clock, ExecOutcome, Executor, ExecutorError, IndexerDescriptor, JobCallbacks,
    JobId, Priority, RateLimitOptions, SchedulerConfig, SchedulerError, SearchContext,
};

#[derive(Debug, Default)]
struct ManualClock {
    offset_ms: AtomicU64,
    base: std::sync::OnceLock<Instant>,
}

impl ManualClock {
    fn advance(&self, ms: u64) {
        self.offset_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.base.get_or_init(Instant::now) + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

struct RecordingCallbacks {
    completions: Arc<Mutex<Vec<(String, bool)>>>,
    done: Arc<AtomicUsize>,
}

impl JobCallbacks for RecordingCallbacks {
    fn on_complete(
        &self,
        _job_id: JobId,
        indexer: Arc<IndexerDescriptor>,
        outcome: Result<ExecOutcome, SchedulerError>,
    ) {
        self.completions.lock().unwrap().push((indexer.name.clone(), outcome.is_ok()));
    }

    fn on_job_done(&self, _job_id: JobId) {
        self.done.fetch_add(1, Ordering::SeqCst);
    }
}

fn descriptor(id: u32, name: &str) -> Arc<IndexerDescriptor> {
    Arc::new(IndexerDescriptor::new(id, name).unwrap())
}

struct CountingExecutor {
    calls: AtomicUsize,
    delay: Duration,
}

#[async_trait]
impl Executor for CountingExecutor {
    async fn run(
        &self,
        _ctx: CancellationToken,
        indexer: Arc<IndexerDescriptor>,
        _params: Arc<HashMap<String, String>>,
        _meta: SearchContext,
    ) -> Result<ExecOutcome, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(ExecOutcome {
            results: vec![],
            coverage: vec![indexer.id.0.get()],
        })
    }
}

async fn wait_until(f: impl Fn() -> bool) {
    for _ in 0..200 {
        if f() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}

#[tokio::test]
async fn empty_job_fires_done_immediately() {
    let scheduler = torznab_scheduler::Scheduler::new(SchedulerConfig::default());
    let done = Arc::new(AtomicUsize::new(0));
    let callbacks = Arc::new(RecordingCallbacks {
        completions: Arc::new(Mutex::new(Vec::new())),
        done: done.clone(),
    });

    scheduler
        .submit(
            vec![],
            Arc::new(HashMap::new()),
            SearchContext::default(),
            Arc::new(CountingExecutor { calls: AtomicUsize::new(0), delay: Duration::ZERO }),
            CancellationToken::new(),
            false,
            callbacks,
            None,
        )
        .await
        .unwrap();

    wait_until(|| done.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn same_indexer_tasks_run_serially() {
    let scheduler = torznab_scheduler::Scheduler::new(SchedulerConfig::default());
    let exec = Arc::new(CountingExecutor {
        calls: AtomicUsize::new(0),
        delay: Duration::from_millis(30),
    });
    let done = Arc::new(AtomicUsize::new(0));
    let completions = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..3 {
        let callbacks = Arc::new(RecordingCallbacks {
            completions: completions.clone(),
            done: done.clone(),
        });
        scheduler
            .submit(
                vec![descriptor(1, "burst")],
                Arc::new(HashMap::new()),
                SearchContext {
                    rate_limit: RateLimitOptions {
                        priority: Priority::Interactive,
                        min_interval: Some(Duration::ZERO),
                        max_wait: None,
                    },
                    ..Default::default()
                },
                exec.clone(),
                CancellationToken::new(),
                false,
                callbacks,
                None,
            )
            .await
            .unwrap();
    }

    wait_until(|| done.load(Ordering::SeqCst) == 3).await;
    assert_eq!(exec.calls.load(Ordering::SeqCst), 3);
    assert_eq!(completions.lock().unwrap().len(), 3);
}

struct OrderRecordingExecutor {
    order: Arc<Mutex<Vec<u32>>>,
}

#[async_trait]
impl Executor for OrderRecordingExecutor {
    async fn run(
        &self,
        _ctx: CancellationToken,
        indexer: Arc<IndexerDescriptor>,
        _params: Arc<HashMap<String, String>>,
        _meta: SearchContext,
    ) -> Result<ExecOutcome, ExecutorError> {
        self.order.lock().unwrap().push(indexer.id.0.get());
        Ok(ExecOutcome {
            results: vec![],
            coverage: vec![indexer.id.0.get()],
        })
    }
}

#[tokio::test]
async fn higher_priority_task_on_a_different_indexer_runs_first() {
    let scheduler = torznab_scheduler::Scheduler::new(SchedulerConfig::default());
    let order = Arc::new(Mutex::new(Vec::new()));
    let exec = Arc::new(OrderRecordingExecutor { order: order.clone() });
    let done = Arc::new(AtomicUsize::new(0));

    let low_cb = Arc::new(RecordingCallbacks {
        completions: Arc::new(Mutex::new(Vec::new())),
        done: done.clone(),
    });
    scheduler
        .submit(
            vec![descriptor(1, "low-priority-indexer")],
            Arc::new(HashMap::new()),
            SearchContext {
                rate_limit: RateLimitOptions {
                    priority: Priority::Background,
                    ..Default::default()
                },
                ..Default::default()
            },
            exec.clone(),
            CancellationToken::new(),
            false,
            low_cb,
            None,
        )
        .await
        .unwrap();

    let high_cb = Arc::new(RecordingCallbacks {
        completions: Arc::new(Mutex::new(Vec::new())),
        done: done.clone(),
    });
    scheduler
        .submit(
            vec![descriptor(2, "high-priority-indexer")],
            Arc::new(HashMap::new()),
            SearchContext {
                rate_limit: RateLimitOptions {
                    priority: Priority::Interactive,
                    ..Default::default()
                },
                ..Default::default()
            },
            exec,
            CancellationToken::new(),
            false,
            high_cb,
            None,
        )
        .await
        .unwrap();

    wait_until(|| done.load(Ordering::SeqCst) == 2).await;
    let recorded = order.lock().unwrap();
    assert_eq!(*recorded, vec![2, 1], "the Interactive task should dispatch before the Background one");
}

#[tokio::test]
async fn second_rss_submit_for_same_indexer_is_deduplicated() {
    let scheduler = torznab_scheduler::Scheduler::new(SchedulerConfig::default());
    let exec = Arc::new(CountingExecutor {
        calls: AtomicUsize::new(0),
        delay: Duration::from_millis(50),
    });
    let done = Arc::new(AtomicUsize::new(0));

    let first_cb = Arc::new(RecordingCallbacks {
        completions: Arc::new(Mutex::new(Vec::new())),
        done: done.clone(),
    });
    scheduler
        .submit(
            vec![descriptor(7, "rss-indexer")],
            Arc::new(HashMap::new()),
            SearchContext::default(),
            exec.clone(),
            CancellationToken::new(),
            true,
            first_cb,
            None,
        )
        .await
        .unwrap();

    let second_done = Arc::new(AtomicUsize::new(0));
    let second_cb = Arc::new(RecordingCallbacks {
        completions: Arc::new(Mutex::new(Vec::new())),
        done: second_done.clone(),
    });
    // Submitted while the first RSS task for this indexer is still pending; its task
    // list ends up empty so `on_job_done` still fires for this job.
    scheduler
        .submit(
            vec![descriptor(7, "rss-indexer")],
            Arc::new(HashMap::new()),
            SearchContext::default(),
            exec.clone(),
            CancellationToken::new(),
            true,
            second_cb,
            None,
        )
        .await
        .unwrap();

    wait_until(|| done.load(Ordering::SeqCst) == 1 && second_done.load(Ordering::SeqCst) == 1).await;
    assert_eq!(exec.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn context_cancelled_before_dispatch_fails_with_context_cancelled() {
    let scheduler = torznab_scheduler::Scheduler::new(SchedulerConfig::default());
    let exec = Arc::new(CountingExecutor { calls: AtomicUsize::new(0), delay: Duration::ZERO });
    let completions = Arc::new(Mutex::new(Vec::new()));
    let done = Arc::new(AtomicUsize::new(0));
    let callbacks = Arc::new(RecordingCallbacks { completions: completions.clone(), done: done.clone() });

    let ctx = CancellationToken::new();
    ctx.cancel();

    // Block the indexer's worker with a slow first task so the cancelled one is still
    // sitting in the heap when the next dispatch pass runs.
    let blocker_cb = Arc::new(RecordingCallbacks {
        completions: Arc::new(Mutex::new(Vec::new())),
        done: Arc::new(AtomicUsize::new(0)),
    });
    let slow_exec = Arc::new(CountingExecutor { calls: AtomicUsize::new(0), delay: Duration::from_millis(100) });
    scheduler
        .submit(
            vec![descriptor(3, "slow")],
            Arc::new(HashMap::new()),
            SearchContext::default(),
            slow_exec,
            CancellationToken::new(),
            false,
            blocker_cb,
            None,
        )
        .await
        .unwrap();

    scheduler
        .submit(
            vec![descriptor(3, "slow")],
            Arc::new(HashMap::new()),
            SearchContext::default(),
            exec.clone(),
            ctx,
            false,
            callbacks,
            None,
        )
        .await
        .unwrap();

    wait_until(|| done.load(Ordering::SeqCst) == 1).await;
    let recorded = completions.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert!(!recorded[0].1, "cancelled task should complete with an error");
    assert_eq!(exec.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rate_limit_wait_beyond_max_wait_fails_fast() {
    let clock = Arc::new(ManualClock::default());
    let config = SchedulerConfig::default();
    let scheduler = torznab_scheduler::Scheduler::with_clock(config, clock.clone());
    let exec = Arc::new(CountingExecutor { calls: AtomicUsize::new(0), delay: Duration::ZERO });

    // Prime the limiter with one request so the second call must wait a full interval.
    let warmup_cb = Arc::new(RecordingCallbacks {
        completions: Arc::new(Mutex::new(Vec::new())),
        done: Arc::new(AtomicUsize::new(0)),
    });
    scheduler
        .submit(
            vec![descriptor(9, "limited")],
            Arc::new(HashMap::new()),
            SearchContext {
                rate_limit: RateLimitOptions {
                    priority: Priority::Background,
                    min_interval: Some(Duration::from_secs(60)),
                    max_wait: None,
                },
                ..Default::default()
            },
            exec.clone(),
            CancellationToken::new(),
            false,
            warmup_cb,
            None,
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;

    let completions = Arc::new(Mutex::new(Vec::new()));
    let done = Arc::new(AtomicUsize::new(0));
    let callbacks = Arc::new(RecordingCallbacks { completions: completions.clone(), done: done.clone() });
    scheduler
        .submit(
            vec![descriptor(9, "limited")],
            Arc::new(HashMap::new()),
            SearchContext {
                rate_limit: RateLimitOptions {
                    priority: Priority::Background,
                    min_interval: Some(Duration::from_secs(60)),
                    max_wait: Some(Duration::from_millis(1)),
                },
                ..Default::default()
            },
            exec,
            CancellationToken::new(),
            false,
            callbacks,
            None,
        )
        .await
        .unwrap();

    clock.advance(1);
    wait_until(|| done.load(Ordering::SeqCst) == 1).await;
    let recorded = completions.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert!(!recorded[0].1, "task exceeding its max wait should fail");
}

#[tokio::test]
async fn panicking_executor_is_recovered_as_executor_panic() {
    struct PanicExecutor;

    #[async_trait]
    impl Executor for PanicExecutor {
        async fn run(
            &self,
            _ctx: CancellationToken,
            _indexer: Arc<IndexerDescriptor>,
            _params: Arc<HashMap<String, String>>,
            _meta: SearchContext,
        ) -> Result<ExecOutcome, ExecutorError> {
            panic!("boom");
        }
    }

    let scheduler = torznab_scheduler::Scheduler::new(SchedulerConfig::default());
    let completions = Arc::new(Mutex::new(Vec::new()));
    let done = Arc::new(AtomicUsize::new(0));
    let callbacks = Arc::new(RecordingCallbacks { completions: completions.clone(), done: done.clone() });

    scheduler
        .submit(
            vec![descriptor(42, "flaky")],
            Arc::new(HashMap::new()),
            SearchContext::default(),
            Arc::new(PanicExecutor),
            CancellationToken::new(),
            false,
            callbacks,
            None,
        )
        .await
        .unwrap();

    wait_until(|| done.load(Ordering::SeqCst) == 1).await;
    let recorded = completions.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert!(!recorded[0].1);
}
