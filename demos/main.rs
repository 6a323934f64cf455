use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use torznab_scheduler::{
    CancellationToken, ExecOutcome, Executor, ExecutorError, IndexerDescriptor, JobCallbacks,
    JobId, Priority, RateLimitOptions, RequestContext, ScopeOverride, Scheduler, SchedulerConfig,
    SchedulerError, SearchContext,
};

/// Pretends to hit a Torznab indexer: sleeps a little, then returns one fake result.
struct FakeIndexer {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl Executor for FakeIndexer {
    async fn run(
        &self,
        _ctx: CancellationToken,
        indexer: Arc<IndexerDescriptor>,
        _params: Arc<HashMap<String, String>>,
        _meta: SearchContext,
    ) -> Result<ExecOutcome, ExecutorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        info!(indexer = %indexer.name, call_number = n, "fake search completed");
        Ok(ExecOutcome {
            results: vec![serde_json::json!({"indexer": indexer.name, "call": n})],
            coverage: vec![indexer.id.0.get()],
        })
    }
}

struct PrintCallbacks {
    label: &'static str,
}

impl JobCallbacks for PrintCallbacks {
    fn on_complete(
        &self,
        job_id: JobId,
        indexer: Arc<IndexerDescriptor>,
        outcome: Result<ExecOutcome, SchedulerError>,
    ) {
        match outcome {
            Ok(o) => println!("[{}] {job_id} {} -> {} result(s)", self.label, indexer.name, o.results.len()),
            Err(e) => println!("[{}] {job_id} {} -> error: {e}", self.label, indexer.name),
        }
    }

    fn on_job_done(&self, job_id: JobId) {
        println!("[{}] {job_id} done", self.label);
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let scheduler = Scheduler::new(SchedulerConfig::default());
    let exec: Arc<dyn Executor> = Arc::new(FakeIndexer { calls: AtomicUsize::new(0) });

    let indexers: Vec<_> = (1..=3)
        .map(|i| Arc::new(IndexerDescriptor::new(i, format!("indexer-{i}")).unwrap()))
        .collect();

    // An interactive, user-triggered search: highest priority, cuts the queue.
    scheduler
        .submit(
            indexers.clone(),
            Arc::new(HashMap::new()),
            SearchContext {
                rate_limit: RateLimitOptions {
                    priority: Priority::Interactive,
                    ..Default::default()
                },
                scope: "user-search".into(),
                categories: vec![5000],
            },
            exec.clone(),
            CancellationToken::new(),
            false,
            Arc::new(PrintCallbacks { label: "interactive" }),
            None,
        )
        .await
        .unwrap();

    // A directory-scan style producer: always Background, regardless of its own
    // ambient priority, since it's a bulk producer that should yield to interactive work.
    let scan_ctx = RequestContext::new()
        .with_search_priority(Priority::Completion)
        .with_scope_override(ScopeOverride::AlwaysBackground);
    let resolved = scan_ctx.resolve_priority(None);

    scheduler
        .submit(
            indexers,
            Arc::new(HashMap::new()),
            SearchContext {
                rate_limit: RateLimitOptions {
                    priority: resolved,
                    ..Default::default()
                },
                scope: "directory-scan".into(),
                categories: vec![],
            },
            exec,
            CancellationToken::new(),
            false,
            Arc::new(PrintCallbacks { label: "scan" }),
            None,
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    scheduler.shutdown().await;
}
