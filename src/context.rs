use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use crate::model::Priority;

/// A cancellable handle a caller attaches to a search so it can be abandoned mid-flight.
///
/// Workers observe cancellation through the `exec` call, and a still-queued task is
/// dropped on its next dispatch pass once cancelled. An `AtomicBool` flag plus a
/// [`tokio::sync::Notify`] lets `cancelled()` be awaited inside `tokio::select!` alongside
/// real I/O.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`Self::cancel`] has been called. Safe to await repeatedly or drop
    /// without polling to completion.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// How a caller's ambient priority (if any) should be resolved for `Submit`.
///
/// A caller may attach a priority to its context via
/// [`RequestContext::with_search_priority`], and `Submit` derives `meta.rate_limit.priority`
/// from it only when the caller didn't set it explicitly.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    ambient_priority: Option<Priority>,
    override_priority: Option<ScopeOverride>,
}

/// A collaborator-specific override of the ambient priority.
///
/// A bulk producer such as a directory-scan searcher wants every search it submits to
/// enqueue at Background priority regardless of the ambient priority on its context,
/// since it must yield to interactive traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeOverride {
    AlwaysBackground,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an ambient priority that `Submit` falls back to when a task doesn't set
    /// one explicitly.
    pub fn with_search_priority(mut self, priority: Priority) -> Self {
        self.ambient_priority = Some(priority);
        self
    }

    /// Force every `Submit` made through this context to Background priority,
    /// regardless of any ambient priority set above. Intended for bulk producers such as
    /// a directory-scan searcher.
    pub fn with_scope_override(mut self, scope: ScopeOverride) -> Self {
        self.override_priority = Some(scope);
        self
    }

    /// Resolve the priority a task created under this context should use, given what the
    /// caller explicitly set on `meta.rate_limit.priority` (if anything).
    pub fn resolve_priority(&self, explicit: Option<Priority>) -> Priority {
        if let Some(ScopeOverride::AlwaysBackground) = self.override_priority {
            return Priority::Background;
        }
        explicit
            .or(self.ambient_priority)
            .unwrap_or_default()
    }
}
