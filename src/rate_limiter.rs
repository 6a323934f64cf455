use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::{Clock, priority_multiplier};
use crate::model::{IndexerId, RateLimitOptions};

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Private per-indexer bookkeeping.
#[derive(Debug, Default)]
struct IndexerRateState {
    last_request: Option<Instant>,
    cooldown_until: Option<Instant>,
    hourly_requests: Vec<Instant>,
    daily_requests: Vec<Instant>,
}

impl IndexerRateState {
    /// Evicts timestamps older than their window. Called on every read/write so the
    /// retained sequences stay strictly increasing.
    fn prune(&mut self, now: Instant) {
        prune_window(&mut self.hourly_requests, now, HOUR);
        prune_window(&mut self.daily_requests, now, DAY);
    }
}

fn prune_window(requests: &mut Vec<Instant>, now: Instant, window: Duration) {
    let cutoff = now.checked_sub(window);
    match cutoff {
        Some(cutoff) => requests.retain(|t| *t > cutoff),
        None => {}
    }
}

/// Per-indexer rate limiting: minimum interval, sliding hourly/daily windows, and
/// externally imposed cooldowns. Every public method acquires a single
/// mutex and none of them sleep; `next_wait` only ever returns a duration for the
/// caller (here, the dispatcher) to act on.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<HashMap<IndexerId, IndexerRateState>>,
    base_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(base_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            base_interval,
            clock,
        }
    }

    fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Exposes the limiter's clock so callers can timestamp a `record_request` or a
    /// cooldown deadline consistently with `next_wait`'s notion of "now."
    pub fn clock_now(&self) -> Instant {
        self.clock.now()
    }

    /// Returns how long the caller must wait before issuing a request for `indexer`.
    /// `Duration::ZERO` means "ready now." Never sleeps.
    pub fn next_wait(
        &self,
        indexer: IndexerId,
        opts: &RateLimitOptions,
        hourly_limit: Option<u32>,
        daily_limit: Option<u32>,
    ) -> Duration {
        let now = self.now();
        let mut guard = self.state.lock();
        let entry = guard.entry(indexer).or_default();
        entry.prune(now);

        let cooldown_wait = entry
            .cooldown_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO);

        let effective_interval = opts
            .min_interval
            .unwrap_or(self.base_interval)
            .mul_f64(priority_multiplier(opts.priority));
        let interval_wait = entry
            .last_request
            .map(|last| {
                (last + effective_interval).saturating_duration_since(now)
            })
            .unwrap_or(Duration::ZERO);

        let hourly_wait = window_wait(&entry.hourly_requests, hourly_limit, HOUR, now);
        let daily_wait = window_wait(&entry.daily_requests, daily_limit, DAY, now);

        cooldown_wait
            .max(interval_wait)
            .max(hourly_wait)
            .max(daily_wait)
    }

    /// Records that a request was made, reserving the slot. Conventionally called
    /// immediately before issuing the request, not after.
    pub fn record_request(&self, indexer: IndexerId, at: Instant) {
        let mut guard = self.state.lock();
        let entry = guard.entry(indexer).or_default();
        entry.prune(at);
        entry.last_request = Some(at);
        entry.hourly_requests.push(at);
        entry.daily_requests.push(at);
    }

    /// Sets an externally imposed cooldown. Monotonic: only ever extends, never
    /// shortens, the stored value.
    pub fn set_cooldown(&self, indexer: IndexerId, until: Instant) {
        let mut guard = self.state.lock();
        let entry = guard.entry(indexer).or_default();
        entry.cooldown_until = Some(match entry.cooldown_until {
            Some(existing) if existing >= until => existing,
            _ => until,
        });
    }

    /// Bulk-seeds cooldowns at startup.
    pub fn load_cooldowns(&self, cooldowns: HashMap<IndexerId, Instant>) {
        let mut guard = self.state.lock();
        for (indexer, until) in cooldowns {
            guard.entry(indexer).or_default().cooldown_until = Some(until);
        }
    }

    /// Administrative override clearing any cooldown on `indexer`.
    pub fn clear_cooldown(&self, indexer: IndexerId) {
        let mut guard = self.state.lock();
        if let Some(entry) = guard.get_mut(&indexer) {
            entry.cooldown_until = None;
        }
    }

    /// Non-blocking probe: is `indexer` currently in cooldown, and until when.
    ///
    /// A `cooldownUntil` in the past is treated as no cooldown.
    pub fn is_in_cooldown(&self, indexer: IndexerId) -> (bool, Option<Instant>) {
        let now = self.now();
        let guard = self.state.lock();
        match guard.get(&indexer).and_then(|s| s.cooldown_until) {
            Some(until) if until > now => (true, Some(until)),
            _ => (false, None),
        }
    }

    /// Non-blocking snapshot of every indexer currently cooling down.
    pub fn cooldown_indexers(&self) -> HashMap<IndexerId, Instant> {
        let now = self.now();
        let guard = self.state.lock();
        guard
            .iter()
            .filter_map(|(id, s)| s.cooldown_until.filter(|until| *until > now).map(|u| (*id, u)))
            .collect()
    }
}

fn window_wait(requests: &[Instant], limit: Option<u32>, window: Duration, now: Instant) -> Duration {
    let Some(limit) = limit else {
        return Duration::ZERO;
    };
    if requests.len() < limit as usize {
        return Duration::ZERO;
    }
    match requests.first() {
        Some(oldest) => (*oldest + window).saturating_duration_since(now),
        None => Duration::ZERO,
    }
}
