use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Default)]
struct DispositionStats {
    blocked: u64,
    allowed: u64,
    whitelisted: u64,
    lookup_time: Duration,
    last_reported_total: u64,
}

impl DispositionStats {
    fn total(&self) -> u64 {
        self.blocked + self.allowed + self.whitelisted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSummary {
    pub blocked: u64,
    pub allowed: u64,
    pub whitelisted: u64,
    pub average_lookup: Duration,
}

impl fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stats: blocked={} allowed={} whitelisted={} averageLookupTime={:?}",
            self.blocked, self.allowed, self.whitelisted, self.average_lookup
        )
    }
}

/// Process-wide lookup counters. Every lookup takes the lock once, and the
/// periodic reporter takes it once per tick.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    inner: Mutex<DispositionStats>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_blocked(&self, lookup_time: Duration) {
        let mut stats = self.lock();
        stats.blocked += 1;
        stats.lookup_time += lookup_time;
    }

    pub fn add_allowed(&self, lookup_time: Duration) {
        let mut stats = self.lock();
        stats.allowed += 1;
        stats.lookup_time += lookup_time;
    }

    pub fn add_whitelisted(&self, lookup_time: Duration) {
        let mut stats = self.lock();
        stats.whitelisted += 1;
        stats.lookup_time += lookup_time;
    }

    /// Current counters, without touching the report marker.
    pub fn snapshot(&self) -> StatsSummary {
        Self::summarize(&self.lock())
    }

    /// Summary since process start, or `None` if nothing was counted since
    /// the previous report.
    pub fn report(&self) -> Option<StatsSummary> {
        let mut stats = self.lock();
        let total = stats.total();
        if total == stats.last_reported_total {
            return None;
        }
        stats.last_reported_total = total;
        Some(Self::summarize(&stats))
    }

    /// Log a report every `period` until the returned task is aborted.
    pub fn spawn_reporter(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Some(summary) = self.report() {
                    log::info!("{summary}");
                }
            }
        })
    }

    fn summarize(stats: &DispositionStats) -> StatsSummary {
        let total = stats.total();
        let average_lookup = if total > 0 {
            // Saturate rather than overflow the u32 divisor on huge counts
            stats.lookup_time / u32::try_from(total).unwrap_or(u32::MAX)
        } else {
            Duration::ZERO
        };
        StatsSummary {
            blocked: stats.blocked,
            allowed: stats.allowed,
            whitelisted: stats.whitelisted,
            average_lookup,
        }
    }

    fn lock(&self) -> MutexGuard<'_, DispositionStats> {
        // Counters stay usable even if a holder panicked
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
