use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

#[derive(Default)]
struct EscrowSweepMetricsInner {
    backlog_trades: AtomicU64,
    trades_examined: AtomicU64,
    trades_refunded: AtomicU64,
    trades_skipped: AtomicU64,
    trades_failed: AtomicU64,
    cycles: AtomicU64,
    cycle_failures: AtomicU64,
}

/// Shared counters for the sweep loop. Cheap to clone; the metrics exporter
/// holds one handle and the engine another.
#[derive(Clone, Default)]
pub struct EscrowSweepMetrics {
    inner: Arc<EscrowSweepMetricsInner>,
}

pub struct EscrowSweepMetricsSnapshot {
    pub backlog_trades: u64,
    pub trades_examined: u64,
    pub trades_refunded: u64,
    pub trades_skipped: u64,
    pub trades_failed: u64,
    pub cycles: u64,
    pub cycle_failures: u64,
}

impl EscrowSweepMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EscrowSweepMetricsInner::default()),
        }
    }

    pub fn record_backlog(&self, backlog: usize) {
        self.inner
            .backlog_trades
            .store(backlog as u64, Ordering::Relaxed);
    }

    pub fn record_examined(&self, count: usize) {
        if count > 0 {
            self.inner
                .trades_examined
                .fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    pub fn record_refunded(&self) {
        self.inner.trades_refunded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.inner.trades_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.inner.trades_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle(&self) {
        self.inner.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle_failure(&self) {
        self.inner.cycle_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EscrowSweepMetricsSnapshot {
        EscrowSweepMetricsSnapshot {
            backlog_trades: self.inner.backlog_trades.load(Ordering::Relaxed),
            trades_examined: self.inner.trades_examined.load(Ordering::Relaxed),
            trades_refunded: self.inner.trades_refunded.load(Ordering::Relaxed),
            trades_skipped: self.inner.trades_skipped.load(Ordering::Relaxed),
            trades_failed: self.inner.trades_failed.load(Ordering::Relaxed),
            cycles: self.inner.cycles.load(Ordering::Relaxed),
            cycle_failures: self.inner.cycle_failures.load(Ordering::Relaxed),
        }
    }
}
