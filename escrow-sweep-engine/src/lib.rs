// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Background engine that refunds abandoned escrow trades.
//!
//! Trades still in `escrow` after the configured horizon are refunded to
//! the buyer under the `system:escrow-sweep` actor, so every reservation
//! eventually resolves even when no operator acts. Trades an operator
//! resolves between scan and refund are skipped, not errors.

mod metrics;

pub use metrics::{EscrowSweepMetrics, EscrowSweepMetricsSnapshot};

use std::sync::Arc;
use std::time::Duration;

use engine_api::{Engine, EngineError, EngineHealth, EngineResult, HealthStatus};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::{runtime::Runtime, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;

use core_types::types::now_ms;
use ledger::{Actor, LedgerError, LedgerService};

const ENGINE_NAME: &str = "escrow-sweep";
const SWEEP_ACTOR: Actor = Actor::System("escrow-sweep");

const DEFAULT_POLL_SECS: u64 = 300;
const DEFAULT_ESCROW_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_MAX_TRADES_PER_CYCLE: usize = 64;

#[derive(Clone)]
pub struct EscrowSweepConfig {
    pub label: String,
    pub poll_interval: Duration,
    pub escrow_timeout: Duration,
    pub max_trades_per_cycle: usize,
}

impl EscrowSweepConfig {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_SECS),
            escrow_timeout: Duration::from_secs(DEFAULT_ESCROW_TIMEOUT_SECS),
            max_trades_per_cycle: DEFAULT_MAX_TRADES_PER_CYCLE,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_escrow_timeout(mut self, timeout: Duration) -> Self {
        self.escrow_timeout = timeout;
        self
    }

    pub fn with_max_trades_per_cycle(mut self, max: usize) -> Self {
        self.max_trades_per_cycle = max.max(1);
        self
    }
}

pub struct EscrowSweepEngine {
    inner: Arc<SweepInner>,
}

impl EscrowSweepEngine {
    pub fn new(config: EscrowSweepConfig, ledger: Arc<LedgerService>) -> Self {
        Self {
            inner: SweepInner::new(config, ledger),
        }
    }

    pub fn metrics(&self) -> EscrowSweepMetrics {
        self.inner.metrics.clone()
    }
}

impl Engine for EscrowSweepEngine {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    fn start(&self) -> EngineResult<()> {
        self.inner.start()
    }

    fn stop(&self) -> EngineResult<()> {
        self.inner.stop()
    }

    fn health(&self) -> EngineHealth {
        self.inner.health()
    }
}

struct SweepInner {
    config: EscrowSweepConfig,
    ledger: Arc<LedgerService>,
    state: Mutex<EngineRuntimeState>,
    health: Mutex<EngineHealth>,
    metrics: EscrowSweepMetrics,
}

impl SweepInner {
    fn new(config: EscrowSweepConfig, ledger: Arc<LedgerService>) -> Arc<Self> {
        Arc::new(Self {
            config,
            ledger,
            state: Mutex::new(EngineRuntimeState::Stopped),
            health: Mutex::new(EngineHealth::new(
                HealthStatus::Stopped,
                Some("engine not started".into()),
            )),
            metrics: EscrowSweepMetrics::new(),
        })
    }

    fn start(self: &Arc<Self>) -> EngineResult<()> {
        let mut guard = self.state.lock();
        if matches!(*guard, EngineRuntimeState::Running(_)) {
            return Err(EngineError::AlreadyRunning);
        }
        self.set_health(HealthStatus::Starting, None);
        let runtime = Runtime::new().map_err(|err| EngineError::Failure {
            source: Box::new(err),
        })?;
        let cancel = CancellationToken::new();
        let runner = Arc::clone(self);
        let cancel_clone = cancel.clone();
        let handle = runtime.spawn(async move {
            runner.run(cancel_clone).await;
        });
        *guard = EngineRuntimeState::Running(RuntimeBundle {
            runtime,
            handle,
            cancel,
        });
        info!("[{}] escrow sweep engine starting", self.config.label);
        Ok(())
    }

    fn stop(&self) -> EngineResult<()> {
        let mut guard = self.state.lock();
        let Some(bundle) = guard.take_running() else {
            return Err(EngineError::NotRunning);
        };
        bundle.cancel.cancel();
        if let Err(err) = RuntimeBundle::join(bundle) {
            error!(
                "[{}] escrow sweep runtime join failed: {:?}",
                self.config.label, err
            );
        }
        *guard = EngineRuntimeState::Stopped;
        self.set_health(HealthStatus::Stopped, None);
        Ok(())
    }

    fn health(&self) -> EngineHealth {
        self.health.lock().clone()
    }

    fn set_health(&self, status: HealthStatus, detail: Option<String>) {
        let mut guard = self.health.lock();
        guard.status = status;
        guard.detail = detail;
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("[{}] escrow sweep loop starting", self.config.label);
        self.set_health(HealthStatus::Ready, None);
        while !cancel.is_cancelled() {
            match self.cycle(&cancel).await {
                Ok(refunded) => {
                    if refunded > 0 {
                        info!(
                            "[{}] refunded {} expired trade(s)",
                            self.config.label, refunded
                        );
                    }
                    self.metrics.record_cycle();
                    self.set_health(HealthStatus::Ready, None);
                }
                Err(err) => {
                    warn!("[{}] sweep iteration failed: {}", self.config.label, err);
                    self.metrics.record_cycle_failure();
                    self.set_health(HealthStatus::Degraded, Some(err.to_string()));
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.config.poll_interval) => {}
            }
        }
        self.set_health(HealthStatus::Stopped, None);
        info!("[{}] escrow sweep loop exiting", self.config.label);
    }

    async fn cycle(&self, cancel: &CancellationToken) -> Result<usize, LedgerError> {
        let timeout_ms = duration_to_ms(self.config.escrow_timeout);
        let cutoff = now_ms() - timeout_ms;
        let expired = self
            .ledger
            .escrow()
            .trades_expired_before(cutoff, self.config.max_trades_per_cycle)
            .await?;
        self.metrics.record_backlog(expired.len());
        if expired.is_empty() {
            return Ok(0);
        }
        self.metrics.record_examined(expired.len());

        let mut refunded = 0usize;
        for trade in expired {
            if cancel.is_cancelled() {
                break;
            }
            match self.ledger.escrow().refund_trade(&trade.id, &SWEEP_ACTOR).await {
                Ok(_) => {
                    refunded += 1;
                    self.metrics.record_refunded();
                }
                Err(LedgerError::InvalidTransition { .. }) => {
                    // An operator resolved it between scan and refund.
                    self.metrics.record_skipped();
                    debug!(
                        "[{}] trade {} already resolved, skipping",
                        self.config.label, trade.id
                    );
                }
                Err(err) => {
                    self.metrics.record_failed();
                    warn!(
                        "[{}] refund failed for trade {}: {}",
                        self.config.label, trade.id, err
                    );
                }
            }
        }
        Ok(refunded)
    }
}

fn duration_to_ms(duration: Duration) -> i64 {
    duration.as_millis().min(i64::MAX as u128) as i64
}

enum EngineRuntimeState {
    Stopped,
    Running(RuntimeBundle),
}

impl EngineRuntimeState {
    fn take_running(&mut self) -> Option<RuntimeBundle> {
        match std::mem::replace(self, EngineRuntimeState::Stopped) {
            EngineRuntimeState::Running(bundle) => Some(bundle),
            other => {
                *self = other;
                None
            }
        }
    }
}

struct RuntimeBundle {
    runtime: Runtime,
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl RuntimeBundle {
    fn join(bundle: RuntimeBundle) -> Result<(), tokio::task::JoinError> {
        let RuntimeBundle {
            runtime,
            handle,
            cancel: _,
        } = bundle;
        runtime.block_on(async { handle.await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::retry::RetryPolicy;
    use core_types::types::TradeStatus;
    use ledger::{LedgerConfig, NullSink, Session};
    use memory_store::MemoryStore;
    use store_api::{StoreOp, StorePath};

    async fn seeded_ledger() -> (Arc<MemoryStore>, Arc<LedgerService>, String, String) {
        let store = Arc::new(MemoryStore::new());
        let config = LedgerConfig::new().with_retry_policy(RetryPolicy::new(1, 1, 1, 0.0));
        let ledger = LedgerService::bootstrap(store.clone(), Arc::new(NullSink), config);

        let seller = ledger
            .accounts()
            .register("Seller", "0912000222", "pw")
            .await
            .unwrap();
        let buyer = ledger
            .accounts()
            .register("Buyer", "0912000111", "pw")
            .await
            .unwrap();
        ledger.accounts().release_funds(&buyer.id, 800).await.unwrap();

        let listing = ledger
            .escrow()
            .publish_listing(
                &Session::customer(seller.id),
                "pubg",
                "Conqueror account",
                "",
                300,
            )
            .await
            .unwrap();
        let trade = ledger
            .escrow()
            .open_trade(&Session::customer(buyer.id.clone()), &listing.id, "t1")
            .await
            .unwrap();
        (store, ledger, buyer.id, trade.id)
    }

    #[tokio::test]
    async fn cycle_refunds_expired_trades() {
        let (_, ledger, buyer_id, trade_id) = seeded_ledger().await;
        let config = EscrowSweepConfig::new("test").with_escrow_timeout(Duration::ZERO);
        let engine = EscrowSweepEngine::new(config, ledger.clone());

        // Let the clock move past opened_at_ms.
        sleep(Duration::from_millis(5)).await;
        let cancel = CancellationToken::new();
        let refunded = engine.inner.cycle(&cancel).await.unwrap();
        assert_eq!(refunded, 1);

        let trade = ledger.escrow().trade(&trade_id).await.unwrap();
        assert_eq!(trade.status, TradeStatus::Refunded);
        assert_eq!(trade.resolved_by.as_deref(), Some("system:escrow-sweep"));
        assert_eq!(
            ledger.accounts().get_account(&buyer_id).await.unwrap().balance,
            800
        );

        let snapshot = engine.metrics().snapshot();
        assert_eq!(snapshot.trades_refunded, 1);
        assert_eq!(snapshot.trades_failed, 0);

        assert_eq!(engine.inner.cycle(&cancel).await.unwrap(), 0);
        assert_eq!(engine.metrics().snapshot().backlog_trades, 0);
    }

    #[tokio::test]
    async fn cycle_leaves_fresh_trades_alone() {
        let (_, ledger, _, trade_id) = seeded_ledger().await;
        let config = EscrowSweepConfig::new("test");
        let engine = EscrowSweepEngine::new(config, ledger.clone());

        let cancel = CancellationToken::new();
        assert_eq!(engine.inner.cycle(&cancel).await.unwrap(), 0);
        assert_eq!(
            ledger.escrow().trade(&trade_id).await.unwrap().status,
            TradeStatus::Escrow
        );
    }

    #[tokio::test]
    async fn cycle_counts_failed_refunds() {
        let (store, ledger, buyer_id, trade_id) = seeded_ledger().await;
        let config = EscrowSweepConfig::new("test").with_escrow_timeout(Duration::ZERO);
        let engine = EscrowSweepEngine::new(config, ledger.clone());

        sleep(Duration::from_millis(5)).await;
        store
            .faults()
            .fail_always(StoreOp::Update, StorePath::new(["trades"]));
        let cancel = CancellationToken::new();
        assert_eq!(engine.inner.cycle(&cancel).await.unwrap(), 0);
        let snapshot = engine.metrics().snapshot();
        assert_eq!(snapshot.trades_failed, 1);
        assert_eq!(snapshot.trades_refunded, 0);

        // Held funds and trade state are untouched; the next cycle retries.
        store.faults().clear();
        assert_eq!(
            ledger.escrow().trade(&trade_id).await.unwrap().status,
            TradeStatus::Escrow
        );
        assert_eq!(
            ledger.accounts().get_account(&buyer_id).await.unwrap().balance,
            500
        );
        assert_eq!(engine.inner.cycle(&cancel).await.unwrap(), 1);
    }

    #[test]
    fn start_stop_lifecycle() {
        let store = Arc::new(MemoryStore::new());
        let ledger = LedgerService::bootstrap(store, Arc::new(NullSink), LedgerConfig::new());
        let config = EscrowSweepConfig::new("test")
            .with_poll_interval(Duration::from_millis(10));
        let engine = EscrowSweepEngine::new(config, ledger);

        assert!(matches!(engine.health().status, HealthStatus::Stopped));
        engine.start().unwrap();
        assert!(matches!(engine.start(), Err(EngineError::AlreadyRunning)));
        std::thread::sleep(Duration::from_millis(50));
        assert!(matches!(engine.health().status, HealthStatus::Ready));

        engine.stop().unwrap();
        assert!(matches!(engine.health().status, HealthStatus::Stopped));
        assert!(matches!(engine.stop(), Err(EngineError::NotRunning)));
    }
}
