// Copyright (c) James Kassemi, SC, US. All rights reserved.

mod notify;

use std::{
    env, fs,
    net::SocketAddr,
    path::PathBuf,
    process,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use core_types::config::{AppConfig, ConfigError, Environment};
use engine_api::{Engine, EngineError};
use escrow_sweep_engine::{EscrowSweepConfig, EscrowSweepEngine, EscrowSweepMetrics};
use ledger::{
    FanoutSink, LedgerConfig, LedgerError, LedgerService, NotificationSink, StoreNotificationSink,
};
use memory_store::MemoryStore;
use metrics::Metrics;
use notify::WebhookSink;
use store_api::StoreError;
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::{
    net::TcpListener,
    runtime::{Handle, Runtime},
};

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("storefrontd failed: {err}");
        process::exit(1);
    }
}

const STATUS_LOG_INTERVAL_SECS: u64 = 30;
const DAY_SECS: u64 = 86_400;

fn run() -> Result<(), AppError> {
    let env = parse_environment()?;
    let config = AppConfig::load(env)?;

    let state_dir = PathBuf::from(&config.state_dir);
    fs::create_dir_all(&state_dir)?;
    let snapshot_path = state_dir.join(&config.store.snapshot_file);
    let store = Arc::new(MemoryStore::load_or_init(&snapshot_path)?);

    // Engines carry their own runtimes; this one hosts the metrics server,
    // the status logger and one-shot setup work.
    let runtime = Runtime::new()?;

    let ledger_config = LedgerConfig::new()
        .with_escrow_timeout(Duration::from_secs(
            config.ledger.escrow_timeout_days * DAY_SECS,
        ))
        .with_name_change_cooldown(Duration::from_secs(
            config.ledger.name_change_cooldown_days * DAY_SECS,
        ))
        .with_min_topup(config.ledger.min_topup);
    let escrow_timeout = ledger_config.escrow_timeout;
    let sink = build_sink(store.clone(), &config);
    let ledger = LedgerService::bootstrap(store.clone(), sink, ledger_config);

    let seeded = runtime.block_on(ledger.catalog().seed_defaults_if_empty())?;

    println!(
        "storefrontd booted in {} mode at {}; store snapshot at {}",
        env.label(),
        format_now(),
        snapshot_path.display()
    );
    println!(
        "Ledger policy: escrow timeout {}d, name change cooldown {}d, minimum top-up {}",
        config.ledger.escrow_timeout_days,
        config.ledger.name_change_cooldown_days,
        config.ledger.min_topup
    );
    println!(
        "Catalog: {}",
        if seeded {
            "seeded default games"
        } else {
            "already populated"
        }
    );
    println!(
        "Notifications: store feed{}",
        match &config.notify.webhook_url {
            Some(url) => format!(" + webhook {url}"),
            None => String::new(),
        }
    );

    let metrics = Arc::new(Metrics::new());
    let metrics_addr: SocketAddr =
        config
            .metrics_addr
            .parse()
            .map_err(|_| AppError::MetricsAddr {
                value: config.metrics_addr.clone(),
            })?;
    let listener = runtime.block_on(TcpListener::bind(metrics_addr))?;
    println!("Metrics endpoint listening on {metrics_addr}");
    {
        let metrics = metrics.clone();
        runtime.spawn(async move {
            if let Err(err) = metrics.serve(listener).await {
                eprintln!("metrics server failed: {err}");
            }
        });
    }

    let sweep_config = EscrowSweepConfig::new(env.label())
        .with_poll_interval(Duration::from_secs(config.sweep.poll_interval_s))
        .with_escrow_timeout(escrow_timeout)
        .with_max_trades_per_cycle(config.sweep.max_trades_per_cycle);
    let sweep_engine = EscrowSweepEngine::new(sweep_config, ledger.clone());
    sweep_engine.start()?;
    log_engine_health(&sweep_engine);

    println!("storefrontd is running; press Ctrl+C to shut down.");
    let status_logger = StatusLogger::spawn(
        runtime.handle().clone(),
        ledger.clone(),
        metrics.clone(),
        sweep_engine.metrics(),
        Duration::from_secs(STATUS_LOG_INTERVAL_SECS),
    );
    wait_for_shutdown_signal(&runtime)?;
    println!("Shutdown signal received; stopping escrow sweep engine...");
    status_logger.shutdown();
    sweep_engine.stop()?;

    store.persist()?;
    println!("Store snapshot written to {}", snapshot_path.display());
    Ok(())
}

fn parse_environment() -> Result<Environment, AppError> {
    let arg = env::args().nth(1).ok_or(AppError::Usage)?;
    Environment::from_str(&arg).map_err(AppError::from)
}

fn build_sink(store: Arc<MemoryStore>, config: &AppConfig) -> Arc<dyn NotificationSink> {
    let mut sinks: Vec<Arc<dyn NotificationSink>> =
        vec![Arc::new(StoreNotificationSink::new(store))];
    if let Some(url) = &config.notify.webhook_url {
        sinks.push(Arc::new(WebhookSink::new(url.clone())));
    }
    Arc::new(FanoutSink::new(sinks))
}

fn wait_for_shutdown_signal(runtime: &Runtime) -> Result<(), AppError> {
    runtime.block_on(tokio::signal::ctrl_c())?;
    Ok(())
}

fn log_engine_health(engine: &dyn Engine) {
    let health = engine.health();
    println!(
        "{} status: {:?} ({:?})",
        engine.name(),
        health.status,
        health.detail
    );
}

fn format_now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

#[derive(Debug, Error)]
enum AppError {
    #[error("usage: storefrontd <dev|prod>")]
    Usage,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("invalid metrics address '{value}'")]
    MetricsAddr { value: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

struct StatusLogger {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StatusLogger {
    fn spawn(
        runtime: Handle,
        ledger: Arc<LedgerService>,
        metrics: Arc<Metrics>,
        sweep_metrics: EscrowSweepMetrics,
        interval: Duration,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            while !stop_clone.load(Ordering::Relaxed) {
                match runtime.block_on(ledger.stats()) {
                    Ok(stats) => {
                        println!();
                        println!("[{}] ledger status", format_now());
                        println!("{stats}");
                        metrics.observe_ledger(&stats);
                    }
                    Err(err) => eprintln!("failed to snapshot ledger stats: {err}"),
                }
                metrics.observe_sweep(&sweep_metrics.snapshot());
                if stop_clone.load(Ordering::Relaxed) {
                    break;
                }
                sleep_with_stop(&stop_clone, interval);
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatusLogger {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn sleep_with_stop(stop: &AtomicBool, interval: Duration) {
    let mut remaining = interval;
    const STEP: Duration = Duration::from_millis(500);
    while remaining > Duration::ZERO {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let sleep_for = if remaining > STEP { STEP } else { remaining };
        thread::sleep(sleep_for);
        remaining = remaining.saturating_sub(sleep_for);
    }
}
