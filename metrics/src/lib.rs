// Copyright (c) James Kassemi, SC, US. All rights reserved.
//! Prometheus metrics. hyper v1.+
use escrow_sweep_engine::EscrowSweepMetricsSnapshot;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper::Response;
use hyper_util::rt::TokioIo;
use ledger::LedgerStatsSnapshot;
use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::error::Error;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct Metrics {
    // Own registry so two instances in one process never collide.
    registry: Registry,
    accounts: IntGauge,
    balance_total: IntGauge,
    entities: IntGaugeVec,
    sweep: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let accounts = IntGauge::new("ledger_accounts", "Registered wallet accounts").unwrap();
        let balance_total = IntGauge::new(
            "ledger_balance_total",
            "Sum of wallet balances in the smallest currency unit",
        )
        .unwrap();
        let entities = IntGaugeVec::new(
            Opts::new("ledger_entities", "Ledger entities by lifecycle status"),
            &["entity", "status"],
        )
        .unwrap();
        let sweep = IntGaugeVec::new(
            Opts::new("escrow_sweep", "Escrow sweep engine counters"),
            &["metric"],
        )
        .unwrap();
        registry.register(Box::new(accounts.clone())).unwrap();
        registry.register(Box::new(balance_total.clone())).unwrap();
        registry.register(Box::new(entities.clone())).unwrap();
        registry.register(Box::new(sweep.clone())).unwrap();
        Self {
            registry,
            accounts,
            balance_total,
            entities,
            sweep,
        }
    }

    pub fn observe_ledger(&self, stats: &LedgerStatsSnapshot) {
        self.accounts.set(stats.accounts as i64);
        self.balance_total.set(stats.balance_total as i64);
        let set = |entity: &str, status: &str, value: u64| {
            self.entities
                .with_label_values(&[entity, status])
                .set(value as i64);
        };
        set("orders", "pending", stats.orders_pending);
        set("orders", "completed", stats.orders_completed);
        set("orders", "cancelled", stats.orders_cancelled);
        set("trades", "escrow", stats.trades_escrow);
        set("trades", "released", stats.trades_released);
        set("trades", "refunded", stats.trades_refunded);
        set("listings", "available", stats.listings_available);
        set("listings", "pending", stats.listings_pending);
        set("listings", "sold", stats.listings_sold);
    }

    pub fn observe_sweep(&self, snapshot: &EscrowSweepMetricsSnapshot) {
        let set = |metric: &str, value: u64| {
            self.sweep.with_label_values(&[metric]).set(value as i64);
        };
        set("backlog", snapshot.backlog_trades);
        set("examined", snapshot.trades_examined);
        set("refunded", snapshot.trades_refunded);
        set("skipped", snapshot.trades_skipped);
        set("failed", snapshot.trades_failed);
        set("cycles", snapshot.cycles);
        set("cycle_failures", snapshot.cycle_failures);
    }

    fn render(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        buffer
    }

    async fn handle_metrics(
        &self,
        _req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
        Ok(Response::new(Full::new(Bytes::from(self.render()))))
    }

    pub async fn serve(
        self: &Arc<Self>,
        listener: TcpListener,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        loop {
            let (socket, _) = listener.accept().await?;
            let io = TokioIo::new(socket);
            let metrics = self.clone();
            let service = service_fn(move |req| {
                let metrics = metrics.clone();
                async move { metrics.handle_metrics(req).await }
            });
            tokio::spawn(async move {
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    eprintln!("Error serving connection: {:?}", err);
                }
            });
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
