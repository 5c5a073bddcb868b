//! Service wiring. One [`LedgerService`] owns the component graph and is
//! shared behind an `Arc` by the daemon, the sweep engine and the metrics
//! exporter.

use std::fmt;
use std::sync::Arc;

use store_api::Store;

use core_types::types::{ListingStatus, OrderStatus, TradeStatus};

use crate::accounts::AccountStore;
use crate::catalog::Catalog;
use crate::config::LedgerConfig;
use crate::error::Result;
use crate::escrow::EscrowManager;
use crate::events::NotificationSink;
use crate::orders::OrderLedger;

pub struct LedgerService {
    config: LedgerConfig,
    accounts: Arc<AccountStore>,
    catalog: Arc<Catalog>,
    orders: Arc<OrderLedger>,
    escrow: Arc<EscrowManager>,
}

impl LedgerService {
    pub fn bootstrap(
        store: Arc<dyn Store>,
        sink: Arc<dyn NotificationSink>,
        config: LedgerConfig,
    ) -> Arc<Self> {
        let accounts = Arc::new(AccountStore::new(store.clone(), &config));
        let catalog = Arc::new(Catalog::new(store.clone(), &config));
        let orders = Arc::new(OrderLedger::new(
            store.clone(),
            accounts.clone(),
            catalog.clone(),
            sink.clone(),
            &config,
        ));
        let escrow = Arc::new(EscrowManager::new(store, accounts.clone(), sink, &config));
        Arc::new(Self {
            config,
            accounts,
            catalog,
            orders,
            escrow,
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn orders(&self) -> &OrderLedger {
        &self.orders
    }

    pub fn escrow(&self) -> &EscrowManager {
        &self.escrow
    }

    /// Full-scan counters for the status log and the metrics exporter.
    pub async fn stats(&self) -> Result<LedgerStatsSnapshot> {
        let accounts = self.accounts.list_accounts().await?;
        let orders = self.orders.all_orders().await?;
        let trades = self.escrow.trades().await?;
        let listings = self.escrow.listings().await?;

        let mut snapshot = LedgerStatsSnapshot {
            accounts: accounts.len() as u64,
            balance_total: accounts.iter().map(|account| account.balance).sum(),
            ..LedgerStatsSnapshot::default()
        };
        for order in &orders {
            match order.status {
                OrderStatus::Pending => snapshot.orders_pending += 1,
                OrderStatus::Completed => snapshot.orders_completed += 1,
                OrderStatus::Cancelled => snapshot.orders_cancelled += 1,
            }
        }
        for trade in &trades {
            match trade.status {
                TradeStatus::Escrow => snapshot.trades_escrow += 1,
                TradeStatus::Released => snapshot.trades_released += 1,
                TradeStatus::Refunded => snapshot.trades_refunded += 1,
            }
        }
        for listing in &listings {
            match listing.status {
                ListingStatus::Available => snapshot.listings_available += 1,
                ListingStatus::Pending => snapshot.listings_pending += 1,
                ListingStatus::Sold => snapshot.listings_sold += 1,
            }
        }
        Ok(snapshot)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStatsSnapshot {
    pub accounts: u64,
    pub balance_total: u64,
    pub orders_pending: u64,
    pub orders_completed: u64,
    pub orders_cancelled: u64,
    pub trades_escrow: u64,
    pub trades_released: u64,
    pub trades_refunded: u64,
    pub listings_available: u64,
    pub listings_pending: u64,
    pub listings_sold: u64,
}

impl fmt::Display for LedgerStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "accounts: {} (balance total {})",
            self.accounts, self.balance_total
        )?;
        writeln!(
            f,
            "orders:   {} pending / {} completed / {} cancelled",
            self.orders_pending, self.orders_completed, self.orders_cancelled
        )?;
        writeln!(
            f,
            "trades:   {} escrow / {} released / {} refunded",
            self.trades_escrow, self.trades_released, self.trades_refunded
        )?;
        write!(
            f,
            "listings: {} available / {} pending / {} sold",
            self.listings_available, self.listings_pending, self.listings_sold
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullSink;
    use crate::session::Session;
    use core_types::types::PaymentMethod;
    use memory_store::MemoryStore;

    #[tokio::test]
    async fn stats_count_every_entity() {
        let store = Arc::new(MemoryStore::new());
        let ledger = LedgerService::bootstrap(store, Arc::new(NullSink), LedgerConfig::new());
        ledger.catalog().seed_defaults_if_empty().await.unwrap();

        let buyer = ledger
            .accounts()
            .register("Buyer", "0912000111", "pw")
            .await
            .unwrap();
        let seller = ledger
            .accounts()
            .register("Seller", "0912000222", "pw")
            .await
            .unwrap();
        ledger.accounts().release_funds(&buyer.id, 1_000).await.unwrap();
        let buyer = Session::customer(buyer.id);
        let seller = Session::customer(seller.id);

        ledger
            .orders()
            .create_balance_order(&buyer, 500, PaymentMethod::Bankak, "topup-1")
            .await
            .unwrap();
        let listing = ledger
            .escrow()
            .publish_listing(&seller, "pubg", "Ace account", "", 300)
            .await
            .unwrap();
        ledger
            .escrow()
            .open_trade(&buyer, &listing.id, "trade-1")
            .await
            .unwrap();

        let stats = ledger.stats().await.unwrap();
        assert_eq!(stats.accounts, 2);
        assert_eq!(stats.balance_total, 700);
        assert_eq!(stats.orders_pending, 1);
        assert_eq!(stats.trades_escrow, 1);
        assert_eq!(stats.listings_pending, 1);
        assert_eq!(stats.listings_available, 0);

        let rendered = stats.to_string();
        assert!(rendered.contains("accounts: 2"));
        assert!(rendered.contains("1 escrow"));
    }
}
