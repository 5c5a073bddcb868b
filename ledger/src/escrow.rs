// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Escrowed account trading. A trade holds the buyer's funds from open
//! until release (seller paid, listing sold) or refund (buyer repaid,
//! listing relisted).
//!
//! `open_trade` is all-or-nothing: reserve buyer funds, hold the listing,
//! write the trade. Release and refund follow the same shape: funds move,
//! the listing status flips, and the trade write commits the transition.
//! A failure at any step unwinds the earlier steps in reverse order
//! before the error surfaces. The listing's `pending` gate is what keeps
//! a second buyer out while a trade is open.

use std::collections::HashMap;
use std::sync::Arc;

use log::{error, info};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{from_value, json};
use tokio::sync::Mutex as AsyncMutex;

use core_types::ids;
use core_types::retry::RetryPolicy;
use core_types::types::{
    now_ms, Amount, EscrowTrade, Listing, ListingId, ListingStatus, TimestampMs, TradeId,
    TradeStatus,
};
use store_api::{fields, get_record, set_record, Store, StoreError, StorePath};

use crate::accounts::AccountStore;
use crate::config::{LedgerConfig, MAX_AMOUNT};
use crate::error::{LedgerError, Result};
use crate::events::{LedgerEvent, NotificationSink};
use crate::paths;
use crate::session::{Actor, Session};

const TRADE_TRANSITIONS: &[(TradeStatus, TradeStatus)] = &[
    (TradeStatus::Escrow, TradeStatus::Released),
    (TradeStatus::Escrow, TradeStatus::Refunded),
];

fn validate_transition(from: TradeStatus, to: TradeStatus) -> Result<()> {
    if TRADE_TRANSITIONS
        .iter()
        .any(|(valid_from, valid_to)| *valid_from == from && *valid_to == to)
    {
        Ok(())
    } else {
        Err(LedgerError::InvalidTransition {
            entity: "trade",
            from: from.as_str(),
            attempted: to.as_str(),
        })
    }
}

pub struct EscrowManager {
    store: Arc<dyn Store>,
    accounts: Arc<AccountStore>,
    sink: Arc<dyn NotificationSink>,
    retry: RetryPolicy,
    listing_locks: Mutex<HashMap<ListingId, Arc<AsyncMutex<()>>>>,
    trade_locks: Mutex<HashMap<TradeId, Arc<AsyncMutex<()>>>>,
}

impl EscrowManager {
    pub fn new(
        store: Arc<dyn Store>,
        accounts: Arc<AccountStore>,
        sink: Arc<dyn NotificationSink>,
        config: &LedgerConfig,
    ) -> Self {
        Self {
            store,
            accounts,
            sink,
            retry: config.retry.clone(),
            listing_locks: Mutex::new(HashMap::new()),
            trade_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn publish_listing(
        &self,
        session: &Session,
        game: &str,
        title: &str,
        description: &str,
        price: Amount,
    ) -> Result<Listing> {
        let seller_id = session.require_account("publish listing")?.clone();
        let game = game.trim();
        let title = title.trim();
        if game.is_empty() {
            return Err(LedgerError::MissingField { field: "game" });
        }
        if title.is_empty() {
            return Err(LedgerError::MissingField { field: "title" });
        }
        if price == 0 || price > MAX_AMOUNT {
            return Err(LedgerError::AmountOutOfRange {
                amount: price,
                min: 1,
                max: MAX_AMOUNT,
            });
        }
        let seller = self.accounts.get_account(&seller_id).await?;

        let listing = Listing {
            id: ids::listing_id(),
            seller_id,
            seller_name: seller.name,
            game: game.to_string(),
            title: title.to_string(),
            description: description.trim().to_string(),
            price,
            status: ListingStatus::Available,
            created_at_ms: now_ms(),
        };
        self.put_listing(&listing).await?;
        info!(
            "[escrow] listed {} '{}' at {} by {}",
            listing.id, listing.title, listing.price, listing.seller_id
        );
        Ok(listing)
    }

    /// Listings a buyer can act on, newest first.
    pub async fn open_listings(&self) -> Result<Vec<Listing>> {
        let mut listings = self.listings().await?;
        listings.retain(|listing| listing.status == ListingStatus::Available);
        listings.sort_by_key(|listing| std::cmp::Reverse(listing.created_at_ms));
        Ok(listings)
    }

    pub async fn listing(&self, listing_id: &str) -> Result<Listing> {
        self.load_listing(listing_id).await
    }

    pub async fn trade(&self, trade_id: &str) -> Result<EscrowTrade> {
        self.load_trade(trade_id).await
    }

    /// Buy a listing into escrow. The trade id derives from
    /// `idempotency_key`, so a retried call finds the trade the first
    /// attempt created instead of tripping on the now-pending listing.
    pub async fn open_trade(
        &self,
        session: &Session,
        listing_id: &str,
        idempotency_key: &str,
    ) -> Result<EscrowTrade> {
        let buyer_id = session.require_account("open trade")?.clone();
        let key = idempotency_key.trim();
        if key.is_empty() {
            return Err(LedgerError::MissingField { field: "idempotency_key" });
        }

        let lock = self.listing_lock(listing_id);
        let _guard = lock.lock().await;
        let listing = self.load_listing(listing_id).await?;

        let trade_id = ids::trade_uid(listing_id, &buyer_id, key);
        if let Some(existing) = self.try_load_trade(&trade_id).await? {
            return Ok(existing);
        }

        if listing.status != ListingStatus::Available {
            return Err(LedgerError::ListingNotAvailable {
                listing_id: listing_id.to_string(),
                status: listing.status.as_str(),
            });
        }
        if listing.seller_id == buyer_id {
            return Err(LedgerError::SelfTrade);
        }

        let token = self.accounts.reserve_funds(&buyer_id, listing.price).await?;

        if let Err(err) = self
            .write_listing_status(listing_id, ListingStatus::Pending)
            .await
        {
            self.refund_reservation(&buyer_id, token.amount, "failed listing hold")
                .await;
            return Err(err);
        }

        let trade = EscrowTrade {
            id: trade_id,
            listing_id: listing_id.to_string(),
            buyer_id: buyer_id.clone(),
            seller_id: listing.seller_id.clone(),
            price: listing.price,
            status: TradeStatus::Escrow,
            opened_at_ms: now_ms(),
            resolved_at_ms: None,
            resolved_by: None,
        };
        if let Err(err) = self.put_trade(&trade).await {
            // Unwind in reverse order of application.
            self.restore_listing(listing_id, ListingStatus::Available, "failed trade write")
                .await;
            self.refund_reservation(&buyer_id, token.amount, "failed trade write")
                .await;
            return Err(err);
        }

        let mut held = listing;
        held.status = ListingStatus::Pending;
        info!(
            "[escrow] opened {} on {listing_id}; {} held from {buyer_id}",
            trade.id, trade.price
        );
        self.sink.deliver(&LedgerEvent::TradeOpened {
            trade: trade.clone(),
            listing: held,
        });
        Ok(trade)
    }

    /// Operator-only. Pays the seller and marks the listing sold.
    pub async fn release_trade(&self, trade_id: &str, actor: &Actor) -> Result<EscrowTrade> {
        if !actor.is_operator() {
            return Err(LedgerError::NotPermitted {
                actor: actor.to_string(),
                action: "release trade",
            });
        }
        let lock = self.trade_lock(trade_id);
        let _guard = lock.lock().await;
        let mut trade = self.load_trade(trade_id).await?;
        validate_transition(trade.status, TradeStatus::Released)?;

        self.accounts.settle_funds(&trade.seller_id, trade.price).await?;

        if let Err(err) = self
            .write_listing_status(&trade.listing_id, ListingStatus::Sold)
            .await
        {
            self.recover_settlement(&trade.seller_id, trade.price, "failed listing sale write")
                .await;
            return Err(err);
        }

        trade.status = TradeStatus::Released;
        trade.resolved_at_ms = Some(now_ms());
        trade.resolved_by = Some(actor.to_string());
        // The trade write is the commit point; everything before it is
        // unwound if it fails, leaving the trade refundable or releasable
        // on a later attempt.
        if let Err(err) = self.write_trade_resolution(&trade).await {
            self.restore_listing(&trade.listing_id, ListingStatus::Pending, "failed release write")
                .await;
            self.recover_settlement(&trade.seller_id, trade.price, "failed release write")
                .await;
            return Err(err);
        }
        info!(
            "[escrow] released {trade_id} by {actor}; {} settled to {}",
            trade.price, trade.seller_id
        );
        self.sink.deliver(&LedgerEvent::TradeReleased {
            trade: trade.clone(),
        });
        Ok(trade)
    }

    /// Operator-only. Returns the held funds to the buyer and relists.
    pub async fn refund_trade(&self, trade_id: &str, actor: &Actor) -> Result<EscrowTrade> {
        if !actor.is_operator() {
            return Err(LedgerError::NotPermitted {
                actor: actor.to_string(),
                action: "refund trade",
            });
        }
        let lock = self.trade_lock(trade_id);
        let _guard = lock.lock().await;
        let mut trade = self.load_trade(trade_id).await?;
        validate_transition(trade.status, TradeStatus::Refunded)?;

        self.accounts.release_funds(&trade.buyer_id, trade.price).await?;

        if let Err(err) = self
            .write_listing_status(&trade.listing_id, ListingStatus::Available)
            .await
        {
            self.recover_settlement(&trade.buyer_id, trade.price, "failed relist write")
                .await;
            return Err(err);
        }

        trade.status = TradeStatus::Refunded;
        trade.resolved_at_ms = Some(now_ms());
        trade.resolved_by = Some(actor.to_string());
        if let Err(err) = self.write_trade_resolution(&trade).await {
            self.restore_listing(&trade.listing_id, ListingStatus::Pending, "failed refund write")
                .await;
            self.recover_settlement(&trade.buyer_id, trade.price, "failed refund write")
                .await;
            return Err(err);
        }
        info!(
            "[escrow] refunded {trade_id} by {actor}; {} returned to {}",
            trade.price, trade.buyer_id
        );
        self.sink.deliver(&LedgerEvent::TradeRefunded {
            trade: trade.clone(),
        });
        Ok(trade)
    }

    /// Escrow trades opened before `cutoff_ms`, oldest first, capped at
    /// `limit`. Resolved trades never appear.
    pub async fn trades_expired_before(
        &self,
        cutoff_ms: TimestampMs,
        limit: usize,
    ) -> Result<Vec<EscrowTrade>> {
        let mut expired: Vec<EscrowTrade> = self
            .trades()
            .await?
            .into_iter()
            .filter(|trade| trade.status == TradeStatus::Escrow && trade.opened_at_ms < cutoff_ms)
            .collect();
        expired.sort_by_key(|trade| trade.opened_at_ms);
        expired.truncate(limit);
        Ok(expired)
    }

    pub(crate) async fn listings(&self) -> Result<Vec<Listing>> {
        self.scan_root(&paths::listings_root()).await
    }

    pub(crate) async fn trades(&self) -> Result<Vec<EscrowTrade>> {
        self.scan_root(&paths::trades_root()).await
    }

    fn listing_lock(&self, listing_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.listing_locks.lock();
        Arc::clone(
            locks
                .entry(listing_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    fn trade_lock(&self, trade_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.trade_locks.lock();
        Arc::clone(
            locks
                .entry(trade_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    async fn load_listing(&self, listing_id: &str) -> Result<Listing> {
        let path = paths::listing(listing_id);
        let record = self
            .retry
            .retry_if(LedgerError::is_transient, |_| async {
                get_record::<Listing>(self.store.as_ref(), &path)
                    .await
                    .map_err(LedgerError::from)
            })
            .await?;
        record.ok_or_else(|| LedgerError::ListingNotFound {
            listing_id: listing_id.to_string(),
        })
    }

    async fn load_trade(&self, trade_id: &str) -> Result<EscrowTrade> {
        self.try_load_trade(trade_id)
            .await?
            .ok_or_else(|| LedgerError::TradeNotFound {
                trade_id: trade_id.to_string(),
            })
    }

    async fn try_load_trade(&self, trade_id: &str) -> Result<Option<EscrowTrade>> {
        let path = paths::trade(trade_id);
        self.retry
            .retry_if(LedgerError::is_transient, |_| async {
                get_record::<EscrowTrade>(self.store.as_ref(), &path)
                    .await
                    .map_err(LedgerError::from)
            })
            .await
    }

    async fn put_listing(&self, listing: &Listing) -> Result<()> {
        let path = paths::listing(&listing.id);
        self.retry
            .retry_if(LedgerError::is_transient, |_| async {
                set_record(self.store.as_ref(), &path, listing)
                    .await
                    .map_err(LedgerError::from)
            })
            .await
    }

    async fn put_trade(&self, trade: &EscrowTrade) -> Result<()> {
        let path = paths::trade(&trade.id);
        self.retry
            .retry_if(LedgerError::is_transient, |_| async {
                set_record(self.store.as_ref(), &path, trade)
                    .await
                    .map_err(LedgerError::from)
            })
            .await
    }

    async fn write_listing_status(&self, listing_id: &str, status: ListingStatus) -> Result<()> {
        let path = paths::listing(listing_id);
        self.retry
            .retry_if(LedgerError::is_transient, |_| async {
                self.store
                    .update(&path, fields([("status", json!(status))]))
                    .await
                    .map_err(LedgerError::from)
            })
            .await
    }

    async fn write_trade_resolution(&self, trade: &EscrowTrade) -> Result<()> {
        let path = paths::trade(&trade.id);
        let updates = fields([
            ("status", json!(trade.status)),
            ("resolved_at_ms", json!(trade.resolved_at_ms)),
            ("resolved_by", json!(trade.resolved_by)),
        ]);
        self.retry
            .retry_if(LedgerError::is_transient, |_| async {
                self.store
                    .update(&path, updates.clone())
                    .await
                    .map_err(LedgerError::from)
            })
            .await
    }

    async fn scan_root<T>(&self, root: &StorePath) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let value = self
            .retry
            .retry_if(LedgerError::is_transient, |_| async {
                self.store.get(root).await.map_err(LedgerError::from)
            })
            .await?;
        let Some(value) = value else {
            return Ok(Vec::new());
        };
        let map = value.as_object().cloned().unwrap_or_default();
        let mut records = Vec::with_capacity(map.len());
        for (id, node) in map {
            if node.is_null() {
                continue;
            }
            let record: T = from_value(node)
                .map_err(|err| StoreError::corrupt(root.child(&id), err.to_string()))?;
            records.push(record);
        }
        Ok(records)
    }

    async fn refund_reservation(&self, account_id: &str, amount: Amount, context: &str) {
        if let Err(err) = self.accounts.release_funds(account_id, amount).await {
            error!(
                "[escrow] could not return {amount} to {account_id} after {context}: {err}; \
                 manual reconciliation required"
            );
        }
    }

    async fn recover_settlement(&self, account_id: &str, amount: Amount, context: &str) {
        if let Err(err) = self.accounts.reserve_funds(account_id, amount).await {
            error!(
                "[escrow] could not take back {amount} from {account_id} after {context}: {err}; \
                 manual reconciliation required"
            );
        }
    }

    async fn restore_listing(&self, listing_id: &str, status: ListingStatus, context: &str) {
        if let Err(err) = self.write_listing_status(listing_id, status).await {
            error!(
                "[escrow] could not move listing {listing_id} back to {} after {context}: {err}; \
                 manual reconciliation required",
                status.as_str()
            );
        }
    }
}
