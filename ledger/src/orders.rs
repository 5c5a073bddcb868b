// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Order ledger. Orders move `pending -> completed | cancelled`; terminal
//! states are final and the transition table below is the only authority.
//!
//! Money moves before the terminal status is written, under the order lock.
//! If the status write then fails the balance effect is compensated, so a
//! terminal order always carries its balance effect and a pending order
//! never does. Exactly-once refunds fall out of the same rule: a second
//! cancel fails the transition check before any funds move.

use std::collections::HashMap;
use std::sync::Arc;

use log::{error, info};
use parking_lot::Mutex;
use serde_json::{from_value, json};
use tokio::sync::Mutex as AsyncMutex;

use core_types::ids;
use core_types::retry::RetryPolicy;
use core_types::types::{
    now_ms, Amount, FundingDirection, Order, OrderId, OrderKind, OrderPayload, OrderStatus,
    PaymentMethod,
};
use store_api::{fields, get_record, set_record, Store, StoreError, StorePath};

use crate::accounts::AccountStore;
use crate::catalog::Catalog;
use crate::config::{LedgerConfig, MAX_AMOUNT};
use crate::error::{LedgerError, Result};
use crate::events::{LedgerEvent, NotificationSink};
use crate::paths;
use crate::session::{Actor, Session};

const ORDER_TRANSITIONS: &[(OrderStatus, OrderStatus)] = &[
    (OrderStatus::Pending, OrderStatus::Completed),
    (OrderStatus::Pending, OrderStatus::Cancelled),
];

fn validate_transition(from: OrderStatus, to: OrderStatus) -> Result<()> {
    if ORDER_TRANSITIONS
        .iter()
        .any(|(valid_from, valid_to)| *valid_from == from && *valid_to == to)
    {
        Ok(())
    } else {
        Err(LedgerError::InvalidTransition {
            entity: "order",
            from: from.as_str(),
            attempted: to.as_str(),
        })
    }
}

pub struct OrderLedger {
    store: Arc<dyn Store>,
    accounts: Arc<AccountStore>,
    catalog: Arc<Catalog>,
    sink: Arc<dyn NotificationSink>,
    retry: RetryPolicy,
    min_topup: Amount,
    locks: Mutex<HashMap<OrderId, Arc<AsyncMutex<()>>>>,
}

impl OrderLedger {
    pub fn new(
        store: Arc<dyn Store>,
        accounts: Arc<AccountStore>,
        catalog: Arc<Catalog>,
        sink: Arc<dyn NotificationSink>,
        config: &LedgerConfig,
    ) -> Self {
        Self {
            store,
            accounts,
            catalog,
            sink,
            retry: config.retry.clone(),
            min_topup: config.min_topup,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Buy a catalog offer. Reserves the price from the buyer first; if the
    /// reservation fails no order record is created. The order id derives
    /// from `idempotency_key`, so a retried call converges on the order the
    /// first attempt created.
    pub async fn create_topup_order(
        &self,
        session: &Session,
        game_id: &str,
        offer_id: &str,
        player_ref: &str,
        idempotency_key: &str,
    ) -> Result<Order> {
        let account_id = session.require_account("create order")?.clone();
        let player_ref = player_ref.trim();
        if player_ref.is_empty() {
            return Err(LedgerError::MissingField { field: "player_ref" });
        }
        let key = idempotency_key.trim();
        if key.is_empty() {
            return Err(LedgerError::MissingField { field: "idempotency_key" });
        }
        let (game, offer) = self.catalog.resolve_offer(game_id, offer_id).await?;

        let order_id = ids::order_uid(&account_id, key);
        let lock = self.order_lock(&order_id);
        let _guard = lock.lock().await;
        if let Some(existing) = self.try_load(&account_id, &order_id).await? {
            return Ok(existing);
        }

        let token = self.accounts.reserve_funds(&account_id, offer.price).await?;
        let order = Order {
            id: order_id,
            account_id: account_id.clone(),
            kind: OrderKind::GameTopup,
            amount: offer.price,
            status: OrderStatus::Pending,
            payload: OrderPayload::GameTopup {
                game_id: game.id,
                game_name: game.name,
                offer_id: offer.id,
                offer_name: offer.name,
                player_ref: player_ref.to_string(),
            },
            created_at_ms: now_ms(),
            resolved_at_ms: None,
            processed_by: None,
            cancel_reason: None,
        };
        if let Err(err) = self.put_order(&order).await {
            self.refund_reservation(&account_id, token.amount, "failed order write")
                .await;
            return Err(err);
        }
        info!(
            "[orders] created {} ({} {}) for {account_id}",
            order.id,
            order.kind.as_str(),
            order.amount
        );
        self.sink.deliver(&LedgerEvent::OrderCreated {
            order: order.clone(),
        });
        Ok(order)
    }

    /// Request a wallet top-up. Credit-direction: nothing is reserved now,
    /// the balance is credited when an operator completes the order.
    pub async fn create_balance_order(
        &self,
        session: &Session,
        amount: Amount,
        method: PaymentMethod,
        idempotency_key: &str,
    ) -> Result<Order> {
        let account_id = session.require_account("create order")?.clone();
        if amount < self.min_topup || amount > MAX_AMOUNT {
            return Err(LedgerError::AmountOutOfRange {
                amount,
                min: self.min_topup,
                max: MAX_AMOUNT,
            });
        }
        let key = idempotency_key.trim();
        if key.is_empty() {
            return Err(LedgerError::MissingField { field: "idempotency_key" });
        }
        self.accounts.get_account(&account_id).await?;

        let order_id = ids::order_uid(&account_id, key);
        let lock = self.order_lock(&order_id);
        let _guard = lock.lock().await;
        if let Some(existing) = self.try_load(&account_id, &order_id).await? {
            return Ok(existing);
        }

        let order = Order {
            id: order_id,
            account_id: account_id.clone(),
            kind: OrderKind::BalanceTopup,
            amount,
            status: OrderStatus::Pending,
            payload: OrderPayload::BalanceTopup { method },
            created_at_ms: now_ms(),
            resolved_at_ms: None,
            processed_by: None,
            cancel_reason: None,
        };
        self.put_order(&order).await?;
        info!(
            "[orders] created {} ({} {}) for {account_id}",
            order.id,
            order.kind.as_str(),
            order.amount
        );
        self.sink.deliver(&LedgerEvent::OrderCreated {
            order: order.clone(),
        });
        Ok(order)
    }

    /// Operator-only. Credits the wallet for balance top-ups; the emitted
    /// event fires exactly once because only one call can win the
    /// pending -> completed transition.
    pub async fn complete_order(
        &self,
        account_id: &str,
        order_id: &str,
        actor: &Actor,
    ) -> Result<Order> {
        if !actor.is_operator() {
            return Err(LedgerError::NotPermitted {
                actor: actor.to_string(),
                action: "complete order",
            });
        }
        let lock = self.order_lock(order_id);
        let _guard = lock.lock().await;
        let mut order = self.load_order(account_id, order_id).await?;
        validate_transition(order.status, OrderStatus::Completed)?;

        let credited = match order.kind.direction() {
            FundingDirection::Credit => {
                self.accounts.release_funds(account_id, order.amount).await?;
                true
            }
            FundingDirection::Debit => false,
        };

        order.status = OrderStatus::Completed;
        order.resolved_at_ms = Some(now_ms());
        order.processed_by = Some(actor.to_string());
        if let Err(err) = self.write_resolution(&order).await {
            if credited {
                self.recover_credit(account_id, order.amount, "failed completion write")
                    .await;
            }
            return Err(err);
        }
        info!("[orders] completed {order_id} by {actor}");
        self.sink.deliver(&LedgerEvent::OrderCompleted {
            order: order.clone(),
        });
        Ok(order)
    }

    /// Operators may cancel any order; a customer only their own. Refund and
    /// status change commit or roll back together.
    pub async fn cancel_order(
        &self,
        account_id: &str,
        order_id: &str,
        actor: &Actor,
        reason: Option<&str>,
    ) -> Result<Order> {
        let owns = actor.account_id().map(|id| id == account_id).unwrap_or(false);
        if !actor.is_operator() && !owns {
            return Err(LedgerError::NotPermitted {
                actor: actor.to_string(),
                action: "cancel order",
            });
        }
        let lock = self.order_lock(order_id);
        let _guard = lock.lock().await;
        let mut order = self.load_order(account_id, order_id).await?;
        validate_transition(order.status, OrderStatus::Cancelled)?;

        let refunded = match order.kind.direction() {
            FundingDirection::Debit => {
                self.accounts.release_funds(account_id, order.amount).await?;
                true
            }
            FundingDirection::Credit => false,
        };

        order.status = OrderStatus::Cancelled;
        order.resolved_at_ms = Some(now_ms());
        order.processed_by = Some(actor.to_string());
        order.cancel_reason = reason
            .map(|reason| reason.trim().to_string())
            .filter(|reason| !reason.is_empty());
        if let Err(err) = self.write_resolution(&order).await {
            if refunded {
                self.recover_credit(account_id, order.amount, "failed cancellation write")
                    .await;
            }
            return Err(err);
        }
        info!("[orders] cancelled {order_id} by {actor}");
        self.sink.deliver(&LedgerEvent::OrderCancelled {
            order: order.clone(),
        });
        Ok(order)
    }

    pub async fn order(&self, account_id: &str, order_id: &str) -> Result<Order> {
        self.load_order(account_id, order_id).await
    }

    /// One account's orders, newest first.
    pub async fn orders_for_account(
        &self,
        account_id: &str,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>> {
        let path = paths::orders_for(account_id);
        let value = self
            .retry
            .retry_if(LedgerError::is_transient, |_| async {
                self.store.get(&path).await.map_err(LedgerError::from)
            })
            .await?;
        let mut orders = decode_order_bucket(&path, value)?;
        if let Some(status) = status {
            orders.retain(|order| order.status == status);
        }
        orders.sort_by_key(|order| std::cmp::Reverse(order.created_at_ms));
        Ok(orders)
    }

    /// The operator work queue, oldest first.
    pub async fn pending_orders(&self) -> Result<Vec<Order>> {
        let mut orders = self.all_orders().await?;
        orders.retain(|order| order.status == OrderStatus::Pending);
        orders.sort_by_key(|order| order.created_at_ms);
        Ok(orders)
    }

    pub(crate) async fn all_orders(&self) -> Result<Vec<Order>> {
        let value = self
            .retry
            .retry_if(LedgerError::is_transient, |_| async {
                self.store
                    .get(&paths::orders_root())
                    .await
                    .map_err(LedgerError::from)
            })
            .await?;
        let Some(value) = value else {
            return Ok(Vec::new());
        };
        let mut orders = Vec::new();
        for (account_id, bucket) in value.as_object().cloned().unwrap_or_default() {
            if bucket.is_null() {
                continue;
            }
            orders.extend(decode_order_bucket(
                &paths::orders_for(&account_id),
                Some(bucket),
            )?);
        }
        Ok(orders)
    }

    fn order_lock(&self, order_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(
            locks
                .entry(order_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    async fn load_order(&self, account_id: &str, order_id: &str) -> Result<Order> {
        self.try_load(account_id, order_id)
            .await?
            .ok_or_else(|| LedgerError::OrderNotFound {
                order_id: order_id.to_string(),
            })
    }

    async fn try_load(&self, account_id: &str, order_id: &str) -> Result<Option<Order>> {
        let path = paths::order(account_id, order_id);
        self.retry
            .retry_if(LedgerError::is_transient, |_| async {
                get_record::<Order>(self.store.as_ref(), &path)
                    .await
                    .map_err(LedgerError::from)
            })
            .await
    }

    async fn put_order(&self, order: &Order) -> Result<()> {
        let path = paths::order(&order.account_id, &order.id);
        self.retry
            .retry_if(LedgerError::is_transient, |_| async {
                set_record(self.store.as_ref(), &path, order)
                    .await
                    .map_err(LedgerError::from)
            })
            .await
    }

    async fn write_resolution(&self, order: &Order) -> Result<()> {
        let path = paths::order(&order.account_id, &order.id);
        let mut updates = fields([
            ("status", json!(order.status)),
            ("resolved_at_ms", json!(order.resolved_at_ms)),
            ("processed_by", json!(order.processed_by)),
        ]);
        if let Some(reason) = &order.cancel_reason {
            updates.insert("cancel_reason".to_string(), json!(reason));
        }
        self.retry
            .retry_if(LedgerError::is_transient, |_| async {
                self.store
                    .update(&path, updates.clone())
                    .await
                    .map_err(LedgerError::from)
            })
            .await
    }

    async fn refund_reservation(&self, account_id: &str, amount: Amount, context: &str) {
        if let Err(err) = self.accounts.release_funds(account_id, amount).await {
            error!(
                "[orders] could not return {amount} to {account_id} after {context}: {err}; \
                 manual reconciliation required"
            );
        }
    }

    async fn recover_credit(&self, account_id: &str, amount: Amount, context: &str) {
        if let Err(err) = self.accounts.reserve_funds(account_id, amount).await {
            error!(
                "[orders] could not take back {amount} from {account_id} after {context}: {err}; \
                 manual reconciliation required"
            );
        }
    }
}

fn decode_order_bucket(
    path: &StorePath,
    value: Option<serde_json::Value>,
) -> Result<Vec<Order>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let map = value
        .as_object()
        .ok_or_else(|| StoreError::corrupt(path, "expected an object of orders"))?;
    let mut orders = Vec::with_capacity(map.len());
    for (order_id, node) in map {
        if node.is_null() {
            continue;
        }
        let order: Order = from_value(node.clone())
            .map_err(|err| StoreError::corrupt(path.child(order_id), err.to_string()))?;
        orders.push(order);
    }
    Ok(orders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;
    use memory_store::MemoryStore;
    use store_api::StoreOp;

    struct Fixture {
        store: Arc<MemoryStore>,
        accounts: Arc<AccountStore>,
        orders: OrderLedger,
        sink: Arc<RecordingSink>,
    }

    async fn fixture() -> Fixture {
        // Single-attempt retries keep fault-injection tests fast.
        let config = LedgerConfig::new().with_retry_policy(RetryPolicy::new(1, 1, 1, 0.0));
        let store = Arc::new(MemoryStore::new());
        let accounts = Arc::new(AccountStore::new(store.clone(), &config));
        let catalog = Arc::new(Catalog::new(store.clone(), &config));
        catalog.seed_defaults_if_empty().await.unwrap();
        let sink = Arc::new(RecordingSink::new());
        let orders = OrderLedger::new(
            store.clone(),
            accounts.clone(),
            catalog,
            sink.clone(),
            &config,
        );
        Fixture {
            store,
            accounts,
            orders,
            sink,
        }
    }

    async fn funded_customer(fx: &Fixture, balance: Amount) -> Session {
        let account = fx
            .accounts
            .register("Alice", "0912000111", "pw")
            .await
            .unwrap();
        if balance > 0 {
            fx.accounts.release_funds(&account.id, balance).await.unwrap();
        }
        Session::customer(account.id)
    }

    async fn balance_of(fx: &Fixture, session: &Session) -> Amount {
        let id = session.require_account("test").unwrap();
        fx.accounts.get_account(id).await.unwrap().balance
    }

    #[tokio::test]
    async fn purchase_reserves_then_cancel_refunds_once() {
        let fx = fixture().await;
        let session = funded_customer(&fx, 1_000).await;
        let account_id = session.require_account("test").unwrap().clone();

        // mlbb dia86 costs 500
        let order = fx
            .orders
            .create_topup_order(&session, "mlbb", "dia86", "player#77", "key-1")
            .await
            .unwrap();
        assert_eq!(order.amount, 500);
        assert_eq!(balance_of(&fx, &session).await, 500);

        let cancelled = fx
            .orders
            .cancel_order(&account_id, &order.id, session.actor(), Some("out of stock"))
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(balance_of(&fx, &session).await, 1_000);

        // A duplicate cancel must fail before any funds move.
        let err = fx
            .orders
            .cancel_order(&account_id, &order.id, session.actor(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
        assert_eq!(balance_of(&fx, &session).await, 1_000);
    }

    #[tokio::test]
    async fn insufficient_funds_leaves_no_order() {
        let fx = fixture().await;
        let session = funded_customer(&fx, 1_000).await;
        let account_id = session.require_account("test").unwrap().clone();

        // genshin gc300 costs 2200
        let err = fx
            .orders
            .create_topup_order(&session, "genshin", "gc300", "traveler", "key-1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientFunds {
                needed: 2_200,
                available: 1_000
            }
        ));
        assert_eq!(balance_of(&fx, &session).await, 1_000);
        assert!(fx
            .orders
            .orders_for_account(&account_id, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn same_key_converges_on_one_order() {
        let fx = fixture().await;
        let session = funded_customer(&fx, 1_000).await;

        let first = fx
            .orders
            .create_topup_order(&session, "mlbb", "dia86", "player#77", "key-1")
            .await
            .unwrap();
        let second = fx
            .orders
            .create_topup_order(&session, "mlbb", "dia86", "player#77", "key-1")
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(balance_of(&fx, &session).await, 500);
        assert_eq!(fx.sink.names(), vec!["order_created"]);
    }

    #[tokio::test]
    async fn completing_balance_topup_credits_exactly_once() {
        let fx = fixture().await;
        let session = funded_customer(&fx, 0).await;
        let account_id = session.require_account("test").unwrap().clone();
        let admin = Actor::Admin("ops-1".to_string());

        let order = fx
            .orders
            .create_balance_order(&session, 500, PaymentMethod::Bankak, "topup-1")
            .await
            .unwrap();
        assert_eq!(balance_of(&fx, &session).await, 0);

        let completed = fx
            .orders
            .complete_order(&account_id, &order.id, &admin)
            .await
            .unwrap();
        assert_eq!(completed.status, OrderStatus::Completed);
        assert_eq!(completed.processed_by.as_deref(), Some("admin:ops-1"));
        assert_eq!(balance_of(&fx, &session).await, 500);

        let err = fx
            .orders
            .complete_order(&account_id, &order.id, &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
        assert_eq!(balance_of(&fx, &session).await, 500);
        assert_eq!(fx.sink.names(), vec!["order_created", "order_completed"]);
    }

    #[tokio::test]
    async fn customers_cannot_complete_orders() {
        let fx = fixture().await;
        let session = funded_customer(&fx, 0).await;
        let account_id = session.require_account("test").unwrap().clone();

        let order = fx
            .orders
            .create_balance_order(&session, 500, PaymentMethod::Mycashy, "topup-1")
            .await
            .unwrap();
        let err = fx
            .orders
            .complete_order(&account_id, &order.id, session.actor())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotPermitted { .. }));
    }

    #[tokio::test]
    async fn cancelling_balance_topup_moves_no_funds() {
        let fx = fixture().await;
        let session = funded_customer(&fx, 0).await;
        let account_id = session.require_account("test").unwrap().clone();
        let admin = Actor::Admin("ops-1".to_string());

        let order = fx
            .orders
            .create_balance_order(&session, 500, PaymentMethod::Bankak, "topup-1")
            .await
            .unwrap();
        let cancelled = fx
            .orders
            .cancel_order(&account_id, &order.id, &admin, Some("no receipt"))
            .await
            .unwrap();
        assert_eq!(cancelled.cancel_reason.as_deref(), Some("no receipt"));
        assert_eq!(balance_of(&fx, &session).await, 0);
    }

    #[tokio::test]
    async fn failed_order_write_rolls_back_reservation() {
        let fx = fixture().await;
        let session = funded_customer(&fx, 1_000).await;
        let account_id = session.require_account("test").unwrap().clone();

        fx.store
            .faults()
            .fail_always(StoreOp::Set, paths::orders_root());
        let err = fx
            .orders
            .create_topup_order(&session, "mlbb", "dia86", "player#77", "key-1")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Store(_)));
        fx.store.faults().clear();

        assert_eq!(balance_of(&fx, &session).await, 1_000);
        assert!(fx
            .orders
            .orders_for_account(&account_id, None)
            .await
            .unwrap()
            .is_empty());
        assert!(fx.sink.events().is_empty());
    }

    #[tokio::test]
    async fn below_minimum_topup_rejected() {
        let fx = fixture().await;
        let session = funded_customer(&fx, 0).await;
        let err = fx
            .orders
            .create_balance_order(&session, 50, PaymentMethod::Bankak, "topup-1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::AmountOutOfRange { amount: 50, min: 100, .. }
        ));
    }

    #[tokio::test]
    async fn pending_queue_is_oldest_first() {
        let fx = fixture().await;
        let session = funded_customer(&fx, 2_000).await;

        let first = fx
            .orders
            .create_topup_order(&session, "mlbb", "dia86", "player#77", "key-1")
            .await
            .unwrap();
        let second = fx
            .orders
            .create_balance_order(&session, 300, PaymentMethod::Bankak, "key-2")
            .await
            .unwrap();

        let queue = fx.orders.pending_orders().await.unwrap();
        let ids: Vec<&str> = queue.iter().map(|order| order.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first.id.as_str()));
        assert!(ids.contains(&second.id.as_str()));
        assert!(queue[0].created_at_ms <= queue[1].created_at_ms);
    }
}
