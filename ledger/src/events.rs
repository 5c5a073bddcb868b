//! Ledger events and notification delivery.
//!
//! The core emits one event per committed transition and hands it to a
//! [`NotificationSink`]. Delivery is fire-and-forget: a sink must never
//! fail a ledger operation, and a terminal transition emits exactly once.

use std::sync::Arc;

use log::warn;
use parking_lot::Mutex;
use serde_json::json;
use store_api::{Store, StoreError};

use core_types::types::{now_ms, AccountId, EscrowTrade, Listing, Notification, Order, OrderKind};

use crate::paths;

#[derive(Debug, Clone)]
pub enum LedgerEvent {
    OrderCreated { order: Order },
    OrderCompleted { order: Order },
    OrderCancelled { order: Order },
    TradeOpened { trade: EscrowTrade, listing: Listing },
    TradeReleased { trade: EscrowTrade },
    TradeRefunded { trade: EscrowTrade },
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::OrderCreated { .. } => "order_created",
            LedgerEvent::OrderCompleted { .. } => "order_completed",
            LedgerEvent::OrderCancelled { .. } => "order_cancelled",
            LedgerEvent::TradeOpened { .. } => "trade_opened",
            LedgerEvent::TradeReleased { .. } => "trade_released",
            LedgerEvent::TradeRefunded { .. } => "trade_refunded",
        }
    }
}

pub trait NotificationSink: Send + Sync {
    fn deliver(&self, event: &LedgerEvent);
}

/// Swallows everything; the default for tests and headless use.
pub struct NullSink;

impl NotificationSink for NullSink {
    fn deliver(&self, _event: &LedgerEvent) {}
}

/// Delivers to every attached sink in order.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

impl NotificationSink for FanoutSink {
    fn deliver(&self, event: &LedgerEvent) {
        for sink in &self.sinks {
            sink.deliver(event);
        }
    }
}

/// Captures events for assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<LedgerEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(LedgerEvent::name).collect()
    }
}

impl NotificationSink for RecordingSink {
    fn deliver(&self, event: &LedgerEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Persists user-facing notifications under `notifications/{account_id}`.
///
/// Writes happen on a spawned task so ledger callers never wait on the
/// feed; failures are logged and dropped.
pub struct StoreNotificationSink {
    store: Arc<dyn Store>,
}

impl StoreNotificationSink {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Synchronous-await variant for tests and direct callers.
    pub async fn deliver_now(&self, event: &LedgerEvent) -> Result<(), StoreError> {
        for (account_id, note) in notes_for(event) {
            let value = serde_json::to_value(&note).map_err(|err| {
                StoreError::corrupt(paths::notifications_for(&account_id), err.to_string())
            })?;
            self.store
                .push(&paths::notifications_for(&account_id), value)
                .await?;
        }
        Ok(())
    }
}

impl NotificationSink for StoreNotificationSink {
    fn deliver(&self, event: &LedgerEvent) {
        let notes = notes_for(event);
        if notes.is_empty() {
            return;
        }
        let store = Arc::clone(&self.store);
        let event_name = event.name();
        tokio::spawn(async move {
            for (account_id, note) in notes {
                let path = paths::notifications_for(&account_id);
                let value = match serde_json::to_value(&note) {
                    Ok(value) => value,
                    Err(err) => {
                        warn!("[notify] could not encode {event_name} note: {err}");
                        continue;
                    }
                };
                if let Err(err) = store.push(&path, value).await {
                    warn!("[notify] dropping {event_name} note for {account_id}: {err}");
                }
            }
        });
    }
}

fn note(message: String, kind: &str) -> Notification {
    Notification {
        message,
        kind: kind.to_string(),
        order_id: None,
        trade_id: None,
        amount: None,
        created_at_ms: now_ms(),
        read: false,
    }
}

fn order_note(order: &Order, message: String) -> Notification {
    Notification {
        order_id: Some(order.id.clone()),
        amount: Some(order.amount),
        ..note(message, "order")
    }
}

fn trade_note(trade: &EscrowTrade, message: String) -> Notification {
    Notification {
        trade_id: Some(trade.id.clone()),
        amount: Some(trade.price),
        ..note(message, "trade")
    }
}

/// Who sees what, per event. Mirrors the storefront's feed: buyers follow
/// their orders, sellers hear about escrow on their listings.
fn notes_for(event: &LedgerEvent) -> Vec<(AccountId, Notification)> {
    match event {
        LedgerEvent::OrderCreated { order } => {
            let message = match order.kind {
                OrderKind::GameTopup => "Order received and pending review".to_string(),
                OrderKind::BalanceTopup => {
                    format!("Top-up request for {} received", order.amount)
                }
            };
            vec![(order.account_id.clone(), order_note(order, message))]
        }
        LedgerEvent::OrderCompleted { order } => {
            let message = match order.kind {
                OrderKind::GameTopup => "Order completed and delivered".to_string(),
                OrderKind::BalanceTopup => {
                    format!("Balance top-up approved: +{}", order.amount)
                }
            };
            vec![(order.account_id.clone(), order_note(order, message))]
        }
        LedgerEvent::OrderCancelled { order } => {
            let mut message = match order.kind {
                OrderKind::GameTopup => {
                    format!("Order cancelled; {} refunded to your balance", order.amount)
                }
                OrderKind::BalanceTopup => "Top-up request rejected".to_string(),
            };
            if let Some(reason) = &order.cancel_reason {
                message.push_str(": ");
                message.push_str(reason);
            }
            vec![(order.account_id.clone(), order_note(order, message))]
        }
        LedgerEvent::TradeOpened { trade, listing } => {
            let message = format!(
                "Your listing '{}' has a buyer; {} held in escrow",
                listing.title, trade.price
            );
            vec![(trade.seller_id.clone(), trade_note(trade, message))]
        }
        LedgerEvent::TradeReleased { trade } => vec![
            (
                trade.seller_id.clone(),
                trade_note(trade, format!("Escrow released: +{} settled", trade.price)),
            ),
            (
                trade.buyer_id.clone(),
                trade_note(trade, "Purchase finalized; account handed over".to_string()),
            ),
        ],
        LedgerEvent::TradeRefunded { trade } => vec![
            (
                trade.buyer_id.clone(),
                trade_note(
                    trade,
                    format!("Trade refunded: {} returned to your balance", trade.price),
                ),
            ),
            (
                trade.seller_id.clone(),
                trade_note(trade, "Your listing is available again".to_string()),
            ),
        ],
    }
}

/// JSON body for outbound webhook sinks.
pub fn event_payload(event: &LedgerEvent) -> serde_json::Value {
    match event {
        LedgerEvent::OrderCreated { order }
        | LedgerEvent::OrderCompleted { order }
        | LedgerEvent::OrderCancelled { order } => json!({
            "event": event.name(),
            "order_id": order.id,
            "account_id": order.account_id,
            "kind": order.kind.as_str(),
            "amount": order.amount,
            "status": order.status.as_str(),
        }),
        LedgerEvent::TradeOpened { trade, .. }
        | LedgerEvent::TradeReleased { trade }
        | LedgerEvent::TradeRefunded { trade } => json!({
            "event": event.name(),
            "trade_id": trade.id,
            "listing_id": trade.listing_id,
            "buyer_id": trade.buyer_id,
            "seller_id": trade.seller_id,
            "price": trade.price,
            "status": trade.status.as_str(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::types::{OrderPayload, OrderStatus, PaymentMethod, TradeStatus};
    use memory_store::MemoryStore;
    use store_api::StorePath;

    fn balance_order() -> Order {
        Order {
            id: "order_a1".to_string(),
            account_id: "100200300400".to_string(),
            kind: OrderKind::BalanceTopup,
            amount: 500,
            status: OrderStatus::Pending,
            payload: OrderPayload::BalanceTopup {
                method: PaymentMethod::Bankak,
            },
            created_at_ms: now_ms(),
            resolved_at_ms: None,
            processed_by: None,
            cancel_reason: None,
        }
    }

    fn escrow_trade() -> EscrowTrade {
        EscrowTrade {
            id: "trade_t1".to_string(),
            listing_id: "listing_l1".to_string(),
            buyer_id: "111111111111".to_string(),
            seller_id: "222222222222".to_string(),
            price: 300,
            status: TradeStatus::Escrow,
            opened_at_ms: now_ms(),
            resolved_at_ms: None,
            resolved_by: None,
        }
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let first = Arc::new(RecordingSink::new());
        let second = Arc::new(RecordingSink::new());
        let fanout = FanoutSink::new(vec![first.clone(), second.clone()]);

        fanout.deliver(&LedgerEvent::OrderCreated {
            order: balance_order(),
        });

        assert_eq!(first.names(), vec!["order_created"]);
        assert_eq!(second.names(), vec!["order_created"]);
    }

    #[tokio::test]
    async fn store_sink_writes_buyer_and_seller_feeds() {
        let store = Arc::new(MemoryStore::new());
        let sink = StoreNotificationSink::new(store.clone());

        sink.deliver_now(&LedgerEvent::TradeRefunded {
            trade: escrow_trade(),
        })
        .await
        .unwrap();

        let buyer_feed = store
            .get(&StorePath::new(["notifications", "111111111111"]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buyer_feed.as_object().unwrap().len(), 1);
        let seller_feed = store
            .get(&StorePath::new(["notifications", "222222222222"]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seller_feed.as_object().unwrap().len(), 1);
    }

    #[test]
    fn trade_payload_names_both_parties() {
        let payload = event_payload(&LedgerEvent::TradeReleased {
            trade: escrow_trade(),
        });
        assert_eq!(payload["event"], "trade_released");
        assert_eq!(payload["buyer_id"], "111111111111");
        assert_eq!(payload["seller_id"], "222222222222");
    }
}
