// Copyright (c) James Kassemi, SC, US. All rights reserved.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Identifiers are plain strings; the store keys records by them.
pub type AccountId = String;
pub type OrderId = String;
pub type TradeId = String;
pub type ListingId = String;

/// Integer money in the smallest currency unit. Balances never go negative.
pub type Amount = u64;

/// Milliseconds since the Unix epoch.
pub type TimestampMs = i64;

pub fn now_ms() -> TimestampMs {
    Utc::now().timestamp_millis()
}

/// Wallet account. `balance` is only ever written through the account
/// primitives; everything else is profile data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub phone: String,
    pub password_hash: String,
    pub password_salt: String,
    pub balance: Amount,
    pub created_at_ms: TimestampMs,
    #[serde(default)]
    pub last_name_change_ms: TimestampMs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderKind {
    GameTopup,
    BalanceTopup,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::GameTopup => "game-topup",
            OrderKind::BalanceTopup => "balance-topup",
        }
    }

    /// Which way money moves over the order's lifetime. Game top-ups spend
    /// wallet balance up front; balance top-ups are funded out-of-band and
    /// credit the wallet when an operator completes them.
    pub fn direction(&self) -> FundingDirection {
        match self {
            OrderKind::GameTopup => FundingDirection::Debit,
            OrderKind::BalanceTopup => FundingDirection::Credit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundingDirection {
    Debit,
    Credit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Bankak,
    Mycashy,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Bankak => "bankak",
            PaymentMethod::Mycashy => "mycashy",
        }
    }
}

/// Order payload: an offer reference for game top-ups, a payment method for
/// balance top-ups. Stored inline with the order record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderPayload {
    GameTopup {
        game_id: String,
        game_name: String,
        offer_id: String,
        offer_name: String,
        player_ref: String,
    },
    BalanceTopup { method: PaymentMethod },
}

/// Purchase or top-up request. Terminal orders are immutable except the
/// audit fields (`resolved_at_ms`, `processed_by`, `cancel_reason`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub account_id: AccountId,
    pub kind: OrderKind,
    pub amount: Amount,
    pub status: OrderStatus,
    pub payload: OrderPayload,
    pub created_at_ms: TimestampMs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at_ms: Option<TimestampMs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Escrow,
    Released,
    Refunded,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Escrow => "escrow",
            TradeStatus::Released => "released",
            TradeStatus::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TradeStatus::Released | TradeStatus::Refunded)
    }
}

/// Escrowed purchase of a listed game account. The buyer's funds are held
/// from open until release or refund.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowTrade {
    pub id: TradeId,
    pub listing_id: ListingId,
    pub buyer_id: AccountId,
    pub seller_id: AccountId,
    pub price: Amount,
    pub status: TradeStatus,
    pub opened_at_ms: TimestampMs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at_ms: Option<TimestampMs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Available,
    Pending,
    Sold,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Available => "available",
            ListingStatus::Pending => "pending",
            ListingStatus::Sold => "sold",
        }
    }
}

/// Seller-published game account offered for sale. `pending` while a trade
/// holds it in escrow; at most one non-terminal trade exists per listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub seller_id: AccountId,
    pub seller_name: String,
    pub game: String,
    pub title: String,
    pub description: String,
    pub price: Amount,
    pub status: ListingStatus,
    pub created_at_ms: TimestampMs,
}

/// Catalog entry: a game with its purchasable top-up offers. The catalog is
/// the price authority; clients never supply prices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub name: String,
    pub category: String,
    pub offers: Vec<Offer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: String,
    pub name: String,
    pub price: Amount,
}

/// User-facing feed entry written by the store-backed notification sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<TradeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
    pub created_at_ms: TimestampMs,
    #[serde(default)]
    pub read: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&OrderKind::GameTopup).unwrap();
        assert_eq!(json, "\"game-topup\"");
        let back: OrderKind = serde_json::from_str("\"balance-topup\"").unwrap();
        assert_eq!(back, OrderKind::BalanceTopup);
    }

    #[test]
    fn statuses_expose_terminal_states() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!TradeStatus::Escrow.is_terminal());
        assert!(TradeStatus::Released.is_terminal());
        assert!(TradeStatus::Refunded.is_terminal());
    }

    #[test]
    fn order_payload_roundtrips_untagged() {
        let payload = OrderPayload::BalanceTopup {
            method: PaymentMethod::Bankak,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["method"], "bankak");
        let back: OrderPayload = serde_json::from_value(value).unwrap();
        assert!(matches!(
            back,
            OrderPayload::BalanceTopup {
                method: PaymentMethod::Bankak
            }
        ));
    }

    #[test]
    fn funding_direction_follows_kind() {
        assert_eq!(OrderKind::GameTopup.direction(), FundingDirection::Debit);
        assert_eq!(OrderKind::BalanceTopup.direction(), FundingDirection::Credit);
    }
}
