use core_types::types::{AccountId, Amount, ListingId, OrderId, TradeId};
use store_api::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient funds: need {needed}, available {available}")]
    InsufficientFunds { needed: Amount, available: Amount },
    #[error("account {account_id} not found")]
    AccountNotFound { account_id: AccountId },
    #[error("order {order_id} not found")]
    OrderNotFound { order_id: OrderId },
    #[error("trade {trade_id} not found")]
    TradeNotFound { trade_id: TradeId },
    #[error("listing {listing_id} not found")]
    ListingNotFound { listing_id: ListingId },
    #[error("invalid transition: {entity} is {from}, cannot become {attempted}")]
    InvalidTransition {
        entity: &'static str,
        from: &'static str,
        attempted: &'static str,
    },
    #[error("listing {listing_id} is not available (currently {status})")]
    ListingNotAvailable {
        listing_id: ListingId,
        status: &'static str,
    },
    #[error("phone number already registered")]
    PhoneTaken,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("{field} must not be empty")]
    MissingField { field: &'static str },
    #[error("name can change again in {days_left} day(s)")]
    NameChangeCooldown { days_left: i64 },
    #[error("game {game_id} not found")]
    UnknownGame { game_id: String },
    #[error("offer {offer_id} not found for game {game_id}")]
    UnknownOffer { game_id: String, offer_id: String },
    #[error("buyer and seller are the same account")]
    SelfTrade,
    #[error("amount {amount} outside allowed range {min}..={max}")]
    AmountOutOfRange {
        amount: Amount,
        min: Amount,
        max: Amount,
    },
    #[error("{actor} is not permitted to {action}")]
    NotPermitted { actor: String, action: &'static str },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// True when retrying the same call (with the same idempotency key)
    /// may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Store(err) if err.is_retryable())
    }
}
