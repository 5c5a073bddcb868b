//! Ledger service for the storefront.
//!
//! The crate owns every balance- and order-affecting state transition:
//! - [`AccountStore`]: wallet balances behind per-account serialization
//!   (reserve / release / settle), plus registration and login.
//! - [`OrderLedger`]: top-up orders through `pending -> completed |
//!   cancelled`.
//! - [`EscrowManager`]: listed game accounts traded through
//!   `escrow -> released | refunded`.
//! - [`LedgerService`]: facade wiring the components to one [`Store`] and
//!   one [`NotificationSink`].
//!
//! Persistence is the abstract [`Store`] capability; atomicity across paths
//! is composed here with locks and compensation, never assumed from the
//! store.
//!
//! [`Store`]: store_api::Store

pub mod accounts;
pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod orders;
pub mod escrow;
pub mod paths;
pub mod service;
pub mod session;

pub use accounts::{AccountStore, ProfileChanges, ReservationToken};
pub use catalog::Catalog;
pub use config::LedgerConfig;
pub use error::{LedgerError, Result};
pub use events::{FanoutSink, LedgerEvent, NotificationSink, NullSink, StoreNotificationSink};
pub use escrow::EscrowManager;
pub use orders::OrderLedger;
pub use service::{LedgerService, LedgerStatsSnapshot};
pub use session::{Actor, Session};
