// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Account registry and balance primitives.
//!
//! Every balance mutation goes through [`AccountStore::reserve_funds`],
//! [`AccountStore::release_funds`] or [`AccountStore::settle_funds`], each of
//! which holds the per-account lock for its whole read-check-write. That lock
//! is what makes reservations atomic: two concurrent reservations against the
//! same account serialize, and the loser re-reads the decremented balance.
//!
//! Lock order: callers holding an order, trade or listing lock may take an
//! account lock, never the reverse. Registration and phone changes take the
//! registry lock first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use parking_lot::Mutex;
use serde_json::{json, Map};
use tokio::sync::Mutex as AsyncMutex;

use core_types::ids;
use core_types::retry::RetryPolicy;
use core_types::types::{now_ms, Account, AccountId, Amount};
use store_api::{fields, get_record, set_record, Store, StoreError};

use crate::config::{LedgerConfig, MAX_AMOUNT};
use crate::error::{LedgerError, Result};
use crate::paths;
use crate::session::Session;

const DAY_MS: i64 = 86_400_000;
const ID_ALLOC_ATTEMPTS: usize = 8;

/// Receipt for a successful reservation. Compensation paths hand the receipt
/// fields back through [`AccountStore::release_funds`], so a release without
/// a prior reservation cannot happen by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationToken {
    pub account_id: AccountId,
    pub amount: Amount,
    pub balance_after: Amount,
}

/// Partial profile update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
}

pub struct AccountStore {
    store: Arc<dyn Store>,
    locks: Mutex<HashMap<AccountId, Arc<AsyncMutex<()>>>>,
    registry_lock: AsyncMutex<()>,
    retry: RetryPolicy,
    name_change_cooldown: Duration,
}

impl AccountStore {
    pub fn new(store: Arc<dyn Store>, config: &LedgerConfig) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
            registry_lock: AsyncMutex::new(()),
            retry: config.retry.clone(),
            name_change_cooldown: config.name_change_cooldown,
        }
    }

    /// Per-account serialization point. One lock per account id, created on
    /// first use and kept for the process lifetime.
    pub(crate) fn account_lock(&self, account_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(
            locks
                .entry(account_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Atomically check-and-decrement `amount` from the account balance.
    pub async fn reserve_funds(
        &self,
        account_id: &str,
        amount: Amount,
    ) -> Result<ReservationToken> {
        if amount == 0 || amount > MAX_AMOUNT {
            return Err(LedgerError::AmountOutOfRange {
                amount,
                min: 1,
                max: MAX_AMOUNT,
            });
        }
        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;
        let account = self.load_account(account_id).await?;
        if account.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                needed: amount,
                available: account.balance,
            });
        }
        let balance_after = account.balance - amount;
        self.write_balance(account_id, balance_after).await?;
        info!(
            "[accounts] reserved {amount} from {account_id}; balance {} -> {balance_after}",
            account.balance
        );
        Ok(ReservationToken {
            account_id: account_id.to_string(),
            amount,
            balance_after,
        })
    }

    /// Credit a reserved amount back to its owner. Returns the new balance.
    pub async fn release_funds(&self, account_id: &str, amount: Amount) -> Result<Amount> {
        self.credit(account_id, amount, "released").await
    }

    /// Credit escrowed funds to the counterparty. Returns the new balance.
    pub async fn settle_funds(&self, account_id: &str, amount: Amount) -> Result<Amount> {
        self.credit(account_id, amount, "settled").await
    }

    async fn credit(&self, account_id: &str, amount: Amount, action: &str) -> Result<Amount> {
        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;
        let account = self.load_account(account_id).await?;
        let balance_after = account.balance.checked_add(amount).ok_or_else(|| {
            LedgerError::Store(StoreError::corrupt(
                paths::account(account_id),
                "balance overflow",
            ))
        })?;
        self.write_balance(account_id, balance_after).await?;
        info!(
            "[accounts] {action} {amount} to {account_id}; balance {} -> {balance_after}",
            account.balance
        );
        Ok(balance_after)
    }

    pub async fn register(&self, name: &str, phone: &str, password: &str) -> Result<Account> {
        let name = name.trim();
        let phone = phone.trim();
        if name.is_empty() {
            return Err(LedgerError::MissingField { field: "name" });
        }
        if phone.is_empty() {
            return Err(LedgerError::MissingField { field: "phone" });
        }
        if password.is_empty() {
            return Err(LedgerError::MissingField { field: "password" });
        }

        // Phone uniqueness is only sound while no other registration or phone
        // change can interleave.
        let _registry = self.registry_lock.lock().await;
        if self.find_by_phone(phone).await?.is_some() {
            return Err(LedgerError::PhoneTaken);
        }
        let account_id = self.fresh_account_id().await?;
        let salt = generate_salt();
        let account = Account {
            id: account_id,
            name: name.to_string(),
            phone: phone.to_string(),
            password_hash: password_hash(&salt, password),
            password_salt: salt,
            balance: 0,
            created_at_ms: now_ms(),
            last_name_change_ms: 0,
        };
        self.put_account(&account).await?;
        info!("[accounts] registered {} ({})", account.id, account.name);
        Ok(account)
    }

    /// `login_id` may be the account id or the phone number. Failures are
    /// uniform so callers cannot tell which part was wrong.
    pub async fn login(&self, login_id: &str, password: &str) -> Result<Account> {
        let login_id = login_id.trim();
        if login_id.is_empty() || password.is_empty() {
            return Err(LedgerError::InvalidCredentials);
        }
        let account = self
            .list_accounts()
            .await?
            .into_iter()
            .find(|acct| acct.id == login_id || acct.phone == login_id)
            .ok_or(LedgerError::InvalidCredentials)?;
        if password_hash(&account.password_salt, password) != account.password_hash {
            return Err(LedgerError::InvalidCredentials);
        }
        Ok(account)
    }

    pub async fn get_account(&self, account_id: &str) -> Result<Account> {
        self.load_account(account_id).await
    }

    pub async fn update_profile(
        &self,
        session: &Session,
        changes: ProfileChanges,
    ) -> Result<Account> {
        let account_id = session.require_account("update profile")?.clone();

        // Same exclusion as register when the phone number moves.
        let _registry = match changes.phone {
            Some(_) => Some(self.registry_lock.lock().await),
            None => None,
        };

        let lock = self.account_lock(&account_id);
        let _guard = lock.lock().await;
        let mut account = self.load_account(&account_id).await?;
        let mut updates = Map::new();

        if let Some(name) = &changes.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(LedgerError::MissingField { field: "name" });
            }
            if name != account.name {
                let now = now_ms();
                if account.last_name_change_ms > 0 {
                    let elapsed = now - account.last_name_change_ms;
                    let cooldown = self.name_change_cooldown.as_millis() as i64;
                    if elapsed < cooldown {
                        let days_left = (cooldown - elapsed + DAY_MS - 1) / DAY_MS;
                        return Err(LedgerError::NameChangeCooldown { days_left });
                    }
                }
                account.name = name.to_string();
                account.last_name_change_ms = now;
                updates.insert("name".to_string(), json!(account.name));
                updates.insert("last_name_change_ms".to_string(), json!(now));
            }
        }

        if let Some(phone) = &changes.phone {
            let phone = phone.trim();
            if phone.is_empty() {
                return Err(LedgerError::MissingField { field: "phone" });
            }
            if phone != account.phone {
                if let Some(existing) = self.find_by_phone(phone).await? {
                    if existing.id != account.id {
                        return Err(LedgerError::PhoneTaken);
                    }
                }
                account.phone = phone.to_string();
                updates.insert("phone".to_string(), json!(account.phone));
            }
        }

        if let Some(password) = &changes.password {
            if password.is_empty() {
                return Err(LedgerError::MissingField { field: "password" });
            }
            let salt = generate_salt();
            account.password_hash = password_hash(&salt, password);
            account.password_salt = salt;
            updates.insert("password_hash".to_string(), json!(account.password_hash));
            updates.insert("password_salt".to_string(), json!(account.password_salt));
        }

        if updates.is_empty() {
            return Ok(account);
        }
        let path = paths::account(&account_id);
        self.retry
            .retry_if(LedgerError::is_transient, |_| async {
                self.store
                    .update(&path, updates.clone())
                    .await
                    .map_err(LedgerError::from)
            })
            .await?;
        info!("[accounts] profile updated for {account_id}");
        Ok(account)
    }

    /// All accounts, oldest first.
    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let value = self
            .retry
            .retry_if(LedgerError::is_transient, |_| async {
                self.store
                    .get(&paths::accounts_root())
                    .await
                    .map_err(LedgerError::from)
            })
            .await?;
        let Some(value) = value else {
            return Ok(Vec::new());
        };
        let map = value.as_object().cloned().unwrap_or_default();
        let mut accounts = Vec::with_capacity(map.len());
        for (id, node) in map {
            if node.is_null() {
                continue;
            }
            let account: Account = serde_json::from_value(node)
                .map_err(|err| StoreError::corrupt(paths::account(&id), err.to_string()))?;
            accounts.push(account);
        }
        accounts.sort_by_key(|acct| acct.created_at_ms);
        Ok(accounts)
    }

    async fn load_account(&self, account_id: &str) -> Result<Account> {
        let path = paths::account(account_id);
        let record = self
            .retry
            .retry_if(LedgerError::is_transient, |_| async {
                get_record::<Account>(self.store.as_ref(), &path)
                    .await
                    .map_err(LedgerError::from)
            })
            .await?;
        record.ok_or_else(|| LedgerError::AccountNotFound {
            account_id: account_id.to_string(),
        })
    }

    /// Absolute-value write, safe to retry.
    async fn write_balance(&self, account_id: &str, balance: Amount) -> Result<()> {
        let path = paths::account(account_id);
        self.retry
            .retry_if(LedgerError::is_transient, |_| async {
                self.store
                    .update(&path, fields([("balance", json!(balance))]))
                    .await
                    .map_err(LedgerError::from)
            })
            .await
    }

    async fn put_account(&self, account: &Account) -> Result<()> {
        let path = paths::account(&account.id);
        self.retry
            .retry_if(LedgerError::is_transient, |_| async {
                set_record(self.store.as_ref(), &path, account)
                    .await
                    .map_err(LedgerError::from)
            })
            .await
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<Account>> {
        Ok(self
            .list_accounts()
            .await?
            .into_iter()
            .find(|acct| acct.phone == phone))
    }

    async fn fresh_account_id(&self) -> Result<AccountId> {
        for _ in 0..ID_ALLOC_ATTEMPTS {
            let candidate = ids::generate_account_id();
            let path = paths::account(&candidate);
            let taken = self
                .retry
                .retry_if(LedgerError::is_transient, |_| async {
                    get_record::<Account>(self.store.as_ref(), &path)
                        .await
                        .map_err(LedgerError::from)
                })
                .await?;
            if taken.is_none() {
                return Ok(candidate);
            }
        }
        Err(LedgerError::Store(StoreError::corrupt(
            paths::accounts_root(),
            "account id space exhausted",
        )))
    }
}

fn password_hash(salt: &str, password: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hasher.finalize().to_hex().to_string()
}

fn generate_salt() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
