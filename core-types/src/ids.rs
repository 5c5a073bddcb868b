// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Identifier generation.
//!
//! Account ids are random 12-digit numeric strings. Order and trade ids are
//! deterministic blake3 digests of the owning account and the caller's
//! idempotency key, so a retried submission lands on the same record instead
//! of producing a duplicate. Listing and push ids are time-ordered.

use blake3::Hasher;
use rand::Rng;

use crate::types::{now_ms, AccountId, ListingId, OrderId, TradeId};

pub const ACCOUNT_ID_DIGITS: usize = 12;

const ID_HASH_LEN: usize = 12;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

struct IdBuilder {
    hasher: Hasher,
}

impl IdBuilder {
    fn new(domain: &[u8]) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(&(domain.len() as u32).to_le_bytes());
        hasher.update(domain);
        Self { hasher }
    }

    fn write_str(&mut self, value: &str) -> &mut Self {
        self.hasher.update(&(value.len() as u32).to_le_bytes());
        self.hasher.update(value.as_bytes());
        self
    }

    fn finish(self) -> String {
        let hash = self.hasher.finalize();
        hex(&hash.as_bytes()[..ID_HASH_LEN])
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(BASE36[(byte >> 4) as usize] as char);
        out.push(BASE36[(byte & 0x0f) as usize] as char);
    }
    out
}

/// Random 12-digit numeric account id. Callers re-roll on the rare
/// collision against the store.
pub fn generate_account_id() -> AccountId {
    let mut rng = rand::thread_rng();
    let mut id = String::with_capacity(ACCOUNT_ID_DIGITS);
    for _ in 0..ACCOUNT_ID_DIGITS {
        id.push(BASE36[rng.gen_range(0..10)] as char);
    }
    id
}

/// Deterministic order id for one logical submission by one account.
pub fn order_uid(account_id: &str, idempotency_key: &str) -> OrderId {
    let mut builder = IdBuilder::new(b"order_uid.v1");
    builder.write_str(account_id).write_str(idempotency_key);
    format!("order_{}", builder.finish())
}

/// Deterministic trade id for one buyer's submission against one listing.
pub fn trade_uid(listing_id: &str, buyer_id: &str, idempotency_key: &str) -> TradeId {
    let mut builder = IdBuilder::new(b"trade_uid.v1");
    builder
        .write_str(listing_id)
        .write_str(buyer_id)
        .write_str(idempotency_key);
    format!("trade_{}", builder.finish())
}

/// Time-ordered listing id.
pub fn listing_id() -> ListingId {
    format!("listing_{}", ordered_suffix(0))
}

/// Time-ordered push id for store-generated children. `seq` breaks ties
/// between pushes in the same millisecond; ids sort lexicographically in
/// creation order within one process.
pub fn push_id(seq: u64) -> String {
    ordered_suffix(seq)
}

fn ordered_suffix(seq: u64) -> String {
    let mut rng = rand::thread_rng();
    let mut out = base36_fixed(now_ms().max(0) as u64, 9);
    out.push_str(&base36_fixed(seq % (36u64.pow(4)), 4));
    for _ in 0..4 {
        out.push(BASE36[rng.gen_range(0..36)] as char);
    }
    out
}

fn base36_fixed(mut value: u64, width: usize) -> String {
    let mut digits = vec![b'0'; width];
    let mut idx = width;
    while value > 0 && idx > 0 {
        idx -= 1;
        digits[idx] = BASE36[(value % 36) as usize];
        value /= 36;
    }
    String::from_utf8(digits).unwrap_or_default()
}
