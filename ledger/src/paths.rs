//! Store layout. All persisted state lives under these paths:
//! `accounts/{id}`, `orders/{account_id}/{order_id}`, `listings/{id}`,
//! `trades/{id}`, `games/{id}`, `notifications/{account_id}/{push_id}`.

use store_api::StorePath;

pub fn accounts_root() -> StorePath {
    StorePath::new(["accounts"])
}

pub fn account(account_id: &str) -> StorePath {
    accounts_root().child(account_id)
}

pub fn orders_root() -> StorePath {
    StorePath::new(["orders"])
}

pub fn orders_for(account_id: &str) -> StorePath {
    orders_root().child(account_id)
}

pub fn order(account_id: &str, order_id: &str) -> StorePath {
    orders_for(account_id).child(order_id)
}

pub fn listings_root() -> StorePath {
    StorePath::new(["listings"])
}

pub fn listing(listing_id: &str) -> StorePath {
    listings_root().child(listing_id)
}

pub fn trades_root() -> StorePath {
    StorePath::new(["trades"])
}

pub fn trade(trade_id: &str) -> StorePath {
    trades_root().child(trade_id)
}

pub fn games_root() -> StorePath {
    StorePath::new(["games"])
}

pub fn game(game_id: &str) -> StorePath {
    games_root().child(game_id)
}

pub fn notifications_for(account_id: &str) -> StorePath {
    StorePath::new(["notifications"]).child(account_id)
}
