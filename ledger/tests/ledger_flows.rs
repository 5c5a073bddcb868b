//! End-to-end flows through a bootstrapped service: funding scenarios,
//! idempotence, escrow settlement and rollback under store faults.

use std::sync::Arc;

use core_types::retry::RetryPolicy;
use core_types::types::{Game, ListingStatus, Offer, OrderStatus, PaymentMethod, TradeStatus};
use ledger::events::RecordingSink;
use ledger::{Actor, LedgerConfig, LedgerError, LedgerService, Session};
use memory_store::MemoryStore;
use store_api::{StoreOp, StorePath};

struct World {
    store: Arc<MemoryStore>,
    ledger: Arc<LedgerService>,
    sink: Arc<RecordingSink>,
}

fn world_with(config: LedgerConfig) -> World {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::new());
    let ledger = LedgerService::bootstrap(store.clone(), sink.clone(), config);
    World {
        store,
        ledger,
        sink,
    }
}

fn world() -> World {
    world_with(LedgerConfig::new())
}

/// Fixed-price catalog entry so scenario amounts are exact.
async fn install_test_game(world: &World) {
    let game = Game {
        id: "acme".to_string(),
        name: "Acme Quest".to_string(),
        category: "test".to_string(),
        offers: vec![
            Offer {
                id: "mid".to_string(),
                name: "Mid pack".to_string(),
                price: 500,
            },
            Offer {
                id: "big".to_string(),
                name: "Big pack".to_string(),
                price: 2_000,
            },
        ],
    };
    world.ledger.catalog().put_game(&game).await.unwrap();
}

async fn customer(world: &World, name: &str, phone: &str, balance: u64) -> Session {
    let account = world
        .ledger
        .accounts()
        .register(name, phone, "pw")
        .await
        .unwrap();
    if balance > 0 {
        world
            .ledger
            .accounts()
            .release_funds(&account.id, balance)
            .await
            .unwrap();
    }
    Session::customer(account.id)
}

async fn balance_of(world: &World, session: &Session) -> u64 {
    let id = session.require_account("test").unwrap();
    world.ledger.accounts().get_account(id).await.unwrap().balance
}

#[tokio::test]
async fn game_purchase_debits_at_creation() {
    let world = world();
    install_test_game(&world).await;
    let buyer = customer(&world, "Alice", "0912000111", 1_000).await;
    let buyer_id = buyer.require_account("test").unwrap().clone();
    let admin = Actor::Admin("ops-1".to_string());

    let order = world
        .ledger
        .orders()
        .create_topup_order(&buyer, "acme", "mid", "player#1", "k1")
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.amount, 500);
    assert_eq!(balance_of(&world, &buyer).await, 500);

    // Completion delivers the top-up out of band; no further balance change.
    let completed = world
        .ledger
        .orders()
        .complete_order(&buyer_id, &order.id, &admin)
        .await
        .unwrap();
    assert_eq!(completed.status, OrderStatus::Completed);
    assert_eq!(balance_of(&world, &buyer).await, 500);
    assert_eq!(world.sink.names(), vec!["order_created", "order_completed"]);
}

#[tokio::test]
async fn overdraft_purchase_leaves_no_trace() {
    let world = world();
    install_test_game(&world).await;
    let buyer = customer(&world, "Alice", "0912000111", 1_000).await;
    let buyer_id = buyer.require_account("test").unwrap().clone();

    let err = world
        .ledger
        .orders()
        .create_topup_order(&buyer, "acme", "big", "player#1", "k1")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientFunds {
            needed: 2_000,
            available: 1_000
        }
    ));
    assert_eq!(balance_of(&world, &buyer).await, 1_000);
    assert!(world
        .ledger
        .orders()
        .orders_for_account(&buyer_id, None)
        .await
        .unwrap()
        .is_empty());
    assert!(world.sink.events().is_empty());
}

#[tokio::test]
async fn cancelled_purchase_refunds_exactly_once() {
    let world = world();
    install_test_game(&world).await;
    let buyer = customer(&world, "Alice", "0912000111", 1_000).await;
    let buyer_id = buyer.require_account("test").unwrap().clone();
    let admin = Actor::Admin("ops-1".to_string());

    let order = world
        .ledger
        .orders()
        .create_topup_order(&buyer, "acme", "mid", "player#1", "k1")
        .await
        .unwrap();
    assert_eq!(balance_of(&world, &buyer).await, 500);

    world
        .ledger
        .orders()
        .cancel_order(&buyer_id, &order.id, &admin, Some("payment bounced"))
        .await
        .unwrap();
    assert_eq!(balance_of(&world, &buyer).await, 1_000);

    let err = world
        .ledger
        .orders()
        .cancel_order(&buyer_id, &order.id, &admin, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    assert_eq!(balance_of(&world, &buyer).await, 1_000);

    let cancels = world
        .sink
        .names()
        .iter()
        .filter(|name| **name == "order_cancelled")
        .count();
    assert_eq!(cancels, 1);
}

#[tokio::test]
async fn balance_topup_credits_once_on_completion() {
    let world = world();
    let buyer = customer(&world, "Alice", "0912000111", 0).await;
    let buyer_id = buyer.require_account("test").unwrap().clone();
    let admin = Actor::Admin("ops-1".to_string());

    let order = world
        .ledger
        .orders()
        .create_balance_order(&buyer, 500, PaymentMethod::Bankak, "t1")
        .await
        .unwrap();
    assert_eq!(balance_of(&world, &buyer).await, 0);

    world
        .ledger
        .orders()
        .complete_order(&buyer_id, &order.id, &admin)
        .await
        .unwrap();
    assert_eq!(balance_of(&world, &buyer).await, 500);

    let err = world
        .ledger
        .orders()
        .complete_order(&buyer_id, &order.id, &admin)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    assert_eq!(balance_of(&world, &buyer).await, 500);

    let completions = world
        .sink
        .names()
        .iter()
        .filter(|name| **name == "order_completed")
        .count();
    assert_eq!(completions, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_reservations_never_overdraw() {
    let world = world();
    let racer = customer(&world, "Racer", "0912000111", 100).await;
    let racer_id = racer.require_account("test").unwrap().clone();

    let first = {
        let ledger = world.ledger.clone();
        let id = racer_id.clone();
        tokio::spawn(async move { ledger.accounts().reserve_funds(&id, 60).await })
    };
    let second = {
        let ledger = world.ledger.clone();
        let id = racer_id.clone();
        tokio::spawn(async move { ledger.accounts().reserve_funds(&id, 60).await })
    };
    let results = [first.await.unwrap(), second.await.unwrap()];

    let wins = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(wins, 1);
    let loss = results.iter().find(|result| result.is_err()).unwrap();
    assert!(matches!(
        loss.as_ref().unwrap_err(),
        LedgerError::InsufficientFunds {
            needed: 60,
            available: 40
        }
    ));
    assert_eq!(balance_of(&world, &racer).await, 40);
}

#[tokio::test]
async fn escrow_refund_then_release_scenario() {
    let world = world();
    let seller = customer(&world, "Seller", "0912000222", 0).await;
    let buyer = customer(&world, "Buyer", "0912000111", 800).await;
    let admin = Actor::Admin("ops-1".to_string());

    let listing = world
        .ledger
        .escrow()
        .publish_listing(&seller, "pubg", "Conqueror account", "all skins", 300)
        .await
        .unwrap();

    let trade = world
        .ledger
        .escrow()
        .open_trade(&buyer, &listing.id, "t1")
        .await
        .unwrap();
    assert_eq!(balance_of(&world, &buyer).await, 500);
    assert_eq!(
        world.ledger.escrow().listing(&listing.id).await.unwrap().status,
        ListingStatus::Pending
    );

    world.ledger.escrow().refund_trade(&trade.id, &admin).await.unwrap();
    assert_eq!(balance_of(&world, &buyer).await, 800);
    assert_eq!(
        world.ledger.escrow().listing(&listing.id).await.unwrap().status,
        ListingStatus::Available
    );

    let trade = world
        .ledger
        .escrow()
        .open_trade(&buyer, &listing.id, "t2")
        .await
        .unwrap();
    world.ledger.escrow().release_trade(&trade.id, &admin).await.unwrap();
    assert_eq!(balance_of(&world, &buyer).await, 500);
    assert_eq!(balance_of(&world, &seller).await, 300);
    assert_eq!(
        world.ledger.escrow().listing(&listing.id).await.unwrap().status,
        ListingStatus::Sold
    );
    assert_eq!(
        world.sink.names(),
        vec![
            "trade_opened",
            "trade_refunded",
            "trade_opened",
            "trade_released"
        ]
    );
}

#[tokio::test]
async fn expired_escrow_refunds_under_system_actor() {
    let world = world();
    let seller = customer(&world, "Seller", "0912000222", 0).await;
    let buyer = customer(&world, "Buyer", "0912000111", 800).await;

    let listing = world
        .ledger
        .escrow()
        .publish_listing(&seller, "pubg", "Conqueror account", "", 300)
        .await
        .unwrap();
    let trade = world
        .ledger
        .escrow()
        .open_trade(&buyer, &listing.id, "t1")
        .await
        .unwrap();

    let cutoff = trade.opened_at_ms + 1;
    let expired = world
        .ledger
        .escrow()
        .trades_expired_before(cutoff, 16)
        .await
        .unwrap();
    assert_eq!(expired.len(), 1);

    let sweeper = Actor::System("escrow-sweep");
    let refunded = world
        .ledger
        .escrow()
        .refund_trade(&expired[0].id, &sweeper)
        .await
        .unwrap();
    assert_eq!(refunded.status, TradeStatus::Refunded);
    assert_eq!(refunded.resolved_by.as_deref(), Some("system:escrow-sweep"));
    assert_eq!(balance_of(&world, &buyer).await, 800);

    assert!(world
        .ledger
        .escrow()
        .trades_expired_before(cutoff, 16)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn order_write_fault_rolls_back_then_retry_converges() {
    let world = world_with(
        LedgerConfig::new().with_retry_policy(RetryPolicy::new(1, 1, 1, 0.0)),
    );
    install_test_game(&world).await;
    let buyer = customer(&world, "Alice", "0912000111", 1_000).await;
    let buyer_id = buyer.require_account("test").unwrap().clone();

    world
        .store
        .faults()
        .fail_always(StoreOp::Set, StorePath::new(["orders"]));
    let err = world
        .ledger
        .orders()
        .create_topup_order(&buyer, "acme", "mid", "player#1", "k1")
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Store(_)));
    world.store.faults().clear();

    assert_eq!(balance_of(&world, &buyer).await, 1_000);
    assert!(world
        .ledger
        .orders()
        .orders_for_account(&buyer_id, None)
        .await
        .unwrap()
        .is_empty());

    let order = world
        .ledger
        .orders()
        .create_topup_order(&buyer, "acme", "mid", "player#1", "k1")
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(balance_of(&world, &buyer).await, 500);
}
