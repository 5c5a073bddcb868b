//! Game and offer catalog. Prices come from here, never from clients.

use std::sync::Arc;

use log::info;
use serde_json::from_value;

use core_types::retry::RetryPolicy;
use core_types::types::{Game, Offer};
use store_api::{get_record, set_record, Store, StoreError};

use crate::config::{LedgerConfig, MAX_AMOUNT};
use crate::error::{LedgerError, Result};
use crate::paths;

pub struct Catalog {
    store: Arc<dyn Store>,
    retry: RetryPolicy,
}

impl Catalog {
    pub fn new(store: Arc<dyn Store>, config: &LedgerConfig) -> Self {
        Self {
            store,
            retry: config.retry.clone(),
        }
    }

    /// All games, sorted by category then name for stable menus.
    pub async fn games(&self) -> Result<Vec<Game>> {
        let value = self
            .retry
            .retry_if(LedgerError::is_transient, |_| async {
                self.store
                    .get(&paths::games_root())
                    .await
                    .map_err(LedgerError::from)
            })
            .await?;
        let Some(value) = value else {
            return Ok(Vec::new());
        };
        let map = value.as_object().cloned().unwrap_or_default();
        let mut games = Vec::with_capacity(map.len());
        for (id, node) in map {
            if node.is_null() {
                continue;
            }
            let game: Game = from_value(node)
                .map_err(|err| StoreError::corrupt(paths::game(&id), err.to_string()))?;
            games.push(game);
        }
        games.sort_by(|a, b| (&a.category, &a.name).cmp(&(&b.category, &b.name)));
        Ok(games)
    }

    pub async fn game(&self, game_id: &str) -> Result<Game> {
        let path = paths::game(game_id);
        let record = self
            .retry
            .retry_if(LedgerError::is_transient, |_| async {
                get_record::<Game>(self.store.as_ref(), &path)
                    .await
                    .map_err(LedgerError::from)
            })
            .await?;
        record.ok_or_else(|| LedgerError::UnknownGame {
            game_id: game_id.to_string(),
        })
    }

    /// Look up an offer and the game it belongs to. The returned price is
    /// authoritative for order creation.
    pub async fn resolve_offer(&self, game_id: &str, offer_id: &str) -> Result<(Game, Offer)> {
        let game = self.game(game_id).await?;
        let offer = game
            .offers
            .iter()
            .find(|offer| offer.id == offer_id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownOffer {
                game_id: game_id.to_string(),
                offer_id: offer_id.to_string(),
            })?;
        Ok((game, offer))
    }

    pub async fn put_game(&self, game: &Game) -> Result<()> {
        if game.id.trim().is_empty() {
            return Err(LedgerError::MissingField { field: "game id" });
        }
        if game.name.trim().is_empty() {
            return Err(LedgerError::MissingField { field: "game name" });
        }
        for offer in &game.offers {
            if offer.id.trim().is_empty() || offer.name.trim().is_empty() {
                return Err(LedgerError::MissingField { field: "offer" });
            }
            if offer.price == 0 || offer.price > MAX_AMOUNT {
                return Err(LedgerError::AmountOutOfRange {
                    amount: offer.price,
                    min: 1,
                    max: MAX_AMOUNT,
                });
            }
        }
        let path = paths::game(&game.id);
        self.retry
            .retry_if(LedgerError::is_transient, |_| async {
                set_record(self.store.as_ref(), &path, game)
                    .await
                    .map_err(LedgerError::from)
            })
            .await
    }

    /// Install the stock catalog on first boot. Returns whether it seeded.
    pub async fn seed_defaults_if_empty(&self) -> Result<bool> {
        if !self.games().await?.is_empty() {
            return Ok(false);
        }
        let defaults = default_games();
        for game in &defaults {
            self.put_game(game).await?;
        }
        info!("[catalog] seeded {} default games", defaults.len());
        Ok(true)
    }
}

fn offer(id: &str, name: &str, price: u64) -> Offer {
    Offer {
        id: id.to_string(),
        name: name.to_string(),
        price,
    }
}

pub fn default_games() -> Vec<Game> {
    vec![
        Game {
            id: "pubg".to_string(),
            name: "PUBG Mobile".to_string(),
            category: "battle-royale".to_string(),
            offers: vec![
                offer("uc60", "60 UC", 400),
                offer("uc325", "325 UC", 1_900),
                offer("uc660", "660 UC", 3_700),
                offer("uc1800", "1800 UC", 9_500),
            ],
        },
        Game {
            id: "freefire".to_string(),
            name: "Free Fire".to_string(),
            category: "battle-royale".to_string(),
            offers: vec![
                offer("d100", "100 Diamonds", 350),
                offer("d310", "310 Diamonds", 1_000),
                offer("d520", "520 Diamonds", 1_650),
            ],
        },
        Game {
            id: "mlbb".to_string(),
            name: "Mobile Legends".to_string(),
            category: "moba".to_string(),
            offers: vec![
                offer("dia86", "86 Diamonds", 500),
                offer("dia172", "172 Diamonds", 950),
                offer("dia257", "257 Diamonds", 1_400),
            ],
        },
        Game {
            id: "genshin".to_string(),
            name: "Genshin Impact".to_string(),
            category: "rpg".to_string(),
            offers: vec![
                offer("gc60", "60 Genesis Crystals", 450),
                offer("gc300", "300 Genesis Crystals", 2_200),
                offer("gc980", "980 Genesis Crystals", 6_800),
            ],
        },
    ]
}
