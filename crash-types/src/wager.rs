use crate::asset::Asset;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single bet placed by a player during a round's betting window.
///
/// A wager belongs to exactly one round and is appended to that round's
/// `wagers` list at placement time; it is never moved or copied elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wager {
    pub id: Uuid,
    pub player_id: String,
    pub stake_fiat: Decimal,
    pub stake_asset: Decimal,
    pub asset: Asset,
    pub price_at_placement: Decimal,
    pub cashed_out: bool,
    pub cashout_multiplier: Option<Decimal>,
    pub cashout_asset_amount: Option<Decimal>,
    pub placed_at: u64,
}

impl Wager {
    pub fn new(
        player_id: String,
        stake_fiat: Decimal,
        stake_asset: Decimal,
        asset: Asset,
        price_at_placement: Decimal,
        placed_at: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            player_id,
            stake_fiat,
            stake_asset,
            asset,
            price_at_placement,
            cashed_out: false,
            cashout_multiplier: None,
            cashout_asset_amount: None,
            placed_at,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.cashed_out
    }

    pub fn mark_cashed_out(&mut self, multiplier: Decimal, asset_amount: Decimal) {
        self.cashed_out = true;
        self.cashout_multiplier = Some(multiplier);
        self.cashout_asset_amount = Some(asset_amount);
    }
}
