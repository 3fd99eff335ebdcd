use crate::wager::Wager;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundState {
    Betting,
    Live,
    Crashed,
    Settled,
}

/// One cycle from `betting` through `settled` (§3, §4.D).
///
/// `seed` holds the pre-committed random value. It is present on the struct
/// from the moment the round is created (the engine must know it to derive
/// `crash_point`), but must never be serialized into an outbound event or
/// API response before the round reaches `crashed` — that discipline lives
/// in `crash-engine` and `crash-api`, not in this struct, since the struct
/// itself is also the thing the Ledger persists at settlement and the
/// verify operation needs the seed to be readable from storage afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: String,
    pub number: u64,
    pub seed: [u8; 32],
    pub hash: [u8; 32],
    pub crash_point: Decimal,
    pub start_time: u64,
    pub end_time: Option<u64>,
    pub state: RoundState,
    pub wagers: Vec<Wager>,
    pub peak_multiplier: Decimal,
}

impl Round {
    pub fn new(
        number: u64,
        seed: [u8; 32],
        hash: [u8; 32],
        crash_point: Decimal,
        start_time: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            number,
            seed,
            hash,
            crash_point,
            start_time,
            end_time: None,
            state: RoundState::Betting,
            wagers: Vec::new(),
            peak_multiplier: Decimal::ONE,
        }
    }

    pub fn open_wager_mut(&mut self, player_id: &str) -> Option<&mut Wager> {
        self.wagers
            .iter_mut()
            .find(|w| w.player_id == player_id && w.is_open())
    }

    pub fn has_open_wager(&self, player_id: &str) -> bool {
        self.wagers.iter().any(|w| w.player_id == player_id && w.is_open())
    }
}
