use crash_engine::StateSnapshot;
use crash_types::Asset;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Messages an observer sends over its websocket. Represented as a single
/// tagged sum so the hub dispatches on one `match`, rather than routing on
/// a free-form string elsewhere.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Register { player_id: String },
    CashOut { player_id: Option<String> },
    GetState,
    Ping,
}

/// Messages the hub sends to an observer: either a reply to one of the
/// above, or a fanned-out engine event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Registered { player_id: String },
    RegisterError { message: String },
    CashoutOk { round_id: String, multiplier: Decimal, payout_fiat: Decimal, payout_asset: Decimal },
    CashoutErr { message: String },
    State(StateSnapshot),
    Pong,
    Error { message: String },

    RoundStarted { round_id: String, hash: String, start_time: u64 },
    MultiplierTick { round_id: String, multiplier: Decimal, now: u64 },
    RoundCrashed { round_id: String, crash_point: Decimal, seed: String, now: u64 },
    WagerPlaced { round_id: String, player_id: String, stake_fiat: Decimal, stake_asset: Decimal, asset: Asset },
    CashoutAccepted { round_id: String, player_id: String, multiplier: Decimal, payout_fiat: Decimal, asset: Asset },
}

impl From<crash_engine::EngineEvent> for OutboundMessage {
    fn from(event: crash_engine::EngineEvent) -> Self {
        use crash_engine::EngineEvent as E;
        match event {
            E::RoundStarted { round_id, hash, start_time } => OutboundMessage::RoundStarted {
                round_id,
                hash: hex::encode(hash),
                start_time,
            },
            E::MultiplierTick { round_id, multiplier, now } => {
                OutboundMessage::MultiplierTick { round_id, multiplier, now }
            }
            E::RoundCrashed { round_id, crash_point, seed, now } => OutboundMessage::RoundCrashed {
                round_id,
                crash_point,
                seed: hex::encode(seed),
                now,
            },
            E::WagerPlaced { round_id, player_id, stake_fiat, stake_asset, asset } => {
                OutboundMessage::WagerPlaced { round_id, player_id, stake_fiat, stake_asset, asset }
            }
            E::CashoutAccepted { round_id, player_id, multiplier, payout_fiat, asset } => {
                OutboundMessage::CashoutAccepted { round_id, player_id, multiplier, payout_fiat, asset }
            }
        }
    }
}
