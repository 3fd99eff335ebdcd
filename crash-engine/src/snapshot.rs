use crash_types::RoundState;
use rust_decimal::Decimal;
use serde::Serialize;

/// Answer to the Broadcast Hub's `get_state` inbound message.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub round_id: String,
    pub state: RoundState,
    pub multiplier: Decimal,
    pub is_live: bool,
    pub start_time: u64,
    pub wager_count: usize,
    pub hash: String,
}

/// Result of verifying a settled round's provably-fair commitment.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyResult {
    pub round_id: String,
    pub round_number: u64,
    pub seed: String,
    pub hash: String,
    pub crash_point: Decimal,
    pub commitment_valid: bool,
    pub crash_point_valid: bool,
}
