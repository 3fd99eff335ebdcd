use thiserror::Error;

/// Typed failures surfaced by the Ledger. Pattern-matched by the Round
/// Engine and the Facade; never collapsed into an opaque `anyhow::Error`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("unknown player: {0}")]
    UnknownPlayer(String),

    #[error("player id already registered: {0}")]
    DuplicateId(String),

    #[error("player name already registered: {0}")]
    DuplicateName(String),

    #[error("insufficient balance: player {player}, asset {asset}, have {have}, need {need}")]
    InsufficientBalance {
        player: String,
        asset: String,
        have: String,
        need: String,
    },

    #[error("amount must be positive")]
    NonPositiveAmount,
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::UnknownPlayer(_) => "unknown_player",
            LedgerError::DuplicateId(_) => "duplicate_player_id",
            LedgerError::DuplicateName(_) => "duplicate_player_name",
            LedgerError::InsufficientBalance { .. } => "insufficient_balance",
            LedgerError::NonPositiveAmount => "non_positive_amount",
        }
    }
}
