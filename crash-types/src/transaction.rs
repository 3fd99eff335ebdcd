use crate::asset::Asset;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Wager,
    Cashout,
    Deposit,
    Withdrawal,
}

/// Append-only audit-log record (§3). Never mutated after `record_transaction`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub player_id: String,
    /// The round this transaction is associated with, or a synthetic id
    /// (e.g. "deposit") for transactions with no round.
    pub round_id: String,
    /// The wager this transaction settles, for `Wager`/`Cashout` kinds.
    /// Lets startup reconciliation find the one credit that must exist
    /// for every wager marked `cashed_out`.
    pub wager_id: Option<Uuid>,
    pub kind: TransactionKind,
    pub fiat_amount: Decimal,
    pub asset_amount: Decimal,
    pub asset: Asset,
    pub price_at_time: Decimal,
    pub multiplier: Option<Decimal>,
    pub created_at: u64,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        player_id: String,
        round_id: String,
        wager_id: Option<Uuid>,
        kind: TransactionKind,
        fiat_amount: Decimal,
        asset_amount: Decimal,
        asset: Asset,
        price_at_time: Decimal,
        multiplier: Option<Decimal>,
        created_at: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            player_id,
            round_id,
            wager_id,
            kind,
            fiat_amount,
            asset_amount,
            asset,
            price_at_time,
            multiplier,
            created_at,
        }
    }

    /// Signed effect on the player's asset balance: positive for credits
    /// (cashout, deposit), negative for debits (wager, withdrawal). Used by
    /// the ledger-conservation check in `crash-ledger`'s tests (§8 invariant 4).
    pub fn signed_asset_amount(&self) -> Decimal {
        match self.kind {
            TransactionKind::Cashout | TransactionKind::Deposit => self.asset_amount,
            TransactionKind::Wager | TransactionKind::Withdrawal => -self.asset_amount,
        }
    }
}
