use crate::asset::Asset;
use crate::error::CoreError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A registered player, identified by an opaque external id.
///
/// Balances are mutated only through `crash-ledger`'s credit/debit/transfer
/// operations; this struct is the value those operations read and write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub balances: HashMap<Asset, Decimal>,
    pub wagers_placed: u64,
    pub wins: u64,
    pub losses: u64,
    pub active: bool,
}

impl Player {
    pub fn new(id: String, name: String, initial_balances: HashMap<Asset, Decimal>) -> Self {
        let mut balances = HashMap::new();
        for asset in Asset::ALL {
            balances.insert(asset, *initial_balances.get(&asset).unwrap_or(&Decimal::ZERO));
        }
        Self {
            id,
            name,
            balances,
            wagers_placed: 0,
            wins: 0,
            losses: 0,
            active: true,
        }
    }

    pub fn balance_of(&self, asset: Asset) -> Decimal {
        *self.balances.get(&asset).unwrap_or(&Decimal::ZERO)
    }
}

/// `id` must be 3-50 chars of `[A-Za-z0-9_-]`.
pub fn validate_player_id(id: &str) -> Result<(), CoreError> {
    let len = id.chars().count();
    if !(3..=50).contains(&len) {
        return Err(CoreError::validation(
            "player id must be 3-50 characters long",
        ));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(CoreError::validation(
            "player id may only contain letters, digits, '_' and '-'",
        ));
    }
    Ok(())
}

/// `name` must be 3-20 chars.
pub fn validate_player_name(name: &str) -> Result<(), CoreError> {
    let len = name.chars().count();
    if !(3..=20).contains(&len) {
        return Err(CoreError::validation(
            "player name must be 3-20 characters long",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_ids() {
        assert!(validate_player_id("alice").is_ok());
        assert!(validate_player_id("alice_01-x").is_ok());
    }

    #[test]
    fn rejects_short_or_invalid_ids() {
        assert!(validate_player_id("ab").is_err());
        assert!(validate_player_id("alice!").is_err());
        assert!(validate_player_id(&"a".repeat(51)).is_err());
    }

    #[test]
    fn new_player_has_zero_balances_for_every_supported_asset() {
        let p = Player::new("alice".into(), "Alice".into(), HashMap::new());
        assert_eq!(p.balance_of(Asset::Btc), Decimal::ZERO);
        assert_eq!(p.balance_of(Asset::Eth), Decimal::ZERO);
    }
}
