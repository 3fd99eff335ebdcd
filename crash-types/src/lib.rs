pub mod asset;
pub mod config;
pub mod error;
pub mod player;
pub mod round;
pub mod transaction;
pub mod wager;

pub use asset::Asset;
pub use config::{now_millis, EngineConfig};
pub use error::CoreError;
pub use player::{validate_player_id, validate_player_name, Player};
pub use round::{Round, RoundState};
pub use transaction::{Transaction, TransactionKind};
pub use wager::Wager;
