use rust_decimal::Decimal;

/// Tunables shared across the engine, oracle, and facade (§6 configuration
/// surface). Populated from CLI flags / environment by `crash-node`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cache_ttl_ms: u64,
    pub round_period_ms: u64,
    pub betting_window_ms: u64,
    pub tick_ms: u64,
    pub max_crash: Decimal,
    pub max_stake_fiat: Decimal,
    pub min_stake_fiat: Decimal,
    pub upstream_url: String,
    pub upstream_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 10_000,
            round_period_ms: 10_000,
            betting_window_ms: 3_000,
            tick_ms: 100,
            max_crash: Decimal::new(12000, 2),
            max_stake_fiat: Decimal::new(10000, 0),
            min_stake_fiat: Decimal::new(1, 2),
            upstream_url: "https://api.coingecko.com/api/v3/simple/price".to_string(),
            upstream_timeout_ms: 5_000,
        }
    }
}

/// Milliseconds since the UNIX epoch, the timestamp unit used across events.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}
