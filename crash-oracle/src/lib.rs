use crash_types::Asset;
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};

#[derive(Clone, Copy)]
struct CacheEntry {
    price: Decimal,
    fetched_at: Instant,
}

/// TTL-bounded fiat price cache with single-flight coalescing, fetching
/// from a CoinGecko-compatible HTTP endpoint (in the shape of this
/// workspace's multi-exchange price feed, narrowed to one source since the
/// game only needs a single authoritative quote per asset).
pub struct PriceOracle {
    client: Client,
    cache: Mutex<HashMap<Asset, CacheEntry>>,
    in_flight: Mutex<HashMap<Asset, Arc<Notify>>>,
    ttl: Duration,
    upstream_url: String,
    timeout: Duration,
}

impl PriceOracle {
    pub fn new(upstream_url: String, ttl_ms: u64, timeout_ms: u64) -> Self {
        Self {
            client: Client::new(),
            cache: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            ttl: Duration::from_millis(ttl_ms),
            upstream_url,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Hard-coded last-resort price, used when no cache entry exists and
    /// the upstream is unreachable.
    fn fallback(asset: Asset) -> Decimal {
        match asset {
            Asset::Btc => Decimal::new(50_000, 0),
            Asset::Eth => Decimal::new(3_000, 0),
        }
    }

    async fn fresh_cached(&self, asset: Asset) -> Option<Decimal> {
        let cache = self.cache.lock().await;
        cache.get(&asset).and_then(|e| {
            if e.fetched_at.elapsed() < self.ttl {
                Some(e.price)
            } else {
                None
            }
        })
    }

    async fn stale_cached(&self, asset: Asset) -> Option<Decimal> {
        let cache = self.cache.lock().await;
        cache.get(&asset).map(|e| e.price)
    }

    async fn store(&self, asset: Asset, price: Decimal) {
        let mut cache = self.cache.lock().await;
        cache.insert(
            asset,
            CacheEntry {
                price,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Returns the current price for `asset`, refreshing from upstream when
    /// the cached value is stale or absent. Never fails: a stale cache
    /// entry or hard-coded fallback is used if upstream is unreachable.
    pub async fn price(&self, asset: Asset) -> Decimal {
        if let Some(p) = self.fresh_cached(asset).await {
            return p;
        }

        loop {
            let mut flight = self.in_flight.lock().await;
            if let Some(n) = flight.get(&asset) {
                let notify = n.clone();
                // `notified()` must be called while `flight` is still held:
                // the leader needs this same lock to call `notify_waiters`,
                // so registering the future before releasing it means the
                // leader can never finish and notify between our lookup and
                // our wait, and tokio guarantees a `notify_waiters` call
                // landing between this line and the `.await` below still
                // wakes this future rather than being lost.
                let notified = notify.notified();
                drop(flight);
                tracing::debug!(asset = %asset, "awaiting in-flight price fetch");
                notified.await;
                if let Some(p) = self.fresh_cached(asset).await {
                    return p;
                }
                // The leader's fetch failed and left no fresh cache entry;
                // loop back and attempt to become the new leader.
                continue;
            }

            flight.insert(asset, Arc::new(Notify::new()));
            drop(flight);
            let price = self.fetch_and_settle(asset).await;
            let mut flight = self.in_flight.lock().await;
            if let Some(notify) = flight.remove(&asset) {
                notify.notify_waiters();
            }
            return price;
        }
    }

    async fn fetch_and_settle(&self, asset: Asset) -> Decimal {
        match self.fetch_batch(&[asset]).await {
            Ok(mut fetched) => match fetched.remove(&asset) {
                Some(price) => {
                    self.store(asset, price).await;
                    price
                }
                None => self.stale_cached(asset).await.unwrap_or_else(|| Self::fallback(asset)),
            },
            Err(err) => {
                tracing::warn!(asset = %asset, error = %err, "upstream price fetch failed");
                self.stale_cached(asset).await.unwrap_or_else(|| Self::fallback(asset))
            }
        }
    }

    /// Batched price lookup: resolves every cached-and-fresh asset locally
    /// and issues at most one upstream request for the remainder.
    pub async fn prices(&self, assets: &[Asset]) -> HashMap<Asset, Decimal> {
        let mut result = HashMap::new();
        let mut stale = Vec::new();
        for &asset in assets {
            if let Some(p) = self.fresh_cached(asset).await {
                result.insert(asset, p);
            } else {
                stale.push(asset);
            }
        }
        if stale.is_empty() {
            return result;
        }

        match self.fetch_batch(&stale).await {
            Ok(fetched) => {
                for (asset, price) in &fetched {
                    self.store(*asset, *price).await;
                }
                for asset in stale {
                    let price = fetched
                        .get(&asset)
                        .copied()
                        .unwrap_or(self.stale_cached(asset).await.unwrap_or_else(|| Self::fallback(asset)));
                    result.insert(asset, price);
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "batched upstream price fetch failed");
                for asset in stale {
                    let price = self.stale_cached(asset).await.unwrap_or_else(|| Self::fallback(asset));
                    result.insert(asset, price);
                }
            }
        }
        result
    }

    /// Single CoinGecko-shaped HTTP request covering every asset in
    /// `assets`, bounded by `timeout`.
    async fn fetch_batch(&self, assets: &[Asset]) -> anyhow::Result<HashMap<Asset, Decimal>> {
        use anyhow::Context;

        let ids = assets
            .iter()
            .map(|a| a.coingecko_id())
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}?ids={}&vs_currencies=usd", self.upstream_url, ids);

        let fetch = async {
            let resp: serde_json::Value = self
                .client
                .get(&url)
                .send()
                .await
                .context("upstream request failed")?
                .json()
                .await
                .context("upstream response was not valid JSON")?;

            let mut out = HashMap::new();
            for &asset in assets {
                if let Some(price) = resp[asset.coingecko_id()]["usd"].as_f64() {
                    out.insert(
                        asset,
                        Decimal::from_f64(price).context("upstream price was not finite")?,
                    );
                }
            }
            Ok(out)
        };

        tokio::time::timeout(self.timeout, fetch)
            .await
            .context("upstream request timed out")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_upstream_falls_back_to_hard_coded_price() {
        let oracle = PriceOracle::new("http://127.0.0.1:1/unreachable".to_string(), 10_000, 200);
        let price = oracle.price(Asset::Btc).await;
        assert_eq!(price, PriceOracle::fallback(Asset::Btc));
    }

    #[tokio::test]
    async fn fresh_cache_entry_is_returned_without_a_fetch() {
        let oracle = PriceOracle::new("http://127.0.0.1:1/unreachable".to_string(), 10_000, 200);
        oracle.store(Asset::Eth, Decimal::new(4_000, 0)).await;
        assert_eq!(oracle.price(Asset::Eth).await, Decimal::new(4_000, 0));
    }

    #[tokio::test]
    async fn concurrent_price_calls_for_the_same_asset_coalesce() {
        let oracle = Arc::new(PriceOracle::new(
            "http://127.0.0.1:1/unreachable".to_string(),
            10_000,
            500,
        ));
        let a = oracle.clone();
        let b = oracle.clone();
        let (pa, pb) = tokio::join!(
            tokio::spawn(async move { a.price(Asset::Btc).await }),
            tokio::spawn(async move { b.price(Asset::Btc).await }),
        );
        assert_eq!(pa.unwrap(), pb.unwrap());
    }

    #[tokio::test]
    async fn prices_resolves_mixed_fresh_and_stale_assets() {
        let oracle = PriceOracle::new("http://127.0.0.1:1/unreachable".to_string(), 10_000, 200);
        oracle.store(Asset::Btc, Decimal::new(61_000, 0)).await;
        let result = oracle.prices(&[Asset::Btc, Asset::Eth]).await;
        assert_eq!(result[&Asset::Btc], Decimal::new(61_000, 0));
        assert_eq!(result[&Asset::Eth], PriceOracle::fallback(Asset::Eth));
    }
}
