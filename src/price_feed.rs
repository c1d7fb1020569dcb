//! Reference-price driver
//!
//! Each shard consumes its own `{symbol -> price}` snapshot on a fixed
//! interval. The default source is a synthetic random walk per shard; when a
//! feed URL is configured, prices are fetched remotely by reference id and a
//! failed fetch falls back to the walk for that cycle.

use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{info, warn};

use crate::config::AssetPool;
use crate::state::AppState;

/// Single-step walk bound, as a fraction of the current price
const WALK_STEP: f64 = 0.004;

/// Starting reference prices for well-known symbols; anything else opens
/// at 100.
fn base_price(symbol: &str) -> f64 {
    match symbol {
        "BTC-PERP" => 60_000.0,
        "ETH-PERP" => 2_500.0,
        "SOL-PERP" => 150.0,
        "AVAX-PERP" => 30.0,
        "LINK-PERP" => 15.0,
        "DOGE-PERP" => 0.2,
        "UNI-PERP" => 8.0,
        "AAVE-PERP" => 90.0,
        "MKR-PERP" => 1_500.0,
        _ => 100.0,
    }
}

/// Synthetic walk state for one shard's asset pool
struct Walker {
    prices: HashMap<String, f64>,
}

impl Walker {
    fn new(pool: &AssetPool) -> Self {
        Self {
            prices: pool
                .symbols()
                .into_iter()
                .map(|s| {
                    let p = base_price(&s);
                    (s, p)
                })
                .collect(),
        }
    }

    fn step(&mut self, rng: &mut impl Rng) -> HashMap<String, f64> {
        for price in self.prices.values_mut() {
            let drift = rng.gen_range(-WALK_STEP..WALK_STEP);
            *price *= 1.0 + drift;
        }
        self.prices.clone()
    }
}

/// Fetch `{reference_id -> usd price}` from the configured feed and map it
/// back onto the pool's symbols
async fn fetch_remote(
    client: &reqwest::Client,
    url: &str,
    pool: &AssetPool,
) -> Result<HashMap<String, f64>, String> {
    let ids: Vec<&str> = pool.assets.values().map(|s| s.as_str()).collect();
    let resp = client
        .get(url)
        .query(&[("ids", ids.join(",")), ("vs_currencies", "usd".to_string())])
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;
    let data: serde_json::Value = resp
        .json()
        .await
        .map_err(|e| format!("parse failed: {e}"))?;

    let mut snapshot = HashMap::new();
    for (symbol, reference) in &pool.assets {
        if let Some(price) = data
            .get(reference)
            .and_then(|v| v.get("usd"))
            .and_then(|v| v.as_f64())
        {
            snapshot.insert(symbol.clone(), price);
        } else {
            warn!(%symbol, %reference, "missing price in feed response");
        }
    }
    Ok(snapshot)
}

/// Background price updater. A shard's subscription lives exactly as long as
/// the shard does: torn-down shards simply stop appearing in the registry.
pub async fn start_price_feed(state: Arc<AppState>) {
    let period = state.config.price_interval_secs;
    info!("📈 Price feed starting (interval: {}s)", period);

    let client = reqwest::Client::new();
    let mut walkers: HashMap<u64, Walker> = HashMap::new();
    let mut ticker = interval(Duration::from_secs(period));

    loop {
        ticker.tick().await;

        let shards = state.manager.shards_ordered();
        walkers.retain(|id, _| shards.iter().any(|s| s.id == *id));

        for shard in shards {
            let snapshot = match &state.config.price_feed_url {
                Some(url) => match fetch_remote(&client, url, &shard.pool).await {
                    Ok(snapshot) if !snapshot.is_empty() => Some(snapshot),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(shard_id = shard.id, "price fetch failed: {e}");
                        None
                    }
                },
                None => None,
            };

            let snapshot = match snapshot {
                Some(s) => s,
                None => {
                    let walker = walkers
                        .entry(shard.id)
                        .or_insert_with(|| Walker::new(&shard.pool));
                    walker.step(&mut rand::thread_rng())
                }
            };

            shard.update_prices(&snapshot).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn walk_moves_every_symbol_within_bounds() {
        let pool = AssetPool::new("majors", &[("BTC-PERP", "bitcoin"), ("ETH-PERP", "ethereum")]);
        let mut walker = Walker::new(&pool);
        let mut rng = StdRng::seed_from_u64(42);

        let before = walker.prices.clone();
        let after = walker.step(&mut rng);

        assert_eq!(after.len(), 2);
        for (symbol, price) in &after {
            let prev = before[symbol];
            assert!(*price > 0.0);
            assert!((price / prev - 1.0).abs() <= WALK_STEP);
        }
    }

    #[test]
    fn walk_is_reproducible_under_a_fixed_seed() {
        let pool = AssetPool::new("majors", &[("BTC-PERP", "bitcoin")]);
        let mut a = Walker::new(&pool);
        let mut b = Walker::new(&pool);
        let snap_a = a.step(&mut StdRng::seed_from_u64(7));
        let snap_b = b.step(&mut StdRng::seed_from_u64(7));
        assert_eq!(snap_a, snap_b);
    }
}
