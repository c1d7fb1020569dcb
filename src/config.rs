//! Runtime configuration
//!
//! Defaults are tuned for a local simulation; every knob can be overridden
//! through `ARENA_*` environment variables.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;

/// A tradable-asset pool bound to one shard.
///
/// Maps case-sensitive symbols to upstream reference identifiers.
#[derive(Debug, Clone)]
pub struct AssetPool {
    pub name: String,
    pub assets: BTreeMap<String, String>,
}

impl AssetPool {
    pub fn new(name: &str, assets: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            assets: assets
                .iter()
                .map(|(s, r)| (s.to_string(), r.to_string()))
                .collect(),
        }
    }

    pub fn symbols(&self) -> Vec<String> {
        self.assets.keys().cloned().collect()
    }
}

#[derive(Debug, Clone)]
pub struct ArenaConfig {
    pub bind_addr: String,
    /// Starting cash for every new account
    pub initial_balance: Decimal,
    /// Fixed adverse fill adjustment, as a fraction of the reference price
    pub slippage: Decimal,
    pub trading_secs: u64,
    pub council_secs: u64,
    pub elimination_fraction: f64,
    /// Ascending (population_ceiling, group_size) steps
    pub group_size_thresholds: Vec<(usize, usize)>,
    /// Rotated round-robin across newly created shards
    pub asset_pools: Vec<AssetPool>,
    pub return_history_cap: usize,
    pub recent_fills_cap: usize,
    pub snapshot_db_path: String,
    /// External durable snapshot service; local SQLite is the fallback
    pub snapshot_service_url: Option<String>,
    pub persist_interval_secs: u64,
    pub price_interval_secs: u64,
    /// Remote reference-price source; synthetic walk when unset
    pub price_feed_url: Option<String>,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8090".to_string(),
            initial_balance: Decimal::from(10_000),
            // 0.2%
            slippage: Decimal::new(2, 3),
            trading_secs: 300,
            council_secs: 60,
            elimination_fraction: 0.2,
            group_size_thresholds: vec![(100, 10), (500, 20), (2000, 40)],
            asset_pools: vec![
                AssetPool::new(
                    "majors",
                    &[
                        ("BTC-PERP", "bitcoin"),
                        ("ETH-PERP", "ethereum"),
                        ("SOL-PERP", "solana"),
                    ],
                ),
                AssetPool::new(
                    "alts",
                    &[
                        ("AVAX-PERP", "avalanche-2"),
                        ("LINK-PERP", "chainlink"),
                        ("DOGE-PERP", "dogecoin"),
                    ],
                ),
                AssetPool::new(
                    "defi",
                    &[
                        ("UNI-PERP", "uniswap"),
                        ("AAVE-PERP", "aave"),
                        ("MKR-PERP", "maker"),
                    ],
                ),
            ],
            return_history_cap: 50,
            recent_fills_cap: 256,
            snapshot_db_path: "data/agent-arena.db".to_string(),
            snapshot_service_url: None,
            persist_interval_secs: 120,
            price_interval_secs: 5,
            price_feed_url: None,
        }
    }
}

impl ArenaConfig {
    /// Build from defaults plus `ARENA_*` environment overrides
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = env::var("ARENA_BIND") {
            cfg.bind_addr = v;
        }
        if let Some(v) = env_parse::<Decimal>("ARENA_INITIAL_BALANCE") {
            cfg.initial_balance = v;
        }
        if let Some(v) = env_parse::<Decimal>("ARENA_SLIPPAGE") {
            cfg.slippage = v;
        }
        if let Some(v) = env_parse::<u64>("ARENA_TRADING_SECS") {
            cfg.trading_secs = v;
        }
        if let Some(v) = env_parse::<u64>("ARENA_COUNCIL_SECS") {
            cfg.council_secs = v;
        }
        if let Some(v) = env_parse::<f64>("ARENA_ELIMINATION_FRACTION") {
            cfg.elimination_fraction = v;
        }
        if let Ok(v) = env::var("ARENA_SNAPSHOT_DB") {
            cfg.snapshot_db_path = v;
        }
        if let Ok(v) = env::var("ARENA_SNAPSHOT_URL") {
            if !v.is_empty() {
                cfg.snapshot_service_url = Some(v);
            }
        }
        if let Some(v) = env_parse::<u64>("ARENA_PERSIST_SECS") {
            cfg.persist_interval_secs = v;
        }
        if let Some(v) = env_parse::<u64>("ARENA_PRICE_SECS") {
            cfg.price_interval_secs = v;
        }
        if let Ok(v) = env::var("ARENA_PRICE_FEED_URL") {
            if !v.is_empty() {
                cfg.price_feed_url = Some(v);
            }
        }

        cfg
    }

    /// Target shard size for the current total population.
    ///
    /// First ceiling that covers the population wins; past the last ceiling
    /// the largest configured size applies.
    pub fn dynamic_group_size(&self, population: usize) -> usize {
        for (ceiling, size) in &self.group_size_thresholds {
            if population <= *ceiling {
                return *size;
            }
        }
        self.group_size_thresholds
            .last()
            .map(|(_, size)| *size)
            .unwrap_or(10)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_size_steps_up_with_population() {
        let mut cfg = ArenaConfig::default();
        cfg.group_size_thresholds = vec![(100, 10), (500, 20)];

        assert_eq!(cfg.dynamic_group_size(0), 10);
        assert_eq!(cfg.dynamic_group_size(100), 10);
        // 150 agents already outgrew the first step
        assert_eq!(cfg.dynamic_group_size(150), 20);
        assert_eq!(cfg.dynamic_group_size(500), 20);
        // Past the last ceiling the last size applies
        assert_eq!(cfg.dynamic_group_size(10_000), 20);
    }

    #[test]
    fn pools_round_trip_symbols() {
        let cfg = ArenaConfig::default();
        assert_eq!(cfg.asset_pools.len(), 3);
        assert!(cfg.asset_pools[0].symbols().contains(&"BTC-PERP".to_string()));
    }
}
