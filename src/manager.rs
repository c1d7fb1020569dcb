//! Shard registry and assignment
//!
//! The registry is the single owner of agent-to-shard mapping; every mutation
//! funnels through this API. Dynamic resizing only affects future
//! assignments, never already-placed agents.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::config::ArenaConfig;
use crate::shard::Shard;
use crate::types::LeaderboardEntry;

pub struct ShardManager {
    cfg: Arc<ArenaConfig>,
    shards: DashMap<u64, Arc<Shard>>,
    agent_shard: DashMap<String, u64>,
    next_shard_id: AtomicU64,
    next_pool: AtomicUsize,
}

impl ShardManager {
    pub fn new(cfg: Arc<ArenaConfig>) -> Self {
        Self {
            cfg,
            shards: DashMap::new(),
            agent_shard: DashMap::new(),
            next_shard_id: AtomicU64::new(1),
            next_pool: AtomicUsize::new(0),
        }
    }

    /// Total population across all shards
    pub fn population(&self) -> usize {
        self.agent_shard.len()
    }

    pub fn shard(&self, shard_id: u64) -> Option<Arc<Shard>> {
        self.shards.get(&shard_id).map(|s| Arc::clone(&s))
    }

    pub fn shard_of(&self, agent_id: &str) -> Option<Arc<Shard>> {
        let shard_id = *self.agent_shard.get(agent_id)?;
        self.shard(shard_id)
    }

    /// All shards in ascending id order, the deterministic processing order
    /// for epoch work and price updates
    pub fn shards_ordered(&self) -> Vec<Arc<Shard>> {
        let mut out: Vec<Arc<Shard>> = self.shards.iter().map(|e| Arc::clone(&e)).collect();
        out.sort_by_key(|s| s.id);
        out
    }

    /// Place an agent on a shard. Idempotent: an agent that already has a
    /// shard keeps it. Otherwise the lowest-id shard with spare capacity
    /// under the current dynamic target wins, and a new shard is created
    /// when none qualifies.
    pub async fn assign_agent(&self, agent_id: &str) -> Arc<Shard> {
        if let Some(shard) = self.shard_of(agent_id) {
            return shard;
        }

        let target = self.cfg.dynamic_group_size(self.population());
        for shard in self.shards_ordered() {
            if shard.member_count() < target {
                shard.add_member(agent_id).await;
                self.agent_shard.insert(agent_id.to_string(), shard.id);
                return shard;
            }
        }

        let shard = self.create_shard();
        shard.add_member(agent_id).await;
        self.agent_shard.insert(agent_id.to_string(), shard.id);
        shard
    }

    fn create_shard(&self) -> Arc<Shard> {
        let id = self.next_shard_id.fetch_add(1, Ordering::SeqCst);
        let pool_idx = self.next_pool.fetch_add(1, Ordering::SeqCst) % self.cfg.asset_pools.len();
        let pool = self.cfg.asset_pools[pool_idx].clone();
        info!(shard_id = id, pool = %pool.name, "creating shard");
        let shard = Arc::new(Shard::new(id, pool, &self.cfg));
        self.shards.insert(id, Arc::clone(&shard));
        shard
    }

    /// Recreate a shard with a known id during restore, keeping its recorded
    /// pool where the name still exists in configuration
    pub fn restore_shard(&self, shard_id: u64, pool_name: &str) -> Arc<Shard> {
        if let Some(existing) = self.shard(shard_id) {
            return existing;
        }
        let pool = self
            .cfg
            .asset_pools
            .iter()
            .find(|p| p.name == pool_name)
            .cloned()
            .unwrap_or_else(|| {
                self.cfg.asset_pools[shard_id as usize % self.cfg.asset_pools.len()].clone()
            });
        let shard = Arc::new(Shard::new(shard_id, pool, &self.cfg));
        self.shards.insert(shard_id, Arc::clone(&shard));
        // Ids are never reused, including across restarts
        self.next_shard_id
            .fetch_max(shard_id + 1, Ordering::SeqCst);
        shard
    }

    /// Bind a restored agent to its recorded shard
    pub fn restore_agent(&self, agent_id: &str, shard_id: u64) {
        self.agent_shard.insert(agent_id.to_string(), shard_id);
    }

    /// Detach an agent and delete its account. An emptied shard is torn down
    /// here; its price subscription ends with it.
    pub async fn remove_agent(&self, agent_id: &str) {
        let Some((_, shard_id)) = self.agent_shard.remove(agent_id) else {
            return;
        };
        let Some(shard) = self.shard(shard_id) else {
            return;
        };
        shard.remove_member(agent_id).await;
        if shard.member_count() == 0 {
            self.shards.remove(&shard_id);
            info!(shard_id, "tearing down empty shard");
        }
    }

    /// Cross-shard merged ranking. Read-only; used for promotion decisions,
    /// never for in-shard elimination.
    pub async fn global_leaderboard(&self) -> Vec<LeaderboardEntry> {
        let mut merged = Vec::new();
        for shard in self.shards_ordered() {
            merged.extend(shard.leaderboard().await);
        }
        merged.sort_by(|a, b| {
            b.pnl_percent
                .partial_cmp(&a.pnl_percent)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        merged
    }

    pub async fn leaderboard(&self, shard_id: Option<u64>) -> Vec<LeaderboardEntry> {
        match shard_id {
            Some(id) => match self.shard(id) {
                Some(shard) => shard.leaderboard().await,
                None => Vec::new(),
            },
            None => self.global_leaderboard().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with_thresholds(thresholds: Vec<(usize, usize)>) -> ShardManager {
        let mut cfg = ArenaConfig::default();
        cfg.group_size_thresholds = thresholds;
        ShardManager::new(Arc::new(cfg))
    }

    #[tokio::test]
    async fn assignment_is_idempotent() {
        let manager = manager_with_thresholds(vec![(100, 10)]);
        let first = manager.assign_agent("a1").await;
        let second = manager.assign_agent("a1").await;
        assert_eq!(first.id, second.id);
        assert_eq!(manager.population(), 1);
        assert_eq!(first.member_count(), 1);
    }

    #[tokio::test]
    async fn new_shard_when_target_full() {
        let manager = manager_with_thresholds(vec![(100, 3)]);
        for i in 0..4 {
            manager.assign_agent(&format!("agent-{i}")).await;
        }
        let shards = manager.shards_ordered();
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[0].member_count(), 3);
        assert_eq!(shards[1].member_count(), 1);
    }

    #[tokio::test]
    async fn pools_rotate_round_robin() {
        let manager = manager_with_thresholds(vec![(100, 1)]);
        for i in 0..4 {
            manager.assign_agent(&format!("agent-{i}")).await;
        }
        let shards = manager.shards_ordered();
        let pools: Vec<&str> = shards.iter().map(|s| s.pool.name.as_str()).collect();
        // Three configured pools wrap around on the fourth shard
        assert_eq!(pools, vec!["majors", "alts", "defi", "majors"]);
    }

    #[tokio::test]
    async fn grown_population_raises_target_for_new_agents_only() {
        let manager = manager_with_thresholds(vec![(3, 2), (500, 4)]);
        // Population 0..=3 targets size 2: two shards of two
        for i in 0..4 {
            manager.assign_agent(&format!("agent-{i}")).await;
        }
        assert_eq!(manager.shards_ordered().len(), 2);

        // Population is now 4, target jumps to 4: the next agents backfill
        // shard 1 instead of opening a third shard
        manager.assign_agent("agent-4").await;
        manager.assign_agent("agent-5").await;
        let shards = manager.shards_ordered();
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[0].member_count(), 4);
    }

    #[tokio::test]
    async fn empty_shard_is_torn_down() {
        let manager = manager_with_thresholds(vec![(100, 2)]);
        manager.assign_agent("a1").await;
        assert_eq!(manager.shards_ordered().len(), 1);

        manager.remove_agent("a1").await;
        assert!(manager.shards_ordered().is_empty());
        // The id is never reused
        let shard = manager.assign_agent("a2").await;
        assert_eq!(shard.id, 2);
    }

    #[tokio::test]
    async fn global_board_merges_and_resorts() {
        let manager = manager_with_thresholds(vec![(100, 1)]);
        manager.assign_agent("a1").await;
        manager.assign_agent("a2").await;

        let board = manager.leaderboard(None).await;
        assert_eq!(board.len(), 2);

        let shard_board = manager.leaderboard(Some(1)).await;
        assert_eq!(shard_board.len(), 1);
        assert_eq!(shard_board[0].agent_id, "a1");
    }
}
