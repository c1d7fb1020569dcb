//! One competition shard: a matching engine bound to an asset pool
//!
//! All order flow and epoch-end accounting for a shard pass through its
//! single mutex, which is what serializes per-account mutation and gives
//! epoch computations a consistent view.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::config::{ArenaConfig, AssetPool};
use crate::engine::{FillReceipt, MatchEngine, OrderError};
use crate::types::{EpochShardReport, Fill, LeaderboardEntry, Position, Side, TagStats};

/// Mutable interior of a shard
pub struct ShardCore {
    pub engine: MatchEngine,
    /// Fills committed during the current epoch, for tag attribution
    epoch_fills: Vec<Fill>,
}

/// Per-member data produced by an epoch close, consumed by the scheduler
#[derive(Debug, Clone)]
pub struct MemberClose {
    pub agent_id: String,
    /// The pnl sample appended to the member's return history
    pub epoch_return: f64,
    pub return_history: Vec<f64>,
}

/// Everything an epoch close yields for one shard
#[derive(Debug, Clone)]
pub struct ShardClose {
    pub report: EpochShardReport,
    pub members: Vec<MemberClose>,
}

/// A snapshot of one member account, for persistence export
#[derive(Debug, Clone)]
pub struct MemberExport {
    pub agent_id: String,
    pub balance: Decimal,
    pub positions: Vec<Position>,
    pub return_history: Vec<f64>,
    pub recent_fills: Vec<Fill>,
}

pub struct Shard {
    pub id: u64,
    pub pool: AssetPool,
    core: Mutex<ShardCore>,
    member_count: AtomicUsize,
}

impl Shard {
    pub fn new(id: u64, pool: AssetPool, cfg: &ArenaConfig) -> Self {
        let engine = MatchEngine::new(
            pool.symbols(),
            cfg.slippage,
            cfg.initial_balance,
            cfg.return_history_cap,
        );
        Self {
            id,
            pool,
            core: Mutex::new(ShardCore {
                engine,
                epoch_fills: Vec::new(),
            }),
            member_count: AtomicUsize::new(0),
        }
    }

    /// Lock-free member count, kept in step with the ledger
    pub fn member_count(&self) -> usize {
        self.member_count.load(Ordering::SeqCst)
    }

    /// Create the member's account (idempotent)
    pub async fn add_member(&self, agent_id: &str) {
        let mut core = self.core.lock().await;
        core.engine.ledger_mut().account_mut(agent_id);
        self.member_count
            .store(core.engine.ledger().len(), Ordering::SeqCst);
    }

    /// Administrative removal: detaches the agent and deletes its account
    pub async fn remove_member(&self, agent_id: &str) {
        let mut core = self.core.lock().await;
        core.engine.ledger_mut().remove(agent_id);
        self.member_count
            .store(core.engine.ledger().len(), Ordering::SeqCst);
    }

    pub async fn execute_order(
        &self,
        agent_id: &str,
        symbol: &str,
        side: Side,
        amount: Decimal,
        tags: Vec<String>,
    ) -> Result<FillReceipt, OrderError> {
        let mut core = self.core.lock().await;
        let receipt = core
            .engine
            .execute_order(agent_id, symbol, side, amount, tags)?;
        self.member_count
            .store(core.engine.ledger().len(), Ordering::SeqCst);
        core.epoch_fills.push(receipt.fill.clone());
        Ok(receipt)
    }

    pub async fn update_prices(&self, snapshot: &HashMap<String, f64>) {
        let mut core = self.core.lock().await;
        core.engine.update_prices(snapshot);
    }

    pub async fn price_snapshot(&self) -> HashMap<String, f64> {
        let core = self.core.lock().await;
        core.engine.price_snapshot()
    }

    pub async fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let core = self.core.lock().await;
        core.engine.leaderboard()
    }

    pub async fn agent_state(&self, agent_id: &str) -> Option<(Decimal, Vec<Position>, f64)> {
        let core = self.core.lock().await;
        let account = core.engine.ledger().get(agent_id)?;
        Some((
            account.balance,
            account.positions_vec(),
            core.engine.pnl_percent(agent_id),
        ))
    }

    /// Close the trading window for this shard.
    ///
    /// Holds the lock across the whole computation so no order commits
    /// mid-ranking. Appends each member's pnl sample, ranks, marks the bottom
    /// `max(1, floor(n * elimination_fraction))` eliminated, and aggregates
    /// per-tag statistics from this epoch's fills.
    pub async fn close_epoch(&self, epoch: u64, elimination_fraction: f64) -> ShardClose {
        let mut core = self.core.lock().await;

        let member_ids: Vec<String> = core.engine.ledger().agent_ids().to_vec();
        let mut members = Vec::with_capacity(member_ids.len());
        for id in &member_ids {
            let sample = core.engine.pnl_percent(id);
            core.engine.ledger_mut().push_return(id, sample);
            let history = core
                .engine
                .ledger()
                .get(id)
                .map(|a| a.return_history.clone())
                .unwrap_or_default();
            members.push(MemberClose {
                agent_id: id.clone(),
                epoch_return: sample,
                return_history: history,
            });
        }

        let board = core.engine.leaderboard();
        let winner = board.first().map(|e| e.agent_id.clone());

        let eliminated = if board.is_empty() {
            Vec::new()
        } else {
            let count = ((board.len() as f64 * elimination_fraction).floor() as usize).max(1);
            board
                .iter()
                .rev()
                .take(count)
                .map(|e| e.agent_id.clone())
                .collect()
        };

        let tag_stats = aggregate_tag_stats(&core.epoch_fills);
        core.epoch_fills.clear();

        ShardClose {
            report: EpochShardReport {
                shard_id: self.id,
                epoch,
                winner_agent_id: winner,
                eliminated,
                tag_stats,
            },
            members,
        }
    }

    /// Point-in-time export of every member account
    pub async fn export_members(&self, fill_tail: usize) -> Vec<MemberExport> {
        let core = self.core.lock().await;
        core.engine
            .ledger()
            .agent_ids()
            .iter()
            .filter_map(|id| {
                let account = core.engine.ledger().get(id)?;
                let tail = account.trade_log.len().saturating_sub(fill_tail);
                Some(MemberExport {
                    agent_id: id.clone(),
                    balance: account.balance,
                    positions: account.positions_vec(),
                    return_history: account.return_history.clone(),
                    recent_fills: account.trade_log[tail..].to_vec(),
                })
            })
            .collect()
    }

    /// Recreate a member account from a snapshot
    pub async fn import_member(
        &self,
        agent_id: &str,
        balance: Decimal,
        positions: Vec<Position>,
        return_history: Vec<f64>,
    ) {
        let mut core = self.core.lock().await;
        core.engine
            .ledger_mut()
            .import(agent_id, balance, positions, return_history);
        self.member_count
            .store(core.engine.ledger().len(), Ordering::SeqCst);
    }
}

/// Win rate and average realized pnl per rationale tag, over one epoch's
/// SELL fills
fn aggregate_tag_stats(fills: &[Fill]) -> Vec<TagStats> {
    let mut buckets: HashMap<String, Vec<f64>> = HashMap::new();
    for fill in fills {
        let Some(pnl) = fill.realized_pnl_percent else {
            continue;
        };
        for tag in &fill.tags {
            buckets.entry(tag.clone()).or_default().push(pnl);
        }
    }
    let mut stats: Vec<TagStats> = buckets
        .into_iter()
        .map(|(tag, pnls)| {
            let wins = pnls.iter().filter(|p| **p > 0.0).count();
            TagStats {
                tag,
                fills: pnls.len() as u32,
                win_rate: wins as f64 / pnls.len() as f64 * 100.0,
                avg_pnl_percent: pnls.iter().sum::<f64>() / pnls.len() as f64,
            }
        })
        .collect();
    stats.sort_by(|a, b| a.tag.cmp(&b.tag));
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn shard() -> Shard {
        let cfg = ArenaConfig::default();
        let pool = cfg.asset_pools[0].clone();
        let shard = Shard::new(1, pool, &cfg);
        shard
    }

    async fn seed_prices(shard: &Shard) {
        shard
            .update_prices(
                &[("BTC-PERP".to_string(), 50_000.0), ("ETH-PERP".to_string(), 2_500.0)]
                    .into_iter()
                    .collect(),
            )
            .await;
    }

    #[tokio::test]
    async fn elimination_is_at_least_one() {
        let shard = shard();
        seed_prices(&shard).await;
        shard.add_member("only").await;

        let close = shard.close_epoch(1, 0.2).await;
        assert_eq!(close.report.eliminated, vec!["only".to_string()]);
    }

    #[tokio::test]
    async fn elimination_fraction_takes_the_bottom() {
        let shard = shard();
        seed_prices(&shard).await;
        for i in 0..10 {
            shard.add_member(&format!("agent-{i}")).await;
        }
        // agent-9 and agent-8 burn slippage, everyone else stays flat
        for loser in ["agent-9", "agent-8"] {
            shard
                .execute_order(loser, "BTC-PERP", Side::Buy, dec!(5000), vec![])
                .await
                .unwrap();
        }
        // agent-8 burns twice as much
        shard
            .execute_order("agent-8", "BTC-PERP", Side::Buy, dec!(4000), vec![])
            .await
            .unwrap();

        let close = shard.close_epoch(1, 0.2).await;
        assert_eq!(close.report.eliminated.len(), 2);
        assert!(close.report.eliminated.contains(&"agent-8".to_string()));
        assert!(close.report.eliminated.contains(&"agent-9".to_string()));
        assert_ne!(
            close.report.winner_agent_id.as_deref(),
            Some("agent-8"),
        );
    }

    #[tokio::test]
    async fn close_epoch_appends_return_history() {
        let shard = shard();
        seed_prices(&shard).await;
        shard.add_member("a1").await;

        shard.close_epoch(1, 0.2).await;
        let close = shard.close_epoch(2, 0.2).await;

        let member = &close.members[0];
        assert_eq!(member.return_history.len(), 2);
    }

    #[tokio::test]
    async fn tag_stats_cover_realized_fills_only() {
        let shard = shard();
        seed_prices(&shard).await;
        shard.add_member("a1").await;

        shard
            .execute_order("a1", "BTC-PERP", Side::Buy, dec!(1000), vec!["momentum".into()])
            .await
            .unwrap();
        let held = shard
            .agent_state("a1")
            .await
            .unwrap()
            .1
            .first()
            .map(|p| p.amount)
            .unwrap();
        shard
            .execute_order("a1", "BTC-PERP", Side::Sell, held, vec!["momentum".into()])
            .await
            .unwrap();

        let close = shard.close_epoch(1, 0.2).await;
        assert_eq!(close.report.tag_stats.len(), 1);
        let stats = &close.report.tag_stats[0];
        assert_eq!(stats.tag, "momentum");
        // Only the sell realizes pnl
        assert_eq!(stats.fills, 1);
        assert_eq!(stats.win_rate, 0.0);
    }

    #[tokio::test]
    async fn concurrent_orders_for_one_agent_serialize() {
        let shard = Arc::new(shard());
        seed_prices(&shard).await;
        shard.add_member("a1").await;

        let s1 = Arc::clone(&shard);
        let s2 = Arc::clone(&shard);
        let t1 = tokio::spawn(async move {
            s1.execute_order("a1", "BTC-PERP", Side::Buy, dec!(6000), vec![]).await
        });
        let t2 = tokio::spawn(async move {
            s2.execute_order("a1", "BTC-PERP", Side::Buy, dec!(6000), vec![]).await
        });
        let r1 = t1.await.unwrap();
        let r2 = t2.await.unwrap();

        // Exactly one order fits the balance; the other is rejected whole.
        assert!(r1.is_ok() ^ r2.is_ok());
        let (balance, positions, _) = shard.agent_state("a1").await.unwrap();
        assert_eq!(balance, dec!(4000));
        assert_eq!(positions.len(), 1);
    }
}
