//! Epoch lifecycle state machine
//!
//! TRADING -> ENDING -> COUNCIL_OPEN -> COUNCIL_CLOSED -> TRADING, forever.
//! Shards are processed independently in ascending id order; the global
//! merge, streak bookkeeping, and promotion checks run once per epoch after
//! every shard has closed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

use crate::events::ArenaEvent;
use crate::metrics::RiskMetrics;
use crate::persistence;
use crate::state::AppState;
use crate::types::{Tier, WsMessage};

/// Minimum composite score and win streak for the first tier
const ASCENDANT_COMPOSITE: f64 = 60.0;
const ASCENDANT_STREAK: u32 = 2;
/// Second tier adds a consecutive-positive-epochs requirement
const SOVEREIGN_COMPOSITE: f64 = 80.0;
const SOVEREIGN_STREAK: u32 = 3;
const SOVEREIGN_POSITIVE_EPOCHS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochPhase {
    Trading,
    Ending,
    CouncilOpen,
    CouncilClosed,
}

/// Cross-epoch bookkeeping for one agent. Mutated only at epoch boundaries.
#[derive(Debug, Clone, Default)]
pub struct AgentRecord {
    /// Consecutive epochs as the global top-1
    pub win_streak: u32,
    /// Sum of appended epoch returns over the agent's lifetime
    pub cumulative_return: f64,
    /// Trailing consecutive epochs with a positive return
    pub positive_epochs: u32,
    /// Tiers already granted; each fires at most once
    pub promoted: BTreeSet<Tier>,
}

impl AgentRecord {
    fn qualifies(&self, tier: Tier, composite: f64) -> bool {
        match tier {
            Tier::Ascendant => {
                composite >= ASCENDANT_COMPOSITE && self.win_streak >= ASCENDANT_STREAK
            }
            Tier::Sovereign => {
                composite >= SOVEREIGN_COMPOSITE
                    && self.win_streak >= SOVEREIGN_STREAK
                    && self.positive_epochs >= SOVEREIGN_POSITIVE_EPOCHS
            }
        }
    }
}

/// Run the ENDING phase once: close every shard, merge globally, update
/// streaks and cumulative returns, and emit promotion events for agents
/// newly crossing a tier.
pub async fn run_epoch_end(state: &AppState) {
    let epoch = state.current_epoch();
    state.set_phase(EpochPhase::Ending);
    let fraction = state.config.elimination_fraction;

    let mut closes = Vec::new();
    for shard in state.manager.shards_ordered() {
        let close = shard.close_epoch(epoch, fraction).await;
        info!(
            shard_id = shard.id,
            epoch,
            winner = close.report.winner_agent_id.as_deref().unwrap_or("-"),
            eliminated = close.report.eliminated.len(),
            "shard epoch closed"
        );
        let _ = state.broadcast_tx.send(WsMessage::Elimination {
            shard_id: shard.id,
            agent_ids: close.report.eliminated.clone(),
        });
        state
            .events
            .publish(ArenaEvent::EpochReport(close.report.clone()));
        closes.push(close);
    }

    let global = state.manager.global_leaderboard().await;
    let champion = global.first().map(|e| e.agent_id.clone());

    let mut promotions = Vec::new();
    {
        let mut records = state.records.lock().await;
        for close in &closes {
            for member in &close.members {
                let record = records.entry(member.agent_id.clone()).or_default();
                record.cumulative_return += member.epoch_return;
                if member.epoch_return > 0.0 {
                    record.positive_epochs += 1;
                } else {
                    record.positive_epochs = 0;
                }
            }
        }
        for (agent_id, record) in records.iter_mut() {
            if champion.as_deref() == Some(agent_id.as_str()) {
                record.win_streak += 1;
            } else {
                record.win_streak = 0;
            }
        }
        for close in &closes {
            for member in &close.members {
                let Some(record) = records.get_mut(&member.agent_id) else {
                    continue;
                };
                let metrics =
                    RiskMetrics::from_returns(&member.return_history, record.cumulative_return);
                for tier in [Tier::Ascendant, Tier::Sovereign] {
                    if record.qualifies(tier, metrics.composite) && record.promoted.insert(tier) {
                        promotions.push((member.agent_id.clone(), tier));
                    }
                }
            }
        }
    }

    for (agent_id, tier) in promotions {
        info!(agent_id, %tier, epoch, "agent promoted");
        state.events.publish(ArenaEvent::Promotion {
            agent_id: agent_id.clone(),
            epoch,
            tier,
        });
        let _ = state.broadcast_tx.send(WsMessage::Promotion {
            agent_id,
            epoch,
            tier,
        });
    }
}

/// The recurring epoch clock. Runs until process shutdown.
pub async fn start_epoch_engine(state: Arc<AppState>) {
    let trading = Duration::from_secs(state.config.trading_secs);
    let council = Duration::from_secs(state.config.council_secs);
    info!(
        trading_secs = state.config.trading_secs,
        council_secs = state.config.council_secs,
        "⚔️ Epoch engine starting at epoch {}",
        state.current_epoch()
    );

    loop {
        let epoch = state.current_epoch();
        state.set_phase(EpochPhase::Trading);
        let _ = state.broadcast_tx.send(WsMessage::EpochStarted { epoch });
        sleep(trading).await;

        run_epoch_end(&state).await;
        let _ = state.broadcast_tx.send(WsMessage::EpochEnded { epoch });

        state.set_phase(EpochPhase::CouncilOpen);
        let _ = state.broadcast_tx.send(WsMessage::CouncilOpened { epoch });
        state.events.publish(ArenaEvent::CouncilOpened { epoch });
        sleep(council).await;

        state.set_phase(EpochPhase::CouncilClosed);
        let _ = state.broadcast_tx.send(WsMessage::CouncilClosed { epoch });
        state.events.publish(ArenaEvent::CouncilClosed { epoch });

        // Persist the finished epoch before advancing. Liveness wins over
        // durability: a failed write is logged and the epoch moves on.
        persistence::flush(&state).await;
        let next = state.advance_epoch();
        info!(epoch = next, "epoch advanced");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArenaConfig;
    use crate::types::Side;
    use rust_decimal_macros::dec;

    fn test_state() -> Arc<AppState> {
        let mut cfg = ArenaConfig::default();
        cfg.snapshot_db_path = ":memory:".to_string();
        AppState::new(cfg).unwrap()
    }

    async fn seed_prices(state: &AppState, btc: f64) {
        for shard in state.manager.shards_ordered() {
            shard
                .update_prices(&[("BTC-PERP".to_string(), btc)].into_iter().collect())
                .await;
        }
    }

    #[tokio::test]
    async fn champion_streak_increments_and_others_reset() {
        let state = test_state();
        state.register_agent("winner", "W", true).await;
        state.register_agent("loser", "L", true).await;
        seed_prices(&state, 50_000.0).await;

        // Winner rides a doubling; loser stays in cash
        state
            .execute_order("winner", "BTC-PERP", Side::Buy, dec!(5000), vec![])
            .await
            .unwrap();
        seed_prices(&state, 100_000.0).await;

        run_epoch_end(&state).await;
        run_epoch_end(&state).await;

        let records = state.records.lock().await;
        assert_eq!(records.get("winner").unwrap().win_streak, 2);
        assert_eq!(records.get("loser").unwrap().win_streak, 0);
        assert!(records.get("winner").unwrap().cumulative_return > 0.0);
    }

    #[tokio::test]
    async fn promotion_fires_once_per_tier() {
        let state = test_state();
        let mut events = state.events.subscribe();
        state.register_agent("star", "S", true).await;
        seed_prices(&state, 50_000.0).await;

        state
            .execute_order("star", "BTC-PERP", Side::Buy, dec!(9000), vec![])
            .await
            .unwrap();

        // A sustained rally: streak, cumulative return, and the risk-adjusted
        // blend all build across four epoch ends
        for price in [120_000.0, 140_000.0, 150_000.0, 160_000.0] {
            seed_prices(&state, price).await;
            run_epoch_end(&state).await;
        }

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ArenaEvent::Promotion { agent_id, tier, .. } = event {
                assert_eq!(agent_id, "star");
                seen.push(tier);
            }
        }
        // Each tier granted exactly once, ascending
        assert_eq!(seen, vec![Tier::Ascendant, Tier::Sovereign]);

        let records = state.records.lock().await;
        let promoted = &records.get("star").unwrap().promoted;
        assert!(promoted.contains(&Tier::Ascendant));
        assert!(promoted.contains(&Tier::Sovereign));
    }

    #[tokio::test]
    async fn epoch_end_handles_empty_arena() {
        let state = test_state();
        run_epoch_end(&state).await;
        assert_eq!(state.phase(), EpochPhase::Ending);
        assert!(state.records.lock().await.is_empty());
    }
}
