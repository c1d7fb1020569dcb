//! Shared application state

use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::ArenaConfig;
use crate::engine::FillReceipt;
use crate::epoch::{AgentRecord, EpochPhase};
use crate::events::{ArenaEvent, EventBus};
use crate::manager::ShardManager;
use crate::persistence::PersistenceGateway;
use crate::types::{AgentInfo, FillRecord, Position, Side, WsMessage};

pub struct AppState {
    pub config: Arc<ArenaConfig>,
    pub manager: Arc<ShardManager>,
    /// Registered agents and their sandbox gate
    pub agents: DashMap<String, AgentInfo>,
    epoch: AtomicU64,
    phase: RwLock<EpochPhase>,
    /// Cross-epoch per-agent bookkeeping (streaks, cumulative return, tiers)
    pub records: tokio::sync::Mutex<HashMap<String, AgentRecord>>,
    /// Cross-shard trade history, newest last, capped
    pub recent_fills: Mutex<VecDeque<FillRecord>>,
    /// Fan-out to connected agent sessions
    pub broadcast_tx: broadcast::Sender<WsMessage>,
    /// Collaborator-facing event bus
    pub events: EventBus,
    pub gateway: PersistenceGateway,
}

impl AppState {
    pub fn new(config: ArenaConfig) -> anyhow::Result<Arc<Self>> {
        let gateway = PersistenceGateway::new(
            &config.snapshot_db_path,
            config.snapshot_service_url.as_deref(),
        )?;
        let config = Arc::new(config);
        let (broadcast_tx, _) = broadcast::channel(1024);

        Ok(Arc::new(Self {
            manager: Arc::new(ShardManager::new(Arc::clone(&config))),
            config,
            agents: DashMap::new(),
            epoch: AtomicU64::new(1),
            phase: RwLock::new(EpochPhase::Trading),
            records: tokio::sync::Mutex::new(HashMap::new()),
            recent_fills: Mutex::new(VecDeque::new()),
            broadcast_tx,
            events: EventBus::new(1024),
            gateway,
        }))
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn set_epoch(&self, epoch: u64) {
        self.epoch.store(epoch, Ordering::SeqCst);
    }

    pub fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn phase(&self) -> EpochPhase {
        *self.phase.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_phase(&self, phase: EpochPhase) {
        *self.phase.write().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    /// Register an agent with its sandbox verdict and place it on a shard
    pub async fn register_agent(
        &self,
        agent_id: &str,
        name: &str,
        sandbox_passed: bool,
    ) -> AgentInfo {
        let info = AgentInfo {
            id: agent_id.to_string(),
            name: name.to_string(),
            sandbox_passed,
            registered_at: chrono::Utc::now(),
        };
        self.agents.insert(agent_id.to_string(), info.clone());
        if sandbox_passed {
            self.manager.assign_agent(agent_id).await;
        }
        info
    }

    /// Administrative removal: drops the account and the registration
    pub async fn remove_agent(&self, agent_id: &str) -> bool {
        let existed = self.agents.remove(agent_id).is_some();
        self.manager.remove_agent(agent_id).await;
        existed
    }

    /// Route one order to the owning shard. All failures come back as a
    /// structured message; nothing here can take down a session or a shard.
    pub async fn execute_order(
        &self,
        agent_id: &str,
        symbol: &str,
        side: Side,
        amount: Decimal,
        tags: Vec<String>,
    ) -> Result<FillReceipt, String> {
        match self.agents.get(agent_id) {
            Some(info) if !info.sandbox_passed => {
                return Err("agent strategy failed sandbox validation".to_string());
            }
            Some(_) => {}
            None => return Err(format!("unknown agent: {agent_id}")),
        }

        let shard = self.manager.assign_agent(agent_id).await;
        let receipt = shard
            .execute_order(agent_id, symbol, side, amount, tags)
            .await
            .map_err(|e| e.to_string())?;

        self.record_fill(agent_id, shard.id, &receipt);
        Ok(receipt)
    }

    /// Append to the cross-shard history and fan the fill out
    fn record_fill(&self, agent_id: &str, shard_id: u64, receipt: &FillReceipt) {
        let record = FillRecord {
            agent_id: agent_id.to_string(),
            shard_id,
            fill: receipt.fill.clone(),
        };
        {
            let mut fills = self.recent_fills.lock().unwrap_or_else(|e| e.into_inner());
            fills.push_back(record.clone());
            while fills.len() > self.config.recent_fills_cap {
                fills.pop_front();
            }
        }
        self.events.publish(ArenaEvent::Fill(record.clone()));
        let _ = self.broadcast_tx.send(WsMessage::Fill(record));
        debug!(agent_id, shard_id, "fill committed");
    }

    pub async fn agent_state(&self, agent_id: &str) -> Option<(Decimal, Vec<Position>, f64)> {
        let shard = self.manager.shard_of(agent_id)?;
        shard.agent_state(agent_id).await
    }

    pub fn recent_fills_vec(&self, limit: usize) -> Vec<FillRecord> {
        let fills = self.recent_fills.lock().unwrap_or_else(|e| e.into_inner());
        fills.iter().rev().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_state() -> Arc<AppState> {
        let mut cfg = ArenaConfig::default();
        cfg.snapshot_db_path = ":memory:".to_string();
        AppState::new(cfg).unwrap()
    }

    async fn seed_prices(state: &AppState) {
        for shard in state.manager.shards_ordered() {
            shard
                .update_prices(
                    &[
                        ("BTC-PERP".to_string(), 50_000.0),
                        ("ETH-PERP".to_string(), 2_500.0),
                        ("SOL-PERP".to_string(), 150.0),
                    ]
                    .into_iter()
                    .collect(),
                )
                .await;
        }
    }

    #[tokio::test]
    async fn orders_from_unregistered_agents_bounce() {
        let state = test_state();
        let err = state
            .execute_order("ghost", "BTC-PERP", Side::Buy, dec!(100), vec![])
            .await
            .unwrap_err();
        assert!(err.contains("unknown agent"));
    }

    #[tokio::test]
    async fn sandbox_verdict_gates_order_flow() {
        let state = test_state();
        state.register_agent("a1", "Alpha", false).await;
        let err = state
            .execute_order("a1", "BTC-PERP", Side::Buy, dec!(100), vec![])
            .await
            .unwrap_err();
        assert!(err.contains("sandbox"));
    }

    #[tokio::test]
    async fn order_flow_records_cross_shard_history() {
        let state = test_state();
        state.register_agent("a1", "Alpha", true).await;
        seed_prices(&state).await;

        state
            .execute_order("a1", "BTC-PERP", Side::Buy, dec!(500), vec!["entry".into()])
            .await
            .unwrap();

        let fills = state.recent_fills_vec(10);
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].agent_id, "a1");
        assert_eq!(fills[0].fill.tags, vec!["entry".to_string()]);
    }

    #[tokio::test]
    async fn rejected_order_is_a_message_not_a_panic() {
        let state = test_state();
        state.register_agent("a1", "Alpha", true).await;
        seed_prices(&state).await;

        let err = state
            .execute_order("a1", "NOPE-PERP", Side::Buy, dec!(100), vec![])
            .await
            .unwrap_err();
        assert!(err.contains("unknown symbol"));
        assert!(state.recent_fills_vec(10).is_empty());
    }
}
