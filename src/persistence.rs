//! Snapshot persistence
//!
//! Full arena state is serialized on a fixed cadence and at every epoch
//! boundary. The remote snapshot service is preferred; local SQLite is the
//! fallback on both write and read. Persistence failures are never fatal:
//! in-memory state stays authoritative until the next successful cycle.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::interval;
use tracing::{info, warn};

use crate::state::AppState;
use crate::types::{FillRecord, Position, Tier};

/// Fills carried per account into a snapshot
const FILL_TAIL: usize = 8;
/// Local snapshots retained before pruning
const KEEP_SNAPSHOTS: usize = 10;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("remote store error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no snapshot available")]
    Missing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardMeta {
    pub id: u64,
    pub pool_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub agent_id: String,
    pub name: String,
    pub sandbox_passed: bool,
    pub shard_id: u64,
    pub balance: Decimal,
    pub positions: Vec<Position>,
    pub return_history: Vec<f64>,
    pub win_streak: u32,
    pub cumulative_return: f64,
    pub positive_epochs: u32,
    pub promoted: Vec<Tier>,
    pub recent_fills: Vec<crate::types::Fill>,
}

/// Point-in-time copy of everything needed to resume the competition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaSnapshot {
    pub epoch: u64,
    pub taken_at: DateTime<Utc>,
    pub shards: Vec<ShardMeta>,
    pub agents: Vec<AgentSnapshot>,
    pub recent_fills: Vec<FillRecord>,
}

/// Local SQLite snapshot store
pub struct SnapshotDb {
    conn: Mutex<Connection>,
}

impl SnapshotDb {
    pub fn new(path: &str) -> Result<Self, PersistError> {
        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                epoch INTEGER NOT NULL,
                taken_at TEXT NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_snapshots_epoch ON snapshots(epoch);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, PersistError> {
        Self::new(":memory:")
    }

    pub fn save(&self, snapshot: &ArenaSnapshot) -> Result<(), PersistError> {
        let payload = serde_json::to_string(snapshot)?;
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO snapshots (epoch, taken_at, payload) VALUES (?1, ?2, ?3)",
            params![
                snapshot.epoch as i64,
                snapshot.taken_at.to_rfc3339(),
                payload
            ],
        )?;
        conn.execute(
            "DELETE FROM snapshots WHERE id NOT IN
             (SELECT id FROM snapshots ORDER BY id DESC LIMIT ?1)",
            params![KEEP_SNAPSHOTS as i64],
        )?;
        Ok(())
    }

    pub fn load_latest(&self) -> Result<ArenaSnapshot, PersistError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let payload: String = conn
            .query_row(
                "SELECT payload FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => PersistError::Missing,
                other => PersistError::Sqlite(other),
            })?;
        Ok(serde_json::from_str(&payload)?)
    }
}

/// Client for the external durable snapshot service
pub struct RemoteStore {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn push(&self, snapshot: &ArenaSnapshot) -> Result<(), PersistError> {
        self.client
            .post(format!("{}/snapshots", self.base_url))
            .json(snapshot)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn fetch_latest(&self) -> Result<ArenaSnapshot, PersistError> {
        let resp = self
            .client
            .get(format!("{}/snapshots/latest", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

/// Remote-first store chain with a local fallback at every link
pub struct PersistenceGateway {
    db: SnapshotDb,
    remote: Option<RemoteStore>,
}

impl PersistenceGateway {
    pub fn new(db_path: &str, remote_url: Option<&str>) -> Result<Self, PersistError> {
        Ok(Self {
            db: SnapshotDb::new(db_path)?,
            remote: remote_url.map(RemoteStore::new),
        })
    }

    /// Write to the remote store and the local fallback. Succeeds when
    /// either write lands.
    pub async fn save(&self, snapshot: &ArenaSnapshot) -> Result<(), PersistError> {
        let mut remote_ok = false;
        if let Some(remote) = &self.remote {
            match remote.push(snapshot).await {
                Ok(()) => remote_ok = true,
                Err(e) => warn!("remote snapshot push failed: {e}"),
            }
        }
        match self.db.save(snapshot) {
            Ok(()) => Ok(()),
            Err(e) if remote_ok => {
                warn!("local snapshot write failed (remote succeeded): {e}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Remote first, local fallback, fresh start when neither has data
    pub async fn load(&self) -> Option<ArenaSnapshot> {
        if let Some(remote) = &self.remote {
            match remote.fetch_latest().await {
                Ok(snapshot) => return Some(snapshot),
                Err(e) => warn!("remote snapshot fetch failed, trying local: {e}"),
            }
        }
        match self.db.load_latest() {
            Ok(snapshot) => Some(snapshot),
            Err(PersistError::Missing) => None,
            Err(e) => {
                warn!("local snapshot unreadable, starting fresh: {e}");
                None
            }
        }
    }
}

/// Point-in-time export. Each shard's lock is held across its own export so
/// an account is never read mid-mutation.
pub async fn export_snapshot(state: &AppState) -> ArenaSnapshot {
    let records = state.records.lock().await;
    let mut shards = Vec::new();
    let mut agents = Vec::new();

    for shard in state.manager.shards_ordered() {
        shards.push(ShardMeta {
            id: shard.id,
            pool_name: shard.pool.name.clone(),
        });
        for member in shard.export_members(FILL_TAIL).await {
            let record = records.get(&member.agent_id).cloned().unwrap_or_default();
            let info = state.agents.get(&member.agent_id);
            agents.push(AgentSnapshot {
                agent_id: member.agent_id.clone(),
                name: info
                    .as_ref()
                    .map(|i| i.name.clone())
                    .unwrap_or_else(|| member.agent_id.clone()),
                sandbox_passed: info.as_ref().map(|i| i.sandbox_passed).unwrap_or(true),
                shard_id: shard.id,
                balance: member.balance,
                positions: member.positions,
                return_history: member.return_history,
                win_streak: record.win_streak,
                cumulative_return: record.cumulative_return,
                positive_epochs: record.positive_epochs,
                promoted: record.promoted.iter().copied().collect(),
                recent_fills: member.recent_fills,
            });
        }
    }

    let recent_fills = {
        let fills = state
            .recent_fills
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        fills.iter().cloned().collect()
    };

    ArenaSnapshot {
        epoch: state.current_epoch(),
        taken_at: Utc::now(),
        shards,
        agents,
        recent_fills,
    }
}

/// Rebuild shards, accounts, and the epoch counter from a snapshot
pub async fn restore_snapshot(state: &AppState, snapshot: ArenaSnapshot) {
    info!(
        epoch = snapshot.epoch,
        agents = snapshot.agents.len(),
        "restoring from snapshot"
    );
    state.set_epoch(snapshot.epoch.max(1));

    for meta in &snapshot.shards {
        state.manager.restore_shard(meta.id, &meta.pool_name);
    }

    let mut records = state.records.lock().await;
    for agent in snapshot.agents {
        let pool_name = snapshot
            .shards
            .iter()
            .find(|m| m.id == agent.shard_id)
            .map(|m| m.pool_name.clone())
            .unwrap_or_default();
        let shard = state.manager.restore_shard(agent.shard_id, &pool_name);
        shard
            .import_member(
                &agent.agent_id,
                agent.balance,
                agent.positions,
                agent.return_history,
            )
            .await;
        state.manager.restore_agent(&agent.agent_id, agent.shard_id);
        state.agents.insert(
            agent.agent_id.clone(),
            crate::types::AgentInfo {
                id: agent.agent_id.clone(),
                name: agent.name,
                sandbox_passed: agent.sandbox_passed,
                registered_at: snapshot.taken_at,
            },
        );
        records.insert(
            agent.agent_id,
            crate::epoch::AgentRecord {
                win_streak: agent.win_streak,
                cumulative_return: agent.cumulative_return,
                positive_epochs: agent.positive_epochs,
                promoted: agent.promoted.into_iter().collect(),
            },
        );
    }
    drop(records);

    let mut fills = state
        .recent_fills
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    *fills = snapshot.recent_fills.into_iter().collect();
}

/// Background persistence loop
pub async fn start_persistence(state: std::sync::Arc<AppState>) {
    let period = state.config.persist_interval_secs;
    info!("💾 Persistence engine starting (interval: {}s)", period);
    let mut ticker = interval(Duration::from_secs(period));
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let snapshot = export_snapshot(&state).await;
        if let Err(e) = state.gateway.save(&snapshot).await {
            warn!("periodic persistence failed: {e}");
        }
    }
}

/// Best-effort flush used at shutdown and epoch boundaries
pub async fn flush(state: &AppState) {
    let snapshot = export_snapshot(state).await;
    match state.gateway.save(&snapshot).await {
        Ok(()) => info!(epoch = snapshot.epoch, "state persisted"),
        Err(e) => warn!("persistence failed, in-memory state stays authoritative: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArenaConfig;
    use crate::types::Side;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn sample_snapshot() -> ArenaSnapshot {
        ArenaSnapshot {
            epoch: 7,
            taken_at: Utc::now(),
            shards: vec![ShardMeta {
                id: 1,
                pool_name: "majors".to_string(),
            }],
            agents: vec![],
            recent_fills: vec![],
        }
    }

    #[test]
    fn local_store_round_trips_latest() {
        let db = SnapshotDb::in_memory().unwrap();
        let mut snapshot = sample_snapshot();
        db.save(&snapshot).unwrap();
        snapshot.epoch = 8;
        db.save(&snapshot).unwrap();

        let loaded = db.load_latest().unwrap();
        assert_eq!(loaded.epoch, 8);
        assert_eq!(loaded.shards[0].pool_name, "majors");
    }

    #[test]
    fn empty_store_reports_missing() {
        let db = SnapshotDb::in_memory().unwrap();
        assert!(matches!(db.load_latest(), Err(PersistError::Missing)));
    }

    fn test_state() -> Arc<crate::state::AppState> {
        let mut cfg = ArenaConfig::default();
        cfg.snapshot_db_path = ":memory:".to_string();
        crate::state::AppState::new(cfg).unwrap()
    }

    #[tokio::test]
    async fn export_restore_round_trip() {
        let source = test_state();
        source.set_epoch(5);
        source.register_agent("a1", "Alpha", true).await;
        source.register_agent("a2", "Beta", true).await;
        for shard in source.manager.shards_ordered() {
            shard
                .update_prices(
                    &[("BTC-PERP".to_string(), 50_000.0), ("ETH-PERP".to_string(), 2_500.0)]
                        .into_iter()
                        .collect(),
                )
                .await;
        }
        source
            .execute_order("a1", "BTC-PERP", Side::Buy, dec!(2500), vec!["entry".into()])
            .await
            .unwrap();
        crate::epoch::run_epoch_end(&source).await;

        let snapshot = export_snapshot(&source).await;

        let restored = test_state();
        restore_snapshot(&restored, snapshot).await;

        assert_eq!(restored.current_epoch(), 5);
        for agent in ["a1", "a2"] {
            let (b1, p1, _) = source.agent_state(agent).await.unwrap();
            let (b2, p2, _) = restored.agent_state(agent).await.unwrap();
            assert_eq!(b1, b2);
            assert_eq!(p1, p2);
        }
        // Same shard, same id, same pool
        let s1 = source.manager.shard_of("a1").unwrap();
        let s2 = restored.manager.shard_of("a1").unwrap();
        assert_eq!(s1.id, s2.id);
        assert_eq!(s1.pool.name, s2.pool.name);
        // Cross-epoch records survive
        let records = restored.records.lock().await;
        assert!(records.contains_key("a1"));
        assert!(records.contains_key("a2"));
    }

    #[test]
    fn old_snapshots_are_pruned() {
        let db = SnapshotDb::in_memory().unwrap();
        for epoch in 0..(KEEP_SNAPSHOTS as u64 + 5) {
            let mut snapshot = sample_snapshot();
            snapshot.epoch = epoch;
            db.save(&snapshot).unwrap();
        }
        let conn = db.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, KEEP_SNAPSHOTS as i64);
    }
}
