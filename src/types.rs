//! Core wire and domain types for the arena

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// An open holding inside one account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub symbol: String,
    /// Asset quantity, strictly positive while the entry exists
    pub amount: Decimal,
    /// Volume-weighted cost basis
    pub avg_price: Decimal,
}

/// Immutable record of one executed order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    /// BUY: USD notional requested. SELL: asset quantity requested.
    pub requested: Decimal,
    pub reference_price: Decimal,
    pub fill_price: Decimal,
    /// Free-form rationale tags supplied by the agent
    pub tags: Vec<String>,
    /// Realized round-trip return in percent, SELL fills only
    pub realized_pnl_percent: Option<f64>,
    pub executed_at: DateTime<Utc>,
}

/// One fill annotated with its owner, as kept in the cross-shard history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillRecord {
    pub agent_id: String,
    pub shard_id: u64,
    pub fill: Fill,
}

/// One row of a shard or global leaderboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub agent_id: String,
    pub pnl_percent: f64,
    pub total_value: Decimal,
}

/// Registered agent metadata and its sandbox gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    /// Verdict from the external strategy sandbox. Trusted as-is.
    pub sandbox_passed: bool,
    pub registered_at: DateTime<Utc>,
}

/// Promotion tiers, in ascending order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Ascendant,
    Sovereign,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Ascendant => write!(f, "ascendant"),
            Tier::Sovereign => write!(f, "sovereign"),
        }
    }
}

/// Per-tag performance statistics handed to the attribution collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagStats {
    pub tag: String,
    pub fills: u32,
    /// Percentage of realized fills with a positive return
    pub win_rate: f64,
    pub avg_pnl_percent: f64,
}

/// Epoch-end summary for one shard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochShardReport {
    pub shard_id: u64,
    pub epoch: u64,
    pub winner_agent_id: Option<String>,
    pub eliminated: Vec<String>,
    pub tag_stats: Vec<TagStats>,
}

/// WebSocket protocol, both directions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    // Client -> Server
    Order {
        symbol: String,
        side: Side,
        amount: Decimal,
        #[serde(default)]
        tags: Vec<String>,
    },
    GetState,
    /// Opaque council message, forwarded verbatim to other agents
    CouncilMsg { text: String },

    // Server -> Client
    Connected { agent_id: String, epoch: u64 },
    OrderResult {
        success: bool,
        message: String,
        fill_price: Option<Decimal>,
        balance: Option<Decimal>,
        positions: Vec<Position>,
    },
    State {
        balance: Decimal,
        positions: Vec<Position>,
        pnl_percent: f64,
    },
    Fill(FillRecord),
    EpochStarted { epoch: u64 },
    EpochEnded { epoch: u64 },
    CouncilOpened { epoch: u64 },
    CouncilClosed { epoch: u64 },
    Elimination { shard_id: u64, agent_ids: Vec<String> },
    Promotion { agent_id: String, epoch: u64, tier: Tier },
    CouncilRelay { from: String, text: String },
    Error { message: String },
}

/// Uniform REST envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn err(msg: impl Into<String>) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
