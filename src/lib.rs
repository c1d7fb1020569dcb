//! agent-arena: sharded trading competition engine for autonomous agents
//!
//! Agents trade synthetic markets inside independent shards; a recurring
//! epoch lifecycle ranks them, eliminates the worst, and promotes the best.

pub mod config;
pub mod engine;
pub mod epoch;
pub mod events;
pub mod handlers;
pub mod ledger;
pub mod manager;
pub mod metrics;
pub mod persistence;
pub mod price_feed;
pub mod shard;
pub mod state;
pub mod types;
pub mod websocket;

pub use config::ArenaConfig;
pub use engine::{MatchEngine, OrderError};
pub use manager::ShardManager;
pub use shard::Shard;
pub use state::AppState;
