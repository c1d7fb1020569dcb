//! REST surface for agents and operators

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::epoch::EpochPhase;
use crate::state::AppState;
use crate::types::{AgentInfo, ApiResponse, FillRecord, LeaderboardEntry, Position, Side};

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        // Agents
        .route("/agents/register", post(register_agent))
        .route("/agents/:agent_id", delete(remove_agent))
        .route("/agents/:agent_id/state", get(agent_state))
        // Orders
        .route("/orders", post(submit_order))
        // Rankings
        .route("/leaderboard", get(global_leaderboard))
        .route("/leaderboard/:shard_id", get(shard_leaderboard))
        // Arena introspection
        .route("/epoch", get(epoch_info))
        .route("/shards", get(list_shards))
        .route("/shards/:shard_id/prices", get(shard_prices))
        .route("/fills/recent", get(recent_fills))
        // WebSocket
        .route("/ws", get(crate::websocket::ws_handler))
        .with_state(state)
}

// ==================== Request/Response Types ====================

#[derive(Debug, Deserialize)]
pub struct RegisterAgentRequest {
    pub agent_id: String,
    pub name: Option<String>,
    /// Verdict from the external strategy sandbox; defaults to passed
    pub sandbox_passed: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitOrderRequest {
    pub agent_id: String,
    pub symbol: String,
    pub side: Side,
    pub amount: Decimal,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub success: bool,
    pub message: String,
    pub fill_price: Option<Decimal>,
    pub balance: Option<Decimal>,
    pub positions: Vec<Position>,
}

#[derive(Debug, Serialize)]
pub struct AgentStateResponse {
    pub balance: Decimal,
    pub positions: Vec<Position>,
    pub pnl_percent: f64,
}

#[derive(Debug, Serialize)]
pub struct EpochInfo {
    pub epoch: u64,
    pub phase: EpochPhase,
}

#[derive(Debug, Serialize)]
pub struct ShardInfo {
    pub id: u64,
    pub pool: String,
    pub members: usize,
}

#[derive(Debug, Deserialize)]
pub struct RecentFillsParams {
    pub limit: Option<usize>,
}

// ==================== Handlers ====================

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "agent-arena",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn register_agent(
    State(state): State<Arc<AppState>>,
    Json(input): Json<RegisterAgentRequest>,
) -> Result<Json<ApiResponse<AgentInfo>>, (StatusCode, Json<ApiResponse<()>>)> {
    if input.agent_id.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::err("agent_id must not be empty")),
        ));
    }
    let name = input.name.unwrap_or_else(|| input.agent_id.clone());
    let info = state
        .register_agent(&input.agent_id, &name, input.sandbox_passed.unwrap_or(true))
        .await;
    Ok(Json(ApiResponse::ok(info)))
}

pub async fn remove_agent(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, StatusCode> {
    if state.remove_agent(&agent_id).await {
        Ok(Json(ApiResponse::ok(
            serde_json::json!({ "removed": agent_id }),
        )))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

pub async fn agent_state(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<ApiResponse<AgentStateResponse>>, StatusCode> {
    match state.agent_state(&agent_id).await {
        Some((balance, positions, pnl_percent)) => Ok(Json(ApiResponse::ok(AgentStateResponse {
            balance,
            positions,
            pnl_percent,
        }))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

/// Every order failure is a structured response; this endpoint never 500s on
/// a bad order.
pub async fn submit_order(
    State(state): State<Arc<AppState>>,
    Json(input): Json<SubmitOrderRequest>,
) -> Json<OrderResponse> {
    match state
        .execute_order(
            &input.agent_id,
            &input.symbol,
            input.side,
            input.amount,
            input.tags,
        )
        .await
    {
        Ok(receipt) => Json(OrderResponse {
            success: true,
            message: format!("filled {} {}", input.side, input.symbol),
            fill_price: Some(receipt.fill.fill_price),
            balance: Some(receipt.balance),
            positions: receipt.positions,
        }),
        Err(message) => Json(OrderResponse {
            success: false,
            message,
            fill_price: None,
            balance: None,
            positions: Vec::new(),
        }),
    }
}

pub async fn global_leaderboard(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<LeaderboardEntry>>> {
    Json(ApiResponse::ok(state.manager.leaderboard(None).await))
}

pub async fn shard_leaderboard(
    State(state): State<Arc<AppState>>,
    Path(shard_id): Path<u64>,
) -> Result<Json<ApiResponse<Vec<LeaderboardEntry>>>, StatusCode> {
    match state.manager.shard(shard_id) {
        Some(shard) => Ok(Json(ApiResponse::ok(shard.leaderboard().await))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

pub async fn epoch_info(State(state): State<Arc<AppState>>) -> Json<ApiResponse<EpochInfo>> {
    Json(ApiResponse::ok(EpochInfo {
        epoch: state.current_epoch(),
        phase: state.phase(),
    }))
}

pub async fn list_shards(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<ShardInfo>>> {
    let shards = state
        .manager
        .shards_ordered()
        .iter()
        .map(|s| ShardInfo {
            id: s.id,
            pool: s.pool.name.clone(),
            members: s.member_count(),
        })
        .collect();
    Json(ApiResponse::ok(shards))
}

pub async fn shard_prices(
    State(state): State<Arc<AppState>>,
    Path(shard_id): Path<u64>,
) -> Result<Json<ApiResponse<std::collections::HashMap<String, f64>>>, StatusCode> {
    match state.manager.shard(shard_id) {
        Some(shard) => Ok(Json(ApiResponse::ok(shard.price_snapshot().await))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

pub async fn recent_fills(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RecentFillsParams>,
) -> Json<ApiResponse<Vec<FillRecord>>> {
    let limit = params.limit.unwrap_or(50).min(500);
    Json(ApiResponse::ok(state.recent_fills_vec(limit)))
}
