//! Persistent agent sessions
//!
//! One socket per agent: inbound order/state requests plus the arena-wide
//! fan-out (fills, epoch transitions, council windows). Broadcast delivery is
//! best-effort; a slow session lags without blocking anyone else.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::state::AppState;
use crate::types::WsMessage;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub agent_id: String,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.agent_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, agent_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let mut broadcast_rx = state.broadcast_tx.subscribe();

    info!(%agent_id, "agent session opened");

    let hello = WsMessage::Connected {
        agent_id: agent_id.clone(),
        epoch: state.current_epoch(),
    };
    if send_json(&mut sender, &hello).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_client_message(&state, &agent_id, &text).await;
                        if let Some(reply) = reply {
                            if send_json(&mut sender, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(%agent_id, "agent session closed");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(%agent_id, "websocket error: {e}");
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            outbound = broadcast_rx.recv() => {
                match outbound {
                    Ok(msg) => {
                        if send_json(&mut sender, &msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(%agent_id, "session lagged {n} broadcasts");
                    }
                    Err(_) => break,
                }
            }
        }
    }

    info!(%agent_id, "agent session ended");
}

/// Dispatch one inbound client message. A disconnect mid-request simply
/// drops the reply; order execution itself is all-or-nothing inside the
/// shard.
async fn handle_client_message(
    state: &AppState,
    agent_id: &str,
    text: &str,
) -> Option<WsMessage> {
    let msg: WsMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return Some(WsMessage::Error {
                message: format!("malformed message: {e}"),
            });
        }
    };

    match msg {
        WsMessage::Order {
            symbol,
            side,
            amount,
            tags,
        } => {
            let result = state
                .execute_order(agent_id, &symbol, side, amount, tags)
                .await;
            Some(match result {
                Ok(receipt) => WsMessage::OrderResult {
                    success: true,
                    message: format!("filled {} {}", side, symbol),
                    fill_price: Some(receipt.fill.fill_price),
                    balance: Some(receipt.balance),
                    positions: receipt.positions,
                },
                Err(message) => WsMessage::OrderResult {
                    success: false,
                    message,
                    fill_price: None,
                    balance: None,
                    positions: Vec::new(),
                },
            })
        }
        WsMessage::GetState => match state.agent_state(agent_id).await {
            Some((balance, positions, pnl_percent)) => Some(WsMessage::State {
                balance,
                positions,
                pnl_percent,
            }),
            None => Some(WsMessage::Error {
                message: format!("no account for agent: {agent_id}"),
            }),
        },
        // Council messages are opaque: forwarded verbatim, never interpreted
        WsMessage::CouncilMsg { text } => {
            let _ = state.broadcast_tx.send(WsMessage::CouncilRelay {
                from: agent_id.to_string(),
                text,
            });
            None
        }
        _ => Some(WsMessage::Error {
            message: "unsupported message type".to_string(),
        }),
    }
}

async fn send_json(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &WsMessage,
) -> Result<(), ()> {
    let json = serde_json::to_string(msg).map_err(|_| ())?;
    sender.send(Message::Text(json)).await.map_err(|_| ())
}
