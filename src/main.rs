use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use agent_arena::{config::ArenaConfig, epoch, handlers, persistence, price_feed, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ArenaConfig::from_env();
    let state = AppState::new(config)?;

    // Resume from the last snapshot when one exists; fresh arena otherwise
    match state.gateway.load().await {
        Some(snapshot) => persistence::restore_snapshot(&state, snapshot).await,
        None => info!("no snapshot found, starting fresh at epoch 1"),
    }

    tokio::spawn(price_feed::start_price_feed(Arc::clone(&state)));
    tokio::spawn(epoch::start_epoch_engine(Arc::clone(&state)));
    tokio::spawn(persistence::start_persistence(Arc::clone(&state)));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = handlers::create_router(Arc::clone(&state))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = state.config.bind_addr.clone();
    info!("🚀 agent-arena starting on {}", addr);
    info!("📡 WebSocket endpoint: ws://{}/ws?agent_id=<id>", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Final best-effort flush so a restart resumes where we left off
    info!("shutting down, flushing state");
    persistence::flush(&state).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {e}");
    }
}
