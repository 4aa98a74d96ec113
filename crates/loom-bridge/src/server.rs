//! Axum router wiring: `/ws` for the invoke/event duplex, `/health` for
//! liveness.
//!
//! Grounded on the teacher's `server.rs` (axum `Router`, CORS layer,
//! `WebSocketUpgrade` handler wiring). The "bee protocol" endpoints
//! (`/surface`, `/plan`, `/test`, `/hints`), the embedded chat UI served
//! from `index_handler`, and the `AGENTICLAW_*`/`RUSTCLAW_*`/`OPENCLAW_*`
//! env fallback chain are dropped — see DESIGN.md.

use crate::auth::ResolvedAuth;
use crate::dedup::FingerprintCache;
use crate::gate::ConcurrencyGate;
use crate::invoker::BridgeInvoker;
use crate::ws::{handle_connection, BridgeState};
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use loom_core::config::RuntimeConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub async fn serve(config: RuntimeConfig, invoker: Arc<dyn BridgeInvoker>) -> anyhow::Result<()> {
    let (events, _rx) = broadcast::channel(1024);
    let state = Arc::new(BridgeState {
        auth: ResolvedAuth::from_config(&config.bridge_auth),
        invoker,
        gate: Arc::new(ConcurrencyGate::new(config.max_concurrency)),
        dedup: Arc::new(FingerprintCache::new(
            Duration::from_secs(config.dedup_ttl_secs),
            4096,
        )),
        events,
    });

    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any).allow_origin(
        if config.bridge_auth.allowed_origins.is_empty() {
            tower_http::cors::AllowOrigin::any()
        } else {
            tower_http::cors::AllowOrigin::list(
                config
                    .bridge_auth
                    .allowed_origins
                    .iter()
                    .filter_map(|o| o.parse().ok()),
            )
        },
    );

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.bind.to_addr(), config.port).parse()?;
    info!("bridge listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<BridgeState>>,
    headers: HeaderMap,
    ConnectInfo(_addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let origin = headers
        .get("origin")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    ws.on_upgrade(move |socket| handle_connection(socket, state, origin))
}
