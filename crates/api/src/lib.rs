mod auth;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use common::Result;
use priority::NotificationGate;
use scheduler::SchedulerLoop;

/// Shared application state injected into every route handler.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: SchedulerLoop,
    pub gate: Arc<NotificationGate>,
    pub dashboard_token: String,
}

/// Every route, with auth applied to the `/api` ones.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any);

    Router::new()
        .merge(routes::api_router(state.clone()))
        .merge(routes::health_router())
        .with_state(state)
        .layer(cors)
}

/// Build and run the Axum status server.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(%addr, "Status API listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
