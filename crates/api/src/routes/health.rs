use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::AppState;

pub fn health_router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

/// Health check endpoint, no auth required.
async fn healthz(State(state): State<AppState>) -> Json<Value> {
    let scheduler = state.scheduler.state().await;
    Json(json!({
        "status": "ok",
        "scheduler": scheduler.to_string(),
        "mode": state.scheduler.schedule().mode().to_string(),
    }))
}
