use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use common::DetectedSignal;

use crate::AppState;

pub fn priority_router() -> Router<AppState> {
    Router::new()
        .route("/api/priority", get(get_priority))
        .route("/api/priority/score", post(score_signals))
}

async fn get_priority(State(state): State<AppState>) -> Json<Value> {
    let config = state.gate.config().await;
    let source = state.gate.config_source().await;
    Json(json!({
        "config": config,
        "source": source,
    }))
}

/// Score a batch against the live config without notifying anyone.
async fn score_signals(
    State(state): State<AppState>,
    Json(signals): Json<Vec<DetectedSignal>>,
) -> Json<Value> {
    let report = state.gate.assess(signals).await;
    Json(json!({
        "send": report.triage.send,
        "skipped": report.triage.skipped,
        "summary": report.summary,
    }))
}
