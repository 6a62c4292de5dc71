use axum::{extract::State, routing::get, Json, Router};

use scheduler::SchedulerStatus;

use crate::AppState;

pub fn schedule_router() -> Router<AppState> {
    Router::new().route("/api/schedule", get(get_schedule))
}

async fn get_schedule(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status().await)
}
