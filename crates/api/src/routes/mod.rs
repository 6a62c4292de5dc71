mod health;
mod priority;
mod schedule;

use axum::{middleware, Router};

use crate::{auth::require_auth, AppState};

pub use health::health_router;

/// Authenticated `/api` routes.
pub fn api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .merge(schedule::schedule_router())
        .merge(priority::priority_router())
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}
