mod health;
mod linking;
mod monitoring;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/entity-linking", linking::router())
        .nest("/health", health::router())
        .nest("/monitoring", monitoring::router())
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api", router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
