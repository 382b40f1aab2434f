use std::collections::BTreeMap;

use axum::{extract::State, routing::get, Json, Router};
use futures::future::join_all;
use serde::Serialize;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub knowledge_bases: BTreeMap<String, bool>,
    pub generation_configured: bool,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.pipeline.registry();
    let checks = join_all(registry.iter().map(|g| async move {
        (g.name().to_string(), g.health_check().await)
    }))
    .await;

    let knowledge_bases: BTreeMap<String, bool> = checks.into_iter().collect();
    let status = if knowledge_bases.values().all(|ok| *ok) {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        knowledge_bases,
        generation_configured: state.pipeline.has_generator(),
    })
}
