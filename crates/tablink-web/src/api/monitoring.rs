use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tablink_core::{EventKind, PipelineEvent};
use uuid::Uuid;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/timeline/{id}", get(timeline))
}

#[derive(Debug, Default, Serialize)]
pub struct StageTiming {
    pub runs: usize,
    pub total_duration_ms: u64,
    pub errors: usize,
}

#[derive(Debug, Serialize)]
pub struct TimelineResponse {
    pub request_id: Uuid,
    pub stages: BTreeMap<String, StageTiming>,
    pub events: Vec<PipelineEvent>,
}

async fn timeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TimelineResponse>, (StatusCode, String)> {
    let events = state.events.events_for(id);
    if events.is_empty() && state.store.get(id).await.is_none() {
        return Err((StatusCode::NOT_FOUND, format!("Request {id} not found")));
    }

    let mut stages: BTreeMap<String, StageTiming> = BTreeMap::new();
    for event in &events {
        match event.kind {
            EventKind::Start => stages.entry(event.stage.clone()).or_default().runs += 1,
            EventKind::End => {
                stages.entry(event.stage.clone()).or_default().total_duration_ms +=
                    event.duration_ms.unwrap_or(0);
            }
            EventKind::Error => stages.entry(event.stage.clone()).or_default().errors += 1,
            EventKind::Decision => {}
        }
    }

    Ok(Json(TimelineResponse {
        request_id: id,
        stages,
        events,
    }))
}
