use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tablink_core::linking::ProcessingMetrics;
use tablink_core::{
    ColumnLinkingResult, ColumnType, Error, LinkingRequest, QualityReport, RequestRecord,
    RequestStatus, SupervisorState, TableColumn, TableContext,
};
use uuid::Uuid;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(submit))
        .route("/{id}", get(request_status))
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(alias = "columnName")]
    pub column_name: String,
    #[serde(alias = "columnValues")]
    pub column_values: Vec<String>,
    #[serde(default, alias = "columnType")]
    pub column_type: Option<String>,
    #[serde(default, alias = "tableContext")]
    pub table_context: Option<TableContext>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub request_id: Uuid,
    pub status: RequestStatus,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub request_id: Uuid,
    pub column_name: String,
    pub status: RequestStatus,
    pub phase: SupervisorState,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<ColumnLinkingResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ProcessingMetrics>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl From<RequestRecord> for StatusResponse {
    fn from(r: RequestRecord) -> Self {
        let (results, quality, metrics) = match r.outcome {
            Some(outcome) => (Some(outcome.result), Some(outcome.quality), Some(outcome.metrics)),
            None => (None, None, None),
        };
        Self {
            request_id: r.id,
            column_name: r.column_name,
            status: r.status,
            phase: r.phase,
            created_at: r.created_at.to_rfc3339(),
            updated_at: r.updated_at.to_rfc3339(),
            results,
            quality,
            metrics,
            errors: r.errors,
        }
    }
}

async fn submit(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), (StatusCode, String)> {
    let mut column = TableColumn::new(req.column_name, req.column_values)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    if let Some(column_type) = req.column_type {
        let column_type = column_type
            .parse::<ColumnType>()
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
        column = column.with_type(column_type);
    }

    let request_id = state.store.create(column.name()).await;
    let mut request = LinkingRequest::new(column).with_request_id(request_id);
    if let Some(context) = req.table_context {
        request = request.with_context(context);
    }

    let pipeline = state.pipeline.clone();
    let store = state.store.clone();
    tokio::spawn(async move {
        match pipeline.run(request).await {
            Ok(outcome) => store.complete(request_id, outcome).await,
            Err(e) => {
                if !e.is_request_failure() {
                    tracing::error!("Linking request {} failed: {}", request_id, e);
                }
                store.fail(request_id, failure_messages(e)).await;
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            request_id,
            status: RequestStatus::Processing,
        }),
    ))
}

async fn request_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>, (StatusCode, String)> {
    state
        .store
        .get(id)
        .await
        .map(|record| Json(StatusResponse::from(record)))
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Request {id} not found")))
}

fn failure_messages(error: Error) -> Vec<String> {
    match error {
        Error::InputRejected { issues } => issues,
        Error::QualityGate { ref errors, .. } => {
            let mut messages = vec![error.to_string()];
            messages.extend(errors.iter().cloned());
            messages
        }
        other => vec![other.to_string()],
    }
}
