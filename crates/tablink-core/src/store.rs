use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::supervisor::{PipelineOutcome, SupervisorState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Processing,
    Completed,
    Failed,
}

impl RequestStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about one submitted request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: Uuid,
    pub column_name: String,
    pub status: RequestStatus,
    pub phase: SupervisorState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<PipelineOutcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl RequestRecord {
    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Receives supervisor phase changes for a request.
#[async_trait]
pub trait PhaseSink: Send + Sync {
    async fn phase_changed(&self, request_id: Uuid, phase: SupervisorState);
}

/// In-memory request registry with a retention window.
///
/// Records are created on submit, follow the supervisor's phases, and are
/// evicted once they have been finished for longer than the retention.
#[derive(Debug, Clone)]
pub struct RequestStore {
    records: Arc<RwLock<HashMap<Uuid, RequestRecord>>>,
    retention: Duration,
}

impl RequestStore {
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            retention,
        }
    }

    #[must_use]
    pub const fn retention(&self) -> Duration {
        self.retention
    }

    pub async fn create(&self, column_name: impl Into<String>) -> Uuid {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let record = RequestRecord {
            id,
            column_name: column_name.into(),
            status: RequestStatus::Processing,
            phase: SupervisorState::Init,
            created_at: now,
            updated_at: now,
            outcome: None,
            errors: Vec::new(),
        };
        self.records.write().await.insert(id, record);
        id
    }

    pub async fn get(&self, id: Uuid) -> Option<RequestRecord> {
        self.records.read().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn set_phase(&self, id: Uuid, phase: SupervisorState) {
        if let Some(record) = self.records.write().await.get_mut(&id) {
            record.phase = phase;
            record.touch();
        }
    }

    pub async fn complete(&self, id: Uuid, outcome: PipelineOutcome) {
        if let Some(record) = self.records.write().await.get_mut(&id) {
            record.status = RequestStatus::Completed;
            record.phase = SupervisorState::Finalize;
            record.outcome = Some(outcome);
            record.touch();
        }
    }

    pub async fn fail(&self, id: Uuid, errors: Vec<String>) {
        if let Some(record) = self.records.write().await.get_mut(&id) {
            record.status = RequestStatus::Failed;
            record.errors = errors;
            record.touch();
        }
    }

    /// Removes finished records older than the retention window and returns
    /// their ids.
    pub async fn evict_expired(&self) -> Vec<Uuid> {
        self.evict_older_than(Utc::now()).await
    }

    async fn evict_older_than(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let retention = chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::MAX);
        let mut records = self.records.write().await;

        let expired: Vec<Uuid> = records
            .values()
            .filter(|r| r.status != RequestStatus::Processing && now - r.updated_at > retention)
            .map(|r| r.id)
            .collect();
        for id in &expired {
            records.remove(id);
        }

        if !expired.is_empty() {
            tracing::debug!("Evicted {} expired requests", expired.len());
        }
        expired
    }
}

#[async_trait]
impl PhaseSink for RequestStore {
    async fn phase_changed(&self, request_id: Uuid, phase: SupervisorState) {
        self.set_phase(request_id, phase).await;
    }
}
