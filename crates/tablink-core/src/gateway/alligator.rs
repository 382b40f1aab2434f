use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{GatewayClient, GatewayError, GatewayResult, KnowledgeBaseDescriptor, KnowledgeBaseGateway};
use crate::candidate::{EntityCandidate, EntityType};
use crate::column::TableContext;

const DEFAULT_SCORE: f64 = 0.5;
const DEFAULT_POLL_ATTEMPTS: u32 = 8;
const FIRST_POLL_DELAY: Duration = Duration::from_secs(1);
const POLL_DELAY: Duration = Duration::from_secs(3);
const POLL_DELAY_STEP: Duration = Duration::from_secs(2);
const RESULT_KEYS: [&str; 5] = ["results", "entities", "data", "predictions", "annotations"];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TableRow {
    id_row: u32,
    data: Vec<String>,
}

/// One-row table submitted for annotation
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DatasetUpload {
    dataset_name: String,
    table_name: String,
    header: [&'static str; 3],
    rows: Vec<TableRow>,
    semantic_annotations: serde_json::Value,
    metadata: serde_json::Value,
    kg_reference: String,
}

#[derive(Debug, Deserialize)]
struct Annotation {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    score: Option<f64>,
}

/// Where a submitted table can be fetched back from
#[derive(Debug, Clone, PartialEq, Eq)]
struct Submission {
    datasets: Vec<String>,
    table: String,
}

/// Table annotation service. Each lookup uploads a one-row table and polls
/// until the annotations appear or the poll budget runs out.
pub struct AlligatorGateway {
    descriptor: KnowledgeBaseDescriptor,
    client: GatewayClient,
    limit: usize,
    poll_attempts: u32,
}

impl AlligatorGateway {
    #[must_use]
    pub fn new(descriptor: KnowledgeBaseDescriptor, client: GatewayClient, limit: usize) -> Self {
        let poll_attempts = descriptor
            .parameter_str("max_polls")
            .and_then(|v| v.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_POLL_ATTEMPTS);
        Self {
            descriptor,
            client,
            limit,
            poll_attempts,
        }
    }

    fn base(&self) -> &str {
        self.descriptor.url.trim_end_matches('/')
    }

    fn token(&self) -> Vec<(&'static str, String)> {
        vec![(
            "token",
            self.descriptor.credentials.get("token").cloned().unwrap_or_default(),
        )]
    }

    fn upload(&self, mention: &str, context: Option<&TableContext>) -> (DatasetUpload, Submission) {
        let stamp = Uuid::now_v7().simple().to_string();
        let dataset_name = format!("EL-{stamp}");
        let table_name = format!("T-{stamp}");
        let domain = context.map_or("general", |c| c.domain().as_str());
        let entity_type = self
            .descriptor
            .parameter_str("entity_type")
            .unwrap_or_else(|| "Person".to_string());

        let mut datasets = Vec::new();
        if let Some(fixed) = self.descriptor.parameter_str("dataset") {
            datasets.push(fixed);
        }
        datasets.push(format!("EMD-{dataset_name}"));
        datasets.push(dataset_name.clone());

        let upload = DatasetUpload {
            dataset_name,
            table_name: table_name.clone(),
            header: ["Entity", "Type", "Context"],
            rows: vec![TableRow {
                id_row: 1,
                data: vec![mention.to_string(), entity_type, domain.to_string()],
            }],
            semantic_annotations: serde_json::json!({ "cea": [], "cta": [], "cpa": [] }),
            metadata: serde_json::json!({
                "column": [
                    { "idColumn": 0, "tag": "NE" },
                    { "idColumn": 1, "tag": "LIT" },
                    { "idColumn": 2, "tag": "LIT" }
                ]
            }),
            kg_reference: self
                .descriptor
                .parameter_str("kg")
                .unwrap_or_else(|| "wikidata".to_string()),
        };

        (
            upload,
            Submission {
                datasets,
                table: table_name,
            },
        )
    }

    fn parse(&self, body: &serde_json::Value) -> Vec<EntityCandidate> {
        let entries = match body {
            serde_json::Value::Array(entries) => entries.as_slice(),
            serde_json::Value::Object(map) => RESULT_KEYS
                .iter()
                .filter_map(|key| map.get(*key).and_then(serde_json::Value::as_array))
                .find(|entries| !entries.is_empty())
                .map_or(&[][..], Vec::as_slice),
            _ => &[][..],
        };

        let mut candidates: Vec<EntityCandidate> = entries
            .iter()
            .filter_map(|raw| {
                let annotation: Annotation = serde_json::from_value(raw.clone()).ok()?;
                if annotation.id.is_empty() || annotation.name.is_empty() {
                    return None;
                }
                let score = annotation.score.unwrap_or(DEFAULT_SCORE).clamp(0.0, 1.0);
                let description = annotation
                    .description
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| format!("Wikidata entity: {}", annotation.name));

                Some(
                    EntityCandidate::new(&annotation.id, &annotation.name, &self.descriptor.name)
                        .with_description(description)
                        .with_type(
                            EntityType::new(&annotation.id, &annotation.name)
                                .with_source(&self.descriptor.name),
                        )
                        .with_scores(score, score)
                        .with_kb_data(raw.clone()),
                )
            })
            .collect();

        candidates.sort_by(|a, b| b.ed_score.total_cmp(&a.ed_score));
        candidates.truncate(self.limit);
        candidates
    }

    /// Delay after the given (0-based) poll round: 3s, 5s, 7s, ...
    fn poll_delay(round: u32) -> Duration {
        POLL_DELAY.saturating_add(POLL_DELAY_STEP.saturating_mul(round))
    }

    async fn poll(&self, submission: &Submission) -> GatewayResult<Vec<EntityCandidate>> {
        let mut query = self.token();
        query.push(("page", "1".to_string()));
        query.push(("per_page", "20".to_string()));

        tokio::time::sleep(FIRST_POLL_DELAY).await;
        for round in 0..self.poll_attempts {
            for dataset in &submission.datasets {
                let url = format!("{}/dataset/{}/table/{}", self.base(), dataset, submission.table);
                match self.client.get_json::<serde_json::Value>(&url, &query).await {
                    Ok(body) => {
                        let candidates = self.parse(&body);
                        if !candidates.is_empty() {
                            tracing::debug!(
                                "{} annotated table {} after {} polls",
                                self.descriptor.name,
                                submission.table,
                                round + 1
                            );
                            return Ok(candidates);
                        }
                    }
                    Err(GatewayError::Status { status: 404, .. }) => {}
                    Err(e) if e.is_transient() || matches!(e, GatewayError::Malformed(_)) => {
                        tracing::debug!("Poll of {} failed: {}", dataset, e);
                    }
                    Err(e) => return Err(e),
                }
            }

            if round + 1 < self.poll_attempts {
                tokio::time::sleep(Self::poll_delay(round)).await;
            }
        }

        tracing::warn!(
            "{} produced no annotations for table {} after {} polls",
            self.descriptor.name,
            submission.table,
            self.poll_attempts
        );
        Ok(Vec::new())
    }
}

#[async_trait]
impl KnowledgeBaseGateway for AlligatorGateway {
    fn descriptor(&self) -> &KnowledgeBaseDescriptor {
        &self.descriptor
    }

    async fn get_candidates(
        &self,
        mention: &str,
        context: Option<&TableContext>,
    ) -> GatewayResult<Vec<EntityCandidate>> {
        let (upload, submission) = self.upload(mention, context);
        let create_url = format!("{}/dataset/createWithArray", self.base());
        self.client
            .post_json(&create_url, &self.token(), &[upload])
            .await?;

        let candidates = self.poll(&submission).await?;
        tracing::debug!(
            "Retrieved {} candidates from {} for '{}'",
            candidates.len(),
            self.descriptor.name,
            mention
        );
        Ok(candidates)
    }

    async fn health_check(&self) -> bool {
        matches!(
            self.client.status_of(self.base()).await,
            Some(200 | 403 | 404 | 405)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Domain;
    use crate::config::RetryPolicy;
    use crate::gateway::GatewayKind;

    fn gateway(descriptor: KnowledgeBaseDescriptor) -> AlligatorGateway {
        let client = GatewayClient::new(Duration::from_secs(1), RetryPolicy::none()).unwrap();
        AlligatorGateway::new(descriptor, client, 3)
    }

    fn descriptor() -> KnowledgeBaseDescriptor {
        KnowledgeBaseDescriptor::new("alligator", GatewayKind::Alligator, "https://alligator.test/api/")
            .with_credential("token", "t0k")
    }

    #[test]
    fn test_upload_carries_mention_and_domain() {
        let context = TableContext {
            domain: Some(Domain::Science),
            ..TableContext::default()
        };
        let (upload, submission) = gateway(descriptor()).upload("Marie Curie", Some(&context));

        let json = serde_json::to_value(&upload).unwrap();
        assert_eq!(json["rows"][0]["idRow"], 1);
        assert_eq!(json["rows"][0]["data"], serde_json::json!(["Marie Curie", "Person", "science"]));
        assert_eq!(json["metadata"]["column"][0]["tag"], "NE");
        assert_eq!(json["kgReference"], "wikidata");
        assert_eq!(json["tableName"], submission.table);
        assert_eq!(submission.datasets.len(), 2);
        assert_eq!(submission.datasets[1], upload.dataset_name);
    }

    #[test]
    fn test_configured_dataset_is_polled_first() {
        let mut descriptor = descriptor();
        descriptor
            .parameters
            .insert("dataset".into(), serde_json::json!("EMD-BC"));
        descriptor.parameters.insert("max_polls".into(), serde_json::json!(2));

        let gateway = gateway(descriptor);
        let (_, submission) = gateway.upload("x", None);

        assert_eq!(submission.datasets[0], "EMD-BC");
        assert_eq!(gateway.poll_attempts, 2);
        assert_eq!(gateway.base(), "https://alligator.test/api");
    }

    #[test]
    fn test_parse_accepts_wrapped_and_bare_lists() {
        let gateway = gateway(descriptor());
        let wrapped = serde_json::json!({
            "data": [],
            "predictions": [
                {"id": "Q7186", "name": "Marie Curie", "score": 0.7},
                {"id": "Q1", "name": "Universe", "score": 0.95, "description": "totality"},
                {"name": "no id"}
            ]
        });

        let candidates = gateway.parse(&wrapped);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].id, "Q1");
        assert_eq!(candidates[0].description.as_deref(), Some("totality"));
        assert_eq!(
            candidates[1].description.as_deref(),
            Some("Wikidata entity: Marie Curie")
        );
        assert!((candidates[1].popularity - 0.7).abs() < f64::EPSILON);

        let bare = serde_json::json!([{"id": "Q90", "name": "Paris"}]);
        let candidates = gateway.parse(&bare);
        assert!((candidates[0].ed_score - 0.5).abs() < f64::EPSILON);

        assert!(gateway.parse(&serde_json::json!("pending")).is_empty());
    }

    #[test]
    fn test_parse_respects_limit() {
        let entries: Vec<_> = (0..10)
            .map(|i| serde_json::json!({"id": format!("Q{i}"), "name": format!("E{i}")}))
            .collect();
        assert_eq!(gateway(descriptor()).parse(&serde_json::Value::Array(entries)).len(), 3);
    }

    #[test]
    fn test_poll_delay_grows_linearly() {
        assert_eq!(AlligatorGateway::poll_delay(0), Duration::from_secs(3));
        assert_eq!(AlligatorGateway::poll_delay(3), Duration::from_secs(9));
    }
}
