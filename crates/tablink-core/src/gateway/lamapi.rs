use async_trait::async_trait;
use serde::Deserialize;

use super::{GatewayClient, GatewayError, GatewayResult, KnowledgeBaseDescriptor, KnowledgeBaseGateway};
use crate::candidate::{EntityCandidate, EntityType};
use crate::column::TableContext;

const DEFAULT_ED_SCORE: f64 = 0.5;
const DEFAULT_POPULARITY: f64 = 0.1;

#[derive(Debug, Deserialize)]
struct LamApiType {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct LamApiEntry {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    types: Vec<LamApiType>,
    #[serde(default)]
    ed_score: Option<f64>,
    #[serde(default)]
    popularity: Option<f64>,
}

/// Entity lookup against a LamAPI endpoint (Wikidata-backed).
pub struct LamApiGateway {
    descriptor: KnowledgeBaseDescriptor,
    client: GatewayClient,
    limit: usize,
}

impl LamApiGateway {
    #[must_use]
    pub const fn new(descriptor: KnowledgeBaseDescriptor, client: GatewayClient, limit: usize) -> Self {
        Self {
            descriptor,
            client,
            limit,
        }
    }

    fn query(&self, mention: &str, limit: usize) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("name", mention.to_string()),
            ("limit", limit.to_string()),
            (
                "token",
                self.descriptor.credentials.get("token").cloned().unwrap_or_default(),
            ),
        ];
        for key in ["kind", "kg", "fuzzy"] {
            if let Some(value) = self.descriptor.parameter_str(key) {
                query.push((key, value.to_lowercase()));
            }
        }
        query
    }

    fn to_candidate(&self, raw: serde_json::Value) -> GatewayResult<EntityCandidate> {
        let entry: LamApiEntry = serde_json::from_value(raw.clone())
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;

        if entry.id.is_empty() {
            return Err(GatewayError::Malformed("candidate without id".to_string()));
        }

        let mut candidate = EntityCandidate::new(entry.id, entry.name, &self.descriptor.name)
            .with_scores(
                entry.ed_score.unwrap_or(DEFAULT_ED_SCORE),
                entry.popularity.unwrap_or(DEFAULT_POPULARITY),
            )
            .with_kb_data(raw);

        if let Some(description) = entry.description.filter(|d| !d.is_empty()) {
            candidate = candidate.with_description(description);
        }
        for t in entry.types {
            candidate = candidate.with_type(EntityType::new(t.id, t.name).with_source(&self.descriptor.name));
        }

        Ok(candidate)
    }
}

#[async_trait]
impl KnowledgeBaseGateway for LamApiGateway {
    fn descriptor(&self) -> &KnowledgeBaseDescriptor {
        &self.descriptor
    }

    async fn get_candidates(
        &self,
        mention: &str,
        _context: Option<&TableContext>,
    ) -> GatewayResult<Vec<EntityCandidate>> {
        let raw: Vec<serde_json::Value> = self
            .client
            .get_json(&self.descriptor.url, &self.query(mention, self.limit))
            .await?;

        let candidates = raw
            .into_iter()
            .map(|entry| self.to_candidate(entry))
            .collect::<GatewayResult<Vec<_>>>()?;

        tracing::debug!(
            "Retrieved {} candidates from {} for '{}'",
            candidates.len(),
            self.descriptor.name,
            mention
        );
        Ok(candidates)
    }

    async fn health_check(&self) -> bool {
        self.client
            .ping(&self.descriptor.url, &self.query("test", 1))
            .await
    }
}
