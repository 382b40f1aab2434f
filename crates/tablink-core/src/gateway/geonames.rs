use async_trait::async_trait;
use serde::Deserialize;

use super::{GatewayClient, GatewayError, GatewayResult, KnowledgeBaseDescriptor, KnowledgeBaseGateway};
use crate::candidate::{EntityCandidate, EntityType};
use crate::column::TableContext;

const MIN_POPULARITY: f64 = 0.1;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Place {
    geoname_id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    fcode: String,
    #[serde(default)]
    fcode_name: Option<String>,
    #[serde(default)]
    admin_name1: Option<String>,
    #[serde(default)]
    country_name: Option<String>,
    #[serde(default)]
    population: Option<u64>,
}

impl Place {
    fn description(&self) -> String {
        let parts: Vec<&str> = [&self.admin_name1, &self.country_name, &self.fcode_name]
            .into_iter()
            .filter_map(|p| p.as_deref().filter(|s| !s.is_empty()))
            .collect();

        if parts.is_empty() {
            self.name.clone()
        } else {
            parts.join(", ")
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn popularity(&self) -> f64 {
        match self.population {
            Some(p) if p > 0 => (p as f64 / 1_000_000.0).clamp(0.0, 1.0),
            _ => MIN_POPULARITY,
        }
    }
}

/// Place search against the GeoNames JSON API.
pub struct GeoNamesGateway {
    descriptor: KnowledgeBaseDescriptor,
    client: GatewayClient,
    limit: usize,
}

impl GeoNamesGateway {
    #[must_use]
    pub const fn new(descriptor: KnowledgeBaseDescriptor, client: GatewayClient, limit: usize) -> Self {
        Self {
            descriptor,
            client,
            limit,
        }
    }

    fn query(&self, mention: &str, max_rows: usize) -> Vec<(&'static str, String)> {
        vec![
            ("q", mention.to_string()),
            (
                "maxRows",
                self.descriptor
                    .parameter_str("maxRows")
                    .unwrap_or_else(|| max_rows.to_string()),
            ),
            (
                "username",
                self.descriptor
                    .credentials
                    .get("username")
                    .cloned()
                    .unwrap_or_else(|| "demo".to_string()),
            ),
            (
                "style",
                self.descriptor
                    .parameter_str("style")
                    .unwrap_or_else(|| "FULL".to_string()),
            ),
        ]
    }

    fn parse(&self, mention: &str, body: serde_json::Value) -> GatewayResult<Vec<EntityCandidate>> {
        if let Some(status) = body.get("status") {
            let message = status
                .get("message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown error");
            return Err(GatewayError::Api(message.to_string()));
        }

        let places = body
            .get("geonames")
            .cloned()
            .unwrap_or(serde_json::Value::Array(Vec::new()));
        let places = places
            .as_array()
            .ok_or_else(|| GatewayError::Malformed("'geonames' is not an array".to_string()))?;

        let needle = mention.trim().to_lowercase();
        places
            .iter()
            .map(|raw| {
                let place: Place = serde_json::from_value(raw.clone())
                    .map_err(|e| GatewayError::Malformed(e.to_string()))?;
                let ed_score = strsim::normalized_levenshtein(&needle, &place.name.to_lowercase());
                let kind = EntityType::new(
                    place.fcode.clone(),
                    place.fcode_name.clone().unwrap_or_else(|| "Location".to_string()),
                )
                .with_source("geonames");

                Ok(EntityCandidate::new(
                    format!("geoname:{}", place.geoname_id),
                    place.name.clone(),
                    &self.descriptor.name,
                )
                .with_description(place.description())
                .with_type(kind)
                .with_scores(ed_score, place.popularity())
                .with_kb_data(raw.clone()))
            })
            .collect()
    }
}

#[async_trait]
impl KnowledgeBaseGateway for GeoNamesGateway {
    fn descriptor(&self) -> &KnowledgeBaseDescriptor {
        &self.descriptor
    }

    async fn get_candidates(
        &self,
        mention: &str,
        _context: Option<&TableContext>,
    ) -> GatewayResult<Vec<EntityCandidate>> {
        let body: serde_json::Value = self
            .client
            .get_json(&self.descriptor.url, &self.query(mention, self.limit))
            .await?;
        let candidates = self.parse(mention, body)?;

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

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::RetryPolicy;
    use crate::gateway::GatewayKind;

    fn gateway() -> GeoNamesGateway {
        let descriptor = KnowledgeBaseDescriptor::new(
            "geonames",
            GatewayKind::GeoNames,
            "http://api.geonames.org/searchJSON",
        );
        let client = GatewayClient::new(Duration::from_secs(1), RetryPolicy::default()).unwrap();
        GeoNamesGateway::new(descriptor, client, 10)
    }

    #[test]
    fn test_parse_places() {
        let body = serde_json::json!({
            "geonames": [
                {
                    "geonameId": 2988507,
                    "name": "Paris",
                    "fcode": "PPLC",
                    "fcodeName": "capital of a political entity",
                    "adminName1": "Île-de-France",
                    "countryName": "France",
                    "population": 2138551
                },
                {
                    "geonameId": 4717560,
                    "name": "Paris",
                    "fcode": "PPLA2",
                    "countryName": "United States",
                    "population": 24171
                }
            ]
        });

        let candidates = gateway().parse("paris", body).unwrap();
        assert_eq!(candidates.len(), 2);

        let capital = &candidates[0];
        assert_eq!(capital.id, "geoname:2988507");
        assert!((capital.ed_score - 1.0).abs() < f64::EPSILON);
        assert!((capital.popularity - 1.0).abs() < f64::EPSILON);
        assert_eq!(
            capital.description.as_deref(),
            Some("Île-de-France, France, capital of a political entity")
        );

        let texas = &candidates[1];
        assert!(texas.popularity < 0.1);
        assert_eq!(texas.types[0].name, "Location");
    }

    #[test]
    fn test_status_payload_is_an_error() {
        let body = serde_json::json!({"status": {"message": "daily limit exceeded", "value": 18}});
        assert!(matches!(
            gateway().parse("paris", body),
            Err(GatewayError::Api(m)) if m == "daily limit exceeded"
        ));
    }

    #[test]
    fn test_missing_results_is_empty() {
        let candidates = gateway().parse("nowhere", serde_json::json!({})).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_query_defaults() {
        let query = gateway().query("Lyon", 10);
        assert!(query.contains(&("maxRows", "10".to_string())));
        assert!(query.contains(&("username", "demo".to_string())));
        assert!(query.contains(&("style", "FULL".to_string())));
    }
}
