use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::Deserialize;

use super::{GatewayClient, GatewayResult, KnowledgeBaseDescriptor, KnowledgeBaseGateway};
use crate::candidate::{EntityCandidate, EntityType};
use crate::column::TableContext;

const RESULTS_FORMAT: &str = "application/sparql-results+json";
const DEFAULT_POPULARITY: f64 = 0.5;
const MIN_SIMILARITY: f64 = 0.1;
const CONTAINMENT_SIMILARITY: f64 = 0.8;
const MAX_DESCRIPTION_CHARS: usize = 500;
const MAX_TYPES: usize = 5;

#[derive(Debug, Default, Deserialize)]
struct SparqlResponse {
    #[serde(default)]
    results: SparqlResults,
}

#[derive(Debug, Default, Deserialize)]
struct SparqlResults {
    #[serde(default)]
    bindings: Vec<HashMap<String, Term>>,
}

#[derive(Debug, Deserialize)]
struct Term {
    #[serde(default)]
    value: String,
}

/// Query shape for the endpoint. Wikidata exposes labels through its label
/// service; everything else is treated as DBpedia-like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Wikidata,
    DbPedia,
}

impl Dialect {
    fn for_descriptor(descriptor: &KnowledgeBaseDescriptor) -> Self {
        let hint = descriptor
            .parameter_str("dialect")
            .unwrap_or_else(|| descriptor.url.clone());
        if hint.to_lowercase().contains("wikidata") {
            Self::Wikidata
        } else {
            Self::DbPedia
        }
    }

    /// Binding names for (entity, label, description, type)
    const fn variables(self) -> [&'static str; 4] {
        match self {
            Self::Wikidata => ["item", "itemLabel", "itemDescription", "instanceLabel"],
            Self::DbPedia => ["entity", "label", "abstract", "type"],
        }
    }

    fn query(self, mention: &str, limit: usize) -> String {
        let needle = escape_literal(mention);
        match self {
            Self::Wikidata => format!(
                r#"SELECT DISTINCT ?item ?itemLabel ?itemDescription ?instanceLabel WHERE {{
  ?item rdfs:label ?label .
  FILTER(CONTAINS(LCASE(?label), LCASE("{needle}")))
  OPTIONAL {{ ?item wdt:P31 ?instance . }}
  SERVICE wikibase:label {{ bd:serviceParam wikibase:language "[AUTO_LANGUAGE],en". }}
  FILTER(LANG(?label) = "en")
}}
ORDER BY ?itemLabel
LIMIT {limit}"#
            ),
            Self::DbPedia => format!(
                r#"SELECT DISTINCT ?entity ?label ?abstract ?type WHERE {{
  ?entity rdfs:label ?label .
  FILTER(CONTAINS(LCASE(?label), LCASE("{needle}")))
  OPTIONAL {{ ?entity dbo:abstract ?abstract . }}
  OPTIONAL {{ ?entity rdf:type ?type . }}
  FILTER(LANG(?label) = "" || LANG(?label) = "en")
  FILTER(!BOUND(?abstract) || LANG(?abstract) = "" || LANG(?abstract) = "en")
}}
ORDER BY ?label
LIMIT {limit}"#
            ),
        }
    }
}

/// Escapes a mention for use inside a double-quoted SPARQL string literal.
fn escape_literal(mention: &str) -> String {
    let mut escaped = String::with_capacity(mention.len());
    for c in mention.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Exact match 1.0, containment 0.8, otherwise word overlap.
#[allow(clippy::cast_precision_loss)]
fn label_similarity(mention: &str, label: &str) -> f64 {
    let mention = mention.trim().to_lowercase();
    let label = label.trim().to_lowercase();

    if mention == label {
        return 1.0;
    }
    if mention.contains(&label) || label.contains(&mention) {
        return CONTAINMENT_SIMILARITY;
    }

    let left: HashSet<&str> = mention.split_whitespace().collect();
    let right: HashSet<&str> = label.split_whitespace().collect();
    if left.is_empty() || right.is_empty() {
        return MIN_SIMILARITY;
    }

    left.intersection(&right).count() as f64 / left.union(&right).count() as f64
}

/// Last path or fragment segment of a type URI.
fn type_name(uri: &str) -> &str {
    uri.rsplit(['/', '#']).next().filter(|s| !s.is_empty()).unwrap_or(uri)
}

/// Everything the bindings said about one entity URI
#[derive(Debug, Default)]
struct Grouped {
    uri: String,
    labels: Vec<String>,
    descriptions: Vec<String>,
    types: Vec<String>,
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    if !value.is_empty() && !values.iter().any(|v| v == value) {
        values.push(value.to_string());
    }
}

/// Entity lookup against a SPARQL endpoint such as Wikidata or DBpedia.
pub struct SparqlGateway {
    descriptor: KnowledgeBaseDescriptor,
    client: GatewayClient,
    limit: usize,
    dialect: Dialect,
}

impl SparqlGateway {
    #[must_use]
    pub fn new(descriptor: KnowledgeBaseDescriptor, client: GatewayClient, limit: usize) -> Self {
        let dialect = Dialect::for_descriptor(&descriptor);
        Self {
            descriptor,
            client,
            limit,
            dialect,
        }
    }

    fn params(query: String) -> Vec<(&'static str, String)> {
        vec![("query", query), ("format", RESULTS_FORMAT.to_string())]
    }

    fn parse(&self, mention: &str, response: SparqlResponse) -> Vec<EntityCandidate> {
        let [entity_var, label_var, description_var, type_var] = self.dialect.variables();

        let mut order: Vec<Grouped> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for binding in response.results.bindings {
            let Some(uri) = binding.get(entity_var).map(|t| t.value.as_str()).filter(|u| !u.is_empty())
            else {
                continue;
            };
            let slot = *index.entry(uri.to_string()).or_insert_with(|| {
                order.push(Grouped {
                    uri: uri.to_string(),
                    ..Grouped::default()
                });
                order.len() - 1
            });
            let grouped = &mut order[slot];

            if let Some(label) = binding.get(label_var) {
                push_unique(&mut grouped.labels, &label.value);
            }
            if let Some(description) = binding.get(description_var) {
                push_unique(&mut grouped.descriptions, &description.value);
            }
            if let Some(kind) = binding.get(type_var) {
                push_unique(&mut grouped.types, &kind.value);
            }
        }

        let mut candidates: Vec<EntityCandidate> = order
            .into_iter()
            .filter_map(|entity| {
                // Shortest label is usually the canonical one
                let label = entity.labels.iter().min_by_key(|l| l.chars().count())?.clone();
                let ed_score = label_similarity(mention, &label);

                let mut candidate = EntityCandidate::new(&entity.uri, &label, &self.descriptor.name)
                    .with_scores(ed_score, DEFAULT_POPULARITY)
                    .with_kb_data(serde_json::json!({
                        "uri": entity.uri,
                        "all_labels": entity.labels,
                        "all_types": entity.types.clone(),
                    }));
                if let Some(description) = entity.descriptions.first() {
                    candidate = candidate
                        .with_description(description.chars().take(MAX_DESCRIPTION_CHARS).collect::<String>());
                }
                for uri in entity.types.iter().take(MAX_TYPES) {
                    candidate = candidate.with_type(
                        EntityType::new(uri, type_name(uri)).with_source(&self.descriptor.name),
                    );
                }
                Some(candidate)
            })
            .collect();

        candidates.sort_by(|a, b| b.ed_score.total_cmp(&a.ed_score));
        candidates
    }
}

#[async_trait]
impl KnowledgeBaseGateway for SparqlGateway {
    fn descriptor(&self) -> &KnowledgeBaseDescriptor {
        &self.descriptor
    }

    async fn get_candidates(
        &self,
        mention: &str,
        _context: Option<&TableContext>,
    ) -> GatewayResult<Vec<EntityCandidate>> {
        let query = self.dialect.query(mention, self.limit);
        let response: SparqlResponse = self
            .client
            .get_json(&self.descriptor.url, &Self::params(query))
            .await?;
        let candidates = self.parse(mention, response);

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
            .ping(&self.descriptor.url, &Self::params("ASK { ?s ?p ?o }".to_string()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::RetryPolicy;
    use crate::gateway::GatewayKind;

    fn gateway(url: &str) -> SparqlGateway {
        let descriptor = KnowledgeBaseDescriptor::new("kg", GatewayKind::Sparql, url);
        let client = GatewayClient::new(Duration::from_secs(1), RetryPolicy::none()).unwrap();
        SparqlGateway::new(descriptor, client, 10)
    }

    fn response(body: serde_json::Value) -> SparqlResponse {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_dialect_follows_endpoint() {
        assert_eq!(gateway("https://query.wikidata.org/sparql").dialect, Dialect::Wikidata);
        assert_eq!(gateway("https://dbpedia.org/sparql").dialect, Dialect::DbPedia);
    }

    #[test]
    fn test_mention_is_escaped_in_query() {
        let query = Dialect::DbPedia.query(r#"The "Big" \ Apple"#, 7);
        assert!(query.contains(r#"LCASE("The \"Big\" \\ Apple")"#));
        assert!(query.ends_with("LIMIT 7"));
        assert!(!query.contains("wikibase:label"));

        let query = Dialect::Wikidata.query("Rome\nFILTER", 10);
        assert!(query.contains(r#"LCASE("Rome\nFILTER")"#));
        assert!(query.contains("wdt:P31"));
    }

    #[test]
    fn test_bindings_are_grouped_by_uri() {
        let body = serde_json::json!({
            "head": {"vars": ["entity", "label", "abstract", "type"]},
            "results": {"bindings": [
                {
                    "entity": {"type": "uri", "value": "http://dbpedia.org/resource/Paris"},
                    "label": {"type": "literal", "value": "Paris"},
                    "abstract": {"type": "literal", "value": "Capital of France"},
                    "type": {"type": "uri", "value": "http://dbpedia.org/ontology/City"}
                },
                {
                    "entity": {"type": "uri", "value": "http://dbpedia.org/resource/Paris"},
                    "label": {"type": "literal", "value": "Paris"},
                    "type": {"type": "uri", "value": "http://www.w3.org/2002/07/owl#Thing"}
                },
                {
                    "entity": {"type": "uri", "value": "http://dbpedia.org/resource/Paris_Hilton"},
                    "label": {"type": "literal", "value": "Paris Hilton"}
                },
                {
                    "label": {"type": "literal", "value": "no subject"}
                }
            ]}
        });

        let candidates = gateway("https://dbpedia.org/sparql").parse("paris", response(body));
        assert_eq!(candidates.len(), 2);

        let city = &candidates[0];
        assert_eq!(city.id, "http://dbpedia.org/resource/Paris");
        assert!((city.ed_score - 1.0).abs() < f64::EPSILON);
        assert_eq!(city.description.as_deref(), Some("Capital of France"));
        let types: Vec<_> = city.type_names().collect();
        assert_eq!(types, vec!["City", "Thing"]);

        let person = &candidates[1];
        assert!((person.ed_score - 0.8).abs() < f64::EPSILON);
        assert!((person.popularity - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_wikidata_bindings_use_label_service_names() {
        let body = serde_json::json!({
            "results": {"bindings": [{
                "item": {"value": "http://www.wikidata.org/entity/Q220"},
                "itemLabel": {"value": "Rome"},
                "itemDescription": {"value": "capital city of Italy"},
                "instanceLabel": {"value": "city"}
            }]}
        });

        let candidates = gateway("https://query.wikidata.org/sparql").parse("Rome", response(body));
        assert_eq!(candidates[0].name, "Rome");
        assert_eq!(candidates[0].types[0].name, "city");
    }

    #[test]
    fn test_empty_results_yield_no_candidates() {
        let candidates = gateway("https://dbpedia.org/sparql").parse("x", response(serde_json::json!({})));
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_similarity_falls_back_to_word_overlap() {
        assert!((label_similarity("New York City", "York City Hall") - 0.5).abs() < f64::EPSILON);
        assert!(label_similarity("Lyon", "Marseille").abs() < f64::EPSILON);
    }
}
