use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::candidate::{EntityCandidate, ScoreBreakdown};
use crate::column::{ColumnType, TableContext};
use crate::generation::{GenerationError, TextGenerationService};

const SINGLE_CANDIDATE_CONFIDENCE: f64 = 0.9;

const SIMILARITY_WEIGHT: f64 = 0.3;
const TYPE_WEIGHT: f64 = 0.2;
const ED_WEIGHT: f64 = 0.3;
const POPULARITY_WEIGHT: f64 = 0.2;

const RERANK_SYSTEM_PROMPT: &str = "You are an entity disambiguation expert. \
Rank the candidate entities for the mention by how likely each is the intended referent. \
Reply with JSON only: {\"rankings\": [{\"id\": \"...\", \"rank\": 1, \"confidence\": 0.0, \"reasoning\": \"...\"}]}";

/// Lexical similarity between a mention and a candidate name.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn name_similarity(mention: &str, name: &str) -> f64 {
    let mention = mention.trim().to_lowercase();
    let name = name.trim().to_lowercase();

    let mention_tokens: HashSet<&str> = mention.split_whitespace().collect();
    let name_tokens: HashSet<&str> = name.split_whitespace().collect();
    if mention_tokens.is_empty() || name_tokens.is_empty() {
        return 0.1;
    }

    if mention == name {
        return 1.0;
    }
    if mention.contains(&name) || name.contains(&mention) {
        return 0.8;
    }

    let intersection = mention_tokens.intersection(&name_tokens).count();
    let union = mention_tokens.union(&name_tokens).count();
    intersection as f64 / union as f64
}

/// How well a candidate's declared types fit the column type.
#[must_use]
pub fn type_compatibility(candidate: &EntityCandidate, column_type: ColumnType) -> f64 {
    if candidate.types.is_empty() {
        return 0.3;
    }

    let names: Vec<String> = candidate.type_names().map(str::to_uppercase).collect();
    if names.iter().any(|n| n == column_type.as_str()) {
        return 1.0;
    }
    if names
        .iter()
        .any(|n| column_type.related_type_names().contains(&n.as_str()))
    {
        return 0.8;
    }
    0.5
}

/// Heuristic score components for one candidate.
#[must_use]
pub fn score_breakdown(candidate: &EntityCandidate, mention: &str, column_type: ColumnType) -> ScoreBreakdown {
    let similarity = name_similarity(mention, &candidate.name);
    let type_compatibility = type_compatibility(candidate, column_type);
    let total = SIMILARITY_WEIGHT.mul_add(
        similarity,
        TYPE_WEIGHT.mul_add(
            type_compatibility,
            ED_WEIGHT.mul_add(candidate.ed_score, POPULARITY_WEIGHT * candidate.popularity),
        ),
    );

    ScoreBreakdown {
        similarity,
        type_compatibility,
        ed_score: candidate.ed_score,
        popularity: candidate.popularity,
        generation_confidence: None,
        total: total.clamp(0.0, 1.0),
    }
}

#[derive(Debug, Deserialize)]
struct Ranking {
    id: String,
    #[serde(default)]
    rank: Option<u32>,
    confidence: f64,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RankingResponse {
    rankings: Vec<Ranking>,
}

/// Ranks candidates for a mention and assigns every one a confidence.
pub struct DisambiguationScorer {
    generator: Option<Arc<dyn TextGenerationService>>,
    top_k: usize,
    timeout: Duration,
}

impl DisambiguationScorer {
    #[must_use]
    pub fn new(top_k: usize, timeout: Duration) -> Self {
        Self {
            generator: None,
            top_k: top_k.min(5),
            timeout,
        }
    }

    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn TextGenerationService>) -> Self {
        self.generator = Some(generator);
        self
    }

    #[must_use]
    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    /// Heuristic ranking only. Stable: ties keep their incoming order.
    #[must_use]
    pub fn rank(
        &self,
        mut candidates: Vec<EntityCandidate>,
        mention: &str,
        column_type: ColumnType,
    ) -> Vec<EntityCandidate> {
        if candidates.len() == 1 {
            let only = &mut candidates[0];
            only.breakdown = Some(score_breakdown(only, mention, column_type));
            only.force_confidence(SINGLE_CANDIDATE_CONFIDENCE);
            return candidates;
        }

        for candidate in &mut candidates {
            let breakdown = score_breakdown(candidate, mention, column_type);
            candidate.force_confidence(breakdown.total);
            candidate.breakdown = Some(breakdown);
        }
        candidates.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));
        candidates
    }

    /// Full disambiguation: heuristic ranking, then generator re-ranking of
    /// the leaders when a generator is configured.
    pub async fn disambiguate(
        &self,
        candidates: Vec<EntityCandidate>,
        mention: &str,
        column_type: ColumnType,
        context: Option<&TableContext>,
    ) -> Vec<EntityCandidate> {
        let ranked = self.rank(candidates, mention, column_type);
        if ranked.len() < 2 {
            return ranked;
        }
        let Some(generator) = &self.generator else {
            return ranked;
        };

        match self
            .rerank(generator.as_ref(), ranked.clone(), mention, column_type, context)
            .await
        {
            Ok(reranked) => reranked,
            Err(e) => {
                tracing::warn!("Re-ranking failed for '{}', keeping heuristic order: {}", mention, e);
                ranked
            }
        }
    }

    async fn rerank(
        &self,
        generator: &dyn TextGenerationService,
        mut ranked: Vec<EntityCandidate>,
        mention: &str,
        column_type: ColumnType,
        context: Option<&TableContext>,
    ) -> Result<Vec<EntityCandidate>, GenerationError> {
        let k = self.top_k.min(ranked.len());
        if k == 0 {
            return Ok(ranked);
        }

        let prompt = rerank_prompt(&ranked[..k], mention, column_type, context);
        let answer = tokio::time::timeout(self.timeout, generator.generate(RERANK_SYSTEM_PROMPT, &prompt))
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout))??;
        let rankings = parse_rankings(&answer)?;

        let leaders: HashSet<&str> = ranked[..k].iter().map(|c| c.id.as_str()).collect();
        let mut applied: HashMap<String, Ranking> = HashMap::new();
        for ranking in rankings {
            if !(0.0..=1.0).contains(&ranking.confidence) {
                return Err(GenerationError::Malformed(format!(
                    "confidence {} out of range",
                    ranking.confidence
                )));
            }
            if leaders.contains(ranking.id.as_str()) {
                applied.entry(ranking.id.clone()).or_insert(ranking);
            }
        }
        if applied.is_empty() {
            return Err(GenerationError::Malformed("no known candidate ranked".to_string()));
        }

        for candidate in &mut ranked {
            if let Some(ranking) = applied.get(&candidate.id) {
                candidate.force_confidence(ranking.confidence);
                candidate.reasoning.clone_from(&ranking.reasoning);
                if let Some(breakdown) = candidate.breakdown.as_mut() {
                    breakdown.generation_confidence = Some(ranking.confidence);
                }
            }
        }

        let order = |c: &EntityCandidate| applied.get(&c.id).and_then(|r| r.rank).unwrap_or(u32::MAX);
        ranked.sort_by(|a, b| {
            b.confidence()
                .total_cmp(&a.confidence())
                .then_with(|| order(a).cmp(&order(b)))
        });
        Ok(ranked)
    }
}

fn rerank_prompt(
    leaders: &[EntityCandidate],
    mention: &str,
    column_type: ColumnType,
    context: Option<&TableContext>,
) -> String {
    let mut prompt = format!("Mention: \"{mention}\"\nColumn type: {column_type}\n");
    if let Some(context) = context {
        prompt.push_str(&format!("Domain: {}\n", context.domain()));
        if !context.headers.is_empty() {
            prompt.push_str(&format!("Table headers: {}\n", context.headers.join(", ")));
        }
    }
    prompt.push_str("\nCandidates:\n");
    for (i, c) in leaders.iter().enumerate() {
        let types: Vec<&str> = c.type_names().collect();
        prompt.push_str(&format!(
            "{}. id={} name=\"{}\" description=\"{}\" types=[{}] score={:.3}\n",
            i + 1,
            c.id,
            c.name,
            c.description.as_deref().unwrap_or(""),
            types.join(", "),
            c.confidence()
        ));
    }
    prompt
}

/// Accepts bare JSON or JSON inside a fenced block.
fn parse_rankings(answer: &str) -> Result<Vec<Ranking>, GenerationError> {
    let trimmed = answer.trim();
    let body = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => return Err(GenerationError::Malformed("no JSON object in answer".to_string())),
    };
    serde_json::from_str::<RankingResponse>(body)
        .map(|r| r.rankings)
        .map_err(|e| GenerationError::Malformed(e.to_string()))
}
