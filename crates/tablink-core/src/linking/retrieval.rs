use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;

use crate::candidate::EntityCandidate;
use crate::column::{ColumnType, TableContext};
use crate::gateway::KnowledgeBaseGateway;

/// What the fan-out produced for one mention.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MentionRetrieval {
    pub mention: String,
    /// Aggregated, in gateway order then gateway-reported order
    pub candidates: Vec<EntityCandidate>,
    pub queried: Vec<String>,
    /// Gateway name to failure description
    pub errors: BTreeMap<String, String>,
    pub elapsed: Duration,
}

impl MentionRetrieval {
    fn blank(mention: &str) -> Self {
        Self {
            mention: mention.to_string(),
            ..Self::default()
        }
    }
}

/// Merges per-gateway lists: first occurrence of an id wins, then weak
/// lexical matches are dropped. A weak first occurrence is not replaced by a
/// later, stronger duplicate.
#[must_use]
pub fn aggregate_candidates(
    lists: impl IntoIterator<Item = Vec<EntityCandidate>>,
    min_ed_score: f64,
) -> Vec<EntityCandidate> {
    let mut seen = HashSet::new();
    lists
        .into_iter()
        .flatten()
        .filter(|c| seen.insert(c.id.clone()))
        .filter(|c| c.ed_score > min_ed_score)
        .collect()
}

/// Concurrent candidate retrieval over a set of gateways.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalFanout {
    timeout: Duration,
    min_ed_score: f64,
}

impl RetrievalFanout {
    #[must_use]
    pub const fn new(timeout: Duration, min_ed_score: f64) -> Self {
        Self {
            timeout,
            min_ed_score,
        }
    }

    /// Retrieves candidates for every mention and returns one entry per input
    /// mention, in input order.
    ///
    /// Identical mentions are queried once. Blank mentions are never sent to a
    /// gateway. Batches run one after another; inside a batch every mention
    /// and every supporting gateway is queried concurrently.
    pub async fn retrieve(
        &self,
        mentions: &[String],
        gateways: &[Arc<dyn KnowledgeBaseGateway>],
        column_type: ColumnType,
        context: Option<&TableContext>,
        batch_size: usize,
    ) -> Vec<MentionRetrieval> {
        let supporting: Vec<&Arc<dyn KnowledgeBaseGateway>> = gateways
            .iter()
            .filter(|g| g.descriptor().supports(column_type))
            .collect();

        let mut unique: Vec<&str> = Vec::new();
        let mut seen = HashSet::new();
        for mention in mentions.iter().map(|m| m.trim()) {
            if !mention.is_empty() && seen.insert(mention) {
                unique.push(mention);
            }
        }

        let mut by_mention: HashMap<String, MentionRetrieval> = HashMap::with_capacity(unique.len());
        for (index, batch) in unique.chunks(batch_size.max(1)).enumerate() {
            let started = Instant::now();
            let retrieved = join_all(
                batch
                    .iter()
                    .map(|m| self.retrieve_mention(m, &supporting, context)),
            )
            .await;

            tracing::debug!(
                "Batch {} retrieved {} mentions in {:?}",
                index + 1,
                batch.len(),
                started.elapsed()
            );

            for r in retrieved {
                by_mention.insert(r.mention.clone(), r);
            }
        }

        mentions
            .iter()
            .map(|m| {
                let key = m.trim();
                by_mention.get(key).map_or_else(
                    || MentionRetrieval::blank(m),
                    |r| MentionRetrieval {
                        mention: m.clone(),
                        ..r.clone()
                    },
                )
            })
            .collect()
    }

    async fn retrieve_mention(
        &self,
        mention: &str,
        gateways: &[&Arc<dyn KnowledgeBaseGateway>],
        context: Option<&TableContext>,
    ) -> MentionRetrieval {
        let started = Instant::now();

        let outcomes = join_all(gateways.iter().map(|g| self.query(g, mention, context))).await;

        let mut errors = BTreeMap::new();
        let mut lists = Vec::with_capacity(outcomes.len());
        for (gateway, outcome) in gateways.iter().zip(outcomes) {
            match outcome {
                Ok(candidates) => lists.push(candidates),
                Err(e) => {
                    tracing::warn!("Gateway {} failed for '{}': {}", gateway.name(), mention, e);
                    errors.insert(gateway.name().to_string(), e);
                }
            }
        }

        MentionRetrieval {
            mention: mention.to_string(),
            candidates: aggregate_candidates(lists, self.min_ed_score),
            queried: gateways.iter().map(|g| g.name().to_string()).collect(),
            errors,
            elapsed: started.elapsed(),
        }
    }

    async fn query(
        &self,
        gateway: &Arc<dyn KnowledgeBaseGateway>,
        mention: &str,
        context: Option<&TableContext>,
    ) -> Result<Vec<EntityCandidate>, String> {
        match tokio::time::timeout(self.timeout, gateway.get_candidates(mention, context)).await {
            Ok(Ok(candidates)) => Ok(candidates),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", self.timeout)),
        }
    }
}
