use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::result::{duration_ms, LinkingResult};

/// Column-level statistics rolled up from per-mention results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetrics {
    pub total_mentions: usize,
    /// Mentions that produced at least one candidate
    pub processed_mentions: usize,
    pub successful_links: usize,
    pub failed_links: usize,
    pub ambiguous_links: usize,
    /// Mean over mentions with a selection
    pub average_confidence: f64,
    pub kb_usage: BTreeMap<String, usize>,
    #[serde(with = "duration_ms")]
    pub total_processing_time: Duration,
}

impl ProcessingMetrics {
    /// Successful links over all mentions, 0 for an empty column.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_mentions == 0 {
            0.0
        } else {
            self.successful_links as f64 / self.total_mentions as f64
        }
    }
}

/// A link is successful when something was selected above `success_threshold`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn aggregate(results: &[LinkingResult], success_threshold: f64) -> ProcessingMetrics {
    let mut metrics = ProcessingMetrics {
        total_mentions: results.len(),
        ..ProcessingMetrics::default()
    };

    let mut selected_confidence = Vec::new();
    for result in results {
        if !result.candidates.is_empty() {
            metrics.processed_mentions += 1;
        }
        if result.has_selection() {
            selected_confidence.push(result.confidence);
            if result.confidence > success_threshold {
                metrics.successful_links += 1;
            }
        }
        if result.is_ambiguous {
            metrics.ambiguous_links += 1;
        }
        for kb in &result.used_knowledge_bases {
            *metrics.kb_usage.entry(kb.clone()).or_insert(0) += 1;
        }
        metrics.total_processing_time += result.processing_time;
    }

    metrics.failed_links = metrics.total_mentions - metrics.successful_links;
    if !selected_confidence.is_empty() {
        metrics.average_confidence =
            selected_confidence.iter().sum::<f64>() / selected_confidence.len() as f64;
    }

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::EntityCandidate;

    fn linked(confidence: f64, kbs: &[&str]) -> LinkingResult {
        let candidate = EntityCandidate::new("Q1", "x", "kb")
            .with_confidence(confidence)
            .unwrap();
        LinkingResult::from_ranked("x", vec![candidate], 0.8)
            .with_knowledge_bases(kbs.iter().map(ToString::to_string).collect())
            .with_processing_time(Duration::from_millis(100))
    }

    #[test]
    fn test_aggregate() {
        let results = vec![
            linked(0.9, &["wikidata", "geonames"]),
            linked(0.5, &["wikidata"]),
            LinkingResult::no_candidates("nothing").with_knowledge_bases(vec!["wikidata".into()]),
            linked(0.7, &["geonames"]),
        ];

        let metrics = aggregate(&results, 0.6);

        assert_eq!(metrics.total_mentions, 4);
        assert_eq!(metrics.processed_mentions, 3);
        assert_eq!(metrics.successful_links, 2);
        assert_eq!(metrics.failed_links, 2);
        assert!((metrics.average_confidence - 0.7).abs() < 1e-9);
        assert!((metrics.success_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(metrics.kb_usage["wikidata"], 3);
        assert_eq!(metrics.kb_usage["geonames"], 2);
        assert_eq!(metrics.total_processing_time, Duration::from_millis(300));
    }

    #[test]
    fn test_empty_results() {
        let metrics = aggregate(&[], 0.6);
        assert_eq!(metrics.total_mentions, 0);
        assert!(metrics.success_rate().abs() < f64::EPSILON);
        assert!(metrics.average_confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn test_no_selection_means_zero_average() {
        let metrics = aggregate(&[LinkingResult::no_candidates("a")], 0.6);
        assert!(metrics.average_confidence.abs() < f64::EPSILON);
        assert_eq!(metrics.failed_links, 1);
    }
}
