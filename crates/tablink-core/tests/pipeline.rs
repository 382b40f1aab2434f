use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tablink_core::gateway::GatewayResult;
use tablink_core::linking::{DisambiguationScorer, RetrievalFanout};
use tablink_core::supervisor::{transition, SupervisorEvent};
use tablink_core::{
    ColumnType, EntityCandidate, EntityType, Error, GatewayKind, GatewayRegistry,
    KnowledgeBaseDescriptor, KnowledgeBaseGateway, LinkingConfig, LinkingPipeline, LinkingRequest,
    MemoryEventSink, QualityReport, QualityVerdict, SupervisorState, TableColumn, TableContext,
};

/// Gateway answering from a fixed table, with optional per-mention delays.
struct TableGateway {
    descriptor: KnowledgeBaseDescriptor,
    answers: HashMap<String, Vec<EntityCandidate>>,
    delays: HashMap<String, Duration>,
    calls: AtomicUsize,
}

impl TableGateway {
    fn new(name: &str) -> Self {
        Self {
            descriptor: KnowledgeBaseDescriptor::new(name, GatewayKind::LamApi, "http://kb.test")
                .with_supported_types(vec![ColumnType::Location])
                .with_priority(1),
            answers: HashMap::new(),
            delays: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    fn answer(mut self, mention: &str, candidates: Vec<EntityCandidate>) -> Self {
        self.answers.insert(mention.to_string(), candidates);
        self
    }

    fn delay(mut self, mention: &str, delay: Duration) -> Self {
        self.delays.insert(mention.to_string(), delay);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KnowledgeBaseGateway for TableGateway {
    fn descriptor(&self) -> &KnowledgeBaseDescriptor {
        &self.descriptor
    }

    async fn get_candidates(
        &self,
        mention: &str,
        _context: Option<&TableContext>,
    ) -> GatewayResult<Vec<EntityCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(mention) {
            tokio::time::sleep(*delay).await;
        }
        Ok(self.answers.get(mention).cloned().unwrap_or_default())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

fn location(id: &str, name: &str) -> EntityCandidate {
    EntityCandidate::new(id, name, "kb")
        .with_type(EntityType::new("LOCATION", "LOCATION"))
        .with_scores(1.0, 0.9)
}

/// One strong match followed by `n - 1` weak ones.
fn candidate_set(prefix: &str, mention: &str, n: usize) -> Vec<EntityCandidate> {
    let mut set = vec![location(&format!("{prefix}:{mention}:0"), mention).with_scores(1.0, 1.0)];
    set.extend((1..n).map(|i| {
        EntityCandidate::new(format!("{prefix}:{mention}:{i}"), format!("Other {i}"), prefix)
            .with_scores(0.2, 0.1)
    }));
    set
}

fn location_column(values: &[&str]) -> TableColumn {
    TableColumn::new("city", values.iter().map(ToString::to_string).collect())
        .unwrap()
        .with_type(ColumnType::Location)
}

fn pipeline(config: LinkingConfig, gateways: Vec<Arc<TableGateway>>) -> LinkingPipeline {
    let registry = gateways
        .into_iter()
        .fold(GatewayRegistry::new(), |registry, g| registry.with_gateway(g));
    LinkingPipeline::new(config, registry).with_event_sink(Arc::new(MemoryEventSink::new()))
}

// --- Scenario A: a single exact match ---

#[tokio::test]
async fn exact_single_candidate_is_selected() {
    let gateway = Arc::new(TableGateway::new("kb").answer("Paris", vec![location("Q90", "Paris")]));
    let pipeline = pipeline(LinkingConfig::default(), vec![gateway]);

    let outcome = pipeline
        .run(LinkingRequest::new(location_column(&["Paris"])))
        .await
        .unwrap();

    let result = &outcome.result.results[0];
    assert_eq!(result.selected_candidate.as_ref().unwrap().name, "Paris");
    assert!(result.confidence >= 0.8);
    assert!(!result.is_ambiguous);
}

// --- Scenario B: nothing found for one mention ---

#[tokio::test]
async fn unknown_mention_gets_first_class_empty_result() {
    let gateway = Arc::new(TableGateway::new("kb").answer("Paris", vec![location("Q90", "Paris")]));
    let pipeline = pipeline(LinkingConfig::default(), vec![gateway]);

    let outcome = pipeline
        .run(LinkingRequest::new(location_column(&[
            "Paris",
            "Paris",
            "Paris",
            "Paris",
            "Unknown Entity XYZ",
        ])))
        .await
        .unwrap();

    let unknown = &outcome.result.results[4];
    assert_eq!(unknown.mention, "Unknown Entity XYZ");
    assert!(unknown.candidates.is_empty());
    assert!(unknown.confidence.abs() < f64::EPSILON);
    assert!(unknown.no_candidates_found());
    assert!(!unknown.metadata.validation.as_ref().unwrap().is_valid);
}

// --- Scenario C: all-blank input ---

#[tokio::test]
async fn blank_column_is_rejected_without_retrieval() {
    let gateway = Arc::new(TableGateway::new("kb"));
    let pipeline = pipeline(LinkingConfig::default(), vec![gateway.clone()]);

    let err = pipeline
        .run(LinkingRequest::new(location_column(&["", "", "   "])))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InputRejected { .. }));
    assert_eq!(gateway.calls(), 0);
}

// --- Scenario D: one gateway times out for one mention ---

#[tokio::test(start_paused = true)]
async fn gateway_timeout_only_affects_its_mention() {
    let fast = Arc::new(
        TableGateway::new("fast")
            .answer("Paris", candidate_set("fast", "Paris", 8))
            .answer("Rome", candidate_set("fast", "Rome", 7)),
    );
    let slow = Arc::new(
        TableGateway::new("slow")
            .answer("Paris", candidate_set("slow", "Paris", 8))
            .answer("Rome", candidate_set("slow", "Rome", 7))
            .delay("Rome", Duration::from_secs(3600)),
    );
    let config = LinkingConfig {
        gateway_timeout_seconds: 2,
        ..LinkingConfig::default()
    };
    let pipeline = pipeline(config, vec![fast, slow]);

    let outcome = pipeline
        .run(LinkingRequest::new(location_column(&["Paris", "Rome"])))
        .await
        .unwrap();

    let paris = &outcome.result.results[0];
    assert_eq!(paris.mention, "Paris");
    assert_eq!(paris.candidates.len(), 16);
    assert!(paris.metadata.gateway_errors.is_empty());

    let rome = &outcome.result.results[1];
    assert_eq!(rome.mention, "Rome");
    assert_eq!(rome.candidates.len(), 7);
    assert!(rome.candidates.iter().all(|c| c.id.starts_with("fast:")));
    assert!(rome.metadata.gateway_errors.contains_key("slow"));
    assert_eq!(rome.selected_candidate.as_ref().unwrap().name, "Rome");
    assert_eq!(outcome.quality.error_count, 1);
}

// --- Scenario E: high quality finalizes directly ---

#[test]
fn high_scores_finalize() {
    let report = QualityReport::from_scores(0.85, 0.9, 0.6, 0.7, 0);
    assert_eq!(report.verdict, QualityVerdict::High);

    let next = transition(
        SupervisorState::QualityCheck,
        SupervisorEvent::QualityAssessed {
            verdict: report.verdict,
            reprocess_available: true,
        },
    )
    .unwrap();
    assert_eq!(next, SupervisorState::Finalize);
}

#[tokio::test]
async fn high_quality_run_skips_reprocessing() {
    let gateway = Arc::new(TableGateway::new("kb").answer("Paris", vec![location("Q90", "Paris")]));
    let config = LinkingConfig {
        max_reprocess_attempts: 2,
        ..LinkingConfig::default()
    };
    let pipeline = pipeline(config, vec![gateway]);

    let outcome = pipeline
        .run(LinkingRequest::new(location_column(&["Paris"])))
        .await
        .unwrap();

    assert_eq!(outcome.quality.verdict, QualityVerdict::High);
    assert_eq!(outcome.summary.reprocess_attempts, 0);
    assert_eq!(outcome.summary.stages["plan"], 1);
}

// --- Reprocessing on a medium verdict ---

fn medium_column() -> TableColumn {
    location_column(&["Paris", "Paris", "Paris", "Paris", "Atlantis"])
}

#[tokio::test]
async fn medium_verdict_finalizes_when_reprocessing_is_off() {
    let gateway = Arc::new(TableGateway::new("kb").answer("Paris", vec![location("Q90", "Paris")]));
    let pipeline = pipeline(LinkingConfig::default(), vec![gateway.clone()]);

    let outcome = pipeline.run(LinkingRequest::new(medium_column())).await.unwrap();

    assert_eq!(outcome.quality.verdict, QualityVerdict::Medium);
    assert_eq!(outcome.summary.reprocess_attempts, 0);
    assert_eq!(outcome.summary.stages["execute"], 1);
    assert_eq!(gateway.calls(), 2);
}

#[tokio::test]
async fn medium_verdict_reprocesses_up_to_the_limit() {
    let gateway = Arc::new(TableGateway::new("kb").answer("Paris", vec![location("Q90", "Paris")]));
    let config = LinkingConfig {
        max_reprocess_attempts: 1,
        ..LinkingConfig::default()
    };
    let pipeline = pipeline(config, vec![gateway.clone()]);

    let outcome = pipeline.run(LinkingRequest::new(medium_column())).await.unwrap();

    assert_eq!(outcome.quality.verdict, QualityVerdict::Medium);
    assert_eq!(outcome.summary.reprocess_attempts, 1);
    assert_eq!(outcome.summary.stages["plan"], 2);
    assert_eq!(outcome.summary.stages["execute"], 2);
    assert!(outcome.plan.unwrap().reprocess);
    assert_eq!(gateway.calls(), 4);
}

// --- Concurrency ---

#[tokio::test(start_paused = true)]
async fn small_column_queries_all_gateways_at_once() {
    let slow = |name: &str| {
        let mut gateway = TableGateway::new(name);
        for city in ["Paris", "Rome", "Oslo"] {
            gateway = gateway
                .answer(city, vec![location(&format!("{name}:{city}"), city)])
                .delay(city, Duration::from_secs(1));
        }
        Arc::new(gateway)
    };
    let (left, right) = (slow("left"), slow("right"));
    let pipeline = pipeline(LinkingConfig::default(), vec![left.clone(), right.clone()]);

    let started = tokio::time::Instant::now();
    let outcome = pipeline
        .run(LinkingRequest::new(location_column(&["Paris", "Rome", "Oslo"])))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(left.calls(), 3);
    assert_eq!(right.calls(), 3);
    assert!(outcome.result.results.iter().all(|r| r.candidates.len() == 2));
}

// --- Ordering ---

#[tokio::test(start_paused = true)]
async fn results_follow_input_order_not_completion_order() {
    let gateway: Arc<dyn KnowledgeBaseGateway> = Arc::new(
        TableGateway::new("kb")
            .answer("a", vec![location("1", "a")])
            .answer("b", vec![location("2", "b")])
            .answer("c", vec![location("3", "c")])
            .delay("a", Duration::from_millis(30))
            .delay("b", Duration::from_millis(20))
            .delay("c", Duration::from_millis(10)),
    );
    let mentions: Vec<String> = ["a", "b", "c", "a"].iter().map(ToString::to_string).collect();

    let retrieved = RetrievalFanout::new(Duration::from_secs(5), 0.1)
        .retrieve(&mentions, &[gateway], ColumnType::Location, None, 10)
        .await;

    let order: Vec<&str> = retrieved.iter().map(|r| r.mention.as_str()).collect();
    assert_eq!(order, vec!["a", "b", "c", "a"]);
    assert_eq!(retrieved[3].candidates[0].id, "1");
}

// --- Disambiguation is idempotent ---

#[test]
fn reranking_ranked_candidates_is_stable() {
    let scorer = DisambiguationScorer::new(5, Duration::from_secs(1));
    let candidates = vec![
        EntityCandidate::new("Q2", "Paris, Texas", "kb").with_scores(0.6, 0.2),
        location("Q90", "Paris"),
        EntityCandidate::new("Q3", "Paris Hilton", "kb").with_scores(0.5, 0.6),
    ];

    let first = scorer.rank(candidates, "Paris", ColumnType::Location);
    let second = scorer.rank(first.clone(), "Paris", ColumnType::Location);

    assert_eq!(first[0].id, "Q90");
    assert_eq!(second[0].id, first[0].id);
    assert!((second[0].confidence() - first[0].confidence()).abs() < f64::EPSILON);
}
