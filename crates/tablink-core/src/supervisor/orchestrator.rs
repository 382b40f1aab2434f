use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::machine::{transition, SupervisorEvent, SupervisorState};
use super::report::{CompletionSummary, ProgressReport, QualityReport, QualityVerdict};
use super::state::{PipelineState, PipelineStateDelta};
use crate::candidate::EntityCandidate;
use crate::column::{ColumnType, TableColumn, TableContext};
use crate::config::LinkingConfig;
use crate::error::{Error, Result};
use crate::events::{EventSink, RunTracker, TracingEventSink};
use crate::gateway::{GatewayRegistry, KnowledgeBaseDescriptor, KnowledgeBaseGateway};
use crate::generation::TextGenerationService;
use crate::linking::{
    aggregate, ColumnClassifier, DisambiguationScorer, ExecutionPlan, KnowledgeBasePlanner,
    MentionRetrieval, ProcessingMetrics, ResultValidator, RetrievalFanout,
};
use crate::result::{ColumnLinkingResult, LinkingResult};
use crate::store::PhaseSink;

/// One column submitted for linking
#[derive(Debug, Clone)]
pub struct LinkingRequest {
    pub request_id: Uuid,
    pub column: TableColumn,
    pub context: Option<TableContext>,
}

impl LinkingRequest {
    #[must_use]
    pub fn new(column: TableColumn) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            column,
            context: None,
        }
    }

    #[must_use]
    pub const fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: TableContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// Everything a finished run hands back to its caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub request_id: Uuid,
    pub result: ColumnLinkingResult,
    pub quality: QualityReport,
    pub metrics: ProcessingMetrics,
    pub summary: CompletionSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<TableContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<ExecutionPlan>,
}

/// Drives one column through the supervisor's states.
///
/// The pipeline itself is shared and immutable; every call to
/// [`run`](Self::run) owns its own [`PipelineState`].
pub struct LinkingPipeline {
    config: LinkingConfig,
    registry: GatewayRegistry,
    classifier: ColumnClassifier,
    planner: KnowledgeBasePlanner,
    scorer: DisambiguationScorer,
    validator: ResultValidator,
    retrieval: RetrievalFanout,
    generator: Option<Arc<dyn TextGenerationService>>,
    events: Arc<dyn EventSink>,
    phases: Option<Arc<dyn PhaseSink>>,
}

impl LinkingPipeline {
    #[must_use]
    pub fn new(config: LinkingConfig, registry: GatewayRegistry) -> Self {
        Self {
            classifier: ColumnClassifier::default(),
            planner: KnowledgeBasePlanner::new(),
            scorer: DisambiguationScorer::new(config.generation_top_k, config.generation_timeout()),
            validator: ResultValidator::new(config.validation_threshold),
            retrieval: RetrievalFanout::new(config.retrieval_budget(), config.min_ed_score),
            generator: None,
            events: Arc::new(TracingEventSink),
            phases: None,
            config,
            registry,
        }
    }

    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn TextGenerationService>) -> Self {
        self.scorer = DisambiguationScorer::new(
            self.config.generation_top_k,
            self.config.generation_timeout(),
        )
        .with_generator(generator.clone());
        self.generator = Some(generator);
        self
    }

    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn with_phase_sink(mut self, phases: Arc<dyn PhaseSink>) -> Self {
        self.phases = Some(phases);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &LinkingConfig {
        &self.config
    }

    #[must_use]
    pub const fn registry(&self) -> &GatewayRegistry {
        &self.registry
    }

    #[must_use]
    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    /// Runs the supervisor loop to a terminal state.
    ///
    /// Only [`Error::InputRejected`] and [`Error::QualityGate`] are expected
    /// request failures; anything else is an internal fault.
    pub async fn run(&self, request: LinkingRequest) -> Result<PipelineOutcome> {
        let LinkingRequest {
            request_id,
            column,
            context,
        } = request;

        tracing::info!(
            request_id = %request_id,
            column = column.name(),
            values = column.values().len(),
            "Linking column"
        );

        let tracker = RunTracker::new(request_id, self.events.clone());
        let mut state = PipelineState::new(request_id, column, context);
        let mut phase = SupervisorState::Init;

        loop {
            if let Some(phases) = &self.phases {
                phases.phase_changed(request_id, phase).await;
            }

            let event = match phase {
                SupervisorState::Init => SupervisorEvent::Started,
                SupervisorState::ValidateInput => {
                    let (event, delta) = self.validate_input(&tracker, &state);
                    state.apply(delta)?;
                    event
                }
                SupervisorState::Plan => {
                    let delta = self.plan(&tracker, &state).await;
                    state.apply(delta)?;
                    SupervisorEvent::Planned
                }
                SupervisorState::Execute => {
                    let delta = self.execute(&tracker, &state).await;
                    state.apply(delta)?;
                    SupervisorEvent::Executed
                }
                SupervisorState::Monitor => {
                    let delta = self.monitor(&tracker, &state);
                    state.apply(delta)?;
                    SupervisorEvent::Monitored
                }
                SupervisorState::QualityCheck => {
                    let (event, delta) = self.quality_check(&tracker, &state);
                    state.apply(delta)?;
                    event
                }
                SupervisorState::Finalize => return self.finalize(&tracker, state),
                SupervisorState::Rejected => {
                    tracing::warn!(request_id = %request_id, "Input rejected: {}", state.errors.join("; "));
                    return Err(Error::InputRejected {
                        issues: state.errors,
                    });
                }
                SupervisorState::Failed => {
                    let report = state.quality.unwrap_or_default();
                    tracing::error!(
                        request_id = %request_id,
                        verdict = %report.verdict,
                        errors = state.errors.len(),
                        "Quality gate failed"
                    );
                    return Err(Error::QualityGate {
                        report,
                        errors: state.errors,
                    });
                }
            };

            let next = transition(phase, event)?;
            tracing::debug!(request_id = %request_id, "{} -> {}", phase, next);
            tracker.decision(
                "supervisor",
                json!({ "from": phase, "to": next, "event": event }),
            );
            phase = next;
        }
    }

    fn validate_input(
        &self,
        tracker: &RunTracker,
        state: &PipelineState,
    ) -> (SupervisorEvent, PipelineStateDelta) {
        let guard = tracker.stage("validate_input");
        let mut delta = PipelineStateDelta::new();
        let column = &state.column;
        let total = column.values().len();
        let blank = column.blank_count();

        if blank == total {
            delta.errors.push("column values are all empty".to_string());
        } else if blank * 2 > total {
            delta
                .warnings
                .push(format!("{blank} of {total} column values are empty"));
        }
        if column.name().trim().is_empty() {
            delta.warnings.push("column name is empty".to_string());
        }

        let event = if delta.errors.is_empty() {
            SupervisorEvent::InputAccepted
        } else {
            SupervisorEvent::InputRejected
        };
        guard.complete(json!({
            "issues": delta.errors,
            "warnings": delta.warnings,
        }));
        (event, delta)
    }

    async fn plan(&self, tracker: &RunTracker, state: &PipelineState) -> PipelineStateDelta {
        let guard = tracker.stage("plan");
        let mut delta = PipelineStateDelta::new();

        let mut column_type = state.column_type();
        if column_type == ColumnType::Unknown {
            column_type = match &self.generator {
                Some(generator) => {
                    self.classifier
                        .classify_with(&state.column, generator.as_ref())
                        .await
                }
                None => self.classifier.classify(&state.column),
            };
            tracker.decision("classifier", json!({ "column_type": column_type }));
            delta.column_type = Some(column_type);
        }

        let context = if let Some(context) = &state.context {
            context.clone()
        } else {
            let context = match self.classifier.extract_context(
                &state.column,
                column_type,
                state.provided_context.as_ref(),
            ) {
                Ok(context) => context,
                Err(e) => {
                    tracing::warn!("Context extraction failed, continuing without: {}", e);
                    delta.errors.push(e.to_string());
                    TableContext {
                        column_type: Some(column_type),
                        ..TableContext::default()
                    }
                }
            };
            delta.context = Some(context.clone());
            context
        };

        let descriptors: Vec<&KnowledgeBaseDescriptor> = self.registry.descriptors().collect();
        let plan = match &state.plan {
            Some(previous) if state.reprocess_attempts > 0 => {
                self.planner.replan(previous, &descriptors)
            }
            _ => self.planner.plan(
                &descriptors,
                column_type,
                context.domain(),
                state.column.values().len(),
                !context.is_empty(),
            ),
        };

        if plan.query_order.is_empty() {
            tracing::warn!("No knowledge base selected for {} column", column_type);
            delta
                .warnings
                .push(format!("no knowledge base selected for {column_type}"));
        }

        tracker.decision(
            "planner",
            json!({
                "plan_id": plan.id,
                "query_order": plan.query_order,
                "gateway_scores": plan.gateway_scores,
                "batch_size": plan.strategy.batch_size,
                "mode": plan.strategy.mode,
                "reprocess": plan.reprocess,
            }),
        );
        guard.complete(json!({ "column_type": column_type, "domain": context.domain() }));

        delta.plan = Some(plan);
        delta
    }

    async fn execute(&self, tracker: &RunTracker, state: &PipelineState) -> PipelineStateDelta {
        let guard = tracker.stage("execute");
        let mut delta = PipelineStateDelta::new();
        let column_type = state.column_type();
        let context = state.context.as_ref();

        let (gateways, batch_size) = state.plan.as_ref().map_or_else(
            || (Vec::new(), self.config.batch_size),
            |plan| {
                let gateways: Vec<Arc<dyn KnowledgeBaseGateway>> = plan
                    .query_order
                    .iter()
                    .filter_map(|name| self.registry.get(name))
                    .collect();
                (gateways, plan.strategy.batch_size.min(self.config.batch_size))
            },
        );

        let retrieved = self
            .retrieval
            .retrieve(
                state.column.values(),
                &gateways,
                column_type,
                context,
                batch_size,
            )
            .await;

        let mut linked: HashMap<String, LinkingResult> = HashMap::new();
        let mut results = Vec::with_capacity(retrieved.len());
        let mut candidates: HashMap<String, Vec<EntityCandidate>> = HashMap::new();
        let mut confidence = HashMap::new();

        for retrieval in retrieved {
            let key = retrieval.mention.trim().to_string();
            if let Some(done) = linked.get(&key) {
                results.push(LinkingResult {
                    mention: retrieval.mention,
                    ..done.clone()
                });
                continue;
            }

            for (gateway, error) in &retrieval.errors {
                let message = format!("{gateway} failed for '{key}': {error}");
                tracker.error("execute", &message);
                delta.errors.push(message);
            }

            let result = self.link_mention(retrieval, &key, column_type, context).await;
            if !key.is_empty() {
                candidates.insert(key.clone(), result.candidates.clone());
                confidence.insert(key.clone(), result.confidence);
            }
            linked.insert(key, result.clone());
            results.push(result);
        }

        let selected = results.iter().filter(|r| r.has_selection()).count();
        guard.complete(json!({
            "gateways": gateways.iter().map(|g| g.name()).collect::<Vec<_>>(),
            "mentions": results.len(),
            "selected": selected,
            "errors": delta.errors.len(),
        }));

        delta.results = Some(results);
        delta.candidates = Some(candidates);
        delta.confidence = Some(confidence);
        delta
    }

    async fn link_mention(
        &self,
        retrieval: MentionRetrieval,
        mention: &str,
        column_type: ColumnType,
        context: Option<&TableContext>,
    ) -> LinkingResult {
        let MentionRetrieval {
            mention: original,
            candidates,
            queried,
            errors,
            elapsed,
        } = retrieval;

        let started = Instant::now();
        let ranked = self
            .scorer
            .disambiguate(candidates, mention, column_type, context)
            .await;

        let mut result = LinkingResult::from_ranked(original, ranked, self.config.ambiguity_threshold)
            .with_processing_time(elapsed + started.elapsed())
            .with_knowledge_bases(queried);
        result.metadata.gateway_errors = errors;
        result.metadata.reasoning = result.selected_candidate.as_ref().and_then(reasoning);
        result.metadata.validation = Some(self.validator.validate(&result));
        result
    }

    fn monitor(&self, tracker: &RunTracker, state: &PipelineState) -> PipelineStateDelta {
        let guard = tracker.stage("monitor");
        let progress = ProgressReport::new(
            &state.results,
            state.column.values().len(),
            state.errors.len(),
        );

        tracing::info!(
            request_id = %state.request_id,
            "Processed {}/{} mentions ({:.0}%)",
            progress.processed,
            progress.total,
            progress.percentage
        );
        for issue in &progress.issues {
            tracing::debug!(request_id = %state.request_id, "Issue: {}", issue);
        }

        guard.complete(json!(progress));
        PipelineStateDelta {
            progress: Some(progress),
            ..PipelineStateDelta::default()
        }
    }

    fn quality_check(
        &self,
        tracker: &RunTracker,
        state: &PipelineState,
    ) -> (SupervisorEvent, PipelineStateDelta) {
        let guard = tracker.stage("quality_check");
        let report = QualityReport::assess(
            &state.results,
            self.config.min_confidence,
            self.config.min_success_rate,
            state.errors.len(),
        );

        let reprocess_available = state.reprocess_attempts < self.config.max_reprocess_attempts;
        let mut delta = PipelineStateDelta::new();
        if report.verdict == QualityVerdict::Medium && reprocess_available {
            delta.reprocess_attempts = Some(state.reprocess_attempts + 1);
        }

        tracing::info!(
            request_id = %state.request_id,
            verdict = %report.verdict,
            "Quality: avg confidence {:.2}, success rate {:.2}",
            report.average_confidence,
            report.success_rate
        );
        tracker.decision("quality_check", json!(report));
        guard.complete(json!({ "verdict": report.verdict }));

        let event = SupervisorEvent::QualityAssessed {
            verdict: report.verdict,
            reprocess_available,
        };
        delta.quality = Some(report);
        (event, delta)
    }

    fn finalize(&self, tracker: &RunTracker, state: PipelineState) -> Result<PipelineOutcome> {
        let guard = tracker.stage("finalize");
        let column_type = state.column_type();
        let metrics = aggregate(&state.results, self.config.validation_threshold);
        let result = ColumnLinkingResult::new(
            state.column.name(),
            column_type,
            state.results,
            &metrics,
            state.started_at,
        )?;
        let quality = state.quality.unwrap_or_default();
        guard.complete(json!({
            "successful_links": metrics.successful_links,
            "total_mentions": metrics.total_mentions,
        }));

        let summary = CompletionSummary {
            stages: tracker.stage_counts(),
            event_count: tracker.event_count(),
            verdict: quality.verdict,
            reprocess_attempts: state.reprocess_attempts,
            warnings: state.warnings,
        };

        tracing::info!(
            request_id = %state.request_id,
            "Linked {}/{} mentions in column '{}'",
            metrics.successful_links,
            metrics.total_mentions,
            result.column_name
        );

        Ok(PipelineOutcome {
            request_id: state.request_id,
            result,
            quality,
            metrics,
            summary,
            context: state.context,
            plan: state.plan,
        })
    }
}

fn reasoning(candidate: &EntityCandidate) -> Option<String> {
    if let Some(reasoning) = &candidate.reasoning {
        return Some(reasoning.clone());
    }
    candidate.breakdown.map(|b| {
        format!(
            "similarity {:.2}, type {:.2}, ed {:.2}, popularity {:.2}",
            b.similarity, b.type_compatibility, b.ed_score, b.popularity
        )
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::events::{EventKind, MemoryEventSink};
    use crate::gateway::{GatewayKind, GatewayResult};
    use crate::generation::{GenerationError, GenerationResult};

    struct FixedGateway {
        descriptor: KnowledgeBaseDescriptor,
        candidates: Vec<EntityCandidate>,
    }

    impl FixedGateway {
        fn new(name: &str, candidates: Vec<EntityCandidate>) -> Arc<Self> {
            Arc::new(Self {
                descriptor: KnowledgeBaseDescriptor::new(name, GatewayKind::LamApi, "http://kb.test")
                    .with_supported_types(vec![ColumnType::Location])
                    .with_priority(1),
                candidates,
            })
        }
    }

    #[async_trait]
    impl KnowledgeBaseGateway for FixedGateway {
        fn descriptor(&self) -> &KnowledgeBaseDescriptor {
            &self.descriptor
        }

        async fn get_candidates(
            &self,
            _mention: &str,
            _context: Option<&TableContext>,
        ) -> GatewayResult<Vec<EntityCandidate>> {
            Ok(self.candidates.clone())
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    struct DownGenerator;

    #[async_trait]
    impl TextGenerationService for DownGenerator {
        async fn generate(&self, _system: &str, _human: &str) -> GenerationResult<String> {
            Err(GenerationError::Unavailable)
        }
    }

    fn paris() -> EntityCandidate {
        EntityCandidate::new("Q90", "Paris", "lamapi").with_scores(1.0, 0.9)
    }

    fn pipeline(gateway: Arc<FixedGateway>, sink: Arc<MemoryEventSink>) -> LinkingPipeline {
        LinkingPipeline::new(LinkingConfig::default(), GatewayRegistry::new().with_gateway(gateway))
            .with_event_sink(sink)
    }

    fn column(values: &[&str]) -> TableColumn {
        TableColumn::new("city", values.iter().map(ToString::to_string).collect())
            .unwrap()
            .with_type(ColumnType::Location)
    }

    #[tokio::test]
    async fn test_single_candidate_column_finalizes() {
        let sink = Arc::new(MemoryEventSink::new());
        let pipeline = pipeline(FixedGateway::new("lamapi", vec![paris()]), sink.clone());

        let outcome = pipeline
            .run(LinkingRequest::new(column(&["Paris", "Paris"])))
            .await
            .unwrap();

        assert_eq!(outcome.result.results.len(), 2);
        assert_eq!(outcome.quality.verdict, QualityVerdict::High);
        for result in &outcome.result.results {
            assert_eq!(result.selected_candidate.as_ref().unwrap().id, "Q90");
            assert!((result.confidence - 0.9).abs() < f64::EPSILON);
            assert!(result.metadata.validation.as_ref().unwrap().is_valid);
            assert_eq!(result.used_knowledge_bases, vec!["lamapi".to_string()]);
        }
        assert!((outcome.result.success_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(outcome.summary.stages["execute"], 1);
        assert_eq!(outcome.summary.reprocess_attempts, 0);
    }

    #[tokio::test]
    async fn test_every_stage_emits_start_and_end() {
        let sink = Arc::new(MemoryEventSink::new());
        let pipeline = pipeline(FixedGateway::new("lamapi", vec![paris()]), sink.clone());
        let request = LinkingRequest::new(column(&["Paris"]));
        let id = request.request_id;

        pipeline.run(request).await.unwrap();

        let events = sink.events_for(id);
        for stage in ["validate_input", "plan", "execute", "monitor", "quality_check", "finalize"] {
            let starts = events
                .iter()
                .filter(|e| e.stage == stage && e.kind == EventKind::Start)
                .count();
            let ends = events
                .iter()
                .filter(|e| e.stage == stage && e.kind == EventKind::End)
                .count();
            assert_eq!((starts, ends), (1, 1), "stage {stage}");
        }
        assert!(events
            .iter()
            .any(|e| e.stage == "planner" && e.kind == EventKind::Decision));
        assert_eq!(
            events
                .iter()
                .filter(|e| e.stage == "supervisor" && e.kind == EventKind::Decision)
                .count(),
            6
        );
    }

    #[tokio::test]
    async fn test_blank_column_is_rejected() {
        let sink = Arc::new(MemoryEventSink::new());
        let pipeline = pipeline(FixedGateway::new("lamapi", vec![paris()]), sink.clone());
        let request = LinkingRequest::new(column(&["", "  "]));
        let id = request.request_id;

        let err = pipeline.run(request).await.unwrap_err();

        assert!(err.is_request_failure());
        assert!(matches!(err, Error::InputRejected { ref issues } if issues.len() == 1));
        assert!(sink.events_for(id).iter().all(|e| e.stage != "execute"));
    }

    #[tokio::test]
    async fn test_no_candidates_fails_quality_gate() {
        let sink = Arc::new(MemoryEventSink::new());
        let pipeline = pipeline(FixedGateway::new("lamapi", Vec::new()), sink);

        let err = pipeline
            .run(LinkingRequest::new(column(&["Unknown Entity XYZ"])))
            .await
            .unwrap_err();

        match err {
            Error::QualityGate { report, .. } => assert_eq!(report.verdict, QualityVerdict::Low),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_mismatched_context_is_not_fatal() {
        let sink = Arc::new(MemoryEventSink::new());
        let pipeline = pipeline(FixedGateway::new("lamapi", vec![paris()]), sink);
        let context = TableContext {
            headers: vec!["country".into()],
            ..TableContext::default()
        };

        let outcome = pipeline
            .run(LinkingRequest::new(column(&["Paris"])).with_context(context))
            .await
            .unwrap();

        assert!(outcome.context.unwrap().headers.is_empty());
        assert_eq!(outcome.quality.error_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_column_is_classified_with_failing_generator() {
        let sink = Arc::new(MemoryEventSink::new());
        let pipeline = pipeline(FixedGateway::new("lamapi", vec![paris()]), sink)
            .with_generator(Arc::new(DownGenerator));
        let column = TableColumn::new("city", vec!["Paris".into()]).unwrap();

        let outcome = pipeline.run(LinkingRequest::new(column)).await.unwrap();

        assert_eq!(outcome.result.column_type, ColumnType::Location);
    }
}
