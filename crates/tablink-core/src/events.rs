use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    End,
    Decision,
    Error,
}

impl EventKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Decision => "decision",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured monitoring event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub request_id: Uuid,
    pub stage: String,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl PipelineEvent {
    #[must_use]
    pub fn new(request_id: Uuid, stage: impl Into<String>, kind: EventKind) -> Self {
        Self {
            request_id,
            stage: stage.into(),
            kind,
            timestamp: Utc::now(),
            duration_ms: None,
            payload: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub const fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }
}

/// Receives monitoring events. Implementations must return quickly; the
/// pipeline never waits on a sink.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Keeps events in memory for timeline queries
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl MemoryEventSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events_for(&self, request_id: Uuid) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.request_id == request_id)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every event belonging to the given requests.
    pub fn forget(&self, request_ids: &[Uuid]) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|e| !request_ids.contains(&e.request_id));
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: PipelineEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: PipelineEvent) {
        match event.kind {
            EventKind::Error => tracing::warn!(
                request_id = %event.request_id,
                stage = %event.stage,
                payload = %event.payload,
                "stage error"
            ),
            kind => tracing::debug!(
                request_id = %event.request_id,
                stage = %event.stage,
                kind = %kind,
                duration_ms = event.duration_ms,
                payload = %event.payload,
                "pipeline event"
            ),
        }
    }
}

/// Sends every event to several sinks
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: PipelineEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

/// Per-run event emitter that also counts what it emitted
pub struct RunTracker {
    request_id: Uuid,
    sink: Arc<dyn EventSink>,
    emitted: AtomicUsize,
    stages: Mutex<BTreeMap<&'static str, usize>>,
}

impl RunTracker {
    #[must_use]
    pub fn new(request_id: Uuid, sink: Arc<dyn EventSink>) -> Self {
        Self {
            request_id,
            sink,
            emitted: AtomicUsize::new(0),
            stages: Mutex::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub const fn request_id(&self) -> Uuid {
        self.request_id
    }

    fn emit(&self, event: PipelineEvent) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        self.sink.emit(event);
    }

    /// Emits `start` now and `end` when the guard goes away.
    pub fn stage(&self, stage: &'static str) -> StageGuard<'_> {
        *self
            .stages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(stage)
            .or_insert(0) += 1;
        self.emit(PipelineEvent::new(self.request_id, stage, EventKind::Start));

        StageGuard {
            tracker: self,
            stage,
            started: Instant::now(),
            completed: false,
        }
    }

    pub fn decision(&self, stage: &'static str, payload: serde_json::Value) {
        self.emit(PipelineEvent::new(self.request_id, stage, EventKind::Decision).with_payload(payload));
    }

    pub fn error(&self, stage: &'static str, message: &str) {
        self.emit(
            PipelineEvent::new(self.request_id, stage, EventKind::Error)
                .with_payload(serde_json::json!({ "error": message })),
        );
    }

    #[must_use]
    pub fn event_count(&self) -> usize {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Stage names with how often each ran.
    #[must_use]
    pub fn stage_counts(&self) -> BTreeMap<String, usize> {
        self.stages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| ((*k).to_string(), *v))
            .collect()
    }
}

/// Open stage scope. Dropping it without [`StageGuard::complete`] records an
/// error before the closing `end` event.
pub struct StageGuard<'a> {
    tracker: &'a RunTracker,
    stage: &'static str,
    started: Instant,
    completed: bool,
}

impl StageGuard<'_> {
    pub fn complete(mut self, payload: serde_json::Value) {
        self.completed = true;
        self.finish(payload);
    }

    #[allow(clippy::cast_possible_truncation)]
    fn finish(&self, payload: serde_json::Value) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.tracker.emit(
            PipelineEvent::new(self.tracker.request_id, self.stage, EventKind::End)
                .with_duration_ms(elapsed)
                .with_payload(payload),
        );
    }
}

impl Drop for StageGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.tracker.error(self.stage, "stage exited without completing");
            self.finish(serde_json::Value::Null);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> (Arc<MemoryEventSink>, RunTracker) {
        let sink = Arc::new(MemoryEventSink::new());
        let tracker = RunTracker::new(Uuid::new_v4(), sink.clone());
        (sink, tracker)
    }

    #[test]
    fn test_completed_stage_emits_start_and_end() {
        let (sink, tracker) = tracker();

        tracker.stage("plan").complete(serde_json::json!({"selected": 2}));

        let events = sink.events_for(tracker.request_id());
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Start, EventKind::End]);
        assert!(events[1].duration_ms.is_some());
        assert_eq!(events[1].payload["selected"], 2);
        assert_eq!(tracker.event_count(), 2);
    }

    #[test]
    fn test_dropped_stage_emits_error_then_end() {
        let (sink, tracker) = tracker();

        {
            let _guard = tracker.stage("execute");
        }

        let kinds: Vec<_> = sink
            .events_for(tracker.request_id())
            .iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds, vec![EventKind::Start, EventKind::Error, EventKind::End]);
    }

    #[test]
    fn test_stage_counts() {
        let (_sink, tracker) = tracker();
        tracker.stage("plan").complete(serde_json::Value::Null);
        tracker.stage("plan").complete(serde_json::Value::Null);
        tracker.decision("supervisor", serde_json::json!({"verdict": "high"}));

        let counts = tracker.stage_counts();
        assert_eq!(counts.get("plan"), Some(&2));
        assert_eq!(tracker.event_count(), 5);
    }

    #[test]
    fn test_forget_drops_request_events() {
        let sink = MemoryEventSink::new();
        let keep = Uuid::new_v4();
        let drop_id = Uuid::new_v4();
        sink.emit(PipelineEvent::new(keep, "plan", EventKind::Start));
        sink.emit(PipelineEvent::new(drop_id, "plan", EventKind::Start));

        sink.forget(&[drop_id]);

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.events_for(keep).len(), 1);
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = Arc::new(MemoryEventSink::new());
        let b = Arc::new(MemoryEventSink::new());
        let fanout = FanoutSink::new(vec![a.clone(), b.clone(), Arc::new(TracingEventSink)]);

        fanout.emit(PipelineEvent::new(Uuid::new_v4(), "monitor", EventKind::Decision));

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }
}
