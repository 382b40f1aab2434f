use std::sync::Arc;

use tablink_core::{
    EventSink, FanoutSink, GatewayRegistry, LinkingConfig, LinkingPipeline, MemoryEventSink,
    RequestStore, TextGenerationService, TracingEventSink,
};

use crate::config::ServerConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<LinkingPipeline>,
    pub store: RequestStore,
    pub events: Arc<MemoryEventSink>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(
        linking: LinkingConfig,
        registry: GatewayRegistry,
        generator: Option<Arc<dyn TextGenerationService>>,
        config: ServerConfig,
    ) -> Self {
        let store = RequestStore::new(linking.request_retention());
        let events = Arc::new(MemoryEventSink::new());
        let sinks: Vec<Arc<dyn EventSink>> = vec![events.clone(), Arc::new(TracingEventSink)];

        let mut pipeline = LinkingPipeline::new(linking, registry)
            .with_event_sink(Arc::new(FanoutSink::new(sinks)))
            .with_phase_sink(Arc::new(store.clone()));
        if let Some(generator) = generator {
            pipeline = pipeline.with_generator(generator);
        }

        Self {
            pipeline: Arc::new(pipeline),
            store,
            events,
            config,
        }
    }

    /// Drops finished requests past their retention, along with their events.
    pub async fn evict_expired(&self) -> usize {
        let evicted = self.store.evict_expired().await;
        self.events.forget(&evicted);
        evicted.len()
    }
}
