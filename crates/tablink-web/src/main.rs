mod api;
mod config;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use tablink_core::{
    load_descriptors, GatewayRegistry, GenerationConfig, HttpTextGenerator, LinkingConfig,
    TextGenerationService,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::state::AppState;

const DEFAULT_KB_CONFIG: &str = "config/knowledge_bases.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tablink_web=debug,tablink_core=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let server = ServerConfig::from_env();
    let linking = LinkingConfig::from_env()?;

    let kb_path = LinkingConfig::knowledge_base_path().unwrap_or_else(|| PathBuf::from(DEFAULT_KB_CONFIG));
    let descriptors = if kb_path.exists() {
        load_descriptors(&kb_path)?
    } else {
        tracing::warn!("No knowledge base file at {}, starting without gateways", kb_path.display());
        Vec::new()
    };
    let registry = GatewayRegistry::from_descriptors(descriptors, &linking)?;
    tracing::info!("Loaded {} knowledge bases: {:?}", registry.len(), registry);

    let generation = GenerationConfig::from_env()?;
    let generator: Option<Arc<dyn TextGenerationService>> = if generation.is_enabled() {
        let client = HttpTextGenerator::new(generation, linking.generation_timeout())?;
        tracing::info!("Text generation enabled with model {}", client.model());
        Some(Arc::new(client))
    } else {
        tracing::info!("Text generation not configured, using heuristics only");
        None
    };

    let state = AppState::new(linking, registry, generator, server.clone());

    let evictor = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(evictor.config.eviction_interval());
        loop {
            ticker.tick().await;
            let evicted = evictor.evict_expired().await;
            if evicted > 0 {
                tracing::debug!("Evicted {} finished requests", evicted);
            }
        }
    });

    let app = api::app(state);

    let addr = server.bind_address();
    tracing::info!("Starting tablink on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
