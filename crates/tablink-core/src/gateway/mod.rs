mod alligator;
mod config;
mod geonames;
mod http;
mod lamapi;
mod sparql;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::candidate::EntityCandidate;
use crate::column::TableContext;
use crate::config::LinkingConfig;
use crate::error::{Error, Result};

pub use alligator::AlligatorGateway;
pub use config::{load_descriptors, GatewayKind, KnowledgeBaseDescriptor, KnowledgeBasesFile};
pub use geonames::GeoNamesGateway;
pub use http::GatewayClient;
pub use lamapi::LamApiGateway;
pub use sparql::SparqlGateway;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("Knowledge base reported an error: {0}")]
    Api(String),
    #[error("Malformed payload: {0}")]
    Malformed(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl GatewayError {
    /// Transient failures are worth another attempt; everything else is final.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Api(_) | Self::Malformed(_) | Self::UrlParse(_) => false,
        }
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Connector to one knowledge base.
///
/// "No results" is an empty list, never an error. Errors are reserved for
/// transport and parse failures, which the pipeline treats as zero candidates.
#[async_trait]
pub trait KnowledgeBaseGateway: Send + Sync {
    fn descriptor(&self) -> &KnowledgeBaseDescriptor;

    async fn get_candidates(
        &self,
        mention: &str,
        context: Option<&TableContext>,
    ) -> GatewayResult<Vec<EntityCandidate>>;

    async fn health_check(&self) -> bool;

    fn name(&self) -> &str {
        &self.descriptor().name
    }
}

/// Process-wide set of gateways, built once from configuration.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: Vec<Arc<dyn KnowledgeBaseGateway>>,
}

impl GatewayRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an HTTP gateway for every enabled descriptor. All connectors
    /// share one client, and with it one connection pool.
    pub fn from_descriptors(
        descriptors: Vec<KnowledgeBaseDescriptor>,
        config: &LinkingConfig,
    ) -> Result<Self> {
        let client = GatewayClient::new(config.gateway_timeout(), config.retry.clone())
            .map_err(|e| Error::Config(e.to_string()))?;

        let mut registry = Self::new();
        for descriptor in descriptors.into_iter().filter(|d| d.enabled) {
            tracing::debug!("Registering {} knowledge base '{}'", descriptor.kind, descriptor.name);
            registry.register(build_gateway(
                descriptor,
                client.clone(),
                config.max_candidates_per_mention,
            ));
        }

        Ok(registry)
    }

    pub fn register(&mut self, gateway: Arc<dyn KnowledgeBaseGateway>) {
        self.gateways.push(gateway);
    }

    #[must_use]
    pub fn with_gateway(mut self, gateway: Arc<dyn KnowledgeBaseGateway>) -> Self {
        self.register(gateway);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn KnowledgeBaseGateway>> {
        self.gateways.iter().find(|g| g.name() == name).cloned()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &KnowledgeBaseDescriptor> {
        self.gateways.iter().map(|g| g.descriptor())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn KnowledgeBaseGateway>> {
        self.gateways.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.gateways.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}

impl std::fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.gateways.iter().map(|g| g.name()))
            .finish()
    }
}

fn build_gateway(
    descriptor: KnowledgeBaseDescriptor,
    client: GatewayClient,
    limit: usize,
) -> Arc<dyn KnowledgeBaseGateway> {
    match descriptor.kind {
        GatewayKind::LamApi => Arc::new(LamApiGateway::new(descriptor, client, limit)),
        GatewayKind::GeoNames => Arc::new(GeoNamesGateway::new(descriptor, client, limit)),
        GatewayKind::Sparql => Arc::new(SparqlGateway::new(descriptor, client, limit)),
        GatewayKind::Alligator => Arc::new(AlligatorGateway::new(descriptor, client, limit)),
    }
}
