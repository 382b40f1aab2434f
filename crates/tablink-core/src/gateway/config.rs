use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::column::ColumnType;
use crate::error::{Error, Result};

/// Which connector implementation serves a knowledge base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    /// LamAPI lookup service over Wikidata
    #[serde(rename = "lamapi")]
    LamApi,
    /// GeoNames place search
    #[serde(rename = "geonames")]
    GeoNames,
    Sparql,
    Alligator,
}

impl GatewayKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LamApi => "lamapi",
            Self::GeoNames => "geonames",
            Self::Sparql => "sparql",
            Self::Alligator => "alligator",
        }
    }

    /// Catch-all connector, good enough for any domain
    #[must_use]
    pub const fn is_general(&self) -> bool {
        matches!(self, Self::LamApi)
    }

    /// Low-latency lookup services preferred for large columns
    #[must_use]
    pub const fn is_fast(&self) -> bool {
        matches!(self, Self::LamApi | Self::GeoNames)
    }
}

impl std::fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of one knowledge base, loaded once at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: GatewayKind,
    /// Lookup endpoint
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub credentials: BTreeMap<String, String>,
    #[serde(default)]
    pub supported_column_types: Vec<ColumnType>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Lower number = preferred
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

const fn default_enabled() -> bool {
    true
}

const fn default_priority() -> u32 {
    99
}

impl KnowledgeBaseDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: GatewayKind, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            url: url.into(),
            credentials: BTreeMap::new(),
            supported_column_types: Vec::new(),
            enabled: true,
            priority: default_priority(),
            parameters: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_supported_types(mut self, types: Vec<ColumnType>) -> Self {
        self.supported_column_types = types;
        self
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_credential(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn supports(&self, column_type: ColumnType) -> bool {
        self.supported_column_types.contains(&column_type)
    }

    #[must_use]
    pub fn parameter_str(&self, key: &str) -> Option<String> {
        self.parameters.get(key).map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// On-disk shape of the knowledge base configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeBasesFile {
    pub knowledge_bases: Vec<KnowledgeBaseDescriptor>,
}

pub fn load_descriptors(path: &Path) -> Result<Vec<KnowledgeBaseDescriptor>> {
    let raw = std::fs::read_to_string(path)?;
    let file: KnowledgeBasesFile = serde_json::from_str(&raw)?;

    for descriptor in &file.knowledge_bases {
        if descriptor.name.trim().is_empty() {
            return Err(Error::Config("knowledge base with empty name".to_string()));
        }
    }

    let mut names: Vec<&str> = file.knowledge_bases.iter().map(|d| d.name.as_str()).collect();
    names.sort_unstable();
    if let Some(dup) = names.windows(2).find(|w| w[0] == w[1]) {
        return Err(Error::Config(format!("duplicate knowledge base name '{}'", dup[0])));
    }

    Ok(file.knowledge_bases)
}
