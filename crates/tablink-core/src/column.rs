use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnType {
    Person,
    Organization,
    Location,
    Event,
    /// Books, films, artworks and other creative works
    Work,
    Date,
    Numeric,
    /// Other text values
    Literal,
    Mixed,
    #[default]
    Unknown,
}

impl ColumnType {
    pub const ALL: [Self; 10] = [
        Self::Person,
        Self::Organization,
        Self::Location,
        Self::Event,
        Self::Work,
        Self::Date,
        Self::Numeric,
        Self::Literal,
        Self::Mixed,
        Self::Unknown,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "PERSON",
            Self::Organization => "ORGANIZATION",
            Self::Location => "LOCATION",
            Self::Event => "EVENT",
            Self::Work => "WORK",
            Self::Date => "DATE",
            Self::Numeric => "NUMERIC",
            Self::Literal => "LITERAL",
            Self::Mixed => "MIXED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Type names a knowledge base may use for the same concept.
    #[must_use]
    pub const fn related_type_names(&self) -> &'static [&'static str] {
        match self {
            Self::Person => &["HUMAN", "INDIVIDUAL", "PEOPLE"],
            Self::Location => &["PLACE", "GEOGRAPHICAL", "CITY", "COUNTRY"],
            Self::Organization => &["COMPANY", "INSTITUTION", "CORP"],
            Self::Work => &["FILM", "BOOK", "SONG", "ARTWORK"],
            Self::Event => &["OCCURRENCE", "COMPETITION"],
            _ => &[],
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ColumnType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == upper)
            .ok_or_else(|| Error::InvalidColumnType(s.to_string()))
    }
}

/// A table column whose cell values are to be linked.
///
/// The type may be assigned exactly once when the column starts as
/// [`ColumnType::Unknown`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableColumn {
    name: String,
    values: Vec<String>,
    column_type: ColumnType,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<usize>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
}

impl TableColumn {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Result<Self> {
        if values.is_empty() {
            return Err(Error::EmptyColumn);
        }
        Ok(Self {
            name: name.into(),
            values,
            column_type: ColumnType::Unknown,
            index: None,
            metadata: BTreeMap::new(),
        })
    }

    #[must_use]
    pub const fn with_type(mut self, column_type: ColumnType) -> Self {
        self.column_type = column_type;
        self
    }

    #[must_use]
    pub const fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn values(&self) -> &[String] {
        &self.values
    }

    #[must_use]
    pub const fn column_type(&self) -> ColumnType {
        self.column_type
    }

    #[must_use]
    pub const fn index(&self) -> Option<usize> {
        self.index
    }

    #[must_use]
    pub const fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    #[must_use]
    pub fn is_classified(&self) -> bool {
        self.column_type != ColumnType::Unknown
    }

    pub fn set_column_type(&mut self, column_type: ColumnType) -> Result<()> {
        if self.is_classified() {
            return Err(Error::ColumnTypeAlreadySet(self.column_type));
        }
        self.column_type = column_type;
        Ok(())
    }

    #[must_use]
    pub fn blank_count(&self) -> usize {
        self.values.iter().filter(|v| v.trim().is_empty()).count()
    }

    #[must_use]
    pub fn unique_count(&self) -> usize {
        self.values.iter().collect::<HashSet<_>>().len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Geography,
    Science,
    Entertainment,
    Business,
    General,
}

impl Domain {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Geography => "geography",
            Self::Science => "science",
            Self::Entertainment => "entertainment",
            Self::Business => "business",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnStatistics {
    pub total_values: usize,
    pub unique_values: usize,
    pub empty_values: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSource {
    /// Supplied by the caller alongside the column
    Provided,
    #[default]
    Inferred,
}

/// Surrounding table information used by planning and disambiguation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableContext {
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub sample_rows: Vec<BTreeMap<String, String>>,
    #[serde(default)]
    pub domain: Option<Domain>,
    #[serde(default)]
    pub column_type: Option<ColumnType>,
    #[serde(default)]
    pub statistics: ColumnStatistics,
    #[serde(default)]
    pub source: ContextSource,
}

impl TableContext {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.sample_rows.is_empty() && self.domain.is_none()
    }

    #[must_use]
    pub fn domain(&self) -> Domain {
        self.domain.unwrap_or(Domain::General)
    }

    #[must_use]
    pub fn is_provided(&self) -> bool {
        self.source == ContextSource::Provided
    }
}
