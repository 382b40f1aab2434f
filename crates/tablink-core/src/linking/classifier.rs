use std::collections::BTreeMap;

use regex::Regex;

use crate::column::{ColumnStatistics, ColumnType, ContextSource, Domain, TableColumn, TableContext};
use crate::error::{Error, Result};
use crate::generation::TextGenerationService;

/// Values inspected by the pattern checks
const SAMPLE_SIZE: usize = 5;
/// Rows copied into an inferred context
const CONTEXT_ROWS: usize = 3;

const TYPE_KEYWORDS: &[(ColumnType, &[&str])] = &[
    (ColumnType::Location, &["city", "location", "place", "country", "state"]),
    (ColumnType::Person, &["person", "name", "author", "scientist", "people"]),
    (ColumnType::Organization, &["company", "organization", "org", "institution"]),
    (ColumnType::Work, &["movie", "film", "book", "song", "work", "title"]),
    (ColumnType::Event, &["event", "tournament", "competition", "festival"]),
    (ColumnType::Date, &["date", "year", "born", "founded"]),
    (ColumnType::Numeric, &["count", "amount", "population", "price", "total"]),
];

const DOMAIN_KEYWORDS: &[(Domain, &[&str])] = &[
    (Domain::Geography, &["city", "country", "location", "place"]),
    (Domain::Science, &["scientist", "person", "author", "researcher"]),
    (Domain::Entertainment, &["movie", "film", "book", "entertainment"]),
    (Domain::Business, &["company", "business", "organization"]),
];

const KNOWN_PLACES: &[&str] = &["paris", "london", "berlin", "tokyo", "rome", "madrid", "moscow"];
const KNOWN_PEOPLE: &[&str] = &["einstein", "newton", "tesla", "darwin", "shakespeare"];

const CLASSIFY_SYSTEM_PROMPT: &str = "You classify table columns for entity linking. \
Answer with exactly one of: PERSON, ORGANIZATION, LOCATION, EVENT, WORK, DATE, NUMERIC, LITERAL, MIXED.";

/// A regex that, when every sampled value matches, decides the column type
pub struct ValuePattern {
    pub column_type: ColumnType,
    pub regex: Regex,
}

impl ValuePattern {
    pub fn new(column_type: ColumnType, pattern: &str) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            column_type,
            regex: Regex::new(pattern)?,
        })
    }
}

/// Deterministic column type and table context inference.
pub struct ColumnClassifier {
    patterns: Vec<ValuePattern>,
}

impl ColumnClassifier {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_pattern(mut self, pattern: ValuePattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    #[must_use]
    pub fn with_default_patterns() -> Self {
        let mut classifier = Self::new();

        let numeric = ValuePattern::new(ColumnType::Numeric, r"^[-+]?\d{1,3}(,\d{3})*(\.\d+)?$|^[-+]?\d+(\.\d+)?$");
        let date = ValuePattern::new(
            ColumnType::Date,
            r"^(\d{4}-\d{1,2}-\d{1,2}|\d{1,2}/\d{1,2}/\d{2,4}|\d{1,2}\.\d{1,2}\.\d{4})$",
        );

        if let Ok(p) = date {
            classifier.patterns.push(p);
        }
        if let Ok(p) = numeric {
            classifier.patterns.push(p);
        }

        classifier
    }

    /// Returns the declared type, or infers one when the column is unclassified.
    #[must_use]
    pub fn classify(&self, column: &TableColumn) -> ColumnType {
        if column.is_classified() {
            return column.column_type();
        }

        keyword_type(column.name())
            .or_else(|| self.sample_type(column))
            .unwrap_or(ColumnType::Literal)
    }

    /// Like [`classify`](Self::classify) but asks the generator before the
    /// value heuristics. Unusable answers fall back silently.
    pub async fn classify_with(
        &self,
        column: &TableColumn,
        generator: &dyn TextGenerationService,
    ) -> ColumnType {
        if column.is_classified() {
            return column.column_type();
        }
        if let Some(t) = keyword_type(column.name()) {
            return t;
        }

        let samples = samples(column).join(", ");
        let prompt = format!("Column name: {}\nSample values: {samples}", column.name());
        match generator.generate(CLASSIFY_SYSTEM_PROMPT, &prompt).await {
            Ok(answer) => match answer.trim().trim_matches('.').parse::<ColumnType>() {
                Ok(t) if t != ColumnType::Unknown => return t,
                _ => tracing::warn!("Ignoring unusable column type answer '{}'", answer.trim()),
            },
            Err(e) => tracing::warn!("Column type generation failed, using heuristics: {}", e),
        }

        self.sample_type(column).unwrap_or(ColumnType::Literal)
    }

    fn sample_type(&self, column: &TableColumn) -> Option<ColumnType> {
        let samples = samples(column);
        if samples.is_empty() {
            return None;
        }

        for pattern in &self.patterns {
            if samples.iter().all(|s| pattern.regex.is_match(s)) {
                return Some(pattern.column_type);
            }
        }

        for value in &samples {
            let lower = value.to_lowercase();
            if is_title_case(value)
                && value.split_whitespace().count() <= 2
                && KNOWN_PLACES.contains(&lower.as_str())
            {
                return Some(ColumnType::Location);
            }
            if KNOWN_PEOPLE.iter().any(|p| lower.contains(p)) {
                return Some(ColumnType::Person);
            }
        }

        None
    }

    /// Builds the table context for a column.
    ///
    /// A caller-supplied context is kept as long as it lists the column among
    /// its headers; otherwise one is inferred from the column itself.
    pub fn extract_context(
        &self,
        column: &TableColumn,
        column_type: ColumnType,
        provided: Option<&TableContext>,
    ) -> Result<TableContext> {
        let statistics = ColumnStatistics {
            total_values: column.values().len(),
            unique_values: column.unique_count(),
            empty_values: column.blank_count(),
        };

        if let Some(provided) = provided {
            if !provided.headers.iter().any(|h| h == column.name()) {
                return Err(Error::ContextMismatch(column.name().to_string()));
            }
            let mut context = provided.clone();
            context.source = ContextSource::Provided;
            context.domain = Some(context.domain.unwrap_or_else(|| infer_domain(column.name())));
            context.column_type = Some(column_type);
            if context.statistics == ColumnStatistics::default() {
                context.statistics = statistics;
            }
            return Ok(context);
        }

        let sample_rows = column
            .values()
            .iter()
            .take(CONTEXT_ROWS)
            .map(|v| BTreeMap::from([(column.name().to_string(), v.clone())]))
            .collect();

        Ok(TableContext {
            headers: vec![column.name().to_string()],
            sample_rows,
            domain: Some(infer_domain(column.name())),
            column_type: Some(column_type),
            statistics,
            source: ContextSource::Inferred,
        })
    }
}

impl Default for ColumnClassifier {
    fn default() -> Self {
        Self::with_default_patterns()
    }
}

fn keyword_type(column_name: &str) -> Option<ColumnType> {
    let name = column_name.to_lowercase();
    TYPE_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| name.contains(k)))
        .map(|(t, _)| *t)
}

#[must_use]
pub fn infer_domain(column_name: &str) -> Domain {
    let name = column_name.to_lowercase();
    DOMAIN_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| name.contains(k)))
        .map_or(Domain::General, |(d, _)| *d)
}

fn samples(column: &TableColumn) -> Vec<&str> {
    column
        .values()
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .take(SAMPLE_SIZE)
        .collect()
}

fn is_title_case(value: &str) -> bool {
    value
        .split_whitespace()
        .all(|w| w.chars().next().is_some_and(char::is_uppercase))
}
