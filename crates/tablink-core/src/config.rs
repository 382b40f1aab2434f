use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const ENV_PREFIX: &str = "TABLINK_";

/// Upper bound of the random delay added to each retry backoff
pub(crate) const RETRY_JITTER: Duration = Duration::from_millis(100);

/// Capped exponential backoff for gateway calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    #[serde(with = "crate::result::duration_ms")]
    pub initial_backoff: Duration,
    #[serde(with = "crate::result::duration_ms")]
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay before the retry that follows the given (1-based) failed attempt.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let secs = self.initial_backoff.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Longest one retried call can take when every attempt runs into
    /// `per_attempt`, including the backoff and jitter between attempts.
    #[must_use]
    pub fn total_budget(&self, per_attempt: Duration) -> Duration {
        let attempts = self.max_attempts.max(1);
        (1..attempts).fold(per_attempt.saturating_mul(attempts), |total, attempt| {
            total
                .saturating_add(self.backoff_for(attempt))
                .saturating_add(RETRY_JITTER)
        })
    }
}

/// Tunables for one linking run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkingConfig {
    /// Mentions per retrieval batch when no plan overrides it
    pub batch_size: usize,
    /// A mention counts as successful for the quality gate at or above this
    pub min_confidence: f64,
    /// Reported alongside the verdict, not used to compute it
    pub min_success_rate: f64,
    pub validation_threshold: f64,
    pub ambiguity_threshold: f64,
    /// Candidates at or below this edit-distance score are dropped
    pub min_ed_score: f64,
    pub max_candidates_per_mention: usize,
    /// How many heuristic leaders the text generator may re-rank
    pub generation_top_k: usize,
    pub gateway_timeout_seconds: u64,
    pub generation_timeout_seconds: u64,
    pub retry: RetryPolicy,
    /// 0 means a medium verdict finalizes immediately
    pub max_reprocess_attempts: u32,
    pub request_retention_seconds: u64,
}

impl Default for LinkingConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            min_confidence: 0.6,
            min_success_rate: 0.7,
            validation_threshold: 0.6,
            ambiguity_threshold: 0.8,
            min_ed_score: 0.1,
            max_candidates_per_mention: 10,
            generation_top_k: 5,
            gateway_timeout_seconds: 30,
            generation_timeout_seconds: 30,
            retry: RetryPolicy::default(),
            max_reprocess_attempts: 0,
            request_retention_seconds: 3600,
        }
    }
}

impl LinkingConfig {
    #[must_use]
    pub const fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_seconds)
    }

    /// How long retrieval waits on one gateway for one mention. Covers every
    /// retry the gateway client may make under [`RetryPolicy`].
    #[must_use]
    pub fn retrieval_budget(&self) -> Duration {
        self.retry.total_budget(self.gateway_timeout())
    }

    #[must_use]
    pub const fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_seconds)
    }

    #[must_use]
    pub const fn request_retention(&self) -> Duration {
        Duration::from_secs(self.request_retention_seconds)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if self.max_candidates_per_mention == 0 {
            return Err(Error::Config(
                "max_candidates_per_mention must be at least 1".to_string(),
            ));
        }
        if self.generation_top_k > 5 {
            return Err(Error::Config("generation_top_k cannot exceed 5".to_string()));
        }
        for (name, value) in [
            ("min_confidence", self.min_confidence),
            ("min_success_rate", self.min_success_rate),
            ("validation_threshold", self.validation_threshold),
            ("ambiguity_threshold", self.ambiguity_threshold),
            ("min_ed_score", self.min_ed_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "{name} must be between 0 and 1, got {value}"
                )));
            }
        }
        if self.gateway_timeout_seconds == 0 || self.generation_timeout_seconds == 0 {
            return Err(Error::Config("timeouts must be non-zero".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Defaults overridden by `TABLINK_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            batch_size: env_or("BATCH_SIZE", defaults.batch_size)?,
            min_confidence: env_or("MIN_CONFIDENCE", defaults.min_confidence)?,
            min_success_rate: env_or("MIN_SUCCESS_RATE", defaults.min_success_rate)?,
            validation_threshold: env_or("VALIDATION_THRESHOLD", defaults.validation_threshold)?,
            ambiguity_threshold: env_or("AMBIGUITY_THRESHOLD", defaults.ambiguity_threshold)?,
            min_ed_score: env_or("MIN_ED_SCORE", defaults.min_ed_score)?,
            max_candidates_per_mention: env_or(
                "MAX_CANDIDATES",
                defaults.max_candidates_per_mention,
            )?,
            generation_top_k: env_or("GENERATION_TOP_K", defaults.generation_top_k)?,
            gateway_timeout_seconds: env_or("GATEWAY_TIMEOUT", defaults.gateway_timeout_seconds)?,
            generation_timeout_seconds: env_or(
                "GENERATION_TIMEOUT",
                defaults.generation_timeout_seconds,
            )?,
            retry: RetryPolicy {
                max_attempts: env_or("RETRY_ATTEMPTS", defaults.retry.max_attempts)?,
                ..defaults.retry
            },
            max_reprocess_attempts: env_or("MAX_REPROCESS", defaults.max_reprocess_attempts)?,
            request_retention_seconds: env_or(
                "REQUEST_RETENTION",
                defaults.request_retention_seconds,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Path of the knowledge base file, if configured.
    #[must_use]
    pub fn knowledge_base_path() -> Option<PathBuf> {
        env_var("KB_CONFIG").map(PathBuf::from)
    }
}

/// OpenAI-compatible chat completion endpoint used for re-ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub endpoint: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub disabled: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 1000,
            disabled: false,
        }
    }
}

impl GenerationConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            endpoint: env_var("GENERATION_ENDPOINT").unwrap_or(defaults.endpoint),
            api_key: env_var("GENERATION_API_KEY"),
            model: env_var("GENERATION_MODEL").unwrap_or(defaults.model),
            temperature: env_or("GENERATION_TEMPERATURE", defaults.temperature)?,
            max_tokens: env_or("GENERATION_MAX_TOKENS", defaults.max_tokens)?,
            disabled: env_var("GENERATION_DISABLED")
                .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true")),
        })
    }

    /// Generation runs only when enabled and credentialed.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.disabled && self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{key}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    env_var(key).map_or(Ok(default), |raw| {
        raw.trim()
            .parse()
            .map_err(|_| Error::Config(format!("{ENV_PREFIX}{key} has invalid value '{raw}'")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LinkingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_reprocess_attempts, 0);
    }

    #[test]
    fn test_validate_rejects_out_of_range_threshold() {
        let config = LinkingConfig {
            min_confidence: 1.2,
            ..LinkingConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_confidence"));
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let config = LinkingConfig {
            batch_size: 0,
            ..LinkingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(10), Duration::from_secs(10));
    }

    #[test]
    fn test_retrieval_budget_covers_every_attempt() {
        let config = LinkingConfig::default();
        // 3 x 30s attempts, 1s + 2s backoff, 2 x 100ms jitter
        assert_eq!(config.retrieval_budget(), Duration::from_millis(93_200));
        assert!(config.retrieval_budget() > config.gateway_timeout() * 3);

        let single = LinkingConfig {
            retry: RetryPolicy::none(),
            ..LinkingConfig::default()
        };
        assert_eq!(single.retrieval_budget(), single.gateway_timeout());
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: LinkingConfig =
            serde_json::from_str(r#"{"batch_size": 10, "max_reprocess_attempts": 2}"#).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_reprocess_attempts, 2);
        assert!((config.validation_threshold - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn test_generation_requires_key() {
        let mut config = GenerationConfig::default();
        assert!(!config.is_enabled());
        config.api_key = Some("sk-test".into());
        assert!(config.is_enabled());
        config.disabled = true;
        assert!(!config.is_enabled());
    }

    #[test]
    fn test_generation_key_not_serialized() {
        let config = GenerationConfig {
            api_key: Some("sk-secret".into()),
            ..GenerationConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-secret"));
    }
}
