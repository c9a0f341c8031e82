//! Pipeline configuration
//!
//! Loaded from TOML. Every threshold is a named, tunable value; the evaluation
//! mode has no default and must be chosen explicitly.
//!
//! ```toml
//! evaluation_mode = "strict"
//! max_refinement_rounds = 3
//! restart_policy = "triggering-story"
//!
//! [thresholds]
//! merge_confidence = 0.8
//! fix_apply_confidence = 0.85
//!
//! [retry]
//! max_attempts = 3
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use weave_gateway::{BackendConfig, RetryPolicy};

/// Hard cap on refinement rounds
pub const MAX_REFINEMENT_ROUNDS: u32 = 3;

/// Upper bound on `retry.max_delay_ms` (one hour)
pub const MAX_RETRY_DELAY_MS: u64 = 60 * 60 * 1000;

/// How judge crashes are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationMode {
    /// A crashed judge call fails the run
    Strict,
    /// A crashed judge call degrades that story only
    Lenient,
}

impl EvaluationMode {
    /// Whether a judge crash aborts the run
    #[inline]
    #[must_use]
    pub fn is_strict(self) -> bool {
        matches!(self, Self::Strict)
    }
}

impl std::str::FromStr for EvaluationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Self::Strict),
            "lenient" => Ok(Self::Lenient),
            other => Err(ConfigError::invalid(
                "evaluation_mode",
                format!("'{other}' is neither 'strict' nor 'lenient'"),
            )),
        }
    }
}

/// Which stories regenerate after a context merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Only stories whose judging produced merged relationships
    #[default]
    TriggeringStory,
    /// Every story sharing the context
    AllStories,
}

/// Confidence and score cutoffs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Minimum relationship confidence merged into shared context
    #[serde(alias = "mergeConfidence")]
    pub merge_confidence: f64,
    /// Minimum fix confidence applied automatically
    #[serde(alias = "fixApplyConfidence")]
    pub fix_apply_confidence: f64,
    /// Minimum overall score approved without rewrite
    #[serde(alias = "approveScore")]
    pub approve_score: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            merge_confidence: 0.8,
            fix_apply_confidence: 0.85,
            approve_score: 3.5,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Strict or lenient judge-crash handling
    #[serde(alias = "evaluationMode")]
    pub evaluation_mode: EvaluationMode,
    /// Decision cutoffs
    #[serde(default)]
    pub thresholds: Thresholds,
    /// Refinement round bound (1..=3)
    #[serde(default = "default_rounds", alias = "maxRefinementRounds")]
    pub max_refinement_rounds: u32,
    /// Regeneration scope after a context merge
    #[serde(default, alias = "restartPolicy")]
    pub restart_policy: RestartPolicy,
    /// Concurrent calls per fan-out
    #[serde(default = "default_concurrency", alias = "maxConcurrency")]
    pub max_concurrency: usize,
    /// Gateway retry policy
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Backend settings
    #[serde(default)]
    pub backend: BackendConfig,
}

fn default_rounds() -> u32 {
    MAX_REFINEMENT_ROUNDS
}

fn default_concurrency() -> usize {
    4
}

impl PipelineConfig {
    /// Create configuration with defaults for everything but the mode
    #[must_use]
    pub fn new(evaluation_mode: EvaluationMode) -> Self {
        Self {
            evaluation_mode,
            thresholds: Thresholds::default(),
            max_refinement_rounds: default_rounds(),
            restart_policy: RestartPolicy::default(),
            max_concurrency: default_concurrency(),
            retry: RetryPolicy::default(),
            backend: BackendConfig::default(),
        }
    }

    /// With thresholds
    #[inline]
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// With refinement round bound
    #[inline]
    #[must_use]
    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_refinement_rounds = rounds;
        self
    }

    /// With restart policy
    #[inline]
    #[must_use]
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    /// With concurrency limit
    #[inline]
    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit;
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Parse from TOML text
    ///
    /// # Errors
    /// Returns error on malformed TOML, a missing evaluation mode or an
    /// out-of-range value
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = text.parse()?;
        Self::from_table(table, None)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is invalid
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Resolve the run configuration from an optional file and an optional
    /// mode override; one of them must choose the evaluation mode
    ///
    /// # Errors
    /// Returns error if the file is unreadable or invalid, or no mode is chosen
    pub fn resolve(path: Option<&Path>, mode: Option<EvaluationMode>) -> Result<Self, ConfigError> {
        let table = match path {
            Some(path) => std::fs::read_to_string(path)
                .map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?
                .parse()?,
            None => toml::Table::new(),
        };
        Self::from_table(table, mode)
    }

    /// Build from a TOML table, letting `mode` override the file's choice
    ///
    /// # Errors
    /// Returns error if no mode is chosen anywhere or a value is invalid
    pub fn from_table(
        mut table: toml::Table,
        mode: Option<EvaluationMode>,
    ) -> Result<Self, ConfigError> {
        if let Some(mode) = mode {
            table.remove("evaluationMode");
            let value = match mode {
                EvaluationMode::Strict => "strict",
                EvaluationMode::Lenient => "lenient",
            };
            table.insert("evaluation_mode".into(), toml::Value::String(value.into()));
        }
        if !table.contains_key("evaluation_mode") && !table.contains_key("evaluationMode") {
            return Err(ConfigError::MissingEvaluationMode);
        }
        let config: Self = toml::Value::Table(table).try_into()?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value is in range
    ///
    /// # Errors
    /// Returns the first out-of-range field
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |field, value: f64| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::invalid(field, format!("{value} is outside [0, 1]")))
            }
        };
        unit("thresholds.merge_confidence", self.thresholds.merge_confidence)?;
        unit("thresholds.fix_apply_confidence", self.thresholds.fix_apply_confidence)?;
        unit("retry.jitter_fraction", self.retry.jitter_fraction)?;

        if !(0.0..=5.0).contains(&self.thresholds.approve_score) {
            return Err(ConfigError::invalid(
                "thresholds.approve_score",
                format!("{} is outside [0, 5]", self.thresholds.approve_score),
            ));
        }
        if !(1..=MAX_REFINEMENT_ROUNDS).contains(&self.max_refinement_rounds) {
            return Err(ConfigError::invalid(
                "max_refinement_rounds",
                format!(
                    "{} is outside 1..={MAX_REFINEMENT_ROUNDS}",
                    self.max_refinement_rounds
                ),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::invalid("max_concurrency", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.max_delay_ms > MAX_RETRY_DELAY_MS {
            return Err(ConfigError::invalid(
                "retry.max_delay_ms",
                format!("{} exceeds {MAX_RETRY_DELAY_MS}", self.retry.max_delay_ms),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::invalid(
                "retry.base_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_uses_defaults() {
        let config = PipelineConfig::from_toml_str("evaluation_mode = \"lenient\"").unwrap();
        assert_eq!(config, PipelineConfig::new(EvaluationMode::Lenient));
        assert_eq!(config.thresholds.merge_confidence, 0.8);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn mode_is_required() {
        assert!(matches!(
            PipelineConfig::from_toml_str("max_concurrency = 2"),
            Err(ConfigError::MissingEvaluationMode)
        ));
    }

    #[test]
    fn explicit_mode_overrides_file() {
        let table: toml::Table = "evaluationMode = \"lenient\"".parse().unwrap();
        let config = PipelineConfig::from_table(table, Some(EvaluationMode::Strict)).unwrap();
        assert_eq!(config.evaluation_mode, EvaluationMode::Strict);
    }

    #[test]
    fn nested_sections_parse() {
        let config = PipelineConfig::from_toml_str(
            r#"
            evaluation_mode = "strict"
            restart_policy = "all-stories"
            max_refinement_rounds = 2

            [thresholds]
            merge_confidence = 0.75

            [retry]
            max_attempts = 5
            jitter_fraction = 0.1

            [backend]
            model = "test-model"
            "#,
        )
        .unwrap();
        assert_eq!(config.restart_policy, RestartPolicy::AllStories);
        assert_eq!(config.max_refinement_rounds, 2);
        assert_eq!(config.thresholds.merge_confidence, 0.75);
        assert_eq!(config.thresholds.fix_apply_confidence, 0.85);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.backend.model, "test-model");
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let bad = [
            "evaluation_mode = \"strict\"\nmax_refinement_rounds = 4",
            "evaluation_mode = \"strict\"\nmax_refinement_rounds = 0",
            "evaluation_mode = \"strict\"\nmax_concurrency = 0",
            "evaluation_mode = \"strict\"\n[thresholds]\nmerge_confidence = 1.5",
            "evaluation_mode = \"strict\"\n[thresholds]\napprove_score = 6.0",
            "evaluation_mode = \"strict\"\n[retry]\nmax_attempts = 0",
            "evaluation_mode = \"strict\"\n[retry]\nmax_delay_ms = 9223372036854775807",
            "evaluation_mode = \"strict\"\n[retry]\nmax_delay_ms = 3600001",
        ];
        for text in bad {
            assert!(
                matches!(PipelineConfig::from_toml_str(text), Err(ConfigError::Invalid { .. })),
                "accepted: {text}"
            );
        }
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!("relaxed".parse::<EvaluationMode>().is_err());
        assert!(PipelineConfig::from_toml_str("evaluation_mode = \"relaxed\"").is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weave.toml");
        std::fs::write(&path, "evaluation_mode = \"strict\"\nmax_concurrency = 8\n").unwrap();
        let config = PipelineConfig::from_path(&path).unwrap();
        assert_eq!(config.max_concurrency, 8);
        assert!(matches!(
            PipelineConfig::from_path(dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn resolve_needs_a_mode_from_somewhere() {
        assert!(matches!(
            PipelineConfig::resolve(None, None),
            Err(ConfigError::MissingEvaluationMode)
        ));
        let config = PipelineConfig::resolve(None, Some(EvaluationMode::Lenient)).unwrap();
        assert_eq!(config, PipelineConfig::new(EvaluationMode::Lenient));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weave.toml");
        std::fs::write(&path, "evaluation_mode = \"strict\"\n[thresholds]\nfix_apply_confidence = 0.9\n").unwrap();
        let config = PipelineConfig::resolve(Some(&path), None).unwrap();
        assert_eq!(config.evaluation_mode, EvaluationMode::Strict);
        assert_eq!(config.thresholds.fix_apply_confidence, 0.9);
    }
}
