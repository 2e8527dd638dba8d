//! Engine tuning configuration
//!
//! Every heuristic constant in the engine (confidence coefficients, anomaly
//! thresholds, default percentages, privacy penalties, cache bounds) lives
//! here instead of inline in the algorithms, so the values can be tuned and
//! tested independently.
//!
//! ## Configuration Resolution
//!
//! Config is loaded with a two-layer resolution:
//! 1. Check for override in data dir (~/.local/share/apportion/config/engine.toml)
//! 2. Fall back to embedded defaults (compiled into binary)

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::PatternType;

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/engine.toml");

/// Pattern analysis tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Minimum observations of a category before a pattern is recognized
    pub min_pattern_frequency: usize,
    /// Confidence at or above this marks a pattern reliable
    pub confidence_threshold: f64,
    /// Sample-size term: min(1, n / sample_size_factor)
    pub sample_size_factor: f64,
    /// Variance term: max(min_variance_weight, 1 - variance / variance_normalizer)
    pub variance_normalizer: f64,
    pub min_variance_weight: f64,
    /// Confidence assigned to fallback (default-table) suggestions
    pub fallback_confidence: f64,
    /// Default business-use percentage per pattern type
    pub default_percentages: TypeTable,
    /// Per-type weights for the overall batch confidence
    pub type_weights: TypeTable,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_pattern_frequency: 3,
            confidence_threshold: 0.7,
            sample_size_factor: 10.0,
            variance_normalizer: 1000.0,
            min_variance_weight: 0.1,
            fallback_confidence: 0.6,
            default_percentages: TypeTable {
                business_expense: 80.0,
                home_office: 25.0,
                personal_expense: 5.0,
                mixed_use: 50.0,
                investment: 60.0,
                unknown: 50.0,
            },
            type_weights: TypeTable {
                business_expense: 1.0,
                home_office: 0.85,
                personal_expense: 0.7,
                mixed_use: 0.8,
                investment: 0.9,
                unknown: 0.5,
            },
        }
    }
}

/// A per-pattern-type value table
///
/// Named fields instead of a map so adding a `PatternType` variant is a
/// compile error here rather than a silent missing key.
#[derive(Debug, Clone, Deserialize)]
pub struct TypeTable {
    pub business_expense: f64,
    pub home_office: f64,
    pub personal_expense: f64,
    pub mixed_use: f64,
    pub investment: f64,
    pub unknown: f64,
}

impl TypeTable {
    pub fn get(&self, pattern_type: PatternType) -> f64 {
        match pattern_type {
            PatternType::BusinessExpense => self.business_expense,
            PatternType::HomeOffice => self.home_office,
            PatternType::PersonalExpense => self.personal_expense,
            PatternType::MixedUse => self.mixed_use,
            PatternType::Investment => self.investment,
            PatternType::Unknown => self.unknown,
        }
    }
}

/// Anomaly detection thresholds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Allocation percentages may deviate from 100 by this much
    pub percentage_tolerance: f64,
    /// More allocations than this is a complex split
    pub max_allocations: usize,
    pub complex_split_score: f64,
    /// Amounts above this magnitude are extreme
    pub extreme_amount_threshold: f64,
    pub extreme_amount_score: f64,
    /// Tiered false-positive estimate from the overall detection rate
    pub high_detection_rate: f64,
    pub high_false_positive_rate: f64,
    pub elevated_detection_rate: f64,
    pub elevated_false_positive_rate: f64,
    pub baseline_false_positive_rate: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            percentage_tolerance: 1.0,
            max_allocations: 4,
            complex_split_score: 0.7,
            extreme_amount_threshold: 10_000.0,
            extreme_amount_score: 0.6,
            high_detection_rate: 0.2,
            high_false_positive_rate: 0.3,
            elevated_detection_rate: 0.1,
            elevated_false_positive_rate: 0.15,
            baseline_false_positive_rate: 0.05,
        }
    }
}

/// Privacy guard configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    pub privacy_mode: bool,
    pub differential_privacy: bool,
    pub data_minimization: bool,
    /// Differential-privacy budget; lower epsilon means more noise
    pub epsilon: f64,
    /// Laplace mechanism sensitivity for transaction amounts
    pub sensitivity: f64,
    /// Score deductions for disabled protections
    pub privacy_mode_penalty: f64,
    pub differential_privacy_penalty: f64,
    pub data_minimization_penalty: f64,
    /// Posture is compliant at or above this score
    pub compliance_floor: f64,
    /// Refuse to serve when the startup posture check fails
    pub require_compliant_startup: bool,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            privacy_mode: true,
            differential_privacy: true,
            data_minimization: true,
            epsilon: 1.0,
            sensitivity: 100.0,
            privacy_mode_penalty: 0.3,
            differential_privacy_penalty: 0.2,
            data_minimization_penalty: 0.1,
            compliance_floor: 0.95,
            require_compliant_startup: true,
        }
    }
}

/// Compliance checker amount bands
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ComplianceConfig {
    pub medium_risk_amount: f64,
    pub high_risk_amount: f64,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            medium_risk_amount: 5_000.0,
            high_risk_amount: 10_000.0,
        }
    }
}

/// Suggestion cache bounds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds before a cached suggestion expires
    pub ttl_secs: u64,
    /// Maximum cached suggestions before oldest-entry eviction
    pub capacity: usize,
    /// Amounts are rounded down to the nearest bucket for fingerprinting
    pub amount_bucket: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            capacity: 100,
            amount_bucket: 100.0,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub analyzer: AnalyzerConfig,
    pub anomaly: AnomalyConfig,
    pub privacy: PrivacyConfig,
    pub compliance: ComplianceConfig,
    pub cache: CacheConfig,
}

impl EngineConfig {
    /// Load config with the two-layer resolution (override file, then
    /// embedded defaults)
    pub fn load() -> Result<Self> {
        if let Some(path) = default_config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Self::parse(DEFAULT_CONFIG)
    }

    /// Load config from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config(format!("invalid engine config: {}", e)))
    }
}

/// Path to the user override config, if a data dir exists
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("apportion").join("config").join("engine.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults_parse() {
        let config = EngineConfig::parse(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.analyzer.min_pattern_frequency, 3);
        assert_eq!(config.analyzer.confidence_threshold, 0.7);
        assert_eq!(config.cache.capacity, 100);
        assert_eq!(config.privacy.epsilon, 1.0);
    }

    #[test]
    fn test_embedded_matches_code_defaults() {
        // The shipped TOML and the in-code defaults must agree, otherwise
        // behavior depends on which layer happened to load.
        let parsed = EngineConfig::parse(DEFAULT_CONFIG).unwrap();
        let coded = EngineConfig::default();
        assert_eq!(
            parsed.analyzer.min_pattern_frequency,
            coded.analyzer.min_pattern_frequency
        );
        assert_eq!(
            parsed.anomaly.extreme_amount_threshold,
            coded.anomaly.extreme_amount_threshold
        );
        assert_eq!(parsed.privacy.compliance_floor, coded.privacy.compliance_floor);
        assert_eq!(parsed.cache.ttl_secs, coded.cache.ttl_secs);
        assert_eq!(
            parsed.compliance.high_risk_amount,
            coded.compliance.high_risk_amount
        );
    }

    #[test]
    fn test_partial_override() {
        let config = EngineConfig::parse(
            r#"
            [analyzer]
            min_pattern_frequency = 5

            [cache]
            ttl_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.analyzer.min_pattern_frequency, 5);
        assert_eq!(config.cache.ttl_secs, 60);
        // Untouched sections keep defaults
        assert_eq!(config.analyzer.confidence_threshold, 0.7);
        assert_eq!(config.cache.capacity, 100);
        assert_eq!(config.privacy.sensitivity, 100.0);
    }

    #[test]
    fn test_type_table_lookup() {
        let config = AnalyzerConfig::default();
        assert_eq!(
            config.default_percentages.get(PatternType::BusinessExpense),
            80.0
        );
        assert_eq!(config.default_percentages.get(PatternType::Unknown), 50.0);
        assert!(
            config.type_weights.get(PatternType::BusinessExpense)
                > config.type_weights.get(PatternType::Unknown)
        );
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = EngineConfig::parse("analyzer = 12").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
