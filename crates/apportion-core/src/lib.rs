//! Apportion Core Library
//!
//! The split-pattern intelligence engine for the Apportion expense tool:
//! - Incremental statistical learning of how purchases are split across
//!   tax/use categories (weighted-average pattern updates)
//! - Confidence estimation from sample size and variance
//! - Anomaly scoring over split batches (multiple ordered heuristics)
//! - Differential-privacy noise injection for training data
//! - Jurisdiction-style tax-compliance guidance on suggested splits
//! - Bounded TTL suggestion cache with oldest-entry eviction
//! - Engine lifecycle state machine behind a single serialized owner
//!
//! The engine is a library-level component: forms, importers, dashboards,
//! and review tooling call it in-process. It performs no network I/O; its
//! only persistence is the learned pattern store.

pub mod analyzer;
pub mod cache;
pub mod compliance;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod privacy;
pub mod store;

pub use analyzer::{map_category, PatternAnalyzer};
pub use cache::SuggestionCache;
pub use compliance::{ComplianceChecker, NoopComplianceChecker, RuleBasedComplianceChecker};
pub use config::{
    AnalyzerConfig, AnomalyConfig, CacheConfig, ComplianceConfig, EngineConfig, PrivacyConfig,
};
pub use db::Database;
pub use engine::{CancelFlag, EngineMetrics, IntelligenceEngine};
pub use error::{Error, Result};
pub use models::{
    AnalysisReport, AnomalyReport, AnomalyType, BatchSuggestionReport, DeductibilityStatus,
    DetectedAnomaly, EngineState, PatternType, PrivacyComplianceReport, RecognizedPattern,
    RiskTier, SplitAllocation, SplitObservation, SplitSuggestion, SuggestedSplit,
    TaxComplianceResult, Transaction,
};
pub use privacy::{DifferentialPrivacyGuard, NoopPrivacyGuard, PrivacyGuard};
pub use store::{LearningMetrics, PatternStore};
