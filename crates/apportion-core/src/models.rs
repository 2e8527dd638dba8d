//! Core data model for the split-pattern intelligence engine
//!
//! Inputs (`Transaction`, `SplitAllocation`) are consumed read-only from the
//! surrounding application. Learned state (`RecognizedPattern`) is owned by
//! the engine's pattern store. Everything else is ephemeral output:
//! anomalies, suggestions, and the aggregate reports returned by engine
//! operations.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A financial transaction, as seen by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub date: NaiveDate,
    pub description: String,
    /// Negative = expense, positive = income
    pub amount: f64,
    /// Free-text category label; absent means "unknown"
    pub category: Option<String>,
}

impl Transaction {
    /// Convenience constructor for callers assembling transactions in-process
    pub fn new(id: i64, date: NaiveDate, description: &str, amount: f64) -> Self {
        Self {
            id,
            date,
            description: description.to_string(),
            amount,
            category: None,
        }
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }
}

/// A portion of a transaction's cost assigned to a use/tax category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitAllocation {
    pub id: i64,
    pub transaction_id: i64,
    /// Percentage of the transaction amount, 0-100
    pub percentage: f64,
    /// Use/tax category this portion is assigned to
    pub category: String,
}

impl SplitAllocation {
    pub fn new(id: i64, transaction_id: i64, percentage: f64, category: &str) -> Self {
        Self {
            id,
            transaction_id,
            percentage,
            category: category.to_string(),
        }
    }
}

/// A transaction together with its split allocations
///
/// The unit consumed by training and anomaly detection. Allocation
/// percentages should sum to 100; a violation is an anomaly signal, not a
/// rejected input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitObservation {
    pub transaction: Transaction,
    pub allocations: Vec<SplitAllocation>,
}

impl SplitObservation {
    pub fn new(transaction: Transaction, allocations: Vec<SplitAllocation>) -> Self {
        Self {
            transaction,
            allocations,
        }
    }
}

/// Coarse classification of how a transaction's cost is typically split
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    BusinessExpense,
    HomeOffice,
    PersonalExpense,
    MixedUse,
    Investment,
    Unknown,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BusinessExpense => "business_expense",
            Self::HomeOffice => "home_office",
            Self::PersonalExpense => "personal_expense",
            Self::MixedUse => "mixed_use",
            Self::Investment => "investment",
            Self::Unknown => "unknown",
        }
    }

    pub fn all() -> &'static [PatternType] {
        &[
            Self::BusinessExpense,
            Self::HomeOffice,
            Self::PersonalExpense,
            Self::MixedUse,
            Self::Investment,
            Self::Unknown,
        ]
    }
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PatternType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "business_expense" => Ok(Self::BusinessExpense),
            "home_office" => Ok(Self::HomeOffice),
            "personal_expense" => Ok(Self::PersonalExpense),
            "mixed_use" => Ok(Self::MixedUse),
            "investment" => Ok(Self::Investment),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Unknown pattern type: {}", s)),
        }
    }
}

/// A learned split pattern, aggregated over observed transactions
///
/// Created on the first observation of its pattern type, then updated in
/// place by a frequency-weighted average on every later learning call.
/// Never deleted except by an explicit clear-all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizedPattern {
    pub pattern_type: PatternType,
    /// Running average business-use percentage, 0-100
    pub average_business_percentage: f64,
    /// Number of observations folded into this pattern
    pub frequency: u32,
    /// 0-1, derived from sample size and variance
    pub confidence_level: f64,
    /// Confidence at or above the reliability threshold
    pub is_reliable: bool,
    pub last_updated: DateTime<Utc>,
}

/// Kinds of irregularities detected over split batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    /// Allocation percentages do not sum to 100
    UnusualSplitPercentage,
    /// Category does not match historical expectations
    UnexpectedCategory,
    /// More allocations than a typical split carries
    ComplexSplitPattern,
    /// Amount far above the usual range
    ExtremeAmount,
    /// Category appearing at an unusual rate
    FrequencyAnomaly,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnusualSplitPercentage => "unusual_split_percentage",
            Self::UnexpectedCategory => "unexpected_category",
            Self::ComplexSplitPattern => "complex_split_pattern",
            Self::ExtremeAmount => "extreme_amount",
            Self::FrequencyAnomaly => "frequency_anomaly",
        }
    }
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AnomalyType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "unusual_split_percentage" => Ok(Self::UnusualSplitPercentage),
            "unexpected_category" => Ok(Self::UnexpectedCategory),
            "complex_split_pattern" => Ok(Self::ComplexSplitPattern),
            "extreme_amount" => Ok(Self::ExtremeAmount),
            "frequency_anomaly" => Ok(Self::FrequencyAnomaly),
            _ => Err(format!("Unknown anomaly type: {}", s)),
        }
    }
}

/// An irregular transaction/split flagged during detection
///
/// Ephemeral: the engine does not persist anomalies, the caller decides
/// retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedAnomaly {
    /// Deterministic per (type, transaction) so repeated runs agree
    pub id: String,
    pub transaction_id: i64,
    pub anomaly_type: AnomalyType,
    /// Heuristic severity, 0-1
    pub score: f64,
    pub description: String,
}

/// One suggested (percentage, category) slice of a split suggestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestedSplit {
    pub percentage: f64,
    pub category: String,
    pub confidence: f64,
}

/// A confidence-scored split suggestion for a single transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitSuggestion {
    pub id: String,
    pub splits: Vec<SuggestedSplit>,
    /// Overall confidence, 0-1
    pub confidence: f64,
    pub reasoning: String,
    pub privacy_compliant: bool,
    pub tax_compliant: bool,
    /// True when confidence is below the reliability threshold
    pub needs_review: bool,
    /// Drives cache TTL
    pub created_at: DateTime<Utc>,
}

/// Engine lifecycle state
///
/// Exactly one of these holds at any instant; the orchestrator is the
/// single owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Initializing,
    Ready,
    Training,
    Analyzing,
    Error(String),
}

impl EngineState {
    /// Variant name without the error payload
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Training => "training",
            Self::Analyzing => "analyzing",
            Self::Error(_) => "error",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error(reason) => write!(f, "error: {}", reason),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// A category group that could not be analyzed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryError {
    pub category: String,
    pub message: String,
}

/// Result of analyzing (or learning from) a batch of observations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub patterns: Vec<RecognizedPattern>,
    /// Frequency-weighted average of pattern confidences, 0-1
    pub overall_confidence: f64,
    /// Category groups that failed analysis (batch continued regardless)
    pub errors: Vec<CategoryError>,
    /// Category groups that met the observation floor
    pub analyzed_groups: usize,
    /// Category groups below the observation floor, silently skipped
    pub skipped_groups: usize,
}

impl AnalysisReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Result of an anomaly-detection pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub anomalies: Vec<DetectedAnomaly>,
    pub transactions_checked: usize,
    /// Mean anomaly score over flagged transactions
    pub mean_score: f64,
    /// Fraction of checked transactions that were flagged
    pub detection_rate: f64,
    /// Tiered heuristic estimate, not statistically validated
    pub estimated_false_positive_rate: f64,
}

/// Per-item timing stats for a batch suggestion run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchTiming {
    pub total_ms: u64,
    pub avg_item_ms: f64,
    pub max_item_ms: u64,
}

/// Result of a sequential batch suggestion run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSuggestionReport {
    pub processed: usize,
    /// Items that produced a suggestion
    pub succeeded: usize,
    /// Items that errored (the batch continued)
    pub failed: usize,
    /// Items with no suggestion available (not failures)
    pub without_suggestion: usize,
    /// Mean confidence over produced suggestions
    pub average_confidence: f64,
    pub failure_rate: f64,
    pub timing: BatchTiming,
    pub suggestions: Vec<SplitSuggestion>,
}

/// Privacy/data-minimization posture of the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyComplianceReport {
    /// 0-1, fixed deductions per disabled protection
    pub score: f64,
    pub compliant: bool,
    pub privacy_mode: bool,
    pub differential_privacy: bool,
    pub data_minimization: bool,
    /// Configured per-application privacy budget
    pub epsilon: f64,
    /// Soft accounting of budget consumed so far
    pub epsilon_spent: f64,
    pub noise_applications: u64,
}

/// Deductibility classification for a proposed split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeductibilityStatus {
    /// Fully deductible under the matched rule
    FullyCompliant,
    /// Partially deductible; within guidance
    Compliant,
    /// Deductibility depends on documentation
    RequiresDocumentation,
}

impl DeductibilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullyCompliant => "fully_compliant",
            Self::Compliant => "compliant",
            Self::RequiresDocumentation => "requires_documentation",
        }
    }
}

impl std::fmt::Display for DeductibilityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Audit-risk tier from amount bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    RequiresReview,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::RequiresReview => "requires_review",
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Jurisdiction-style compliance verdict for a proposed split
///
/// Never a rejection: always actionable guidance plus a risk tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxComplianceResult {
    pub deductibility: DeductibilityStatus,
    pub risk: RiskTier,
    /// Guideline reference identifiers (e.g. publication numbers)
    pub guidelines: Vec<String>,
    pub recommended_business_percentage: Option<f64>,
    pub documentation_required: bool,
    pub notes: String,
}
