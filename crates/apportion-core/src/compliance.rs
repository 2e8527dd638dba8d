//! Tax-compliance checker for proposed splits
//!
//! Evaluates a transaction and its proposed allocations against a small
//! fixed rule table: deductibility classification, guideline references,
//! recommended business-use percentages, and an amount-band risk tier.
//! The checker never rejects a split - it always returns actionable
//! guidance.

use tracing::debug;

use crate::config::ComplianceConfig;
use crate::models::{
    DeductibilityStatus, RiskTier, SplitAllocation, TaxComplianceResult, Transaction,
};

/// Capability interface for jurisdiction compliance checks
///
/// Injected into the orchestrator; `NoopComplianceChecker` is the default
/// when the surrounding application handles tax rules elsewhere.
pub trait ComplianceChecker: Send + Sync {
    fn assess(&self, tx: &Transaction, splits: &[SplitAllocation]) -> TaxComplianceResult;
}

/// Checker that treats everything as compliant with no guidance
pub struct NoopComplianceChecker;

impl ComplianceChecker for NoopComplianceChecker {
    fn assess(&self, _tx: &Transaction, _splits: &[SplitAllocation]) -> TaxComplianceResult {
        TaxComplianceResult {
            deductibility: DeductibilityStatus::Compliant,
            risk: RiskTier::Low,
            guidelines: Vec::new(),
            recommended_business_percentage: None,
            documentation_required: false,
            notes: String::new(),
        }
    }
}

/// One entry of the fixed category rule table
struct CategoryRule {
    keywords: &'static [&'static str],
    deductibility: DeductibilityStatus,
    recommended_business_percentage: Option<f64>,
    /// Documentation becomes mandatory above this amount
    documentation_threshold: Option<f64>,
    guidelines: &'static [&'static str],
}

/// The rule table, checked in order; the first keyword match wins.
/// Guideline identifiers reference publication numbers.
const RULES: &[CategoryRule] = &[
    CategoryRule {
        keywords: &["business", "professional"],
        deductibility: DeductibilityStatus::FullyCompliant,
        recommended_business_percentage: Some(100.0),
        documentation_threshold: None,
        guidelines: &["PUB-535"],
    },
    CategoryRule {
        keywords: &["home_office", "home office"],
        deductibility: DeductibilityStatus::Compliant,
        recommended_business_percentage: Some(20.0),
        documentation_threshold: Some(2_500.0),
        guidelines: &["PUB-587"],
    },
    CategoryRule {
        keywords: &["laptop", "computer", "equipment"],
        deductibility: DeductibilityStatus::Compliant,
        recommended_business_percentage: Some(70.0),
        documentation_threshold: Some(2_500.0),
        guidelines: &["PUB-946"],
    },
    CategoryRule {
        keywords: &["mixed"],
        deductibility: DeductibilityStatus::Compliant,
        recommended_business_percentage: Some(70.0),
        documentation_threshold: Some(5_000.0),
        guidelines: &["PUB-535", "PUB-463"],
    },
    CategoryRule {
        keywords: &["investment"],
        deductibility: DeductibilityStatus::RequiresDocumentation,
        recommended_business_percentage: Some(60.0),
        documentation_threshold: Some(0.0),
        guidelines: &["PUB-550"],
    },
];

/// Rule-table compliance checker
pub struct RuleBasedComplianceChecker {
    config: ComplianceConfig,
}

impl RuleBasedComplianceChecker {
    pub fn new(config: ComplianceConfig) -> Self {
        Self { config }
    }

    fn match_rule(category: &str) -> Option<&'static CategoryRule> {
        let c = category.to_lowercase();
        RULES
            .iter()
            .find(|rule| rule.keywords.iter().any(|k| c.contains(k)))
    }

    fn risk_tier(&self, amount: f64, rule_matched: bool) -> RiskTier {
        if amount > self.config.high_risk_amount {
            if rule_matched {
                RiskTier::High
            } else {
                // A large amount with no recognizable category needs a human
                RiskTier::RequiresReview
            }
        } else if amount > self.config.medium_risk_amount {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }
}

impl ComplianceChecker for RuleBasedComplianceChecker {
    fn assess(&self, tx: &Transaction, splits: &[SplitAllocation]) -> TaxComplianceResult {
        let amount = tx.amount.abs();
        let category = tx.category.as_deref().unwrap_or("unknown");
        let rule = Self::match_rule(category);

        let (deductibility, recommended, threshold, guidelines) = match rule {
            Some(rule) => (
                rule.deductibility,
                rule.recommended_business_percentage,
                rule.documentation_threshold,
                rule.guidelines.iter().map(|g| g.to_string()).collect(),
            ),
            None => (
                DeductibilityStatus::RequiresDocumentation,
                None,
                Some(self.config.medium_risk_amount),
                vec!["PUB-GEN".to_string()],
            ),
        };

        let documentation_required = threshold.is_some_and(|t| amount >= t)
            || deductibility == DeductibilityStatus::RequiresDocumentation;
        let risk = self.risk_tier(amount, rule.is_some());

        let mut notes = match deductibility {
            DeductibilityStatus::FullyCompliant => {
                format!("Category '{}' is fully deductible", category)
            }
            DeductibilityStatus::Compliant => format!(
                "Category '{}' is partially deductible{}",
                category,
                recommended
                    .map(|r| format!("; typical business share is {:.0}%", r))
                    .unwrap_or_default()
            ),
            DeductibilityStatus::RequiresDocumentation => format!(
                "Category '{}' needs supporting documentation before deduction",
                category
            ),
        };

        if !splits.is_empty() {
            let sum: f64 = splits.iter().map(|s| s.percentage).sum();
            if (sum - 100.0).abs() > 1.0 {
                notes.push_str(&format!(
                    "; proposed allocations sum to {:.1}%, review before filing",
                    sum
                ));
            }
        }

        debug!(
            transaction_id = tx.id,
            category,
            deductibility = deductibility.as_str(),
            risk = risk.as_str(),
            documentation_required,
            "Assessed split compliance"
        );

        TaxComplianceResult {
            deductibility,
            risk,
            guidelines,
            recommended_business_percentage: recommended,
            documentation_required,
            notes,
        }
    }
}
