//! Split-pattern analysis algorithms
//!
//! Learns per-category split behavior from batches of (transaction,
//! allocations) observations:
//! - Pattern recognition: per-category mean/variance of business-use
//!   percentages, with a sample-size floor
//! - Confidence estimation from sample size and variance
//! - Split suggestions from the learned pattern store, with a
//!   default-percentage fallback
//! - Anomaly detection over split batches (ordered checks, first match wins)

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tracing::debug;

use crate::config::{AnalyzerConfig, AnomalyConfig};
use crate::models::{
    AnalysisReport, AnomalyReport, AnomalyType, CategoryError, DetectedAnomaly, PatternType,
    RecognizedPattern, SplitObservation, SplitSuggestion, SuggestedSplit, Transaction,
};
use crate::store::PatternStore;

/// Map a free-text category label to a pattern type
///
/// Pure function over a fixed keyword table; the same input always yields
/// the same type. Keyword checks run in a fixed order, so labels matching
/// several keywords resolve deterministically.
pub fn map_category(category: &str) -> PatternType {
    let c = category.to_lowercase();

    if c.contains("business") {
        return PatternType::BusinessExpense;
    }
    if c.contains("home_office") || c.contains("home office") {
        return PatternType::HomeOffice;
    }
    if c.contains("personal") {
        return PatternType::PersonalExpense;
    }
    if c.contains("mixed") {
        return PatternType::MixedUse;
    }
    if c.contains("investment") {
        return PatternType::Investment;
    }

    PatternType::Unknown
}

/// Extract the business-use percentage from a set of allocations
///
/// The first allocation whose category mentions business or deductible use
/// carries the signal; observations without one contribute no data point.
pub(crate) fn business_percentage(allocations: &[crate::models::SplitAllocation]) -> Option<f64> {
    allocations.iter().find_map(|a| {
        let c = a.category.to_lowercase();
        if c.contains("business") || c.contains("deductible") {
            Some(a.percentage)
        } else {
            None
        }
    })
}

/// Category labels for the two suggested slices of a split
fn split_labels(pattern_type: PatternType) -> (&'static str, &'static str) {
    match pattern_type {
        PatternType::HomeOffice => ("home_office_use", "personal_use"),
        PatternType::Investment => ("investment_use", "personal_use"),
        PatternType::BusinessExpense
        | PatternType::PersonalExpense
        | PatternType::MixedUse
        | PatternType::Unknown => ("business_use", "personal_use"),
    }
}

/// Sample variance (n-1 denominator; 0 for fewer than two points)
fn sample_variance(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    sum_sq / (values.len() - 1) as f64
}

/// Statistical pattern analyzer over split observations
pub struct PatternAnalyzer {
    config: AnalyzerConfig,
    anomaly_config: AnomalyConfig,
}

impl PatternAnalyzer {
    pub fn new(config: AnalyzerConfig, anomaly_config: AnomalyConfig) -> Self {
        Self {
            config,
            anomaly_config,
        }
    }

    /// Recognize patterns in a batch without touching the store
    pub fn analyze(&self, batch: &[SplitObservation]) -> AnalysisReport {
        self.run_analysis(batch, None, |_| {})
    }

    /// Analyze a batch and merge each recognized pattern into the store
    ///
    /// Category groups merge in deterministic (category-name) order. The
    /// cancel flag is checked between groups; anything already merged stays.
    pub fn learn(
        &self,
        store: &mut PatternStore,
        batch: &[SplitObservation],
        cancel: Option<&AtomicBool>,
    ) -> AnalysisReport {
        self.run_analysis(batch, cancel, |pattern| store.merge(pattern.clone()))
    }

    fn run_analysis(
        &self,
        batch: &[SplitObservation],
        cancel: Option<&AtomicBool>,
        mut on_pattern: impl FnMut(&RecognizedPattern),
    ) -> AnalysisReport {
        let mut report = AnalysisReport::default();

        let mut groups: BTreeMap<&str, Vec<&SplitObservation>> = BTreeMap::new();
        for obs in batch {
            if let Some(category) = obs.transaction.category.as_deref() {
                groups.entry(category).or_default().push(obs);
            }
        }

        for (category, group) in groups {
            if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                debug!(category, "Analysis cancelled, keeping progress so far");
                break;
            }

            if group.len() < self.config.min_pattern_frequency {
                debug!(
                    category,
                    observations = group.len(),
                    "Skipping category below observation floor"
                );
                report.skipped_groups += 1;
                continue;
            }

            match self.analyze_group(category, &group) {
                Ok(pattern) => {
                    on_pattern(&pattern);
                    report.patterns.push(pattern);
                    report.analyzed_groups += 1;
                }
                Err(error) => {
                    debug!(category, message = %error.message, "Category analysis failed");
                    report.errors.push(error);
                }
            }
        }

        report.overall_confidence = self.overall_confidence(&report.patterns);
        report
    }

    /// Compute the recognized pattern for one eligible category group
    fn analyze_group(
        &self,
        category: &str,
        group: &[&SplitObservation],
    ) -> std::result::Result<RecognizedPattern, CategoryError> {
        let points: Vec<f64> = group
            .iter()
            .filter_map(|obs| business_percentage(&obs.allocations))
            .collect();

        if points.is_empty() {
            return Err(CategoryError {
                category: category.to_string(),
                message: "no allocation carries a business/deductible percentage".to_string(),
            });
        }

        let mean = points.iter().sum::<f64>() / points.len() as f64;
        let variance = sample_variance(&points, mean);

        let sample_term = (points.len() as f64 / self.config.sample_size_factor).min(1.0);
        let variance_term = (1.0 - variance / self.config.variance_normalizer)
            .max(self.config.min_variance_weight);
        let confidence = (sample_term * variance_term).clamp(0.0, 1.0);

        Ok(RecognizedPattern {
            pattern_type: map_category(category),
            average_business_percentage: mean,
            frequency: points.len() as u32,
            confidence_level: confidence,
            is_reliable: confidence >= self.config.confidence_threshold,
            last_updated: Utc::now(),
        })
    }

    /// Frequency-weighted average of pattern confidences, weighted again by
    /// the per-type importance table
    fn overall_confidence(&self, patterns: &[RecognizedPattern]) -> f64 {
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for p in patterns {
            let weight = p.frequency as f64 * self.config.type_weights.get(p.pattern_type);
            weighted_sum += p.confidence_level * weight;
            weight_total += weight;
        }
        if weight_total > 0.0 {
            (weighted_sum / weight_total).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Suggest a split for a single transaction from the current store
    ///
    /// Returns `None` only when the transaction carries no category at all.
    /// Without a reliable pattern the fixed default-percentage table
    /// applies, at reduced confidence.
    pub fn suggest(&self, store: &PatternStore, tx: &Transaction) -> Option<SplitSuggestion> {
        let category = tx.category.as_deref()?;
        let pattern_type = map_category(category);

        let (business_pct, confidence, reasoning) = match store
            .get(pattern_type)
            .filter(|p| p.is_reliable)
        {
            Some(pattern) => (
                pattern.average_business_percentage.clamp(0.0, 100.0),
                pattern.confidence_level,
                format!(
                    "Matched {} pattern learned from {} observations (avg business share {:.1}%)",
                    pattern.pattern_type,
                    pattern.frequency,
                    pattern.average_business_percentage
                ),
            ),
            None => (
                self.config.default_percentages.get(pattern_type),
                self.config.fallback_confidence,
                format!(
                    "Limited historical data for {} transactions; applied the default split",
                    pattern_type
                ),
            ),
        };

        let (business_label, personal_label) = split_labels(pattern_type);
        let splits = vec![
            SuggestedSplit {
                percentage: business_pct,
                category: business_label.to_string(),
                confidence,
            },
            SuggestedSplit {
                percentage: 100.0 - business_pct,
                category: personal_label.to_string(),
                confidence,
            },
        ];

        debug!(
            transaction_id = tx.id,
            pattern_type = pattern_type.as_str(),
            business_pct,
            confidence,
            "Generated split suggestion"
        );

        Some(SplitSuggestion {
            id: format!("{}-{}", pattern_type.as_str(), tx.id),
            splits,
            confidence,
            reasoning,
            privacy_compliant: true,
            tax_compliant: true,
            needs_review: confidence < self.config.confidence_threshold,
            created_at: Utc::now(),
        })
    }

    /// Detect irregular splits in a batch
    ///
    /// Checks run per observation in a fixed order and the first match wins,
    /// so at most one anomaly is reported per transaction:
    /// 1. allocation percentages not summing to 100 (± tolerance)
    /// 2. more allocations than a typical split carries
    /// 3. extreme amount magnitude
    pub fn detect_anomalies(&self, batch: &[SplitObservation]) -> AnomalyReport {
        let cfg = &self.anomaly_config;
        let mut anomalies = Vec::new();

        for obs in batch {
            let tx = &obs.transaction;

            let percentage_sum: f64 = obs.allocations.iter().map(|a| a.percentage).sum();
            let deviation = (percentage_sum - 100.0).abs();

            let anomaly = if !obs.allocations.is_empty() && deviation > cfg.percentage_tolerance {
                Some((
                    AnomalyType::UnusualSplitPercentage,
                    (deviation / 100.0).min(1.0),
                    format!(
                        "Split allocations sum to {:.1}% (expected 100%)",
                        percentage_sum
                    ),
                ))
            } else if obs.allocations.len() > cfg.max_allocations {
                Some((
                    AnomalyType::ComplexSplitPattern,
                    cfg.complex_split_score,
                    format!(
                        "{} split allocations (typical splits have at most {})",
                        obs.allocations.len(),
                        cfg.max_allocations
                    ),
                ))
            } else if tx.amount.abs() > cfg.extreme_amount_threshold {
                Some((
                    AnomalyType::ExtremeAmount,
                    cfg.extreme_amount_score,
                    format!(
                        "Amount {:.2} is above the {:.0} extreme-amount threshold",
                        tx.amount.abs(),
                        cfg.extreme_amount_threshold
                    ),
                ))
            } else {
                None
            };

            if let Some((anomaly_type, score, description)) = anomaly {
                debug!(
                    transaction_id = tx.id,
                    anomaly_type = anomaly_type.as_str(),
                    score,
                    "Detected anomaly"
                );
                anomalies.push(DetectedAnomaly {
                    id: format!("{}:{}", anomaly_type.as_str(), tx.id),
                    transaction_id: tx.id,
                    anomaly_type,
                    score,
                    description,
                });
            }
        }

        let transactions_checked = batch.len();
        let detection_rate = if transactions_checked > 0 {
            anomalies.len() as f64 / transactions_checked as f64
        } else {
            0.0
        };
        let mean_score = if anomalies.is_empty() {
            0.0
        } else {
            anomalies.iter().map(|a| a.score).sum::<f64>() / anomalies.len() as f64
        };
        let estimated_false_positive_rate = if detection_rate > cfg.high_detection_rate {
            cfg.high_false_positive_rate
        } else if detection_rate > cfg.elevated_detection_rate {
            cfg.elevated_false_positive_rate
        } else {
            cfg.baseline_false_positive_rate
        };

        AnomalyReport {
            anomalies,
            transactions_checked,
            mean_score,
            detection_rate,
            estimated_false_positive_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SplitAllocation;
    use chrono::NaiveDate;

    fn analyzer() -> PatternAnalyzer {
        PatternAnalyzer::new(AnalyzerConfig::default(), AnomalyConfig::default())
    }

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, n).unwrap()
    }

    /// One observation with a business allocation at `pct` and the rest personal
    fn business_obs(id: i64, category: &str, pct: f64) -> SplitObservation {
        let tx = Transaction::new(id, day(1), "OFFICE DEPOT", -120.0).with_category(category);
        SplitObservation::new(
            tx,
            vec![
                SplitAllocation::new(id * 10, id, pct, "business_use"),
                SplitAllocation::new(id * 10 + 1, id, 100.0 - pct, "personal_use"),
            ],
        )
    }

    #[test]
    fn test_map_category_is_deterministic() {
        for input in [
            "business_expense",
            "Business Travel",
            "home_office",
            "personal",
            "mixed_equipment",
            "investment",
            "groceries",
            "",
        ] {
            assert_eq!(map_category(input), map_category(input));
        }
        assert_eq!(map_category("business_expense"), PatternType::BusinessExpense);
        assert_eq!(map_category("HOME_OFFICE supplies"), PatternType::HomeOffice);
        assert_eq!(map_category("personal"), PatternType::PersonalExpense);
        assert_eq!(map_category("mixed"), PatternType::MixedUse);
        assert_eq!(map_category("investment account"), PatternType::Investment);
        assert_eq!(map_category("groceries"), PatternType::Unknown);
    }

    #[test]
    fn test_keyword_order_resolves_multi_matches() {
        // "business" wins over later keywords when both are present
        assert_eq!(
            map_category("home_office_business"),
            PatternType::BusinessExpense
        );
    }

    #[test]
    fn test_scenario_a_three_business_observations() {
        // Percentages [70, 72, 68]: mean 70, sample variance 4
        let batch = vec![
            business_obs(1, "business_expense", 70.0),
            business_obs(2, "business_expense", 72.0),
            business_obs(3, "business_expense", 68.0),
        ];

        let report = analyzer().analyze(&batch);
        assert_eq!(report.patterns.len(), 1);
        assert!(!report.has_errors());

        let p = &report.patterns[0];
        assert_eq!(p.pattern_type, PatternType::BusinessExpense);
        assert_eq!(p.frequency, 3);
        assert!((p.average_business_percentage - 70.0).abs() < 1e-9);
        // min(1, 3/10) * max(0.1, 1 - 4/1000) = 0.3 * 0.996
        assert!((p.confidence_level - 0.2988).abs() < 1e-9);
        assert!(!p.is_reliable);
    }

    #[test]
    fn test_below_floor_is_silently_skipped() {
        let batch = vec![
            business_obs(1, "business_expense", 70.0),
            business_obs(2, "business_expense", 72.0),
        ];
        let report = analyzer().analyze(&batch);
        assert!(report.patterns.is_empty());
        assert!(!report.has_errors());
        assert_eq!(report.skipped_groups, 1);
    }

    #[test]
    fn test_category_without_business_allocations_is_reported_not_fatal() {
        let mut batch = vec![
            business_obs(1, "business_expense", 70.0),
            business_obs(2, "business_expense", 72.0),
            business_obs(3, "business_expense", 68.0),
        ];
        // Three observations of a category whose splits carry no business signal
        for id in 4..7 {
            let tx = Transaction::new(id, day(2), "GROCER", -60.0).with_category("groceries");
            batch.push(SplitObservation::new(
                tx,
                vec![SplitAllocation::new(id * 10, id, 100.0, "household")],
            ));
        }

        let report = analyzer().analyze(&batch);
        assert_eq!(report.patterns.len(), 1);
        assert!(report.has_errors());
        assert_eq!(report.errors[0].category, "groceries");
    }

    #[test]
    fn test_confidence_bounds_hold_for_wild_inputs() {
        // Huge variance drives the variance term to its floor, never below 0
        let batch = vec![
            business_obs(1, "business_expense", 0.0),
            business_obs(2, "business_expense", 100.0),
            business_obs(3, "business_expense", 0.0),
            business_obs(4, "business_expense", 100.0),
        ];
        let report = analyzer().analyze(&batch);
        let p = &report.patterns[0];
        assert!(p.confidence_level >= 0.0 && p.confidence_level <= 1.0);
        assert!(report.overall_confidence >= 0.0 && report.overall_confidence <= 1.0);
    }

    #[test]
    fn test_learn_merges_weighted_average() {
        let mut store = PatternStore::new();
        let a = analyzer();

        let first = vec![
            business_obs(1, "business_expense", 70.0),
            business_obs(2, "business_expense", 70.0),
            business_obs(3, "business_expense", 70.0),
        ];
        a.learn(&mut store, &first, None);

        let second = vec![
            business_obs(4, "business_expense", 90.0),
            business_obs(5, "business_expense", 90.0),
            business_obs(6, "business_expense", 90.0),
        ];
        a.learn(&mut store, &second, None);

        let merged = store.get(PatternType::BusinessExpense).unwrap();
        assert_eq!(merged.frequency, 6);
        // (70*3 + 90*3) / 6 = 80
        assert!((merged.average_business_percentage - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_relearning_reinforces_frequency() {
        let mut store = PatternStore::new();
        let a = analyzer();
        let batch = vec![
            business_obs(1, "business_expense", 70.0),
            business_obs(2, "business_expense", 72.0),
            business_obs(3, "business_expense", 68.0),
        ];
        a.learn(&mut store, &batch, None);
        a.learn(&mut store, &batch, None);

        let p = store.get(PatternType::BusinessExpense).unwrap();
        assert_eq!(p.frequency, 6);
        assert!((p.average_business_percentage - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_learn_cancel_keeps_merged_progress() {
        let mut store = PatternStore::new();
        let a = analyzer();
        let cancel = AtomicBool::new(true);

        let batch = vec![
            business_obs(1, "business_expense", 70.0),
            business_obs(2, "business_expense", 72.0),
            business_obs(3, "business_expense", 68.0),
        ];
        // Pre-set cancel: no group is processed, store untouched
        let report = a.learn(&mut store, &batch, Some(&cancel));
        assert!(report.patterns.is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_suggest_from_reliable_pattern() {
        let mut store = PatternStore::new();
        let a = analyzer();
        // 12 consistent observations push confidence past the threshold
        let batch: Vec<_> = (1..=12)
            .map(|id| business_obs(id, "business_expense", 70.0))
            .collect();
        a.learn(&mut store, &batch, None);
        assert!(store.get(PatternType::BusinessExpense).unwrap().is_reliable);

        let tx = Transaction::new(99, day(5), "FLIGHT", -450.0).with_category("business_travel");
        let suggestion = a.suggest(&store, &tx).unwrap();
        assert_eq!(suggestion.splits.len(), 2);
        assert!((suggestion.splits[0].percentage - 70.0).abs() < 1e-9);
        assert!((suggestion.splits[1].percentage - 30.0).abs() < 1e-9);
        assert!(suggestion.reasoning.contains("12 observations"));
        assert!(!suggestion.needs_review);
    }

    #[test]
    fn test_scenario_d_unseen_category_falls_back() {
        let store = PatternStore::new();
        let tx = Transaction::new(7, day(3), "MYSTERY VENDOR", -80.0).with_category("widgets");

        let suggestion = analyzer().suggest(&store, &tx).unwrap();
        assert_eq!(suggestion.confidence, 0.6);
        assert!((suggestion.splits[0].percentage - 50.0).abs() < 1e-9);
        assert!(suggestion.reasoning.to_lowercase().contains("limited historical data"));
        assert!(suggestion.needs_review);
    }

    #[test]
    fn test_suggest_without_category_is_none() {
        let store = PatternStore::new();
        let tx = Transaction::new(7, day(3), "ATM WITHDRAWAL", -100.0);
        assert!(analyzer().suggest(&store, &tx).is_none());
    }

    #[test]
    fn test_scenario_b_five_allocations_is_complex() {
        let tx = Transaction::new(1, day(1), "MIXED ORDER", -200.0).with_category("mixed");
        let allocations = (0..5)
            .map(|i| SplitAllocation::new(i, 1, 20.0, "business_use"))
            .collect();
        let report = analyzer().detect_anomalies(&[SplitObservation::new(tx, allocations)]);

        assert_eq!(report.anomalies.len(), 1);
        let a = &report.anomalies[0];
        assert_eq!(a.anomaly_type, AnomalyType::ComplexSplitPattern);
        assert_eq!(a.score, 0.7);
    }

    #[test]
    fn test_scenario_c_sum_105_scores_005() {
        let tx = Transaction::new(2, day(1), "SUPPLIES", -50.0).with_category("business");
        let allocations = vec![
            SplitAllocation::new(1, 2, 70.0, "business_use"),
            SplitAllocation::new(2, 2, 35.0, "personal_use"),
        ];
        let report = analyzer().detect_anomalies(&[SplitObservation::new(tx, allocations)]);

        assert_eq!(report.anomalies.len(), 1);
        let a = &report.anomalies[0];
        assert_eq!(a.anomaly_type, AnomalyType::UnusualSplitPercentage);
        assert!((a.score - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_extreme_amount_flagged() {
        let tx = Transaction::new(3, day(1), "SERVER RACK", -12_500.0).with_category("business");
        let allocations = vec![SplitAllocation::new(1, 3, 100.0, "business_use")];
        let report = analyzer().detect_anomalies(&[SplitObservation::new(tx, allocations)]);

        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(report.anomalies[0].anomaly_type, AnomalyType::ExtremeAmount);
        assert_eq!(report.anomalies[0].score, 0.6);
    }

    #[test]
    fn test_first_match_wins_one_anomaly_per_transaction() {
        // Bad sum AND extreme amount: only the percentage anomaly reports
        let tx = Transaction::new(4, day(1), "BIG BAD", -20_000.0).with_category("business");
        let allocations = vec![SplitAllocation::new(1, 4, 150.0, "business_use")];
        let report = analyzer().detect_anomalies(&[SplitObservation::new(tx, allocations)]);

        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(
            report.anomalies[0].anomaly_type,
            AnomalyType::UnusualSplitPercentage
        );
    }

    #[test]
    fn test_anomaly_detection_is_idempotent() {
        let batch = vec![
            business_obs(1, "business", 70.0),
            SplitObservation::new(
                Transaction::new(2, day(1), "BIG", -15_000.0).with_category("business"),
                vec![SplitAllocation::new(5, 2, 100.0, "business_use")],
            ),
        ];
        let a = analyzer();
        let first = a.detect_anomalies(&batch);
        let second = a.detect_anomalies(&batch);

        assert_eq!(first.anomalies.len(), second.anomalies.len());
        for (x, y) in first.anomalies.iter().zip(second.anomalies.iter()) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.score, y.score);
            assert_eq!(x.anomaly_type, y.anomaly_type);
        }
        assert_eq!(first.mean_score, second.mean_score);
    }

    #[test]
    fn test_false_positive_rate_tiers() {
        let a = analyzer();

        // 1 anomaly in 2 transactions: 50% detection rate -> 0.3
        let noisy = vec![
            SplitObservation::new(
                Transaction::new(1, day(1), "X", -50.0).with_category("business"),
                vec![SplitAllocation::new(1, 1, 150.0, "business_use")],
            ),
            business_obs(2, "business", 70.0),
        ];
        assert_eq!(a.detect_anomalies(&noisy).estimated_false_positive_rate, 0.3);

        // No anomalies: baseline tier
        let clean = vec![business_obs(3, "business", 70.0)];
        assert_eq!(a.detect_anomalies(&clean).estimated_false_positive_rate, 0.05);
    }
}
