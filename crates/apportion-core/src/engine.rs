//! Intelligence orchestrator: the engine's public face
//!
//! Owns the lifecycle state machine and wires the pipeline together:
//! privacy guard -> pattern analyzer -> compliance checker -> suggestion
//! cache. All mutable state (pattern store, cache, metrics, engine state)
//! lives behind one exclusive owner; concurrent callers are either
//! serialized or rejected with a retryable busy error.
//!
//! State machine: `initializing -> ready <-> {analyzing, training}`, with
//! `error(reason)` on a failed privacy precondition. An explicit `reset`
//! re-runs initialization; there is no automatic recovery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::analyzer::{self, PatternAnalyzer};
use crate::cache::SuggestionCache;
use crate::compliance::{ComplianceChecker, RuleBasedComplianceChecker};
use crate::config::EngineConfig;
use crate::db::{Database, KEY_ENGINE_METRICS, KEY_LEARNING_METRICS, KEY_PATTERN_STORE};
use crate::error::{Error, Result};
use crate::models::{
    AnalysisReport, AnomalyReport, BatchSuggestionReport, BatchTiming, EngineState,
    PrivacyComplianceReport, RecognizedPattern, RiskTier, SplitAllocation, SplitObservation,
    SplitSuggestion, TaxComplianceResult, Transaction,
};
use crate::privacy::{DifferentialPrivacyGuard, PrivacyGuard};
use crate::store::{LearningMetrics, PatternStore};

/// Shared flag a caller sets to abandon the remainder of a long-running
/// batch. Progress already merged into the pattern store is kept.
pub type CancelFlag = Arc<AtomicBool>;

/// Performance counters for engine operations
///
/// Persisted alongside the pattern store so dashboards survive restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub suggestions_generated: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub trainings_completed: u64,
    pub anomaly_scans: u64,
    pub feedback_recorded: u64,
    /// Running average over generated (non-cached) suggestions
    pub avg_suggestion_latency_ms: f64,
}

impl EngineMetrics {
    fn record_suggestion(&mut self, elapsed_ms: f64) {
        self.suggestions_generated += 1;
        let n = self.suggestions_generated as f64;
        self.avg_suggestion_latency_ms += (elapsed_ms - self.avg_suggestion_latency_ms) / n;
    }
}

/// Everything the orchestrator mutates, behind the single owner
struct EngineInner {
    state: EngineState,
    store: PatternStore,
    cache: SuggestionCache,
    learning: LearningMetrics,
    metrics: EngineMetrics,
}

impl EngineInner {
    fn ensure_ready(&self) -> Result<()> {
        if self.state.is_ready() {
            Ok(())
        } else {
            Err(Error::NotReady(self.state.to_string()))
        }
    }
}

/// Run the privacy precondition and decide the engine's starting state
fn initial_state(config: &EngineConfig, privacy: &dyn PrivacyGuard) -> EngineState {
    if config.privacy.require_compliant_startup {
        let report = privacy.report();
        if !report.compliant {
            return EngineState::Error(format!(
                "privacy compliance score {:.2} below required {:.2}",
                report.score, config.privacy.compliance_floor
            ));
        }
    }
    EngineState::Ready
}

/// The split-pattern intelligence engine
pub struct IntelligenceEngine {
    config: EngineConfig,
    analyzer: PatternAnalyzer,
    privacy: Box<dyn PrivacyGuard>,
    compliance: Box<dyn ComplianceChecker>,
    db: Option<Database>,
    inner: Mutex<EngineInner>,
}

impl IntelligenceEngine {
    /// Create an engine with the default guard and checker built from config
    pub fn new(config: EngineConfig) -> Self {
        let privacy = Box::new(DifferentialPrivacyGuard::new(config.privacy.clone()));
        let compliance = Box::new(RuleBasedComplianceChecker::new(config.compliance.clone()));
        Self::with_components(config, privacy, compliance)
    }

    /// Create an engine with injected privacy/compliance capabilities
    pub fn with_components(
        config: EngineConfig,
        privacy: Box<dyn PrivacyGuard>,
        compliance: Box<dyn ComplianceChecker>,
    ) -> Self {
        Self::build(
            config,
            privacy,
            compliance,
            None,
            PatternStore::new(),
            LearningMetrics::default(),
            EngineMetrics::default(),
        )
    }

    /// Create an engine backed by persistent storage, restoring any
    /// previously learned state
    pub fn with_database(config: EngineConfig, db: Database) -> Result<Self> {
        let store: PatternStore = db.load_json(KEY_PATTERN_STORE)?.unwrap_or_default();
        let learning: LearningMetrics = db.load_json(KEY_LEARNING_METRICS)?.unwrap_or_default();
        let metrics: EngineMetrics = db.load_json(KEY_ENGINE_METRICS)?.unwrap_or_default();

        if !store.is_empty() {
            info!(patterns = store.len(), "Restored learned patterns");
        }

        let privacy = Box::new(DifferentialPrivacyGuard::new(config.privacy.clone()));
        let compliance = Box::new(RuleBasedComplianceChecker::new(config.compliance.clone()));
        Ok(Self::build(
            config,
            privacy,
            compliance,
            Some(db),
            store,
            learning,
            metrics,
        ))
    }

    fn build(
        config: EngineConfig,
        privacy: Box<dyn PrivacyGuard>,
        compliance: Box<dyn ComplianceChecker>,
        db: Option<Database>,
        store: PatternStore,
        learning: LearningMetrics,
        metrics: EngineMetrics,
    ) -> Self {
        let analyzer = PatternAnalyzer::new(config.analyzer.clone(), config.anomaly.clone());
        let cache = SuggestionCache::new(&config.cache);

        let state = initial_state(&config, privacy.as_ref());
        match &state {
            EngineState::Ready => info!(patterns = store.len(), "Engine ready"),
            EngineState::Error(reason) => {
                warn!(reason = %reason, "Engine failed privacy precondition")
            }
            _ => {}
        }

        Self {
            config,
            analyzer,
            privacy,
            compliance,
            db,
            inner: Mutex::new(EngineInner {
                state,
                store,
                cache,
                learning,
                metrics,
            }),
        }
    }

    /// Claim the exclusive owner or reject with a retryable busy error
    fn try_own(&self, op: &'static str) -> Result<tokio::sync::MutexGuard<'_, EngineInner>> {
        self.inner.try_lock().map_err(|_| Error::Busy(op))
    }

    fn persist(&self, inner: &EngineInner) -> Result<()> {
        let Some(db) = &self.db else {
            return Ok(());
        };
        db.save_json(KEY_PATTERN_STORE, &inner.store)?;
        db.save_json(KEY_LEARNING_METRICS, &inner.learning)?;
        db.save_json(KEY_ENGINE_METRICS, &inner.metrics)?;
        Ok(())
    }

    /// Bulk learning entry point
    pub async fn train(&self, batch: Vec<SplitObservation>) -> Result<AnalysisReport> {
        self.train_with_cancel(batch, None).await
    }

    /// Train with a cancel flag checked at category-group granularity;
    /// groups already merged stay merged
    pub async fn train_with_cancel(
        &self,
        mut batch: Vec<SplitObservation>,
        cancel: Option<&CancelFlag>,
    ) -> Result<AnalysisReport> {
        let mut inner = self.try_own("train")?;
        inner.ensure_ready()?;
        inner.state = EngineState::Training;

        self.privacy.apply_noise(&mut batch);

        let inner_ref = &mut *inner;
        let report =
            self.analyzer
                .learn(&mut inner_ref.store, &batch, cancel.map(|c| c.as_ref()));

        // Learned patterns may invalidate anything previously suggested
        inner_ref.cache.clear();
        inner_ref.learning.training_runs += 1;
        inner_ref.learning.pairs_learned += batch.len() as u64;
        inner_ref.learning.last_trained_at = Some(Utc::now());
        inner_ref.metrics.trainings_completed += 1;

        let persisted = self.persist(inner_ref);
        // Back to ready before surfacing persistence errors, so the engine
        // never wedges in `training`
        inner.state = EngineState::Ready;
        persisted?;

        info!(
            pairs = batch.len(),
            patterns = report.patterns.len(),
            skipped = report.skipped_groups,
            errors = report.errors.len(),
            "Training complete"
        );
        Ok(report)
    }

    /// Single-transaction suggestion
    ///
    /// `Ok(None)` means "no suggestion available" (no category, or the
    /// privacy filter dropped it) - callers must not treat it as failure.
    pub async fn suggest(&self, tx: &Transaction) -> Result<Option<SplitSuggestion>> {
        let mut inner = self.try_own("suggest")?;
        inner.ensure_ready()?;
        inner.state = EngineState::Analyzing;

        let result = self.suggest_locked(&mut inner, tx);

        // Deferred transition: runs on the error path too
        inner.state = EngineState::Ready;
        result
    }

    fn suggest_locked(
        &self,
        inner: &mut EngineInner,
        tx: &Transaction,
    ) -> Result<Option<SplitSuggestion>> {
        let started = Instant::now();

        let key = inner.cache.fingerprint(tx);
        if let Some(cached) = inner.cache.get(&key) {
            inner.metrics.cache_hits += 1;
            debug!(transaction_id = tx.id, "Suggestion cache hit");
            return Ok(Some(cached));
        }
        inner.metrics.cache_misses += 1;

        let Some(mut suggestion) = self.analyzer.suggest(&inner.store, tx) else {
            debug!(transaction_id = tx.id, "No category, no suggestion");
            return Ok(None);
        };

        // Privacy filter: a non-compliant posture drops the suggestion
        // instead of serving it
        let privacy = self.privacy.report();
        suggestion.privacy_compliant = privacy.compliant;
        if !privacy.compliant {
            warn!(
                transaction_id = tx.id,
                score = privacy.score,
                "Dropping suggestion: privacy posture non-compliant"
            );
            return Ok(None);
        }

        // Tax-compliance augmentation
        let assessment = self.compliance.assess(tx, &[]);
        apply_assessment(&mut suggestion, &assessment);

        inner.cache.put(key, suggestion.clone());
        inner
            .metrics
            .record_suggestion(started.elapsed().as_secs_f64() * 1000.0);
        Ok(Some(suggestion))
    }

    /// Sequential batch suggestion for bulk-import/reclassification tooling
    pub async fn suggest_batch(
        &self,
        transactions: &[Transaction],
    ) -> Result<BatchSuggestionReport> {
        self.suggest_batch_with_cancel(transactions, None).await
    }

    /// Batch suggestion with a per-transaction cancel check
    pub async fn suggest_batch_with_cancel(
        &self,
        transactions: &[Transaction],
        cancel: Option<&CancelFlag>,
    ) -> Result<BatchSuggestionReport> {
        let mut inner = self.try_own("suggest_batch")?;
        inner.ensure_ready()?;
        inner.state = EngineState::Analyzing;

        let started = Instant::now();
        let mut report = BatchSuggestionReport::default();
        let mut confidence_sum = 0.0;
        let mut max_item_ms = 0u64;

        for tx in transactions {
            if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                debug!(
                    processed = report.processed,
                    remaining = transactions.len() - report.processed,
                    "Batch suggestion cancelled"
                );
                break;
            }

            let item_started = Instant::now();
            match self.suggest_locked(&mut inner, tx) {
                Ok(Some(suggestion)) => {
                    confidence_sum += suggestion.confidence;
                    report.succeeded += 1;
                    report.suggestions.push(suggestion);
                }
                Ok(None) => report.without_suggestion += 1,
                Err(e) => {
                    // Per-item failures accumulate; the batch continues
                    debug!(transaction_id = tx.id, error = %e, "Batch item failed");
                    report.failed += 1;
                }
            }
            max_item_ms = max_item_ms.max(item_started.elapsed().as_millis() as u64);
            report.processed += 1;
        }

        if report.succeeded > 0 {
            report.average_confidence = confidence_sum / report.succeeded as f64;
        }
        if report.processed > 0 {
            report.failure_rate = report.failed as f64 / report.processed as f64;
        }
        let total_ms = started.elapsed().as_millis() as u64;
        report.timing = BatchTiming {
            total_ms,
            avg_item_ms: if report.processed > 0 {
                total_ms as f64 / report.processed as f64
            } else {
                0.0
            },
            max_item_ms,
        };

        inner.state = EngineState::Ready;
        info!(
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            "Batch suggestion complete"
        );
        Ok(report)
    }

    /// Flag irregular splits for a review/audit collaborator
    pub async fn detect_anomalies(&self, batch: &[SplitObservation]) -> Result<AnomalyReport> {
        let mut inner = self.try_own("detect_anomalies")?;
        inner.ensure_ready()?;
        inner.state = EngineState::Analyzing;

        let report = self.analyzer.detect_anomalies(batch);
        inner.metrics.anomaly_scans += 1;

        inner.state = EngineState::Ready;
        info!(
            checked = report.transactions_checked,
            flagged = report.anomalies.len(),
            "Anomaly detection complete"
        );
        Ok(report)
    }

    /// Feed an accepted/corrected split back as synthetic training data
    ///
    /// A user-approved split is a confirmed observation, so it bypasses the
    /// batch observation floor and merges as a single-pair reinforcement.
    pub async fn record_user_feedback(
        &self,
        suggestion_id: &str,
        tx: &Transaction,
        approved_splits: &[SplitAllocation],
        satisfaction: f64,
    ) -> Result<()> {
        let mut inner = self.try_own("record_user_feedback")?;
        inner.ensure_ready()?;
        inner.state = EngineState::Training;

        let result = self.learn_feedback(&mut inner, suggestion_id, tx, approved_splits, satisfaction);

        inner.state = EngineState::Ready;
        result
    }

    fn learn_feedback(
        &self,
        inner: &mut EngineInner,
        suggestion_id: &str,
        tx: &Transaction,
        approved_splits: &[SplitAllocation],
        satisfaction: f64,
    ) -> Result<()> {
        let Some(category) = tx.category.as_deref() else {
            debug!(suggestion_id, "Feedback on uncategorized transaction, nothing to learn");
            return Ok(());
        };
        let Some(business_pct) = analyzer::business_percentage(approved_splits) else {
            debug!(suggestion_id, "Approved splits carry no business share, nothing to learn");
            return Ok(());
        };

        let confidence = satisfaction.clamp(0.0, 1.0);
        inner.store.merge(RecognizedPattern {
            pattern_type: analyzer::map_category(category),
            average_business_percentage: business_pct.clamp(0.0, 100.0),
            frequency: 1,
            confidence_level: confidence,
            is_reliable: confidence >= self.config.analyzer.confidence_threshold,
            last_updated: Utc::now(),
        });
        inner.cache.clear();
        inner.learning.pairs_learned += 1;
        inner.metrics.feedback_recorded += 1;

        let persisted = self.persist(inner);
        info!(
            suggestion_id,
            transaction_id = tx.id,
            satisfaction,
            "Recorded user feedback"
        );
        persisted
    }

    /// Read-only privacy posture export for a settings/compliance dashboard
    pub fn privacy_report(&self) -> PrivacyComplianceReport {
        self.privacy.report()
    }

    /// Read-only tax-compliance assessment of a proposed split
    pub fn tax_compliance_report(
        &self,
        tx: &Transaction,
        splits: &[SplitAllocation],
    ) -> TaxComplianceResult {
        self.compliance.assess(tx, splits)
    }

    /// Current lifecycle state
    pub async fn state(&self) -> EngineState {
        self.inner.lock().await.state.clone()
    }

    /// Snapshot of the learned patterns
    pub async fn patterns(&self) -> Vec<RecognizedPattern> {
        self.inner.lock().await.store.all()
    }

    /// Snapshot of the performance counters
    pub async fn metrics(&self) -> EngineMetrics {
        self.inner.lock().await.metrics.clone()
    }

    /// Snapshot of the learning counters
    pub async fn learning_metrics(&self) -> LearningMetrics {
        self.inner.lock().await.learning.clone()
    }

    /// Re-run initialization from any state, including `error`
    ///
    /// Returns the resulting state. Learned patterns are untouched.
    pub async fn reset(&self) -> EngineState {
        let mut inner = self.inner.lock().await;
        inner.state = EngineState::Initializing;
        inner.state = initial_state(&self.config, self.privacy.as_ref());
        info!(state = %inner.state, "Engine reset");
        inner.state.clone()
    }

    /// Drop all learned patterns and cached suggestions
    pub async fn clear_patterns(&self) -> Result<()> {
        let mut inner = self.try_own("clear_patterns")?;
        inner.ensure_ready()?;

        inner.store.clear();
        inner.cache.clear();
        let persisted = self.persist(&inner);
        info!("Cleared all learned patterns");
        persisted
    }
}

/// Fold a compliance assessment into a suggestion
fn apply_assessment(suggestion: &mut SplitSuggestion, assessment: &TaxComplianceResult) {
    suggestion.tax_compliant = assessment.risk != RiskTier::RequiresReview;
    if assessment.documentation_required {
        suggestion.needs_review = true;
    }
    if !assessment.notes.is_empty() {
        suggestion.reasoning.push_str(". ");
        suggestion.reasoning.push_str(&assessment.notes);
    }
}
