//! Pattern store: the engine's learned state
//!
//! One `RecognizedPattern` per pattern type, merged in place as new batches
//! are learned. All mutation funnels through the orchestrator's exclusive
//! owner, so the store itself carries no locks.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{PatternType, RecognizedPattern};

/// The evolving set of recognized split patterns, keyed by pattern type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternStore {
    patterns: BTreeMap<PatternType, RecognizedPattern>,
}

impl PatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pattern_type: PatternType) -> Option<&RecognizedPattern> {
        self.patterns.get(&pattern_type)
    }

    /// All patterns in deterministic (pattern-type) order
    pub fn all(&self) -> Vec<RecognizedPattern> {
        self.patterns.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Merge a newly recognized pattern into the store
    ///
    /// An existing pattern of the same type is replaced by the
    /// frequency-weighted average of old and new; frequencies sum and the
    /// higher confidence wins. Re-learning the same data reinforces the
    /// pattern rather than deduplicating it.
    pub fn merge(&mut self, incoming: RecognizedPattern) {
        match self.patterns.get_mut(&incoming.pattern_type) {
            Some(existing) => {
                let old_freq = existing.frequency as f64;
                let new_freq = incoming.frequency as f64;
                let total = old_freq + new_freq;
                if total > 0.0 {
                    existing.average_business_percentage = (existing.average_business_percentage
                        * old_freq
                        + incoming.average_business_percentage * new_freq)
                        / total;
                }
                existing.frequency += incoming.frequency;
                existing.confidence_level =
                    existing.confidence_level.max(incoming.confidence_level);
                existing.is_reliable = existing.is_reliable || incoming.is_reliable;
                existing.last_updated = incoming.last_updated;
                debug!(
                    pattern_type = existing.pattern_type.as_str(),
                    frequency = existing.frequency,
                    avg = existing.average_business_percentage,
                    "Merged pattern"
                );
            }
            None => {
                debug!(
                    pattern_type = incoming.pattern_type.as_str(),
                    frequency = incoming.frequency,
                    "New pattern"
                );
                self.patterns.insert(incoming.pattern_type, incoming);
            }
        }
    }

    /// Drop all learned patterns (the only deletion path)
    pub fn clear(&mut self) {
        self.patterns.clear();
    }
}

/// Counters describing what the engine has learned so far
///
/// Persisted alongside the pattern store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningMetrics {
    pub training_runs: u64,
    pub pairs_learned: u64,
    pub last_trained_at: Option<DateTime<Utc>>,
}
