//! Bounded TTL cache for generated split suggestions
//!
//! Keyed by a coarse transaction fingerprint (normalized category plus the
//! amount rounded down to a bucket), so similar transactions share a cached
//! suggestion. Expired entries are evicted on access; at capacity the
//! single oldest entry is evicted first. Retraining clears the cache
//! entirely - cached suggestions may be stale once patterns change.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::CacheConfig;
use crate::models::{SplitSuggestion, Transaction};

/// Memoization table for split suggestions
pub struct SuggestionCache {
    entries: HashMap<String, SplitSuggestion>,
    ttl: Duration,
    capacity: usize,
    amount_bucket: f64,
}

impl SuggestionCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            ttl: Duration::seconds(config.ttl_secs as i64),
            capacity: config.capacity.max(1),
            amount_bucket: config.amount_bucket.max(1.0),
        }
    }

    /// Coarse fingerprint of a transaction: normalized category plus the
    /// amount bucketed down to the nearest `amount_bucket`
    pub fn fingerprint(&self, tx: &Transaction) -> String {
        let category = tx
            .category
            .as_deref()
            .map(|c| c.trim().to_lowercase())
            .unwrap_or_else(|| "unknown".to_string());
        let bucket = (tx.amount.abs() / self.amount_bucket).floor() * self.amount_bucket;

        let mut hasher = Sha256::new();
        hasher.update(category.as_bytes());
        hasher.update(b"|");
        hasher.update(format!("{:.0}", bucket).as_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..8])
    }

    /// Look up a cached suggestion; expired entries are evicted and miss
    pub fn get(&mut self, key: &str) -> Option<SplitSuggestion> {
        let now = Utc::now();
        match self.entries.get(key) {
            Some(entry) if now - entry.created_at > self.ttl => {
                debug!(key, "Evicting expired cache entry");
                self.entries.remove(key);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }

    /// Store a suggestion, evicting the oldest entry if at capacity
    pub fn put(&mut self, key: String, suggestion: SplitSuggestion) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, s)| s.created_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest_key) = oldest {
                debug!(key = %oldest_key, "Evicting oldest cache entry at capacity");
                self.entries.remove(&oldest_key);
            }
        }
        self.entries.insert(key, suggestion);
    }

    /// Drop everything (invoked on every retrain)
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            debug!(entries = self.entries.len(), "Clearing suggestion cache");
        }
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn cache() -> SuggestionCache {
        SuggestionCache::new(&CacheConfig::default())
    }

    fn tx(category: &str, amount: f64) -> Transaction {
        Transaction::new(
            1,
            NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
            "VENDOR",
            amount,
        )
        .with_category(category)
    }

    fn suggestion(id: &str, age_secs: i64) -> SplitSuggestion {
        SplitSuggestion {
            id: id.to_string(),
            splits: Vec::new(),
            confidence: 0.8,
            reasoning: "test".to_string(),
            privacy_compliant: true,
            tax_compliant: true,
            needs_review: false,
            created_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[test]
    fn test_fingerprint_buckets_amounts() {
        let c = cache();
        // 150 and 199 share the 100-bucket; 250 does not
        assert_eq!(
            c.fingerprint(&tx("business", -150.0)),
            c.fingerprint(&tx("business", -199.0))
        );
        assert_ne!(
            c.fingerprint(&tx("business", -150.0)),
            c.fingerprint(&tx("business", -250.0))
        );
    }

    #[test]
    fn test_fingerprint_normalizes_category() {
        let c = cache();
        assert_eq!(
            c.fingerprint(&tx("Business", -120.0)),
            c.fingerprint(&tx("  business ", -120.0))
        );
        assert_ne!(
            c.fingerprint(&tx("business", -120.0)),
            c.fingerprint(&tx("personal", -120.0))
        );
    }

    #[test]
    fn test_fresh_entry_hits() {
        let mut c = cache();
        c.put("k".to_string(), suggestion("s1", 0));
        assert!(c.get("k").is_some());
    }

    #[test]
    fn test_expired_entry_misses_and_is_evicted() {
        let mut c = cache();
        c.put("k".to_string(), suggestion("s1", 3601));
        assert!(c.get("k").is_none());
        assert!(c.is_empty());
    }

    #[test]
    fn test_capacity_evicts_single_oldest() {
        let mut c = SuggestionCache::new(&CacheConfig {
            capacity: 3,
            ..CacheConfig::default()
        });
        c.put("a".to_string(), suggestion("a", 30));
        c.put("b".to_string(), suggestion("b", 20));
        c.put("c".to_string(), suggestion("c", 10));
        c.put("d".to_string(), suggestion("d", 0));

        assert_eq!(c.len(), 3);
        assert!(c.get("a").is_none()); // oldest evicted
        assert!(c.get("b").is_some());
        assert!(c.get("d").is_some());
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let mut c = SuggestionCache::new(&CacheConfig {
            capacity: 2,
            ..CacheConfig::default()
        });
        c.put("a".to_string(), suggestion("a", 10));
        c.put("b".to_string(), suggestion("b", 5));
        // Re-putting an existing key at capacity replaces in place
        c.put("a".to_string(), suggestion("a2", 0));

        assert_eq!(c.len(), 2);
        assert_eq!(c.get("a").unwrap().id, "a2");
        assert!(c.get("b").is_some());
    }

    #[test]
    fn test_clear_empties_everything() {
        let mut c = cache();
        c.put("a".to_string(), suggestion("a", 0));
        c.put("b".to_string(), suggestion("b", 0));
        c.clear();
        assert!(c.is_empty());
        assert!(c.get("a").is_none());
    }
}
