//! Persistence for the engine's learned state
//!
//! The pattern store and learning metrics are serialized as JSON blobs into
//! a small key/value table under well-known keys, so learned patterns
//! survive process restarts. Nothing else in the engine persists.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::error::Result;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Well-known state keys
pub const KEY_PATTERN_STORE: &str = "pattern_store";
pub const KEY_LEARNING_METRICS: &str = "learning_metrics";
pub const KEY_ENGINE_METRICS: &str = "engine_metrics";

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Create a new database connection pool
    pub fn new(path: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder().max_size(10).build(manager)?;

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Create a throwaway database (for testing)
    ///
    /// Uses a temporary file rather than `:memory:` because each pooled
    /// connection to `:memory:` would open its own separate database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = format!(
            "{}/apportion_test_{}_{}.db",
            std::env::temp_dir().display(),
            std::process::id(),
            id
        );

        // Remove any existing file
        let _ = std::fs::remove_file(&path);

        Self::new(&path)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Performance pragmas for local storage
            -- WAL mode: better concurrency, readers don't block writers
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            -- Engine state (pattern store, metrics) as key/value blobs
            CREATE TABLE IF NOT EXISTS intelligence_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        info!("Engine state schema initialized");
        Ok(())
    }

    /// Store a serializable value under a well-known key
    pub fn save_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO intelligence_state (key, value, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![key, json],
        )?;
        Ok(())
    }

    /// Load a value previously stored under a key
    pub fn load_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT value FROM intelligence_state WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Remove a stored key (used by clear-all)
    pub fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM intelligence_state WHERE key = ?",
            params![key],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PatternType;
    use crate::store::{LearningMetrics, PatternStore};
    use chrono::Utc;

    #[test]
    fn test_save_and_load_round_trip() {
        let db = Database::in_memory().unwrap();

        let mut store = PatternStore::new();
        store.merge(crate::models::RecognizedPattern {
            pattern_type: PatternType::BusinessExpense,
            average_business_percentage: 72.0,
            frequency: 9,
            confidence_level: 0.55,
            is_reliable: false,
            last_updated: Utc::now(),
        });

        db.save_json(KEY_PATTERN_STORE, &store).unwrap();
        let loaded: PatternStore = db.load_json(KEY_PATTERN_STORE).unwrap().unwrap();

        let p = loaded.get(PatternType::BusinessExpense).unwrap();
        assert_eq!(p.frequency, 9);
        assert!((p.average_business_percentage - 72.0).abs() < 1e-9);
    }

    #[test]
    fn test_load_missing_key_is_none() {
        let db = Database::in_memory().unwrap();
        let loaded: Option<PatternStore> = db.load_json("nonexistent").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_overwrites_in_place() {
        let db = Database::in_memory().unwrap();

        let mut metrics = LearningMetrics::default();
        metrics.training_runs = 1;
        db.save_json(KEY_LEARNING_METRICS, &metrics).unwrap();

        metrics.training_runs = 2;
        db.save_json(KEY_LEARNING_METRICS, &metrics).unwrap();

        let loaded: LearningMetrics = db.load_json(KEY_LEARNING_METRICS).unwrap().unwrap();
        assert_eq!(loaded.training_runs, 2);
    }

    #[test]
    fn test_delete_removes_key() {
        let db = Database::in_memory().unwrap();
        db.save_json(KEY_LEARNING_METRICS, &LearningMetrics::default())
            .unwrap();
        db.delete(KEY_LEARNING_METRICS).unwrap();

        let loaded: Option<LearningMetrics> = db.load_json(KEY_LEARNING_METRICS).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_reopen_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let path_str = path.to_str().unwrap();

        {
            let db = Database::new(path_str).unwrap();
            let mut metrics = LearningMetrics::default();
            metrics.pairs_learned = 42;
            db.save_json(KEY_LEARNING_METRICS, &metrics).unwrap();
        }

        let db = Database::new(path_str).unwrap();
        let loaded: LearningMetrics = db.load_json(KEY_LEARNING_METRICS).unwrap().unwrap();
        assert_eq!(loaded.pairs_learned, 42);
    }
}
