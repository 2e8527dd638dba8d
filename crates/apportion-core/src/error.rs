//! Error types for Apportion

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Engine busy: another operation is in flight, retry {0}")]
    Busy(&'static str),

    #[error("Engine not ready: current state is {0}")]
    NotReady(String),

    #[error("Privacy precondition failed: {0}")]
    Privacy(String),
}

pub type Result<T> = std::result::Result<T, Error>;
