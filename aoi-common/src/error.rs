//! Store-level errors shared by ingestion and review

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller-supplied filter, dimension or field value was rejected
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A stored row no longer decodes into the defect model
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("No issue with id {0}")]
    UnknownIssue(i64),

    /// Aggregate result could not be serialized into or out of the cache
    #[error("Aggregate cache error: {0}")]
    Cache(String),
}
