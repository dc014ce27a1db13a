use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PineappleError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata probe failed: {0}")]
    Probe(String),

    #[error("Thumbnail extraction failed: {0}")]
    Thumbnail(String),

    #[error("Storage access denied for {0:?}")]
    StorageDenied(PathBuf),

    #[error("Scan failed: {0}")]
    Scan(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, PineappleError>;
