use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to load gazetteer dataset: {0}")]
    DatasetLoadFailed(String),
    #[error("remote lookup failed: {0}")]
    RemoteLookupFailed(String),
    #[error("cache store quota exceeded")]
    StorageQuotaExceeded,
    #[error("operation cancelled")]
    Cancelled,
    #[error("malformed cache entry for {0}")]
    MalformedCacheEntry(String),
    #[error("no locations to resolve")]
    NothingToResolve,
    #[error("failed to resolve required path: {0}")]
    Path(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}
