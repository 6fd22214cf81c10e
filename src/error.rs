use std::path::PathBuf;

use thiserror::Error;

/// Failures raised while talking to a remote source. None of these are fatal:
/// the caller should treat them as "source unavailable, try later".
#[derive(Error, Debug)]
pub enum SourceError {
    #[error(transparent)]
    Network(#[from] reqwest::Error),
    #[error("not found: {url}")]
    NotFound { url: String },
    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("expected {expected} from {url}, got {found}")]
    UnexpectedMime {
        url: String,
        expected: &'static str,
        found: String,
    },
    #[error("unexpected markup: {0}")]
    Format(String),
    #[error("not supported by this source: {0}")]
    Unsupported(&'static str),
}

impl SourceError {
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Transport failures and throttling/server errors are worth retrying as is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error(transparent)]
    Database(sqlx::Error),
    #[error("{what} already exists")]
    Duplicate { what: String },
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid cache key component: {0:?}")]
    InvalidKey(String),
    #[error(transparent)]
    Encoding(#[from] serde_json::Error),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Map a unique-constraint violation to `Duplicate`, everything else to `Database`.
    pub(crate) fn from_insert(err: sqlx::Error, what: impl FnOnce() -> String) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::Duplicate { what: what() },
            _ => Self::Database(err),
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("no source registered with id {0:?}")]
    UnknownSource(String),
    #[error("series {0} not found")]
    SeriesNotFound(i64),
    #[error("chapter {0} not found")]
    ChapterNotFound(i64),
    #[error("page {index} of chapter {chapter} is unavailable")]
    PageUnavailable { chapter: i64, index: usize },
    #[error(transparent)]
    Archive(#[from] zip::result::ZipError),
}

impl Error {
    /// Whether retrying the same call later may succeed without user action.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Source(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(StorageError::Database(err))
    }
}

pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        let throttled = SourceError::Status { url: "u".into(), status: 429 };
        let gone = SourceError::NotFound { url: "u".into() };
        let teapot = SourceError::Status { url: "u".into(), status: 418 };
        assert!(throttled.is_retryable());
        assert!(!gone.is_retryable());
        assert!(!teapot.is_retryable());
        assert!(Error::from(throttled).is_retryable());
        assert!(!Error::SeriesNotFound(1).is_retryable());
    }
}
