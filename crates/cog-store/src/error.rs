use cog_core::CoreError;
use thiserror::Error;

/// Failures talking to a vector index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("index returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed index response: {0}")]
    Decode(String),

    #[error("index backend error: {0}")]
    Backend(String),
}

impl IndexError {
    /// Throttling, server-side and transport failures are worth another try.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) | Self::Backend(_) => false,
        }
    }
}

impl From<rusqlite::Error> for IndexError {
    fn from(e: rusqlite::Error) -> Self {
        IndexError::Backend(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("memory set '{0}' already exists")]
    DuplicateSet(String),

    #[error("unknown memory set '{0}'")]
    UnknownSet(String),

    #[error("coglet '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// The similarity search step of a recall failed. Not retried here.
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(#[source] IndexError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("refresh failed for {} of {} ids", failed.len(), failed.len() + succeeded.len())]
    PartialRefreshFailure {
        succeeded: Vec<String>,
        failed: Vec<String>,
    },

    /// Optimistic write lost to a concurrent writer too many times.
    #[error("concurrent update conflict on coglet '{0}'")]
    Conflict(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Errors caused by the caller's input rather than the system.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::DuplicateSet(_)
                | Self::UnknownSet(_)
                | Self::NotFound(_)
                | Self::Core(_)
                | Self::InvalidData(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
