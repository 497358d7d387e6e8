//! Error taxonomy for commit search.

use crate::model::SearchMode;

/// Errors produced while translating, executing, or aggregating a commit search.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// A query value would be misinterpreted by the history engine (e.g. a
    /// revspec starting with `-`).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The query is well-formed but cannot be expressed as a single log search.
    #[error("query not supported: {0}")]
    UnsupportedQuery(String),

    #[error("search timed out: {0}")]
    Timeout(String),

    /// A retryable backend condition.
    #[error("temporary failure: {0}")]
    Transient(String),

    #[error("repository not found: {repo}")]
    RepoNotFound { repo: String },

    #[error("repository clone in progress: {repo}")]
    CloneInProgress { repo: String },

    #[error("revision not found in {repo}: {detail}")]
    RevisionNotFound { repo: String, detail: String },

    #[error("expanding usernames in field {field}: {source}")]
    EmailLookup {
        field: String,
        #[source]
        source: Box<SearchError>,
    },

    #[error("history engine error: {0}")]
    Engine(String),

    #[error("search task failed: {0}")]
    Task(String),

    /// Fatal per-repository error surfaced by the aggregator.
    #[error("failed to search commit {mode} {repo}: {source}")]
    RepoSearchFailed {
        repo: String,
        mode: SearchMode,
        #[source]
        source: Box<SearchError>,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SearchError {
    /// Whether the error reports that a deadline was exceeded.
    pub fn is_timeout(&self) -> bool {
        match self {
            SearchError::Timeout(_) => true,
            SearchError::RepoSearchFailed { source, .. }
            | SearchError::EmailLookup { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Whether the error is a retryable condition that should not abort a
    /// multi-repository search.
    pub fn is_temporary(&self) -> bool {
        match self {
            SearchError::Transient(_) => true,
            SearchError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            SearchError::RepoSearchFailed { source, .. }
            | SearchError::EmailLookup { source, .. } => source.is_temporary(),
            _ => false,
        }
    }
}

/// Result type for commit search operations.
pub type SearchResult<T> = std::result::Result<T, SearchError>;
