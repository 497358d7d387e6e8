//! Contract of the external history-search engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SearchResult;
use crate::model::RawCommit;

/// Content-matching options, applied to diff hunks in diff mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSearchOptions {
    pub pattern: String,
    pub is_regexp: bool,
    pub is_case_sensitive: bool,
}

/// Path filters applied to the files touched by a diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathOptions {
    /// Every pattern must match for a file to be included.
    pub include_patterns: Vec<String>,
    pub exclude_pattern: Option<String>,
    pub is_case_sensitive: bool,
    pub is_regexp: bool,
}

/// One request to the history engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLogDiffSearchOptions {
    pub query: TextSearchOptions,
    pub paths: PathOptions,
    pub diff: bool,
    /// Return only the hunks that match `query` instead of whole diffs.
    pub only_matching_hunks: bool,
    /// `git log` arguments built by the translator.
    pub args: Vec<String>,
}

/// Commits found by the engine, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLogDiffSearchResponse {
    pub commits: Vec<RawCommit>,
    /// `false` when the engine stopped early (its own deadline) and `commits`
    /// is a prefix of the full answer.
    pub complete: bool,
}

/// Walks repository history and returns raw commit records.
#[async_trait]
pub trait HistorySearchEngine: Send + Sync {
    async fn raw_log_diff_search(
        &self,
        repo: &str,
        opts: &RawLogDiffSearchOptions,
    ) -> SearchResult<RawLogDiffSearchResponse>;
}
