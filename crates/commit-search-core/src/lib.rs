//! Commit and diff search fanned out across many repositories.
//!
//! A search is described by a [`PatternInfo`] plus a [`StructuredQuery`].
//! [`CommitSearchAggregator`] runs one [`RepoSearcher`] per repository,
//! which translates the query into `git log` arguments, calls a
//! [`HistorySearchEngine`], and highlights matches. Results from all
//! repositories are merged newest first.

pub mod aggregator;
pub mod config;
pub mod email;
pub mod engine;
pub mod error;
pub mod executor;
pub mod git;
pub mod highlight;
pub mod model;
pub mod query;
pub mod telemetry;
pub mod translate;

pub use aggregator::{AggregateState, CommitSearchAggregator, CommitSearchOutcome, SearchStats};
pub use config::{parse_duration, SearchConfig, DEFAULT_GIT_LOG_SEARCH_TIMEOUT};
pub use email::{
    expand_usernames_to_emails, EmailLookup, NoUsers, StaticEmailDirectory, UserEmail,
};
pub use engine::{
    HistorySearchEngine, PathOptions, RawLogDiffSearchOptions, RawLogDiffSearchResponse,
    TextSearchOptions,
};
pub use error::{SearchError, SearchResult};
pub use executor::{CommitSearchOp, RepoSearchOutput, RepoSearcher};
pub use git::GitLogEngine;
pub use highlight::{highlight_matches, pattern_matching_exprs_in_order, MAX_MATCHES_PER_LINE};
pub use model::{
    CommitSearchResult, GitCommit, GitRef, Highlight, HighlightedString, PatternInfo, RawCommit,
    RawDiff, RepositoryRevisions, RevisionSpecifier, SearchMode, Signature,
};
pub use query::{ParsedQuery, QueryField, StructuredQuery};
pub use telemetry::init_tracing;
pub use translate::{translate, validate_revspec, TranslateRequest};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
