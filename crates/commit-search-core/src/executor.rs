//! Commit search within a single repository.

use std::sync::Arc;

use regex::Regex;
use tracing::{debug, debug_span, warn, Instrument};

use crate::email::EmailLookup;
use crate::engine::{HistorySearchEngine, PathOptions, RawLogDiffSearchOptions, TextSearchOptions};
use crate::error::SearchResult;
use crate::highlight::{compile_terms, highlight_matches};
use crate::model::{
    CommitSearchResult, GitCommit, GitRef, HighlightedString, PatternInfo, RawCommit,
    RepositoryRevisions, SearchMode,
};
use crate::query::StructuredQuery;
use crate::translate::{translate, TranslateRequest};

/// Parameters of one per-repository commit search.
pub struct CommitSearchOp<'a> {
    pub repo_revs: &'a RepositoryRevisions,
    pub info: &'a PatternInfo,
    pub query: &'a dyn StructuredQuery,
    pub diff: bool,
    /// Content matching options; empty in log mode.
    pub text_search: TextSearchOptions,
    /// Free-text terms folded into the message filter.
    pub extra_message_values: Vec<String>,
}

/// Results of one per-repository search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoSearchOutput {
    pub results: Vec<CommitSearchResult>,
    /// More than `max_results` commits matched; `results` was truncated.
    pub limit_hit: bool,
    /// The engine stopped before walking the whole history.
    pub timed_out: bool,
}

/// Runs commit searches against one repository at a time.
///
/// Holds no mutable state; clones share the same collaborators.
#[derive(Clone)]
pub struct RepoSearcher {
    engine: Arc<dyn HistorySearchEngine>,
    emails: Arc<dyn EmailLookup>,
}

impl RepoSearcher {
    pub fn new(engine: Arc<dyn HistorySearchEngine>, emails: Arc<dyn EmailLookup>) -> Self {
        Self { engine, emails }
    }

    /// Search `repo_revs` in the given mode.
    pub async fn search(
        &self,
        mode: SearchMode,
        repo_revs: &RepositoryRevisions,
        info: &PatternInfo,
        query: &dyn StructuredQuery,
    ) -> SearchResult<RepoSearchOutput> {
        match mode {
            SearchMode::Diff => self.search_commit_diffs_in_repo(repo_revs, info, query).await,
            SearchMode::Log => self.search_commit_log_in_repo(repo_revs, info, query).await,
        }
    }

    /// Search commit diffs whose hunks match the pattern.
    pub async fn search_commit_diffs_in_repo(
        &self,
        repo_revs: &RepositoryRevisions,
        info: &PatternInfo,
        query: &dyn StructuredQuery,
    ) -> SearchResult<RepoSearchOutput> {
        self.search_commits_in_repo(CommitSearchOp {
            repo_revs,
            info,
            query,
            diff: true,
            text_search: TextSearchOptions {
                pattern: info.pattern.clone(),
                is_regexp: info.is_regexp,
                is_case_sensitive: info.is_case_sensitive,
            },
            extra_message_values: Vec::new(),
        })
        .await
    }

    /// Search commit messages; the pattern is matched against the message.
    pub async fn search_commit_log_in_repo(
        &self,
        repo_revs: &RepositoryRevisions,
        info: &PatternInfo,
        query: &dyn StructuredQuery,
    ) -> SearchResult<RepoSearchOutput> {
        let terms = if info.pattern.is_empty() {
            Vec::new()
        } else {
            vec![info.pattern.clone()]
        };
        self.search_commits_in_repo(CommitSearchOp {
            repo_revs,
            info,
            query,
            diff: false,
            text_search: TextSearchOptions::default(),
            extra_message_values: terms,
        })
        .await
    }

    pub async fn search_commits_in_repo(
        &self,
        op: CommitSearchOp<'_>,
    ) -> SearchResult<RepoSearchOutput> {
        let span = debug_span!(
            "commit_search.repo",
            repo = %op.repo_revs,
            diff = op.diff,
        );
        async move {
            let output = self.run(&op).await?;
            debug!(
                results = output.results.len(),
                limit_hit = output.limit_hit,
                timed_out = output.timed_out,
                "repository search finished"
            );
            Ok(output)
        }
        .instrument(span)
        .await
    }

    async fn run(&self, op: &CommitSearchOp<'_>) -> SearchResult<RepoSearchOutput> {
        let repo = op.repo_revs.repo.as_str();
        let max_results = op.info.max_results;

        let args = translate(
            TranslateRequest {
                info: op.info,
                query: op.query,
                revs: &op.repo_revs.revs,
                diff: op.diff,
                extra_message_values: &op.extra_message_values,
            },
            self.emails.as_ref(),
        )
        .await?;

        let opts = RawLogDiffSearchOptions {
            query: op.text_search.clone(),
            paths: PathOptions {
                include_patterns: op.info.include_patterns.clone(),
                exclude_pattern: op.info.exclude_pattern.clone(),
                is_case_sensitive: op.info.path_patterns_are_case_sensitive,
                is_regexp: op.info.path_patterns_are_regexps,
            },
            diff: op.diff,
            only_matching_hunks: true,
            args,
        };
        let response = self.engine.raw_log_diff_search(repo, &opts).await?;

        // An incomplete response means the engine hit its own deadline.
        let timed_out = !response.complete;
        let mut raw_commits = response.commits;
        let limit_hit = raw_commits.len() > max_results;
        raw_commits.truncate(max_results);

        let message_pattern = if !op.diff && !op.extra_message_values.is_empty() {
            match compile_terms(
                &op.extra_message_values,
                op.info.is_regexp,
                op.query.is_case_sensitive(),
            ) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(repo, error = %e, "message preview pattern did not compile");
                    None
                }
            }
        } else {
            None
        };

        let results = raw_commits
            .into_iter()
            .map(|raw| to_search_result(repo, raw, op, message_pattern.as_ref()))
            .collect();

        Ok(RepoSearchOutput {
            results,
            limit_hit,
            timed_out,
        })
    }
}

fn to_refs(repo: &str, names: Vec<String>) -> Vec<GitRef> {
    names
        .into_iter()
        .map(|name| GitRef {
            repo: repo.to_string(),
            name,
        })
        .collect()
}

fn to_search_result(
    repo: &str,
    raw: RawCommit,
    op: &CommitSearchOp<'_>,
    message_pattern: Option<&Regex>,
) -> CommitSearchResult {
    let message_preview = if op.diff {
        None
    } else if op.extra_message_values.is_empty() {
        Some(HighlightedString::plain(raw.message.clone()))
    } else {
        message_pattern.map(|re| highlight_matches(re, &raw.message))
    };

    let diff_preview = raw.diff.map(|diff| HighlightedString {
        value: diff.raw,
        highlights: raw.diff_highlights,
    });

    CommitSearchResult {
        commit: GitCommit {
            repo: repo.to_string(),
            oid: raw.hash,
            author: raw.author,
            committer: raw.committer,
            message: raw.message,
            parents: raw.parents,
        },
        refs: to_refs(repo, raw.ref_names),
        source_refs: to_refs(repo, raw.source_refs),
        message_preview,
        diff_preview,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::NoUsers;
    use crate::engine::RawLogDiffSearchResponse;
    use crate::error::SearchError;
    use crate::model::{Highlight, RawDiff, RevisionSpecifier, Signature};
    use crate::query::ParsedQuery;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    fn raw_commit(hash: &str, message: &str, day: u32) -> RawCommit {
        let sig = Signature {
            name: "Dev".into(),
            email: "dev@example.com".into(),
            date: Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
        };
        RawCommit {
            hash: hash.into(),
            ref_names: vec!["refs/heads/main".into()],
            source_refs: vec!["HEAD".into()],
            author: sig.clone(),
            committer: Some(sig),
            message: message.into(),
            parents: vec![],
            diff: None,
            diff_highlights: vec![],
        }
    }

    /// Engine returning a fixed response and recording the last request.
    struct FixedEngine {
        response: RawLogDiffSearchResponse,
        seen: Mutex<Option<RawLogDiffSearchOptions>>,
    }

    impl FixedEngine {
        fn new(commits: Vec<RawCommit>, complete: bool) -> Arc<Self> {
            Arc::new(Self {
                response: RawLogDiffSearchResponse { commits, complete },
                seen: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl HistorySearchEngine for FixedEngine {
        async fn raw_log_diff_search(
            &self,
            _repo: &str,
            opts: &RawLogDiffSearchOptions,
        ) -> SearchResult<RawLogDiffSearchResponse> {
            *self.seen.lock().unwrap() = Some(opts.clone());
            let max = opts
                .args
                .iter()
                .find_map(|a| a.strip_prefix("--max-count="))
                .and_then(|n| n.parse::<usize>().ok())
                .unwrap_or(usize::MAX);
            let mut response = self.response.clone();
            response.commits.truncate(max);
            Ok(response)
        }
    }

    fn searcher(engine: Arc<FixedEngine>) -> RepoSearcher {
        RepoSearcher::new(engine, Arc::new(NoUsers))
    }

    fn repo() -> RepositoryRevisions {
        RepositoryRevisions::new("github.com/org/a", vec![RevisionSpecifier::rev_spec("main")])
    }

    fn commits(n: usize) -> Vec<RawCommit> {
        (0..n)
            .map(|i| raw_commit(&format!("{i:040}"), "fix things", 1 + i as u32))
            .collect()
    }

    #[tokio::test]
    async fn test_more_than_max_results_sets_limit_hit() {
        let engine = FixedEngine::new(commits(8), true);
        let out = searcher(engine)
            .search_commit_log_in_repo(&repo(), &PatternInfo::literal("fix", 3), &ParsedQuery::new())
            .await
            .unwrap();
        assert_eq!(out.results.len(), 3);
        assert!(out.limit_hit);
        assert!(!out.timed_out);
    }

    #[tokio::test]
    async fn test_exactly_max_results_is_not_limit_hit() {
        let engine = FixedEngine::new(commits(3), true);
        let out = searcher(engine)
            .search_commit_log_in_repo(&repo(), &PatternInfo::literal("fix", 3), &ParsedQuery::new())
            .await
            .unwrap();
        assert_eq!(out.results.len(), 3);
        assert!(!out.limit_hit);
    }

    #[tokio::test]
    async fn test_requests_one_more_than_limit() {
        let engine = FixedEngine::new(commits(1), true);
        searcher(engine.clone())
            .search_commit_diffs_in_repo(&repo(), &PatternInfo::literal("x", 7), &ParsedQuery::new())
            .await
            .unwrap();
        let seen = engine.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.args[0], "--max-count=8");
        assert!(seen.diff);
        assert!(seen.only_matching_hunks);
        assert_eq!(seen.query.pattern, "x");
    }

    #[tokio::test]
    async fn test_incomplete_response_is_timed_out_with_partial_results() {
        let engine = FixedEngine::new(commits(2), false);
        let out = searcher(engine)
            .search_commit_log_in_repo(&repo(), &PatternInfo::literal("fix", 10), &ParsedQuery::new())
            .await
            .unwrap();
        assert!(out.timed_out);
        assert_eq!(out.results.len(), 2);
    }

    #[tokio::test]
    async fn test_log_mode_highlights_message() {
        let engine = FixedEngine::new(vec![raw_commit("a", "Refactor\nFIX the parser", 1)], true);
        let out = searcher(engine)
            .search_commit_log_in_repo(&repo(), &PatternInfo::literal("fix", 10), &ParsedQuery::new())
            .await
            .unwrap();
        let preview = out.results[0].message_preview.clone().unwrap();
        assert_eq!(preview.highlights, vec![Highlight { line: 2, character: 0, length: 3 }]);
        assert!(out.results[0].diff_preview.is_none());
        assert_eq!(out.results[0].refs[0].name, "refs/heads/main");
        assert_eq!(out.results[0].source_refs[0].name, "HEAD");
        assert_eq!(out.results[0].repo(), "github.com/org/a");
    }

    #[tokio::test]
    async fn test_log_mode_without_pattern_has_plain_preview() {
        let engine = FixedEngine::new(vec![raw_commit("a", "anything", 1)], true);
        let out = searcher(engine)
            .search_commit_log_in_repo(&repo(), &PatternInfo::literal("", 10), &ParsedQuery::new())
            .await
            .unwrap();
        assert_eq!(
            out.results[0].message_preview,
            Some(HighlightedString::plain("anything"))
        );
    }

    #[tokio::test]
    async fn test_diff_mode_wraps_engine_highlights() {
        let mut commit = raw_commit("a", "msg", 1);
        commit.diff = Some(RawDiff { raw: "+fix\n".into() });
        commit.diff_highlights = vec![Highlight { line: 1, character: 1, length: 3 }];
        let engine = FixedEngine::new(vec![commit], true);
        let out = searcher(engine)
            .search_commit_diffs_in_repo(&repo(), &PatternInfo::literal("fix", 10), &ParsedQuery::new())
            .await
            .unwrap();
        let diff = out.results[0].diff_preview.clone().unwrap();
        assert_eq!(diff.value, "+fix\n");
        assert_eq!(diff.highlights.len(), 1);
        assert!(out.results[0].message_preview.is_none());
    }

    #[tokio::test]
    async fn test_translation_error_skips_engine() {
        let engine = FixedEngine::new(commits(1), true);
        let bad = RepositoryRevisions::new("r", vec![RevisionSpecifier::rev_spec("--all")]);
        let err = searcher(engine.clone())
            .search_commit_log_in_repo(&bad, &PatternInfo::literal("fix", 10), &ParsedQuery::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidQuery(_)));
        assert!(engine.seen.lock().unwrap().is_none());
    }
}
