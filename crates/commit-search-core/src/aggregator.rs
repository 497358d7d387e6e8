//! Concurrent commit search across many repositories.
//!
//! [`CommitSearchAggregator`] runs one [`RepoSearcher`] task per repository,
//! classifies each task's error as tolerable or fatal, and merges the
//! surviving results into one list ordered by author date, newest first.
//!
//! All tasks share one cancellation scope. The first fatal error cancels it;
//! tasks that were still running are then discarded without being reported.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::SearchConfig;
use crate::error::{SearchError, SearchResult};
use crate::executor::{RepoSearchOutput, RepoSearcher};
use crate::model::{CommitSearchResult, PatternInfo, RepositoryRevisions, SearchMode};
use crate::query::StructuredQuery;

/// Per-repository bookkeeping for a multi-repository search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchStats {
    /// `true` when at least one repository hit its result limit.
    pub limit_hit: bool,
    /// Repositories whose results were truncated to `max_results`.
    pub repos_limit_hit: Vec<String>,
    /// Repositories that were searched (possibly partially).
    pub searched: Vec<String>,
    /// Repositories that timed out or failed transiently.
    pub timed_out: Vec<String>,
    /// Repositories that do not exist.
    pub missing: Vec<String>,
    /// Repositories still being cloned.
    pub cloning: Vec<String>,
}

/// Lifecycle of one aggregate search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateState {
    Running,
    /// Every task finished and none failed fatally.
    Completed,
    /// A fatal error was observed. Terminal.
    Aborted,
}

/// Merged results of a successful multi-repository search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSearchOutcome {
    /// All matches, most recent author date first.
    pub results: Vec<CommitSearchResult>,
    pub stats: SearchStats,
}

/// How a repository task ended.
#[derive(Debug)]
enum RepoTaskExit {
    /// The shared scope was cancelled while the task was running.
    Aborted,
    /// The task's own per-repository deadline elapsed.
    DeadlineExceeded,
    Finished(SearchResult<RepoSearchOutput>),
}

/// Shared accumulator. Only [`Aggregate::merge`] and the final collection
/// touch it, always under the mutex.
#[derive(Debug)]
struct Aggregate {
    state: AggregateState,
    stats: SearchStats,
    unflattened: Vec<Vec<CommitSearchResult>>,
    fatal: Option<SearchError>,
}

impl Aggregate {
    fn new() -> Self {
        Self {
            state: AggregateState::Running,
            stats: SearchStats::default(),
            unflattened: Vec::new(),
            fatal: None,
        }
    }

    /// Record one repository's outcome. Returns `true` when the outcome was
    /// fatal and the shared scope must be cancelled.
    fn merge(
        &mut self,
        repo_revs: &RepositoryRevisions,
        mode: SearchMode,
        output: RepoSearchOutput,
        search_err: Option<SearchError>,
    ) -> bool {
        if self.state != AggregateState::Running {
            return false;
        }
        let repo = repo_revs.repo.clone();
        self.stats.limit_hit |= output.limit_hit;
        if output.limit_hit {
            self.stats.repos_limit_hit.push(repo.clone());
        }

        match search_err {
            None => {
                if output.timed_out {
                    self.stats.timed_out.push(repo.clone());
                }
            }
            Some(SearchError::RepoNotFound { .. }) => {
                self.stats.missing.push(repo);
                return false;
            }
            Some(SearchError::CloneInProgress { .. }) => {
                self.stats.cloning.push(repo);
                return false;
            }
            // With no explicit revision, a missing revision means an empty repository.
            Some(SearchError::RevisionNotFound { .. }) if repo_revs.uses_default_revision() => {}
            Some(err) if err.is_timeout() || err.is_temporary() => {
                self.stats.timed_out.push(repo.clone());
            }
            Some(err) => {
                self.state = AggregateState::Aborted;
                self.fatal = Some(SearchError::RepoSearchFailed {
                    repo,
                    mode,
                    source: Box::new(err),
                });
                return true;
            }
        }

        self.stats.searched.push(repo);
        if !output.results.is_empty() {
            self.unflattened.push(output.results);
        }
        false
    }
}

fn lock(aggregate: &Mutex<Aggregate>) -> MutexGuard<'_, Aggregate> {
    aggregate.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fans a commit search out over many repositories.
#[derive(Clone)]
pub struct CommitSearchAggregator {
    searcher: RepoSearcher,
    repo_timeout: Option<Duration>,
    max_concurrency: Option<usize>,
}

impl CommitSearchAggregator {
    pub fn new(searcher: RepoSearcher) -> Self {
        Self {
            searcher,
            repo_timeout: None,
            max_concurrency: None,
        }
    }

    /// Aggregator using the per-repository deadline and concurrency cap from `config`.
    pub fn from_config(searcher: RepoSearcher, config: &SearchConfig) -> Self {
        Self {
            searcher,
            repo_timeout: config.repo_search_timeout,
            max_concurrency: config.max_concurrency,
        }
    }

    /// Bound each repository search; expiry is reported as a timeout.
    pub fn with_repo_timeout(mut self, timeout: Duration) -> Self {
        self.repo_timeout = Some(timeout);
        self
    }

    /// Limit how many repositories are searched at once.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max.max(1));
        self
    }

    /// Search all `repos` concurrently.
    ///
    /// Returns the merged results and stats, or the first fatal error. A fatal
    /// error discards every partial result.
    pub async fn search(
        &self,
        repos: Vec<RepositoryRevisions>,
        info: PatternInfo,
        query: Arc<dyn StructuredQuery>,
        mode: SearchMode,
    ) -> SearchResult<CommitSearchOutcome> {
        let span = info_span!(
            "commit_search.search",
            search_id = %Uuid::new_v4(),
            mode = %mode,
            repos = repos.len(),
        );
        self.run(repos, Arc::new(info), query, mode)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        repos: Vec<RepositoryRevisions>,
        info: Arc<PatternInfo>,
        query: Arc<dyn StructuredQuery>,
        mode: SearchMode,
    ) -> SearchResult<CommitSearchOutcome> {
        let scope = CancellationToken::new();
        // Outstanding tasks stop if this future is dropped.
        let _scope_guard = scope.clone().drop_guard();
        let aggregate = Arc::new(Mutex::new(Aggregate::new()));
        let permits = self.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));

        let mut join_set = JoinSet::new();
        for repo_revs in repos {
            let searcher = self.searcher.clone();
            let info = Arc::clone(&info);
            let query = Arc::clone(&query);
            let scope = scope.clone();
            let aggregate = Arc::clone(&aggregate);
            let permits = permits.clone();
            let repo_timeout = self.repo_timeout;

            join_set.spawn(
                async move {
                    let exit = tokio::select! {
                        biased;
                        _ = scope.cancelled() => RepoTaskExit::Aborted,
                        exit = async {
                            let _permit = match &permits {
                                Some(sem) => match sem.acquire().await {
                                    Ok(permit) => Some(permit),
                                    Err(_) => return RepoTaskExit::Aborted,
                                },
                                None => None,
                            };
                            search_one(&searcher, mode, &repo_revs, &info, query.as_ref(), repo_timeout).await
                        } => exit,
                    };

                    let (output, search_err) = match exit {
                        RepoTaskExit::Aborted => {
                            debug!(repo = %repo_revs.repo, "discarding repository search after abort");
                            return;
                        }
                        _ if scope.is_cancelled() => {
                            debug!(repo = %repo_revs.repo, "discarding repository search after abort");
                            return;
                        }
                        RepoTaskExit::DeadlineExceeded => (
                            RepoSearchOutput {
                                timed_out: true,
                                ..RepoSearchOutput::default()
                            },
                            None,
                        ),
                        RepoTaskExit::Finished(Ok(output)) => (output, None),
                        RepoTaskExit::Finished(Err(err)) => {
                            warn!(
                                repo = %repo_revs.repo,
                                error = %err,
                                timeout = err.is_timeout(),
                                temporary = err.is_temporary(),
                                "repository search failed"
                            );
                            (RepoSearchOutput::default(), Some(err))
                        }
                    };

                    let fatal = lock(&aggregate).merge(&repo_revs, mode, output, search_err);
                    if fatal {
                        scope.cancel();
                    }
                }
                .in_current_span(),
            );
        }

        while let Some(joined) = join_set.join_next().await {
            if let Err(join_err) = joined {
                let mut agg = lock(&aggregate);
                if agg.state == AggregateState::Running {
                    agg.state = AggregateState::Aborted;
                    agg.fatal = Some(SearchError::Task(join_err.to_string()));
                }
                drop(agg);
                scope.cancel();
            }
        }

        let mut agg = lock(&aggregate);
        if let Some(err) = agg.fatal.take() {
            error!(error = %err, "commit search aborted");
            return Err(err);
        }
        agg.state = AggregateState::Completed;

        let mut results: Vec<CommitSearchResult> = agg.unflattened.drain(..).flatten().collect();
        // Most recent commits first.
        results.sort_by(|a, b| b.author_date().cmp(&a.author_date()));
        let stats = std::mem::take(&mut agg.stats);

        info!(
            results = results.len(),
            searched = stats.searched.len(),
            timed_out = stats.timed_out.len(),
            limit_hit = stats.limit_hit,
            "commit search completed"
        );
        Ok(CommitSearchOutcome { results, stats })
    }
}

/// Run one repository search, bounded by the optional per-repository deadline.
async fn search_one(
    searcher: &RepoSearcher,
    mode: SearchMode,
    repo_revs: &RepositoryRevisions,
    info: &PatternInfo,
    query: &dyn StructuredQuery,
    repo_timeout: Option<Duration>,
) -> RepoTaskExit {
    let search = searcher.search(mode, repo_revs, info, query);
    match repo_timeout {
        Some(limit) => match tokio::time::timeout(limit, search).await {
            Ok(result) => RepoTaskExit::Finished(result),
            Err(_elapsed) => RepoTaskExit::DeadlineExceeded,
        },
        None => RepoTaskExit::Finished(search.await),
    }
}
