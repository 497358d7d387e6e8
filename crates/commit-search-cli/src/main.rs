//! commit-search - search commit messages and diffs across many git repositories.
//!
//! ```text
//! commit-search --author @alice --after "2 weeks ago" fix org/api org/web@main:*release/*
//! commit-search --diff --regex 'unwrap\(\)' --include '\.rs$' org/api
//! ```
//!
//! Results from every repository are merged newest first and printed as JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use serde::Serialize;
use tracing::info;

use commit_search_core::telemetry::level_for_verbosity;
use commit_search_core::{
    CommitSearchAggregator, CommitSearchOutcome, EmailLookup, GitLogEngine, NoUsers, ParsedQuery,
    PatternInfo, QueryField, RepoSearcher, RepositoryRevisions, RevisionSpecifier, SearchConfig,
    SearchMode, StaticEmailDirectory,
};

#[derive(Parser, Debug)]
#[command(name = "commit-search")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Search commit messages and diffs across git repositories", long_about = None)]
struct Cli {
    /// Pattern to match: against diff hunks with --diff, otherwise against messages
    pattern: String,

    /// Repositories to search, as REPO or REPO@rev[:rev...]
    ///
    /// A revision starting with `*` is a ref glob, one starting with `^`
    /// excludes refs matching the glob.
    #[arg(required = true)]
    repos: Vec<String>,

    /// Search diffs instead of commit messages
    #[arg(long)]
    diff: bool,

    /// Treat the pattern and path filters as regular expressions
    #[arg(long)]
    regex: bool,

    /// Match case-sensitively
    #[arg(long)]
    case_sensitive: bool,

    /// Maximum results per repository
    #[arg(long, default_value_t = 30)]
    max_results: usize,

    /// Commit message must match
    #[arg(long, value_name = "PATTERN")]
    message: Vec<String>,

    /// Commit message must not match
    #[arg(long, value_name = "PATTERN")]
    not_message: Vec<String>,

    /// Author must match; `@user` expands to the user's verified emails
    #[arg(long, value_name = "PATTERN")]
    author: Vec<String>,

    /// Author must not match
    #[arg(long, value_name = "PATTERN")]
    not_author: Vec<String>,

    /// Committer must match; `@user` expands to the user's verified emails
    #[arg(long, value_name = "PATTERN")]
    committer: Vec<String>,

    /// Committer must not match
    #[arg(long, value_name = "PATTERN")]
    not_committer: Vec<String>,

    /// Only commits before this date
    #[arg(long, value_name = "DATE")]
    before: Vec<String>,

    /// Only commits after this date
    #[arg(long, value_name = "DATE")]
    after: Vec<String>,

    /// Diff mode: only files whose path matches (repeatable, all must match)
    #[arg(long, value_name = "PATH")]
    include: Vec<String>,

    /// Diff mode: skip files whose path matches
    #[arg(long, value_name = "PATH")]
    exclude: Option<String>,

    /// JSON file mapping usernames to email addresses
    #[arg(long, value_name = "FILE", env = "COMMIT_SEARCH_USERS")]
    users: Option<PathBuf>,

    /// Directory containing the repositories
    #[arg(long, value_name = "DIR", default_value = ".", env = "COMMIT_SEARCH_ROOT")]
    root: PathBuf,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json_logs: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn mode(&self) -> SearchMode {
        if self.diff {
            SearchMode::Diff
        } else {
            SearchMode::Log
        }
    }

    fn pattern_info(&self) -> PatternInfo {
        PatternInfo {
            pattern: self.pattern.clone(),
            is_regexp: self.regex,
            is_case_sensitive: self.case_sensitive,
            max_results: self.max_results,
            include_patterns: self.include.clone(),
            exclude_pattern: self.exclude.clone(),
            path_patterns_are_regexps: self.regex,
            path_patterns_are_case_sensitive: self.case_sensitive,
        }
    }

    fn query(&self) -> ParsedQuery {
        let mut query = ParsedQuery::new().case_sensitive(self.case_sensitive);
        let fields = [
            (QueryField::Message, &self.message, false),
            (QueryField::Message, &self.not_message, true),
            (QueryField::Author, &self.author, false),
            (QueryField::Author, &self.not_author, true),
            (QueryField::Committer, &self.committer, false),
            (QueryField::Committer, &self.not_committer, true),
            (QueryField::Before, &self.before, false),
            (QueryField::After, &self.after, false),
        ];
        for (field, values, negated) in fields {
            for value in values {
                query.push(field, value.clone(), negated);
            }
        }
        query
    }
}

/// Parse `REPO[@rev[:rev...]]`.
fn parse_repo_arg(arg: &str) -> Result<RepositoryRevisions> {
    let (repo, revs) = match arg.split_once('@') {
        Some((repo, revs)) => (repo, Some(revs)),
        None => (arg, None),
    };
    if repo.is_empty() {
        bail!("missing repository name in {arg:?}");
    }
    let revs = revs
        .map(|revs| revs.split(':').map(parse_rev).collect())
        .unwrap_or_default();
    Ok(RepositoryRevisions::new(repo, revs))
}

fn parse_rev(rev: &str) -> RevisionSpecifier {
    if let Some(glob) = rev.strip_prefix("*!").or_else(|| rev.strip_prefix('^')) {
        RevisionSpecifier::ExcludeRefGlob(glob.to_string())
    } else if let Some(glob) = rev.strip_prefix('*') {
        RevisionSpecifier::RefGlob(glob.to_string())
    } else {
        RevisionSpecifier::rev_spec(rev)
    }
}

fn load_users(path: Option<&Path>) -> Result<Arc<dyn EmailLookup>> {
    match path {
        Some(path) => {
            let directory = StaticEmailDirectory::from_json_file(path)
                .with_context(|| format!("Failed to load users from {}", path.display()))?;
            info!(users = directory.len(), "loaded user directory");
            Ok(Arc::new(directory))
        }
        None => Ok(Arc::new(NoUsers)),
    }
}

#[derive(Serialize)]
struct Report<'a> {
    pattern: &'a str,
    mode: SearchMode,
    #[serde(flatten)]
    outcome: &'a CommitSearchOutcome,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    commit_search_core::init_tracing(cli.json_logs, level_for_verbosity(cli.verbose));

    let config = SearchConfig::from_env().context("Invalid search configuration")?;
    let repos = cli
        .repos
        .iter()
        .map(|r| parse_repo_arg(r))
        .collect::<Result<Vec<_>>>()?;
    let emails = load_users(cli.users.as_deref())?;

    let engine = Arc::new(GitLogEngine::from_config(&cli.root, &config));
    let aggregator = CommitSearchAggregator::from_config(RepoSearcher::new(engine, emails), &config);

    let mode = cli.mode();
    let outcome = aggregator
        .search(repos, cli.pattern_info(), Arc::new(cli.query()), mode)
        .await
        .context("Commit search failed")?;

    let report = Report {
        pattern: &cli.pattern,
        mode,
        outcome: &outcome,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
