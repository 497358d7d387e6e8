//! History search backed by the local `git` binary.
//!
//! [`GitLogEngine`] runs `git log` in a repository directory, decodes the
//! NUL-separated records it prints, and in diff mode keeps only the hunks
//! and files that match the request.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::engine::{
    HistorySearchEngine, PathOptions, RawLogDiffSearchOptions, RawLogDiffSearchResponse,
    TextSearchOptions,
};
use crate::error::{SearchError, SearchResult};
use crate::highlight::{compile_terms, MAX_MATCHES_PER_LINE};
use crate::model::{Highlight, RawCommit, RawDiff, Signature};

const RECORD_SEPARATOR: u8 = 0x1e;

/// hash, ref names, source, author name/email/time, committer name/email/time,
/// body, parents. The patch (diff mode) follows the final NUL.
const LOG_FORMAT: &str =
    "--format=%x1e%H%x00%D%x00%S%x00%an%x00%ae%x00%at%x00%cn%x00%ce%x00%ct%x00%B%x00%P%x00";

/// `git log` flags the translator may produce. Anything else starting with
/// `-` is refused.
const ALLOWED_FLAGS: &[&str] = &[
    "--max-count=",
    "--unified=0",
    "--no-prefix",
    "--extended-regexp",
    "--regexp-ignore-case",
    "--glob=",
    "--exclude=",
    "--until=",
    "--since=",
    "--all-match",
    "--invert-grep",
    "--grep=",
    "--author=",
    "--committer=",
];

/// Whether `arg` may be passed to `git log`.
pub fn is_allowed_log_arg(arg: &str) -> bool {
    if !arg.starts_with('-') {
        return true;
    }
    ALLOWED_FLAGS.iter().any(|flag| {
        if flag.ends_with('=') {
            arg.starts_with(flag)
        } else {
            arg == *flag
        }
    })
}

/// [`HistorySearchEngine`] that shells out to `git log`.
#[derive(Debug, Clone)]
pub struct GitLogEngine {
    root: PathBuf,
    git_binary: String,
    timeout: Duration,
}

impl GitLogEngine {
    /// Engine resolving repository names relative to `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::from_config(root, &SearchConfig::default())
    }

    pub fn from_config(root: impl Into<PathBuf>, config: &SearchConfig) -> Self {
        Self {
            root: root.into(),
            git_binary: config.git_binary.clone(),
            timeout: config.git_log_search_timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Directory of `repo`: absolute names are used as-is, others are joined
    /// onto the root.
    fn repo_dir(&self, repo: &str) -> SearchResult<PathBuf> {
        let candidate = Path::new(repo);
        let dir = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let is_repo = dir.join(".git").exists() || dir.join("HEAD").is_file();
        if !dir.is_dir() || !is_repo {
            return Err(SearchError::RepoNotFound {
                repo: repo.to_string(),
            });
        }
        Ok(dir)
    }

    fn build_args(opts: &RawLogDiffSearchOptions) -> SearchResult<Vec<String>> {
        if let Some(bad) = opts.args.iter().find(|a| !is_allowed_log_arg(a)) {
            return Err(SearchError::InvalidQuery(format!(
                "git log argument not allowed: {bad:?}"
            )));
        }

        // In diff mode commits are dropped after git emits them, so the count
        // cap is applied to filtered records instead of passed to git.
        let passthrough = opts
            .args
            .iter()
            .filter(|a| !(opts.diff && a.starts_with("--max-count=")))
            .cloned();

        let mut args = vec![
            "log".to_string(),
            "--no-color".to_string(),
            "--decorate=full".to_string(),
            "--source".to_string(),
            LOG_FORMAT.to_string(),
        ];
        if opts.diff {
            args.push("--patch".to_string());
            if let Some(pattern) = pickaxe_pattern(opts) {
                args.push(format!("-G{pattern}"));
            }
        }
        args.extend(passthrough);
        // Everything before this is a revision, never a path.
        args.push("--".to_string());
        Ok(args)
    }
}

#[async_trait]
impl HistorySearchEngine for GitLogEngine {
    async fn raw_log_diff_search(
        &self,
        repo: &str,
        opts: &RawLogDiffSearchOptions,
    ) -> SearchResult<RawLogDiffSearchResponse> {
        let dir = self.repo_dir(repo)?;
        let args = Self::build_args(opts)?;
        let filter = opts.diff.then(|| DiffFilter::new(opts)).transpose()?;
        let cap = if opts.diff { max_count(&opts.args) } else { None };
        let mut records = RecordCollector::new(filter.as_ref(), opts.only_matching_hunks, cap);

        let mut child = Command::new(&self.git_binary)
            .args(&args)
            .current_dir(&dir)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| SearchError::Engine("git stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| SearchError::Engine("git stderr not captured".to_string()))?;
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });

        let deadline = Instant::now() + self.timeout;
        let mut chunk = [0u8; 64 * 1024];
        let mut stop = ReadStop::Eof;
        loop {
            match tokio::time::timeout_at(deadline, stdout.read(&mut chunk)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => {
                    if records.feed(&chunk[..n])? {
                        stop = ReadStop::CapReached;
                        break;
                    }
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_elapsed) => {
                    stop = ReadStop::Deadline;
                    break;
                }
            }
        }

        let commits = match stop {
            ReadStop::Eof => {
                let status = child.wait().await?;
                let stderr = stderr_task
                    .await
                    .map_err(|e| SearchError::Task(e.to_string()))?;
                if !status.success() {
                    return Err(classify_git_failure(repo, &String::from_utf8_lossy(&stderr)));
                }
                records.finish()?
            }
            ReadStop::CapReached | ReadStop::Deadline => {
                if stop == ReadStop::Deadline {
                    warn!(repo, timeout_ms = self.timeout.as_millis() as u64, "git log timed out");
                }
                let _ = child.start_kill();
                let _ = child.wait().await;
                stderr_task.abort();
                records.into_commits()
            }
        };
        let complete = stop != ReadStop::Deadline;
        debug!(repo, commits = commits.len(), complete, "git log finished");
        Ok(RawLogDiffSearchResponse { commits, complete })
    }
}

fn classify_git_failure(repo: &str, stderr: &str) -> SearchError {
    let detail = stderr.trim().to_string();
    if stderr.contains("not a git repository") {
        SearchError::RepoNotFound {
            repo: repo.to_string(),
        }
    } else if stderr.contains("unknown revision")
        || stderr.contains("bad revision")
        || stderr.contains("does not have any commits yet")
    {
        SearchError::RevisionNotFound {
            repo: repo.to_string(),
            detail,
        }
    } else {
        SearchError::Engine(format!("git log failed: {detail}"))
    }
}

/// Escape POSIX extended-regex metacharacters.
fn ere_escape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if ".[]()*+?{}|^$\\".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// `-G` pattern used to let git skip commits early, if it is safe to do so.
///
/// Only literal patterns are handed to git: its regex dialect differs from
/// the one used for hunk filtering. git must also be at least as lenient
/// about case as the hunk filter, otherwise it would skip real matches.
fn pickaxe_pattern(opts: &RawLogDiffSearchOptions) -> Option<String> {
    let TextSearchOptions {
        pattern,
        is_regexp,
        is_case_sensitive,
    } = &opts.query;
    let git_ignores_case = opts.args.iter().any(|a| a == "--regexp-ignore-case");
    if pattern.is_empty() || *is_regexp || !(*is_case_sensitive || git_ignores_case) {
        return None;
    }
    Some(ere_escape(pattern))
}

fn max_count(args: &[String]) -> Option<usize> {
    args.iter()
        .find_map(|a| a.strip_prefix("--max-count="))
        .and_then(|n| n.parse().ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadStop {
    Eof,
    CapReached,
    Deadline,
}

/// Incremental decoder for `git log` output.
///
/// Only records followed by another separator are decoded while reading;
/// the trailing one is decoded by [`RecordCollector::finish`] once the
/// output is known to be complete.
struct RecordCollector<'a> {
    pending: Vec<u8>,
    filter: Option<&'a DiffFilter>,
    only_matching_hunks: bool,
    cap: Option<usize>,
    commits: Vec<RawCommit>,
}

impl<'a> RecordCollector<'a> {
    fn new(filter: Option<&'a DiffFilter>, only_matching_hunks: bool, cap: Option<usize>) -> Self {
        Self {
            pending: Vec::new(),
            filter,
            only_matching_hunks,
            cap,
            commits: Vec::new(),
        }
    }

    /// Append output; returns `true` once `cap` commits have been kept.
    fn feed(&mut self, bytes: &[u8]) -> SearchResult<bool> {
        self.pending.extend_from_slice(bytes);
        let Some(last) = self.pending.iter().rposition(|b| *b == RECORD_SEPARATOR) else {
            return Ok(false);
        };
        let ready: Vec<u8> = self.pending.drain(..last).collect();
        self.decode(&ready)
    }

    fn finish(mut self) -> SearchResult<Vec<RawCommit>> {
        let rest = std::mem::take(&mut self.pending);
        self.decode(&rest)?;
        Ok(self.commits)
    }

    fn into_commits(self) -> Vec<RawCommit> {
        self.commits
    }

    fn is_full(&self) -> bool {
        self.cap.is_some_and(|cap| self.commits.len() >= cap)
    }

    fn decode(&mut self, bytes: &[u8]) -> SearchResult<bool> {
        for record in bytes.split(|b| *b == RECORD_SEPARATOR) {
            if self.is_full() {
                break;
            }
            let text = String::from_utf8_lossy(record);
            if text.trim().is_empty() {
                continue;
            }
            let commit = parse_record(&text)?;
            let kept = match self.filter {
                Some(filter) => filter.apply(commit, self.only_matching_hunks),
                None => Some(commit),
            };
            self.commits.extend(kept);
        }
        Ok(self.is_full())
    }
}

fn compile(pattern: &str, is_regexp: bool, case_sensitive: bool) -> SearchResult<Regex> {
    compile_terms(&[pattern.to_string()], is_regexp, case_sensitive)
}

/// Split `git log` output into commits. When `complete` is false the final
/// record may be cut short and is dropped.
pub fn parse_log_output(text: &str, complete: bool) -> SearchResult<Vec<RawCommit>> {
    let mut records = RecordCollector::new(None, false, None);
    records.feed(text.as_bytes())?;
    if complete {
        records.finish()
    } else {
        Ok(records.into_commits())
    }
}

fn parse_record(record: &str) -> SearchResult<RawCommit> {
    let fields: Vec<&str> = record.splitn(12, '\0').collect();
    let [hash, refs, source, an, ae, at, cn, ce, ct, body, parents, rest] = fields[..] else {
        return Err(SearchError::Engine(format!(
            "malformed git log record with {} fields",
            fields.len()
        )));
    };

    let diff = rest.trim_start_matches('\n');
    Ok(RawCommit {
        hash: hash.trim().to_string(),
        ref_names: parse_ref_names(refs),
        source_refs: source
            .split_whitespace()
            .map(ToString::to_string)
            .collect(),
        author: Signature {
            name: an.to_string(),
            email: ae.to_string(),
            date: parse_unix_time(at)?,
        },
        committer: Some(Signature {
            name: cn.to_string(),
            email: ce.to_string(),
            date: parse_unix_time(ct)?,
        }),
        message: body.trim_end().to_string(),
        parents: parents.split_whitespace().map(ToString::to_string).collect(),
        diff: (!diff.trim().is_empty()).then(|| RawDiff {
            raw: diff.to_string(),
        }),
        diff_highlights: Vec::new(),
    })
}

/// Parse `%D` output such as `HEAD -> refs/heads/main, tag: refs/tags/v1`.
fn parse_ref_names(raw: &str) -> Vec<String> {
    let mut names = Vec::new();
    for part in raw.split(", ").map(str::trim).filter(|p| !p.is_empty()) {
        if let Some((head, target)) = part.split_once(" -> ") {
            names.push(head.to_string());
            names.push(target.to_string());
        } else if let Some(tag) = part.strip_prefix("tag: ") {
            names.push(tag.to_string());
        } else {
            names.push(part.to_string());
        }
    }
    names
}

fn parse_unix_time(raw: &str) -> SearchResult<DateTime<Utc>> {
    let secs: i64 = raw
        .trim()
        .parse()
        .map_err(|_| SearchError::Engine(format!("invalid commit timestamp: {raw:?}")))?;
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| SearchError::Engine(format!("commit timestamp out of range: {secs}")))
}

/// Content and path filters applied to patches in diff mode.
struct DiffFilter {
    content: Option<Regex>,
    include: Vec<Regex>,
    exclude: Option<Regex>,
}

impl DiffFilter {
    fn new(opts: &RawLogDiffSearchOptions) -> SearchResult<Self> {
        let q = &opts.query;
        let content = if q.pattern.is_empty() {
            None
        } else {
            Some(compile(&q.pattern, q.is_regexp, q.is_case_sensitive)?)
        };
        let PathOptions {
            include_patterns,
            exclude_pattern,
            is_case_sensitive,
            is_regexp,
        } = &opts.paths;
        let include = include_patterns
            .iter()
            .map(|p| compile(p, *is_regexp, *is_case_sensitive))
            .collect::<SearchResult<Vec<_>>>()?;
        let exclude = exclude_pattern
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| compile(p, *is_regexp, *is_case_sensitive))
            .transpose()?;
        Ok(Self {
            content,
            include,
            exclude,
        })
    }

    fn path_matches(&self, path: &str) -> bool {
        self.include.iter().all(|re| re.is_match(path))
            && !self.exclude.as_ref().is_some_and(|re| re.is_match(path))
    }

    fn hunk_matches(&self, hunk: &[&str]) -> bool {
        let Some(content) = &self.content else {
            return true;
        };
        hunk.iter()
            .filter_map(|line| changed_line_body(line))
            .any(|body| content.is_match(body))
    }

    /// Filter the commit's patch; `None` when nothing in it survives.
    fn apply(&self, mut commit: RawCommit, only_matching_hunks: bool) -> Option<RawCommit> {
        let raw = commit.diff.take()?.raw;
        let mut kept: Vec<&str> = Vec::new();
        for file in split_files(&raw) {
            let Some(path) = file_path(&file.header) else {
                continue;
            };
            if !self.path_matches(path) {
                continue;
            }
            let hunks: Vec<&Vec<&str>> = file
                .hunks
                .iter()
                .filter(|h| !only_matching_hunks || self.hunk_matches(h))
                .collect();
            if hunks.is_empty() {
                continue;
            }
            kept.extend(
                file.header
                    .iter()
                    .filter(|l| l.starts_with("--- ") || l.starts_with("+++ ")),
            );
            for hunk in hunks {
                kept.extend(hunk.iter());
            }
        }
        if kept.is_empty() {
            return None;
        }

        let text = kept.join("\n") + "\n";
        commit.diff_highlights = match &self.content {
            Some(re) => highlight_diff(re, &text),
            None => Vec::new(),
        };
        commit.diff = Some(RawDiff { raw: text });
        Some(commit)
    }
}

struct FilePatch<'a> {
    header: Vec<&'a str>,
    hunks: Vec<Vec<&'a str>>,
}

fn split_files(raw: &str) -> Vec<FilePatch<'_>> {
    let mut files: Vec<FilePatch<'_>> = Vec::new();
    for line in raw.lines() {
        if line.starts_with("diff --git ") {
            files.push(FilePatch {
                header: vec![line],
                hunks: Vec::new(),
            });
            continue;
        }
        let Some(file) = files.last_mut() else {
            continue;
        };
        if line.starts_with("@@") {
            file.hunks.push(vec![line]);
        } else if let Some(hunk) = file.hunks.last_mut() {
            hunk.push(line);
        } else {
            file.header.push(line);
        }
    }
    files
}

/// New path of a file patch, or the old path for deletions.
fn file_path<'a>(header: &[&'a str]) -> Option<&'a str> {
    let find = |prefix: &str| {
        header
            .iter()
            .copied()
            .find_map(|l| l.strip_prefix(prefix))
            .filter(|p| *p != "/dev/null")
    };
    find("+++ ").or_else(|| find("--- ")).or_else(|| {
        // Binary or mode-only changes carry no ---/+++ lines.
        header
            .first()
            .copied()
            .and_then(|l| l.strip_prefix("diff --git "))
            .and_then(|rest| rest.split_whitespace().last())
    })
}

fn changed_line_body(line: &str) -> Option<&str> {
    if line.starts_with("+++ ") || line.starts_with("--- ") {
        return None;
    }
    line.strip_prefix('+').or_else(|| line.strip_prefix('-'))
}

/// Highlight matches inside added/removed lines of a filtered patch.
fn highlight_diff(re: &Regex, text: &str) -> Vec<Highlight> {
    let mut highlights = Vec::new();
    for (i, line) in text.split('\n').enumerate() {
        let Some(body) = changed_line_body(line) else {
            continue;
        };
        for m in re
            .find_iter(body)
            .filter(|m| !m.as_str().is_empty())
            .take(MAX_MATCHES_PER_LINE)
        {
            highlights.push(Highlight {
                line: (i + 1) as u32,
                character: (m.start() + 1) as u32,
                length: (m.end() - m.start()) as u32,
            });
        }
    }
    highlights
}
