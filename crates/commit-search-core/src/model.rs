//! Data model shared by the translator, executor, and aggregator.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a search matches commit diffs or commit metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Match diff hunks (`type:diff`).
    Diff,
    /// Match commit messages and metadata (`type:commit`).
    Log,
}

impl SearchMode {
    pub fn is_diff(self) -> bool {
        matches!(self, SearchMode::Diff)
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Diff => f.write_str("diffs"),
            SearchMode::Log => f.write_str("log"),
        }
    }
}

/// One revision selector for a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RevisionSpecifier {
    /// A branch, tag, commit hash, or range expression.
    RevSpec(String),
    /// Include all refs matching the glob.
    RefGlob(String),
    /// Exclude refs matching the glob.
    ExcludeRefGlob(String),
}

impl RevisionSpecifier {
    pub fn rev_spec(spec: impl Into<String>) -> Self {
        RevisionSpecifier::RevSpec(spec.into())
    }

    /// Whether this specifier is the implicit default revision (an empty revspec).
    pub fn is_default(&self) -> bool {
        matches!(self, RevisionSpecifier::RevSpec(s) if s.is_empty())
    }
}

impl fmt::Display for RevisionSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevisionSpecifier::RevSpec(s) => f.write_str(s),
            RevisionSpecifier::RefGlob(g) => write!(f, "*{g}"),
            RevisionSpecifier::ExcludeRefGlob(g) => write!(f, "*!{g}"),
        }
    }
}

/// A repository together with the revisions to search in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRevisions {
    /// Repository name (e.g. `github.com/org/repo`).
    pub repo: String,
    pub revs: Vec<RevisionSpecifier>,
}

impl RepositoryRevisions {
    pub fn new(repo: impl Into<String>, revs: Vec<RevisionSpecifier>) -> Self {
        Self {
            repo: repo.into(),
            revs,
        }
    }

    /// Whether no explicit revision was requested, so the repository's default
    /// branch is searched.
    pub fn uses_default_revision(&self) -> bool {
        match self.revs.as_slice() {
            [] => true,
            [only] => only.is_default(),
            _ => false,
        }
    }
}

impl fmt::Display for RepositoryRevisions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repo)?;
        if !self.revs.is_empty() {
            let revs: Vec<String> = self.revs.iter().map(ToString::to_string).collect();
            write!(f, "@{}", revs.join(":"))?;
        }
        Ok(())
    }
}

/// The pattern half of a search request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternInfo {
    pub pattern: String,
    pub is_regexp: bool,
    pub is_case_sensitive: bool,
    /// Maximum number of commits returned per repository.
    pub max_results: usize,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_pattern: Option<String>,
    #[serde(default)]
    pub path_patterns_are_regexps: bool,
    #[serde(default)]
    pub path_patterns_are_case_sensitive: bool,
}

impl PatternInfo {
    /// Literal, case-insensitive pattern with the given per-repository limit.
    pub fn literal(pattern: impl Into<String>, max_results: usize) -> Self {
        Self {
            pattern: pattern.into(),
            is_regexp: false,
            is_case_sensitive: false,
            max_results,
            include_patterns: Vec::new(),
            exclude_pattern: None,
            path_patterns_are_regexps: false,
            path_patterns_are_case_sensitive: false,
        }
    }
}

/// Name, email, and timestamp of a commit author or committer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub date: DateTime<Utc>,
}

/// Unified diff body of a commit as returned by the history engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDiff {
    pub raw: String,
}

/// Match span inside engine-produced text (1-indexed line, 0-indexed byte offset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlight {
    pub line: u32,
    pub character: u32,
    pub length: u32,
}

/// One commit decoded by the history engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCommit {
    pub hash: String,
    pub ref_names: Vec<String>,
    pub source_refs: Vec<String>,
    pub author: Signature,
    pub committer: Option<Signature>,
    pub message: String,
    pub parents: Vec<String>,
    pub diff: Option<RawDiff>,
    #[serde(default)]
    pub diff_highlights: Vec<Highlight>,
}

/// Commit handle resolved against its repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitCommit {
    pub repo: String,
    pub oid: String,
    pub author: Signature,
    pub committer: Option<Signature>,
    pub message: String,
    pub parents: Vec<String>,
}

impl GitCommit {
    pub fn abbreviated_oid(&self) -> &str {
        &self.oid[..7.min(self.oid.len())]
    }

    /// First line of the commit message.
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }
}

/// A named reference (branch, tag, `HEAD`) in a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitRef {
    pub repo: String,
    pub name: String,
}

/// Text with match spans.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightedString {
    pub value: String,
    pub highlights: Vec<Highlight>,
}

impl HighlightedString {
    /// Text without any highlights.
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            highlights: Vec::new(),
        }
    }
}

/// A single commit matched by a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSearchResult {
    pub commit: GitCommit,
    pub refs: Vec<GitRef>,
    pub source_refs: Vec<GitRef>,
    pub message_preview: Option<HighlightedString>,
    pub diff_preview: Option<HighlightedString>,
}

impl CommitSearchResult {
    pub fn repo(&self) -> &str {
        &self.commit.repo
    }

    pub fn author_date(&self) -> DateTime<Utc> {
        self.commit.author.date
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_revision_detection() {
        assert!(RepositoryRevisions::new("a", vec![]).uses_default_revision());
        assert!(
            RepositoryRevisions::new("a", vec![RevisionSpecifier::rev_spec("")])
                .uses_default_revision()
        );
        assert!(
            !RepositoryRevisions::new("a", vec![RevisionSpecifier::rev_spec("main")])
                .uses_default_revision()
        );
    }

    #[test]
    fn test_repository_revisions_display() {
        let repo = RepositoryRevisions::new(
            "github.com/org/a",
            vec![
                RevisionSpecifier::rev_spec("main"),
                RevisionSpecifier::RefGlob("refs/heads/release/*".into()),
            ],
        );
        assert_eq!(repo.to_string(), "github.com/org/a@main:*refs/heads/release/*");
    }

    #[test]
    fn test_commit_subject_and_abbrev() {
        let commit = GitCommit {
            repo: "r".into(),
            oid: "2061ba96d63cba38f20a76f039cf29ef68736b8a".into(),
            author: Signature {
                name: "a".into(),
                email: "a@example.com".into(),
                date: Utc::now(),
            },
            committer: None,
            message: "fix import\n\nlonger body".into(),
            parents: vec![],
        };
        assert_eq!(commit.subject(), "fix import");
        assert_eq!(commit.abbreviated_oid(), "2061ba9");
    }
}
