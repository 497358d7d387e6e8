//! Search configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SearchError, SearchResult};

/// Default bound on a single `git log` run before incomplete results are returned.
pub const DEFAULT_GIT_LOG_SEARCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Tunables for commit search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Maximum duration for `type:commit` and `type:diff` history walks
    /// before incomplete results are returned.
    pub git_log_search_timeout: Duration,
    /// Optional hard deadline per repository, enforced by the aggregator.
    pub repo_search_timeout: Option<Duration>,
    /// Optional cap on concurrently searched repositories.
    pub max_concurrency: Option<usize>,
    /// `git` executable used by the git-backed engine.
    pub git_binary: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            git_log_search_timeout: DEFAULT_GIT_LOG_SEARCH_TIMEOUT,
            repo_search_timeout: None,
            max_concurrency: None,
            git_binary: "git".to_string(),
        }
    }
}

impl SearchConfig {
    /// Create from environment variables
    ///
    /// Reads:
    /// - GIT_LOG_SEARCH_TIMEOUT (optional, default: "15s")
    /// - COMMIT_SEARCH_REPO_TIMEOUT (optional, unset: no per-repository deadline)
    /// - COMMIT_SEARCH_MAX_CONCURRENCY (optional, unset: unbounded)
    /// - GIT_BINARY (optional, default: "git")
    pub fn from_env() -> SearchResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SearchConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> SearchResult<Self> {
        let mut config = Self::default();
        if let Some(raw) = get("GIT_LOG_SEARCH_TIMEOUT") {
            config.git_log_search_timeout = parse_duration(&raw)?;
        }
        if let Some(raw) = get("COMMIT_SEARCH_REPO_TIMEOUT") {
            config.repo_search_timeout = Some(parse_duration(&raw)?);
        }
        if let Some(raw) = get("COMMIT_SEARCH_MAX_CONCURRENCY") {
            let n: usize = raw.trim().parse().map_err(|_| {
                SearchError::Config(format!("COMMIT_SEARCH_MAX_CONCURRENCY: invalid number {raw:?}"))
            })?;
            if n == 0 {
                return Err(SearchError::Config(
                    "COMMIT_SEARCH_MAX_CONCURRENCY must be at least 1".to_string(),
                ));
            }
            config.max_concurrency = Some(n);
        }
        if let Some(raw) = get("GIT_BINARY") {
            config.git_binary = raw;
        }
        Ok(config)
    }
}

/// Parse a duration such as `15s`, `500ms`, `2m`, `1h30m`, or `1.5s`.
pub fn parse_duration(raw: &str) -> SearchResult<Duration> {
    let invalid = || SearchError::Config(format!("invalid duration: {raw:?}"));
    let s = raw.trim();
    if s.is_empty() {
        return Err(invalid());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total_nanos = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if num_len == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..num_len].parse().map_err(|_| invalid())?;
        rest = &rest[num_len..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };
        total_nanos += value * nanos_per_unit;
        rest = &rest[unit_len..];
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("15s").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        for bad in ["", "15", "s", "15x", "1..5s", "-1s"] {
            assert!(parse_duration(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_defaults() {
        let config = SearchConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, SearchConfig::default());
        assert_eq!(config.git_log_search_timeout, Duration::from_secs(15));
        assert_eq!(config.git_binary, "git");
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("GIT_LOG_SEARCH_TIMEOUT", "3s"),
            ("COMMIT_SEARCH_REPO_TIMEOUT", "10s"),
            ("COMMIT_SEARCH_MAX_CONCURRENCY", "8"),
            ("GIT_BINARY", "/usr/bin/git"),
        ]
        .into_iter()
        .collect();
        let config = SearchConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.git_log_search_timeout, Duration::from_secs(3));
        assert_eq!(config.repo_search_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.max_concurrency, Some(8));
        assert_eq!(config.git_binary, "/usr/bin/git");
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let err = SearchConfig::from_lookup(|k| {
            (k == "COMMIT_SEARCH_MAX_CONCURRENCY").then(|| "0".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, SearchError::Config(_)));
    }
}
