//! Username to email expansion for author/committer filters.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{SearchError, SearchResult};

/// Marker that introduces a username reference in a filter value.
pub const USERNAME_PREFIX: char = '@';

/// An email address registered to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEmail {
    pub email: String,
    #[serde(default)]
    pub verified: bool,
}

impl UserEmail {
    pub fn verified(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            verified: true,
        }
    }

    pub fn unverified(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            verified: false,
        }
    }
}

/// Injectable user directory.
///
/// Implement this trait to plug in a user database, an LDAP lookup, or test
/// stubs.
#[async_trait]
pub trait EmailLookup: Send + Sync {
    /// Emails registered to `username`, or `None` when no such user exists.
    async fn emails_for_username(&self, username: &str) -> SearchResult<Option<Vec<UserEmail>>>;
}

/// Directory with no users; every `@name` passes through literally.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUsers;

#[async_trait]
impl EmailLookup for NoUsers {
    async fn emails_for_username(&self, _username: &str) -> SearchResult<Option<Vec<UserEmail>>> {
        Ok(None)
    }
}

/// In-memory user directory, optionally loaded from a JSON file of the form
/// `{"alice": [{"email": "alice@example.com", "verified": true}]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticEmailDirectory {
    users: HashMap<String, Vec<UserEmail>>,
}

impl StaticEmailDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, username: impl Into<String>, emails: Vec<UserEmail>) -> Self {
        self.users.insert(username.into(), emails);
        self
    }

    /// Load a directory from a JSON file.
    pub fn from_json_file(path: &Path) -> SearchResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            SearchError::Config(format!("invalid user directory {}: {e}", path.display()))
        })
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl EmailLookup for StaticEmailDirectory {
    async fn emails_for_username(&self, username: &str) -> SearchResult<Option<Vec<UserEmail>>> {
        Ok(self.users.get(username).cloned())
    }
}

/// Replace `@username` references with the user's verified email addresses.
///
/// Each expanded address is regex-escaped so it matches literally. Values that
/// are not username references, or name an unknown user, are kept unchanged.
/// A known user with no verified addresses expands to nothing.
pub async fn expand_usernames_to_emails(
    lookup: &dyn EmailLookup,
    values: Vec<String>,
) -> SearchResult<Vec<String>> {
    let mut expanded = Vec::with_capacity(values.len());
    for value in values {
        let Some(username) = value.strip_prefix(USERNAME_PREFIX) else {
            expanded.push(value);
            continue;
        };
        match lookup.emails_for_username(username).await? {
            Some(emails) => expanded.extend(
                emails
                    .into_iter()
                    .filter(|e| e.verified)
                    .map(|e| regex::escape(&e.email)),
            ),
            None => expanded.push(value),
        }
    }
    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> StaticEmailDirectory {
        StaticEmailDirectory::new()
            .with_user(
                "alice",
                vec![
                    UserEmail::verified("alice@example.com"),
                    UserEmail::verified("alice@example.org"),
                    UserEmail::unverified("alice@spam.test"),
                ],
            )
            .with_user("ghost", vec![UserEmail::unverified("ghost@example.com")])
    }

    #[tokio::test]
    async fn test_expands_username_to_verified_escaped_emails() {
        let out = expand_usernames_to_emails(
            &directory(),
            vec!["foo".to_string(), "@alice".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(
            out,
            vec![
                "foo".to_string(),
                r"alice@example\.com".to_string(),
                r"alice@example\.org".to_string(),
            ]
        );
        assert!(!out.contains(&"@alice".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_username_passes_through() {
        let out = expand_usernames_to_emails(&directory(), vec!["@bob".to_string()])
            .await
            .unwrap();
        assert_eq!(out, vec!["@bob".to_string()]);
    }

    #[tokio::test]
    async fn test_user_without_verified_email_expands_to_nothing() {
        let out = expand_usernames_to_emails(&directory(), vec!["@ghost".to_string()])
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_directory_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(
            &path,
            r#"{"alice": [{"email": "alice@example.com", "verified": true}]}"#,
        )
        .unwrap();
        let directory = StaticEmailDirectory::from_json_file(&path).unwrap();
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_directory_from_invalid_json_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(&path, "not json").unwrap();
        let err = StaticEmailDirectory::from_json_file(&path).unwrap_err();
        assert!(matches!(err, SearchError::Config(_)));
    }
}
