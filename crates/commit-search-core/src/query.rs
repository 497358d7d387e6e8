//! Read-only view over an already-parsed search query.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Query fields consumed by commit search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryField {
    Message,
    Author,
    Committer,
    Before,
    After,
}

impl QueryField {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryField::Message => "message",
            QueryField::Author => "author",
            QueryField::Committer => "committer",
            QueryField::Before => "before",
            QueryField::After => "after",
        }
    }
}

/// Structured query as produced by the query parser.
///
/// Values are returned as `(positive, negated)` pairs. Author and committer
/// values starting with `@` are username references.
pub trait StructuredQuery: Send + Sync {
    /// Regular-expression values for a grep-like field.
    fn regexp_patterns(&self, field: QueryField) -> (Vec<String>, Vec<String>);

    /// Plain string values for a field (used for date bounds).
    fn string_values(&self, field: QueryField) -> (Vec<String>, Vec<String>);

    fn is_case_sensitive(&self) -> bool;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct FieldValues {
    #[serde(default)]
    values: Vec<String>,
    #[serde(default)]
    negated: Vec<String>,
}

/// In-memory [`StructuredQuery`] built field by field.
///
/// ```
/// use commit_search_core::query::{ParsedQuery, QueryField, StructuredQuery};
///
/// let query = ParsedQuery::new()
///     .with(QueryField::Author, "@alice")
///     .without(QueryField::Message, "wip");
/// assert_eq!(query.regexp_patterns(QueryField::Author).0, vec!["@alice"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedQuery {
    #[serde(default)]
    fields: BTreeMap<QueryField, FieldValues>,
    #[serde(default)]
    case_sensitive: bool,
}

impl ParsedQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a positive value for `field`.
    pub fn with(mut self, field: QueryField, value: impl Into<String>) -> Self {
        self.push(field, value, false);
        self
    }

    /// Add a negated value for `field`.
    pub fn without(mut self, field: QueryField, value: impl Into<String>) -> Self {
        self.push(field, value, true);
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn push(&mut self, field: QueryField, value: impl Into<String>, negated: bool) {
        let entry = self.fields.entry(field).or_default();
        if negated {
            entry.negated.push(value.into());
        } else {
            entry.values.push(value.into());
        }
    }

    fn values(&self, field: QueryField) -> (Vec<String>, Vec<String>) {
        self.fields
            .get(&field)
            .map(|f| (f.values.clone(), f.negated.clone()))
            .unwrap_or_default()
    }
}

impl StructuredQuery for ParsedQuery {
    fn regexp_patterns(&self, field: QueryField) -> (Vec<String>, Vec<String>) {
        self.values(field)
    }

    fn string_values(&self, field: QueryField) -> (Vec<String>, Vec<String>) {
        self.values(field)
    }

    fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_is_empty() {
        let q = ParsedQuery::new();
        let (values, negated) = q.regexp_patterns(QueryField::Committer);
        assert!(values.is_empty());
        assert!(negated.is_empty());
    }

    #[test]
    fn test_values_keep_insertion_order_and_polarity() {
        let q = ParsedQuery::new()
            .with(QueryField::Message, "fix")
            .with(QueryField::Message, "bug")
            .without(QueryField::Author, "bot");
        assert_eq!(
            q.regexp_patterns(QueryField::Message),
            (vec!["fix".to_string(), "bug".to_string()], vec![])
        );
        assert_eq!(
            q.regexp_patterns(QueryField::Author),
            (vec![], vec!["bot".to_string()])
        );
    }

    #[test]
    fn test_deserializes_from_json() {
        let q: ParsedQuery = serde_json::from_str(
            r#"{"fields":{"before":{"values":["2024-01-01"]}},"case_sensitive":true}"#,
        )
        .unwrap();
        assert!(q.is_case_sensitive());
        assert_eq!(q.string_values(QueryField::Before).0, vec!["2024-01-01"]);
    }
}
