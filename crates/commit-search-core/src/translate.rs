//! Translation of a structured query into `git log` arguments.
//!
//! Every user-supplied value ends up either as the value half of a
//! `--flag=value` pair or, for revspecs, as a bare argument that has been
//! checked not to start with `-`. Nothing a user types can become a flag.

use tracing::trace;

use crate::email::{expand_usernames_to_emails, EmailLookup};
use crate::error::{SearchError, SearchResult};
use crate::model::{PatternInfo, RevisionSpecifier};
use crate::query::{QueryField, StructuredQuery};

/// Inputs for one translation.
pub struct TranslateRequest<'a> {
    pub info: &'a PatternInfo,
    pub query: &'a dyn StructuredQuery,
    pub revs: &'a [RevisionSpecifier],
    pub diff: bool,
    /// Extra literal terms folded into the message filter (free-text terms in
    /// log mode).
    pub extra_message_values: &'a [String],
}

/// Reject a revspec that the engine would parse as a flag.
pub fn validate_revspec(revspec: &str) -> SearchResult<()> {
    if revspec.starts_with('-') {
        return Err(SearchError::InvalidQuery(format!(
            "invalid revspec: {revspec:?}"
        )));
    }
    Ok(())
}

/// Tracks which filter polarities have been seen across grep-like fields.
#[derive(Debug, Default)]
struct GrepPolarity {
    inclusive: bool,
    exclusive: bool,
}

/// Build the argument list for a commit search.
pub async fn translate(
    req: TranslateRequest<'_>,
    emails: &dyn EmailLookup,
) -> SearchResult<Vec<String>> {
    let mut args = vec![format!("--max-count={}", req.info.max_results.saturating_add(1))];
    if req.diff {
        args.push("--unified=0".to_string());
        args.push("--no-prefix".to_string());
    }
    if req.info.is_regexp {
        args.push("--extended-regexp".to_string());
    }
    if !req.query.is_case_sensitive() {
        args.push("--regexp-ignore-case".to_string());
    }

    for rev in req.revs {
        match rev {
            RevisionSpecifier::RevSpec(spec) if spec.is_empty() => {}
            RevisionSpecifier::RevSpec(spec) => {
                validate_revspec(spec)?;
                args.push(spec.clone());
            }
            RevisionSpecifier::RefGlob(glob) => args.push(format!("--glob={glob}")),
            RevisionSpecifier::ExcludeRefGlob(glob) => args.push(format!("--exclude={glob}")),
        }
    }

    let (before, _) = req.query.string_values(QueryField::Before);
    args.extend(before.into_iter().map(|s| format!("--until={s}")));
    let (after, _) = req.query.string_values(QueryField::After);
    args.extend(after.into_iter().map(|s| format!("--since={s}")));

    let mut polarity = GrepPolarity::default();
    add_grep_like_flags(
        &mut args,
        &mut polarity,
        "--grep",
        QueryField::Message,
        req.query,
        req.extra_message_values,
        None,
    )
    .await?;
    add_grep_like_flags(
        &mut args,
        &mut polarity,
        "--author",
        QueryField::Author,
        req.query,
        &[],
        Some(emails),
    )
    .await?;
    add_grep_like_flags(
        &mut args,
        &mut polarity,
        "--committer",
        QueryField::Committer,
        req.query,
        &[],
        Some(emails),
    )
    .await?;

    trace!(?args, "translated commit search arguments");
    Ok(args)
}

/// Append `--grep`, `--author`, or `--committer` filters for one field.
async fn add_grep_like_flags(
    args: &mut Vec<String>,
    polarity: &mut GrepPolarity,
    flag: &str,
    field: QueryField,
    query: &dyn StructuredQuery,
    extra_values: &[String],
    expand_usernames: Option<&dyn EmailLookup>,
) -> SearchResult<()> {
    let (mut values, mut minus_values) = query.regexp_patterns(field);
    values.extend(extra_values.iter().cloned());

    if let Some(lookup) = expand_usernames {
        values = expand_usernames_to_emails(lookup, values)
            .await
            .map_err(|e| SearchError::EmailLookup {
                field: field.as_str().to_string(),
                source: Box::new(e),
            })?;
        minus_values = expand_usernames_to_emails(lookup, minus_values)
            .await
            .map_err(|e| SearchError::EmailLookup {
                field: format!("-{}", field.as_str()),
                source: Box::new(e),
            })?;
    }

    polarity.inclusive |= !values.is_empty();
    polarity.exclusive |= !minus_values.is_empty();
    if polarity.inclusive && polarity.exclusive {
        return Err(SearchError::UnsupportedQuery(
            "cannot combine inclusive and exclusive message/author/committer filters in one search"
                .to_string(),
        ));
    }

    if values.is_empty() && minus_values.is_empty() {
        return Ok(());
    }

    // Additional filters always narrow the result set.
    args.push("--all-match".to_string());
    if !minus_values.is_empty() {
        args.push("--invert-grep".to_string());
    }
    // At most one of these is non-empty.
    for value in values.iter().chain(minus_values.iter()) {
        args.push(format!("{flag}={value}"));
    }
    Ok(())
}
