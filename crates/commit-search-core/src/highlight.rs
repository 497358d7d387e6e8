//! Match highlighting for commit message previews.

use regex::{Regex, RegexBuilder};

use crate::error::{SearchError, SearchResult};
use crate::model::{Highlight, HighlightedString};

/// Upper bound on highlights produced for a single line.
pub const MAX_MATCHES_PER_LINE: usize = 25;

/// Highlight every match of `pattern` in `text`, line by line.
///
/// Matches never span a newline. Lines are 1-indexed; `character` is the byte
/// offset of the match within its line. Case-insensitivity is a property of
/// the compiled `pattern`.
pub fn highlight_matches(pattern: &Regex, text: &str) -> HighlightedString {
    let mut highlights = Vec::new();
    for (i, line) in text.split('\n').enumerate() {
        for m in pattern
            .find_iter(line)
            .filter(|m| !m.as_str().is_empty())
            .take(MAX_MATCHES_PER_LINE)
        {
            highlights.push(Highlight {
                line: (i + 1) as u32,
                character: m.start() as u32,
                length: (m.end() - m.start()) as u32,
            });
        }
    }
    HighlightedString {
        value: text.to_string(),
        highlights,
    }
}

/// Regular expression matching all `patterns` in the given order on one line.
///
/// A single pattern is returned as-is; several are joined with lazy `.*?` so
/// the shortest span covering them is preferred.
pub fn pattern_matching_exprs_in_order(patterns: &[String]) -> String {
    match patterns {
        [] => String::new(),
        [only] => only.clone(),
        many => format!("({})", many.join(").*?(")),
    }
}

/// Compile the preview pattern for free-text `terms`.
///
/// Literal terms are escaped first; `case_sensitive = false` folds case.
pub fn compile_terms(terms: &[String], is_regexp: bool, case_sensitive: bool) -> SearchResult<Regex> {
    let terms: Vec<String> = if is_regexp {
        terms.to_vec()
    } else {
        terms.iter().map(|t| regex::escape(t)).collect()
    };
    RegexBuilder::new(&pattern_matching_exprs_in_order(&terms))
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| SearchError::InvalidQuery(format!("invalid pattern: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ci(pattern: &str) -> Regex {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .unwrap()
    }

    #[test]
    fn test_highlights_per_line_with_byte_offsets() {
        let hl = highlight_matches(&ci("fix"), "Fix typo\nplease FIX and fix again");
        assert_eq!(
            hl.highlights,
            vec![
                Highlight { line: 1, character: 0, length: 3 },
                Highlight { line: 2, character: 7, length: 3 },
                Highlight { line: 2, character: 15, length: 3 },
            ]
        );
        assert_eq!(hl.value, "Fix typo\nplease FIX and fix again");
    }

    #[test]
    fn test_case_sensitive_pattern_skips_other_case() {
        let re = Regex::new("Fix").unwrap();
        let hl = highlight_matches(&re, "fix\nFix");
        assert_eq!(hl.highlights, vec![Highlight { line: 2, character: 0, length: 3 }]);
    }

    #[test]
    fn test_matches_never_cross_newlines() {
        let re = Regex::new(r"a\sb").unwrap();
        let hl = highlight_matches(&re, "a\nb");
        assert!(hl.highlights.is_empty());
    }

    #[test]
    fn test_caps_matches_per_line() {
        let line = "x ".repeat(100);
        let hl = highlight_matches(&Regex::new("x").unwrap(), &line);
        assert_eq!(hl.highlights.len(), MAX_MATCHES_PER_LINE);
    }

    #[test]
    fn test_rehighlighting_yields_identical_spans() {
        let re = ci("bug");
        let text = "Bug fix\n\nfixes bug #12, BUG #13";
        assert_eq!(highlight_matches(&re, text), highlight_matches(&re, text));
    }

    #[test]
    fn test_multibyte_offsets_are_bytes() {
        let hl = highlight_matches(&ci("fix"), "héllo fix");
        assert_eq!(hl.highlights, vec![Highlight { line: 1, character: 7, length: 3 }]);
    }

    #[test]
    fn test_exprs_in_order() {
        assert_eq!(pattern_matching_exprs_in_order(&[]), "");
        assert_eq!(pattern_matching_exprs_in_order(&["a".into()]), "a");
        assert_eq!(
            pattern_matching_exprs_in_order(&["a".into(), "b".into(), "c".into()]),
            "(a).*?(b).*?(c)"
        );
    }

    #[test]
    fn test_compile_terms_escapes_literals() {
        let re = compile_terms(&["a.b".to_string()], false, true).unwrap();
        assert!(re.is_match("a.b"));
        assert!(!re.is_match("axb"));

        let re = compile_terms(&["a.b".to_string()], true, true).unwrap();
        assert!(re.is_match("axb"));
    }

    #[test]
    fn test_compile_terms_rejects_bad_regex() {
        let err = compile_terms(&["(".to_string()], true, false).unwrap_err();
        assert!(matches!(err, SearchError::InvalidQuery(_)));
    }
}
