use regex::{NoExpand, RegexBuilder};
use tracing::{debug, warn};

use crate::config::ReplacementRule;

/// Whether matches of this rule should consume surrounding whitespace.
///
/// Single-character replacements (and anything starting with ".") are
/// punctuation-like: "example dot com" must collapse to "example.com", not
/// "example . com".
fn consumes_whitespace(replacement: &str) -> bool {
    replacement.chars().count() == 1
        || matches!(replacement, "\n" | "\t" | "\r" | "\\")
        || replacement.starts_with('.')
}

/// Apply the ordered replacement rules to transcribed text.
///
/// Pure given (text, rules): patterns match case-insensitively as literals,
/// replacements are inserted verbatim (no backreference expansion). After
/// all rules: one trailing "." is stripped, and a result with no whitespace
/// is lowercased so single-token dictations come out shell-friendly.
#[must_use]
pub fn apply_replacements(text: &str, rules: &[ReplacementRule]) -> String {
    let mut out = text.to_owned();

    for rule in rules {
        let trimmed = rule.pattern.trim();
        if trimmed.is_empty() {
            warn!("skipping replacement rule with empty pattern");
            continue;
        }

        let pattern = if consumes_whitespace(&rule.replacement) {
            format!(r"\s*{}\s*", regex::escape(trimmed))
        } else {
            regex::escape(&rule.pattern)
        };

        let regex = match RegexBuilder::new(&pattern).case_insensitive(true).build() {
            Ok(regex) => regex,
            Err(e) => {
                warn!(pattern = %rule.pattern, "replacement rule failed to compile: {}", e);
                continue;
            }
        };

        let replaced = regex.replace_all(&out, NoExpand(&rule.replacement)).into_owned();
        if replaced != out {
            debug!(pattern = %rule.pattern, "replacement rule applied");
        }
        out = replaced;
    }

    if out.ends_with('.') {
        out.pop();
    }

    if !out.chars().any(char::is_whitespace) {
        out = out.to_lowercase();
    }

    out
}
