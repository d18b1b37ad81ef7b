//! Filter-term relevance: whole-word, case-insensitive, `@`-insensitive.

use regex::Regex;
use std::collections::BTreeSet;

/// Lowercase, trim, and drop a leading `@` so `@Alice` and `alice` compare equal.
pub fn normalize_term(term: &str) -> String {
    term.trim().trim_start_matches('@').trim().to_lowercase()
}

/// Normalize a term list, dropping blanks and duplicates while keeping order.
pub fn normalize_terms(terms: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    terms
        .iter()
        .map(|t| normalize_term(t))
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

/// Compiled matcher for the active filter terms.
#[derive(Debug, Clone, Default)]
pub struct TermMatcher {
    patterns: Vec<(String, Regex)>,
}

impl TermMatcher {
    pub fn new(terms: &[String]) -> Self {
        let patterns = normalize_terms(terms)
            .into_iter()
            .filter_map(|term| {
                // A term only counts when it is not glued to other word
                // characters; `@` before the term is allowed, an email-style
                // `x@term` is not.
                let pattern = format!(r"(?i)(?:^|[^\w@])@?{}(?:$|[^\w])", regex::escape(&term));
                Regex::new(&pattern).ok().map(|re| (term, re))
            })
            .collect();
        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|(t, _)| t.as_str())
    }

    /// Terms appearing in `text` as whole words.
    pub fn matched_terms(&self, text: &str) -> BTreeSet<String> {
        self.patterns
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(t, _)| t.clone())
            .collect()
    }

    /// True when no terms are active or at least one matches.
    pub fn is_relevant(&self, text: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|(_, re)| re.is_match(text))
    }
}
