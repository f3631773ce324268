//! Path generalization.
//!
//! Absolute paths from the collector are rewritten to environment-relative
//! equivalents (`C:\Users\alice\...` → `%USERPROFILE%\...`) so that node
//! identities and template paths compare across hosts. Rules are ordered
//! most-specific first and come from configuration, not code.

use regex::Regex;
use tracing::warn;

/// A single generalization rule: pattern → replacement.
#[derive(Debug, Clone)]
pub struct GeneralizeRule {
    pub pattern: String,
    pub replacement: String,
}

/// Compiled, ordered path rewriter. Idempotent: replacements never contain a
/// rewritable prefix, so re-applying has no further effect.
#[derive(Debug)]
pub struct PathGeneralizer {
    rules: Vec<(Regex, String)>,
}

impl PathGeneralizer {
    /// Compile rules in the given order. A rule whose pattern fails to
    /// compile is skipped with a warning; the remaining rules stay active.
    pub fn new(rules: &[GeneralizeRule]) -> Self {
        let rules = rules
            .iter()
            .filter_map(|rule| match Regex::new(&format!("(?i){}", rule.pattern)) {
                Ok(re) => Some((re, rule.replacement.clone())),
                Err(e) => {
                    warn!("Invalid generalization pattern '{}': {}", rule.pattern, e);
                    None
                }
            })
            .collect();
        Self { rules }
    }

    /// Rewrite all matching prefixes in order.
    pub fn generalize(&self, path: &str) -> String {
        let mut out = path.to_string();
        for (re, replacement) in &self.rules {
            out = re.replace_all(&out, replacement.as_str()).into_owned();
        }
        out
    }
}
