//! Keyword boosting for terms that embed poorly.
//!
//! Short acronyms and proper nouns tend to land far from their documents in
//! embedding space. When a query matches one of the configured patterns, a
//! substring search over the raw corpus runs alongside the vector search and
//! every hit gets a fixed pseudo-similarity so it ranks ahead of weak vector
//! hits. Queries that match no pattern never trigger a keyword search.

use regex::Regex;

use crate::models::{DocumentMatch, MatchOrigin};

pub const DEFAULT_PATTERNS: &[&str] = &[r"(?i)\bppl\b", r"(?i)people\s+powered\s+ledger"];
pub const DEFAULT_TERMS: &[&str] = &["PPL", "People Powered Ledger"];
pub const DEFAULT_PSEUDO_SIMILARITY: f64 = 0.99;

/// Compiled boost rules.
#[derive(Debug, Clone)]
pub struct KeywordBoost {
    patterns: Vec<Regex>,
    terms: Vec<String>,
    pseudo_similarity: f64,
}

impl KeywordBoost {
    /// Compile `patterns`. Fails on the first invalid regex.
    pub fn new(
        patterns: &[String],
        terms: &[String],
        pseudo_similarity: f64,
    ) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns,
            terms: terms.to_vec(),
            pseudo_similarity,
        })
    }

    /// A booster that never triggers.
    pub fn disabled() -> Self {
        Self {
            patterns: Vec::new(),
            terms: Vec::new(),
            pseudo_similarity: DEFAULT_PSEUDO_SIMILARITY,
        }
    }

    /// Whether `query` should trigger the keyword search.
    pub fn is_triggered(&self, query: &str) -> bool {
        !self.terms.is_empty() && self.patterns.iter().any(|re| re.is_match(query))
    }

    /// Substring terms to search the corpus for.
    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn pseudo_similarity(&self) -> f64 {
        self.pseudo_similarity
    }

    /// Row limit for the keyword search given the requested match count.
    pub fn candidate_limit(&self, match_count: usize) -> usize {
        match_count.saturating_mul(2)
    }

    /// Tag raw keyword hits with the keyword origin and the pseudo-score.
    pub fn score(&self, hits: Vec<DocumentMatch>) -> Vec<DocumentMatch> {
        hits.into_iter()
            .map(|mut m| {
                m.origin = MatchOrigin::Keyword;
                m.similarity = Some(self.pseudo_similarity);
                m
            })
            .collect()
    }
}

impl Default for KeywordBoost {
    fn default() -> Self {
        let patterns: Vec<String> = DEFAULT_PATTERNS.iter().map(|s| s.to_string()).collect();
        let terms: Vec<String> = DEFAULT_TERMS.iter().map(|s| s.to_string()).collect();
        Self::new(&patterns, &terms, DEFAULT_PSEUDO_SIMILARITY)
            .unwrap_or_else(|_| Self::disabled())
    }
}
