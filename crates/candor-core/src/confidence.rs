//! Confidence classification for a merged match list.
//!
//! | Top genuine score | Tier |
//! |-------------------|------|
//! | `>= high` (0.82) | `high` |
//! | `>= medium` (0.60) | `medium` |
//! | anything lower | `low` |
//!
//! Keyword hits and unscored documents are lexical evidence and count as
//! `medium`. The overall tier is the highest per-document tier, and an empty
//! list is `none`.

use serde::Deserialize;

use crate::models::{ConfidenceTier, DocumentMatch, MatchOrigin};

/// Lower bounds for the `high` and `medium` tiers.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_high")]
    pub high: f64,
    #[serde(default = "default_medium")]
    pub medium: f64,
}

fn default_high() -> f64 {
    0.82
}

fn default_medium() -> f64 {
    0.60
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high: default_high(),
            medium: default_medium(),
        }
    }
}

impl Thresholds {
    /// Tier for a single genuine similarity score.
    pub fn tier_for_score(&self, score: f64) -> ConfidenceTier {
        if score >= self.high {
            ConfidenceTier::High
        } else if score >= self.medium {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }

    /// Annotation tier for one document.
    pub fn tier_for_match(&self, m: &DocumentMatch) -> ConfidenceTier {
        match m.genuine_similarity() {
            Some(score) => self.tier_for_score(score),
            None => ConfidenceTier::Medium,
        }
    }

    /// Overall tier for a ranked list.
    ///
    /// The highest genuine score decides. Keyword hits put a `medium` floor
    /// under that; unscored vector rows never raise it. A non-empty list
    /// with no genuine score at all is `medium`.
    pub fn classify(&self, matches: &[DocumentMatch]) -> ConfidenceTier {
        if matches.is_empty() {
            return ConfidenceTier::None;
        }

        let top = matches
            .iter()
            .filter_map(DocumentMatch::genuine_similarity)
            .filter(|s| s.is_finite())
            .max_by(f64::total_cmp);
        let lexical = matches.iter().any(|m| m.origin == MatchOrigin::Keyword);

        match top {
            Some(score) if lexical => self.tier_for_score(score).max(ConfidenceTier::Medium),
            Some(score) => self.tier_for_score(score),
            None => ConfidenceTier::Medium,
        }
    }
}

/// Classify with the default thresholds.
pub fn classify(matches: &[DocumentMatch]) -> ConfidenceTier {
    Thresholds::default().classify(matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(score: f64) -> Vec<DocumentMatch> {
        vec![DocumentMatch::vector("d1", "", score)]
    }

    #[test]
    fn test_empty_is_none() {
        assert_eq!(classify(&[]), ConfidenceTier::None);
    }

    #[test]
    fn test_exact_boundaries() {
        assert_eq!(classify(&scored(0.82)), ConfidenceTier::High);
        assert_eq!(classify(&scored(0.81999)), ConfidenceTier::Medium);
        assert_eq!(classify(&scored(0.60)), ConfidenceTier::Medium);
        assert_eq!(classify(&scored(0.59999)), ConfidenceTier::Low);
        assert_eq!(classify(&scored(0.0)), ConfidenceTier::Low);
        assert_eq!(classify(&scored(1.0)), ConfidenceTier::High);
    }

    #[test]
    fn test_uses_top_score() {
        let matches = vec![
            DocumentMatch::vector("a", "", 0.91),
            DocumentMatch::vector("b", "", 0.2),
        ];
        assert_eq!(classify(&matches), ConfidenceTier::High);
    }

    #[test]
    fn test_pure_lexical_is_medium() {
        let matches = vec![
            DocumentMatch::keyword("a", ""),
            DocumentMatch::keyword("b", ""),
        ];
        assert_eq!(classify(&matches), ConfidenceTier::Medium);
    }

    #[test]
    fn test_boosted_keyword_hits_are_medium() {
        let matches = vec![
            DocumentMatch::keyword("k1", "").with_similarity(0.99),
            DocumentMatch::keyword("k2", "").with_similarity(0.99),
        ];
        assert_eq!(classify(&matches), ConfidenceTier::Medium);
    }

    #[test]
    fn test_lexical_evidence_lifts_weak_vector_list() {
        let matches = vec![
            DocumentMatch::keyword("k1", "").with_similarity(0.99),
            DocumentMatch::vector("v1", "", 0.3),
        ];
        assert_eq!(classify(&matches), ConfidenceTier::Medium);
    }

    #[test]
    fn test_strong_vector_beats_lexical() {
        let matches = vec![
            DocumentMatch::keyword("k1", "").with_similarity(0.99),
            DocumentMatch::vector("v1", "", 0.9),
        ];
        assert_eq!(classify(&matches), ConfidenceTier::High);
    }

    #[test]
    fn test_unscored_vector_row_does_not_raise_tier() {
        let mut unscored = DocumentMatch::vector("b", "", 0.0);
        unscored.similarity = None;
        let matches = vec![DocumentMatch::vector("a", "", 0.30), unscored.clone()];
        assert_eq!(classify(&matches), ConfidenceTier::Low);

        // Alone, an unscored row is still a match.
        assert_eq!(classify(&[unscored]), ConfidenceTier::Medium);
    }

    #[test]
    fn test_nan_score_is_ignored() {
        let matches = vec![
            DocumentMatch::vector("a", "", f64::NAN),
            DocumentMatch::vector("b", "", 0.65),
        ];
        assert_eq!(classify(&matches), ConfidenceTier::Medium);
    }

    #[test]
    fn test_custom_thresholds() {
        let t = Thresholds {
            high: 0.82,
            medium: 0.75,
        };
        assert_eq!(t.tier_for_score(0.74), ConfidenceTier::Low);
        assert_eq!(t.tier_for_score(0.75), ConfidenceTier::Medium);
    }

    #[test]
    fn test_deterministic() {
        let matches = vec![
            DocumentMatch::vector("a", "", 0.7),
            DocumentMatch::keyword("b", ""),
        ];
        let first = classify(&matches);
        for _ in 0..10 {
            assert_eq!(classify(&matches), first);
        }
    }
}
