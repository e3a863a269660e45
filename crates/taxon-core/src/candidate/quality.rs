//! Quality Scoring
//!
//! A cheap lexical score in [0, 1] that gates admission before any LLM
//! call is spent. Two signals: how many distinct words the snippet has
//! (OCR garbage and repeated UI text score low) and how long its words are
//! (prose has longer words than button labels).

use crate::config::CandidateConfig;
use std::collections::HashSet;

/// Score normalized text in [0, 1].
///
/// Texts below the configured minimum word count receive the flat
/// `short_text_quality_score` instead of the weighted formula.
pub fn quality_score(normalized: &str, config: &CandidateConfig) -> f64 {
    let words: Vec<&str> = normalized.split_whitespace().collect();
    if words.len() < config.min_word_count {
        return config.short_text_quality_score;
    }

    let unique: HashSet<&str> = words.iter().copied().collect();
    let uniqueness = unique.len() as f64 / words.len() as f64;

    let total_len: usize = words.iter().map(|w| w.chars().count()).sum();
    let avg_word_len = total_len as f64 / words.len() as f64;
    let length_score = (avg_word_len / config.avg_word_length_normalization).min(1.0);

    let score = config.uniqueness_weight * uniqueness + config.length_weight * length_score;
    score.clamp(0.0, 1.0)
}

/// Extract the most frequent content words, longest-first on ties.
///
/// Used for folder name proposals; not part of the admission gate.
pub fn key_terms(normalized: &str, limit: usize) -> Vec<String> {
    const STOPWORDS: &[&str] = &[
        "the", "a", "an", "and", "or", "but", "for", "nor", "with", "from", "into", "that",
        "this", "these", "those", "is", "are", "was", "were", "be", "been", "being", "of",
        "to", "in", "on", "at", "by", "as", "it", "its", "if", "then", "than", "such", "some",
        "any", "all", "each", "every", "has", "have", "had", "can", "will", "when", "where",
    ];

    let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for word in normalized.split_whitespace() {
        let word = word.trim_matches(|c: char| !c.is_alphanumeric());
        if word.chars().count() < 4 || STOPWORDS.contains(&word) {
            continue;
        }
        *counts.entry(word).or_insert(0) += 1;
    }

    let mut terms: Vec<(&str, usize)> = counts.into_iter().collect();
    terms.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| b.0.chars().count().cmp(&a.0.chars().count()))
            .then_with(|| a.0.cmp(b.0))
    });
    terms.into_iter().take(limit).map(|(w, _)| w.to_string()).collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CandidateConfig {
        CandidateConfig::default()
    }

    #[test]
    fn test_short_text_gets_flat_score() {
        let cfg = config();
        let score = quality_score("two words", &cfg);
        assert!((score - cfg.short_text_quality_score).abs() < f64::EPSILON);
    }

    #[test]
    fn test_prose_scores_above_repeated_noise() {
        let cfg = config();
        let prose = quality_score(
            "eigenvalues describe how a linear transformation stretches space",
            &cfg,
        );
        let noise = quality_score("ok ok ok ok ok ok ok ok ok ok", &cfg);
        assert!(prose > noise, "prose {prose} should beat noise {noise}");
    }

    #[test]
    fn test_score_bounded() {
        let cfg = config();
        for text in [
            "supercalifragilisticexpialidocious antidisestablishmentarianism floccinaucinihilipilification",
            "a b c d e f",
            "the quick brown fox jumps over the lazy dog",
        ] {
            let score = quality_score(text, &cfg);
            assert!((0.0..=1.0).contains(&score), "{text} scored {score}");
        }
    }

    #[test]
    fn test_all_unique_long_words_score_high() {
        let cfg = config();
        let score = quality_score("covariance eigendecomposition orthogonality projection", &cfg);
        assert!(score > 0.9, "got {score}");
    }

    #[test]
    fn test_key_terms_skip_stopwords_and_short_words() {
        let terms = key_terms("the matrix of the matrix is a matrix map", 3);
        assert_eq!(terms[0], "matrix");
        assert!(!terms.iter().any(|t| t == "the" || t == "map"));
    }

    #[test]
    fn test_key_terms_limit() {
        let terms = key_terms("alpha beta gamma delta epsilon zeta", 2);
        assert_eq!(terms.len(), 2);
    }
}
