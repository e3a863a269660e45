//! Lexicon-driven mock collaborators.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use taxon_core::{
    Classification, DistillError, Distillation, Distiller, EmbedError, TextEmbedder,
    normalize_vector,
};

/// Dimension every mock vector uses
pub const MOCK_DIMENSIONS: usize = 16;

/// Topic axes
const MATH: usize = 0;
const PHYSICS: usize = 1;
const CHEMISTRY: usize = 2;

/// Texture weight applied to title embeddings (strong separation)
const TITLE_TEXTURE: f32 = 0.8;

/// Texture weight applied to context embeddings (mild separation)
const CONTEXT_TEXTURE: f32 = 0.3;

/// One lexicon entry: a keyword, the topic axes it loads, and the texture
/// axis that makes it distinguishable from its topic siblings.
struct Keyword {
    token: &'static str,
    topics: &'static [(usize, f32)],
    texture_axis: usize,
}

/// The topic lexicon. Chemistry reuses low texture axes; topic axes keep
/// cross-topic similarities near zero regardless.
const LEXICON: &[Keyword] = &[
    Keyword { token: "eigen", topics: &[(MATH, 1.0)], texture_axis: 4 },
    Keyword { token: "matrix", topics: &[(MATH, 1.0)], texture_axis: 5 },
    Keyword { token: "covariance", topics: &[(MATH, 1.0), (PHYSICS, 0.8)], texture_axis: 6 },
    Keyword { token: "derivative", topics: &[(MATH, 1.0)], texture_axis: 7 },
    Keyword { token: "integral", topics: &[(MATH, 1.0)], texture_axis: 8 },
    Keyword { token: "theorem", topics: &[(MATH, 1.0)], texture_axis: 9 },
    Keyword { token: "algebra", topics: &[(MATH, 1.0)], texture_axis: 10 },
    Keyword { token: "newton", topics: &[(PHYSICS, 1.0)], texture_axis: 11 },
    Keyword { token: "force", topics: &[(PHYSICS, 1.0)], texture_axis: 12 },
    Keyword { token: "momentum", topics: &[(PHYSICS, 1.0)], texture_axis: 13 },
    Keyword { token: "energy", topics: &[(PHYSICS, 1.0)], texture_axis: 14 },
    Keyword { token: "quantum", topics: &[(PHYSICS, 1.0)], texture_axis: 15 },
    Keyword { token: "molecule", topics: &[(CHEMISTRY, 1.0)], texture_axis: 4 },
    Keyword { token: "reaction", topics: &[(CHEMISTRY, 1.0)], texture_axis: 5 },
    Keyword { token: "entropy", topics: &[(CHEMISTRY, 1.0)], texture_axis: 6 },
];

fn found_keywords(text: &str) -> Vec<&'static Keyword> {
    let lowered = text.to_lowercase();
    LEXICON
        .iter()
        .filter(|k| lowered.contains(k.token))
        .collect()
}

/// Shared call counters so journeys can assert "no upstream call happened".
#[derive(Debug, Default)]
pub struct CallCounts {
    /// Distillation provider invocations
    pub distill: AtomicU32,
    /// Embedding provider invocations
    pub embed: AtomicU32,
}

// ============================================================================
// DISTILLER
// ============================================================================

/// Titles snippets with their sorted topic keywords; keyword-free text is
/// NOT_STUDY.
pub struct LexiconDistiller {
    counts: Arc<CallCounts>,
}

impl LexiconDistiller {
    /// Create a distiller reporting into the shared counters.
    pub fn new(counts: Arc<CallCounts>) -> Self {
        Self { counts }
    }
}

impl Distiller for LexiconDistiller {
    fn distill(&self, text: &str, _content_hash: &str) -> Result<Distillation, DistillError> {
        self.counts.distill.fetch_add(1, Ordering::SeqCst);

        let mut keywords: Vec<&str> = found_keywords(text).iter().map(|k| k.token).collect();
        if keywords.is_empty() {
            return Ok(Distillation {
                title: String::new(),
                summary: String::new(),
                classification: Classification::NotStudy,
            });
        }
        keywords.sort_unstable();
        keywords.dedup();

        Ok(Distillation {
            title: keywords.join(" "),
            summary: format!("{text} Condensed into a stable summary for spaced review."),
            classification: Classification::Study,
        })
    }
}

// ============================================================================
// EMBEDDER
// ============================================================================

/// Topic-axis blend embedder; see module docs.
pub struct LexiconEmbedder {
    counts: Arc<CallCounts>,
}

impl LexiconEmbedder {
    /// Create an embedder reporting into the shared counters.
    pub fn new(counts: Arc<CallCounts>) -> Self {
        Self { counts }
    }
}

impl TextEmbedder for LexiconEmbedder {
    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.counts.embed.fetch_add(1, Ordering::SeqCst);

        let mut v = vec![0.0_f32; MOCK_DIMENSIONS];
        let keywords = found_keywords(text);
        if keywords.is_empty() {
            // Off-topic content lands on its own axis, far from everything.
            v[3] = 1.0;
            return Ok(v);
        }

        // Context texts carry the title + summary join; titles never do.
        let texture = if text.contains("\n\n") { CONTEXT_TEXTURE } else { TITLE_TEXTURE };
        for keyword in &keywords {
            for (axis, weight) in keyword.topics {
                v[*axis] = v[*axis].max(*weight);
            }
            v[keyword.texture_axis] = v[keyword.texture_axis].max(texture);
        }
        normalize_vector(&mut v);
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        MOCK_DIMENSIONS
    }

    fn model_name(&self) -> &str {
        "lexicon-mock-v1"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use taxon_core::dot_product;

    fn embed(text: &str) -> Vec<f32> {
        LexiconEmbedder::new(Arc::new(CallCounts::default()))
            .embed_text(text)
            .unwrap()
    }

    #[test]
    fn paraphrases_share_title_vectors() {
        // Same keyword set → identical titles → identical vectors.
        let a = embed("eigen matrix");
        let b = embed("eigen matrix");
        assert!((dot_product(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn same_topic_titles_stay_below_dup_threshold() {
        let a = embed("derivative");
        let b = embed("integral theorem");
        let sim = dot_product(&a, &b);
        assert!(sim < 0.85, "title similarity {sim} would trip duplicate detection");
        assert!(sim > 0.3, "title similarity {sim} lost the shared topic");
    }

    #[test]
    fn same_topic_contexts_stay_close() {
        let a = embed("derivative\n\nthe derivative measures change.");
        let b = embed("integral theorem\n\nthe integral accumulates area by the theorem.");
        let sim = dot_product(&a, &b);
        assert!(sim > 0.8, "context similarity {sim} too low for same-topic routing");
    }

    #[test]
    fn cross_topic_contexts_stay_apart() {
        let a = embed("eigen\n\neigenvalues reveal structure.");
        let b = embed("newton\n\nnewton's laws of motion.");
        let sim = dot_product(&a, &b);
        assert!(sim < 0.2, "cross-topic similarity {sim} too high");
    }

    #[test]
    fn keyword_free_text_is_not_study() {
        let distiller = LexiconDistiller::new(Arc::new(CallCounts::default()));
        let result = distiller.distill("50% off all electronics this weekend!", "h").unwrap();
        assert_eq!(result.classification, Classification::NotStudy);
    }

    #[test]
    fn study_summary_meets_contract_length() {
        let distiller = LexiconDistiller::new(Arc::new(CallCounts::default()));
        let result = distiller
            .distill("the derivative measures instantaneous change.", "h")
            .unwrap();
        assert_eq!(result.classification, Classification::Study);
        let len = result.summary.chars().count();
        assert!((50..=500).contains(&len), "summary length {len}");
    }
}
