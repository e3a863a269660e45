//! Deterministic Mock Collaborators
//!
//! Journeys need exact, repeatable decisions, so the LLM collaborators are
//! replaced by lexicon-driven fakes:
//!
//! - [`LexiconDistiller`] titles a snippet with the topic keywords it
//!   contains (sorted, so paraphrases of the same idea share a title) and
//!   classifies keyword-free text as NOT_STUDY
//! - [`LexiconEmbedder`] embeds text as a topic-axis blend: shared topic
//!   keywords pull vectors together, a per-keyword texture axis keeps
//!   distinct ideas apart — strongly for titles, mildly for contexts

mod fixtures;

pub use fixtures::{CallCounts, LexiconDistiller, LexiconEmbedder, MOCK_DIMENSIONS};
