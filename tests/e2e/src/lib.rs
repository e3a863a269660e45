//! End-to-end test support for the taxon engine.
//!
//! - [`mocks`] — deterministic distillation and embedding collaborators
//!   driven by a small topic lexicon, so every journey asserts exact
//!   decisions
//! - [`harness`] — an engine builder over temp directories

pub mod harness;
pub mod mocks;
