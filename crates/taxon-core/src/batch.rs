//! Capture Boundary Types
//!
//! A [`Batch`] is what the capture layer hands over: a window/topic label
//! plus the raw text snippets harvested from it. Batches are immutable once
//! created; everything downstream is keyed off `(batch_id, index)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ============================================================================
// BATCH
// ============================================================================

/// One raw snippet inside a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BatchEntry {
    /// The raw captured text (typically OCR output)
    pub text: String,
    /// When the snippet was captured
    pub timestamp: DateTime<Utc>,
    /// Optional capture metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EntryMetadata>,
}

/// Capture metadata attached to an entry
///
/// `uri` is the only field the engine interprets; capture layers may attach
/// arbitrary extra keys, which round-trip untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    /// Source URI of the capture, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Any additional capture-layer keys
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A batch of captured snippets
///
/// Immutable once created. `batch_id` is a universally unique token and
/// participates in every candidate id derived from the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Batch {
    /// Universally unique batch token
    pub batch_id: Uuid,
    /// Capture window label (e.g. application or browser tab title)
    pub window: String,
    /// Topic label supplied by the capture layer
    pub topic: String,
    /// The captured snippets, in capture order
    pub entries: Vec<BatchEntry>,
    /// When the batch was assembled
    pub created_at: DateTime<Utc>,
}

impl Batch {
    /// Create a batch with a fresh id
    pub fn new(window: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            window: window.into(),
            topic: topic.into(),
            entries: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Append a snippet, returning its index within the batch
    pub fn push_entry(&mut self, text: impl Into<String>) -> usize {
        self.entries.push(BatchEntry {
            text: text.into(),
            timestamp: Utc::now(),
            metadata: None,
        });
        self.entries.len() - 1
    }
}

// ============================================================================
// TESTS
// ============================================================================
