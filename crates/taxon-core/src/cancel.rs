//! Cooperative Cancellation
//!
//! Every pipeline stage accepts a [`CancelToken`]; cancellation between
//! stages aborts the remainder of the route before the commit stage runs,
//! so a cancelled route never leaves partial writes behind.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cancellation notice raised at a stage checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Operation cancelled")]
pub struct Cancelled;

/// Cloneable cancellation flag shared across pipeline stages
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token that is never cancelled unless [`cancel`](Self::cancel) is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to every clone of this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation was signalled.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Stage checkpoint: fails fast once cancellation was signalled.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() { Err(Cancelled) } else { Ok(()) }
    }
}

// ============================================================================
// TESTS
// ============================================================================
