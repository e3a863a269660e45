//! Daily Request and Token Budget
//!
//! The distillation and embedding collaborators share one budget. When the
//! day's allowance is spent, further acquisitions fail fast with
//! [`BudgetExhausted`] and the router downgrades the candidate to an
//! unsorted decision without issuing any upstream call.
//!
//! Budget windows are UTC days; counters reset on the first acquisition of
//! a new day.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::config::BudgetConfig;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Raised when a daily allowance is already spent
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BudgetExhausted {
    /// Daily request count reached
    #[error("Daily request limit of {limit} reached")]
    Requests {
        /// Configured daily request limit
        limit: u64,
    },
    /// Daily token allowance reached
    #[error("Daily token budget of {budget} exhausted")]
    Tokens {
        /// Configured daily token budget
        budget: u64,
    },
}

// ============================================================================
// BUDGET
// ============================================================================

#[derive(Debug)]
struct Window {
    day: NaiveDate,
    requests_used: u64,
    tokens_used: u64,
}

/// Usage snapshot for observability
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetUsage {
    /// Requests issued today
    pub requests_used: u64,
    /// Configured daily request limit
    pub request_limit: u64,
    /// Tokens spent today
    pub tokens_used: u64,
    /// Configured daily token budget
    pub token_budget: u64,
}

/// Shared daily budget for upstream LLM calls
#[derive(Debug)]
pub struct RequestBudget {
    config: BudgetConfig,
    window: Mutex<Window>,
}

impl RequestBudget {
    /// Create a budget with fresh counters for today.
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            window: Mutex::new(Window {
                day: Utc::now().date_naive(),
                requests_used: 0,
                tokens_used: 0,
            }),
        }
    }

    /// Reserve one request plus an estimated token spend.
    ///
    /// Fails fast without reserving anything when either allowance is
    /// already spent; a successful reservation is not refunded on call
    /// failure (failed upstream calls still consumed quota).
    pub fn acquire(&self, estimated_tokens: u64) -> Result<(), BudgetExhausted> {
        let mut window = match self.window.lock() {
            Ok(w) => w,
            // A poisoned budget counter fails closed.
            Err(_) => {
                return Err(BudgetExhausted::Requests {
                    limit: self.config.daily_request_limit,
                });
            }
        };

        let today = Utc::now().date_naive();
        if window.day != today {
            window.day = today;
            window.requests_used = 0;
            window.tokens_used = 0;
        }

        if window.requests_used >= self.config.daily_request_limit {
            return Err(BudgetExhausted::Requests {
                limit: self.config.daily_request_limit,
            });
        }
        if window.tokens_used + estimated_tokens > self.config.daily_token_budget {
            return Err(BudgetExhausted::Tokens {
                budget: self.config.daily_token_budget,
            });
        }

        window.requests_used += 1;
        window.tokens_used += estimated_tokens;
        Ok(())
    }

    /// Reserve token spend only, without consuming a request slot.
    ///
    /// Embedding calls ride on the request their distillation already
    /// consumed; they still count against the token allowance.
    pub fn acquire_tokens(&self, estimated_tokens: u64) -> Result<(), BudgetExhausted> {
        let mut window = match self.window.lock() {
            Ok(w) => w,
            Err(_) => {
                return Err(BudgetExhausted::Tokens {
                    budget: self.config.daily_token_budget,
                });
            }
        };

        let today = Utc::now().date_naive();
        if window.day != today {
            window.day = today;
            window.requests_used = 0;
            window.tokens_used = 0;
        }

        if window.tokens_used + estimated_tokens > self.config.daily_token_budget {
            return Err(BudgetExhausted::Tokens {
                budget: self.config.daily_token_budget,
            });
        }
        window.tokens_used += estimated_tokens;
        Ok(())
    }

    /// Whether at least one request could still be acquired today.
    pub fn has_headroom(&self) -> bool {
        self.window
            .lock()
            .map(|w| {
                w.day != Utc::now().date_naive()
                    || w.requests_used < self.config.daily_request_limit
            })
            .unwrap_or(false)
    }

    /// Hard per-call timeout for upstream requests.
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.request_timeout_secs)
    }

    /// Today's usage.
    pub fn usage(&self) -> BudgetUsage {
        let (requests_used, tokens_used) = self
            .window
            .lock()
            .map(|w| {
                if w.day == Utc::now().date_naive() {
                    (w.requests_used, w.tokens_used)
                } else {
                    (0, 0)
                }
            })
            .unwrap_or((0, 0));
        BudgetUsage {
            requests_used,
            request_limit: self.config.daily_request_limit,
            tokens_used,
            token_budget: self.config.daily_token_budget,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
