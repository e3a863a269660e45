//! SM-2 Algorithm
//!
//! The classic SuperMemo-2 update rule over (ease factor, interval,
//! repetitions). Response grades map to q ∈ {0, 1, 2, 3}:
//!
//! - non-FORGOT: `EF ← max(minEF, EF + (0.1 − (3−q)·(0.08 + (3−q)·0.02)))`,
//!   `reps += 1`, interval 1 → 6 → round(previous · EF)
//! - FORGOT: interval 1, reps 0, `EF ← max(minEF, EF − 0.2)`
//!
//! Pure functions only; state persistence and status transitions live in
//! the scheduler.

use serde::{Deserialize, Serialize};

use crate::config::Sm2Config;

// ============================================================================
// TYPES
// ============================================================================

/// Response grade for one review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewQuality {
    /// Complete blackout; the item returns to learning
    Forgot,
    /// Recalled with serious difficulty
    Hard,
    /// Recalled with some effort
    Good,
    /// Instant recall
    Easy,
}

impl ReviewQuality {
    /// Numeric grade used by the SM-2 formula.
    pub fn grade(&self) -> u8 {
        match self {
            ReviewQuality::Forgot => 0,
            ReviewQuality::Hard => 1,
            ReviewQuality::Good => 2,
            ReviewQuality::Easy => 3,
        }
    }

    /// All grades, worst to best.
    pub fn all() -> [ReviewQuality; 4] {
        [
            ReviewQuality::Forgot,
            ReviewQuality::Hard,
            ReviewQuality::Good,
            ReviewQuality::Easy,
        ]
    }
}

impl std::fmt::Display for ReviewQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReviewQuality::Forgot => "FORGOT",
            ReviewQuality::Hard => "HARD",
            ReviewQuality::Good => "GOOD",
            ReviewQuality::Easy => "EASY",
        };
        write!(f, "{name}")
    }
}

/// SM-2 state triple
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sm2Parameters {
    /// Ease factor, never below the configured floor
    pub ease_factor: f64,
    /// Current interval in days
    pub interval_days: i64,
    /// Successful repetitions since the last lapse
    pub repetitions: u32,
}

impl Sm2Parameters {
    /// Fresh parameters for a new schedule.
    pub fn initial(config: &Sm2Config) -> Self {
        Self {
            ease_factor: config.initial_ease_factor,
            interval_days: 0,
            repetitions: 0,
        }
    }
}

// ============================================================================
// UPDATE RULE
// ============================================================================

/// Apply one review to the SM-2 triple.
pub fn apply_review(
    params: &Sm2Parameters,
    quality: ReviewQuality,
    config: &Sm2Config,
) -> Sm2Parameters {
    if quality == ReviewQuality::Forgot {
        return Sm2Parameters {
            ease_factor: (params.ease_factor - 0.2).max(config.min_ease_factor),
            interval_days: 1,
            repetitions: 0,
        };
    }

    let q = quality.grade() as f64;
    let ease_factor =
        (params.ease_factor + (0.1 - (3.0 - q) * (0.08 + (3.0 - q) * 0.02)))
            .max(config.min_ease_factor);
    let repetitions = params.repetitions + 1;
    let interval_days = match repetitions {
        1 => 1,
        2 => 6,
        _ => (params.interval_days as f64 * ease_factor).round() as i64,
    };

    Sm2Parameters {
        ease_factor,
        interval_days,
        repetitions,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Sm2Config {
        Sm2Config::default()
    }

    #[test]
    fn test_good_review_sequence() {
        let cfg = config();
        let mut params = Sm2Parameters::initial(&cfg);
        let mut intervals = Vec::new();
        for _ in 0..4 {
            params = apply_review(&params, ReviewQuality::Good, &cfg);
            intervals.push(params.interval_days);
        }
        // GOOD keeps EF at 2.5: 1, 6, round(6·2.5)=15, round(15·2.5)=38.
        assert_eq!(intervals, vec![1, 6, 15, 38]);
        assert!((params.ease_factor - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_easy_raises_ease_factor() {
        let cfg = config();
        let params = apply_review(&Sm2Parameters::initial(&cfg), ReviewQuality::Easy, &cfg);
        assert!((params.ease_factor - 2.6).abs() < 1e-9);
    }

    #[test]
    fn test_hard_lowers_ease_factor() {
        let cfg = config();
        let params = apply_review(&Sm2Parameters::initial(&cfg), ReviewQuality::Hard, &cfg);
        // 0.1 − 2·(0.08 + 2·0.02) = −0.14
        assert!((params.ease_factor - 2.36).abs() < 1e-9);
        assert_eq!(params.repetitions, 1);
    }

    #[test]
    fn test_forgot_resets_repetitions_and_interval() {
        let cfg = config();
        let mut params = Sm2Parameters::initial(&cfg);
        for _ in 0..3 {
            params = apply_review(&params, ReviewQuality::Good, &cfg);
        }
        let lapsed = apply_review(&params, ReviewQuality::Forgot, &cfg);
        assert_eq!(lapsed.interval_days, 1);
        assert_eq!(lapsed.repetitions, 0);
        assert!((lapsed.ease_factor - 2.3).abs() < 1e-9);
    }

    #[test]
    fn test_ease_factor_floor() {
        let cfg = config();
        let mut params = Sm2Parameters::initial(&cfg);
        for _ in 0..20 {
            params = apply_review(&params, ReviewQuality::Forgot, &cfg);
            assert!(params.ease_factor >= cfg.min_ease_factor);
        }
        assert!((params.ease_factor - cfg.min_ease_factor).abs() < 1e-9);
        // HARD repeatedly also respects the floor.
        for _ in 0..20 {
            params = apply_review(&params, ReviewQuality::Hard, &cfg);
            assert!(params.ease_factor >= cfg.min_ease_factor);
        }
    }

    #[test]
    fn test_grades() {
        assert_eq!(ReviewQuality::Forgot.grade(), 0);
        assert_eq!(ReviewQuality::Easy.grade(), 3);
    }

    #[test]
    fn test_quality_wire_names() {
        let json = serde_json::to_string(&ReviewQuality::Forgot).unwrap();
        assert_eq!(json, "\"FORGOT\"");
        let back: ReviewQuality = serde_json::from_str("\"GOOD\"").unwrap();
        assert_eq!(back, ReviewQuality::Good);
    }
}
