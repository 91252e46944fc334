//! Safe / Lean / Toss-up seat rating.
//!
//! Rated on the unshocked calibrated probability of the favored alliance.
//! A value sitting exactly on a threshold goes to the lower-uncertainty band
//! (0.65 is Lean, 0.80 is Safe).

use serde::{Deserialize, Serialize};

use crate::forecast::types::Alliance;

/// Favored-side probability at or above which a seat is Safe.
pub const SAFE_THRESHOLD: f64 = 0.80;
/// Favored-side probability at or above which a seat is Lean.
pub const LEAN_THRESHOLD: f64 = 0.65;

/// Absorbs float noise so exact boundary values resolve upward.
const BOUNDARY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatClass {
    Safe,
    Lean,
    TossUp,
}

impl SeatClass {
    pub fn from_favored_probability(p: f64) -> Self {
        if p >= SAFE_THRESHOLD - BOUNDARY_EPSILON {
            SeatClass::Safe
        } else if p >= LEAN_THRESHOLD - BOUNDARY_EPSILON {
            SeatClass::Lean
        } else {
            SeatClass::TossUp
        }
    }

    /// Lean and Toss-up seats are marginal.
    pub fn is_marginal(self) -> bool {
        !matches!(self, SeatClass::Safe)
    }

    pub fn label(self) -> &'static str {
        match self {
            SeatClass::Safe => "Safe",
            SeatClass::Lean => "Lean",
            SeatClass::TossUp => "Toss-up",
        }
    }
}

impl std::fmt::Display for SeatClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Rating of one seat in the A-vs-B contest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeatRating {
    pub favored: Alliance,
    pub favored_probability: f64,
    pub class: SeatClass,
}

/// Rate a seat from P(A beats B). Exactly 0.5 favors A.
pub fn rate(probability_a: f64) -> SeatRating {
    let (favored, favored_probability) = if probability_a >= 0.5 {
        (Alliance::A, probability_a)
    } else {
        (Alliance::B, 1.0 - probability_a)
    };
    SeatRating {
        favored,
        favored_probability,
        class: SeatClass::from_favored_probability(favored_probability),
    }
}
