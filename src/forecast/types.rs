//! Shared identifiers used across the forecasting pipeline.

use serde::{Deserialize, Serialize};

/// Electoral alliance a signal or seat is attributed to.
///
/// The simulation is a binary A-vs-B contest with a residual `Others` bloc
/// whose win probability is held fixed from the historical baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alliance {
    A,
    B,
    Others,
}

impl Alliance {
    /// The two alliances contesting the A-vs-B draw.
    pub const CONTESTING: [Alliance; 2] = [Alliance::A, Alliance::B];

    /// Every bloc that can win a seat.
    pub const ALL: [Alliance; 3] = [Alliance::A, Alliance::B, Alliance::Others];

    /// The opponent in the A-vs-B draw (`None` for `Others`).
    pub fn rival(self) -> Option<Alliance> {
        match self {
            Alliance::A => Some(Alliance::B),
            Alliance::B => Some(Alliance::A),
            Alliance::Others => None,
        }
    }
}

impl std::fmt::Display for Alliance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Alliance::A => write!(f, "A"),
            Alliance::B => write!(f, "B"),
            Alliance::Others => write!(f, "Others"),
        }
    }
}

/// One value per bloc.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerAlliance<T> {
    pub a: T,
    pub b: T,
    pub others: T,
}

impl<T> PerAlliance<T> {
    pub fn new(a: T, b: T, others: T) -> Self {
        Self { a, b, others }
    }

    pub fn get(&self, alliance: Alliance) -> &T {
        match alliance {
            Alliance::A => &self.a,
            Alliance::B => &self.b,
            Alliance::Others => &self.others,
        }
    }

    pub fn get_mut(&mut self, alliance: Alliance) -> &mut T {
        match alliance {
            Alliance::A => &mut self.a,
            Alliance::B => &mut self.b,
            Alliance::Others => &mut self.others,
        }
    }

    /// Build by evaluating `f` for A, B, Others in that order.
    pub fn from_fn(mut f: impl FnMut(Alliance) -> T) -> Self {
        Self {
            a: f(Alliance::A),
            b: f(Alliance::B),
            others: f(Alliance::Others),
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> PerAlliance<U> {
        PerAlliance {
            a: f(&self.a),
            b: f(&self.b),
            others: f(&self.others),
        }
    }
}

impl PerAlliance<u32> {
    pub fn total(&self) -> u32 {
        self.a + self.b + self.others
    }
}
