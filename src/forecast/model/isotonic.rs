//! Isotonic calibration (pool-adjacent-violators).
//!
//! Fitted once at training time on (raw score, outcome) pairs and then applied
//! as a piecewise-linear, non-decreasing map from raw score to probability.
//! Scores below the first knot map to the first level, above the last knot to
//! the last level.

use serde::{Deserialize, Serialize};

/// Knots of a non-decreasing calibration curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsotonicCalibration {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
}

#[derive(Debug, Clone, Copy)]
struct Block {
    x_min: f64,
    x_max: f64,
    sum: f64,
    weight: f64,
}

impl Block {
    fn mean(&self) -> f64 {
        self.sum / self.weight
    }
}

impl IsotonicCalibration {
    /// Fit with PAVA. Tied scores are pooled before the violator pass.
    /// Non-finite scores are ignored.
    pub fn fit(scores: &[f64], outcomes: &[bool]) -> Self {
        let mut pairs: Vec<(f64, f64)> = scores
            .iter()
            .zip(outcomes)
            .filter(|(s, _)| s.is_finite())
            .map(|(s, o)| (*s, if *o { 1.0 } else { 0.0 }))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut blocks: Vec<Block> = Vec::with_capacity(pairs.len());
        for (x, y) in pairs {
            match blocks.last_mut() {
                Some(last) if last.x_max == x => {
                    last.sum += y;
                    last.weight += 1.0;
                }
                _ => blocks.push(Block {
                    x_min: x,
                    x_max: x,
                    sum: y,
                    weight: 1.0,
                }),
            }
            // Merge backwards while the ordering is violated
            while blocks.len() >= 2 {
                let n = blocks.len();
                if blocks[n - 2].mean() <= blocks[n - 1].mean() {
                    break;
                }
                if let Some(tail) = blocks.pop() {
                    if let Some(prev) = blocks.last_mut() {
                        prev.x_max = tail.x_max;
                        prev.sum += tail.sum;
                        prev.weight += tail.weight;
                    }
                }
            }
        }

        let mut xs = Vec::with_capacity(blocks.len() * 2);
        let mut ys = Vec::with_capacity(blocks.len() * 2);
        for block in &blocks {
            let level = block.mean();
            xs.push(block.x_min);
            ys.push(level);
            if block.x_max > block.x_min {
                xs.push(block.x_max);
                ys.push(level);
            }
        }
        Self { xs, ys }
    }

    /// Build from explicit knots without any checking.
    pub fn from_points(xs: Vec<f64>, ys: Vec<f64>) -> Self {
        Self { xs, ys }
    }

    /// Identity-like curve used when there is nothing to fit.
    pub fn identity() -> Self {
        Self::from_points(vec![0.0, 1.0], vec![0.0, 1.0])
    }

    /// Map a raw score to a calibrated probability in [0, 1].
    pub fn apply(&self, score: f64) -> f64 {
        let (Some(&first_x), Some(&last_x)) = (self.xs.first(), self.xs.last()) else {
            return score.clamp(0.0, 1.0);
        };
        let n = self.xs.len().min(self.ys.len());
        if n == 0 {
            return score.clamp(0.0, 1.0);
        }
        let value = if score <= first_x {
            self.ys[0]
        } else if score >= last_x {
            self.ys[n - 1]
        } else {
            // first knot strictly greater than score
            let hi = self.xs[..n].partition_point(|x| *x <= score).min(n - 1);
            let lo = hi.saturating_sub(1);
            let (x0, x1) = (self.xs[lo], self.xs[hi]);
            let (y0, y1) = (self.ys[lo], self.ys[hi]);
            if x1 > x0 {
                y0 + (y1 - y0) * (score - x0) / (x1 - x0)
            } else {
                y1
            }
        };
        value.clamp(0.0, 1.0)
    }

    /// Re-check that the curve is a usable non-decreasing map.
    ///
    /// Checks the knots themselves and then `grid_points` evenly spaced raw
    /// scores over [0, 1]. Returns the first violation found.
    pub fn validate_monotonic(&self, grid_points: usize) -> Result<(), String> {
        if self.xs.is_empty() || self.xs.len() != self.ys.len() {
            return Err(format!(
                "malformed curve: {} knots, {} levels",
                self.xs.len(),
                self.ys.len()
            ));
        }
        if let Some(y) = self
            .ys
            .iter()
            .find(|y| !(y.is_finite() && (0.0..=1.0).contains(*y)))
        {
            return Err(format!("level {y} outside [0, 1]"));
        }
        for (i, pair) in self.xs.windows(2).enumerate() {
            if !(pair[1] > pair[0]) {
                return Err(format!("knots not increasing at index {}", i + 1));
            }
        }
        for (i, pair) in self.ys.windows(2).enumerate() {
            if pair[1] < pair[0] {
                return Err(format!(
                    "curve decreases at knot {}: {:.4} -> {:.4}",
                    i + 1,
                    pair[0],
                    pair[1]
                ));
            }
        }

        let steps = grid_points.max(2) - 1;
        let mut prev = f64::NEG_INFINITY;
        for i in 0..=steps {
            let x = i as f64 / steps as f64;
            let p = self.apply(x);
            if p < prev {
                return Err(format!("calibrated probability decreases at raw score {x:.3}"));
            }
            prev = p;
        }
        Ok(())
    }
}
