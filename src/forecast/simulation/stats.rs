//! Summary statistics over simulated seat counts.

use serde::{Deserialize, Serialize};

/// Linear-interpolation percentile of an ascending-sorted slice
/// (`q` in [0, 100]). Returns 0.0 for an empty slice.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (q.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// 5/25/50/75/95th percentiles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

/// Distribution of one alliance's simulated seat total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeatDistribution {
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: u32,
    pub max: u32,
    pub percentiles: Percentiles,
}

impl SeatDistribution {
    pub fn from_counts(counts: &[u32]) -> Self {
        if counts.is_empty() {
            let zero = Percentiles {
                p5: 0.0,
                p25: 0.0,
                p50: 0.0,
                p75: 0.0,
                p95: 0.0,
            };
            return Self {
                mean: 0.0,
                median: 0.0,
                std_dev: 0.0,
                min: 0,
                max: 0,
                percentiles: zero,
            };
        }
        let mut sorted: Vec<f64> = counts.iter().map(|c| f64::from(*c)).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let var = sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let percentiles = Percentiles {
            p5: percentile(&sorted, 5.0),
            p25: percentile(&sorted, 25.0),
            p50: percentile(&sorted, 50.0),
            p75: percentile(&sorted, 75.0),
            p95: percentile(&sorted, 95.0),
        };

        Self {
            mean,
            median: percentiles.p50,
            std_dev: var.sqrt(),
            min: counts.iter().copied().min().unwrap_or(0),
            max: counts.iter().copied().max().unwrap_or(0),
            percentiles,
        }
    }

    /// p95 - p5.
    pub fn spread_90(&self) -> f64 {
        self.percentiles.p95 - self.percentiles.p5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_interpolates() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&data, 0.0), 1.0);
        assert_eq!(percentile(&data, 50.0), 3.0);
        assert_eq!(percentile(&data, 100.0), 5.0);
        assert!((percentile(&data, 25.0) - 2.0).abs() < 1e-12);
        assert!((percentile(&[0.0, 10.0], 5.0) - 0.5).abs() < 1e-12);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_distribution_of_constant_counts() {
        let dist = SeatDistribution::from_counts(&[2; 100]);
        assert_eq!(dist.mean, 2.0);
        assert_eq!(dist.std_dev, 0.0);
        assert_eq!(dist.spread_90(), 0.0);
        assert_eq!((dist.min, dist.max), (2, 2));
    }

    #[test]
    fn test_percentiles_ordered() {
        let counts: Vec<u32> = (0..1000).map(|i| (i * 31 % 97) as u32).collect();
        let dist = SeatDistribution::from_counts(&counts);
        let p = dist.percentiles;
        assert!(p.p5 <= p.p25 && p.p25 <= p.p50 && p.p50 <= p.p75 && p.p75 <= p.p95);
        assert!(f64::from(dist.min) <= p.p5 && p.p95 <= f64::from(dist.max));
    }
}
