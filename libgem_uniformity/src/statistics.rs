use super::fitter::{CurveFitter, FitModel, FitResult};
use super::histogram::Histogram1D;

const MAX_DIST_BINS: usize = 100;
const MIN_SAMPLES_FOR_FIT: usize = 5;

/// Descriptive statistics of a set of values, along with their binned distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryStatistics {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub iqr: f64,
    /// std_dev / mean, None when the mean is zero
    pub resolution: Option<f64>,
    pub dist: Histogram1D,
    /// Gaussian fit to the distribution, present only when the fit succeeded
    pub fit: Option<FitResult>,
}

/// Linear interpolation between closest ranks
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    sorted[lower] + (pos - lower as f64) * (sorted[upper] - sorted[lower])
}

impl SummaryStatistics {
    /// Compute the statistics of a set of values. Returns None for an empty set.
    ///
    /// Non-finite values are ignored.
    pub fn compute(name: &str, values: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);
        let count = sorted.len();
        let min = sorted[0];
        let max = sorted[count - 1];
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let std_dev = if count > 1 {
            (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64).sqrt()
        } else {
            0.0
        };
        let q1 = quantile(&sorted, 0.25);
        let median = quantile(&sorted, 0.5);
        let q3 = quantile(&sorted, 0.75);

        let n_bins = ((count as f64).sqrt().ceil() as usize).clamp(1, MAX_DIST_BINS);
        let (low, high) = if max > min {
            let pad = 0.05 * (max - min);
            (min - pad, max + pad)
        } else {
            (min - 0.5, max + 0.5)
        };
        let mut dist = Histogram1D::new(name, name, n_bins, low, high).ok()?;
        for v in sorted.iter() {
            dist.fill(*v);
        }

        Some(Self {
            count,
            min,
            max,
            mean,
            std_dev,
            q1,
            median,
            q3,
            iqr: q3 - q1,
            resolution: if mean != 0.0 {
                Some(std_dev / mean)
            } else {
                None
            },
            dist,
            fit: None,
        })
    }

    /// Same as [`SummaryStatistics::compute`], also fitting the distribution with a gaussian
    pub fn compute_with_fit(name: &str, values: &[f64], fitter: &dyn CurveFitter) -> Option<Self> {
        let mut stats = Self::compute(name, values)?;
        if stats.count >= MIN_SAMPLES_FOR_FIT && stats.std_dev > 0.0 {
            let result = fitter.fit(
                &stats.dist,
                FitModel::Gaus,
                &[stats.dist.maximum(), stats.mean, stats.std_dev],
                &[],
                None,
            );
            if result.valid {
                stats.fit = Some(result);
            }
        }
        Some(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitter::LevenbergMarquardt;

    #[test]
    fn test_empty_is_absent() {
        assert!(SummaryStatistics::compute("s", &[]).is_none());
        assert!(SummaryStatistics::compute("s", &[f64::NAN]).is_none());
    }

    #[test]
    fn test_quartiles() {
        let stats = SummaryStatistics::compute("s", &[4.0, 1.0, 3.0, 2.0, 5.0]).unwrap();
        assert_eq!(stats.count, 5);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 5.0);
        assert_eq!(stats.mean, 3.0);
        assert_eq!(stats.median, 3.0);
        assert_eq!(stats.q1, 2.0);
        assert_eq!(stats.q3, 4.0);
        assert_eq!(stats.iqr, 2.0);
        assert!((stats.std_dev - 2.5_f64.sqrt()).abs() < 1e-12);
        assert_eq!(stats.dist.entries(), 5);
    }

    #[test]
    fn test_single_value() {
        let stats = SummaryStatistics::compute("s", &[7.0]).unwrap();
        assert_eq!(stats.std_dev, 0.0);
        assert_eq!(stats.resolution, Some(0.0));
        assert_eq!(stats.dist.integral(), 1.0);
    }

    #[test]
    fn test_zero_mean_has_no_resolution() {
        let stats = SummaryStatistics::compute("s", &[-1.0, 1.0]).unwrap();
        assert!(stats.resolution.is_none());
    }

    #[test]
    fn test_small_set_is_not_fit() {
        let fitter = LevenbergMarquardt::default();
        let stats = SummaryStatistics::compute_with_fit("s", &[1.0, 2.0], &fitter).unwrap();
        assert!(stats.fit.is_none());
    }
}
