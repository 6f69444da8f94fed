use serde::{Deserialize, Serialize};

use super::histogram::Histogram1D;

/// Parameters for the spectrum peak search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakSearch {
    /// Minimum peak separation / smoothing width, in bins
    pub sigma: f64,
    /// Minimum peak height relative to the tallest peak
    pub threshold: f64,
    pub remove_background: bool,
    pub max_peaks: usize,
}

impl Default for PeakSearch {
    fn default() -> Self {
        Self {
            sigma: 2.0,
            threshold: 0.5,
            remove_background: false,
            max_peaks: 5,
        }
    }
}

/// Anything that can locate peaks in a binned spectrum.
///
/// Peaks are returned as x positions ordered by decreasing height.
pub trait PeakFinder {
    fn search(
        &self,
        hist: &Histogram1D,
        sigma: f64,
        remove_background: bool,
        threshold: f64,
    ) -> Vec<f64>;
}

/// Smoothed local-maximum peak search, in the manner of a TSpectrum search
#[derive(Debug, Clone)]
pub struct SpectrumPeakFinder {
    max_peaks: usize,
}

impl SpectrumPeakFinder {
    pub fn new(max_peaks: usize) -> Self {
        Self { max_peaks }
    }
}

impl Default for SpectrumPeakFinder {
    fn default() -> Self {
        Self::new(PeakSearch::default().max_peaks)
    }
}

/// Clip the spectrum down to a slowly varying baseline (SNIP)
fn estimate_background(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let mut background = values.to_vec();
    for k in (1..=window).rev() {
        let previous = background.clone();
        for i in k..n.saturating_sub(k) {
            let average = 0.5 * (previous[i - k] + previous[i + k]);
            background[i] = previous[i].min(average);
        }
    }
    background
}

fn smooth(values: &[f64], sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 {
        return values.to_vec();
    }
    let half_width = (3.0 * sigma).ceil() as isize;
    let kernel: Vec<f64> = (-half_width..=half_width)
        .map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp())
        .collect();
    let n = values.len() as isize;
    (0..n)
        .map(|i| {
            let mut sum = 0.0;
            let mut norm = 0.0;
            for (offset, weight) in (-half_width..=half_width).zip(kernel.iter()) {
                let j = i + offset;
                if j >= 0 && j < n {
                    sum += weight * values[j as usize];
                    norm += weight;
                }
            }
            if norm > 0.0 {
                sum / norm
            } else {
                0.0
            }
        })
        .collect()
}

impl PeakFinder for SpectrumPeakFinder {
    fn search(
        &self,
        hist: &Histogram1D,
        sigma: f64,
        remove_background: bool,
        threshold: f64,
    ) -> Vec<f64> {
        let n_bins = hist.n_bins();
        if hist.integral() <= 0.0 || self.max_peaks == 0 {
            return vec![];
        }
        let mut values: Vec<f64> = (1..=n_bins).map(|bin| hist.bin_content(bin)).collect();
        if remove_background {
            let window = (4.0 * sigma).ceil().max(1.0) as usize;
            let background = estimate_background(&values, window);
            for (v, b) in values.iter_mut().zip(background) {
                *v = (*v - b).max(0.0);
            }
        }
        let smoothed = smooth(&values, sigma);
        let tallest = smoothed.iter().copied().fold(0.0, f64::max);
        if tallest <= 0.0 {
            return vec![];
        }
        let cut = threshold * tallest;

        // Plateaus resolve to their leftmost bin
        let mut candidates: Vec<(usize, f64)> = vec![];
        for i in 0..smoothed.len() {
            let left = if i > 0 { smoothed[i - 1] } else { f64::NEG_INFINITY };
            let right = smoothed.get(i + 1).copied().unwrap_or(f64::NEG_INFINITY);
            if smoothed[i] > left && smoothed[i] >= right && smoothed[i] >= cut {
                candidates.push((i, smoothed[i]));
            }
        }
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut accepted: Vec<(usize, f64)> = vec![];
        for (idx, height) in candidates {
            if accepted
                .iter()
                .any(|(other, _)| (idx as f64 - *other as f64).abs() <= sigma)
            {
                continue;
            }
            accepted.push((idx, height));
            if accepted.len() == self.max_peaks {
                break;
            }
        }

        accepted
            .into_iter()
            .map(|(idx, _)| {
                // Parabolic refinement on the smoothed spectrum
                let mut offset = 0.0;
                if idx > 0 && idx + 1 < smoothed.len() {
                    let (a, b, c) = (smoothed[idx - 1], smoothed[idx], smoothed[idx + 1]);
                    let denom = a - 2.0 * b + c;
                    if denom < 0.0 {
                        offset = (0.5 * (a - c) / denom).clamp(-0.5, 0.5);
                    }
                }
                hist.bin_center(idx + 1) + offset * hist.bin_width()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill_peak(hist: &mut Histogram1D, center: f64, sigma: f64, height: f64) {
        for bin in 1..=hist.n_bins() {
            let x = hist.bin_center(bin);
            let n = (height * (-0.5 * ((x - center) / sigma).powi(2)).exp()).round() as usize;
            for _ in 0..n {
                hist.fill(x);
            }
        }
    }

    #[test]
    fn test_empty_spectrum_has_no_peaks() {
        let hist = Histogram1D::new("h", "", 100, 0.0, 100.0).unwrap();
        let finder = SpectrumPeakFinder::default();
        assert!(finder.search(&hist, 2.0, false, 0.5).is_empty());
    }

    #[test]
    fn test_two_peaks_ordered_by_height() {
        let mut hist = Histogram1D::new("h", "", 100, 0.0, 1000.0).unwrap();
        fill_peak(&mut hist, 300.0, 30.0, 50.0);
        fill_peak(&mut hist, 700.0, 30.0, 100.0);
        let finder = SpectrumPeakFinder::default();
        let peaks = finder.search(&hist, 2.0, false, 0.3);
        assert_eq!(peaks.len(), 2);
        assert!((peaks[0] - 700.0).abs() < 10.0);
        assert!((peaks[1] - 300.0).abs() < 10.0);
    }

    #[test]
    fn test_threshold_rejects_small_peaks() {
        let mut hist = Histogram1D::new("h", "", 100, 0.0, 1000.0).unwrap();
        fill_peak(&mut hist, 300.0, 30.0, 20.0);
        fill_peak(&mut hist, 700.0, 30.0, 100.0);
        let finder = SpectrumPeakFinder::default();
        let peaks = finder.search(&hist, 2.0, false, 0.5);
        assert_eq!(peaks.len(), 1);
    }

    #[test]
    fn test_max_peaks_truncates() {
        let mut hist = Histogram1D::new("h", "", 100, 0.0, 1000.0).unwrap();
        fill_peak(&mut hist, 200.0, 20.0, 90.0);
        fill_peak(&mut hist, 500.0, 20.0, 100.0);
        fill_peak(&mut hist, 800.0, 20.0, 80.0);
        let finder = SpectrumPeakFinder::new(2);
        let peaks = finder.search(&hist, 2.0, false, 0.1);
        assert_eq!(peaks.len(), 2);
        assert!((peaks[0] - 500.0).abs() < 10.0);
    }
}
