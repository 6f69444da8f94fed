//! Binned distributions used throughout the analysis.
//!
//! Both histogram types follow the usual HEP convention for bin numbering: bin 0 is the
//! underflow, bins 1..=n_bins are the in-range bins and bin n_bins+1 is the overflow.
//! Every in-range bin is [low_edge, low_edge + width).
use ndarray::{s, Array1, Array2};
use serde::{Deserialize, Serialize};

use super::error::HistogramError;

/// Axis configuration for a single observable.
///
/// This is the piece of the analysis configuration which describes how a distribution
/// should be booked. The name is combined with the sector indices to make a unique
/// histogram name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisSetup {
    pub name: String,
    pub title: String,
    pub n_bins: usize,
    pub low: f64,
    pub high: f64,
}

impl AxisSetup {
    pub fn new(name: &str, title: &str, n_bins: usize, low: f64, high: f64) -> Self {
        Self {
            name: String::from(name),
            title: String::from(title),
            n_bins,
            low,
            high,
        }
    }

    /// Check that the setup would produce a valid histogram
    pub fn validate(&self) -> Result<(), HistogramError> {
        Axis::new(&self.name, self.n_bins, self.low, self.high).map(|_| ())
    }
}

/// A uniform axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Axis {
    n_bins: usize,
    low: f64,
    high: f64,
}

impl Axis {
    pub fn new(name: &str, n_bins: usize, low: f64, high: f64) -> Result<Self, HistogramError> {
        if n_bins == 0 {
            return Err(HistogramError::NoBins(String::from(name)));
        }
        if !(low.is_finite() && high.is_finite()) || high <= low {
            return Err(HistogramError::BadRange {
                name: String::from(name),
                low,
                high,
            });
        }
        Ok(Self { n_bins, low, high })
    }

    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn bin_width(&self) -> f64 {
        (self.high - self.low) / self.n_bins as f64
    }

    pub fn bin_low_edge(&self, bin: usize) -> f64 {
        self.low + (bin as f64 - 1.0) * self.bin_width()
    }

    pub fn bin_center(&self, bin: usize) -> f64 {
        self.bin_low_edge(bin) + 0.5 * self.bin_width()
    }

    /// Find the bin for a value, including under/overflow. NaN has no bin.
    pub fn find_bin(&self, value: f64) -> Option<usize> {
        if value.is_nan() {
            None
        } else if value < self.low {
            Some(0)
        } else if value >= self.high {
            Some(self.n_bins + 1)
        } else {
            let bin = ((value - self.low) / self.bin_width()).floor() as usize + 1;
            // Guard against rounding right at the upper edge
            Some(bin.min(self.n_bins))
        }
    }
}

/// A one dimensional histogram of unweighted samples
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram1D {
    name: String,
    title: String,
    axis: Axis,
    contents: Array1<f64>,
    entries: u64,
}

impl Histogram1D {
    pub fn new(
        name: &str,
        title: &str,
        n_bins: usize,
        low: f64,
        high: f64,
    ) -> Result<Self, HistogramError> {
        let axis = Axis::new(name, n_bins, low, high)?;
        Ok(Self {
            name: String::from(name),
            title: String::from(title),
            axis,
            contents: Array1::zeros(n_bins + 2),
            entries: 0,
        })
    }

    /// Rebuild a histogram from stored contents (including under/overflow)
    pub fn from_contents(
        name: &str,
        title: &str,
        low: f64,
        high: f64,
        contents: Vec<f64>,
        entries: u64,
    ) -> Result<Self, HistogramError> {
        if contents.len() < 3 {
            return Err(HistogramError::ShapeMismatch(String::from(name)));
        }
        let mut hist = Self::new(name, title, contents.len() - 2, low, high)?;
        hist.contents = Array1::from(contents);
        hist.entries = entries;
        Ok(hist)
    }

    pub fn fill(&mut self, value: f64) {
        if let Some(bin) = self.axis.find_bin(value) {
            self.contents[bin] += 1.0;
            self.entries += 1;
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn axis(&self) -> &Axis {
        &self.axis
    }

    pub fn n_bins(&self) -> usize {
        self.axis.n_bins
    }

    pub fn bin_center(&self, bin: usize) -> f64 {
        self.axis.bin_center(bin)
    }

    /// All bins share a width
    pub fn bin_width(&self) -> f64 {
        self.axis.bin_width()
    }

    pub fn bin_content(&self, bin: usize) -> f64 {
        self.contents.get(bin).copied().unwrap_or(0.0)
    }

    /// Poisson error on a bin content
    pub fn bin_error(&self, bin: usize) -> f64 {
        self.bin_content(bin).sqrt()
    }

    /// All bin contents, including under/overflow
    pub fn contents(&self) -> &Array1<f64> {
        &self.contents
    }

    /// Number of fills, including those that landed in under/overflow
    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Sum of the in-range bin contents
    pub fn integral(&self) -> f64 {
        self.contents.slice(s![1..=self.axis.n_bins]).sum()
    }

    /// The in-range bin with the largest content. Ties resolve to the lowest bin.
    pub fn maximum_bin(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for bin in 1..=self.axis.n_bins {
            let content = self.contents[bin];
            match best {
                Some((_, max)) if content <= max => (),
                _ => best = Some((bin, content)),
            }
        }
        best.filter(|(_, max)| *max > 0.0).map(|(bin, _)| bin)
    }

    pub fn maximum(&self) -> f64 {
        self.maximum_bin()
            .map(|bin| self.contents[bin])
            .unwrap_or(0.0)
    }

    /// Mean of the in-range contents, computed from bin centers
    pub fn mean(&self) -> f64 {
        let total = self.integral();
        if total <= 0.0 {
            return 0.0;
        }
        (1..=self.axis.n_bins)
            .map(|bin| self.contents[bin] * self.axis.bin_center(bin))
            .sum::<f64>()
            / total
    }

    /// Standard deviation of the in-range contents, computed from bin centers
    pub fn rms(&self) -> f64 {
        let total = self.integral();
        if total <= 0.0 {
            return 0.0;
        }
        let mean = self.mean();
        let var = (1..=self.axis.n_bins)
            .map(|bin| self.contents[bin] * (self.axis.bin_center(bin) - mean).powi(2))
            .sum::<f64>()
            / total;
        var.sqrt()
    }
}

/// A two dimensional histogram of unweighted samples
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram2D {
    name: String,
    title: String,
    x_axis: Axis,
    y_axis: Axis,
    contents: Array2<f64>,
    entries: u64,
}

impl Histogram2D {
    pub fn new(
        name: &str,
        title: &str,
        x_axis: Axis,
        y_axis: Axis,
    ) -> Result<Self, HistogramError> {
        Ok(Self {
            name: String::from(name),
            title: String::from(title),
            x_axis,
            y_axis,
            contents: Array2::zeros((x_axis.n_bins + 2, y_axis.n_bins + 2)),
            entries: 0,
        })
    }

    /// Rebuild a histogram from stored contents (including under/overflow on both axes)
    pub fn from_contents(
        name: &str,
        title: &str,
        x_axis: Axis,
        y_axis: Axis,
        contents: Array2<f64>,
        entries: u64,
    ) -> Result<Self, HistogramError> {
        if contents.dim() != (x_axis.n_bins + 2, y_axis.n_bins + 2) {
            return Err(HistogramError::ShapeMismatch(String::from(name)));
        }
        Ok(Self {
            name: String::from(name),
            title: String::from(title),
            x_axis,
            y_axis,
            contents,
            entries,
        })
    }

    pub fn fill(&mut self, x: f64, y: f64) {
        if let (Some(bx), Some(by)) = (self.x_axis.find_bin(x), self.y_axis.find_bin(y)) {
            self.contents[[bx, by]] += 1.0;
            self.entries += 1;
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn x_axis(&self) -> &Axis {
        &self.x_axis
    }

    pub fn y_axis(&self) -> &Axis {
        &self.y_axis
    }

    pub fn contents(&self) -> &Array2<f64> {
        &self.contents
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn bin_content(&self, bin_x: usize, bin_y: usize) -> f64 {
        self.contents.get([bin_x, bin_y]).copied().unwrap_or(0.0)
    }

    /// Project the y-axis contents of a single x bin into a new 1D histogram.
    ///
    /// The y under/overflow of that column is carried into the projection's
    /// under/overflow so that the projection's entries match the samples in the column.
    pub fn projection_y(&self, name: &str, bin_x: usize) -> Result<Histogram1D, HistogramError> {
        if bin_x > self.x_axis.n_bins + 1 {
            return Err(HistogramError::BadBin(bin_x));
        }
        let column = self.contents.row(bin_x).to_vec();
        let entries = column.iter().sum::<f64>().round() as u64;
        Histogram1D::from_contents(
            name,
            &self.title,
            self.y_axis.low,
            self.y_axis.high,
            column,
            entries,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_bin_edges() {
        let axis = Axis::new("test", 3, -5.0, 5.0).unwrap();
        assert_eq!(axis.find_bin(-5.0), Some(1));
        assert_eq!(axis.find_bin(-2.0), Some(1));
        assert_eq!(axis.find_bin(-1.0), Some(2));
        assert_eq!(axis.find_bin(5.0), Some(4));
        assert_eq!(axis.find_bin(-5.1), Some(0));
        assert_eq!(axis.find_bin(f64::NAN), None);
    }

    #[test]
    fn test_bad_axis() {
        assert!(Histogram1D::new("h", "", 0, 0.0, 1.0).is_err());
        assert!(Histogram1D::new("h", "", 10, 1.0, 1.0).is_err());
    }

    #[test]
    fn test_fill_and_stats() {
        let mut hist = Histogram1D::new("h", "", 10, 0.0, 10.0).unwrap();
        hist.fill(2.5);
        hist.fill(2.5);
        hist.fill(4.5);
        hist.fill(20.0);
        assert_eq!(hist.entries(), 4);
        assert_eq!(hist.integral(), 3.0);
        assert_eq!(hist.maximum_bin(), Some(3));
        assert!((hist.mean() - (2.5 * 2.0 + 4.5) / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_projection_matches_column() {
        let x = Axis::new("x", 3, -5.0, 5.0).unwrap();
        let y = Axis::new("y", 300, 0.0, 15000.0).unwrap();
        let mut hist = Histogram2D::new("h2", "", x, y).unwrap();
        hist.fill(-2.0, 100.0);
        hist.fill(-1.0, 150.0);
        hist.fill(0.0, 200.0);
        hist.fill(-4.0, 20000.0);

        let first = hist.projection_y("p1", 1).unwrap();
        assert_eq!(first.entries(), 2);
        assert_eq!(first.integral(), 1.0);
        assert_eq!(first.bin_content(3), 1.0);
        let second = hist.projection_y("p2", 2).unwrap();
        assert_eq!(second.entries(), 2);
        assert!(hist.projection_y("bad", 10).is_err());
    }
}
