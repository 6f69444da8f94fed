//! Curve fitting of charge spectra.
//!
//! The fit models form a closed set; each one knows its parameter count and how to
//! evaluate itself. Parameter seeds, limits and fit-range boundaries are all expressed as
//! [`SpectrumValue`]s, which are resolved against the histogram being fit and the peak
//! found by the spectrum search.
//!
//! The default [`CurveFitter`] is a Levenberg-Marquardt chi-square minimizer over the
//! non-empty bins of the histogram, with Poisson bin errors.
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::error::FitError;
use super::histogram::Histogram1D;

/// Fit engine status codes
pub const FIT_STATUS_CONVERGED: i32 = 0;
pub const FIT_STATUS_MAX_ITERATIONS: i32 = 1;
pub const FIT_STATUS_SINGULAR: i32 = 2;
pub const FIT_STATUS_NO_DATA: i32 = 3;
pub const FIT_STATUS_NOT_FINITE: i32 = 4;

const LAMBDA_START: f64 = 1e-3;
const LAMBDA_MAX: f64 = 1e10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitModel {
    /// `[0]*exp(-0.5*((x-[1])/[2])^2)`
    Gaus,
    /// Moyal approximation of the Landau, normalized so `[0]` is the height at the peak `[1]`
    Landau,
    /// Gaussian on a linear background `[3] + [4]*x`
    GausPol1,
    /// Landau on a linear background `[3] + [4]*x`
    LandauPol1,
}

impl FitModel {
    pub fn n_params(&self) -> usize {
        match self {
            Self::Gaus | Self::Landau => 3,
            Self::GausPol1 | Self::LandauPol1 => 5,
        }
    }

    pub fn formula(&self) -> &'static str {
        match self {
            Self::Gaus => "gaus",
            Self::Landau => "landau",
            Self::GausPol1 => "gaus_pol1",
            Self::LandauPol1 => "landau_pol1",
        }
    }

    /// Meaning of each parameter slot, in order
    pub fn default_meanings(&self) -> Vec<ParamMeaning> {
        let mut meanings = vec![
            ParamMeaning::Amplitude,
            ParamMeaning::Peak,
            ParamMeaning::Sigma,
        ];
        if self.n_params() == 5 {
            meanings.push(ParamMeaning::Constant);
            meanings.push(ParamMeaning::Slope);
        }
        meanings
    }

    pub fn eval(&self, x: f64, params: &[f64]) -> f64 {
        match self {
            Self::Gaus => gaus(x, params[0], params[1], params[2]),
            Self::Landau => moyal(x, params[0], params[1], params[2]),
            Self::GausPol1 => gaus(x, params[0], params[1], params[2]) + params[3] + params[4] * x,
            Self::LandauPol1 => {
                moyal(x, params[0], params[1], params[2]) + params[3] + params[4] * x
            }
        }
    }
}

impl FromStr for FitModel {
    type Err = FitError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gaus" => Ok(Self::Gaus),
            "landau" => Ok(Self::Landau),
            "gaus_pol1" => Ok(Self::GausPol1),
            "landau_pol1" => Ok(Self::LandauPol1),
            _ => Err(FitError::UnknownModel(s.to_string())),
        }
    }
}

fn gaus(x: f64, amplitude: f64, mean: f64, sigma: f64) -> f64 {
    if sigma == 0.0 {
        return 0.0;
    }
    let z = (x - mean) / sigma;
    amplitude * (-0.5 * z * z).exp()
}

fn moyal(x: f64, amplitude: f64, mpv: f64, sigma: f64) -> f64 {
    if sigma == 0.0 {
        return 0.0;
    }
    let lambda = (x - mpv) / sigma;
    amplitude * (-0.5 * (lambda + (-lambda).exp()) + 0.5).exp()
}

/// The role a fit parameter plays in the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParamMeaning {
    Amplitude,
    Peak,
    Sigma,
    Constant,
    Slope,
    Other,
}

/// A value derived from a spectrum, used for fit seeds, limits and range boundaries
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectrumValue {
    Fixed(f64),
    /// Maximum bin content
    Amplitude,
    /// Peak position found by the spectrum search
    Peak,
    Mean,
    Rms,
    /// Full width at half maximum around the peak
    Fwhm,
    /// Peak + k * RMS (k may be negative)
    PeakPlusRms(f64),
    /// Peak + k * FWHM (k may be negative)
    PeakPlusFwhm(f64),
}

impl SpectrumValue {
    pub fn evaluate(&self, hist: &Histogram1D, peak: f64) -> f64 {
        match self {
            Self::Fixed(value) => *value,
            Self::Amplitude => hist.maximum(),
            Self::Peak => peak,
            Self::Mean => hist.mean(),
            Self::Rms => hist.rms(),
            Self::Fwhm => fwhm(hist, peak),
            Self::PeakPlusRms(k) => peak + k * hist.rms(),
            Self::PeakPlusFwhm(k) => peak + k * fwhm(hist, peak),
        }
    }
}

/// Width of the region around `peak` where the contents stay above half of the peak bin.
///
/// Falls back to the gaussian equivalent of the RMS when no such region can be found.
pub fn fwhm(hist: &Histogram1D, peak: f64) -> f64 {
    let fallback = 2.0 * (2.0 * std::f64::consts::LN_2).sqrt() * hist.rms();
    let n_bins = hist.n_bins();
    let peak_bin = match hist.axis().find_bin(peak) {
        Some(bin) if bin >= 1 && bin <= n_bins => bin,
        _ => return fallback,
    };
    let half = 0.5 * hist.bin_content(peak_bin);
    if half <= 0.0 {
        return fallback;
    }
    let mut left = peak_bin;
    while left > 1 && hist.bin_content(left - 1) >= half {
        left -= 1;
    }
    let mut right = peak_bin;
    while right < n_bins && hist.bin_content(right + 1) >= half {
        right += 1;
    }
    (right - left + 1) as f64 * hist.bin_width()
}

/// Lower and upper limit expressions for one parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamLimit {
    pub low: SpectrumValue,
    pub high: SpectrumValue,
}

/// Full description of how a spectrum should be fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSetup {
    pub model: FitModel,
    pub param_meanings: Vec<ParamMeaning>,
    pub param_seeds: Vec<SpectrumValue>,
    /// Either empty (no limits) or one entry per parameter
    pub param_limits: Vec<Option<ParamLimit>>,
    /// Fit range boundaries; fewer than two means the full histogram domain
    pub range: Vec<SpectrumValue>,
}

impl Default for FitSetup {
    fn default() -> Self {
        let model = FitModel::Landau;
        Self {
            model,
            param_meanings: model.default_meanings(),
            param_seeds: vec![
                SpectrumValue::Amplitude,
                SpectrumValue::Peak,
                SpectrumValue::Rms,
            ],
            param_limits: vec![
                None,
                Some(ParamLimit {
                    low: SpectrumValue::PeakPlusRms(-1.0),
                    high: SpectrumValue::PeakPlusRms(1.0),
                }),
                Some(ParamLimit {
                    low: SpectrumValue::Fixed(0.0),
                    high: SpectrumValue::Fwhm,
                }),
            ],
            range: vec![
                SpectrumValue::PeakPlusRms(-2.0),
                SpectrumValue::PeakPlusRms(2.0),
            ],
        }
    }
}

impl FitSetup {
    /// Check the setup is self-consistent. Must be done before any fitting.
    pub fn validate(&self) -> Result<(), FitError> {
        let expected = self.model.n_params();
        let check = |given: usize| {
            if given != expected {
                Err(FitError::ParameterCount {
                    model: self.model.formula().to_string(),
                    expected,
                    given,
                })
            } else {
                Ok(())
            }
        };
        check(self.param_meanings.len())?;
        check(self.param_seeds.len())?;
        if !self.param_limits.is_empty() {
            check(self.param_limits.len())?;
        }
        self.peak_index().map(|_| ())
    }

    /// The parameter slot declared as the PEAK
    pub fn peak_index(&self) -> Result<usize, FitError> {
        self.param_meanings
            .iter()
            .position(|m| *m == ParamMeaning::Peak)
            .ok_or(FitError::NoPeakParameter)
    }

    /// The parameter slot declared as the SIGMA, if any
    pub fn sigma_index(&self) -> Option<usize> {
        self.param_meanings
            .iter()
            .position(|m| *m == ParamMeaning::Sigma)
    }

    pub fn initial_params(&self, hist: &Histogram1D, peak: f64) -> Vec<f64> {
        self.param_seeds
            .iter()
            .map(|seed| seed.evaluate(hist, peak))
            .collect()
    }

    pub fn limits(&self, hist: &Histogram1D, peak: f64) -> Vec<Option<(f64, f64)>> {
        if self.param_limits.is_empty() {
            return vec![None; self.model.n_params()];
        }
        self.param_limits
            .iter()
            .map(|limit| {
                limit.map(|l| {
                    let a = l.low.evaluate(hist, peak);
                    let b = l.high.evaluate(hist, peak);
                    (a.min(b), a.max(b))
                })
            })
            .collect()
    }

    /// [min, max] of the range boundaries, or None when fewer than two are configured
    pub fn fit_range(&self, hist: &Histogram1D, peak: f64) -> Option<(f64, f64)> {
        if self.range.len() < 2 {
            return None;
        }
        let values: Vec<f64> = self
            .range
            .iter()
            .map(|b| b.evaluate(hist, peak))
            .collect();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some((min, max))
    }
}

/// Outcome of a single fit
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub model: FitModel,
    pub params: Vec<f64>,
    pub errors: Vec<f64>,
    pub chi_square: f64,
    pub ndf: i64,
    pub valid: bool,
    pub status: i32,
    pub range: (f64, f64),
}

impl FitResult {
    /// chi2/NDF, None when there are no degrees of freedom
    pub fn norm_chi2(&self) -> Option<f64> {
        if self.ndf > 0 {
            Some(self.chi_square / self.ndf as f64)
        } else {
            None
        }
    }

    pub fn param(&self, index: usize) -> f64 {
        self.params.get(index).copied().unwrap_or(f64::NAN)
    }

    pub fn error(&self, index: usize) -> f64 {
        self.errors.get(index).copied().unwrap_or(f64::NAN)
    }
}

/// Anything that can fit a model to a binned distribution.
///
/// Non-convergence is reported through [`FitResult::valid`], never as an error.
pub trait CurveFitter {
    fn fit(
        &self,
        hist: &Histogram1D,
        model: FitModel,
        initial: &[f64],
        limits: &[Option<(f64, f64)>],
        range: Option<(f64, f64)>,
    ) -> FitResult;
}

/// Levenberg-Marquardt chi-square minimizer
#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-8,
        }
    }
}

struct FitData {
    x: Vec<f64>,
    y: Vec<f64>,
    sigma: Vec<f64>,
}

impl FitData {
    /// Non-empty in-range bins with centers inside the range
    fn new(hist: &Histogram1D, range: (f64, f64)) -> Self {
        let mut data = Self {
            x: vec![],
            y: vec![],
            sigma: vec![],
        };
        for bin in 1..=hist.n_bins() {
            let x = hist.bin_center(bin);
            let y = hist.bin_content(bin);
            if y > 0.0 && x >= range.0 && x <= range.1 {
                data.x.push(x);
                data.y.push(y);
                data.sigma.push(hist.bin_error(bin));
            }
        }
        data
    }

    fn chi_square(&self, model: FitModel, params: &[f64]) -> f64 {
        self.x
            .iter()
            .zip(self.y.iter())
            .zip(self.sigma.iter())
            .map(|((x, y), s)| ((y - model.eval(*x, params)) / s).powi(2))
            .sum()
    }
}

fn clamp_to_limits(params: &mut [f64], limits: &[Option<(f64, f64)>]) {
    for (p, limit) in params.iter_mut().zip(limits.iter()) {
        match limit {
            Some((low, high)) if low <= high => *p = p.clamp(*low, *high),
            _ => (),
        }
    }
}

impl LevenbergMarquardt {
    /// Residuals and jacobian (weighted by the bin errors) with respect to the free parameters
    fn linearize(
        &self,
        data: &FitData,
        model: FitModel,
        params: &[f64],
        free: &[usize],
    ) -> (DVector<f64>, DMatrix<f64>) {
        let n = data.x.len();
        let residuals = DVector::from_iterator(
            n,
            (0..n).map(|i| (data.y[i] - model.eval(data.x[i], params)) / data.sigma[i]),
        );
        let mut jacobian = DMatrix::zeros(n, free.len());
        let mut shifted = params.to_vec();
        for (col, &p) in free.iter().enumerate() {
            let step = 1e-6 * params[p].abs().max(1e-3);
            shifted[p] = params[p] + step;
            let upper: Vec<f64> = data.x.iter().map(|x| model.eval(*x, &shifted)).collect();
            shifted[p] = params[p] - step;
            let lower: Vec<f64> = data.x.iter().map(|x| model.eval(*x, &shifted)).collect();
            shifted[p] = params[p];
            for row in 0..n {
                jacobian[(row, col)] = (upper[row] - lower[row]) / (2.0 * step * data.sigma[row]);
            }
        }
        (residuals, jacobian)
    }
}

impl CurveFitter for LevenbergMarquardt {
    fn fit(
        &self,
        hist: &Histogram1D,
        model: FitModel,
        initial: &[f64],
        limits: &[Option<(f64, f64)>],
        range: Option<(f64, f64)>,
    ) -> FitResult {
        let n_params = model.n_params();
        let range = range.unwrap_or((hist.axis().low(), hist.axis().high()));
        let mut params: Vec<f64> = (0..n_params)
            .map(|i| initial.get(i).copied().unwrap_or(0.0))
            .collect();
        let mut limits = limits.to_vec();
        limits.resize(n_params, None);
        clamp_to_limits(&mut params, &limits);

        // A parameter with a collapsed limit is fixed
        let free: Vec<usize> = (0..n_params)
            .filter(|p| !matches!(limits[*p], Some((low, high)) if low == high))
            .collect();

        let data = FitData::new(hist, range);
        let ndf = data.x.len() as i64 - free.len() as i64;
        let mut result = FitResult {
            model,
            params: params.clone(),
            errors: vec![0.0; n_params],
            chi_square: data.chi_square(model, &params),
            ndf,
            valid: false,
            status: FIT_STATUS_NO_DATA,
            range,
        };
        if ndf <= 0 || free.is_empty() {
            return result;
        }

        let mut lambda = LAMBDA_START;
        let mut chi2 = result.chi_square;
        let mut status = FIT_STATUS_MAX_ITERATIONS;
        for _ in 0..self.max_iterations {
            if !chi2.is_finite() {
                status = FIT_STATUS_NOT_FINITE;
                break;
            }
            let (residuals, jacobian) = self.linearize(&data, model, &params, &free);
            let jt = jacobian.transpose();
            let alpha = &jt * &jacobian;
            let beta = &jt * &residuals;

            let mut improved = false;
            while lambda <= LAMBDA_MAX {
                let mut damped = alpha.clone();
                for i in 0..free.len() {
                    damped[(i, i)] += lambda * alpha[(i, i)].max(1e-12);
                }
                let delta = match damped.lu().solve(&beta) {
                    Some(d) => d,
                    None => {
                        lambda *= 10.0;
                        continue;
                    }
                };
                let mut trial = params.clone();
                for (col, &p) in free.iter().enumerate() {
                    trial[p] += delta[col];
                }
                clamp_to_limits(&mut trial, &limits);
                let trial_chi2 = data.chi_square(model, &trial);
                if trial_chi2.is_finite() && trial_chi2 <= chi2 {
                    let change = chi2 - trial_chi2;
                    params = trial;
                    chi2 = trial_chi2;
                    lambda = (lambda / 10.0).max(1e-12);
                    improved = true;
                    if change <= self.tolerance * chi2.max(1.0) {
                        status = FIT_STATUS_CONVERGED;
                    }
                    break;
                }
                lambda *= 10.0;
            }
            // No step can lower chi2 any further, so we sit in a minimum
            if !improved {
                status = FIT_STATUS_CONVERGED;
            }
            if status == FIT_STATUS_CONVERGED {
                break;
            }
        }

        result.params = params;
        result.chi_square = chi2;
        if status != FIT_STATUS_CONVERGED {
            result.status = status;
            return result;
        }

        let (_, jacobian) = self.linearize(&data, model, &result.params, &free);
        let alpha = jacobian.transpose() * &jacobian;
        match alpha.try_inverse() {
            Some(covariance) => {
                let mut positive = true;
                for (col, &p) in free.iter().enumerate() {
                    let var = covariance[(col, col)];
                    if var.is_finite() && var > 0.0 {
                        result.errors[p] = var.sqrt();
                    } else {
                        positive = false;
                    }
                }
                if positive {
                    result.status = FIT_STATUS_CONVERGED;
                    result.valid = true;
                } else {
                    result.status = FIT_STATUS_SINGULAR;
                }
            }
            None => result.status = FIT_STATUS_SINGULAR,
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_gaussian_hist(mean: f64, sigma: f64, height: f64) -> Histogram1D {
        let mut hist = Histogram1D::new("h", "", 100, 0.0, 1000.0).unwrap();
        for bin in 1..=hist.n_bins() {
            let x = hist.bin_center(bin);
            let n = (height * (-0.5 * ((x - mean) / sigma).powi(2)).exp()).round() as usize;
            for _ in 0..n {
                hist.fill(x);
            }
        }
        hist
    }

    #[test]
    fn test_model_from_str() {
        assert_eq!(FitModel::from_str("GAUS").unwrap(), FitModel::Gaus);
        assert_eq!(FitModel::from_str("landau_pol1").unwrap(), FitModel::LandauPol1);
        assert!(FitModel::from_str("pol7").is_err());
    }

    #[test]
    fn test_landau_peaks_at_mpv() {
        let params = [10.0, 300.0, 40.0];
        let at_peak = FitModel::Landau.eval(300.0, &params);
        assert!((at_peak - 10.0).abs() < 1e-12);
        assert!(FitModel::Landau.eval(290.0, &params) < at_peak);
        assert!(FitModel::Landau.eval(310.0, &params) < at_peak);
    }

    #[test]
    fn test_setup_requires_peak() {
        let mut setup = FitSetup::default();
        assert!(setup.validate().is_ok());
        assert_eq!(setup.peak_index().unwrap(), 1);
        setup.param_meanings[1] = ParamMeaning::Other;
        assert_eq!(setup.validate(), Err(FitError::NoPeakParameter));
    }

    #[test]
    fn test_setup_parameter_count() {
        let mut setup = FitSetup::default();
        setup.param_seeds.pop();
        assert!(matches!(
            setup.validate(),
            Err(FitError::ParameterCount { .. })
        ));
    }

    #[test]
    fn test_fit_range_policy() {
        let hist = make_gaussian_hist(500.0, 50.0, 100.0);
        let mut setup = FitSetup::default();
        setup.range = vec![SpectrumValue::Fixed(700.0), SpectrumValue::Fixed(300.0)];
        assert_eq!(setup.fit_range(&hist, 500.0), Some((300.0, 700.0)));
        setup.range = vec![SpectrumValue::Fixed(700.0)];
        assert_eq!(setup.fit_range(&hist, 500.0), None);
    }

    #[test]
    fn test_fwhm_of_gaussian() {
        let hist = make_gaussian_hist(500.0, 50.0, 1000.0);
        let width = fwhm(&hist, 505.0);
        // 2.355 * sigma, quantized to the 10 unit binning
        assert!((width - 117.7).abs() < 20.0);
    }

    #[test]
    fn test_gaussian_fit_converges() {
        let hist = make_gaussian_hist(420.0, 60.0, 200.0);
        let fitter = LevenbergMarquardt::default();
        let result = fitter.fit(
            &hist,
            FitModel::Gaus,
            &[150.0, 400.0, 40.0],
            &[None, Some((300.0, 600.0)), Some((1.0, 200.0))],
            None,
        );
        assert!(result.valid);
        assert_eq!(result.status, FIT_STATUS_CONVERGED);
        assert!((result.params[1] - 420.0).abs() < 5.0);
        assert!((result.params[2] - 60.0).abs() < 5.0);
        assert!(result.errors[1] > 0.0);
        assert!(result.norm_chi2().is_some());
    }

    #[test]
    fn test_fit_without_data_is_invalid() {
        let hist = Histogram1D::new("h", "", 10, 0.0, 10.0).unwrap();
        let result = LevenbergMarquardt::default().fit(
            &hist,
            FitModel::Gaus,
            &[1.0, 5.0, 1.0],
            &[],
            None,
        );
        assert!(!result.valid);
        assert_eq!(result.status, FIT_STATUS_NO_DATA);
        assert!(result.norm_chi2().is_none());
    }
}
