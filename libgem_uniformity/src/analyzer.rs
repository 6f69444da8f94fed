//! The response uniformity analysis.
//!
//! Analysis proceeds in four stages, each of which can be re-run:
//!
//! 1. [`UniformityAnalyzer::book_histos`] books every distribution in the hierarchy
//!    which is not already booked.
//! 2. [`UniformityAnalyzer::fill_histos`] fills the distributions from the records
//!    currently held by the detector. Distributions accumulate, so the records of an
//!    input should be cleared once they are filled.
//! 3. [`UniformityAnalyzer::book_slices`] derives the slices of each phi sector from its
//!    2D ADC vs. position distribution.
//! 4. [`UniformityAnalyzer::fit_histos`] runs the peak search and fit of every slice and
//!    builds the summary graphs and statistics.
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::constants::{DEFAULT_GRANULARITY, ETA_POSITION_BIN_FACTOR};
use super::detector::Detector;
use super::error::{AnalyzerError, ConfigError, HistogramError};
use super::fitter::{CurveFitter, FitSetup, LevenbergMarquardt};
use super::graph::{point_index, GraphPoint};
use super::histogram::{Axis, AxisSetup, Histogram1D, Histogram2D};
use super::observable::{name_by_index, Quantity};
use super::peak_finder::{PeakFinder, PeakSearch, SpectrumPeakFinder};
use super::sector::{EtaGraphs, FitState, ObservableHistos, SectorEta, SkipReason};
use super::statistics::SummaryStatistics;

/// Everything needed to book, fill and fit the hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSetup {
    /// Number of position slices per phi sector
    pub granularity: usize,
    pub clust_adc: AxisSetup,
    pub clust_multi: AxisSetup,
    pub clust_pos: AxisSetup,
    pub clust_size: AxisSetup,
    pub clust_time: AxisSetup,
    pub hit_adc: AxisSetup,
    pub hit_multi: AxisSetup,
    pub hit_pos: AxisSetup,
    pub hit_time: AxisSetup,
    pub fit: FitSetup,
    pub peak_search: PeakSearch,
}

impl Default for AnalysisSetup {
    fn default() -> Self {
        Self {
            granularity: DEFAULT_GRANULARITY,
            clust_adc: AxisSetup::new("ClustADC", "Cluster ADC", 300, 0.0, 15000.0),
            clust_multi: AxisSetup::new("ClustMulti", "Cluster multiplicity", 20, 0.0, 20.0),
            clust_pos: AxisSetup::new("ClustPos", "Cluster position", 256, -128.0, 128.0),
            clust_size: AxisSetup::new("ClustSize", "Cluster size", 20, 0.0, 20.0),
            clust_time: AxisSetup::new("ClustTime", "Cluster time bin", 30, 0.0, 30.0),
            hit_adc: AxisSetup::new("HitADC", "Hit ADC", 300, 0.0, 1500.0),
            hit_multi: AxisSetup::new("HitMulti", "Hit multiplicity", 20, 0.0, 20.0),
            hit_pos: AxisSetup::new("HitPos", "Strip number", 384, 0.0, 384.0),
            hit_time: AxisSetup::new("HitTime", "Hit time bin", 30, 0.0, 30.0),
            fit: FitSetup::default(),
            peak_search: PeakSearch::default(),
        }
    }
}

impl AnalysisSetup {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.granularity == 0 {
            return Err(ConfigError::BadGranularity(self.granularity));
        }
        for setup in [
            &self.clust_adc,
            &self.clust_multi,
            &self.clust_pos,
            &self.clust_size,
            &self.clust_time,
            &self.hit_adc,
            &self.hit_multi,
            &self.hit_pos,
            &self.hit_time,
        ] {
            setup
                .validate()
                .map_err(|e| ConfigError::BadHistoSetup(setup.name.clone(), e))?;
        }
        self.fit.validate()?;
        Ok(())
    }
}

/// Book a 1D histogram named for its place in the hierarchy, with an optional override
/// of the axis range
fn book(
    eta: Option<i32>,
    phi: Option<i32>,
    setup: &AxisSetup,
    range: Option<(f64, f64)>,
) -> Result<Option<Histogram1D>, HistogramError> {
    let name = name_by_index("h", eta, phi, None, &setup.name);
    let (low, high) = range.unwrap_or((setup.low, setup.high));
    Histogram1D::new(&name, &setup.title, setup.n_bins, low, high).map(Some)
}

/// Multiplicity per event of a set of event numbers
fn multiplicity(events: impl Iterator<Item = u64>) -> FxHashMap<u64, usize> {
    let mut counts = FxHashMap::default();
    for event in events {
        *counts.entry(event).or_insert(0) += 1;
    }
    counts
}

/// Drives the analysis of a [`Detector`].
///
/// The peak search and curve fit are pluggable; the defaults are a
/// [`SpectrumPeakFinder`] and a [`LevenbergMarquardt`] fitter.
#[derive(Debug)]
pub struct UniformityAnalyzer<P = SpectrumPeakFinder, F = LevenbergMarquardt> {
    setup: AnalysisSetup,
    peak_index: usize,
    sigma_index: Option<usize>,
    peak_finder: P,
    fitter: F,
}

impl UniformityAnalyzer {
    pub fn new(setup: AnalysisSetup) -> Result<Self, AnalyzerError> {
        let peak_finder = SpectrumPeakFinder::new(setup.peak_search.max_peaks);
        Self::with_capabilities(setup, peak_finder, LevenbergMarquardt::default())
    }
}

impl<P: PeakFinder, F: CurveFitter> UniformityAnalyzer<P, F> {
    /// Create an analyzer with a specific peak finder and fitter.
    ///
    /// Fails if the fit setup is inconsistent, in particular when no parameter is declared as
    /// the PEAK.
    pub fn with_capabilities(
        setup: AnalysisSetup,
        peak_finder: P,
        fitter: F,
    ) -> Result<Self, AnalyzerError> {
        setup.fit.validate()?;
        let peak_index = setup.fit.peak_index()?;
        let sigma_index = setup.fit.sigma_index();
        Ok(Self {
            setup,
            peak_index,
            sigma_index,
            peak_finder,
            fitter,
        })
    }

    pub fn setup(&self) -> &AnalysisSetup {
        &self.setup
    }

    pub fn granularity(&self) -> usize {
        self.setup.granularity
    }

    fn adc_axis(&self) -> Result<Axis, HistogramError> {
        let s = &self.setup.clust_adc;
        Axis::new(&s.name, s.n_bins, s.low, s.high)
    }

    fn book_eta(&self, eta_idx: i32, eta: &mut SectorEta) -> Result<(), HistogramError> {
        let s = &self.setup;
        let g = s.granularity;
        if eta.clust_adc_v_pos.is_none() {
            let half = 0.5 * eta.width() as f64;
            let name = name_by_index("h", Some(eta_idx), None, None, "ClustADC_v_ClustPos");
            let x_axis = Axis::new(&name, ETA_POSITION_BIN_FACTOR * g, -half, half)?;
            eta.clust_adc_v_pos = Some(Histogram2D::new(
                &name,
                "Cluster ADC vs. position",
                x_axis,
                self.adc_axis()?,
            )?);
        }
        if !eta.clust_histos.is_booked() {
            eta.clust_histos = ObservableHistos {
                adc: book(Some(eta_idx), None, &s.clust_adc, None)?,
                multi: book(Some(eta_idx), None, &s.clust_multi, None)?,
                pos: None,
                size: book(Some(eta_idx), None, &s.clust_size, None)?,
                time: book(Some(eta_idx), None, &s.clust_time, None)?,
            };
        }
        if !eta.hit_histos.is_booked() {
            eta.hit_histos = ObservableHistos {
                adc: book(Some(eta_idx), None, &s.hit_adc, None)?,
                multi: book(Some(eta_idx), None, &s.hit_multi, None)?,
                pos: None,
                size: None,
                time: book(Some(eta_idx), None, &s.hit_time, None)?,
            };
        }

        for (phi_idx, phi) in eta.phi_sectors_mut() {
            let phi_idx = Some(*phi_idx);
            let range = (phi.x_low() as f64, phi.x_high() as f64);
            if phi.clust_adc_v_pos.is_none() {
                let name = name_by_index("h", Some(eta_idx), phi_idx, None, "ClustADC_v_ClustPos");
                let x_axis = Axis::new(&name, g, range.0, range.1)?;
                phi.clust_adc_v_pos = Some(Histogram2D::new(
                    &name,
                    "Cluster ADC vs. position",
                    x_axis,
                    self.adc_axis()?,
                )?);
            }
            if !phi.clust_histos.is_booked() {
                phi.clust_histos = ObservableHistos {
                    adc: book(Some(eta_idx), phi_idx, &s.clust_adc, None)?,
                    multi: book(Some(eta_idx), phi_idx, &s.clust_multi, None)?,
                    pos: book(Some(eta_idx), phi_idx, &s.clust_pos, Some(range))?,
                    size: book(Some(eta_idx), phi_idx, &s.clust_size, None)?,
                    time: book(Some(eta_idx), phi_idx, &s.clust_time, None)?,
                };
            }
            if !phi.hit_histos.is_booked() {
                phi.hit_histos = ObservableHistos {
                    adc: book(Some(eta_idx), phi_idx, &s.hit_adc, None)?,
                    multi: book(Some(eta_idx), phi_idx, &s.hit_multi, None)?,
                    pos: book(Some(eta_idx), phi_idx, &s.hit_pos, None)?,
                    size: None,
                    time: book(Some(eta_idx), phi_idx, &s.hit_time, None)?,
                };
            }
        }
        Ok(())
    }

    /// Book every distribution which is not already booked
    pub fn book_histos(&self, detector: &mut Detector) -> Result<(), AnalyzerError> {
        let s = &self.setup;
        let (sectors, summary) = detector.sectors_and_summary_mut();
        if !summary.is_booked() {
            *summary = ObservableHistos {
                adc: book(None, None, &s.clust_adc, None)?,
                multi: None,
                pos: book(None, None, &s.clust_pos, None)?,
                size: book(None, None, &s.clust_size, None)?,
                time: book(None, None, &s.clust_time, None)?,
            };
        }
        for (eta_idx, eta) in sectors {
            self.book_eta(*eta_idx, eta)?;
        }
        Ok(())
    }

    /// Fill the distributions from the records the detector currently holds.
    ///
    /// Distributions are booked first if needed.
    pub fn fill_histos(&self, detector: &mut Detector) -> Result<(), AnalyzerError> {
        self.book_histos(detector)?;
        let (sectors, summary) = detector.sectors_and_summary_mut();
        for (eta_idx, eta) in sectors {
            let eta_idx = *eta_idx;
            let mut eta_clust_events: Vec<u64> = vec![];
            let mut eta_hit_events: Vec<u64> = vec![];
            let mut eta_clust = std::mem::take(&mut eta.clust_histos);
            let mut eta_hits = std::mem::take(&mut eta.hit_histos);
            let mut eta_2d = eta.clust_adc_v_pos.take();

            for (phi_idx, phi) in eta.phi_sectors_mut() {
                let clusters = phi.clusters().to_vec();
                for cluster in clusters.iter() {
                    if !phi.contains(cluster.position_x) {
                        phi.record_out_of_range(eta_idx, *phi_idx, cluster.position_x);
                    }
                    phi.clust_histos.fill_cluster(cluster);
                    if let Some(h) = phi.clust_adc_v_pos.as_mut() {
                        h.fill(cluster.position_x as f64, cluster.adc as f64);
                    }
                    eta_clust.fill_cluster(cluster);
                    if let Some(h) = eta_2d.as_mut() {
                        h.fill(cluster.position_x as f64, cluster.adc as f64);
                    }
                    summary.fill_cluster(cluster);
                }
                for count in multiplicity(clusters.iter().map(|c| c.event)).values() {
                    phi.clust_histos.fill(Quantity::Multi, *count as f64);
                }
                eta_clust_events.extend(clusters.iter().map(|c| c.event));

                let hits = phi.hits().to_vec();
                for hit in hits.iter() {
                    phi.hit_histos.fill_hit(hit);
                    eta_hits.fill_hit(hit);
                }
                for count in multiplicity(hits.iter().map(|h| h.event)).values() {
                    phi.hit_histos.fill(Quantity::Multi, *count as f64);
                }
                eta_hit_events.extend(hits.iter().map(|h| h.event));
            }

            for count in multiplicity(eta_clust_events.into_iter()).values() {
                eta_clust.fill(Quantity::Multi, *count as f64);
            }
            for count in multiplicity(eta_hit_events.into_iter()).values() {
                eta_hits.fill(Quantity::Multi, *count as f64);
            }
            eta.clust_histos = eta_clust;
            eta.hit_histos = eta_hits;
            eta.clust_adc_v_pos = eta_2d;
        }
        Ok(())
    }

    /// Rebuild the slices of every phi sector. Existing fits are discarded.
    pub fn book_slices(&self, detector: &mut Detector) -> Result<(), AnalyzerError> {
        detector.clear_fits();
        for (eta_idx, eta) in detector.eta_sectors_mut() {
            for (phi_idx, phi) in eta.phi_sectors_mut() {
                phi.book_slices(*eta_idx, *phi_idx)?;
            }
        }
        Ok(())
    }

    /// Search and fit every slice with a non-empty charge spectrum, then build the
    /// summary graphs and statistics.
    pub fn fit_histos(&self, detector: &mut Detector) -> Result<(), AnalyzerError> {
        detector.clear_fits();
        let mut all_fit_peaks = vec![];
        let mut all_norm_chi2 = vec![];
        let mut all_resolutions = vec![];
        for (eta_idx, eta) in detector.eta_sectors_mut() {
            let (norm_chi2, resolutions) = self.fit_eta(*eta_idx, eta);
            all_fit_peaks.extend_from_slice(eta.fit_peaks());
            all_norm_chi2.extend(norm_chi2);
            all_resolutions.extend(resolutions);
            spdlog::info!(
                "Eta sector {} accepted {} of {} slice fits",
                eta_idx,
                eta.n_fit_success(),
                eta.n_phi() * self.setup.granularity
            );
        }

        detector.stats.fit_pk_pos =
            SummaryStatistics::compute_with_fit("h_ResponseFitPkPos", &all_fit_peaks, &self.fitter);
        detector.stats.fit_norm_chi2 =
            SummaryStatistics::compute("h_ResponseFitChi2", &all_norm_chi2);
        detector.stats.fit_pk_res =
            SummaryStatistics::compute("h_ResponseFitPkRes", &all_resolutions);
        detector.all_fit_peaks = all_fit_peaks;
        detector.all_norm_chi2 = all_norm_chi2;
        detector.all_resolutions = all_resolutions;
        Ok(())
    }

    /// Fit every slice of one eta sector, returning the normalized chi2 and resolution of the
    /// accepted fits
    fn fit_eta(&self, eta_idx: i32, eta: &mut SectorEta) -> (Vec<f64>, Vec<f64>) {
        let g = self.setup.granularity;
        let search = &self.setup.peak_search;
        let fit = &self.setup.fit;
        let mut graphs = EtaGraphs::new(eta_idx, g * eta.n_phi(), self.sigma_index.is_some());
        let mut fit_peaks = vec![];
        let mut spec_peaks = vec![];
        let mut norm_chi2 = vec![];
        let mut resolutions = vec![];

        for (rank, (phi_idx, phi)) in eta.phi_sectors_mut().enumerate() {
            let mut n_success = 0;
            for (slice_idx, slice) in phi.slices_mut() {
                let hist = slice.adc();
                if hist.integral() <= 0.0 {
                    slice.set_fit_state(FitState::Skipped(SkipReason::EmptyDistribution));
                    continue;
                }
                let idx = point_index(rank, *slice_idx, g);
                let (center, half_width) = (slice.center(), 0.5 * slice.width());

                let peaks = self.peak_finder.search(
                    hist,
                    search.sigma,
                    search.remove_background,
                    search.threshold,
                );
                let spec_peak = match peaks.first() {
                    Some(peak) => *peak,
                    None => {
                        spdlog::debug!(
                            "No spectrum peak found in {}; seeding from the maximum bin",
                            hist.name()
                        );
                        hist.maximum_bin()
                            .map(|bin| hist.bin_center(bin))
                            .unwrap_or_else(|| hist.mean())
                    }
                };
                spec_peaks.push(spec_peak);
                graphs.spec_num_peaks.set_point(
                    idx,
                    GraphPoint::new(center, peaks.len() as f64, half_width, 0.0),
                );
                graphs
                    .spec_pk_pos
                    .set_point(idx, GraphPoint::new(center, spec_peak, half_width, 0.0));

                let result = self.fitter.fit(
                    hist,
                    fit.model,
                    &fit.initial_params(hist, spec_peak),
                    &fit.limits(hist, spec_peak),
                    fit.fit_range(hist, spec_peak),
                );
                let peak = result.param(self.peak_index);
                let peak_err = result.error(self.peak_index);
                let point = GraphPoint::new(center, peak, half_width, peak_err);
                if result.valid {
                    n_success += 1;
                    fit_peaks.push(peak);
                    graphs.fit_pk_pos.set_point(idx, point);
                    if let Some(chi2) = result.norm_chi2() {
                        norm_chi2.push(chi2);
                        graphs
                            .fit_norm_chi2
                            .set_point(idx, GraphPoint::new(center, chi2, half_width, 0.0));
                    }
                    if let (Some(sigma_idx), Some(graph)) =
                        (self.sigma_index, graphs.fit_pk_res.as_mut())
                    {
                        let sigma = result.param(sigma_idx);
                        if peak != 0.0 {
                            let res = sigma.abs() / peak;
                            let rel_err = ((result.error(sigma_idx) / sigma).powi(2)
                                + (peak_err / peak).powi(2))
                            .sqrt();
                            resolutions.push(res);
                            graph.set_point(
                                idx,
                                GraphPoint::new(center, res, half_width, res * rel_err),
                            );
                        }
                    }
                } else {
                    spdlog::debug!(
                        "Fit of {} failed with status {}",
                        hist.name(),
                        result.status
                    );
                    graphs.fit_failures.set_point(idx, point);
                }
                slice.set_spectrum_peaks(peaks);
                slice.set_fit_state(FitState::Fitted(result));
            }
            phi.n_fit_success = n_success;
            spdlog::debug!(
                "Phi sector {} of eta sector {} fit success fraction: {}",
                phi_idx,
                eta_idx,
                phi.fit_success_fraction(g)
            );
        }

        eta.stat_fit = SummaryStatistics::compute_with_fit(
            &name_by_index("h", Some(eta_idx), None, None, "ClustADC_Fit_PkPos_Dist"),
            &fit_peaks,
            &self.fitter,
        );
        eta.stat_spec = SummaryStatistics::compute_with_fit(
            &name_by_index("h", Some(eta_idx), None, None, "ClustADC_Spec_PkPos_Dist"),
            &spec_peaks,
            &self.fitter,
        );
        eta.graphs = Some(graphs);
        eta.fit_peaks = fit_peaks;
        eta.spec_peaks = spec_peaks;
        (norm_chi2, resolutions)
    }
}
