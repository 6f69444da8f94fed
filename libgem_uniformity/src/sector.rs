//! The eta -> phi -> slice hierarchy of detector regions.
//!
//! Each level exclusively owns the levels below it, along with its own distributions.
//! Mutation of the hierarchy goes through the [`Detector`](crate::detector::Detector) and
//! the [`UniformityAnalyzer`](crate::analyzer::UniformityAnalyzer); consumers only get
//! index based read access.
use std::collections::BTreeMap;

use super::error::HistogramError;
use super::fitter::FitResult;
use super::graph::SummaryGraph;
use super::histogram::{Histogram1D, Histogram2D};
use super::observable::{name_by_index, Artifact, Observable, Quantity, RecordKind};
use super::record::{Cluster, Hit};
use super::statistics::SummaryStatistics;

/// The set of 1D distributions of one record kind in one region
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservableHistos {
    pub adc: Option<Histogram1D>,
    pub multi: Option<Histogram1D>,
    pub pos: Option<Histogram1D>,
    pub size: Option<Histogram1D>,
    pub time: Option<Histogram1D>,
}

impl ObservableHistos {
    pub fn get(&self, quantity: Quantity) -> Option<&Histogram1D> {
        match quantity {
            Quantity::Adc => self.adc.as_ref(),
            Quantity::Multi => self.multi.as_ref(),
            Quantity::Pos => self.pos.as_ref(),
            Quantity::Size => self.size.as_ref(),
            Quantity::Time => self.time.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, quantity: Quantity) -> &mut Option<Histogram1D> {
        match quantity {
            Quantity::Adc => &mut self.adc,
            Quantity::Multi => &mut self.multi,
            Quantity::Pos => &mut self.pos,
            Quantity::Size => &mut self.size,
            Quantity::Time => &mut self.time,
        }
    }

    /// Iterate over the booked distributions
    pub fn iter(&self) -> impl Iterator<Item = (Quantity, &Histogram1D)> {
        [
            (Quantity::Adc, &self.adc),
            (Quantity::Multi, &self.multi),
            (Quantity::Pos, &self.pos),
            (Quantity::Size, &self.size),
            (Quantity::Time, &self.time),
        ]
        .into_iter()
        .filter_map(|(q, h)| h.as_ref().map(|h| (q, h)))
    }

    pub fn fill(&mut self, quantity: Quantity, value: f64) {
        if let Some(hist) = self.slot_mut(quantity) {
            hist.fill(value);
        }
    }

    pub fn fill_cluster(&mut self, cluster: &Cluster) {
        self.fill(Quantity::Adc, cluster.adc as f64);
        self.fill(Quantity::Pos, cluster.position_x as f64);
        self.fill(Quantity::Size, cluster.size as f64);
        self.fill(Quantity::Time, cluster.time_bin as f64);
    }

    /// Hit position is the strip number
    pub fn fill_hit(&mut self, hit: &Hit) {
        self.fill(Quantity::Adc, hit.adc as f64);
        self.fill(Quantity::Pos, hit.strip as f64);
        self.fill(Quantity::Time, hit.time_bin as f64);
    }

    pub fn is_booked(&self) -> bool {
        self.iter().next().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyDistribution,
}

/// Where a slice is in the fitting pass
#[derive(Debug, Clone, PartialEq)]
pub enum FitState {
    NotAttempted,
    Skipped(SkipReason),
    /// A fit was run; the result may or may not be valid
    Fitted(FitResult),
}

/// One position bin of a phi sector
#[derive(Debug, Clone, PartialEq)]
pub struct SectorSlice {
    center: f64,
    width: f64,
    adc: Histogram1D,
    spectrum_peaks: Vec<f64>,
    fit: FitState,
}

impl SectorSlice {
    pub fn new(center: f64, width: f64, adc: Histogram1D) -> Self {
        Self {
            center,
            width,
            adc,
            spectrum_peaks: vec![],
            fit: FitState::NotAttempted,
        }
    }

    pub fn center(&self) -> f64 {
        self.center
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn adc(&self) -> &Histogram1D {
        &self.adc
    }

    /// Peak candidates from the spectrum search, tallest first
    pub fn spectrum_peaks(&self) -> &[f64] {
        &self.spectrum_peaks
    }

    pub fn fit_state(&self) -> &FitState {
        &self.fit
    }

    pub fn fit_result(&self) -> Option<&FitResult> {
        match &self.fit {
            FitState::Fitted(result) => Some(result),
            _ => None,
        }
    }

    pub fn fit_accepted(&self) -> bool {
        self.fit_result().is_some_and(|r| r.valid)
    }

    pub fn fit_status(&self) -> Option<i32> {
        self.fit_result().map(|r| r.status)
    }

    pub(crate) fn set_spectrum_peaks(&mut self, peaks: Vec<f64>) {
        self.spectrum_peaks = peaks;
    }

    pub(crate) fn set_fit_state(&mut self, state: FitState) {
        self.fit = state;
    }

    pub fn artifact(&self, obs: Observable) -> Option<Artifact<'_>> {
        match obs {
            Observable::ClustADC => Some(Artifact::Histogram(&self.adc)),
            _ => None,
        }
    }
}

/// A contiguous position range of an eta sector
#[derive(Debug, Clone, PartialEq)]
pub struct SectorPhi {
    x_low: f32,
    x_high: f32,
    clusters: Vec<Cluster>,
    hits: Vec<Hit>,
    pub(crate) clust_histos: ObservableHistos,
    pub(crate) hit_histos: ObservableHistos,
    pub(crate) clust_adc_v_pos: Option<Histogram2D>,
    slices: BTreeMap<usize, SectorSlice>,
    pub(crate) n_fit_success: usize,
    /// Filled clusters whose position lies outside [x_low, x_high); they reach no slice
    pub(crate) n_out_of_range: u64,
}

impl SectorPhi {
    pub fn new(x_low: f32, x_high: f32) -> Self {
        Self {
            x_low,
            x_high,
            clusters: vec![],
            hits: vec![],
            clust_histos: ObservableHistos::default(),
            hit_histos: ObservableHistos::default(),
            clust_adc_v_pos: None,
            slices: BTreeMap::new(),
            n_fit_success: 0,
            n_out_of_range: 0,
        }
    }

    pub fn x_low(&self) -> f32 {
        self.x_low
    }

    pub fn x_high(&self) -> f32 {
        self.x_high
    }

    pub fn width(&self) -> f32 {
        self.x_high - self.x_low
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn hits(&self) -> &[Hit] {
        &self.hits
    }

    pub fn histos(&self, kind: RecordKind) -> &ObservableHistos {
        match kind {
            RecordKind::Cluster => &self.clust_histos,
            RecordKind::Hit => &self.hit_histos,
        }
    }

    pub fn clust_adc_v_pos(&self) -> Option<&Histogram2D> {
        self.clust_adc_v_pos.as_ref()
    }

    pub fn slice(&self, index: usize) -> Option<&SectorSlice> {
        self.slices.get(&index)
    }

    pub fn slices(&self) -> impl Iterator<Item = (&usize, &SectorSlice)> {
        self.slices.iter()
    }

    pub fn n_slices(&self) -> usize {
        self.slices.len()
    }

    pub fn n_fit_success(&self) -> usize {
        self.n_fit_success
    }

    pub fn n_out_of_range(&self) -> u64 {
        self.n_out_of_range
    }

    pub fn contains(&self, x: f32) -> bool {
        x >= self.x_low && x < self.x_high
    }

    /// Fraction of slices with an accepted fit
    pub fn fit_success_fraction(&self, granularity: usize) -> f64 {
        if granularity == 0 {
            return 0.0;
        }
        self.n_fit_success as f64 / granularity as f64
    }

    pub fn artifact(&self, obs: Observable) -> Option<Artifact<'_>> {
        let (kind, quantity) = obs.distribution()?;
        self.histos(kind).get(quantity).map(Artifact::Histogram)
    }

    pub(crate) fn push_cluster(&mut self, cluster: Cluster) {
        self.clusters.push(cluster);
    }

    pub(crate) fn push_hit(&mut self, hit: Hit) {
        self.hits.push(hit);
    }

    /// Count a filled cluster outside the sector range. The first one per sector is a warning.
    pub(crate) fn record_out_of_range(&mut self, eta: i32, phi: i32, x: f32) {
        self.n_out_of_range += 1;
        if self.n_out_of_range == 1 {
            spdlog::warn!(
                "Cluster at x = {} lies outside eta {} phi {} range [{}, {}) and reaches no slice. Further ones for this sector are only logged at debug level.",
                x,
                eta,
                phi,
                self.x_low,
                self.x_high
            );
        } else {
            spdlog::debug!("Cluster at x = {} lies outside eta {} phi {}", x, eta, phi);
        }
    }

    pub(crate) fn slices_mut(&mut self) -> impl Iterator<Item = (&usize, &mut SectorSlice)> {
        self.slices.iter_mut()
    }

    /// Discard all slices and derive them again from the 2D ADC vs. position distribution.
    ///
    /// Without a 2D distribution the phi sector is left without slices.
    pub(crate) fn book_slices(&mut self, eta: i32, phi: i32) -> Result<(), HistogramError> {
        self.slices.clear();
        self.n_fit_success = 0;
        let hist = match &self.clust_adc_v_pos {
            Some(h) => h,
            None => return Ok(()),
        };
        let x_axis = *hist.x_axis();
        for bin in 1..=x_axis.n_bins() {
            let name = name_by_index("h", Some(eta), Some(phi), Some(bin), "ClustADC");
            let adc = hist.projection_y(&name, bin)?;
            self.slices.insert(
                bin,
                SectorSlice::new(x_axis.bin_center(bin), x_axis.bin_width(), adc),
            );
        }
        Ok(())
    }

    pub(crate) fn clear_records(&mut self) {
        self.clusters.clear();
        self.hits.clear();
    }

    /// Drop all data, keeping the geometry
    pub(crate) fn reset(&mut self) {
        *self = Self::new(self.x_low, self.x_high);
    }
}

/// The fixed size summary graphs of an eta sector, one point per (phi, slice)
#[derive(Debug, Clone, PartialEq)]
pub struct EtaGraphs {
    pub fit_norm_chi2: SummaryGraph,
    pub fit_pk_pos: SummaryGraph,
    /// Only present when the fit model declares a SIGMA parameter
    pub fit_pk_res: Option<SummaryGraph>,
    pub fit_failures: SummaryGraph,
    pub spec_num_peaks: SummaryGraph,
    pub spec_pk_pos: SummaryGraph,
}

impl EtaGraphs {
    pub fn new(eta: i32, n_points: usize, with_resolution: bool) -> Self {
        let make = |obs: &str| SummaryGraph::new(&name_by_index("g", Some(eta), None, None, obs), n_points);
        Self {
            fit_norm_chi2: make("ClustADC_Fit_NormChi2"),
            fit_pk_pos: make("ClustADC_Fit_PkPos"),
            fit_pk_res: if with_resolution {
                Some(make("ClustADC_Fit_PkRes"))
            } else {
                None
            },
            fit_failures: make("ClustADC_Fit_Failures"),
            spec_num_peaks: make("ClustADC_Spec_NumPks"),
            spec_pk_pos: make("ClustADC_Spec_PkPos"),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SummaryGraph> {
        [
            Some(&self.fit_norm_chi2),
            Some(&self.fit_pk_pos),
            self.fit_pk_res.as_ref(),
            Some(&self.fit_failures),
            Some(&self.spec_num_peaks),
            Some(&self.spec_pk_pos),
        ]
        .into_iter()
        .flatten()
    }
}

/// Geometry of an eta sector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EtaGeometry {
    pub y_pos: f32,
    pub width: f32,
    pub n_phi: usize,
}

/// A ring of the detector
#[derive(Debug, Clone, PartialEq)]
pub struct SectorEta {
    y_pos: f32,
    width: f32,
    phi_sectors: BTreeMap<i32, SectorPhi>,
    pub(crate) clust_histos: ObservableHistos,
    pub(crate) hit_histos: ObservableHistos,
    pub(crate) clust_adc_v_pos: Option<Histogram2D>,
    pub(crate) graphs: Option<EtaGraphs>,
    pub(crate) fit_peaks: Vec<f64>,
    pub(crate) spec_peaks: Vec<f64>,
    pub(crate) stat_fit: Option<SummaryStatistics>,
    pub(crate) stat_spec: Option<SummaryStatistics>,
}

impl SectorEta {
    pub fn new(y_pos: f32, width: f32, phi_sectors: BTreeMap<i32, SectorPhi>) -> Self {
        Self {
            y_pos,
            width,
            phi_sectors,
            clust_histos: ObservableHistos::default(),
            hit_histos: ObservableHistos::default(),
            clust_adc_v_pos: None,
            graphs: None,
            fit_peaks: vec![],
            spec_peaks: vec![],
            stat_fit: None,
            stat_spec: None,
        }
    }

    /// Split the width evenly into `n_phi` phi sectors, numbered from 1
    pub fn with_even_phi(y_pos: f32, width: f32, n_phi: usize) -> Self {
        let step = width / n_phi as f32;
        let phi_sectors = (1..=n_phi)
            .map(|i| {
                let low = -0.5 * width + (i - 1) as f32 * step;
                (i as i32, SectorPhi::new(low, low + step))
            })
            .collect();
        Self::new(y_pos, width, phi_sectors)
    }

    pub fn y_pos(&self) -> f32 {
        self.y_pos
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn geometry(&self) -> EtaGeometry {
        EtaGeometry {
            y_pos: self.y_pos,
            width: self.width,
            n_phi: self.phi_sectors.len(),
        }
    }

    pub fn n_phi(&self) -> usize {
        self.phi_sectors.len()
    }

    pub fn phi_sector(&self, phi: i32) -> Option<&SectorPhi> {
        self.phi_sectors.get(&phi)
    }

    pub fn phi_sectors(&self) -> impl Iterator<Item = (&i32, &SectorPhi)> {
        self.phi_sectors.iter()
    }

    pub fn histos(&self, kind: RecordKind) -> &ObservableHistos {
        match kind {
            RecordKind::Cluster => &self.clust_histos,
            RecordKind::Hit => &self.hit_histos,
        }
    }

    pub fn clust_adc_v_pos(&self) -> Option<&Histogram2D> {
        self.clust_adc_v_pos.as_ref()
    }

    pub fn graphs(&self) -> Option<&EtaGraphs> {
        self.graphs.as_ref()
    }

    /// Accepted fit peak positions
    pub fn fit_peaks(&self) -> &[f64] {
        &self.fit_peaks
    }

    /// Spectrum search peak positions
    pub fn spectrum_peaks(&self) -> &[f64] {
        &self.spec_peaks
    }

    /// Statistics of the accepted fit peaks; None when no fit was accepted
    pub fn fit_statistics(&self) -> Option<&SummaryStatistics> {
        self.stat_fit.as_ref()
    }

    pub fn spectrum_statistics(&self) -> Option<&SummaryStatistics> {
        self.stat_spec.as_ref()
    }

    pub fn n_fit_success(&self) -> usize {
        self.phi_sectors.values().map(|p| p.n_fit_success).sum()
    }

    pub fn artifact(&self, obs: Observable) -> Option<Artifact<'_>> {
        if let Some((kind, quantity)) = obs.distribution() {
            return self.histos(kind).get(quantity).map(Artifact::Histogram);
        }
        let graphs = self.graphs.as_ref()?;
        let graph = match obs {
            Observable::ResponseFitChi2 => &graphs.fit_norm_chi2,
            Observable::ResponseFitPkPos => &graphs.fit_pk_pos,
            Observable::ResponseFitPkRes => graphs.fit_pk_res.as_ref()?,
            Observable::ResponseFitFailures => &graphs.fit_failures,
            Observable::SpectrumNumPeaks => &graphs.spec_num_peaks,
            Observable::SpectrumPkPos => &graphs.spec_pk_pos,
            _ => return None,
        };
        Some(Artifact::Graph(graph))
    }

    pub(crate) fn phi_sector_mut(&mut self, phi: i32) -> Option<&mut SectorPhi> {
        self.phi_sectors.get_mut(&phi)
    }

    pub(crate) fn phi_sectors_mut(&mut self) -> impl Iterator<Item = (&i32, &mut SectorPhi)> {
        self.phi_sectors.iter_mut()
    }

    pub(crate) fn clear_records(&mut self) {
        self.phi_sectors
            .values_mut()
            .for_each(|phi| phi.clear_records());
    }

    /// Drop all data, keeping the geometry
    pub(crate) fn reset(&mut self) {
        let phi_sectors = std::mem::take(&mut self.phi_sectors);
        *self = Self::new(self.y_pos, self.width, phi_sectors);
        self.phi_sectors.values_mut().for_each(|phi| phi.reset());
    }

    /// Drop all fit results, keeping the distributions
    pub(crate) fn clear_fits(&mut self) {
        self.graphs = None;
        self.fit_peaks.clear();
        self.spec_peaks.clear();
        self.stat_fit = None;
        self.stat_spec = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::Axis;

    #[test]
    fn test_even_phi_split() {
        let eta = SectorEta::with_even_phi(10.0, 12.0, 3);
        assert_eq!(eta.n_phi(), 3);
        let first = eta.phi_sector(1).unwrap();
        let last = eta.phi_sector(3).unwrap();
        assert_eq!(first.x_low(), -6.0);
        assert_eq!(first.x_high(), -2.0);
        assert_eq!(last.x_high(), 6.0);
        assert!(eta.phi_sector(0).is_none());
    }

    #[test]
    fn test_book_slices_is_repeatable() {
        let mut phi = SectorPhi::new(-5.0, 5.0);
        let x = Axis::new("x", 3, -5.0, 5.0).unwrap();
        let y = Axis::new("y", 300, 0.0, 15000.0).unwrap();
        let mut hist = Histogram2D::new("h", "", x, y).unwrap();
        hist.fill(-2.0, 100.0);
        phi.clust_adc_v_pos = Some(hist);

        phi.book_slices(1, 1).unwrap();
        assert_eq!(phi.n_slices(), 3);
        assert_eq!(phi.slice(1).unwrap().adc().entries(), 1);
        assert_eq!(phi.slice(1).unwrap().adc().name(), "hiEta1iPhi1Slice1_ClustADC");
        assert_eq!(*phi.slice(2).unwrap().fit_state(), FitState::NotAttempted);

        if let Some(h) = phi.clust_adc_v_pos.as_mut() {
            h.fill(4.0, 100.0)
        }
        phi.book_slices(1, 1).unwrap();
        assert_eq!(phi.n_slices(), 3);
        assert_eq!(phi.slice(3).unwrap().adc().entries(), 1);
    }

    #[test]
    fn test_reset_keeps_geometry() {
        let mut eta = SectorEta::with_even_phi(3.0, 10.0, 2);
        eta.fit_peaks.push(1.0);
        if let Some(phi) = eta.phi_sector_mut(1) {
            phi.push_cluster(Cluster::default());
        }
        let geometry = eta.geometry();
        eta.reset();
        assert_eq!(eta.geometry(), geometry);
        assert!(eta.fit_peaks().is_empty());
        assert!(eta.phi_sector(1).unwrap().clusters().is_empty());
        assert_eq!(eta.phi_sector(2).unwrap().x_low(), 0.0);
    }
}
