use fxhash::FxHashMap;
use std::collections::BTreeMap;

use super::error::DetectorError;
use super::observable::{Artifact, Observable, Quantity};
use super::record::{Cluster, Hit};
use super::sector::{EtaGeometry, ObservableHistos, SectorEta, SectorPhi};
use super::statistics::SummaryStatistics;

/// Which part of the detector to collect records from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorSelector {
    All,
    Eta(i32),
    Phi(i32, i32),
}

/// Detector wide statistics over every eta sector
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectorStatistics {
    pub fit_pk_pos: Option<SummaryStatistics>,
    pub fit_norm_chi2: Option<SummaryStatistics>,
    pub fit_pk_res: Option<SummaryStatistics>,
}

/// The full eta -> phi -> slice hierarchy of a detector under test.
///
/// Geometry is defined once (either sector by sector or from a map) and survives
/// [`Detector::reset`]. Records are routed to the phi sector they declare; records that
/// point at a region which does not exist are dropped and counted.
#[derive(Debug, Clone, Default)]
pub struct Detector {
    sectors: BTreeMap<i32, SectorEta>,
    pub(crate) summary_histos: ObservableHistos,
    pub(crate) all_fit_peaks: Vec<f64>,
    pub(crate) all_norm_chi2: Vec<f64>,
    pub(crate) all_resolutions: Vec<f64>,
    pub(crate) stats: DetectorStatistics,
    dropped: FxHashMap<(i32, i32), u64>,
}

impl Detector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a detector from an already constructed set of eta sectors
    pub fn from_sectors(sectors: BTreeMap<i32, SectorEta>) -> Result<Self, DetectorError> {
        for (index, eta) in sectors.iter() {
            if *index < 1 {
                return Err(DetectorError::BadEtaIndex(*index));
            }
            if eta.n_phi() == 0 {
                return Err(DetectorError::NoPhiSectors(*index));
            }
        }
        Ok(Self {
            sectors,
            ..Default::default()
        })
    }

    /// Build a detector from a set of eta sectors and give it an initial set of clusters
    pub fn from_clusters(
        sectors: BTreeMap<i32, SectorEta>,
        clusters: &[Cluster],
    ) -> Result<Self, DetectorError> {
        let mut detector = Self::from_sectors(sectors)?;
        detector.set_clusters(clusters);
        Ok(detector)
    }

    /// Define an eta sector whose width is split evenly into `n_phi` phi sectors.
    ///
    /// Defining an existing sector again with identical geometry does nothing; defining it
    /// with different geometry is an error and the existing sector is untouched.
    pub fn define_eta_sector(
        &mut self,
        index: i32,
        y_pos: f32,
        width: f32,
        n_phi: usize,
    ) -> Result<(), DetectorError> {
        Self::check_definition(index, width, n_phi)?;
        let requested = EtaGeometry {
            y_pos,
            width,
            n_phi,
        };
        if let Some(existing) = self.sectors.get(&index) {
            return Self::check_conflict(index, existing.geometry(), requested);
        }
        self.sectors
            .insert(index, SectorEta::with_even_phi(y_pos, width, n_phi));
        Ok(())
    }

    /// Define an eta sector with explicit phi sector ranges, numbered from 1 in order
    pub fn define_eta_sector_with_phi(
        &mut self,
        index: i32,
        y_pos: f32,
        width: f32,
        phi_ranges: &[(f32, f32)],
    ) -> Result<(), DetectorError> {
        Self::check_definition(index, width, phi_ranges.len())?;
        let mut phi_sectors = BTreeMap::new();
        for (rank, (low, high)) in phi_ranges.iter().enumerate() {
            let phi = rank as i32 + 1;
            if !(low.is_finite() && high.is_finite()) || high <= low {
                return Err(DetectorError::BadPhiRange(index, phi, *low, *high));
            }
            phi_sectors.insert(phi, SectorPhi::new(*low, *high));
        }
        let requested = SectorEta::new(y_pos, width, phi_sectors);
        if let Some(existing) = self.sectors.get(&index) {
            Self::check_conflict(index, existing.geometry(), requested.geometry())?;
            let same_ranges = existing
                .phi_sectors()
                .zip(requested.phi_sectors())
                .all(|((_, a), (_, b))| a.x_low() == b.x_low() && a.x_high() == b.x_high());
            if !same_ranges {
                return Err(Self::conflict(index, existing.geometry()));
            }
            return Ok(());
        }
        self.sectors.insert(index, requested);
        Ok(())
    }

    fn check_definition(index: i32, width: f32, n_phi: usize) -> Result<(), DetectorError> {
        if index < 1 {
            return Err(DetectorError::BadEtaIndex(index));
        }
        if n_phi == 0 {
            return Err(DetectorError::NoPhiSectors(index));
        }
        if !width.is_finite() || width <= 0.0 {
            return Err(DetectorError::BadWidth(index, width));
        }
        Ok(())
    }

    fn check_conflict(
        index: i32,
        existing: EtaGeometry,
        requested: EtaGeometry,
    ) -> Result<(), DetectorError> {
        if existing == requested {
            Ok(())
        } else {
            Err(Self::conflict(index, existing))
        }
    }

    fn conflict(index: i32, existing: EtaGeometry) -> DetectorError {
        DetectorError::ConflictingGeometry {
            index,
            y_pos: existing.y_pos,
            width: existing.width,
            n_phi: existing.n_phi,
        }
    }

    fn record_drop(&mut self, kind: &str, eta: i32, phi: i32) {
        let count = self.dropped.entry((eta, phi)).or_insert(0);
        *count += 1;
        if *count == 1 {
            spdlog::warn!(
                "Dropping {} with eta {} phi {}: no such sector is defined. Further drops for this sector are only logged at debug level.",
                kind,
                eta,
                phi
            );
        } else {
            spdlog::debug!("Dropping {} with eta {} phi {}", kind, eta, phi);
        }
    }

    /// Route a cluster to its sector. Returns false if the sector does not exist.
    pub fn set_cluster(&mut self, cluster: &Cluster) -> bool {
        match self
            .sectors
            .get_mut(&cluster.eta)
            .and_then(|eta| eta.phi_sector_mut(cluster.phi))
        {
            Some(phi) => {
                phi.push_cluster(*cluster);
                true
            }
            None => {
                self.record_drop("cluster", cluster.eta, cluster.phi);
                false
            }
        }
    }

    /// Route a set of clusters, returning how many were accepted
    pub fn set_clusters(&mut self, clusters: &[Cluster]) -> usize {
        clusters.iter().filter(|c| self.set_cluster(c)).count()
    }

    /// Route a hit to its sector. Returns false if the sector does not exist.
    pub fn set_hit(&mut self, hit: &Hit) -> bool {
        match self
            .sectors
            .get_mut(&hit.eta)
            .and_then(|eta| eta.phi_sector_mut(hit.phi))
        {
            Some(phi) => {
                phi.push_hit(*hit);
                true
            }
            None => {
                self.record_drop("hit", hit.eta, hit.phi);
                false
            }
        }
    }

    pub fn set_hits(&mut self, hits: &[Hit]) -> usize {
        hits.iter().filter(|h| self.set_hit(h)).count()
    }

    pub fn get_clusters(&self, selector: SectorSelector) -> Vec<Cluster> {
        self.select(selector)
            .flat_map(|phi| phi.clusters().iter().copied())
            .collect()
    }

    pub fn get_hits(&self, selector: SectorSelector) -> Vec<Hit> {
        self.select(selector)
            .flat_map(|phi| phi.hits().iter().copied())
            .collect()
    }

    fn select(&self, selector: SectorSelector) -> Box<dyn Iterator<Item = &SectorPhi> + '_> {
        match selector {
            SectorSelector::All => Box::new(
                self.sectors
                    .values()
                    .flat_map(|eta| eta.phi_sectors().map(|(_, phi)| phi)),
            ),
            SectorSelector::Eta(eta) => Box::new(
                self.sectors
                    .get(&eta)
                    .into_iter()
                    .flat_map(|eta| eta.phi_sectors().map(|(_, phi)| phi)),
            ),
            SectorSelector::Phi(eta, phi) => Box::new(
                self.sectors
                    .get(&eta)
                    .and_then(|eta| eta.phi_sector(phi))
                    .into_iter(),
            ),
        }
    }

    /// Total number of records dropped because their sector does not exist
    pub fn n_dropped(&self) -> u64 {
        self.dropped.values().sum()
    }

    pub fn dropped_by_sector(&self) -> &FxHashMap<(i32, i32), u64> {
        &self.dropped
    }

    /// Total number of filled clusters which fell outside their phi sector range
    pub fn n_out_of_range(&self) -> u64 {
        self.sectors
            .values()
            .flat_map(|eta| eta.phi_sectors())
            .map(|(_, phi)| phi.n_out_of_range())
            .sum()
    }

    pub fn n_eta_sectors(&self) -> usize {
        self.sectors.len()
    }

    pub fn eta_sector(&self, eta: i32) -> Option<&SectorEta> {
        self.sectors.get(&eta)
    }

    pub fn eta_sectors(&self) -> impl Iterator<Item = (&i32, &SectorEta)> {
        self.sectors.iter()
    }

    pub fn phi_sector(&self, eta: i32, phi: i32) -> Option<&SectorPhi> {
        self.sectors.get(&eta).and_then(|e| e.phi_sector(phi))
    }

    pub fn eta_pos(&self, eta: i32) -> Option<f32> {
        self.sectors.get(&eta).map(|e| e.y_pos())
    }

    pub fn geometry(&self, eta: i32) -> Option<EtaGeometry> {
        self.sectors.get(&eta).map(|e| e.geometry())
    }

    /// Every accepted fit peak across the detector
    pub fn all_fit_peaks(&self) -> &[f64] {
        &self.all_fit_peaks
    }

    pub fn statistics(&self) -> &DetectorStatistics {
        &self.stats
    }

    pub fn summary_histos(&self) -> &ObservableHistos {
        &self.summary_histos
    }

    /// Detector level artifacts: the summary distributions and the detector wide statistics
    pub fn artifact(&self, obs: Observable) -> Option<Artifact<'_>> {
        match obs {
            Observable::ClustADC => self.summary_histos.get(Quantity::Adc).map(Artifact::Histogram),
            Observable::ClustPos => self.summary_histos.get(Quantity::Pos).map(Artifact::Histogram),
            Observable::ClustSize => self.summary_histos.get(Quantity::Size).map(Artifact::Histogram),
            Observable::ClustTime => self.summary_histos.get(Quantity::Time).map(Artifact::Histogram),
            Observable::ResponseFitPkPos => self.stats.fit_pk_pos.as_ref().map(Artifact::Statistics),
            Observable::ResponseFitChi2 => self.stats.fit_norm_chi2.as_ref().map(Artifact::Statistics),
            Observable::ResponseFitPkRes => self.stats.fit_pk_res.as_ref().map(Artifact::Statistics),
            _ => None,
        }
    }

    pub(crate) fn eta_sector_mut(&mut self, eta: i32) -> Option<&mut SectorEta> {
        self.sectors.get_mut(&eta)
    }

    pub(crate) fn eta_sectors_mut(&mut self) -> impl Iterator<Item = (&i32, &mut SectorEta)> {
        self.sectors.iter_mut()
    }

    pub(crate) fn sectors_and_summary_mut(
        &mut self,
    ) -> (
        std::collections::btree_map::IterMut<'_, i32, SectorEta>,
        &mut ObservableHistos,
    ) {
        (self.sectors.iter_mut(), &mut self.summary_histos)
    }

    /// Forget the records of the current input, keeping distributions and fits
    pub fn clear_records(&mut self) {
        self.sectors.values_mut().for_each(|eta| eta.clear_records());
    }

    /// Drop every record, distribution and fit. Geometry is kept.
    pub fn reset(&mut self) {
        self.sectors.values_mut().for_each(|eta| eta.reset());
        self.summary_histos = ObservableHistos::default();
        self.clear_fits();
        self.dropped.clear();
    }

    pub(crate) fn clear_fits(&mut self) {
        self.sectors.values_mut().for_each(|eta| eta.clear_fits());
        self.all_fit_peaks.clear();
        self.all_norm_chi2.clear();
        self.all_resolutions.clear();
        self.stats = DetectorStatistics::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_cluster(eta: i32, phi: i32, pos: f32, adc: f32) -> Cluster {
        Cluster {
            event: 0,
            adc,
            position_x: pos,
            size: 2,
            time_bin: 5,
            eta,
            phi,
        }
    }

    #[test]
    fn test_define_eta_sector_idempotent() {
        let mut detector = Detector::new();
        detector.define_eta_sector(1, 20.0, 10.0, 2).unwrap();
        detector.define_eta_sector(1, 20.0, 10.0, 2).unwrap();
        assert_eq!(detector.n_eta_sectors(), 1);
        let conflict = detector.define_eta_sector(1, 25.0, 10.0, 3);
        assert!(matches!(
            conflict,
            Err(DetectorError::ConflictingGeometry { n_phi: 2, .. })
        ));
        assert_eq!(detector.geometry(1).unwrap().n_phi, 2);
        assert_eq!(detector.eta_pos(1), Some(20.0));
    }

    #[test]
    fn test_bad_definitions() {
        let mut detector = Detector::new();
        assert!(detector.define_eta_sector(0, 1.0, 1.0, 1).is_err());
        assert!(detector.define_eta_sector(1, 1.0, 1.0, 0).is_err());
        assert!(detector.define_eta_sector(1, 1.0, -1.0, 2).is_err());
        assert!(detector
            .define_eta_sector_with_phi(2, 1.0, 10.0, &[(-5.0, 0.0), (3.0, 3.0)])
            .is_err());
        assert_eq!(detector.n_eta_sectors(), 0);
    }

    #[test]
    fn test_routing_and_drops() {
        let mut detector = Detector::new();
        detector.define_eta_sector(1, 0.0, 10.0, 2).unwrap();
        assert!(detector.set_cluster(&make_cluster(1, 2, 1.0, 100.0)));
        assert!(!detector.set_cluster(&make_cluster(1, 3, 1.0, 100.0)));
        assert!(!detector.set_cluster(&make_cluster(4, 1, 1.0, 100.0)));
        assert!(!detector.set_hit(&Hit {
            eta: 9,
            ..Default::default()
        }));
        assert_eq!(detector.n_dropped(), 3);
        assert_eq!(detector.dropped_by_sector().get(&(1, 3)), Some(&1));
        assert_eq!(detector.get_clusters(SectorSelector::All).len(), 1);
        assert_eq!(detector.get_clusters(SectorSelector::Phi(1, 2)).len(), 1);
        assert!(detector.get_clusters(SectorSelector::Phi(1, 1)).is_empty());
        assert!(detector.get_clusters(SectorSelector::Eta(2)).is_empty());
    }

    #[test]
    fn test_reset_preserves_geometry() {
        let mut detector = Detector::new();
        detector.define_eta_sector(1, 5.0, 10.0, 2).unwrap();
        detector.define_eta_sector(2, 15.0, 12.0, 3).unwrap();
        detector.set_clusters(&[make_cluster(1, 1, -2.0, 100.0), make_cluster(2, 3, 1.0, 50.0)]);
        detector.all_fit_peaks.push(100.0);

        let before: Vec<_> = [1, 2].iter().map(|i| detector.geometry(*i)).collect();
        detector.reset();
        let after: Vec<_> = [1, 2].iter().map(|i| detector.geometry(*i)).collect();
        assert_eq!(before, after);
        assert!(detector.get_clusters(SectorSelector::All).is_empty());
        assert!(detector.all_fit_peaks().is_empty());
        assert!(detector.statistics().fit_pk_pos.is_none());
    }

    #[test]
    fn test_from_sectors_rejects_bad_index() {
        let mut sectors = BTreeMap::new();
        sectors.insert(0, SectorEta::with_even_phi(0.0, 1.0, 1));
        assert!(Detector::from_sectors(sectors).is_err());

        let mut sectors = BTreeMap::new();
        sectors.insert(3, SectorEta::with_even_phi(0.0, 1.0, 1));
        let detector =
            Detector::from_clusters(sectors, &[make_cluster(3, 1, 0.0, 10.0)]).unwrap();
        assert_eq!(detector.get_clusters(SectorSelector::Eta(3)).len(), 1);
    }
}
