use hdf5::types::VarLenUnicode;
use hdf5::{File, Group};
use std::path::Path;

use super::detector::Detector;
use super::error::HDF5ReaderError;
use super::hdf_writer::{
    ADC_V_POS_NAME, CONTENTS_NAME, ETA_PREFIX, PHI_PREFIX, SUMMARY_NAME,
};
use super::histogram::{Axis, Histogram1D, Histogram2D};
use super::observable::{Observable, RecordKind};
use super::sector::ObservableHistos;

/// Parse the index out of a `<prefix>_<index>` group name
fn parse_index(name: &str, prefix: &str) -> Option<i32> {
    name.strip_prefix(prefix)?.strip_prefix('_')?.parse().ok()
}

fn read_str_attr(group: &Group, name: &str) -> Result<String, HDF5ReaderError> {
    let value: VarLenUnicode = group.attr(name)?.read_scalar()?;
    Ok(value.to_string())
}

fn read_histogram(group: &Group) -> Result<Histogram1D, HDF5ReaderError> {
    let contents = group.dataset(CONTENTS_NAME)?.read_raw::<f64>()?;
    Ok(Histogram1D::from_contents(
        &read_str_attr(group, "name")?,
        &read_str_attr(group, "title")?,
        group.attr("low")?.read_scalar::<f64>()?,
        group.attr("high")?.read_scalar::<f64>()?,
        contents,
        group.attr("entries")?.read_scalar::<u64>()?,
    )?)
}

fn read_histogram_2d(group: &Group) -> Result<Histogram2D, HDF5ReaderError> {
    let name = read_str_attr(group, "name")?;
    let x_axis = Axis::new(
        &name,
        group.attr("x_n_bins")?.read_scalar::<u64>()? as usize,
        group.attr("x_low")?.read_scalar::<f64>()?,
        group.attr("x_high")?.read_scalar::<f64>()?,
    )?;
    let y_axis = Axis::new(
        &name,
        group.attr("y_n_bins")?.read_scalar::<u64>()? as usize,
        group.attr("y_low")?.read_scalar::<f64>()?,
        group.attr("y_high")?.read_scalar::<f64>()?,
    )?;
    let contents = group.dataset(CONTENTS_NAME)?.read_2d::<f64>()?;
    Ok(Histogram2D::from_contents(
        &name,
        &read_str_attr(group, "title")?,
        x_axis,
        y_axis,
        contents,
        group.attr("entries")?.read_scalar::<u64>()?,
    )?)
}

/// Load the distributions of one record kind stored in a group
fn read_histos(group: &Group, kind: RecordKind) -> Result<ObservableHistos, HDF5ReaderError> {
    let mut histos = ObservableHistos::default();
    for obs in Observable::all() {
        let quantity = match obs.distribution() {
            Some((k, q)) if k == kind => q,
            _ => continue,
        };
        if let Ok(hist_group) = group.group(obs.name()) {
            *histos.slot_mut(quantity) = Some(read_histogram(&hist_group)?);
        }
    }
    Ok(histos)
}

fn read_histogram_2d_opt(group: &Group) -> Result<Option<Histogram2D>, HDF5ReaderError> {
    match group.group(ADC_V_POS_NAME) {
        Ok(hist_group) => Ok(Some(read_histogram_2d(&hist_group)?)),
        Err(_) => Ok(None),
    }
}

/// Sorted (index, group name) pairs of the members with a given prefix
fn indexed_members(group: &Group, prefix: &str) -> Result<Vec<(i32, String)>, HDF5ReaderError> {
    let mut members: Vec<(i32, String)> = group
        .member_names()?
        .into_iter()
        .filter_map(|name| parse_index(&name, prefix).map(|idx| (idx, name)))
        .collect();
    members.sort();
    Ok(members)
}

/// Rebuild a detector from a file written by the [`HDFWriter`](crate::hdf_writer::HDFWriter).
///
/// Geometry and distributions are restored; slices and fits are not, they must be
/// derived again by the analyzer. A new [`Detector`] is returned, so a failed read never
/// touches an existing one.
pub fn read_detector(path: &Path, granularity: usize) -> Result<Detector, HDF5ReaderError> {
    if !path.exists() {
        return Err(HDF5ReaderError::BadFilePath(path.to_path_buf()));
    }
    let file = File::open(path)?;
    let found = file.attr("granularity")?.read_scalar::<u64>()? as usize;
    if found != granularity {
        return Err(HDF5ReaderError::GranularityMismatch {
            found,
            expected: granularity,
        });
    }

    let mut detector = Detector::new();
    for (eta_idx, eta_name) in indexed_members(&file, ETA_PREFIX)? {
        let eta_group = file.group(&eta_name)?;
        let y_pos = eta_group.attr("y_pos")?.read_scalar::<f32>()?;
        let width = eta_group.attr("width")?.read_scalar::<f32>()?;

        let phi_members = indexed_members(&eta_group, PHI_PREFIX)?;
        let mut ranges = vec![];
        for (_, phi_name) in phi_members.iter() {
            let phi_group = eta_group.group(phi_name)?;
            ranges.push((
                phi_group.attr("x_low")?.read_scalar::<f32>()?,
                phi_group.attr("x_high")?.read_scalar::<f32>()?,
            ));
        }
        detector.define_eta_sector_with_phi(eta_idx, y_pos, width, &ranges)?;

        let eta = match detector.eta_sector_mut(eta_idx) {
            Some(eta) => eta,
            None => continue,
        };
        eta.clust_histos = read_histos(&eta_group, RecordKind::Cluster)?;
        eta.hit_histos = read_histos(&eta_group, RecordKind::Hit)?;
        eta.clust_adc_v_pos = read_histogram_2d_opt(&eta_group)?;

        // Phi sectors are renumbered from 1 in rank order when defined
        for (rank, (_, phi_name)) in phi_members.iter().enumerate() {
            let phi_group = eta_group.group(phi_name)?;
            if let Some(phi) = eta.phi_sector_mut(rank as i32 + 1) {
                phi.clust_histos = read_histos(&phi_group, RecordKind::Cluster)?;
                phi.hit_histos = read_histos(&phi_group, RecordKind::Hit)?;
                phi.clust_adc_v_pos = read_histogram_2d_opt(&phi_group)?;
                phi.n_out_of_range = phi_group.attr("n_out_of_range")?.read_scalar::<u64>()?;
            }
        }
    }

    if let Ok(summary) = file.group(SUMMARY_NAME) {
        detector.summary_histos = read_histos(&summary, RecordKind::Cluster)?;
    }

    spdlog::info!(
        "Loaded {} eta sectors from {}",
        detector.n_eta_sectors(),
        path.display()
    );
    Ok(detector)
}

/// Replace a detector with the one stored at path. On error the detector is left untouched.
pub fn reload_detector(
    detector: &mut Detector,
    path: &Path,
    granularity: usize,
) -> Result<(), HDF5ReaderError> {
    *detector = read_detector(path, granularity)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{AnalysisSetup, UniformityAnalyzer};
    use crate::hdf_writer::HDFWriter;
    use crate::observable::Quantity;
    use crate::record::Cluster;

    fn make_analyzed_detector(analyzer: &UniformityAnalyzer) -> Detector {
        let mut detector = Detector::new();
        detector.define_eta_sector(1, 10.0, 12.0, 2).unwrap();
        detector.define_eta_sector(2, 30.0, 14.0, 3).unwrap();
        let clusters: Vec<Cluster> = (0..200)
            .map(|i| Cluster {
                event: i / 4,
                adc: 500.0 + (i % 13) as f32 * 40.0,
                position_x: -5.5 + (i % 11) as f32,
                size: 2 + (i % 3) as u32,
                time_bin: 4,
                eta: 1 + (i % 2) as i32,
                phi: 1 + (i % 2) as i32,
            })
            .collect();
        detector.set_clusters(&clusters);
        analyzer.fill_histos(&mut detector).unwrap();
        analyzer.book_slices(&mut detector).unwrap();
        analyzer.fit_histos(&mut detector).unwrap();
        detector
    }

    #[test]
    fn test_write_then_read() {
        let setup = AnalysisSetup {
            granularity: 3,
            ..Default::default()
        };
        let analyzer = UniformityAnalyzer::new(setup).unwrap();
        let detector = make_analyzed_detector(&analyzer);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uniformity.h5");
        let writer = HDFWriter::new(&path, 3).unwrap();
        writer.write_detector(&detector).unwrap();
        writer.close().unwrap();

        let mut loaded = read_detector(&path, 3).unwrap();
        assert_eq!(loaded.n_eta_sectors(), 2);
        assert_eq!(loaded.geometry(2), detector.geometry(2));
        let original = detector.phi_sector(1, 1).unwrap();
        let restored = loaded.phi_sector(1, 1).unwrap();
        assert_eq!(original.clust_adc_v_pos(), restored.clust_adc_v_pos());
        assert!(original.n_out_of_range() > 0);
        assert_eq!(original.n_out_of_range(), restored.n_out_of_range());
        assert_eq!(
            original.histos(RecordKind::Cluster).get(Quantity::Adc),
            restored.histos(RecordKind::Cluster).get(Quantity::Adc)
        );
        assert_eq!(restored.n_slices(), 0);
        assert_eq!(
            detector.summary_histos().get(Quantity::Adc),
            loaded.summary_histos().get(Quantity::Adc)
        );

        analyzer.book_slices(&mut loaded).unwrap();
        let restored = loaded.phi_sector(1, 1).unwrap();
        for (idx, slice) in original.slices() {
            assert_eq!(slice.adc(), restored.slice(*idx).unwrap().adc());
        }
    }

    #[test]
    fn test_failed_read() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_detector(&dir.path().join("missing.h5"), 3),
            Err(HDF5ReaderError::BadFilePath(_))
        ));

        let path = dir.path().join("other_granularity.h5");
        let writer = HDFWriter::new(&path, 5).unwrap();
        writer.write_detector(&Detector::new()).unwrap();
        writer.close().unwrap();
        assert!(matches!(
            read_detector(&path, 3),
            Err(HDF5ReaderError::GranularityMismatch {
                found: 5,
                expected: 3
            })
        ));

        let mut detector = Detector::new();
        detector.define_eta_sector(4, 2.0, 8.0, 2).unwrap();
        assert!(reload_detector(&mut detector, &path, 3).is_err());
        assert_eq!(detector.n_eta_sectors(), 1);
        assert!(reload_detector(&mut detector, &path, 5).is_ok());
        assert_eq!(detector.n_eta_sectors(), 0);
    }
}
