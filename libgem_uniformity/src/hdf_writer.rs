use hdf5::types::VarLenUnicode;
use hdf5::{File, Group};
use ndarray::{Array1, Array2};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::constants::OUTPUT_FORMAT_VERSION;
use super::detector::Detector;
use super::error::HDF5WriterError;
use super::fitter::FitResult;
use super::graph::SummaryGraph;
use super::histogram::{Histogram1D, Histogram2D};
use super::observable::Observable;
use super::sector::{FitState, ObservableHistos, SectorEta, SectorPhi, SectorSlice};
use super::statistics::SummaryStatistics;

pub(crate) const SUMMARY_NAME: &str = "Summary";
pub(crate) const ETA_PREFIX: &str = "SectorEta";
pub(crate) const PHI_PREFIX: &str = "SectorPhi";
pub(crate) const SLICE_PREFIX: &str = "Slice";
pub(crate) const ADC_V_POS_NAME: &str = "ClustADC_v_ClustPos";
pub(crate) const CONTENTS_NAME: &str = "contents";
pub(crate) const FIT_NAME: &str = "fit";
pub(crate) const STAT_FIT_NAME: &str = "statistics_fit";
pub(crate) const STAT_SPEC_NAME: &str = "statistics_spec";

// Structure
// uniformity.h5 - version, granularity, created
// Summary
// |---- ClustADC, ClustPos, ClustSize, ClustTime - name, title, n_bins, low, high, entries
// |    |---- contents(dset)
// |---- statistics_ResponseFitPkPos - count, min, max, mean, ...
// |    |---- dist, fit
// SectorEta_# - y_pos, width, n_phi
// |---- ClustADC, ClustMulti, ClustSize, ClustTime, HitADC, HitMulti, HitTime
// |---- ClustADC_v_ClustPos - x/y binning
// |    |---- contents(dset)
// |---- ResponseFitChi2, ResponseFitPkPos, ... - name
// |    |---- points(dset) rows of (x, y, x_err, y_err), NaN where unset
// |---- statistics_fit, statistics_spec
// |---- SectorPhi_# - x_low, x_high, n_fit_success, n_out_of_range
// |    |---- ClustADC, ..., HitTime, ClustADC_v_ClustPos
// |    |---- Slice_# - center, width, state, status, accepted
// |    |    |---- ClustADC
// |    |    |---- fit - model, chi_square, ndf, valid, status, range_low, range_high
// |    |    |    |---- params(dset), errors(dset)

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode, HDF5WriterError> {
    VarLenUnicode::from_str(value).map_err(|e| HDF5WriterError::StringError(e.to_string()))
}

fn write_attr<T: hdf5::H5Type>(group: &Group, name: &str, value: &T) -> Result<(), HDF5WriterError> {
    group.new_attr::<T>().create(name)?.write_scalar(value)?;
    Ok(())
}

fn write_str_attr(group: &Group, name: &str, value: &str) -> Result<(), HDF5WriterError> {
    group
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&to_var_len_unicode(value)?)?;
    Ok(())
}

fn write_histogram(parent: &Group, key: &str, hist: &Histogram1D) -> Result<(), HDF5WriterError> {
    let group = parent.create_group(key)?;
    write_str_attr(&group, "name", hist.name())?;
    write_str_attr(&group, "title", hist.title())?;
    write_attr(&group, "n_bins", &(hist.n_bins() as u64))?;
    write_attr(&group, "low", &hist.axis().low())?;
    write_attr(&group, "high", &hist.axis().high())?;
    write_attr(&group, "entries", &hist.entries())?;
    group
        .new_dataset_builder()
        .with_data(hist.contents())
        .create(CONTENTS_NAME)?;
    Ok(())
}

fn write_histogram_2d(parent: &Group, key: &str, hist: &Histogram2D) -> Result<(), HDF5WriterError> {
    let group = parent.create_group(key)?;
    write_str_attr(&group, "name", hist.name())?;
    write_str_attr(&group, "title", hist.title())?;
    write_attr(&group, "x_n_bins", &(hist.x_axis().n_bins() as u64))?;
    write_attr(&group, "x_low", &hist.x_axis().low())?;
    write_attr(&group, "x_high", &hist.x_axis().high())?;
    write_attr(&group, "y_n_bins", &(hist.y_axis().n_bins() as u64))?;
    write_attr(&group, "y_low", &hist.y_axis().low())?;
    write_attr(&group, "y_high", &hist.y_axis().high())?;
    write_attr(&group, "entries", &hist.entries())?;
    group
        .new_dataset_builder()
        .with_data(hist.contents())
        .create(CONTENTS_NAME)?;
    Ok(())
}

fn write_histos(
    parent: &Group,
    histos: &ObservableHistos,
    observables: &[Observable],
) -> Result<(), HDF5WriterError> {
    for obs in observables {
        if let Some((_, quantity)) = obs.distribution() {
            if let Some(hist) = histos.get(quantity) {
                write_histogram(parent, obs.name(), hist)?;
            }
        }
    }
    Ok(())
}

fn write_graph(parent: &Group, key: &str, graph: &SummaryGraph) -> Result<(), HDF5WriterError> {
    let group = parent.create_group(key)?;
    write_str_attr(&group, "name", graph.name())?;
    let mut points = Array2::<f64>::from_elem((graph.n_points(), 4), f64::NAN);
    for (idx, point) in graph.iter_set() {
        points[[idx, 0]] = point.x;
        points[[idx, 1]] = point.y;
        points[[idx, 2]] = point.x_err;
        points[[idx, 3]] = point.y_err;
    }
    group
        .new_dataset_builder()
        .with_data(&points)
        .create("points")?;
    Ok(())
}

fn write_fit(parent: &Group, result: &FitResult) -> Result<(), HDF5WriterError> {
    let group = parent.create_group(FIT_NAME)?;
    write_str_attr(&group, "model", result.model.formula())?;
    write_attr(&group, "chi_square", &result.chi_square)?;
    write_attr(&group, "ndf", &result.ndf)?;
    write_attr(&group, "valid", &result.valid)?;
    write_attr(&group, "status", &result.status)?;
    write_attr(&group, "range_low", &result.range.0)?;
    write_attr(&group, "range_high", &result.range.1)?;
    group
        .new_dataset_builder()
        .with_data(&Array1::from(result.params.clone()))
        .create("params")?;
    group
        .new_dataset_builder()
        .with_data(&Array1::from(result.errors.clone()))
        .create("errors")?;
    Ok(())
}

fn write_statistics(
    parent: &Group,
    key: &str,
    stats: &SummaryStatistics,
) -> Result<(), HDF5WriterError> {
    let group = parent.create_group(key)?;
    write_attr(&group, "count", &(stats.count as u64))?;
    write_attr(&group, "min", &stats.min)?;
    write_attr(&group, "max", &stats.max)?;
    write_attr(&group, "mean", &stats.mean)?;
    write_attr(&group, "std_dev", &stats.std_dev)?;
    write_attr(&group, "q1", &stats.q1)?;
    write_attr(&group, "median", &stats.median)?;
    write_attr(&group, "q3", &stats.q3)?;
    write_attr(&group, "iqr", &stats.iqr)?;
    write_attr(&group, "resolution", &stats.resolution.unwrap_or(f64::NAN))?;
    write_histogram(&group, "dist", &stats.dist)?;
    if let Some(fit) = &stats.fit {
        write_fit(&group, fit)?;
    }
    Ok(())
}

fn fit_state_str(state: &FitState) -> &'static str {
    match state {
        FitState::NotAttempted => "not_attempted",
        FitState::Skipped(_) => "skipped",
        FitState::Fitted(_) => "fitted",
    }
}

/// A simple struct which wraps around the hdf5-rust library.
///
/// Writes the full analysis hierarchy of a [`Detector`] to a new HDF5 file.
#[derive(Debug)]
pub struct HDFWriter {
    file_handle: File,
    path: PathBuf,
}

impl HDFWriter {
    /// Create the writer, opening a file at path and writing the file attributes
    pub fn new(path: &Path, granularity: usize) -> Result<Self, HDF5WriterError> {
        let file_handle = File::create(path)?;
        let version = format!("{}:{}", env!("CARGO_PKG_NAME"), OUTPUT_FORMAT_VERSION);
        file_handle
            .new_attr::<VarLenUnicode>()
            .create("version")?
            .write_scalar(&to_var_len_unicode(&version)?)?;
        file_handle
            .new_attr::<u64>()
            .create("granularity")?
            .write_scalar(&(granularity as u64))?;
        file_handle
            .new_attr::<i64>()
            .create("created")?
            .write_scalar(&time::OffsetDateTime::now_utc().unix_timestamp())?;
        Ok(Self {
            file_handle,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the whole detector hierarchy
    pub fn write_detector(&self, detector: &Detector) -> Result<(), HDF5WriterError> {
        let summary = self.file_handle.create_group(SUMMARY_NAME)?;
        write_histos(
            &summary,
            detector.summary_histos(),
            &[
                Observable::ClustADC,
                Observable::ClustPos,
                Observable::ClustSize,
                Observable::ClustTime,
            ],
        )?;
        for obs in [
            Observable::ResponseFitPkPos,
            Observable::ResponseFitChi2,
            Observable::ResponseFitPkRes,
        ] {
            if let Some(stats) = detector.artifact(obs).and_then(|a| a.as_statistics()) {
                write_statistics(&summary, &format!("statistics_{}", obs.name()), stats)?;
            }
        }

        for (eta_idx, eta) in detector.eta_sectors() {
            self.write_eta(*eta_idx, eta)?;
        }
        Ok(())
    }

    fn write_eta(&self, eta_idx: i32, eta: &SectorEta) -> Result<(), HDF5WriterError> {
        let group = self
            .file_handle
            .create_group(&format!("{ETA_PREFIX}_{eta_idx}"))?;
        write_attr(&group, "y_pos", &eta.y_pos())?;
        write_attr(&group, "width", &eta.width())?;
        write_attr(&group, "n_phi", &(eta.n_phi() as u64))?;

        for obs in Observable::all() {
            match eta.artifact(obs) {
                Some(super::observable::Artifact::Histogram(hist)) => {
                    write_histogram(&group, obs.name(), hist)?
                }
                Some(super::observable::Artifact::Graph(graph)) => {
                    write_graph(&group, obs.name(), graph)?
                }
                _ => (),
            }
        }
        if let Some(hist) = eta.clust_adc_v_pos() {
            write_histogram_2d(&group, ADC_V_POS_NAME, hist)?;
        }
        if let Some(stats) = eta.fit_statistics() {
            write_statistics(&group, STAT_FIT_NAME, stats)?;
        }
        if let Some(stats) = eta.spectrum_statistics() {
            write_statistics(&group, STAT_SPEC_NAME, stats)?;
        }

        for (phi_idx, phi) in eta.phi_sectors() {
            Self::write_phi(&group, *phi_idx, phi)?;
        }
        Ok(())
    }

    fn write_phi(parent: &Group, phi_idx: i32, phi: &SectorPhi) -> Result<(), HDF5WriterError> {
        let group = parent.create_group(&format!("{PHI_PREFIX}_{phi_idx}"))?;
        write_attr(&group, "x_low", &phi.x_low())?;
        write_attr(&group, "x_high", &phi.x_high())?;
        write_attr(&group, "n_fit_success", &(phi.n_fit_success() as u64))?;
        write_attr(&group, "n_out_of_range", &phi.n_out_of_range())?;
        for obs in Observable::all() {
            if let Some(hist) = phi.artifact(obs).and_then(|a| a.as_histogram()) {
                write_histogram(&group, obs.name(), hist)?;
            }
        }
        if let Some(hist) = phi.clust_adc_v_pos() {
            write_histogram_2d(&group, ADC_V_POS_NAME, hist)?;
        }
        for (slice_idx, slice) in phi.slices() {
            Self::write_slice(&group, *slice_idx, slice)?;
        }
        Ok(())
    }

    fn write_slice(
        parent: &Group,
        slice_idx: usize,
        slice: &SectorSlice,
    ) -> Result<(), HDF5WriterError> {
        let group = parent.create_group(&format!("{SLICE_PREFIX}_{slice_idx}"))?;
        write_attr(&group, "center", &slice.center())?;
        write_attr(&group, "width", &slice.width())?;
        write_str_attr(&group, "state", fit_state_str(slice.fit_state()))?;
        write_attr(&group, "status", &slice.fit_status().unwrap_or(-1))?;
        write_attr(&group, "accepted", &slice.fit_accepted())?;
        write_histogram(&group, Observable::ClustADC.name(), slice.adc())?;
        if let Some(result) = slice.fit_result() {
            write_fit(&group, result)?;
        }
        Ok(())
    }

    /// Flush and close the file
    pub fn close(self) -> Result<(), HDF5WriterError> {
        self.file_handle.flush()?;
        spdlog::info!("Wrote results to {}", self.path.display());
        Ok(())
    }
}
