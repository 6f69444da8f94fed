//! # gem_uniformity
//!
//! gem_uniformity measures the response uniformity of GEM detectors, written in Rust. It
//! takes reconstructed clusters and hits recorded during a uniformity scan, sorts them into
//! the readout sectors of the detector, fits the charge spectrum of every small area of
//! the detector, and writes the resulting maps of gain and resolution to HDF5.
//!
//! ## Installation
//!
//! The only method of install is from source.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the Rust tool
//! chain. See the [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions.
//!
//! ### HDF5
//!
//! HDF5 is built from source and linked statically, so no system install is needed.
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./gem_uniformity_cli` from the
//! top level repository. To use the CLI, first make a template configuration with
//! `gem_uniformity_cli -p config.yml new`, edit it, then run
//! `gem_uniformity_cli -p config.yml`. A previous output can be refit with a new fit
//! configuration with `gem_uniformity_cli -p config.yml reanalyze -i old.h5 -o new.h5`.
//!
//! ## Analysis
//!
//! The detector is divided into eta sectors (rows along y), each of which is divided into
//! phi sectors (ranges along x). Each phi sector is further divided into `granularity`
//! equal-width slices. For every slice the cluster charge spectrum is searched for peaks
//! and fit; the fitted peak position is the local gain, and the fitted width over the peak
//! is the local resolution. The results are gathered per eta sector into graphs indexed by
//! `(slice - 1) + granularity * (phi rank)`, and summarized over the whole detector.
//!
//! ## Configuration
//!
//! Configurations are YAML. The main controls are:
//!
//! - `input_path`: directory holding the record files, named `run_NNNN.gemrec`
//! - `output_path`: directory to which HDF5 (.h5) results are written
//! - `detector_map_path`: CSV detector map. If `null` the bundled default map is used
//! - `first_run_number`, `last_run_number`: the run range (inclusive)
//! - `mode`: `aggregate` accumulates all runs into one output; `per_file` writes one
//!   output per run
//! - `steps`: which of `hits`, `clusters`, `fitting` to run. Fitting needs clusters
//! - `cluster_selection`, `hit_selection`: cuts applied before records are sorted
//! - `analysis`: granularity, the binning of each distribution, the charge spectrum fit,
//!   and the peak search
//!
//! ```yml
//! input_path: /data/scan
//! output_path: /data/results
//! detector_map_path: null
//! first_run_number: 1
//! last_run_number: 12
//! mode: aggregate
//! steps:
//!   hits: true
//!   clusters: true
//!   fitting: true
//! analysis:
//!   granularity: 4
//!   fit:
//!     model: landau
//!     param_meanings: [AMPLITUDE, PEAK, SIGMA]
//!   ...
//! ```
//!
//! ### Detector Map Format
//!
//! The detector map is a CSV file with a header line and one row per eta sector:
//!
//! ```csv
//! eta,y_pos,width,n_phi
//! ```
//!
//! A row may be followed by `n_phi` pairs of `x_low,x_high` to give the phi sector ranges
//! explicitly; otherwise the width is split evenly.
//!
//! ## Output
//!
//! gem_uniformity outputs the HDF5 results and a log file. The HDF5 layout is:
//!
//! ```text
//! run_0001_12_uniformity.h5 - version, granularity, created
//! Summary
//! |---- ClustADC, ClustPos, ClustSize, ClustTime
//! |---- statistics_ResponseFitPkPos, statistics_ResponseFitChi2, statistics_ResponseFitPkRes
//! SectorEta_# - y_pos, width, n_phi
//! |---- ClustADC, ClustMulti, ..., ClustADC_v_ClustPos
//! |---- ResponseFitChi2, ResponseFitPkPos, ResponseFitPkRes, ResponseFitFailures,
//! |     SpectrumNumPeaks, SpectrumPkPos
//! |---- statistics_fit, statistics_spec
//! |---- SectorPhi_# - x_low, x_high, n_fit_success, n_out_of_range
//! |    |---- ClustADC, ClustPos, ..., ClustADC_v_ClustPos
//! |    |---- Slice_# - center, width, state, status, accepted
//! |    |    |---- ClustADC, fit
//! ```
pub mod analyzer;
pub mod config;
pub mod constants;
pub mod detector;
pub mod detector_map;
pub mod error;
pub mod fitter;
pub mod graph;
pub mod hdf_reader;
pub mod hdf_writer;
pub mod histogram;
pub mod observable;
pub mod peak_finder;
pub mod process;
pub mod record;
pub mod record_file;
pub mod sector;
pub mod statistics;
pub mod worker_status;
