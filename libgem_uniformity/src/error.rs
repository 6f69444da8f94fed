use std::path::PathBuf;
use thiserror::Error;

use super::worker_status::WorkerStatus;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum HistogramError {
    #[error("Histogram {0} requires at least one bin")]
    NoBins(String),
    #[error("Histogram {name} has an invalid axis range [{low}, {high})")]
    BadRange { name: String, low: f64, high: f64 },
    #[error("Histogram {0} was given contents that do not match its binning")]
    ShapeMismatch(String),
    #[error("Bin {0} is outside of the histogram binning")]
    BadBin(usize),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ObservableError {
    #[error("Unknown observable: {0}")]
    UnknownObservable(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DetectorError {
    #[error("Eta index {0} is invalid; eta indices start at 1")]
    BadEtaIndex(i32),
    #[error("Eta sector {0} requires at least one phi sector")]
    NoPhiSectors(i32),
    #[error("Eta sector {0} has an invalid width {1}")]
    BadWidth(i32, f32),
    #[error("Eta sector {index} is already defined with different geometry (y_pos: {y_pos}, width: {width}, n_phi: {n_phi})")]
    ConflictingGeometry {
        index: i32,
        y_pos: f32,
        width: f32,
        n_phi: usize,
    },
    #[error("Phi sector {1} of eta sector {0} has an invalid range [{2}, {3})")]
    BadPhiRange(i32, i32, f32, f32),
    #[error("Eta sector {0} does not exist")]
    MissingEtaSector(i32),
    #[error("Detector failed to book histograms: {0}")]
    HistogramError(#[from] HistogramError),
}

#[derive(Debug, Error)]
pub enum DetectorMapError {
    #[error("DetectorMap failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("DetectorMap failed to parse an integer: {0}")]
    ParseIntError(#[from] std::num::ParseIntError),
    #[error("DetectorMap failed to parse a float: {0}")]
    ParseFloatError(#[from] std::num::ParseFloatError),
    #[error("DetectorMap was given a file with the incorrect format; most likely the number of columns is incorrect (line {0})")]
    BadFileFormat(usize),
    #[error("DetectorMap failed due to Detector error: {0}")]
    DetectorError(#[from] DetectorError),
}

#[derive(Debug, Error)]
pub enum RecordFileError {
    #[error("Could not open RecordFile because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("RecordFile has incorrect magic {0:?}; expected GEMR")]
    BadMagic([u8; 4]),
    #[error("RecordFile has unsupported format version {0}")]
    BadVersion(u16),
    #[error("RecordFile failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FitError {
    #[error("Fit model {model} expects {expected} parameters but {given} were configured")]
    ParameterCount {
        model: String,
        expected: usize,
        given: usize,
    },
    #[error("Fit setup does not declare a PEAK parameter meaning")]
    NoPeakParameter,
    #[error("Unrecognized fit model formula: {0}")]
    UnknownModel(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config has invalid granularity {0}; must be at least 1")]
    BadGranularity(usize),
    #[error("Config has invalid run range {0} to {1}")]
    BadRunRange(i32, i32),
    #[error("Config has invalid histogram setup {0}: {1}")]
    BadHistoSetup(String, HistogramError),
    #[error("Config has an invalid fit setup: {0}")]
    BadFitSetup(#[from] FitError),
    #[error("Config requests an analysis step that requires clusters, but the cluster step is disabled")]
    FittingWithoutClusters,
}

#[derive(Debug, Error)]
pub enum HDF5WriterError {
    #[error("HDF5Writer failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("HDF5Writer failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("HDF5Writer failed to convert a string attribute: {0}")]
    StringError(String),
}

#[derive(Debug, Error)]
pub enum HDF5ReaderError {
    #[error("HDF5Reader could not open file {0:?} because it does not exist")]
    BadFilePath(PathBuf),
    #[error("HDF5Reader failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("HDF5Reader failed to rebuild a histogram: {0}")]
    HistogramError(#[from] HistogramError),
    #[error("HDF5Reader failed to rebuild the detector: {0}")]
    DetectorError(#[from] DetectorError),
    #[error("HDF5Reader found a file written with granularity {found}; current analysis uses {expected}")]
    GranularityMismatch { found: usize, expected: usize },
}

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("Analyzer failed due to Fit error: {0}")]
    FitError(#[from] FitError),
    #[error("Analyzer failed due to Detector error: {0}")]
    DetectorError(#[from] DetectorError),
    #[error("Analyzer failed due to Histogram error: {0}")]
    HistogramError(#[from] HistogramError),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to DetectorMap error: {0}")]
    MapError(#[from] DetectorMapError),
    #[error("Processor failed due to RecordFile error: {0}")]
    RecordFileError(#[from] RecordFileError),
    #[error("Processor failed due to Analyzer error: {0}")]
    AnalyzerError(#[from] AnalyzerError),
    #[error("Processor failed due to HDF5Writer error: {0}")]
    HDFError(#[from] HDF5WriterError),
    #[error("Processor failed due to HDF5Reader error: {0}")]
    HDFReadError(#[from] HDF5ReaderError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
}
