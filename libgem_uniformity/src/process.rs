use std::path::Path;
use std::sync::mpsc::Sender;

use super::analyzer::UniformityAnalyzer;
use super::config::{Config, OutputMode};
use super::detector::Detector;
use super::detector_map::load_detector_map;
use super::error::ProcessorError;
use super::hdf_reader::read_detector;
use super::hdf_writer::HDFWriter;
use super::record_file::RecordFile;
use super::worker_status::{Stage, WorkerStatus};

/// Keep the records passing a selection, returning them with the number rejected
fn apply_selection<T>(records: Vec<T>, passes: impl Fn(&T) -> bool) -> (Vec<T>, usize) {
    let n_read = records.len();
    let selected: Vec<T> = records.into_iter().filter(|r| passes(r)).collect();
    let n_rejected = n_read - selected.len();
    (selected, n_rejected)
}

/// Read a run's record file, apply the selections and fill the detector distributions.
///
/// Records are left in the detector; the caller decides when to clear them.
pub fn process_run(
    config: &Config,
    analyzer: &UniformityAnalyzer,
    detector: &mut Detector,
    run_number: i32,
    tx: &Sender<WorkerStatus>,
) -> Result<(), ProcessorError> {
    tx.send(WorkerStatus::new(0.0, run_number, Stage::Filling))?;
    let records = RecordFile::read(&config.get_input_file_name(run_number))?;
    spdlog::info!(
        "Read {} clusters and {} hits from {} ({})",
        records.clusters.len(),
        records.hits.len(),
        records.path.display(),
        human_bytes::human_bytes(records.size_bytes as f64)
    );

    let n_dropped = detector.n_dropped();
    if config.steps.clusters {
        let (selected, n_rejected) =
            apply_selection(records.clusters, |c| config.cluster_selection.passes(c));
        let n_set = detector.set_clusters(&selected);
        spdlog::info!(
            "{} clusters passed the selection, {n_rejected} rejected; {n_set} routed",
            selected.len()
        );
    }
    tx.send(WorkerStatus::new(0.33, run_number, Stage::Filling))?;
    if config.steps.hits {
        let (selected, n_rejected) =
            apply_selection(records.hits, |h| config.hit_selection.passes(h));
        let n_set = detector.set_hits(&selected);
        spdlog::info!(
            "{} hits passed the selection, {n_rejected} rejected; {n_set} routed",
            selected.len()
        );
    }
    tx.send(WorkerStatus::new(0.66, run_number, Stage::Filling))?;
    if detector.n_dropped() > n_dropped {
        spdlog::warn!(
            "Dropped {} records with no matching sector in run {run_number}",
            detector.n_dropped() - n_dropped
        );
    }

    let n_out_of_range = detector.n_out_of_range();
    analyzer.fill_histos(detector)?;
    if detector.n_out_of_range() > n_out_of_range {
        spdlog::warn!(
            "{} clusters in run {run_number} lie outside their phi sector range and reach no slice",
            detector.n_out_of_range() - n_out_of_range
        );
    }
    tx.send(WorkerStatus::new(1.0, run_number, Stage::Filling))?;
    Ok(())
}

/// Derive slices, fit if requested, and write the detector to its output file
fn fit_and_write(
    config: &Config,
    analyzer: &UniformityAnalyzer,
    detector: &mut Detector,
    run_number: i32,
    tx: &Sender<WorkerStatus>,
) -> Result<(), ProcessorError> {
    if config.steps.clusters {
        tx.send(WorkerStatus::new(0.0, run_number, Stage::Fitting))?;
        analyzer.book_slices(detector)?;
        if config.steps.fitting {
            spdlog::info!("Fitting slice spectra...");
            analyzer.fit_histos(detector)?;
            spdlog::info!(
                "Accepted {} fits out of the slice spectra",
                detector.all_fit_peaks().len()
            );
        }
        tx.send(WorkerStatus::new(1.0, run_number, Stage::Fitting))?;
    }

    let output_path = config.get_output_file_name(run_number)?;
    write_output(analyzer, detector, &output_path)?;
    tx.send(WorkerStatus::new(1.0, run_number, Stage::Writing))?;
    Ok(())
}

fn write_output(
    analyzer: &UniformityAnalyzer,
    detector: &Detector,
    path: &Path,
) -> Result<(), ProcessorError> {
    let writer = HDFWriter::new(path, analyzer.granularity())?;
    writer.write_detector(detector)?;
    writer.close()?;
    Ok(())
}

/// The main loop of gem_uniformity.
///
/// Runs the analysis over every run in the configured range. Missing run files are skipped,
/// as are files which cannot be read. In aggregate mode the distributions accumulate over
/// all runs and a single output is written at the end; in per file mode each run gets its
/// own output and the detector is reset between runs.
pub fn process(config: Config, tx: Sender<WorkerStatus>) -> Result<(), ProcessorError> {
    config.validate()?;
    let analyzer = UniformityAnalyzer::new(config.analysis.clone())?;
    let mut detector = load_detector_map(config.detector_map_path.as_deref())?;

    spdlog::info!(
        "Processing {} runs from {} to {}...",
        config.n_runs(),
        config.first_run_number,
        config.last_run_number
    );
    let mut last_processed = None;
    for run in config.first_run_number..(config.last_run_number + 1) {
        if !config.does_run_exist(run) {
            spdlog::info!("Run {} does not exist, skipping...", run);
            continue;
        }
        spdlog::info!("Processing run {}...", run);
        match process_run(&config, &analyzer, &mut detector, run, &tx) {
            Ok(()) => (),
            Err(ProcessorError::RecordFileError(e)) => {
                spdlog::error!("Could not read run {run}: {e}. Skipping...");
                detector.clear_records();
                continue;
            }
            Err(e) => return Err(e),
        }

        match config.mode {
            OutputMode::Aggregate => detector.clear_records(),
            OutputMode::PerFile => {
                fit_and_write(&config, &analyzer, &mut detector, run, &tx)?;
                detector.reset();
            }
        }
        last_processed = Some(run);
        spdlog::info!("Finished processing run {}.", run);
    }

    if config.mode == OutputMode::Aggregate {
        match last_processed {
            Some(run) => fit_and_write(&config, &analyzer, &mut detector, run, &tx)?,
            None => spdlog::warn!("No runs were processed; no output written."),
        }
    }
    Ok(())
}

/// Load a previously written output, derive the slices again, refit with the current fit
/// configuration, and write the result to a new file.
pub fn reanalyze(config: &Config, input_path: &Path, output_path: &Path) -> Result<(), ProcessorError> {
    config.validate()?;
    let analyzer = UniformityAnalyzer::new(config.analysis.clone())?;
    let mut detector = read_detector(input_path, analyzer.granularity())?;
    analyzer.book_slices(&mut detector)?;
    if config.steps.fitting {
        analyzer.fit_histos(&mut detector)?;
    }
    write_output(&analyzer, &detector, output_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecordFileError;
    use crate::record::{Cluster, ClusterSelection, Hit};
    use std::path::PathBuf;
    use std::sync::mpsc::channel;

    // Default map: eta 1 spans x in [-194.95, 194.95) split in three phi sectors
    fn make_clusters(n: u64, run_offset: f32) -> Vec<Cluster> {
        (0..n)
            .map(|i| {
                let phi = 1 + (i % 3) as i32;
                Cluster {
                    event: i / 3,
                    adc: 800.0 + run_offset + (i % 17) as f32 * 25.0,
                    position_x: -130.0 + (phi - 1) as f32 * 130.0 + (i % 7) as f32,
                    size: 3,
                    time_bin: 6,
                    eta: 1,
                    phi,
                }
            })
            .collect()
    }

    fn make_config(dir: &Path, mode: OutputMode) -> Config {
        let input = dir.join("input");
        let output = dir.join("output");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::create_dir_all(&output).unwrap();
        Config {
            input_path: input,
            output_path: output,
            first_run_number: 1,
            last_run_number: 3,
            mode,
            ..Default::default()
        }
    }

    fn write_runs(config: &Config) {
        // run 2 is missing, run 3 is unreadable
        let hits = vec![Hit {
            event: 0,
            adc: 100.0,
            strip: 12,
            time_bin: 5,
            eta: 1,
            phi: 1,
            ..Default::default()
        }];
        RecordFile::write(&config.get_input_file_name(1), &make_clusters(300, 0.0), &hits)
            .unwrap();
        std::fs::write(config.get_input_file_name(3), b"garbage").unwrap();
    }

    fn outputs(config: &Config) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&config.output_path)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_aggregate_mode() {
        let dir = tempfile::tempdir().unwrap();
        let config = make_config(dir.path(), OutputMode::Aggregate);
        write_runs(&config);
        let (tx, rx) = channel();
        process(config.clone(), tx).unwrap();

        let files = outputs(&config);
        assert_eq!(files, vec![config.output_path.join("run_0001_3_uniformity.h5")]);
        let statuses: Vec<WorkerStatus> = rx.try_iter().collect();
        assert!(statuses
            .iter()
            .any(|s| s.stage == Stage::Writing && s.progress == 1.0));

        let detector = read_detector(&files[0], config.analysis.granularity).unwrap();
        assert_eq!(detector.n_eta_sectors(), 8);
        assert!(detector.phi_sector(1, 2).unwrap().clust_adc_v_pos().is_some());
    }

    #[test]
    fn test_per_file_mode() {
        let dir = tempfile::tempdir().unwrap();
        let config = make_config(dir.path(), OutputMode::PerFile);
        write_runs(&config);
        RecordFile::write(
            &config.get_input_file_name(2),
            &make_clusters(150, 200.0),
            &[],
        )
        .unwrap();
        let (tx, _rx) = channel();
        process(config.clone(), tx).unwrap();
        assert_eq!(
            outputs(&config),
            vec![
                config.output_path.join("run_0001_uniformity.h5"),
                config.output_path.join("run_0002_uniformity.h5"),
            ]
        );
    }

    #[test]
    fn test_selection_counts_rejected() {
        let selection = ClusterSelection {
            adc_noise: 900.0,
            ..Default::default()
        };
        let clusters = make_clusters(17, 0.0);
        // ADC runs 800, 825, ... so the first four fall below the noise cut
        let (selected, n_rejected) = apply_selection(clusters, |c| selection.passes(c));
        assert_eq!(n_rejected, 4);
        assert_eq!(selected.len(), 13);
        assert!(selected.iter().all(|c| c.adc >= 900.0));

        let (selected, n_rejected) = apply_selection(Vec::<Hit>::new(), |_| true);
        assert!(selected.is_empty());
        assert_eq!(n_rejected, 0);
    }

    #[test]
    fn test_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = make_config(dir.path(), OutputMode::Aggregate);
        config.steps.clusters = false;
        let (tx, _rx) = channel();
        assert!(matches!(
            process(config, tx),
            Err(ProcessorError::ConfigError(_))
        ));
    }

    /// Number of slices of eta 1 phi 1 stored with an attempted fit
    fn fitted_slices(path: &Path) -> usize {
        let file = hdf5::File::open(path).unwrap();
        let phi = file.group("SectorEta_1/SectorPhi_1").unwrap();
        let mut n_fitted = 0;
        for name in phi.member_names().unwrap() {
            if !name.starts_with("Slice_") {
                continue;
            }
            let slice = phi.group(&name).unwrap();
            let state: hdf5::types::VarLenUnicode =
                slice.attr("state").unwrap().read_scalar().unwrap();
            if state.as_str() == "fitted" {
                assert!(slice.group("fit").is_ok());
                n_fitted += 1;
            }
        }
        n_fitted
    }

    #[test]
    fn test_reanalyze() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = make_config(dir.path(), OutputMode::Aggregate);
        config.steps.fitting = false;
        write_runs(&config);
        let (tx, _rx) = channel();
        process(config.clone(), tx).unwrap();

        config.steps.fitting = true;
        let input = config.output_path.join("run_0001_3_uniformity.h5");
        let refit = dir.path().join("refit.h5");
        reanalyze(&config, &input, &refit).unwrap();
        let detector = read_detector(&refit, config.analysis.granularity).unwrap();
        assert_eq!(detector.n_eta_sectors(), 8);
        assert_eq!(fitted_slices(&input), 0);
        assert!(fitted_slices(&refit) > 0);

        assert!(matches!(
            reanalyze(&config, &dir.path().join("missing.h5"), &refit),
            Err(ProcessorError::HDFReadError(_))
        ));
    }

    #[test]
    fn test_unreadable_run_error_kind() {
        let dir = tempfile::tempdir().unwrap();
        let config = make_config(dir.path(), OutputMode::PerFile);
        write_runs(&config);
        let analyzer = UniformityAnalyzer::new(config.analysis.clone()).unwrap();
        let mut detector = load_detector_map(None).unwrap();
        let (tx, _rx) = channel();
        assert!(matches!(
            process_run(&config, &analyzer, &mut detector, 3, &tx),
            Err(ProcessorError::RecordFileError(RecordFileError::BadMagic(_)))
        ));
    }
}
