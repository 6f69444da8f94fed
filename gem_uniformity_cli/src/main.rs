use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::path::PathBuf;
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use libgem_uniformity::config::Config;
use libgem_uniformity::process::{process, reanalyze};
use libgem_uniformity::worker_status::Stage;

/// Point the library's spdlog output at a log file
fn init_file_logging() -> Result<(), spdlog::Error> {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from("./gem_uniformity.log"))
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(true)
            .build()?,
    );
    let logger = Arc::new(
        spdlog::Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .build()?,
    );
    spdlog::set_default_logger(logger);
    Ok(())
}

fn stage_name(stage: Stage) -> &'static str {
    match stage {
        Stage::Filling => "Filling",
        Stage::Fitting => "Fitting",
        Stage::Writing => "Writing",
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("gem_uniformity_cli")
        .about("Response uniformity analysis of GEM detectors")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(
            Command::new("reanalyze")
                .about("Refit a previously written output with the current configuration")
                .arg(
                    Arg::new("input")
                        .short('i')
                        .long("input")
                        .required(true)
                        .help("Path to the existing output file"),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .required(true)
                        .help("Path to the new output file"),
                ),
        )
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the configuration file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    if let Err(e) = init_file_logging() {
        log::warn!("Could not create the log file, library logs will go to the terminal: {e}");
    }

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        match Config::default().write_config_file(&config_path) {
            Ok(()) => log::info!("Done."),
            Err(e) => log::error!("{e}"),
        }
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");

    if let Some(("reanalyze", sub)) = matches.subcommand() {
        let input = PathBuf::from(sub.get_one::<String>("input").expect("We require args"));
        let output = PathBuf::from(sub.get_one::<String>("output").expect("We require args"));
        log::info!(
            "Reanalyzing {} into {}...",
            input.to_string_lossy(),
            output.to_string_lossy()
        );
        match reanalyze(&config, &input, &output) {
            Ok(()) => log::info!("Done."),
            Err(e) => log::error!("Reanalysis failed with error: {e}"),
        }
        return;
    }

    log::info!("Input Path: {}", config.input_path.to_string_lossy());
    log::info!("Output Path: {}", config.output_path.to_string_lossy());
    match &config.detector_map_path {
        Some(path) => log::info!("Detector Map Path: {}", path.to_string_lossy()),
        None => log::info!("Detector Map Path: default"),
    }
    log::info!(
        "First Run: {} Last Run: {}",
        config.first_run_number,
        config.last_run_number
    );
    log::info!("Mode: {:?}", config.mode);
    log::info!("Granularity: {}", config.analysis.granularity);

    // Setup the progress bar
    let pb = pb_manager.add(ProgressBar::new(100));
    if let Ok(style) = ProgressStyle::with_template("{msg:>16} [{bar:40}] {pos:>3}%") {
        pb.set_style(style);
    }
    let (tx, rx) = channel();
    // Spawn the task!
    let handle = std::thread::spawn(move || process(config, tx));

    loop {
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(status) => {
                pb.set_message(format!(
                    "Run {} {}",
                    status.run_number,
                    stage_name(status.stage)
                ));
                pb.set_position((status.progress * 100.0) as u64);
            }
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    match handle.join() {
        Ok(result) => match result {
            Ok(_) => log::info!("Successfully analyzed data!"),
            Err(e) => log::error!("Analysis failed with error: {e}"),
        },
        Err(_) => log::error!("Failed to join analysis task!"),
    }

    pb.finish();

    log::info!("Done.");
}
