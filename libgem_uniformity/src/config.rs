use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::analyzer::AnalysisSetup;
use super::constants::RECORD_FILE_EXTENSION;
use super::error::ConfigError;
use super::record::{ClusterSelection, HitSelection};

/// How results are produced when processing more than one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Accumulate every run into a single result
    #[default]
    Aggregate,
    /// One independent result per run
    PerFile,
}

/// Which parts of the analysis to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSteps {
    pub hits: bool,
    pub clusters: bool,
    pub fitting: bool,
}

impl Default for AnalysisSteps {
    fn default() -> Self {
        Self {
            hits: true,
            clusters: true,
            fitting: true,
        }
    }
}

/// Structure representing the application configuration. Contains pathing, run information
/// and the analysis setup.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub detector_map_path: Option<PathBuf>,
    pub first_run_number: i32,
    pub last_run_number: i32,
    pub mode: OutputMode,
    pub steps: AnalysisSteps,
    pub cluster_selection: ClusterSelection,
    pub hit_selection: HitSelection,
    pub analysis: AnalysisSetup,
}

impl Default for Config {
    /// Generate a new Config object. Paths will be empty/invalid
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("None"),
            output_path: PathBuf::from("None"),
            detector_map_path: None,
            first_run_number: 0,
            last_run_number: 0,
            mode: OutputMode::default(),
            steps: AnalysisSteps::default(),
            cluster_selection: ClusterSelection::default(),
            hit_selection: HitSelection::default(),
            analysis: AnalysisSetup::default(),
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    /// Check the configuration can be used for an analysis
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.first_run_number > self.last_run_number {
            return Err(ConfigError::BadRunRange(
                self.first_run_number,
                self.last_run_number,
            ));
        }
        if self.steps.fitting && !self.steps.clusters {
            return Err(ConfigError::FittingWithoutClusters);
        }
        self.analysis.validate()
    }

    /// Check if a specific run exists
    pub fn does_run_exist(&self, run_number: i32) -> bool {
        self.get_input_file_name(run_number).exists()
    }

    /// Get the path to a run's record file
    pub fn get_input_file_name(&self, run_number: i32) -> PathBuf {
        self.input_path.join(format!(
            "{}.{}",
            self.get_run_str(run_number),
            RECORD_FILE_EXTENSION
        ))
    }

    /// Get the path to an output hdf5 file. In aggregate mode the run number is ignored
    /// and the file is named for the run range.
    pub fn get_output_file_name(&self, run_number: i32) -> Result<PathBuf, ConfigError> {
        if !self.output_path.exists() {
            return Err(ConfigError::BadFilePath(self.output_path.clone()));
        }
        let name = match self.mode {
            OutputMode::PerFile => format!("{}_uniformity.h5", self.get_run_str(run_number)),
            OutputMode::Aggregate => format!(
                "{}_{}_uniformity.h5",
                self.get_run_str(self.first_run_number),
                self.last_run_number
            ),
        };
        Ok(self.output_path.join(name))
    }

    /// Construct the run string
    fn get_run_str(&self, run_number: i32) -> String {
        format!("run_{run_number:0>4}")
    }

    pub fn n_runs(&self) -> usize {
        (self.last_run_number - self.first_run_number + 1).max(0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitter::ParamMeaning;

    #[test]
    fn test_default_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        let config = Config::default();
        config.write_config_file(&path).unwrap();
        let read = Config::read_config_file(&path).unwrap();
        assert_eq!(config, read);
        assert!(read.validate().is_ok());
    }

    #[test]
    fn test_missing_config() {
        assert!(matches!(
            Config::read_config_file(Path::new("/not/a/config.yml")),
            Err(ConfigError::BadFilePath(_))
        ));
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.analysis.granularity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadGranularity(0))
        ));

        let mut config = Config {
            first_run_number: 5,
            last_run_number: 2,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::BadRunRange(5, 2))));

        config.last_run_number = 6;
        config.analysis.fit.param_meanings = vec![ParamMeaning::Other; 3];
        assert!(matches!(config.validate(), Err(ConfigError::BadFitSetup(_))));

        let mut config = Config::default();
        config.analysis.hit_adc.n_bins = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadHistoSetup(_, _))
        ));
    }

    #[test]
    fn test_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config {
            input_path: PathBuf::from("/data"),
            output_path: dir.path().to_path_buf(),
            first_run_number: 3,
            last_run_number: 12,
            ..Default::default()
        };
        assert_eq!(
            config.get_input_file_name(7),
            PathBuf::from("/data/run_0007.gemrec")
        );
        assert_eq!(
            config.get_output_file_name(7).unwrap(),
            dir.path().join("run_0003_12_uniformity.h5")
        );
        config.mode = OutputMode::PerFile;
        assert_eq!(
            config.get_output_file_name(7).unwrap(),
            dir.path().join("run_0007_uniformity.h5")
        );
        assert_eq!(config.n_runs(), 10);
    }
}
