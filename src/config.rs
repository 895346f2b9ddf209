//! Settings shared by the capture, recording and model building stages. Every field has a
//! default matching the intersection experiment, so a config file only lists what differs.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MdpError, Result};
use crate::model_learning::features::FeatureSchema;

pub const DEFAULT_MAX_ROUNDS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Feature columns, in the order the simulator produces them.
    pub feature_names: Vec<String>,
    /// Column of a trajectory file holding the brake flag.
    pub action_column: String,
    /// Grid that features are rounded to before they are matched; `None` matches exactly.
    pub feature_resolution: Option<f64>,
    pub state_table: String,
    pub transition_table: String,
    pub trajectory_prefix: String,
    /// The lowest numbered trajectory of a session is recorded before the run has settled.
    pub skip_first_trajectory: bool,
    /// Rows dropped at each end of a recorded trajectory.
    pub trim_steps: usize,
    pub max_trajectories: usize,
    pub trials_per_action: usize,
    /// The first trial of every capture batch is not recorded.
    pub discard_first_trial: bool,
    /// Capture rounds before giving up on reaching the goal. `None` runs until the goal.
    pub max_rounds: Option<usize>,
    pub absorbing_terminals: bool,
    pub override_file: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> PipelineConfig {
        PipelineConfig {
            feature_names: vec!["lightIsRed".to_string(), "distanceToGoal".to_string()],
            action_column: "performedStop".to_string(),
            feature_resolution: Some(0.001),
            state_table: "stateFeatures.csv".to_string(),
            transition_table: "stateTransitions.csv".to_string(),
            trajectory_prefix: "traj".to_string(),
            skip_first_trajectory: true,
            trim_steps: 3,
            max_trajectories: 30,
            trials_per_action: 250,
            discard_first_trial: true,
            max_rounds: Some(DEFAULT_MAX_ROUNDS),
            absorbing_terminals: true,
            override_file: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
        let file = File::open(path)?;
        let config: PipelineConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.schema()?;
        if self.action_column.is_empty() || self.feature_names.contains(&self.action_column) {
            return Err(MdpError::InvalidConfig(format!(
                "action column '{}' must be a distinct, non-empty name",
                self.action_column
            )));
        }
        let min_trials = if self.discard_first_trial { 2 } else { 1 };
        if self.trials_per_action < min_trials {
            return Err(MdpError::InvalidConfig(format!(
                "at least {} trials per action are needed",
                min_trials
            )));
        }
        if self.max_rounds == Some(0) {
            return Err(MdpError::InvalidConfig("max_rounds must be positive".to_string()));
        }
        if self.max_trajectories == 0 {
            return Err(MdpError::InvalidConfig("max_trajectories must be positive".to_string()));
        }
        Ok(())
    }

    pub fn schema(&self) -> Result<FeatureSchema> {
        FeatureSchema::new(self.feature_names.clone(), self.feature_resolution)
    }

    pub fn state_table_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.state_table)
    }

    pub fn transition_table_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.transition_table)
    }

    /// A relative override file is resolved against the session directory.
    pub fn override_path(&self, dir: &Path) -> Option<PathBuf> {
        self.override_file.as_ref().map(|p| dir.join(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "trim_steps": 5, "feature_resolution": null }"#).unwrap();
        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.trim_steps, 5);
        assert_eq!(config.feature_resolution, None);
        assert_eq!(config.trials_per_action, 250);
        assert_eq!(config.max_rounds, Some(DEFAULT_MAX_ROUNDS));
        assert_eq!(config.schema().unwrap().arity(), 2);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "trials_per_action": 1 }"#).unwrap();
        assert!(PipelineConfig::from_json_file(&path).is_err());
        std::fs::write(&path, r#"{ "feature_names": [] }"#).unwrap();
        assert!(PipelineConfig::from_json_file(&path).is_err());
        std::fs::write(&path, r#"{ "max_rounds": 0 }"#).unwrap();
        assert!(PipelineConfig::from_json_file(&path).is_err());
        std::fs::write(&path, r#"{ "unknown": 1 }"#).unwrap();
        assert!(PipelineConfig::from_json_file(&path).is_err());

        let mut config = PipelineConfig::default();
        config.action_column = "lightIsRed".to_string();
        assert!(config.validate().is_err());
    }
}
