use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::trajectory::RawTrajectory;
use super::Action;
use crate::config::PipelineConfig;
use crate::error::{MdpError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum RecorderStatus {
    /// The trajectory was written and more are expected.
    Saved(PathBuf),
    /// Nothing was written: the run was too short to survive trimming, or the quota was
    /// already reached.
    Discarded,
    /// The trajectory was written and it was the last one of the session.
    Complete(PathBuf),
}

/// Collects expert demonstration steps and writes each finished run to `<prefix><N>.csv`.
#[derive(Debug)]
pub struct TrajectoryRecorder {
    dir: PathBuf,
    feature_names: Vec<String>,
    action_column: String,
    prefix: String,
    trim_steps: usize,
    max_trajectories: usize,
    current: RawTrajectory,
    saved: usize,
}

impl TrajectoryRecorder {
    pub fn new<P: AsRef<Path>>(dir: P, config: &PipelineConfig) -> Result<TrajectoryRecorder> {
        config.validate()?;
        fs::create_dir_all(dir.as_ref())?;
        Ok(TrajectoryRecorder {
            dir: dir.as_ref().to_path_buf(),
            feature_names: config.feature_names.clone(),
            action_column: config.action_column.clone(),
            prefix: config.trajectory_prefix.clone(),
            trim_steps: config.trim_steps,
            max_trajectories: config.max_trajectories,
            current: RawTrajectory::default(),
            saved: 0,
        })
    }

    pub fn add_step(&mut self, features: Vec<f64>, action: Action) -> Result<()> {
        if features.len() != self.feature_names.len() {
            return Err(MdpError::FeatureArity {
                expected: self.feature_names.len(),
                found: features.len(),
            });
        }
        self.current.push(features, action);
        Ok(())
    }

    /// Ends the current run. The first and last `trim_steps` observations are dropped since
    /// the sensors have not settled there.
    pub fn finish_trajectory(&mut self) -> Result<RecorderStatus> {
        let run = std::mem::take(&mut self.current);
        if self.is_complete() {
            warn!(steps = run.len(), "trajectory quota reached, discarding run");
            return Ok(RecorderStatus::Discarded);
        }
        if run.len() <= 2 * self.trim_steps {
            warn!(steps = run.len(), trim = self.trim_steps, "run too short, discarding");
            return Ok(RecorderStatus::Discarded);
        }
        let kept = RawTrajectory::new(run.steps()[self.trim_steps..run.len() - self.trim_steps].to_vec());

        let path = self.dir.join(format!("{}{}.csv", self.prefix, self.saved));
        let file = File::create(&path)?;
        kept.write_csv(file, &self.feature_names, &self.action_column)?;
        self.saved += 1;
        info!(path = %path.display(), steps = kept.len(), saved = self.saved, "saved trajectory");

        if self.is_complete() {
            Ok(RecorderStatus::Complete(path))
        } else {
            Ok(RecorderStatus::Saved(path))
        }
    }

    pub fn saved(&self) -> usize {
        self.saved
    }

    pub fn pending_steps(&self) -> usize {
        self.current.len()
    }

    pub fn is_complete(&self) -> bool {
        self.saved >= self.max_trajectories
    }
}
