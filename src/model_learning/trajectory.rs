use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use ndarray::Array1;
use regex::Regex;
use tracing::debug;

use super::registry::{parse_feature_cell, StateId, StateRegistry};
use super::Action;
use crate::error::{DiscretizeError, MdpError, Result};

/// One control tick of a demonstration: what was observed and which action was taken.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub features: Vec<f64>,
    pub action: Action,
}

/// Raw samples of one continuous demonstration run, in recording order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTrajectory {
    steps: Vec<Step>,
}

impl RawTrajectory {
    pub fn new(steps: Vec<Step>) -> RawTrajectory {
        RawTrajectory { steps }
    }

    pub fn push(&mut self, features: Vec<f64>, action: Action) {
        self.steps.push(Step { features, action });
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Reads a trajectory file. Columns are located by name, so extra columns and any column
    /// order are tolerated.
    pub fn read_csv<R: io::Read>(
        reader: R,
        feature_names: &[String],
        action_column: &str,
    ) -> Result<RawTrajectory> {
        let mut rdr = csv::Reader::from_reader(reader);
        let headers = rdr.headers()?.clone();
        let position = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| MdpError::InvalidTable {
                    table: "trajectory".to_string(),
                    reason: format!("missing column '{}'", name),
                })
        };
        let feature_ix = feature_names
            .iter()
            .map(|n| position(n.as_str()))
            .collect::<Result<Vec<usize>>>()?;
        let action_ix = position(action_column)?;

        let mut trajectory = RawTrajectory::default();
        for record in rdr.records() {
            let record = record?;
            let features = feature_ix
                .iter()
                .map(|i| parse_feature_cell(record.get(*i).unwrap_or("")))
                .collect::<Result<Vec<f64>>>()?;
            let action = Action::parse(record.get(action_ix).unwrap_or(""))?;
            trajectory.push(features, action);
        }
        Ok(trajectory)
    }

    pub fn load<P: AsRef<Path>>(
        path: P,
        feature_names: &[String],
        action_column: &str,
    ) -> Result<RawTrajectory> {
        let file = File::open(path)?;
        RawTrajectory::read_csv(file, feature_names, action_column)
    }

    /// Writes one row per step: the features followed by the action index.
    pub fn write_csv<W: io::Write>(
        &self,
        writer: W,
        feature_names: &[String],
        action_column: &str,
    ) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        let mut header: Vec<&str> = feature_names.iter().map(|s| s.as_str()).collect();
        header.push(action_column);
        wtr.write_record(&header)?;
        for step in self.steps.iter() {
            let mut record: Vec<String> = step.features.iter().map(|x| x.to_string()).collect();
            record.push(step.action.index().to_string());
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// A single observed (state, action, next state) step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DiscreteTransition {
    pub state: StateId,
    pub action: Action,
    pub next: StateId,
}

/// A demonstration expressed in registry ids.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteTrajectory {
    pub start: StateId,
    pub terminal: StateId,
    /// Every step of the walk, in order.
    pub transitions: Vec<DiscreteTransition>,
    /// Occurrences of each state as a destination, plus one visit for the start state.
    pub visitation: BTreeMap<StateId, usize>,
}

impl DiscreteTrajectory {
    /// Distinct transitions in sorted order together with how often each occurred.
    pub fn transition_counts(&self) -> Vec<(DiscreteTransition, usize)> {
        self.transitions
            .iter()
            .copied()
            .sorted()
            .dedup_with_count()
            .map(|(count, t)| (t, count))
            .collect()
    }

    /// Visitation frequencies as a dense vector over `n_states` states.
    pub fn visitation_vector(&self, n_states: usize) -> Array1<f64> {
        let mut v = Array1::<f64>::zeros(n_states);
        for (s, count) in self.visitation.iter() {
            if *s < n_states {
                v[*s] += *count as f64;
            }
        }
        v
    }

    pub fn states(&self) -> impl Iterator<Item = StateId> + '_ {
        std::iter::once(self.start).chain(self.transitions.iter().map(|t| t.next))
    }
}

/// Maps every observation of `trajectory` onto `registry` and derives the transition walk.
pub fn discretize(
    trajectory: &RawTrajectory,
    registry: &StateRegistry,
) -> std::result::Result<DiscreteTrajectory, DiscretizeError> {
    if trajectory.is_empty() {
        return Err(DiscretizeError::Empty);
    }
    let ids = trajectory
        .steps()
        .iter()
        .enumerate()
        .map(|(index, step)| {
            registry
                .lookup(&step.features)
                .map_err(|_| DiscretizeError::UnknownState {
                    index,
                    features: step.features.clone(),
                })
        })
        .collect::<std::result::Result<Vec<StateId>, DiscretizeError>>()?;

    let start = ids[0];
    let terminal = ids[ids.len() - 1];
    let transitions: Vec<DiscreteTransition> = ids
        .windows(2)
        .zip(trajectory.steps().iter())
        .map(|(pair, step)| DiscreteTransition {
            state: pair[0],
            action: step.action,
            next: pair[1],
        })
        .collect();

    let mut visitation: BTreeMap<StateId, usize> = BTreeMap::new();
    *visitation.entry(start).or_insert(0) += 1;
    for t in transitions.iter() {
        *visitation.entry(t.next).or_insert(0) += 1;
    }
    debug!(start, terminal, steps = transitions.len(), "discretized trajectory");

    Ok(DiscreteTrajectory {
        start,
        terminal,
        transitions,
        visitation,
    })
}

/// Lists `<prefix><N>.csv` files in `dir`, ordered by `N`. With `skip_first` the lowest
/// numbered run is left out.
pub fn find_trajectory_files<P: AsRef<Path>>(
    dir: P,
    prefix: &str,
    skip_first: bool,
) -> Result<Vec<PathBuf>> {
    let re = Regex::new(&format!(r"^{}(?P<n>[0-9]+)\.csv$", regex::escape(prefix)))
        .map_err(|e| MdpError::InvalidConfig(format!("trajectory prefix: {}", e)))?;
    let mut numbered: Vec<(u64, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        let number = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| re.captures(n))
            .and_then(|c| c["n"].parse::<u64>().ok());
        if let Some(n) = number {
            numbered.push((n, path));
        }
    }
    numbered.sort_by_key(|(n, _)| *n);
    let skip = if skip_first { 1 } else { 0 };
    Ok(numbered.into_iter().skip(skip).map(|(_, p)| p).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_learning::features::FeatureSchema;

    fn registry_5_6_7() -> StateRegistry {
        let mut r = StateRegistry::new(FeatureSchema::intersection());
        for f in [[0.0, 1.0], [0.0, 0.9], [1.0, 0.9], [1.0, 0.8], [0.0, 0.8]].iter() {
            r.add_state(f).unwrap();
        }
        assert_eq!(r.add_state(&[1.0, 0.5]).unwrap(), 5);
        assert_eq!(r.add_state(&[1.0, 0.4]).unwrap(), 6);
        assert_eq!(r.add_state(&[0.0, 0.1]).unwrap(), 7);
        r
    }

    fn trajectory(rows: &[([f64; 2], Action)]) -> RawTrajectory {
        let mut t = RawTrajectory::default();
        for (f, a) in rows.iter() {
            t.push(f.to_vec(), *a);
        }
        t
    }

    #[test]
    fn discretize_walks_consecutive_observations() {
        let registry = registry_5_6_7();
        let raw = trajectory(&[
            ([1.0, 0.5], Action::NoBrake),
            ([1.0, 0.4], Action::Brake),
            ([0.0, 0.1], Action::NoBrake),
        ]);
        let d = discretize(&raw, &registry).unwrap();
        assert_eq!(d.start, 5);
        assert_eq!(d.terminal, 7);
        assert_eq!(
            d.transitions,
            vec![
                DiscreteTransition { state: 5, action: Action::NoBrake, next: 6 },
                DiscreteTransition { state: 6, action: Action::Brake, next: 7 },
            ]
        );
        let expected: BTreeMap<StateId, usize> = vec![(5, 1), (6, 1), (7, 1)].into_iter().collect();
        assert_eq!(d.visitation, expected);
    }

    #[test]
    fn repeated_transitions_are_counted() {
        let registry = registry_5_6_7();
        let raw = trajectory(&[
            ([1.0, 0.5], Action::Brake),
            ([1.0, 0.5], Action::Brake),
            ([1.0, 0.5], Action::NoBrake),
            ([1.0, 0.4], Action::NoBrake),
        ]);
        let d = discretize(&raw, &registry).unwrap();
        assert_eq!(d.transitions.len(), 3);
        let counts = d.transition_counts();
        assert_eq!(
            counts,
            vec![
                (DiscreteTransition { state: 5, action: Action::NoBrake, next: 6 }, 1),
                (DiscreteTransition { state: 5, action: Action::Brake, next: 5 }, 2),
            ]
        );
        // start credited once on top of its two arrivals
        assert_eq!(d.visitation.get(&5), Some(&3));
        assert_eq!(d.visitation.get(&6), Some(&1));
        assert_eq!(d.visitation_vector(8)[5], 3.0);
    }

    #[test]
    fn unknown_observation_reports_position() {
        let registry = registry_5_6_7();
        let raw = trajectory(&[
            ([1.0, 0.5], Action::NoBrake),
            ([1.0, 0.45], Action::NoBrake),
            ([0.0, 0.1], Action::NoBrake),
        ]);
        assert_eq!(
            discretize(&raw, &registry),
            Err(DiscretizeError::UnknownState { index: 1, features: vec![1.0, 0.45] })
        );
        assert_eq!(
            discretize(&RawTrajectory::default(), &registry),
            Err(DiscretizeError::Empty)
        );
    }

    #[test]
    fn single_observation_is_start_and_terminal() {
        let registry = registry_5_6_7();
        let d = discretize(&trajectory(&[([0.0, 0.1], Action::Brake)]), &registry).unwrap();
        assert_eq!((d.start, d.terminal), (7, 7));
        assert!(d.transitions.is_empty());
        assert_eq!(d.visitation.get(&7), Some(&1));
    }

    #[test]
    fn reads_columns_by_name() {
        let names = FeatureSchema::intersection().names().to_vec();
        let text = "performedStop,distanceToGoal,lightIsRed\nTrue,0.5,1\n0.0,0.4,1.0\n";
        let t = RawTrajectory::read_csv(text.as_bytes(), &names, "performedStop").unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.steps()[0].features, vec![1.0, 0.5]);
        assert_eq!(t.steps()[0].action, Action::Brake);
        assert_eq!(t.steps()[1].action, Action::NoBrake);

        let missing = "lightIsRed,performedStop\n1,0\n";
        assert!(RawTrajectory::read_csv(missing.as_bytes(), &names, "performedStop").is_err());
    }

    #[test]
    fn trajectory_files_are_ordered_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for n in [10, 2, 1, 0].iter() {
            std::fs::write(dir.path().join(format!("traj{}.csv", n)), "").unwrap();
        }
        std::fs::write(dir.path().join("stateFeatures.csv"), "").unwrap();
        std::fs::write(dir.path().join("traj_old.csv"), "").unwrap();

        let files = find_trajectory_files(dir.path(), "traj", true).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["traj1.csv", "traj2.csv", "traj10.csv"]);
        assert_eq!(find_trajectory_files(dir.path(), "traj", false).unwrap().len(), 4);
    }
}
