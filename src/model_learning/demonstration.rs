use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use ndarray::{Array1, Array2};
use tracing::{info, warn};

use super::probability::{OverrideTable, ProbabilityTensor, TransitionProbabilityModel};
use super::registry::{StateId, StateRegistry};
use super::relation::TransitionRelation;
use super::reward::LinearReward;
use super::trajectory::{discretize, find_trajectory_files, DiscreteTrajectory, RawTrajectory};
use super::Action;
use crate::config::PipelineConfig;
use crate::error::{DiscretizeError, MdpError, Result};

/// A recorded run that could not be mapped onto the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedTrajectory {
    pub source: String,
    pub error: DiscretizeError,
}

/// Everything the reward learner needs: states, transition probabilities, terminal states
/// and the discretized expert trajectories. Read-only once built.
#[derive(Debug, Clone)]
pub struct Demonstration {
    registry: StateRegistry,
    relation: TransitionRelation,
    tensor: ProbabilityTensor,
    trajectories: Vec<DiscreteTrajectory>,
    terminals: BTreeSet<StateId>,
    skipped: Vec<SkippedTrajectory>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSummary {
    pub states: usize,
    pub supported_pairs: usize,
    pub nonzero_transitions: usize,
    pub trajectories: usize,
    pub terminals: usize,
    pub skipped: usize,
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "states:              {}", self.states)?;
        writeln!(f, "state-action pairs:  {}", self.supported_pairs)?;
        writeln!(f, "nonzero transitions: {}", self.nonzero_transitions)?;
        writeln!(f, "trajectories:        {}", self.trajectories)?;
        writeln!(f, "terminal states:     {}", self.terminals)?;
        write!(f, "skipped files:       {}", self.skipped)
    }
}

impl Demonstration {
    /// Builds the probability tensor and discretizes every named trajectory. Runs that fail
    /// to discretize are logged and kept in [`Demonstration::skipped`].
    pub fn build(
        registry: StateRegistry,
        relation: TransitionRelation,
        model: &TransitionProbabilityModel,
        runs: Vec<(String, RawTrajectory)>,
        absorbing_terminals: bool,
    ) -> Result<Demonstration> {
        let mut tensor = model.build(&relation, registry.len())?;

        let mut trajectories = Vec::with_capacity(runs.len());
        let mut skipped = Vec::new();
        for (source, raw) in runs.into_iter() {
            match discretize(&raw, &registry) {
                Ok(t) => trajectories.push(t),
                Err(error) => {
                    warn!(%source, %error, "skipping trajectory");
                    skipped.push(SkippedTrajectory { source, error });
                }
            }
        }

        let terminals: BTreeSet<StateId> = trajectories.iter().map(|t| t.terminal).collect();
        if absorbing_terminals {
            tensor.make_absorbing(&terminals)?;
        }

        let demonstration = Demonstration {
            registry,
            relation,
            tensor,
            trajectories,
            terminals,
            skipped,
        };
        info!(
            states = demonstration.registry.len(),
            trajectories = demonstration.trajectories.len(),
            terminals = demonstration.terminals.len(),
            skipped = demonstration.skipped.len(),
            "built demonstration"
        );
        Ok(demonstration)
    }

    /// Loads a capture/recording session directory: state table, transition table, optional
    /// override file and the numbered trajectory files.
    pub fn load<P: AsRef<Path>>(dir: P, config: &PipelineConfig) -> Result<Demonstration> {
        config.validate()?;
        let dir = dir.as_ref();
        let registry = StateRegistry::load(config.state_table_path(dir), config.schema()?)?;
        let relation = TransitionRelation::load(config.transition_table_path(dir))?;
        let overrides = match config.override_path(dir) {
            Some(path) => OverrideTable::from_json_file(path)?,
            None => OverrideTable::default(),
        };
        let model = TransitionProbabilityModel::new(overrides);

        let files = find_trajectory_files(dir, &config.trajectory_prefix, config.skip_first_trajectory)?;
        let mut runs = Vec::with_capacity(files.len());
        for path in files.iter() {
            let raw = RawTrajectory::load(path, &config.feature_names, &config.action_column)?;
            runs.push((path.display().to_string(), raw));
        }
        Demonstration::build(registry, relation, &model, runs, config.absorbing_terminals)
    }

    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }

    pub fn relation(&self) -> &TransitionRelation {
        &self.relation
    }

    pub fn tensor(&self) -> &ProbabilityTensor {
        &self.tensor
    }

    pub fn trajectories(&self) -> &[DiscreteTrajectory] {
        &self.trajectories
    }

    pub fn skipped(&self) -> &[SkippedTrajectory] {
        &self.skipped
    }

    /// State by feature matrix, one row per state id.
    pub fn feature_matrix(&self) -> Array2<f64> {
        self.registry.feature_matrix()
    }

    /// Visitation counts summed over every trajectory.
    pub fn visitation_frequencies(&self) -> Array1<f64> {
        let n = self.registry.len();
        self.trajectories
            .iter()
            .fold(Array1::zeros(n), |acc, t| acc + t.visitation_vector(n))
    }

    /// Union of the terminal states of all trajectories.
    pub fn terminal_states(&self) -> &BTreeSet<StateId> {
        &self.terminals
    }

    /// Expected reward of the next state: sum over s' of P[s, a, s'] * reward[s'].
    pub fn state_action_value(&self, state: StateId, action: Action, reward: &[f64]) -> Result<f64> {
        if reward.len() != self.tensor.n_states() {
            return Err(MdpError::RewardDimension {
                expected: self.tensor.n_states(),
                found: reward.len(),
            });
        }
        if let Some((s, r)) = reward.iter().enumerate().find(|(_, r)| !r.is_finite()) {
            return Err(MdpError::NonFiniteReward { state: s, value: *r });
        }
        if !self.registry.contains(state) {
            return Err(MdpError::UnknownStateId(state));
        }
        if !self.tensor.has_support(state, action) {
            return Err(MdpError::NoTransitionData { state, action });
        }
        Ok(self
            .tensor
            .outcomes(state, action)
            .iter()
            .map(|(next, p)| p * reward[*next])
            .sum())
    }

    /// Values of the candidates that have transition data, in candidate order. Candidates
    /// without data are left out.
    pub fn action_values(
        &self,
        state: StateId,
        candidates: &[Action],
        reward: &[f64],
    ) -> Result<Vec<(Action, f64)>> {
        let mut values = Vec::with_capacity(candidates.len());
        for action in candidates.iter() {
            match self.state_action_value(state, *action, reward) {
                Ok(v) => values.push((*action, v)),
                Err(MdpError::NoTransitionData { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(values)
    }

    /// Candidate with the highest value; ties go to the earlier candidate. Every candidate
    /// must have transition data in `state`.
    pub fn best_action(&self, state: StateId, candidates: &[Action], reward: &[f64]) -> Result<Action> {
        let (first, rest) = candidates.split_first().ok_or(MdpError::NoCandidateActions)?;
        let mut best = (*first, self.state_action_value(state, *first, reward)?);
        for action in rest.iter() {
            let value = self.state_action_value(state, *action, reward)?;
            if value > best.1 {
                best = (*action, value);
            }
        }
        Ok(best.0)
    }

    /// Inference-time query: resolves raw features to a state and picks the best action under
    /// a linear feature reward.
    pub fn best_action_for_features(
        &self,
        features: &[f64],
        candidates: &[Action],
        reward: &LinearReward,
    ) -> Result<Action> {
        let state = self.registry.lookup(features)?;
        let rewards = reward.state_rewards(&self.registry)?;
        let rewards: Vec<f64> = rewards.to_vec();
        self.best_action(state, candidates, &rewards)
    }

    /// Terminal states that no trajectory start reaches through observed transitions.
    pub fn unreachable_terminals(&self) -> BTreeSet<StateId> {
        let starts: BTreeSet<StateId> = self.trajectories.iter().map(|t| t.start).collect();
        let reached = self.relation.reachable_from(&starts);
        self.terminals.difference(&reached).copied().collect()
    }

    pub fn summary(&self) -> ModelSummary {
        let supported_pairs = (0..self.tensor.n_states())
            .flat_map(|s| Action::ALL.iter().map(move |a| (s, *a)))
            .filter(|(s, a)| self.tensor.has_support(*s, *a))
            .count();
        ModelSummary {
            states: self.registry.len(),
            supported_pairs,
            nonzero_transitions: self.tensor.nonzero_count(),
            trajectories: self.trajectories.len(),
            terminals: self.terminals.len(),
            skipped: self.skipped.len(),
        }
    }
}
