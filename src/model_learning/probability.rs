use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use ndarray::{s, Array3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::registry::StateId;
use super::relation::{StateAction, TransitionRelation};
use super::Action;
use crate::error::{MdpError, Result};

/// Allowed deviation of an override group, or a tensor row, from a total of one.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// One designed outcome probability `p` for the triple (`s`, `a`, `s_prime`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityOverride {
    pub s: StateId,
    pub a: usize,
    pub s_prime: StateId,
    pub p: f64,
}

/// Validated override groups keyed by (state, action). Each group is a complete distribution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideTable {
    groups: BTreeMap<StateAction, BTreeMap<StateId, f64>>,
}

impl OverrideTable {
    pub fn new(entries: &[ProbabilityOverride]) -> Result<OverrideTable> {
        let mut groups: BTreeMap<StateAction, BTreeMap<StateId, f64>> = BTreeMap::new();
        for e in entries.iter() {
            if !(e.p.is_finite() && (0.0..=1.0).contains(&e.p)) {
                return Err(MdpError::InvalidOverride(format!(
                    "probability {} for ({}, {}, {}) is outside [0, 1]",
                    e.p, e.s, e.a, e.s_prime
                )));
            }
            let action = Action::from_index(e.a).map_err(|_| {
                MdpError::InvalidOverride(format!("unknown action {} for state {}", e.a, e.s))
            })?;
            let group = groups
                .entry(StateAction::new(e.s, action))
                .or_insert_with(BTreeMap::new);
            if group.insert(e.s_prime, e.p).is_some() {
                return Err(MdpError::InvalidOverride(format!(
                    "duplicate entry for ({}, {}, {})",
                    e.s, e.a, e.s_prime
                )));
            }
        }
        for (key, group) in groups.iter() {
            let total: f64 = group.values().sum();
            if (total - 1.0).abs() > PROBABILITY_TOLERANCE {
                return Err(MdpError::InvalidOverride(format!(
                    "probabilities for state {} under action {} sum to {}",
                    key.state, key.action, total
                )));
            }
        }
        Ok(OverrideTable { groups })
    }

    pub fn from_json_reader<R: io::Read>(reader: R) -> Result<OverrideTable> {
        let entries: Vec<ProbabilityOverride> = serde_json::from_reader(reader)?;
        OverrideTable::new(&entries)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<OverrideTable> {
        let file = File::open(path)?;
        OverrideTable::from_json_reader(BufReader::new(file))
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of (state, action) groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn group(&self, state: StateId, action: Action) -> Option<&BTreeMap<StateId, f64>> {
        self.groups.get(&StateAction::new(state, action))
    }

    /// Fails if any override mentions a state outside `0..n_states`.
    pub fn check_bounds(&self, n_states: usize) -> Result<()> {
        for (key, group) in self.groups.iter() {
            let out_of_range = std::iter::once(&key.state)
                .chain(group.keys())
                .find(|s| **s >= n_states);
            if let Some(s) = out_of_range {
                return Err(MdpError::InvalidOverride(format!(
                    "state {} is outside the {} known states",
                    s, n_states
                )));
            }
        }
        Ok(())
    }
}

/// Dense transition probabilities indexed `[state, action, next_state]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityTensor {
    p: Array3<f64>,
}

impl ProbabilityTensor {
    pub fn zeros(n_states: usize) -> ProbabilityTensor {
        ProbabilityTensor {
            p: Array3::zeros((n_states, Action::COUNT, n_states)),
        }
    }

    pub fn n_states(&self) -> usize {
        self.p.shape()[0]
    }

    pub fn n_actions(&self) -> usize {
        self.p.shape()[1]
    }

    pub fn as_array(&self) -> &Array3<f64> {
        &self.p
    }

    pub fn probability(&self, state: StateId, action: Action, next: StateId) -> f64 {
        self.p
            .get((state, action.index(), next))
            .copied()
            .unwrap_or(0.0)
    }

    /// Outcomes of (`state`, `action`) with non-zero probability, in id order.
    pub fn outcomes(&self, state: StateId, action: Action) -> Vec<(StateId, f64)> {
        if state >= self.n_states() {
            return Vec::new();
        }
        self.p
            .slice(s![state, action.index(), ..])
            .iter()
            .enumerate()
            .filter(|(_, p)| **p > 0.0)
            .map(|(next, p)| (next, *p))
            .collect()
    }

    pub fn row_sum(&self, state: StateId, action: Action) -> f64 {
        if state >= self.n_states() {
            return 0.0;
        }
        self.p.slice(s![state, action.index(), ..]).sum()
    }

    pub fn has_support(&self, state: StateId, action: Action) -> bool {
        self.row_sum(state, action) > 0.0
    }

    pub fn nonzero_count(&self) -> usize {
        self.p.iter().filter(|x| **x > 0.0).count()
    }

    /// Every supported (state, action) row must sum to one within `eps`.
    pub fn check_normalized(&self, eps: f64) -> Result<()> {
        for state in 0..self.n_states() {
            for action in Action::ALL.iter() {
                let total = self.row_sum(state, *action);
                if total > 0.0 && (total - 1.0).abs() > eps {
                    return Err(MdpError::InvalidTable {
                        table: "probability".to_string(),
                        reason: format!(
                            "row for state {} under action {} sums to {}",
                            state, action, total
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    /// Makes every state in `terminals` absorbing: under each action it stays put with
    /// probability one.
    pub fn make_absorbing(&mut self, terminals: &BTreeSet<StateId>) -> Result<()> {
        for t in terminals.iter() {
            if *t >= self.n_states() {
                return Err(MdpError::UnknownStateId(*t));
            }
            for action in Action::ALL.iter() {
                let mut row = self.p.slice_mut(s![*t, action.index(), ..]);
                row.fill(0.0);
                row[*t] = 1.0;
            }
        }
        debug!(terminals = terminals.len(), "made terminal states absorbing");
        Ok(())
    }

    fn set_uniform(&mut self, key: &StateAction, outcomes: &BTreeSet<StateId>) {
        let p = 1.0 / outcomes.len() as f64;
        for next in outcomes.iter() {
            self.p[[key.state, key.action.index(), *next]] = p;
        }
    }
}

/// Converts an observed transition relation into a probability tensor: every observed outcome
/// of a (state, action) pair is equally likely unless an override group defines the pair.
#[derive(Debug, Clone, Default)]
pub struct TransitionProbabilityModel {
    overrides: OverrideTable,
}

impl TransitionProbabilityModel {
    pub fn new(overrides: OverrideTable) -> TransitionProbabilityModel {
        TransitionProbabilityModel { overrides }
    }

    pub fn overrides(&self) -> &OverrideTable {
        &self.overrides
    }

    pub fn build(&self, relation: &TransitionRelation, n_states: usize) -> Result<ProbabilityTensor> {
        if let Some(m) = relation.max_state_id() {
            if m >= n_states {
                return Err(MdpError::UnknownStateId(m));
            }
        }
        self.overrides.check_bounds(n_states)?;

        let mut tensor = ProbabilityTensor::zeros(n_states);
        for (key, outcomes) in relation.iter() {
            tensor.set_uniform(key, outcomes);
        }
        self.apply_overrides(relation, &mut tensor)?;
        info!(
            states = n_states,
            pairs = relation.len(),
            overrides = self.overrides.len(),
            nonzero = tensor.nonzero_count(),
            "built transition probabilities"
        );
        Ok(tensor)
    }

    /// Replaces the row of every overridden (state, action) with its override group. Observed
    /// outcomes missing from a group end up with probability zero. Reapplying is a no-op.
    pub fn apply_overrides(
        &self,
        relation: &TransitionRelation,
        tensor: &mut ProbabilityTensor,
    ) -> Result<()> {
        self.overrides.check_bounds(tensor.n_states())?;
        for (key, group) in self.overrides.groups.iter() {
            if let Some(observed) = relation.outcomes(key.state, key.action) {
                let dropped: Vec<&StateId> =
                    observed.iter().filter(|s| !group.contains_key(s)).collect();
                if !dropped.is_empty() {
                    warn!(
                        state = key.state,
                        action = %key.action,
                        dropped = ?dropped,
                        "override group omits observed outcomes"
                    );
                }
            }
            let mut row = tensor.p.slice_mut(s![key.state, key.action.index(), ..]);
            row.fill(0.0);
            for (next, p) in group.iter() {
                row[*next] = *p;
            }
            debug!(state = key.state, action = %key.action, "applied override group");
        }
        Ok(())
    }
}
