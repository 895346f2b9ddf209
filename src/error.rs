//! Error types for model construction, persistence and queries.

use thiserror::Error;

use crate::model_learning::registry::StateId;
use crate::model_learning::Action;

pub type Result<T> = std::result::Result<T, MdpError>;

/// Failures while mapping a recorded trajectory onto the state registry.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DiscretizeError {
    #[error("trajectory has no observations")]
    Empty,

    /// An observation did not resolve to any known state.
    #[error("observation {index} with features {features:?} is not a known state")]
    UnknownState { index: usize, features: Vec<f64> },
}

#[derive(Debug, Error)]
pub enum MdpError {
    #[error("no state matches features {0:?}")]
    StateNotFound(Vec<f64>),

    #[error("state {0} is not in the registry")]
    UnknownStateId(StateId),

    #[error("expected {expected} feature values, got {found}")]
    FeatureArity { expected: usize, found: usize },

    #[error("feature '{name}' has non-finite value {value}")]
    NonFiniteFeature { name: String, value: f64 },

    #[error("no transition data for state {state} under action {action}")]
    NoTransitionData { state: StateId, action: Action },

    #[error("no candidate actions supplied")]
    NoCandidateActions,

    #[error("unknown action index {0}")]
    UnknownAction(usize),

    #[error("invalid action value '{0}'")]
    InvalidActionValue(String),

    #[error("invalid override table: {0}")]
    InvalidOverride(String),

    #[error("malformed transition set '{0}'")]
    MalformedTransitionSet(String),

    #[error("malformed state-action key '{0}'")]
    MalformedKey(String),

    #[error("invalid table '{table}': {reason}")]
    InvalidTable { table: String, reason: String },

    #[error("reward vector has {found} entries for {expected} states")]
    RewardDimension { expected: usize, found: usize },

    #[error("reward for state {state} is not finite: {value}")]
    NonFiniteReward { state: StateId, value: f64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("simulator error: {0}")]
    Simulator(String),

    #[error(transparent)]
    Discretize(#[from] DiscretizeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
