//! Empirical MDP construction for learning a driver's braking reward at an intersection.
//!
//! A capture session explores the simulator with repeated controlled trials and produces a
//! state table and a transition table. Expert runs are recorded as trajectory files. A
//! [`Demonstration`] loads all of that, estimates transition probabilities (with optional
//! hand-specified overrides) and answers value queries for a learned reward.

pub mod config;
pub mod error;
pub mod model_learning;

pub use config::PipelineConfig;
pub use error::{DiscretizeError, MdpError, Result};
pub use model_learning::capture::{CaptureSession, CaptureSettings, CaptureStatus, Simulator};
pub use model_learning::demonstration::{Demonstration, ModelSummary, SkippedTrajectory};
pub use model_learning::features::FeatureSchema;
pub use model_learning::probability::{
    OverrideTable, ProbabilityOverride, ProbabilityTensor, TransitionProbabilityModel,
    PROBABILITY_TOLERANCE,
};
pub use model_learning::recorder::{RecorderStatus, TrajectoryRecorder};
pub use model_learning::registry::{StateId, StateRegistry};
pub use model_learning::relation::{StateAction, TransitionRelation};
pub use model_learning::reward::LinearReward;
pub use model_learning::trajectory::{discretize, DiscreteTrajectory, RawTrajectory};
pub use model_learning::Action;
