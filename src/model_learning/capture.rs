use std::collections::BTreeSet;
use std::mem;
use std::path::Path;

use tracing::{debug, info};

use super::registry::{StateId, StateRegistry};
use super::relation::TransitionRelation;
use super::Action;
use crate::config::PipelineConfig;
use crate::error::Result;

/// The driving simulator as seen by the capture loop. Implementations advance the world by
/// exactly one control tick per `step`.
pub trait Simulator {
    /// Everything needed to put the vehicle back where a batch of trials started.
    type Configuration: Clone;

    fn observe(&mut self) -> Result<Vec<f64>>;

    fn snapshot(&self) -> Self::Configuration;

    fn restore(&mut self, configuration: &Self::Configuration) -> Result<()>;

    /// Applies `action` for one tick and returns the features observed afterwards.
    fn step(&mut self, action: Action) -> Result<Vec<f64>>;

    fn reached_goal(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    Continue,
    GoalReached,
    QuotaReached,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    pub trials_per_action: usize,
    pub discard_first_trial: bool,
    pub max_rounds: Option<usize>,
}

impl CaptureSettings {
    pub fn from_config(config: &PipelineConfig) -> CaptureSettings {
        CaptureSettings {
            trials_per_action: config.trials_per_action,
            discard_first_trial: config.discard_first_trial,
            max_rounds: config.max_rounds,
        }
    }
}

/// Builds the transition relation by repeated controlled trials.
///
/// Each round starts from one vehicle configuration. For every action in
/// [`Action::CAPTURE_ORDER`] the configuration is restored before each trial, the action is
/// applied and the outcome state collected. Finalizing an action links every frontier state
/// to every collected outcome and the outcomes become the frontier of the next action, so
/// the brake outcomes are the sources of the no-brake edges, and the no-brake outcomes carry
/// into the next round.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    registry: StateRegistry,
    relation: TransitionRelation,
    frontier: BTreeSet<StateId>,
    next: BTreeSet<StateId>,
    settings: CaptureSettings,
    rounds: usize,
}

impl CaptureSession {
    pub fn new(registry: StateRegistry, settings: CaptureSettings) -> CaptureSession {
        CaptureSession {
            registry,
            relation: TransitionRelation::new(),
            frontier: BTreeSet::new(),
            next: BTreeSet::new(),
            settings,
            rounds: 0,
        }
    }

    /// Resets the frontier to the single state observed at the starting configuration.
    pub fn start(&mut self, features: &[f64]) -> Result<StateId> {
        let id = self.registry.add_state(features)?;
        self.frontier.clear();
        self.frontier.insert(id);
        self.next.clear();
        Ok(id)
    }

    pub fn observe_outcome(&mut self, features: &[f64]) -> Result<StateId> {
        let id = self.registry.add_state(features)?;
        self.next.insert(id);
        Ok(id)
    }

    /// Records (s, `action`, s') for every frontier state s and collected outcome s', then
    /// advances the frontier to the outcomes. Returns the number of new edges.
    pub fn finalize(&mut self, action: Action) -> usize {
        let mut added = 0;
        for s in self.frontier.iter() {
            for n in self.next.iter() {
                if self.relation.record(*s, action, *n) {
                    added += 1;
                }
            }
        }
        debug!(
            %action,
            frontier = ?self.frontier,
            outcomes = ?self.next,
            added,
            "finalized action"
        );
        if !self.next.is_empty() {
            self.frontier = mem::take(&mut self.next);
        }
        added
    }

    /// Runs one capture round from `configuration`.
    pub fn run_round<S: Simulator>(
        &mut self,
        sim: &mut S,
        configuration: &S::Configuration,
    ) -> Result<CaptureStatus> {
        if self.frontier.is_empty() {
            sim.restore(configuration)?;
            let features = sim.observe()?;
            self.start(&features)?;
        }
        for action in Action::CAPTURE_ORDER.iter() {
            for trial in 0..self.settings.trials_per_action {
                sim.restore(configuration)?;
                let features = sim.step(*action)?;
                if trial == 0 && self.settings.discard_first_trial {
                    continue;
                }
                self.observe_outcome(&features)?;
            }
            self.finalize(*action);
        }
        self.rounds += 1;
        info!(
            round = self.rounds,
            states = self.registry.len(),
            pairs = self.relation.len(),
            "capture round complete"
        );

        if sim.reached_goal() {
            return Ok(CaptureStatus::GoalReached);
        }
        match self.settings.max_rounds {
            Some(max) if self.rounds >= max => Ok(CaptureStatus::QuotaReached),
            _ => Ok(CaptureStatus::Continue),
        }
    }

    /// Runs rounds until the vehicle reaches its goal or the round quota is used up. Each
    /// round starts from wherever the previous one left the vehicle. Without a quota
    /// (`max_rounds: None`) this only returns once the simulator reports the goal.
    pub fn run<S: Simulator>(&mut self, sim: &mut S) -> Result<CaptureStatus> {
        loop {
            let configuration = sim.snapshot();
            let status = self.run_round(sim, &configuration)?;
            if status != CaptureStatus::Continue {
                info!(?status, rounds = self.rounds, "capture finished");
                return Ok(status);
            }
        }
    }

    /// Writes the state and transition tables into `dir`.
    pub fn persist(&self, dir: &Path, config: &PipelineConfig) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        self.registry.save(config.state_table_path(dir))?;
        self.relation.save(config.transition_table_path(dir))?;
        Ok(())
    }

    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }

    pub fn relation(&self) -> &TransitionRelation {
        &self.relation
    }

    pub fn frontier(&self) -> &BTreeSet<StateId> {
        &self.frontier
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn into_parts(self) -> (StateRegistry, TransitionRelation) {
        (self.registry, self.relation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_learning::features::FeatureSchema;
    use crate::model_learning::probability::{TransitionProbabilityModel, PROBABILITY_TOLERANCE};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Straight road towards a goal. Braking keeps the vehicle in place, driving moves it a
    /// quarter of the way. The light reading flickers to red with probability `flicker`.
    struct Road {
        distance: f64,
        red: bool,
        flicker: f64,
        rng: StdRng,
    }

    impl Road {
        fn new(flicker: f64) -> Road {
            Road {
                distance: 1.0,
                red: false,
                flicker,
                rng: StdRng::seed_from_u64(7),
            }
        }

        fn features(&self) -> Vec<f64> {
            vec![if self.red { 1.0 } else { 0.0 }, self.distance]
        }
    }

    impl Simulator for Road {
        type Configuration = f64;

        fn observe(&mut self) -> Result<Vec<f64>> {
            Ok(self.features())
        }

        fn snapshot(&self) -> f64 {
            self.distance
        }

        fn restore(&mut self, configuration: &f64) -> Result<()> {
            self.distance = *configuration;
            self.red = false;
            Ok(())
        }

        fn step(&mut self, action: Action) -> Result<Vec<f64>> {
            if action == Action::NoBrake {
                self.distance = (self.distance - 0.25).max(0.0);
            }
            self.red = self.flicker > 0.0 && self.rng.gen_bool(self.flicker);
            Ok(self.features())
        }

        fn reached_goal(&self) -> bool {
            self.distance <= 0.0
        }
    }

    fn settings(trials: usize, max_rounds: Option<usize>) -> CaptureSettings {
        CaptureSettings {
            trials_per_action: trials,
            discard_first_trial: true,
            max_rounds,
        }
    }

    fn session(trials: usize, max_rounds: Option<usize>) -> CaptureSession {
        CaptureSession::new(
            StateRegistry::new(FeatureSchema::intersection()),
            settings(trials, max_rounds),
        )
    }

    #[test]
    fn outcomes_of_one_action_are_sources_of_the_next() {
        let mut s = session(2, None);
        s.start(&[0.0, 1.0]).unwrap();
        s.observe_outcome(&[0.0, 1.0]).unwrap();
        s.observe_outcome(&[1.0, 1.0]).unwrap();
        assert_eq!(s.finalize(Action::Brake), 2);
        s.observe_outcome(&[0.0, 0.75]).unwrap();
        assert_eq!(s.finalize(Action::NoBrake), 2);

        let r = s.relation();
        assert_eq!(r.outcomes(0, Action::Brake).unwrap().len(), 2);
        assert!(r.outcomes(0, Action::NoBrake).unwrap().contains(&2));
        assert!(r.outcomes(1, Action::NoBrake).unwrap().contains(&2));
        let frontier: Vec<StateId> = s.frontier().iter().copied().collect();
        assert_eq!(frontier, vec![2]);
    }

    #[test]
    fn finalize_without_outcomes_keeps_frontier() {
        let mut s = session(2, None);
        s.start(&[0.0, 1.0]).unwrap();
        assert_eq!(s.finalize(Action::Brake), 0);
        assert!(s.relation().is_empty());
        assert!(s.frontier().contains(&0));
    }

    #[test]
    fn deterministic_road_is_captured_until_goal() {
        let mut sim = Road::new(0.0);
        let mut s = session(3, None);
        assert_eq!(s.run(&mut sim).unwrap(), CaptureStatus::GoalReached);
        assert_eq!(s.rounds(), 4);
        assert_eq!(s.registry().len(), 5);
        for k in 0..4 {
            let brake: Vec<StateId> = s.relation().outcomes(k, Action::Brake).unwrap().iter().copied().collect();
            assert_eq!(brake, vec![k]);
            let go: Vec<StateId> = s.relation().outcomes(k, Action::NoBrake).unwrap().iter().copied().collect();
            assert_eq!(go, vec![k + 1]);
        }
        assert_eq!(s.registry().features(4).unwrap(), &[0.0, 0.0]);
    }

    #[test]
    fn round_quota_is_a_normal_completion() {
        let mut sim = Road::new(0.0);
        let mut s = session(2, Some(2));
        assert_eq!(s.run(&mut sim).unwrap(), CaptureStatus::QuotaReached);
        assert_eq!(s.rounds(), 2);
        assert!(!sim.reached_goal());
    }

    /// Held at a red light forever: every action leaves the vehicle where it is.
    struct Stalled;

    impl Simulator for Stalled {
        type Configuration = ();

        fn observe(&mut self) -> Result<Vec<f64>> {
            Ok(vec![1.0, 0.5])
        }

        fn snapshot(&self) {}

        fn restore(&mut self, _: &()) -> Result<()> {
            Ok(())
        }

        fn step(&mut self, _: Action) -> Result<Vec<f64>> {
            self.observe()
        }

        fn reached_goal(&self) -> bool {
            false
        }
    }

    #[test]
    fn default_quota_stops_a_vehicle_that_never_arrives() {
        let config = PipelineConfig {
            trials_per_action: 2,
            ..PipelineConfig::default()
        };
        let settings = CaptureSettings::from_config(&config);
        let quota = settings.max_rounds.unwrap();
        let mut s = CaptureSession::new(StateRegistry::new(config.schema().unwrap()), settings);
        assert_eq!(s.run(&mut Stalled).unwrap(), CaptureStatus::QuotaReached);
        assert_eq!(s.rounds(), quota);
        assert_eq!(s.registry().len(), 1);
    }

    #[test]
    fn noisy_capture_yields_normalized_model() {
        let mut sim = Road::new(0.3);
        let mut s = session(20, None);
        s.run(&mut sim).unwrap();
        let (registry, relation) = s.into_parts();
        assert!(registry.len() > 5);
        let tensor = TransitionProbabilityModel::default()
            .build(&relation, registry.len())
            .unwrap();
        tensor.check_normalized(PROBABILITY_TOLERANCE).unwrap();
        // red and green readings at the start both lead on to the next position
        let red_start = registry.lookup(&[1.0, 1.0]).unwrap();
        assert!(relation.outcomes(red_start, Action::NoBrake).is_some());
    }

    #[test]
    fn persisted_tables_reload() {
        let mut sim = Road::new(0.0);
        let mut s = session(2, None);
        s.run(&mut sim).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::default();
        s.persist(dir.path(), &config).unwrap();

        let registry = StateRegistry::load(config.state_table_path(dir.path()), config.schema().unwrap()).unwrap();
        let relation = TransitionRelation::load(config.transition_table_path(dir.path())).unwrap();
        assert_eq!(registry.len(), s.registry().len());
        assert_eq!(&relation, s.relation());
    }
}
