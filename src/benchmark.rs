use criterion::measurement::WallTime;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use irl_mdp::{
    discretize, Action, FeatureSchema, OverrideTable, ProbabilityOverride, RawTrajectory,
    StateRegistry, TransitionProbabilityModel, TransitionRelation,
};

const POSITIONS: usize = 250;

/// A road of `POSITIONS` cells, each seen with a green and a red light. Braking mostly stays
/// put, driving moves one or two cells on.
fn setup() -> (StateRegistry, TransitionRelation, RawTrajectory) {
    let mut rng = StdRng::seed_from_u64(11);
    let mut registry = StateRegistry::new(FeatureSchema::intersection());
    for i in 0..POSITIONS {
        let d = 1.0 - i as f64 / POSITIONS as f64;
        registry.add_state(&[0.0, d]).ok();
        registry.add_state(&[1.0, d]).ok();
    }
    let n = registry.len();
    let mut relation = TransitionRelation::new();
    for s in 0..n {
        let cell = s / 2;
        relation.record(s, Action::Brake, s);
        relation.record(s, Action::Brake, s ^ 1);
        for step in 1..=2 {
            let next = (cell + step).min(POSITIONS - 1) * 2 + rng.gen_range(0, 2);
            relation.record(s, Action::NoBrake, next);
        }
    }

    let mut trajectory = RawTrajectory::default();
    for s in (0..n).step_by(2) {
        if let Ok(f) = registry.features(s) {
            trajectory.push(f.to_vec(), Action::from_brake(rng.gen_bool(0.2)));
        }
    }
    (registry, relation, trajectory)
}

pub fn model_build_benchmark(c: &mut Criterion) -> &mut Criterion<WallTime> {
    let (registry, relation, _) = setup();
    let overrides = OverrideTable::new(&[
        ProbabilityOverride { s: 0, a: 1, s_prime: 2, p: 0.9 },
        ProbabilityOverride { s: 0, a: 1, s_prime: 4, p: 0.1 },
    ])
    .unwrap();
    let model = TransitionProbabilityModel::new(overrides);
    c.bench_function("probability tensor", |b| {
        b.iter(|| model.build(black_box(&relation), registry.len()))
    })
}

pub fn discretize_benchmark(c: &mut Criterion) -> &mut Criterion<WallTime> {
    let (registry, _, trajectory) = setup();
    c.bench_function("discretize trajectory", |b| {
        b.iter(|| discretize(black_box(&trajectory), &registry))
    })
}

criterion_group!(benches, model_build_benchmark, discretize_benchmark);
criterion_main!(benches);
