use criterion::{criterion_group, criterion_main, Criterion};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sim_core::{Cycle, ParamId, ParameterSpace, SimulationConfig};
use sim_runtime::{initialize, step, ModelConstants, Simulation};

fn stressed() -> ParameterSpace {
    let mut space = ParameterSpace::new();
    let _ = space.set(ParamId::CpoPrice, 30_000.0);
    let _ = space.set(ParamId::ShockProbability, 30.0);
    space
}

fn bench_step(c: &mut Criterion) {
    let space = stressed();
    let cfg = SimulationConfig::default();
    let params = space.snapshot();
    let constants = ModelConstants::default();
    let Ok(state) = initialize(&space, &cfg) else {
        return;
    };
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    c.bench_function("zone_step", |b| {
        b.iter(|| {
            let _ = step(&state, &params, &cfg, &constants, &mut rng);
        })
    });
}

fn bench_run(c: &mut Criterion) {
    let cfg = SimulationConfig {
        cycle: Cycle::Monthly,
        total_steps: 600,
        ..SimulationConfig::default()
    };
    c.bench_function("run_600_months", |b| {
        b.iter(|| {
            let mut sim = Simulation::new(stressed(), cfg.clone());
            let _ = sim.run_to_completion();
        })
    });
}

criterion_group!(benches, bench_step, bench_run);
criterion_main!(benches);
