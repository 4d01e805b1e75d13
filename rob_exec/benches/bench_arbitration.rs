//! # Arbitration Benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use comms_if::msg::{BehaviourId, SensorEvent, SensorId, Tick};
use rob_lib::{
    arbitrator::{self, Arbitrator, Cadence, InputData},
    behav::{Behaviour, MotionRequest},
    params::RobotParams,
    sensors::SensorState,
};
use util::module::State;

fn arbitration_benchmark(c: &mut Criterion) {
    // ---- Resolution over a large request set ----

    let requests: Vec<MotionRequest> = (0..1000u64)
        .map(|i| {
            let mut r = MotionRequest::new(
                BehaviourId::Cruise,
                (i % 17) as i32,
                (i % 50) as f64,
                0.0,
                1 + i % 5,
            );
            r.issued_cycle = i % 10;
            r.stamp = i;
            r
        })
        .collect();

    c.bench_function("arbitrator::resolve", |b| {
        b.iter(|| arbitrator::resolve(black_box(&requests), black_box(8)))
    });

    // ---- Full cycles with the shipped behaviours ----

    let params = RobotParams::from_toml_str(include_str!("../../params/robot.toml")).unwrap();

    let mut sensors = SensorState::new();
    sensors.update(SensorEvent {
        source: SensorId::InfraredCntr,
        timestamp_s: 0.0,
        value: 60.0,
        triggered: false,
    });

    let mut arb =
        Arbitrator::new(params.arbitrator.clone(), Behaviour::from_params(&params.behaviours))
            .unwrap();

    let mut input = InputData {
        cadence: Cadence::Normal,
        tick: Tick {
            seq: 0,
            is_tock: false,
        },
        sensors,
        halted: false,
    };

    c.bench_function("Arbitrator::proc::normal", |b| {
        b.iter(|| arb.proc(black_box(&input)).unwrap())
    });

    input.cadence = Cadence::Ballistic;
    c.bench_function("Arbitrator::proc::ballistic", |b| {
        b.iter(|| arb.proc(black_box(&input)).unwrap())
    });
}

criterion_group!(benches, arbitration_benchmark);
criterion_main!(benches);
