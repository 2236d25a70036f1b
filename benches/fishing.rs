//! Fishing engine benchmarks
//!
//! Sampling, catch rolls and whole fishing sessions for many anglers.
//!
//! Run with: cargo bench --bench fishing

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fishing_outcome_server::game::clock::ManualClock;
use fishing_outcome_server::game::engine::{Angler, Cast, FishingRules};
use fishing_outcome_server::game::fish::CaughtFish;
use fishing_outcome_server::game::player::PlayerState;
use fishing_outcome_server::game::random::RandSource;
use fishing_outcome_server::game::species::{SelectionMode, SpeciesTable};
use fishing_outcome_server::net::protocol::{decode_json, encode_json, ClientMessage, ServerMessage};
use fishing_outcome_server::util::vec3::Vec3;
use rand::rngs::StdRng;
use uuid::Uuid;

/// Benchmark species selection in both modes
fn bench_species_pick(c: &mut Criterion) {
    let mut group = c.benchmark_group("species_pick");
    let table = SpeciesTable::builtin();

    for mode in [SelectionMode::Compatible, SelectionMode::Weighted] {
        let mut rng = RandSource::seeded(1);
        group.bench_with_input(BenchmarkId::new("mode", format!("{:?}", mode)), &mode, |b, mode| {
            b.iter(|| black_box(table.pick_index(*mode, &mut rng)))
        });
    }
    group.finish();
}

/// Benchmark size/weight rolls
fn bench_catch_roll(c: &mut Criterion) {
    let table = SpeciesTable::builtin();
    let species = table.get("rare_2").expect("builtin species");
    let mut rng = RandSource::seeded(2);

    c.bench_function("catch_roll", |b| {
        b.iter(|| black_box(CaughtFish::roll(species, &mut rng, 0)))
    });
}

fn anglers(count: usize, clock: &ManualClock) -> Vec<Angler<ManualClock, RandSource<StdRng>>> {
    let rules = Arc::new(FishingRules::default());
    (0..count)
        .map(|i| {
            let player = PlayerState::new(Uuid::new_v4(), format!("Angler{}", i), Vec3::ZERO);
            Angler::new(player, rules.clone(), clock.clone(), RandSource::seeded(i as u64))
        })
        .collect()
}

/// Benchmark one simulated minute of fishing for many anglers, polling
/// every 100ms and reeling in as soon as a bite opens
fn bench_fishing_minute(c: &mut Criterion) {
    let mut group = c.benchmark_group("fishing_minute");
    group.sample_size(20);

    for count in [10, 100, 500] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("anglers", count), &count, |b, &count| {
            b.iter(|| {
                let clock = ManualClock::new(0);
                let mut anglers = anglers(count, &clock);
                let mut caught = 0usize;

                for angler in anglers.iter_mut() {
                    let _ = angler.start_fishing(Cast::at(Vec3::ZERO));
                }

                for _ in 0..600 {
                    clock.advance(100);
                    for angler in anglers.iter_mut() {
                        let events = angler.poll();
                        if angler.bite_window_remaining().is_some() {
                            let _ = angler.stop_fishing();
                            caught += 1;
                            let _ = angler.start_fishing(Cast::at(Vec3::ZERO));
                        }
                        black_box(events);
                    }
                }

                black_box(caught)
            })
        });
    }
    group.finish();
}

/// Benchmark the JSON envelope codec on the hottest messages
fn bench_protocol(c: &mut Criterion) {
    let mut group = c.benchmark_group("protocol");

    let update = r#"{"event":"playerUpdate","data":{"position":{"x":1.5,"y":0,"z":-2},"action":"fishing","rotation":0.25}}"#;
    group.bench_function("decode_player_update", |b| {
        b.iter(|| black_box(decode_json::<ClientMessage>(black_box(update))))
    });

    let table = SpeciesTable::builtin();
    let species = table.get("common_1").expect("builtin species");
    let caught = ServerMessage::FishCaught {
        player_id: Uuid::new_v4(),
        fish: CaughtFish::with_measurements(species, 10, 0.2, 0),
        score: 10,
    };
    group.bench_function("encode_fish_caught", |b| {
        b.iter(|| black_box(encode_json(black_box(&caught))))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_species_pick,
    bench_catch_roll,
    bench_fishing_minute,
    bench_protocol,
);

criterion_main!(benches);
