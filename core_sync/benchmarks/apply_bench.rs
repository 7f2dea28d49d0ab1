use bevy::prelude::App;
use core_sync::{
    build_replica_app, run_frame, scalar_from_f32, spawn_compartment, spawn_door, spawn_light,
    spawn_repair, InboundQueue,
};
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use sync_proto::{
    encode_batch, encode_update, CompartmentPatch, EntityKind, EntityShape, EntityUpdate,
    EnvironmentState, ReplicaId, ScalarSnapshot, SectorColor, ToggleFlags, ToggleSnapshot,
    UpdatePayload, SECTORS_PER_PATCH,
};

const COMPARTMENT_SECTORS: u32 = 16;

fn seeded_app() -> App {
    let mut app = build_replica_app();
    spawn_door(&mut app.world, ReplicaId(1), None);
    spawn_light(&mut app.world, ReplicaId(2));
    spawn_repair(&mut app.world, ReplicaId(3));
    spawn_compartment(&mut app.world, ReplicaId(4), COMPARTMENT_SECTORS);
    app
}

fn simple_update(replica: ReplicaId, kind: EntityKind, tick: u32, payload: UpdatePayload) -> Vec<u8> {
    let update = EntityUpdate {
        replica,
        tick,
        payload,
    };
    encode_update(&update, EntityShape::simple(kind)).expect("encode update")
}

/// Batch of full snapshots cycling over the seeded entities.
fn snapshot_batch(count: u32) -> Vec<u8> {
    let messages: Vec<Vec<u8>> = (0..count)
        .map(|i| match i % 3 {
            0 => {
                let mut flags = ToggleFlags::empty();
                flags.set(ToggleFlags::OPEN, i % 2 == 0);
                simple_update(
                    ReplicaId(1),
                    EntityKind::Door,
                    i + 1,
                    UpdatePayload::Toggle(ToggleSnapshot {
                        flags,
                        stuck_percent: (i % 100) as f32,
                        last_user: 7,
                    }),
                )
            }
            1 => simple_update(
                ReplicaId(3),
                EntityKind::Repair,
                i + 1,
                UpdatePayload::Scalar(ScalarSnapshot {
                    progress: (i % 100) as f32,
                    active: true,
                    last_user: 7,
                }),
            ),
            _ => {
                let mut flags = ToggleFlags::empty();
                flags.set(ToggleFlags::OPEN, i % 4 == 0);
                simple_update(
                    ReplicaId(2),
                    EntityKind::Light,
                    i + 1,
                    UpdatePayload::Toggle(ToggleSnapshot {
                        flags,
                        stuck_percent: 0.0,
                        last_user: 2,
                    }),
                )
            }
        })
        .collect();
    encode_batch(&messages).expect("encode batch")
}

/// Batch of compartment patches: sector runs sweeping the grid with an
/// environment refresh every fifth message.
fn patch_batch(count: u32) -> Vec<u8> {
    let shape = EntityShape::compartment(COMPARTMENT_SECTORS);
    let messages: Vec<Vec<u8>> = (0..count)
        .map(|i| {
            let patch = if i % 5 == 4 {
                CompartmentPatch::Environment(EnvironmentState {
                    water_fraction: 0.25,
                    oxygen_percent: 80.0,
                    fires: Vec::new(),
                })
            } else {
                let start = (i * SECTORS_PER_PATCH) % COMPARTMENT_SECTORS;
                let run = SECTORS_PER_PATCH.min(COMPARTMENT_SECTORS - start);
                CompartmentPatch::Sectors {
                    start,
                    colors: (0..run)
                        .map(|s| SectorColor {
                            strength: 0.5,
                            color: 0xff00_0000 | (i * 8 + s),
                        })
                        .collect(),
                }
            };
            let update = EntityUpdate {
                replica: ReplicaId(4),
                tick: i + 1,
                payload: UpdatePayload::Patch(patch),
            };
            encode_update(&update, shape).expect("encode patch")
        })
        .collect();
    encode_batch(&messages).expect("encode batch")
}

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply");
    let dt = scalar_from_f32(0.05);

    for count in [8u32, 16, 32, 64] {
        let snapshots = snapshot_batch(count);
        group.bench_with_input(BenchmarkId::new("snapshots", count), &count, |b, _| {
            b.iter_batched(
                || {
                    let app = seeded_app();
                    app.world
                        .resource::<InboundQueue>()
                        .sender()
                        .send(snapshots.clone())
                        .expect("queue closed");
                    app
                },
                |mut app| {
                    run_frame(&mut app, dt);
                },
                BatchSize::SmallInput,
            );
        });

        let patches = patch_batch(count);
        group.bench_with_input(BenchmarkId::new("sector_patches", count), &count, |b, _| {
            b.iter_batched(
                || {
                    let app = seeded_app();
                    app.world
                        .resource::<InboundQueue>()
                        .sender()
                        .send(patches.clone())
                        .expect("queue closed");
                    app
                },
                |mut app| {
                    run_frame(&mut app, dt);
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(apply_benches, bench_apply);
criterion_main!(apply_benches);
