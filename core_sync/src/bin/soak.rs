use std::env;
use std::fs;
use std::process::ExitCode;

use bevy::prelude::World;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info, warn};

use core_sync::{
    build_replica_app, paint_sector, predict_toggle_open, run_frame, scalar_from_f32,
    spawn_compartment, spawn_door, spawn_light, spawn_repair, spawn_scanner, state_digest,
    InboundQueue, SyncTelemetry,
};
use sync_proto::{
    decode_trace, encode_batch, encode_trace, encode_update, CompartmentPatch,
    CompartmentSnapshot, DecalState, EntityShape, EntityUpdate, EnvironmentState, FireSource,
    ReplicaId, ScalarSnapshot, SectorColor, SessionTrace, ToggleFlags, ToggleSnapshot,
    UpdatePayload,
};

const FRAME_DT_SECS: f32 = 0.05;
/// Frames run after the last delivery so holds and deadlines settle.
const SETTLE_FRAMES: u64 = 40;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let frames: u64 = env_parse("SOAK_FRAMES", 2_000);
    let seed: u64 = env_parse("SOAK_SEED", 0x5eed);
    let record_path = env::var("SOAK_TRACE_OUT").ok();
    let replay_path = env::var("SOAK_TRACE_IN").ok();

    let replay = match replay_path {
        Some(path) => match fs::read(&path).map_err(|err| err.to_string()).and_then(|data| {
            decode_trace(&data).map_err(|err| err.to_string())
        }) {
            Ok(trace) => {
                info!(target: "undertow::soak", %path, frames = trace.frames.len(), "trace.loaded");
                Some(trace)
            }
            Err(err) => {
                error!(target: "undertow::soak", %path, error = %err, "trace.load_failed");
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let mut primary = build_replica_app();
    let mut shadow = build_replica_app();
    let roster = populate(&mut primary.world);
    populate(&mut shadow.world);

    let primary_sender = primary.world.resource::<InboundQueue>().sender();
    let shadow_sender = shadow.world.resource::<InboundQueue>().sender();

    let mut generator = TrafficGenerator::new(seed, roster);
    let mut trace = SessionTrace::new(seed);
    let dt = scalar_from_f32(FRAME_DT_SECS);

    let total_frames = match &replay {
        Some(recorded) => {
            recorded.frames.last().map(|f| f.frame + 1).unwrap_or(0) + SETTLE_FRAMES
        }
        None => frames + SETTLE_FRAMES,
    };

    info!(
        target: "undertow::soak",
        seed,
        frames = total_frames,
        mode = if replay.is_some() { "replay" } else { "generate" },
        "soak.start"
    );

    for frame in 0..total_frames {
        let batches = match &replay {
            Some(recorded) => recorded
                .frames
                .iter()
                .find(|f| f.frame == frame)
                .map(|f| f.batches.clone())
                .unwrap_or_default(),
            None if frame < frames => generator.frame_batches(),
            None => Vec::new(),
        };
        if record_path.is_some() {
            trace.record(frame, batches.clone());
        }
        for batch in &batches {
            primary_sender.send(batch.clone()).expect("primary queue closed");
            shadow_sender.send(batch.clone()).expect("shadow queue closed");
        }

        // Local input is mirrored into both replicas; generated traffic only
        // runs in generate mode.
        if replay.is_none() && frame < frames {
            for (id, desired) in generator.frame_inputs() {
                for app in [&mut primary, &mut shadow] {
                    if let Err(err) = predict_toggle_open(&mut app.world, id, desired) {
                        warn!(target: "undertow::soak", replica = %id, error = %err, "input.rejected");
                    }
                }
            }
            if let Some((id, index, color)) = generator.frame_paint() {
                for app in [&mut primary, &mut shadow] {
                    if let Err(err) = paint_sector(&mut app.world, id, index, color) {
                        warn!(target: "undertow::soak", replica = %id, error = %err, "paint.rejected");
                    }
                }
            }
        }

        run_frame(&mut primary, dt);
        run_frame(&mut shadow, dt);

        let primary_digest = state_digest(&mut primary.world);
        let shadow_digest = state_digest(&mut shadow.world);
        if primary_digest != shadow_digest {
            let primary_hex = format!("{primary_digest:016x}");
            let shadow_hex = format!("{shadow_digest:016x}");
            error!(
                target: "undertow::soak",
                frame,
                primary = %primary_hex,
                shadow = %shadow_hex,
                "soak.diverged"
            );
            write_trace(record_path.as_deref(), &trace);
            return ExitCode::FAILURE;
        }
        if frame % 500 == 0 {
            let digest_hex = format!("{primary_digest:016x}");
            info!(target: "undertow::soak", frame, digest = %digest_hex, "soak.checkpoint");
        }
    }

    write_trace(record_path.as_deref(), &trace);

    let telemetry = primary.world.resource::<SyncTelemetry>().clone();
    info!(
        target: "undertow::soak",
        updates = telemetry.updates_applied,
        predictions = telemetry.predictions_started,
        confirmed = telemetry.predictions_confirmed,
        corrected = telemetry.corrections_applied,
        timeouts = telemetry.timeouts_fired,
        staged = telemetry.patches_staged,
        committed = telemetry.patches_committed,
        skipped = telemetry.references_skipped,
        protocol_errors = telemetry.protocol_errors,
        "soak.complete"
    );
    ExitCode::SUCCESS
}

fn env_parse(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn write_trace(path: Option<&str>, trace: &SessionTrace) {
    let Some(path) = path else {
        return;
    };
    match encode_trace(trace) {
        Ok(bytes) => match fs::write(path, bytes) {
            Ok(()) => info!(target: "undertow::soak", %path, "trace.written"),
            Err(err) => warn!(target: "undertow::soak", %path, error = %err, "trace.write_failed"),
        },
        Err(err) => warn!(target: "undertow::soak", error = %err, "trace.encode_failed"),
    }
}

/// Entities both replicas mirror during a soak run.
fn populate(world: &mut World) -> Vec<(ReplicaId, EntityShape)> {
    use sync_proto::EntityKind;

    spawn_door(world, ReplicaId(1), None);
    spawn_door(world, ReplicaId(2), Some(0.8));
    spawn_light(world, ReplicaId(3));
    spawn_repair(world, ReplicaId(4));
    spawn_scanner(world, ReplicaId(5));
    spawn_compartment(world, ReplicaId(6), 8);
    spawn_compartment(world, ReplicaId(7), 16);

    vec![
        (ReplicaId(1), EntityShape::simple(EntityKind::Door)),
        (ReplicaId(2), EntityShape::simple(EntityKind::Door)),
        (ReplicaId(3), EntityShape::simple(EntityKind::Light)),
        (ReplicaId(4), EntityShape::simple(EntityKind::Repair)),
        (ReplicaId(5), EntityShape::simple(EntityKind::Scanner)),
        (ReplicaId(6), EntityShape::compartment(8)),
        (ReplicaId(7), EntityShape::compartment(16)),
    ]
}

struct TrafficGenerator {
    rng: SmallRng,
    roster: Vec<(ReplicaId, EntityShape)>,
    server_tick: u32,
}

impl TrafficGenerator {
    fn new(seed: u64, roster: Vec<(ReplicaId, EntityShape)>) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            roster,
            server_tick: 0,
        }
    }

    /// Zero or more encoded batches for this frame.
    fn frame_batches(&mut self) -> Vec<Vec<u8>> {
        if !self.rng.gen_bool(0.6) {
            return Vec::new();
        }
        self.server_tick += 1;
        let count = self.rng.gen_range(1..=6);
        let mut messages = Vec::with_capacity(count);
        for _ in 0..count {
            let (id, shape) = self.roster[self.rng.gen_range(0..self.roster.len())];
            let update = EntityUpdate {
                replica: id,
                tick: self.server_tick,
                payload: self.random_payload(shape),
            };
            match encode_update(&update, shape) {
                Ok(bytes) => messages.push(bytes),
                Err(err) => warn!(target: "undertow::soak", error = %err, "generator.encode_failed"),
            }
        }
        match encode_batch(&messages) {
            Ok(batch) => vec![batch],
            Err(err) => {
                warn!(target: "undertow::soak", error = %err, "generator.batch_failed");
                Vec::new()
            }
        }
    }

    /// Toggle inputs for this frame, mirrored into every replica.
    fn frame_inputs(&mut self) -> Vec<(ReplicaId, bool)> {
        if !self.rng.gen_bool(0.2) {
            return Vec::new();
        }
        let id = ReplicaId(self.rng.gen_range(1..=3));
        vec![(id, self.rng.gen_bool(0.5))]
    }

    fn frame_paint(&mut self) -> Option<(ReplicaId, u32, SectorColor)> {
        if !self.rng.gen_bool(0.1) {
            return None;
        }
        let (id, sectors) = if self.rng.gen_bool(0.5) {
            (ReplicaId(6), 8)
        } else {
            (ReplicaId(7), 16)
        };
        Some((
            id,
            self.rng.gen_range(0..sectors),
            SectorColor {
                strength: self.rng.gen_range(0.0..=1.0),
                color: self.rng.gen(),
            },
        ))
    }

    fn random_payload(&mut self, shape: EntityShape) -> UpdatePayload {
        use sync_proto::ReconcileClass;

        match shape.kind.class() {
            ReconcileClass::BinaryToggle => {
                let mut flags = ToggleFlags::empty();
                flags.set(ToggleFlags::OPEN, self.rng.gen_bool(0.5));
                flags.set(ToggleFlags::STUCK, self.rng.gen_bool(0.1));
                UpdatePayload::Toggle(ToggleSnapshot {
                    flags,
                    stuck_percent: self.rng.gen_range(0.0..=100.0),
                    last_user: self.rng.gen_range(0..4),
                })
            }
            ReconcileClass::ContinuousScalar => UpdatePayload::Scalar(ScalarSnapshot {
                progress: self.rng.gen_range(0.0..=100.0),
                active: self.rng.gen_bool(0.7),
                last_user: self.rng.gen_range(0..4),
            }),
            ReconcileClass::AggregateStructured => {
                if self.rng.gen_bool(0.15) {
                    UpdatePayload::Compartment(self.random_snapshot(shape))
                } else {
                    UpdatePayload::Patch(self.random_patch(shape))
                }
            }
        }
    }

    fn random_snapshot(&mut self, shape: EntityShape) -> CompartmentSnapshot {
        let sectors = (0..shape.sector_count)
            .map(|_| SectorColor {
                strength: self.rng.gen_range(0.0..=1.0),
                color: self.rng.gen(),
            })
            .collect();
        let decals = (0..self.rng.gen_range(0..4))
            .map(|slot| DecalState {
                decal_id: slot as u8,
                alpha: self.rng.gen_range(0.0..=1.0),
            })
            .collect();
        CompartmentSnapshot {
            sectors,
            decals,
            environment: self.random_environment(),
        }
    }

    fn random_patch(&mut self, shape: EntityShape) -> CompartmentPatch {
        match self.rng.gen_range(0..3) {
            0 => {
                let start = self.rng.gen_range(0..shape.sector_count);
                let run = sync_proto::SECTORS_PER_PATCH.min(shape.sector_count - start);
                CompartmentPatch::Sectors {
                    start,
                    colors: (0..run)
                        .map(|_| SectorColor {
                            strength: self.rng.gen_range(0.0..=1.0),
                            color: self.rng.gen(),
                        })
                        .collect(),
                }
            }
            1 => CompartmentPatch::Decal {
                index: self.rng.gen_range(0..4),
                alpha: self.rng.gen_range(0.0..=1.0),
            },
            _ => CompartmentPatch::Environment(self.random_environment()),
        }
    }

    fn random_environment(&mut self) -> EnvironmentState {
        let fires = if self.rng.gen_bool(0.3) {
            (0..self.rng.gen_range(1..=3))
                .map(|_| FireSource {
                    x: self.rng.gen_range(0.0..=1.0),
                    y: self.rng.gen_range(0.0..=1.0),
                    size: self.rng.gen_range(0.0..=0.5),
                })
                .collect()
        } else {
            Vec::new()
        };
        EnvironmentState {
            water_fraction: self.rng.gen_range(0.0..=1.5),
            oxygen_percent: self.rng.gen_range(0.0..=100.0),
            fires,
        }
    }
}
