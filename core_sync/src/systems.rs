//! Frame pipeline systems.
//!
//! Chained once per frame: `pump_inbound` drains the transport channel,
//! `apply_inbound` decodes and reconciles every message, `tick_corrections`
//! advances deadlines, `grow_fires` steps the shared fire rosters, and
//! `advance_tick` closes the frame. Everything runs on the simulation thread.

use bevy::{ecs::system::SystemParam, prelude::*};
use sync_proto::{
    decode_update, peek_replica, split_batch, EntityKind, EntityShape, ReplicaId, UpdatePayload,
};

use crate::apply::{apply_compartment_patch, apply_compartment_snapshot, apply_scalar, apply_toggle};
use crate::components::{Compartment, Replica, Toggle, WorkProgress};
use crate::policy::ReconcileConfigHandle;
use crate::predicted::ConfirmOutcome;
use crate::resources::{
    FrameDt, InboundBuffer, InboundQueue, ReplicaDirectory, SimulationTick, SyncTelemetry,
};
use crate::scalar::{scalar_from_f32, Scalar};
use crate::scheduler::{CorrectionScheduler, PropertyKey};

/// Emitted whenever a pending prediction is overwritten or reverted, either
/// by a conflicting server update or by its deadline elapsing. Presentation
/// may react with a failure cue.
#[derive(Event, Debug, Clone)]
pub struct CorrectionEvent {
    pub replica: ReplicaId,
    pub property: PropertyKey,
    pub discarded: bool,
}

#[derive(SystemParam)]
pub struct ReconcileParams<'w, 's> {
    pub directory: Res<'w, ReplicaDirectory>,
    pub config: Res<'w, ReconcileConfigHandle>,
    pub scheduler: ResMut<'w, CorrectionScheduler>,
    pub telemetry: ResMut<'w, SyncTelemetry>,
    pub replicas: Query<'w, 's, &'static Replica>,
    pub toggles: Query<'w, 's, &'static mut Toggle>,
    pub works: Query<'w, 's, &'static mut WorkProgress>,
    pub compartments: Query<'w, 's, &'static mut Compartment>,
}

/// Moves everything the transport queued since last frame into the apply
/// buffer and opens the new frame's telemetry window.
pub fn pump_inbound(
    queue: Res<InboundQueue>,
    mut buffer: ResMut<InboundBuffer>,
    mut telemetry: ResMut<SyncTelemetry>,
) {
    telemetry.reset_frame();
    buffer.0.extend(queue.drain());
}

/// Decodes and reconciles every buffered batch. A failure affects only the
/// message that produced it.
pub fn apply_inbound(
    mut buffer: ResMut<InboundBuffer>,
    mut params: ReconcileParams,
    mut corrections: EventWriter<CorrectionEvent>,
) {
    let batches = std::mem::take(&mut buffer.0);
    for batch in &batches {
        let messages = match split_batch(batch) {
            Ok(messages) => messages,
            Err(err) => {
                log::warn!("rejected batch frame: {err}");
                params.telemetry.record_protocol_error();
                continue;
            }
        };
        for message in messages {
            apply_message(message, &mut params, &mut corrections);
        }
    }
}

fn apply_message(
    message: &[u8],
    params: &mut ReconcileParams,
    corrections: &mut EventWriter<CorrectionEvent>,
) {
    let replica = match peek_replica(message) {
        Ok(replica) => replica,
        Err(err) => {
            log::warn!("rejected message header: {err}");
            params.telemetry.record_protocol_error();
            return;
        }
    };
    let Some(entity) = params.directory.get(replica) else {
        log::debug!("update for unknown {replica} skipped");
        params.telemetry.record_skips(1);
        return;
    };
    let Ok(meta) = params.replicas.get(entity) else {
        params.telemetry.record_skips(1);
        return;
    };
    let shape = match meta.kind {
        EntityKind::Compartment => match params.compartments.get(entity) {
            Ok(compartment) => compartment.shape(),
            Err(_) => {
                params.telemetry.record_skips(1);
                return;
            }
        },
        kind => EntityShape::simple(kind),
    };
    let update = match decode_update(message, shape) {
        Ok(update) => update,
        Err(err) => {
            log::warn!("rejected update for {replica}: {err}");
            params.telemetry.record_protocol_error();
            return;
        }
    };

    match update.payload {
        UpdatePayload::Toggle(snapshot) => {
            let Ok(mut toggle) = params.toggles.get_mut(entity) else {
                params.telemetry.record_skips(1);
                return;
            };
            let key = (replica, PropertyKey::ToggleOpen);
            match apply_toggle(&mut toggle, &snapshot, key, &mut params.scheduler) {
                ConfirmOutcome::Applied => {}
                ConfirmOutcome::Confirmed => params.telemetry.record_confirmation(),
                ConfirmOutcome::Corrected { discarded } => {
                    params.telemetry.record_correction();
                    corrections.send(CorrectionEvent {
                        replica,
                        property: PropertyKey::ToggleOpen,
                        discarded,
                    });
                    tracing::debug!(
                        target: "undertow::apply",
                        replica = %replica,
                        tick = update.tick,
                        discarded,
                        "toggle.corrected"
                    );
                }
            }
            params.telemetry.record_update();
        }
        UpdatePayload::Scalar(snapshot) => {
            let Ok(mut work) = params.works.get_mut(entity) else {
                params.telemetry.record_skips(1);
                return;
            };
            apply_scalar(&mut work, &snapshot);
            params.telemetry.record_update();
        }
        UpdatePayload::Compartment(snapshot) => {
            let Ok(mut compartment) = params.compartments.get_mut(entity) else {
                params.telemetry.record_skips(1);
                return;
            };
            apply_compartment_snapshot(
                &mut compartment,
                &snapshot,
                (replica, PropertyKey::CompartmentEdit),
                &mut params.scheduler,
            );
            params.telemetry.record_update();
            tracing::debug!(
                target: "undertow::apply",
                replica = %replica,
                tick = update.tick,
                "compartment.snapshot_applied"
            );
        }
        UpdatePayload::Patch(patch) => {
            let hold_live = params
                .scheduler
                .has_pending((replica, PropertyKey::CompartmentEdit));
            let Ok(mut compartment) = params.compartments.get_mut(entity) else {
                params.telemetry.record_skips(1);
                return;
            };
            let report = apply_compartment_patch(&mut compartment, &patch, hold_live);
            if report.staged {
                params.telemetry.record_staged();
            } else {
                params.telemetry.record_update();
            }
            params.telemetry.record_skips(report.skipped);
        }
    }
}

/// Advances every live deadline by this frame's delta and resolves the ones
/// that elapsed: toggle predictions revert, echo holds commit their stage.
pub fn tick_corrections(
    dt: Res<FrameDt>,
    mut params: ReconcileParams,
    mut corrections: EventWriter<CorrectionEvent>,
) {
    let fired = params.scheduler.tick(dt.0);
    for (replica, property) in fired {
        let Some(entity) = params.directory.get(replica) else {
            continue;
        };
        match property {
            PropertyKey::ToggleOpen => {
                let Ok(mut toggle) = params.toggles.get_mut(entity) else {
                    continue;
                };
                params.telemetry.record_timeout();
                if let Some(discarded) = toggle.open.settle() {
                    corrections.send(CorrectionEvent {
                        replica,
                        property,
                        discarded,
                    });
                    tracing::debug!(
                        target: "undertow::schedule",
                        replica = %replica,
                        discarded,
                        "prediction.reverted"
                    );
                }
            }
            PropertyKey::CompartmentEdit => {
                let Ok(mut compartment) = params.compartments.get_mut(entity) else {
                    continue;
                };
                let (applied, skipped) = compartment.commit_stage();
                params.telemetry.record_committed(applied);
                params.telemetry.record_skips(skipped);
                tracing::debug!(
                    target: "undertow::schedule",
                    replica = %replica,
                    applied,
                    skipped,
                    "echo_hold.committed"
                );
            }
        }
    }
}

/// Steps every live fire by this frame's delta. Growth scales with the
/// compartment's oxygen level and saturates at the configured size cap.
pub fn grow_fires(
    dt: Res<FrameDt>,
    config: Res<ReconcileConfigHandle>,
    compartments: Query<&Compartment>,
) {
    let fire = &config.0.fire;
    let rate = scalar_from_f32(fire.growth_rate);
    let max_size = scalar_from_f32(fire.max_size);
    for compartment in &compartments {
        let oxygen = scalar_from_f32(compartment.oxygen_percent / 100.0);
        let step = rate * dt.0 * oxygen;
        if step <= Scalar::zero() {
            continue;
        }
        let mut fires = compartment
            .fires
            .lock()
            .expect("fire roster mutex poisoned");
        for source in fires.iter_mut() {
            let grown = (scalar_from_f32(source.size) + step).clamp(Scalar::zero(), max_size);
            source.size = grown.to_f32();
        }
    }
}

/// Increment global frame counter after the reconciliation step.
pub fn advance_tick(mut tick: ResMut<SimulationTick>) {
    tick.0 = tick.0.wrapping_add(1);
}
