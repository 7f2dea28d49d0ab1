//! Local input entry points.
//!
//! Presentation calls these when the player interacts with a replicated
//! entity. Allowed edits take effect immediately on the local view and arm
//! the deadline that later reverts or settles them; disallowed edits return
//! an error and change nothing.

use bevy::prelude::*;
use sync_proto::{EntityKind, ReplicaId, SectorColor};
use thiserror::Error;

use crate::components::{Compartment, Replica, Toggle};
use crate::policy::ReconcileConfigHandle;
use crate::resources::{ReplicaDirectory, SyncTelemetry};
use crate::scalar::Scalar;
use crate::scheduler::{CorrectionScheduler, PropertyKey};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PredictError {
    #[error("{0} is not a registered replica")]
    UnknownReplica(ReplicaId),
    #[error("prediction is disabled for {kind:?}")]
    PredictionDisabled { kind: EntityKind },
    #[error("{replica} has no live slot {index}")]
    MissingSlot { replica: ReplicaId, index: u32 },
}

/// Predicts the open state of a door or light. The local view flips
/// immediately; a correction deadline armed from the kind policy (or the
/// entity's own override) reverts the flip if the server stays silent.
pub fn predict_toggle_open(
    world: &mut World,
    id: ReplicaId,
    desired: bool,
) -> Result<(), PredictError> {
    let entity = lookup(world, id)?;
    let replica = *world
        .get::<Replica>(entity)
        .ok_or(PredictError::UnknownReplica(id))?;
    let config = world.resource::<ReconcileConfigHandle>().get();
    if !config.policy_for(replica.kind).predict {
        return Err(PredictError::PredictionDisabled { kind: replica.kind });
    }
    let mut toggle = world
        .get_mut::<Toggle>(entity)
        .ok_or(PredictError::UnknownReplica(id))?;
    let window_override = toggle.window_override;
    if !toggle.open.predict(desired) {
        return Ok(());
    }
    let window = config.window_for(replica.kind, window_override);
    world
        .resource_mut::<CorrectionScheduler>()
        .schedule((id, PropertyKey::ToggleOpen), window);
    world.resource_mut::<SyncTelemetry>().record_prediction();
    log::debug!(
        "prediction armed: {} {:?} open={} window={}",
        id,
        replica.kind,
        desired,
        window
    );
    Ok(())
}

/// Opens (or extends) the echo-suppression hold on a compartment without
/// touching its state. Subsequent server patches stage until the hold ends.
pub fn begin_compartment_edit(world: &mut World, id: ReplicaId) -> Result<(), PredictError> {
    let (_, window) = edit_target(world, id)?;
    arm_hold(world, id, window);
    Ok(())
}

/// Paints one sector locally and arms the echo hold.
pub fn paint_sector(
    world: &mut World,
    id: ReplicaId,
    index: u32,
    color: SectorColor,
) -> Result<(), PredictError> {
    let (entity, window) = edit_target(world, id)?;
    let mut compartment = world
        .get_mut::<Compartment>(entity)
        .ok_or(PredictError::UnknownReplica(id))?;
    let slot = compartment
        .sectors
        .get_mut(index as usize)
        .ok_or(PredictError::MissingSlot { replica: id, index })?;
    *slot = color;
    arm_hold(world, id, window);
    Ok(())
}

/// Fades one decal locally and arms the echo hold.
pub fn set_decal_alpha(
    world: &mut World,
    id: ReplicaId,
    index: u8,
    alpha: f32,
) -> Result<(), PredictError> {
    let (entity, window) = edit_target(world, id)?;
    let mut compartment = world
        .get_mut::<Compartment>(entity)
        .ok_or(PredictError::UnknownReplica(id))?;
    if !compartment.apply_decal(index, alpha) {
        return Err(PredictError::MissingSlot {
            replica: id,
            index: u32::from(index),
        });
    }
    arm_hold(world, id, window);
    Ok(())
}

fn lookup(world: &World, id: ReplicaId) -> Result<Entity, PredictError> {
    world
        .resource::<ReplicaDirectory>()
        .get(id)
        .ok_or(PredictError::UnknownReplica(id))
}

/// Resolves an editable compartment and its echo window, or rejects.
fn edit_target(world: &World, id: ReplicaId) -> Result<(Entity, Scalar), PredictError> {
    let entity = lookup(world, id)?;
    let replica = *world
        .get::<Replica>(entity)
        .ok_or(PredictError::UnknownReplica(id))?;
    let config = world.resource::<ReconcileConfigHandle>().get();
    let window = config.echo_window_for(replica.kind);
    if replica.kind != EntityKind::Compartment || window <= Scalar::zero() {
        return Err(PredictError::PredictionDisabled { kind: replica.kind });
    }
    Ok((entity, window))
}

fn arm_hold(world: &mut World, id: ReplicaId, window: Scalar) {
    world
        .resource_mut::<CorrectionScheduler>()
        .schedule((id, PropertyKey::CompartmentEdit), window);
    log::debug!("echo hold armed: {} window={}", id, window);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ReconcileConfig;
    use crate::spawn::{spawn_compartment, spawn_door, spawn_repair};

    fn test_world() -> World {
        let mut world = World::new();
        world.insert_resource(ReplicaDirectory::default());
        world.insert_resource(CorrectionScheduler::default());
        world.insert_resource(SyncTelemetry::default());
        world.insert_resource(ReconcileConfigHandle::new(std::sync::Arc::new(
            ReconcileConfig::default(),
        )));
        world
    }

    #[test]
    fn door_prediction_arms_one_deadline() {
        let mut world = test_world();
        spawn_door(&mut world, ReplicaId(1), None);

        predict_toggle_open(&mut world, ReplicaId(1), true).unwrap();
        predict_toggle_open(&mut world, ReplicaId(1), true).unwrap();

        let scheduler = world.resource::<CorrectionScheduler>();
        assert_eq!(scheduler.pending_count(), 1);
        assert_eq!(world.resource::<SyncTelemetry>().predictions_started, 1);
    }

    #[test]
    fn scalar_kinds_reject_prediction() {
        let mut world = test_world();
        spawn_repair(&mut world, ReplicaId(2));
        assert_eq!(
            predict_toggle_open(&mut world, ReplicaId(2), true),
            Err(PredictError::PredictionDisabled {
                kind: EntityKind::Repair,
            })
        );
    }

    #[test]
    fn unknown_replica_is_rejected() {
        let mut world = test_world();
        assert_eq!(
            predict_toggle_open(&mut world, ReplicaId(40), true),
            Err(PredictError::UnknownReplica(ReplicaId(40)))
        );
    }

    #[test]
    fn painting_applies_locally_and_arms_the_hold() {
        let mut world = test_world();
        let entity = spawn_compartment(&mut world, ReplicaId(3), 4);

        paint_sector(
            &mut world,
            ReplicaId(3),
            2,
            SectorColor { strength: 1.0, color: 0xff },
        )
        .unwrap();

        assert_eq!(
            world.get::<Compartment>(entity).unwrap().sectors[2].color,
            0xff
        );
        assert!(world
            .resource::<CorrectionScheduler>()
            .has_pending((ReplicaId(3), PropertyKey::CompartmentEdit)));
    }

    #[test]
    fn painting_a_dead_slot_is_rejected() {
        let mut world = test_world();
        spawn_compartment(&mut world, ReplicaId(3), 2);
        assert_eq!(
            paint_sector(&mut world, ReplicaId(3), 9, SectorColor::default()),
            Err(PredictError::MissingSlot {
                replica: ReplicaId(3),
                index: 9,
            })
        );
        assert!(!world
            .resource::<CorrectionScheduler>()
            .has_pending((ReplicaId(3), PropertyKey::CompartmentEdit)));
    }
}
