//! Replica construction helpers.
//!
//! Entity lifecycle itself is server business; these spawn the local mirror
//! of an already-announced entity and register its wire id for inbound
//! dispatch.

use bevy::prelude::*;
use sync_proto::{EntityKind, ReplicaId};

use crate::components::{Compartment, Replica, Toggle, WorkProgress};
use crate::resources::ReplicaDirectory;

pub fn spawn_door(world: &mut World, id: ReplicaId, window_override: Option<f32>) -> Entity {
    let entity = world
        .spawn((
            Replica {
                id,
                kind: EntityKind::Door,
            },
            Toggle {
                window_override,
                ..Default::default()
            },
        ))
        .id();
    register(world, id, entity)
}

pub fn spawn_light(world: &mut World, id: ReplicaId) -> Entity {
    let entity = world
        .spawn((
            Replica {
                id,
                kind: EntityKind::Light,
            },
            Toggle::default(),
        ))
        .id();
    register(world, id, entity)
}

pub fn spawn_repair(world: &mut World, id: ReplicaId) -> Entity {
    let entity = world
        .spawn((
            Replica {
                id,
                kind: EntityKind::Repair,
            },
            WorkProgress::default(),
        ))
        .id();
    register(world, id, entity)
}

pub fn spawn_scanner(world: &mut World, id: ReplicaId) -> Entity {
    let entity = world
        .spawn((
            Replica {
                id,
                kind: EntityKind::Scanner,
            },
            WorkProgress::default(),
        ))
        .id();
    register(world, id, entity)
}

pub fn spawn_compartment(world: &mut World, id: ReplicaId, sector_count: u32) -> Entity {
    let entity = world
        .spawn((
            Replica {
                id,
                kind: EntityKind::Compartment,
            },
            Compartment::with_sector_count(sector_count),
        ))
        .id();
    register(world, id, entity)
}

fn register(world: &mut World, id: ReplicaId, entity: Entity) -> Entity {
    world
        .resource_mut::<ReplicaDirectory>()
        .register(id, entity);
    entity
}
