//! Settled-state extraction for convergence checks.

use bevy::prelude::*;
use sync_proto::{EntityStateDump, ReplicaStateDump, ReplicaStateEntry};

use crate::components::{Compartment, Replica, Toggle, WorkProgress};
use crate::resources::SimulationTick;

/// Lists every replicated entity's server-confirmed state in id order and
/// seals it with the convergence digest. Pending overlays are ignored; two
/// replicas that have settled on the same authoritative state produce the
/// same digest.
pub fn capture_dump(world: &mut World) -> ReplicaStateDump {
    let tick = world.resource::<SimulationTick>().0;
    let mut entries = Vec::new();

    let mut toggles = world.query::<(&Replica, &Toggle)>();
    for (replica, toggle) in toggles.iter(world) {
        entries.push(ReplicaStateEntry {
            replica: replica.id,
            kind: replica.kind,
            state: EntityStateDump::Toggle(toggle.confirmed_snapshot()),
        });
    }
    let mut works = world.query::<(&Replica, &WorkProgress)>();
    for (replica, work) in works.iter(world) {
        entries.push(ReplicaStateEntry {
            replica: replica.id,
            kind: replica.kind,
            state: EntityStateDump::Scalar(work.snapshot()),
        });
    }
    let mut compartments = world.query::<(&Replica, &Compartment)>();
    for (replica, compartment) in compartments.iter(world) {
        entries.push(ReplicaStateEntry {
            replica: replica.id,
            kind: replica.kind,
            state: EntityStateDump::Compartment(compartment.snapshot()),
        });
    }

    ReplicaStateDump::new(tick, entries)
}

pub fn state_digest(world: &mut World) -> u64 {
    capture_dump(world).digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_proto::ReplicaId;

    use crate::resources::ReplicaDirectory;
    use crate::spawn::{spawn_door, spawn_repair};

    fn test_world() -> World {
        let mut world = World::new();
        world.insert_resource(SimulationTick::default());
        world.insert_resource(ReplicaDirectory::default());
        world
    }

    #[test]
    fn dump_is_sorted_and_digested() {
        let mut world = test_world();
        spawn_repair(&mut world, ReplicaId(9));
        spawn_door(&mut world, ReplicaId(3), None);

        let dump = capture_dump(&mut world);
        assert_eq!(dump.entries.len(), 2);
        assert_eq!(dump.entries[0].replica, ReplicaId(3));
        assert_eq!(dump.entries[1].replica, ReplicaId(9));
        assert_eq!(dump.digest, sync_proto::digest_dump(&dump));
    }

    #[test]
    fn identical_worlds_share_a_digest() {
        let mut first = test_world();
        let mut second = test_world();
        for world in [&mut first, &mut second] {
            spawn_door(world, ReplicaId(1), None);
            spawn_repair(world, ReplicaId(2));
        }
        assert_eq!(state_digest(&mut first), state_digest(&mut second));
    }

    #[test]
    fn pending_overlay_does_not_change_the_digest() {
        let mut world = test_world();
        let entity = spawn_door(&mut world, ReplicaId(1), None);
        let baseline = state_digest(&mut world);

        let mut toggle = world.get_mut::<Toggle>(entity).unwrap();
        let _ = toggle.open.predict(true);
        assert_eq!(state_digest(&mut world), baseline);
    }
}
