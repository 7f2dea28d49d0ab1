//! Deadline bookkeeping for outstanding predictions and echo holds.

use bevy::prelude::Resource;
use sync_proto::ReplicaId;

use crate::scalar::Scalar;

/// Property a correction deadline guards. Together with the entity id this
/// keys the scheduler: one live task per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    ToggleOpen,
    CompartmentEdit,
}

pub type CorrectionKey = (ReplicaId, PropertyKey);

#[derive(Debug, Clone)]
struct CorrectionTask {
    key: CorrectionKey,
    remaining: Scalar,
    cancelled: bool,
}

/// Countdown list stepped once per frame by explicit delta time.
///
/// Tasks refer to entities by id only and carry no closures; whatever a
/// deadline means is decided by the system that drains the fired keys.
/// Cancelled tasks are effect-free and reaped on the next tick.
#[derive(Resource, Debug, Clone, Default)]
pub struct CorrectionScheduler {
    tasks: Vec<CorrectionTask>,
}

impl CorrectionScheduler {
    /// Arms a deadline for `key`, replacing any live task with the same key.
    pub fn schedule(&mut self, key: CorrectionKey, window: Scalar) {
        self.cancel(key);
        self.tasks.push(CorrectionTask {
            key,
            remaining: window,
            cancelled: false,
        });
    }

    /// Marks the live task for `key` cancelled. Returns whether one existed.
    pub fn cancel(&mut self, key: CorrectionKey) -> bool {
        let mut found = false;
        for task in &mut self.tasks {
            if task.key == key && !task.cancelled {
                task.cancelled = true;
                found = true;
            }
        }
        found
    }

    pub fn has_pending(&self, key: CorrectionKey) -> bool {
        self.tasks
            .iter()
            .any(|task| task.key == key && !task.cancelled)
    }

    pub fn remaining(&self, key: CorrectionKey) -> Option<Scalar> {
        self.tasks
            .iter()
            .find(|task| task.key == key && !task.cancelled)
            .map(|task| task.remaining)
    }

    /// Live task count.
    pub fn pending_count(&self) -> usize {
        self.tasks.iter().filter(|task| !task.cancelled).count()
    }

    /// Advances every live countdown by `dt` and returns the keys whose
    /// deadlines elapsed, in scheduling order. Fired and previously cancelled
    /// tasks are dropped.
    pub fn tick(&mut self, dt: Scalar) -> Vec<CorrectionKey> {
        let mut fired = Vec::new();
        for task in &mut self.tasks {
            if task.cancelled {
                continue;
            }
            task.remaining -= dt;
            if task.remaining <= Scalar::zero() {
                task.cancelled = true;
                fired.push(task.key);
            }
        }
        self.tasks.retain(|task| !task.cancelled);
        fired
    }
}
