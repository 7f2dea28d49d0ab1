use std::collections::HashMap;

use bevy::prelude::*;
use crossbeam_channel::{unbounded, Receiver, Sender};
use sync_proto::ReplicaId;

use crate::scalar::Scalar;

/// Monotonic frame counter, advanced at the end of every frame.
#[derive(Resource, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationTick(pub u64);

/// Delta time injected for the frame currently being stepped. Countdowns
/// advance only through this value.
#[derive(Resource, Debug, Clone, Copy, Default)]
pub struct FrameDt(pub Scalar);

/// Channel pair carrying encoded batch frames from the transport into the
/// simulation loop. The transport side keeps a clone of the sender; the loop
/// drains without blocking once per frame.
#[derive(Resource, Debug)]
pub struct InboundQueue {
    sender: Sender<Vec<u8>>,
    receiver: Receiver<Vec<u8>>,
}

impl Default for InboundQueue {
    fn default() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }
}

impl InboundQueue {
    pub fn sender(&self) -> Sender<Vec<u8>> {
        self.sender.clone()
    }

    /// Drains everything queued so far without blocking.
    pub fn drain(&self) -> Vec<Vec<u8>> {
        let mut batches = Vec::new();
        while let Ok(batch) = self.receiver.try_recv() {
            batches.push(batch);
        }
        batches
    }
}

/// Batches drained from the queue this frame, awaiting apply.
#[derive(Resource, Debug, Default)]
pub struct InboundBuffer(pub Vec<Vec<u8>>);

/// Wire id to ECS entity lookup for inbound dispatch.
#[derive(Resource, Debug, Default)]
pub struct ReplicaDirectory {
    entities: HashMap<ReplicaId, Entity>,
}

impl ReplicaDirectory {
    pub fn register(&mut self, id: ReplicaId, entity: Entity) {
        self.entities.insert(id, entity);
    }

    pub fn get(&self, id: ReplicaId) -> Option<Entity> {
        self.entities.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Counters for the reconciliation pipeline. Totals accumulate over the
/// session; `rejected_this_frame` is cleared at the top of every frame.
#[derive(Resource, Debug, Clone, Default)]
pub struct SyncTelemetry {
    pub predictions_started: u64,
    pub predictions_confirmed: u64,
    pub corrections_applied: u64,
    pub timeouts_fired: u64,
    pub updates_applied: u64,
    pub patches_staged: u64,
    pub patches_committed: u64,
    pub references_skipped: u64,
    pub protocol_errors: u64,
    pub rejected_this_frame: u64,
}

impl SyncTelemetry {
    pub fn reset_frame(&mut self) {
        self.rejected_this_frame = 0;
    }

    pub fn record_prediction(&mut self) {
        self.predictions_started += 1;
    }

    pub fn record_confirmation(&mut self) {
        self.predictions_confirmed += 1;
    }

    pub fn record_correction(&mut self) {
        self.corrections_applied += 1;
    }

    pub fn record_timeout(&mut self) {
        self.timeouts_fired += 1;
    }

    pub fn record_update(&mut self) {
        self.updates_applied += 1;
    }

    pub fn record_staged(&mut self) {
        self.patches_staged += 1;
    }

    pub fn record_committed(&mut self, count: usize) {
        self.patches_committed += count as u64;
    }

    pub fn record_skips(&mut self, count: usize) {
        self.references_skipped += count as u64;
    }

    pub fn record_protocol_error(&mut self) {
        self.protocol_errors += 1;
        self.rejected_this_frame += 1;
    }
}
