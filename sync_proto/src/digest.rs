//! Canonical authoritative-state dumps.
//!
//! A dump lists every replicated entity's settled state in replica-id order
//! together with a seeded digest of the whole listing. Two endpoints that
//! have converged produce identical digests regardless of the message
//! interleaving that got them there.

use std::hash::{BuildHasher, Hasher};

use ahash::RandomState;
use serde::{Deserialize, Serialize};

use crate::wire::{
    CompartmentSnapshot, EntityKind, ReplicaId, ScalarSnapshot, ToggleSnapshot,
};

/// Settled state of one entity, by reconciliation class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityStateDump {
    Toggle(ToggleSnapshot),
    Scalar(ScalarSnapshot),
    Compartment(CompartmentSnapshot),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaStateEntry {
    pub replica: ReplicaId,
    pub kind: EntityKind,
    pub state: EntityStateDump,
}

/// Full settled-state listing at one simulation tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReplicaStateDump {
    pub tick: u64,
    pub entries: Vec<ReplicaStateEntry>,
    pub digest: u64,
}

impl ReplicaStateDump {
    pub fn new(tick: u64, mut entries: Vec<ReplicaStateEntry>) -> Self {
        entries.sort_by_key(|entry| entry.replica);
        let mut dump = Self {
            tick,
            entries,
            digest: 0,
        };
        dump.digest = digest_dump(&dump);
        dump
    }
}

/// Seeded digest over the bincode form of a dump, with the digest field
/// itself zeroed. Fixed seeds keep the value stable across processes.
pub fn digest_dump(dump: &ReplicaStateDump) -> u64 {
    let mut clone = dump.clone();
    clone.digest = 0;
    let encoded = bincode::serialize(&clone).expect("state dump serialization for digest");
    let mut hasher = RandomState::with_seeds(0, 0, 0, 0).build_hasher();
    hasher.write(&encoded);
    hasher.finish()
}

pub fn encode_dump_json(dump: &ReplicaStateDump) -> serde_json::Result<String> {
    serde_json::to_string(dump)
}

pub fn decode_dump_json(data: &str) -> serde_json::Result<ReplicaStateDump> {
    serde_json::from_str(data)
}
