//! Recorded message traces for replay.
//!
//! The soak harness records every batch it feeds into a session, keyed by
//! frame index, so a divergence can be replayed bit-for-bit later.

use serde::{Deserialize, Serialize};

/// Batches delivered during one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceFrame {
    pub frame: u64,
    pub batches: Vec<Vec<u8>>,
}

/// One recorded session: the generator seed plus every delivered frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionTrace {
    pub seed: u64,
    pub frames: Vec<TraceFrame>,
}

impl SessionTrace {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            frames: Vec::new(),
        }
    }

    pub fn record(&mut self, frame: u64, batches: Vec<Vec<u8>>) {
        if !batches.is_empty() {
            self.frames.push(TraceFrame { frame, batches });
        }
    }
}

pub fn encode_trace(trace: &SessionTrace) -> bincode::Result<Vec<u8>> {
    bincode::serialize(trace)
}

pub fn decode_trace(data: &[u8]) -> bincode::Result<SessionTrace> {
    bincode::deserialize(data)
}
