//! Wire protocol for the Undertow client reconciliation layer.
//!
//! Defines the quantized bit-packed update messages exchanged per entity, the
//! decoder that validates them against declared field domains, and the
//! canonical state dump used for convergence digests. The crate is free of
//! any runtime dependency so both the simulation core and external tooling
//! can link it.

mod bitio;
mod digest;
mod quant;
mod trace;
mod wire;

pub use bitio::{BitReader, BitWriter, WireError};
pub use digest::{
    decode_dump_json, digest_dump, encode_dump_json, EntityStateDump, ReplicaStateDump,
    ReplicaStateEntry,
};
pub use quant::{bits_for_span, read_ranged_u32, write_ranged_u32, FloatSpec};
pub use trace::{decode_trace, encode_trace, SessionTrace, TraceFrame};
pub use wire::{
    decode_update, encode_batch, encode_update, peek_replica, split_batch, CompartmentPatch,
    CompartmentSnapshot, DecalState, EntityKind, EntityShape, EntityUpdate, EnvironmentState,
    FireSource, ReconcileClass, ReplicaId, ScalarSnapshot, SectorColor, ToggleFlags,
    ToggleSnapshot, UpdatePayload, DECAL_ALPHA, FIRE_COORD, FIRE_SIZE, MAX_BATCH_MESSAGES,
    MAX_DECALS, MAX_FIRE_SOURCES, MAX_MESSAGE_BYTES, MAX_SECTORS, OXYGEN_PERCENT, PROGRESS,
    SECTORS_PER_PATCH, SECTOR_STRENGTH, STUCK_PERCENT, WATER_FRACTION,
};
