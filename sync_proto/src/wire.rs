//! Message layouts for per-entity state updates.
//!
//! Every update names one replicated entity and carries either a full
//! snapshot of its class or, for compartment aggregates, a partial patch
//! behind a two-bit discriminator. Field order is fixed and carries no
//! per-field tags; the decoder walks the layout declared for the entity's
//! kind and validates every bounded field against its span.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::bitio::{BitReader, BitWriter, WireError};
use crate::quant::{read_ranged_u32, write_ranged_u32, FloatSpec};

/// Most paint sectors a compartment aggregate may declare.
pub const MAX_SECTORS: u32 = 32;
/// Most decal slots a compartment aggregate may declare.
pub const MAX_DECALS: u32 = 8;
/// Most simultaneous fire sources in one environment block.
pub const MAX_FIRE_SOURCES: u32 = 16;
/// Sector entries carried by a single sector patch.
pub const SECTORS_PER_PATCH: u32 = 4;
/// Most messages one batch frame may carry.
pub const MAX_BATCH_MESSAGES: u32 = 64;
/// Largest single message a batch frame accepts, in bytes.
pub const MAX_MESSAGE_BYTES: usize = 512;

pub const STUCK_PERCENT: FloatSpec = FloatSpec::new("toggle.stuck_percent", 0.0, 100.0, 8);
pub const PROGRESS: FloatSpec = FloatSpec::new("scalar.progress", 0.0, 100.0, 8);
pub const SECTOR_STRENGTH: FloatSpec = FloatSpec::new("sector.strength", 0.0, 1.0, 8);
pub const DECAL_ALPHA: FloatSpec = FloatSpec::new("decal.alpha", 0.0, 1.0, 8);
pub const WATER_FRACTION: FloatSpec = FloatSpec::new("environment.water", 0.0, 1.5, 8);
pub const OXYGEN_PERCENT: FloatSpec = FloatSpec::new("environment.oxygen", 0.0, 100.0, 8);
pub const FIRE_COORD: FloatSpec = FloatSpec::new("fire.coord", 0.0, 1.0, 8);
pub const FIRE_SIZE: FloatSpec = FloatSpec::new("fire.size", 0.0, 1.0, 8);

/// Stable identifier of one replicated entity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct ReplicaId(pub u16);

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "replica#{}", self.0)
    }
}

/// Replicated entity kinds. The kind fixes the wire layout and which
/// reconciliation class governs local edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Door,
    Light,
    Repair,
    Scanner,
    Compartment,
}

impl EntityKind {
    pub fn class(self) -> ReconcileClass {
        match self {
            EntityKind::Door | EntityKind::Light => ReconcileClass::BinaryToggle,
            EntityKind::Repair | EntityKind::Scanner => ReconcileClass::ContinuousScalar,
            EntityKind::Compartment => ReconcileClass::AggregateStructured,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Door => "Door",
            EntityKind::Light => "Light",
            EntityKind::Repair => "Repair",
            EntityKind::Scanner => "Scanner",
            EntityKind::Compartment => "Compartment",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Door" => Some(EntityKind::Door),
            "Light" => Some(EntityKind::Light),
            "Repair" => Some(EntityKind::Repair),
            "Scanner" => Some(EntityKind::Scanner),
            "Compartment" => Some(EntityKind::Compartment),
            _ => None,
        }
    }
}

/// How locally edited state is reconciled against server updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileClass {
    BinaryToggle,
    ContinuousScalar,
    AggregateStructured,
}

/// Per-entity layout parameters the decoder needs before parsing a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityShape {
    pub kind: EntityKind,
    pub sector_count: u32,
}

impl EntityShape {
    pub fn simple(kind: EntityKind) -> Self {
        debug_assert!(kind != EntityKind::Compartment);
        Self {
            kind,
            sector_count: 0,
        }
    }

    pub fn compartment(sector_count: u32) -> Self {
        debug_assert!(sector_count <= MAX_SECTORS);
        Self {
            kind: EntityKind::Compartment,
            sector_count,
        }
    }
}

bitflags! {
    /// Boolean state of a door- or light-class entity, five bits on the wire.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ToggleFlags: u8 {
        const OPEN = 1 << 0;
        const BROKEN = 1 << 1;
        const FORCED_OPEN = 1 << 2;
        const STUCK = 1 << 3;
        const JAMMED = 1 << 4;
    }
}

impl Default for ToggleFlags {
    fn default() -> Self {
        ToggleFlags::empty()
    }
}

const TOGGLE_FLAG_BITS: u32 = 5;

/// Full state of a binary toggle entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ToggleSnapshot {
    pub flags: ToggleFlags,
    pub stuck_percent: f32,
    pub last_user: u16,
}

/// Full state of a continuous scalar entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ScalarSnapshot {
    pub progress: f32,
    pub active: bool,
    pub last_user: u16,
}

/// One paint sector of a compartment aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct SectorColor {
    pub strength: f32,
    pub color: u32,
}

/// One decal slot of a compartment aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct DecalState {
    pub decal_id: u8,
    pub alpha: f32,
}

/// One active fire inside a compartment, in compartment-local coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct FireSource {
    pub x: f32,
    pub y: f32,
    pub size: f32,
}

/// Environmental readings of a compartment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EnvironmentState {
    pub water_fraction: f32,
    pub oxygen_percent: f32,
    pub fires: Vec<FireSource>,
}

/// Full state of a compartment aggregate. `sectors` length always equals the
/// entity's declared sector count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CompartmentSnapshot {
    pub sectors: Vec<SectorColor>,
    pub decals: Vec<DecalState>,
    pub environment: EnvironmentState,
}

/// Partial update for one facet of a compartment aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompartmentPatch {
    /// Contiguous run of sector colors starting at `start`. Runs carry
    /// [`SECTORS_PER_PATCH`] entries except the final run of a sweep, which
    /// carries the remainder.
    Sectors { start: u32, colors: Vec<SectorColor> },
    Decal { index: u8, alpha: f32 },
    Environment(EnvironmentState),
}

const PATCH_SECTORS: u32 = 0;
const PATCH_DECAL: u32 = 1;
const PATCH_ENVIRONMENT: u32 = 2;
const PATCH_KIND_BITS: u32 = 2;

/// Payload of one update message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpdatePayload {
    Toggle(ToggleSnapshot),
    Scalar(ScalarSnapshot),
    Compartment(CompartmentSnapshot),
    Patch(CompartmentPatch),
}

impl UpdatePayload {
    pub fn label(&self) -> &'static str {
        match self {
            UpdatePayload::Toggle(_) => "toggle",
            UpdatePayload::Scalar(_) => "scalar",
            UpdatePayload::Compartment(_) => "snapshot",
            UpdatePayload::Patch(_) => "patch",
        }
    }
}

/// One decoded update message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate {
    pub replica: ReplicaId,
    pub tick: u32,
    pub payload: UpdatePayload,
}

/// Reads only the addressed entity id so callers can resolve the entity's
/// shape before committing to a full parse.
pub fn peek_replica(bytes: &[u8]) -> Result<ReplicaId, WireError> {
    let mut reader = BitReader::new(bytes);
    Ok(ReplicaId(reader.read_u16()?))
}

pub fn encode_update(update: &EntityUpdate, shape: EntityShape) -> Result<Vec<u8>, WireError> {
    let mut writer = BitWriter::with_capacity(16);
    writer.write_u16(update.replica.0);
    writer.write_u32(update.tick);
    writer.write_bool(matches!(update.payload, UpdatePayload::Patch(_)));
    match &update.payload {
        UpdatePayload::Toggle(toggle) => encode_toggle(&mut writer, toggle)?,
        UpdatePayload::Scalar(scalar) => encode_scalar(&mut writer, scalar)?,
        UpdatePayload::Compartment(snapshot) => {
            encode_compartment(&mut writer, snapshot, shape)?;
        }
        UpdatePayload::Patch(patch) => {
            if shape.kind != EntityKind::Compartment {
                return Err(WireError::PatchUnsupported);
            }
            encode_patch(&mut writer, patch, shape)?;
        }
    }
    Ok(writer.finish())
}

pub fn decode_update(bytes: &[u8], shape: EntityShape) -> Result<EntityUpdate, WireError> {
    let mut reader = BitReader::new(bytes);
    let replica = ReplicaId(reader.read_u16()?);
    let tick = reader.read_u32()?;
    let is_patch = reader.read_bool()?;
    let payload = if is_patch {
        if shape.kind != EntityKind::Compartment {
            return Err(WireError::PatchUnsupported);
        }
        UpdatePayload::Patch(decode_patch(&mut reader, shape)?)
    } else {
        match shape.kind {
            EntityKind::Door | EntityKind::Light => {
                UpdatePayload::Toggle(decode_toggle(&mut reader)?)
            }
            EntityKind::Repair | EntityKind::Scanner => {
                UpdatePayload::Scalar(decode_scalar(&mut reader)?)
            }
            EntityKind::Compartment => {
                UpdatePayload::Compartment(decode_compartment(&mut reader, shape)?)
            }
        }
    };
    reader.finish()?;
    Ok(EntityUpdate {
        replica,
        tick,
        payload,
    })
}

fn encode_toggle(writer: &mut BitWriter, toggle: &ToggleSnapshot) -> Result<(), WireError> {
    writer.write_bits(u32::from(toggle.flags.bits()), TOGGLE_FLAG_BITS);
    STUCK_PERCENT.encode(writer, toggle.stuck_percent)?;
    writer.write_u16(toggle.last_user);
    Ok(())
}

fn decode_toggle(reader: &mut BitReader) -> Result<ToggleSnapshot, WireError> {
    let bits = reader.read_bits(TOGGLE_FLAG_BITS)?;
    Ok(ToggleSnapshot {
        flags: ToggleFlags::from_bits_truncate(bits as u8),
        stuck_percent: STUCK_PERCENT.decode(reader)?,
        last_user: reader.read_u16()?,
    })
}

fn encode_scalar(writer: &mut BitWriter, scalar: &ScalarSnapshot) -> Result<(), WireError> {
    PROGRESS.encode(writer, scalar.progress)?;
    writer.write_bool(scalar.active);
    writer.write_u16(scalar.last_user);
    Ok(())
}

fn decode_scalar(reader: &mut BitReader) -> Result<ScalarSnapshot, WireError> {
    Ok(ScalarSnapshot {
        progress: PROGRESS.decode(reader)?,
        active: reader.read_bool()?,
        last_user: reader.read_u16()?,
    })
}

fn encode_compartment(
    writer: &mut BitWriter,
    snapshot: &CompartmentSnapshot,
    shape: EntityShape,
) -> Result<(), WireError> {
    if snapshot.sectors.len() as u32 != shape.sector_count {
        return Err(WireError::SectionCountMismatch {
            expected: shape.sector_count,
            got: snapshot.sectors.len() as u32,
        });
    }
    write_ranged_u32(writer, "snapshot.sector_count", shape.sector_count, MAX_SECTORS)?;
    for sector in &snapshot.sectors {
        encode_sector(writer, sector)?;
    }
    write_ranged_u32(
        writer,
        "snapshot.decal_count",
        snapshot.decals.len() as u32,
        MAX_DECALS,
    )?;
    for decal in &snapshot.decals {
        writer.write_u8(decal.decal_id);
        DECAL_ALPHA.encode(writer, decal.alpha)?;
    }
    encode_environment(writer, &snapshot.environment)
}

fn decode_compartment(
    reader: &mut BitReader,
    shape: EntityShape,
) -> Result<CompartmentSnapshot, WireError> {
    let sector_count = read_ranged_u32(reader, "snapshot.sector_count", MAX_SECTORS)?;
    if sector_count != shape.sector_count {
        return Err(WireError::SectionCountMismatch {
            expected: shape.sector_count,
            got: sector_count,
        });
    }
    let mut sectors = Vec::with_capacity(sector_count as usize);
    for _ in 0..sector_count {
        sectors.push(decode_sector(reader)?);
    }
    let decal_count = read_ranged_u32(reader, "snapshot.decal_count", MAX_DECALS)?;
    let mut decals = Vec::with_capacity(decal_count as usize);
    for _ in 0..decal_count {
        decals.push(DecalState {
            decal_id: reader.read_u8()?,
            alpha: DECAL_ALPHA.decode(reader)?,
        });
    }
    Ok(CompartmentSnapshot {
        sectors,
        decals,
        environment: decode_environment(reader)?,
    })
}

fn encode_patch(
    writer: &mut BitWriter,
    patch: &CompartmentPatch,
    shape: EntityShape,
) -> Result<(), WireError> {
    match patch {
        CompartmentPatch::Sectors { start, colors } => {
            writer.write_bits(PATCH_SECTORS, PATCH_KIND_BITS);
            if shape.sector_count == 0 {
                return Err(WireError::SectorStartOutOfRange {
                    start: *start,
                    sector_count: 0,
                });
            }
            write_ranged_u32(writer, "patch.sector_start", *start, shape.sector_count - 1)?;
            let run = sector_run_len(*start, shape.sector_count);
            if colors.len() as u32 != run {
                return Err(WireError::SectionCountMismatch {
                    expected: run,
                    got: colors.len() as u32,
                });
            }
            for sector in colors {
                encode_sector(writer, sector)?;
            }
        }
        CompartmentPatch::Decal { index, alpha } => {
            writer.write_bits(PATCH_DECAL, PATCH_KIND_BITS);
            writer.write_u8(*index);
            DECAL_ALPHA.encode(writer, *alpha)?;
        }
        CompartmentPatch::Environment(environment) => {
            writer.write_bits(PATCH_ENVIRONMENT, PATCH_KIND_BITS);
            encode_environment(writer, environment)?;
        }
    }
    Ok(())
}

fn decode_patch(reader: &mut BitReader, shape: EntityShape) -> Result<CompartmentPatch, WireError> {
    match reader.read_bits(PATCH_KIND_BITS)? {
        PATCH_SECTORS => {
            if shape.sector_count == 0 {
                return Err(WireError::SectorStartOutOfRange {
                    start: 0,
                    sector_count: 0,
                });
            }
            let start =
                read_ranged_u32(reader, "patch.sector_start", shape.sector_count - 1)?;
            let run = sector_run_len(start, shape.sector_count);
            let mut colors = Vec::with_capacity(run as usize);
            for _ in 0..run {
                colors.push(decode_sector(reader)?);
            }
            Ok(CompartmentPatch::Sectors { start, colors })
        }
        PATCH_DECAL => Ok(CompartmentPatch::Decal {
            index: reader.read_u8()?,
            alpha: DECAL_ALPHA.decode(reader)?,
        }),
        PATCH_ENVIRONMENT => Ok(CompartmentPatch::Environment(decode_environment(reader)?)),
        other => Err(WireError::UnknownPatchKind(other)),
    }
}

/// Entries in the sector run starting at `start`. The run length is derived
/// from the entity shape on both ends, so it never travels on the wire.
fn sector_run_len(start: u32, sector_count: u32) -> u32 {
    SECTORS_PER_PATCH.min(sector_count - start)
}

fn encode_sector(writer: &mut BitWriter, sector: &SectorColor) -> Result<(), WireError> {
    SECTOR_STRENGTH.encode(writer, sector.strength)?;
    writer.write_u32(sector.color);
    Ok(())
}

fn decode_sector(reader: &mut BitReader) -> Result<SectorColor, WireError> {
    Ok(SectorColor {
        strength: SECTOR_STRENGTH.decode(reader)?,
        color: reader.read_u32()?,
    })
}

fn encode_environment(
    writer: &mut BitWriter,
    environment: &EnvironmentState,
) -> Result<(), WireError> {
    WATER_FRACTION.encode(writer, environment.water_fraction)?;
    OXYGEN_PERCENT.encode(writer, environment.oxygen_percent)?;
    writer.write_bool(!environment.fires.is_empty());
    if !environment.fires.is_empty() {
        write_ranged_u32(
            writer,
            "environment.fire_count",
            environment.fires.len() as u32,
            MAX_FIRE_SOURCES,
        )?;
        for fire in &environment.fires {
            FIRE_COORD.encode(writer, fire.x)?;
            FIRE_COORD.encode(writer, fire.y)?;
            FIRE_SIZE.encode(writer, fire.size)?;
        }
    }
    Ok(())
}

fn decode_environment(reader: &mut BitReader) -> Result<EnvironmentState, WireError> {
    let water_fraction = WATER_FRACTION.decode(reader)?;
    let oxygen_percent = OXYGEN_PERCENT.decode(reader)?;
    let mut fires = Vec::new();
    if reader.read_bool()? {
        let count = read_ranged_u32(reader, "environment.fire_count", MAX_FIRE_SOURCES)?;
        fires.reserve(count as usize);
        for _ in 0..count {
            fires.push(FireSource {
                x: FIRE_COORD.decode(reader)?,
                y: FIRE_COORD.decode(reader)?,
                size: FIRE_SIZE.decode(reader)?,
            });
        }
    }
    Ok(EnvironmentState {
        water_fraction,
        oxygen_percent,
        fires,
    })
}

/// Frames independent messages into one batch. Each entry travels behind its
/// own length prefix, so a decode failure in one message cannot desync the
/// rest of the batch.
pub fn encode_batch(messages: &[Vec<u8>]) -> Result<Vec<u8>, WireError> {
    if messages.len() as u32 > MAX_BATCH_MESSAGES {
        return Err(WireError::IntOutOfRange {
            field: "batch.count",
            value: messages.len() as u32,
            max: MAX_BATCH_MESSAGES,
        });
    }
    let total: usize = messages.iter().map(|message| message.len() + 2).sum();
    let mut out = Vec::with_capacity(1 + total);
    out.push(messages.len() as u8);
    for message in messages {
        if message.len() > MAX_MESSAGE_BYTES {
            return Err(WireError::MessageTooLong(message.len()));
        }
        out.extend_from_slice(&(message.len() as u16).to_le_bytes());
        out.extend_from_slice(message);
    }
    Ok(out)
}

/// Splits a batch frame back into per-message slices without copying.
pub fn split_batch(bytes: &[u8]) -> Result<Vec<&[u8]>, WireError> {
    let Some((&count, mut rest)) = bytes.split_first() else {
        return Err(WireError::Underrun { requested: 8 });
    };
    if u32::from(count) > MAX_BATCH_MESSAGES {
        return Err(WireError::IntOutOfRange {
            field: "batch.count",
            value: u32::from(count),
            max: MAX_BATCH_MESSAGES,
        });
    }
    let mut messages = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if rest.len() < 2 {
            return Err(WireError::Underrun { requested: 16 });
        }
        let (prefix, tail) = rest.split_at(2);
        let len = u16::from_le_bytes([prefix[0], prefix[1]]) as usize;
        if len > MAX_MESSAGE_BYTES {
            return Err(WireError::MessageTooLong(len));
        }
        if tail.len() < len {
            return Err(WireError::Underrun {
                requested: len as u32 * 8,
            });
        }
        let (message, remaining) = tail.split_at(len);
        messages.push(message);
        rest = remaining;
    }
    if !rest.is_empty() {
        return Err(WireError::TrailingBytes);
    }
    Ok(messages)
}
