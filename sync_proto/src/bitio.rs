//! Bit-level stream primitives.
//!
//! Updates are packed field-by-field with no byte alignment between fields,
//! least significant bit first. Both ends accumulate through a 64-bit scratch
//! word so a single field never spans more than one flush.

use thiserror::Error;

/// Decode and validation failures for the wire layer.
///
/// Every variant is fatal for the message that produced it. Framing keeps
/// messages independent, so a batch drops only the offending entry.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WireError {
    #[error("bit stream ended while reading {requested} bits")]
    Underrun { requested: u32 },
    #[error("{field} raw value {value} exceeds declared maximum {max}")]
    IntOutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },
    #[error("{field} must be finite, got {value}")]
    NonFinite { field: &'static str, value: f32 },
    #[error("unknown patch discriminator {0}")]
    UnknownPatchKind(u32),
    #[error("partial patch addressed to non-aggregate entity")]
    PatchUnsupported,
    #[error("snapshot carries {got} paint sectors, entity declares {expected}")]
    SectionCountMismatch { expected: u32, got: u32 },
    #[error("sector run starts at {start}, entity declares {sector_count} sectors")]
    SectorStartOutOfRange { start: u32, sector_count: u32 },
    #[error("message of {0} bytes exceeds the per-message frame limit")]
    MessageTooLong(usize),
    #[error("trailing payload after final field")]
    TrailingBytes,
}

/// Accumulates fields into a byte buffer, least significant bit first.
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    scratch: u64,
    scratch_bits: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            scratch: 0,
            scratch_bits: 0,
        }
    }

    /// Appends the low `bits` bits of `value`. `bits` must be in `1..=32` and
    /// `value` must fit in that width.
    pub fn write_bits(&mut self, value: u32, bits: u32) {
        debug_assert!((1..=32).contains(&bits));
        debug_assert!(bits == 32 || value < (1 << bits));
        self.scratch |= u64::from(value) << self.scratch_bits;
        self.scratch_bits += bits;
        while self.scratch_bits >= 8 {
            self.bytes.push((self.scratch & 0xff) as u8);
            self.scratch >>= 8;
            self.scratch_bits -= 8;
        }
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_bits(u32::from(value), 1);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_bits(u32::from(value), 8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_bits(u32::from(value), 16);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_bits(value, 32);
    }

    /// Total bits written so far, including any unflushed scratch.
    pub fn bit_len(&self) -> usize {
        self.bytes.len() * 8 + self.scratch_bits as usize
    }

    /// Flushes the final partial byte (zero padded) and returns the buffer.
    pub fn finish(mut self) -> Vec<u8> {
        if self.scratch_bits > 0 {
            self.bytes.push((self.scratch & 0xff) as u8);
        }
        self.bytes
    }
}

/// Reads fields back out of a buffer produced by [`BitWriter`].
#[derive(Debug)]
pub struct BitReader<'a> {
    bytes: &'a [u8],
    next: usize,
    scratch: u64,
    scratch_bits: u32,
}

impl<'a> BitReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            next: 0,
            scratch: 0,
            scratch_bits: 0,
        }
    }

    /// Consumes `bits` bits (`1..=32`) and returns them right-aligned.
    pub fn read_bits(&mut self, bits: u32) -> Result<u32, WireError> {
        debug_assert!((1..=32).contains(&bits));
        while self.scratch_bits < bits {
            let Some(&byte) = self.bytes.get(self.next) else {
                return Err(WireError::Underrun { requested: bits });
            };
            self.scratch |= u64::from(byte) << self.scratch_bits;
            self.scratch_bits += 8;
            self.next += 1;
        }
        let value = (self.scratch & ((1u64 << bits) - 1)) as u32;
        self.scratch >>= bits;
        self.scratch_bits -= bits;
        Ok(value)
    }

    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.read_bits(1)? != 0)
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.read_bits(8)? as u8)
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        Ok(self.read_bits(16)? as u16)
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        self.read_bits(32)
    }

    /// Verifies the stream is exhausted apart from zero padding in the final
    /// byte. A message that decodes cleanly but leaves payload behind was
    /// framed for a different layout.
    pub fn finish(self) -> Result<(), WireError> {
        if self.next < self.bytes.len() || self.scratch != 0 {
            return Err(WireError::TrailingBytes);
        }
        Ok(())
    }
}
