//! Quantized field codecs.
//!
//! Integers travel at the narrowest width that covers their declared span,
//! floats as fixed-point codes over a declared interval. Decoding validates
//! against the span, not the bit width: a raw code the width can represent
//! but the span cannot is a protocol error.

use crate::bitio::{BitReader, BitWriter, WireError};

/// Narrowest bit width able to represent every value in `0..=span`.
///
/// A span of zero needs no bits at all; such fields are omitted from the
/// stream entirely.
pub fn bits_for_span(span: u32) -> u32 {
    32 - span.leading_zeros()
}

/// Writes `value` at the width derived from `max`, rejecting values outside
/// `0..=max` before any bits are emitted.
pub fn write_ranged_u32(
    writer: &mut BitWriter,
    field: &'static str,
    value: u32,
    max: u32,
) -> Result<(), WireError> {
    if value > max {
        return Err(WireError::IntOutOfRange { field, value, max });
    }
    let bits = bits_for_span(max);
    if bits > 0 {
        writer.write_bits(value, bits);
    }
    Ok(())
}

/// Reads a value at the width derived from `max` and validates it against the
/// span. The width often over-covers the span, so in-width raw values above
/// `max` still fail.
pub fn read_ranged_u32(
    reader: &mut BitReader,
    field: &'static str,
    max: u32,
) -> Result<u32, WireError> {
    let bits = bits_for_span(max);
    if bits == 0 {
        return Ok(0);
    }
    let value = reader.read_bits(bits)?;
    if value > max {
        return Err(WireError::IntOutOfRange { field, value, max });
    }
    Ok(value)
}

/// Fixed-point layout for one bounded float field.
///
/// Encoding clamps into `[min, max]` and rounds to the nearest of
/// `2^bits - 1` uniform steps; every raw code maps back inside the interval,
/// so float fields never produce decode errors on their own.
#[derive(Debug, Clone, Copy)]
pub struct FloatSpec {
    pub field: &'static str,
    pub min: f32,
    pub max: f32,
    pub bits: u32,
}

impl FloatSpec {
    pub const fn new(field: &'static str, min: f32, max: f32, bits: u32) -> Self {
        Self {
            field,
            min,
            max,
            bits,
        }
    }

    fn steps(&self) -> u32 {
        debug_assert!((1..=16).contains(&self.bits));
        (1 << self.bits) - 1
    }

    /// Worst-case round-trip error, half a quantization step.
    pub fn tolerance(&self) -> f32 {
        (self.max - self.min) / self.steps() as f32 * 0.5
    }

    pub fn encode(&self, writer: &mut BitWriter, value: f32) -> Result<(), WireError> {
        if !value.is_finite() {
            return Err(WireError::NonFinite {
                field: self.field,
                value,
            });
        }
        let steps = self.steps();
        let normalized = (value.clamp(self.min, self.max) - self.min) / (self.max - self.min);
        let raw = (normalized * steps as f32).round() as u32;
        writer.write_bits(raw.min(steps), self.bits);
        Ok(())
    }

    pub fn decode(&self, reader: &mut BitReader) -> Result<f32, WireError> {
        let raw = reader.read_bits(self.bits)?;
        Ok(self.min + raw as f32 / self.steps() as f32 * (self.max - self.min))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_widths_cover_and_no_more() {
        assert_eq!(bits_for_span(0), 0);
        assert_eq!(bits_for_span(1), 1);
        assert_eq!(bits_for_span(16), 5);
        assert_eq!(bits_for_span(31), 5);
        assert_eq!(bits_for_span(32), 6);
        assert_eq!(bits_for_span(u32::MAX), 32);
    }

    #[test]
    fn in_width_raw_above_span_is_rejected() {
        // Span 0..=16 travels at five bits, which also represent 17..=31.
        let mut writer = BitWriter::new();
        writer.write_bits(17, 5);
        let bytes = writer.finish();

        let mut reader = BitReader::new(&bytes);
        assert_eq!(
            read_ranged_u32(&mut reader, "fires", 16),
            Err(WireError::IntOutOfRange {
                field: "fires",
                value: 17,
                max: 16,
            })
        );
    }

    #[test]
    fn zero_span_emits_no_bits() {
        let mut writer = BitWriter::new();
        write_ranged_u32(&mut writer, "only", 0, 0).unwrap();
        assert_eq!(writer.bit_len(), 0);

        let mut reader = BitReader::new(&[]);
        assert_eq!(read_ranged_u32(&mut reader, "only", 0).unwrap(), 0);
    }

    #[test]
    fn encoder_rejects_out_of_span_value() {
        let mut writer = BitWriter::new();
        assert_eq!(
            write_ranged_u32(&mut writer, "decals", 9, 8),
            Err(WireError::IntOutOfRange {
                field: "decals",
                value: 9,
                max: 8,
            })
        );
        assert_eq!(writer.bit_len(), 0);
    }

    #[test]
    fn float_round_trip_stays_within_tolerance() {
        let spec = FloatSpec::new("strength", 0.0, 1.0, 8);
        for value in [0.0, 0.125, 0.5, 0.987, 1.0] {
            let mut writer = BitWriter::new();
            spec.encode(&mut writer, value).unwrap();
            let bytes = writer.finish();
            let mut reader = BitReader::new(&bytes);
            let decoded = spec.decode(&mut reader).unwrap();
            assert!(
                (decoded - value).abs() <= spec.tolerance(),
                "{value} decoded as {decoded}"
            );
        }
    }

    #[test]
    fn float_encode_clamps_out_of_interval_input() {
        let spec = FloatSpec::new("oxygen", 0.0, 100.0, 8);
        let mut writer = BitWriter::new();
        spec.encode(&mut writer, 180.0).unwrap();
        let bytes = writer.finish();
        let mut reader = BitReader::new(&bytes);
        assert_eq!(spec.decode(&mut reader).unwrap(), 100.0);
    }

    #[test]
    fn float_encode_rejects_nan() {
        let spec = FloatSpec::new("water", 0.0, 1.5, 8);
        let mut writer = BitWriter::new();
        assert!(matches!(
            spec.encode(&mut writer, f32::NAN),
            Err(WireError::NonFinite { field: "water", .. })
        ));
    }

    #[test]
    fn every_raw_code_decodes_inside_interval() {
        let spec = FloatSpec::new("alpha", 0.0, 1.0, 4);
        for raw in 0..16 {
            let mut writer = BitWriter::new();
            writer.write_bits(raw, 4);
            let bytes = writer.finish();
            let mut reader = BitReader::new(&bytes);
            let value = spec.decode(&mut reader).unwrap();
            assert!((0.0..=1.0).contains(&value));
        }
    }
}
