//! Format parsers and encoders.
//!
//! Each submodule implements one wire format over the shared [`Parser`]
//! seam: an explicit frame stack, one visitor event per data item, and a
//! pump flag that lets a cursor take events one at a time. Encoders
//! implement [`Visitor`](crate::event::Visitor) directly, so transcoding a
//! document between formats is a parse with the target encoder as the
//! consumer.

use crate::error::DecodeError;
use crate::event::Visitor;
use crate::source::Source;

pub mod bson;
pub mod cbor;
pub mod msgpack;
pub mod ubjson;

pub use bson::{BsonEncoder, BsonParser};
pub use cbor::{CborEncoder, CborParser};
pub use msgpack::{MsgpackEncoder, MsgpackParser};
pub use ubjson::{UbjsonEncoder, UbjsonParser};

/// Mark level value meaning "no mark armed".
pub(crate) const NO_MARK: usize = usize::MAX;

/// The seam between a format parser and its drivers.
///
/// `parse` pumps events into the visitor until the visitor declines, the
/// parser pauses (cursor mode, or an armed mark level), or the document
/// completes. `restart` re-arms a paused parser; `done` reports that
/// `end_document` has been delivered.
pub trait Parser {
    type Source: Source;

    /// Pumps events until paused or done.
    fn parse(&mut self, visitor: &mut dyn Visitor) -> Result<(), DecodeError>;

    /// True once `end_document` has been emitted.
    fn done(&self) -> bool;

    /// Re-arms the pump after a pause.
    fn restart(&mut self);

    /// Rewinds parser state for the next document, keeping the source and
    /// its position.
    fn reset(&mut self);

    /// Rewinds parser state and replaces the source.
    fn reset_with(&mut self, source: Self::Source);

    /// Current byte offset in the source.
    fn position(&self) -> u64;

    /// Number of currently open containers.
    fn level(&self) -> usize;

    /// In cursor mode the parser pauses after every event.
    fn set_cursor_mode(&mut self, on: bool);

    /// Arms a pause on the end-container event that returns to `level`;
    /// [`NO_MARK`] disarms.
    fn set_mark_level(&mut self, level: usize);

    /// Runs the whole document, restarting across consumer pauses.
    fn parse_all(&mut self, visitor: &mut dyn Visitor) -> Result<(), DecodeError> {
        while !self.done() {
            self.restart();
            self.parse(visitor)?;
        }
        Ok(())
    }
}

/// Widens an IEEE 754 binary16 bit pattern to `f64` (RFC 8949 appendix D).
pub fn half_to_f64(bits: u16) -> f64 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = (bits >> 10) & 0x1f;
    let fraction = f64::from(bits & 0x03ff);
    match exponent {
        0 => sign * fraction * 2f64.powi(-24),
        0x1f => {
            if fraction == 0.0 {
                sign * f64::INFINITY
            } else {
                f64::NAN
            }
        }
        _ => sign * (1.0 + fraction / 1024.0) * 2f64.powi(i32::from(exponent) - 15),
    }
}

/// Renders a sign + big-endian magnitude as a decimal digit string.
pub(crate) fn magnitude_to_decimal(negative: bool, magnitude: &[u8]) -> String {
    let mut limbs: Vec<u8> = magnitude.iter().copied().skip_while(|&b| b == 0).collect();
    if limbs.is_empty() {
        return "0".to_owned();
    }
    // Repeated divmod by 10 over base-256 limbs, least significant digit
    // first.
    let mut digits: Vec<u8> = Vec::new();
    while !limbs.is_empty() {
        let mut rem: u32 = 0;
        let mut next: Vec<u8> = Vec::with_capacity(limbs.len());
        for &b in &limbs {
            let cur = (rem << 8) | u32::from(b);
            let q = cur / 10;
            rem = cur % 10;
            if !next.is_empty() || q != 0 {
                next.push(q as u8);
            }
        }
        digits.push(b'0' + rem as u8);
        limbs = next;
    }
    let mut out = String::with_capacity(digits.len() + 1);
    if negative {
        out.push('-');
    }
    out.extend(digits.iter().rev().map(|&d| char::from(d)));
    out
}

/// Parses an optionally signed decimal digit string into sign + big-endian
/// magnitude. Returns `None` on anything that is not a plain integer.
pub(crate) fn decimal_to_magnitude(text: &str) -> Option<(bool, Vec<u8>)> {
    let (negative, digits) = match text.as_bytes() {
        [b'-', rest @ ..] => (true, rest),
        [b'+', rest @ ..] => (false, rest),
        rest => (false, rest),
    };
    if digits.is_empty() || !digits.iter().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // Multiply-accumulate into base-256 limbs.
    let mut limbs: Vec<u8> = Vec::new();
    for &d in digits {
        let mut carry = u32::from(d - b'0');
        for limb in limbs.iter_mut().rev() {
            let cur = u32::from(*limb) * 10 + carry;
            *limb = (cur & 0xff) as u8;
            carry = cur >> 8;
        }
        while carry > 0 {
            limbs.insert(0, (carry & 0xff) as u8);
            carry >>= 8;
        }
    }
    if limbs.is_empty() {
        limbs.push(0);
    }
    Some((negative && limbs != [0], limbs))
}

/// Adds one to a big-endian magnitude.
pub(crate) fn magnitude_plus_one(magnitude: &[u8]) -> Vec<u8> {
    let mut out = magnitude.to_vec();
    for b in out.iter_mut().rev() {
        let (sum, overflow) = b.overflowing_add(1);
        *b = sum;
        if !overflow {
            return out;
        }
    }
    out.insert(0, 1);
    out
}

/// Subtracts one from a big-endian magnitude (saturating at zero).
pub(crate) fn magnitude_minus_one(magnitude: &[u8]) -> Vec<u8> {
    let mut out = magnitude.to_vec();
    for b in out.iter_mut().rev() {
        let (diff, borrow) = b.overflowing_sub(1);
        *b = diff;
        if !borrow {
            while out.len() > 1 && out[0] == 0 {
                out.remove(0);
            }
            return out;
        }
    }
    // All bytes borrowed: the input was zero.
    vec![0]
}

/// Big-endian magnitude bytes of a `u128`, without leading zeros.
pub(crate) fn u128_magnitude_bytes(v: u128) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(15);
    bytes[skip..].to_vec()
}

#[cfg(test)]
pub(crate) mod strategies {
    use proptest::prelude::*;
    use proptest::strategy::Union;

    use crate::event::Tag;
    use crate::value::Value;

    /// What a wire format can represent losslessly; round-trip properties
    /// only generate values inside these bounds.
    #[derive(Debug, Clone, Copy)]
    pub(crate) struct FormatCaps {
        /// Unsigned values above `i64::MAX` survive unchanged.
        pub full_u64: bool,
        /// Byte strings have a native representation.
        pub bytes: bool,
    }

    fn arb_double() -> impl Strategy<Value = f64> {
        prop_oneof![
            Just(0.0),
            Just(-0.0),
            Just(f64::INFINITY),
            Just(f64::NEG_INFINITY),
            -1.0e12..1.0e12,
        ]
    }

    fn arb_scalar(caps: FormatCaps) -> BoxedStrategy<Value> {
        let uint = if caps.full_u64 {
            any::<u64>().boxed()
        } else {
            (0..=i64::MAX as u64).boxed()
        };
        let mut options = vec![
            Just(Value::Null(Tag::None)).boxed(),
            any::<bool>().prop_map(Value::Bool).boxed(),
            any::<i64>().prop_map(|v| Value::Int(v, Tag::None)).boxed(),
            uint.prop_map(|v| Value::UInt(v, Tag::None)).boxed(),
            arb_double()
                .prop_map(|v| Value::Double(v, Tag::None))
                .boxed(),
            "[ -~]{0,12}".prop_map(Value::from).boxed(),
        ];
        if caps.bytes {
            options.push(
                prop::collection::vec(any::<u8>(), 0..12)
                    .prop_map(|b| Value::Bytes(b, Tag::None))
                    .boxed(),
            );
        }
        Union::new(options).boxed()
    }

    /// Recursive value trees bounded to keep cases fast.
    pub(crate) fn arb_value(caps: FormatCaps) -> impl Strategy<Value = Value> {
        arb_scalar(caps).prop_recursive(3, 24, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::vec(("[a-z]{0,6}", inner), 0..6).prop_map(Value::Object),
            ]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::TreeDecoder;
    use crate::error::ErrorKind;
    use crate::event::{CheckedVisitor, Tag};
    use crate::limits::DecodeOptions;
    use crate::source::SliceSource;
    use crate::value::Value;

    fn scenario_value() -> Value {
        Value::Object(vec![(
            "a".to_owned(),
            Value::Array(vec![
                Value::UInt(1, Tag::None),
                Value::UInt(2, Tag::None),
                Value::Null(Tag::None),
            ]),
        )])
    }

    fn all_format_encodings(value: &Value) -> Vec<(&'static str, Vec<u8>)> {
        vec![
            ("cbor", cbor::encode(value).unwrap()),
            ("msgpack", msgpack::encode(value).unwrap()),
            ("bson", bson::encode(value).unwrap()),
            ("ubjson", ubjson::encode(value).unwrap()),
        ]
    }

    fn decode_format(format: &str, bytes: &[u8]) -> Result<Value, DecodeError> {
        match format {
            "cbor" => cbor::decode(bytes),
            "msgpack" => msgpack::decode(bytes),
            "bson" => bson::decode(bytes),
            "ubjson" => ubjson::decode(bytes),
            other => panic!("unknown format {other}"),
        }
    }

    #[test]
    fn test_scenario_round_trip_every_format() {
        let value = scenario_value();
        for (format, bytes) in all_format_encodings(&value) {
            let decoded = decode_format(format, &bytes)
                .unwrap_or_else(|e| panic!("{format}: {e}"));
            assert_eq!(decoded, value, "{format}");
        }
    }

    #[test]
    fn test_scenario_last_byte_truncation_every_format() {
        let value = scenario_value();
        for (format, bytes) in all_format_encodings(&value) {
            let err = decode_format(format, &bytes[..bytes.len() - 1])
                .expect_err(format);
            assert!(
                matches!(err.kind(), ErrorKind::UnexpectedEof { .. }),
                "{format}: {err}"
            );
        }
    }

    #[test]
    fn test_every_prefix_fails_cleanly() {
        let value = scenario_value();
        for (format, bytes) in all_format_encodings(&value) {
            for cut in 0..bytes.len() {
                let err = decode_format(format, &bytes[..cut]).expect_err(format);
                assert!(
                    matches!(err.kind(), ErrorKind::UnexpectedEof { .. }),
                    "{format} prefix {cut}: {err}"
                );
            }
        }
    }

    #[test]
    fn test_parsers_emit_grammatical_event_streams() {
        let value = scenario_value();

        let bytes = cbor::encode(&value).unwrap();
        let mut parser =
            cbor::CborParser::with_options(SliceSource::new(&bytes), DecodeOptions::default());
        let mut checked = CheckedVisitor::new(TreeDecoder::new());
        parser.parse_all(&mut checked).unwrap();
        assert_eq!(checked.into_inner().take_value().unwrap(), value);

        let bytes = msgpack::encode(&value).unwrap();
        let mut parser = msgpack::MsgpackParser::with_options(
            SliceSource::new(&bytes),
            DecodeOptions::default(),
        );
        let mut checked = CheckedVisitor::new(TreeDecoder::new());
        parser.parse_all(&mut checked).unwrap();
        assert_eq!(checked.into_inner().take_value().unwrap(), value);

        let bytes = bson::encode(&value).unwrap();
        let mut parser =
            bson::BsonParser::with_options(SliceSource::new(&bytes), DecodeOptions::default());
        let mut checked = CheckedVisitor::new(TreeDecoder::new());
        parser.parse_all(&mut checked).unwrap();
        assert_eq!(checked.into_inner().take_value().unwrap(), value);

        let bytes = ubjson::encode(&value).unwrap();
        let mut parser = ubjson::UbjsonParser::with_options(
            SliceSource::new(&bytes),
            DecodeOptions::default(),
        );
        let mut checked = CheckedVisitor::new(TreeDecoder::new());
        parser.parse_all(&mut checked).unwrap();
        assert_eq!(checked.into_inner().take_value().unwrap(), value);
    }

    #[test]
    fn test_transcode_cbor_to_msgpack() {
        let value = scenario_value();
        let cbor_bytes = cbor::encode(&value).unwrap();

        let mut parser = cbor::CborParser::with_options(
            SliceSource::new(&cbor_bytes),
            DecodeOptions::default(),
        );
        let mut encoder = msgpack::MsgpackEncoder::new();
        parser.parse_all(&mut encoder).unwrap();

        assert_eq!(msgpack::decode(&encoder.into_bytes()).unwrap(), value);
    }

    #[test]
    fn test_half_to_f64_reference_points() {
        assert_eq!(half_to_f64(0x0000), 0.0);
        assert_eq!(half_to_f64(0x8000), -0.0);
        assert!(half_to_f64(0x8000).is_sign_negative());
        assert_eq!(half_to_f64(0x3c00), 1.0);
        assert_eq!(half_to_f64(0xc000), -2.0);
        assert_eq!(half_to_f64(0x7bff), 65504.0);
        assert_eq!(half_to_f64(0x0001), 5.960464477539063e-8);
        assert_eq!(half_to_f64(0x7c00), f64::INFINITY);
        assert_eq!(half_to_f64(0xfc00), f64::NEG_INFINITY);
        assert!(half_to_f64(0x7e00).is_nan());
    }

    #[test]
    fn test_magnitude_decimal_conversions() {
        assert_eq!(magnitude_to_decimal(false, &[]), "0");
        assert_eq!(magnitude_to_decimal(false, &[0, 0]), "0");
        assert_eq!(magnitude_to_decimal(false, &[1, 0]), "256");
        assert_eq!(magnitude_to_decimal(true, &[0xff]), "-255");
        // 2^64 = 18446744073709551616
        assert_eq!(
            magnitude_to_decimal(false, &[1, 0, 0, 0, 0, 0, 0, 0, 0]),
            "18446744073709551616"
        );

        assert_eq!(decimal_to_magnitude("0"), Some((false, vec![0])));
        assert_eq!(decimal_to_magnitude("-0"), Some((false, vec![0])));
        assert_eq!(decimal_to_magnitude("256"), Some((false, vec![1, 0])));
        assert_eq!(decimal_to_magnitude("-255"), Some((true, vec![0xff])));
        assert_eq!(
            decimal_to_magnitude("18446744073709551616"),
            Some((false, vec![1, 0, 0, 0, 0, 0, 0, 0, 0]))
        );
        assert_eq!(decimal_to_magnitude(""), None);
        assert_eq!(decimal_to_magnitude("12.5"), None);
        assert_eq!(decimal_to_magnitude("-"), None);
    }

    #[test]
    fn test_magnitude_increment_decrement() {
        assert_eq!(magnitude_plus_one(&[0xfe]), vec![0xff]);
        assert_eq!(magnitude_plus_one(&[0xff, 0xff]), vec![1, 0, 0]);
        assert_eq!(magnitude_minus_one(&[1, 0, 0]), vec![0xff, 0xff]);
        assert_eq!(magnitude_minus_one(&[1]), vec![0]);
        assert_eq!(magnitude_minus_one(&[0]), vec![0]);
        assert_eq!(u128_magnitude_bytes(0), vec![0]);
        assert_eq!(u128_magnitude_bytes(256), vec![1, 0]);
        assert_eq!(
            u128_magnitude_bytes(u128::from(u64::MAX) + 1),
            vec![1, 0, 0, 0, 0, 0, 0, 0, 0]
        );
    }
}
