//! The push-based event protocol connecting format parsers to consumers.
//!
//! Parsers translate wire bytes into a flat stream of events; consumers
//! implement [`Visitor`] and return a continue flag from every call. A
//! `false` return tells the driving parser to stop pumping further events.

use crate::codec::half_to_f64;
use crate::error::DecodeError;

/// Semantic tag attached to scalar events.
///
/// Tags preserve format-specific metadata (big numbers, timestamps, encoded
/// binary) across decode/encode round trips. Formats that cannot represent a
/// tag simply emit [`Tag::None`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    None = 0,
    /// CBOR `undefined`, BSON deprecated `undefined` (carried on null).
    Undefined = 1,
    /// Arbitrary-precision integer rendered as text.
    Bignum = 2,
    /// Arbitrary-precision decimal rendered as text.
    Bigdec = 3,
    /// Base-2 arbitrary-precision float rendered as hex text.
    Bigfloat = 4,
    /// RFC 3339 date/time text.
    Datetime = 5,
    /// Seconds since the Unix epoch.
    EpochSecond = 6,
    /// Milliseconds since the Unix epoch.
    EpochMilli = 7,
    /// Nanoseconds since the Unix epoch.
    EpochNano = 8,
    /// Byte string with an expected base16 text representation.
    Base16 = 9,
    /// Byte string with an expected base64 text representation.
    Base64 = 10,
    /// Byte string with an expected base64url text representation.
    Base64Url = 11,
    /// URI text.
    Uri = 12,
    /// Regular expression text (`/pattern/options`).
    Regex = 13,
    /// Source code text (BSON JavaScript).
    Code = 14,
    /// Object identifier rendered as hex text (BSON ObjectId).
    Id = 15,
    /// Foreign extension payload (MessagePack ext, BSON non-generic binary).
    Ext = 16,
}

impl Tag {
    /// Creates a Tag from its numeric representation.
    pub fn from_u8(v: u8) -> Option<Tag> {
        match v {
            0 => Some(Tag::None),
            1 => Some(Tag::Undefined),
            2 => Some(Tag::Bignum),
            3 => Some(Tag::Bigdec),
            4 => Some(Tag::Bigfloat),
            5 => Some(Tag::Datetime),
            6 => Some(Tag::EpochSecond),
            7 => Some(Tag::EpochMilli),
            8 => Some(Tag::EpochNano),
            9 => Some(Tag::Base16),
            10 => Some(Tag::Base64),
            11 => Some(Tag::Base64Url),
            12 => Some(Tag::Uri),
            13 => Some(Tag::Regex),
            14 => Some(Tag::Code),
            15 => Some(Tag::Id),
            16 => Some(Tag::Ext),
            _ => None,
        }
    }
}

/// Source-position context delivered with every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Context {
    /// Byte offset of the event in the source.
    pub position: u64,
}

impl Context {
    /// Creates a context at the given byte offset.
    pub fn at(position: u64) -> Self {
        Self { position }
    }

    /// Returns the byte offset of the event.
    pub fn position(&self) -> u64 {
        self.position
    }
}

/// A borrowed homogeneous numeric span (CBOR typed arrays).
///
/// `F16` elements hold raw IEEE 754 binary16 bits; the default expansion
/// widens them to `f64`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TypedArrayView<'a> {
    U8(&'a [u8]),
    U16(&'a [u16]),
    U32(&'a [u32]),
    U64(&'a [u64]),
    I8(&'a [i8]),
    I16(&'a [i16]),
    I32(&'a [i32]),
    I64(&'a [i64]),
    F16(&'a [u16]),
    F32(&'a [f32]),
    F64(&'a [f64]),
}

impl TypedArrayView<'_> {
    /// Returns the number of elements in the span.
    pub fn len(&self) -> usize {
        match self {
            TypedArrayView::U8(v) => v.len(),
            TypedArrayView::U16(v) => v.len(),
            TypedArrayView::U32(v) => v.len(),
            TypedArrayView::U64(v) => v.len(),
            TypedArrayView::I8(v) => v.len(),
            TypedArrayView::I16(v) => v.len(),
            TypedArrayView::I32(v) => v.len(),
            TypedArrayView::I64(v) => v.len(),
            TypedArrayView::F16(v) => v.len(),
            TypedArrayView::F32(v) => v.len(),
            TypedArrayView::F64(v) => v.len(),
        }
    }

    /// Returns true if the span contains no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The event protocol every parser calls and every consumer implements.
///
/// Each method returns `Ok(true)` to keep pumping, `Ok(false)` to stop early
/// (consumer-driven termination), or an error to abort. Calls respect
/// nesting: a `key` immediately precedes its value inside an object, and
/// `begin_*`/`end_*` always balance. A call-order violation is a bug in the
/// producer, checked by [`CheckedVisitor`] in debug builds, never a runtime
/// error a consumer must defend against.
pub trait Visitor {
    fn begin_document(&mut self, ctx: &Context) -> Result<bool, DecodeError>;

    fn end_document(&mut self, ctx: &Context) -> Result<bool, DecodeError>;

    /// Begins an object; `hint` is the declared member count when the wire
    /// format knows it up front.
    fn begin_object(&mut self, hint: Option<usize>, ctx: &Context) -> Result<bool, DecodeError>;

    fn end_object(&mut self, ctx: &Context) -> Result<bool, DecodeError>;

    /// Begins an array; `hint` is the declared element count when known.
    fn begin_array(&mut self, hint: Option<usize>, ctx: &Context) -> Result<bool, DecodeError>;

    fn end_array(&mut self, ctx: &Context) -> Result<bool, DecodeError>;

    fn key(&mut self, name: &str, ctx: &Context) -> Result<bool, DecodeError>;

    fn string_value(&mut self, value: &str, tag: Tag, ctx: &Context)
    -> Result<bool, DecodeError>;

    fn byte_string_value(
        &mut self,
        value: &[u8],
        tag: Tag,
        ctx: &Context,
    ) -> Result<bool, DecodeError>;

    /// An arbitrary-precision integer: sign plus big-endian magnitude bytes.
    fn bignum_value(
        &mut self,
        negative: bool,
        magnitude: &[u8],
        ctx: &Context,
    ) -> Result<bool, DecodeError>;

    fn int64_value(&mut self, value: i64, tag: Tag, ctx: &Context) -> Result<bool, DecodeError>;

    fn uint64_value(&mut self, value: u64, tag: Tag, ctx: &Context) -> Result<bool, DecodeError>;

    fn double_value(&mut self, value: f64, tag: Tag, ctx: &Context) -> Result<bool, DecodeError>;

    fn bool_value(&mut self, value: bool, ctx: &Context) -> Result<bool, DecodeError>;

    fn null_value(&mut self, tag: Tag, ctx: &Context) -> Result<bool, DecodeError>;

    /// A homogeneous numeric span. The default implementation rewrites it as
    /// `begin_array` + one numeric event per element + `end_array`, so
    /// consumers that do not handle spans natively still see a well-formed
    /// stream. The expansion is atomic: only the `end_array` continue flag
    /// propagates back to the producer.
    fn typed_array(
        &mut self,
        view: &TypedArrayView<'_>,
        tag: Tag,
        ctx: &Context,
    ) -> Result<bool, DecodeError> {
        let _ = tag;
        if !self.begin_array(Some(view.len()), ctx)? {
            return Ok(false);
        }
        match view {
            TypedArrayView::U8(v) => {
                for &x in *v {
                    self.uint64_value(u64::from(x), Tag::None, ctx)?;
                }
            }
            TypedArrayView::U16(v) => {
                for &x in *v {
                    self.uint64_value(u64::from(x), Tag::None, ctx)?;
                }
            }
            TypedArrayView::U32(v) => {
                for &x in *v {
                    self.uint64_value(u64::from(x), Tag::None, ctx)?;
                }
            }
            TypedArrayView::U64(v) => {
                for &x in *v {
                    self.uint64_value(x, Tag::None, ctx)?;
                }
            }
            TypedArrayView::I8(v) => {
                for &x in *v {
                    self.int64_value(i64::from(x), Tag::None, ctx)?;
                }
            }
            TypedArrayView::I16(v) => {
                for &x in *v {
                    self.int64_value(i64::from(x), Tag::None, ctx)?;
                }
            }
            TypedArrayView::I32(v) => {
                for &x in *v {
                    self.int64_value(i64::from(x), Tag::None, ctx)?;
                }
            }
            TypedArrayView::I64(v) => {
                for &x in *v {
                    self.int64_value(x, Tag::None, ctx)?;
                }
            }
            TypedArrayView::F16(v) => {
                for &x in *v {
                    self.double_value(half_to_f64(x), Tag::None, ctx)?;
                }
            }
            TypedArrayView::F32(v) => {
                for &x in *v {
                    self.double_value(f64::from(x), Tag::None, ctx)?;
                }
            }
            TypedArrayView::F64(v) => {
                for &x in *v {
                    self.double_value(x, Tag::None, ctx)?;
                }
            }
        }
        self.end_array(ctx)
    }
}

/// A visitor that accepts and discards every event.
///
/// Used to skip whole sub-trees without materializing them.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullVisitor;

impl Visitor for NullVisitor {
    fn begin_document(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn end_document(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn begin_object(&mut self, _hint: Option<usize>, _ctx: &Context) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn end_object(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn begin_array(&mut self, _hint: Option<usize>, _ctx: &Context) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn end_array(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn key(&mut self, _name: &str, _ctx: &Context) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn string_value(&mut self, _value: &str, _tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn byte_string_value(
        &mut self,
        _value: &[u8],
        _tag: Tag,
        _ctx: &Context,
    ) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn bignum_value(
        &mut self,
        _negative: bool,
        _magnitude: &[u8],
        _ctx: &Context,
    ) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn int64_value(&mut self, _value: i64, _tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn uint64_value(&mut self, _value: u64, _tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn double_value(&mut self, _value: f64, _tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn bool_value(&mut self, _value: bool, _ctx: &Context) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn null_value(&mut self, _tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn typed_array(
        &mut self,
        _view: &TypedArrayView<'_>,
        _tag: Tag,
        _ctx: &Context,
    ) -> Result<bool, DecodeError> {
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CheckFrame {
    Array,
    Object { expect_key: bool },
}

/// Debug-only grammar checker for the event protocol.
///
/// Wraps another visitor and asserts (in debug builds) that events arrive in
/// a well-formed order: balanced `begin_*`/`end_*` of matching kinds, every
/// object member preceded by exactly one `key`, nothing after `end_document`.
/// Release builds forward events unchecked.
#[derive(Debug)]
pub struct CheckedVisitor<V> {
    inner: V,
    frames: Vec<CheckFrame>,
    in_document: bool,
    finished: bool,
}

impl<V: Visitor> CheckedVisitor<V> {
    /// Wraps `inner` with grammar checking.
    pub fn new(inner: V) -> Self {
        Self {
            inner,
            frames: Vec::new(),
            in_document: false,
            finished: false,
        }
    }

    /// Returns the wrapped visitor.
    pub fn into_inner(self) -> V {
        self.inner
    }

    fn check_value_position(&mut self) {
        debug_assert!(!self.finished, "event after end_document");
        if let Some(CheckFrame::Object { expect_key }) = self.frames.last_mut() {
            debug_assert!(!*expect_key, "value event where a key was expected");
            *expect_key = true;
        }
    }
}

impl<V: Visitor> Visitor for CheckedVisitor<V> {
    fn begin_document(&mut self, ctx: &Context) -> Result<bool, DecodeError> {
        debug_assert!(!self.in_document && !self.finished, "nested begin_document");
        debug_assert!(self.frames.is_empty());
        self.in_document = true;
        self.inner.begin_document(ctx)
    }

    fn end_document(&mut self, ctx: &Context) -> Result<bool, DecodeError> {
        debug_assert!(self.in_document, "end_document without begin_document");
        debug_assert!(self.frames.is_empty(), "end_document inside an open container");
        self.in_document = false;
        self.finished = true;
        self.inner.end_document(ctx)
    }

    fn begin_object(&mut self, hint: Option<usize>, ctx: &Context) -> Result<bool, DecodeError> {
        self.check_value_position();
        self.frames.push(CheckFrame::Object { expect_key: true });
        self.inner.begin_object(hint, ctx)
    }

    fn end_object(&mut self, ctx: &Context) -> Result<bool, DecodeError> {
        match self.frames.pop() {
            Some(CheckFrame::Object { expect_key }) => {
                debug_assert!(expect_key, "end_object after a dangling key")
            }
            other => debug_assert!(false, "end_object over frame {other:?}"),
        }
        self.inner.end_object(ctx)
    }

    fn begin_array(&mut self, hint: Option<usize>, ctx: &Context) -> Result<bool, DecodeError> {
        self.check_value_position();
        self.frames.push(CheckFrame::Array);
        self.inner.begin_array(hint, ctx)
    }

    fn end_array(&mut self, ctx: &Context) -> Result<bool, DecodeError> {
        let frame = self.frames.pop();
        debug_assert!(frame == Some(CheckFrame::Array), "end_array over frame {frame:?}");
        self.inner.end_array(ctx)
    }

    fn key(&mut self, name: &str, ctx: &Context) -> Result<bool, DecodeError> {
        match self.frames.last_mut() {
            Some(CheckFrame::Object { expect_key }) => {
                debug_assert!(*expect_key, "key immediately after another key");
                *expect_key = false;
            }
            other => debug_assert!(false, "key outside an object: {other:?}"),
        }
        self.inner.key(name, ctx)
    }

    fn string_value(&mut self, value: &str, tag: Tag, ctx: &Context) -> Result<bool, DecodeError> {
        self.check_value_position();
        self.inner.string_value(value, tag, ctx)
    }

    fn byte_string_value(
        &mut self,
        value: &[u8],
        tag: Tag,
        ctx: &Context,
    ) -> Result<bool, DecodeError> {
        self.check_value_position();
        self.inner.byte_string_value(value, tag, ctx)
    }

    fn bignum_value(
        &mut self,
        negative: bool,
        magnitude: &[u8],
        ctx: &Context,
    ) -> Result<bool, DecodeError> {
        self.check_value_position();
        self.inner.bignum_value(negative, magnitude, ctx)
    }

    fn int64_value(&mut self, value: i64, tag: Tag, ctx: &Context) -> Result<bool, DecodeError> {
        self.check_value_position();
        self.inner.int64_value(value, tag, ctx)
    }

    fn uint64_value(&mut self, value: u64, tag: Tag, ctx: &Context) -> Result<bool, DecodeError> {
        self.check_value_position();
        self.inner.uint64_value(value, tag, ctx)
    }

    fn double_value(&mut self, value: f64, tag: Tag, ctx: &Context) -> Result<bool, DecodeError> {
        self.check_value_position();
        self.inner.double_value(value, tag, ctx)
    }

    fn bool_value(&mut self, value: bool, ctx: &Context) -> Result<bool, DecodeError> {
        self.check_value_position();
        self.inner.bool_value(value, ctx)
    }

    fn null_value(&mut self, tag: Tag, ctx: &Context) -> Result<bool, DecodeError> {
        self.check_value_position();
        self.inner.null_value(tag, ctx)
    }

    fn typed_array(
        &mut self,
        view: &TypedArrayView<'_>,
        tag: Tag,
        ctx: &Context,
    ) -> Result<bool, DecodeError> {
        self.check_value_position();
        self.inner.typed_array(view, tag, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_from_u8_roundtrip() {
        for v in 0..=16u8 {
            let tag = Tag::from_u8(v).unwrap();
            assert_eq!(tag as u8, v);
        }
        assert_eq!(Tag::from_u8(17), None);
        assert_eq!(Tag::from_u8(255), None);
    }

    #[test]
    fn test_typed_array_len() {
        assert_eq!(TypedArrayView::U8(&[1, 2, 3]).len(), 3);
        assert_eq!(TypedArrayView::F64(&[]).len(), 0);
        assert!(TypedArrayView::I32(&[]).is_empty());
    }

    #[test]
    fn test_typed_array_default_expansion() {
        // NullVisitor overrides typed_array, so use a counter that relies on
        // the default implementation.
        struct Counting {
            begins: usize,
            scalars: usize,
            ends: usize,
        }
        impl Visitor for Counting {
            fn begin_document(&mut self, _: &Context) -> Result<bool, DecodeError> {
                Ok(true)
            }
            fn end_document(&mut self, _: &Context) -> Result<bool, DecodeError> {
                Ok(true)
            }
            fn begin_object(&mut self, _: Option<usize>, _: &Context) -> Result<bool, DecodeError> {
                Ok(true)
            }
            fn end_object(&mut self, _: &Context) -> Result<bool, DecodeError> {
                Ok(true)
            }
            fn begin_array(&mut self, _: Option<usize>, _: &Context) -> Result<bool, DecodeError> {
                self.begins += 1;
                Ok(true)
            }
            fn end_array(&mut self, _: &Context) -> Result<bool, DecodeError> {
                self.ends += 1;
                Ok(true)
            }
            fn key(&mut self, _: &str, _: &Context) -> Result<bool, DecodeError> {
                Ok(true)
            }
            fn string_value(&mut self, _: &str, _: Tag, _: &Context) -> Result<bool, DecodeError> {
                Ok(true)
            }
            fn byte_string_value(
                &mut self,
                _: &[u8],
                _: Tag,
                _: &Context,
            ) -> Result<bool, DecodeError> {
                Ok(true)
            }
            fn bignum_value(&mut self, _: bool, _: &[u8], _: &Context) -> Result<bool, DecodeError> {
                Ok(true)
            }
            fn int64_value(&mut self, _: i64, _: Tag, _: &Context) -> Result<bool, DecodeError> {
                self.scalars += 1;
                Ok(true)
            }
            fn uint64_value(&mut self, _: u64, _: Tag, _: &Context) -> Result<bool, DecodeError> {
                self.scalars += 1;
                Ok(true)
            }
            fn double_value(&mut self, _: f64, _: Tag, _: &Context) -> Result<bool, DecodeError> {
                self.scalars += 1;
                Ok(true)
            }
            fn bool_value(&mut self, _: bool, _: &Context) -> Result<bool, DecodeError> {
                Ok(true)
            }
            fn null_value(&mut self, _: Tag, _: &Context) -> Result<bool, DecodeError> {
                Ok(true)
            }
        }

        let mut counting = Counting { begins: 0, scalars: 0, ends: 0 };
        let ctx = Context::default();
        counting
            .typed_array(&TypedArrayView::U16(&[1, 2, 3, 4]), Tag::None, &ctx)
            .unwrap();
        assert_eq!(counting.begins, 1);
        assert_eq!(counting.scalars, 4);
        assert_eq!(counting.ends, 1);
    }

    #[test]
    fn test_checked_visitor_accepts_well_formed() {
        let mut visitor = CheckedVisitor::new(NullVisitor);
        let ctx = Context::default();
        visitor.begin_document(&ctx).unwrap();
        visitor.begin_object(Some(1), &ctx).unwrap();
        visitor.key("a", &ctx).unwrap();
        visitor.begin_array(Some(2), &ctx).unwrap();
        visitor.uint64_value(1, Tag::None, &ctx).unwrap();
        visitor.null_value(Tag::None, &ctx).unwrap();
        visitor.end_array(&ctx).unwrap();
        visitor.end_object(&ctx).unwrap();
        visitor.end_document(&ctx).unwrap();
    }

    #[test]
    #[should_panic(expected = "key outside an object")]
    #[cfg(debug_assertions)]
    fn test_checked_visitor_rejects_key_in_array() {
        let mut visitor = CheckedVisitor::new(NullVisitor);
        let ctx = Context::default();
        visitor.begin_document(&ctx).unwrap();
        visitor.begin_array(None, &ctx).unwrap();
        let _ = visitor.key("a", &ctx);
    }

    #[test]
    #[should_panic(expected = "end_array over frame")]
    #[cfg(debug_assertions)]
    fn test_checked_visitor_rejects_mismatched_end() {
        let mut visitor = CheckedVisitor::new(NullVisitor);
        let ctx = Context::default();
        visitor.begin_document(&ctx).unwrap();
        visitor.begin_object(None, &ctx).unwrap();
        let _ = visitor.end_array(&ctx);
    }
}
