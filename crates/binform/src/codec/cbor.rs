//! CBOR format parser and encoder (RFC 8949, typed arrays per RFC 8746).
//!
//! The initial byte splits into a major type (high 3 bits) and additional
//! info (low 5 bits); info 24..27 pull a 1/2/4/8-byte big-endian argument
//! and info 31 marks indefinite-length items closed by the `0xff` break.

use crate::codec::{
    decimal_to_magnitude, half_to_f64, magnitude_minus_one, magnitude_plus_one,
    magnitude_to_decimal, u128_magnitude_bytes, Parser, NO_MARK,
};
use crate::decoder::TreeDecoder;
use crate::error::{DecodeError, ErrorKind};
use crate::event::{Context, Tag, TypedArrayView, Visitor};
use crate::limits::DecodeOptions;
use crate::source::{SliceSource, Source};
use crate::value::Value;

const BREAK: u8 = 0xff;

fn recognized_tag(t: u64) -> bool {
    matches!(t, 0..=5 | 21..=23 | 32..=34 | 64..=75 | 77..=87)
}

// ============================================================================
// DECODING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Start,
    Root,
    BeforeDone,
    Array,
    IndefArray,
    MapKey,
    MapValue,
    IndefMapKey,
    IndefMapValue,
}

#[derive(Debug)]
struct Frame {
    mode: Mode,
    length: u64,
    index: u64,
}

/// Streaming CBOR parser over any [`Source`].
#[derive(Debug)]
pub struct CborParser<S> {
    source: S,
    options: DecodeOptions,
    stack: Vec<Frame>,
    scratch: Vec<u8>,
    chunk: Vec<u8>,
    more: bool,
    done: bool,
    cursor_mode: bool,
    mark_level: usize,
}

impl<S: Source> CborParser<S> {
    pub fn new(source: S) -> Self {
        Self::with_options(source, DecodeOptions::default())
    }

    pub fn with_options(source: S, options: DecodeOptions) -> Self {
        Self {
            source,
            options,
            stack: vec![Frame { mode: Mode::Start, length: 0, index: 0 }],
            scratch: Vec::new(),
            chunk: Vec::new(),
            more: true,
            done: false,
            cursor_mode: false,
            mark_level: NO_MARK,
        }
    }

    fn err(&self, kind: ErrorKind) -> DecodeError {
        DecodeError::new(kind, self.source.position())
    }

    fn emit(&mut self, cont: bool) {
        self.more = cont && !self.cursor_mode;
    }

    fn emit_end(&mut self, cont: bool) {
        self.emit(cont);
        if self.stack.len() - 1 == self.mark_level {
            self.more = false;
        }
    }

    fn check_depth(&self) -> Result<(), DecodeError> {
        if self.stack.len() > self.options.max_nesting_depth {
            return Err(self.err(ErrorKind::MaxDepthExceeded {
                max: self.options.max_nesting_depth,
            }));
        }
        Ok(())
    }

    fn check_count(&self, count: u64) -> Result<u64, DecodeError> {
        if count > self.options.max_items as u64 {
            return Err(self.err(ErrorKind::MaxItemsExceeded {
                max: self.options.max_items,
            }));
        }
        Ok(count)
    }

    /// Decodes the argument that follows an initial byte.
    fn read_length_of(&mut self, initial: u8, context: &'static str) -> Result<u64, DecodeError> {
        match initial & 0x1f {
            n @ 0..=23 => Ok(u64::from(n)),
            24 => Ok(u64::from(self.source.read_u8(context)?)),
            25 => Ok(u64::from(self.source.read_u16_be(context)?)),
            26 => Ok(u64::from(self.source.read_u32_be(context)?)),
            27 => self.source.read_u64_be(context),
            _ => Err(self.err(ErrorKind::UnknownMarker { marker: initial })),
        }
    }

    /// A break where a value was expected: inside a declared-length
    /// container that is the size-mismatch policy error, elsewhere it is
    /// just an unexpected marker.
    fn break_error(&self, ctx: &Context) -> DecodeError {
        if let Some(f) = self.stack.last() {
            match f.mode {
                Mode::Array => {
                    return DecodeError::new(
                        ErrorKind::SizeMismatch {
                            declared: f.length,
                            actual: f.index.saturating_sub(1),
                        },
                        ctx.position,
                    );
                }
                Mode::MapKey | Mode::MapValue => {
                    return DecodeError::new(
                        ErrorKind::SizeMismatch { declared: f.length, actual: f.index },
                        ctx.position,
                    );
                }
                _ => {}
            }
        }
        DecodeError::new(ErrorKind::UnknownMarker { marker: BREAK }, ctx.position)
    }

    fn step(&mut self, visitor: &mut dyn Visitor) -> Result<(), DecodeError> {
        let Some(top) = self.stack.last() else {
            self.done = true;
            return Ok(());
        };
        match top.mode {
            Mode::Start => {
                let ctx = Context::at(self.source.position());
                if let Some(f) = self.stack.last_mut() {
                    f.mode = Mode::Root;
                }
                let cont = visitor.begin_document(&ctx)?;
                self.emit(cont);
            }
            Mode::Root => {
                if let Some(f) = self.stack.last_mut() {
                    f.mode = Mode::BeforeDone;
                }
                self.parse_item(visitor)?;
            }
            Mode::BeforeDone => {
                let ctx = Context::at(self.source.position());
                visitor.end_document(&ctx)?;
                self.done = true;
                self.more = false;
            }
            Mode::Array => {
                if top.index < top.length {
                    if let Some(f) = self.stack.last_mut() {
                        f.index += 1;
                    }
                    self.parse_item(visitor)?;
                } else {
                    let ctx = Context::at(self.source.position());
                    self.stack.pop();
                    let cont = visitor.end_array(&ctx)?;
                    self.emit_end(cont);
                }
            }
            Mode::IndefArray => {
                if self.source.peek()? == Some(BREAK) {
                    self.source.get()?;
                    let ctx = Context::at(self.source.position());
                    self.stack.pop();
                    let cont = visitor.end_array(&ctx)?;
                    self.emit_end(cont);
                } else {
                    if let Some(f) = self.stack.last_mut() {
                        f.index += 1;
                    }
                    self.parse_item(visitor)?;
                }
            }
            Mode::MapKey => {
                if top.index < top.length {
                    if let Some(f) = self.stack.last_mut() {
                        f.mode = Mode::MapValue;
                    }
                    self.parse_key(visitor)?;
                } else {
                    let ctx = Context::at(self.source.position());
                    self.stack.pop();
                    let cont = visitor.end_object(&ctx)?;
                    self.emit_end(cont);
                }
            }
            Mode::MapValue => {
                if let Some(f) = self.stack.last_mut() {
                    f.mode = Mode::MapKey;
                    f.index += 1;
                }
                self.parse_item(visitor)?;
            }
            Mode::IndefMapKey => {
                if self.source.peek()? == Some(BREAK) {
                    self.source.get()?;
                    let ctx = Context::at(self.source.position());
                    self.stack.pop();
                    let cont = visitor.end_object(&ctx)?;
                    self.emit_end(cont);
                } else {
                    if let Some(f) = self.stack.last_mut() {
                        f.mode = Mode::IndefMapValue;
                    }
                    self.parse_key(visitor)?;
                }
            }
            Mode::IndefMapValue => {
                if let Some(f) = self.stack.last_mut() {
                    f.mode = Mode::IndefMapKey;
                    f.index += 1;
                }
                self.parse_item(visitor)?;
            }
        }
        Ok(())
    }

    fn parse_item(&mut self, visitor: &mut dyn Visitor) -> Result<(), DecodeError> {
        let ctx = Context::at(self.source.position());
        let mut tag: Option<u64> = None;
        let cont = loop {
            let b = self.source.read_u8("value marker")?;
            let info = b & 0x1f;
            match b >> 5 {
                0 => {
                    let n = self.read_length_of(b, "integer payload")?;
                    let t = if tag == Some(1) { Tag::EpochSecond } else { Tag::None };
                    break visitor.uint64_value(n, t, &ctx)?;
                }
                1 => {
                    let n = self.read_length_of(b, "integer payload")?;
                    break if n <= i64::MAX as u64 {
                        let t = if tag == Some(1) { Tag::EpochSecond } else { Tag::None };
                        visitor.int64_value(-1 - (n as i64), t, &ctx)?
                    } else {
                        // -1 - n runs past i64; carry it as sign + magnitude.
                        let mag = u128_magnitude_bytes(u128::from(n) + 1);
                        visitor.bignum_value(true, &mag, &ctx)?
                    };
                }
                2 => {
                    if info == 31 {
                        self.read_chunked(2, "byte string")?;
                    } else {
                        let len = self.read_length_of(b, "byte string length")?;
                        self.source.read_bytes_into(len, &mut self.scratch, "byte string")?;
                    }
                    break self.bytes_with_tag(tag, visitor, &ctx)?;
                }
                3 => {
                    if info == 31 {
                        self.read_chunked(3, "text string")?;
                    } else {
                        let len = self.read_length_of(b, "text string length")?;
                        self.source.read_bytes_into(len, &mut self.scratch, "text string")?;
                    }
                    break self.text_with_tag(tag, visitor, &ctx)?;
                }
                4 => {
                    if tag == Some(4) {
                        break self.decimal_fraction_value(b, visitor, &ctx)?;
                    }
                    if tag == Some(5) {
                        break self.bigfloat_value(b, visitor, &ctx)?;
                    }
                    if info == 31 {
                        return self.push_indef(Mode::IndefArray, visitor, ctx);
                    }
                    let n = self.read_length_of(b, "array count")?;
                    return self.push_array(n, visitor, ctx);
                }
                5 => {
                    if info == 31 {
                        return self.push_indef(Mode::IndefMapKey, visitor, ctx);
                    }
                    let n = self.read_length_of(b, "map count")?;
                    return self.push_map(n, visitor, ctx);
                }
                6 => {
                    if info == 31 {
                        return Err(DecodeError::new(
                            ErrorKind::UnknownMarker { marker: b },
                            ctx.position,
                        ));
                    }
                    let t = self.read_length_of(b, "tag number")?;
                    if recognized_tag(t) {
                        tag = Some(t);
                    }
                }
                _ => break self.simple_value(b, tag, visitor, &ctx)?,
            }
        };
        self.emit(cont);
        Ok(())
    }

    fn simple_value(
        &mut self,
        b: u8,
        tag: Option<u64>,
        visitor: &mut dyn Visitor,
        ctx: &Context,
    ) -> Result<bool, DecodeError> {
        let t = if tag == Some(1) { Tag::EpochSecond } else { Tag::None };
        match b & 0x1f {
            20 => visitor.bool_value(false, ctx),
            21 => visitor.bool_value(true, ctx),
            22 => visitor.null_value(Tag::None, ctx),
            23 => visitor.null_value(Tag::Undefined, ctx),
            24 => {
                self.source.read_u8("simple value")?;
                Err(DecodeError::new(ErrorKind::UnknownMarker { marker: b }, ctx.position))
            }
            25 => {
                let bits = self.source.read_u16_be("float payload")?;
                visitor.double_value(half_to_f64(bits), t, ctx)
            }
            26 => {
                let v = self.source.read_f32_be("float payload")?;
                visitor.double_value(f64::from(v), t, ctx)
            }
            27 => {
                let v = self.source.read_f64_be("float payload")?;
                visitor.double_value(v, t, ctx)
            }
            31 => Err(self.break_error(ctx)),
            _ => Err(DecodeError::new(ErrorKind::UnknownMarker { marker: b }, ctx.position)),
        }
    }

    fn parse_key(&mut self, visitor: &mut dyn Visitor) -> Result<(), DecodeError> {
        let ctx = Context::at(self.source.position());
        let b = self.source.read_u8("key marker")?;
        if b == BREAK {
            return Err(self.break_error(&ctx));
        }
        let cont = match b >> 5 {
            0 => {
                let n = self.read_length_of(b, "key payload")?;
                visitor.key(&n.to_string(), &ctx)?
            }
            1 => {
                let n = self.read_length_of(b, "key payload")?;
                let text = if n <= i64::MAX as u64 {
                    (-1 - (n as i64)).to_string()
                } else {
                    magnitude_to_decimal(true, &u128_magnitude_bytes(u128::from(n) + 1))
                };
                visitor.key(&text, &ctx)?
            }
            3 => {
                if b & 0x1f == 31 {
                    self.read_chunked(3, "key payload")?;
                } else {
                    let len = self.read_length_of(b, "key length")?;
                    self.source.read_bytes_into(len, &mut self.scratch, "key payload")?;
                }
                let text = std::str::from_utf8(&self.scratch).map_err(|_| {
                    DecodeError::new(
                        ErrorKind::InvalidUtf8 { context: "key payload" },
                        ctx.position,
                    )
                })?;
                visitor.key(text, &ctx)?
            }
            _ => {
                return Err(DecodeError::new(ErrorKind::InvalidKey { marker: b }, ctx.position));
            }
        };
        self.emit(cont);
        Ok(())
    }

    /// Reads an indefinite-length string body into `scratch`. Every chunk
    /// must repeat the enclosing major type and be definite.
    fn read_chunked(&mut self, major: u8, context: &'static str) -> Result<(), DecodeError> {
        self.scratch.clear();
        loop {
            let b = self.source.read_u8(context)?;
            if b == BREAK {
                return Ok(());
            }
            if b >> 5 != major || b & 0x1f == 31 {
                return Err(self.err(ErrorKind::IllegalChunkedString { marker: b }));
            }
            let len = self.read_length_of(b, context)?;
            self.source.read_bytes_into(len, &mut self.chunk, context)?;
            self.scratch.extend_from_slice(&self.chunk);
        }
    }

    fn bytes_with_tag(
        &mut self,
        tag: Option<u64>,
        visitor: &mut dyn Visitor,
        ctx: &Context,
    ) -> Result<bool, DecodeError> {
        match tag {
            Some(2) => visitor.bignum_value(false, &self.scratch, ctx),
            Some(3) => {
                let mag = magnitude_plus_one(&self.scratch);
                visitor.bignum_value(true, &mag, ctx)
            }
            Some(21) => visitor.byte_string_value(&self.scratch, Tag::Base64Url, ctx),
            Some(22) => visitor.byte_string_value(&self.scratch, Tag::Base64, ctx),
            Some(23) => visitor.byte_string_value(&self.scratch, Tag::Base16, ctx),
            Some(t @ 64..=87) => self.typed_array_value(t, visitor, ctx),
            _ => visitor.byte_string_value(&self.scratch, Tag::None, ctx),
        }
    }

    fn text_with_tag(
        &mut self,
        tag: Option<u64>,
        visitor: &mut dyn Visitor,
        ctx: &Context,
    ) -> Result<bool, DecodeError> {
        let text = std::str::from_utf8(&self.scratch).map_err(|_| {
            DecodeError::new(ErrorKind::InvalidUtf8 { context: "text payload" }, ctx.position)
        })?;
        let t = match tag {
            Some(0) => Tag::Datetime,
            Some(32) => Tag::Uri,
            Some(33) => Tag::Base64Url,
            Some(34) => Tag::Base64,
            _ => Tag::None,
        };
        visitor.string_value(text, t, ctx)
    }

    fn typed_array_value(
        &mut self,
        tag: u64,
        visitor: &mut dyn Visitor,
        ctx: &Context,
    ) -> Result<bool, DecodeError> {
        let data = &self.scratch;
        let misaligned =
            |width: usize| -> Result<(), DecodeError> {
                if data.len() % width != 0 {
                    Err(DecodeError::new(
                        ErrorKind::InvalidLength { context: "typed array payload" },
                        ctx.position,
                    ))
                } else {
                    Ok(())
                }
            };
        let be = matches!(tag, 64..=68 | 72..=76 | 80..=83);
        match tag {
            64 | 68 => visitor.typed_array(&TypedArrayView::U8(data), Tag::None, ctx),
            72 => {
                let v: Vec<i8> = data.iter().map(|&b| b as i8).collect();
                visitor.typed_array(&TypedArrayView::I8(&v), Tag::None, ctx)
            }
            65 | 69 => {
                misaligned(2)?;
                let v: Vec<u16> = data
                    .chunks_exact(2)
                    .map(|c| {
                        let a = [c[0], c[1]];
                        if be { u16::from_be_bytes(a) } else { u16::from_le_bytes(a) }
                    })
                    .collect();
                visitor.typed_array(&TypedArrayView::U16(&v), Tag::None, ctx)
            }
            66 | 70 => {
                misaligned(4)?;
                let v: Vec<u32> = data
                    .chunks_exact(4)
                    .map(|c| {
                        let a = [c[0], c[1], c[2], c[3]];
                        if be { u32::from_be_bytes(a) } else { u32::from_le_bytes(a) }
                    })
                    .collect();
                visitor.typed_array(&TypedArrayView::U32(&v), Tag::None, ctx)
            }
            67 | 71 => {
                misaligned(8)?;
                let v: Vec<u64> = data
                    .chunks_exact(8)
                    .map(|c| {
                        let a = [c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]];
                        if be { u64::from_be_bytes(a) } else { u64::from_le_bytes(a) }
                    })
                    .collect();
                visitor.typed_array(&TypedArrayView::U64(&v), Tag::None, ctx)
            }
            73 | 77 => {
                misaligned(2)?;
                let v: Vec<i16> = data
                    .chunks_exact(2)
                    .map(|c| {
                        let a = [c[0], c[1]];
                        if be { i16::from_be_bytes(a) } else { i16::from_le_bytes(a) }
                    })
                    .collect();
                visitor.typed_array(&TypedArrayView::I16(&v), Tag::None, ctx)
            }
            74 | 78 => {
                misaligned(4)?;
                let v: Vec<i32> = data
                    .chunks_exact(4)
                    .map(|c| {
                        let a = [c[0], c[1], c[2], c[3]];
                        if be { i32::from_be_bytes(a) } else { i32::from_le_bytes(a) }
                    })
                    .collect();
                visitor.typed_array(&TypedArrayView::I32(&v), Tag::None, ctx)
            }
            75 | 79 => {
                misaligned(8)?;
                let v: Vec<i64> = data
                    .chunks_exact(8)
                    .map(|c| {
                        let a = [c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]];
                        if be { i64::from_be_bytes(a) } else { i64::from_le_bytes(a) }
                    })
                    .collect();
                visitor.typed_array(&TypedArrayView::I64(&v), Tag::None, ctx)
            }
            80 | 84 => {
                misaligned(2)?;
                let v: Vec<u16> = data
                    .chunks_exact(2)
                    .map(|c| {
                        let a = [c[0], c[1]];
                        if be { u16::from_be_bytes(a) } else { u16::from_le_bytes(a) }
                    })
                    .collect();
                visitor.typed_array(&TypedArrayView::F16(&v), Tag::None, ctx)
            }
            81 | 85 => {
                misaligned(4)?;
                let v: Vec<f32> = data
                    .chunks_exact(4)
                    .map(|c| {
                        let a = [c[0], c[1], c[2], c[3]];
                        if be { f32::from_be_bytes(a) } else { f32::from_le_bytes(a) }
                    })
                    .collect();
                visitor.typed_array(&TypedArrayView::F32(&v), Tag::None, ctx)
            }
            82 | 86 => {
                misaligned(8)?;
                let v: Vec<f64> = data
                    .chunks_exact(8)
                    .map(|c| {
                        let a = [c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]];
                        if be { f64::from_be_bytes(a) } else { f64::from_le_bytes(a) }
                    })
                    .collect();
                visitor.typed_array(&TypedArrayView::F64(&v), Tag::None, ctx)
            }
            // 128-bit float spans have no representation here.
            _ => Err(DecodeError::new(
                ErrorKind::UnknownMarker { marker: tag as u8 },
                ctx.position,
            )),
        }
    }

    /// Reads an integer component of a tag-4/5 pair (major 0 or 1 only).
    fn read_int_component(
        &mut self,
        bad: ErrorKind,
        context: &'static str,
    ) -> Result<i128, DecodeError> {
        let b = self.source.read_u8(context)?;
        match b >> 5 {
            0 => Ok(i128::from(self.read_length_of(b, context)?)),
            1 => Ok(-1 - i128::from(self.read_length_of(b, context)?)),
            _ => Err(self.err(bad)),
        }
    }

    /// Reads the mantissa of a tag-4/5 pair: an integer or a tag-2/3
    /// bignum byte string, as sign + big-endian magnitude.
    fn read_mantissa_component(
        &mut self,
        bad: ErrorKind,
        context: &'static str,
    ) -> Result<(bool, Vec<u8>), DecodeError> {
        let b = self.source.read_u8(context)?;
        match b >> 5 {
            0 => {
                let n = self.read_length_of(b, context)?;
                Ok((false, u128_magnitude_bytes(u128::from(n))))
            }
            1 => {
                let n = self.read_length_of(b, context)?;
                Ok((true, u128_magnitude_bytes(u128::from(n) + 1)))
            }
            6 => {
                let t = self.read_length_of(b, context)?;
                if t != 2 && t != 3 {
                    return Err(self.err(bad));
                }
                let inner = self.source.read_u8(context)?;
                if inner >> 5 != 2 || inner & 0x1f == 31 {
                    return Err(self.err(bad));
                }
                let len = self.read_length_of(inner, context)?;
                self.source.read_bytes_into(len, &mut self.chunk, context)?;
                if t == 2 {
                    Ok((false, self.chunk.clone()))
                } else {
                    Ok((true, magnitude_plus_one(&self.chunk)))
                }
            }
            _ => Err(self.err(bad)),
        }
    }

    fn decimal_fraction_value(
        &mut self,
        head: u8,
        visitor: &mut dyn Visitor,
        ctx: &Context,
    ) -> Result<bool, DecodeError> {
        let bad = ErrorKind::InvalidDecimalFraction;
        if head & 0x1f == 31 {
            return Err(DecodeError::new(bad, ctx.position));
        }
        let len = self.read_length_of(head, "decimal fraction")?;
        if len != 2 {
            return Err(DecodeError::new(bad, ctx.position));
        }
        let exponent = self.read_int_component(bad.clone(), "decimal fraction")?;
        let (negative, magnitude) = self.read_mantissa_component(bad, "decimal fraction")?;
        let digits = magnitude_to_decimal(false, &magnitude);
        let rendered = format_decimal(negative, &digits, exponent);
        visitor.string_value(&rendered, Tag::Bigdec, ctx)
    }

    fn bigfloat_value(
        &mut self,
        head: u8,
        visitor: &mut dyn Visitor,
        ctx: &Context,
    ) -> Result<bool, DecodeError> {
        let bad = ErrorKind::InvalidBigfloat;
        if head & 0x1f == 31 {
            return Err(DecodeError::new(bad, ctx.position));
        }
        let len = self.read_length_of(head, "bigfloat")?;
        if len != 2 {
            return Err(DecodeError::new(bad, ctx.position));
        }
        let exponent = self.read_int_component(bad.clone(), "bigfloat")?;
        let (negative, magnitude) = self.read_mantissa_component(bad, "bigfloat")?;
        let rendered = format_bigfloat(negative, &magnitude, exponent);
        visitor.string_value(&rendered, Tag::Bigfloat, ctx)
    }

    fn push_array(
        &mut self,
        count: u64,
        visitor: &mut dyn Visitor,
        ctx: Context,
    ) -> Result<(), DecodeError> {
        let count = self.check_count(count)?;
        self.check_depth()?;
        self.stack.push(Frame { mode: Mode::Array, length: count, index: 0 });
        let cont = visitor.begin_array(usize::try_from(count).ok(), &ctx)?;
        self.emit(cont);
        Ok(())
    }

    fn push_map(
        &mut self,
        count: u64,
        visitor: &mut dyn Visitor,
        ctx: Context,
    ) -> Result<(), DecodeError> {
        let count = self.check_count(count)?;
        self.check_depth()?;
        self.stack.push(Frame { mode: Mode::MapKey, length: count, index: 0 });
        let cont = visitor.begin_object(usize::try_from(count).ok(), &ctx)?;
        self.emit(cont);
        Ok(())
    }

    fn push_indef(
        &mut self,
        mode: Mode,
        visitor: &mut dyn Visitor,
        ctx: Context,
    ) -> Result<(), DecodeError> {
        self.check_depth()?;
        self.stack.push(Frame { mode, length: 0, index: 0 });
        let cont = if mode == Mode::IndefArray {
            visitor.begin_array(None, &ctx)?
        } else {
            visitor.begin_object(None, &ctx)?
        };
        self.emit(cont);
        Ok(())
    }
}

fn format_decimal(negative: bool, digits: &str, exponent: i128) -> String {
    if digits == "0" {
        return "0".to_owned();
    }
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if exponent == 0 {
        out.push_str(digits);
    } else if exponent > 0 && exponent <= 32 {
        out.push_str(digits);
        for _ in 0..exponent {
            out.push('0');
        }
    } else if exponent < 0 && -exponent <= (digits.len() + 32) as i128 {
        let shift = (-exponent) as usize;
        if shift < digits.len() {
            let point = digits.len() - shift;
            out.push_str(&digits[..point]);
            out.push('.');
            out.push_str(&digits[point..]);
        } else {
            out.push_str("0.");
            for _ in 0..shift - digits.len() {
                out.push('0');
            }
            out.push_str(digits);
        }
    } else {
        out.push_str(digits);
        out.push('e');
        out.push_str(&exponent.to_string());
    }
    out
}

fn magnitude_to_hex(magnitude: &[u8]) -> String {
    let trimmed: Vec<u8> = magnitude.iter().copied().skip_while(|&b| b == 0).collect();
    if trimmed.is_empty() {
        return "0".to_owned();
    }
    let mut out = format!("{:x}", trimmed[0]);
    for b in &trimmed[1..] {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

fn format_bigfloat(negative: bool, magnitude: &[u8], exponent: i128) -> String {
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str("0x");
    out.push_str(&magnitude_to_hex(magnitude));
    out.push('p');
    out.push_str(&exponent.to_string());
    out
}

impl<S: Source> Parser for CborParser<S> {
    type Source = S;

    fn parse(&mut self, visitor: &mut dyn Visitor) -> Result<(), DecodeError> {
        while self.more && !self.done {
            self.step(visitor)?;
        }
        Ok(())
    }

    fn done(&self) -> bool {
        self.done
    }

    fn restart(&mut self) {
        self.more = true;
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.stack.push(Frame { mode: Mode::Start, length: 0, index: 0 });
        self.scratch.clear();
        self.chunk.clear();
        self.more = true;
        self.done = false;
        self.cursor_mode = false;
        self.mark_level = NO_MARK;
    }

    fn reset_with(&mut self, source: S) {
        self.source = source;
        self.reset();
    }

    fn position(&self) -> u64 {
        self.source.position()
    }

    fn level(&self) -> usize {
        self.stack.len() - 1
    }

    fn set_cursor_mode(&mut self, on: bool) {
        self.cursor_mode = on;
    }

    fn set_mark_level(&mut self, level: usize) {
        self.mark_level = level;
    }
}

// ============================================================================
// ENCODING
// ============================================================================

#[derive(Debug)]
struct EncFrame {
    indefinite: bool,
    is_map: bool,
    declared: Option<u64>,
    count: u64,
}

/// CBOR encoder; implements [`Visitor`] for direct transcoding.
///
/// Containers with a size hint use definite-length heads; without one they
/// are indefinite and closed by a break byte. Tagged values round-trip
/// through tags 0/1/2/3/4/5/21/22/23/32/33/34 and the RFC 8746 typed-array
/// tags.
#[derive(Debug, Default)]
pub struct CborEncoder {
    buf: Vec<u8>,
    frames: Vec<EncFrame>,
}

impl CborEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn note_value(&mut self) {
        if let Some(f) = self.frames.last_mut() {
            if !f.is_map {
                f.count += 1;
            }
        }
    }

    fn note_key(&mut self) {
        if let Some(f) = self.frames.last_mut() {
            if f.is_map {
                f.count += 1;
            }
        }
    }

    /// Writes a shortest-form head for `major` with argument `value`.
    fn write_head(&mut self, major: u8, value: u64) {
        let high = major << 5;
        if value < 24 {
            self.buf.push(high | value as u8);
        } else if value <= 0xff {
            self.buf.push(high | 24);
            self.buf.push(value as u8);
        } else if value <= 0xffff {
            self.buf.push(high | 25);
            self.buf.extend_from_slice(&(value as u16).to_be_bytes());
        } else if value <= 0xffff_ffff {
            self.buf.push(high | 26);
            self.buf.extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            self.buf.push(high | 27);
            self.buf.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn write_signed_head(&mut self, v: i64) {
        if v >= 0 {
            self.write_head(0, v as u64);
        } else {
            self.write_head(1, (-(v + 1)) as u64);
        }
    }

    fn write_text(&mut self, s: &str) {
        self.write_head(3, s.len() as u64);
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn write_bytes(&mut self, b: &[u8]) {
        self.write_head(2, b.len() as u64);
        self.buf.extend_from_slice(b);
    }

    /// Writes sign + magnitude as an integer head when it fits, otherwise
    /// as a tag-2/3 bignum.
    fn write_magnitude(&mut self, negative: bool, magnitude: &[u8]) {
        let skip = magnitude.iter().take_while(|&&b| b == 0).count();
        let trimmed = &magnitude[skip.min(magnitude.len().saturating_sub(1))..];
        if trimmed.len() <= 8 {
            let v = trimmed.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
            if !negative {
                self.write_head(0, v);
                return;
            }
            if v > 0 {
                self.write_head(1, v - 1);
                return;
            }
            self.write_head(0, 0);
            return;
        }
        if negative {
            self.write_head(6, 3);
            self.write_bytes(&magnitude_minus_one(trimmed));
        } else {
            self.write_head(6, 2);
            self.write_bytes(trimmed);
        }
    }
}

impl Visitor for CborEncoder {
    fn begin_document(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn end_document(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn begin_object(&mut self, hint: Option<usize>, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_value();
        match hint {
            Some(n) => {
                self.write_head(5, n as u64);
                self.frames.push(EncFrame {
                    indefinite: false,
                    is_map: true,
                    declared: Some(n as u64),
                    count: 0,
                });
            }
            None => {
                self.buf.push(0xbf);
                self.frames.push(EncFrame {
                    indefinite: true,
                    is_map: true,
                    declared: None,
                    count: 0,
                });
            }
        }
        Ok(true)
    }

    fn end_object(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
        if let Some(frame) = self.frames.pop() {
            debug_assert!(frame.is_map);
            if let Some(declared) = frame.declared {
                debug_assert_eq!(declared, frame.count);
            }
            if frame.indefinite {
                self.buf.push(BREAK);
            }
        }
        Ok(true)
    }

    fn begin_array(&mut self, hint: Option<usize>, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_value();
        match hint {
            Some(n) => {
                self.write_head(4, n as u64);
                self.frames.push(EncFrame {
                    indefinite: false,
                    is_map: false,
                    declared: Some(n as u64),
                    count: 0,
                });
            }
            None => {
                self.buf.push(0x9f);
                self.frames.push(EncFrame {
                    indefinite: true,
                    is_map: false,
                    declared: None,
                    count: 0,
                });
            }
        }
        Ok(true)
    }

    fn end_array(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
        if let Some(frame) = self.frames.pop() {
            debug_assert!(!frame.is_map);
            if let Some(declared) = frame.declared {
                debug_assert_eq!(declared, frame.count);
            }
            if frame.indefinite {
                self.buf.push(BREAK);
            }
        }
        Ok(true)
    }

    fn key(&mut self, name: &str, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_key();
        self.write_text(name);
        Ok(true)
    }

    fn string_value(&mut self, value: &str, tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_value();
        match tag {
            Tag::Datetime => {
                self.write_head(6, 0);
                self.write_text(value);
            }
            Tag::Uri => {
                self.write_head(6, 32);
                self.write_text(value);
            }
            Tag::Base64Url => {
                self.write_head(6, 33);
                self.write_text(value);
            }
            Tag::Base64 => {
                self.write_head(6, 34);
                self.write_text(value);
            }
            Tag::Bignum => match decimal_to_magnitude(value) {
                Some((negative, magnitude)) => {
                    if magnitude.len() <= 8 {
                        self.write_magnitude(negative, &magnitude);
                    } else if negative {
                        self.write_head(6, 3);
                        self.write_bytes(&magnitude_minus_one(&magnitude));
                    } else {
                        self.write_head(6, 2);
                        self.write_bytes(&magnitude);
                    }
                }
                None => self.write_text(value),
            },
            Tag::Bigdec => match parse_decimal_text(value) {
                Some((exponent, negative, magnitude)) => {
                    self.write_head(6, 4);
                    self.write_head(4, 2);
                    self.write_signed_head(exponent);
                    self.write_magnitude(negative, &magnitude);
                }
                None => self.write_text(value),
            },
            Tag::Bigfloat => match parse_bigfloat_text(value) {
                Some((exponent, negative, magnitude)) => {
                    self.write_head(6, 5);
                    self.write_head(4, 2);
                    self.write_signed_head(exponent);
                    self.write_magnitude(negative, &magnitude);
                }
                None => self.write_text(value),
            },
            _ => self.write_text(value),
        }
        Ok(true)
    }

    fn byte_string_value(
        &mut self,
        value: &[u8],
        tag: Tag,
        _ctx: &Context,
    ) -> Result<bool, DecodeError> {
        self.note_value();
        match tag {
            Tag::Base64Url => self.write_head(6, 21),
            Tag::Base64 => self.write_head(6, 22),
            Tag::Base16 => self.write_head(6, 23),
            _ => {}
        }
        self.write_bytes(value);
        Ok(true)
    }

    fn bignum_value(
        &mut self,
        negative: bool,
        magnitude: &[u8],
        _ctx: &Context,
    ) -> Result<bool, DecodeError> {
        self.note_value();
        if negative {
            self.write_head(6, 3);
            self.write_bytes(&magnitude_minus_one(magnitude));
        } else {
            self.write_head(6, 2);
            self.write_bytes(magnitude);
        }
        Ok(true)
    }

    fn int64_value(&mut self, value: i64, tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_value();
        if tag == Tag::EpochSecond {
            self.write_head(6, 1);
        }
        self.write_signed_head(value);
        Ok(true)
    }

    fn uint64_value(&mut self, value: u64, tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_value();
        if tag == Tag::EpochSecond {
            self.write_head(6, 1);
        }
        self.write_head(0, value);
        Ok(true)
    }

    fn double_value(&mut self, value: f64, tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_value();
        if tag == Tag::EpochSecond {
            self.write_head(6, 1);
        }
        self.buf.push(0xfb);
        self.buf.extend_from_slice(&value.to_bits().to_be_bytes());
        Ok(true)
    }

    fn bool_value(&mut self, value: bool, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_value();
        self.buf.push(if value { 0xf5 } else { 0xf4 });
        Ok(true)
    }

    fn null_value(&mut self, tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_value();
        self.buf.push(if tag == Tag::Undefined { 0xf7 } else { 0xf6 });
        Ok(true)
    }

    fn typed_array(
        &mut self,
        view: &TypedArrayView<'_>,
        _tag: Tag,
        _ctx: &Context,
    ) -> Result<bool, DecodeError> {
        self.note_value();
        // Always re-encoded in the big-endian tag variants.
        match view {
            TypedArrayView::U8(v) => {
                self.write_head(6, 64);
                self.write_bytes(v);
            }
            TypedArrayView::U16(v) => {
                self.write_head(6, 65);
                self.write_head(2, (v.len() * 2) as u64);
                for x in *v {
                    self.buf.extend_from_slice(&x.to_be_bytes());
                }
            }
            TypedArrayView::U32(v) => {
                self.write_head(6, 66);
                self.write_head(2, (v.len() * 4) as u64);
                for x in *v {
                    self.buf.extend_from_slice(&x.to_be_bytes());
                }
            }
            TypedArrayView::U64(v) => {
                self.write_head(6, 67);
                self.write_head(2, (v.len() * 8) as u64);
                for x in *v {
                    self.buf.extend_from_slice(&x.to_be_bytes());
                }
            }
            TypedArrayView::I8(v) => {
                self.write_head(6, 72);
                self.write_head(2, v.len() as u64);
                for x in *v {
                    self.buf.push(*x as u8);
                }
            }
            TypedArrayView::I16(v) => {
                self.write_head(6, 73);
                self.write_head(2, (v.len() * 2) as u64);
                for x in *v {
                    self.buf.extend_from_slice(&x.to_be_bytes());
                }
            }
            TypedArrayView::I32(v) => {
                self.write_head(6, 74);
                self.write_head(2, (v.len() * 4) as u64);
                for x in *v {
                    self.buf.extend_from_slice(&x.to_be_bytes());
                }
            }
            TypedArrayView::I64(v) => {
                self.write_head(6, 75);
                self.write_head(2, (v.len() * 8) as u64);
                for x in *v {
                    self.buf.extend_from_slice(&x.to_be_bytes());
                }
            }
            TypedArrayView::F16(v) => {
                self.write_head(6, 80);
                self.write_head(2, (v.len() * 2) as u64);
                for x in *v {
                    self.buf.extend_from_slice(&x.to_be_bytes());
                }
            }
            TypedArrayView::F32(v) => {
                self.write_head(6, 81);
                self.write_head(2, (v.len() * 4) as u64);
                for x in *v {
                    self.buf.extend_from_slice(&x.to_be_bytes());
                }
            }
            TypedArrayView::F64(v) => {
                self.write_head(6, 82);
                self.write_head(2, (v.len() * 8) as u64);
                for x in *v {
                    self.buf.extend_from_slice(&x.to_be_bytes());
                }
            }
        }
        Ok(true)
    }
}

/// Splits decimal text into (exponent, sign, magnitude), normalizing the
/// fractional part into the exponent.
fn parse_decimal_text(s: &str) -> Option<(i64, bool, Vec<u8>)> {
    let (body, exp_str) = match s.find(['e', 'E']) {
        Some(i) => (&s[..i], &s[i + 1..]),
        None => (s, ""),
    };
    let mut exponent: i64 = if exp_str.is_empty() { 0 } else { exp_str.parse().ok()? };
    let (negative, body) = match body.as_bytes().first()? {
        b'-' => (true, &body[1..]),
        b'+' => (false, &body[1..]),
        _ => (false, body),
    };
    let (int_part, frac_part) = match body.find('.') {
        Some(i) => (&body[..i], &body[i + 1..]),
        None => (body, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    exponent = exponent.checked_sub(frac_part.len() as i64)?;
    let mut digits = String::with_capacity(int_part.len() + frac_part.len());
    digits.push_str(int_part);
    digits.push_str(frac_part);
    let (_, magnitude) = decimal_to_magnitude(&digits)?;
    let negative = negative && magnitude != [0];
    Some((exponent, negative, magnitude))
}

/// Splits `[-]0x<hex>p<exp>` bigfloat text into (exponent, sign, magnitude).
fn parse_bigfloat_text(s: &str) -> Option<(i64, bool, Vec<u8>)> {
    let (negative, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let rest = rest.strip_prefix("0x")?;
    let p = rest.find(['p', 'P'])?;
    let (hex, exp_str) = (&rest[..p], &rest[p + 1..]);
    if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let exponent: i64 = exp_str.parse().ok()?;
    let padded = if hex.len() % 2 == 1 {
        format!("0{hex}")
    } else {
        hex.to_owned()
    };
    let mut magnitude = Vec::with_capacity(padded.len() / 2);
    for i in (0..padded.len()).step_by(2) {
        magnitude.push(u8::from_str_radix(&padded[i..i + 2], 16).ok()?);
    }
    let negative = negative && magnitude.iter().any(|&b| b != 0);
    Some((exponent, negative, magnitude))
}

// ============================================================================
// CONVENIENCE API
// ============================================================================

/// Decodes a complete CBOR document from a byte slice.
pub fn decode(bytes: &[u8]) -> Result<Value, DecodeError> {
    decode_with_options(bytes, DecodeOptions::default())
}

pub fn decode_with_options(bytes: &[u8], options: DecodeOptions) -> Result<Value, DecodeError> {
    decode_from(SliceSource::new(bytes), options)
}

/// Decodes a complete document from any [`Source`].
pub fn decode_from<S: Source>(source: S, options: DecodeOptions) -> Result<Value, DecodeError> {
    let mut parser = CborParser::with_options(source, options);
    let mut decoder = TreeDecoder::new();
    parser.parse_all(&mut decoder)?;
    let position = parser.position();
    decoder.take_value().ok_or_else(|| {
        DecodeError::new(ErrorKind::UnexpectedEof { context: "document" }, position)
    })
}

/// Encodes a [`Value`] tree as CBOR.
pub fn encode(value: &Value) -> Result<Vec<u8>, DecodeError> {
    let mut encoder = CborEncoder::new();
    let ctx = Context::default();
    encoder.begin_document(&ctx)?;
    value.emit_to(&mut encoder, &ctx)?;
    encoder.end_document(&ctx)?;
    Ok(encoder.into_bytes())
}
