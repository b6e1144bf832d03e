//! UBJSON format parser and encoder (Draft 12).
//!
//! Containers come in three disciplines: plain (`[` .. `]`), counted
//! (`[#` count, no terminator) and strongly typed (`[$` type `#` count,
//! payload-only elements). A `$` without a following `#` is an error.
//! `[$U#` is treated as a byte string value rather than a container.

use crate::codec::{magnitude_to_decimal, Parser, NO_MARK};
use crate::decoder::TreeDecoder;
use crate::error::{DecodeError, ErrorKind};
use crate::event::{Context, Tag, Visitor};
use crate::limits::DecodeOptions;
use crate::source::{SliceSource, Source};
use crate::value::Value;

mod marker {
    pub const NULL: u8 = b'Z';
    pub const NOOP: u8 = b'N';
    pub const TRUE: u8 = b'T';
    pub const FALSE: u8 = b'F';
    pub const INT8: u8 = b'i';
    pub const UINT8: u8 = b'U';
    pub const INT16: u8 = b'I';
    pub const INT32: u8 = b'l';
    pub const INT64: u8 = b'L';
    pub const FLOAT32: u8 = b'd';
    pub const FLOAT64: u8 = b'D';
    pub const CHAR: u8 = b'C';
    pub const STRING: u8 = b'S';
    pub const HIGH_PRECISION: u8 = b'H';
    pub const ARRAY_BEGIN: u8 = b'[';
    pub const ARRAY_END: u8 = b']';
    pub const OBJECT_BEGIN: u8 = b'{';
    pub const OBJECT_END: u8 = b'}';
    pub const TYPE: u8 = b'$';
    pub const COUNT: u8 = b'#';
}

fn is_value_type(m: u8) -> bool {
    matches!(
        m,
        marker::NULL
            | marker::TRUE
            | marker::FALSE
            | marker::INT8
            | marker::UINT8
            | marker::INT16
            | marker::INT32
            | marker::INT64
            | marker::FLOAT32
            | marker::FLOAT64
            | marker::CHAR
            | marker::STRING
            | marker::HIGH_PRECISION
    )
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
    item_type: Option<u8>,
}

/// Streaming UBJSON parser over any [`Source`].
#[derive(Debug)]
pub struct UbjsonParser<S> {
    source: S,
    options: DecodeOptions,
    stack: Vec<Frame>,
    scratch: Vec<u8>,
    more: bool,
    done: bool,
    cursor_mode: bool,
    mark_level: usize,
}

impl<S: Source> UbjsonParser<S> {
    pub fn new(source: S) -> Self {
        Self::with_options(source, DecodeOptions::default())
    }

    pub fn with_options(source: S, options: DecodeOptions) -> Self {
        Self {
            source,
            options,
            stack: vec![Frame { mode: Mode::Start, length: 0, index: 0, item_type: None }],
            scratch: Vec::new(),
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

    fn skip_noops(&mut self) -> Result<(), DecodeError> {
        while self.source.peek()? == Some(marker::NOOP) {
            self.source.get()?;
        }
        Ok(())
    }

    /// Reads the payload of a numeric marker, or `None` when the marker is
    /// not a numeric type.
    fn numeric_after(
        &mut self,
        m: u8,
        context: &'static str,
    ) -> Result<Option<i64>, DecodeError> {
        Ok(Some(match m {
            marker::INT8 => i64::from(self.source.read_i8(context)?),
            marker::UINT8 => i64::from(self.source.read_u8(context)?),
            marker::INT16 => i64::from(self.source.read_u16_be(context)? as i16),
            marker::INT32 => i64::from(self.source.read_u32_be(context)? as i32),
            marker::INT64 => self.source.read_u64_be(context)? as i64,
            _ => return Ok(None),
        }))
    }

    /// Lengths are numeric values; negative ones are rejected.
    fn read_length(&mut self, context: &'static str) -> Result<u64, DecodeError> {
        let m = self.source.read_u8(context)?;
        let Some(v) = self.numeric_after(m, context)? else {
            return Err(self.err(ErrorKind::InvalidLength { context }));
        };
        u64::try_from(v).map_err(|_| self.err(ErrorKind::InvalidLength { context }))
    }

    /// A terminator where a value or key was expected. Inside a counted
    /// container that is the size-mismatch policy error.
    fn terminator_error(&self, m: u8, ctx: &Context) -> DecodeError {
        if let Some(f) = self.stack.last() {
            match f.mode {
                Mode::Array | Mode::MapKey => {
                    return DecodeError::new(
                        ErrorKind::SizeMismatch {
                            declared: f.length,
                            actual: f.index.saturating_sub(1),
                        },
                        ctx.position,
                    );
                }
                Mode::MapValue => {
                    return DecodeError::new(
                        ErrorKind::SizeMismatch { declared: f.length, actual: f.index },
                        ctx.position,
                    );
                }
                _ => {}
            }
        }
        DecodeError::new(ErrorKind::UnknownMarker { marker: m }, ctx.position)
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
                    let item_type = top.item_type;
                    if let Some(f) = self.stack.last_mut() {
                        f.index += 1;
                    }
                    match item_type {
                        Some(t) => self.parse_typed_item(t, visitor)?,
                        None => self.parse_item(visitor)?,
                    }
                } else {
                    let ctx = Context::at(self.source.position());
                    self.stack.pop();
                    let cont = visitor.end_array(&ctx)?;
                    self.emit_end(cont);
                }
            }
            Mode::IndefArray => {
                self.skip_noops()?;
                if self.source.peek()? == Some(marker::ARRAY_END) {
                    self.source.get()?;
                    let ctx = Context::at(self.source.position());
                    self.stack.pop();
                    let cont = visitor.end_array(&ctx)?;
                    self.emit_end(cont);
                } else {
                    self.parse_item(visitor)?;
                }
            }
            Mode::MapKey => {
                if top.index < top.length {
                    self.skip_noops()?;
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
                let item_type = top.item_type;
                if let Some(f) = self.stack.last_mut() {
                    f.mode = Mode::MapKey;
                    f.index += 1;
                }
                match item_type {
                    Some(t) => self.parse_typed_item(t, visitor)?,
                    None => self.parse_item(visitor)?,
                }
            }
            Mode::IndefMapKey => {
                self.skip_noops()?;
                if self.source.peek()? == Some(marker::OBJECT_END) {
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
                }
                self.parse_item(visitor)?;
            }
        }
        Ok(())
    }

    fn parse_item(&mut self, visitor: &mut dyn Visitor) -> Result<(), DecodeError> {
        let cont = loop {
            let ctx = Context::at(self.source.position());
            let b = self.source.read_u8("value marker")?;
            match b {
                marker::NOOP => continue,
                marker::ARRAY_BEGIN => return self.begin_array_container(visitor, ctx),
                marker::OBJECT_BEGIN => return self.begin_object_container(visitor, ctx),
                marker::ARRAY_END | marker::OBJECT_END => {
                    return Err(self.terminator_error(b, &ctx));
                }
                _ => break self.scalar_payload(b, visitor, &ctx)?,
            }
        };
        self.emit(cont);
        Ok(())
    }

    fn parse_typed_item(&mut self, t: u8, visitor: &mut dyn Visitor) -> Result<(), DecodeError> {
        let ctx = Context::at(self.source.position());
        let cont = self.scalar_payload(t, visitor, &ctx)?;
        self.emit(cont);
        Ok(())
    }

    /// Reads the payload that follows (or is implied by) a value marker.
    fn scalar_payload(
        &mut self,
        m: u8,
        visitor: &mut dyn Visitor,
        ctx: &Context,
    ) -> Result<bool, DecodeError> {
        match m {
            marker::NULL => visitor.null_value(Tag::None, ctx),
            marker::TRUE => visitor.bool_value(true, ctx),
            marker::FALSE => visitor.bool_value(false, ctx),
            marker::INT8 => {
                let v = self.source.read_i8("integer payload")?;
                visitor.int64_value(i64::from(v), Tag::None, ctx)
            }
            marker::UINT8 => {
                let v = self.source.read_u8("integer payload")?;
                visitor.uint64_value(u64::from(v), Tag::None, ctx)
            }
            marker::INT16 => {
                let v = self.source.read_u16_be("integer payload")? as i16;
                visitor.int64_value(i64::from(v), Tag::None, ctx)
            }
            marker::INT32 => {
                let v = self.source.read_u32_be("integer payload")? as i32;
                visitor.int64_value(i64::from(v), Tag::None, ctx)
            }
            marker::INT64 => {
                let v = self.source.read_u64_be("integer payload")? as i64;
                visitor.int64_value(v, Tag::None, ctx)
            }
            marker::FLOAT32 => {
                let v = self.source.read_f32_be("float payload")?;
                visitor.double_value(f64::from(v), Tag::None, ctx)
            }
            marker::FLOAT64 => {
                let v = self.source.read_f64_be("float payload")?;
                visitor.double_value(v, Tag::None, ctx)
            }
            marker::CHAR => {
                let b = self.source.read_u8("char payload")?;
                if b > 0x7f {
                    return Err(DecodeError::new(
                        ErrorKind::InvalidUtf8 { context: "char payload" },
                        ctx.position,
                    ));
                }
                let mut buf = [0u8; 4];
                let text = char::from(b).encode_utf8(&mut buf);
                visitor.string_value(text, Tag::None, ctx)
            }
            marker::STRING => {
                let len = self.read_length("string length")?;
                self.source.read_bytes_into(len, &mut self.scratch, "string payload")?;
                let text = std::str::from_utf8(&self.scratch).map_err(|_| {
                    DecodeError::new(
                        ErrorKind::InvalidUtf8 { context: "string payload" },
                        ctx.position,
                    )
                })?;
                visitor.string_value(text, Tag::None, ctx)
            }
            marker::HIGH_PRECISION => self.high_precision_value(visitor, ctx),
            _ => Err(DecodeError::new(ErrorKind::UnknownMarker { marker: m }, ctx.position)),
        }
    }

    /// High-precision numbers carry decimal text; integers map to the
    /// bignum tag and anything with a fraction or exponent to bigdec.
    fn high_precision_value(
        &mut self,
        visitor: &mut dyn Visitor,
        ctx: &Context,
    ) -> Result<bool, DecodeError> {
        let len = self.read_length("high-precision number")?;
        self.source.read_bytes_into(len, &mut self.scratch, "high-precision number")?;
        let text = std::str::from_utf8(&self.scratch).map_err(|_| {
            DecodeError::new(
                ErrorKind::InvalidUtf8 { context: "high-precision number" },
                ctx.position,
            )
        })?;
        match classify_number(text) {
            Some(tag) => visitor.string_value(text, tag, ctx),
            None => Err(DecodeError::new(
                ErrorKind::InvalidLength { context: "high-precision number" },
                ctx.position,
            )),
        }
    }

    fn parse_key(&mut self, visitor: &mut dyn Visitor) -> Result<(), DecodeError> {
        let ctx = Context::at(self.source.position());
        let m = self.source.read_u8("key marker")?;
        if m == marker::OBJECT_END || m == marker::ARRAY_END {
            return Err(self.terminator_error(m, &ctx));
        }
        let Some(len) = self.numeric_after(m, "key length")? else {
            return Err(DecodeError::new(ErrorKind::InvalidKey { marker: m }, ctx.position));
        };
        let len = u64::try_from(len)
            .map_err(|_| self.err(ErrorKind::InvalidLength { context: "key length" }))?;
        self.source.read_bytes_into(len, &mut self.scratch, "key payload")?;
        let text = std::str::from_utf8(&self.scratch).map_err(|_| {
            DecodeError::new(ErrorKind::InvalidUtf8 { context: "key payload" }, ctx.position)
        })?;
        let cont = visitor.key(text, &ctx)?;
        self.emit(cont);
        Ok(())
    }

    /// Reads the optional `$` type and `#` count that follow a container
    /// opening, returning the element type and declared count.
    fn container_header(&mut self) -> Result<(Option<u8>, Option<u64>), DecodeError> {
        let mut item_type = None;
        if self.source.peek()? == Some(marker::TYPE) {
            self.source.get()?;
            let t = self.source.read_u8("element type")?;
            if !is_value_type(t) {
                return Err(self.err(ErrorKind::UnknownMarker { marker: t }));
            }
            item_type = Some(t);
        }
        if self.source.peek()? == Some(marker::COUNT) {
            self.source.get()?;
            let count = self.read_length("container count")?;
            let count = self.check_count(count)?;
            return Ok((item_type, Some(count)));
        }
        if item_type.is_some() {
            return Err(self.err(ErrorKind::CountRequired));
        }
        Ok((None, None))
    }

    fn begin_array_container(
        &mut self,
        visitor: &mut dyn Visitor,
        ctx: Context,
    ) -> Result<(), DecodeError> {
        let (item_type, count) = self.container_header()?;
        match count {
            Some(count) => {
                // A uint8-typed span is a byte string, not a container.
                if item_type == Some(marker::UINT8) {
                    self.source.read_bytes_into(count, &mut self.scratch, "byte string")?;
                    let cont = visitor.byte_string_value(&self.scratch, Tag::None, &ctx)?;
                    self.emit(cont);
                    return Ok(());
                }
                self.check_depth()?;
                self.stack.push(Frame {
                    mode: Mode::Array,
                    length: count,
                    index: 0,
                    item_type,
                });
                let cont = visitor.begin_array(usize::try_from(count).ok(), &ctx)?;
                self.emit(cont);
            }
            None => {
                self.check_depth()?;
                self.stack.push(Frame {
                    mode: Mode::IndefArray,
                    length: 0,
                    index: 0,
                    item_type: None,
                });
                let cont = visitor.begin_array(None, &ctx)?;
                self.emit(cont);
            }
        }
        Ok(())
    }

    fn begin_object_container(
        &mut self,
        visitor: &mut dyn Visitor,
        ctx: Context,
    ) -> Result<(), DecodeError> {
        let (item_type, count) = self.container_header()?;
        match count {
            Some(count) => {
                self.check_depth()?;
                self.stack.push(Frame {
                    mode: Mode::MapKey,
                    length: count,
                    index: 0,
                    item_type,
                });
                let cont = visitor.begin_object(usize::try_from(count).ok(), &ctx)?;
                self.emit(cont);
            }
            None => {
                self.check_depth()?;
                self.stack.push(Frame {
                    mode: Mode::IndefMapKey,
                    length: 0,
                    index: 0,
                    item_type: None,
                });
                let cont = visitor.begin_object(None, &ctx)?;
                self.emit(cont);
            }
        }
        Ok(())
    }
}

fn classify_number(s: &str) -> Option<Tag> {
    let rest = s.strip_prefix('-').unwrap_or(s);
    let (mantissa, exponent) = match rest.find(['e', 'E']) {
        Some(i) => (&rest[..i], Some(&rest[i + 1..])),
        None => (rest, None),
    };
    let (int_part, frac_part) = match mantissa.find('.') {
        Some(i) => (&mantissa[..i], Some(&mantissa[i + 1..])),
        None => (mantissa, None),
    };
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if let Some(frac) = frac_part {
        if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }
    if let Some(exp) = exponent {
        let exp = exp.strip_prefix(['+', '-']).unwrap_or(exp);
        if exp.is_empty() || !exp.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }
    if frac_part.is_some() || exponent.is_some() {
        Some(Tag::Bigdec)
    } else {
        Some(Tag::Bignum)
    }
}

impl<S: Source> Parser for UbjsonParser<S> {
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
        self.stack.push(Frame { mode: Mode::Start, length: 0, index: 0, item_type: None });
        self.scratch.clear();
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
    is_map: bool,
    counted: bool,
    declared: Option<u64>,
    count: u64,
}

/// UBJSON encoder; implements [`Visitor`] for direct transcoding.
///
/// Containers with a size hint use the counted `#` form; without one they
/// are terminator-delimited. Byte strings become `[$U#` spans and integers
/// beyond the `L` range fall back to high-precision `H` text.
#[derive(Debug, Default)]
pub struct UbjsonEncoder {
    buf: Vec<u8>,
    frames: Vec<EncFrame>,
}

impl UbjsonEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn err(&self, kind: ErrorKind) -> DecodeError {
        DecodeError::new(kind, self.buf.len() as u64)
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

    fn write_length(&mut self, len: u64) -> Result<(), DecodeError> {
        if len <= 0xff {
            self.buf.push(marker::UINT8);
            self.buf.push(len as u8);
        } else if len <= i16::MAX as u64 {
            self.buf.push(marker::INT16);
            self.buf.extend_from_slice(&(len as i16).to_be_bytes());
        } else if len <= i32::MAX as u64 {
            self.buf.push(marker::INT32);
            self.buf.extend_from_slice(&(len as i32).to_be_bytes());
        } else if len <= i64::MAX as u64 {
            self.buf.push(marker::INT64);
            self.buf.extend_from_slice(&(len as i64).to_be_bytes());
        } else {
            return Err(self.err(ErrorKind::InvalidLength { context: "length" }));
        }
        Ok(())
    }

    fn write_string(&mut self, s: &str) -> Result<(), DecodeError> {
        if s.len() == 1 && s.as_bytes()[0] <= 0x7f {
            self.buf.push(marker::CHAR);
            self.buf.push(s.as_bytes()[0]);
            return Ok(());
        }
        self.buf.push(marker::STRING);
        self.write_length(s.len() as u64)?;
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn write_high_precision(&mut self, digits: &str) -> Result<(), DecodeError> {
        self.buf.push(marker::HIGH_PRECISION);
        self.write_length(digits.len() as u64)?;
        self.buf.extend_from_slice(digits.as_bytes());
        Ok(())
    }
}

impl Visitor for UbjsonEncoder {
    fn begin_document(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn end_document(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn begin_object(&mut self, hint: Option<usize>, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_value();
        self.buf.push(marker::OBJECT_BEGIN);
        match hint {
            Some(n) => {
                self.buf.push(marker::COUNT);
                self.write_length(n as u64)?;
                self.frames.push(EncFrame {
                    is_map: true,
                    counted: true,
                    declared: Some(n as u64),
                    count: 0,
                });
            }
            None => {
                self.frames.push(EncFrame {
                    is_map: true,
                    counted: false,
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
            if !frame.counted {
                self.buf.push(marker::OBJECT_END);
            }
        }
        Ok(true)
    }

    fn begin_array(&mut self, hint: Option<usize>, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_value();
        self.buf.push(marker::ARRAY_BEGIN);
        match hint {
            Some(n) => {
                self.buf.push(marker::COUNT);
                self.write_length(n as u64)?;
                self.frames.push(EncFrame {
                    is_map: false,
                    counted: true,
                    declared: Some(n as u64),
                    count: 0,
                });
            }
            None => {
                self.frames.push(EncFrame {
                    is_map: false,
                    counted: false,
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
            if !frame.counted {
                self.buf.push(marker::ARRAY_END);
            }
        }
        Ok(true)
    }

    fn key(&mut self, name: &str, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_key();
        self.write_length(name.len() as u64)?;
        self.buf.extend_from_slice(name.as_bytes());
        Ok(true)
    }

    fn string_value(&mut self, value: &str, tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_value();
        match tag {
            Tag::Bignum | Tag::Bigdec if classify_number(value).is_some() => {
                self.write_high_precision(value)?;
            }
            _ => self.write_string(value)?,
        }
        Ok(true)
    }

    fn byte_string_value(
        &mut self,
        value: &[u8],
        _tag: Tag,
        _ctx: &Context,
    ) -> Result<bool, DecodeError> {
        self.note_value();
        self.buf.push(marker::ARRAY_BEGIN);
        self.buf.push(marker::TYPE);
        self.buf.push(marker::UINT8);
        self.buf.push(marker::COUNT);
        self.write_length(value.len() as u64)?;
        self.buf.extend_from_slice(value);
        Ok(true)
    }

    fn bignum_value(
        &mut self,
        negative: bool,
        magnitude: &[u8],
        _ctx: &Context,
    ) -> Result<bool, DecodeError> {
        self.note_value();
        let digits = magnitude_to_decimal(negative, magnitude);
        self.write_high_precision(&digits)
            .map(|()| true)
    }

    fn int64_value(&mut self, value: i64, _tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_value();
        if (0..=0xff).contains(&value) {
            self.buf.push(marker::UINT8);
            self.buf.push(value as u8);
        } else if (-128..=127).contains(&value) {
            self.buf.push(marker::INT8);
            self.buf.push(value as u8);
        } else if (i64::from(i16::MIN)..=i64::from(i16::MAX)).contains(&value) {
            self.buf.push(marker::INT16);
            self.buf.extend_from_slice(&(value as i16).to_be_bytes());
        } else if (i64::from(i32::MIN)..=i64::from(i32::MAX)).contains(&value) {
            self.buf.push(marker::INT32);
            self.buf.extend_from_slice(&(value as i32).to_be_bytes());
        } else {
            self.buf.push(marker::INT64);
            self.buf.extend_from_slice(&value.to_be_bytes());
        }
        Ok(true)
    }

    fn uint64_value(&mut self, value: u64, _tag: Tag, ctx: &Context) -> Result<bool, DecodeError> {
        if value <= i64::MAX as u64 {
            return self.int64_value(value as i64, Tag::None, ctx);
        }
        self.note_value();
        // Out of signed range; high-precision text keeps it exact.
        self.write_high_precision(&value.to_string())
            .map(|()| true)
    }

    fn double_value(&mut self, value: f64, _tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_value();
        self.buf.push(marker::FLOAT64);
        self.buf.extend_from_slice(&value.to_bits().to_be_bytes());
        Ok(true)
    }

    fn bool_value(&mut self, value: bool, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_value();
        self.buf.push(if value { marker::TRUE } else { marker::FALSE });
        Ok(true)
    }

    fn null_value(&mut self, _tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_value();
        self.buf.push(marker::NULL);
        Ok(true)
    }
}

// ============================================================================
// CONVENIENCE API
// ============================================================================

/// Decodes a complete UBJSON document from a byte slice.
pub fn decode(bytes: &[u8]) -> Result<Value, DecodeError> {
    decode_with_options(bytes, DecodeOptions::default())
}

pub fn decode_with_options(bytes: &[u8], options: DecodeOptions) -> Result<Value, DecodeError> {
    decode_from(SliceSource::new(bytes), options)
}

/// Decodes a complete document from any [`Source`].
pub fn decode_from<S: Source>(source: S, options: DecodeOptions) -> Result<Value, DecodeError> {
    let mut parser = UbjsonParser::with_options(source, options);
    let mut decoder = TreeDecoder::new();
    parser.parse_all(&mut decoder)?;
    let position = parser.position();
    decoder.take_value().ok_or_else(|| {
        DecodeError::new(ErrorKind::UnexpectedEof { context: "document" }, position)
    })
}

/// Encodes a [`Value`] tree as UBJSON.
pub fn encode(value: &Value) -> Result<Vec<u8>, DecodeError> {
    let mut encoder = UbjsonEncoder::new();
    let ctx = Context::default();
    encoder.begin_document(&ctx)?;
    value.emit_to(&mut encoder, &ctx)?;
    encoder.end_document(&ctx)?;
    Ok(encoder.into_bytes())
}
