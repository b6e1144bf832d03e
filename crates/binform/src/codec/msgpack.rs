//! MessagePack format parser and encoder.
//!
//! Wire layout: single-byte markers with fix-forms for small values,
//! big-endian multi-byte payloads, and the `-1` extension type reserved
//! for timestamps.

use crate::codec::{magnitude_to_decimal, Parser, NO_MARK};
use crate::decoder::TreeDecoder;
use crate::error::{DecodeError, ErrorKind};
use crate::event::{Context, Tag, Visitor};
use crate::limits::DecodeOptions;
use crate::source::{SliceSource, Source};
use crate::value::Value;

mod marker {
    pub const NIL: u8 = 0xc0;
    pub const NEVER_USED: u8 = 0xc1;
    pub const FALSE: u8 = 0xc2;
    pub const TRUE: u8 = 0xc3;
    pub const BIN8: u8 = 0xc4;
    pub const BIN16: u8 = 0xc5;
    pub const BIN32: u8 = 0xc6;
    pub const EXT8: u8 = 0xc7;
    pub const EXT16: u8 = 0xc8;
    pub const EXT32: u8 = 0xc9;
    pub const FLOAT32: u8 = 0xca;
    pub const FLOAT64: u8 = 0xcb;
    pub const UINT8: u8 = 0xcc;
    pub const UINT16: u8 = 0xcd;
    pub const UINT32: u8 = 0xce;
    pub const UINT64: u8 = 0xcf;
    pub const INT8: u8 = 0xd0;
    pub const INT16: u8 = 0xd1;
    pub const INT32: u8 = 0xd2;
    pub const INT64: u8 = 0xd3;
    pub const FIXEXT1: u8 = 0xd4;
    pub const FIXEXT2: u8 = 0xd5;
    pub const FIXEXT4: u8 = 0xd6;
    pub const FIXEXT8: u8 = 0xd7;
    pub const FIXEXT16: u8 = 0xd8;
    pub const STR8: u8 = 0xd9;
    pub const STR16: u8 = 0xda;
    pub const STR32: u8 = 0xdb;
    pub const ARRAY16: u8 = 0xdc;
    pub const ARRAY32: u8 = 0xdd;
    pub const MAP16: u8 = 0xde;
    pub const MAP32: u8 = 0xdf;
}

/// Timestamp extension type.
const TIMESTAMP_TYPE: i8 = -1;

const NANOS_PER_SEC: i128 = 1_000_000_000;

// ============================================================================
// DECODING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Start,
    Root,
    BeforeDone,
    Array,
    MapKey,
    MapValue,
}

#[derive(Debug)]
struct Frame {
    mode: Mode,
    length: u64,
    index: u64,
}

/// Streaming MessagePack parser over any [`Source`].
#[derive(Debug)]
pub struct MsgpackParser<S> {
    source: S,
    options: DecodeOptions,
    stack: Vec<Frame>,
    scratch: Vec<u8>,
    more: bool,
    done: bool,
    cursor_mode: bool,
    mark_level: usize,
}

impl<S: Source> MsgpackParser<S> {
    pub fn new(source: S) -> Self {
        Self::with_options(source, DecodeOptions::default())
    }

    pub fn with_options(source: S, options: DecodeOptions) -> Self {
        Self {
            source,
            options,
            stack: vec![Frame { mode: Mode::Start, length: 0, index: 0 }],
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

    /// Like [`emit`](Self::emit) but also pauses when an armed mark level
    /// has been reached by the pop that just happened.
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
            Mode::MapKey => {
                if top.index < top.length {
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
        }
        Ok(())
    }

    fn parse_item(&mut self, visitor: &mut dyn Visitor) -> Result<(), DecodeError> {
        let ctx = Context::at(self.source.position());
        let m = self.source.read_u8("value marker")?;
        let cont = match m {
            0x00..=0x7f => visitor.uint64_value(u64::from(m), Tag::None, &ctx)?,
            0x80..=0x8f => return self.push_map(u64::from(m & 0x0f), visitor, ctx),
            0x90..=0x9f => return self.push_array(u64::from(m & 0x0f), visitor, ctx),
            0xa0..=0xbf => self.text_value(u64::from(m & 0x1f), visitor, &ctx)?,
            marker::NIL => visitor.null_value(Tag::None, &ctx)?,
            marker::NEVER_USED => {
                return Err(DecodeError::new(
                    ErrorKind::UnknownMarker { marker: m },
                    ctx.position,
                ));
            }
            marker::FALSE => visitor.bool_value(false, &ctx)?,
            marker::TRUE => visitor.bool_value(true, &ctx)?,
            marker::BIN8 => {
                let len = u64::from(self.source.read_u8("binary length")?);
                self.bytes_value(len, visitor, &ctx)?
            }
            marker::BIN16 => {
                let len = u64::from(self.source.read_u16_be("binary length")?);
                self.bytes_value(len, visitor, &ctx)?
            }
            marker::BIN32 => {
                let len = u64::from(self.source.read_u32_be("binary length")?);
                self.bytes_value(len, visitor, &ctx)?
            }
            marker::EXT8 => {
                let len = u64::from(self.source.read_u8("extension length")?);
                self.ext_value(len, visitor, &ctx)?
            }
            marker::EXT16 => {
                let len = u64::from(self.source.read_u16_be("extension length")?);
                self.ext_value(len, visitor, &ctx)?
            }
            marker::EXT32 => {
                let len = u64::from(self.source.read_u32_be("extension length")?);
                self.ext_value(len, visitor, &ctx)?
            }
            marker::FLOAT32 => {
                let v = self.source.read_f32_be("float payload")?;
                visitor.double_value(f64::from(v), Tag::None, &ctx)?
            }
            marker::FLOAT64 => {
                let v = self.source.read_f64_be("float payload")?;
                visitor.double_value(v, Tag::None, &ctx)?
            }
            marker::UINT8 => {
                let v = self.source.read_u8("integer payload")?;
                visitor.uint64_value(u64::from(v), Tag::None, &ctx)?
            }
            marker::UINT16 => {
                let v = self.source.read_u16_be("integer payload")?;
                visitor.uint64_value(u64::from(v), Tag::None, &ctx)?
            }
            marker::UINT32 => {
                let v = self.source.read_u32_be("integer payload")?;
                visitor.uint64_value(u64::from(v), Tag::None, &ctx)?
            }
            marker::UINT64 => {
                let v = self.source.read_u64_be("integer payload")?;
                visitor.uint64_value(v, Tag::None, &ctx)?
            }
            marker::INT8 => {
                let v = self.source.read_i8("integer payload")?;
                visitor.int64_value(i64::from(v), Tag::None, &ctx)?
            }
            marker::INT16 => {
                let v = self.source.read_u16_be("integer payload")? as i16;
                visitor.int64_value(i64::from(v), Tag::None, &ctx)?
            }
            marker::INT32 => {
                let v = self.source.read_u32_be("integer payload")? as i32;
                visitor.int64_value(i64::from(v), Tag::None, &ctx)?
            }
            marker::INT64 => {
                let v = self.source.read_u64_be("integer payload")? as i64;
                visitor.int64_value(v, Tag::None, &ctx)?
            }
            marker::FIXEXT1 => self.ext_value(1, visitor, &ctx)?,
            marker::FIXEXT2 => self.ext_value(2, visitor, &ctx)?,
            marker::FIXEXT4 => self.ext_value(4, visitor, &ctx)?,
            marker::FIXEXT8 => self.ext_value(8, visitor, &ctx)?,
            marker::FIXEXT16 => self.ext_value(16, visitor, &ctx)?,
            marker::STR8 => {
                let len = u64::from(self.source.read_u8("string length")?);
                self.text_value(len, visitor, &ctx)?
            }
            marker::STR16 => {
                let len = u64::from(self.source.read_u16_be("string length")?);
                self.text_value(len, visitor, &ctx)?
            }
            marker::STR32 => {
                let len = u64::from(self.source.read_u32_be("string length")?);
                self.text_value(len, visitor, &ctx)?
            }
            marker::ARRAY16 => {
                let n = u64::from(self.source.read_u16_be("array count")?);
                return self.push_array(n, visitor, ctx);
            }
            marker::ARRAY32 => {
                let n = u64::from(self.source.read_u32_be("array count")?);
                return self.push_array(n, visitor, ctx);
            }
            marker::MAP16 => {
                let n = u64::from(self.source.read_u16_be("map count")?);
                return self.push_map(n, visitor, ctx);
            }
            marker::MAP32 => {
                let n = u64::from(self.source.read_u32_be("map count")?);
                return self.push_map(n, visitor, ctx);
            }
            0xe0..=0xff => visitor.int64_value(i64::from(m as i8), Tag::None, &ctx)?,
        };
        self.emit(cont);
        Ok(())
    }

    fn parse_key(&mut self, visitor: &mut dyn Visitor) -> Result<(), DecodeError> {
        let ctx = Context::at(self.source.position());
        let m = self.source.read_u8("key marker")?;
        if let Some(f) = self.stack.last_mut() {
            f.mode = Mode::MapValue;
        }
        let cont = match m {
            0xa0..=0xbf => self.text_key(u64::from(m & 0x1f), visitor, &ctx)?,
            marker::STR8 => {
                let len = u64::from(self.source.read_u8("key length")?);
                self.text_key(len, visitor, &ctx)?
            }
            marker::STR16 => {
                let len = u64::from(self.source.read_u16_be("key length")?);
                self.text_key(len, visitor, &ctx)?
            }
            marker::STR32 => {
                let len = u64::from(self.source.read_u32_be("key length")?);
                self.text_key(len, visitor, &ctx)?
            }
            // Integer keys are rendered as decimal text.
            0x00..=0x7f => visitor.key(&u64::from(m).to_string(), &ctx)?,
            0xe0..=0xff => visitor.key(&i64::from(m as i8).to_string(), &ctx)?,
            marker::UINT8 => {
                let v = self.source.read_u8("key payload")?;
                visitor.key(&v.to_string(), &ctx)?
            }
            marker::UINT16 => {
                let v = self.source.read_u16_be("key payload")?;
                visitor.key(&v.to_string(), &ctx)?
            }
            marker::UINT32 => {
                let v = self.source.read_u32_be("key payload")?;
                visitor.key(&v.to_string(), &ctx)?
            }
            marker::UINT64 => {
                let v = self.source.read_u64_be("key payload")?;
                visitor.key(&v.to_string(), &ctx)?
            }
            marker::INT8 => {
                let v = self.source.read_i8("key payload")?;
                visitor.key(&v.to_string(), &ctx)?
            }
            marker::INT16 => {
                let v = self.source.read_u16_be("key payload")? as i16;
                visitor.key(&v.to_string(), &ctx)?
            }
            marker::INT32 => {
                let v = self.source.read_u32_be("key payload")? as i32;
                visitor.key(&v.to_string(), &ctx)?
            }
            marker::INT64 => {
                let v = self.source.read_u64_be("key payload")? as i64;
                visitor.key(&v.to_string(), &ctx)?
            }
            other => {
                return Err(DecodeError::new(
                    ErrorKind::InvalidKey { marker: other },
                    ctx.position,
                ));
            }
        };
        self.emit(cont);
        Ok(())
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

    fn text_value(
        &mut self,
        len: u64,
        visitor: &mut dyn Visitor,
        ctx: &Context,
    ) -> Result<bool, DecodeError> {
        self.source.read_bytes_into(len, &mut self.scratch, "text payload")?;
        let text = std::str::from_utf8(&self.scratch).map_err(|_| {
            DecodeError::new(ErrorKind::InvalidUtf8 { context: "text payload" }, ctx.position)
        })?;
        visitor.string_value(text, Tag::None, ctx)
    }

    fn text_key(
        &mut self,
        len: u64,
        visitor: &mut dyn Visitor,
        ctx: &Context,
    ) -> Result<bool, DecodeError> {
        self.source.read_bytes_into(len, &mut self.scratch, "key payload")?;
        let text = std::str::from_utf8(&self.scratch).map_err(|_| {
            DecodeError::new(ErrorKind::InvalidUtf8 { context: "key payload" }, ctx.position)
        })?;
        visitor.key(text, ctx)
    }

    fn bytes_value(
        &mut self,
        len: u64,
        visitor: &mut dyn Visitor,
        ctx: &Context,
    ) -> Result<bool, DecodeError> {
        self.source.read_bytes_into(len, &mut self.scratch, "binary payload")?;
        visitor.byte_string_value(&self.scratch, Tag::None, ctx)
    }

    /// Extensions: type `-1` is a timestamp; everything else surfaces as a
    /// byte string tagged `Ext` with the type code folded in as the first
    /// payload byte (so it survives a round trip).
    fn ext_value(
        &mut self,
        len: u64,
        visitor: &mut dyn Visitor,
        ctx: &Context,
    ) -> Result<bool, DecodeError> {
        let ext_type = self.source.read_i8("extension type")?;
        if ext_type == TIMESTAMP_TYPE {
            match len {
                4 => {
                    let sec = self.source.read_u32_be("timestamp payload")?;
                    return visitor.uint64_value(u64::from(sec), Tag::EpochSecond, ctx);
                }
                8 => {
                    let data = self.source.read_u64_be("timestamp payload")?;
                    let nanos = data >> 34;
                    let sec = data & 0x3_ffff_ffff;
                    let total = i128::from(sec) * NANOS_PER_SEC + i128::from(nanos);
                    return emit_nanos(total, visitor, ctx);
                }
                12 => {
                    let nanos = self.source.read_u32_be("timestamp payload")?;
                    let sec = self.source.read_u64_be("timestamp payload")? as i64;
                    let total = i128::from(sec) * NANOS_PER_SEC + i128::from(nanos);
                    return emit_nanos(total, visitor, ctx);
                }
                _ => {}
            }
        }
        self.source.read_bytes_into(len, &mut self.scratch, "extension payload")?;
        self.scratch.insert(0, ext_type as u8);
        visitor.byte_string_value(&self.scratch, Tag::Ext, ctx)
    }
}

fn emit_nanos(
    total: i128,
    visitor: &mut dyn Visitor,
    ctx: &Context,
) -> Result<bool, DecodeError> {
    if let Ok(v) = i64::try_from(total) {
        visitor.int64_value(v, Tag::EpochNano, ctx)
    } else if let Ok(v) = u64::try_from(total) {
        visitor.uint64_value(v, Tag::EpochNano, ctx)
    } else {
        visitor.double_value(total as f64 / 1e9, Tag::EpochSecond, ctx)
    }
}

impl<S: Source> Parser for MsgpackParser<S> {
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
    count: u64,
    declared: Option<u64>,
    patch_offset: Option<usize>,
}

/// MessagePack encoder; implements [`Visitor`] so it can sit directly
/// behind a parser for transcoding.
///
/// Containers opened without a size hint use the 32-bit form and backpatch
/// the count on close.
#[derive(Debug, Default)]
pub struct MsgpackEncoder {
    buf: Vec<u8>,
    frames: Vec<EncFrame>,
}

impl MsgpackEncoder {
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

    fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }

    fn write_uint(&mut self, v: u64) {
        if v <= 0x7f {
            self.buf.push(v as u8);
        } else if v <= 0xff {
            self.buf.push(marker::UINT8);
            self.buf.push(v as u8);
        } else if v <= 0xffff {
            self.buf.push(marker::UINT16);
            self.buf.extend_from_slice(&(v as u16).to_be_bytes());
        } else if v <= 0xffff_ffff {
            self.buf.push(marker::UINT32);
            self.buf.extend_from_slice(&(v as u32).to_be_bytes());
        } else {
            self.buf.push(marker::UINT64);
            self.buf.extend_from_slice(&v.to_be_bytes());
        }
    }

    fn write_int(&mut self, v: i64) {
        if v >= 0 {
            self.write_uint(v as u64);
        } else if v >= -32 {
            self.buf.push(v as i8 as u8);
        } else if v >= i64::from(i8::MIN) {
            self.buf.push(marker::INT8);
            self.buf.push(v as i8 as u8);
        } else if v >= i64::from(i16::MIN) {
            self.buf.push(marker::INT16);
            self.buf.extend_from_slice(&(v as i16).to_be_bytes());
        } else if v >= i64::from(i32::MIN) {
            self.buf.push(marker::INT32);
            self.buf.extend_from_slice(&(v as i32).to_be_bytes());
        } else {
            self.buf.push(marker::INT64);
            self.buf.extend_from_slice(&v.to_be_bytes());
        }
    }

    fn write_str(&mut self, s: &str) -> Result<(), DecodeError> {
        let len = s.len();
        if len <= 31 {
            self.buf.push(0xa0 | len as u8);
        } else if len <= 0xff {
            self.buf.push(marker::STR8);
            self.buf.push(len as u8);
        } else if len <= 0xffff {
            self.buf.push(marker::STR16);
            self.buf.extend_from_slice(&(len as u16).to_be_bytes());
        } else if let Ok(n) = u32::try_from(len) {
            self.buf.push(marker::STR32);
            self.buf.extend_from_slice(&n.to_be_bytes());
        } else {
            return Err(self.err(ErrorKind::InvalidLength { context: "string length" }));
        }
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn write_bin(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        let len = bytes.len();
        if len <= 0xff {
            self.buf.push(marker::BIN8);
            self.buf.push(len as u8);
        } else if len <= 0xffff {
            self.buf.push(marker::BIN16);
            self.buf.extend_from_slice(&(len as u16).to_be_bytes());
        } else if let Ok(n) = u32::try_from(len) {
            self.buf.push(marker::BIN32);
            self.buf.extend_from_slice(&n.to_be_bytes());
        } else {
            return Err(self.err(ErrorKind::InvalidLength { context: "binary length" }));
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    fn write_ext(&mut self, ext_type: i8, payload: &[u8]) -> Result<(), DecodeError> {
        match payload.len() {
            1 => self.buf.push(marker::FIXEXT1),
            2 => self.buf.push(marker::FIXEXT2),
            4 => self.buf.push(marker::FIXEXT4),
            8 => self.buf.push(marker::FIXEXT8),
            16 => self.buf.push(marker::FIXEXT16),
            len if len <= 0xff => {
                self.buf.push(marker::EXT8);
                self.buf.push(len as u8);
            }
            len if len <= 0xffff => {
                self.buf.push(marker::EXT16);
                self.buf.extend_from_slice(&(len as u16).to_be_bytes());
            }
            len => {
                let n = u32::try_from(len).map_err(|_| {
                    self.err(ErrorKind::InvalidLength { context: "extension length" })
                })?;
                self.buf.push(marker::EXT32);
                self.buf.extend_from_slice(&n.to_be_bytes());
            }
        }
        self.buf.push(ext_type as u8);
        self.buf.extend_from_slice(payload);
        Ok(())
    }

    fn write_timestamp(&mut self, sec: i64, nanos: u32) {
        if nanos == 0 && (0..=0xffff_ffff).contains(&sec) {
            self.buf.push(marker::FIXEXT4);
            self.buf.push(TIMESTAMP_TYPE as u8);
            self.buf.extend_from_slice(&(sec as u32).to_be_bytes());
        } else if (0..1 << 34).contains(&sec) {
            let data = (u64::from(nanos) << 34) | sec as u64;
            self.buf.push(marker::FIXEXT8);
            self.buf.push(TIMESTAMP_TYPE as u8);
            self.buf.extend_from_slice(&data.to_be_bytes());
        } else {
            self.buf.push(marker::EXT8);
            self.buf.push(12);
            self.buf.push(TIMESTAMP_TYPE as u8);
            self.buf.extend_from_slice(&nanos.to_be_bytes());
            self.buf.extend_from_slice(&sec.to_be_bytes());
        }
    }
}

impl Visitor for MsgpackEncoder {
    fn begin_document(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn end_document(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn begin_object(&mut self, hint: Option<usize>, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_value();
        let (declared, patch_offset) = match hint {
            Some(n) => {
                if n <= 15 {
                    self.buf.push(0x80 | n as u8);
                } else if n <= 0xffff {
                    self.buf.push(marker::MAP16);
                    self.buf.extend_from_slice(&(n as u16).to_be_bytes());
                } else {
                    let count = u32::try_from(n).map_err(|_| {
                        self.err(ErrorKind::InvalidLength { context: "map count" })
                    })?;
                    self.buf.push(marker::MAP32);
                    self.buf.extend_from_slice(&count.to_be_bytes());
                }
                (Some(n as u64), None)
            }
            None => {
                self.buf.push(marker::MAP32);
                let offset = self.buf.len();
                self.buf.extend_from_slice(&[0; 4]);
                (None, Some(offset))
            }
        };
        self.frames.push(EncFrame { is_map: true, count: 0, declared, patch_offset });
        Ok(true)
    }

    fn end_object(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
        let Some(frame) = self.frames.pop() else {
            return Ok(true);
        };
        debug_assert!(frame.is_map);
        if let Some(declared) = frame.declared {
            debug_assert_eq!(declared, frame.count);
        }
        if let Some(offset) = frame.patch_offset {
            let count = u32::try_from(frame.count)
                .map_err(|_| self.err(ErrorKind::InvalidLength { context: "map count" }))?;
            self.patch_u32(offset, count);
        }
        Ok(true)
    }

    fn begin_array(&mut self, hint: Option<usize>, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_value();
        let (declared, patch_offset) = match hint {
            Some(n) => {
                if n <= 15 {
                    self.buf.push(0x90 | n as u8);
                } else if n <= 0xffff {
                    self.buf.push(marker::ARRAY16);
                    self.buf.extend_from_slice(&(n as u16).to_be_bytes());
                } else {
                    let count = u32::try_from(n).map_err(|_| {
                        self.err(ErrorKind::InvalidLength { context: "array count" })
                    })?;
                    self.buf.push(marker::ARRAY32);
                    self.buf.extend_from_slice(&count.to_be_bytes());
                }
                (Some(n as u64), None)
            }
            None => {
                self.buf.push(marker::ARRAY32);
                let offset = self.buf.len();
                self.buf.extend_from_slice(&[0; 4]);
                (None, Some(offset))
            }
        };
        self.frames.push(EncFrame { is_map: false, count: 0, declared, patch_offset });
        Ok(true)
    }

    fn end_array(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
        let Some(frame) = self.frames.pop() else {
            return Ok(true);
        };
        debug_assert!(!frame.is_map);
        if let Some(declared) = frame.declared {
            debug_assert_eq!(declared, frame.count);
        }
        if let Some(offset) = frame.patch_offset {
            let count = u32::try_from(frame.count)
                .map_err(|_| self.err(ErrorKind::InvalidLength { context: "array count" }))?;
            self.patch_u32(offset, count);
        }
        Ok(true)
    }

    fn key(&mut self, name: &str, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_key();
        self.write_str(name)?;
        Ok(true)
    }

    fn string_value(&mut self, value: &str, _tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_value();
        self.write_str(value)?;
        Ok(true)
    }

    fn byte_string_value(
        &mut self,
        value: &[u8],
        tag: Tag,
        _ctx: &Context,
    ) -> Result<bool, DecodeError> {
        self.note_value();
        if tag == Tag::Ext && !value.is_empty() {
            self.write_ext(value[0] as i8, &value[1..])?;
        } else {
            self.write_bin(value)?;
        }
        Ok(true)
    }

    fn bignum_value(
        &mut self,
        negative: bool,
        magnitude: &[u8],
        _ctx: &Context,
    ) -> Result<bool, DecodeError> {
        self.note_value();
        let trimmed: &[u8] = {
            let skip = magnitude.iter().take_while(|&&b| b == 0).count();
            &magnitude[skip.min(magnitude.len().saturating_sub(1))..]
        };
        if trimmed.len() <= 8 {
            let v = trimmed.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
            if !negative {
                self.write_uint(v);
                return Ok(true);
            }
            if v <= 1 << 63 {
                self.write_int((-(i128::from(v))) as i64);
                return Ok(true);
            }
        }
        self.write_str(&magnitude_to_decimal(negative, magnitude))?;
        Ok(true)
    }

    fn int64_value(&mut self, value: i64, tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_value();
        match tag {
            Tag::EpochSecond => self.write_timestamp(value, 0),
            Tag::EpochMilli => {
                let sec = value.div_euclid(1000);
                let nanos = (value.rem_euclid(1000) * 1_000_000) as u32;
                self.write_timestamp(sec, nanos);
            }
            Tag::EpochNano => {
                let sec = value.div_euclid(1_000_000_000);
                let nanos = value.rem_euclid(1_000_000_000) as u32;
                self.write_timestamp(sec, nanos);
            }
            _ => self.write_int(value),
        }
        Ok(true)
    }

    fn uint64_value(&mut self, value: u64, tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_value();
        match tag {
            Tag::EpochSecond if i64::try_from(value).is_ok() => {
                self.write_timestamp(value as i64, 0);
            }
            Tag::EpochMilli => {
                let sec = (value / 1000) as i64;
                let nanos = ((value % 1000) * 1_000_000) as u32;
                self.write_timestamp(sec, nanos);
            }
            Tag::EpochNano => {
                let sec = (value / 1_000_000_000) as i64;
                let nanos = (value % 1_000_000_000) as u32;
                self.write_timestamp(sec, nanos);
            }
            _ => self.write_uint(value),
        }
        Ok(true)
    }

    fn double_value(&mut self, value: f64, tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_value();
        if tag == Tag::EpochSecond
            && value.is_finite()
            && (i64::MIN as f64..i64::MAX as f64).contains(&value.floor())
        {
            let sec = value.floor();
            let mut nanos = ((value - sec) * 1e9).round() as u64;
            let mut sec = sec as i64;
            if nanos >= 1_000_000_000 {
                sec += 1;
                nanos = 0;
            }
            self.write_timestamp(sec, nanos as u32);
        } else {
            self.buf.push(marker::FLOAT64);
            self.buf.extend_from_slice(&value.to_bits().to_be_bytes());
        }
        Ok(true)
    }

    fn bool_value(&mut self, value: bool, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_value();
        self.buf.push(if value { marker::TRUE } else { marker::FALSE });
        Ok(true)
    }

    fn null_value(&mut self, _tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        self.note_value();
        self.buf.push(marker::NIL);
        Ok(true)
    }
}

// ============================================================================
// CONVENIENCE API
// ============================================================================

/// Decodes a complete MessagePack document from a byte slice.
pub fn decode(bytes: &[u8]) -> Result<Value, DecodeError> {
    decode_with_options(bytes, DecodeOptions::default())
}

pub fn decode_with_options(bytes: &[u8], options: DecodeOptions) -> Result<Value, DecodeError> {
    decode_from(SliceSource::new(bytes), options)
}

/// Decodes a complete document from any [`Source`].
pub fn decode_from<S: Source>(source: S, options: DecodeOptions) -> Result<Value, DecodeError> {
    let mut parser = MsgpackParser::with_options(source, options);
    let mut decoder = TreeDecoder::new();
    parser.parse_all(&mut decoder)?;
    let position = parser.position();
    decoder.take_value().ok_or_else(|| {
        DecodeError::new(ErrorKind::UnexpectedEof { context: "document" }, position)
    })
}

/// Encodes a [`Value`] tree as MessagePack.
pub fn encode(value: &Value) -> Result<Vec<u8>, DecodeError> {
    let mut encoder = MsgpackEncoder::new();
    let ctx = Context::default();
    encoder.begin_document(&ctx)?;
    value.emit_to(&mut encoder, &ctx)?;
    encoder.end_document(&ctx)?;
    Ok(encoder.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::strategies::{arb_value, FormatCaps};
    use proptest::prelude::*;

    fn round_trip(value: &Value) -> Value {
        let bytes = encode(value).unwrap();
        decode(&bytes).unwrap()
    }

    #[test]
    fn test_scalar_wire_bytes() {
        assert_eq!(encode(&Value::UInt(5, Tag::None)).unwrap(), [0x05]);
        assert_eq!(encode(&Value::Int(-1, Tag::None)).unwrap(), [0xff]);
        assert_eq!(encode(&Value::Null(Tag::None)).unwrap(), [0xc0]);
        assert_eq!(encode(&Value::Bool(true)).unwrap(), [0xc3]);
        assert_eq!(
            encode(&Value::from("hi")).unwrap(),
            [0xa2, b'h', b'i']
        );
        assert_eq!(
            encode(&Value::Int(-33, Tag::None)).unwrap(),
            [0xd0, 0xdf]
        );
        assert_eq!(encode(&Value::Int(-32, Tag::None)).unwrap(), [0xe0]);
    }

    #[test]
    fn test_integer_width_boundaries_round_trip() {
        for v in [
            0u64,
            0x7f,
            0x80,
            0xff,
            0x100,
            0xffff,
            0x1_0000,
            0xffff_ffff,
            0x1_0000_0000,
            u64::MAX,
        ] {
            assert_eq!(round_trip(&Value::UInt(v, Tag::None)), Value::UInt(v, Tag::None));
        }
        for v in [
            -1i64,
            -32,
            -33,
            -128,
            -129,
            -32768,
            -32769,
            i64::from(i32::MIN),
            i64::from(i32::MIN) - 1,
            i64::MIN,
        ] {
            assert_eq!(round_trip(&Value::Int(v, Tag::None)), Value::Int(v, Tag::None));
        }
    }

    #[test]
    fn test_string_width_boundaries() {
        let s31 = "x".repeat(31);
        let s32 = "x".repeat(32);
        let s256 = "x".repeat(256);
        assert_eq!(encode(&Value::from(s31.as_str())).unwrap()[0], 0xbf);
        assert_eq!(encode(&Value::from(s32.as_str())).unwrap()[..2], [0xd9, 32]);
        assert_eq!(
            encode(&Value::from(s256.as_str())).unwrap()[..3],
            [0xda, 0x01, 0x00]
        );
        for s in [s31, s32, s256] {
            assert_eq!(round_trip(&Value::from(s.as_str())), Value::from(s.as_str()));
        }
    }

    #[test]
    fn test_container_boundaries_round_trip() {
        let a15 = Value::Array(vec![Value::Bool(false); 15]);
        let a16 = Value::Array(vec![Value::Bool(false); 16]);
        assert_eq!(encode(&a15).unwrap()[0], 0x9f);
        assert_eq!(encode(&a16).unwrap()[0], 0xdc);
        assert_eq!(round_trip(&a15), a15);
        assert_eq!(round_trip(&a16), a16);

        let m16 = Value::Object(
            (0..16)
                .map(|i| (format!("k{i}"), Value::UInt(i as u64, Tag::None)))
                .collect(),
        );
        assert_eq!(encode(&m16).unwrap()[0], 0xde);
        assert_eq!(round_trip(&m16), m16);
    }

    #[test]
    fn test_doubles_round_trip() {
        for v in [0.0, -0.0, 1.5, -1.5e300, f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(round_trip(&Value::Double(v, Tag::None)), Value::Double(v, Tag::None));
        }
        // float32 payloads widen on decode
        assert_eq!(
            decode(&[0xca, 0x3f, 0xc0, 0x00, 0x00]).unwrap(),
            Value::Double(1.5, Tag::None)
        );
    }

    #[test]
    fn test_bytes_round_trip() {
        let v = Value::Bytes(vec![0, 1, 2, 0xff], Tag::None);
        let bytes = encode(&v).unwrap();
        assert_eq!(bytes[..2], [0xc4, 4]);
        assert_eq!(decode(&bytes).unwrap(), v);
    }

    #[test]
    fn test_extension_round_trip_keeps_type_code() {
        // fixext2, type 5, payload [1, 2]
        let wire = [0xd5, 0x05, 0x01, 0x02];
        let v = decode(&wire).unwrap();
        assert_eq!(v, Value::Bytes(vec![5, 1, 2], Tag::Ext));
        assert_eq!(encode(&v).unwrap(), wire);
    }

    #[test]
    fn test_timestamp_32() {
        let wire = [0xd6, 0xff, 0x00, 0x00, 0x00, 0x64];
        let v = decode(&wire).unwrap();
        assert_eq!(v, Value::UInt(100, Tag::EpochSecond));
        assert_eq!(encode(&v).unwrap(), wire);
    }

    #[test]
    fn test_timestamp_64_packed() {
        let sec: u64 = 1;
        let nanos: u64 = 500_000_000;
        let data = (nanos << 34) | sec;
        let mut wire = vec![0xd7, 0xff];
        wire.extend_from_slice(&data.to_be_bytes());
        let v = decode(&wire).unwrap();
        assert_eq!(v, Value::Int(1_500_000_000, Tag::EpochNano));
        assert_eq!(encode(&v).unwrap(), wire);
    }

    #[test]
    fn test_timestamp_96_negative_seconds() {
        let mut wire = vec![0xc7, 12, 0xff];
        wire.extend_from_slice(&1u32.to_be_bytes());
        wire.extend_from_slice(&(-2i64).to_be_bytes());
        let v = decode(&wire).unwrap();
        assert_eq!(v, Value::Int(-1_999_999_999, Tag::EpochNano));
        assert_eq!(encode(&v).unwrap(), wire);
    }

    #[test]
    fn test_reserved_marker_rejected() {
        let err = decode(&[0xc1]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UnknownMarker { marker: 0xc1 }));
        assert_eq!(err.position(), 0);
    }

    #[test]
    fn test_non_scalar_map_key_rejected() {
        // {nil: 1}
        let err = decode(&[0x81, 0xc0, 0x01]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidKey { marker: 0xc0 }));
    }

    #[test]
    fn test_integer_map_keys_become_text() {
        // {7: true, -2: false}
        let v = decode(&[0x82, 0x07, 0xc3, 0xfe, 0xc2]).unwrap();
        assert_eq!(
            v,
            Value::Object(vec![
                ("7".to_owned(), Value::Bool(true)),
                ("-2".to_owned(), Value::Bool(false)),
            ])
        );
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let err = decode(&[0xa2, 0xff, 0xfe]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidUtf8 { .. }));
    }

    #[test]
    fn test_empty_input_is_eof() {
        let err = decode(&[]).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::UnexpectedEof { context: "value marker" }
        ));
    }

    #[test]
    fn test_huge_declared_count_rejected_before_reading() {
        let err = decode(&[0xdd, 0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::MaxItemsExceeded { .. }));
        assert_eq!(err.category(), crate::error::ErrorCategory::Limit);
    }

    #[test]
    fn test_depth_boundary() {
        let options = DecodeOptions::new().with_max_nesting_depth(4);
        let mut ok = vec![0x91u8; 3];
        ok.push(0x90);
        assert!(decode_with_options(&ok, options).is_ok());

        let mut too_deep = vec![0x91u8; 4];
        too_deep.push(0x90);
        let err = decode_with_options(&too_deep, options).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::MaxDepthExceeded { max: 4 }));
    }

    #[test]
    fn test_depth_10000_rejected_without_overflow() {
        let mut bytes = vec![0x91u8; 10_000];
        bytes.push(0x90);
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::MaxDepthExceeded { .. }));
    }

    #[test]
    fn test_back_to_back_documents_with_reset() {
        let first = Value::from("first");
        let second = Value::Array(vec![Value::UInt(1, Tag::None), Value::Bool(true)]);
        let mut bytes = encode(&first).unwrap();
        bytes.extend(encode(&second).unwrap());

        let mut parser = MsgpackParser::new(SliceSource::new(&bytes));
        let mut decoder = TreeDecoder::new();
        parser.parse_all(&mut decoder).unwrap();
        assert_eq!(decoder.take_value(), Some(first));

        parser.reset();
        assert!(!parser.done());
        parser.parse_all(&mut decoder).unwrap();
        assert_eq!(decoder.take_value(), Some(second));
    }

    #[test]
    fn test_reset_with_fresh_source() {
        let doc_a = encode(&Value::from("a")).unwrap();
        let doc_b = encode(&Value::from("b")).unwrap();

        let mut parser = MsgpackParser::new(SliceSource::new(&doc_a));
        let mut decoder = TreeDecoder::new();
        parser.parse_all(&mut decoder).unwrap();
        assert_eq!(decoder.take_value(), Some(Value::from("a")));

        parser.reset_with(SliceSource::new(&doc_b));
        parser.parse_all(&mut decoder).unwrap();
        assert_eq!(decoder.take_value(), Some(Value::from("b")));
    }

    #[test]
    fn test_bignum_renders_as_decimal_text() {
        let v = Value::Bignum { negative: false, magnitude: vec![1, 0, 0, 0, 0, 0, 0, 0, 0] };
        let bytes = encode(&v).unwrap();
        assert_eq!(
            decode(&bytes).unwrap(),
            Value::from("18446744073709551616")
        );

        // Magnitudes that fit 64 bits collapse to plain integers.
        let small = Value::Bignum { negative: true, magnitude: vec![0x2a] };
        assert_eq!(round_trip(&small), Value::Int(-42, Tag::None));
    }

    proptest! {
        #[test]
        fn test_random_trees_round_trip(
            value in arb_value(FormatCaps { full_u64: true, bytes: true })
        ) {
            let bytes = encode(&value).unwrap();
            prop_assert_eq!(decode(&bytes).unwrap(), value);
        }
    }
}
