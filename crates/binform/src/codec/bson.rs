//! BSON format parser and encoder.
//!
//! A document is an int32 little-endian byte length (counting itself and
//! the trailing `0x00` terminator), a run of elements, then the
//! terminator. Each element is a type byte, a NUL-terminated field name
//! and a payload. Arrays are documents whose names are decimal indexes;
//! they are discarded on decode. The root is always a document.

use crate::codec::{magnitude_to_decimal, Parser, NO_MARK};
use crate::decoder::TreeDecoder;
use crate::error::{DecodeError, ErrorKind};
use crate::event::{Context, Tag, Visitor};
use crate::limits::DecodeOptions;
use crate::source::{SliceSource, Source};
use crate::value::Value;

// ============================================================================
// DECODING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Start,
    Root,
    BeforeDone,
    Element,
    ElemValue,
}

#[derive(Debug)]
struct Frame {
    mode: Mode,
    is_array: bool,
    pending: u8,
    start: u64,
    declared: u64,
    end: u64,
}

/// Streaming BSON parser over any [`Source`].
#[derive(Debug)]
pub struct BsonParser<S> {
    source: S,
    options: DecodeOptions,
    stack: Vec<Frame>,
    scratch: Vec<u8>,
    more: bool,
    done: bool,
    cursor_mode: bool,
    mark_level: usize,
}

impl<S: Source> BsonParser<S> {
    pub fn new(source: S) -> Self {
        Self::with_options(source, DecodeOptions::default())
    }

    pub fn with_options(source: S, options: DecodeOptions) -> Self {
        Self {
            source,
            options,
            stack: vec![Frame {
                mode: Mode::Start,
                is_array: false,
                pending: 0,
                start: 0,
                declared: 0,
                end: u64::MAX,
            }],
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
                let ctx = Context::at(self.source.position());
                self.push_document(false, visitor, ctx)?;
            }
            Mode::BeforeDone => {
                let ctx = Context::at(self.source.position());
                visitor.end_document(&ctx)?;
                self.done = true;
                self.more = false;
            }
            Mode::Element => self.parse_element(visitor)?,
            Mode::ElemValue => {
                let t = top.pending;
                if let Some(f) = self.stack.last_mut() {
                    f.mode = Mode::Element;
                }
                self.parse_value(t, visitor)?;
            }
        }
        Ok(())
    }

    fn parse_element(&mut self, visitor: &mut dyn Visitor) -> Result<(), DecodeError> {
        let ctx = Context::at(self.source.position());
        let t = self.source.read_u8("type marker")?;
        if t == 0x00 {
            let Some(top) = self.stack.last() else {
                return Ok(());
            };
            let actual = self.source.position() - top.start;
            if actual != top.declared {
                return Err(DecodeError::new(
                    ErrorKind::SizeMismatch { declared: top.declared, actual },
                    ctx.position,
                ));
            }
            let is_array = top.is_array;
            self.stack.pop();
            let cont = if is_array {
                visitor.end_array(&ctx)?
            } else {
                visitor.end_object(&ctx)?
            };
            self.emit_end(cont);
            return Ok(());
        }
        self.read_cstring("field name")?;
        let is_array = self.stack.last().is_some_and(|f| f.is_array);
        if is_array {
            // Index names carry no information.
            self.parse_value(t, visitor)
        } else {
            let name = std::str::from_utf8(&self.scratch).map_err(|_| {
                DecodeError::new(ErrorKind::InvalidUtf8 { context: "field name" }, ctx.position)
            })?;
            let cont = visitor.key(name, &ctx)?;
            if let Some(f) = self.stack.last_mut() {
                f.pending = t;
                f.mode = Mode::ElemValue;
            }
            self.emit(cont);
            Ok(())
        }
    }

    fn parse_value(&mut self, t: u8, visitor: &mut dyn Visitor) -> Result<(), DecodeError> {
        let ctx = Context::at(self.source.position());
        let cont = match t {
            0x01 => {
                let v = self.source.read_f64_le("double payload")?;
                visitor.double_value(v, Tag::None, &ctx)?
            }
            0x02 => {
                self.read_string_payload("string payload")?;
                let text = std::str::from_utf8(&self.scratch).map_err(|_| {
                    DecodeError::new(
                        ErrorKind::InvalidUtf8 { context: "string payload" },
                        ctx.position,
                    )
                })?;
                visitor.string_value(text, Tag::None, &ctx)?
            }
            0x03 => return self.push_document(false, visitor, ctx),
            0x04 => return self.push_document(true, visitor, ctx),
            0x05 => {
                let len = self.source.read_u32_le("binary length")? as i32;
                if len < 0 {
                    return Err(self.err(ErrorKind::InvalidLength { context: "binary length" }));
                }
                let subtype = self.source.read_u8("binary subtype")?;
                self.source
                    .read_bytes_into(len as u64, &mut self.scratch, "binary payload")?;
                if subtype == 0 {
                    visitor.byte_string_value(&self.scratch, Tag::None, &ctx)?
                } else {
                    // Non-default subtypes ride along as the first byte.
                    self.scratch.insert(0, subtype);
                    visitor.byte_string_value(&self.scratch, Tag::Ext, &ctx)?
                }
            }
            0x06 => visitor.null_value(Tag::Undefined, &ctx)?,
            0x07 => {
                self.source.read_bytes_into(12, &mut self.scratch, "object id")?;
                let mut hex = String::with_capacity(24);
                for b in &self.scratch {
                    hex.push_str(&format!("{b:02x}"));
                }
                visitor.string_value(&hex, Tag::Id, &ctx)?
            }
            0x08 => {
                let b = self.source.read_u8("boolean payload")?;
                match b {
                    0 => visitor.bool_value(false, &ctx)?,
                    1 => visitor.bool_value(true, &ctx)?,
                    _ => {
                        return Err(DecodeError::new(
                            ErrorKind::UnknownMarker { marker: b },
                            ctx.position,
                        ));
                    }
                }
            }
            0x09 => {
                let ms = self.source.read_u64_le("datetime payload")? as i64;
                visitor.int64_value(ms, Tag::EpochMilli, &ctx)?
            }
            0x0a => visitor.null_value(Tag::None, &ctx)?,
            0x0b => {
                self.read_cstring("regular expression")?;
                let pattern = std::str::from_utf8(&self.scratch)
                    .map_err(|_| {
                        DecodeError::new(
                            ErrorKind::InvalidUtf8 { context: "regular expression" },
                            ctx.position,
                        )
                    })?
                    .to_owned();
                self.read_cstring("regular expression")?;
                let options = std::str::from_utf8(&self.scratch).map_err(|_| {
                    DecodeError::new(
                        ErrorKind::InvalidUtf8 { context: "regular expression" },
                        ctx.position,
                    )
                })?;
                let mut text = String::with_capacity(pattern.len() + options.len() + 2);
                text.push('/');
                text.push_str(&pattern);
                text.push('/');
                text.push_str(options);
                visitor.string_value(&text, Tag::Regex, &ctx)?
            }
            0x0d => {
                self.read_string_payload("code payload")?;
                let text = std::str::from_utf8(&self.scratch).map_err(|_| {
                    DecodeError::new(
                        ErrorKind::InvalidUtf8 { context: "code payload" },
                        ctx.position,
                    )
                })?;
                visitor.string_value(text, Tag::Code, &ctx)?
            }
            0x0e => {
                self.read_string_payload("symbol payload")?;
                let text = std::str::from_utf8(&self.scratch).map_err(|_| {
                    DecodeError::new(
                        ErrorKind::InvalidUtf8 { context: "symbol payload" },
                        ctx.position,
                    )
                })?;
                visitor.string_value(text, Tag::None, &ctx)?
            }
            0x10 => {
                let v = self.source.read_u32_le("integer payload")? as i32;
                visitor.int64_value(i64::from(v), Tag::None, &ctx)?
            }
            0x11 => {
                let v = self.source.read_u64_le("timestamp payload")?;
                visitor.uint64_value(v, Tag::None, &ctx)?
            }
            0x12 => {
                let v = self.source.read_u64_le("integer payload")? as i64;
                visitor.int64_value(v, Tag::None, &ctx)?
            }
            // decimal128, dbpointer, code-with-scope, min/max keys have no
            // representation here.
            _ => {
                return Err(DecodeError::new(
                    ErrorKind::UnknownMarker { marker: t },
                    ctx.position,
                ));
            }
        };
        self.emit(cont);
        Ok(())
    }

    fn push_document(
        &mut self,
        is_array: bool,
        visitor: &mut dyn Visitor,
        ctx: Context,
    ) -> Result<(), DecodeError> {
        let start = self.source.position();
        let declared = i64::from(self.source.read_u32_le("document length")? as i32);
        if declared < 5 {
            return Err(self.err(ErrorKind::InvalidLength { context: "document length" }));
        }
        let declared = declared as u64;
        let end = start + declared;
        if let Some(parent) = self.stack.last() {
            if end > parent.end {
                return Err(self.err(ErrorKind::SizeMismatch {
                    declared,
                    actual: parent.end.saturating_sub(start),
                }));
            }
        }
        self.check_depth()?;
        self.stack.push(Frame {
            mode: Mode::Element,
            is_array,
            pending: 0,
            start,
            declared,
            end,
        });
        let cont = if is_array {
            visitor.begin_array(None, &ctx)?
        } else {
            visitor.begin_object(None, &ctx)?
        };
        self.emit(cont);
        Ok(())
    }

    fn read_cstring(&mut self, context: &'static str) -> Result<(), DecodeError> {
        self.scratch.clear();
        loop {
            let b = self.source.read_u8(context)?;
            if b == 0 {
                return Ok(());
            }
            self.scratch.push(b);
        }
    }

    /// Reads an int32-prefixed string payload into `scratch`, dropping the
    /// required trailing NUL. The declared length counts that NUL.
    fn read_string_payload(&mut self, context: &'static str) -> Result<(), DecodeError> {
        let len = i64::from(self.source.read_u32_le(context)? as i32);
        if len < 1 {
            return Err(self.err(ErrorKind::InvalidLength { context }));
        }
        self.source.read_bytes_into(len as u64, &mut self.scratch, context)?;
        if self.scratch.pop() != Some(0) {
            return Err(self.err(ErrorKind::InvalidLength { context }));
        }
        Ok(())
    }
}

impl<S: Source> Parser for BsonParser<S> {
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
        self.stack.push(Frame {
            mode: Mode::Start,
            is_array: false,
            pending: 0,
            start: 0,
            declared: 0,
            end: u64::MAX,
        });
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
    offset: usize,
    is_array: bool,
    index: u64,
    pending_name: Option<String>,
}

/// BSON encoder; implements [`Visitor`] for direct transcoding.
///
/// The root must be an object or an array (arrays become index-keyed
/// documents). Field names are buffered until the value arrives, since
/// the element type byte precedes the name on the wire. Document lengths
/// are back-patched on close.
#[derive(Debug, Default)]
pub struct BsonEncoder {
    buf: Vec<u8>,
    frames: Vec<EncFrame>,
}

impl BsonEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn err(&self, kind: ErrorKind) -> DecodeError {
        DecodeError::new(kind, self.buf.len() as u64)
    }

    /// Writes the element type byte and field name for the next value.
    fn element_header(&mut self, type_byte: u8) -> Result<(), DecodeError> {
        let Some(frame) = self.frames.last_mut() else {
            return Err(DecodeError::new(
                ErrorKind::InvalidLength { context: "bson document" },
                0,
            ));
        };
        let name = if frame.is_array {
            let name = frame.index.to_string();
            frame.index += 1;
            name
        } else {
            frame.pending_name.take().unwrap_or_default()
        };
        self.buf.push(type_byte);
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    fn open_document(&mut self, is_array: bool) -> Result<(), DecodeError> {
        if !self.frames.is_empty() {
            self.element_header(if is_array { 0x04 } else { 0x03 })?;
        }
        let offset = self.buf.len();
        self.buf.extend_from_slice(&[0u8; 4]);
        self.frames.push(EncFrame { offset, is_array, index: 0, pending_name: None });
        Ok(())
    }

    fn close_document(&mut self) -> Result<(), DecodeError> {
        self.buf.push(0);
        if let Some(frame) = self.frames.pop() {
            let len = self.buf.len() - frame.offset;
            if len > i32::MAX as usize {
                return Err(self.err(ErrorKind::InvalidLength { context: "document length" }));
            }
            self.buf[frame.offset..frame.offset + 4]
                .copy_from_slice(&(len as u32).to_le_bytes());
        }
        Ok(())
    }

    fn write_string_payload(&mut self, s: &str) -> Result<(), DecodeError> {
        if s.len() >= i32::MAX as usize {
            return Err(self.err(ErrorKind::InvalidLength { context: "string payload" }));
        }
        self.buf.extend_from_slice(&((s.len() + 1) as u32).to_le_bytes());
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    fn write_i64_element(&mut self, value: i64) -> Result<(), DecodeError> {
        if i32::try_from(value).is_ok() {
            self.element_header(0x10)?;
            self.buf.extend_from_slice(&(value as i32).to_le_bytes());
        } else {
            self.element_header(0x12)?;
            self.buf.extend_from_slice(&value.to_le_bytes());
        }
        Ok(())
    }

    fn write_datetime(&mut self, ms: i64) -> Result<(), DecodeError> {
        self.element_header(0x09)?;
        self.buf.extend_from_slice(&ms.to_le_bytes());
        Ok(())
    }
}

impl Visitor for BsonEncoder {
    fn begin_document(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn end_document(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
        Ok(true)
    }

    fn begin_object(&mut self, _hint: Option<usize>, _ctx: &Context) -> Result<bool, DecodeError> {
        self.open_document(false)?;
        Ok(true)
    }

    fn end_object(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
        self.close_document()?;
        Ok(true)
    }

    fn begin_array(&mut self, _hint: Option<usize>, _ctx: &Context) -> Result<bool, DecodeError> {
        self.open_document(true)?;
        Ok(true)
    }

    fn end_array(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
        self.close_document()?;
        Ok(true)
    }

    fn key(&mut self, name: &str, _ctx: &Context) -> Result<bool, DecodeError> {
        let Some(frame) = self.frames.last_mut() else {
            return Err(DecodeError::new(
                ErrorKind::InvalidLength { context: "bson document" },
                0,
            ));
        };
        frame.pending_name = Some(name.to_owned());
        Ok(true)
    }

    fn string_value(&mut self, value: &str, tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        match tag {
            Tag::Id => {
                if let Some(oid) = parse_object_id(value) {
                    self.element_header(0x07)?;
                    self.buf.extend_from_slice(&oid);
                    return Ok(true);
                }
            }
            Tag::Regex => {
                if let Some((pattern, options)) = split_regex(value) {
                    self.element_header(0x0b)?;
                    self.buf.extend_from_slice(pattern.as_bytes());
                    self.buf.push(0);
                    self.buf.extend_from_slice(options.as_bytes());
                    self.buf.push(0);
                    return Ok(true);
                }
            }
            Tag::Code => {
                self.element_header(0x0d)?;
                self.write_string_payload(value)?;
                return Ok(true);
            }
            _ => {}
        }
        self.element_header(0x02)?;
        self.write_string_payload(value)?;
        Ok(true)
    }

    fn byte_string_value(
        &mut self,
        value: &[u8],
        tag: Tag,
        _ctx: &Context,
    ) -> Result<bool, DecodeError> {
        self.element_header(0x05)?;
        if tag == Tag::Ext && !value.is_empty() {
            self.buf
                .extend_from_slice(&((value.len() - 1) as u32).to_le_bytes());
            self.buf.push(value[0]);
            self.buf.extend_from_slice(&value[1..]);
        } else {
            self.buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
            self.buf.push(0x00);
            self.buf.extend_from_slice(value);
        }
        Ok(true)
    }

    fn bignum_value(
        &mut self,
        negative: bool,
        magnitude: &[u8],
        _ctx: &Context,
    ) -> Result<bool, DecodeError> {
        let digits = magnitude_to_decimal(negative, magnitude);
        self.element_header(0x02)?;
        self.write_string_payload(&digits)?;
        Ok(true)
    }

    fn int64_value(&mut self, value: i64, tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        match tag {
            Tag::EpochMilli => self.write_datetime(value)?,
            Tag::EpochSecond => match value.checked_mul(1000) {
                Some(ms) => self.write_datetime(ms)?,
                None => self.write_i64_element(value)?,
            },
            Tag::EpochNano => self.write_datetime(value.div_euclid(1_000_000))?,
            _ => self.write_i64_element(value)?,
        }
        Ok(true)
    }

    fn uint64_value(&mut self, value: u64, tag: Tag, ctx: &Context) -> Result<bool, DecodeError> {
        if let Ok(signed) = i64::try_from(value) {
            match tag {
                Tag::EpochMilli | Tag::EpochSecond | Tag::EpochNano => {
                    return self.int64_value(signed, tag, ctx);
                }
                _ => {}
            }
            self.write_i64_element(signed)?;
        } else {
            self.element_header(0x11)?;
            self.buf.extend_from_slice(&value.to_le_bytes());
        }
        Ok(true)
    }

    fn double_value(&mut self, value: f64, tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        match tag {
            Tag::EpochSecond => self.write_datetime((value * 1000.0).round() as i64)?,
            Tag::EpochMilli => self.write_datetime(value.round() as i64)?,
            _ => {
                self.element_header(0x01)?;
                self.buf.extend_from_slice(&value.to_bits().to_le_bytes());
            }
        }
        Ok(true)
    }

    fn bool_value(&mut self, value: bool, _ctx: &Context) -> Result<bool, DecodeError> {
        self.element_header(0x08)?;
        self.buf.push(u8::from(value));
        Ok(true)
    }

    fn null_value(&mut self, tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        self.element_header(if tag == Tag::Undefined { 0x06 } else { 0x0a })?;
        Ok(true)
    }
}

fn parse_object_id(s: &str) -> Option<[u8; 12]> {
    if s.len() != 24 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let mut out = [0u8; 12];
    for (i, chunk) in s.as_bytes().chunks_exact(2).enumerate() {
        let hex = std::str::from_utf8(chunk).ok()?;
        out[i] = u8::from_str_radix(hex, 16).ok()?;
    }
    Some(out)
}

fn split_regex(s: &str) -> Option<(&str, &str)> {
    let rest = s.strip_prefix('/')?;
    let i = rest.rfind('/')?;
    Some((&rest[..i], &rest[i + 1..]))
}

// ============================================================================
// CONVENIENCE API
// ============================================================================

/// Decodes a complete BSON document from a byte slice.
pub fn decode(bytes: &[u8]) -> Result<Value, DecodeError> {
    decode_with_options(bytes, DecodeOptions::default())
}

pub fn decode_with_options(bytes: &[u8], options: DecodeOptions) -> Result<Value, DecodeError> {
    decode_from(SliceSource::new(bytes), options)
}

/// Decodes a complete document from any [`Source`].
pub fn decode_from<S: Source>(source: S, options: DecodeOptions) -> Result<Value, DecodeError> {
    let mut parser = BsonParser::with_options(source, options);
    let mut decoder = TreeDecoder::new();
    parser.parse_all(&mut decoder)?;
    let position = parser.position();
    decoder.take_value().ok_or_else(|| {
        DecodeError::new(ErrorKind::UnexpectedEof { context: "document" }, position)
    })
}

/// Encodes a [`Value`] tree as BSON. The root must be an object or array.
pub fn encode(value: &Value) -> Result<Vec<u8>, DecodeError> {
    let mut encoder = BsonEncoder::new();
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

    #[test]
    fn test_minimal_document() {
        let wire = [0x0c, 0, 0, 0, 0x10, b'x', 0, 0x01, 0, 0, 0, 0x00];
        let v = decode(&wire).unwrap();
        assert_eq!(v, Value::Object(vec![("x".to_owned(), Value::Int(1, Tag::None))]));
        assert_eq!(encode(&v).unwrap(), wire);
    }

    #[test]
    fn test_nested_array_discards_index_keys() {
        let wire = [
            0x11, 0, 0, 0, // root length 17
            0x04, b'a', 0, // array element "a"
            0x09, 0, 0, 0, // child length 9
            0x08, b'0', 0, 0x01, // true at index 0
            0x00, // child terminator
            0x00, // root terminator
        ];
        let v = decode(&wire).unwrap();
        assert_eq!(
            v,
            Value::Object(vec![("a".to_owned(), Value::Array(vec![Value::Bool(true)]))])
        );
        assert_eq!(encode(&v).unwrap(), wire);
    }

    #[test]
    fn test_scalar_element_types() {
        let doc = Value::Object(vec![
            ("d".to_owned(), Value::Double(-2.5, Tag::None)),
            ("s".to_owned(), Value::from("text")),
            ("n".to_owned(), Value::Null(Tag::None)),
            ("u".to_owned(), Value::Null(Tag::Undefined)),
            ("b".to_owned(), Value::Bool(false)),
            ("i".to_owned(), Value::Int(-7, Tag::None)),
            ("big".to_owned(), Value::Int(i64::MIN, Tag::None)),
        ]);
        let bytes = encode(&doc).unwrap();
        assert_eq!(decode(&bytes).unwrap(), doc);
    }

    #[test]
    fn test_int_width_selection() {
        let doc = Value::Object(vec![("v".to_owned(), Value::Int(40, Tag::None))]);
        let bytes = encode(&doc).unwrap();
        // int32 element type for values in range
        assert_eq!(bytes[4], 0x10);

        let doc = Value::Object(vec![("v".to_owned(), Value::Int(1 << 40, Tag::None))]);
        let bytes = encode(&doc).unwrap();
        assert_eq!(bytes[4], 0x12);
    }

    #[test]
    fn test_uint_above_i64_uses_timestamp_type() {
        let doc = Value::Object(vec![("v".to_owned(), Value::UInt(u64::MAX, Tag::None))]);
        let bytes = encode(&doc).unwrap();
        assert_eq!(bytes[4], 0x11);
        assert_eq!(decode(&bytes).unwrap(), doc);
    }

    #[test]
    fn test_binary_subtypes() {
        let doc = Value::Object(vec![("b".to_owned(), Value::Bytes(vec![1, 2, 3], Tag::None))]);
        let bytes = encode(&doc).unwrap();
        assert_eq!(decode(&bytes).unwrap(), doc);

        // subtype 5 folds into the payload front
        let wire = [
            0x11, 0, 0, 0, 0x05, b'b', 0, 0x03, 0, 0, 0, 0x05, 0xaa, 0xbb, 0xcc, 0x00,
        ];
        // root length: 4 + (1+2) + (4+1+3) + 1 = 16
        let wire = {
            let mut w = wire.to_vec();
            w[0] = 16;
            w.truncate(16);
            w
        };
        let v = decode(&wire).unwrap();
        assert_eq!(
            v,
            Value::Object(vec![(
                "b".to_owned(),
                Value::Bytes(vec![0x05, 0xaa, 0xbb, 0xcc], Tag::Ext),
            )])
        );
        assert_eq!(encode(&v).unwrap(), wire);
    }

    #[test]
    fn test_object_id_round_trip() {
        let hex = "507f1f77bcf86cd799439011";
        let doc = Value::Object(vec![("_id".to_owned(), Value::Str(hex.to_owned(), Tag::Id))]);
        let bytes = encode(&doc).unwrap();
        assert_eq!(bytes[4], 0x07);
        assert_eq!(decode(&bytes).unwrap(), doc);
    }

    #[test]
    fn test_datetime_round_trip() {
        let doc = Value::Object(vec![(
            "at".to_owned(),
            Value::Int(1_565_000_000_000, Tag::EpochMilli),
        )]);
        let bytes = encode(&doc).unwrap();
        assert_eq!(bytes[4], 0x09);
        assert_eq!(decode(&bytes).unwrap(), doc);
    }

    #[test]
    fn test_epoch_second_converts_to_milliseconds() {
        let doc = Value::Object(vec![(
            "t".to_owned(),
            Value::Int(1_565_000_000, Tag::EpochSecond),
        )]);
        let bytes = encode(&doc).unwrap();
        let back = decode(&bytes).unwrap();
        assert_eq!(
            back,
            Value::Object(vec![(
                "t".to_owned(),
                Value::Int(1_565_000_000_000, Tag::EpochMilli),
            )])
        );
    }

    #[test]
    fn test_regex_round_trip() {
        let doc = Value::Object(vec![(
            "r".to_owned(),
            Value::Str("/ab+c/i".to_owned(), Tag::Regex),
        )]);
        let bytes = encode(&doc).unwrap();
        assert_eq!(bytes[4], 0x0b);
        assert_eq!(decode(&bytes).unwrap(), doc);
    }

    #[test]
    fn test_code_and_symbol() {
        let doc = Value::Object(vec![(
            "f".to_owned(),
            Value::Str("function() {}".to_owned(), Tag::Code),
        )]);
        let bytes = encode(&doc).unwrap();
        assert_eq!(bytes[4], 0x0d);
        assert_eq!(decode(&bytes).unwrap(), doc);

        // symbol decodes as plain text
        let mut wire = vec![0x14, 0, 0, 0, 0x0e, b's', 0, 0x08, 0, 0, 0];
        wire.extend_from_slice(b"mercury\0");
        wire.push(0x00);
        let v = decode(&wire).unwrap();
        assert_eq!(v, Value::Object(vec![("s".to_owned(), Value::from("mercury"))]));
    }

    #[test]
    fn test_unsupported_element_types() {
        for t in [0x0c, 0x0f, 0x13, 0x7f, 0xff] {
            let wire = [0x08, 0, 0, 0, t, b'x', 0, 0x00];
            let err = decode(&wire).unwrap_err();
            assert!(
                matches!(err.kind(), ErrorKind::UnknownMarker { marker } if *marker == t),
                "type {t:#x}"
            );
        }
    }

    #[test]
    fn test_invalid_boolean_byte() {
        let wire = [0x09, 0, 0, 0, 0x08, b'x', 0, 0x02, 0x00];
        let err = decode(&wire).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UnknownMarker { marker: 2 }));
    }

    #[test]
    fn test_string_requires_positive_length_and_nul() {
        // length 0
        let wire = [0x0b, 0, 0, 0, 0x02, b's', 0, 0, 0, 0, 0];
        let err = decode(&wire).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::InvalidLength { context: "string payload" }
        ));
        // declared 2 but last byte not NUL
        let wire = [0x0d, 0, 0, 0, 0x02, b's', 0, 2, 0, 0, 0, b'a', b'b', 0x00];
        let err = decode(&wire).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::InvalidLength { context: "string payload" }
        ));
    }

    #[test]
    fn test_document_length_mismatch() {
        // {"x": 1} with the root length inflated by one
        let wire = [0x0d, 0, 0, 0, 0x10, b'x', 0, 0x01, 0, 0, 0, 0x00];
        let err = decode(&wire).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::SizeMismatch { declared: 13, actual: 12 }
        ));
    }

    #[test]
    fn test_child_exceeding_parent_budget() {
        // child declares 200 bytes inside a 17-byte parent
        let wire = [
            0x11, 0, 0, 0, 0x03, b'a', 0, 200, 0, 0, 0, 0x0a, b'b', 0, 0x00, 0x00,
        ];
        let err = decode(&wire).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::SizeMismatch { declared: 200, .. }));
    }

    #[test]
    fn test_document_length_below_minimum() {
        let wire = [0x04, 0, 0, 0];
        let err = decode(&wire).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::InvalidLength { context: "document length" }
        ));
    }

    #[test]
    fn test_root_array_becomes_indexed_document() {
        let bytes = encode(&Value::Array(vec![Value::Bool(true), Value::Int(2, Tag::None)]))
            .unwrap();
        let v = decode(&bytes).unwrap();
        assert_eq!(
            v,
            Value::Object(vec![
                ("0".to_owned(), Value::Bool(true)),
                ("1".to_owned(), Value::Int(2, Tag::None)),
            ])
        );
    }

    #[test]
    fn test_scalar_root_rejected() {
        let err = encode(&Value::Int(5, Tag::None)).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::InvalidLength { context: "bson document" }
        ));
    }

    #[test]
    fn test_depth_boundary() {
        fn wrap(inner: Value) -> Value {
            Value::Object(vec![("c".to_owned(), inner)])
        }
        let options = DecodeOptions::new().with_max_nesting_depth(4);

        let mut ok = Value::Object(Vec::new());
        for _ in 0..3 {
            ok = wrap(ok);
        }
        let bytes = encode(&ok).unwrap();
        assert!(decode_with_options(&bytes, options).is_ok());

        let bytes = encode(&wrap(ok)).unwrap();
        let err = decode_with_options(&bytes, options).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::MaxDepthExceeded { max: 4 }));
    }

    #[test]
    fn test_depth_10000_rejected_without_overflow() {
        let depth = 10_000u32;
        let mut bytes = Vec::with_capacity(7 * depth as usize + 5 + depth as usize);
        for k in (1..=depth).rev() {
            bytes.extend_from_slice(&(5 + 7 * k).to_le_bytes());
            bytes.push(0x03);
            bytes.push(0x00);
        }
        bytes.extend_from_slice(&[5, 0, 0, 0, 0]);
        bytes.extend(std::iter::repeat(0x00).take(depth as usize));
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::MaxDepthExceeded { .. }));
    }

    #[test]
    fn test_truncated_document() {
        let doc = Value::Object(vec![("k".to_owned(), Value::from("value"))]);
        let bytes = encode(&doc).unwrap();
        let err = decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UnexpectedEof { .. }));
    }

    #[test]
    fn test_back_to_back_documents_with_reset() {
        let first = Value::Object(vec![("a".to_owned(), Value::Int(1, Tag::None))]);
        let second = Value::Object(vec![("b".to_owned(), Value::Int(2, Tag::None))]);
        let mut bytes = encode(&first).unwrap();
        bytes.extend(encode(&second).unwrap());

        let mut parser = BsonParser::new(SliceSource::new(&bytes));
        let mut decoder = TreeDecoder::new();
        parser.parse_all(&mut decoder).unwrap();
        assert_eq!(decoder.take_value(), Some(first));

        parser.reset();
        parser.parse_all(&mut decoder).unwrap();
        assert_eq!(decoder.take_value(), Some(second));
    }

    proptest! {
        #[test]
        fn test_random_documents_round_trip(
            value in arb_value(FormatCaps { full_u64: true, bytes: true })
        ) {
            let doc = Value::Object(vec![("v".to_owned(), value)]);
            let bytes = encode(&doc).unwrap();
            prop_assert_eq!(decode(&bytes).unwrap(), doc);
        }
    }
}
