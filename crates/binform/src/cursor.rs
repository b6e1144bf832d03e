//! Pull-oriented access over any format parser.
//!
//! [`Cursor`] inverts the push [`Visitor`] flow: it pumps the parser one
//! event at a time and hands out [`Event`]s through `current`/`next`.
//! Payloads stay undecoded until `read_value` asks for them, and whole
//! subtrees can be skipped without building anything.

use std::collections::VecDeque;

use crate::codec::{half_to_f64, Parser, NO_MARK};
use crate::decoder::TreeDecoder;
use crate::error::{DecodeError, ErrorKind};
use crate::event::{Context, NullVisitor, Tag, TypedArrayView, Visitor};
use crate::value::Value;

/// One parse event, with its semantic tag and source offset.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub tag: Tag,
    pub position: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    BeginDocument,
    EndDocument,
    BeginObject(Option<usize>),
    EndObject,
    BeginArray(Option<usize>),
    EndArray,
    Key(String),
    Str(String),
    Bytes(Vec<u8>),
    Bignum { negative: bool, magnitude: Vec<u8> },
    Int(i64),
    UInt(u64),
    Double(f64),
    Bool(bool),
    Null,
}

impl Event {
    fn new(kind: EventKind, tag: Tag, position: u64) -> Self {
        Self { kind, tag, position }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.kind {
            EventKind::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Coerces integer-like events into `i64` when the value fits.
    pub fn as_i64(&self) -> Option<i64> {
        match &self.kind {
            EventKind::Int(v) => Some(*v),
            EventKind::UInt(v) => i64::try_from(*v).ok(),
            EventKind::Bignum { negative, magnitude } => bignum_to_i64(*negative, magnitude),
            EventKind::Str(s) if self.tag == Tag::Bignum => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match &self.kind {
            EventKind::UInt(v) => Some(*v),
            EventKind::Int(v) => u64::try_from(*v).ok(),
            EventKind::Bignum { negative: false, magnitude } => bignum_to_u64(magnitude),
            EventKind::Str(s) if self.tag == Tag::Bignum => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.kind {
            EventKind::Double(v) => Some(v),
            EventKind::Int(v) => Some(v as f64),
            EventKind::UInt(v) => Some(v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Str(s) | EventKind::Key(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.kind {
            EventKind::Bytes(b) => Some(b),
            _ => None,
        }
    }

    fn end_of(is_object: bool, position: u64) -> Self {
        let kind = if is_object { EventKind::EndObject } else { EventKind::EndArray };
        Self { kind, tag: Tag::None, position }
    }
}

fn bignum_to_u64(magnitude: &[u8]) -> Option<u64> {
    let skip = magnitude.iter().take_while(|&&b| b == 0).count();
    let trimmed = &magnitude[skip..];
    if trimmed.len() > 8 {
        return None;
    }
    Some(trimmed.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

fn bignum_to_i64(negative: bool, magnitude: &[u8]) -> Option<i64> {
    let v = bignum_to_u64(magnitude)?;
    if negative {
        if v <= 1u64 << 63 {
            Some((-(i128::from(v))) as i64)
        } else {
            None
        }
    } else {
        i64::try_from(v).ok()
    }
}

/// Captures one event per parser pump; typed arrays expand into a queue
/// so the cursor can hand their elements out one at a time.
#[derive(Debug, Default)]
struct CursorVisitor {
    slot: Option<Event>,
    pending: VecDeque<Event>,
}

impl CursorVisitor {
    fn put(&mut self, kind: EventKind, tag: Tag, ctx: &Context) -> Result<bool, DecodeError> {
        self.slot = Some(Event::new(kind, tag, ctx.position));
        Ok(true)
    }
}

impl Visitor for CursorVisitor {
    fn begin_document(&mut self, ctx: &Context) -> Result<bool, DecodeError> {
        self.put(EventKind::BeginDocument, Tag::None, ctx)
    }

    fn end_document(&mut self, ctx: &Context) -> Result<bool, DecodeError> {
        self.put(EventKind::EndDocument, Tag::None, ctx)
    }

    fn begin_object(&mut self, hint: Option<usize>, ctx: &Context) -> Result<bool, DecodeError> {
        self.put(EventKind::BeginObject(hint), Tag::None, ctx)
    }

    fn end_object(&mut self, ctx: &Context) -> Result<bool, DecodeError> {
        self.put(EventKind::EndObject, Tag::None, ctx)
    }

    fn begin_array(&mut self, hint: Option<usize>, ctx: &Context) -> Result<bool, DecodeError> {
        self.put(EventKind::BeginArray(hint), Tag::None, ctx)
    }

    fn end_array(&mut self, ctx: &Context) -> Result<bool, DecodeError> {
        self.put(EventKind::EndArray, Tag::None, ctx)
    }

    fn key(&mut self, name: &str, ctx: &Context) -> Result<bool, DecodeError> {
        self.put(EventKind::Key(name.to_owned()), Tag::None, ctx)
    }

    fn string_value(&mut self, value: &str, tag: Tag, ctx: &Context) -> Result<bool, DecodeError> {
        self.put(EventKind::Str(value.to_owned()), tag, ctx)
    }

    fn byte_string_value(
        &mut self,
        value: &[u8],
        tag: Tag,
        ctx: &Context,
    ) -> Result<bool, DecodeError> {
        self.put(EventKind::Bytes(value.to_vec()), tag, ctx)
    }

    fn bignum_value(
        &mut self,
        negative: bool,
        magnitude: &[u8],
        ctx: &Context,
    ) -> Result<bool, DecodeError> {
        self.put(
            EventKind::Bignum { negative, magnitude: magnitude.to_vec() },
            Tag::Bignum,
            ctx,
        )
    }

    fn int64_value(&mut self, value: i64, tag: Tag, ctx: &Context) -> Result<bool, DecodeError> {
        self.put(EventKind::Int(value), tag, ctx)
    }

    fn uint64_value(&mut self, value: u64, tag: Tag, ctx: &Context) -> Result<bool, DecodeError> {
        self.put(EventKind::UInt(value), tag, ctx)
    }

    fn double_value(&mut self, value: f64, tag: Tag, ctx: &Context) -> Result<bool, DecodeError> {
        self.put(EventKind::Double(value), tag, ctx)
    }

    fn bool_value(&mut self, value: bool, ctx: &Context) -> Result<bool, DecodeError> {
        self.put(EventKind::Bool(value), Tag::None, ctx)
    }

    fn null_value(&mut self, tag: Tag, ctx: &Context) -> Result<bool, DecodeError> {
        self.put(EventKind::Null, tag, ctx)
    }

    fn typed_array(
        &mut self,
        view: &TypedArrayView<'_>,
        tag: Tag,
        ctx: &Context,
    ) -> Result<bool, DecodeError> {
        let p = ctx.position;
        self.slot = Some(Event::new(EventKind::BeginArray(Some(view.len())), tag, p));
        match view {
            TypedArrayView::U8(v) => {
                self.pending
                    .extend(v.iter().map(|&x| Event::new(EventKind::UInt(u64::from(x)), Tag::None, p)));
            }
            TypedArrayView::U16(v) => {
                self.pending
                    .extend(v.iter().map(|&x| Event::new(EventKind::UInt(u64::from(x)), Tag::None, p)));
            }
            TypedArrayView::U32(v) => {
                self.pending
                    .extend(v.iter().map(|&x| Event::new(EventKind::UInt(u64::from(x)), Tag::None, p)));
            }
            TypedArrayView::U64(v) => {
                self.pending
                    .extend(v.iter().map(|&x| Event::new(EventKind::UInt(x), Tag::None, p)));
            }
            TypedArrayView::I8(v) => {
                self.pending
                    .extend(v.iter().map(|&x| Event::new(EventKind::Int(i64::from(x)), Tag::None, p)));
            }
            TypedArrayView::I16(v) => {
                self.pending
                    .extend(v.iter().map(|&x| Event::new(EventKind::Int(i64::from(x)), Tag::None, p)));
            }
            TypedArrayView::I32(v) => {
                self.pending
                    .extend(v.iter().map(|&x| Event::new(EventKind::Int(i64::from(x)), Tag::None, p)));
            }
            TypedArrayView::I64(v) => {
                self.pending
                    .extend(v.iter().map(|&x| Event::new(EventKind::Int(x), Tag::None, p)));
            }
            TypedArrayView::F16(v) => {
                self.pending.extend(
                    v.iter()
                        .map(|&x| Event::new(EventKind::Double(half_to_f64(x)), Tag::None, p)),
                );
            }
            TypedArrayView::F32(v) => {
                self.pending.extend(
                    v.iter()
                        .map(|&x| Event::new(EventKind::Double(f64::from(x)), Tag::None, p)),
                );
            }
            TypedArrayView::F64(v) => {
                self.pending
                    .extend(v.iter().map(|&x| Event::new(EventKind::Double(x), Tag::None, p)));
            }
        }
        self.pending.push_back(Event::new(EventKind::EndArray, Tag::None, p));
        Ok(true)
    }
}

/// Streaming pull cursor over a format parser.
#[derive(Debug)]
pub struct Cursor<P: Parser> {
    parser: P,
    visitor: CursorVisitor,
    current: Event,
    done: bool,
}

impl<P: Parser> Cursor<P> {
    /// Positions the cursor on the first event of the document.
    pub fn new(mut parser: P) -> Result<Self, DecodeError> {
        parser.set_cursor_mode(true);
        let mut visitor = CursorVisitor::default();
        parser.restart();
        parser.parse(&mut visitor)?;
        let position = parser.position();
        let Some(current) = visitor.slot.take() else {
            return Err(DecodeError::new(
                ErrorKind::UnexpectedEof { context: "document" },
                position,
            ));
        };
        Ok(Self { parser, visitor, current, done: false })
    }

    /// The event the cursor is positioned on. After the stream is
    /// exhausted this stays on the final end-of-document event.
    pub fn current(&self) -> &Event {
        &self.current
    }

    /// True once the end-of-document event has been consumed.
    pub fn done(&self) -> bool {
        self.done
    }

    pub fn position(&self) -> u64 {
        self.parser.position()
    }

    /// Advances to the next event.
    pub fn next(&mut self) -> Result<(), DecodeError> {
        if let Some(ev) = self.visitor.pending.pop_front() {
            self.current = ev;
            return Ok(());
        }
        if matches!(self.current.kind, EventKind::EndDocument) {
            self.done = true;
            return Ok(());
        }
        self.pump()
    }

    fn pump(&mut self) -> Result<(), DecodeError> {
        self.parser.restart();
        self.parser.parse(&mut self.visitor)?;
        let position = self.parser.position();
        match self.visitor.slot.take() {
            Some(ev) => {
                self.current = ev;
                Ok(())
            }
            None => Err(DecodeError::new(
                ErrorKind::UnexpectedEof { context: "document" },
                position,
            )),
        }
    }

    /// Replays the current event into `visitor`. When positioned on a
    /// container opening, the whole subtree is streamed through the
    /// visitor and the cursor lands on the matching end event.
    pub fn read_to(&mut self, visitor: &mut dyn Visitor) -> Result<(), DecodeError> {
        let ctx = Context::at(self.current.position);
        match &self.current.kind {
            EventKind::BeginObject(hint) => {
                let hint = *hint;
                visitor.begin_object(hint, &ctx)?;
                self.finish_container(true, visitor)?;
            }
            EventKind::BeginArray(hint) => {
                let hint = *hint;
                visitor.begin_array(hint, &ctx)?;
                self.finish_container(false, visitor)?;
            }
            EventKind::BeginDocument => {
                visitor.begin_document(&ctx)?;
            }
            EventKind::EndDocument => {
                visitor.end_document(&ctx)?;
            }
            EventKind::EndObject => {
                visitor.end_object(&ctx)?;
            }
            EventKind::EndArray => {
                visitor.end_array(&ctx)?;
            }
            EventKind::Key(k) => {
                visitor.key(k, &ctx)?;
            }
            EventKind::Str(s) => {
                visitor.string_value(s, self.current.tag, &ctx)?;
            }
            EventKind::Bytes(b) => {
                visitor.byte_string_value(b, self.current.tag, &ctx)?;
            }
            EventKind::Bignum { negative, magnitude } => {
                visitor.bignum_value(*negative, magnitude, &ctx)?;
            }
            EventKind::Int(v) => {
                visitor.int64_value(*v, self.current.tag, &ctx)?;
            }
            EventKind::UInt(v) => {
                visitor.uint64_value(*v, self.current.tag, &ctx)?;
            }
            EventKind::Double(v) => {
                visitor.double_value(*v, self.current.tag, &ctx)?;
            }
            EventKind::Bool(v) => {
                visitor.bool_value(*v, &ctx)?;
            }
            EventKind::Null => {
                visitor.null_value(self.current.tag, &ctx)?;
            }
        }
        Ok(())
    }

    /// Streams the rest of the open container into `visitor`. Expanded
    /// typed arrays replay from the queue; everything else resumes the
    /// parser with a mark at the container boundary.
    fn finish_container(
        &mut self,
        is_object: bool,
        visitor: &mut dyn Visitor,
    ) -> Result<(), DecodeError> {
        if !self.visitor.pending.is_empty() {
            while let Some(ev) = self.visitor.pending.pop_front() {
                let ctx = Context::at(ev.position);
                match ev.kind {
                    EventKind::UInt(v) => {
                        visitor.uint64_value(v, ev.tag, &ctx)?;
                    }
                    EventKind::Int(v) => {
                        visitor.int64_value(v, ev.tag, &ctx)?;
                    }
                    EventKind::Double(v) => {
                        visitor.double_value(v, ev.tag, &ctx)?;
                    }
                    EventKind::EndArray => {
                        visitor.end_array(&ctx)?;
                        self.current = Event::end_of(false, ev.position);
                        return Ok(());
                    }
                    _ => {}
                }
            }
            return Ok(());
        }

        let target = self.parser.level().saturating_sub(1);
        self.parser.set_mark_level(target);
        self.parser.set_cursor_mode(false);
        let mut outcome = Ok(());
        while self.parser.level() > target && !self.parser.done() {
            self.parser.restart();
            if let Err(e) = self.parser.parse(visitor) {
                outcome = Err(e);
                break;
            }
        }
        self.parser.set_mark_level(NO_MARK);
        self.parser.set_cursor_mode(true);
        outcome?;
        self.current = Event::end_of(is_object, self.parser.position());
        Ok(())
    }

    /// Discards the current value. On a container opening this consumes
    /// the whole subtree; on anything else it is a no-op.
    pub fn skip_subtree(&mut self) -> Result<(), DecodeError> {
        let mut sink = NullVisitor;
        self.read_to(&mut sink)
    }

    /// Materializes the current value. Containers are assembled into a
    /// tree; scalars convert directly without touching the parser.
    pub fn read_value(&mut self) -> Result<Value, DecodeError> {
        if matches!(
            self.current.kind,
            EventKind::BeginObject(_) | EventKind::BeginArray(_)
        ) {
            let mut decoder = TreeDecoder::new();
            self.read_to(&mut decoder)?;
            let position = self.parser.position();
            return decoder.take_value().ok_or_else(|| {
                DecodeError::new(ErrorKind::UnexpectedEof { context: "value" }, position)
            });
        }
        match &self.current.kind {
            EventKind::Str(s) => Ok(Value::Str(s.clone(), self.current.tag)),
            EventKind::Key(k) => Ok(Value::Str(k.clone(), Tag::None)),
            EventKind::Bytes(b) => Ok(Value::Bytes(b.clone(), self.current.tag)),
            EventKind::Bignum { negative, magnitude } => Ok(Value::Bignum {
                negative: *negative,
                magnitude: magnitude.clone(),
            }),
            EventKind::Int(v) => Ok(Value::Int(*v, self.current.tag)),
            EventKind::UInt(v) => Ok(Value::UInt(*v, self.current.tag)),
            EventKind::Double(v) => Ok(Value::Double(*v, self.current.tag)),
            EventKind::Bool(v) => Ok(Value::Bool(*v)),
            EventKind::Null => Ok(Value::Null(self.current.tag)),
            _ => Err(DecodeError::new(
                ErrorKind::UnexpectedEof { context: "value" },
                self.parser.position(),
            )),
        }
    }

    /// Rewinds parser state to read another document from the same source.
    pub fn reset(&mut self) -> Result<(), DecodeError> {
        self.parser.reset();
        self.rewind()
    }

    /// Rewinds and swaps in a fresh source.
    pub fn reset_with(&mut self, source: P::Source) -> Result<(), DecodeError> {
        self.parser.reset_with(source);
        self.rewind()
    }

    fn rewind(&mut self) -> Result<(), DecodeError> {
        self.parser.set_cursor_mode(true);
        self.visitor.pending.clear();
        self.visitor.slot = None;
        self.done = false;
        self.pump()
    }
}

/// Decorates a [`Cursor`], yielding only events the predicate keeps.
///
/// Structural events (document boundaries and container ends) always pass
/// through. Dropping a key drops the value that follows it; dropping a
/// container opening drops the whole subtree.
#[derive(Debug)]
pub struct FilterCursor<P: Parser, F> {
    inner: Cursor<P>,
    predicate: F,
}

impl<P: Parser, F: FnMut(&Event) -> bool> FilterCursor<P, F> {
    pub fn new(inner: Cursor<P>, predicate: F) -> Result<Self, DecodeError> {
        let mut cursor = Self { inner, predicate };
        cursor.settle()?;
        Ok(cursor)
    }

    pub fn current(&self) -> &Event {
        self.inner.current()
    }

    pub fn done(&self) -> bool {
        self.inner.done()
    }

    pub fn position(&self) -> u64 {
        self.inner.position()
    }

    pub fn next(&mut self) -> Result<(), DecodeError> {
        self.inner.next()?;
        self.settle()
    }

    pub fn read_value(&mut self) -> Result<Value, DecodeError> {
        self.inner.read_value()
    }

    /// Advances until the current event is deliverable.
    fn settle(&mut self) -> Result<(), DecodeError> {
        loop {
            if self.inner.done() {
                return Ok(());
            }
            let keep = match self.inner.current().kind {
                EventKind::BeginDocument
                | EventKind::EndDocument
                | EventKind::EndObject
                | EventKind::EndArray => true,
                _ => (self.predicate)(self.inner.current()),
            };
            if keep {
                return Ok(());
            }
            if matches!(self.inner.current().kind, EventKind::Key(_)) {
                // The dropped key takes its value with it.
                self.inner.next()?;
                if !self.inner.done() {
                    self.inner.skip_subtree()?;
                    self.inner.next()?;
                }
            } else if matches!(
                self.inner.current().kind,
                EventKind::BeginObject(_) | EventKind::BeginArray(_)
            ) {
                self.inner.skip_subtree()?;
                self.inner.next()?;
            } else {
                self.inner.next()?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{bson, cbor, msgpack, ubjson};
    use crate::codec::{BsonParser, CborParser, MsgpackParser, UbjsonParser};
    use crate::source::SliceSource;

    fn scenario() -> Value {
        Value::Object(vec![(
            "a".to_owned(),
            Value::Array(vec![
                Value::UInt(1, Tag::None),
                Value::UInt(2, Tag::None),
                Value::Null(Tag::None),
            ]),
        )])
    }

    fn msgpack_cursor(bytes: &[u8]) -> Cursor<MsgpackParser<SliceSource<'_>>> {
        Cursor::new(MsgpackParser::new(SliceSource::new(bytes))).unwrap()
    }

    #[test]
    fn test_event_sequence() {
        let bytes = msgpack::encode(&scenario()).unwrap();
        let mut cursor = msgpack_cursor(&bytes);
        let mut kinds = Vec::new();
        while !cursor.done() {
            kinds.push(cursor.current().kind.clone());
            cursor.next().unwrap();
        }
        assert_eq!(
            kinds,
            vec![
                EventKind::BeginDocument,
                EventKind::BeginObject(Some(1)),
                EventKind::Key("a".to_owned()),
                EventKind::BeginArray(Some(3)),
                EventKind::UInt(1),
                EventKind::UInt(2),
                EventKind::Null,
                EventKind::EndArray,
                EventKind::EndObject,
                EventKind::EndDocument,
            ]
        );
        assert!(cursor.done());
    }

    #[test]
    fn test_read_value_matches_tree_decode_for_every_format() {
        let value = Value::Object(vec![
            ("text".to_owned(), Value::from("abc")),
            (
                "nested".to_owned(),
                Value::Array(vec![
                    Value::Int(-3, Tag::None),
                    Value::Double(0.25, Tag::None),
                    Value::Object(vec![("deep".to_owned(), Value::Bool(true))]),
                ]),
            ),
            ("flag".to_owned(), Value::Bool(false)),
        ]);

        let bytes = msgpack::encode(&value).unwrap();
        let mut cursor = Cursor::new(MsgpackParser::new(SliceSource::new(&bytes))).unwrap();
        cursor.next().unwrap();
        assert_eq!(cursor.read_value().unwrap(), msgpack::decode(&bytes).unwrap());

        let bytes = cbor::encode(&value).unwrap();
        let mut cursor = Cursor::new(CborParser::new(SliceSource::new(&bytes))).unwrap();
        cursor.next().unwrap();
        assert_eq!(cursor.read_value().unwrap(), cbor::decode(&bytes).unwrap());

        let bytes = ubjson::encode(&value).unwrap();
        let mut cursor = Cursor::new(UbjsonParser::new(SliceSource::new(&bytes))).unwrap();
        cursor.next().unwrap();
        assert_eq!(cursor.read_value().unwrap(), ubjson::decode(&bytes).unwrap());

        let bytes = bson::encode(&value).unwrap();
        let mut cursor = Cursor::new(BsonParser::new(SliceSource::new(&bytes))).unwrap();
        cursor.next().unwrap();
        assert_eq!(cursor.read_value().unwrap(), bson::decode(&bytes).unwrap());
    }

    #[derive(Default)]
    struct Recording {
        events: Vec<(EventKind, Tag)>,
    }

    impl Recording {
        fn push(&mut self, kind: EventKind, tag: Tag) -> Result<bool, DecodeError> {
            self.events.push((kind, tag));
            Ok(true)
        }
    }

    impl Visitor for Recording {
        fn begin_document(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
            self.push(EventKind::BeginDocument, Tag::None)
        }

        fn end_document(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
            self.push(EventKind::EndDocument, Tag::None)
        }

        fn begin_object(
            &mut self,
            hint: Option<usize>,
            _ctx: &Context,
        ) -> Result<bool, DecodeError> {
            self.push(EventKind::BeginObject(hint), Tag::None)
        }

        fn end_object(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
            self.push(EventKind::EndObject, Tag::None)
        }

        fn begin_array(
            &mut self,
            hint: Option<usize>,
            _ctx: &Context,
        ) -> Result<bool, DecodeError> {
            self.push(EventKind::BeginArray(hint), Tag::None)
        }

        fn end_array(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
            self.push(EventKind::EndArray, Tag::None)
        }

        fn key(&mut self, name: &str, _ctx: &Context) -> Result<bool, DecodeError> {
            self.push(EventKind::Key(name.to_owned()), Tag::None)
        }

        fn string_value(&mut self, value: &str, tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
            self.push(EventKind::Str(value.to_owned()), tag)
        }

        fn byte_string_value(
            &mut self,
            value: &[u8],
            tag: Tag,
            _ctx: &Context,
        ) -> Result<bool, DecodeError> {
            self.push(EventKind::Bytes(value.to_vec()), tag)
        }

        fn bignum_value(
            &mut self,
            negative: bool,
            magnitude: &[u8],
            _ctx: &Context,
        ) -> Result<bool, DecodeError> {
            self.push(
                EventKind::Bignum { negative, magnitude: magnitude.to_vec() },
                Tag::Bignum,
            )
        }

        fn int64_value(&mut self, value: i64, tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
            self.push(EventKind::Int(value), tag)
        }

        fn uint64_value(&mut self, value: u64, tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
            self.push(EventKind::UInt(value), tag)
        }

        fn double_value(&mut self, value: f64, tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
            self.push(EventKind::Double(value), tag)
        }

        fn bool_value(&mut self, value: bool, _ctx: &Context) -> Result<bool, DecodeError> {
            self.push(EventKind::Bool(value), Tag::None)
        }

        fn null_value(&mut self, tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
            self.push(EventKind::Null, tag)
        }
    }

    fn pushed_events<P: Parser>(mut parser: P) -> Vec<(EventKind, Tag)> {
        let mut recording = Recording::default();
        parser.parse_all(&mut recording).unwrap();
        recording.events
    }

    fn pulled_events<P: Parser>(parser: P) -> Vec<(EventKind, Tag)> {
        let mut cursor = Cursor::new(parser).unwrap();
        let mut events = Vec::new();
        while !cursor.done() {
            events.push((cursor.current().kind.clone(), cursor.current().tag));
            cursor.next().unwrap();
        }
        events
    }

    #[test]
    fn test_cursor_stream_matches_pushed_events_for_every_format() {
        let value = Value::Object(vec![
            (
                "a".to_owned(),
                Value::Array(vec![
                    Value::UInt(1, Tag::None),
                    Value::Double(-0.5, Tag::None),
                    Value::Null(Tag::None),
                ]),
            ),
            ("b".to_owned(), Value::from("xyz")),
        ]);

        let bytes = msgpack::encode(&value).unwrap();
        assert_eq!(
            pushed_events(MsgpackParser::new(SliceSource::new(&bytes))),
            pulled_events(MsgpackParser::new(SliceSource::new(&bytes)))
        );

        let bytes = cbor::encode(&value).unwrap();
        assert_eq!(
            pushed_events(CborParser::new(SliceSource::new(&bytes))),
            pulled_events(CborParser::new(SliceSource::new(&bytes)))
        );

        let bytes = ubjson::encode(&value).unwrap();
        assert_eq!(
            pushed_events(UbjsonParser::new(SliceSource::new(&bytes))),
            pulled_events(UbjsonParser::new(SliceSource::new(&bytes)))
        );

        let bytes = bson::encode(&value).unwrap();
        assert_eq!(
            pushed_events(BsonParser::new(SliceSource::new(&bytes))),
            pulled_events(BsonParser::new(SliceSource::new(&bytes)))
        );
    }

    #[test]
    fn test_skip_subtree() {
        let value = Value::Object(vec![
            (
                "skip".to_owned(),
                Value::Array(vec![
                    Value::UInt(1, Tag::None),
                    Value::Object(vec![("x".to_owned(), Value::from("y"))]),
                ]),
            ),
            ("keep".to_owned(), Value::UInt(42, Tag::None)),
        ]);
        let bytes = msgpack::encode(&value).unwrap();
        let mut cursor = msgpack_cursor(&bytes);

        cursor.next().unwrap(); // object
        cursor.next().unwrap(); // key "skip"
        assert_eq!(cursor.current().as_str(), Some("skip"));
        cursor.next().unwrap(); // array
        cursor.skip_subtree().unwrap();
        assert_eq!(cursor.current().kind, EventKind::EndArray);

        cursor.next().unwrap();
        assert_eq!(cursor.current().as_str(), Some("keep"));
        cursor.next().unwrap();
        assert_eq!(cursor.current().as_u64(), Some(42));
    }

    #[test]
    fn test_skipping_a_scalar_leaves_position() {
        let bytes = msgpack::encode(&Value::UInt(9, Tag::None)).unwrap();
        let mut cursor = msgpack_cursor(&bytes);
        cursor.next().unwrap();
        cursor.skip_subtree().unwrap();
        assert_eq!(cursor.current().as_u64(), Some(9));
        cursor.next().unwrap();
        assert_eq!(cursor.current().kind, EventKind::EndDocument);
    }

    #[test]
    fn test_typed_accessors() {
        let value = Value::Array(vec![
            Value::UInt(7, Tag::None),
            Value::Int(-2, Tag::None),
            Value::Double(1.5, Tag::None),
            Value::from("x"),
            Value::Bool(true),
            Value::Bytes(vec![1, 2], Tag::None),
        ]);
        let bytes = msgpack::encode(&value).unwrap();
        let mut cursor = msgpack_cursor(&bytes);
        cursor.next().unwrap(); // array
        cursor.next().unwrap();
        assert_eq!(cursor.current().as_u64(), Some(7));
        assert_eq!(cursor.current().as_i64(), Some(7));
        assert_eq!(cursor.current().as_f64(), Some(7.0));
        cursor.next().unwrap();
        assert_eq!(cursor.current().as_i64(), Some(-2));
        assert_eq!(cursor.current().as_u64(), None);
        cursor.next().unwrap();
        assert_eq!(cursor.current().as_f64(), Some(1.5));
        cursor.next().unwrap();
        assert_eq!(cursor.current().as_str(), Some("x"));
        cursor.next().unwrap();
        assert_eq!(cursor.current().as_bool(), Some(true));
        cursor.next().unwrap();
        assert_eq!(cursor.current().as_bytes(), Some(&[1u8, 2][..]));
    }

    #[test]
    fn test_bignum_accessor_reconstruction() {
        // -18446744073709551616 stays out of range, -42 folds back
        let ev = Event::new(
            EventKind::Bignum { negative: true, magnitude: vec![1, 0, 0, 0, 0, 0, 0, 0, 0] },
            Tag::Bignum,
            0,
        );
        assert_eq!(ev.as_i64(), None);
        let ev = Event::new(
            EventKind::Bignum { negative: true, magnitude: vec![42] },
            Tag::Bignum,
            0,
        );
        assert_eq!(ev.as_i64(), Some(-42));
        let ev = Event::new(EventKind::Str("99".to_owned()), Tag::Bignum, 0);
        assert_eq!(ev.as_u64(), Some(99));
    }

    #[test]
    fn test_typed_array_expands_through_cursor() {
        // CBOR u16 big-endian span [1, 2]
        let wire = [0xd8, 0x41, 0x44, 0x00, 0x01, 0x00, 0x02];
        let mut cursor = Cursor::new(CborParser::new(SliceSource::new(&wire))).unwrap();
        let mut kinds = Vec::new();
        while !cursor.done() {
            kinds.push(cursor.current().kind.clone());
            cursor.next().unwrap();
        }
        assert_eq!(
            kinds,
            vec![
                EventKind::BeginDocument,
                EventKind::BeginArray(Some(2)),
                EventKind::UInt(1),
                EventKind::UInt(2),
                EventKind::EndArray,
                EventKind::EndDocument,
            ]
        );
    }

    #[test]
    fn test_skip_over_expanded_typed_array() {
        let wire = [0xd8, 0x41, 0x44, 0x00, 0x01, 0x00, 0x02];
        let mut cursor = Cursor::new(CborParser::new(SliceSource::new(&wire))).unwrap();
        cursor.next().unwrap(); // array opening
        cursor.skip_subtree().unwrap();
        assert_eq!(cursor.current().kind, EventKind::EndArray);
        cursor.next().unwrap();
        assert_eq!(cursor.current().kind, EventKind::EndDocument);
    }

    #[test]
    fn test_filter_cursor_drops_key_and_subtree() {
        let value = Value::Object(vec![
            ("a".to_owned(), Value::UInt(1, Tag::None)),
            (
                "secret".to_owned(),
                Value::Object(vec![("inner".to_owned(), Value::from("hidden"))]),
            ),
            ("b".to_owned(), Value::UInt(2, Tag::None)),
        ]);
        let bytes = msgpack::encode(&value).unwrap();
        let cursor = msgpack_cursor(&bytes);
        let mut filtered = FilterCursor::new(cursor, |ev: &Event| {
            !matches!(&ev.kind, EventKind::Key(k) if k == "secret")
        })
        .unwrap();

        let mut kinds = Vec::new();
        while !filtered.done() {
            kinds.push(filtered.current().kind.clone());
            filtered.next().unwrap();
        }
        assert_eq!(
            kinds,
            vec![
                EventKind::BeginDocument,
                EventKind::BeginObject(Some(3)),
                EventKind::Key("a".to_owned()),
                EventKind::UInt(1),
                EventKind::Key("b".to_owned()),
                EventKind::UInt(2),
                EventKind::EndObject,
                EventKind::EndDocument,
            ]
        );
    }

    #[test]
    fn test_filter_cursor_drops_scalars() {
        let value = Value::Array(vec![
            Value::UInt(1, Tag::None),
            Value::UInt(2, Tag::None),
            Value::UInt(3, Tag::None),
        ]);
        let bytes = msgpack::encode(&value).unwrap();
        let cursor = msgpack_cursor(&bytes);
        let mut filtered =
            FilterCursor::new(cursor, |ev: &Event| ev.as_u64() != Some(2)).unwrap();

        let mut seen = Vec::new();
        while !filtered.done() {
            if let Some(v) = filtered.current().as_u64() {
                seen.push(v);
            }
            filtered.next().unwrap();
        }
        assert_eq!(seen, vec![1, 3]);
    }

    #[test]
    fn test_cursor_reset_reads_next_document() {
        let first = scenario();
        let second = Value::from("tail");
        let mut bytes = msgpack::encode(&first).unwrap();
        bytes.extend(msgpack::encode(&second).unwrap());

        let mut cursor = msgpack_cursor(&bytes);
        cursor.next().unwrap();
        assert_eq!(cursor.read_value().unwrap(), first);
        while !cursor.done() {
            cursor.next().unwrap();
        }

        cursor.reset().unwrap();
        cursor.next().unwrap();
        assert_eq!(cursor.read_value().unwrap(), second);
    }

    #[test]
    fn test_cursor_reset_with_new_source() {
        let bytes = msgpack::encode(&Value::Bool(true)).unwrap();
        let other = msgpack::encode(&Value::Bool(false)).unwrap();

        let mut cursor = msgpack_cursor(&bytes);
        cursor.next().unwrap();
        assert_eq!(cursor.read_value().unwrap(), Value::Bool(true));

        cursor.reset_with(SliceSource::new(&other)).unwrap();
        cursor.next().unwrap();
        assert_eq!(cursor.read_value().unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_truncated_input_surfaces_mid_stream() {
        let bytes = msgpack::encode(&scenario()).unwrap();
        let cut = &bytes[..bytes.len() - 1];
        let mut cursor = msgpack_cursor(cut);
        let mut result = Ok(());
        for _ in 0..16 {
            if cursor.done() {
                break;
            }
            result = cursor.next();
            if result.is_err() {
                break;
            }
        }
        let err = result.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UnexpectedEof { .. }));
    }
}
