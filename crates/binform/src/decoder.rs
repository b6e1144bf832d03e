//! Event consumer that assembles a [`Value`] tree.

use crate::error::DecodeError;
use crate::event::{Context, Tag, TypedArrayView, Visitor};
use crate::value::Value;

#[derive(Debug)]
struct Frame {
    is_object: bool,
    /// Index into `items` where this container's children begin.
    base: usize,
    /// Key under which the finished container is stored in its parent.
    key: Option<String>,
}

/// Builds a [`Value`] from the event stream.
///
/// Children accumulate in a flat item list; when a container ends, its slice
/// of the list is drained in one pass into the finished `Array` or `Object`.
/// Every visit method returns `Ok(false)` once the root value is complete,
/// so a driving parser stops without scanning trailing input.
///
/// The decoder does not require a document envelope: a bare value sub-tree
/// (as replayed by a cursor) decodes the same way.
#[derive(Debug, Default)]
pub struct TreeDecoder {
    items: Vec<(Option<String>, Value)>,
    frames: Vec<Frame>,
    pending_key: Option<String>,
    root: Option<Value>,
}

impl TreeDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once a complete root value has been assembled.
    pub fn is_complete(&self) -> bool {
        self.root.is_some()
    }

    /// Takes the assembled value, resetting the decoder for reuse.
    pub fn take_value(&mut self) -> Option<Value> {
        self.items.clear();
        self.frames.clear();
        self.pending_key = None;
        self.root.take()
    }

    fn push_value(&mut self, value: Value) -> Result<bool, DecodeError> {
        if self.frames.is_empty() {
            self.root = Some(value);
            Ok(false)
        } else {
            self.items.push((self.pending_key.take(), value));
            Ok(true)
        }
    }

    fn end_container(&mut self, is_object: bool) -> Result<bool, DecodeError> {
        let Some(frame) = self.frames.pop() else {
            // Unbalanced end event; parsers never produce this.
            return Ok(false);
        };
        debug_assert_eq!(frame.is_object, is_object);
        let drained = self.items.split_off(frame.base);
        let value = if is_object {
            Value::Object(
                drained
                    .into_iter()
                    .map(|(key, value)| (key.unwrap_or_default(), value))
                    .collect(),
            )
        } else {
            Value::Array(drained.into_iter().map(|(_, value)| value).collect())
        };
        if self.frames.is_empty() {
            self.root = Some(value);
            Ok(false)
        } else {
            self.items.push((frame.key, value));
            Ok(true)
        }
    }
}

impl Visitor for TreeDecoder {
    fn begin_document(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
        self.items.clear();
        self.frames.clear();
        self.pending_key = None;
        self.root = None;
        Ok(true)
    }

    fn end_document(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
        Ok(false)
    }

    fn begin_object(&mut self, _hint: Option<usize>, _ctx: &Context) -> Result<bool, DecodeError> {
        self.frames.push(Frame {
            is_object: true,
            base: self.items.len(),
            key: self.pending_key.take(),
        });
        Ok(true)
    }

    fn end_object(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
        self.end_container(true)
    }

    fn begin_array(&mut self, hint: Option<usize>, _ctx: &Context) -> Result<bool, DecodeError> {
        if let Some(n) = hint {
            // Bounded reserve; huge declared sizes only pay as bytes arrive.
            self.items.reserve(n.min(4096));
        }
        self.frames.push(Frame {
            is_object: false,
            base: self.items.len(),
            key: self.pending_key.take(),
        });
        Ok(true)
    }

    fn end_array(&mut self, _ctx: &Context) -> Result<bool, DecodeError> {
        self.end_container(false)
    }

    fn key(&mut self, name: &str, _ctx: &Context) -> Result<bool, DecodeError> {
        self.pending_key = Some(name.to_owned());
        Ok(true)
    }

    fn string_value(&mut self, value: &str, tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        self.push_value(Value::Str(value.to_owned(), tag))
    }

    fn byte_string_value(
        &mut self,
        value: &[u8],
        tag: Tag,
        _ctx: &Context,
    ) -> Result<bool, DecodeError> {
        self.push_value(Value::Bytes(value.to_vec(), tag))
    }

    fn bignum_value(
        &mut self,
        negative: bool,
        magnitude: &[u8],
        _ctx: &Context,
    ) -> Result<bool, DecodeError> {
        self.push_value(Value::Bignum {
            negative,
            magnitude: magnitude.to_vec(),
        })
    }

    fn int64_value(&mut self, value: i64, tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        self.push_value(Value::Int(value, tag))
    }

    fn uint64_value(&mut self, value: u64, tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        self.push_value(Value::UInt(value, tag))
    }

    fn double_value(&mut self, value: f64, tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        self.push_value(Value::Double(value, tag))
    }

    fn bool_value(&mut self, value: bool, _ctx: &Context) -> Result<bool, DecodeError> {
        self.push_value(Value::Bool(value))
    }

    fn null_value(&mut self, tag: Tag, _ctx: &Context) -> Result<bool, DecodeError> {
        self.push_value(Value::Null(tag))
    }

    fn typed_array(
        &mut self,
        view: &TypedArrayView<'_>,
        _tag: Tag,
        _ctx: &Context,
    ) -> Result<bool, DecodeError> {
        let items = match view {
            TypedArrayView::U8(v) => {
                v.iter().map(|&x| Value::UInt(u64::from(x), Tag::None)).collect()
            }
            TypedArrayView::U16(v) => {
                v.iter().map(|&x| Value::UInt(u64::from(x), Tag::None)).collect()
            }
            TypedArrayView::U32(v) => {
                v.iter().map(|&x| Value::UInt(u64::from(x), Tag::None)).collect()
            }
            TypedArrayView::U64(v) => {
                v.iter().map(|&x| Value::UInt(x, Tag::None)).collect()
            }
            TypedArrayView::I8(v) => {
                v.iter().map(|&x| Value::Int(i64::from(x), Tag::None)).collect()
            }
            TypedArrayView::I16(v) => {
                v.iter().map(|&x| Value::Int(i64::from(x), Tag::None)).collect()
            }
            TypedArrayView::I32(v) => {
                v.iter().map(|&x| Value::Int(i64::from(x), Tag::None)).collect()
            }
            TypedArrayView::I64(v) => {
                v.iter().map(|&x| Value::Int(x, Tag::None)).collect()
            }
            TypedArrayView::F16(v) => v
                .iter()
                .map(|&x| Value::Double(crate::codec::half_to_f64(x), Tag::None))
                .collect(),
            TypedArrayView::F32(v) => v
                .iter()
                .map(|&x| Value::Double(f64::from(x), Tag::None))
                .collect(),
            TypedArrayView::F64(v) => {
                v.iter().map(|&x| Value::Double(x, Tag::None)).collect()
            }
        };
        self.push_value(Value::Array(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::default()
    }

    #[test]
    fn test_assembles_object_with_array() {
        let mut decoder = TreeDecoder::new();
        let c = ctx();
        assert!(decoder.begin_document(&c).unwrap());
        assert!(decoder.begin_object(Some(1), &c).unwrap());
        assert!(decoder.key("a", &c).unwrap());
        assert!(decoder.begin_array(Some(3), &c).unwrap());
        assert!(decoder.uint64_value(1, Tag::None, &c).unwrap());
        assert!(decoder.uint64_value(2, Tag::None, &c).unwrap());
        assert!(decoder.null_value(Tag::None, &c).unwrap());
        assert!(decoder.end_array(&c).unwrap());
        // Root completes here; the decoder signals the parser to stop.
        assert!(!decoder.end_object(&c).unwrap());
        assert!(decoder.is_complete());

        let value = decoder.take_value().unwrap();
        let expected = Value::Object(vec![(
            "a".to_owned(),
            Value::Array(vec![
                Value::UInt(1, Tag::None),
                Value::UInt(2, Tag::None),
                Value::Null(Tag::None),
            ]),
        )]);
        assert_eq!(value, expected);
    }

    #[test]
    fn test_scalar_root_completes_immediately() {
        let mut decoder = TreeDecoder::new();
        let c = ctx();
        assert!(decoder.begin_document(&c).unwrap());
        assert!(!decoder.string_value("hello", Tag::None, &c).unwrap());
        assert_eq!(decoder.take_value(), Some(Value::from("hello")));
    }

    #[test]
    fn test_decoder_reuse_after_take() {
        let mut decoder = TreeDecoder::new();
        let c = ctx();
        decoder.begin_document(&c).unwrap();
        decoder.bool_value(true, &c).unwrap();
        assert_eq!(decoder.take_value(), Some(Value::Bool(true)));
        assert!(!decoder.is_complete());

        decoder.begin_document(&c).unwrap();
        decoder.begin_array(None, &c).unwrap();
        decoder.int64_value(-1, Tag::None, &c).unwrap();
        decoder.end_array(&c).unwrap();
        assert_eq!(
            decoder.take_value(),
            Some(Value::Array(vec![Value::Int(-1, Tag::None)]))
        );
    }

    #[test]
    fn test_works_without_document_envelope() {
        let mut decoder = TreeDecoder::new();
        let c = ctx();
        decoder.begin_array(Some(2), &c).unwrap();
        decoder.double_value(1.5, Tag::None, &c).unwrap();
        decoder.bool_value(false, &c).unwrap();
        assert!(!decoder.end_array(&c).unwrap());
        assert_eq!(
            decoder.take_value(),
            Some(Value::Array(vec![
                Value::Double(1.5, Tag::None),
                Value::Bool(false),
            ]))
        );
    }

    #[test]
    fn test_typed_array_becomes_array_value() {
        let mut decoder = TreeDecoder::new();
        let c = ctx();
        decoder.begin_document(&c).unwrap();
        decoder
            .typed_array(&TypedArrayView::I16(&[-3, 9]), Tag::None, &c)
            .unwrap();
        assert_eq!(
            decoder.take_value(),
            Some(Value::Array(vec![
                Value::Int(-3, Tag::None),
                Value::Int(9, Tag::None),
            ]))
        );
    }

    #[test]
    fn test_duplicate_keys_preserved() {
        let mut decoder = TreeDecoder::new();
        let c = ctx();
        decoder.begin_document(&c).unwrap();
        decoder.begin_object(None, &c).unwrap();
        decoder.key("k", &c).unwrap();
        decoder.uint64_value(1, Tag::None, &c).unwrap();
        decoder.key("k", &c).unwrap();
        decoder.uint64_value(2, Tag::None, &c).unwrap();
        decoder.end_object(&c).unwrap();
        let value = decoder.take_value().unwrap();
        let members = value.as_object().unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].0, "k");
        assert_eq!(members[1].0, "k");
    }
}
