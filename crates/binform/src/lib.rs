//! binform: Streaming event codec for binary data interchange formats.
//!
//! This crate decodes and encodes CBOR, MessagePack, BSON, and UBJSON
//! through one shared event protocol, so documents can be inspected,
//! filtered, and transcoded without committing to a single format or to
//! building a full tree.
//!
//! # Overview
//!
//! binform is built around three access styles over the same parsers:
//! - **Push**: a parser drives a [`Visitor`] with one call per data item
//! - **Pull**: a [`Cursor`] hands out events one at a time, decoding
//!   payloads only when asked
//! - **Tree**: a [`TreeDecoder`] assembles events into a [`Value`]
//!
//! # Quick Start
//!
//! ```rust
//! use binform::{Tag, Value};
//! use binform::codec::cbor;
//!
//! let doc = Value::Object(vec![
//!     ("name".to_string(), Value::from("Ada")),
//!     (
//!         "scores".to_string(),
//!         Value::Array(vec![Value::UInt(1, Tag::None), Value::UInt(2, Tag::None)]),
//!     ),
//! ]);
//!
//! // Encode to binary
//! let bytes = cbor::encode(&doc).unwrap();
//!
//! // Decode back
//! let decoded = cbor::decode(&bytes).unwrap();
//! assert_eq!(doc, decoded);
//! ```
//!
//! Pull access skips what it does not need:
//!
//! ```rust
//! use binform::{Cursor, MsgpackParser, SliceSource, Tag, Value};
//! use binform::codec::msgpack;
//!
//! let doc = Value::Object(vec![
//!     (
//!         "blob".to_string(),
//!         Value::Array((0..64).map(|i| Value::UInt(i, Tag::None)).collect()),
//!     ),
//!     ("answer".to_string(), Value::UInt(42, Tag::None)),
//! ]);
//! let bytes = msgpack::encode(&doc).unwrap();
//!
//! let mut cursor = Cursor::new(MsgpackParser::new(SliceSource::new(&bytes))).unwrap();
//! let mut answer = None;
//! while !cursor.done() {
//!     if cursor.current().as_str() == Some("blob") {
//!         cursor.next().unwrap();
//!         cursor.skip_subtree().unwrap();
//!     } else if cursor.current().as_str() == Some("answer") {
//!         cursor.next().unwrap();
//!         answer = cursor.current().as_u64();
//!     }
//!     cursor.next().unwrap();
//! }
//! assert_eq!(answer, Some(42));
//! ```
//!
//! # Modules
//!
//! - [`event`]: The visitor protocol all parsers speak
//! - [`value`]: Generic tree values with semantic tags
//! - [`codec`]: One parser and encoder per wire format
//! - [`cursor`]: Pull cursor and event filtering
//! - [`decoder`]: Event-to-tree assembly
//! - [`source`]: Byte sources over slices, readers, and iterators
//! - [`error`]: Error types
//! - [`limits`]: Security limits for decoding
//!
//! # Security
//!
//! The parsers are designed to safely handle untrusted input:
//! - Nesting depth and item counts are bounded by configurable limits
//! - Declared lengths are checked against what the stream delivers
//! - Truncated input is rejected with the byte offset of the failure
//!
//! # Formats
//!
//! All four formats share the event protocol; anything one parser reads,
//! any encoder can write. Format-specific surface (CBOR tags and typed
//! arrays, BSON element types, UBJSON strongly typed containers,
//! MessagePack extensions) is carried through [`Tag`]s and documented per
//! submodule of [`codec`].

pub mod codec;
pub mod cursor;
pub mod decoder;
pub mod error;
pub mod event;
pub mod limits;
pub mod source;
pub mod value;

// Re-export commonly used types at crate root
pub use codec::{
    BsonEncoder, BsonParser, CborEncoder, CborParser, MsgpackEncoder, MsgpackParser, Parser,
    UbjsonEncoder, UbjsonParser,
};
pub use cursor::{Cursor, Event, EventKind, FilterCursor};
pub use decoder::TreeDecoder;
pub use error::{DecodeError, ErrorCategory, ErrorKind};
pub use event::{Context, NullVisitor, Tag, TypedArrayView, Visitor};
pub use limits::DecodeOptions;
pub use source::{IterSource, ReadSource, SliceSource, Source};
pub use value::Value;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
