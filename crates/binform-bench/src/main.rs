//! Benchmark for binform encoding and decoding using synthetic documents.
//!
//! Builds a corpus of record objects, then measures every format against a
//! serde_json baseline on the same data.

use std::time::Instant;

use binform::codec::{bson, cbor, msgpack, ubjson};
use binform::codec::{CborParser, MsgpackEncoder};
use binform::{Cursor, MsgpackParser, Parser, SliceSource, Tag, Value};
use serde::Serialize;

const DECODE_ITERS: u32 = 10;

// =============================================================================
// SYNTHETIC DATASET
// =============================================================================

#[derive(Debug, Serialize)]
struct Record {
    id: i64,
    name: String,
    active: bool,
    score: f64,
    tags: Vec<String>,
    payload: Vec<u8>,
    comment: Option<String>,
}

/// Deterministic xorshift so every run benchmarks the same corpus.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

fn make_records(count: usize) -> Vec<Record> {
    let mut rng = Rng(0x5eed_1234_abcd_9876);
    let tag_pool = ["alpha", "beta", "gamma", "delta", "epsilon"];
    (0..count)
        .map(|i| {
            let r = rng.next();
            Record {
                id: i as i64,
                name: format!("record-{i:06}"),
                active: r & 1 == 0,
                score: (r % 4000) as f64 / 4.0,
                tags: (0..(r % 4) as usize)
                    .map(|t| tag_pool[(i + t) % tag_pool.len()].to_string())
                    .collect(),
                payload: (0..(r % 32) as u8).collect(),
                comment: if r % 5 == 0 {
                    Some(format!("synthetic comment {r:x}"))
                } else {
                    None
                },
            }
        })
        .collect()
}

/// Builds the binform tree for the same records, object-rooted so every
/// format (BSON included) can carry it.
fn records_to_value(records: &[Record]) -> Value {
    let documents = records
        .iter()
        .map(|r| {
            Value::Object(vec![
                ("id".to_string(), Value::Int(r.id, Tag::None)),
                ("name".to_string(), Value::from(r.name.as_str())),
                ("active".to_string(), Value::Bool(r.active)),
                ("score".to_string(), Value::Double(r.score, Tag::None)),
                (
                    "tags".to_string(),
                    Value::Array(r.tags.iter().map(|t| Value::from(t.as_str())).collect()),
                ),
                ("payload".to_string(), Value::Bytes(r.payload.clone(), Tag::None)),
                (
                    "comment".to_string(),
                    match &r.comment {
                        Some(text) => Value::from(text.as_str()),
                        None => Value::Null(Tag::None),
                    },
                ),
            ])
        })
        .collect();
    Value::Object(vec![("documents".to_string(), Value::Array(documents))])
}

// =============================================================================
// MEASUREMENT
// =============================================================================

type EncodeFn = fn(&Value) -> Result<Vec<u8>, binform::DecodeError>;
type DecodeFn = fn(&[u8]) -> Result<Value, binform::DecodeError>;

const FORMATS: [(&str, EncodeFn, DecodeFn); 4] = [
    ("CBOR", cbor::encode, cbor::decode),
    ("MessagePack", msgpack::encode, msgpack::decode),
    ("UBJSON", ubjson::encode, ubjson::decode),
    ("BSON", bson::encode, bson::decode),
];

fn bench_format(
    name: &str,
    encode: EncodeFn,
    decode: DecodeFn,
    document: &Value,
) -> Vec<u8> {
    let encode_start = Instant::now();
    let encoded = encode(document).expect("encode failed");
    let encode_time = encode_start.elapsed();

    println!("\n{name}: {} bytes encoded in {:?}", encoded.len(), encode_time);
    println!(
        "  Encode throughput: {:.2} MB/s",
        (encoded.len() as f64 / 1_000_000.0) / encode_time.as_secs_f64()
    );

    // Warmup
    for _ in 0..3 {
        let _ = decode(&encoded).expect("decode failed");
    }

    let decode_start = Instant::now();
    let mut decoded = None;
    for _ in 0..DECODE_ITERS {
        decoded = Some(decode(&encoded).expect("decode failed"));
    }
    let decode_time = decode_start.elapsed() / DECODE_ITERS;
    let decoded = decoded.expect("no decode iterations ran");

    println!(
        "  Decode: {:?} (avg of {} iterations), {:.2} MB/s",
        decode_time,
        DECODE_ITERS,
        (encoded.len() as f64 / 1_000_000.0) / decode_time.as_secs_f64()
    );
    assert_eq!(&decoded, document, "{name} round trip diverged");

    encoded
}

/// Walks every event of the MessagePack encoding without building a tree.
fn bench_cursor_scan(bytes: &[u8]) {
    for _ in 0..3 {
        let _ = scan_events(bytes);
    }
    let start = Instant::now();
    let mut events = 0u64;
    for _ in 0..DECODE_ITERS {
        events = scan_events(bytes);
    }
    let scan_time = start.elapsed() / DECODE_ITERS;

    println!(
        "\nCursor scan (MessagePack): {events} events in {:?} (avg of {} iterations)",
        scan_time, DECODE_ITERS
    );
    println!(
        "  Throughput: {:.2} MB/s",
        (bytes.len() as f64 / 1_000_000.0) / scan_time.as_secs_f64()
    );
}

fn scan_events(bytes: &[u8]) -> u64 {
    let mut cursor =
        Cursor::new(MsgpackParser::new(SliceSource::new(bytes))).expect("cursor failed");
    let mut events = 0u64;
    while !cursor.done() {
        events += 1;
        cursor.next().expect("cursor advance failed");
    }
    events
}

/// Streams CBOR input straight into a MessagePack encoder, no tree.
fn bench_transcode(cbor_bytes: &[u8]) {
    let start = Instant::now();
    let mut out_len = 0;
    for _ in 0..DECODE_ITERS {
        let mut parser = CborParser::new(SliceSource::new(cbor_bytes));
        let mut encoder = MsgpackEncoder::new();
        parser.parse_all(&mut encoder).expect("transcode failed");
        out_len = encoder.into_bytes().len();
    }
    let transcode_time = start.elapsed() / DECODE_ITERS;

    println!(
        "\nTranscode CBOR -> MessagePack: {out_len} bytes in {:?} (avg of {} iterations)",
        transcode_time, DECODE_ITERS
    );
    println!(
        "  Throughput: {:.2} MB/s",
        (cbor_bytes.len() as f64 / 1_000_000.0) / transcode_time.as_secs_f64()
    );
}

fn main() {
    let count: usize = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(10_000);

    println!("Generating {count} synthetic records");
    let records = make_records(count);

    // JSON baseline on the identical records
    let json_start = Instant::now();
    let json = serde_json::to_vec(&records).expect("JSON encode failed");
    let json_encode_time = json_start.elapsed();

    for _ in 0..3 {
        let _: serde_json::Value = serde_json::from_slice(&json).expect("JSON decode failed");
    }
    let json_decode_start = Instant::now();
    for _ in 0..DECODE_ITERS {
        let _: serde_json::Value = serde_json::from_slice(&json).expect("JSON decode failed");
    }
    let json_decode_time = json_decode_start.elapsed() / DECODE_ITERS;

    println!(
        "\nJSON baseline: {} bytes, encode {:?}, decode {:?} (avg of {} iterations)",
        json.len(),
        json_encode_time,
        json_decode_time,
        DECODE_ITERS
    );

    let build_start = Instant::now();
    let document = records_to_value(&records);
    println!("Built value tree in {:?}", build_start.elapsed());

    let mut sizes = Vec::new();
    let mut cbor_bytes = Vec::new();
    let mut msgpack_bytes = Vec::new();
    for (name, encode, decode) in FORMATS {
        let encoded = bench_format(name, encode, decode, &document);
        if name == "CBOR" {
            cbor_bytes = encoded.clone();
        }
        if name == "MessagePack" {
            msgpack_bytes = encoded.clone();
        }
        sizes.push((name, encoded.len()));
    }

    bench_cursor_scan(&msgpack_bytes);
    bench_transcode(&cbor_bytes);

    // Summary
    println!("\n=== Summary ===");
    println!("Records: {count}");
    println!(
        "JSON size: {} bytes ({:.1} MB)",
        json.len(),
        json.len() as f64 / 1_000_000.0
    );
    for (name, size) in sizes {
        println!(
            "{name}: {size} bytes ({:.1}% of JSON)",
            100.0 * size as f64 / json.len() as f64
        );
    }
}
