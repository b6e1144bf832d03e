//! Simple decoder to inspect binary interchange files.
//!
//! Picks the format from the file extension, decodes through a buffered
//! stream source, and prints a structural summary.

use std::fs::File;
use std::path::Path;

use binform::codec::{bson, cbor, msgpack, ubjson};
use binform::{DecodeOptions, ReadSource, Tag, Value};

fn format_value(v: &Value) -> String {
    let rendered = match v {
        Value::Null(_) => "null".to_string(),
        Value::Bool(b) => format!("{b}"),
        Value::Int(i, _) => format!("{i}"),
        Value::UInt(u, _) => format!("{u}"),
        Value::Double(d, _) => format!("{d:.6}"),
        Value::Str(s, _) => {
            let preview: String = s.chars().take(60).collect();
            if s.chars().count() > 60 {
                format!("\"{preview}...\"")
            } else {
                format!("\"{preview}\"")
            }
        }
        Value::Bytes(b, _) => format!("BYTES[{}]", b.len()),
        Value::Bignum { negative, magnitude } => {
            format!("BIGNUM(neg={negative}, {} bytes)", magnitude.len())
        }
        Value::Array(items) => format!("ARRAY[{}]", items.len()),
        Value::Object(members) => format!("OBJECT[{}]", members.len()),
    };
    match v.tag() {
        Tag::None => rendered,
        tag => format!("{rendered} ({tag:?})"),
    }
}

#[derive(Default)]
struct Stats {
    objects: usize,
    arrays: usize,
    strings: usize,
    integers: usize,
    doubles: usize,
    bools: usize,
    nulls: usize,
    byte_strings: usize,
    bignums: usize,
    max_depth: usize,
}

fn walk(value: &Value, depth: usize, stats: &mut Stats) {
    stats.max_depth = stats.max_depth.max(depth);
    match value {
        Value::Object(members) => {
            stats.objects += 1;
            for (_, child) in members {
                walk(child, depth + 1, stats);
            }
        }
        Value::Array(items) => {
            stats.arrays += 1;
            for child in items {
                walk(child, depth + 1, stats);
            }
        }
        Value::Str(..) => stats.strings += 1,
        Value::Int(..) | Value::UInt(..) => stats.integers += 1,
        Value::Double(..) => stats.doubles += 1,
        Value::Bool(_) => stats.bools += 1,
        Value::Null(_) => stats.nulls += 1,
        Value::Bytes(..) => stats.byte_strings += 1,
        Value::Bignum { .. } => stats.bignums += 1,
    }
}

fn print_preview(value: &Value, indent: usize, budget: &mut usize) {
    if *budget == 0 {
        return;
    }
    *budget -= 1;
    let pad = "  ".repeat(indent);
    match value {
        Value::Object(members) => {
            for (key, child) in members.iter().take(10) {
                println!("{pad}{key} = {}", format_value(child));
                if matches!(child, Value::Object(_) | Value::Array(_)) {
                    print_preview(child, indent + 1, budget);
                }
            }
            if members.len() > 10 {
                println!("{pad}... and {} more members", members.len() - 10);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().take(10).enumerate() {
                println!("{pad}[{i}] {}", format_value(child));
                if matches!(child, Value::Object(_) | Value::Array(_)) {
                    print_preview(child, indent + 1, budget);
                }
            }
            if items.len() > 10 {
                println!("{pad}... and {} more items", items.len() - 10);
            }
        }
        other => println!("{pad}{}", format_value(other)),
    }
}

fn main() {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "sample.cbor".to_string());

    println!("Reading: {path}");

    let extension = Path::new(&path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let file = File::open(&path).expect("Failed to open file");
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    println!("File size: {size} bytes");

    let source = ReadSource::new(file);
    let options = DecodeOptions::default();
    let value = match extension.as_str() {
        "cbor" => cbor::decode_from(source, options),
        "msgpack" | "mp" => msgpack::decode_from(source, options),
        "ubjson" | "ubj" => ubjson::decode_from(source, options),
        "bson" => bson::decode_from(source, options),
        other => {
            eprintln!("Unknown extension {other:?}; expected cbor, msgpack, ubjson, or bson");
            std::process::exit(2);
        }
    };

    let value = match value {
        Ok(value) => value,
        Err(err) => {
            eprintln!("Decode failed: {err}");
            std::process::exit(1);
        }
    };

    let mut stats = Stats::default();
    walk(&value, 0, &mut stats);

    println!("\n=== Structure ===");
    println!("Root: {}", format_value(&value));
    println!("Max depth: {}", stats.max_depth);
    println!("Objects: {}", stats.objects);
    println!("Arrays: {}", stats.arrays);
    println!("Strings: {}", stats.strings);
    println!("Integers: {}", stats.integers);
    println!("Doubles: {}", stats.doubles);
    println!("Booleans: {}", stats.bools);
    println!("Nulls: {}", stats.nulls);
    println!("Byte strings: {}", stats.byte_strings);
    println!("Big numbers: {}", stats.bignums);

    println!("\n=== Preview ===");
    let mut budget = 40;
    print_preview(&value, 0, &mut budget);
}
