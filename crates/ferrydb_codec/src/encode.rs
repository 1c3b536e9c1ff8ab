//! Canonical CBOR writer.

use crate::value::{canonical_key_order, Value};

/// Encode a value into canonical CBOR.
///
/// The output is a pure function of the value: integers and lengths take
/// their shortest form, lengths are always definite and map entries are
/// written in canonical key order even if the map was built out of order.
pub fn to_canonical_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.push(0xf6),
        Value::Bool(false) => out.push(0xf4),
        Value::Bool(true) => out.push(0xf5),
        Value::Integer(n) => write_integer(out, *n),
        Value::Bytes(b) => {
            write_head(out, 2, b.len() as u64);
            out.extend_from_slice(b);
        }
        Value::Text(s) => {
            write_head(out, 3, s.len() as u64);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Array(items) => {
            write_head(out, 4, items.len() as u64);
            for item in items {
                write_value(out, item);
            }
        }
        Value::Map(pairs) => write_map(out, pairs),
    }
}

#[allow(clippy::cast_sign_loss)]
fn write_integer(out: &mut Vec<u8>, n: i64) {
    if n >= 0 {
        write_head(out, 0, n as u64);
    } else {
        // -1 - n is non-negative for every negative i64
        write_head(out, 1, (-1 - n) as u64);
    }
}

#[allow(clippy::cast_possible_truncation)]
fn write_head(out: &mut Vec<u8>, major: u8, arg: u64) {
    let major = major << 5;
    match arg {
        0..=23 => out.push(major | arg as u8),
        24..=0xff => {
            out.push(major | 24);
            out.push(arg as u8);
        }
        0x100..=0xffff => {
            out.push(major | 25);
            out.extend_from_slice(&(arg as u16).to_be_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(major | 26);
            out.extend_from_slice(&(arg as u32).to_be_bytes());
        }
        _ => {
            out.push(major | 27);
            out.extend_from_slice(&arg.to_be_bytes());
        }
    }
}

fn write_map(out: &mut Vec<u8>, pairs: &[(Value, Value)]) {
    let mut entries: Vec<(Vec<u8>, &Value)> = pairs
        .iter()
        .map(|(k, v)| (to_canonical_bytes(k), v))
        .collect();
    entries.sort_by(|a, b| canonical_key_order(&a.0, &b.0));

    write_head(out, 5, entries.len() as u64);
    for (key, value) in entries {
        out.extend_from_slice(&key);
        write_value(out, value);
    }
}
