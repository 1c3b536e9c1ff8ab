//! Canonical CBOR reader.

use std::cmp::Ordering;

use crate::error::{CodecError, CodecResult};
use crate::value::{canonical_key_order, Value};

/// Upper bound on array and map entry counts.
const MAX_ENTRIES: u64 = 1 << 24;

/// Upper bound on byte and text string lengths.
const MAX_LENGTH: u64 = 1 << 28;

/// Maximum nesting of arrays and maps.
const MAX_DEPTH: usize = 128;

/// Decode exactly one canonical value from `bytes`.
///
/// Rejects anything [`to_canonical_bytes`](crate::to_canonical_bytes) would
/// not produce: non-shortest heads, unsorted or duplicate map keys,
/// indefinite lengths, floats, tags and trailing input.
pub fn from_canonical_bytes(bytes: &[u8]) -> CodecResult<Value> {
    let mut reader = Reader { data: bytes, pos: 0 };
    let value = reader.read_value(0)?;
    let remaining = bytes.len() - reader.pos;
    if remaining > 0 {
        return Err(CodecError::TrailingBytes { remaining });
    }
    Ok(value)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(CodecError::UnexpectedEof { offset: self.pos })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read the argument that follows an initial byte, enforcing shortest form.
    fn argument(&mut self, info: u8) -> CodecResult<u64> {
        let (value, floor) = match info {
            0..=23 => return Ok(u64::from(info)),
            24 => (u64::from(self.byte()?), 24),
            25 => {
                let b = self.take(2)?;
                (u64::from(u16::from_be_bytes([b[0], b[1]])), 0x100)
            }
            26 => {
                let b = self.take(4)?;
                (
                    u64::from(u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
                    0x1_0000,
                )
            }
            27 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(self.take(8)?);
                (u64::from_be_bytes(buf), 0x1_0000_0000)
            }
            31 => return Err(CodecError::IndefiniteLength),
            _ => return Err(CodecError::unsupported("reserved additional info")),
        };
        if value < floor {
            return Err(CodecError::non_canonical("argument not in shortest form"));
        }
        Ok(value)
    }

    fn length(&mut self, info: u8, limit: u64) -> CodecResult<usize> {
        let claimed = self.argument(info)?;
        if claimed > limit {
            return Err(CodecError::SizeLimitExceeded { claimed, limit });
        }
        usize::try_from(claimed).map_err(|_| CodecError::IntegerOverflow)
    }

    fn read_value(&mut self, depth: usize) -> CodecResult<Value> {
        if depth > MAX_DEPTH {
            return Err(CodecError::unsupported("nesting too deep"));
        }
        let initial = self.byte()?;
        let info = initial & 0x1f;
        match initial >> 5 {
            0 => {
                let n = self.argument(info)?;
                i64::try_from(n)
                    .map(Value::Integer)
                    .map_err(|_| CodecError::IntegerOverflow)
            }
            1 => {
                let n = self.argument(info)?;
                let n = i64::try_from(n).map_err(|_| CodecError::IntegerOverflow)?;
                Ok(Value::Integer(-1 - n))
            }
            2 => {
                let len = self.length(info, MAX_LENGTH)?;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            3 => {
                let len = self.length(info, MAX_LENGTH)?;
                let raw = self.take(len)?;
                let text = std::str::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8)?;
                Ok(Value::Text(text.to_string()))
            }
            4 => {
                let len = self.length(info, MAX_ENTRIES)?;
                let mut items = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    items.push(self.read_value(depth + 1)?);
                }
                Ok(Value::Array(items))
            }
            5 => self.read_map(info, depth),
            6 => Err(CodecError::unsupported("tagged item")),
            _ => match info {
                20 => Ok(Value::Bool(false)),
                21 => Ok(Value::Bool(true)),
                22 => Ok(Value::Null),
                25..=27 => Err(CodecError::FloatForbidden),
                31 => Err(CodecError::IndefiniteLength),
                other => Err(CodecError::unsupported(format!("simple value {other}"))),
            },
        }
    }

    fn read_map(&mut self, info: u8, depth: usize) -> CodecResult<Value> {
        let len = self.length(info, MAX_ENTRIES)?;
        let mut pairs = Vec::with_capacity(len.min(1024));
        let mut previous: Option<&'a [u8]> = None;
        for _ in 0..len {
            let start = self.pos;
            let key = self.read_value(depth + 1)?;
            let data = self.data;
            let raw_key = &data[start..self.pos];
            if let Some(prev) = previous {
                if canonical_key_order(prev, raw_key) != Ordering::Less {
                    return Err(CodecError::non_canonical(
                        "map keys unsorted or duplicated",
                    ));
                }
            }
            previous = Some(raw_key);
            let value = self.read_value(depth + 1)?;
            pairs.push((key, value));
        }
        Ok(Value::Map(pairs))
    }
}
