//! Pack format codec: a tagged, self-describing binary value stream. Every
//! function is bounds-checked against the end of the slice it is handed;
//! nothing here panics on malformed input, nothing unwinds.
//!
//! Wire compatibility with MessagePack is intentional (so the outer
//! envelopes in [`crate::rowio`] and the wire buffers produced by
//! [`crate::merger`] can be read by any MessagePack-speaking client); marker
//! bytes are taken from [`rmp::Marker`], matching how `msgpack::skip_value`
//! dispatches on the same enum elsewhere in the ecosystem.

use super::value::{Ext, Value};
use rmp::Marker;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated pack-format value: needed {needed} more byte(s)")]
    Truncated { needed: usize },
    #[error("invalid pack-format header byte 0x{0:02x}")]
    InvalidHeader(u8),
    #[error("unexpected pack-format type: expected {expected}, found {found}")]
    UnexpectedType {
        expected: &'static str,
        found: &'static str,
    },
    #[error("string payload is not valid utf-8")]
    InvalidUtf8,
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("value does not fit in the target encoding")]
    Overflow,
}

fn marker_name(m: Marker) -> &'static str {
    use Marker::*;
    match m {
        FixPos(_) | U8 | U16 | U32 | U64 => "uint",
        FixNeg(_) | I8 | I16 | I32 | I64 => "int",
        Null => "nil",
        True | False => "bool",
        F32 => "f32",
        F64 => "f64",
        FixStr(_) | Str8 | Str16 | Str32 => "str",
        Bin8 | Bin16 | Bin32 => "bin",
        FixArray(_) | Array16 | Array32 => "array",
        FixMap(_) | Map16 | Map32 => "map",
        FixExt1 | FixExt2 | FixExt4 | FixExt8 | FixExt16 | Ext8 | Ext16 | Ext32 => "ext",
        Reserved => "reserved",
    }
}

#[inline]
fn take<'a>(buf: &'a [u8], n: usize) -> Result<(&'a [u8], &'a [u8]), DecodeError> {
    if buf.len() < n {
        return Err(DecodeError::Truncated {
            needed: n - buf.len(),
        });
    }
    Ok(buf.split_at(n))
}

#[inline]
fn marker(buf: &[u8]) -> Result<(Marker, &[u8]), DecodeError> {
    let (&byte, rest) = buf
        .split_first()
        .ok_or(DecodeError::Truncated { needed: 1 })?;
    Ok((Marker::from_u8(byte), rest))
}

fn expect(found: Marker, expected: &'static str) -> DecodeError {
    DecodeError::UnexpectedType {
        expected,
        found: marker_name(found),
    }
}

/// Decode an unsigned length/count prefix that followed `m`, of `width`
/// bytes, big-endian.
fn read_be_len(buf: &[u8], width: usize) -> Result<(u32, &[u8]), DecodeError> {
    let (bytes, rest) = take(buf, width)?;
    let mut acc: u32 = 0;
    for &b in bytes {
        acc = (acc << 8) | b as u32;
    }
    Ok((acc, rest))
}

/// Decode the next unsigned integer. Canonical encoders only ever produce
/// the smallest width that fits, but decoders accept any valid width.
pub fn decode_uint(buf: &[u8]) -> Result<(u64, &[u8]), DecodeError> {
    let (m, rest) = marker(buf)?;
    match m {
        Marker::FixPos(v) => Ok((v as u64, rest)),
        Marker::U8 => {
            let (b, r) = take(rest, 1)?;
            Ok((b[0] as u64, r))
        }
        Marker::U16 => {
            let (n, r) = read_be_len(rest, 2)?;
            Ok((n as u64, r))
        }
        Marker::U32 => {
            let (n, r) = read_be_len(rest, 4)?;
            Ok((n as u64, r))
        }
        Marker::U64 => {
            let (b, r) = take(rest, 8)?;
            let mut acc = 0u64;
            for &byte in b {
                acc = (acc << 8) | byte as u64;
            }
            Ok((acc, r))
        }
        other => Err(expect(other, "uint")),
    }
}

/// Decode the next signed integer, accepting both signed and unsigned
/// encodings (a non-negative value canonically encodes as unsigned).
pub fn decode_int(buf: &[u8]) -> Result<(i64, &[u8]), DecodeError> {
    let (m, rest) = marker(buf)?;
    match m {
        Marker::FixPos(v) => Ok((v as i64, rest)),
        Marker::FixNeg(v) => Ok((v as i64, rest)),
        Marker::U8 => {
            let (b, r) = take(rest, 1)?;
            Ok((b[0] as i64, r))
        }
        Marker::I8 => {
            let (b, r) = take(rest, 1)?;
            Ok((b[0] as i8 as i64, r))
        }
        Marker::U16 => {
            let (n, r) = read_be_len(rest, 2)?;
            Ok((n as i64, r))
        }
        Marker::I16 => {
            let (n, r) = read_be_len(rest, 2)?;
            Ok((n as i16 as i64, r))
        }
        Marker::U32 => {
            let (n, r) = read_be_len(rest, 4)?;
            Ok((n as i64, r))
        }
        Marker::I32 => {
            let (n, r) = read_be_len(rest, 4)?;
            Ok((n as i32 as i64, r))
        }
        Marker::U64 => {
            let (b, r) = take(rest, 8)?;
            let mut acc = 0u64;
            for &byte in b {
                acc = (acc << 8) | byte as u64;
            }
            Ok((acc as i64, r))
        }
        Marker::I64 => {
            let (b, r) = take(rest, 8)?;
            let mut acc = 0u64;
            for &byte in b {
                acc = (acc << 8) | byte as u64;
            }
            Ok((acc as i64, r))
        }
        other => Err(expect(other, "int")),
    }
}

pub fn decode_str(buf: &[u8]) -> Result<(&str, &[u8]), DecodeError> {
    let (m, rest) = marker(buf)?;
    let (len, rest) = match m {
        Marker::FixStr(n) => (n as u32, rest),
        Marker::Str8 => {
            let (b, r) = take(rest, 1)?;
            (b[0] as u32, r)
        }
        Marker::Str16 => read_be_len(rest, 2)?,
        Marker::Str32 => read_be_len(rest, 4)?,
        other => return Err(expect(other, "str")),
    };
    let (bytes, rest) = take(rest, len as usize)?;
    let s = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
    Ok((s, rest))
}

pub fn decode_bin(buf: &[u8]) -> Result<(&[u8], &[u8]), DecodeError> {
    let (m, rest) = marker(buf)?;
    let (len, rest) = match m {
        Marker::Bin8 => {
            let (b, r) = take(rest, 1)?;
            (b[0] as u32, r)
        }
        Marker::Bin16 => read_be_len(rest, 2)?,
        Marker::Bin32 => read_be_len(rest, 4)?,
        other => return Err(expect(other, "bin")),
    };
    take(rest, len as usize)
}

pub fn decode_array_header(buf: &[u8]) -> Result<(u32, &[u8]), DecodeError> {
    let (m, rest) = marker(buf)?;
    match m {
        Marker::FixArray(n) => Ok((n as u32, rest)),
        Marker::Array16 => read_be_len(rest, 2),
        Marker::Array32 => read_be_len(rest, 4),
        other => Err(expect(other, "array")),
    }
}

pub fn decode_map_header(buf: &[u8]) -> Result<(u32, &[u8]), DecodeError> {
    let (m, rest) = marker(buf)?;
    match m {
        Marker::FixMap(n) => Ok((n as u32, rest)),
        Marker::Map16 => read_be_len(rest, 2),
        Marker::Map32 => read_be_len(rest, 4),
        other => Err(expect(other, "map")),
    }
}

fn ext_payload_len(m: Marker, rest: &[u8]) -> Result<(i8, u32, &[u8]), DecodeError> {
    Ok(match m {
        Marker::FixExt1 => {
            let (b, r) = take(rest, 1)?;
            (b[0] as i8, 1, r)
        }
        Marker::FixExt2 => {
            let (b, r) = take(rest, 1)?;
            (b[0] as i8, 2, r)
        }
        Marker::FixExt4 => {
            let (b, r) = take(rest, 1)?;
            (b[0] as i8, 4, r)
        }
        Marker::FixExt8 => {
            let (b, r) = take(rest, 1)?;
            (b[0] as i8, 8, r)
        }
        Marker::FixExt16 => {
            let (b, r) = take(rest, 1)?;
            (b[0] as i8, 16, r)
        }
        Marker::Ext8 => {
            let (len, r) = read_be_len(rest, 1)?;
            let (b, r) = take(r, 1)?;
            (b[0] as i8, len, r)
        }
        Marker::Ext16 => {
            let (len, r) = read_be_len(rest, 2)?;
            let (b, r) = take(r, 1)?;
            (b[0] as i8, len, r)
        }
        Marker::Ext32 => {
            let (len, r) = read_be_len(rest, 4)?;
            let (b, r) = take(r, 1)?;
            (b[0] as i8, len, r)
        }
        other => return Err(expect(other, "ext")),
    })
}

/// Validate one value's encoding without materializing it. Returns the
/// number of bytes it occupies.
pub fn check(buf: &[u8]) -> Result<usize, DecodeError> {
    let start_len = buf.len();
    let rest = skip(buf)?;
    Ok(start_len - rest.len())
}

/// Skip exactly one encoded value, returning the remaining slice.
pub fn skip(buf: &[u8]) -> Result<&[u8], DecodeError> {
    let (m, rest) = marker(buf)?;
    Ok(match m {
        Marker::FixPos(_)
        | Marker::FixNeg(_)
        | Marker::Null
        | Marker::True
        | Marker::False => rest,
        Marker::U8 | Marker::I8 => take(rest, 1)?.1,
        Marker::U16 | Marker::I16 => take(rest, 2)?.1,
        Marker::U32 | Marker::I32 | Marker::F32 => take(rest, 4)?.1,
        Marker::U64 | Marker::I64 | Marker::F64 => take(rest, 8)?.1,
        Marker::FixStr(n) => take(rest, n as usize)?.1,
        Marker::Str8 | Marker::Bin8 => {
            let (len, r) = read_be_len(rest, 1)?;
            take(r, len as usize)?.1
        }
        Marker::Str16 | Marker::Bin16 => {
            let (len, r) = read_be_len(rest, 2)?;
            take(r, len as usize)?.1
        }
        Marker::Str32 | Marker::Bin32 => {
            let (len, r) = read_be_len(rest, 4)?;
            take(r, len as usize)?.1
        }
        Marker::FixArray(n) => {
            let mut r = rest;
            for _ in 0..n {
                r = skip(r)?;
            }
            r
        }
        Marker::Array16 | Marker::Array32 => {
            let (n, mut r) = if m == Marker::Array16 {
                read_be_len(rest, 2)?
            } else {
                read_be_len(rest, 4)?
            };
            for _ in 0..n {
                r = skip(r)?;
            }
            r
        }
        Marker::FixMap(n) => {
            let mut r = rest;
            for _ in 0..(n as u32 * 2) {
                r = skip(r)?;
            }
            r
        }
        Marker::Map16 | Marker::Map32 => {
            let (n, mut r) = if m == Marker::Map16 {
                read_be_len(rest, 2)?
            } else {
                read_be_len(rest, 4)?
            };
            for _ in 0..(n * 2) {
                r = skip(r)?;
            }
            r
        }
        Marker::FixExt1
        | Marker::FixExt2
        | Marker::FixExt4
        | Marker::FixExt8
        | Marker::FixExt16
        | Marker::Ext8
        | Marker::Ext16
        | Marker::Ext32 => {
            let (_kind, len, r) = ext_payload_len(m, rest)?;
            take(r, len as usize)?.1
        }
        Marker::Reserved => return Err(DecodeError::InvalidHeader(0xc1)),
    })
}

/// Decode exactly one value, returning it plus the remaining slice.
pub fn decode(buf: &[u8]) -> Result<(Value<'_>, &[u8]), DecodeError> {
    let (m, rest) = marker(buf)?;
    Ok(match m {
        Marker::Null => (Value::Nil, rest),
        Marker::True => (Value::Bool(true), rest),
        Marker::False => (Value::Bool(false), rest),
        Marker::FixPos(_) | Marker::U8 | Marker::U16 | Marker::U32 | Marker::U64 => {
            let (v, r) = decode_uint(buf)?;
            (Value::UInt(v), r)
        }
        Marker::FixNeg(_) | Marker::I8 | Marker::I16 | Marker::I32 | Marker::I64 => {
            let (v, r) = decode_int(buf)?;
            (Value::Int(v), r)
        }
        Marker::F32 => {
            let (b, r) = take(rest, 4)?;
            let arr: [u8; 4] = b.try_into().unwrap();
            (Value::F32(f32::from_be_bytes(arr)), r)
        }
        Marker::F64 => {
            let (b, r) = take(rest, 8)?;
            let arr: [u8; 8] = b.try_into().unwrap();
            (Value::F64(f64::from_be_bytes(arr)), r)
        }
        Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => {
            let (s, r) = decode_str(buf)?;
            (Value::Str(s), r)
        }
        Marker::Bin8 | Marker::Bin16 | Marker::Bin32 => {
            let (b, r) = decode_bin(buf)?;
            (Value::Bin(b), r)
        }
        Marker::FixArray(_) | Marker::Array16 | Marker::Array32 => {
            let (n, mut r) = decode_array_header(buf)?;
            let mut items = Vec::with_capacity(n as usize);
            for _ in 0..n {
                let (v, r2) = decode(r)?;
                items.push(v);
                r = r2;
            }
            (Value::Array(items), r)
        }
        Marker::FixMap(_) | Marker::Map16 | Marker::Map32 => {
            let (n, mut r) = decode_map_header(buf)?;
            let mut items = Vec::with_capacity(n as usize);
            for _ in 0..n {
                let (k, r2) = decode(r)?;
                let (v, r3) = decode(r2)?;
                items.push((k, v));
                r = r3;
            }
            (Value::Map(items), r)
        }
        Marker::FixExt1
        | Marker::FixExt2
        | Marker::FixExt4
        | Marker::FixExt8
        | Marker::FixExt16
        | Marker::Ext8
        | Marker::Ext16
        | Marker::Ext32 => {
            let (kind, len, r) = ext_payload_len(m, rest)?;
            let (data, r) = take(r, len as usize)?;
            (Value::Ext(Ext { kind, data }), r)
        }
        Marker::Reserved => return Err(DecodeError::InvalidHeader(0xc1)),
    })
}

/// Number of bytes `value` will occupy once encoded canonically.
pub fn size_of(value: &Value) -> usize {
    match value {
        Value::Nil | Value::Bool(_) => 1,
        Value::UInt(v) => size_of_uint(*v),
        Value::Int(v) => size_of_int(*v),
        Value::F32(_) => 5,
        Value::F64(_) => 9,
        Value::Str(s) => size_of_len_prefix(s.len()) + s.len(),
        Value::Bin(b) => size_of_bin_prefix(b.len()) + b.len(),
        Value::Array(items) => {
            size_of_container_prefix(items.len()) + items.iter().map(size_of).sum::<usize>()
        }
        Value::Map(items) => {
            size_of_container_prefix(items.len())
                + items
                    .iter()
                    .map(|(k, v)| size_of(k) + size_of(v))
                    .sum::<usize>()
        }
        Value::Ext(e) => size_of_ext_prefix(e.data.len()) + e.data.len(),
    }
}

fn size_of_uint(v: u64) -> usize {
    if v < 0x80 {
        1
    } else if v <= u8::MAX as u64 {
        2
    } else if v <= u16::MAX as u64 {
        3
    } else if v <= u32::MAX as u64 {
        5
    } else {
        9
    }
}

fn size_of_int(v: i64) -> usize {
    if v >= 0 {
        return size_of_uint(v as u64);
    }
    if v >= -32 {
        1
    } else if v >= i8::MIN as i64 {
        2
    } else if v >= i16::MIN as i64 {
        3
    } else if v >= i32::MIN as i64 {
        5
    } else {
        9
    }
}

fn size_of_len_prefix(len: usize) -> usize {
    if len <= 31 {
        1
    } else if len <= u8::MAX as usize {
        2
    } else if len <= u16::MAX as usize {
        3
    } else {
        5
    }
}

fn size_of_bin_prefix(len: usize) -> usize {
    if len <= u8::MAX as usize {
        2
    } else if len <= u16::MAX as usize {
        3
    } else {
        5
    }
}

fn size_of_container_prefix(len: usize) -> usize {
    if len <= 15 {
        1
    } else if len <= u16::MAX as usize {
        3
    } else {
        5
    }
}

fn size_of_ext_prefix(len: usize) -> usize {
    match len {
        1 | 2 | 4 | 8 | 16 => 2,
        _ if len <= u8::MAX as usize => 3,
        _ if len <= u16::MAX as usize => 4,
        _ => 6,
    }
}

fn push_be_len(out: &mut Vec<u8>, len: usize, width: usize) {
    let bytes = (len as u64).to_be_bytes();
    out.extend_from_slice(&bytes[8 - width..]);
}

/// Encode `value` in canonical (smallest) width, appending to `out`.
pub fn encode(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Nil => out.push(0xc0),
        Value::Bool(false) => out.push(0xc2),
        Value::Bool(true) => out.push(0xc3),
        Value::UInt(v) => encode_uint(*v, out),
        Value::Int(v) => encode_int(*v, out),
        Value::F32(v) => {
            out.push(0xca);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Value::F64(v) => {
            out.push(0xcb);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Value::Str(s) => {
            encode_str_header(s.len(), out);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Bin(b) => {
            encode_bin_header(b.len(), out);
            out.extend_from_slice(b);
        }
        Value::Array(items) => {
            encode_array_header(items.len() as u32, out);
            for item in items {
                encode(item, out);
            }
        }
        Value::Map(items) => {
            encode_map_header(items.len() as u32, out);
            for (k, v) in items {
                encode(k, out);
                encode(v, out);
            }
        }
        Value::Ext(e) => {
            encode_ext_header(e.kind, e.data.len(), out);
            out.extend_from_slice(e.data);
        }
    }
}

fn encode_uint(v: u64, out: &mut Vec<u8>) {
    if v < 0x80 {
        out.push(v as u8);
    } else if v <= u8::MAX as u64 {
        out.push(0xcc);
        out.push(v as u8);
    } else if v <= u16::MAX as u64 {
        out.push(0xcd);
        push_be_len(out, v as usize, 2);
    } else if v <= u32::MAX as u64 {
        out.push(0xce);
        push_be_len(out, v as usize, 4);
    } else {
        out.push(0xcf);
        out.extend_from_slice(&v.to_be_bytes());
    }
}

fn encode_int(v: i64, out: &mut Vec<u8>) {
    if v >= 0 {
        return encode_uint(v as u64, out);
    }
    if v >= -32 {
        out.push(v as i8 as u8);
    } else if v >= i8::MIN as i64 {
        out.push(0xd0);
        out.push(v as i8 as u8);
    } else if v >= i16::MIN as i64 {
        out.push(0xd1);
        out.extend_from_slice(&(v as i16).to_be_bytes());
    } else if v >= i32::MIN as i64 {
        out.push(0xd2);
        out.extend_from_slice(&(v as i32).to_be_bytes());
    } else {
        out.push(0xd3);
        out.extend_from_slice(&v.to_be_bytes());
    }
}

fn encode_str_header(len: usize, out: &mut Vec<u8>) {
    if len <= 31 {
        out.push(0xa0 | len as u8);
    } else if len <= u8::MAX as usize {
        out.push(0xd9);
        out.push(len as u8);
    } else if len <= u16::MAX as usize {
        out.push(0xda);
        push_be_len(out, len, 2);
    } else {
        out.push(0xdb);
        push_be_len(out, len, 4);
    }
}

fn encode_bin_header(len: usize, out: &mut Vec<u8>) {
    if len <= u8::MAX as usize {
        out.push(0xc4);
        out.push(len as u8);
    } else if len <= u16::MAX as usize {
        out.push(0xc5);
        push_be_len(out, len, 2);
    } else {
        out.push(0xc6);
        push_be_len(out, len, 4);
    }
}

pub fn encode_array_header(len: u32, out: &mut Vec<u8>) {
    let len = len as usize;
    if len <= 15 {
        out.push(0x90 | len as u8);
    } else if len <= u16::MAX as usize {
        out.push(0xdc);
        push_be_len(out, len, 2);
    } else {
        out.push(0xdd);
        push_be_len(out, len, 4);
    }
}

pub fn encode_map_header(len: u32, out: &mut Vec<u8>) {
    let len = len as usize;
    if len <= 15 {
        out.push(0x80 | len as u8);
    } else if len <= u16::MAX as usize {
        out.push(0xde);
        push_be_len(out, len, 2);
    } else {
        out.push(0xdf);
        push_be_len(out, len, 4);
    }
}

fn encode_ext_header(kind: i8, len: usize, out: &mut Vec<u8>) {
    match len {
        1 => out.push(0xd4),
        2 => out.push(0xd5),
        4 => out.push(0xd6),
        8 => out.push(0xd7),
        16 => out.push(0xd8),
        _ if len <= u8::MAX as usize => {
            out.push(0xc7);
            out.push(len as u8);
        }
        _ if len <= u16::MAX as usize => {
            out.push(0xc8);
            push_be_len(out, len, 2);
        }
        _ => {
            out.push(0xc9);
            push_be_len(out, len, 4);
        }
    }
    out.push(kind as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: Value) {
        let mut buf = Vec::new();
        encode(&v, &mut buf);
        assert_eq!(size_of(&v), buf.len());
        let (decoded, rest) = decode(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, v);
    }

    #[test]
    fn roundtrip_scalars() {
        roundtrip(Value::Nil);
        roundtrip(Value::Bool(true));
        roundtrip(Value::Bool(false));
        roundtrip(Value::UInt(0));
        roundtrip(Value::UInt(127));
        roundtrip(Value::UInt(128));
        roundtrip(Value::UInt(70_000));
        roundtrip(Value::UInt(u64::MAX));
        roundtrip(Value::Int(-1));
        roundtrip(Value::Int(-33));
        roundtrip(Value::Int(i64::MIN));
        roundtrip(Value::F32(1.5));
        roundtrip(Value::F64(-2.25));
    }

    #[test]
    fn roundtrip_strings_and_bins() {
        roundtrip(Value::Str(""));
        roundtrip(Value::Str("hello, world"));
        roundtrip(Value::Str(&"x".repeat(1000)));
        roundtrip(Value::Bin(&[1, 2, 3, 4, 5]));
    }

    #[test]
    fn roundtrip_containers() {
        roundtrip(Value::Array(vec![Value::UInt(1), Value::UInt(2), Value::UInt(3)]));
        roundtrip(Value::Map(vec![(Value::Str("a"), Value::UInt(1))]));
        roundtrip(Value::Array(vec![]));
    }

    #[test]
    fn canonical_widths_are_smallest() {
        let mut buf = Vec::new();
        encode(&Value::UInt(10), &mut buf);
        assert_eq!(buf, vec![10]);
        let mut buf = Vec::new();
        encode(&Value::Int(-1), &mut buf);
        assert_eq!(buf, vec![0xff]);
    }

    #[test]
    fn truncated_input_is_an_error() {
        let mut buf = Vec::new();
        encode(&Value::Str("hello"), &mut buf);
        buf.truncate(buf.len() - 1);
        assert!(matches!(decode(&buf), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn unexpected_type_is_distinguishable() {
        let mut buf = Vec::new();
        encode(&Value::Str("x"), &mut buf);
        assert!(matches!(
            decode_uint(&buf),
            Err(DecodeError::UnexpectedType { .. })
        ));
    }

    #[test]
    fn skip_matches_check_length() {
        let mut buf = Vec::new();
        encode(&Value::Array(vec![Value::UInt(1), Value::Str("ab")]), &mut buf);
        let n = check(&buf).unwrap();
        assert_eq!(n, buf.len());
        let rest = skip(&buf).unwrap();
        assert!(rest.is_empty());
    }
}
