//! Row-I/O coordinator: packs and unpacks row batches into wire buffers
//! under the same envelope shapes the merger and the SQL wire protocol
//! share, reserving exact byte counts up front and reporting
//! `invalid envelope` with the failing layer on the read path.

use crate::error::{ClientErrorKind, Error, Result};
use crate::msgpack::{self, Value};
use crate::tuple::{Format, Tuple};

/// The wire shape a tuple array is wrapped in, or read out of.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// A bare array of tuples.
    Raw,
    /// `{ RESULT_KEY → array_of_tuples }`.
    Select,
    /// `{ RESULT_KEY → [ array_of_tuples ] }` (one extra array layer).
    Call,
    /// `{ RESULT_KEY → [ [ array_of_tuples, … ] ] }` (two extra layers).
    Chain,
}

/// The map key every non-`raw` envelope wraps its tuple array under.
pub const RESULT_KEY: &str = "DATA";

fn invalid_envelope(layer: &str) -> Error {
    Error::client(
        ClientErrorKind::InvalidMsgPack,
        format!("invalid envelope: expected {layer}"),
    )
}

/// Unwraps `envelope`'s layers off `data` and returns the declared tuple
/// count plus the byte offset the tuple array's own elements start at.
pub fn peel(data: &[u8], envelope: Envelope) -> Result<(u32, usize)> {
    let mut rest = data;
    if envelope != Envelope::Raw {
        let (n, after) = msgpack::decode_map_header(rest).map_err(|_| invalid_envelope("map"))?;
        if n != 1 {
            return Err(invalid_envelope("single-entry map"));
        }
        let (key, after) = msgpack::decode(after).map_err(|_| invalid_envelope("result key"))?;
        if key != Value::Str(RESULT_KEY) {
            return Err(invalid_envelope("result key"));
        }
        rest = after;
    }
    if matches!(envelope, Envelope::Call | Envelope::Chain) {
        let (n, after) =
            msgpack::decode_array_header(rest).map_err(|_| invalid_envelope("call wrapper"))?;
        if n == 0 {
            return Err(invalid_envelope("call wrapper"));
        }
        rest = after;
    }
    if envelope == Envelope::Chain {
        let (n, after) =
            msgpack::decode_array_header(rest).map_err(|_| invalid_envelope("chain wrapper"))?;
        if n == 0 {
            return Err(invalid_envelope("chain wrapper"));
        }
        rest = after;
    }
    let (count, after) =
        msgpack::decode_array_header(rest).map_err(|_| invalid_envelope("tuple array"))?;
    Ok((count, data.len() - after.len()))
}

/// Wraps an already-encoded `[tuple, tuple, …]` array body under `envelope`.
/// `chain_len` is mandatory when `envelope == Chain`.
pub fn wrap(tuple_array: &[u8], envelope: Envelope, chain_len: Option<u32>) -> Result<Vec<u8>> {
    if envelope == Envelope::Raw {
        return Ok(tuple_array.to_vec());
    }
    let mut out = Vec::with_capacity(header_len(1) + RESULT_KEY.len() + 1 + tuple_array.len());
    msgpack::encode_map_header(1, &mut out);
    msgpack::encode(&Value::Str(RESULT_KEY), &mut out);
    if envelope == Envelope::Chain {
        let len = chain_len.ok_or_else(|| {
            Error::client(
                ClientErrorKind::InvalidMsgPack,
                "encode_chain_len is mandatory when encode_envelope == chain",
            )
        })?;
        msgpack::encode_array_header(1, &mut out);
        msgpack::encode_array_header(len, &mut out);
        for _ in 0..len {
            out.extend_from_slice(tuple_array);
        }
        return Ok(out);
    }
    if envelope == Envelope::Call {
        msgpack::encode_array_header(1, &mut out);
    }
    out.extend_from_slice(tuple_array);
    Ok(out)
}

fn header_len(n: u32) -> usize {
    let mut probe = Vec::new();
    msgpack::encode_array_header(n, &mut probe);
    probe.len()
}

/// Packs `tuples` into a tuple-array body and wraps it under `envelope`,
/// reserving the exact byte count up front via `bsize`/header sizing.
pub fn pack(tuples: &[Tuple], envelope: Envelope, chain_len: Option<u32>) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(header_len(tuples.len() as u32) + tuples.iter().map(Tuple::bsize).sum::<usize>());
    msgpack::encode_array_header(tuples.len() as u32, &mut body);
    for tuple in tuples {
        body.extend_from_slice(tuple.data());
    }
    wrap(&body, envelope, chain_len)
}

/// Unpacks a complete wire buffer into tuples under `format`; the
/// non-cursor counterpart to [`RowCursor::unpack`] for callers that own
/// the whole buffer outright.
pub fn unpack(data: &[u8], envelope: Envelope, format: &Format) -> Result<Vec<Tuple>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let (tuples, _consumed) = unpack_at(data, envelope, format)?;
    Ok(tuples)
}

fn unpack_at(data: &[u8], envelope: Envelope, format: &Format) -> Result<(Vec<Tuple>, usize)> {
    let (n, mut pos) = peel(data, envelope)?;
    let mut out = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let slice = &data[pos..];
        let rest = msgpack::skip(slice)?;
        let consumed = slice.len() - rest.len();
        out.push(Tuple::new(format.clone(), &slice[..consumed])?);
        pos += consumed;
    }
    Ok((out, pos))
}

/// A read cursor over a wire buffer. `unpack` only advances the cursor's
/// read position on success, so a caller that retries after an error sees
/// the same buffer region it started with (spec's `move-rpos-only`
/// discipline, applied to the read side).
pub struct RowCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RowCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Decodes one envelope-wrapped tuple batch starting at the cursor's
    /// current position and advances past it. On error the cursor is left
    /// exactly where it was before the call.
    pub fn unpack(&mut self, envelope: Envelope, format: &Format) -> Result<Vec<Tuple>> {
        let (tuples, consumed) = unpack_at(self.remaining(), envelope, format)?;
        self.pos += consumed;
        Ok(tuples)
    }
}

/// A write buffer that only grows on success. `pack` either appends a
/// fully-formed envelope or leaves the buffer exactly as it was (spec's
/// `move-rpos-only` discipline, applied to the write side).
pub struct RowWriter {
    buf: Vec<u8>,
}

impl RowWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn pack(&mut self, tuples: &[Tuple], envelope: Envelope, chain_len: Option<u32>) -> Result<()> {
        let encoded = pack(tuples, envelope, chain_len)?;
        self.buf.extend_from_slice(&encoded);
        Ok(())
    }
}

impl Default for RowWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{FieldDef, FieldType, FormatRegistry};

    fn int_format() -> Format {
        let mut reg = FormatRegistry::new();
        reg.register(vec![FieldDef::new("n", FieldType::Integer)], &[0])
            .unwrap()
    }

    fn tuples(format: &Format, values: &[i64]) -> Vec<Tuple> {
        values
            .iter()
            .map(|&v| {
                let mut bytes = Vec::new();
                msgpack::encode(&Value::Array(vec![Value::Int(v)]), &mut bytes);
                Tuple::new(format.clone(), &bytes).unwrap()
            })
            .collect()
    }

    fn values_of(tuples: &[Tuple]) -> Vec<i64> {
        tuples
            .iter()
            .map(|t| t.field(0).unwrap().unwrap().as_i64().unwrap())
            .collect()
    }

    #[test]
    fn raw_round_trips() {
        let format = int_format();
        let rows = tuples(&format, &[1, 2, 3]);
        let bytes = pack(&rows, Envelope::Raw, None).unwrap();
        let back = unpack(&bytes, Envelope::Raw, &format).unwrap();
        assert_eq!(values_of(&back), vec![1, 2, 3]);
    }

    #[test]
    fn select_round_trips() {
        let format = int_format();
        let rows = tuples(&format, &[1, 2, 3]);
        let bytes = pack(&rows, Envelope::Select, None).unwrap();
        let back = unpack(&bytes, Envelope::Select, &format).unwrap();
        assert_eq!(values_of(&back), vec![1, 2, 3]);
    }

    #[test]
    fn call_round_trips() {
        let format = int_format();
        let rows = tuples(&format, &[7]);
        let bytes = pack(&rows, Envelope::Call, None).unwrap();
        let back = unpack(&bytes, Envelope::Call, &format).unwrap();
        assert_eq!(values_of(&back), vec![7]);
    }

    #[test]
    fn chain_round_trips_with_declared_length() {
        let format = int_format();
        let rows = tuples(&format, &[9]);
        let bytes = pack(&rows, Envelope::Chain, Some(1)).unwrap();
        let back = unpack(&bytes, Envelope::Chain, &format).unwrap();
        assert_eq!(values_of(&back), vec![9]);
    }

    #[test]
    fn chain_without_length_fails() {
        let format = int_format();
        let rows = tuples(&format, &[9]);
        assert!(pack(&rows, Envelope::Chain, None).is_err());
    }

    #[test]
    fn decoding_one_envelope_as_another_reports_invalid_envelope() {
        let format = int_format();
        let rows = tuples(&format, &[1]);
        let bytes = pack(&rows, Envelope::Raw, None).unwrap();
        let err = unpack(&bytes, Envelope::Select, &format).unwrap_err();
        assert!(matches!(err, Error::Client { .. }));
    }

    // Testable property 7: a failed unpack leaves the read cursor untouched.
    #[test]
    fn cursor_position_is_unchanged_after_a_failed_unpack() {
        let format = int_format();
        let rows = tuples(&format, &[1, 2]);
        let good = pack(&rows, Envelope::Select, None).unwrap();
        let mut cursor = RowCursor::new(&good);
        cursor.unpack(Envelope::Select, &format).unwrap();
        let pos_before = cursor.pos();

        let mut garbage = good.clone();
        garbage.truncate(2);
        let mut bad_cursor = RowCursor::new(&garbage);
        assert!(bad_cursor.unpack(Envelope::Select, &format).is_err());
        assert_eq!(bad_cursor.pos(), 0);
        assert_eq!(pos_before, good.len());
    }

    #[test]
    fn writer_buffer_is_untouched_after_a_failed_pack() {
        let format = int_format();
        let rows = tuples(&format, &[1]);
        let mut writer = RowWriter::new();
        writer.pack(&rows, Envelope::Raw, None).unwrap();
        let len_before = writer.len();
        assert!(writer.pack(&rows, Envelope::Chain, None).is_err());
        assert_eq!(writer.len(), len_before);
    }
}
