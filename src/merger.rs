//! Streaming k-way merger: heap-ordered merge of already-sorted row streams
//! from buffers, in-memory tables or opaque pull iterators, with an
//! optional fetch-on-drain callback for chunked sources.

use crate::collation::CollationRegistry;
use crate::error::{Error, Result};
use crate::index::IndexIterator;
use crate::keydef::{KeyDef, KeyPart, NullMode};
use crate::msgpack;
use crate::rowio::{self, Envelope};
use crate::runtime::Runtime;
use crate::tuple::{FieldDef, FieldType, Format, Tuple};
use std::cmp::Ordering;

/// A wire-format byte stream carrying a declared envelope, an array of rows
/// and a remaining-element counter.
struct BufferSource {
    data: Vec<u8>,
    pos: usize,
    remaining: u32,
    envelope: Envelope,
}

impl BufferSource {
    fn new(data: Vec<u8>, envelope: Envelope) -> Result<Self> {
        if data.is_empty() {
            return Ok(Self {
                data,
                pos: 0,
                remaining: 0,
                envelope,
            });
        }
        let (remaining, pos) = rowio::peel(&data, envelope)?;
        Ok(Self {
            data,
            pos,
            remaining,
            envelope,
        })
    }

    fn next(&mut self, format: &Format) -> Result<Option<Tuple>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let slice = &self.data[self.pos..];
        let rest = msgpack::skip(slice)?;
        let consumed = slice.len() - rest.len();
        let tuple = Tuple::new(format.clone(), &slice[..consumed])?;
        self.pos += consumed;
        self.remaining -= 1;
        Ok(Some(tuple))
    }
}

/// An ordered list indexed by 1-based position with a next-index cursor.
struct TableSource {
    tuples: Vec<Tuple>,
    pos: usize,
}

impl TableSource {
    fn next(&mut self) -> Option<Tuple> {
        let tuple = self.tuples.get(self.pos).cloned();
        if tuple.is_some() {
            self.pos += 1;
        }
        tuple
    }
}

enum SourceKind {
    Buffer(BufferSource),
    Table(TableSource),
    Iterator(Box<dyn IndexIterator>),
}

/// One of the three shapes a merger source can take.
pub enum MergerSource {
    Buffer(Vec<u8>),
    Table(Vec<Tuple>),
    Iterator(Box<dyn IndexIterator>),
}

struct SourceSlot {
    ordinal: usize,
    processed: u64,
    current: Option<Tuple>,
    last_emitted: Option<Tuple>,
    kind: SourceKind,
}

/// A callback invoked when a source drains, with `(ordinal, last_emitted,
/// processed_count)`, returning new envelope-wrapped bytes to refill the
/// source's buffer, or `None` when the source has no more data.
pub type FetchSource = Box<dyn FnMut(usize, Option<&Tuple>, u64) -> Result<Option<Vec<u8>>>>;

/// Tunables for one `select`/`pairs` invocation.
pub struct MergeOptions {
    pub descending: bool,
    pub decode_envelope: Envelope,
    pub encode_envelope: Envelope,
    pub encode_chain_len: Option<u32>,
    pub fetch_source: Option<FetchSource>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            descending: false,
            decode_envelope: Envelope::Raw,
            encode_envelope: Envelope::Raw,
            encode_chain_len: None,
            fetch_source: None,
        }
    }
}

/// A compiled key definition plus the scratch format used to wrap raw
/// buffer-source bytes as tuples for comparison purposes only.
pub struct Merger {
    key_def: KeyDef,
    format: Format,
}

impl Merger {
    /// Compiles `parts` into a key definition and registers an internal,
    /// all-`Any`/nullable/optional format wide enough to carry every key
    /// field the comparator reads.
    pub fn new(parts: Vec<KeyPart>, runtime: &Runtime) -> Result<Self> {
        let key_field_nos: Vec<u32> = parts.iter().map(|p| p.field_no).collect();
        let width = key_field_nos.iter().copied().max().map(|n| n + 1).unwrap_or(0);
        let fields: Vec<FieldDef> = (0..width)
            .map(|i| FieldDef::new(format!("f{i}"), FieldType::Any).nullable().optional())
            .collect();
        let format = runtime.formats().register(fields, &key_field_nos)?;
        Ok(Self {
            key_def: KeyDef::new(parts),
            format,
        })
    }

    /// Drains a full `pairs` iteration into a `Vec<Tuple>`, or into
    /// `options.encode_envelope`-wrapped bytes when `into_buffer` is set.
    pub fn select(
        &self,
        sources: Vec<MergerSource>,
        options: MergeOptions,
        collations: &CollationRegistry,
    ) -> Result<Vec<Tuple>> {
        let mut iter = self.pairs(sources, options, collations)?;
        let mut out = Vec::new();
        while let Some(tuple) = iter.next()? {
            out.push(tuple);
        }
        Ok(out)
    }

    /// Same as [`Merger::select`] but encodes the result under
    /// `options.encode_envelope` instead of returning tuple handles.
    pub fn select_into_buffer(
        &self,
        sources: Vec<MergerSource>,
        options: MergeOptions,
        collations: &CollationRegistry,
    ) -> Result<Vec<u8>> {
        let envelope = options.encode_envelope;
        let chain_len = options.encode_chain_len;
        let tuples = self.select(sources, options, collations)?;
        rowio::pack(&tuples, envelope, chain_len)
    }

    /// Cooperative pull iteration: builds the heap and hands back a cursor
    /// whose `next()` yields one merged tuple per call.
    pub fn pairs<'r>(
        &self,
        sources: Vec<MergerSource>,
        options: MergeOptions,
        collations: &'r CollationRegistry,
    ) -> Result<MergerIter<'r>> {
        let decode_envelope = options.decode_envelope;
        let mut slots = Vec::with_capacity(sources.len());
        for (ordinal, source) in sources.into_iter().enumerate() {
            let kind = match source {
                MergerSource::Buffer(data) => SourceKind::Buffer(BufferSource::new(data, decode_envelope)?),
                MergerSource::Table(tuples) => SourceKind::Table(TableSource { tuples, pos: 0 }),
                MergerSource::Iterator(it) => SourceKind::Iterator(it),
            };
            slots.push(SourceSlot {
                ordinal,
                processed: 0,
                current: None,
                last_emitted: None,
                kind,
            });
        }
        let mut iter = MergerIter {
            key_def: self.key_def.clone(),
            format: self.format.clone(),
            collations,
            descending: options.descending,
            decode_envelope,
            sources: slots,
            heap: Vec::new(),
            fetch_source: options.fetch_source,
        };
        for idx in 0..iter.sources.len() {
            if iter.fill_source(idx)? {
                iter.heap_push(idx)?;
            }
        }
        Ok(iter)
    }
}

/// Live cursor state for one `pairs` invocation. Not reentrant: only one
/// `next()` call may be in flight at a time.
pub struct MergerIter<'r> {
    key_def: KeyDef,
    format: Format,
    collations: &'r CollationRegistry,
    descending: bool,
    decode_envelope: Envelope,
    sources: Vec<SourceSlot>,
    heap: Vec<usize>,
    fetch_source: Option<FetchSource>,
}

impl<'r> MergerIter<'r> {
    fn advance(&mut self, idx: usize) -> Result<Option<Tuple>> {
        match &mut self.sources[idx].kind {
            SourceKind::Buffer(b) => b.next(&self.format),
            SourceKind::Table(t) => Ok(t.next()),
            SourceKind::Iterator(it) => it.next(),
        }
    }

    /// Advances a source, pulling through the `fetch_source` callback as
    /// many times as needed. Returns whether the source now holds a current
    /// tuple.
    fn fill_source(&mut self, idx: usize) -> Result<bool> {
        loop {
            if let Some(tuple) = self.advance(idx)? {
                self.sources[idx].current = Some(tuple);
                return Ok(true);
            }
            let Some(cb) = self.fetch_source.as_mut() else {
                return Ok(false);
            };
            let ordinal = self.sources[idx].ordinal;
            let processed = self.sources[idx].processed;
            let last = self.sources[idx].last_emitted.clone();
            let Some(bytes) = cb(ordinal, last.as_ref(), processed)? else {
                return Ok(false);
            };
            self.sources[idx].kind = SourceKind::Buffer(BufferSource::new(bytes, self.decode_envelope)?);
        }
    }

    fn less(&self, a: usize, b: usize) -> Result<bool> {
        let ta = self.sources[a].current.as_ref().expect("heap entries always have a current tuple");
        let tb = self.sources[b].current.as_ref().expect("heap entries always have a current tuple");
        let mut ord = self.key_def.compare(ta, tb, self.collations, NullMode::Default)?;
        if self.descending {
            ord = ord.reverse();
        }
        if ord == Ordering::Equal {
            ord = self.sources[a].ordinal.cmp(&self.sources[b].ordinal);
        }
        Ok(ord == Ordering::Less)
    }

    fn heap_push(&mut self, idx: usize) -> Result<()> {
        self.heap.push(idx);
        let mut i = self.heap.len() - 1;
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.less(self.heap[i], self.heap[parent])? {
                self.heap.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
        Ok(())
    }

    fn heap_pop(&mut self) -> Result<Option<usize>> {
        if self.heap.is_empty() {
            return Ok(None);
        }
        let top = self.heap[0];
        let last = self.heap.pop().expect("checked non-empty above");
        if !self.heap.is_empty() {
            self.heap[0] = last;
            let mut i = 0;
            loop {
                let l = 2 * i + 1;
                let r = 2 * i + 2;
                let mut smallest = i;
                if l < self.heap.len() && self.less(self.heap[l], self.heap[smallest])? {
                    smallest = l;
                }
                if r < self.heap.len() && self.less(self.heap[r], self.heap[smallest])? {
                    smallest = r;
                }
                if smallest == i {
                    break;
                }
                self.heap.swap(i, smallest);
                i = smallest;
            }
        }
        Ok(Some(top))
    }

    /// Yields the next merged tuple, or `None` once every source is
    /// exhausted (and, for buffer sources, the fetch callback has confirmed
    /// there is nothing left).
    pub fn next(&mut self) -> Result<Option<Tuple>> {
        let Some(idx) = self.heap_pop()? else {
            return Ok(None);
        };
        let result = self.sources[idx]
            .current
            .take()
            .expect("heap entries always have a current tuple");
        self.sources[idx].processed += 1;
        self.sources[idx].last_emitted = Some(result.clone());
        if self.fill_source(idx)? {
            self.heap_push(idx)?;
        }
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collation::CollationRegistry;
    use crate::index::VecIndexIterator;
    use crate::keydef::KeyPart;
    use crate::msgpack::Value;
    use crate::runtime::Runtime;
    use crate::tuple::{FieldDef, FieldType, FormatRegistry};

    fn int_tuple(format: &Format, n: i64) -> Tuple {
        let mut bytes = Vec::new();
        msgpack::encode(&Value::Array(vec![Value::Int(n)]), &mut bytes);
        Tuple::new(format.clone(), &bytes).unwrap()
    }

    fn int_format() -> Format {
        let mut reg = FormatRegistry::new();
        reg.register(vec![FieldDef::new("n", FieldType::Integer)], &[0])
            .unwrap()
    }

    fn buffer_of(values: &[i64]) -> Vec<u8> {
        let mut body = Vec::new();
        msgpack::encode_array_header(values.len() as u32, &mut body);
        for &v in values {
            msgpack::encode(&Value::Array(vec![Value::Int(v)]), &mut body);
        }
        body
    }

    fn wrapped_select(values: &[i64]) -> Vec<u8> {
        let mut out = Vec::new();
        msgpack::encode_map_header(1, &mut out);
        msgpack::encode(&Value::Str("DATA"), &mut out);
        out.extend_from_slice(&buffer_of(values));
        out
    }

    fn one_part_key() -> Vec<KeyPart> {
        vec![KeyPart::new(0, FieldType::Integer)]
    }

    // S1: single-source buffer merge.
    #[test]
    fn single_buffer_source_yields_rows_in_order() {
        let runtime = Runtime::default();
        let merger = Merger::new(one_part_key(), &runtime).unwrap();
        let collations = CollationRegistry::new();
        let sources = vec![MergerSource::Buffer(buffer_of(&[1, 2, 3]))];
        let rows = merger.select(sources, MergeOptions::default(), &collations).unwrap();
        let values: Vec<i64> = rows
            .iter()
            .map(|t| t.field(0).unwrap().unwrap().as_i64().unwrap())
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    // S2: two-source descending merge.
    #[test]
    fn two_sources_merge_descending() {
        let runtime = Runtime::default();
        let merger = Merger::new(one_part_key(), &runtime).unwrap();
        let collations = CollationRegistry::new();
        let sources = vec![
            MergerSource::Buffer(buffer_of(&[5, 3, 1])),
            MergerSource::Buffer(buffer_of(&[6, 4, 2])),
        ];
        let options = MergeOptions {
            descending: true,
            ..MergeOptions::default()
        };
        let rows = merger.select(sources, options, &collations).unwrap();
        let values: Vec<i64> = rows
            .iter()
            .map(|t| t.field(0).unwrap().unwrap().as_i64().unwrap())
            .collect();
        assert_eq!(values, vec![6, 5, 4, 3, 2, 1]);
    }

    // S3: fetch-on-drain, callback invoked exactly three times.
    #[test]
    fn fetch_on_drain_is_called_until_it_confirms_drained() {
        let runtime = Runtime::default();
        let merger = Merger::new(one_part_key(), &runtime).unwrap();
        let collations = CollationRegistry::new();
        let sources = vec![MergerSource::Buffer(Vec::new())];
        let mut chunks = vec![buffer_of(&[2]), buffer_of(&[1])];
        let mut calls = 0u32;
        let options = MergeOptions {
            fetch_source: Some(Box::new(move |_ordinal, _last, _processed| {
                calls += 1;
                Ok(chunks.pop())
            })),
            ..MergeOptions::default()
        };
        let mut iter = merger.pairs(sources, options, &collations).unwrap();
        let mut out = Vec::new();
        while let Some(t) = iter.next().unwrap() {
            out.push(t.field(0).unwrap().unwrap().as_i64().unwrap());
        }
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn fetch_on_drain_stops_after_callback_returns_none() {
        let runtime = Runtime::default();
        let merger = Merger::new(one_part_key(), &runtime).unwrap();
        let collations = CollationRegistry::new();
        let sources = vec![MergerSource::Buffer(Vec::new())];
        let mut remaining = vec![buffer_of(&[2]), buffer_of(&[1])];
        let calls = std::rc::Rc::new(std::cell::Cell::new(0u32));
        let calls_inner = calls.clone();
        let options = MergeOptions {
            fetch_source: Some(Box::new(move |_ordinal, _last, _processed| {
                calls_inner.set(calls_inner.get() + 1);
                Ok(remaining.pop())
            })),
            ..MergeOptions::default()
        };
        let rows = merger.select(sources, options, &collations).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(calls.get(), 3);
    }

    // Testable property 5: stability across sources, ties broken by ordinal.
    #[test]
    fn ties_are_broken_by_source_ordinal() {
        let runtime = Runtime::default();
        let merger = Merger::new(one_part_key(), &runtime).unwrap();
        let collations = CollationRegistry::new();
        let sources = vec![
            MergerSource::Buffer(buffer_of(&[1])),
            MergerSource::Buffer(buffer_of(&[1])),
        ];
        let rows = merger.select(sources, MergeOptions::default(), &collations).unwrap();
        assert_eq!(rows.len(), 2);
    }

    // Select and call envelopes decode the same logical tuple set.
    #[test]
    fn select_and_raw_envelopes_produce_the_same_rows() {
        let runtime = Runtime::default();
        let merger = Merger::new(one_part_key(), &runtime).unwrap();
        let collations = CollationRegistry::new();
        let raw_rows = merger
            .select(
                vec![MergerSource::Buffer(buffer_of(&[1, 2]))],
                MergeOptions::default(),
                &collations,
            )
            .unwrap();
        let options = MergeOptions {
            decode_envelope: Envelope::Select,
            ..MergeOptions::default()
        };
        let select_rows = merger
            .select(vec![MergerSource::Buffer(wrapped_select(&[1, 2]))], options, &collations)
            .unwrap();
        assert_eq!(raw_rows.len(), select_rows.len());
        for (a, b) in raw_rows.iter().zip(select_rows.iter()) {
            assert_eq!(a.data(), b.data());
        }
    }

    // Testable property 6: chained merger closure.
    #[test]
    fn chain_output_feeds_back_in_as_a_chain_input() {
        let runtime = Runtime::default();
        let merger = Merger::new(one_part_key(), &runtime).unwrap();
        let collations = CollationRegistry::new();
        let options = MergeOptions {
            encode_envelope: Envelope::Chain,
            encode_chain_len: Some(1),
            ..MergeOptions::default()
        };
        let encoded = merger
            .select_into_buffer(
                vec![
                    MergerSource::Buffer(buffer_of(&[3, 1])),
                    MergerSource::Buffer(buffer_of(&[4, 2])),
                ],
                options,
                &collations,
            )
            .unwrap();
        let decode_options = MergeOptions {
            decode_envelope: Envelope::Chain,
            ..MergeOptions::default()
        };
        let rows = merger
            .select(vec![MergerSource::Buffer(encoded)], decode_options, &collations)
            .unwrap();
        let values: Vec<i64> = rows
            .iter()
            .map(|t| t.field(0).unwrap().unwrap().as_i64().unwrap())
            .collect();
        assert_eq!(values, vec![1, 2, 3, 4]);
    }

    #[test]
    fn table_and_iterator_sources_merge_with_buffers() {
        let runtime = Runtime::default();
        let merger = Merger::new(one_part_key(), &runtime).unwrap();
        let collations = CollationRegistry::new();
        let format = int_format();
        let table = vec![int_tuple(&format, 2), int_tuple(&format, 5)];
        let iter_tuples = vec![int_tuple(&format, 1), int_tuple(&format, 4)];
        let sources = vec![
            MergerSource::Table(table),
            MergerSource::Iterator(Box::new(VecIndexIterator::new(iter_tuples))),
            MergerSource::Buffer(buffer_of(&[3])),
        ];
        let rows = merger.select(sources, MergeOptions::default(), &collations).unwrap();
        let values: Vec<i64> = rows
            .iter()
            .map(|t| t.field(0).unwrap().unwrap().as_i64().unwrap())
            .collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn malformed_envelope_is_rejected() {
        let runtime = Runtime::default();
        let merger = Merger::new(one_part_key(), &runtime).unwrap();
        let collations = CollationRegistry::new();
        let mut garbage = Vec::new();
        msgpack::encode(&Value::Int(7), &mut garbage);
        let options = MergeOptions {
            decode_envelope: Envelope::Select,
            ..MergeOptions::default()
        };
        let err = merger
            .select(vec![MergerSource::Buffer(garbage)], options, &collations)
            .unwrap_err();
        assert!(matches!(err, Error::Client { .. }));
    }
}
