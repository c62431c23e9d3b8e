// Copyright 2024-2026 The Varve Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The commit index.
//!
//! A commit is the logical content of one revision: a columnar description of
//! every segment constituting a collection at that point, one row per
//! `(label, [start, stop])` range. Rows are sorted by `(label, start)` and
//! never overlap within a label.
//!
//! The overlay `update` is the heart of history here: writing a new range
//! re-expresses coverage by clipping the boundary rows of the previous commit
//! and weakening their closure tags, without ever touching stored column
//! blobs. A deleted range is the same operation with no replacement row.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::codec;
use crate::error::StoreError;
use crate::error::StoreResult;
use crate::frame::Closed;
use crate::frame::Column;
use crate::frame::Value;
use crate::frame::bound_max;
use crate::frame::bound_min;
use crate::frame::cmp_prefix;
use crate::object_id::DIGEST_LEN;
use crate::object_id::Digest;
use crate::pod::ScopedPod;
use crate::schema::DataType;
use crate::schema::Schema;
use crate::segment::Segment;

const KEY_START: &str = "start";
const KEY_STOP: &str = "stop";
const KEY_DIGEST: &str = "digest";
const KEY_LENGTH: &str = "length";
const KEY_CLOSED: &str = "closed";
const KEY_LABEL: &str = "label";
const KEY_EMBEDDED: &str = "embedded";

/// One row of a commit, extracted by value.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitRow {
    pub label: String,
    pub start: Vec<Value>,
    pub stop: Vec<Value>,
    pub digests: Vec<Digest>,
    pub length: u64,
    pub closed: Closed,
}

fn key_cmp(label_a: &str, tuple_a: &[Value], label_b: &str, tuple_b: &[Value]) -> Ordering {
    label_a
        .cmp(label_b)
        .then_with(|| tuple_a.cmp(tuple_b))
}

/// Columnar index of the segments constituting one revision.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    schema: Schema,
    label: Vec<String>,
    start: Vec<Column>,
    stop: Vec<Column>,
    digest: Vec<Vec<Digest>>,
    length: Vec<u64>,
    closed: Vec<Closed>,
    embedded: BTreeMap<Digest, Vec<u8>>,
    // Unknown wire keys, preserved verbatim on re-encode.
    extra: Vec<(rmpv::Value, rmpv::Value)>,
}

impl Commit {
    pub fn empty(schema: Schema) -> Self {
        let start = schema.idx().map(|def| Column::empty(def.dtype)).collect();
        let stop = schema.idx().map(|def| Column::empty(def.dtype)).collect();
        let digest = schema.columns().map(|_| vec![]).collect();
        Self {
            schema,
            label: vec![],
            start,
            stop,
            digest,
            length: vec![],
            closed: vec![],
            embedded: BTreeMap::new(),
            extra: vec![],
        }
    }

    /// Builds a length-1 commit.
    pub fn one(schema: Schema, row: CommitRow) -> Self {
        let mut commit = Self::empty(schema);
        commit.push(row);
        commit.debug_check();
        commit
    }

    fn push(&mut self, row: CommitRow) {
        debug_assert_eq!(row.digests.len(), self.schema.len());
        debug_assert_eq!(row.start.len(), self.schema.idx_len());
        self.label.push(row.label);
        for (column, value) in self.start.iter_mut().zip(row.start) {
            column.push(value);
        }
        for (column, value) in self.stop.iter_mut().zip(row.stop) {
            column.push(value);
        }
        for (digests, digest) in self.digest.iter_mut().zip(row.digests) {
            digests.push(digest);
        }
        self.length.push(row.length);
        self.closed.push(row.closed);
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.label.is_empty()
    }

    /// Extracts row `pos` by value.
    pub fn at(&self, pos: usize) -> CommitRow {
        CommitRow {
            label: self.label[pos].clone(),
            start: self.start.iter().map(|column| column.value(pos)).collect(),
            stop: self.stop.iter().map(|column| column.value(pos)).collect(),
            digests: self.digest.iter().map(|digests| digests[pos].clone()).collect(),
            length: self.length[pos],
            closed: self.closed[pos],
        }
    }

    fn start_tuple(&self, pos: usize) -> Vec<Value> {
        self.start.iter().map(|column| column.value(pos)).collect()
    }

    fn stop_tuple(&self, pos: usize) -> Vec<Value> {
        self.stop.iter().map(|column| column.value(pos)).collect()
    }

    /// Sorted unique labels present in this commit.
    pub fn labels(&self) -> Vec<String> {
        let set: BTreeSet<&String> = self.label.iter().collect();
        set.into_iter().cloned().collect()
    }

    /// Every blob digest referenced by this commit and not embedded in it.
    pub fn digests(&self) -> impl Iterator<Item = &Digest> {
        self.digest
            .iter()
            .flatten()
            .filter(|digest| !self.embedded.contains_key(*digest))
    }

    pub fn embedded_payload(&self, digest: &Digest) -> Option<&[u8]> {
        self.embedded.get(digest).map(Vec::as_slice)
    }

    /// The payloads carried inside this commit, keyed by digest.
    pub fn embedded(&self) -> impl Iterator<Item = (&Digest, &[u8])> {
        self.embedded
            .iter()
            .map(|(digest, payload)| (digest, payload.as_slice()))
    }

    /// Records payloads carried inside the commit instead of the blob store.
    pub fn embed(&mut self, payloads: impl IntoIterator<Item = (Digest, Vec<u8>)>) {
        self.embedded.extend(payloads);
        self.prune_embedded();
    }

    fn prune_embedded(&mut self) {
        if self.embedded.is_empty() {
            return;
        }
        let referenced: BTreeSet<&Digest> = self.digest.iter().flatten().collect();
        self.embedded = std::mem::take(&mut self.embedded)
            .into_iter()
            .filter(|(digest, _)| referenced.contains(digest))
            .collect();
    }

    pub fn slice(&self, lo: usize, hi: usize) -> Self {
        let mut sliced = Self {
            schema: self.schema.clone(),
            label: self.label[lo..hi].to_vec(),
            start: self.start.iter().map(|column| column.slice(lo, hi)).collect(),
            stop: self.stop.iter().map(|column| column.slice(lo, hi)).collect(),
            digest: self.digest.iter().map(|digests| digests[lo..hi].to_vec()).collect(),
            length: self.length[lo..hi].to_vec(),
            closed: self.closed[lo..hi].to_vec(),
            embedded: self.embedded.clone(),
            extra: self.extra.clone(),
        };
        sliced.prune_embedded();
        sliced.debug_check();
        sliced
    }

    pub fn head(&self, pos: usize) -> Self {
        self.slice(0, pos)
    }

    pub fn tail(&self, pos: usize) -> Self {
        self.slice(pos, self.len())
    }

    pub fn concat(parts: &[&Self]) -> Self {
        let first = parts[0];
        let mut merged = Self::empty(first.schema.clone());
        merged.extra = first.extra.clone();
        for part in parts {
            for pos in 0..part.len() {
                merged.push(part.at(pos));
            }
            merged.embedded.extend(
                part.embedded
                    .iter()
                    .map(|(digest, payload)| (digest.clone(), payload.clone())),
            );
        }
        merged.prune_embedded();
        merged.debug_check();
        merged
    }

    fn partition(&self, pred: impl Fn(usize) -> bool) -> usize {
        let mut lo = 0;
        let mut hi = self.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if pred(mid) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Overlays a new row onto this commit.
    ///
    /// The new row's range wins over anything it covers: boundary rows of the
    /// previous coverage are clipped to touch it and their closure weakened on
    /// the clipped side, fully covered rows disappear. Column blobs are never
    /// rewritten; coverage is the only thing that changes.
    pub fn update(&self, row: CommitRow) -> StoreResult<Self> {
        if row.start > row.stop {
            return Err(StoreError::InvalidRange {
                start: format!("{:?}", row.start),
                stop: format!("{:?}", row.stop),
            });
        }
        let inner = Self::one(self.schema.clone(), row.clone());
        if self.is_empty() {
            return Ok(inner);
        }

        let first_pos = 0;
        let last_pos = self.len() - 1;
        let covers_first = key_cmp(&row.label, &row.start, &self.label[first_pos], &self.start_tuple(first_pos))
            != Ordering::Greater;
        let covers_last = key_cmp(&row.label, &row.stop, &self.label[last_pos], &self.stop_tuple(last_pos))
            != Ordering::Less;
        if covers_first && covers_last {
            // Full overwrite
            let mut full = inner;
            full.extra = self.extra.clone();
            return Ok(full);
        }

        let start_pos = self.partition(|pos| {
            key_cmp(&self.label[pos], &self.stop_tuple(pos), &row.label, &row.start)
                == Ordering::Less
        });
        let stop_pos_right = self.partition(|pos| {
            key_cmp(&self.label[pos], &self.start_tuple(pos), &row.label, &row.stop)
                != Ordering::Greater
        });

        // Clip the row straddling the new range's start from the left: its
        // stop tightens to the new start and loses its right closure. Rows
        // fully covered by the new range fall in neither head nor tail and
        // simply disappear.
        let mut head = self.head(start_pos);
        if start_pos < self.len() {
            let mut boundary = self.at(start_pos);
            let straddles_left = boundary.label == row.label
                && boundary.start < row.start
                && boundary.stop >= row.start;
            if straddles_left {
                boundary.stop = row.start.clone();
                boundary.closed = boundary.closed.drop_right();
                head = Self::concat(&[&head, &Self::one(self.schema.clone(), boundary)]);
            }
        }

        // Symmetrically clip the row straddling the new range's stop. The
        // bisect above is an upper bound, hence the -1.
        let tail = if stop_pos_right == 0 {
            self.tail(0)
        } else {
            let stop_pos = stop_pos_right - 1;
            let mut tail = self.tail(stop_pos + 1);
            let mut boundary = self.at(stop_pos);
            let straddles_right = boundary.label == row.label
                && boundary.start <= row.stop
                && boundary.stop > row.stop;
            if straddles_right {
                boundary.start = row.stop.clone();
                boundary.closed = boundary.closed.drop_left();
                tail = Self::concat(&[&Self::one(self.schema.clone(), boundary), &tail]);
            }
            tail
        };

        let mut updated = Self::concat(&[&head, &inner, &tail]);
        // Keep payloads embedded in the superseded commit alive for any row
        // that survived the clip.
        updated.embedded.extend(
            self.embedded
                .iter()
                .map(|(digest, payload)| (digest.clone(), payload.clone())),
        );
        updated.prune_embedded();
        updated.extra = self.extra.clone();
        updated.debug_check();
        Ok(updated)
    }

    /// Returns the commit minus all rows of the given labels.
    pub fn delete_labels(&self, labels: &[&str]) -> Self {
        let mut trimmed = Self::empty(self.schema.clone());
        trimmed.extra = self.extra.clone();
        trimmed.embedded = self.embedded.clone();
        for pos in 0..self.len() {
            if !labels.contains(&self.label[pos].as_str()) {
                trimmed.push(self.at(pos));
            }
        }
        trimmed.prune_embedded();
        trimmed.debug_check();
        trimmed
    }

    /// Returns the commit with one label value rewritten. Rows are re-sorted
    /// since the label takes part in the sort key.
    pub fn rename_label(&self, from: &str, to: &str) -> Self {
        let mut rows: Vec<CommitRow> = (0..self.len()).map(|pos| self.at(pos)).collect();
        for row in &mut rows {
            if row.label == from {
                row.label = to.to_owned();
            }
        }
        rows.sort_by(|a, b| key_cmp(&a.label, &a.start, &b.label, &b.start));
        let mut renamed = Self::empty(self.schema.clone());
        renamed.extra = self.extra.clone();
        renamed.embedded = self.embedded.clone();
        for row in rows {
            renamed.push(row);
        }
        renamed.debug_check();
        renamed
    }

    /// True if an identical row (all fields) is present.
    pub fn contains(&self, row: &CommitRow) -> bool {
        (0..self.len()).any(|pos| &self.at(pos) == row)
    }

    /// Materialises the rows of `label` intersecting `[start, stop]` as lazy
    /// segments, bounds clamped to the intersection under `closed` query
    /// semantics.
    pub fn segments(
        &self,
        label: &str,
        pod: &ScopedPod,
        start: Option<&[Value]>,
        stop: Option<&[Value]>,
        closed: Closed,
    ) -> Vec<Segment> {
        (0..self.len())
            .filter(|&pos| self.label[pos] == label)
            .filter(|&pos| self.intersects(pos, start, stop))
            .map(|pos| self.segment_at(pos, pod, start, stop, closed))
            .collect()
    }

    pub(crate) fn row_positions(
        &self,
        label: &str,
        start: Option<&[Value]>,
        stop: Option<&[Value]>,
    ) -> Vec<usize> {
        (0..self.len())
            .filter(|&pos| self.label[pos] == label)
            .filter(|&pos| self.intersects(pos, start, stop))
            .collect()
    }

    pub(crate) fn intersects(
        &self,
        pos: usize,
        start: Option<&[Value]>,
        stop: Option<&[Value]>,
    ) -> bool {
        let row_start = self.start_tuple(pos);
        let row_stop = self.stop_tuple(pos);
        let after_start = match stop {
            Some(bound) => cmp_prefix(&row_start, bound) != Ordering::Greater,
            None => true,
        };
        let before_stop = match start {
            Some(bound) => cmp_prefix(&row_stop, bound) != Ordering::Less,
            None => true,
        };
        after_start && before_stop
    }

    /// Builds the lazy segment for row `pos`, clamped to the query range.
    ///
    /// At each boundary the effective closure is the row's own closure when
    /// the row bound is the binding one, the query's closure when the query
    /// bound clamps inside the row, and their conjunction when they
    /// coincide. The newer row's closure thus wins on its own boundaries
    /// while hole reads can still exclude values a newer segment owns.
    pub(crate) fn segment_at(
        &self,
        pos: usize,
        pod: &ScopedPod,
        start: Option<&[Value]>,
        stop: Option<&[Value]>,
        closed: Closed,
    ) -> Segment {
        let row_start = self.start_tuple(pos);
        let row_stop = self.stop_tuple(pos);
        let row_closed = self.closed[pos];
        let (clamped_start, include_left) = match start {
            None => (row_start, row_closed.include_left()),
            Some(bound) => match cmp_prefix(&row_start, bound) {
                Ordering::Greater => (row_start, row_closed.include_left()),
                Ordering::Less => (bound.to_vec(), closed.include_left()),
                Ordering::Equal => (
                    bound_max(&row_start, bound).to_vec(),
                    row_closed.include_left() && closed.include_left(),
                ),
            },
        };
        let (clamped_stop, include_right) = match stop {
            None => (row_stop, row_closed.include_right()),
            Some(bound) => match cmp_prefix(&row_stop, bound) {
                Ordering::Less => (row_stop, row_closed.include_right()),
                Ordering::Greater => (bound.to_vec(), closed.include_right()),
                Ordering::Equal => (
                    bound_min(&row_stop, bound).to_vec(),
                    row_closed.include_right() && closed.include_right(),
                ),
            },
        };
        let digests: Vec<Digest> = self.digest.iter().map(|digests| digests[pos].clone()).collect();
        let payloads = digests
            .iter()
            .map(|digest| self.embedded.get(digest).cloned())
            .collect();
        Segment::new(
            self.schema.clone(),
            pod.clone(),
            digests,
            payloads,
            clamped_start,
            clamped_stop,
            Closed::from_flags(include_left, include_right),
        )
    }

    /// Encodes the commit as its wire payload.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        use rmpv::Value as Mp;
        let column_map = |columns: &[Column], idx_only: bool| -> StoreResult<Mp> {
            let defs = self.schema.columns().filter(|def| !idx_only || def.index);
            let mut entries = vec![];
            for (def, column) in defs.zip(columns) {
                let payload = codec::encode_payload(column, &def.codec)?;
                entries.push((Mp::from(def.name.as_str()), Mp::from(payload)));
            }
            Ok(Mp::Map(entries))
        };

        let digest_map = {
            let mut entries = vec![];
            for (def, digests) in self.schema.columns().zip(&self.digest) {
                let mut bytes = Vec::with_capacity(digests.len() * DIGEST_LEN);
                for digest in digests {
                    bytes.extend_from_slice(digest.as_bytes());
                }
                entries.push((Mp::from(def.name.as_str()), Mp::from(bytes)));
            }
            Mp::Map(entries)
        };
        let length_bytes: Vec<u8> = self.length.iter().flat_map(|v| v.to_le_bytes()).collect();
        let closed_bytes: Vec<u8> = self.closed.iter().map(|closed| closed.tag()).collect();
        let label_column = Column::Str(self.label.clone());

        let mut entries = vec![
            (Mp::from(KEY_START), column_map(&self.start, true)?),
            (Mp::from(KEY_STOP), column_map(&self.stop, true)?),
            (Mp::from(KEY_DIGEST), digest_map),
            (Mp::from(KEY_LENGTH), Mp::from(length_bytes)),
            (Mp::from(KEY_CLOSED), Mp::from(closed_bytes)),
            (Mp::from(KEY_LABEL), Mp::from(codec::encode_column(&label_column))),
        ];
        if !self.embedded.is_empty() {
            let embedded = self
                .embedded
                .iter()
                .map(|(digest, payload)| {
                    (Mp::from(digest.as_bytes().to_vec()), Mp::from(payload.clone()))
                })
                .collect();
            entries.push((Mp::from(KEY_EMBEDDED), Mp::Map(embedded)));
        }
        entries.extend(self.extra.iter().cloned());

        let mut out = vec![];
        rmpv::encode::write_value(&mut out, &rmpv::Value::Array(vec![rmpv::Value::Map(entries)]))
            .map_err(|err| StoreError::CorruptPayload(format!("msgpack encode: {err}")))?;
        Ok(out)
    }

    /// Decodes a wire payload against `schema`.
    pub fn decode(schema: &Schema, payload: &[u8]) -> StoreResult<Self> {
        let corrupt = |reason: &str| StoreError::CorruptPayload(format!("bad commit: {reason}"));
        let mut rest = payload;
        let value = rmpv::decode::read_value(&mut rest)
            .map_err(|err| StoreError::CorruptPayload(format!("msgpack decode: {err}")))?;
        let array = value.as_array().ok_or_else(|| corrupt("not an array"))?;
        let map = array
            .first()
            .and_then(rmpv::Value::as_map)
            .ok_or_else(|| corrupt("missing map"))?;

        let find = |key: &str| {
            map.iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v)
        };
        let field_bytes = |key: &str| {
            find(key)
                .and_then(rmpv::Value::as_slice)
                .ok_or_else(|| corrupt(&format!("missing field {key}")))
        };
        let column_map = |key: &str, idx_only: bool| -> StoreResult<Vec<Column>> {
            let entries = find(key)
                .and_then(rmpv::Value::as_map)
                .ok_or_else(|| corrupt(&format!("missing field {key}")))?;
            let defs = schema.columns().filter(|def| !idx_only || def.index);
            let mut columns = vec![];
            for def in defs {
                let bytes = entries
                    .iter()
                    .find(|(k, _)| k.as_str() == Some(&def.name))
                    .and_then(|(_, v)| v.as_slice())
                    .ok_or_else(|| corrupt(&format!("missing column {}", def.name)))?;
                columns.push(codec::decode_payload(def.dtype, &def.codec, bytes)?);
            }
            Ok(columns)
        };

        let start = column_map(KEY_START, true)?;
        let stop = column_map(KEY_STOP, true)?;

        let digest_entries = find(KEY_DIGEST)
            .and_then(rmpv::Value::as_map)
            .ok_or_else(|| corrupt("missing field digest"))?;
        let mut digest = vec![];
        for def in schema.columns() {
            let bytes = digest_entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(&def.name))
                .and_then(|(_, v)| v.as_slice())
                .ok_or_else(|| corrupt(&format!("missing digests for {}", def.name)))?;
            if bytes.len() % DIGEST_LEN != 0 {
                return Err(corrupt("truncated digest array"));
            }
            digest.push(
                bytes
                    .chunks_exact(DIGEST_LEN)
                    .map(|chunk| Digest::from_bytes(chunk).unwrap())
                    .collect::<Vec<_>>(),
            );
        }

        let length_bytes = field_bytes(KEY_LENGTH)?;
        if length_bytes.len() % 8 != 0 {
            return Err(corrupt("truncated length array"));
        }
        let length: Vec<u64> = length_bytes
            .chunks_exact(8)
            .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap()))
            .collect();

        let closed = field_bytes(KEY_CLOSED)?
            .iter()
            .map(|&tag| Closed::from_tag(tag).ok_or_else(|| corrupt("bad closure tag")))
            .collect::<StoreResult<Vec<_>>>()?;

        let label = match codec::decode_column(DataType::Str, field_bytes(KEY_LABEL)?)? {
            Column::Str(values) => values,
            _ => unreachable!(),
        };

        let mut embedded = BTreeMap::new();
        if let Some(entries) = find(KEY_EMBEDDED).and_then(rmpv::Value::as_map) {
            for (key, value) in entries {
                let digest = key
                    .as_slice()
                    .and_then(Digest::from_bytes)
                    .ok_or_else(|| corrupt("bad embedded digest"))?;
                let payload = value.as_slice().ok_or_else(|| corrupt("bad embedded payload"))?;
                embedded.insert(digest, payload.to_vec());
            }
        }

        let known = [
            KEY_START,
            KEY_STOP,
            KEY_DIGEST,
            KEY_LENGTH,
            KEY_CLOSED,
            KEY_LABEL,
            KEY_EMBEDDED,
        ];
        let extra = map
            .iter()
            .filter(|(k, _)| !k.as_str().is_some_and(|key| known.contains(&key)))
            .cloned()
            .collect();

        let n = label.len();
        let commit = Self {
            schema: schema.clone(),
            label,
            start,
            stop,
            digest,
            length,
            closed,
            embedded,
            extra,
        };
        if commit.start.iter().chain(&commit.stop).any(|column| column.len() != n)
            || commit.digest.iter().any(|digests| digests.len() != n)
            || commit.length.len() != n
            || commit.closed.len() != n
        {
            return Err(corrupt("unequal array lengths"));
        }
        commit.debug_check();
        Ok(commit)
    }

    fn debug_check(&self) {
        #[cfg(debug_assertions)]
        {
            let n = self.len();
            assert!(self.start.iter().all(|column| column.len() == n));
            assert!(self.stop.iter().all(|column| column.len() == n));
            assert!(self.digest.iter().all(|digests| digests.len() == n));
            assert_eq!(self.length.len(), n);
            assert_eq!(self.closed.len(), n);
            for pos in 0..n {
                let start = self.start_tuple(pos);
                let stop = self.stop_tuple(pos);
                assert!(start <= stop, "row {pos} has start > stop");
                if start == stop {
                    assert_eq!(self.closed[pos], Closed::Both, "empty range must be closed");
                }
                if pos > 0 {
                    assert!(
                        key_cmp(
                            &self.label[pos - 1],
                            &self.stop_tuple(pos - 1),
                            &self.label[pos],
                            &start,
                        ) != Ordering::Greater,
                        "rows {} and {} overlap",
                        pos - 1,
                        pos
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::schema::SchemaKind;

    fn schema() -> Schema {
        Schema::tabular(["ts int64*", "value float64"]).unwrap()
    }

    fn row(label: &str, start: i64, stop: i64, closed: Closed) -> CommitRow {
        CommitRow {
            label: label.to_owned(),
            start: vec![Value::Int(start)],
            stop: vec![Value::Int(stop)],
            digests: vec![Digest::of(b"ts"), Digest::of(b"value")],
            length: (stop - start + 1) as u64,
            closed,
        }
    }

    fn ranges(commit: &Commit) -> Vec<(i64, i64, Closed)> {
        (0..commit.len())
            .map(|pos| {
                let row = commit.at(pos);
                let Value::Int(start) = row.start[0] else { panic!() };
                let Value::Int(stop) = row.stop[0] else { panic!() };
                (start, stop, row.closed)
            })
            .collect()
    }

    #[test]
    fn test_update_on_empty() {
        let commit = Commit::empty(schema());
        let updated = commit.update(row("a", 1, 5, Closed::Both)).unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(ranges(&updated), vec![(1, 5, Closed::Both)]);
    }

    #[test]
    fn test_update_full_overwrite() {
        let commit = Commit::one(schema(), row("a", 1, 5, Closed::Both));
        let commit = commit.update(row("a", 6, 9, Closed::Both)).unwrap();
        let covering = row("a", 0, 10, Closed::Both);
        let updated = commit.update(covering.clone()).unwrap();
        assert_eq!(updated, Commit::one(schema(), covering));
    }

    #[test]
    fn test_update_clips_straddling_row() {
        let commit = Commit::one(schema(), row("a", 1, 10, Closed::Both));
        let updated = commit.update(row("a", 3, 7, Closed::Both)).unwrap();
        assert_eq!(
            ranges(&updated),
            vec![
                (1, 3, Closed::Left),
                (3, 7, Closed::Both),
                (7, 10, Closed::Right),
            ]
        );
    }

    #[test]
    fn test_update_weakens_closure_per_table() {
        // left clip: right -> neither
        let commit = Commit::one(schema(), row("a", 1, 10, Closed::Right));
        let updated = commit.update(row("a", 5, 12, Closed::Both)).unwrap();
        assert_eq!(
            ranges(&updated),
            vec![(1, 5, Closed::Neither), (5, 12, Closed::Both)]
        );

        // right clip: left -> neither
        let commit = Commit::one(schema(), row("a", 1, 10, Closed::Left));
        let updated = commit.update(row("a", 0, 5, Closed::Both)).unwrap();
        assert_eq!(
            ranges(&updated),
            vec![(0, 5, Closed::Both), (5, 10, Closed::Neither)]
        );
    }

    #[test]
    fn test_update_swallows_covered_rows() {
        let commit = Commit::one(schema(), row("a", 1, 5, Closed::Both));
        let commit = commit.update(row("a", 5, 9, Closed::Both)).unwrap();
        assert_eq!(
            ranges(&commit),
            vec![(1, 5, Closed::Left), (5, 9, Closed::Both)]
        );
        // [1,5] is fully covered now and disappears; [5,9] is clipped
        let updated = commit.update(row("a", 1, 7, Closed::Both)).unwrap();
        assert_eq!(
            ranges(&updated),
            vec![(1, 7, Closed::Both), (7, 9, Closed::Right)]
        );
    }

    #[test]
    fn test_update_middle_rows_disappear() {
        let commit = Commit::one(schema(), row("a", 1, 2, Closed::Both));
        let commit = commit.update(row("a", 3, 4, Closed::Both)).unwrap();
        let commit = commit.update(row("a", 5, 6, Closed::Both)).unwrap();
        let commit = commit.update(row("a", 7, 8, Closed::Both)).unwrap();
        let updated = commit.update(row("a", 2, 7, Closed::Both)).unwrap();
        assert_eq!(
            ranges(&updated),
            vec![
                (1, 2, Closed::Left),
                (2, 7, Closed::Both),
                (7, 8, Closed::Right),
            ]
        );
    }

    #[test]
    fn test_update_is_idempotent() {
        let commit = Commit::one(schema(), row("a", 1, 10, Closed::Both));
        let once = commit.update(row("a", 3, 7, Closed::Both)).unwrap();
        let twice = once.update(row("a", 3, 7, Closed::Both)).unwrap();
        assert_eq!(ranges(&once), ranges(&twice));
    }

    #[test]
    fn test_update_respects_labels() {
        let commit = Commit::one(schema(), row("a", 1, 10, Closed::Both));
        let updated = commit.update(row("b", 3, 7, Closed::Both)).unwrap();
        // Different label: row "a" must not be clipped
        assert_eq!(
            ranges(&updated),
            vec![(1, 10, Closed::Both), (3, 7, Closed::Both)]
        );
        assert_eq!(updated.labels(), vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn test_update_rejects_inverted_range() {
        let commit = Commit::empty(schema());
        assert_matches!(
            commit.update(row("a", 5, 4, Closed::Both)),
            Err(StoreError::InvalidRange { .. })
        );
    }

    #[test]
    fn test_delete_and_rename_labels() {
        let commit = Commit::one(schema(), row("a", 1, 5, Closed::Both));
        let commit = commit.update(row("z", 1, 5, Closed::Both)).unwrap();

        let trimmed = commit.delete_labels(&["a"]);
        assert_eq!(trimmed.labels(), vec!["z".to_owned()]);

        // Renaming re-sorts: "z" -> "b" moves before nothing, but "a" stays first
        let renamed = commit.rename_label("z", "b");
        assert_eq!(renamed.labels(), vec!["a".to_owned(), "b".to_owned()]);
        let renamed = commit.rename_label("a", "zz");
        assert_eq!(renamed.labels(), vec!["z".to_owned(), "zz".to_owned()]);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let schema = schema();
        let commit = Commit::one(schema.clone(), row("a", 1, 10, Closed::Both));
        let mut commit = commit.update(row("b", 0, 4, Closed::Left)).unwrap();
        commit.embed([(Digest::of(b"ts"), b"tiny payload".to_vec())]);

        let payload = commit.encode().unwrap();
        let decoded = Commit::decode(&schema, &payload).unwrap();
        assert_eq!(decoded, commit);
    }

    #[test]
    fn test_decode_preserves_unknown_keys() {
        let schema = schema();
        let commit = Commit::one(schema.clone(), row("a", 1, 10, Closed::Both));
        let payload = commit.encode().unwrap();

        // Re-encode with a foreign key injected, as a future writer might
        let mut rest = payload.as_slice();
        let value = rmpv::decode::read_value(&mut rest).unwrap();
        let rmpv::Value::Array(mut array) = value else { panic!() };
        let rmpv::Value::Map(mut entries) = array.remove(0) else { panic!() };
        entries.push((
            rmpv::Value::from("x-annotation"),
            rmpv::Value::from(b"opaque".to_vec()),
        ));
        let mut tagged = vec![];
        rmpv::encode::write_value(
            &mut tagged,
            &rmpv::Value::Array(vec![rmpv::Value::Map(entries)]),
        )
        .unwrap();

        let decoded = Commit::decode(&schema, &tagged).unwrap();
        assert_eq!(decoded.encode().unwrap(), tagged);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_matches!(
            Commit::decode(&schema(), b"junk"),
            Err(StoreError::CorruptPayload(_))
        );
    }

    #[test]
    fn test_kv_schema_commit() {
        let schema = Schema::kv(["label str*", "meta str"]).unwrap();
        assert_eq!(schema.kind(), SchemaKind::Kv);
        let row = CommitRow {
            label: "registry".to_owned(),
            start: vec![Value::Str("a".to_owned())],
            stop: vec![Value::Str("z".to_owned())],
            digests: vec![Digest::of(b"k"), Digest::of(b"v")],
            length: 2,
            closed: Closed::Both,
        };
        let commit = Commit::one(schema.clone(), row);
        let decoded = Commit::decode(&schema, &commit.encode().unwrap()).unwrap();
        assert_eq!(decoded, commit);
    }
}
