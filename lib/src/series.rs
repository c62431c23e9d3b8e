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

//! Label-scoped views over a collection.
//!
//! A series is one label's typed, versioned, range-indexed table. Reads run
//! the hole-filling range planner over the revision history: the newest
//! revision covering a range is authoritative, and whatever it leaves
//! uncovered is recursively filled from older revisions. Writes encode and
//! store column blobs first, then publish one revision referencing them.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::batch::Batch;
use crate::changelog::Revision;
use crate::codec;
use crate::collection::Collection;
use crate::commit::Commit;
use crate::error::StoreError;
use crate::error::StoreResult;
use crate::frame::Closed;
use crate::frame::Frame;
use crate::frame::Value;
use crate::frame::cmp_prefix;
use crate::hex_util;
use crate::object_id::Digest;
use crate::pod::Pod as _;
use crate::pod::ScopedPod;

/// Frames at or below this many rows ride inside the commit itself instead
/// of the blob store.
pub(crate) const EMBED_MAX_ROWS: usize = 32;

/// A label within a collection.
#[derive(Debug)]
pub struct Series<'a> {
    collection: &'a Collection,
    label: String,
}

impl<'a> Series<'a> {
    pub(crate) fn new(collection: &'a Collection, label: String) -> Self {
        Self { collection, label }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn collection(&self) -> &'a Collection {
        self.collection
    }

    /// The whole series as one frame.
    pub fn frame(&self) -> StoreResult<Frame> {
        self.read(None, None, None)
    }

    /// Reads `[start, stop]` (both ends inclusive, partial index tuples
    /// allowed, `None` unbounded), truncated to `limit` rows if given.
    pub fn read(
        &self,
        start: Option<&[Value]>,
        stop: Option<&[Value]>,
        limit: Option<usize>,
    ) -> StoreResult<Frame> {
        let schema = self.collection.schema();
        // Commits are cumulative, so only the leaf-most revision of each
        // branch matters: one leaf on a linear history, several while
        // writers have diverged. A single log() call pins the snapshot;
        // revisions appearing later do not affect this read.
        let leaves = self.collection.changelog().leaves()?;
        let mut commits = Vec::with_capacity(leaves.len());
        for revision in leaves.iter().rev() {
            commits.push(Commit::decode(schema, &revision.payload()?)?);
        }
        let pod = self.collection.blob_pod();
        let mut remaining = limit.map(|limit| limit as i64);
        let frames = self.plan(&commits, &pod, start, stop, Closed::Both, &mut remaining)?;
        let parts: Vec<&Frame> = frames.iter().collect();
        let mut frame = if parts.is_empty() {
            Frame::empty(schema.clone())
        } else {
            Frame::concat(schema, &parts)?
        };
        if let Some(limit) = limit
            && frame.len() > limit
        {
            frame = frame.slice(0, limit);
        }
        Ok(frame)
    }

    /// Recursive range planner over `commits`, newest first.
    ///
    /// The first commit with matching rows owns the range: its rows become
    /// segments, and the holes around them (left of the first row, between
    /// rows, right of the last) are read from the remaining, older commits.
    /// Hole boundaries exclude values the bounding segments already cover.
    fn plan(
        &self,
        commits: &[Commit],
        pod: &ScopedPod,
        start: Option<&[Value]>,
        stop: Option<&[Value]>,
        closed: Closed,
        remaining: &mut Option<i64>,
    ) -> StoreResult<Vec<Frame>> {
        for (pos, commit) in commits.iter().enumerate() {
            let rows = commit.row_positions(&self.label, start, stop);
            if rows.is_empty() {
                continue;
            }
            let older = &commits[pos + 1..];
            let mut frames = vec![];
            let mut cursor: Option<Vec<Value>> = start.map(<[Value]>::to_vec);
            let mut cursor_open = closed.include_left();
            for row_pos in rows {
                let segment = commit.segment_at(row_pos, pod, start, stop, closed);
                let gap = match &cursor {
                    None => true,
                    Some(bound) => cmp_prefix(bound, segment.start()) != Ordering::Greater,
                };
                if gap {
                    let hole_closed =
                        Closed::from_flags(cursor_open, !segment.closed().include_left());
                    frames.extend(self.plan(
                        older,
                        pod,
                        cursor.as_deref(),
                        Some(segment.start()),
                        hole_closed,
                        remaining,
                    )?);
                }
                let frame = segment.frame()?.clone();
                if let Some(rem) = remaining.as_mut() {
                    *rem -= frame.len() as i64;
                }
                cursor = Some(segment.stop().to_vec());
                cursor_open = !segment.closed().include_right();
                frames.push(frame);
                if matches!(remaining, Some(rem) if *rem <= 0) {
                    return Ok(frames);
                }
            }
            let gap = match (&cursor, stop) {
                (Some(bound), Some(stop)) => cmp_prefix(bound, stop) != Ordering::Greater,
                _ => true,
            };
            if gap {
                let hole_closed = Closed::from_flags(cursor_open, closed.include_right());
                frames.extend(self.plan(
                    older,
                    pod,
                    cursor.as_deref(),
                    stop,
                    hole_closed,
                    remaining,
                )?);
            }
            // The newest matching commit has authoritatively covered the
            // range; older ones only contributed through the holes.
            return Ok(frames);
        }
        Ok(vec![])
    }

    /// Writes `frame`, publishing one revision. Unsorted frames are sorted
    /// first.
    pub fn write(&self, frame: Frame) -> StoreResult<Vec<Revision>> {
        let mut batch = self.collection.batch();
        self.write_bounded(&mut batch, frame, None, None)?;
        batch.flush()
    }

    /// Writes `frame` as part of `batch`; blobs are stored now, the revision
    /// is published when the batch flushes.
    pub fn write_in(&self, batch: &mut Batch<'_>, frame: Frame) -> StoreResult<()> {
        self.write_bounded(batch, frame, None, None)
    }

    /// Write with explicitly widened coverage bounds (used by the kv overlay
    /// to shadow removed keys).
    pub(crate) fn write_bounded(
        &self,
        batch: &mut Batch<'_>,
        frame: Frame,
        start: Option<Vec<Value>>,
        stop: Option<Vec<Value>>,
    ) -> StoreResult<()> {
        let schema = self.collection.schema();
        if frame.schema() != schema {
            return Err(StoreError::SchemaMismatch(format!(
                "frame does not conform to the schema of collection {:?}",
                self.collection.label()
            )));
        }
        let frame = frame.sorted();
        let (Some(start), Some(stop)) = (
            start.or_else(|| frame.start()),
            stop.or_else(|| frame.stop()),
        ) else {
            // Empty frame and no explicit coverage: nothing to record
            return Ok(());
        };

        // Blobs go out before any metadata referencing them
        let embed = frame.len() <= EMBED_MAX_ROWS;
        let pod = self.collection.blob_pod();
        let mut digests = vec![];
        let mut embedded = vec![];
        for (def, column) in schema.columns().zip(frame.columns()) {
            let payload = codec::encode_payload(column, &def.codec)?;
            let digest = Digest::of(&payload);
            if embed {
                embedded.push((digest.clone(), payload));
            } else {
                pod.write(&hex_util::hashed_key(&digest.hex()), &payload)?;
            }
            digests.push(digest);
        }

        batch.append(
            self.label.clone(),
            start,
            stop,
            digests,
            frame.len() as u64,
            embedded,
        );
        Ok(())
    }

    /// Successive frames of at most `step` rows covering the whole series.
    pub fn paginate(&self, step: usize) -> StoreResult<impl Iterator<Item = Frame>> {
        assert!(step > 0);
        let frame = self.frame()?;
        let total = frame.len();
        Ok((0..total.max(1))
            .step_by(step)
            .map(move |lo| frame.slice(lo, total.min(lo + step)))
            .filter(|chunk| !chunk.is_empty()))
    }

    /// Removes this series from the collection's leaf commit. Blobs are left
    /// for GC.
    pub fn delete(&self) -> StoreResult<Vec<Revision>> {
        self.collection.delete(&[&self.label])
    }
}

/// Last-write-wins map behaviour over a kv-kind series; the repository
/// registry is the main client.
pub struct KvSeries<'a> {
    series: Series<'a>,
}

impl<'a> KvSeries<'a> {
    pub(crate) fn new(series: Series<'a>) -> Self {
        Self { series }
    }

    pub fn frame(&self) -> StoreResult<Frame> {
        self.series.frame()
    }

    pub fn read(
        &self,
        start: Option<&[Value]>,
        stop: Option<&[Value]>,
    ) -> StoreResult<Frame> {
        self.series.read(start, stop, None)
    }

    /// Overlays `frame` onto the existing map: rows win by index tuple, and
    /// the commit re-covers the union of old and new bounds so stale rows
    /// stay shadowed.
    pub fn write(&self, frame: Frame) -> StoreResult<Vec<Revision>> {
        let frame = frame.sorted();
        if frame.is_empty() {
            return Ok(vec![]);
        }
        let existing = self.series.frame()?;
        if existing.is_empty() {
            return self.series.write(frame);
        }

        let schema = self.series.collection().schema();
        let mut rows: BTreeMap<Vec<Value>, Vec<Value>> = BTreeMap::new();
        for pos in 0..existing.len() {
            rows.insert(existing.index_tuple(pos), existing.row(pos));
        }
        for pos in 0..frame.len() {
            rows.insert(frame.index_tuple(pos), frame.row(pos));
        }
        let merged = Frame::from_rows(schema.clone(), rows.into_values());
        if merged == existing {
            return Ok(vec![]);
        }

        let (Some(start), Some(stop)) = (merged.start(), merged.stop()) else {
            return Ok(vec![]);
        };
        let mut batch = self.series.collection().batch();
        self.series
            .write_bounded(&mut batch, merged, Some(start), Some(stop))?;
        batch.flush()
    }

    /// Drops entries whose first index value matches one of `keys`, keeping
    /// the previous coverage so the dropped entries stay shadowed.
    pub fn delete(&self, keys: &[&str]) -> StoreResult<Vec<Revision>> {
        let existing = self.series.frame()?;
        if existing.is_empty() {
            return Ok(vec![]);
        }
        let start = existing.start();
        let stop = existing.stop();
        let surviving = (0..existing.len()).filter_map(|pos| {
            let row = existing.row(pos);
            match &row[0] {
                Value::Str(key) if keys.contains(&key.as_str()) => None,
                _ => Some(row),
            }
        });
        let trimmed = Frame::from_rows(existing.schema().clone(), surviving);
        if trimmed.len() == existing.len() {
            return Ok(vec![]);
        }
        let mut batch = self.series.collection().batch();
        self.series.write_bounded(&mut batch, trimmed, start, stop)?;
        batch.flush()
    }
}
