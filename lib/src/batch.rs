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

//! Buffered multi-series writes.
//!
//! A batch collects the metadata of many series writes and publishes them as
//! one commit payload and one revision. Blobs are stored as each write
//! happens, so the write-before-publish ordering holds for the whole batch.
//! Batches are plain values bound to the creating actor; there is no
//! process-global or thread-local state.

use crate::changelog::Revision;
use crate::collection::Collection;
use crate::commit::Commit;
use crate::commit::CommitRow;
use crate::error::StoreResult;
use crate::frame::Closed;
use crate::frame::Value;
use crate::object_id::Digest;

struct BatchEntry {
    label: String,
    start: Vec<Value>,
    stop: Vec<Value>,
    digests: Vec<Digest>,
    length: u64,
    embedded: Vec<(Digest, Vec<u8>)>,
}

/// An open batch over one collection. Obtain with [`Collection::batch`],
/// fill through [`Series::write_in`](crate::series::Series::write_in), then
/// [`flush`](Self::flush).
pub struct Batch<'a> {
    collection: &'a Collection,
    entries: Vec<BatchEntry>,
    // A root batch commits against the zero-hash sentinel instead of the
    // current leaf, rewriting history (squash).
    root: bool,
}

impl<'a> Batch<'a> {
    pub(crate) fn new(collection: &'a Collection, root: bool) -> Self {
        Self {
            collection,
            entries: vec![],
            root,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn append(
        &mut self,
        label: String,
        start: Vec<Value>,
        stop: Vec<Value>,
        digests: Vec<Digest>,
        length: u64,
        embedded: Vec<(Digest, Vec<u8>)>,
    ) {
        self.entries.push(BatchEntry {
            label,
            start,
            stop,
            digests,
            length,
            embedded,
        });
    }

    /// Overlays all buffered writes onto the leaf commit and publishes the
    /// result as a single revision.
    pub fn flush(self) -> StoreResult<Vec<Revision>> {
        if self.entries.is_empty() {
            return Ok(vec![]);
        }
        let collection = self.collection;
        let changelog = collection.changelog();
        let leaf = if self.root { None } else { changelog.leaf()? };
        let mut commit = match &leaf {
            Some(revision) => Commit::decode(collection.schema(), &revision.payload()?)?,
            None => Commit::empty(collection.schema().clone()),
        };
        for entry in self.entries {
            commit = commit.update(CommitRow {
                label: entry.label,
                start: entry.start,
                stop: entry.stop,
                digests: entry.digests,
                length: entry.length,
                closed: Closed::Both,
            })?;
            commit.embed(entry.embedded);
        }
        let payload = commit.encode()?;
        let parent = leaf.map_or_else(Digest::zero, |revision| revision.child);
        changelog.commit(&payload, &[parent])
    }
}
