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

//! Collections: schema + changelog + the series under one label space.

use std::collections::BTreeSet;
use std::sync::Arc;

use itertools::Itertools as _;
use rayon::prelude::*;
use tracing::info;

use crate::batch::Batch;
use crate::changelog::Changelog;
use crate::changelog::Revision;
use crate::commit::Commit;
use crate::error::StoreError;
use crate::error::StoreResult;
use crate::hex_util;
use crate::object_id::Digest;
use crate::pod::Pod;
use crate::pod::ScopedPod;
use crate::schema::Schema;
use crate::schema::SchemaKind;
use crate::series::KvSeries;
use crate::series::Series;

/// Rows per re-emitted frame when squashing with `pack`. A defragmentation
/// hyperparameter, not a correctness concern.
const SQUASH_STEP: usize = 500_000;

/// A named bundle of series sharing one schema and one changelog.
#[derive(Debug, Clone)]
pub struct Collection {
    label: String,
    schema: Schema,
    pod: Arc<dyn Pod>,
    changelog: Arc<Changelog>,
}

impl Collection {
    /// `path` is the collection's changelog directory, relative to the
    /// repository pod root.
    pub fn new(label: &str, schema: Schema, path: &str, pod: Arc<dyn Pod>) -> Self {
        let changelog = Changelog::new(ScopedPod::new(pod.clone(), path));
        Self {
            label: label.to_owned(),
            schema,
            pod,
            changelog: Arc::new(changelog),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn changelog(&self) -> &Changelog {
        &self.changelog
    }

    /// The content-addressed blob space shared by the whole repository.
    pub(crate) fn blob_pod(&self) -> ScopedPod {
        ScopedPod::new(self.pod.clone(), "")
    }

    /// The series stored under `label`.
    pub fn series(&self, label: &str) -> StoreResult<Series<'_>> {
        let label = label.trim();
        if label.is_empty() {
            return Err(StoreError::InvalidLabel {
                label: label.to_owned(),
            });
        }
        Ok(Series::new(self, label.to_owned()))
    }

    /// Kv view over a series; only meaningful for kv-kind schemas.
    pub fn kv_series(&self, label: &str) -> StoreResult<KvSeries<'_>> {
        debug_assert_eq!(self.schema.kind(), SchemaKind::Kv);
        Ok(KvSeries::new(self.series(label)?))
    }

    /// Opens a batch; writes made through it publish as one revision.
    pub fn batch(&self) -> Batch<'_> {
        Batch::new(self, false)
    }

    fn batch_root(&self) -> Batch<'_> {
        Batch::new(self, true)
    }

    /// Sorted labels present at the leaf revision.
    pub fn ls(&self) -> StoreResult<Vec<String>> {
        match self.changelog.leaf()? {
            None => Ok(vec![]),
            Some(revision) => {
                let commit = Commit::decode(&self.schema, &revision.payload()?)?;
                Ok(commit.labels())
            }
        }
    }

    /// Publishes a revision whose commit omits the given labels' rows. Blobs
    /// are untouched; GC reclaims them once unreferenced.
    pub fn delete(&self, labels: &[&str]) -> StoreResult<Vec<Revision>> {
        let Some(leaf) = self.changelog.leaf()? else {
            return Ok(vec![]);
        };
        let commit = Commit::decode(&self.schema, &leaf.payload()?)?;
        let trimmed = commit.delete_labels(labels);
        let payload = trimmed.encode()?;
        self.changelog.commit(&payload, &[leaf.child])
    }

    pub fn rename(&self, from: &str, to: &str) -> StoreResult<Vec<Revision>> {
        let Some(leaf) = self.changelog.leaf()? else {
            return Ok(vec![]);
        };
        let commit = Commit::decode(&self.schema, &leaf.payload()?)?;
        let renamed = commit.rename_label(from, to);
        let payload = renamed.encode()?;
        self.changelog.commit(&payload, &[leaf.child])
    }

    pub fn refresh(&self) {
        self.changelog.refresh();
    }

    /// Every blob digest referenced by any reachable revision, embedded
    /// payloads excluded.
    pub fn digests(&self) -> StoreResult<BTreeSet<Digest>> {
        let mut digests = BTreeSet::new();
        for revision in self.changelog.log()? {
            let commit = Commit::decode(&self.schema, &revision.payload()?)?;
            digests.extend(commit.digests().cloned());
        }
        Ok(digests)
    }

    /// Pulls the remote collection: missing blobs first (on a thread pool),
    /// then the changelog, preserving write-before-publish.
    pub fn pull(&self, remote: &Self) -> StoreResult<()> {
        if self.schema != remote.schema {
            return Err(StoreError::SchemaMismatch(format!(
                "cannot pull collection {:?} across different schemas",
                self.label
            )));
        }
        let local_digests = self.digests()?;
        let missing: Vec<Digest> = remote
            .digests()?
            .into_iter()
            .filter(|digest| !local_digests.contains(digest))
            .collect();
        missing
            .par_iter()
            .map(|digest| {
                let key = hex_util::hashed_key(&digest.hex());
                let payload = remote.pod.read(&key)?;
                self.pod.write(&key, &payload)?;
                Ok(())
            })
            .collect::<StoreResult<()>>()?;
        self.changelog.pull(remote.changelog())?;
        Ok(())
    }

    pub fn push(&self, remote: &Self) -> StoreResult<()> {
        remote.pull(self)
    }

    /// Merges divergent histories into one revision parented on every leaf.
    ///
    /// Rows of the younger branches that are in neither the oldest branch nor
    /// the common ancestor are overlaid onto the oldest branch's commit.
    /// Returns the new revisions, or nothing when there was a single head.
    pub fn merge(&self) -> StoreResult<Vec<Revision>> {
        // The full edge list: ancestor discovery must see every parent edge
        // of prior merges, which the deduplicating log traversal folds away.
        let revisions = self.changelog.edges()?;
        if revisions.is_empty() {
            return Ok(vec![]);
        }
        let heads = self.changelog.leaves()?;
        if heads.iter().map(|head| &head.child).unique().count() < 2 {
            return Ok(vec![]);
        }

        // Ancestor closure of each head, youngest first
        let closure = |head: &Revision| -> Vec<Digest> {
            let mut seen = vec![head.child.clone()];
            let mut queue = vec![head.child.clone()];
            while let Some(child) = queue.pop() {
                for edge in revisions.iter().filter(|edge| edge.child == child) {
                    if !edge.parent.is_zero() && !seen.contains(&edge.parent) {
                        seen.push(edge.parent.clone());
                        queue.push(edge.parent.clone());
                    }
                }
            }
            seen
        };
        let first_closure = closure(&heads[0]);
        let other_closures: Vec<Vec<Digest>> = heads[1..].iter().map(closure).collect();
        let ancestor: Option<&Digest> = first_closure
            .iter()
            .find(|child| other_closures.iter().all(|other| other.contains(*child)));

        let reify = |child: &Digest| -> StoreResult<Commit> {
            let revision = revisions
                .iter()
                .find(|revision| &revision.child == child)
                .ok_or_else(|| {
                    StoreError::CorruptPayload(format!("unreachable revision {child}"))
                })?;
            Commit::decode(&self.schema, &revision.payload()?)
        };
        let mut merged = reify(&heads[0].child)?;
        let ancestor_commit = ancestor.map(|child| reify(child)).transpose()?;
        for head in &heads[1..] {
            let commit = reify(&head.child)?;
            for pos in 0..commit.len() {
                let row = commit.at(pos);
                let known = merged.contains(&row)
                    || ancestor_commit
                        .as_ref()
                        .is_some_and(|ancestor| ancestor.contains(&row));
                if !known {
                    merged = merged.update(row)?;
                }
            }
            merged.embed(
                commit
                    .embedded()
                    .map(|(digest, payload)| (digest.clone(), payload.to_vec()))
                    .collect::<Vec<_>>(),
            );
        }

        let payload = merged.encode()?;
        let parents: Vec<Digest> = heads.iter().map(|head| head.child.clone()).collect();
        self.changelog.commit(&payload, &parents)
    }

    /// Squashes history. With `pack`, every series is rewritten through a
    /// root batch in [`SQUASH_STEP`]-row pages, defragmenting storage; the
    /// superseded revisions are then removed. Without `pack`, old revisions
    /// are simply dropped, keeping only the latest (or everything stamped at
    /// or after `before`).
    pub fn squash(&self, pack: bool, before: Option<&str>) -> StoreResult<Vec<Revision>> {
        let old: Vec<Revision> = match before {
            Some(before) => self.changelog.log_before(before)?,
            None => self.changelog.log()?,
        };

        if !pack {
            let keep = old.len().saturating_sub(1);
            let paths: Vec<String> = old[..keep].iter().map(Revision::path).collect();
            self.changelog.rm_many(&paths)?;
            return Ok(vec![]);
        }

        let mut batch = self.batch_root();
        for label in self.ls()? {
            info!(collection = %self.label, %label, "squash");
            let series = self.series(&label)?;
            for frame in series.paginate(SQUASH_STEP)? {
                series.write_in(&mut batch, frame)?;
            }
        }
        let fresh = batch.flush()?;
        let paths: Vec<String> = if fresh.is_empty() {
            // No data was rewritten; keep the current leaf alive
            let keep = old.len().saturating_sub(1);
            old[..keep].iter().map(Revision::path).collect()
        } else {
            old.iter().map(Revision::path).collect()
        };
        self.changelog.rm_many(&paths)?;
        Ok(fresh)
    }
}
