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

//! The repository: the top-level registry of collections plus global GC.
//!
//! The registry is itself a collection, of kv kind, stored at the zero-hash
//! path within the pod. Its rows map collection labels to `{path, schema}`
//! metadata, one series per namespace. Everything else in the pod is either
//! a collection changelog directory or a content-addressed column blob, which
//! is what makes the mark-and-delay garbage collector a two-level walk.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing::info;

use crate::collection::Collection;
use crate::error::StoreError;
use crate::error::StoreResult;
use crate::frame::Column;
use crate::frame::Frame;
use crate::frame::Value;
use crate::hex_util;
use crate::hextime;
use crate::object_id::Digest;
use crate::pod::Pod;
use crate::schema::Schema;

pub const DEFAULT_NAMESPACE: &str = "collection";
const ARCHIVE_NAMESPACE: &str = "archive";

/// How long a soft-deleted blob is protected before GC may reclaim it. Long
/// enough for any in-flight writer to publish the commit referencing it.
pub const DEFAULT_GC_TIMEOUT: Duration = Duration::from_secs(300);

/// Registry row payload: where a collection lives and what it stores.
#[derive(Debug, Serialize, Deserialize)]
struct CollectionMeta {
    path: String,
    schema: String,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct GcStats {
    pub hard_deleted: usize,
    pub soft_deleted: usize,
}

pub struct Repo {
    pod: Arc<dyn Pod>,
    registry: Collection,
}

fn registry_schema() -> Schema {
    Schema::kv(["label str*", "meta str"]).expect("registry schema is well-formed")
}

fn collection_path(label: &str, namespace: &str) -> String {
    let mut digest = Digest::of(label.as_bytes());
    if namespace != DEFAULT_NAMESPACE {
        // Salt non-default namespaces so an archived twin gets its own path
        digest = Digest::of(format!("{}{namespace}", digest.hex()).as_bytes());
    }
    hex_util::hashed_key(&digest.hex())
}

impl Repo {
    pub fn new(pod: Arc<dyn Pod>) -> Self {
        let path = hex_util::hashed_key(&Digest::zero().hex());
        let registry = Collection::new("registry", registry_schema(), &path, pod.clone());
        Self { pod, registry }
    }

    pub fn pod(&self) -> &Arc<dyn Pod> {
        &self.pod
    }

    pub fn registry(&self) -> &Collection {
        &self.registry
    }

    /// Labels of the collections in the default namespace.
    pub fn ls(&self) -> StoreResult<Vec<String>> {
        let frame = self.registry.kv_series(DEFAULT_NAMESPACE)?.frame()?;
        let Some(Column::Str(labels)) = frame.column("label") else {
            return Ok(vec![]);
        };
        Ok(labels.clone())
    }

    /// Namespaces with registry entries.
    pub fn namespaces(&self) -> StoreResult<Vec<String>> {
        self.registry.ls()
    }

    pub fn create_collection(
        &self,
        schema: &Schema,
        labels: &[&str],
        raise_if_exists: bool,
    ) -> StoreResult<Vec<Collection>> {
        self.create_collection_in(DEFAULT_NAMESPACE, schema, labels, raise_if_exists)
    }

    pub fn create_collection_in(
        &self,
        namespace: &str,
        schema: &Schema,
        labels: &[&str],
        raise_if_exists: bool,
    ) -> StoreResult<Vec<Collection>> {
        let series = self.registry.kv_series(namespace)?;
        let current = series.frame()?;
        let existing: BTreeSet<String> = match current.column("label") {
            Some(Column::Str(values)) => values.iter().cloned().collect(),
            _ => BTreeSet::new(),
        };

        let mut rows = vec![];
        for &label in labels {
            let label = label.trim();
            if label.is_empty() {
                return Err(StoreError::InvalidLabel {
                    label: label.to_owned(),
                });
            }
            if existing.contains(label) {
                if raise_if_exists {
                    return Err(StoreError::DuplicateLabel {
                        label: label.to_owned(),
                    });
                }
                continue;
            }
            let meta = CollectionMeta {
                path: collection_path(label, namespace),
                schema: schema.dumps(),
            };
            let meta = serde_json::to_string(&meta)
                .map_err(|err| StoreError::CorruptPayload(format!("bad meta: {err}")))?;
            rows.push(vec![Value::Str(label.to_owned()), Value::Str(meta)]);
        }
        if !rows.is_empty() {
            rows.sort();
            let frame = Frame::from_rows(registry_schema(), rows);
            series.write(frame)?;
        }

        labels
            .iter()
            .map(|label| {
                self.collection_in(namespace, label.trim())?.ok_or_else(|| {
                    StoreError::CorruptPayload(format!("collection {label:?} vanished"))
                })
            })
            .collect()
    }

    pub fn collection(&self, label: &str) -> StoreResult<Option<Collection>> {
        self.collection_in(DEFAULT_NAMESPACE, label)
    }

    pub fn collection_in(&self, namespace: &str, label: &str) -> StoreResult<Option<Collection>> {
        let bound = [Value::Str(label.to_owned())];
        let frame = self
            .registry
            .kv_series(namespace)?
            .read(Some(&bound), Some(&bound))?;
        if frame.is_empty() {
            return Ok(None);
        }
        let Some(Value::Str(meta)) = frame.row(frame.len() - 1).pop() else {
            return Err(StoreError::CorruptPayload("registry meta is not a string".into()));
        };
        Ok(Some(self.reify(label, &meta)?))
    }

    fn reify(&self, label: &str, meta: &str) -> StoreResult<Collection> {
        let meta: CollectionMeta = serde_json::from_str(meta)
            .map_err(|err| StoreError::CorruptPayload(format!("bad meta for {label:?}: {err}")))?;
        let schema = Schema::loads(&meta.schema)?;
        Ok(Collection::new(label, schema, &meta.path, self.pod.clone()))
    }

    /// Every collection of `namespace`.
    pub fn search(&self, namespace: &str) -> StoreResult<Vec<Collection>> {
        let frame = self.registry.kv_series(namespace)?.frame()?;
        (0..frame.len())
            .map(|pos| {
                let row = frame.row(pos);
                let (Value::Str(label), Value::Str(meta)) = (&row[0], &row[1]) else {
                    return Err(StoreError::CorruptPayload("malformed registry row".into()));
                };
                self.reify(label, meta)
            })
            .collect()
    }

    /// Deletes collections: their registry entries and changelog directories.
    /// Column blobs are left to GC.
    pub fn delete(&self, labels: &[&str]) -> StoreResult<()> {
        self.delete_in(DEFAULT_NAMESPACE, labels)
    }

    pub fn delete_in(&self, namespace: &str, labels: &[&str]) -> StoreResult<()> {
        let mut doomed = vec![];
        for &label in labels {
            if let Some(collection) = self.collection_in(namespace, label)? {
                doomed.push(collection.changelog().pod().prefix().to_owned());
            }
        }
        self.registry.kv_series(namespace)?.delete(labels)?;
        for path in doomed {
            self.pod.rm_missing_ok(&path, true)?;
        }
        Ok(())
    }

    /// Renames a collection label. The changelog path stays keyed to the old
    /// label's digest; only the registry row moves.
    pub fn rename(&self, from: &str, to: &str) -> StoreResult<()> {
        let series = self.registry.kv_series(DEFAULT_NAMESPACE)?;
        let frame = series.frame()?;
        let mut rows = vec![];
        let mut found = false;
        for pos in 0..frame.len() {
            let mut row = frame.row(pos);
            match &row[0] {
                Value::Str(label) if label == to => {
                    return Err(StoreError::DuplicateLabel {
                        label: to.to_owned(),
                    });
                }
                Value::Str(label) if label == from => {
                    row[0] = Value::Str(to.to_owned());
                    found = true;
                }
                _ => {}
            }
            rows.push(row);
        }
        if !found {
            return Err(StoreError::InvalidLabel {
                label: from.to_owned(),
            });
        }
        rows.sort();
        let renamed = Frame::from_rows(registry_schema(), rows);

        // Cover the union of old and new bounds so the old row is shadowed
        let start = match (frame.start(), renamed.start()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let stop = match (frame.stop(), renamed.stop()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let collection = &self.registry;
        let mut batch = collection.batch();
        collection
            .series(DEFAULT_NAMESPACE)?
            .write_bounded(&mut batch, renamed, start, stop)?;
        batch.flush()?;
        Ok(())
    }

    /// The archive twin of `collection`, created on first use.
    pub fn archive(&self, collection: &Collection) -> StoreResult<Collection> {
        let label = collection.label();
        if let Some(archive) = self.collection_in(ARCHIVE_NAMESPACE, label)? {
            return Ok(archive);
        }
        let mut created = self.create_collection_in(
            ARCHIVE_NAMESPACE,
            collection.schema(),
            &[label],
            false,
        )?;
        Ok(created.remove(0))
    }

    pub fn refresh(&self) {
        self.registry.refresh();
    }

    /// Pulls the registry and the named collections (all remote ones when
    /// `labels` is empty) from `remote`.
    pub fn pull(&self, remote: &Self, labels: &[&str]) -> StoreResult<()> {
        self.registry.pull(remote.registry())?;
        // Histories created concurrently on both sides leave two registry
        // heads; fold them so both sets of collections are visible.
        self.registry.merge()?;
        self.refresh();

        let labels: Vec<String> = if labels.is_empty() {
            remote.ls()?
        } else {
            labels.iter().map(|&label| label.to_owned()).collect()
        };
        for label in &labels {
            info!(%label, "pull collection");
            let Some(theirs) = remote.collection(label)? else {
                continue;
            };
            let ours = match self.collection(label)? {
                Some(ours) => {
                    if ours.schema() != theirs.schema() {
                        return Err(StoreError::SchemaMismatch(format!(
                            "cannot pull collection {label:?}, incompatible schemas"
                        )));
                    }
                    ours
                }
                None => {
                    let mut created =
                        self.create_collection(theirs.schema(), &[label.as_str()], false)?;
                    created.remove(0)
                }
            };
            ours.pull(&theirs)?;
        }
        Ok(())
    }

    pub fn push(&self, remote: &Self, labels: &[&str]) -> StoreResult<()> {
        remote.pull(self, labels)
    }

    /// Merges the repository registry, needed when collections were created
    /// or deleted concurrently.
    pub fn merge(&self) -> StoreResult<()> {
        self.registry.merge()?;
        Ok(())
    }

    pub fn gc(&self) -> StoreResult<GcStats> {
        self.gc_with_timeout(DEFAULT_GC_TIMEOUT)
    }

    /// Two-phase mark-and-delay sweep over the blob space.
    ///
    /// Unreferenced blobs are first renamed with a hextime suffix (buried);
    /// a buried blob older than `timeout` is deleted for good unless its
    /// digest became referenced again, in which case the suffix is stripped.
    /// Blobs buried more recently than `timeout` are left alone, protecting
    /// writers whose commit is not yet visible. Safe against concurrent
    /// writers because blobs are always written before the commit that
    /// references them.
    pub fn gc_with_timeout(&self, timeout: Duration) -> StoreResult<GcStats> {
        info!("start gc");
        // Disk scan first: blobs written after this point are simply not
        // considered this pass.
        let mut on_disk: BTreeSet<String> = BTreeSet::new();
        for folder in self.pod.ls_or_empty("")? {
            if !self.pod.is_dir(&folder) {
                continue;
            }
            for name in self.pod.ls_or_empty(&folder)? {
                let path = format!("{folder}/{name}");
                if !self.pod.is_dir(&path) {
                    on_disk.insert(format!("{folder}{name}"));
                }
            }
        }

        // Mark: everything any reachable revision still references
        self.refresh();
        let mut active: BTreeSet<String> = BTreeSet::new();
        for digest in self.registry.digests()? {
            active.insert(digest.hex());
        }
        for namespace in self.namespaces()? {
            for collection in self.search(&namespace)? {
                collection.refresh();
                for digest in collection.digests()? {
                    active.insert(digest.hex());
                }
            }
        }

        let bury_stamp = hextime::now();
        let deadline = hextime::deadline(timeout);
        let mut stats = GcStats::default();
        for name in on_disk {
            match name.split_once('.') {
                None => {
                    if active.contains(&name) {
                        continue;
                    }
                    let key = hex_util::hashed_key(&name);
                    self.pod
                        .mv_missing_ok(&key, &format!("{key}.{bury_stamp}"))?;
                    stats.soft_deleted += 1;
                }
                Some((digest, stamp)) => {
                    if stamp >= deadline.as_str() {
                        // Buried too recently, cannot act on it yet
                        continue;
                    }
                    let key = hex_util::hashed_key(digest);
                    let buried = format!("{key}.{stamp}");
                    if active.contains(digest) {
                        // The digest re-appeared; restore the blob
                        self.pod.mv_missing_ok(&buried, &key)?;
                    } else {
                        self.pod.rm_missing_ok(&buried, false)?;
                        stats.hard_deleted += 1;
                    }
                }
            }
        }
        info!(
            hard = stats.hard_deleted,
            soft = stats.soft_deleted,
            "end of gc"
        );
        Ok(stats)
    }
}
