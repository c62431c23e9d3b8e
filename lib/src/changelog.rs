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

//! The concurrent revision graph.
//!
//! Each revision is one file in a dedicated sub-pod whose name encodes a full
//! DAG edge: `{parent_hex}-{child_hex}-{hextime}`. The child hex is the
//! content digest of the revision payload, so one directory listing is enough
//! to rebuild the whole graph, two writers never race on a key (timestamps
//! are unique per writer), and writers that produced identical payloads
//! converge on the same logical revision without coordination.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::RwLock;

use tracing::warn;

use crate::error::StoreError;
use crate::error::StoreResult;
use crate::hextime;
use crate::object_id::Digest;
use crate::pod::Pod as _;
use crate::pod::ScopedPod;

/// One node of the revision DAG.
#[derive(Debug, Clone)]
pub struct Revision {
    pod: ScopedPod,
    pub parent: Digest,
    pub child: Digest,
    pub stamp: String,
    pub is_leaf: bool,
}

impl PartialEq for Revision {
    fn eq(&self, other: &Self) -> bool {
        self.parent == other.parent && self.child == other.child && self.stamp == other.stamp
    }
}

impl Revision {
    fn parse(pod: &ScopedPod, name: &str) -> StoreResult<Self> {
        let corrupt = || StoreError::CorruptPayload(format!("bad revision filename {name:?}"));
        let mut words = name.split('-');
        let parent = words
            .next()
            .and_then(Digest::try_from_hex)
            .ok_or_else(corrupt)?;
        let child = words
            .next()
            .and_then(Digest::try_from_hex)
            .ok_or_else(corrupt)?;
        let stamp = words.next().ok_or_else(corrupt)?;
        if hextime::decode(stamp).is_none() || words.next().is_some() {
            return Err(corrupt());
        }
        Ok(Self {
            pod: pod.clone(),
            parent,
            child,
            stamp: stamp.to_owned(),
            is_leaf: false,
        })
    }

    /// The revision's filename within the changelog sub-pod.
    pub fn path(&self) -> String {
        format!("{}-{}-{}", self.parent.hex(), self.child.hex(), self.stamp)
    }

    /// The raw commit payload of this revision.
    pub fn payload(&self) -> StoreResult<Vec<u8>> {
        Ok(self.pod.read(&self.path())?)
    }
}

/// Append-only revision graph over a changelog sub-pod.
#[derive(Debug)]
pub struct Changelog {
    pod: ScopedPod,
    cache: RwLock<Option<Vec<Revision>>>,
}

impl Changelog {
    pub fn new(pod: ScopedPod) -> Self {
        Self {
            pod,
            cache: RwLock::new(None),
        }
    }

    pub fn pod(&self) -> &ScopedPod {
        &self.pod
    }

    /// Appends `payload` as a new revision under each of `parents`. A
    /// multi-parent commit (a merge) is encoded as one file per parent, all
    /// carrying the identical payload and thus the same child digest.
    pub fn commit(&self, payload: &[u8], parents: &[Digest]) -> StoreResult<Vec<Revision>> {
        let child = Digest::of(payload);
        let mut revisions = vec![];
        for parent in parents {
            let revision = Revision {
                pod: self.pod.clone(),
                parent: parent.clone(),
                child: child.clone(),
                stamp: hextime::now(),
                is_leaf: true,
            };
            self.pod.write(&revision.path(), payload)?;
            revisions.push(revision);
        }
        self.refresh();
        Ok(revisions)
    }

    /// Invalidates the cached revision list.
    pub fn refresh(&self) {
        *self.cache.write().unwrap() = None;
    }

    /// All revisions, sorted depth-first from the zero-hash root. Siblings
    /// are visited in hextime order (ties broken by child digest), so the
    /// first branch out of any fork is the oldest one, and the last element
    /// is the leaf of the oldest live branch.
    pub fn log(&self) -> StoreResult<Vec<Revision>> {
        if let Some(revisions) = self.cache.read().unwrap().as_ref() {
            return Ok(revisions.clone());
        }
        let revisions = self.load()?;
        *self.cache.write().unwrap() = Some(revisions.clone());
        Ok(revisions)
    }

    /// Like [`log`](Self::log), restricted to revisions stamped before
    /// `before`.
    pub fn log_before(&self, before: &str) -> StoreResult<Vec<Revision>> {
        let revisions = self.log()?;
        Ok(revisions
            .into_iter()
            .filter(|revision| revision.stamp.as_str() < before)
            .collect())
    }

    fn load(&self) -> StoreResult<Vec<Revision>> {
        let mut parsed: Vec<Revision> = vec![];
        let mut edges: BTreeSet<(Digest, Digest)> = BTreeSet::new();
        let mut names = self.pod.ls_or_empty("")?;
        // Earliest stamp wins when the same edge was written twice
        names.sort_unstable_by(|a, b| a.rsplit('-').next().cmp(&b.rsplit('-').next()));
        for name in names {
            let revision = match Revision::parse(&self.pod, &name) {
                Ok(revision) => revision,
                Err(err) => {
                    warn!(%name, %err, "skipping malformed revision file");
                    continue;
                }
            };
            if edges.insert((revision.parent.clone(), revision.child.clone())) {
                parsed.push(revision);
            }
        }
        let parents: BTreeSet<Digest> = parsed.iter().map(|r| r.parent.clone()).collect();
        let known: BTreeSet<Digest> = parsed.iter().map(|r| r.child.clone()).collect();

        // The DAG is a forest: revisions under the zero-hash sentinel, plus
        // revisions whose parent file has been trimmed away (squash leaves
        // such orphans behind on purpose).
        let mut roots: Vec<Revision> = vec![];
        let mut children: BTreeMap<Digest, Vec<Revision>> = BTreeMap::new();
        for revision in parsed {
            if revision.parent.is_zero() || !known.contains(&revision.parent) {
                roots.push(revision);
            } else {
                children
                    .entry(revision.parent.clone())
                    .or_default()
                    .push(revision);
            }
        }
        let by_stamp = |a: &Revision, b: &Revision| (&a.stamp, &a.child).cmp(&(&b.stamp, &b.child));
        roots.sort_by(by_stamp);
        for siblings in children.values_mut() {
            siblings.sort_by(by_stamp);
        }

        // Depth-first traversal; a child reached from several parents (a
        // merge) is emitted only once, under its oldest branch.
        let mut ordered = vec![];
        let mut visited: BTreeSet<Digest> = BTreeSet::new();
        let mut stack: Vec<Revision> = roots.into_iter().rev().collect();
        while let Some(mut revision) = stack.pop() {
            if !visited.insert(revision.child.clone()) {
                continue;
            }
            if let Some(next) = children.get(&revision.child) {
                stack.extend(next.iter().rev().cloned());
            }
            revision.is_leaf = !parents.contains(&revision.child);
            ordered.push(revision);
        }
        Ok(ordered)
    }

    /// Every distinct `(parent, child)` edge of the DAG, including the extra
    /// parent edges of merge revisions that the deduplicating [`log`]
    /// traversal reports only once.
    pub fn edges(&self) -> StoreResult<Vec<Revision>> {
        let mut seen: BTreeSet<(Digest, Digest)> = BTreeSet::new();
        let mut edges = vec![];
        let mut names = self.pod.ls_or_empty("")?;
        names.sort_unstable_by(|a, b| a.rsplit('-').next().cmp(&b.rsplit('-').next()));
        for name in names {
            let Ok(revision) = Revision::parse(&self.pod, &name) else {
                continue;
            };
            if seen.insert((revision.parent.clone(), revision.child.clone())) {
                edges.push(revision);
            }
        }
        Ok(edges)
    }

    /// The latest revision on the oldest live branch, if any.
    pub fn leaf(&self) -> StoreResult<Option<Revision>> {
        Ok(self.log()?.into_iter().next_back())
    }

    /// All leaf revisions (those that are nobody's parent), in log order.
    pub fn leaves(&self) -> StoreResult<Vec<Revision>> {
        Ok(self
            .log()?
            .into_iter()
            .filter(|revision| revision.is_leaf)
            .collect())
    }

    /// Copies every remote revision file missing locally, compared by
    /// `(parent, child)` edge so timestamp-only duplicates are skipped but
    /// every merge edge survives. Payloads are copied verbatim, never
    /// re-parsed. Column blobs must be synced separately by the caller,
    /// beforehand.
    pub fn pull(&self, remote: &Self) -> StoreResult<Vec<String>> {
        let known: BTreeSet<(Digest, Digest)> = self
            .edges()?
            .iter()
            .map(|revision| (revision.parent.clone(), revision.child.clone()))
            .collect();
        let mut copied = vec![];
        for name in remote.pod.ls_or_empty("")? {
            let Ok(revision) = Revision::parse(&remote.pod, &name) else {
                continue;
            };
            if known.contains(&(revision.parent.clone(), revision.child.clone())) {
                continue;
            }
            let payload = remote.pod.read(&name)?;
            self.pod.write(&name, &payload)?;
            copied.push(name);
        }
        if !copied.is_empty() {
            self.refresh();
        }
        Ok(copied)
    }

    /// Removes revision files by path.
    pub fn rm_many(&self, paths: &[String]) -> StoreResult<()> {
        for path in paths {
            self.pod.rm_missing_ok(path, false)?;
        }
        self.refresh();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::pod::MemoryPod;
    use crate::pod::Pod;

    fn changelog() -> Changelog {
        let pod: Arc<dyn Pod> = Arc::new(MemoryPod::new());
        Changelog::new(ScopedPod::new(pod, "log"))
    }

    #[test]
    fn test_commit_and_log() {
        let changelog = changelog();
        assert_eq!(changelog.log().unwrap(), vec![]);
        assert_eq!(changelog.leaf().unwrap(), None);

        let first = &changelog.commit(b"one", &[Digest::zero()]).unwrap()[0];
        let second = &changelog.commit(b"two", &[first.child.clone()]).unwrap()[0];

        let log = changelog.log().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(&log[0], first);
        assert_eq!(&log[1], second);
        assert!(!log[0].is_leaf);
        assert!(log[1].is_leaf);
        assert_eq!(changelog.leaf().unwrap().unwrap(), *second);
        assert_eq!(second.payload().unwrap(), b"two");
    }

    #[test]
    fn test_identical_payloads_converge() {
        let changelog = changelog();
        let first = &changelog.commit(b"payload", &[Digest::zero()]).unwrap()[0];
        // A concurrent writer commits the same bytes under the same parent
        let again = &changelog.commit(b"payload", &[Digest::zero()]).unwrap()[0];
        assert_eq!(first.child, again.child);

        // Two files, one logical revision
        assert_eq!(changelog.pod().ls("").unwrap().len(), 2);
        let log = changelog.log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].stamp, first.stamp);
    }

    #[test]
    fn test_forks_walk_oldest_branch_first() {
        let changelog = changelog();
        let root = &changelog.commit(b"root", &[Digest::zero()]).unwrap()[0];
        let old_branch = &changelog.commit(b"old", &[root.child.clone()]).unwrap()[0];
        let new_branch = &changelog.commit(b"new", &[root.child.clone()]).unwrap()[0];
        let old_tip = &changelog.commit(b"old tip", &[old_branch.child.clone()]).unwrap()[0];

        let log = changelog.log().unwrap();
        assert_eq!(
            log,
            vec![
                root.clone(),
                old_branch.clone(),
                old_tip.clone(),
                new_branch.clone(),
            ]
        );
        // The leaf is the tip of the oldest branch
        assert_eq!(changelog.leaf().unwrap().unwrap(), *old_tip);
        assert_eq!(
            changelog.leaves().unwrap(),
            vec![old_tip.clone(), new_branch.clone()]
        );
    }

    #[test]
    fn test_merge_edges_listed_once() {
        let changelog = changelog();
        let a = &changelog.commit(b"a", &[Digest::zero()]).unwrap()[0];
        let b = &changelog.commit(b"b", &[Digest::zero()]).unwrap()[0];
        let merged = changelog
            .commit(b"merged", &[a.child.clone(), b.child.clone()])
            .unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].child, merged[1].child);

        let log = changelog.log().unwrap();
        // Four files, three logical revisions: the merge child shows up once
        assert_eq!(changelog.pod().ls("").unwrap().len(), 4);
        assert_eq!(log.len(), 3);
        let merge_nodes: Vec<_> = log
            .iter()
            .filter(|revision| revision.child == merged[0].child)
            .collect();
        assert_eq!(merge_nodes.len(), 1);
        assert!(merge_nodes[0].is_leaf);
    }

    #[test]
    fn test_log_before() {
        let changelog = changelog();
        let first = &changelog.commit(b"one", &[Digest::zero()]).unwrap()[0];
        let second = &changelog.commit(b"two", &[first.child.clone()]).unwrap()[0];
        let cutoff = hextime::now();
        let _third = &changelog.commit(b"three", &[second.child.clone()]).unwrap()[0];

        let trimmed = changelog.log_before(&cutoff).unwrap();
        assert_eq!(trimmed.len(), 2);
    }

    #[test]
    fn test_malformed_filenames_are_skipped() {
        let changelog = changelog();
        changelog.commit(b"good", &[Digest::zero()]).unwrap();
        changelog.pod().write("not-a-revision", b"junk").unwrap();
        changelog.refresh();
        assert_eq!(changelog.log().unwrap().len(), 1);
    }

    #[test]
    fn test_pull() {
        let local = changelog();
        let remote = changelog();
        let first = &remote.commit(b"one", &[Digest::zero()]).unwrap()[0];
        remote.commit(b"two", &[first.child.clone()]).unwrap();

        let copied = local.pull(&remote).unwrap();
        assert_eq!(copied.len(), 2);
        assert_eq!(local.leaf().unwrap(), remote.leaf().unwrap());

        // Pulling again copies nothing
        assert_eq!(local.pull(&remote).unwrap(), Vec::<String>::new());
    }
}
