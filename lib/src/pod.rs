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

//! The pod: a flat, byte-addressed key/value store over path-like keys.
//!
//! Every persistent structure in the engine (column blobs, revision files,
//! the registry) goes through this interface. Writes to an existing key are
//! no-ops, which is what makes content-addressed writes idempotent across
//! concurrent actors: two writers producing the same bytes race benignly.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

/// Pod-level error that may occur after the pod is constructed.
#[derive(Debug, Error)]
pub enum PodError {
    #[error("Pod key {path} not found")]
    NotFound { path: String },
    #[error("Error accessing pod key {path}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    /// A valid operation attempted, but not supported by this pod.
    #[error("{0}")]
    Unsupported(String),
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

pub type PodResult<T> = Result<T, PodError>;

fn map_io_err(err: std::io::Error, path: &str) -> PodError {
    if err.kind() == std::io::ErrorKind::NotFound {
        PodError::NotFound {
            path: path.to_owned(),
        }
    } else {
        PodError::Io {
            path: path.to_owned(),
            source: err,
        }
    }
}

fn join(base: &str, rel: &str) -> String {
    match (base.is_empty(), rel.is_empty()) {
        (true, _) => rel.to_owned(),
        (_, true) => base.to_owned(),
        _ => format!("{base}/{rel}"),
    }
}

/// Defines the interface for storage pods.
///
/// Keys are `/`-separated relative paths; the empty string names the pod
/// root. Implementations must treat `write` to an existing key as a no-op
/// and must never be asked to write differing bytes under one key.
pub trait Pod: Send + Sync + Debug {
    /// A unique name identifying the pod scheme.
    fn name(&self) -> &str;

    fn read(&self, path: &str) -> PodResult<Vec<u8>>;

    /// Writes `data` under `path`. No-op if the key already exists.
    fn write(&self, path: &str, data: &[u8]) -> PodResult<()>;

    /// Immediate child names under `path`.
    fn ls(&self, path: &str) -> PodResult<Vec<String>>;

    fn is_dir(&self, path: &str) -> bool;

    fn rm(&self, path: &str, recursive: bool) -> PodResult<()>;

    fn mv(&self, old: &str, new: &str) -> PodResult<()>;

    /// Like [`read`](Self::read), but absence is not an error.
    fn read_opt(&self, path: &str) -> PodResult<Option<Vec<u8>>> {
        match self.read(path) {
            Ok(data) => Ok(Some(data)),
            Err(PodError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Like [`ls`](Self::ls), but a missing directory lists as empty.
    fn ls_or_empty(&self, path: &str) -> PodResult<Vec<String>> {
        match self.ls(path) {
            Ok(names) => Ok(names),
            Err(PodError::NotFound { .. }) => Ok(vec![]),
            Err(err) => Err(err),
        }
    }

    fn rm_missing_ok(&self, path: &str, recursive: bool) -> PodResult<()> {
        match self.rm(path, recursive) {
            Ok(()) | Err(PodError::NotFound { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn mv_missing_ok(&self, old: &str, new: &str) -> PodResult<()> {
        match self.mv(old, new) {
            Ok(()) | Err(PodError::NotFound { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// All file keys under `path`, depth-first, at most `max_depth` levels
    /// down. Directories at the depth limit are not descended into.
    fn walk(&self, path: &str, max_depth: usize) -> PodResult<Vec<String>> {
        let mut files = vec![];
        if max_depth == 0 {
            return Ok(files);
        }
        let mut pending: Vec<(String, usize)> = self
            .ls_or_empty(path)?
            .into_iter()
            .map(|name| (name, 1))
            .collect();
        while let Some((rel, depth)) = pending.pop() {
            let full = join(path, &rel);
            if self.is_dir(&full) {
                if depth >= max_depth {
                    continue;
                }
                for child in self.ls_or_empty(&full)? {
                    pending.push((join(&rel, &child), depth + 1));
                }
            } else {
                files.push(rel);
            }
        }
        files.sort_unstable();
        Ok(files)
    }
}

/// An in-memory pod, mainly for tests and scratch repositories.
#[derive(Debug, Default)]
pub struct MemoryPod {
    store: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryPod {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Pod for MemoryPod {
    fn name(&self) -> &str {
        "memory"
    }

    fn read(&self, path: &str) -> PodResult<Vec<u8>> {
        let store = self.store.lock().unwrap();
        store.get(path).cloned().ok_or_else(|| PodError::NotFound {
            path: path.to_owned(),
        })
    }

    fn write(&self, path: &str, data: &[u8]) -> PodResult<()> {
        let mut store = self.store.lock().unwrap();
        if store.contains_key(path) {
            debug!(path, "skip write, key exists");
            return Ok(());
        }
        store.insert(path.to_owned(), data.to_vec());
        Ok(())
    }

    fn ls(&self, path: &str) -> PodResult<Vec<String>> {
        let store = self.store.lock().unwrap();
        if !path.is_empty() && store.contains_key(path) {
            let name = path.rsplit('/').next().unwrap();
            return Ok(vec![name.to_owned()]);
        }
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        let mut names: Vec<String> = store
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| {
                let rest = &key[prefix.len()..];
                rest.split('/').next().unwrap().to_owned()
            })
            .collect();
        names.dedup();
        if names.is_empty() && !path.is_empty() {
            return Err(PodError::NotFound {
                path: path.to_owned(),
            });
        }
        Ok(names)
    }

    fn is_dir(&self, path: &str) -> bool {
        if path.is_empty() {
            return true;
        }
        let store = self.store.lock().unwrap();
        let prefix = format!("{path}/");
        store
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(&prefix))
    }

    fn rm(&self, path: &str, recursive: bool) -> PodResult<()> {
        let mut store = self.store.lock().unwrap();
        if store.remove(path).is_some() {
            return Ok(());
        }
        let prefix = format!("{path}/");
        let children: Vec<String> = store
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect();
        if children.is_empty() {
            return Err(PodError::NotFound {
                path: path.to_owned(),
            });
        }
        if !recursive {
            return Err(PodError::Unsupported(format!(
                "cannot remove non-empty directory {path}"
            )));
        }
        for key in children {
            store.remove(&key);
        }
        Ok(())
    }

    fn mv(&self, old: &str, new: &str) -> PodResult<()> {
        let mut store = self.store.lock().unwrap();
        let data = store.remove(old).ok_or_else(|| PodError::NotFound {
            path: old.to_owned(),
        })?;
        store.insert(new.to_owned(), data);
        Ok(())
    }
}

/// A pod over a local directory.
///
/// Writes go through a temporary file that is persisted without clobbering,
/// so a key either holds complete bytes or does not exist, and concurrent
/// writers of the same content-addressed key cannot corrupt each other.
#[derive(Debug)]
pub struct FilePod {
    root: PathBuf,
}

impl FilePod {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }
}

impl Pod for FilePod {
    fn name(&self) -> &str {
        "file"
    }

    fn read(&self, path: &str) -> PodResult<Vec<u8>> {
        fs::read(self.full(path)).map_err(|err| map_io_err(err, path))
    }

    fn write(&self, path: &str, data: &[u8]) -> PodResult<()> {
        let full = self.full(path);
        if full.is_file() {
            debug!(path, "skip write, key exists");
            return Ok(());
        }
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|err| map_io_err(err, path))?;
        }
        let mut temp_file =
            NamedTempFile::new_in(&self.root).map_err(|err| map_io_err(err, path))?;
        temp_file
            .write_all(data)
            .map_err(|err| map_io_err(err, path))?;
        match temp_file.persist_noclobber(&full) {
            Ok(_) => Ok(()),
            // Another writer got there first with the same bytes.
            Err(err) if err.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(err) => Err(map_io_err(err.error, path)),
        }
    }

    fn ls(&self, path: &str) -> PodResult<Vec<String>> {
        let full = self.full(path);
        if full.is_file() {
            let name = path.rsplit('/').next().unwrap();
            return Ok(vec![name.to_owned()]);
        }
        let entries = fs::read_dir(full).map_err(|err| map_io_err(err, path))?;
        let mut names = vec![];
        for entry in entries {
            let entry = entry.map_err(|err| map_io_err(err, path))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort_unstable();
        Ok(names)
    }

    fn is_dir(&self, path: &str) -> bool {
        self.full(path).is_dir()
    }

    fn rm(&self, path: &str, recursive: bool) -> PodResult<()> {
        let full = self.full(path);
        let result = if full.is_dir() {
            if recursive {
                fs::remove_dir_all(full)
            } else {
                fs::remove_dir(full)
            }
        } else {
            fs::remove_file(full)
        };
        result.map_err(|err| map_io_err(err, path))
    }

    fn mv(&self, old: &str, new: &str) -> PodResult<()> {
        fs::rename(self.full(old), self.full(new)).map_err(|err| map_io_err(err, old))
    }
}

/// A write-through caching pair: reads hit `local` first and populate it from
/// `remote` on miss; writes land on both before returning, so a published
/// revision never references bytes the remote has not seen.
#[derive(Debug)]
pub struct CachePod {
    local: Arc<dyn Pod>,
    remote: Arc<dyn Pod>,
}

impl CachePod {
    pub fn new(local: Arc<dyn Pod>, remote: Arc<dyn Pod>) -> Self {
        Self { local, remote }
    }
}

impl Pod for CachePod {
    fn name(&self) -> &str {
        "cache"
    }

    fn read(&self, path: &str) -> PodResult<Vec<u8>> {
        if let Some(data) = self.local.read_opt(path)? {
            return Ok(data);
        }
        let data = self.remote.read(path)?;
        self.local.write(path, &data)?;
        Ok(data)
    }

    fn write(&self, path: &str, data: &[u8]) -> PodResult<()> {
        self.local.write(path, data)?;
        self.remote.write(path, data)
    }

    fn ls(&self, path: &str) -> PodResult<Vec<String>> {
        self.remote.ls(path)
    }

    fn is_dir(&self, path: &str) -> bool {
        self.remote.is_dir(path)
    }

    fn rm(&self, path: &str, recursive: bool) -> PodResult<()> {
        self.remote.rm(path, recursive)?;
        self.local.rm_missing_ok(path, recursive)
    }

    fn mv(&self, old: &str, new: &str) -> PodResult<()> {
        self.remote.mv(old, new)?;
        self.local.mv_missing_ok(old, new)
    }
}

/// A path-prefixed view of another pod, used to hand sub-trees (such as a
/// collection's changelog directory) to components that should not see the
/// rest of the repository.
#[derive(Debug, Clone)]
pub struct ScopedPod {
    pod: Arc<dyn Pod>,
    prefix: String,
}

impl ScopedPod {
    pub fn new(pod: Arc<dyn Pod>, prefix: impl Into<String>) -> Self {
        Self {
            pod,
            prefix: prefix.into(),
        }
    }

    /// A further-scoped view under `rel`.
    pub fn scope(&self, rel: &str) -> Self {
        Self {
            pod: self.pod.clone(),
            prefix: join(&self.prefix, rel),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Pod for ScopedPod {
    fn name(&self) -> &str {
        self.pod.name()
    }

    fn read(&self, path: &str) -> PodResult<Vec<u8>> {
        self.pod.read(&join(&self.prefix, path))
    }

    fn write(&self, path: &str, data: &[u8]) -> PodResult<()> {
        self.pod.write(&join(&self.prefix, path), data)
    }

    fn ls(&self, path: &str) -> PodResult<Vec<String>> {
        self.pod.ls(&join(&self.prefix, path))
    }

    fn is_dir(&self, path: &str) -> bool {
        self.pod.is_dir(&join(&self.prefix, path))
    }

    fn rm(&self, path: &str, recursive: bool) -> PodResult<()> {
        self.pod.rm(&join(&self.prefix, path), recursive)
    }

    fn mv(&self, old: &str, new: &str) -> PodResult<()> {
        self.pod
            .mv(&join(&self.prefix, old), &join(&self.prefix, new))
    }
}
