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

use std::sync::Arc;

use tempfile::TempDir;
use varve_lib::frame::Column;
use varve_lib::frame::Frame;
use varve_lib::pod::FilePod;
use varve_lib::pod::MemoryPod;
use varve_lib::pod::Pod;
use varve_lib::repo::Repo;
use varve_lib::schema::Schema;

/// A repository over a throwaway pod. The temp dir, if any, lives as long as
/// this value.
pub struct TestRepo {
    pub repo: Repo,
    pub pod: Arc<dyn Pod>,
    _temp_dir: Option<TempDir>,
}

impl TestRepo {
    /// An in-memory repository.
    pub fn init() -> Self {
        let pod: Arc<dyn Pod> = Arc::new(MemoryPod::new());
        Self {
            repo: Repo::new(pod.clone()),
            pod,
            _temp_dir: None,
        }
    }

    /// A repository over a temporary directory.
    pub fn init_on_disk() -> Self {
        let temp_dir = new_temp_dir();
        let pod: Arc<dyn Pod> = Arc::new(FilePod::new(temp_dir.path()));
        Self {
            repo: Repo::new(pod.clone()),
            pod,
            _temp_dir: Some(temp_dir),
        }
    }
}

pub fn new_temp_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("varve-test-")
        .tempdir()
        .unwrap()
}

/// The schema most tests use: one integer index column, one value column.
pub fn sample_schema() -> Schema {
    Schema::tabular(["ts int64*", "value float64"]).unwrap()
}

/// A sample-schema frame from parallel literals.
pub fn sample_frame(ts: &[i64], values: &[f64]) -> Frame {
    assert_eq!(ts.len(), values.len());
    Frame::new(
        sample_schema(),
        [
            ("ts".to_owned(), Column::Int64(ts.to_vec())),
            ("value".to_owned(), Column::Float64(values.to_vec())),
        ],
    )
    .unwrap()
}

/// Shorthand for asserting on frame contents.
pub fn frame_columns(frame: &Frame) -> (Vec<i64>, Vec<f64>) {
    let Some(Column::Int64(ts)) = frame.column("ts") else {
        panic!("missing ts column");
    };
    let Some(Column::Float64(values)) = frame.column("value") else {
        panic!("missing value column");
    };
    (ts.clone(), values.clone())
}

/// Blob files currently on disk (two-level paths only), sorted.
pub fn blob_files(pod: &dyn Pod) -> Vec<String> {
    let mut files = vec![];
    for folder in pod.ls_or_empty("").unwrap() {
        if !pod.is_dir(&folder) {
            continue;
        }
        for name in pod.ls_or_empty(&folder).unwrap() {
            let path = format!("{folder}/{name}");
            if !pod.is_dir(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}
