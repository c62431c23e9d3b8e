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

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use testutils::TestRepo;
use testutils::frame_columns;
use testutils::sample_frame;
use testutils::sample_schema;
use varve_lib::error::StoreError;
use varve_lib::schema::Schema;

#[test]
fn test_push_pull_collection() {
    let local = TestRepo::init();
    let remote = TestRepo::init();

    let collection = local
        .repo
        .create_collection(&sample_schema(), &["temperature"], true)
        .unwrap()
        .remove(0);
    let series = collection.series("berlin").unwrap();
    // Write enough rows to spill actual blobs, not just embedded payloads
    let ts: Vec<i64> = (0..100).collect();
    let values: Vec<f64> = (0..100).map(|v| v as f64).collect();
    series.write(sample_frame(&ts, &values)).unwrap();

    local.repo.push(&remote.repo, &[]).unwrap();

    assert_eq!(remote.repo.ls().unwrap(), vec!["temperature".to_owned()]);
    let mirrored = remote.repo.collection("temperature").unwrap().unwrap();
    let mirrored_series = mirrored.series("berlin").unwrap();
    let (got_ts, got_values) = frame_columns(&mirrored_series.frame().unwrap());
    assert_eq!(got_ts, ts);
    assert_eq!(got_values, values);

    // With no local write in between, the leaves are identical
    assert_eq!(
        collection.changelog().leaf().unwrap(),
        mirrored.changelog().leaf().unwrap()
    );
}

#[test]
fn test_pull_is_idempotent() {
    let local = TestRepo::init();
    let remote = TestRepo::init();
    let collection = remote
        .repo
        .create_collection(&sample_schema(), &["temperature"], true)
        .unwrap()
        .remove(0);
    let ts: Vec<i64> = (0..100).collect();
    let values: Vec<f64> = (0..100).map(|v| v as f64).collect();
    collection
        .series("berlin")
        .unwrap()
        .write(sample_frame(&ts, &values))
        .unwrap();

    local.repo.pull(&remote.repo, &[]).unwrap();
    let files_after_first = testutils::blob_files(local.pod.as_ref());
    assert_eq!(files_after_first.len(), 2);
    local.repo.pull(&remote.repo, &[]).unwrap();
    assert_eq!(testutils::blob_files(local.pod.as_ref()), files_after_first);
}

#[test]
fn test_local_delete_leaves_remote_alone() {
    // Scenario: push A and B, delete B locally; the remote still has B
    let local = TestRepo::init();
    let remote = TestRepo::init();
    for label in ["a", "b"] {
        let collection = local
            .repo
            .create_collection(&sample_schema(), &[label], true)
            .unwrap()
            .remove(0);
        collection
            .series("s")
            .unwrap()
            .write(sample_frame(&[1], &[1.0]))
            .unwrap();
    }
    local.repo.push(&remote.repo, &[]).unwrap();
    assert_eq!(remote.repo.ls().unwrap(), vec!["a".to_owned(), "b".to_owned()]);

    local.repo.delete(&["b"]).unwrap();
    assert_eq!(local.repo.ls().unwrap(), vec!["a".to_owned()]);

    // The remote keeps collection b, with its data readable
    assert_eq!(remote.repo.ls().unwrap(), vec!["a".to_owned(), "b".to_owned()]);
    let b = remote.repo.collection("b").unwrap().unwrap();
    assert_eq!(b.series("s").unwrap().frame().unwrap().len(), 1);
}

#[test]
fn test_pull_selected_labels() {
    let local = TestRepo::init();
    let remote = TestRepo::init();
    for label in ["a", "b"] {
        let collection = remote
            .repo
            .create_collection(&sample_schema(), &[label], true)
            .unwrap()
            .remove(0);
        collection
            .series("s")
            .unwrap()
            .write(sample_frame(&[1], &[1.0]))
            .unwrap();
    }

    local.repo.pull(&remote.repo, &["a"]).unwrap();
    // The registry knows both, but only a's changelog was synced
    let a = local.repo.collection("a").unwrap().unwrap();
    assert_eq!(a.series("s").unwrap().frame().unwrap().len(), 1);
    let b = local.repo.collection("b").unwrap().unwrap();
    assert!(b.series("s").unwrap().frame().unwrap().is_empty());
}

#[test]
fn test_pull_rejects_schema_mismatch() {
    let local = TestRepo::init();
    let remote = TestRepo::init();
    remote
        .repo
        .create_collection(&sample_schema(), &["temperature"], true)
        .unwrap();
    let other = Schema::tabular(["ts int64*", "other float64"]).unwrap();
    local
        .repo
        .create_collection(&other, &["temperature"], true)
        .unwrap();

    assert_matches!(
        local.repo.pull(&remote.repo, &[]),
        Err(StoreError::SchemaMismatch(_))
    );
}

#[test]
fn test_bidirectional_sync_merges_registries() {
    let left = TestRepo::init();
    let right = TestRepo::init();
    left.repo
        .create_collection(&sample_schema(), &["only-left"], true)
        .unwrap();
    right
        .repo
        .create_collection(&sample_schema(), &["only-right"], true)
        .unwrap();

    left.repo.pull(&right.repo, &[]).unwrap();
    assert_eq!(
        left.repo.ls().unwrap(),
        vec!["only-left".to_owned(), "only-right".to_owned()]
    );

    right.repo.pull(&left.repo, &[]).unwrap();
    assert_eq!(
        right.repo.ls().unwrap(),
        vec!["only-left".to_owned(), "only-right".to_owned()]
    );
}
