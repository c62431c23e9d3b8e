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
use varve_lib::collection::Collection;
use varve_lib::error::StoreError;
use varve_lib::frame::Column;
use varve_lib::frame::Frame;
use varve_lib::frame::Value;

fn new_collection(test_repo: &TestRepo) -> Collection {
    let mut created = test_repo
        .repo
        .create_collection(&sample_schema(), &["readings"], true)
        .unwrap();
    created.remove(0)
}

#[test]
fn test_write_read_round_trip() {
    let test_repo = TestRepo::init();
    let collection = new_collection(&test_repo);
    let series = collection.series("berlin").unwrap();

    let frame = sample_frame(&[1, 2, 3], &[10.0, 20.0, 30.0]);
    let revisions = series.write(frame.clone()).unwrap();
    assert_eq!(revisions.len(), 1);

    // Dtypes included
    assert_eq!(series.frame().unwrap(), frame);
}

#[test]
fn test_unsorted_input_is_sorted_on_write() {
    let test_repo = TestRepo::init();
    let collection = new_collection(&test_repo);
    let series = collection.series("berlin").unwrap();

    series
        .write(sample_frame(&[3, 1, 2], &[30.0, 10.0, 20.0]))
        .unwrap();
    let (ts, values) = frame_columns(&series.frame().unwrap());
    assert_eq!(ts, vec![1, 2, 3]);
    assert_eq!(values, vec![10.0, 20.0, 30.0]);
}

#[test]
fn test_overlapping_write_newest_wins() {
    // Scenario: write [1,2,3] then [2,3,4]; the second write owns [2,4]
    let test_repo = TestRepo::init();
    let collection = new_collection(&test_repo);
    let series = collection.series("berlin").unwrap();

    series
        .write(sample_frame(&[1, 2, 3], &[10.0, 20.0, 30.0]))
        .unwrap();
    series
        .write(sample_frame(&[2, 3, 4], &[21.0, 31.0, 41.0]))
        .unwrap();

    let (ts, values) = frame_columns(&series.frame().unwrap());
    assert_eq!(ts, vec![1, 2, 3, 4]);
    assert_eq!(values, vec![10.0, 21.0, 31.0, 41.0]);
}

#[test]
fn test_inner_overwrite_keeps_flanks() {
    // Scenario: [1..10] -> 1.0, overwrite [3..7] -> 2.0
    let test_repo = TestRepo::init();
    let collection = new_collection(&test_repo);
    let series = collection.series("berlin").unwrap();

    let ts: Vec<i64> = (1..=10).collect();
    series.write(sample_frame(&ts, &[1.0; 10])).unwrap();
    series
        .write(sample_frame(&[3, 4, 5, 6, 7], &[2.0; 5]))
        .unwrap();

    let start = [Value::Int(0)];
    let stop = [Value::Int(10)];
    let frame = series.read(Some(&start), Some(&stop), None).unwrap();
    let (ts, values) = frame_columns(&frame);
    assert_eq!(ts, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    assert_eq!(
        values,
        vec![1.0, 1.0, 2.0, 2.0, 2.0, 2.0, 2.0, 1.0, 1.0, 1.0]
    );
}

#[test]
fn test_read_range_and_limit() {
    let test_repo = TestRepo::init();
    let collection = new_collection(&test_repo);
    let series = collection.series("berlin").unwrap();

    let ts: Vec<i64> = (1..=10).collect();
    let values: Vec<f64> = (1..=10).map(|v| v as f64).collect();
    series.write(sample_frame(&ts, &values)).unwrap();

    let start = [Value::Int(4)];
    let stop = [Value::Int(8)];
    let frame = series.read(Some(&start), Some(&stop), None).unwrap();
    let (ts, _) = frame_columns(&frame);
    assert_eq!(ts, vec![4, 5, 6, 7, 8]);

    let frame = series.read(None, None, Some(3)).unwrap();
    let (ts, _) = frame_columns(&frame);
    assert_eq!(ts, vec![1, 2, 3]);

    // A limit crossing several revisions still truncates exactly
    series
        .write(sample_frame(&[11, 12], &[11.0, 12.0]))
        .unwrap();
    let frame = series.read(None, None, Some(11)).unwrap();
    let (ts, _) = frame_columns(&frame);
    assert_eq!(ts, (1..=11).collect::<Vec<i64>>());
}

#[test]
fn test_read_empty_series() {
    let test_repo = TestRepo::init();
    let collection = new_collection(&test_repo);
    let series = collection.series("nothing-here").unwrap();
    let frame = series.frame().unwrap();
    assert!(frame.is_empty());
    assert_eq!(frame.schema(), &sample_schema());
}

#[test]
fn test_series_are_isolated_by_label() {
    let test_repo = TestRepo::init();
    let collection = new_collection(&test_repo);
    let berlin = collection.series("berlin").unwrap();
    let madrid = collection.series("madrid").unwrap();

    berlin.write(sample_frame(&[1, 2], &[1.0, 2.0])).unwrap();
    madrid.write(sample_frame(&[1, 2], &[8.0, 9.0])).unwrap();

    let (_, values) = frame_columns(&berlin.frame().unwrap());
    assert_eq!(values, vec![1.0, 2.0]);
    let (_, values) = frame_columns(&madrid.frame().unwrap());
    assert_eq!(values, vec![8.0, 9.0]);
    assert_eq!(
        collection.ls().unwrap(),
        vec!["berlin".to_owned(), "madrid".to_owned()]
    );
}

#[test]
fn test_paginate() {
    let test_repo = TestRepo::init();
    let collection = new_collection(&test_repo);
    let series = collection.series("berlin").unwrap();

    let ts: Vec<i64> = (0..10).collect();
    let values: Vec<f64> = (0..10).map(|v| v as f64).collect();
    series.write(sample_frame(&ts, &values)).unwrap();

    let pages: Vec<Frame> = series.paginate(4).unwrap().collect();
    assert_eq!(pages.len(), 3);
    assert_eq!(pages[0].len(), 4);
    assert_eq!(pages[1].len(), 4);
    assert_eq!(pages[2].len(), 2);
    let (ts, _) = frame_columns(&pages[2]);
    assert_eq!(ts, vec![8, 9]);

    let empty = collection.series("empty").unwrap();
    assert_eq!(empty.paginate(4).unwrap().count(), 0);
}

#[test]
fn test_delete_series() {
    let test_repo = TestRepo::init();
    let collection = new_collection(&test_repo);
    let berlin = collection.series("berlin").unwrap();
    let madrid = collection.series("madrid").unwrap();
    berlin.write(sample_frame(&[1], &[1.0])).unwrap();
    madrid.write(sample_frame(&[1], &[2.0])).unwrap();

    berlin.delete().unwrap();
    assert_eq!(collection.ls().unwrap(), vec!["madrid".to_owned()]);
    assert!(berlin.frame().unwrap().is_empty());
    // The other series is untouched
    assert_eq!(madrid.frame().unwrap().len(), 1);
}

#[test]
fn test_rejects_foreign_schema() {
    let test_repo = TestRepo::init();
    let collection = new_collection(&test_repo);
    let series = collection.series("berlin").unwrap();

    let other = varve_lib::schema::Schema::tabular(["ts int64*", "other float64"]).unwrap();
    let frame = Frame::new(
        other,
        [
            ("ts".to_owned(), Column::Int64(vec![1])),
            ("other".to_owned(), Column::Float64(vec![1.0])),
        ],
    )
    .unwrap();
    assert_matches!(series.write(frame), Err(StoreError::SchemaMismatch(_)));
}

#[test]
fn test_invalid_label() {
    let test_repo = TestRepo::init();
    let collection = new_collection(&test_repo);
    assert_matches!(
        collection.series("   "),
        Err(StoreError::InvalidLabel { .. })
    );
}

#[test]
fn test_multi_column_index_partial_bounds() {
    let test_repo = TestRepo::init();
    let schema =
        varve_lib::schema::Schema::tabular(["city str*", "ts int64*", "value float64"]).unwrap();
    let mut created = test_repo
        .repo
        .create_collection(&schema, &["weather"], true)
        .unwrap();
    let collection = created.remove(0);
    let series = collection.series("hourly").unwrap();

    let frame = Frame::new(
        schema,
        [
            (
                "city".to_owned(),
                Column::from_iter(["ber", "ber", "mad", "mad"]),
            ),
            ("ts".to_owned(), Column::Int64(vec![1, 2, 1, 2])),
            (
                "value".to_owned(),
                Column::Float64(vec![1.0, 2.0, 8.0, 9.0]),
            ),
        ],
    )
    .unwrap();
    series.write(frame).unwrap();

    // A one-component bound selects the whole prefix group
    let bound = [Value::Str("ber".to_owned())];
    let frame = series.read(Some(&bound), Some(&bound), None).unwrap();
    assert_eq!(frame.len(), 2);
    let Some(Column::Float64(values)) = frame.column("value") else {
        panic!();
    };
    assert_eq!(values, &vec![1.0, 2.0]);
}
