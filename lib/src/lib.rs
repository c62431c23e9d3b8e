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

//! Versioned, content-addressed time-series storage.
//!
//! varve stores ordered, schema-typed tabular data under hierarchical labels
//! grouped into collections within a repository. History is a
//! content-addressed revision DAG per collection: concurrent writers commit
//! lock-free against a shared [pod](pod::Pod), branches merge without
//! coordination, range reads collapse overlapping revisions under
//! newer-wins semantics, and unreferenced column blobs are garbage-collected
//! with a mark-and-delay sweep.
//!
//! ```
//! use std::sync::Arc;
//!
//! use varve_lib::frame::{Column, Frame};
//! use varve_lib::pod::MemoryPod;
//! use varve_lib::repo::Repo;
//! use varve_lib::schema::Schema;
//!
//! # fn main() -> Result<(), varve_lib::error::StoreError> {
//! let repo = Repo::new(Arc::new(MemoryPod::new()));
//! let schema = Schema::tabular(["timestamp timestamp*", "value float64"])?;
//! let collections = repo.create_collection(&schema, &["temperature"], true)?;
//! let series = collections[0].series("berlin")?;
//! series.write(Frame::new(
//!     schema.clone(),
//!     [
//!         ("timestamp".to_owned(), Column::Timestamp(vec![1, 2, 3])),
//!         ("value".to_owned(), Column::Float64(vec![18.5, 19.0, 18.7])),
//!     ],
//! )?)?;
//! assert_eq!(series.frame()?.len(), 3);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod batch;
pub mod changelog;
pub mod codec;
pub mod collection;
pub mod commit;
pub mod error;
pub mod frame;
pub mod hex_util;
pub mod hextime;
pub mod object_id;
pub mod pod;
pub mod repo;
pub mod schema;
pub mod segment;
pub mod series;
