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

//! Engine-level errors.

use thiserror::Error;

use crate::pod::PodError;

/// Error that may occur while operating on a repository.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Pod(#[from] PodError),
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("Invalid range {start} -> {stop}")]
    InvalidRange { start: String, stop: String },
    #[error("Label {label:?} already exists")]
    DuplicateLabel { label: String },
    #[error("Invalid label {label:?}")]
    InvalidLabel { label: String },
    #[error("Corrupt payload: {0}")]
    CorruptPayload(String),
    #[error("{0}")]
    Unsupported(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
