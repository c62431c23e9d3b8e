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

//! Typed, ordered column descriptions.
//!
//! A schema is declared one column per string: `"name dtype"` with a `*`
//! suffix on the dtype marking index membership and an optional trailing
//! codec name. Index columns must form a non-empty prefix; their
//! concatenation is the sort key of every frame in the collection. Schemas
//! are immutable once a collection is created.
//!
//! ```
//! use varve_lib::schema::Schema;
//!
//! let schema = Schema::tabular(["timestamp timestamp*", "value float64"]).unwrap();
//! assert_eq!(schema.idx().count(), 1);
//! ```

use serde::Deserialize;
use serde::Serialize;

use crate::codec::DEFAULT_CODEC;
use crate::error::StoreError;
use crate::error::StoreResult;

/// Element type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int64,
    Float64,
    Str,
    /// Microseconds since the Unix epoch.
    Timestamp,
    Bytes,
}

impl DataType {
    fn parse(text: &str) -> Option<Self> {
        match text {
            "int64" | "int" => Some(Self::Int64),
            "float64" | "float" => Some(Self::Float64),
            "str" => Some(Self::Str),
            "timestamp" => Some(Self::Timestamp),
            "bytes" => Some(Self::Bytes),
            _ => None,
        }
    }
}

/// Whether a schema describes ordinary tabular data or a last-write-wins
/// key/value map (used by the repository registry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaKind {
    Tabular,
    Kv,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub dtype: DataType,
    pub codec: String,
    pub index: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<ColumnDef>,
    kind: SchemaKind,
}

impl Schema {
    pub fn tabular<'a>(declarations: impl IntoIterator<Item = &'a str>) -> StoreResult<Self> {
        Self::parse(declarations, SchemaKind::Tabular)
    }

    pub fn kv<'a>(declarations: impl IntoIterator<Item = &'a str>) -> StoreResult<Self> {
        Self::parse(declarations, SchemaKind::Kv)
    }

    fn parse<'a>(
        declarations: impl IntoIterator<Item = &'a str>,
        kind: SchemaKind,
    ) -> StoreResult<Self> {
        let mut columns = vec![];
        for decl in declarations {
            columns.push(parse_column(decl)?);
        }
        let schema = Self { columns, kind };
        schema.validate()?;
        Ok(schema)
    }

    fn validate(&self) -> StoreResult<()> {
        let mismatch = |reason: String| Err(StoreError::SchemaMismatch(reason));
        if self.columns.is_empty() {
            return mismatch("a schema needs at least one column".into());
        }
        if !self.columns[0].index {
            return mismatch("the first schema column must be an index column".into());
        }
        // Index columns form a contiguous prefix
        let idx_len = self.idx().count();
        if self.columns[..idx_len].iter().any(|col| !col.index) {
            return mismatch("index columns must form a prefix".into());
        }
        for (pos, col) in self.columns.iter().enumerate() {
            if self.columns[..pos].iter().any(|other| other.name == col.name) {
                return mismatch(format!("duplicated column {:?}", col.name));
            }
        }
        Ok(())
    }

    pub fn kind(&self) -> SchemaKind {
        self.kind
    }

    pub fn columns(&self) -> impl ExactSizeIterator<Item = &ColumnDef> {
        self.columns.iter()
    }

    /// The index columns, in sort-key order.
    pub fn idx(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|col| col.index)
    }

    pub fn idx_len(&self) -> usize {
        self.idx().count()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|col| col.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }

    /// Serialises the schema for registry metadata.
    pub fn dumps(&self) -> String {
        serde_json::to_string(self).expect("schema serialization is infallible")
    }

    pub fn loads(text: &str) -> StoreResult<Self> {
        let schema: Self = serde_json::from_str(text)
            .map_err(|err| StoreError::CorruptPayload(format!("bad schema: {err}")))?;
        schema.validate()?;
        Ok(schema)
    }
}

fn parse_column(decl: &str) -> StoreResult<ColumnDef> {
    let mismatch = || StoreError::SchemaMismatch(format!("bad column declaration {decl:?}"));
    let mut words = decl.split_whitespace();
    let name = words.next().ok_or_else(mismatch)?;
    let mut dtype = words.next().ok_or_else(mismatch)?;
    let index = dtype.ends_with('*');
    if index {
        dtype = &dtype[..dtype.len() - 1];
    }
    let dtype = DataType::parse(dtype).ok_or_else(mismatch)?;
    let codec = words.next().unwrap_or(DEFAULT_CODEC);
    if words.next().is_some() {
        return Err(mismatch());
    }
    Ok(ColumnDef {
        name: name.to_owned(),
        dtype,
        codec: codec.to_owned(),
        index,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_parse_declarations() {
        let schema = Schema::tabular(["timestamp timestamp*", "value float64"]).unwrap();
        assert_eq!(schema.kind(), SchemaKind::Tabular);
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.idx_len(), 1);
        let ts = schema.column("timestamp").unwrap();
        assert_eq!(ts.dtype, DataType::Timestamp);
        assert!(ts.index);
        assert_eq!(schema.column("value").unwrap().codec, DEFAULT_CODEC);
        assert_eq!(schema.position("value"), Some(1));
    }

    #[test]
    fn test_parse_codec_and_aliases() {
        let schema = Schema::tabular(["key int*", "payload bytes raw"]).unwrap();
        assert_eq!(schema.column("key").unwrap().dtype, DataType::Int64);
        assert_eq!(schema.column("payload").unwrap().codec, "raw");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_matches!(
            Schema::tabular(["novalue"]),
            Err(StoreError::SchemaMismatch(_))
        );
        assert_matches!(
            Schema::tabular(["a decimal*"]),
            Err(StoreError::SchemaMismatch(_))
        );
        assert_matches!(Schema::tabular([]), Err(StoreError::SchemaMismatch(_)));
        // Index columns must be a prefix
        assert_matches!(
            Schema::tabular(["a int", "b int*"]),
            Err(StoreError::SchemaMismatch(_))
        );
        assert_matches!(
            Schema::tabular(["a int*", "a float"]),
            Err(StoreError::SchemaMismatch(_))
        );
    }

    #[test]
    fn test_dumps_round_trip() {
        let schema = Schema::kv(["label str*", "meta str"]).unwrap();
        let loaded = Schema::loads(&schema.dumps()).unwrap();
        assert_eq!(loaded, schema);
        assert_eq!(loaded.kind(), SchemaKind::Kv);
    }
}
