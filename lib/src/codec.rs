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

//! Column (de)serialisation.
//!
//! Two layers compose here. The typed layer turns a [`Column`] into bytes
//! with a fixed, dtype-determined encoding (little-endian numerics, length-
//! prefixed strings and byte arrays). The byte layer is a registry of named
//! codecs applied on top of that; commits and schemas store codec *names*,
//! never code, so a payload written by one process is readable by any other
//! that has the capability registered.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::error::StoreError;
use crate::error::StoreResult;
use crate::frame::Column;
use crate::schema::DataType;

/// Codec applied to payload columns unless the schema says otherwise.
pub const DEFAULT_CODEC: &str = "zstd";

type EncodeFn = fn(&[u8]) -> Vec<u8>;
type DecodeFn = fn(&[u8]) -> StoreResult<Vec<u8>>;

#[derive(Debug)]
pub struct ByteCodec {
    pub name: &'static str,
    encode: EncodeFn,
    decode: DecodeFn,
}

impl ByteCodec {
    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        (self.encode)(data)
    }

    pub fn decode(&self, data: &[u8]) -> StoreResult<Vec<u8>> {
        (self.decode)(data)
    }
}

fn zstd_encode(data: &[u8]) -> Vec<u8> {
    // Level 0 maps to the zstd library default.
    zstd::stream::encode_all(data, 0).expect("in-memory zstd encoding cannot fail")
}

fn zstd_decode(data: &[u8]) -> StoreResult<Vec<u8>> {
    zstd::stream::decode_all(data)
        .map_err(|err| StoreError::CorruptPayload(format!("zstd: {err}")))
}

fn raw_encode(data: &[u8]) -> Vec<u8> {
    data.to_vec()
}

fn raw_decode(data: &[u8]) -> StoreResult<Vec<u8>> {
    Ok(data.to_vec())
}

static REGISTRY: LazyLock<BTreeMap<&'static str, ByteCodec>> = LazyLock::new(|| {
    let codecs = [
        ByteCodec {
            name: "raw",
            encode: raw_encode,
            decode: raw_decode,
        },
        ByteCodec {
            name: "zstd",
            encode: zstd_encode,
            decode: zstd_decode,
        },
    ];
    codecs.into_iter().map(|codec| (codec.name, codec)).collect()
});

/// Looks a byte codec up by name.
pub fn lookup(name: &str) -> StoreResult<&'static ByteCodec> {
    REGISTRY
        .get(name)
        .ok_or_else(|| StoreError::Unsupported(format!("codec {name:?} not available")))
}

fn corrupt(dtype: DataType) -> StoreError {
    StoreError::CorruptPayload(format!("truncated {dtype:?} column"))
}

fn encode_vlen<'a>(items: impl ExactSizeIterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut out = vec![];
    out.extend_from_slice(&(items.len() as u32).to_le_bytes());
    for item in items {
        out.extend_from_slice(&(item.len() as u32).to_le_bytes());
        out.extend_from_slice(item);
    }
    out
}

fn take<'a>(rest: &mut &'a [u8], len: usize, dtype: DataType) -> StoreResult<&'a [u8]> {
    if rest.len() < len {
        return Err(corrupt(dtype));
    }
    let (head, tail) = rest.split_at(len);
    *rest = tail;
    Ok(head)
}

fn decode_vlen(data: &[u8], dtype: DataType) -> StoreResult<Vec<Vec<u8>>> {
    let mut rest = data;
    let count = u32::from_le_bytes(take(&mut rest, 4, dtype)?.try_into().unwrap());
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = u32::from_le_bytes(take(&mut rest, 4, dtype)?.try_into().unwrap());
        items.push(take(&mut rest, len as usize, dtype)?.to_vec());
    }
    Ok(items)
}

/// Serialises a column with the fixed per-dtype encoding.
pub fn encode_column(column: &Column) -> Vec<u8> {
    match column {
        Column::Int64(values) | Column::Timestamp(values) => {
            values.iter().flat_map(|v| v.to_le_bytes()).collect()
        }
        Column::Float64(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        Column::Str(values) => encode_vlen(values.iter().map(String::as_bytes)),
        Column::Bytes(values) => encode_vlen(values.iter().map(Vec::as_slice)),
    }
}

/// Deserialises a column of the given dtype.
pub fn decode_column(dtype: DataType, data: &[u8]) -> StoreResult<Column> {
    match dtype {
        DataType::Int64 | DataType::Timestamp => {
            if data.len() % 8 != 0 {
                return Err(corrupt(dtype));
            }
            let values = data
                .chunks_exact(8)
                .map(|chunk| i64::from_le_bytes(chunk.try_into().unwrap()))
                .collect();
            Ok(match dtype {
                DataType::Int64 => Column::Int64(values),
                _ => Column::Timestamp(values),
            })
        }
        DataType::Float64 => {
            if data.len() % 8 != 0 {
                return Err(corrupt(dtype));
            }
            let values = data
                .chunks_exact(8)
                .map(|chunk| f64::from_le_bytes(chunk.try_into().unwrap()))
                .collect();
            Ok(Column::Float64(values))
        }
        DataType::Str => {
            let items = decode_vlen(data, dtype)?;
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(String::from_utf8(item).map_err(|err| {
                    StoreError::CorruptPayload(format!("non-utf8 string column: {err}"))
                })?);
            }
            Ok(Column::Str(values))
        }
        DataType::Bytes => Ok(Column::Bytes(decode_vlen(data, dtype)?)),
    }
}

/// Full payload encoding for a column blob: typed encoding, then the named
/// byte codec.
pub fn encode_payload(column: &Column, codec: &str) -> StoreResult<Vec<u8>> {
    Ok(lookup(codec)?.encode(&encode_column(column)))
}

/// Inverse of [`encode_payload`].
pub fn decode_payload(dtype: DataType, codec: &str, data: &[u8]) -> StoreResult<Column> {
    decode_column(dtype, &lookup(codec)?.decode(data)?)
}
