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

//! In-memory columnar frames.
//!
//! A frame is a set of equal-length typed columns conforming to a schema,
//! sorted ascending by the index-column tuple. Range slicing takes closure
//! tags describing which endpoints are included, and bounds may be partial
//! index tuples: a bound compares against the matching prefix of each row,
//! so `[2]` against a two-column index covers every row starting with `2`.

use std::cmp::Ordering;

use crate::error::StoreError;
use crate::error::StoreResult;
use crate::schema::DataType;
use crate::schema::Schema;

/// A single typed cell.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Timestamp(i64),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn dtype(&self) -> DataType {
        match self {
            Self::Int(_) => DataType::Int64,
            Self::Float(_) => DataType::Float64,
            Self::Str(_) => DataType::Str,
            Self::Timestamp(_) => DataType::Timestamp,
            Self::Bytes(_) => DataType::Bytes,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Int(_) => 0,
            Self::Float(_) => 1,
            Self::Str(_) => 2,
            Self::Timestamp(_) => 3,
            Self::Bytes(_) => 4,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::Bytes(a), Self::Bytes(b)) => a.cmp(b),
            // Heterogeneous values never share a column; give them a stable
            // order anyway so bound tuples are totally ordered.
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

/// Compares an index tuple against a possibly partial bound.
///
/// Only the components the bound provides take part in the comparison, so a
/// row whose prefix equals the bound compares `Equal` and inclusion is then
/// decided by the closure tag.
pub fn cmp_prefix(tuple: &[Value], bound: &[Value]) -> Ordering {
    for (a, b) in tuple.iter().zip(bound) {
        match a.cmp(b) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Picks the tighter lower bound of two; on prefix equality the longer (more
/// specific) bound wins.
pub fn bound_max<'a>(a: &'a [Value], b: &'a [Value]) -> &'a [Value] {
    match cmp_prefix(a, b) {
        Ordering::Less => b,
        Ordering::Greater => a,
        Ordering::Equal => {
            if a.len() >= b.len() {
                a
            } else {
                b
            }
        }
    }
}

/// Picks the tighter upper bound of two; on prefix equality the longer bound
/// wins.
pub fn bound_min<'a>(a: &'a [Value], b: &'a [Value]) -> &'a [Value] {
    match cmp_prefix(a, b) {
        Ordering::Less => a,
        Ordering::Greater => b,
        Ordering::Equal => {
            if a.len() >= b.len() {
                a
            } else {
                b
            }
        }
    }
}

/// Which endpoints of a `[start, stop]` range are included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closed {
    Both,
    Left,
    Right,
    Neither,
}

impl Closed {
    pub fn include_left(self) -> bool {
        matches!(self, Self::Both | Self::Left)
    }

    pub fn include_right(self) -> bool {
        matches!(self, Self::Both | Self::Right)
    }

    pub fn from_flags(left: bool, right: bool) -> Self {
        match (left, right) {
            (true, true) => Self::Both,
            (true, false) => Self::Left,
            (false, true) => Self::Right,
            (false, false) => Self::Neither,
        }
    }

    /// Stops including the left endpoint, keeping the right as-is.
    pub fn drop_left(self) -> Self {
        Self::from_flags(false, self.include_right())
    }

    /// Stops including the right endpoint, keeping the left as-is.
    pub fn drop_right(self) -> Self {
        Self::from_flags(self.include_left(), false)
    }

    pub fn tag(self) -> u8 {
        match self {
            Self::Both => b'b',
            Self::Left => b'l',
            Self::Right => b'r',
            Self::Neither => b'n',
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'b' => Some(Self::Both),
            b'l' => Some(Self::Left),
            b'r' => Some(Self::Right),
            b'n' => Some(Self::Neither),
            _ => None,
        }
    }
}

/// One typed column of values.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Str(Vec<String>),
    Timestamp(Vec<i64>),
    Bytes(Vec<Vec<u8>>),
}

impl Column {
    pub fn empty(dtype: DataType) -> Self {
        match dtype {
            DataType::Int64 => Self::Int64(vec![]),
            DataType::Float64 => Self::Float64(vec![]),
            DataType::Str => Self::Str(vec![]),
            DataType::Timestamp => Self::Timestamp(vec![]),
            DataType::Bytes => Self::Bytes(vec![]),
        }
    }

    pub fn dtype(&self) -> DataType {
        match self {
            Self::Int64(_) => DataType::Int64,
            Self::Float64(_) => DataType::Float64,
            Self::Str(_) => DataType::Str,
            Self::Timestamp(_) => DataType::Timestamp,
            Self::Bytes(_) => DataType::Bytes,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Int64(values) | Self::Timestamp(values) => values.len(),
            Self::Float64(values) => values.len(),
            Self::Str(values) => values.len(),
            Self::Bytes(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn value(&self, pos: usize) -> Value {
        match self {
            Self::Int64(values) => Value::Int(values[pos]),
            Self::Float64(values) => Value::Float(values[pos]),
            Self::Str(values) => Value::Str(values[pos].clone()),
            Self::Timestamp(values) => Value::Timestamp(values[pos]),
            Self::Bytes(values) => Value::Bytes(values[pos].clone()),
        }
    }

    /// Appends a value of the column's own dtype.
    ///
    /// Panics on dtype mismatch; columns are only ever grown from values
    /// extracted from same-schema columns.
    pub fn push(&mut self, value: Value) {
        match (self, value) {
            (Self::Int64(values), Value::Int(v)) => values.push(v),
            (Self::Float64(values), Value::Float(v)) => values.push(v),
            (Self::Str(values), Value::Str(v)) => values.push(v),
            (Self::Timestamp(values), Value::Timestamp(v)) => values.push(v),
            (Self::Bytes(values), Value::Bytes(v)) => values.push(v),
            (column, value) => panic!(
                "cannot push {:?} value into {:?} column",
                value.dtype(),
                column.dtype()
            ),
        }
    }

    pub fn slice(&self, lo: usize, hi: usize) -> Self {
        match self {
            Self::Int64(values) => Self::Int64(values[lo..hi].to_vec()),
            Self::Float64(values) => Self::Float64(values[lo..hi].to_vec()),
            Self::Str(values) => Self::Str(values[lo..hi].to_vec()),
            Self::Timestamp(values) => Self::Timestamp(values[lo..hi].to_vec()),
            Self::Bytes(values) => Self::Bytes(values[lo..hi].to_vec()),
        }
    }

    pub fn concat(parts: &[&Self]) -> Self {
        let mut merged = Self::empty(parts[0].dtype());
        for part in parts {
            for pos in 0..part.len() {
                merged.push(part.value(pos));
            }
        }
        merged
    }

    fn permute(&self, perm: &[usize]) -> Self {
        let mut out = Self::empty(self.dtype());
        for &pos in perm {
            out.push(self.value(pos));
        }
        out
    }
}

impl FromIterator<i64> for Column {
    fn from_iter<T: IntoIterator<Item = i64>>(iter: T) -> Self {
        Self::Int64(iter.into_iter().collect())
    }
}

impl FromIterator<f64> for Column {
    fn from_iter<T: IntoIterator<Item = f64>>(iter: T) -> Self {
        Self::Float64(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for Column {
    fn from_iter<T: IntoIterator<Item = &'a str>>(iter: T) -> Self {
        Self::Str(iter.into_iter().map(str::to_owned).collect())
    }
}

/// Equal-length named columns conforming to a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    schema: Schema,
    columns: Vec<Column>,
}

impl Frame {
    /// Builds a frame from `(name, column)` pairs, in any order. All schema
    /// columns must be present with matching dtypes and equal lengths.
    pub fn new(
        schema: Schema,
        pairs: impl IntoIterator<Item = (String, Column)>,
    ) -> StoreResult<Self> {
        let mut slots: Vec<Option<Column>> = vec![None; schema.len()];
        for (name, column) in pairs {
            let pos = schema.position(&name).ok_or_else(|| {
                StoreError::SchemaMismatch(format!("unexpected column {name:?}"))
            })?;
            slots[pos] = Some(column);
        }
        let mut columns = vec![];
        for (def, slot) in schema.columns().zip(slots) {
            let column = slot.ok_or_else(|| {
                StoreError::SchemaMismatch(format!("missing column {:?}", def.name))
            })?;
            if column.dtype() != def.dtype {
                return Err(StoreError::SchemaMismatch(format!(
                    "column {:?} expects {:?}, got {:?}",
                    def.name,
                    def.dtype,
                    column.dtype()
                )));
            }
            columns.push(column);
        }
        let frame = Self { schema, columns };
        if let Some(first) = frame.columns.first() {
            let len = first.len();
            if frame.columns.iter().any(|column| column.len() != len) {
                return Err(StoreError::SchemaMismatch(
                    "columns have unequal lengths".into(),
                ));
            }
        }
        Ok(frame)
    }

    pub fn empty(schema: Schema) -> Self {
        let columns = schema
            .columns()
            .map(|def| Column::empty(def.dtype))
            .collect();
        Self { schema, columns }
    }

    pub(crate) fn from_ordered_columns(schema: Schema, columns: Vec<Column>) -> Self {
        debug_assert_eq!(schema.len(), columns.len());
        Self { schema, columns }
    }

    /// Rebuilds a frame from whole rows in schema order. Rows must already be
    /// sorted by index tuple.
    pub(crate) fn from_rows(schema: Schema, rows: impl IntoIterator<Item = Vec<Value>>) -> Self {
        let mut columns: Vec<Column> = schema
            .columns()
            .map(|def| Column::empty(def.dtype))
            .collect();
        for row in rows {
            for (column, value) in columns.iter_mut().zip(row) {
                column.push(value);
            }
        }
        Self { schema, columns }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.schema.position(name).map(|pos| &self.columns[pos])
    }

    pub(crate) fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// The index tuple of row `pos`.
    pub fn index_tuple(&self, pos: usize) -> Vec<Value> {
        self.columns[..self.schema.idx_len()]
            .iter()
            .map(|column| column.value(pos))
            .collect()
    }

    /// The whole row of row `pos`, in schema order.
    pub fn row(&self, pos: usize) -> Vec<Value> {
        self.columns.iter().map(|column| column.value(pos)).collect()
    }

    /// First index tuple, if any.
    pub fn start(&self) -> Option<Vec<Value>> {
        (!self.is_empty()).then(|| self.index_tuple(0))
    }

    /// Last index tuple, if any.
    pub fn stop(&self) -> Option<Vec<Value>> {
        (!self.is_empty()).then(|| self.index_tuple(self.len() - 1))
    }

    pub fn is_sorted(&self) -> bool {
        (1..self.len()).all(|pos| self.index_tuple(pos - 1) <= self.index_tuple(pos))
    }

    /// Stable-sorts rows by index tuple. Returns `self` unchanged when the
    /// frame is already sorted.
    pub fn sorted(self) -> Self {
        if self.is_sorted() {
            return self;
        }
        let mut perm: Vec<usize> = (0..self.len()).collect();
        perm.sort_by_key(|&pos| self.index_tuple(pos));
        let columns = self
            .columns
            .iter()
            .map(|column| column.permute(&perm))
            .collect();
        Self {
            schema: self.schema,
            columns,
        }
    }

    pub fn slice(&self, lo: usize, hi: usize) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|column| column.slice(lo, hi))
            .collect();
        Self {
            schema: self.schema.clone(),
            columns,
        }
    }

    pub fn concat(schema: &Schema, frames: &[&Self]) -> StoreResult<Self> {
        for frame in frames {
            if frame.schema() != schema {
                return Err(StoreError::SchemaMismatch(
                    "cannot concatenate frames of different schemas".into(),
                ));
            }
        }
        let columns = (0..schema.len())
            .map(|pos| {
                let parts: Vec<&Column> = frames.iter().map(|frame| &frame.columns[pos]).collect();
                Column::concat(&parts)
            })
            .collect();
        Ok(Self {
            schema: schema.clone(),
            columns,
        })
    }

    fn partition(&self, pred: impl Fn(&[Value]) -> bool) -> usize {
        // partition_point over row positions; the predicate must be monotone
        // over the sorted index.
        let mut lo = 0;
        let mut hi = self.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if pred(&self.index_tuple(mid)) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Row range covered by `[start, stop]` under `closed` semantics.
    /// `None` bounds are unbounded on that side.
    pub fn index_slice(
        &self,
        start: Option<&[Value]>,
        stop: Option<&[Value]>,
        closed: Closed,
    ) -> (usize, usize) {
        let lo = match start {
            None => 0,
            Some(bound) if closed.include_left() => {
                self.partition(|row| cmp_prefix(row, bound) == Ordering::Less)
            }
            Some(bound) => self.partition(|row| cmp_prefix(row, bound) != Ordering::Greater),
        };
        let hi = match stop {
            None => self.len(),
            Some(bound) if closed.include_right() => {
                self.partition(|row| cmp_prefix(row, bound) != Ordering::Greater)
            }
            Some(bound) => self.partition(|row| cmp_prefix(row, bound) == Ordering::Less),
        };
        (lo, hi.max(lo))
    }
}
